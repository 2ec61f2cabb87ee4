//! Persisted channel logs
//!
//! Each channel writes at most one archive file per lifetime, named
//! `{label}_{YYYY-MM-DD}_{HH-MM-SS}.txt` after the moment logging was first
//! enabled. Every line in it starts with `[YYYY-MM-DD HH:MM:SS.mmm] `.

use crate::sink::sanitize;
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, NaiveTime};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

static SESSION_FILE_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(.+?)_(\d{4}-\d{2}-\d{2})_(\d{2}-\d{2}-\d{2})\.txt$").expect("static regex")
});

/// File-name-safe label for a channel id: its last path component with
/// anything outside `[A-Za-z0-9._-]` replaced.
pub fn channel_label(id: &str) -> String {
    let last = id
        .trim_end_matches('/')
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(id);
    let label: String = last
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if label.is_empty() {
        "channel".to_string()
    } else {
        label
    }
}

pub fn session_file_name(label: &str, started: &DateTime<Local>) -> String {
    format!("{}_{}.txt", label, started.format("%Y-%m-%d_%H-%M-%S"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveName {
    pub label: String,
    pub started: NaiveDateTime,
}

pub fn parse_session_file_name(name: &str) -> Option<ArchiveName> {
    let caps = SESSION_FILE_NAME.captures(name)?;
    let date = NaiveDate::parse_from_str(&caps[2], "%Y-%m-%d").ok()?;
    let time = NaiveTime::parse_from_str(&caps[3], "%H-%M-%S").ok()?;
    Some(ArchiveName {
        label: caps[1].to_string(),
        started: date.and_time(time),
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedLog {
    pub path: PathBuf,
    /// Parsed from the file name, when it follows the session naming.
    pub name: Option<ArchiveName>,
    pub size: u64,
    pub modified: Option<SystemTime>,
}

/// Lists `*.txt` files in `dir`, newest first.
pub fn list_sessions(dir: &Path) -> io::Result<Vec<ArchivedLog>> {
    let mut logs = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("txt") {
            continue;
        }
        let meta = entry.metadata()?;
        if !meta.is_file() {
            continue;
        }
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(parse_session_file_name);
        logs.push(ArchivedLog {
            path,
            name,
            size: meta.len(),
            modified: meta.modified().ok(),
        });
    }
    logs.sort_by(|a, b| b.modified.cmp(&a.modified));
    Ok(logs)
}

/// `B`, `KB` with one decimal, or `MB` with two.
pub fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.2} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

/// An open archive file with its own line-start tracking.
#[derive(Debug)]
pub struct LogSession {
    path: PathBuf,
    file: File,
    at_line_start: bool,
}

impl LogSession {
    pub fn create(dir: &Path, label: &str, started: &DateTime<Local>) -> io::Result<LogSession> {
        fs::create_dir_all(dir)?;
        let path = dir.join(session_file_name(label, started));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(LogSession {
            path,
            file,
            at_line_start: true,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&mut self, text: &str, now: &DateTime<Local>) -> io::Result<()> {
        let formatted = self.format(text, now);
        if formatted.is_empty() {
            return Ok(());
        }
        self.file.write_all(formatted.as_bytes())
    }

    fn format(&mut self, text: &str, now: &DateTime<Local>) -> String {
        let text = sanitize(text).replace('\r', "");
        let stamp = now.format("[%Y-%m-%d %H:%M:%S%.3f] ").to_string();
        let mut out = String::with_capacity(text.len() + stamp.len());
        let mut parts = text.split('\n').peekable();
        while let Some(part) = parts.next() {
            if !part.is_empty() {
                if self.at_line_start {
                    out.push_str(&stamp);
                    self.at_line_start = false;
                }
                out.push_str(part);
            }
            if parts.peek().is_some() {
                out.push('\n');
                self.at_line_start = true;
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn moment() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 2).single().unwrap()
    }

    #[test]
    fn labels_are_file_name_safe() {
        assert_eq!(channel_label("/dev/ttyUSB0"), "ttyUSB0");
        assert_eq!(channel_label("serial://COM3:9600"), "COM3_9600");
        assert_eq!(channel_label("tcp://10.0.0.2:4000"), "10.0.0.2_4000");
        assert_eq!(channel_label("///"), "channel");
    }

    #[test]
    fn file_names_round_trip() {
        let name = session_file_name("ttyUSB0", &moment());
        assert_eq!(name, "ttyUSB0_2024-03-09_07-05-02.txt");
        let parsed = parse_session_file_name(&name).unwrap();
        assert_eq!(parsed.label, "ttyUSB0");
        assert_eq!(parsed.started, moment().naive_local());
        assert_eq!(
            parse_session_file_name("my_port_2024-03-09_07-05-02.txt").unwrap().label,
            "my_port"
        );
        assert!(parse_session_file_name("notes.txt").is_none());
        assert!(parse_session_file_name("x_2024-13-40_07-05-02.txt").is_none());
    }

    #[test]
    fn lines_are_prefixed_once() {
        let dir = TempDir::new().unwrap();
        let mut session = LogSession::create(&dir.path().join("Logs"), "COM3", &moment()).unwrap();
        session.write("boot\r\nrea", &moment()).unwrap();
        session.write("dy\n\x1b[32mok\x1b[0m\n", &moment()).unwrap();
        let text = fs::read_to_string(session.path()).unwrap();
        assert_eq!(
            text,
            "[2024-03-09 07:05:02.000] boot\n\
             [2024-03-09 07:05:02.000] ready\n\
             [2024-03-09 07:05:02.000] ok\n"
        );
    }

    #[test]
    fn sessions_are_listed_with_sizes() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("COM3_2024-03-09_07-05-02.txt"), "abc").unwrap();
        fs::write(dir.path().join("notes.md"), "skip").unwrap();
        let logs = list_sessions(dir.path()).unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].size, 3);
        assert_eq!(logs[0].name.as_ref().unwrap().label, "COM3");
    }

    #[test]
    fn sizes_are_human_readable() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(5 * 1024 * 1024 + 10 * 1024), "5.01 MB");
    }
}
