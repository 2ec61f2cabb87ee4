use clap::Parser;
use crossterm::queue;
use crossterm::style::{Attribute, Color as TermColor, Print, ResetColor, SetAttribute, SetBackgroundColor, SetForegroundColor};
use portscope::config::{ConfigError, MonitorConfig};
use portscope::highlight::{Color, HighlightIndex, RuleStore};
use portscope::sink::{SinkSnapshot, Style};
use std::io::{self, Write};
use std::ops::Range;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug, Clone)]
pub struct CommonOpts {
    /// Monitor configuration (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Highlight rule store, instead of the configured one
    #[arg(long = "rules", value_name = "FILE")]
    pub rules: Option<PathBuf>,

    /// More diagnostics on stderr (repeat for more); RUST_LOG overrides
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl CommonOpts {
    pub fn load_config(&self) -> Result<MonitorConfig, ConfigError> {
        match &self.config {
            Some(path) => MonitorConfig::load(path),
            None => Ok(MonitorConfig::default()),
        }
    }

    pub fn rule_store(&self, config: &MonitorConfig) -> RuleStore {
        RuleStore::new(self.rules.clone().unwrap_or_else(|| config.rules_path.clone()))
    }

    pub fn open_highlights(&self, config: &MonitorConfig) -> HighlightIndex {
        HighlightIndex::open(self.rule_store(config))
    }
}

/// Installs the stderr subscriber. `RUST_LOG` wins over `verbose`.
pub fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| level.into()))
        .with_writer(io::stderr)
        .init();
}

/// Prints a line prefixed with the local time, e.g. `log!("%T%.3f ", "opened {}", url)`.
#[macro_export]
macro_rules! log {
    ($tf:expr, $msg:expr) => {{
        println!("{}{}", chrono::Local::now().format(&$tf), $msg);
    }};
    ($tf:expr, $f:expr, $($a:tt)*) => {{
        $crate::log!($tf, format!($f, $($a)*));
    }};
}

pub fn term_color(color: Color) -> TermColor {
    TermColor::Rgb {
        r: color.r,
        g: color.g,
        b: color.b,
    }
}

fn apply_style(out: &mut impl Write, style: Style) -> io::Result<()> {
    match style {
        Style::Plain => Ok(()),
        Style::Timestamp => queue!(out, SetForegroundColor(TermColor::DarkGrey)),
        Style::Highlight { fore, back } => queue!(
            out,
            SetForegroundColor(term_color(fore)),
            SetBackgroundColor(term_color(back))
        ),
        Style::Notice => queue!(
            out,
            SetForegroundColor(TermColor::Yellow),
            SetAttribute(Attribute::Bold)
        ),
        Style::Summary => queue!(
            out,
            SetForegroundColor(TermColor::DarkYellow),
            SetAttribute(Attribute::Italic)
        ),
        Style::Transmit => queue!(out, SetForegroundColor(TermColor::Cyan)),
    }
}

/// Byte offset of the start of the last `lines` lines of `text`. A final
/// newline does not start an extra line.
pub fn tail_start(text: &str, lines: usize) -> usize {
    if lines == 0 {
        return text.len();
    }
    let body = text.strip_suffix('\n').unwrap_or(text);
    body.rmatch_indices('\n')
        .nth(lines - 1)
        .map(|(i, _)| i + 1)
        .unwrap_or(0)
}

/// Byte range of up to `lines` lines, starting with the line containing
/// byte offset `at`.
pub fn window_at(text: &str, at: usize, lines: usize) -> Range<usize> {
    let start = text[..at].rfind('\n').map_or(0, |i| i + 1);
    if lines == 0 {
        return start..start;
    }
    let end = text[start..]
        .match_indices('\n')
        .nth(lines - 1)
        .map_or(text.len(), |(i, _)| start + i + 1);
    start..end
}

/// Writes the styled text of `snapshot` inside byte range `range`. In raw
/// terminal mode newlines must be written as `\r\n`.
pub fn write_styled(
    out: &mut impl Write,
    snapshot: &SinkSnapshot,
    range: Range<usize>,
    raw_mode: bool,
) -> io::Result<()> {
    for span in &snapshot.spans {
        if span.range.end <= range.start {
            continue;
        }
        if span.range.start >= range.end {
            break;
        }
        let start = span.range.start.max(range.start);
        let end = span.range.end.min(range.end);
        let text = &snapshot.text[start..end];
        apply_style(out, span.style)?;
        if raw_mode {
            queue!(out, Print(text.replace('\n', "\r\n")))?;
        } else {
            queue!(out, Print(text))?;
        }
        if span.style != Style::Plain {
            queue!(out, ResetColor, SetAttribute(Attribute::Reset))?;
        }
    }
    out.flush()
}

/// Serial port names the OS reports. Unless `all`, only USB ports.
pub fn enum_ports(all: bool) -> Vec<String> {
    let mut ports = Vec::new();
    if let Ok(available) = serialport::available_ports() {
        for p in available {
            let usb = matches!(p.port_type, serialport::SerialPortType::UsbPort(_));
            if !usb && !all {
                continue;
            }
            #[cfg(target_os = "macos")]
            if p.port_name.starts_with("/dev/tty.") && !all {
                continue;
            }
            ports.push(p.port_name);
        }
    }
    ports
}

#[cfg(test)]
mod tests {
    use super::*;
    use portscope::sink::OutputSink;

    #[test]
    fn tail_start_counts_lines_from_the_end() {
        let text = "one\ntwo\nthree\n";
        assert_eq!(&text[tail_start(text, 1)..], "three\n");
        assert_eq!(&text[tail_start(text, 2)..], "two\nthree\n");
        assert_eq!(tail_start(text, 10), 0);
        assert_eq!(tail_start(text, 0), text.len());
        assert_eq!(&"partial"[tail_start("partial", 1)..], "partial");
    }

    #[test]
    fn window_starts_at_the_line_of_a_hit() {
        let text = "one\ntwo error\nthree\nfour\n";
        let hit = text.find("error").unwrap();
        assert_eq!(&text[window_at(text, hit, 2)], "two error\nthree\n");
        assert_eq!(&text[window_at(text, hit, 10)], "two error\nthree\nfour\n");
        assert_eq!(&text[window_at(text, 1, 1)], "one\n");
    }

    #[test]
    fn styled_output_stops_at_the_window_end() {
        let mut sink = OutputSink::new(1000);
        sink.push("alpha\nbeta\ngamma\n", Style::Plain);
        let snapshot = sink.snapshot();
        let mut out = Vec::new();
        write_styled(&mut out, &snapshot, window_at(&snapshot.text, 6, 1), false).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "beta\n");
    }

    #[test]
    fn styled_output_uses_crlf_in_raw_mode() {
        let mut sink = OutputSink::new(1000);
        sink.push("[12:00:00.000] ", Style::Timestamp);
        sink.push("boot\nok\n", Style::Plain);
        let snapshot = sink.snapshot();

        let end = snapshot.text.len();
        let mut out = Vec::new();
        write_styled(&mut out, &snapshot, tail_start(&snapshot.text, 1)..end, true).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "ok\r\n");

        let mut out = Vec::new();
        write_styled(&mut out, &snapshot, 0..end, false).unwrap();
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("[12:00:00.000] "));
        assert!(out.ends_with("boot\nok\n"));
    }

    #[test]
    fn highlight_colors_map_to_rgb() {
        assert_eq!(
            term_color(Color::rgb(139, 0, 0)),
            TermColor::Rgb { r: 139, g: 0, b: 0 }
        );
    }

    #[test]
    fn options_parse() {
        let opts = CommonOpts::try_parse_from(["x", "-vv", "--rules", "r.json"]).unwrap();
        assert_eq!(opts.verbose, 2);
        let config = opts.load_config().unwrap();
        assert_eq!(opts.rule_store(&config).path(), std::path::Path::new("r.json"));
    }
}
