//! Bulk loading of archived logs into a sink.
//!
//! Loading runs in batches of lines; between batches the loader checks its
//! `CancellationToken`, reports progress and yields the thread, so a large
//! archive never holds the sink lock for long.

use crate::config::MonitorConfig;
use crate::highlight::HighlightIndex;
use crate::sink::{self, SharedSink, Style};
use crossbeam::channel::{self, Receiver};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, info};

pub const CANCELLED_NOTICE: &str = "⚠  Loading cancelled.";
pub const DEFAULT_BATCH_LINES: usize = 500;

static LOG_TIMESTAMP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\[\d{4}-\d{2}-\d{2} (\d{2}:\d{2}:\d{2}\.\d{3})\] ").expect("static regex")
});

const TRANSMIT_MARKER: &str = "[TX] ";

#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> CancellationToken {
        CancellationToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
pub enum LoadOutcome {
    Completed { lines: usize },
    Cancelled,
    Failed(io::Error),
}

#[derive(Debug)]
pub enum LoadEvent {
    /// Percentage of lines processed so far.
    Progress(u8),
    Finished(LoadOutcome),
}

#[derive(Clone)]
pub struct BulkLogLoader {
    highlights: HighlightIndex,
    batch_lines: usize,
}

impl BulkLogLoader {
    pub fn new(highlights: HighlightIndex, batch_lines: usize) -> BulkLogLoader {
        BulkLogLoader {
            highlights,
            batch_lines: batch_lines.max(1),
        }
    }

    pub fn from_config(highlights: HighlightIndex, config: &MonitorConfig) -> BulkLogLoader {
        BulkLogLoader::new(highlights, config.loader_batch_lines)
    }

    /// Replaces the sink contents with the archived log at `path`.
    pub fn load(
        &self,
        path: &Path,
        sink: &SharedSink,
        token: &CancellationToken,
        progress: impl FnMut(u8),
    ) -> LoadOutcome {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) => {
                debug!(path = %path.display(), "could not read log: {}", err);
                let mut sink = sink::lock(sink);
                sink.clear();
                sink.push(&format!("[ERROR] {}", err), Style::Notice);
                sink.push("\n", Style::Plain);
                return LoadOutcome::Failed(err);
            }
        };
        let text = String::from_utf8_lossy(&bytes);
        let outcome = self.load_text(&text, sink, token, progress);
        if let LoadOutcome::Completed { lines } = outcome {
            info!(path = %path.display(), lines, "log loaded");
        }
        outcome
    }

    pub fn load_text(
        &self,
        text: &str,
        sink: &SharedSink,
        token: &CancellationToken,
        mut progress: impl FnMut(u8),
    ) -> LoadOutcome {
        let text = text.replace("\r\n", "\n").replace('\r', "\n");
        let body = text.strip_suffix('\n').unwrap_or(&text);
        let lines: Vec<&str> = if body.is_empty() {
            Vec::new()
        } else {
            body.split('\n').collect()
        };
        let total = lines.len();

        sink::lock(sink).clear();
        let rules = self.highlights.snapshot();
        let mut done = 0;
        for batch in lines.chunks(self.batch_lines) {
            if token.is_cancelled() {
                return cancelled(sink);
            }
            {
                let mut sink = sink::lock(sink);
                for line in batch {
                    // Archived stamps carry the date; the view shows time only.
                    let rest = match LOG_TIMESTAMP.captures(line) {
                        Some(caps) => {
                            sink.push(&format!("[{}] ", &caps[1]), Style::Timestamp);
                            &line[caps[0].len()..]
                        }
                        None => line,
                    };
                    if rest.contains(TRANSMIT_MARKER) {
                        sink.push(rest, Style::Transmit);
                    } else {
                        sink.push_highlighted(rest, &rules);
                    }
                    sink.push("\n", Style::Plain);
                }
                sink.enforce_capacity();
            }
            done += batch.len();
            progress((done * 100 / total) as u8);
            thread::yield_now();
        }
        if token.is_cancelled() {
            return cancelled(sink);
        }
        if total == 0 {
            progress(100);
        }
        sink::lock(sink).reapply_highlights(&self.highlights.snapshot());
        LoadOutcome::Completed { lines: total }
    }

    /// Runs `load` on its own thread, reporting on the returned receiver.
    pub fn spawn(
        &self,
        path: PathBuf,
        sink: SharedSink,
        token: CancellationToken,
    ) -> io::Result<Receiver<LoadEvent>> {
        let (tx, rx) = channel::unbounded();
        let loader = self.clone();
        thread::Builder::new()
            .name(format!("load {}", path.display()))
            .spawn(move || {
                let outcome = loader.load(&path, &sink, &token, |pct| {
                    let _ = tx.send(LoadEvent::Progress(pct));
                });
                let _ = tx.send(LoadEvent::Finished(outcome));
            })?;
        Ok(rx)
    }
}

fn cancelled(sink: &SharedSink) -> LoadOutcome {
    let mut sink = sink::lock(sink);
    sink.clear();
    sink.push(CANCELLED_NOTICE, Style::Notice);
    sink.push("\n", Style::Plain);
    LoadOutcome::Cancelled
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::highlight::{Color, HighlightRule};
    use crate::sink::OutputSink;
    use tempfile::TempDir;

    fn loader(batch_lines: usize) -> BulkLogLoader {
        let rules = vec![HighlightRule::new("error", Color::WHITE, Color::rgb(139, 0, 0)).unwrap()];
        BulkLogLoader::new(HighlightIndex::with_rules(rules).unwrap(), batch_lines)
    }

    fn archive(lines: usize) -> String {
        (0..lines)
            .map(|i| format!("[2024-03-09 07:05:02.{:03}] sample {}\r\n", i % 1000, i))
            .collect()
    }

    #[test]
    fn archived_lines_are_styled() {
        let sink = OutputSink::shared(10_000);
        let text = "[2024-03-09 07:05:02.125] boot ERROR here\n\
                    [2024-03-09 07:05:02.300] [TX] reset error\n\
                    no stamp\n";
        let outcome = loader(500).load_text(text, &sink, &CancellationToken::new(), |_| {});
        assert!(matches!(outcome, LoadOutcome::Completed { lines: 3 }));

        let sink = sink::lock(&sink);
        assert_eq!(
            sink.styled(Style::Timestamp),
            vec!["[07:05:02.125] ", "[07:05:02.300] "]
        );
        assert!(sink.text().starts_with("[07:05:02.125] boot ERROR here\n"));
        assert_eq!(sink.styled(Style::Transmit), vec!["[TX] reset error"]);
        let highlighted: Vec<_> = sink
            .spans()
            .filter(|s| matches!(s.style, Style::Highlight { .. }))
            .map(|s| &sink.text()[s.range.clone()])
            .collect();
        assert_eq!(highlighted, vec!["ERROR"]);
        assert!(sink.text().ends_with("no stamp\n"));
    }

    #[test]
    fn progress_is_reported_per_batch() {
        let sink = OutputSink::shared(1_000_000);
        let mut seen = Vec::new();
        let outcome =
            loader(250).load_text(&archive(1000), &sink, &CancellationToken::new(), |p| seen.push(p));
        assert!(matches!(outcome, LoadOutcome::Completed { lines: 1000 }));
        assert_eq!(seen, vec![25, 50, 75, 100]);
        assert_eq!(sink::lock(&sink).text().lines().count(), 1000);
    }

    #[test]
    fn cancelled_load_leaves_only_the_notice() {
        let sink = OutputSink::shared(1_000_000);
        sink::lock(&sink).push("previous contents\n", Style::Plain);
        let token = CancellationToken::new();
        let outcome = loader(100).load_text(&archive(1000), &sink, &token, |pct| {
            if pct >= 30 {
                token.cancel();
            }
        });
        assert!(matches!(outcome, LoadOutcome::Cancelled));
        let sink = sink::lock(&sink);
        assert_eq!(sink.text(), format!("{}\n", CANCELLED_NOTICE));
        assert_eq!(sink.styled(Style::Notice), vec![CANCELLED_NOTICE]);
    }

    #[test]
    fn empty_file_completes() {
        let sink = OutputSink::shared(100);
        let mut seen = Vec::new();
        let outcome = loader(500).load_text("", &sink, &CancellationToken::new(), |p| seen.push(p));
        assert!(matches!(outcome, LoadOutcome::Completed { lines: 0 }));
        assert_eq!(seen, vec![100]);
        assert!(sink::lock(&sink).is_empty());
    }

    #[test]
    fn missing_file_fails_with_an_error_line() {
        let dir = TempDir::new().unwrap();
        let sink = OutputSink::shared(1000);
        let outcome = loader(500).load(
            &dir.path().join("gone.txt"),
            &sink,
            &CancellationToken::new(),
            |_| {},
        );
        assert!(matches!(outcome, LoadOutcome::Failed(_)));
        assert!(sink::lock(&sink).text().starts_with("[ERROR] "));
    }

    #[test]
    fn spawned_load_reports_completion() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("COM3_2024-03-09_07-05-02.txt");
        fs::write(&path, archive(20)).unwrap();
        let sink = OutputSink::shared(100_000);
        let events = loader(500)
            .spawn(path, sink.clone(), CancellationToken::new())
            .unwrap();
        let events: Vec<_> = events.iter().collect();
        assert!(matches!(events.first(), Some(LoadEvent::Progress(100))));
        assert!(matches!(
            events.last(),
            Some(LoadEvent::Finished(LoadOutcome::Completed { lines: 20 }))
        ));
        assert_eq!(sink::lock(&sink).text().lines().count(), 20);
    }
}
