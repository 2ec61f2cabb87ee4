use crate::config::SuppressionConfig;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineVerdict {
    Render,
    /// Collapse into the running summary; carries the repeat count so far.
    Suppress(u32),
}

/// Collapses storms of identical complete lines. The first `threshold`
/// repeats inside the window render normally, the rest only bump a summary.
#[derive(Debug)]
pub struct LineSuppressor {
    threshold: u32,
    window: Duration,
    line: String,
    count: u32,
    window_start: Option<Instant>,
}

impl LineSuppressor {
    pub fn new(threshold: u32, window: Duration) -> LineSuppressor {
        LineSuppressor {
            threshold,
            window,
            line: String::new(),
            count: 0,
            window_start: None,
        }
    }

    pub fn from_config(config: &SuppressionConfig) -> LineSuppressor {
        LineSuppressor::new(config.threshold, Duration::from_millis(config.window_ms))
    }

    pub fn observe(&mut self, line: &str, now: Instant) -> LineVerdict {
        let in_window = self
            .window_start
            .is_some_and(|start| now.saturating_duration_since(start) <= self.window);
        if in_window && self.line == line {
            self.count += 1;
        } else {
            self.restart(line, now);
        }
        if self.count > self.threshold {
            LineVerdict::Suppress(self.count)
        } else {
            LineVerdict::Render
        }
    }

    /// Tracks `line` from a count of one, dropping any running summary.
    pub fn restart(&mut self, line: &str, now: Instant) {
        self.line.clear();
        self.line.push_str(line);
        self.count = 1;
        self.window_start = Some(now);
    }

    pub fn summary(line: &str, count: u32) -> String {
        format!("\"{}\" ×{} repeats — suppressed", line, count)
    }
}

impl Default for LineSuppressor {
    fn default() -> Self {
        LineSuppressor::from_config(&SuppressionConfig::default())
    }
}
