//! Live decoration: sanitizing, timestamps, repeat collapsing and highlights.

use super::{LineSuppressor, LineVerdict, OutputSink, Style};
use crate::clock::Clock;
use crate::highlight::HighlightIndex;
use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;
use std::sync::Arc;

static ANSI_ESCAPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\x1B(?:\[[0-9;]*[A-Za-z]|\][^\x07]*\x07|[()][0-9A-Za-z]|[^\[()#])")
        .expect("static regex")
});

/// Strips terminal escape sequences and control characters other than
/// newline, carriage return and tab.
pub fn sanitize(text: &str) -> Cow<'_, str> {
    let stripped = ANSI_ESCAPE.replace_all(text, "");
    let clean = |c: char| matches!(c, '\n' | '\r' | '\t') || (c >= ' ' && c != '\x7f');
    if stripped.chars().all(clean) {
        stripped
    } else {
        Cow::Owned(stripped.chars().filter(|&c| clean(c)).collect())
    }
}

/// Per-channel renderer. Owns the line-start flag and the repeat state, and
/// writes into whichever sink it is handed.
pub struct Decorator {
    at_line_start: bool,
    /// Text of the current unfinished line, already rendered.
    partial: String,
    suppressor: LineSuppressor,
    highlights: HighlightIndex,
    clock: Arc<dyn Clock>,
}

impl Decorator {
    pub fn new(
        highlights: HighlightIndex,
        suppressor: LineSuppressor,
        clock: Arc<dyn Clock>,
    ) -> Decorator {
        Decorator {
            at_line_start: true,
            partial: String::new(),
            suppressor,
            highlights,
            clock,
        }
    }

    pub fn at_line_start(&self) -> bool {
        self.at_line_start
    }

    /// Forget any partial line, e.g. after the sink was cleared.
    pub fn reset_line(&mut self) {
        self.at_line_start = true;
        self.partial.clear();
    }

    fn timestamp(&self) -> String {
        self.clock.wall().format("[%H:%M:%S%.3f] ").to_string()
    }

    pub fn render(&mut self, sink: &mut OutputSink, data: &str) {
        let data = sanitize(data);
        if data.is_empty() {
            return;
        }
        let rules = self.highlights.snapshot();
        let now = self.clock.now();
        let text = data.replace('\r', "");
        let mut parts = text.split('\n').peekable();
        while let Some(part) = parts.next() {
            let line_end = parts.peek().is_some();
            let continued = !self.at_line_start;
            if line_end && !continued && !part.is_empty() {
                if let LineVerdict::Suppress(count) = self.suppressor.observe(part, now) {
                    sink.upsert_summary(&LineSuppressor::summary(part, count));
                    continue;
                }
            }
            if !part.is_empty() {
                if self.at_line_start {
                    sink.push(&self.timestamp(), Style::Timestamp);
                    self.at_line_start = false;
                }
                sink.push_highlighted(part, &rules);
            }
            if !line_end {
                self.partial.push_str(part);
                continue;
            }
            if continued {
                // Already on screen, so it cannot be collapsed, but it still
                // ends whatever run was being tracked.
                self.partial.push_str(part);
                self.suppressor.restart(&self.partial, now);
            }
            self.partial.clear();
            sink.push("\n", Style::Plain);
            self.at_line_start = true;
        }
        self.enforce(sink);
    }

    /// Renders a monitor-generated line on a line of its own.
    pub fn notice(&mut self, sink: &mut OutputSink, text: &str) {
        self.own_line(sink, text, Style::Notice);
    }

    /// Renders a line sent by the operator.
    pub fn transmit(&mut self, sink: &mut OutputSink, text: &str) {
        self.own_line(sink, &format!("[TX] {}", sanitize(text)), Style::Transmit);
    }

    fn own_line(&mut self, sink: &mut OutputSink, text: &str, style: Style) {
        if !self.at_line_start {
            sink.push("\n", Style::Plain);
        }
        sink.push(&self.timestamp(), Style::Timestamp);
        sink.push(text, style);
        sink.push("\n", Style::Plain);
        self.at_line_start = true;
        self.partial.clear();
        self.enforce(sink);
    }

    fn enforce(&mut self, sink: &mut OutputSink) {
        if sink.enforce_capacity() {
            self.at_line_start = true;
            self.partial.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::highlight::{Color, HighlightRule};
    use std::time::Duration;

    fn decorator(clock: &ManualClock, highlights: HighlightIndex) -> Decorator {
        Decorator::new(highlights, LineSuppressor::default(), Arc::new(clock.clone()))
    }

    fn stamp(clock: &ManualClock) -> String {
        clock.wall().format("[%H:%M:%S%.3f] ").to_string()
    }

    #[test]
    fn sanitize_strips_escapes_and_controls() {
        assert_eq!(sanitize("\x1b[31mred\x1b[0m\tok\r\n"), "red\tok\r\n");
        assert_eq!(sanitize("a\x07b\x00c\x7f"), "abc");
        assert_eq!(sanitize("\x1b]0;title\x07body"), "body");
        assert!(matches!(sanitize("plain"), Cow::Borrowed(_)));
    }

    #[test]
    fn timestamps_once_per_line_across_fragments() {
        let clock = ManualClock::new();
        let mut sink = OutputSink::new(10_000);
        let mut deco = decorator(&clock, HighlightIndex::new());
        let ts = stamp(&clock);
        deco.render(&mut sink, "hel");
        assert!(!deco.at_line_start());
        deco.render(&mut sink, "lo\r\nwor");
        deco.render(&mut sink, "ld\n");
        assert!(deco.at_line_start());
        assert_eq!(sink.text(), format!("{ts}hello\n{ts}world\n"));
        assert_eq!(sink.styled(Style::Timestamp).len(), 2);
    }

    #[test]
    fn repeated_lines_collapse_into_one_summary() {
        let clock = ManualClock::new();
        let mut sink = OutputSink::new(10_000);
        let mut deco = decorator(&clock, HighlightIndex::new());
        for _ in 0..6 {
            deco.render(&mut sink, "X\n");
            clock.advance(Duration::from_millis(50));
        }
        assert_eq!(sink.styled(Style::Summary), vec!["\"X\" ×6 repeats — suppressed"]);
        deco.render(&mut sink, "X\n");
        assert_eq!(sink.styled(Style::Summary), vec!["\"X\" ×7 repeats — suppressed"]);
        assert_eq!(sink.text().matches("X\n").count(), 5);
        assert_eq!(sink.text().lines().count(), 6);

        deco.render(&mut sink, "Y\n");
        assert!(sink.text().ends_with("Y\n"));
    }

    #[test]
    fn a_line_split_across_fragments_ends_a_storm() {
        let clock = ManualClock::new();
        let mut sink = OutputSink::new(10_000);
        let mut deco = decorator(&clock, HighlightIndex::new());
        for _ in 0..5 {
            deco.render(&mut sink, "X\n");
        }
        deco.render(&mut sink, "ab");
        deco.render(&mut sink, "c\n");
        deco.render(&mut sink, "X\n");
        assert!(sink.styled(Style::Summary).is_empty());
        assert_eq!(sink.text().matches("X\n").count(), 6);
        assert_eq!(sink.text().matches("abc\n").count(), 1);
    }

    #[test]
    fn a_split_repeat_is_shown_and_restarts_the_count() {
        let clock = ManualClock::new();
        let mut sink = OutputSink::new(10_000);
        let mut deco = decorator(&clock, HighlightIndex::new());
        for _ in 0..6 {
            deco.render(&mut sink, "X\n");
        }
        assert_eq!(sink.styled(Style::Summary).len(), 1);
        deco.render(&mut sink, "X");
        deco.render(&mut sink, "\n");
        for _ in 0..4 {
            deco.render(&mut sink, "X\n");
        }
        assert_eq!(sink.styled(Style::Summary).len(), 1);
        assert_eq!(sink.text().matches("X\n").count(), 10);
        deco.render(&mut sink, "X\n");
        assert_eq!(sink.styled(Style::Summary).len(), 2);
    }

    #[test]
    fn highlights_apply_inside_lines_only() {
        let clock = ManualClock::new();
        let index = HighlightIndex::with_rules(vec![HighlightRule::new(
            "fail",
            Color::WHITE,
            Color::rgb(139, 0, 0),
        )
        .unwrap()])
        .unwrap();
        let mut sink = OutputSink::new(10_000);
        let mut deco = decorator(&clock, index);
        deco.render(&mut sink, "step FAIL\n");
        let highlighted: Vec<_> = sink
            .spans()
            .filter(|s| matches!(s.style, Style::Highlight { .. }))
            .map(|s| &sink.text()[s.range.clone()])
            .collect();
        assert_eq!(highlighted, vec!["FAIL"]);
    }

    #[test]
    fn notices_start_on_a_fresh_line() {
        let clock = ManualClock::new();
        let mut sink = OutputSink::new(10_000);
        let mut deco = decorator(&clock, HighlightIndex::new());
        let ts = stamp(&clock);
        deco.render(&mut sink, "partial");
        deco.notice(&mut sink, "[WARN] Port freeze prevented.");
        deco.transmit(&mut sink, "AT+RST");
        assert_eq!(
            sink.text(),
            format!("{ts}partial\n{ts}[WARN] Port freeze prevented.\n{ts}[TX] AT+RST\n")
        );
    }

    #[test]
    fn eviction_resets_line_start() {
        let clock = ManualClock::new();
        let mut sink = OutputSink::new(40);
        let mut deco = decorator(&clock, HighlightIndex::new());
        deco.render(&mut sink, "first line\nsecond line\nthird, unfinished");
        assert!(sink.len() <= 40);
        assert!(deco.at_line_start());
    }
}
