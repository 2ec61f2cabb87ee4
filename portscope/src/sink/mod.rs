//! Output sink
//!
//! Bounded, styled text buffer that channels render into. Text is stored as
//! one `String` plus a contiguous run of styled byte spans covering all of
//! it. When the character count exceeds the capacity, the oldest content is
//! evicted up to a line boundary.
//!
//! A sink has a single writer at a time; display code reads through
//! `snapshot()` while holding the lock only for the copy.

mod decorate;
mod search;
mod suppress;

pub use decorate::{sanitize, Decorator};
pub use search::{find_all, SearchCursor};
pub use suppress::{LineSuppressor, LineVerdict};

use crate::highlight::{Color, RuleSnapshot};
use std::collections::VecDeque;
use std::ops::Range;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub const DEFAULT_CAPACITY: usize = 5_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Style {
    Plain,
    Timestamp,
    Highlight { fore: Color, back: Color },
    /// Warnings and errors generated by the monitor itself.
    Notice,
    /// Collapsed repeat summary.
    Summary,
    /// Lines sent by the operator.
    Transmit,
}

impl Style {
    /// Body text is what the highlight overlay is allowed to restyle.
    fn is_body(self) -> bool {
        matches!(self, Style::Plain | Style::Highlight { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Span {
    pub range: Range<usize>,
    pub style: Style,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SinkSnapshot {
    pub text: String,
    pub spans: Vec<Span>,
    pub revision: u64,
}

pub type SharedSink = Arc<Mutex<OutputSink>>;

/// Locks a shared sink, recovering it if a previous holder panicked.
pub fn lock(sink: &SharedSink) -> MutexGuard<'_, OutputSink> {
    sink.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
pub struct OutputSink {
    text: String,
    spans: VecDeque<Span>,
    /// Number of chars in `text`.
    chars: usize,
    capacity: usize,
    /// Byte offset of the summary line that may still be rewritten in place.
    summary_at: Option<usize>,
    revision: u64,
}

impl OutputSink {
    pub fn new(capacity: usize) -> OutputSink {
        OutputSink {
            text: String::new(),
            spans: VecDeque::new(),
            chars: 0,
            capacity: capacity.max(1),
            summary_at: None,
            revision: 0,
        }
    }

    pub fn shared(capacity: usize) -> SharedSink {
        Arc::new(Mutex::new(OutputSink::new(capacity)))
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn spans(&self) -> impl Iterator<Item = &Span> {
        self.spans.iter()
    }

    /// Size in characters.
    pub fn len(&self) -> usize {
        self.chars
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bumped on every change.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn snapshot(&self) -> SinkSnapshot {
        SinkSnapshot {
            text: self.text.clone(),
            spans: self.spans.iter().cloned().collect(),
            revision: self.revision,
        }
    }

    /// Text of every span with the given style, in order.
    pub fn styled(&self, style: Style) -> Vec<&str> {
        self.spans
            .iter()
            .filter(|s| s.style == style)
            .map(|s| &self.text[s.range.clone()])
            .collect()
    }

    /// Case-insensitive hits of `term` in the current text.
    pub fn find_all(&self, term: &str) -> Vec<Range<usize>> {
        find_all(&self.text, term)
    }

    pub fn push(&mut self, text: &str, style: Style) {
        if text.is_empty() {
            return;
        }
        self.summary_at = None;
        self.append(text, style);
    }

    /// Appends `text` split into plain and highlighted spans.
    pub fn push_highlighted(&mut self, text: &str, rules: &RuleSnapshot) {
        for segment in rules.segments(text) {
            let style = match segment.colors {
                Some((fore, back)) => Style::Highlight { fore, back },
                None => Style::Plain,
            };
            self.push(&text[segment.range], style);
        }
    }

    /// Writes a summary line, replacing the previous one if nothing has been
    /// appended after it.
    pub fn upsert_summary(&mut self, summary: &str) {
        if let Some(at) = self.summary_at.take() {
            self.truncate(at);
        }
        let at = self.text.len();
        self.append(summary, Style::Summary);
        self.append("\n", Style::Plain);
        self.summary_at = Some(at);
    }

    pub fn clear(&mut self) {
        self.text.clear();
        self.spans.clear();
        self.chars = 0;
        self.summary_at = None;
        self.revision += 1;
    }

    /// Evicts the oldest content if the sink is over capacity. At least a
    /// fifth of the content and at least the excess goes, cut after the next
    /// newline; without one the whole buffer goes. Returns whether anything
    /// was evicted.
    pub fn enforce_capacity(&mut self) -> bool {
        if self.chars <= self.capacity {
            return false;
        }
        let floor = (self.chars / 5).max(self.chars - self.capacity);
        let floor_byte = self
            .text
            .char_indices()
            .nth(floor)
            .map(|(i, _)| i)
            .unwrap_or(self.text.len());
        let cut = match self.text[floor_byte..].find('\n') {
            Some(i) => floor_byte + i + 1,
            None => self.text.len(),
        };
        self.evict_front(cut);
        true
    }

    /// Re-runs the highlight overlay over all body text, leaving timestamps,
    /// notices, summaries and sent lines alone. Running it twice with the
    /// same rules gives the same spans.
    pub fn reapply_highlights(&mut self, rules: &RuleSnapshot) {
        let old = std::mem::take(&mut self.spans);
        let mut rebuilt = VecDeque::with_capacity(old.len());
        let mut run: Option<Range<usize>> = None;
        for span in old {
            if span.style.is_body() {
                run = Some(match run {
                    Some(r) => r.start..span.range.end,
                    None => span.range,
                });
            } else {
                if let Some(r) = run.take() {
                    self.restyle(&mut rebuilt, r, rules);
                }
                push_span(&mut rebuilt, span.range, span.style);
            }
        }
        if let Some(r) = run.take() {
            self.restyle(&mut rebuilt, r, rules);
        }
        self.spans = rebuilt;
        self.revision += 1;
    }

    fn restyle(&self, spans: &mut VecDeque<Span>, run: Range<usize>, rules: &RuleSnapshot) {
        let offset = run.start;
        for segment in rules.segments(&self.text[run]) {
            let style = match segment.colors {
                Some((fore, back)) => Style::Highlight { fore, back },
                None => Style::Plain,
            };
            let range = segment.range.start + offset..segment.range.end + offset;
            push_span(spans, range, style);
        }
    }

    fn append(&mut self, text: &str, style: Style) {
        let start = self.text.len();
        self.text.push_str(text);
        self.chars += text.chars().count();
        push_span(&mut self.spans, start..self.text.len(), style);
        self.revision += 1;
    }

    fn truncate(&mut self, at: usize) {
        self.chars -= self.text[at..].chars().count();
        self.text.truncate(at);
        while let Some(last) = self.spans.back_mut() {
            if last.range.start >= at {
                self.spans.pop_back();
            } else {
                last.range.end = last.range.end.min(at);
                break;
            }
        }
        self.revision += 1;
    }

    fn evict_front(&mut self, cut: usize) {
        self.chars -= self.text[..cut].chars().count();
        self.text.drain(..cut);
        while let Some(first) = self.spans.front() {
            if first.range.end <= cut {
                self.spans.pop_front();
            } else {
                break;
            }
        }
        for span in self.spans.iter_mut() {
            span.range.start = span.range.start.max(cut) - cut;
            span.range.end -= cut;
        }
        self.summary_at = self.summary_at.and_then(|at| at.checked_sub(cut));
        self.revision += 1;
    }
}

impl Default for OutputSink {
    fn default() -> Self {
        OutputSink::new(DEFAULT_CAPACITY)
    }
}

/// Appends a span, merging it into the previous one when the style matches.
fn push_span(spans: &mut VecDeque<Span>, range: Range<usize>, style: Style) {
    if range.is_empty() {
        return;
    }
    if let Some(last) = spans.back_mut() {
        if last.style == style && last.range.end == range.start {
            last.range.end = range.end;
            return;
        }
    }
    spans.push_back(Span { range, style });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::highlight::{HighlightIndex, HighlightRule};

    fn assert_contiguous(sink: &OutputSink) {
        let mut at = 0;
        for span in sink.spans() {
            assert_eq!(span.range.start, at);
            assert!(sink.text().is_char_boundary(span.range.start));
            assert!(sink.text().is_char_boundary(span.range.end));
            at = span.range.end;
        }
        assert_eq!(at, sink.text().len());
    }

    #[test]
    fn eviction_respects_capacity_and_line_boundaries() {
        let mut sink = OutputSink::new(100);
        for i in 0..30 {
            sink.push(&format!("{:02}:😀😀😀\n", i), Style::Plain);
            let evicted = sink.enforce_capacity();
            assert!(sink.len() <= sink.capacity());
            assert!(!evicted || sink.text().starts_with(|c: char| c.is_ascii_digit()));
        }
        assert!(sink.text().ends_with("29:😀😀😀\n"));
        assert_eq!(sink.len(), sink.text().chars().count());
        assert_contiguous(&sink);
    }

    #[test]
    fn huge_overflow_still_fits() {
        let mut sink = OutputSink::new(10);
        sink.push("aaaa\nbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb\ncc\n", Style::Plain);
        assert!(sink.enforce_capacity());
        assert_eq!(sink.text(), "cc\n");
    }

    #[test]
    fn a_single_overlong_line_is_dropped_whole() {
        let mut sink = OutputSink::new(8);
        sink.push("0123456789abcdef", Style::Plain);
        assert!(sink.enforce_capacity());
        assert!(sink.is_empty());
        assert_eq!(sink.spans().count(), 0);
    }

    #[test]
    fn summary_is_rewritten_in_place_until_something_follows() {
        let mut sink = OutputSink::new(1000);
        sink.push("head\n", Style::Plain);
        sink.upsert_summary("\"X\" ×6 repeats — suppressed");
        sink.upsert_summary("\"X\" ×7 repeats — suppressed");
        assert_eq!(sink.text(), "head\n\"X\" ×7 repeats — suppressed\n");
        sink.push("next\n", Style::Plain);
        sink.upsert_summary("\"Y\" ×6 repeats — suppressed");
        assert_eq!(sink.styled(Style::Summary).len(), 2);
        assert_contiguous(&sink);
    }

    #[test]
    fn reapply_highlights_is_idempotent() {
        let index = HighlightIndex::new();
        let mut sink = OutputSink::new(1000);
        sink.push("[12:00:00.000] ", Style::Timestamp);
        sink.push("link ERR", Style::Plain);
        sink.push("OR here\n", Style::Plain);
        sink.push("[12:00:00.001] ", Style::Timestamp);
        sink.push("error again\n", Style::Plain);

        index
            .upsert(HighlightRule::new("error", Color::WHITE, Color::rgb(200, 0, 0)).unwrap())
            .unwrap();
        sink.reapply_highlights(&index.snapshot());
        let once = sink.snapshot();
        sink.reapply_highlights(&index.snapshot());
        let twice = sink.snapshot();

        assert_eq!(once.text, twice.text);
        assert_eq!(once.spans, twice.spans);
        let hits: Vec<_> = sink
            .spans()
            .filter(|s| matches!(s.style, Style::Highlight { .. }))
            .map(|s| &sink.text()[s.range.clone()])
            .collect();
        // The word split across two appends is found by the overlay.
        assert_eq!(hits, vec!["ERROR", "error"]);
        assert_eq!(sink.styled(Style::Timestamp).len(), 2);
        assert_contiguous(&sink);
    }

    #[test]
    fn clearing_rules_removes_highlights() {
        let index = HighlightIndex::with_rules(vec![
            HighlightRule::new("ok", Color::WHITE, Color::BLACK).unwrap()
        ])
        .unwrap();
        let mut sink = OutputSink::new(1000);
        sink.push_highlighted("all ok\n", &index.snapshot());
        assert_eq!(sink.spans().count(), 3);
        index.replace_all(Vec::new()).unwrap();
        sink.reapply_highlights(&index.snapshot());
        assert_eq!(sink.spans().count(), 1);
    }
}
