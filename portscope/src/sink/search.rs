use regex::RegexBuilder;
use std::ops::Range;
use tracing::debug;

/// Byte ranges of every case-insensitive, non-overlapping occurrence of
/// `term` in `text`. An empty term matches nothing.
pub fn find_all(text: &str, term: &str) -> Vec<Range<usize>> {
    if term.is_empty() {
        return Vec::new();
    }
    match RegexBuilder::new(&regex::escape(term))
        .case_insensitive(true)
        .build()
    {
        Ok(re) => re.find_iter(text).map(|m| m.range()).collect(),
        Err(err) => {
            debug!("search term rejected: {}", err);
            Vec::new()
        }
    }
}

/// Walks the hits of one search term. `next` and `prev` wrap around.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchCursor {
    term: String,
    hits: Vec<Range<usize>>,
    current: Option<usize>,
}

impl SearchCursor {
    pub fn new(term: &str, text: &str) -> SearchCursor {
        let mut cursor = SearchCursor {
            term: term.to_string(),
            hits: Vec::new(),
            current: None,
        };
        cursor.refresh(text);
        cursor
    }

    pub fn term(&self) -> &str {
        &self.term
    }

    pub fn hits(&self) -> &[Range<usize>] {
        &self.hits
    }

    /// Searches `text` again, e.g. after new output or an eviction. The
    /// selected hit number is kept where it still exists.
    pub fn refresh(&mut self, text: &str) {
        self.hits = find_all(text, &self.term);
        self.current = match (self.current, self.hits.len()) {
            (_, 0) => None,
            (Some(i), n) => Some(i.min(n - 1)),
            (None, _) => Some(0),
        };
    }

    pub fn current(&self) -> Option<Range<usize>> {
        self.current.map(|i| self.hits[i].clone())
    }

    pub fn next(&mut self) -> Option<Range<usize>> {
        let n = self.hits.len();
        if n == 0 {
            return None;
        }
        self.current = Some(self.current.map_or(0, |i| (i + 1) % n));
        self.current()
    }

    pub fn prev(&mut self) -> Option<Range<usize>> {
        let n = self.hits.len();
        if n == 0 {
            return None;
        }
        self.current = Some(self.current.map_or(n - 1, |i| (i + n - 1) % n));
        self.current()
    }

    /// `i / n`, 1-based; `0 / 0` without hits.
    pub fn counter(&self) -> String {
        match self.current {
            Some(i) => format!("{} / {}", i + 1, self.hits.len()),
            None => "0 / 0".to_string(),
        }
    }

    pub fn clear(&mut self) {
        *self = SearchCursor::default();
    }
}
