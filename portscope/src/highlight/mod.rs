//! Highlight index
//!
//! Process-wide word to color rules, shared read-mostly by every channel.
//! Matching is case-insensitive and prefers the longest word. Readers take an
//! `Arc<RuleSnapshot>` and never observe a half-built rule set; writers
//! compile a fresh snapshot, persist it, then swap it in.

mod color;
mod rules_file;
mod store;

pub use color::{Color, ColorError};
pub use rules_file::{export_rules, parse_rules, read_rules_file, write_rules_file, ImportReport};
pub use store::RuleStore;

use crossbeam::sync::ShardedLock;
use regex::{Regex, RegexBuilder};
use std::collections::HashMap;
use std::ops::Range;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum RulesError {
    #[error("highlight word is empty")]
    EmptyWord,
    #[error("highlight word {0:?} may not contain line breaks or '|'")]
    InvalidWord(String),
    #[error(transparent)]
    Color(#[from] ColorError),
    #[error("rule file I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed rule list: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to build highlight matcher: {0}")]
    Regex(#[from] regex::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HighlightRule {
    pub word: String,
    pub fore: Color,
    pub back: Color,
}

impl HighlightRule {
    /// Validates and trims `word`.
    pub fn new(word: &str, fore: Color, back: Color) -> Result<HighlightRule, RulesError> {
        let word = word.trim();
        if word.is_empty() {
            return Err(RulesError::EmptyWord);
        }
        if word.contains(['\n', '\r', '|']) {
            return Err(RulesError::InvalidWord(word.to_string()));
        }
        Ok(HighlightRule {
            word: word.to_string(),
            fore,
            back,
        })
    }

    fn key(&self) -> String {
        self.word.to_lowercase()
    }
}

/// A contiguous piece of scanned text, colored if it matched a rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub range: Range<usize>,
    pub colors: Option<(Color, Color)>,
}

/// Immutable compiled form of a rule set.
#[derive(Debug, Default)]
pub struct RuleSnapshot {
    rules: Vec<HighlightRule>,
    colors: HashMap<String, (Color, Color)>,
    matcher: Option<Regex>,
}

impl RuleSnapshot {
    fn compile(rules: Vec<HighlightRule>) -> Result<RuleSnapshot, regex::Error> {
        let colors = rules.iter().map(|r| (r.key(), (r.fore, r.back))).collect();
        let matcher = if rules.is_empty() {
            None
        } else {
            let mut words: Vec<&str> = rules.iter().map(|r| r.word.as_str()).collect();
            // Alternation is leftmost-first, so longer words must come first.
            words.sort_by(|a, b| b.chars().count().cmp(&a.chars().count()));
            let pattern = words
                .iter()
                .map(|w| regex::escape(w))
                .collect::<Vec<_>>()
                .join("|");
            Some(RegexBuilder::new(&pattern).case_insensitive(true).build()?)
        };
        Ok(RuleSnapshot {
            rules,
            colors,
            matcher,
        })
    }

    pub fn rules(&self) -> &[HighlightRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn colors_for(&self, word: &str) -> Option<(Color, Color)> {
        self.colors.get(&word.to_lowercase()).copied()
    }

    /// Splits `text` into plain and matched segments covering all of it, in order.
    pub fn segments(&self, text: &str) -> Vec<Segment> {
        let mut out = Vec::new();
        if text.is_empty() {
            return out;
        }
        let mut last = 0;
        if let Some(matcher) = &self.matcher {
            for m in matcher.find_iter(text) {
                if m.start() > last {
                    out.push(Segment {
                        range: last..m.start(),
                        colors: None,
                    });
                }
                out.push(Segment {
                    range: m.range(),
                    colors: self.colors_for(m.as_str()),
                });
                last = m.end();
            }
        }
        if last < text.len() {
            out.push(Segment {
                range: last..text.len(),
                colors: None,
            });
        }
        out
    }
}

/// Shared handle to the current rule set. Clones share the same rules.
#[derive(Clone)]
pub struct HighlightIndex {
    current: Arc<ShardedLock<Arc<RuleSnapshot>>>,
    /// Serializes writers, and owns the durable store if there is one.
    store: Arc<Mutex<Option<RuleStore>>>,
}

impl HighlightIndex {
    /// An empty, purely in-memory index.
    pub fn new() -> HighlightIndex {
        HighlightIndex::from_snapshot(RuleSnapshot::default(), None)
    }

    pub fn with_rules(rules: Vec<HighlightRule>) -> Result<HighlightIndex, RulesError> {
        let mut merged = Vec::new();
        for rule in rules {
            upsert_into(&mut merged, rule);
        }
        Ok(HighlightIndex::from_snapshot(
            RuleSnapshot::compile(merged)?,
            None,
        ))
    }

    /// Loads the rules persisted in `store`, and persists every later change
    /// there. An unreadable store degrades to an empty rule set.
    pub fn open(store: RuleStore) -> HighlightIndex {
        let rules = store.load().unwrap_or_else(|err| {
            warn!(path = %store.path().display(), "ignoring unreadable highlight rules: {}", err);
            Vec::new()
        });
        let mut merged = Vec::new();
        for rule in rules {
            upsert_into(&mut merged, rule);
        }
        let snapshot = RuleSnapshot::compile(merged).unwrap_or_else(|err| {
            warn!("ignoring highlight rules that do not compile: {}", err);
            RuleSnapshot::default()
        });
        HighlightIndex::from_snapshot(snapshot, Some(store))
    }

    fn from_snapshot(snapshot: RuleSnapshot, store: Option<RuleStore>) -> HighlightIndex {
        HighlightIndex {
            current: Arc::new(ShardedLock::new(Arc::new(snapshot))),
            store: Arc::new(Mutex::new(store)),
        }
    }

    pub fn snapshot(&self) -> Arc<RuleSnapshot> {
        let current = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&current)
    }

    pub fn rules(&self) -> Vec<HighlightRule> {
        self.snapshot().rules.clone()
    }

    /// Adds a rule, or replaces the colors of an existing word (matched
    /// case-insensitively, keeping its original spelling and position).
    pub fn upsert(&self, rule: HighlightRule) -> Result<(), RulesError> {
        self.update(|rules| upsert_into(rules, rule))
    }

    /// Returns whether the word was present.
    pub fn remove(&self, word: &str) -> Result<bool, RulesError> {
        let key = word.trim().to_lowercase();
        self.update(|rules| {
            let before = rules.len();
            rules.retain(|r| r.key() != key);
            rules.len() != before
        })
    }

    pub fn replace_all(&self, rules: Vec<HighlightRule>) -> Result<(), RulesError> {
        self.update(|current| {
            current.clear();
            for rule in rules {
                upsert_into(current, rule);
            }
        })
    }

    /// Upserts every rule with a single rebuild and a single store write.
    pub fn merge(&self, rules: Vec<HighlightRule>) -> Result<(), RulesError> {
        self.update(|current| {
            for rule in rules {
                upsert_into(current, rule);
            }
        })
    }

    /// Merges the rules of an exported rule file or a legacy JSON list.
    pub fn import_file(&self, path: &Path) -> Result<ImportReport, RulesError> {
        let report = read_rules_file(path)?;
        self.merge(report.rules.clone())?;
        Ok(report)
    }

    /// Returns the number of rules written.
    pub fn export_file(&self, path: &Path) -> Result<usize, RulesError> {
        let snapshot = self.snapshot();
        write_rules_file(path, snapshot.rules())?;
        Ok(snapshot.len())
    }

    fn update<R>(&self, edit: impl FnOnce(&mut Vec<HighlightRule>) -> R) -> Result<R, RulesError> {
        let store = self.store.lock().unwrap_or_else(PoisonError::into_inner);
        let mut rules = self.snapshot().rules.clone();
        let out = edit(&mut rules);
        let next = Arc::new(RuleSnapshot::compile(rules)?);
        if let Some(store) = store.as_ref() {
            store.save(next.rules())?;
        }
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = next;
        Ok(out)
    }
}

impl Default for HighlightIndex {
    fn default() -> Self {
        HighlightIndex::new()
    }
}

fn upsert_into(rules: &mut Vec<HighlightRule>, rule: HighlightRule) {
    let key = rule.key();
    match rules.iter_mut().find(|r| r.key() == key) {
        Some(existing) => {
            existing.fore = rule.fore;
            existing.back = rule.back;
        }
        None => rules.push(rule),
    }
}
