//! Durable rule store: a JSON list rewritten wholesale on every change.

use super::{Color, HighlightRule, RulesError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// On-disk entry. Colors are packed signed ARGB.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct LegacyRule {
    #[serde(default)]
    word: String,
    fore_argb: i32,
    back_argb: i32,
}

impl LegacyRule {
    fn from_rule(rule: &HighlightRule) -> LegacyRule {
        LegacyRule {
            word: rule.word.clone(),
            fore_argb: rule.fore.to_argb(),
            back_argb: rule.back.to_argb(),
        }
    }

    pub(super) fn into_rule(self) -> Option<HighlightRule> {
        HighlightRule::new(
            &self.word,
            Color::from_argb(self.fore_argb),
            Color::from_argb(self.back_argb),
        )
        .ok()
    }
}

#[derive(Debug, Clone)]
pub struct RuleStore {
    path: PathBuf,
}

impl RuleStore {
    pub fn new(path: impl Into<PathBuf>) -> RuleStore {
        RuleStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing file is an empty rule set. Invalid entries are dropped.
    pub fn load(&self) -> Result<Vec<HighlightRule>, RulesError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let bytes = fs::read(&self.path)?;
        let text = String::from_utf8_lossy(&bytes);
        let text = text.trim_start_matches('\u{feff}');
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        let entries: Vec<LegacyRule> = serde_json::from_str(text)?;
        let total = entries.len();
        let rules: Vec<HighlightRule> = entries.into_iter().filter_map(LegacyRule::into_rule).collect();
        if rules.len() != total {
            debug!("dropped {} invalid stored highlight rules", total - rules.len());
        }
        Ok(rules)
    }

    /// Writes to a sibling temporary file then renames it over the store,
    /// so readers never see a partial list.
    pub fn save(&self, rules: &[HighlightRule]) -> Result<(), RulesError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let entries: Vec<LegacyRule> = rules.iter().map(LegacyRule::from_rule).collect();
        let json = serde_json::to_string_pretty(&entries)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::HighlightIndex;
    use super::*;
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    #[fixture]
    fn dir() -> TempDir {
        TempDir::new().unwrap()
    }

    #[rstest]
    fn missing_store_is_empty(dir: TempDir) {
        let store = RuleStore::new(dir.path().join("highlight_rules.json"));
        assert!(store.load().unwrap().is_empty());
    }

    #[rstest]
    fn mutations_are_persisted(dir: TempDir) {
        let path = dir.path().join("nested").join("highlight_rules.json");
        let index = HighlightIndex::open(RuleStore::new(&path));
        index
            .upsert(HighlightRule::new("PANIC", Color::WHITE, Color::rgb(139, 0, 0)).unwrap())
            .unwrap();
        index
            .upsert(HighlightRule::new("ready", Color::BLACK, Color::rgb(0, 100, 0)).unwrap())
            .unwrap();
        index.remove("ready").unwrap();

        let reopened = HighlightIndex::open(RuleStore::new(&path));
        assert_eq!(reopened.rules(), index.rules());
        assert_eq!(reopened.rules().len(), 1);

        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"Word\": \"PANIC\""));
        assert!(raw.contains("\"BackArgb\""));
    }

    #[rstest]
    fn corrupt_store_degrades_to_empty(dir: TempDir) {
        let path = dir.path().join("highlight_rules.json");
        fs::write(&path, "{ not json").unwrap();
        let index = HighlightIndex::open(RuleStore::new(&path));
        assert!(index.snapshot().is_empty());
        // The next mutation replaces the corrupt file.
        index
            .upsert(HighlightRule::new("x", Color::WHITE, Color::BLACK).unwrap())
            .unwrap();
        assert_eq!(RuleStore::new(&path).load().unwrap().len(), 1);
    }
}
