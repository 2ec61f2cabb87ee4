//! Plain text rule files, one `WORD | FORE | BACK` per line.

use super::store::LegacyRule;
use super::{HighlightRule, RulesError};
use std::fs;
use std::io;
use std::path::Path;

const HEADER: &str = "\
# portscope highlight rules
# Format: WORD | TEXT_COLOR_HEX | BACK_COLOR_HEX
# Example: ERROR | #FFFFFF | #CC0000
# Colors are #RRGGBB, or #AARRGGBB when not fully opaque
";

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ImportReport {
    pub rules: Vec<HighlightRule>,
    /// Lines or entries that could not be parsed.
    pub skipped: usize,
}

impl ImportReport {
    pub fn imported(&self) -> usize {
        self.rules.len()
    }
}

pub fn export_rules(rules: &[HighlightRule]) -> String {
    let mut out = String::from(HEADER);
    out.push('\n');
    for rule in rules {
        out.push_str(&format!("{} | {} | {}\n", rule.word, rule.fore, rule.back));
    }
    out
}

pub fn write_rules_file(path: &Path, rules: &[HighlightRule]) -> io::Result<()> {
    fs::write(path, export_rules(rules))
}

pub fn read_rules_file(path: &Path) -> Result<ImportReport, RulesError> {
    let bytes = fs::read(path)?;
    parse_rules(&String::from_utf8_lossy(&bytes))
}

/// Parses either the text format or a legacy JSON rule list.
pub fn parse_rules(content: &str) -> Result<ImportReport, RulesError> {
    let content = content.trim_start_matches('\u{feff}');
    if content.trim_start().starts_with('[') {
        parse_legacy(content)
    } else {
        Ok(parse_text(content))
    }
}

fn parse_text(content: &str) -> ImportReport {
    let mut report = ImportReport::default();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match parse_line(line) {
            Some(rule) => report.rules.push(rule),
            None => report.skipped += 1,
        }
    }
    report
}

fn parse_line(line: &str) -> Option<HighlightRule> {
    let parts: Vec<&str> = line.split('|').map(str::trim).collect();
    if parts.len() < 3 {
        return None;
    }
    let fore = parts[1].parse().ok()?;
    let back = parts[2].parse().ok()?;
    HighlightRule::new(parts[0], fore, back).ok()
}

fn parse_legacy(content: &str) -> Result<ImportReport, RulesError> {
    let entries: Vec<LegacyRule> = serde_json::from_str(content)?;
    let mut report = ImportReport::default();
    for entry in entries {
        match entry.into_rule() {
            Some(rule) => report.rules.push(rule),
            None => report.skipped += 1,
        }
    }
    Ok(report)
}
