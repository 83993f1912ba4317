use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::info;

// CD numbers are stored uppercase, only ever inside url values.
static CD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"CD\d+").unwrap());

const APPEND_MARKER: &str = "# New reviews added by automation";

/// One persisted review summary. Historical entries may predate the
/// date/interest/tags fields, so those stay optional on both read and write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub question: String,
    pub answer: String,
    pub url: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interest: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

/// All CD numbers already present in the store, by raw-text scan. No
/// structured parse: the check must keep working on a file with a malformed
/// entry elsewhere.
pub fn existing_cd_numbers(path: &Path) -> Result<HashSet<String>> {
    if !path.exists() {
        return Ok(HashSet::new());
    }
    let text =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(scan_cd_numbers(&text))
}

fn scan_cd_numbers(text: &str) -> HashSet<String> {
    CD_RE
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Append new summaries after the existing content. Existing bytes are never
/// rewritten; callers must run `validate` afterwards.
pub fn append(path: &Path, summaries: &[Summary]) -> Result<()> {
    if summaries.is_empty() {
        return Ok(());
    }
    let block = append_block(summaries);
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    file.write_all(block.as_bytes())
        .with_context(|| format!("Failed to append to {}", path.display()))?;
    info!(
        "Appended {} new summaries to {}",
        summaries.len(),
        path.display()
    );
    Ok(())
}

fn append_block(summaries: &[Summary]) -> String {
    let entries: Vec<String> = summaries.iter().map(format_entry).collect();
    format!("\n\n{APPEND_MARKER}\n{}\n", entries.join("\n\n"))
}

/// Format one summary as a YAML list item. Question/answer are JSON-escaped
/// (a valid YAML double-quoted scalar), notes is a literal block scalar.
fn format_entry(summary: &Summary) -> String {
    let mut lines = Vec::new();
    lines.push(format!("- question: {}", quoted(&summary.question)));
    lines.push(format!("  answer: {}", quoted(&summary.answer)));
    lines.push(format!("  url: {}", summary.url));
    // |- strips the trailing newline so notes round-trip byte-for-byte
    lines.push("  notes: |-".to_string());
    for line in summary.notes.lines() {
        lines.push(format!("    {line}"));
    }
    if let Some(date) = &summary.date {
        lines.push(format!("  date: {date}"));
    }
    if let Some(interest) = summary.interest {
        lines.push(format!("  interest: {interest}"));
    }
    if let Some(tags) = &summary.tags {
        lines.push(format!(
            "  tags: {}",
            serde_json::to_string(tags).unwrap_or_default()
        ));
    }
    lines.join("\n")
}

fn quoted(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

/// Whole-file parse check. Failing this after an append is fatal for the
/// run.
pub fn validate(path: &Path) -> Result<()> {
    let text =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    validate_text(&text)
}

fn validate_text(text: &str) -> Result<()> {
    serde_yaml::from_str::<serde_yaml::Value>(text).context("YAML validation failed")?;
    Ok(())
}

pub fn load_all(path: &Path) -> Result<Vec<Summary>> {
    let text =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    parse_store(&text)
}

fn parse_store(text: &str) -> Result<Vec<Summary>> {
    // A fresh or comment-only store parses as YAML null.
    let parsed: Option<Vec<Summary>> =
        serde_yaml::from_str(text).context("Store does not parse as a summary list")?;
    Ok(parsed.unwrap_or_default())
}

/// Full structured rewrite. Only the date-backfill flow uses this; new
/// records always go through `append`.
pub fn save_all(path: &Path, summaries: &[Summary]) -> Result<()> {
    let text = render_store(summaries)?;
    fs::write(path, text).with_context(|| format!("Failed to write {}", path.display()))
}

fn render_store(summaries: &[Summary]) -> Result<String> {
    serde_yaml::to_string(summaries).context("Failed to serialize store")
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Summary {
        Summary {
            question: "Does exercise reduce chronic low back pain?".into(),
            answer: "Yes, moderately.".into(),
            url: "https://doi.org/10.1002/14651858.CD012345.pub2".into(),
            notes: "Evidence quality: moderate.\nBased on 12 trials.".into(),
            date: None,
            interest: Some(7),
            tags: Some(vec!["pain".into()]),
        }
    }

    #[test]
    fn entry_format() {
        let entry = format_entry(&sample());
        assert_eq!(
            entry,
            "- question: \"Does exercise reduce chronic low back pain?\"\n\
             \x20 answer: \"Yes, moderately.\"\n\
             \x20 url: https://doi.org/10.1002/14651858.CD012345.pub2\n\
             \x20 notes: |-\n\
             \x20   Evidence quality: moderate.\n\
             \x20   Based on 12 trials.\n\
             \x20 interest: 7\n\
             \x20 tags: [\"pain\"]"
        );
    }

    #[test]
    fn appended_block_reparses() {
        let block = append_block(&[sample()]);
        validate_text(&block).unwrap();
        let parsed = parse_store(&block).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0], sample());
    }

    #[test]
    fn append_after_existing_content() {
        let existing = render_store(&[Summary {
            question: "Old question?".into(),
            answer: "Old answer.".into(),
            url: "https://www.cochrane.org/CD067890".into(),
            notes: String::new(),
            date: Some("2020-05-01".into()),
            interest: None,
            tags: None,
        }])
        .unwrap();
        let full = format!("{existing}{}", append_block(&[sample()]));
        validate_text(&full).unwrap();
        let parsed = parse_store(&full).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].url, "https://www.cochrane.org/CD067890");
        assert_eq!(parsed[1], sample());
    }

    #[test]
    fn quoting_survives_special_characters() {
        let mut s = sample();
        s.question = "Does \"quoting\" work: yes/no?".into();
        s.answer = "Line one\nline two".into();
        let block = append_block(&[s.clone()]);
        let parsed = parse_store(&block).unwrap();
        assert_eq!(parsed[0].question, s.question);
        assert_eq!(parsed[0].answer, s.answer);
    }

    #[test]
    fn empty_notes_round_trip() {
        let mut s = sample();
        s.notes = String::new();
        let parsed = parse_store(&append_block(&[s])).unwrap();
        assert_eq!(parsed[0].notes, "");
    }

    #[test]
    fn corrupt_store_fails_validation() {
        assert!(validate_text("- question: \"unterminated").is_err());
    }

    #[test]
    fn cd_scan_over_raw_text() {
        let text = "- question: \"Q\"\n  url: https://doi.org/10.1002/14651858.CD012345.pub2\n\
                    garbage that does not parse\n  url: https://www.cochrane.org/CD067890\n";
        let found = scan_cd_numbers(text);
        assert_eq!(
            found,
            HashSet::from(["CD012345".to_string(), "CD067890".to_string()])
        );
    }

    #[test]
    fn empty_store_parses_to_no_entries() {
        assert!(parse_store("").unwrap().is_empty());
        assert!(parse_store("\n\n# just a comment\n").unwrap().is_empty());
    }

    #[test]
    fn render_omits_absent_optionals() {
        let mut s = sample();
        s.interest = None;
        s.tags = None;
        let text = render_store(&[s]).unwrap();
        assert!(!text.contains("interest"));
        assert!(!text.contains("tags"));
        let parsed = parse_store(&text).unwrap();
        assert_eq!(parsed[0].interest, None);
    }
}
