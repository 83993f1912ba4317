use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use tracing::{error, info};

use crate::llm::LlmClient;

const SUMMARIZE_PROMPT: &str = include_str!("../prompts/summarize.txt");
const ENRICH_PROMPT: &str = include_str!("../prompts/enrich.txt");

const SUMMARIZE_MAX_TOKENS: u32 = 500;
const ENRICH_MAX_TOKENS: u32 = 100;

// Midpoint of the 1-10 scale the enrichment prompt defines.
const DEFAULT_INTEREST: i64 = 5;

static JSON_OBJECT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)\{[^{}]*\}").unwrap());

/// The model's question/answer/notes output, before enrichment.
#[derive(Debug, Clone)]
pub struct SummaryDraft {
    pub question: String,
    pub answer: String,
    pub notes: String,
}

/// First brace-delimited JSON object in free-form model output.
fn extract_json_object(text: &str) -> Option<Value> {
    let candidate = JSON_OBJECT_RE.find(text)?;
    serde_json::from_str(candidate.as_str()).ok()
}

/// Turn a Plain Language Summary into a question/answer/notes draft.
/// Returns None on model failure, unparseable output, or an explicit skip.
pub async fn summarize(llm: &LlmClient, plain_language_summary: &str) -> Option<SummaryDraft> {
    let prompt = SUMMARIZE_PROMPT.replace("{plain_language_summary}", plain_language_summary);
    let response = match llm.complete(&prompt, SUMMARIZE_MAX_TOKENS).await {
        Ok(response) => response,
        Err(e) => {
            error!("Model call failed: {e:#}");
            return None;
        }
    };
    parse_summary(&response)
}

/// A skip object is a deliberate filtering decision (e.g. a protocol without
/// results), logged informationally; a shape mismatch is a parse failure.
fn parse_summary(response: &str) -> Option<SummaryDraft> {
    let Some(value) = extract_json_object(response) else {
        error!("Failed to parse summary JSON");
        return None;
    };

    if value.get("skip").and_then(Value::as_bool).unwrap_or(false) {
        let reason = value
            .get("reason")
            .and_then(Value::as_str)
            .unwrap_or("no results");
        info!("Skipping review: {reason}");
        return None;
    }

    let question = value.get("question").and_then(Value::as_str);
    let answer = value.get("answer").and_then(Value::as_str);
    let notes = value.get("notes").and_then(Value::as_str);
    match (question, answer, notes) {
        (Some(question), Some(answer), Some(notes)) => Some(SummaryDraft {
            question: question.to_string(),
            answer: answer.to_string(),
            notes: notes.to_string(),
        }),
        _ => {
            error!("Summary JSON is missing question/answer/notes");
            None
        }
    }
}

/// Second pass: interest score and tags for a draft. Missing fields get
/// defaults; a response with no JSON at all fails the enrichment.
pub async fn enrich(llm: &LlmClient, draft: &SummaryDraft) -> Option<(i64, Vec<String>)> {
    let prompt = ENRICH_PROMPT
        .replace("{question}", &draft.question)
        .replace("{answer}", &draft.answer)
        .replace("{notes}", &draft.notes);
    let response = match llm.complete(&prompt, ENRICH_MAX_TOKENS).await {
        Ok(response) => response,
        Err(e) => {
            error!("Model call failed: {e:#}");
            return None;
        }
    };
    parse_enrichment(&response)
}

fn parse_enrichment(response: &str) -> Option<(i64, Vec<String>)> {
    let Some(value) = extract_json_object(response) else {
        error!("Failed to parse enrichment JSON");
        return None;
    };
    let interest = value
        .get("interest")
        .and_then(Value::as_i64)
        .unwrap_or(DEFAULT_INTEREST);
    let tags = value
        .get("tags")
        .and_then(Value::as_array)
        .map(|tags| {
            tags.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    Some((interest, tags))
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_object_in_prose() {
        let value = extract_json_object(
            "Sure, here is the summary:\n{\"question\": \"Q?\"}\nLet me know if you need more.",
        )
        .unwrap();
        assert_eq!(value["question"], "Q?");
    }

    #[test]
    fn json_object_spanning_lines() {
        let value =
            extract_json_object("{\n  \"interest\": 7,\n  \"tags\": [\"pain\"]\n}").unwrap();
        assert_eq!(value["interest"], 7);
    }

    #[test]
    fn no_json_yields_none() {
        assert!(extract_json_object("I could not produce a summary.").is_none());
    }

    #[test]
    fn complete_summary_parses() {
        let draft = parse_summary(
            r#"{"question": "Does X help?", "answer": "Yes.", "notes": "Moderate evidence."}"#,
        )
        .unwrap();
        assert_eq!(draft.question, "Does X help?");
        assert_eq!(draft.answer, "Yes.");
        assert_eq!(draft.notes, "Moderate evidence.");
    }

    #[test]
    fn skip_flag_drops_candidate() {
        assert!(
            parse_summary(r#"{"skip": true, "reason": "protocol without results"}"#).is_none()
        );
    }

    #[test]
    fn false_skip_flag_is_not_a_skip() {
        let response = r#"{"skip": false, "question": "Q?", "answer": "A.", "notes": "N."}"#;
        assert!(parse_summary(response).is_some());
    }

    #[test]
    fn missing_field_is_parse_failure() {
        assert!(parse_summary(r#"{"question": "Q?", "answer": "A."}"#).is_none());
    }

    #[test]
    fn enrichment_with_both_fields() {
        let (interest, tags) =
            parse_enrichment(r#"{"interest": 7, "tags": ["pain", "exercise"]}"#).unwrap();
        assert_eq!(interest, 7);
        assert_eq!(tags, ["pain", "exercise"]);
    }

    #[test]
    fn enrichment_defaults_substituted_per_field() {
        let (interest, tags) = parse_enrichment(r#"{"tags": ["stroke"]}"#).unwrap();
        assert_eq!(interest, DEFAULT_INTEREST);
        assert_eq!(tags, ["stroke"]);

        let (interest, tags) = parse_enrichment("{}").unwrap();
        assert_eq!(interest, DEFAULT_INTEREST);
        assert!(tags.is_empty());
    }

    #[test]
    fn enrichment_without_json_fails() {
        assert!(parse_enrichment("no json here").is_none());
    }
}
