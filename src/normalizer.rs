//! Normalization of loosely-shaped agent responses.
//!
//! The agent contract is "JSON-ish at best": a response may be a structured
//! object, a JSON string (possibly wrapped in a fenced code block), or free
//! text. Normalization is total over strings and objects - it always yields
//! a fully-populated [`SummaryRecord`], and only rejects input whose
//! top-level type is neither.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::record::{reading_time_for, Highlight, Importance, SummaryRecord};

/// Placeholder title for responses that carry none.
const DEFAULT_TITLE: &str = "Untitled summary";
/// Placeholder body for responses that carry none.
const DEFAULT_SUMMARY: &str = "No summary was produced.";

const MAX_KEY_POINTS: usize = 5;
const MAX_KEYWORDS: usize = 8;
const MIN_SENTENCE_CHARS: usize = 10;

/// Recognized top-level fields; everything else is preserved verbatim.
const RESOLVED_FIELDS: [&str; 12] = [
    "title",
    "summary",
    "content",
    "keyPoints",
    "key_points",
    "keywords",
    "tags",
    "highlights",
    "readingTime",
    "reading_time",
    "sourceUrl",
    "createdAt",
];

lazy_static! {
    /// A fenced code block, optionally labeled `json`, anywhere in the text.
    static ref FENCED_BLOCK: Regex = Regex::new(r"(?s)```(?:json)?\s*(.*?)```").unwrap();
    /// Keyword candidates: 2+ CJK ideographs or 3+ Latin letters.
    static ref KEYWORD_TOKEN: Regex = Regex::new(r"\p{Han}{2,}|[A-Za-z]{3,}").unwrap();
}

#[derive(Error, Debug)]
pub enum FormatError {
    #[error("agent response is not text or a structured object (got {0})")]
    UnsupportedShape(&'static str),
}

/// Map an arbitrary agent response into a valid [`SummaryRecord`].
///
/// Strings that parse as JSON (bare or fenced) are always treated as
/// structured data, never as literal summary text. Strings that do not
/// parse get a record synthesized from the text itself. Objects are read
/// field by field with alias fallbacks and defaults. Anything else fails
/// with [`FormatError`].
pub fn normalize(raw: &Value, request_url: &str) -> Result<SummaryRecord, FormatError> {
    match raw {
        Value::String(text) => Ok(normalize_text(text, request_url)),
        Value::Object(fields) => Ok(normalize_object(fields, request_url)),
        other => Err(FormatError::UnsupportedShape(shape_name(other))),
    }
}

fn shape_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::Array(_) => "array",
        Value::String(_) => "string",
        Value::Object(_) => "object",
    }
}

fn normalize_text(text: &str, request_url: &str) -> SummaryRecord {
    let trimmed = text.trim();
    let candidate = extract_fenced(trimmed).unwrap_or(trimmed);

    match serde_json::from_str::<Value>(candidate) {
        Ok(Value::Object(fields)) => normalize_object(&fields, request_url),
        // Parseable but fieldless (a bare number, array, ...): structured
        // data with every recognized field missing, so defaults apply.
        Ok(_) => normalize_object(&Map::new(), request_url),
        Err(_) => synthesize_from_text(trimmed, request_url),
    }
}

fn extract_fenced(text: &str) -> Option<&str> {
    FENCED_BLOCK
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
}

/// Build a record out of plain prose the agent returned instead of JSON.
fn synthesize_from_text(text: &str, request_url: &str) -> SummaryRecord {
    SummaryRecord {
        title: DEFAULT_TITLE.to_string(),
        summary: text.to_string(),
        key_points: leading_sentences(text),
        keywords: frequent_tokens(text),
        highlights: Vec::new(),
        reading_time: reading_time_for(text),
        source_url: request_url.to_string(),
        created_at: Utc::now(),
        extra: Map::new(),
    }
}

/// Up to five sentences longer than ten characters, in document order.
fn leading_sentences(text: &str) -> Vec<String> {
    text.split(['.', '。', '!', '！', '?', '？'])
        .map(str::trim)
        .filter(|sentence| sentence.chars().count() > MIN_SENTENCE_CHARS)
        .take(MAX_KEY_POINTS)
        .map(str::to_string)
        .collect()
}

/// Up to eight most-frequent keyword tokens, ties broken by first
/// appearance. Matching is case-sensitive.
fn frequent_tokens(text: &str) -> Vec<String> {
    let mut counts: Vec<(String, usize)> = Vec::new();
    for token in KEYWORD_TOKEN.find_iter(text) {
        let token = token.as_str();
        match counts.iter_mut().find(|(seen, _)| seen.as_str() == token) {
            Some((_, count)) => *count += 1,
            None => counts.push((token.to_string(), 1)),
        }
    }
    // Stable sort keeps first-seen order among equal counts.
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts
        .into_iter()
        .take(MAX_KEYWORDS)
        .map(|(token, _)| token)
        .collect()
}

fn normalize_object(fields: &Map<String, Value>, request_url: &str) -> SummaryRecord {
    let title = scalar_field(fields, &["title"]);
    let summary = scalar_field(fields, &["summary", "content"]);
    let key_points = sequence_field(fields, &["keyPoints", "key_points"]);
    let keywords = sequence_field(fields, &["keywords", "tags"]);
    let reading_time = scalar_field(fields, &["readingTime", "reading_time"]);
    let source_url = scalar_field(fields, &["sourceUrl"]);

    let created_at = fields
        .get("createdAt")
        .and_then(Value::as_str)
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|parsed| parsed.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    let mut highlights = match fields.get("highlights") {
        Some(Value::Array(items)) => items.iter().map(highlight_from_value).collect(),
        _ => Vec::new(),
    };
    assign_highlight_ids(&mut highlights);

    let extra: Map<String, Value> = fields
        .iter()
        .filter(|(key, _)| !RESOLVED_FIELDS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    // Re-apply the never-empty defaults: an explicit field may have been
    // present but blank.
    let summary = non_blank(summary).unwrap_or_else(|| DEFAULT_SUMMARY.to_string());
    SummaryRecord {
        title: non_blank(title).unwrap_or_else(|| DEFAULT_TITLE.to_string()),
        reading_time: non_blank(reading_time).unwrap_or_else(|| reading_time_for(&summary)),
        source_url: non_blank(source_url).unwrap_or_else(|| request_url.to_string()),
        summary,
        key_points,
        keywords,
        highlights,
        created_at,
        extra,
    }
}

/// First present, truthy value among the given keys, coerced to a string.
fn scalar_field(fields: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| fields.get(*key))
        .find_map(truthy_string)
}

fn truthy_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) if n.as_f64() != Some(0.0) => Some(n.to_string()),
        Value::Bool(true) => Some("true".to_string()),
        _ => None,
    }
}

/// First present value among the given keys: an array is used as-is (even
/// when empty), a truthy scalar is wrapped in a single-element sequence.
fn sequence_field(fields: &Map<String, Value>, keys: &[&str]) -> Vec<String> {
    for key in keys {
        match fields.get(*key) {
            Some(Value::Array(items)) => {
                return items.iter().map(element_string).collect();
            }
            Some(scalar) => {
                if let Some(text) = truthy_string(scalar) {
                    return vec![text];
                }
            }
            None => {}
        }
    }
    Vec::new()
}

fn element_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn highlight_from_value(value: &Value) -> Highlight {
    match value {
        Value::Object(fields) => Highlight {
            id: fields
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            text: fields
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            importance: fields
                .get("importance")
                .and_then(Value::as_str)
                .map(Importance::parse)
                .unwrap_or_default(),
            category: fields
                .get("category")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        },
        Value::String(text) => Highlight {
            id: String::new(),
            text: text.clone(),
            importance: Importance::Medium,
            category: String::new(),
        },
        _ => Highlight {
            id: String::new(),
            text: String::new(),
            importance: Importance::Medium,
            category: String::new(),
        },
    }
}

/// Give every highlight a unique id. Missing, blank, and duplicate ids are
/// replaced positionally with `highlight-<index>`.
fn assign_highlight_ids(highlights: &mut [Highlight]) {
    let mut seen: HashSet<String> = HashSet::new();
    for (index, highlight) in highlights.iter_mut().enumerate() {
        let supplied = highlight.id.trim();
        let mut id = if supplied.is_empty() || seen.contains(supplied) {
            format!("highlight-{index}")
        } else {
            supplied.to_string()
        };
        let mut bump = index;
        while !seen.insert(id.clone()) {
            bump += 1;
            id = format!("highlight-{bump}");
        }
        highlight.id = id;
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const URL: &str = "http://example.test/article";

    #[test]
    fn fenced_json_is_structured_data() {
        let raw = Value::String("```json\n{\"title\":\"A\",\"summary\":\"B\"}\n```".to_string());
        let record = normalize(&raw, URL).unwrap();

        assert_eq!(record.title, "A");
        assert_eq!(record.summary, "B");
        assert!(record.key_points.is_empty());
        assert!(record.keywords.is_empty());
        assert_eq!(record.reading_time, reading_time_for("B"));
        assert_eq!(record.source_url, URL);
    }

    #[test]
    fn bare_json_string_is_never_literal_summary_text() {
        let raw = Value::String("{\"summary\":\"from json\"}".to_string());
        let record = normalize(&raw, URL).unwrap();
        assert_eq!(record.summary, "from json");
    }

    #[test]
    fn unfenced_prose_synthesizes_a_record() {
        let text = "Rust compiles to native code. Borrow checking removes data races. \
                    Cargo handles builds. Ok! Rust Rust Cargo 编译器 编译器 编译器";
        let record = normalize(&Value::String(text.to_string()), URL).unwrap();

        assert_eq!(record.title, DEFAULT_TITLE);
        assert_eq!(record.summary, text);
        assert_eq!(
            record.key_points,
            vec![
                "Rust compiles to native code",
                "Borrow checking removes data races",
                "Cargo handles builds",
                "Rust Rust Cargo 编译器 编译器 编译器",
            ]
        );
        // Frequency-ranked, first-seen tiebreak, CJK and Latin both count.
        assert_eq!(record.keywords[0], "Rust");
        assert_eq!(record.keywords[1], "编译器");
        assert_eq!(record.keywords[2], "Cargo");
        assert!(record.highlights.is_empty());
        assert_eq!(record.source_url, URL);
    }

    #[test]
    fn short_sentences_are_not_key_points() {
        let record = normalize(&Value::String("Tiny. Ok. No!".to_string()), URL).unwrap();
        assert!(record.key_points.is_empty());
    }

    #[test]
    fn object_lacking_every_field_still_satisfies_invariants() {
        let record = normalize(&json!({}), URL).unwrap();

        assert_eq!(record.title, DEFAULT_TITLE);
        assert_eq!(record.summary, DEFAULT_SUMMARY);
        assert!(record.key_points.is_empty());
        assert!(record.keywords.is_empty());
        assert!(record.highlights.is_empty());
        assert!(!record.reading_time.is_empty());
        assert_eq!(record.source_url, URL);
    }

    #[test]
    fn content_and_tags_aliases_resolve() {
        let raw = json!({"content": "hello world", "tags": ["x", "y"]});
        let record = normalize(&raw, "http://u").unwrap();

        assert_eq!(record.summary, "hello world");
        assert_eq!(record.keywords, vec!["x", "y"]);
        assert_eq!(record.source_url, "http://u");
    }

    #[test]
    fn scalar_truthy_values_are_wrapped() {
        let raw = json!({"keyPoints": "only one", "keywords": 7});
        let record = normalize(&raw, URL).unwrap();
        assert_eq!(record.key_points, vec!["only one"]);
        assert_eq!(record.keywords, vec!["7"]);
    }

    #[test]
    fn snake_case_aliases_resolve() {
        let raw = json!({"key_points": ["a"], "reading_time": "3 minutes"});
        let record = normalize(&raw, URL).unwrap();
        assert_eq!(record.key_points, vec!["a"]);
        assert_eq!(record.reading_time, "3 minutes");
    }

    #[test]
    fn blank_explicit_fields_redefault() {
        let raw = json!({"title": "   ", "summary": "\n\t"});
        let record = normalize(&raw, URL).unwrap();
        assert_eq!(record.title, DEFAULT_TITLE);
        assert_eq!(record.summary, DEFAULT_SUMMARY);
    }

    #[test]
    fn untyped_input_is_rejected() {
        assert!(matches!(
            normalize(&json!(42), URL),
            Err(FormatError::UnsupportedShape("number"))
        ));
        assert!(matches!(
            normalize(&json!(true), URL),
            Err(FormatError::UnsupportedShape("boolean"))
        ));
        assert!(matches!(
            normalize(&Value::Null, URL),
            Err(FormatError::UnsupportedShape("null"))
        ));
        assert!(matches!(
            normalize(&json!([1, 2]), URL),
            Err(FormatError::UnsupportedShape("array"))
        ));
    }

    #[test]
    fn highlights_get_unique_positional_ids() {
        let raw = json!({"highlights": [
            {"text": "first"},
            {"id": "kept", "text": "second", "importance": "high"},
            {"id": "kept", "text": "third"},
            "just a string",
        ]});
        let record = normalize(&raw, URL).unwrap();

        assert_eq!(record.highlights.len(), 4);
        assert_eq!(record.highlights[0].id, "highlight-0");
        assert_eq!(record.highlights[1].id, "kept");
        assert_eq!(record.highlights[1].importance, Importance::High);
        // Duplicate of an earlier id is replaced positionally.
        assert_eq!(record.highlights[2].id, "highlight-2");
        assert_eq!(record.highlights[3].text, "just a string");
        assert_eq!(record.highlights[3].importance, Importance::Medium);

        let ids: HashSet<_> = record.highlights.iter().map(|h| h.id.clone()).collect();
        assert_eq!(ids.len(), record.highlights.len());
    }

    #[test]
    fn positional_id_collision_with_supplied_id_stays_unique() {
        let raw = json!({"highlights": [
            {"id": "highlight-1", "text": "a"},
            {"text": "b"},
        ]});
        let record = normalize(&raw, URL).unwrap();
        let ids: HashSet<_> = record.highlights.iter().map(|h| h.id.clone()).collect();
        assert_eq!(ids.len(), 2);
    }

    #[test]
    fn unrecognized_fields_are_preserved() {
        let raw = json!({"summary": "s", "model": "agent-1", "tokens": 123});
        let record = normalize(&raw, URL).unwrap();
        assert_eq!(record.extra.get("model"), Some(&json!("agent-1")));
        assert_eq!(record.extra.get("tokens"), Some(&json!(123)));
    }

    #[test]
    fn normalization_is_idempotent() {
        let raw = json!({
            "title": "T",
            "content": "body of the summary",
            "key_points": ["p1", "p2"],
            "tags": ["k"],
            "highlights": [{"text": "h", "importance": "low", "category": "c"}],
            "model": "agent-1",
        });
        let first = normalize(&raw, URL).unwrap();
        let round_tripped = serde_json::to_value(&first).unwrap();
        let second = normalize(&round_tripped, URL).unwrap();
        assert_eq!(first, second);
    }
}
