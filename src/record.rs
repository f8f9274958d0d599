//! Summary record - the canonical structure every analysis converges on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Words per minute assumed when deriving a reading time.
const READING_WPM: usize = 200;

/// Relative weight of a highlighted passage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Importance {
    High,
    #[default]
    Medium,
    Low,
}

impl Importance {
    /// Parse a loosely-typed importance label, defaulting to `Medium`.
    pub fn parse(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "high" => Importance::High,
            "low" => Importance::Low,
            _ => Importance::Medium,
        }
    }
}

/// A passage the agent flagged as worth calling out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Highlight {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub importance: Importance,
    #[serde(default)]
    pub category: String,
}

/// The canonical, fully-populated summary of one analysis request.
///
/// Serialized field names mirror the agent wire shape (camelCase), so a
/// record can be serialized and fed back through normalization without
/// drift. The required scalar fields are never empty once normalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryRecord {
    /// Title of the summarized content, placeholder if the agent gave none.
    pub title: String,
    /// Summary body, placeholder if the agent gave none.
    pub summary: String,
    pub key_points: Vec<String>,
    pub keywords: Vec<String>,
    pub highlights: Vec<Highlight>,
    /// Rendered as "<N> minutes", derived from the summary when absent.
    pub reading_time: String,
    pub source_url: String,
    pub created_at: DateTime<Utc>,
    /// Unrecognized agent fields, carried through without interpretation.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Derive a reading-time label from a body of text.
///
/// Word count over 200 wpm, rounded up, never below one minute.
pub fn reading_time_for(text: &str) -> String {
    let words = text.split_whitespace().count();
    let minutes = words.div_ceil(READING_WPM).max(1);
    format!("{} minutes", minutes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reading_time_rounds_up() {
        let short = "just a few words";
        assert_eq!(reading_time_for(short), "1 minutes");

        let two_hundred_one = vec!["word"; 201].join(" ");
        assert_eq!(reading_time_for(&two_hundred_one), "2 minutes");
    }

    #[test]
    fn reading_time_is_never_zero() {
        assert_eq!(reading_time_for(""), "1 minutes");
    }

    #[test]
    fn importance_parses_known_labels_and_defaults_medium() {
        assert_eq!(Importance::parse("high"), Importance::High);
        assert_eq!(Importance::parse("LOW"), Importance::Low);
        assert_eq!(Importance::parse("critical"), Importance::Medium);
        assert_eq!(Importance::parse(""), Importance::Medium);
    }
}
