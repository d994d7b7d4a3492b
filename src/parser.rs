//! Staged recovery parsing of evaluation responses.
//!
//! Providers return markdown-fenced, truncated, or otherwise mangled JSON
//! often enough that strict parsing alone would throw away whole groups.
//! The stages run in order and each only engages when the previous one
//! failed: fence strip → truncation repair → strict array parse → regex
//! partial extraction. Parsing never errors; the worst case is `Empty`.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::types::{EvaluationRecord, Verdict};

/// Record fields consumed directly; anything else a provider adds is kept in
/// the record's tag map.
const KNOWN_FIELDS: &[&str] = &[
    "topic",
    "citation_topic",
    "consistency",
    "reason",
    "rank",
    "citation_numbers",
];

/// How a response yielded its records. Degraded variants are logged by the
/// caller; the records themselves are equally usable.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    /// Clean JSON array (possibly after fence stripping).
    Strict(Vec<EvaluationRecord>),
    /// Parsed only after truncation repair.
    Repaired(Vec<EvaluationRecord>),
    /// Individual objects salvaged by pattern matching.
    Partial(Vec<EvaluationRecord>),
    /// Nothing usable.
    Empty,
}

impl ParseOutcome {
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Strict(_) => "strict",
            Self::Repaired(_) => "repaired",
            Self::Partial(_) => "partial",
            Self::Empty => "empty",
        }
    }

    pub fn records(self) -> Vec<EvaluationRecord> {
        match self {
            Self::Strict(r) | Self::Repaired(r) | Self::Partial(r) => r,
            Self::Empty => Vec::new(),
        }
    }
}

/// Parse one provider response for the group at `rank`. Model-reported ranks
/// are ignored; every record is stamped with the group's rank.
pub fn parse_response(response: &str, rank: u32) -> ParseOutcome {
    let cleaned = strip_code_fences(response);
    let (candidate, repaired) = repair_truncation(&cleaned);

    if let Ok(Value::Array(objects)) = serde_json::from_str::<Value>(&candidate) {
        let records: Vec<EvaluationRecord> = objects
            .iter()
            .filter_map(|object| record_from_object(object, rank))
            .collect();
        if !records.is_empty() {
            return if repaired {
                ParseOutcome::Repaired(records)
            } else {
                ParseOutcome::Strict(records)
            };
        }
    }

    extract_partial(response, rank)
}

/// Drop a leading ```/```json fence line and a trailing ``` fence. A fence
/// with no newline after it (single-line response) only sheds the backticks
/// and language tag.
fn strip_code_fences(text: &str) -> String {
    let mut t = text.trim();
    if let Some(rest) = t.strip_prefix("```") {
        t = match rest.split_once('\n') {
            Some((_, body)) => body,
            None => rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric()),
        };
    }
    let t = t.trim_end();
    let t = t.strip_suffix("```").unwrap_or(t);
    t.trim().to_string()
}

/// Responses cut off mid-stream end without a closing bracket; dropping any
/// dangling comma and closing the array recovers the complete objects. Text
/// already ending in `]` or `}` is left alone.
fn repair_truncation(cleaned: &str) -> (String, bool) {
    let trimmed = cleaned.trim_end();
    if trimmed.ends_with(']') || trimmed.ends_with('}') {
        return (trimmed.to_string(), false);
    }
    let mut repaired = trimmed.trim_end_matches(',').trim_end().to_string();
    repaired.push(']');
    (repaired, true)
}

/// Lenient per-record conversion: a record needs topic, consistency, reason,
/// and citation_numbers; bad records are dropped, not fatal. Unknown verdict
/// vocabulary also drops the record.
fn record_from_object(value: &Value, rank: u32) -> Option<EvaluationRecord> {
    let object = value.as_object()?;
    let topic = object.get("topic")?.as_str()?.to_string();
    let reason = object.get("reason")?.as_str()?.to_string();
    let verdict = object.get("consistency")?.as_str().and_then(Verdict::parse);
    let Some(verdict) = verdict else {
        tracing::debug!(rank, "dropping record with unrecognized consistency value");
        return None;
    };
    let citation_numbers = citation_numbers_from(object.get("citation_numbers")?)?;
    let citation_topic = object
        .get("citation_topic")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let mut tags = BTreeMap::new();
    for (key, tag_value) in object {
        if !KNOWN_FIELDS.contains(&key.as_str()) {
            tags.insert(key.clone(), tag_value.clone());
        }
    }

    Some(EvaluationRecord {
        topic,
        citation_topic,
        consistency: Some(verdict),
        reason,
        rank,
        citation_numbers,
        tags,
    })
}

/// Citation numbers arrive as ints or numeric strings depending on the model.
fn citation_numbers_from(value: &Value) -> Option<Vec<u32>> {
    let array = value.as_array()?;
    Some(
        array
            .iter()
            .filter_map(|v| match v {
                Value::Number(n) => n.as_u64().map(|n| n as u32),
                Value::String(s) => s.trim().parse().ok(),
                _ => None,
            })
            .collect(),
    )
}

fn partial_object_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"(?s)\{[^{}]*"topic"[^{}]*"consistency"[^{}]*"reason"[^{}]*"citation_numbers"[^{}]*\}"#,
        )
        .expect("partial object pattern is valid")
    })
}

/// Last resort: scan the raw response for brace-delimited objects carrying
/// all required field markers and parse each individually.
fn extract_partial(response: &str, rank: u32) -> ParseOutcome {
    let records: Vec<EvaluationRecord> = partial_object_regex()
        .find_iter(response)
        .filter_map(|m| serde_json::from_str::<Value>(m.as_str()).ok())
        .filter_map(|object| record_from_object(&object, rank))
        .collect();

    if records.is_empty() {
        ParseOutcome::Empty
    } else {
        tracing::warn!(rank, recovered = records.len(), "salvaged records by partial extraction");
        ParseOutcome::Partial(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object(topic: &str, consistency: &str) -> String {
        format!(
            r#"{{"topic": "{topic}", "citation_topic": "ct", "consistency": "{consistency}", "reason": "because", "citation_numbers": [1, 2]}}"#
        )
    }

    fn clean_array() -> String {
        format!("[{}, {}]", object("a", "consistent"), object("b", "inconsistent"))
    }

    #[test]
    fn clean_array_parses_strict() {
        let outcome = parse_response(&clean_array(), 9);
        let ParseOutcome::Strict(records) = outcome else {
            panic!("expected strict parse");
        };
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].consistency, Some(Verdict::Consistent));
        assert_eq!(records[1].consistency, Some(Verdict::Inconsistent));
        assert!(records.iter().all(|r| r.rank == 9));
    }

    #[test]
    fn fenced_array_parses_strict() {
        let fenced = format!("```json\n{}\n```", clean_array());
        let outcome = parse_response(&fenced, 1);
        assert!(matches!(outcome, ParseOutcome::Strict(ref r) if r.len() == 2));
    }

    #[test]
    fn fence_without_language_tag_also_strips() {
        let fenced = format!("```\n{}\n```", clean_array());
        assert!(matches!(parse_response(&fenced, 1), ParseOutcome::Strict(_)));
    }

    #[test]
    fn single_line_fenced_array_still_parses_strict() {
        // no newline after the opening fence
        let fenced = format!("```json{}```", clean_array());
        let ParseOutcome::Strict(records) = parse_response(&fenced, 1) else {
            panic!("expected strict parse");
        };
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn truncated_after_comma_repairs_to_full_set() {
        let truncated = format!("[{}, {},", object("a", "consistent"), object("b", "consistent"));
        let ParseOutcome::Repaired(records) = parse_response(&truncated, 2) else {
            panic!("expected repaired parse");
        };
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn truncated_mid_object_salvages_complete_objects() {
        let mangled = format!(
            r#"[{}, {{"topic": "b", "citation_topic": "ct", "consistency": "consis"#,
            object("a", "consistent")
        );
        let ParseOutcome::Partial(records) = parse_response(&mangled, 3) else {
            panic!("expected partial parse");
        };
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].topic, "a");
    }

    #[test]
    fn prose_wrapped_objects_are_extracted() {
        let prose = format!(
            "Here is my analysis:\n{}\nand also\n{}\nHope this helps!",
            object("a", "consistent"),
            object("b", "inconsistent")
        );
        let ParseOutcome::Partial(records) = parse_response(&prose, 4) else {
            panic!("expected partial parse");
        };
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn garbage_yields_empty() {
        assert_eq!(parse_response("no json here at all", 1), ParseOutcome::Empty);
        assert_eq!(parse_response("", 1), ParseOutcome::Empty);
    }

    #[test]
    fn records_missing_required_fields_are_dropped() {
        let mixed = format!(
            r#"[{}, {{"topic": "no reason", "consistency": "consistent", "citation_numbers": []}}]"#,
            object("kept", "consistent")
        );
        let ParseOutcome::Strict(records) = parse_response(&mixed, 1) else {
            panic!("expected strict parse");
        };
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].topic, "kept");
    }

    #[test]
    fn unknown_verdict_vocabulary_drops_the_record() {
        let array = format!("[{}]", object("a", "perhaps"));
        assert_eq!(parse_response(&array, 1), ParseOutcome::Empty);
    }

    #[test]
    fn chinese_verdicts_are_normalized() {
        let array = format!("[{}, {}]", object("a", "一致"), object("b", "不一致"));
        let ParseOutcome::Strict(records) = parse_response(&array, 1) else {
            panic!("expected strict parse");
        };
        assert_eq!(records[0].consistency, Some(Verdict::Consistent));
        assert_eq!(records[1].consistency, Some(Verdict::Inconsistent));
    }

    #[test]
    fn model_reported_rank_is_overridden() {
        let array = r#"[{"topic": "t", "citation_topic": "c", "consistency": "consistent", "reason": "r", "rank": 999, "citation_numbers": [1]}]"#;
        let ParseOutcome::Strict(records) = parse_response(array, 5) else {
            panic!("expected strict parse");
        };
        assert_eq!(records[0].rank, 5);
        assert!(!records[0].tags.contains_key("rank"));
    }

    #[test]
    fn string_citation_numbers_are_coerced() {
        let array = r#"[{"topic": "t", "citation_topic": "c", "consistency": "consistent", "reason": "r", "citation_numbers": ["3", 4, "x"]}]"#;
        let ParseOutcome::Strict(records) = parse_response(array, 1) else {
            panic!("expected strict parse");
        };
        assert_eq!(records[0].citation_numbers, vec![3, 4]);
    }

    #[test]
    fn extra_fields_are_kept_as_tags() {
        let array = r#"[{"topic": "t", "citation_topic": "c", "consistency": "consistent", "reason": "r", "citation_numbers": [], "qualitative_analysis": "solid"}]"#;
        let ParseOutcome::Strict(records) = parse_response(array, 1) else {
            panic!("expected strict parse");
        };
        assert_eq!(
            records[0].tags.get("qualitative_analysis"),
            Some(&serde_json::json!("solid"))
        );
    }
}
