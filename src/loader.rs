//! Input collaborators: annotated-sentence records and the citation
//! reference table.
//!
//! Loading is lenient in the same spirit as the response parser: malformed
//! entries are logged and skipped rather than failing the run, and citation
//! fields are coerced from whatever shape the upstream tool emitted.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use serde_json::Value;

use crate::error::EvalError;
use crate::types::{RankGroup, SentenceItem};

/// Placeholder passage texts, so prompts always render even when the
/// reference table has holes.
const MISSING_CITATION: &str = "[citation missing]";
const EMPTY_CITATION: &str = "[citation empty]";

/// Load annotated sentences from a JSON array, keeping only the inclusive
/// rank range.
pub fn load_items(path: &Path, rank_start: u32, rank_end: u32) -> Result<Vec<SentenceItem>, EvalError> {
    let text = fs::read_to_string(path)?;
    let raw: Vec<Value> = serde_json::from_str(&text)?;
    let total = raw.len();

    let mut items = Vec::new();
    for value in &raw {
        let Some(object) = value.as_object() else {
            tracing::warn!("skipping non-object item entry");
            continue;
        };
        let Some(rank) = object.get("rank").and_then(Value::as_u64).map(|r| r as u32) else {
            tracing::warn!("skipping item without a numeric rank");
            continue;
        };
        if !(rank_start..=rank_end).contains(&rank) {
            continue;
        }
        let Some(topic) = object.get("topic").and_then(Value::as_str) else {
            tracing::warn!(rank, "skipping item without a topic");
            continue;
        };
        let Some(citation_numbers) = object.get("citation").and_then(coerce_citations) else {
            tracing::warn!(rank, "skipping item with unrecognized citation shape");
            continue;
        };
        items.push(SentenceItem {
            rank,
            topic: topic.to_string(),
            citation_numbers,
        });
    }

    tracing::info!(total, selected = items.len(), rank_start, rank_end, "loaded annotated sentences");
    Ok(items)
}

/// `citation` arrives as a number, a numeric string, or an array of either.
fn coerce_citations(value: &Value) -> Option<Vec<u32>> {
    fn single(value: &Value) -> Option<u32> {
        match value {
            Value::Number(n) => n.as_u64().map(|n| n as u32),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    match value {
        Value::Array(array) => Some(array.iter().filter_map(single).collect()),
        other => single(other).map(|n| vec![n]),
    }
}

/// Source passages keyed by rank and citation number.
pub struct ReferenceTable {
    by_rank: BTreeMap<u32, BTreeMap<u32, String>>,
}

impl ReferenceTable {
    /// Load from a JSON array of `{"rank": n, "citations": {"1": "text"}}`
    /// entries. Non-numeric citation keys are skipped.
    pub fn load(path: &Path) -> Result<Self, EvalError> {
        let text = fs::read_to_string(path)?;
        let raw: Vec<Value> = serde_json::from_str(&text)?;

        let mut by_rank: BTreeMap<u32, BTreeMap<u32, String>> = BTreeMap::new();
        for value in &raw {
            let Some(rank) = value.get("rank").and_then(Value::as_u64).map(|r| r as u32) else {
                tracing::warn!("skipping reference entry without a numeric rank");
                continue;
            };
            let Some(citations) = value.get("citations").and_then(Value::as_object) else {
                tracing::warn!(rank, "skipping reference entry without a citations map");
                continue;
            };
            let entry = by_rank.entry(rank).or_default();
            for (key, text) in citations {
                let Ok(number) = key.trim().parse::<u32>() else {
                    tracing::warn!(rank, key = %key, "skipping non-numeric citation key");
                    continue;
                };
                entry.insert(number, text.as_str().unwrap_or_default().to_string());
            }
        }

        tracing::info!(ranks = by_rank.len(), "loaded citation reference table");
        Ok(Self { by_rank })
    }

    pub fn lookup(&self, rank: u32, number: u32) -> Option<&str> {
        self.by_rank
            .get(&rank)
            .and_then(|citations| citations.get(&number))
            .map(String::as_str)
    }
}

/// Partition items into rank groups, attaching the passages each group's
/// sentences cite. Unresolvable citations get placeholder text.
pub fn group_by_rank(items: Vec<SentenceItem>, references: &ReferenceTable) -> Vec<RankGroup> {
    let mut grouped: BTreeMap<u32, Vec<SentenceItem>> = BTreeMap::new();
    for item in items {
        grouped.entry(item.rank).or_default().push(item);
    }

    let groups: Vec<RankGroup> = grouped
        .into_iter()
        .map(|(rank, items)| {
            let numbers: BTreeSet<u32> = items
                .iter()
                .flat_map(|item| item.citation_numbers.iter().copied())
                .collect();
            let mut citations = BTreeMap::new();
            for number in numbers {
                let text = match references.lookup(rank, number) {
                    Some(text) if !text.trim().is_empty() => text.to_string(),
                    Some(_) => {
                        tracing::warn!(rank, number, "citation text is empty");
                        EMPTY_CITATION.to_string()
                    }
                    None => {
                        tracing::warn!(rank, number, "citation not found in reference table");
                        MISSING_CITATION.to_string()
                    }
                };
                citations.insert(number, text);
            }
            RankGroup { rank, items, citations }
        })
        .collect();

    tracing::info!(groups = groups.len(), "grouped sentences by rank");
    groups
}
