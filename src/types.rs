//! Core types for the consistency evaluation pipeline.
//!
//! These types model the full lifecycle:
//! Sentence items → Rank groups → Evaluation records → Checkpoint → Partitioned output.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ═══════════════════════════════════════════
// Verdict
// ═══════════════════════════════════════════

/// Final category of one evaluated sentence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Consistent,
    Inconsistent,
    /// Synthesized when evaluation could not be completed after exhausting
    /// retries and splitting.
    Failed,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Consistent => "consistent",
            Self::Inconsistent => "inconsistent",
            Self::Failed => "failed",
        }
    }

    /// Normalize a provider-supplied verdict value against the accepted
    /// vocabulary. Providers answer in English or Chinese depending on the
    /// prompt language; both surface forms are accepted.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "consistent" | "一致" => Some(Self::Consistent),
            "inconsistent" | "不一致" => Some(Self::Inconsistent),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ═══════════════════════════════════════════
// Work items and groups (input side)
// ═══════════════════════════════════════════

/// One annotated sentence together with the citation numbers it claims to
/// be supported by. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentenceItem {
    pub rank: u32,
    pub topic: String,
    pub citation_numbers: Vec<u32>,
}

/// All sentences sharing a rank, evaluated together in one logical request.
///
/// Groups partition the input set: every item belongs to exactly one group.
#[derive(Debug, Clone)]
pub struct RankGroup {
    pub rank: u32,
    pub items: Vec<SentenceItem>,
    /// Shared reference material: citation number → source passage text.
    pub citations: BTreeMap<u32, String>,
}

// ═══════════════════════════════════════════
// Evaluation record (output side)
// ═══════════════════════════════════════════

/// One classified outcome for one sentence.
///
/// Field names match the persisted artifact format; provider-supplied extras
/// (e.g. `qualitative_analysis`) ride along in the flattened tag map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub topic: String,
    pub citation_topic: String,
    /// Absent only in records produced outside this pipeline; the classifier
    /// falls back to rationale heuristics for those.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consistency: Option<Verdict>,
    pub reason: String,
    pub rank: u32,
    pub citation_numbers: Vec<u32>,
    #[serde(flatten)]
    pub tags: BTreeMap<String, serde_json::Value>,
}

impl EvaluationRecord {
    /// Placeholder standing in for a sentence whose evaluation could not be
    /// completed. The group is still marked processed so the run terminates
    /// with full coverage.
    pub fn failure(item: &SentenceItem, reason: &str) -> Self {
        Self {
            topic: item.topic.clone(),
            citation_topic: "evaluation failed".to_string(),
            consistency: Some(Verdict::Failed),
            reason: reason.to_string(),
            rank: item.rank,
            citation_numbers: item.citation_numbers.clone(),
            tags: BTreeMap::new(),
        }
    }
}

/// Reconcile a group's records with its sentences so every sentence is
/// covered exactly once. Matching is by topic text, as a multiset: each
/// record covers at most one sentence, duplicate topics included. Sentences
/// without a record get a Failed placeholder; records for sentences the
/// provider invented are dropped. The result always has one record per item.
pub fn ensure_coverage(
    records: Vec<EvaluationRecord>,
    items: &[SentenceItem],
    reason: &str,
) -> Vec<EvaluationRecord> {
    let mut by_topic: std::collections::HashMap<String, Vec<EvaluationRecord>> =
        std::collections::HashMap::new();
    for record in records {
        by_topic.entry(record.topic.clone()).or_default().push(record);
    }

    let mut covered = Vec::with_capacity(items.len());
    for item in items {
        match by_topic.get_mut(&item.topic).and_then(Vec::pop) {
            Some(record) => covered.push(record),
            None => {
                tracing::debug!(rank = item.rank, "no record for sentence, adding failure placeholder");
                covered.push(EvaluationRecord::failure(item, reason));
            }
        }
    }

    let dropped: usize = by_topic.values().map(Vec::len).sum();
    if dropped > 0 {
        tracing::warn!(dropped, "dropping records that match no sentence in the group");
    }

    covered
}

// ═══════════════════════════════════════════
// Checkpoint
// ═══════════════════════════════════════════

/// Durable snapshot of run progress. `processed_keys` only grows within a
/// run and `all_results` is append-only; a key present in `processed_keys`
/// implies all of its group's records are already in `all_results`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Checkpoint {
    pub processed_keys: Vec<u32>,
    pub all_results: Vec<EvaluationRecord>,
    pub timestamp: f64,
}

impl Checkpoint {
    pub fn is_processed(&self, rank: u32) -> bool {
        self.processed_keys.contains(&rank)
    }

    /// Append a completed group's records and mark its key processed.
    pub fn mark_processed(&mut self, rank: u32, records: Vec<EvaluationRecord>) {
        if !self.processed_keys.contains(&rank) {
            self.processed_keys.push(rank);
        }
        self.all_results.extend(records);
        self.timestamp = chrono::Utc::now().timestamp_millis() as f64 / 1000.0;
    }
}

// ═══════════════════════════════════════════
// Run summary
// ═══════════════════════════════════════════

/// Counts derived from the final result set, never the source of truth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: usize,
    pub consistent: usize,
    pub inconsistent: usize,
    pub failed: usize,
    /// Records classified by the rationale fallback heuristic; a
    /// data-quality signal, not a normal outcome.
    pub fallback_classified: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(rank: u32, topic: &str) -> SentenceItem {
        SentenceItem {
            rank,
            topic: topic.to_string(),
            citation_numbers: vec![1, 2],
        }
    }

    #[test]
    fn verdict_parses_english_vocabulary() {
        assert_eq!(Verdict::parse("consistent"), Some(Verdict::Consistent));
        assert_eq!(Verdict::parse(" Inconsistent "), Some(Verdict::Inconsistent));
        assert_eq!(Verdict::parse("failed"), Some(Verdict::Failed));
    }

    #[test]
    fn verdict_parses_chinese_vocabulary() {
        assert_eq!(Verdict::parse("一致"), Some(Verdict::Consistent));
        assert_eq!(Verdict::parse("不一致"), Some(Verdict::Inconsistent));
    }

    #[test]
    fn verdict_rejects_unknown_values() {
        assert_eq!(Verdict::parse("maybe"), None);
        assert_eq!(Verdict::parse(""), None);
    }

    #[test]
    fn record_serde_round_trip_keeps_extra_tags() {
        let mut tags = BTreeMap::new();
        tags.insert(
            "qualitative_analysis".to_string(),
            serde_json::json!("factual consistency correct"),
        );
        let record = EvaluationRecord {
            topic: "sentence".to_string(),
            citation_topic: "passage".to_string(),
            consistency: Some(Verdict::Consistent),
            reason: "matches".to_string(),
            rank: 3,
            citation_numbers: vec![1],
            tags,
        };

        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("qualitative_analysis"));

        let back: EvaluationRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn record_deserializes_without_consistency_field() {
        let json = r#"{"topic": "t", "citation_topic": "c", "reason": "r", "rank": 1, "citation_numbers": []}"#;
        let record: EvaluationRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.consistency, None);
    }

    #[test]
    fn failure_record_carries_item_fields() {
        let record = EvaluationRecord::failure(&item(7, "claim"), "retries exhausted");
        assert_eq!(record.rank, 7);
        assert_eq!(record.topic, "claim");
        assert_eq!(record.consistency, Some(Verdict::Failed));
        assert_eq!(record.citation_numbers, vec![1, 2]);
        assert!(record.reason.contains("exhausted"));
    }

    #[test]
    fn ensure_coverage_backfills_missing_sentences() {
        let items = vec![item(1, "a"), item(1, "b"), item(1, "c")];
        let records = vec![EvaluationRecord {
            topic: "b".to_string(),
            citation_topic: "p".to_string(),
            consistency: Some(Verdict::Consistent),
            reason: "ok".to_string(),
            rank: 1,
            citation_numbers: vec![1],
            tags: BTreeMap::new(),
        }];

        let covered = ensure_coverage(records, &items, "no record");
        assert_eq!(covered.len(), 3);
        let failed = covered
            .iter()
            .filter(|r| r.consistency == Some(Verdict::Failed))
            .count();
        assert_eq!(failed, 2);
    }

    #[test]
    fn ensure_coverage_keeps_full_set_untouched() {
        let items = vec![item(1, "a")];
        let records = vec![EvaluationRecord {
            topic: "a".to_string(),
            citation_topic: "p".to_string(),
            consistency: Some(Verdict::Inconsistent),
            reason: "mismatch".to_string(),
            rank: 1,
            citation_numbers: vec![1],
            tags: BTreeMap::new(),
        }];

        let covered = ensure_coverage(records.clone(), &items, "no record");
        assert_eq!(covered, records);
    }

    #[test]
    fn ensure_coverage_treats_duplicate_topics_as_a_multiset() {
        // two sentences with identical text; one record must not cover both
        let items = vec![item(1, "dup"), item(1, "dup")];
        let records = vec![EvaluationRecord {
            topic: "dup".to_string(),
            citation_topic: "p".to_string(),
            consistency: Some(Verdict::Consistent),
            reason: "ok".to_string(),
            rank: 1,
            citation_numbers: vec![1],
            tags: BTreeMap::new(),
        }];

        let covered = ensure_coverage(records, &items, "no record");
        assert_eq!(covered.len(), items.len());
        let failed = covered
            .iter()
            .filter(|r| r.consistency == Some(Verdict::Failed))
            .count();
        assert_eq!(failed, 1);
        assert!(covered.iter().all(|r| r.topic == "dup"));
    }

    #[test]
    fn ensure_coverage_drops_records_for_unknown_sentences() {
        let items = vec![item(1, "real")];
        let records = vec![
            EvaluationRecord {
                topic: "real".to_string(),
                citation_topic: "p".to_string(),
                consistency: Some(Verdict::Consistent),
                reason: "ok".to_string(),
                rank: 1,
                citation_numbers: vec![1],
                tags: BTreeMap::new(),
            },
            EvaluationRecord {
                topic: "invented by the model".to_string(),
                citation_topic: "p".to_string(),
                consistency: Some(Verdict::Inconsistent),
                reason: "hallucinated".to_string(),
                rank: 1,
                citation_numbers: vec![1],
                tags: BTreeMap::new(),
            },
        ];

        let covered = ensure_coverage(records, &items, "no record");
        assert_eq!(covered.len(), 1);
        assert_eq!(covered[0].topic, "real");
    }

    #[test]
    fn checkpoint_keys_are_monotonic() {
        let mut cp = Checkpoint::default();
        cp.mark_processed(1, vec![]);
        cp.mark_processed(2, vec![]);
        cp.mark_processed(1, vec![]);
        assert_eq!(cp.processed_keys, vec![1, 2]);
        assert!(cp.is_processed(2));
        assert!(!cp.is_processed(3));
        assert!(cp.timestamp > 0.0);
    }
}
