//! Final partitioning of evaluation records.
//!
//! Records normally carry an explicit verdict; the rationale-keyword fallback
//! only engages for records that lost theirs (e.g. artifacts written by older
//! tooling), and every such use is surfaced as a data-quality signal.

use crate::types::{EvaluationRecord, RunSummary, Verdict};

/// Negative keywords take precedence over positive ones: a rationale that
/// mentions any contradiction is inconsistent no matter what else it says.
const NEGATIVE_KEYWORDS: &[&str] = &[
    "inconsistent",
    "contradiction",
    "contradicts",
    "not supported",
    "not mentioned",
    "mismatch",
    "error",
    "missing",
    "不一致",
    "不符",
    "不支持",
    "不匹配",
    "错误",
    "缺失",
    "未提及",
];

const POSITIVE_KEYWORDS: &[&str] = &[
    "consistent",
    "matches",
    "match",
    "supported",
    "correct",
    "一致",
    "相符",
    "支持",
    "正确",
    "匹配",
];

/// Rationales shorter than this with no keyword hits are taken as consistent.
/// Known-weak; uses are counted so downstream can audit them.
const SHORT_REASON_CHARS: usize = 20;

#[derive(Debug, Default)]
pub struct Partition {
    pub consistent: Vec<EvaluationRecord>,
    pub inconsistent: Vec<EvaluationRecord>,
    pub failed: Vec<EvaluationRecord>,
    pub fallback_classified: usize,
}

impl Partition {
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            total: self.consistent.len() + self.inconsistent.len() + self.failed.len(),
            consistent: self.consistent.len(),
            inconsistent: self.inconsistent.len(),
            failed: self.failed.len(),
            fallback_classified: self.fallback_classified,
        }
    }
}

pub fn partition(records: &[EvaluationRecord]) -> Partition {
    let mut result = Partition::default();

    for record in records {
        let verdict = match record.consistency {
            Some(verdict) => verdict,
            None => {
                result.fallback_classified += 1;
                let verdict = classify_by_reason(&record.reason);
                tracing::warn!(
                    rank = record.rank,
                    verdict = verdict.as_str(),
                    "record has no verdict, classified by rationale heuristic"
                );
                verdict
            }
        };
        match verdict {
            Verdict::Consistent => result.consistent.push(record.clone()),
            Verdict::Inconsistent => result.inconsistent.push(record.clone()),
            Verdict::Failed => result.failed.push(record.clone()),
        }
    }

    result
}

/// Keyword scan with negative precedence, then a length heuristic as the
/// last resort.
fn classify_by_reason(reason: &str) -> Verdict {
    let lower = reason.to_lowercase();
    if NEGATIVE_KEYWORDS.iter().any(|k| lower.contains(k)) {
        return Verdict::Inconsistent;
    }
    if POSITIVE_KEYWORDS.iter().any(|k| lower.contains(k)) {
        return Verdict::Consistent;
    }
    if reason.trim().is_empty() || reason.chars().count() < SHORT_REASON_CHARS {
        Verdict::Consistent
    } else {
        Verdict::Inconsistent
    }
}
