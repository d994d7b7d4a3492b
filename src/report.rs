//! Final artifacts: partitioned result files and the run summary.

use std::fs;
use std::path::Path;

use serde::Serialize;

use crate::classifier;
use crate::error::EvalError;
use crate::types::{EvaluationRecord, RunSummary};

const ALL_RESULTS_FILE: &str = "all_results.json";
const CONSISTENT_FILE: &str = "consistent_results.json";
const INCONSISTENT_FILE: &str = "inconsistent_results.json";
const SUMMARY_FILE: &str = "run_summary.json";

/// Write the four output artifacts and return the derived summary. Failed
/// placeholders are written alongside the inconsistent records, keeping the
/// three-file result layout.
pub fn write_outputs(dir: &Path, records: &[EvaluationRecord]) -> Result<RunSummary, EvalError> {
    fs::create_dir_all(dir)?;

    let partition = classifier::partition(records);
    let summary = partition.summary();

    let mut flagged = partition.inconsistent.clone();
    flagged.extend(partition.failed.iter().cloned());

    write_json(&dir.join(ALL_RESULTS_FILE), &records)?;
    write_json(&dir.join(CONSISTENT_FILE), &partition.consistent)?;
    write_json(&dir.join(INCONSISTENT_FILE), &flagged)?;
    write_json(&dir.join(SUMMARY_FILE), &summary)?;

    tracing::info!(
        total = summary.total,
        consistent = summary.consistent,
        inconsistent = summary.inconsistent,
        failed = summary.failed,
        dir = %dir.display(),
        "results written"
    );
    Ok(summary)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), EvalError> {
    fs::write(path, serde_json::to_string_pretty(value)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Verdict;
    use std::collections::BTreeMap;

    fn record(topic: &str, verdict: Verdict) -> EvaluationRecord {
        EvaluationRecord {
            topic: topic.to_string(),
            citation_topic: "c".to_string(),
            consistency: Some(verdict),
            reason: "r".to_string(),
            rank: 1,
            citation_numbers: vec![1],
            tags: BTreeMap::new(),
        }
    }

    #[test]
    fn writes_all_four_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let records = vec![
            record("a", Verdict::Consistent),
            record("b", Verdict::Inconsistent),
            record("c", Verdict::Failed),
        ];

        let summary = write_outputs(dir.path(), &records).unwrap();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.consistent, 1);
        assert_eq!(summary.inconsistent, 1);
        assert_eq!(summary.failed, 1);

        for file in [ALL_RESULTS_FILE, CONSISTENT_FILE, INCONSISTENT_FILE, SUMMARY_FILE] {
            assert!(dir.path().join(file).exists(), "missing {file}");
        }
    }

    #[test]
    fn failed_records_land_in_the_inconsistent_file() {
        let dir = tempfile::tempdir().unwrap();
        let records = vec![
            record("a", Verdict::Consistent),
            record("b", Verdict::Inconsistent),
            record("c", Verdict::Failed),
        ];
        write_outputs(dir.path(), &records).unwrap();

        let text = fs::read_to_string(dir.path().join(INCONSISTENT_FILE)).unwrap();
        let flagged: Vec<EvaluationRecord> = serde_json::from_str(&text).unwrap();
        assert_eq!(flagged.len(), 2);
        let topics: Vec<&str> = flagged.iter().map(|r| r.topic.as_str()).collect();
        assert_eq!(topics, vec!["b", "c"]);

        let text = fs::read_to_string(dir.path().join(CONSISTENT_FILE)).unwrap();
        let consistent: Vec<EvaluationRecord> = serde_json::from_str(&text).unwrap();
        assert_eq!(consistent.len(), 1);
    }

    #[test]
    fn summary_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let written = write_outputs(dir.path(), &[record("a", Verdict::Consistent)]).unwrap();

        let text = fs::read_to_string(dir.path().join(SUMMARY_FILE)).unwrap();
        let read: RunSummary = serde_json::from_str(&text).unwrap();
        assert_eq!(read, written);
    }

    #[test]
    fn empty_result_set_still_writes_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let summary = write_outputs(dir.path(), &[]).unwrap();
        assert_eq!(summary.total, 0);
        assert!(dir.path().join(ALL_RESULTS_FILE).exists());
    }
}
