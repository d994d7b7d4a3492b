//! Chunked evaluation for oversized or repeatedly failing rank groups.
//!
//! A failing group is not abandoned wholesale: its items are re-evaluated in
//! fixed-size sub-chunks so a single bad chunk only costs its own sentences.
//! Chunks that exhaust their attempts contribute Failed placeholders, which
//! keeps the group's record count equal to its item count.

use crate::client::{ApiFailure, EvaluationService};
use crate::config::EvalConfig;
use crate::parser::parse_response;
use crate::prompt::render_evaluation_prompt;
use crate::stats::UsageStats;
use crate::types::{ensure_coverage, EvaluationRecord, RankGroup, SentenceItem};

const CHUNK_EXHAUSTED_REASON: &str =
    "evaluation failed: sub-chunk exhausted its attempts (service call or response parsing)";
const CHUNK_MISSING_RECORD_REASON: &str =
    "evaluation failed: no record returned for this sentence in its sub-chunk";

/// Evaluate the group in sub-chunks of `config.chunk_size`, sequentially.
/// Returns one record per item. The only error is a fatal transport failure,
/// which aborts immediately without placeholders for the rest.
pub async fn evaluate_in_chunks(
    service: &dyn EvaluationService,
    group: &RankGroup,
    config: &EvalConfig,
    stats: &mut UsageStats,
) -> Result<Vec<EvaluationRecord>, ApiFailure> {
    let chunk_size = config.chunk_size.max(1);
    let total_chunks = group.items.len().div_ceil(chunk_size);
    let mut all = Vec::with_capacity(group.items.len());

    for (index, chunk) in group.items.chunks(chunk_size).enumerate() {
        tracing::info!(
            rank = group.rank,
            chunk = index + 1,
            total_chunks,
            items = chunk.len(),
            "evaluating sub-chunk"
        );

        match evaluate_chunk(service, group, chunk, config, stats).await? {
            Some(records) => {
                all.extend(ensure_coverage(records, chunk, CHUNK_MISSING_RECORD_REASON));
            }
            None => {
                tracing::warn!(
                    rank = group.rank,
                    chunk = index + 1,
                    "sub-chunk exhausted, recording failures"
                );
                all.extend(
                    chunk
                        .iter()
                        .map(|item| EvaluationRecord::failure(item, CHUNK_EXHAUSTED_REASON)),
                );
            }
        }

        if index + 1 < total_chunks && !config.chunk_delay.is_zero() {
            tokio::time::sleep(config.chunk_delay).await;
        }
    }

    Ok(all)
}

/// One sub-chunk: up to `max_parse_retries` evaluate-and-parse attempts.
/// `Ok(None)` means the chunk is exhausted; fatal failures propagate.
async fn evaluate_chunk(
    service: &dyn EvaluationService,
    group: &RankGroup,
    chunk: &[SentenceItem],
    config: &EvalConfig,
    stats: &mut UsageStats,
) -> Result<Option<Vec<EvaluationRecord>>, ApiFailure> {
    let prompt = render_evaluation_prompt(group.rank, chunk, &group.citations);

    for attempt in 1..=config.max_parse_retries {
        match service.evaluate(&prompt).await {
            Ok(response) => {
                stats.record_call(&prompt, &response);
                let outcome = parse_response(&response, group.rank);
                tracing::debug!(rank = group.rank, attempt, stage = outcome.stage(), "sub-chunk parsed");
                let records = outcome.records();
                if !records.is_empty() {
                    return Ok(Some(records));
                }
                tracing::warn!(rank = group.rank, attempt, "sub-chunk response yielded no records");
            }
            Err(failure) if failure.is_fatal() => return Err(failure),
            Err(failure) => {
                tracing::warn!(rank = group.rank, attempt, error = %failure, "sub-chunk service call failed");
            }
        }

        if attempt < config.max_parse_retries && !config.parse_retry_delay.is_zero() {
            tokio::time::sleep(config.parse_retry_delay).await;
        }
    }

    Ok(None)
}
