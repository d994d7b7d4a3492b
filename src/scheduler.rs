//! Bounded-concurrency scheduler driving an evaluation run.
//!
//! Groups are dispatched in super-batches of `min(super_batch_size,
//! remaining)`; within a batch, group futures run concurrently under a
//! semaphore and are drained as they complete. All shared state (checkpoint,
//! stats) is mutated only at completion points on the coordinating task, so
//! no locks are needed. After each super-batch the checkpoint is saved
//! synchronously, bounding crash loss to one batch.
//!
//! Per-group escalation: single request with parse retries → chunked
//! re-evaluation → Failed placeholders. A fatal transport failure raises a
//! flag that stops new calls from being issued; already in-flight groups are
//! drained, a final checkpoint is saved, and the run aborts.

use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;

use crate::checkpoint::CheckpointStore;
use crate::client::{ApiFailure, EvaluationService};
use crate::config::EvalConfig;
use crate::error::EvalError;
use crate::parser::parse_response;
use crate::prompt::render_evaluation_prompt;
use crate::splitter;
use crate::stats::UsageStats;
use crate::types::{ensure_coverage, Checkpoint, EvaluationRecord, RankGroup};

const EXHAUSTED_REASON: &str =
    "evaluation failed: service call or response parsing failed after all retries";
const MISSING_RECORD_REASON: &str = "evaluation failed: no record returned for this sentence";

/// Everything a finished run produces.
#[derive(Debug)]
pub struct RunOutcome {
    pub results: Vec<EvaluationRecord>,
    pub stats: UsageStats,
}

enum GroupEval {
    Completed {
        rank: u32,
        records: Vec<EvaluationRecord>,
        stats: UsageStats,
    },
    /// Fatal transport failure; the run aborts once in-flight groups drain.
    Fatal {
        failure: ApiFailure,
        stats: UsageStats,
    },
    /// Not attempted because the fatal flag was already set.
    Skipped,
}

pub struct EvalScheduler<'a> {
    service: &'a dyn EvaluationService,
    config: &'a EvalConfig,
}

impl<'a> EvalScheduler<'a> {
    pub fn new(service: &'a dyn EvaluationService, config: &'a EvalConfig) -> Self {
        Self { service, config }
    }

    /// Drive all groups to completion. On success the returned result set
    /// covers every item of every group exactly once and all checkpoints for
    /// this identity are removed; on fatal abort the checkpoint reflects the
    /// groups that completed.
    pub async fn run(
        &self,
        groups: &[RankGroup],
        store: &CheckpointStore,
    ) -> Result<RunOutcome, EvalError> {
        let mut checkpoint = if self.config.resume {
            store.load()
        } else {
            Checkpoint::default()
        };
        let mut stats = UsageStats::default();

        let remaining: Vec<&RankGroup> = groups
            .iter()
            .filter(|group| !checkpoint.is_processed(group.rank))
            .collect();
        tracing::info!(
            total = groups.len(),
            remaining = remaining.len(),
            concurrency = self.config.concurrency,
            "starting evaluation run"
        );

        if remaining.is_empty() {
            store.remove();
            return Ok(RunOutcome {
                results: checkpoint.all_results,
                stats,
            });
        }

        let semaphore = Semaphore::new(self.config.concurrency.max(1));
        let fatal = AtomicBool::new(false);
        let super_batch = self.config.super_batch_size.clamp(1, remaining.len());

        for (batch_index, batch) in remaining.chunks(super_batch).enumerate() {
            tracing::info!(batch = batch_index + 1, groups = batch.len(), "processing super-batch");

            let mut fatal_failure = None;
            let mut in_flight: FuturesUnordered<_> = batch
                .iter()
                .map(|group| self.evaluate_group(group, &semaphore, &fatal))
                .collect();

            while let Some(eval) = in_flight.next().await {
                match eval {
                    GroupEval::Completed {
                        rank,
                        records,
                        stats: group_stats,
                    } => {
                        stats.merge(&group_stats);
                        tracing::info!(rank, records = records.len(), "group completed");
                        checkpoint.mark_processed(rank, records);
                    }
                    GroupEval::Fatal {
                        failure,
                        stats: group_stats,
                    } => {
                        stats.merge(&group_stats);
                        fatal_failure = Some(failure);
                    }
                    GroupEval::Skipped => {}
                }
            }
            drop(in_flight);

            // Crash protection is best-effort: a failed save is logged and
            // the run keeps going.
            if let Err(e) = store.save(&checkpoint) {
                tracing::error!(error = %e, "checkpoint save failed, continuing without crash protection");
            }

            if let Some(failure) = fatal_failure {
                tracing::error!(error = %failure, "fatal transport failure, aborting run");
                return Err(EvalError::Api(failure));
            }
        }

        store.remove();
        Ok(RunOutcome {
            results: checkpoint.all_results,
            stats,
        })
    }

    async fn evaluate_group(
        &self,
        group: &RankGroup,
        semaphore: &Semaphore,
        fatal: &AtomicBool,
    ) -> GroupEval {
        // Acquire never fails: the semaphore is not closed while futures run.
        let _permit = match semaphore.acquire().await {
            Ok(permit) => permit,
            Err(_) => return GroupEval::Skipped,
        };
        if fatal.load(Ordering::SeqCst) {
            tracing::debug!(rank = group.rank, "skipping group, fatal failure already observed");
            return GroupEval::Skipped;
        }

        let mut stats = UsageStats::default();
        match self.evaluate_group_records(group, &mut stats).await {
            Ok(records) => GroupEval::Completed {
                rank: group.rank,
                records,
                stats,
            },
            Err(failure) => {
                fatal.store(true, Ordering::SeqCst);
                GroupEval::Fatal { failure, stats }
            }
        }
    }

    /// One group's escalation ladder. The only error is a fatal transport
    /// failure; everything else degrades into placeholders.
    async fn evaluate_group_records(
        &self,
        group: &RankGroup,
        stats: &mut UsageStats,
    ) -> Result<Vec<EvaluationRecord>, ApiFailure> {
        if group.items.is_empty() {
            return Ok(Vec::new());
        }

        if group.items.len() > self.config.max_group_size {
            tracing::info!(
                rank = group.rank,
                items = group.items.len(),
                "group exceeds single-request size, evaluating in chunks"
            );
            return splitter::evaluate_in_chunks(self.service, group, self.config, stats).await;
        }

        let prompt = render_evaluation_prompt(group.rank, &group.items, &group.citations);

        for attempt in 1..=self.config.max_parse_retries {
            match self.service.evaluate(&prompt).await {
                Ok(response) => {
                    stats.record_call(&prompt, &response);
                    let outcome = parse_response(&response, group.rank);
                    tracing::debug!(rank = group.rank, attempt, stage = outcome.stage(), "response parsed");
                    let records = outcome.records();

                    if records.is_empty() {
                        tracing::warn!(rank = group.rank, attempt, "response yielded no usable records");
                    } else if records.len() * 2 < group.items.len() {
                        // Far fewer records than sentences: the response is
                        // degraded, re-evaluate in smaller pieces.
                        tracing::warn!(
                            rank = group.rank,
                            records = records.len(),
                            items = group.items.len(),
                            "record count below half, evaluating in chunks"
                        );
                        return splitter::evaluate_in_chunks(
                            self.service,
                            group,
                            self.config,
                            stats,
                        )
                        .await;
                    } else {
                        return Ok(ensure_coverage(records, &group.items, MISSING_RECORD_REASON));
                    }
                }
                Err(failure) if failure.is_fatal() => return Err(failure),
                Err(failure) => {
                    // Transport retries are already spent inside the client.
                    tracing::warn!(rank = group.rank, attempt, error = %failure, "service call failed");
                    break;
                }
            }

            if attempt < self.config.max_parse_retries && !self.config.parse_retry_delay.is_zero()
            {
                tokio::time::sleep(self.config.parse_retry_delay).await;
            }
        }

        if group.items.len() > self.config.min_split_size {
            tracing::info!(rank = group.rank, "retries exhausted, attempting chunked evaluation");
            return splitter::evaluate_in_chunks(self.service, group, self.config, stats).await;
        }

        tracing::error!(
            rank = group.rank,
            items = group.items.len(),
            "evaluation exhausted, recording failures"
        );
        Ok(group
            .items
            .iter()
            .map(|item| EvaluationRecord::failure(item, EXHAUSTED_REASON))
            .collect())
    }
}
