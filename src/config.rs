//! Run configuration.
//!
//! Defaults mirror the operational values the pipeline was tuned with; the
//! CLI overrides the common ones.

use std::path::PathBuf;
use std::time::Duration;

use crate::client::Provider;
use crate::retry::BackoffPolicy;

#[derive(Debug, Clone)]
pub struct EvalConfig {
    pub provider: Provider,
    /// Model override; `None` uses the provider's default model.
    pub model: Option<String>,
    /// Inclusive rank range to evaluate.
    pub rank_start: u32,
    pub rank_end: u32,
    /// Maximum simultaneous in-flight evaluation calls.
    pub concurrency: usize,
    /// Sub-chunk size when a group is evaluated in pieces.
    pub chunk_size: usize,
    /// Groups above this size skip the single-request attempt and go straight
    /// to chunked evaluation.
    pub max_group_size: usize,
    /// Groups above this size get a chunked retry after single-request
    /// evaluation exhausts its attempts; smaller groups become placeholders.
    pub min_split_size: usize,
    /// Transport-level retries inside the client.
    pub max_retries: u32,
    /// Evaluate-and-parse attempts per group or sub-chunk.
    pub max_parse_retries: u32,
    pub parse_retry_delay: Duration,
    /// Pause between sub-chunks of the same group.
    pub chunk_delay: Duration,
    /// Groups checkpointed together; the effective size is
    /// `min(super_batch_size, remaining groups)`.
    pub super_batch_size: usize,
    /// Prompts beyond this many chars are truncated before dispatch.
    pub max_prompt_chars: usize,
    pub resume: bool,
    pub checkpoint_dir: PathBuf,
    pub output_dir: PathBuf,
    pub backoff: BackoffPolicy,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            provider: Provider::Dashscope,
            model: None,
            rank_start: 1,
            rank_end: 50,
            concurrency: 10,
            chunk_size: 15,
            max_group_size: 20,
            min_split_size: 5,
            max_retries: 3,
            max_parse_retries: 3,
            parse_retry_delay: Duration::from_secs(3),
            chunk_delay: Duration::from_secs(1),
            super_batch_size: 50,
            max_prompt_chars: 128_000,
            resume: true,
            checkpoint_dir: PathBuf::from("data/output/checkpoints"),
            output_dir: PathBuf::from("data/output/results"),
            backoff: BackoffPolicy::default(),
        }
    }
}

#[cfg(test)]
impl EvalConfig {
    /// Defaults with all delays zeroed so async tests run instantly.
    pub fn fast() -> Self {
        Self {
            parse_retry_delay: Duration::ZERO,
            chunk_delay: Duration::ZERO,
            backoff: BackoffPolicy::none(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_tuned_values() {
        let config = EvalConfig::default();
        assert_eq!(config.concurrency, 10);
        assert_eq!(config.chunk_size, 15);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.max_parse_retries, 3);
        assert_eq!(config.super_batch_size, 50);
        assert_eq!(config.max_prompt_chars, 128_000);
        assert!(config.resume);
    }

    #[test]
    fn fast_config_has_no_delays() {
        let config = EvalConfig::fast();
        assert!(config.parse_retry_delay.is_zero());
        assert!(config.chunk_delay.is_zero());
    }
}
