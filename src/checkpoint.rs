//! Durable run progress for crash resume.
//!
//! Checkpoint identity is provider + rank range. Each run writes its own
//! timestamped file and overwrites it in full at every save; resume loads
//! the newest file matching the identity prefix, so a crashed run's progress
//! is picked up without knowing its exact filename. Save and load failures
//! are logged and absorbed: losing crash protection must not kill a run.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::EvalError;
use crate::types::Checkpoint;

/// Older checkpoint files kept per identity after each save.
const RETAINED_CHECKPOINTS: usize = 3;

pub struct CheckpointStore {
    dir: PathBuf,
    prefix: String,
    file: PathBuf,
}

impl CheckpointStore {
    pub fn new(
        dir: &Path,
        provider: &str,
        rank_start: u32,
        rank_end: u32,
    ) -> Result<Self, EvalError> {
        fs::create_dir_all(dir)?;
        let prefix = format!("{provider}_checkpoint_rank{rank_start}-{rank_end}_");
        let stamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
        let file = dir.join(format!("{prefix}{stamp}.json"));
        Ok(Self {
            dir: dir.to_path_buf(),
            prefix,
            file,
        })
    }

    /// Newest persisted checkpoint for this identity, or an empty one when
    /// none exists or the file is unreadable.
    pub fn load(&self) -> Checkpoint {
        let Some(path) = self.newest_match() else {
            tracing::info!(prefix = %self.prefix, "no checkpoint found, starting fresh");
            return Checkpoint::default();
        };
        match read_checkpoint(&path) {
            Ok(checkpoint) => {
                tracing::info!(
                    file = %path.display(),
                    processed = checkpoint.processed_keys.len(),
                    results = checkpoint.all_results.len(),
                    "resuming from checkpoint"
                );
                checkpoint
            }
            Err(e) => {
                tracing::warn!(file = %path.display(), error = %e, "checkpoint unreadable, starting fresh");
                Checkpoint::default()
            }
        }
    }

    /// Full overwrite of this run's file, then prune older matches beyond
    /// the retention window.
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<(), EvalError> {
        let json = serde_json::to_string_pretty(checkpoint)?;
        fs::write(&self.file, json)?;
        tracing::info!(
            file = %self.file.display(),
            processed = checkpoint.processed_keys.len(),
            "checkpoint saved"
        );
        self.prune();
        Ok(())
    }

    /// Delete every checkpoint for this identity, after a fully successful
    /// run.
    pub fn remove(&self) {
        for path in self.matches() {
            if let Err(e) = fs::remove_file(&path) {
                tracing::warn!(file = %path.display(), error = %e, "could not remove checkpoint");
            }
        }
    }

    fn matches(&self) -> Vec<PathBuf> {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.starts_with(&self.prefix) && name.ends_with(".json"))
            })
            .collect()
    }

    /// Matches sorted newest-first by mtime, with the filename (which embeds
    /// the run timestamp) as tiebreaker.
    fn matches_newest_first(&self) -> Vec<PathBuf> {
        let mut matches = self.matches();
        matches.sort_by_key(|path| {
            let mtime = fs::metadata(path).and_then(|m| m.modified()).ok();
            std::cmp::Reverse((mtime, path.clone()))
        });
        matches
    }

    fn newest_match(&self) -> Option<PathBuf> {
        self.matches_newest_first().into_iter().next()
    }

    fn prune(&self) {
        for path in self
            .matches_newest_first()
            .into_iter()
            .skip(RETAINED_CHECKPOINTS)
        {
            match fs::remove_file(&path) {
                Ok(()) => tracing::debug!(file = %path.display(), "pruned old checkpoint"),
                Err(e) => tracing::warn!(file = %path.display(), error = %e, "could not prune checkpoint"),
            }
        }
    }
}

fn read_checkpoint(path: &Path) -> Result<Checkpoint, EvalError> {
    let text = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}
