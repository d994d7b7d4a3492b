//! Pipeline-level error taxonomy.
//!
//! Transport failures have their own taxonomy in [`crate::client::ApiFailure`];
//! they only surface here when a fatal failure aborts the run.

use thiserror::Error;

use crate::client::ApiFailure;

#[derive(Error, Debug)]
pub enum EvalError {
    #[error("API failure: {0}")]
    Api(#[from] ApiFailure),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Input error: {0}")]
    Input(String),

    #[error("Configuration error: {0}")]
    Config(String),
}
