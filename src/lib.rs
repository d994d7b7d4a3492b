//! citeval: batch consistency evaluation of annotated sentences against the
//! source passages they cite, via remote LLM providers.
//!
//! Pipeline shape: load items → group by rank → bounded-concurrency
//! evaluation with checkpoint resume → staged response parsing →
//! classification → partitioned artifacts.

pub mod checkpoint;
pub mod classifier;
pub mod client;
pub mod config;
pub mod error;
pub mod loader;
pub mod parser;
pub mod prompt;
pub mod report;
pub mod retry;
pub mod scheduler;
pub mod splitter;
pub mod stats;
pub mod types;

pub use error::EvalError;
