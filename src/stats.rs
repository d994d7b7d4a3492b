//! Per-run call and token accounting.
//!
//! Counters are owned by whoever drives the calls and merged at completion
//! points, so no synchronization is needed.

use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UsageStats {
    pub api_calls: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl UsageStats {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    /// Account one completed request/response pair.
    pub fn record_call(&mut self, prompt: &str, response: &str) {
        self.api_calls += 1;
        self.input_tokens += estimate_tokens(prompt);
        self.output_tokens += estimate_tokens(response);
    }

    pub fn merge(&mut self, other: &UsageStats) {
        self.api_calls += other.api_calls;
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// Char-based token estimate: CJK runs about 1.5 chars per token, everything
/// else about 4. Close enough for budget logging; not billing-grade.
pub fn estimate_tokens(text: &str) -> u64 {
    let mut cjk = 0usize;
    let mut other = 0usize;
    for c in text.chars() {
        if ('\u{4e00}'..='\u{9fff}').contains(&c) {
            cjk += 1;
        } else {
            other += 1;
        }
    }
    (cjk as f64 / 1.5 + other as f64 / 4.0) as u64
}
