//! Evaluation service clients for the supported LLM providers.
//!
//! Transport-level retries live here, behind [`EvaluationService::evaluate`].
//! Auth rejections are fatal and are never retried; every other failure kind
//! is considered transient.

use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;

use crate::config::EvalConfig;
use crate::error::EvalError;
use crate::retry::{retry, BackoffPolicy};

/// Request timeout, matching provider-side generation limits.
const REQUEST_TIMEOUT_SECS: u64 = 180;
const TEMPERATURE: f64 = 0.2;
const MAX_OUTPUT_TOKENS: u32 = 15_000;

// ═══════════════════════════════════════════
// Providers
// ═══════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Dashscope,
    OpenAi,
    DeepSeek,
    Demo,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dashscope => "dashscope",
            Self::OpenAi => "openai",
            Self::DeepSeek => "deepseek",
            Self::Demo => "demo",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Self::Dashscope => "qwen-plus",
            Self::OpenAi => "gpt-4o",
            Self::DeepSeek => "deepseek-chat",
            Self::Demo => "gemini-2.5-pro",
        }
    }

    pub fn base_url(&self) -> &'static str {
        match self {
            Self::Dashscope => {
                "https://dashscope.aliyuncs.com/api/v1/services/aigc/text-generation/generation"
            }
            Self::OpenAi => "https://api.openai.com/v1/chat/completions",
            Self::DeepSeek => "https://api.deepseek.com/v1/chat/completions",
            Self::Demo => "https://api.nuwaapi.com/v1/chat/completions",
        }
    }

    /// Environment variable holding this provider's API key.
    pub fn api_key_env(&self) -> &'static str {
        match self {
            Self::Dashscope => "AL_KEY",
            Self::OpenAi => "OPENAI_API_KEY",
            Self::DeepSeek => "DEEPSEEK_API_KEY",
            Self::Demo => "DEMO_API_KEY",
        }
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "dashscope" | "alibaba" => Ok(Self::Dashscope),
            "openai" => Ok(Self::OpenAi),
            "deepseek" => Ok(Self::DeepSeek),
            "demo" => Ok(Self::Demo),
            other => Err(format!(
                "unknown provider '{other}' (expected dashscope, openai, deepseek, or demo)"
            )),
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ═══════════════════════════════════════════
// Transport failure taxonomy
// ═══════════════════════════════════════════

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiFailure {
    #[error("rate limited (HTTP 429)")]
    RateLimited,

    #[error("server error (HTTP {status})")]
    ServerError { status: u16 },

    /// Fatal: the key is wrong or revoked, so no request can ever succeed.
    #[error("authentication rejected (HTTP {status})")]
    Auth { status: u16 },

    #[error("client error (HTTP {status}): {message}")]
    ClientError { status: u16, message: String },

    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connection(String),
}

impl ApiFailure {
    /// Fatal failures abort the whole run instead of being retried.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }

    pub fn from_status(status: u16, body: &str) -> Self {
        match status {
            429 => Self::RateLimited,
            401 | 403 => Self::Auth { status },
            s if s >= 500 => Self::ServerError { status: s },
            s => Self::ClientError {
                status: s,
                message: body.chars().take(200).collect(),
            },
        }
    }
}

// ═══════════════════════════════════════════
// Service trait
// ═══════════════════════════════════════════

/// Seam between the pipeline and the network. Tests substitute
/// [`MockEvaluationService`].
#[async_trait]
pub trait EvaluationService: Send + Sync {
    /// Send one evaluation request and return the raw response text.
    async fn evaluate(&self, prompt: &str) -> Result<String, ApiFailure>;
}

// ═══════════════════════════════════════════
// HTTP client
// ═══════════════════════════════════════════

pub struct HttpEvaluationClient {
    provider: Provider,
    model: String,
    api_key: String,
    client: reqwest::Client,
    max_retries: u32,
    backoff: BackoffPolicy,
    max_prompt_chars: usize,
}

impl HttpEvaluationClient {
    pub fn new(
        provider: Provider,
        model: Option<&str>,
        max_retries: u32,
        backoff: BackoffPolicy,
        max_prompt_chars: usize,
    ) -> Result<Self, EvalError> {
        let api_key = std::env::var(provider.api_key_env())
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                EvalError::Config(format!(
                    "missing API key for {provider}: set {}",
                    provider.api_key_env()
                ))
            })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| EvalError::Config(format!("HTTP client init failed: {e}")))?;

        Ok(Self {
            provider,
            model: model.unwrap_or(provider.default_model()).to_string(),
            api_key,
            client,
            max_retries,
            backoff,
            max_prompt_chars,
        })
    }

    pub fn from_config(config: &EvalConfig) -> Result<Self, EvalError> {
        Self::new(
            config.provider,
            config.model.as_deref(),
            config.max_retries,
            config.backoff.clone(),
            config.max_prompt_chars,
        )
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn call_once(&self, prompt: &str) -> Result<String, ApiFailure> {
        let response = self
            .client
            .post(self.provider.base_url())
            .bearer_auth(&self.api_key)
            .json(&request_body(self.provider, &self.model, prompt))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ApiFailure::Timeout
                } else {
                    ApiFailure::Connection(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiFailure::from_status(status, &body));
        }

        let value: Value = response.json().await.map_err(|e| ApiFailure::ClientError {
            status,
            message: format!("malformed response body: {e}"),
        })?;
        extract_content(self.provider, &value)
    }
}

#[async_trait]
impl EvaluationService for HttpEvaluationClient {
    async fn evaluate(&self, prompt: &str) -> Result<String, ApiFailure> {
        let prompt = truncate_prompt(prompt, self.max_prompt_chars);
        retry(self.max_retries, &self.backoff, || self.call_once(&prompt)).await
    }
}

/// Dashscope speaks its native generation format; everyone else is
/// OpenAI-compatible.
fn request_body(provider: Provider, model: &str, prompt: &str) -> Value {
    let messages = json!([{ "role": "user", "content": prompt }]);
    match provider {
        Provider::Dashscope => json!({
            "model": model,
            "input": { "messages": messages },
            "parameters": {
                "temperature": TEMPERATURE,
                "max_tokens": MAX_OUTPUT_TOKENS,
                "enable_thinking": false,
            },
        }),
        _ => json!({
            "model": model,
            "messages": messages,
            "temperature": TEMPERATURE,
            "max_tokens": MAX_OUTPUT_TOKENS,
        }),
    }
}

fn extract_content(provider: Provider, value: &Value) -> Result<String, ApiFailure> {
    let content = match provider {
        Provider::Dashscope => value
            .pointer("/output/choices/0/message/content")
            .or_else(|| value.pointer("/output/text")),
        _ => value.pointer("/choices/0/message/content"),
    };
    content
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ApiFailure::ClientError {
            status: 200,
            message: "response body has no message content".to_string(),
        })
}

fn truncate_prompt(prompt: &str, max_chars: usize) -> String {
    let total = prompt.chars().count();
    if total <= max_chars {
        return prompt.to_string();
    }
    tracing::warn!(total, max_chars, "prompt over length budget, truncating");
    prompt.chars().take(max_chars).collect()
}

// ═══════════════════════════════════════════
// Mock client (for tests)
// ═══════════════════════════════════════════

/// Scripted evaluation service. Pops one outcome per call and falls back to
/// a fixed outcome once the script is exhausted. Tracks how many calls were
/// in flight at once, for concurrency assertions.
pub struct MockEvaluationService {
    script: Mutex<VecDeque<Result<String, ApiFailure>>>,
    fallback: Result<String, ApiFailure>,
    delay: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockEvaluationService {
    pub fn always(response: &str) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Ok(response.to_string()),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn scripted(outcomes: Vec<Result<String, ApiFailure>>) -> Self {
        Self {
            script: Mutex::new(outcomes.into()),
            fallback: Err(ApiFailure::Connection("mock script exhausted".to_string())),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EvaluationService for MockEvaluationService {
    async fn evaluate(&self, _prompt: &str) -> Result<String, ApiFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let next = self.script.lock().expect("mock script lock").pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }
}
