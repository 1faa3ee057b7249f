//! LLM Caller (spec §4.3): the single entry point to the external model.
//!
//! Retries with escalating fallbacks resolved through the `ModelSelector`,
//! categorizes failures, and never lets a raw transport error reach the
//! caller — only a `LlmCallError` with a stable `kind`.

use async_trait::async_trait;
use thiserror::Error;

mod http;
mod mock;
mod retry;

pub use http::HttpLlmProvider;
pub use mock::MockLlmProvider;
pub use retry::RetryingLlmCaller;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    MissingCredential,
    RateLimit,
    QuotaExceeded,
    AuthError,
    ModelNotFound,
    NetworkError,
    ServerError,
    Unknown,
}

impl ErrorKind {
    /// Categorizes a raw provider error message into one of the closed set
    /// of kinds spec §4.3 requires. Mirrors the teacher's
    /// `RetryingLlmCaller::is_auth_error` / `is_rate_limit_error` string
    /// sniffing, generalized to the full taxonomy.
    pub fn classify(raw: &str, status: Option<u16>) -> Self {
        let lower = raw.to_lowercase();
        match status {
            Some(401) | Some(403) => return ErrorKind::AuthError,
            Some(404) => return ErrorKind::ModelNotFound,
            Some(429) => return ErrorKind::RateLimit,
            Some(s) if s >= 500 => return ErrorKind::ServerError,
            _ => {}
        }
        if lower.contains("authentication") || lower.contains("unauthorized") || lower.contains("invalid api key") {
            ErrorKind::AuthError
        } else if lower.contains("quota") {
            ErrorKind::QuotaExceeded
        } else if lower.contains("rate limit") || lower.contains("too many requests") {
            ErrorKind::RateLimit
        } else if lower.contains("model") && (lower.contains("not found") || lower.contains("unknown model")) {
            ErrorKind::ModelNotFound
        } else if lower.contains("network") || lower.contains("connection") || lower.contains("timed out") {
            ErrorKind::NetworkError
        } else if lower.contains("server error") || lower.contains("internal error") {
            ErrorKind::ServerError
        } else {
            ErrorKind::Unknown
        }
    }

    /// Whether this category is worth retrying with a fallback model, as
    /// opposed to a hard stop (spec §4.3, §7: credential errors never fall back).
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ErrorKind::MissingCredential | ErrorKind::AuthError)
    }
}

#[derive(Debug, Error)]
#[error("LLM call failed ({kind:?}): {message}")]
pub struct LlmCallError {
    pub kind: ErrorKind,
    pub message: String,
    pub retry_with_fallback: bool,
}

impl LlmCallError {
    pub fn missing_credential(stage_name: &str) -> Self {
        Self {
            kind: ErrorKind::MissingCredential,
            message: format!("no credential resolved for stage '{stage_name}'"),
            retry_with_fallback: false,
        }
    }
}

/// A raw transport-level call: "complete(prompt, model, key) -> text",
/// treated as an external collaborator per spec §1. Implementations never
/// see retry or fallback logic — that lives in `RetryingLlmCaller`.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete_raw(
        &self,
        prompt: &str,
        model: &str,
        credential: &str,
        system_prompt: Option<&str>,
    ) -> Result<String, RawProviderError>;
}

#[derive(Debug, Clone)]
pub struct RawProviderError {
    pub status: Option<u16>,
    pub message: String,
}

impl std::fmt::Display for RawProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// The component named in spec §4.3. Call sites never see `LlmProvider`
/// directly — only this.
#[async_trait]
pub trait LlmCaller: Send + Sync {
    async fn complete(
        &self,
        prompt: &str,
        model: &str,
        credential: &str,
        system_prompt: Option<&str>,
        stage_name: Option<&str>,
        max_retries: u32,
    ) -> Result<String, LlmCallError>;
}
