//! Remote store adapter — GitHub issues as a keyed document store.
//!
//! DESIGN
//! ======
//! An issue is a "resource" (a document with a text body) and its comments
//! are an append-only list. Services depend on the [`RemoteStore`] trait,
//! never on HTTP directly: [`client::GithubClient`] talks to the REST API,
//! [`memory::MemoryStore`] keeps everything in process.
//!
//! Every call takes an optional bearer token; write calls require one and
//! fail with [`StoreError::Unauthorized`] before any traffic if it is empty.
//! No retries happen here. Callers decide whether to ask for a new token or
//! surface the error.

pub mod client;
pub mod memory;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::{ErrorCode, Severity};

// =============================================================================
// ERROR
// =============================================================================

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error(
        "rate limited by GitHub; authenticate or wait{}",
        .retry_after_secs.map(|s| format!(" {s}s")).unwrap_or_default()
    )]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("request cancelled locally; the remote side may still have applied it")]
    Cancelled,

    #[error("API response error: status {status}")]
    Api { status: u16, body: String },

    #[error("API response parse failed: {0}")]
    Parse(String),

    #[error("HTTP client build failed: {0}")]
    HttpClientBuild(String),
}

impl StoreError {
    pub(crate) fn missing_token() -> Self {
        Self::Unauthorized("a GitHub token is required for writes".into())
    }
}

impl ErrorCode for StoreError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "E_NOT_FOUND",
            Self::Unauthorized(_) => "E_UNAUTHORIZED",
            Self::RateLimited { .. } => "E_RATE_LIMITED",
            Self::Network(_) => "E_NETWORK",
            Self::Timeout => "E_TIMEOUT",
            Self::Cancelled => "E_CANCELLED",
            Self::Api { .. } => "E_API_RESPONSE",
            Self::Parse(_) => "E_API_PARSE",
            Self::HttpClientBuild(_) => "E_HTTP_CLIENT_BUILD",
        }
    }

    fn retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Network(_) | Self::Timeout | Self::Api { status: 500..=599, .. }
        )
    }

    fn severity(&self) -> Severity {
        match self {
            Self::Unauthorized(_) | Self::RateLimited { .. } => Severity::Warning,
            Self::Cancelled => Severity::Info,
            _ => Severity::Error,
        }
    }
}

// =============================================================================
// TYPES
// =============================================================================

/// An issue, used as a generic keyed document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub number: u64,
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
}

/// Fields for a resource about to be created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewResource {
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
}

/// One comment under a resource. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub author: String,
    pub body: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

// =============================================================================
// TRAIT
// =============================================================================

#[async_trait::async_trait]
pub trait RemoteStore: Send + Sync {
    /// Fetch one resource by number.
    async fn read_resource(&self, token: Option<&str>, id: u64) -> Result<Resource, StoreError>;

    /// List resources carrying `label`, oldest first.
    async fn list_resources(&self, token: Option<&str>, label: &str) -> Result<Vec<Resource>, StoreError>;

    /// List every comment under a resource in the order the store returns them.
    async fn list_comments(&self, token: Option<&str>, id: u64) -> Result<Vec<Message>, StoreError>;

    async fn create_resource(&self, token: &str, fields: &NewResource) -> Result<Resource, StoreError>;

    async fn append_comment(&self, token: &str, id: u64, body: &str) -> Result<(), StoreError>;

    /// Replace a resource's body in full.
    async fn patch_resource_body(&self, token: &str, id: u64, body: &str) -> Result<(), StoreError>;

    /// Resolve the login a token belongs to. Used to validate tokens.
    async fn whoami(&self, token: &str) -> Result<String, StoreError>;
}

pub(crate) fn require_token(token: &str) -> Result<&str, StoreError> {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return Err(StoreError::missing_token());
    }
    Ok(trimmed)
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
