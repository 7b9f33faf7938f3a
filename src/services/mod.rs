//! Board services built on the remote store.
//!
//! ARCHITECTURE
//! ============
//! Each service owns one slice of behaviour and reaches GitHub only through
//! [`crate::github::RemoteStore`]. Privileged writes ask a
//! [`session::TokenProvider`] for a token, so the services carry no global
//! state and can be driven by the CLI, tests, or any other consumer.

pub mod admin;
pub mod channel;
pub mod config;
pub mod dashboard;
pub mod poller;
pub mod registry;
pub mod session;
pub mod session_store;

use crate::error::{ErrorCode, Severity};
use crate::github::StoreError;
use crate::validate::ValidationError;
use config::ConfigError;
use session::AccessError;

/// Error for chat registry, message channel and admin operations.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ChatError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("chat #{0} not found")]
    NotFound(u64),
    #[error(transparent)]
    Access(#[from] AccessError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("chat issue #{issue} was created but registering it failed: {source}")]
    OrphanedChat { issue: u64, source: ConfigError },
}

impl ErrorCode for ChatError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(e) => e.error_code(),
            Self::NotFound(_) => "E_CHAT_NOT_FOUND",
            Self::Access(e) => e.error_code(),
            Self::Config(e) => e.error_code(),
            Self::Store(e) => e.error_code(),
            Self::OrphanedChat { .. } => "E_CHAT_ORPHANED",
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::Config(e) => e.retryable(),
            Self::Store(e) => e.retryable(),
            _ => false,
        }
    }

    fn severity(&self) -> Severity {
        match self {
            Self::Validation(e) => e.severity(),
            Self::Access(e) => e.severity(),
            Self::Config(e) => e.severity(),
            Self::Store(e) => e.severity(),
            Self::NotFound(_) | Self::OrphanedChat { .. } => Severity::Error,
        }
    }
}
