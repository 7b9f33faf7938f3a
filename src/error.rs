//! Error codes shared by every service error type.
//!
//! DESIGN
//! ======
//! Each module owns its own `thiserror` enum. Consumers never match on
//! those enums to decide presentation; they ask the error for a grepable
//! code, a retryable flag and a severity through [`ErrorCode`].

use std::fmt;

/// Notification severity for a failed user action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        };
        f.write_str(label)
    }
}

/// Grepable error code, retryable flag and severity for user-facing errors.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }

    fn severity(&self) -> Severity {
        Severity::Error
    }
}

/// Render an error as a single notification line: `[E_CODE] message`.
pub fn notification_line(err: &dyn ErrorCode) -> String {
    let retry = if err.retryable() { " (retry possible)" } else { "" };
    format!("[{}] {err}{retry}", err.error_code())
}

#[cfg(test)]
#[path = "error_test.rs"]
mod tests;
