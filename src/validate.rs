//! Input validation, applied before any remote call.

use std::sync::LazyLock;

use regex::Regex;

pub const USERNAME_MIN_CHARS: usize = 2;
pub const USERNAME_MAX_CHARS: usize = 50;
pub const SECRET_KEY_MIN_CHARS: usize = 3;
pub const SECRET_KEY_MAX_CHARS: usize = 100;
pub const CHAT_NAME_MAX_CHARS: usize = 100;

static USERNAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[\p{Han}A-Za-z0-9_-]+$").expect("username pattern is valid")
});

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{field} must not be empty")]
    Empty { field: &'static str },
    #[error("{field} is too long (max {max} characters)")]
    TooLong { field: &'static str, max: usize },
    #[error("{field} is too short (min {min} characters)")]
    TooShort { field: &'static str, min: usize },
    #[error("username may only contain letters, digits, CJK characters, '_' and '-'")]
    InvalidUsername,
    #[error("secret key contains control characters")]
    InvalidSecretKey,
    #[error("secret key is already used by an active chat")]
    DuplicateSecretKey,
    #[error("passwords do not match")]
    PasswordMismatch,
}

impl crate::error::ErrorCode for ValidationError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Empty { .. } => "E_VALIDATION_EMPTY",
            Self::TooLong { .. } => "E_VALIDATION_TOO_LONG",
            Self::TooShort { .. } => "E_VALIDATION_TOO_SHORT",
            Self::InvalidUsername => "E_VALIDATION_USERNAME",
            Self::InvalidSecretKey => "E_VALIDATION_SECRET_KEY",
            Self::DuplicateSecretKey => "E_VALIDATION_DUPLICATE_KEY",
            Self::PasswordMismatch => "E_VALIDATION_PASSWORD_MISMATCH",
        }
    }

    fn severity(&self) -> crate::error::Severity {
        crate::error::Severity::Warning
    }
}

fn bounded<'a>(field: &'static str, raw: &'a str, min: usize, max: usize) -> Result<&'a str, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Empty { field });
    }
    let len = trimmed.chars().count();
    if len < min {
        return Err(ValidationError::TooShort { field, min });
    }
    if len > max {
        return Err(ValidationError::TooLong { field, max });
    }
    Ok(trimmed)
}

/// Validate an admin username. Returns the trimmed value.
///
/// # Errors
///
/// Returns [`ValidationError::InvalidUsername`] for characters outside the
/// allowed set, or a length error.
pub fn username(raw: &str) -> Result<String, ValidationError> {
    let value = bounded("username", raw, USERNAME_MIN_CHARS, USERNAME_MAX_CHARS)?;
    if !USERNAME_PATTERN.is_match(value) {
        return Err(ValidationError::InvalidUsername);
    }
    Ok(value.to_string())
}

/// Validate a password. Passwords are not trimmed.
///
/// # Errors
///
/// Returns [`ValidationError::Empty`] or [`ValidationError::TooShort`].
pub fn password(raw: &str, min_len: usize) -> Result<(), ValidationError> {
    if raw.is_empty() {
        return Err(ValidationError::Empty { field: "password" });
    }
    if raw.chars().count() < min_len {
        return Err(ValidationError::TooShort { field: "password", min: min_len });
    }
    Ok(())
}

/// Validate a chat secret key. Returns the trimmed value.
///
/// # Errors
///
/// Returns [`ValidationError::InvalidSecretKey`] if it contains control
/// characters, or a length error.
pub fn secret_key(raw: &str) -> Result<String, ValidationError> {
    let value = bounded("secret key", raw, SECRET_KEY_MIN_CHARS, SECRET_KEY_MAX_CHARS)?;
    if value.chars().any(char::is_control) {
        return Err(ValidationError::InvalidSecretKey);
    }
    Ok(value.to_string())
}

/// Validate a chat display name. Returns the trimmed value.
///
/// # Errors
///
/// Returns a length error for empty or oversized names.
pub fn chat_name(raw: &str) -> Result<String, ValidationError> {
    bounded("chat name", raw, 1, CHAT_NAME_MAX_CHARS).map(str::to_string)
}

/// Validate a chat message body against the configured ceiling. Returns the trimmed value.
///
/// # Errors
///
/// Returns [`ValidationError::Empty`] for blank input or
/// [`ValidationError::TooLong`] above `max_len` characters.
pub fn message(raw: &str, max_len: usize) -> Result<String, ValidationError> {
    bounded("message", raw, 1, max_len).map(str::to_string)
}

/// Truncate to `max_chars` characters, appending `...` when anything was cut.
#[must_use]
pub fn truncate_text(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

#[cfg(test)]
#[path = "validate_test.rs"]
mod tests;
