//! Board settings parsed from environment variables.
//!
//! Required:
//! - `BOARD_REPO`: `owner/name` of the repository whose issues back the board
//!
//! Everything else has a default; unparsable values fall back to it.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "https://api.github.com";
pub const DEFAULT_CONFIG_ISSUE: u64 = 1;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 1_800;
pub const DEFAULT_MAX_LOGIN_ATTEMPTS: usize = 5;
pub const DEFAULT_LOGIN_WINDOW_SECS: u64 = 900;
pub const DEFAULT_MIN_PASSWORD_LEN: usize = 6;
pub const DEFAULT_MAX_MESSAGE_LEN: usize = 65_536;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_PAGE_SIZE: u32 = 100;
pub const DEFAULT_SESSION_FILE: &str = ".issueboard-session.json";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("missing required setting: env var {var} not set")]
    Missing { var: &'static str },
    #[error("invalid repository '{0}' (expected owner/name)")]
    InvalidRepo(String),
}

impl crate::error::ErrorCode for SettingsError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Missing { .. } => "E_SETTINGS_MISSING",
            Self::InvalidRepo(_) => "E_SETTINGS_REPO",
        }
    }
}

// =============================================================================
// REPOSITORY
// =============================================================================

/// `owner/name` pair identifying the backing repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl FromStr for RepoRef {
    type Err = SettingsError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim().trim_matches('/');
        let Some((owner, name)) = trimmed.split_once('/') else {
            return Err(SettingsError::InvalidRepo(raw.to_string()));
        };
        if owner.is_empty() || name.is_empty() || name.contains('/') {
            return Err(SettingsError::InvalidRepo(raw.to_string()));
        }
        Ok(Self { owner: owner.to_string(), name: name.to_string() })
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

// =============================================================================
// SETTINGS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpTimeouts {
    pub request_secs: u64,
    pub connect_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardSettings {
    pub repo: RepoRef,
    pub api_base: String,
    pub config_issue: u64,
    pub poll_interval: Duration,
    pub session_timeout: Duration,
    pub max_login_attempts: usize,
    pub login_window: Duration,
    pub min_password_len: usize,
    pub max_message_len: usize,
    pub timeouts: HttpTimeouts,
    pub page_size: u32,
    pub allow_bootstrap: bool,
    pub strict_config_writes: bool,
    pub session_file: PathBuf,
    pub token: Option<String>,
}

impl BoardSettings {
    /// Settings for `repo` with every other value at its default.
    #[must_use]
    pub fn for_repo(repo: RepoRef) -> Self {
        Self {
            repo,
            api_base: DEFAULT_API_BASE.to_string(),
            config_issue: DEFAULT_CONFIG_ISSUE,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            session_timeout: Duration::from_secs(DEFAULT_SESSION_TIMEOUT_SECS),
            max_login_attempts: DEFAULT_MAX_LOGIN_ATTEMPTS,
            login_window: Duration::from_secs(DEFAULT_LOGIN_WINDOW_SECS),
            min_password_len: DEFAULT_MIN_PASSWORD_LEN,
            max_message_len: DEFAULT_MAX_MESSAGE_LEN,
            timeouts: HttpTimeouts {
                request_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
                connect_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            },
            page_size: DEFAULT_PAGE_SIZE,
            allow_bootstrap: true,
            strict_config_writes: false,
            session_file: PathBuf::from(DEFAULT_SESSION_FILE),
            token: None,
        }
    }

    /// Build typed settings from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `BOARD_REPO` is missing or malformed.
    pub fn from_env() -> Result<Self, SettingsError> {
        let repo = std::env::var("BOARD_REPO").map_err(|_| SettingsError::Missing { var: "BOARD_REPO" })?;
        Ok(Self::from_env_for(repo.parse()?))
    }

    /// Like [`BoardSettings::from_env`], with the repository supplied by the caller.
    #[must_use]
    pub fn from_env_for(repo: RepoRef) -> Self {
        let mut settings = Self::for_repo(repo);

        if let Ok(base) = std::env::var("BOARD_API_BASE") {
            settings.api_base = base.trim_end_matches('/').to_string();
        }
        settings.config_issue = env_parse("BOARD_CONFIG_ISSUE", DEFAULT_CONFIG_ISSUE);
        settings.poll_interval = Duration::from_millis(env_parse("BOARD_POLL_INTERVAL_MS", DEFAULT_POLL_INTERVAL_MS));
        settings.session_timeout =
            Duration::from_secs(env_parse("BOARD_SESSION_TIMEOUT_SECS", DEFAULT_SESSION_TIMEOUT_SECS));
        settings.max_login_attempts = env_parse("BOARD_MAX_LOGIN_ATTEMPTS", DEFAULT_MAX_LOGIN_ATTEMPTS);
        settings.login_window = Duration::from_secs(env_parse("BOARD_LOGIN_WINDOW_SECS", DEFAULT_LOGIN_WINDOW_SECS));
        settings.min_password_len = env_parse("BOARD_MIN_PASSWORD_LEN", DEFAULT_MIN_PASSWORD_LEN);
        settings.max_message_len = env_parse("BOARD_MAX_MESSAGE_LEN", DEFAULT_MAX_MESSAGE_LEN);
        settings.timeouts = HttpTimeouts {
            request_secs: env_parse("BOARD_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS),
            connect_secs: env_parse("BOARD_CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT_SECS),
        };
        settings.page_size = env_parse("BOARD_PAGE_SIZE", DEFAULT_PAGE_SIZE).clamp(1, 100);
        settings.allow_bootstrap = env_parse("BOARD_ALLOW_BOOTSTRAP", true);
        settings.strict_config_writes = env_parse("BOARD_STRICT_CONFIG_WRITES", false);
        if let Ok(path) = std::env::var("BOARD_SESSION_FILE") {
            settings.session_file = PathBuf::from(path);
        }
        settings.token = std::env::var("GITHUB_TOKEN")
            .ok()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());

        settings
    }
}

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[path = "settings_test.rs"]
mod tests;
