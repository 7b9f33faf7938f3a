//! Config store — the board configuration kept inside one fixed issue.
//!
//! DESIGN
//! ======
//! The configuration issue body is free text with exactly one ```` ```json ````
//! fenced block. Only that block is read; everything around it is for humans.
//! Every mutation rewrites the whole block.
//!
//! TRADE-OFFS
//! ==========
//! `save` is last-write-wins: two admins editing at once silently clobber each
//! other. `save_checked` compares the stored `revision` first and fails with
//! [`ConfigError::Conflict`]. The issues API has no conditional PATCH, so the
//! check narrows the race window but cannot close it.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::error::ErrorCode;
use crate::github::{NewResource, RemoteStore, StoreError};
use crate::obfuscate::{deobfuscate, obfuscate};

pub const CONFIG_LABEL: &str = "system-config";
pub const CONFIG_TITLE: &str = "System configuration - do not delete";
pub const CONFIG_FORMAT_VERSION: &str = "1.0";

static FENCED_JSON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```json\r?\n(\{.*?\})\r?\n```").expect("fenced block pattern is valid"));

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminCredentials {
    /// Obfuscated, see [`crate::obfuscate`].
    pub username: String,
    /// Obfuscated, see [`crate::obfuscate`].
    pub password: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "time::serde::rfc3339::option")]
    pub updated_at: Option<OffsetDateTime>,
}

/// A registered chat. `id` is the number of the issue holding its messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRecord {
    pub id: u64,
    pub name: String,
    pub secret_key: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

fn default_version() -> String {
    CONFIG_FORMAT_VERSION.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub admin: AdminCredentials,
    #[serde(default)]
    pub chats: Vec<ChatRecord>,
    #[serde(default = "default_version")]
    pub version: String,
    /// Bumped by `save_checked`. Plain `save` leaves it alone.
    #[serde(default)]
    pub revision: u64,
}

impl Config {
    /// Fresh config with obfuscated credentials and no chats.
    #[must_use]
    pub fn new(username: &str, password: &str, now: OffsetDateTime) -> Self {
        Self {
            admin: AdminCredentials {
                username: obfuscate(username),
                password: obfuscate(password),
                created_at: now,
                updated_at: None,
            },
            chats: Vec::new(),
            version: default_version(),
            revision: 0,
        }
    }

    #[must_use]
    pub fn admin_username(&self) -> Option<String> {
        deobfuscate(&self.admin.username)
    }

    /// Compare plain credentials against the stored, obfuscated pair.
    #[must_use]
    pub fn verify(&self, username: &str, password: &str) -> bool {
        let stored_user = deobfuscate(&self.admin.username);
        let stored_pass = deobfuscate(&self.admin.password);
        stored_user.as_deref() == Some(username) && stored_pass.as_deref() == Some(password)
    }

    pub fn set_password(&mut self, password: &str, now: OffsetDateTime) {
        self.admin.password = obfuscate(password);
        self.admin.updated_at = Some(now);
    }

    /// Append a chat record, keeping ids unique.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::DuplicateChat`] if a record with the same id exists.
    pub fn push_chat(&mut self, record: ChatRecord) -> Result<(), ConfigError> {
        if self.chats.iter().any(|c| c.id == record.id) {
            return Err(ConfigError::DuplicateChat(record.id));
        }
        self.chats.push(record);
        Ok(())
    }
}

// =============================================================================
// ERROR
// =============================================================================

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("system not initialized: create the admin account first")]
    Uninitialized,
    #[error("system already initialized (configuration issue #{0})")]
    AlreadyInitialized(u64),
    #[error("configuration issue #{0} has no ```json block")]
    MissingBlock(u64),
    #[error("configuration JSON invalid: {0}")]
    Json(String),
    #[error("configuration changed concurrently (expected revision {expected}, found {found})")]
    Conflict { expected: u64, found: u64 },
    #[error("chat #{0} is already registered")]
    DuplicateChat(u64),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ErrorCode for ConfigError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Uninitialized => "E_CONFIG_UNINITIALIZED",
            Self::AlreadyInitialized(_) => "E_CONFIG_ALREADY_INITIALIZED",
            Self::MissingBlock(_) => "E_CONFIG_MISSING_BLOCK",
            Self::Json(_) => "E_CONFIG_JSON",
            Self::Conflict { .. } => "E_CONFIG_CONFLICT",
            Self::DuplicateChat(_) => "E_CONFIG_DUPLICATE_CHAT",
            Self::Store(e) => e.error_code(),
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::Conflict { .. } => true,
            Self::Store(e) => e.retryable(),
            _ => false,
        }
    }

    fn severity(&self) -> crate::error::Severity {
        match self {
            Self::Store(e) => e.severity(),
            _ => crate::error::Severity::Error,
        }
    }
}

// =============================================================================
// BODY FORMAT
// =============================================================================

/// Render the full configuration issue body.
///
/// # Errors
///
/// Returns [`ConfigError::Json`] if serialization fails.
pub fn render_body(config: &Config) -> Result<String, ConfigError> {
    let json = serde_json::to_string_pretty(config).map_err(|e| ConfigError::Json(e.to_string()))?;
    Ok(format!(
        "# System configuration\n\n\
         This issue stores the message board configuration. Do not edit or delete it.\n\n\
         ```json\n{json}\n```"
    ))
}

/// Extract and parse the fenced JSON block from a configuration issue body.
///
/// # Errors
///
/// Returns [`ConfigError::MissingBlock`] if no block matches, or
/// [`ConfigError::Json`] if the block does not parse.
pub fn extract_config(body: &str, issue: u64) -> Result<Config, ConfigError> {
    let captures = FENCED_JSON.captures(body).ok_or(ConfigError::MissingBlock(issue))?;
    let json = captures.get(1).map_or("", |m| m.as_str());
    serde_json::from_str(json).map_err(|e| ConfigError::Json(e.to_string()))
}

// =============================================================================
// STORE
// =============================================================================

pub struct ConfigStore {
    remote: Arc<dyn RemoteStore>,
    issue: u64,
}

impl ConfigStore {
    #[must_use]
    pub fn new(remote: Arc<dyn RemoteStore>, issue: u64) -> Self {
        Self { remote, issue }
    }

    #[must_use]
    pub fn issue(&self) -> u64 {
        self.issue
    }

    /// Read and parse the configuration issue.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Uninitialized`] if the issue does not exist.
    pub async fn load(&self, token: Option<&str>) -> Result<Config, ConfigError> {
        let resource = match self.remote.read_resource(token, self.issue).await {
            Ok(resource) => resource,
            Err(StoreError::NotFound(_)) => return Err(ConfigError::Uninitialized),
            Err(e) => return Err(e.into()),
        };
        extract_config(&resource.body, self.issue)
    }

    /// Create the configuration issue with fresh admin credentials.
    ///
    /// Calling this twice creates two configuration issues; callers guard
    /// with [`ConfigStore::find_existing`].
    ///
    /// # Errors
    ///
    /// Returns a store error if the issue cannot be created.
    pub async fn initialize(&self, token: &str, username: &str, password: &str) -> Result<Config, ConfigError> {
        let config = Config::new(username, password, OffsetDateTime::now_utc());
        let fields = NewResource {
            title: CONFIG_TITLE.to_string(),
            body: render_body(&config)?,
            labels: vec![CONFIG_LABEL.to_string()],
        };
        let created = self.remote.create_resource(token, &fields).await?;
        if created.number == self.issue {
            info!(issue = created.number, "configuration issue created");
        } else {
            warn!(
                created = created.number,
                expected = self.issue,
                "configuration issue number differs from BOARD_CONFIG_ISSUE; update the setting"
            );
        }
        Ok(config)
    }

    /// Overwrite the stored configuration. Last write wins.
    ///
    /// # Errors
    ///
    /// Returns a store error if the patch fails.
    pub async fn save(&self, token: &str, config: &Config) -> Result<(), ConfigError> {
        let body = render_body(config)?;
        self.remote.patch_resource_body(token, self.issue, &body).await?;
        info!(issue = self.issue, chats = config.chats.len(), "configuration saved");
        Ok(())
    }

    /// Save only if the stored revision still matches `config.revision`.
    /// Returns the saved config with its bumped revision.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Conflict`] if someone saved in between.
    pub async fn save_checked(&self, token: &str, config: &Config) -> Result<Config, ConfigError> {
        let current = self.load(Some(token)).await?;
        if current.revision != config.revision {
            warn!(expected = config.revision, found = current.revision, "configuration revision conflict");
            return Err(ConfigError::Conflict { expected: config.revision, found: current.revision });
        }
        let mut next = config.clone();
        next.revision = next.revision.saturating_add(1);
        self.save(token, &next).await?;
        Ok(next)
    }

    /// Numbers of every issue labelled as a configuration issue.
    ///
    /// # Errors
    ///
    /// Returns a store error if the listing fails.
    pub async fn find_existing(&self, token: Option<&str>) -> Result<Vec<u64>, ConfigError> {
        let found = self.remote.list_resources(token, CONFIG_LABEL).await?;
        Ok(found.into_iter().map(|r| r.number).collect())
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
