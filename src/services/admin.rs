//! Admin settings — password change and an account overview.

use std::sync::Arc;

use serde::Serialize;
use time::OffsetDateTime;
use tracing::info;

use super::ChatError;
use super::config::{Config, ConfigStore};
use super::session::{TokenProvider, cancellable};
use crate::settings::RepoRef;
use crate::validate::{self, ValidationError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdminOverview {
    /// `None` if the stored username no longer decodes.
    pub username: Option<String>,
    pub repository: String,
    pub config_issue: u64,
    pub active_chats: usize,
    pub total_chats: usize,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub updated_at: Option<OffsetDateTime>,
}

pub struct AdminSettings {
    config: Arc<ConfigStore>,
    tokens: Arc<dyn TokenProvider>,
    repo: RepoRef,
    min_password_len: usize,
    strict_writes: bool,
}

impl AdminSettings {
    #[must_use]
    pub fn new(
        config: Arc<ConfigStore>,
        tokens: Arc<dyn TokenProvider>,
        repo: RepoRef,
        min_password_len: usize,
        strict_writes: bool,
    ) -> Self {
        Self { config, tokens, repo, min_password_len, strict_writes }
    }

    /// Replace the admin password and stamp `updatedAt`.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::PasswordMismatch`] or a length error before
    /// any remote call, [`ChatError::Access`] without an admin session.
    pub async fn change_password(&self, new_password: &str, confirm: &str) -> Result<(), ChatError> {
        validate::password(new_password, self.min_password_len)?;
        if new_password != confirm {
            return Err(ValidationError::PasswordMismatch.into());
        }
        let token = self.tokens.admin_bearer()?;
        let cancel = self.tokens.cancellation();

        let mut config = self.config.load(Some(token.as_str())).await?;
        config.set_password(new_password, OffsetDateTime::now_utc());
        cancellable(&cancel, self.persist(&token, &config)).await?;
        info!("admin password changed");
        Ok(())
    }

    /// # Errors
    ///
    /// Returns the config load error.
    pub async fn overview(&self) -> Result<AdminOverview, ChatError> {
        let config = self.config.load(self.tokens.read_token().as_deref()).await?;
        Ok(AdminOverview {
            username: config.admin_username(),
            repository: self.repo.to_string(),
            config_issue: self.config.issue(),
            active_chats: config.chats.iter().filter(|c| c.active).count(),
            total_chats: config.chats.len(),
            created_at: config.admin.created_at,
            updated_at: config.admin.updated_at,
        })
    }

    async fn persist(&self, token: &str, config: &Config) -> Result<(), super::config::ConfigError> {
        if self.strict_writes {
            self.config.save_checked(token, config).await.map(|_| ())
        } else {
            self.config.save(token, config).await
        }
    }
}

#[cfg(test)]
#[path = "admin_test.rs"]
mod tests;
