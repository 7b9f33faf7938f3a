//! Chat registry — the chat list inside the board configuration.
//!
//! DESIGN
//! ======
//! The registry keeps no state of its own. Every call loads the config,
//! and every mutation rewrites it through [`ConfigStore`]. Listings return
//! active chats only, in stored order. Soft delete flips `active` and
//! leaves the chat issue and its comments untouched.
//!
//! ERROR HANDLING
//! ==============
//! `create` makes two remote writes: the chat issue, then the config. They
//! are not transactional. If the config save fails, the issue is left behind
//! and the caller gets [`ChatError::OrphanedChat`] naming it. Nothing is
//! rolled back.

use std::sync::Arc;

use time::OffsetDateTime;
use tracing::{debug, info, warn};

use super::ChatError;
use super::config::{ChatRecord, Config, ConfigError, ConfigStore};
use super::session::{TokenProvider, cancellable};
use crate::github::{NewResource, RemoteStore};
use crate::validate::{self, ValidationError};

pub const CHAT_LABEL: &str = "secret-chat";

pub struct ChatRegistry {
    config: Arc<ConfigStore>,
    remote: Arc<dyn RemoteStore>,
    tokens: Arc<dyn TokenProvider>,
    strict_writes: bool,
}

impl ChatRegistry {
    /// `strict_writes` switches config saves to the revision-checked path.
    #[must_use]
    pub fn new(
        config: Arc<ConfigStore>,
        remote: Arc<dyn RemoteStore>,
        tokens: Arc<dyn TokenProvider>,
        strict_writes: bool,
    ) -> Self {
        Self { config, remote, tokens, strict_writes }
    }

    async fn load(&self) -> Result<Config, ChatError> {
        Ok(self.config.load(self.tokens.read_token().as_deref()).await?)
    }

    /// Create a chat issue and register it.
    ///
    /// # Errors
    ///
    /// Validation errors come before any remote call. A key already used by
    /// an active chat is [`ValidationError::DuplicateSecretKey`].
    pub async fn create(&self, name: &str, secret_key: &str) -> Result<ChatRecord, ChatError> {
        let name = validate::chat_name(name)?;
        let secret_key = validate::secret_key(secret_key)?;
        let token = self.tokens.admin_bearer()?;
        let cancel = self.tokens.cancellation();

        let mut config = self.load().await?;
        if config.chats.iter().any(|c| c.active && c.secret_key == secret_key) {
            return Err(ValidationError::DuplicateSecretKey.into());
        }

        let fields = NewResource {
            title: format!("Chat: {name}"),
            body: chat_body(&name, &secret_key),
            labels: vec![CHAT_LABEL.to_string()],
        };
        let created = cancellable(&cancel, self.remote.create_resource(&token, &fields)).await?;
        let record = ChatRecord {
            id: created.number,
            name,
            secret_key,
            created_at: OffsetDateTime::now_utc(),
            active: true,
        };

        let registered = match config.push_chat(record.clone()) {
            Ok(()) => cancellable(&cancel, self.persist(&token, &config)).await,
            Err(e) => Err(e),
        };
        if let Err(source) = registered {
            warn!(issue = created.number, error = %source, "chat issue created but not registered");
            return Err(ChatError::OrphanedChat { issue: created.number, source });
        }

        info!(chat_id = record.id, name = %record.name, "chat created");
        Ok(record)
    }

    /// Active chats in stored order.
    ///
    /// # Errors
    ///
    /// Returns the config load error.
    pub async fn list(&self) -> Result<Vec<ChatRecord>, ChatError> {
        Ok(self.load().await?.chats.into_iter().filter(|c| c.active).collect())
    }

    /// Every chat, including soft-deleted ones.
    ///
    /// # Errors
    ///
    /// Returns the config load error.
    pub async fn list_all(&self) -> Result<Vec<ChatRecord>, ChatError> {
        Ok(self.load().await?.chats)
    }

    /// The active chat whose key matches, if any.
    ///
    /// # Errors
    ///
    /// Returns the config load error.
    pub async fn find_by_key(&self, secret_key: &str) -> Result<Option<ChatRecord>, ChatError> {
        let secret_key = secret_key.trim();
        Ok(self.list().await?.into_iter().find(|c| c.secret_key == secret_key))
    }

    /// An active chat by id.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::NotFound`] for unknown or soft-deleted ids.
    pub async fn get(&self, id: u64) -> Result<ChatRecord, ChatError> {
        self.list()
            .await?
            .into_iter()
            .find(|c| c.id == id)
            .ok_or(ChatError::NotFound(id))
    }

    /// Mark a chat inactive. Already inactive chats are left alone.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::NotFound`] if no record has this id.
    pub async fn soft_delete(&self, id: u64) -> Result<(), ChatError> {
        let token = self.tokens.admin_bearer()?;
        let cancel = self.tokens.cancellation();

        let mut config = self.load().await?;
        let record = config.chats.iter_mut().find(|c| c.id == id).ok_or(ChatError::NotFound(id))?;
        if !record.active {
            debug!(chat_id = id, "chat already inactive");
            return Ok(());
        }
        record.active = false;

        cancellable(&cancel, self.persist(&token, &config)).await?;
        info!(chat_id = id, "chat deactivated");
        Ok(())
    }

    async fn persist(&self, token: &str, config: &Config) -> Result<(), ConfigError> {
        if self.strict_writes {
            self.config.save_checked(token, config).await.map(|_| ())
        } else {
            self.config.save(token, config).await
        }
    }
}

fn chat_body(name: &str, secret_key: &str) -> String {
    format!(
        "# {name}\n\n\
         Secret key: `{secret_key}`\n\n\
         Every comment on this issue is a chat message. Only the key stored in \
         the board configuration grants access."
    )
}

#[cfg(test)]
#[path = "registry_test.rs"]
mod tests;
