//! Wiring of every board service over one remote store.
//!
//! DESIGN
//! ======
//! `Board` plays the role of shared application state: it builds the config
//! store, session and services once, and every service that needs a token
//! gets the session as its [`TokenProvider`]. All services share the same
//! session, so logging out anywhere cancels pending writes everywhere.

use std::sync::Arc;

use crate::github::client::GithubClient;
use crate::github::{RemoteStore, StoreError};
use crate::services::admin::AdminSettings;
use crate::services::channel::MessageChannel;
use crate::services::config::ConfigStore;
use crate::services::dashboard::Dashboard;
use crate::services::registry::ChatRegistry;
use crate::services::session::{Session, TokenProvider};
use crate::services::session_store::SessionStore;
use crate::settings::BoardSettings;

pub struct Board {
    pub settings: BoardSettings,
    pub remote: Arc<dyn RemoteStore>,
    pub config: Arc<ConfigStore>,
    pub session: Session,
    pub registry: Arc<ChatRegistry>,
    pub channel: Arc<MessageChannel>,
    pub dashboard: Arc<Dashboard>,
    pub admin: AdminSettings,
}

impl Board {
    #[must_use]
    pub fn new(settings: BoardSettings, remote: Arc<dyn RemoteStore>, store: Arc<dyn SessionStore>) -> Self {
        let config = Arc::new(ConfigStore::new(remote.clone(), settings.config_issue));
        let session = Session::new(&settings, remote.clone(), config.clone(), store);
        let tokens: Arc<dyn TokenProvider> = Arc::new(session.clone());

        let registry = Arc::new(ChatRegistry::new(
            config.clone(),
            remote.clone(),
            tokens.clone(),
            settings.strict_config_writes,
        ));
        let channel = Arc::new(MessageChannel::new(remote.clone(), tokens.clone(), settings.max_message_len));
        let dashboard = Arc::new(Dashboard::new(registry.clone(), channel.clone()));
        let admin = AdminSettings::new(
            config.clone(),
            tokens,
            settings.repo.clone(),
            settings.min_password_len,
            settings.strict_config_writes,
        );

        Self { settings, remote, config, session, registry, channel, dashboard, admin }
    }

    /// Board backed by the GitHub REST API.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::HttpClientBuild`] if the HTTP client cannot be built.
    pub fn connect(settings: BoardSettings, store: Arc<dyn SessionStore>) -> Result<Self, StoreError> {
        let remote: Arc<dyn RemoteStore> = Arc::new(GithubClient::new(&settings)?);
        Ok(Self::new(settings, remote, store))
    }
}
