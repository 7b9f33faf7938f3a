//! Session/auth state — admin identity, bearer token, idle expiry.
//!
//! DESIGN
//! ======
//! A [`Session`] is an explicit context object handed to every privileged
//! service instead of a process-wide global. Services never see the session
//! type itself; they depend on [`TokenProvider`], which answers two
//! questions: "is there a token for plain writes" and "is an admin logged in
//! and still active".
//!
//! States: `LoggedOut -> LoggedIn -> (Expired | LoggedOut)`. `check_auth`
//! compares the time since last activity against the idle ceiling and
//! either refreshes activity or moves to `Expired`.
//!
//! Logout cancels the session's [`CancellationToken`]. Writes started through
//! [`cancellable`] stop waiting and report [`StoreError::Cancelled`]; the
//! request may still have reached GitHub.
//!
//! ERROR HANDLING
//! ==============
//! Session-store failures after a state change are logged and ignored: the
//! in-memory state is authoritative for the running process.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{ErrorCode, Severity};
use crate::github::{RemoteStore, StoreError, require_token};
use crate::services::config::{ConfigError, ConfigStore};
use crate::services::session_store::{
    KEY_CURRENT_CHAT, KEY_IDENTITY, KEY_TOKEN, SessionStore, SessionStoreError, get_typed, put_typed,
};
use crate::settings::BoardSettings;
use crate::throttle::{LoginThrottle, ThrottleError};
use crate::validate::{self, ValidationError};

// =============================================================================
// ACCESS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStatus {
    Authorized,
    Unauthorized,
    Expired,
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum AccessError {
    #[error("admin login required")]
    Unauthorized,
    #[error("session expired; log in again")]
    Expired,
    #[error("a GitHub token is required for this action")]
    MissingToken,
}

impl ErrorCode for AccessError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Unauthorized => "E_ACCESS_UNAUTHORIZED",
            Self::Expired => "E_ACCESS_EXPIRED",
            Self::MissingToken => "E_ACCESS_MISSING_TOKEN",
        }
    }

    fn severity(&self) -> Severity {
        Severity::Warning
    }
}

/// Credentials capability the services request from their environment.
pub trait TokenProvider: Send + Sync {
    /// Token for reads, if any. Reads work anonymously on public repos.
    fn read_token(&self) -> Option<String>;

    /// Token for non-privileged writes such as posting a message.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::MissingToken`] if no token is available.
    fn bearer(&self) -> Result<String, AccessError>;

    /// Token for privileged writes. Requires an active admin session.
    ///
    /// # Errors
    ///
    /// Returns an [`AccessError`] if no admin is logged in, the session has
    /// expired, or no token is available.
    fn admin_bearer(&self) -> Result<String, AccessError>;

    /// Signal fired when pending writes should stop waiting.
    fn cancellation(&self) -> CancellationToken;
}

/// Fixed token with no login gate. For scripts and tests.
pub struct StaticToken {
    token: Option<String>,
    cancel: CancellationToken,
}

impl StaticToken {
    #[must_use]
    pub fn new(token: Option<String>) -> Self {
        let token = token.map(|t| t.trim().to_string()).filter(|t| !t.is_empty());
        Self { token, cancel: CancellationToken::new() }
    }
}

impl TokenProvider for StaticToken {
    fn read_token(&self) -> Option<String> {
        self.token.clone()
    }

    fn bearer(&self) -> Result<String, AccessError> {
        self.token.clone().ok_or(AccessError::MissingToken)
    }

    fn admin_bearer(&self) -> Result<String, AccessError> {
        self.bearer()
    }

    fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

/// Run a remote write unless `cancel` fires first.
///
/// # Errors
///
/// Returns [`StoreError::Cancelled`] if the token is (or becomes) cancelled,
/// otherwise whatever `fut` returns.
pub async fn cancellable<T, E, F>(cancel: &CancellationToken, fut: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: From<StoreError>,
{
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(StoreError::Cancelled.into()),
        result = fut => result,
    }
}

// =============================================================================
// AUTH ERROR
// =============================================================================

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum AuthError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Throttled(#[from] ThrottleError),
    #[error("invalid username or password ({remaining} attempts left)")]
    InvalidCredentials { remaining: usize },
    #[error(transparent)]
    Access(#[from] AccessError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    SessionStore(#[from] SessionStoreError),
}

impl ErrorCode for AuthError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(e) => e.error_code(),
            Self::Throttled(e) => e.error_code(),
            Self::InvalidCredentials { .. } => "E_AUTH_INVALID_CREDENTIALS",
            Self::Access(e) => e.error_code(),
            Self::Config(e) => e.error_code(),
            Self::Store(e) => e.error_code(),
            Self::SessionStore(e) => e.error_code(),
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::Throttled(e) => e.retryable(),
            Self::Config(e) => e.retryable(),
            Self::Store(e) => e.retryable(),
            _ => false,
        }
    }

    fn severity(&self) -> Severity {
        match self {
            Self::Validation(e) => e.severity(),
            Self::Throttled(e) => e.severity(),
            Self::InvalidCredentials { .. } => Severity::Warning,
            Self::Access(e) => e.severity(),
            Self::Config(e) => e.severity(),
            Self::Store(e) => e.severity(),
            Self::SessionStore(e) => e.severity(),
        }
    }
}

// =============================================================================
// SESSION
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub username: String,
    #[serde(with = "time::serde::rfc3339")]
    pub login_time: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_activity: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    LoggedOut,
    LoggedIn(Identity),
    Expired,
}

#[derive(Debug, Clone, Copy)]
struct SessionPolicy {
    idle_timeout: Duration,
    min_password_len: usize,
    allow_bootstrap: bool,
}

struct SessionInner {
    state: SessionState,
    token: Option<String>,
    current_chat: Option<u64>,
    cancel: CancellationToken,
}

#[derive(Clone)]
pub struct Session {
    inner: Arc<Mutex<SessionInner>>,
    remote: Arc<dyn RemoteStore>,
    config: Arc<ConfigStore>,
    store: Arc<dyn SessionStore>,
    throttle: LoginThrottle,
    policy: SessionPolicy,
}

impl Session {
    #[must_use]
    pub fn new(
        settings: &BoardSettings,
        remote: Arc<dyn RemoteStore>,
        config: Arc<ConfigStore>,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        let token = settings.token.clone().map(|t| t.trim().to_string()).filter(|t| !t.is_empty());
        Self {
            inner: Arc::new(Mutex::new(SessionInner {
                state: SessionState::LoggedOut,
                token,
                current_chat: None,
                cancel: CancellationToken::new(),
            })),
            remote,
            config,
            store,
            throttle: LoginThrottle::new(settings.max_login_attempts, settings.login_window),
            policy: SessionPolicy {
                idle_timeout: settings.session_timeout,
                min_password_len: settings.min_password_len,
                allow_bootstrap: settings.allow_bootstrap,
            },
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.lock().state.clone()
    }

    #[must_use]
    pub fn identity(&self) -> Option<Identity> {
        match &self.lock().state {
            SessionState::LoggedIn(identity) => Some(identity.clone()),
            _ => None,
        }
    }

    /// Verify admin credentials and open a session.
    ///
    /// On an uninitialized store the first login creates the admin account,
    /// but only if bootstrap is allowed, a token is present, and no other
    /// configuration issue exists.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Validation`] before any remote call for malformed
    /// input, [`AuthError::Throttled`] after too many failures, and
    /// [`AuthError::InvalidCredentials`] on a mismatch.
    pub async fn login(&self, username: &str, password: &str) -> Result<Identity, AuthError> {
        let username = validate::username(username)?;
        validate::password(password, self.policy.min_password_len)?;
        self.throttle.check(&username)?;

        let token = self.read_token();
        match self.config.load(token.as_deref()).await {
            Ok(config) => {
                if !config.verify(&username, password) {
                    self.throttle.record_failure(&username);
                    let remaining = self.throttle.remaining(&username);
                    warn!(username = %username, remaining, "login rejected");
                    return Err(AuthError::InvalidCredentials { remaining });
                }
            }
            Err(ConfigError::Uninitialized) => self.bootstrap(token.as_deref(), &username, password).await?,
            Err(e) => return Err(e.into()),
        }

        self.throttle.clear(&username);
        let now = OffsetDateTime::now_utc();
        let identity = Identity { username, login_time: now, last_activity: now };
        self.lock().state = SessionState::LoggedIn(identity.clone());
        self.persist_identity(&identity);
        info!(username = %identity.username, "admin logged in");
        Ok(identity)
    }

    async fn bootstrap(&self, token: Option<&str>, username: &str, password: &str) -> Result<(), AuthError> {
        if !self.policy.allow_bootstrap {
            return Err(ConfigError::Uninitialized.into());
        }
        let token = token.ok_or(AccessError::MissingToken)?;
        let existing = self.config.find_existing(Some(token)).await?;
        if let Some(&issue) = existing.first() {
            return Err(ConfigError::AlreadyInitialized(issue).into());
        }
        warn!(username, "configuration missing; first login becomes the admin account");
        let cancel = self.cancellation();
        cancellable(&cancel, self.config.initialize(token, username, password)).await?;
        Ok(())
    }

    #[must_use]
    pub fn check_auth(&self) -> AuthStatus {
        self.check_auth_at(OffsetDateTime::now_utc())
    }

    /// Check idle expiry as of `now`, refreshing activity when still valid.
    #[must_use]
    pub fn check_auth_at(&self, now: OffsetDateTime) -> AuthStatus {
        let (status, refreshed) = {
            let mut inner = self.lock();
            let idle_timeout = self.policy.idle_timeout;
            let outcome = match &mut inner.state {
                SessionState::LoggedOut => (AuthStatus::Unauthorized, None),
                SessionState::Expired => (AuthStatus::Expired, None),
                SessionState::LoggedIn(identity) => {
                    let idle = now - identity.last_activity;
                    if idle.is_positive() && idle.unsigned_abs() > idle_timeout {
                        info!(username = %identity.username, "session expired after inactivity");
                        (AuthStatus::Expired, None)
                    } else {
                        identity.last_activity = now;
                        (AuthStatus::Authorized, Some(identity.clone()))
                    }
                }
            };
            if outcome.0 == AuthStatus::Expired {
                inner.state = SessionState::Expired;
            }
            outcome
        };
        match (&status, refreshed) {
            (AuthStatus::Authorized, Some(identity)) => self.persist_identity(&identity),
            (AuthStatus::Expired, _) => self.forget(KEY_IDENTITY),
            _ => {}
        }
        status
    }

    /// Record user activity. No-op unless logged in.
    pub fn touch(&self) {
        self.touch_at(OffsetDateTime::now_utc());
    }

    pub fn touch_at(&self, now: OffsetDateTime) {
        let refreshed = {
            let mut inner = self.lock();
            match &mut inner.state {
                SessionState::LoggedIn(identity) => {
                    identity.last_activity = now;
                    Some(identity.clone())
                }
                _ => None,
            }
        };
        if let Some(identity) = refreshed {
            self.persist_identity(&identity);
        }
    }

    /// Cancel pending writes, clear identity, token and selection, and wipe
    /// the session store.
    ///
    /// # Errors
    ///
    /// Returns a [`SessionStoreError`] if the store cannot be cleared. The
    /// in-memory session is logged out regardless.
    pub fn logout(&self, reason: &str) -> Result<(), SessionStoreError> {
        let previous = {
            let mut inner = self.lock();
            inner.cancel.cancel();
            inner.cancel = CancellationToken::new();
            inner.token = None;
            inner.current_chat = None;
            std::mem::replace(&mut inner.state, SessionState::LoggedOut)
        };
        if let SessionState::LoggedIn(identity) = previous {
            info!(username = %identity.username, reason, "logged out");
        } else {
            info!(reason, "session cleared");
        }
        self.store.clear()
    }

    /// Validate `token` against GitHub and keep it for this session.
    /// Returns the login it belongs to.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::MissingToken`] for blank input, or the store
    /// error from the validation call.
    pub async fn set_token(&self, token: &str) -> Result<String, AuthError> {
        let token = require_token(token).map_err(|_| AccessError::MissingToken)?;
        let login = self.remote.whoami(token).await?;
        self.lock().token = Some(token.to_string());
        put_typed(self.store.as_ref(), KEY_TOKEN, &token)?;
        info!(login = %login, "token accepted");
        Ok(login)
    }

    /// Use `token` for this process only, without validating or persisting it.
    pub fn adopt_token(&self, token: &str) {
        let token = token.trim();
        if !token.is_empty() {
            self.lock().token = Some(token.to_string());
        }
    }

    /// Rebuild the session from the session store. The stored identity
    /// expires with the idle ceiling.
    ///
    /// # Errors
    ///
    /// Returns a [`SessionStoreError`] if the store cannot be read.
    pub fn restore(&self) -> Result<AuthStatus, SessionStoreError> {
        let store = self.store.as_ref();
        let token: Option<String> = get_typed(store, KEY_TOKEN, None)?;
        let identity: Option<Identity> = get_typed(store, KEY_IDENTITY, Some(self.policy.idle_timeout))?;
        let current_chat: Option<u64> = get_typed(store, KEY_CURRENT_CHAT, None)?;
        {
            let mut inner = self.lock();
            if token.is_some() {
                inner.token = token;
            }
            inner.current_chat = current_chat;
            inner.state = identity.map_or(SessionState::LoggedOut, SessionState::LoggedIn);
        }
        Ok(self.check_auth())
    }

    /// Remember the chat the user is viewing.
    ///
    /// # Errors
    ///
    /// Returns a [`SessionStoreError`] if the selection cannot be persisted.
    pub fn select_chat(&self, chat_id: u64) -> Result<(), SessionStoreError> {
        self.lock().current_chat = Some(chat_id);
        put_typed(self.store.as_ref(), KEY_CURRENT_CHAT, &chat_id)
    }

    #[must_use]
    pub fn current_chat(&self) -> Option<u64> {
        self.lock().current_chat
    }

    fn persist_identity(&self, identity: &Identity) {
        if let Err(e) = put_typed(self.store.as_ref(), KEY_IDENTITY, identity) {
            warn!(error = %e, "failed to persist session identity");
        }
    }

    fn forget(&self, key: &str) {
        if let Err(e) = self.store.remove(key) {
            warn!(key, error = %e, "failed to remove session entry");
        }
    }
}

impl TokenProvider for Session {
    fn read_token(&self) -> Option<String> {
        self.lock().token.clone()
    }

    fn bearer(&self) -> Result<String, AccessError> {
        self.read_token().ok_or(AccessError::MissingToken)
    }

    fn admin_bearer(&self) -> Result<String, AccessError> {
        match self.check_auth() {
            AuthStatus::Authorized => self.bearer(),
            AuthStatus::Expired => Err(AccessError::Expired),
            AuthStatus::Unauthorized => Err(AccessError::Unauthorized),
        }
    }

    fn cancellation(&self) -> CancellationToken {
        self.lock().cancel.clone()
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
