//! Session persistence — small key/value store scoped to one session.
//!
//! DESIGN
//! ======
//! Three keys are used: identity, bearer token, and current chat selection.
//! Every entry is stamped with its save time so readers can apply a max age;
//! a stale entry is removed on read. Logout clears the whole store.
//!
//! [`MemorySessionStore`] lives as long as the process. [`FileSessionStore`]
//! keeps a JSON file so consecutive CLI invocations share one session.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use tracing::debug;

use crate::error::ErrorCode;

pub const KEY_IDENTITY: &str = "identity";
pub const KEY_TOKEN: &str = "token";
pub const KEY_CURRENT_CHAT: &str = "current_chat";

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum SessionStoreError {
    #[error("session file I/O failed: {0}")]
    Io(String),
    #[error("session data invalid: {0}")]
    Json(String),
}

impl ErrorCode for SessionStoreError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Io(_) => "E_SESSION_IO",
            Self::Json(_) => "E_SESSION_JSON",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Entry {
    data: Value,
    #[serde(with = "time::serde::rfc3339")]
    saved_at: OffsetDateTime,
}

impl Entry {
    fn is_stale(&self, max_age: Option<Duration>, now: OffsetDateTime) -> bool {
        let Some(max_age) = max_age else {
            return false;
        };
        let age = now - self.saved_at;
        age.is_positive() && age.unsigned_abs() > max_age
    }
}

// =============================================================================
// TRAIT
// =============================================================================

pub trait SessionStore: Send + Sync {
    /// Store `value` under `key`, stamped with `saved_at`.
    ///
    /// # Errors
    ///
    /// Returns a [`SessionStoreError`] if the backing storage fails.
    fn put_at(&self, key: &str, value: Value, saved_at: OffsetDateTime) -> Result<(), SessionStoreError>;

    /// Read `key` as of `now`. Entries older than `max_age` are removed and
    /// read as absent.
    ///
    /// # Errors
    ///
    /// Returns a [`SessionStoreError`] if the backing storage fails.
    fn get_at(&self, key: &str, max_age: Option<Duration>, now: OffsetDateTime)
    -> Result<Option<Value>, SessionStoreError>;

    /// # Errors
    ///
    /// Returns a [`SessionStoreError`] if the backing storage fails.
    fn remove(&self, key: &str) -> Result<(), SessionStoreError>;

    /// # Errors
    ///
    /// Returns a [`SessionStoreError`] if the backing storage fails.
    fn clear(&self) -> Result<(), SessionStoreError>;

    /// # Errors
    ///
    /// Returns a [`SessionStoreError`] if the backing storage fails.
    fn put(&self, key: &str, value: Value) -> Result<(), SessionStoreError> {
        self.put_at(key, value, OffsetDateTime::now_utc())
    }

    /// # Errors
    ///
    /// Returns a [`SessionStoreError`] if the backing storage fails.
    fn get(&self, key: &str, max_age: Option<Duration>) -> Result<Option<Value>, SessionStoreError> {
        self.get_at(key, max_age, OffsetDateTime::now_utc())
    }
}

/// Serialize and store a typed value.
///
/// # Errors
///
/// Returns [`SessionStoreError::Json`] if `value` does not serialize.
pub fn put_typed<T: Serialize>(store: &dyn SessionStore, key: &str, value: &T) -> Result<(), SessionStoreError> {
    let value = serde_json::to_value(value).map_err(|e| SessionStoreError::Json(e.to_string()))?;
    store.put(key, value)
}

/// Read and deserialize a typed value. Entries that no longer match `T`
/// are dropped and read as absent.
///
/// # Errors
///
/// Returns a [`SessionStoreError`] if the backing storage fails.
pub fn get_typed<T: DeserializeOwned>(
    store: &dyn SessionStore,
    key: &str,
    max_age: Option<Duration>,
) -> Result<Option<T>, SessionStoreError> {
    let Some(value) = store.get(key, max_age)? else {
        return Ok(None);
    };
    match serde_json::from_value(value) {
        Ok(typed) => Ok(Some(typed)),
        Err(e) => {
            debug!(key, error = %e, "dropping unreadable session entry");
            store.remove(key)?;
            Ok(None)
        }
    }
}

// =============================================================================
// MEMORY
// =============================================================================

#[derive(Default)]
pub struct MemorySessionStore {
    entries: Mutex<BTreeMap<String, Entry>>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl SessionStore for MemorySessionStore {
    fn put_at(&self, key: &str, value: Value, saved_at: OffsetDateTime) -> Result<(), SessionStoreError> {
        self.lock().insert(key.to_string(), Entry { data: value, saved_at });
        Ok(())
    }

    fn get_at(
        &self,
        key: &str,
        max_age: Option<Duration>,
        now: OffsetDateTime,
    ) -> Result<Option<Value>, SessionStoreError> {
        let mut entries = self.lock();
        match entries.get(key) {
            Some(entry) if entry.is_stale(max_age, now) => {
                entries.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.data.clone())),
            None => Ok(None),
        }
    }

    fn remove(&self, key: &str) -> Result<(), SessionStoreError> {
        self.lock().remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<(), SessionStoreError> {
        self.lock().clear();
        Ok(())
    }
}

// =============================================================================
// FILE
// =============================================================================

/// JSON-file session store. Every operation reads and rewrites the whole
/// file; writes go through a temp file and a rename.
pub struct FileSessionStore {
    path: PathBuf,
    guard: Mutex<()>,
}

impl FileSessionStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), guard: Mutex::new(()) }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<String, Entry>, SessionStoreError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(SessionStoreError::Io(e.to_string())),
        };
        if raw.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&raw).map_err(|e| SessionStoreError::Json(e.to_string()))
    }

    fn write_all(&self, entries: &BTreeMap<String, Entry>) -> Result<(), SessionStoreError> {
        let json = serde_json::to_string_pretty(entries).map_err(|e| SessionStoreError::Json(e.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, json).map_err(|e| SessionStoreError::Io(e.to_string()))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| SessionStoreError::Io(e.to_string()))
    }

    fn with_entries<R>(
        &self,
        f: impl FnOnce(&mut BTreeMap<String, Entry>) -> (R, bool),
    ) -> Result<R, SessionStoreError> {
        let _guard = self.guard.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entries = self.read_all()?;
        let (result, dirty) = f(&mut entries);
        if dirty {
            self.write_all(&entries)?;
        }
        Ok(result)
    }
}

impl SessionStore for FileSessionStore {
    fn put_at(&self, key: &str, value: Value, saved_at: OffsetDateTime) -> Result<(), SessionStoreError> {
        self.with_entries(|entries| {
            entries.insert(key.to_string(), Entry { data: value, saved_at });
            ((), true)
        })
    }

    fn get_at(
        &self,
        key: &str,
        max_age: Option<Duration>,
        now: OffsetDateTime,
    ) -> Result<Option<Value>, SessionStoreError> {
        self.with_entries(|entries| match entries.get(key) {
            Some(entry) if entry.is_stale(max_age, now) => {
                entries.remove(key);
                (None, true)
            }
            Some(entry) => (Some(entry.data.clone()), false),
            None => (None, false),
        })
    }

    fn remove(&self, key: &str) -> Result<(), SessionStoreError> {
        self.with_entries(|entries| ((), entries.remove(key).is_some()))
    }

    fn clear(&self) -> Result<(), SessionStoreError> {
        let _guard = self.guard.lock().unwrap_or_else(PoisonError::into_inner);
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SessionStoreError::Io(e.to_string())),
        }
    }
}

#[cfg(test)]
#[path = "session_store_test.rs"]
mod tests;
