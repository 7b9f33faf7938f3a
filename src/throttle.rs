//! Login throttling.
//!
//! DESIGN
//! ======
//! Sliding window of failed attempts per username, backed by
//! `HashMap<String, VecDeque<Instant>>`. Once `max_attempts` failures sit
//! inside the window, further logins for that name are refused until the
//! oldest failure ages out. A successful login clears the name.
//!
//! TRADE-OFFS
//! ==========
//! State is process-local. The CLI starts fresh on every invocation, so the
//! limiter only bites inside one long-lived process. Good enough for a gate
//! whose credentials are already only obfuscated.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::error::{ErrorCode, Severity};

// =============================================================================
// ERROR TYPE
// =============================================================================

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ThrottleError {
    #[error("too many failed logins ({attempts}); try again in {retry_after_secs}s")]
    Locked { attempts: usize, retry_after_secs: u64 },
}

impl ErrorCode for ThrottleError {
    fn error_code(&self) -> &'static str {
        "E_LOGIN_THROTTLED"
    }

    fn retryable(&self) -> bool {
        true
    }

    fn severity(&self) -> Severity {
        Severity::Warning
    }
}

// =============================================================================
// LIMITER
// =============================================================================

#[derive(Clone)]
pub struct LoginThrottle {
    inner: Arc<Mutex<HashMap<String, VecDeque<Instant>>>>,
    max_attempts: usize,
    window: Duration,
}

impl LoginThrottle {
    #[must_use]
    pub fn new(max_attempts: usize, window: Duration) -> Self {
        Self { inner: Arc::new(Mutex::new(HashMap::new())), max_attempts: max_attempts.max(1), window }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, VecDeque<Instant>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Refuse if `username` has used up its failures for the window.
    ///
    /// # Errors
    ///
    /// Returns [`ThrottleError::Locked`] with the time until the oldest
    /// failure leaves the window.
    pub fn check(&self, username: &str) -> Result<(), ThrottleError> {
        self.check_at(username, Instant::now())
    }

    pub(crate) fn check_at(&self, username: &str, now: Instant) -> Result<(), ThrottleError> {
        let mut inner = self.lock();
        let Some(failures) = inner.get_mut(&key(username)) else {
            return Ok(());
        };
        prune_window(failures, now, self.window);
        if failures.len() < self.max_attempts {
            return Ok(());
        }
        let oldest = failures.front().copied().unwrap_or(now);
        let retry_after = self.window.saturating_sub(now.saturating_duration_since(oldest));
        Err(ThrottleError::Locked { attempts: failures.len(), retry_after_secs: retry_after.as_secs().max(1) })
    }

    pub fn record_failure(&self, username: &str) {
        self.record_failure_at(username, Instant::now());
    }

    pub(crate) fn record_failure_at(&self, username: &str, now: Instant) {
        let mut inner = self.lock();
        let failures = inner.entry(key(username)).or_default();
        prune_window(failures, now, self.window);
        failures.push_back(now);
    }

    pub fn clear(&self, username: &str) {
        self.lock().remove(&key(username));
    }

    /// Failures still allowed before the name is locked.
    #[must_use]
    pub fn remaining(&self, username: &str) -> usize {
        self.remaining_at(username, Instant::now())
    }

    pub(crate) fn remaining_at(&self, username: &str, now: Instant) -> usize {
        let mut inner = self.lock();
        let used = inner.get_mut(&key(username)).map_or(0, |failures| {
            prune_window(failures, now, self.window);
            failures.len()
        });
        self.max_attempts.saturating_sub(used)
    }
}

fn key(username: &str) -> String {
    username.trim().to_lowercase()
}

fn prune_window(deque: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(&front) = deque.front() {
        if now.saturating_duration_since(front) >= window {
            deque.pop_front();
        } else {
            break;
        }
    }
}

#[cfg(test)]
#[path = "throttle_test.rs"]
mod tests;
