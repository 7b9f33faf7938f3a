//! In-process [`RemoteStore`] for tests and dry runs.
//!
//! DESIGN
//! ======
//! Issues live in a `BTreeMap` keyed by number and numbers are assigned
//! sequentially from 1, like a fresh repository. Comment timestamps come
//! from a fake clock that advances one second per write so ordering is
//! deterministic.
//!
//! Test hooks: per-operation call counters, queued failures, reversed
//! comment listing, and a read gate that parks `list_comments` calls until
//! permits are added.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use time::OffsetDateTime;
use time::macros::datetime;
use tokio::sync::Semaphore;

use super::{Message, NewResource, RemoteStore, Resource, StoreError, require_token};

const DEFAULT_LOGIN: &str = "board-admin";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    ReadResource,
    ListResources,
    ListComments,
    CreateResource,
    AppendComment,
    PatchBody,
    Whoami,
}

struct StoredResource {
    resource: Resource,
    comments: Vec<Message>,
}

struct Inner {
    resources: BTreeMap<u64, StoredResource>,
    next_number: u64,
    /// token -> login. Empty means any non-empty token is accepted.
    users: HashMap<String, String>,
    clock: OffsetDateTime,
    calls: HashMap<StoreOp, usize>,
    failures: HashMap<StoreOp, VecDeque<StoreError>>,
    reversed_listing: bool,
}

impl Inner {
    /// Count the call, then surface a queued failure if one is pending.
    fn record(&mut self, op: StoreOp) -> Result<(), StoreError> {
        *self.calls.entry(op).or_default() += 1;
        match self.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn authorize(&self, token: &str) -> Result<String, StoreError> {
        let token = require_token(token)?;
        if self.users.is_empty() {
            return Ok(DEFAULT_LOGIN.to_string());
        }
        self.users
            .get(token)
            .cloned()
            .ok_or_else(|| StoreError::Unauthorized("status 401: Bad credentials".into()))
    }

    fn tick(&mut self) -> OffsetDateTime {
        self.clock += time::Duration::seconds(1);
        self.clock
    }

    fn stored(&mut self, id: u64) -> Result<&mut StoredResource, StoreError> {
        self.resources
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("issue #{id}")))
    }
}

pub struct MemoryStore {
    inner: Mutex<Inner>,
    read_gate: Mutex<Option<Arc<Semaphore>>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                resources: BTreeMap::new(),
                next_number: 1,
                users: HashMap::new(),
                clock: datetime!(2024-01-01 00:00:00 UTC),
                calls: HashMap::new(),
                failures: HashMap::new(),
                reversed_listing: false,
            }),
            read_gate: Mutex::new(None),
        }
    }

    /// Accept `token` as belonging to `login`. Once any user is registered,
    /// unknown tokens are rejected.
    #[must_use]
    pub fn with_user(self, token: &str, login: &str) -> Self {
        self.lock().users.insert(token.to_string(), login.to_string());
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seed a resource directly, bypassing counters. Returns its number.
    pub fn insert_resource(&self, title: &str, body: &str, labels: &[&str]) -> u64 {
        let mut inner = self.lock();
        let number = inner.next_number;
        inner.next_number += 1;
        let resource = Resource {
            number,
            title: title.to_string(),
            body: body.to_string(),
            labels: labels.iter().map(|l| (*l).to_string()).collect(),
        };
        inner.resources.insert(number, StoredResource { resource, comments: Vec::new() });
        number
    }

    /// Seed a comment with an explicit timestamp, bypassing counters.
    pub fn seed_comment(&self, id: u64, author: &str, body: &str, created_at: OffsetDateTime) {
        let mut inner = self.lock();
        if let Ok(stored) = inner.stored(id) {
            stored.comments.push(Message { author: author.to_string(), body: body.to_string(), created_at });
        }
    }

    #[must_use]
    pub fn resource(&self, id: u64) -> Option<Resource> {
        self.lock().resources.get(&id).map(|s| s.resource.clone())
    }

    #[must_use]
    pub fn resource_count(&self) -> usize {
        self.lock().resources.len()
    }

    #[must_use]
    pub fn calls(&self, op: StoreOp) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Make the next call of `op` fail with `err`. Failures queue up.
    pub fn fail_next(&self, op: StoreOp, err: StoreError) {
        self.lock().failures.entry(op).or_default().push_back(err);
    }

    /// List comments newest first instead of in insertion order.
    pub fn set_reversed_listing(&self, reversed: bool) {
        self.lock().reversed_listing = reversed;
    }

    /// Park every subsequent `list_comments` call until the returned semaphore
    /// receives a permit. Calls are counted before they park.
    pub fn gate_comment_reads(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.read_gate.lock().unwrap_or_else(PoisonError::into_inner) = Some(gate.clone());
        gate
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl RemoteStore for MemoryStore {
    async fn read_resource(&self, _token: Option<&str>, id: u64) -> Result<Resource, StoreError> {
        let mut inner = self.lock();
        inner.record(StoreOp::ReadResource)?;
        inner.stored(id).map(|s| s.resource.clone())
    }

    async fn list_resources(&self, _token: Option<&str>, label: &str) -> Result<Vec<Resource>, StoreError> {
        let mut inner = self.lock();
        inner.record(StoreOp::ListResources)?;
        Ok(inner
            .resources
            .values()
            .filter(|s| s.resource.labels.iter().any(|l| l == label))
            .map(|s| s.resource.clone())
            .collect())
    }

    async fn list_comments(&self, _token: Option<&str>, id: u64) -> Result<Vec<Message>, StoreError> {
        self.lock().record(StoreOp::ListComments)?;

        let gate = self.read_gate.lock().unwrap_or_else(PoisonError::into_inner).clone();
        if let Some(gate) = gate {
            let _permit = gate
                .acquire()
                .await
                .map_err(|_| StoreError::Network("read gate closed".into()))?;
        }

        let mut inner = self.lock();
        let reversed = inner.reversed_listing;
        let mut comments = inner.stored(id)?.comments.clone();
        if reversed {
            comments.reverse();
        }
        Ok(comments)
    }

    async fn create_resource(&self, token: &str, fields: &NewResource) -> Result<Resource, StoreError> {
        let mut inner = self.lock();
        inner.record(StoreOp::CreateResource)?;
        inner.authorize(token)?;
        let number = inner.next_number;
        inner.next_number += 1;
        let resource = Resource {
            number,
            title: fields.title.clone(),
            body: fields.body.clone(),
            labels: fields.labels.clone(),
        };
        inner
            .resources
            .insert(number, StoredResource { resource: resource.clone(), comments: Vec::new() });
        Ok(resource)
    }

    async fn append_comment(&self, token: &str, id: u64, body: &str) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.record(StoreOp::AppendComment)?;
        let author = inner.authorize(token)?;
        inner.stored(id)?;
        let created_at = inner.tick();
        inner
            .stored(id)?
            .comments
            .push(Message { author, body: body.to_string(), created_at });
        Ok(())
    }

    async fn patch_resource_body(&self, token: &str, id: u64, body: &str) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.record(StoreOp::PatchBody)?;
        inner.authorize(token)?;
        inner.stored(id)?.resource.body = body.to_string();
        Ok(())
    }

    async fn whoami(&self, token: &str) -> Result<String, StoreError> {
        let mut inner = self.lock();
        inner.record(StoreOp::Whoami)?;
        inner.authorize(token)
    }
}

#[cfg(test)]
#[path = "memory_test.rs"]
mod tests;
