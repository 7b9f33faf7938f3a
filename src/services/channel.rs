//! Message channel — chat messages as comments on the chat's issue.
//!
//! Reads return every comment sorted by creation time, whatever order the
//! remote returns them in. Writes append one comment. There is no delivery
//! acknowledgement beyond the write succeeding and no de-duplication.

use std::sync::Arc;

use tracing::{debug, info};

use super::ChatError;
use super::poller::PollSource;
use super::session::{TokenProvider, cancellable};
use crate::github::{Message, RemoteStore, StoreError};
use crate::validate;

pub struct MessageChannel {
    remote: Arc<dyn RemoteStore>,
    tokens: Arc<dyn TokenProvider>,
    max_message_len: usize,
}

impl MessageChannel {
    #[must_use]
    pub fn new(remote: Arc<dyn RemoteStore>, tokens: Arc<dyn TokenProvider>, max_message_len: usize) -> Self {
        Self { remote, tokens, max_message_len }
    }

    /// All messages of a chat, oldest first. Ties keep remote order.
    ///
    /// # Errors
    ///
    /// Returns the remote store error, e.g. [`StoreError::NotFound`] for an
    /// unknown chat id.
    pub async fn fetch(&self, chat_id: u64) -> Result<Vec<Message>, StoreError> {
        let token = self.tokens.read_token();
        let mut messages = self.remote.list_comments(token.as_deref(), chat_id).await?;
        messages.sort_by_key(|m| m.created_at);
        debug!(chat_id, count = messages.len(), "messages fetched");
        Ok(messages)
    }

    /// Post one message. The body is trimmed and checked against the
    /// configured ceiling before any remote call.
    ///
    /// # Errors
    ///
    /// Returns a validation error for empty or oversized input,
    /// [`ChatError::Access`] without a token, or the remote store error.
    pub async fn send(&self, chat_id: u64, body: &str) -> Result<(), ChatError> {
        let body = validate::message(body, self.max_message_len)?;
        let token = self.tokens.bearer()?;
        let cancel = self.tokens.cancellation();
        cancellable(&cancel, self.remote.append_comment(&token, chat_id, &body)).await?;
        info!(chat_id, chars = body.chars().count(), "message sent");
        Ok(())
    }
}

#[async_trait::async_trait]
impl PollSource for MessageChannel {
    type Target = u64;
    type Item = Message;
    type Error = StoreError;

    async fn fetch(&self, chat_id: u64) -> Result<Vec<Message>, StoreError> {
        MessageChannel::fetch(self, chat_id).await
    }
}

#[cfg(test)]
#[path = "channel_test.rs"]
mod tests;
