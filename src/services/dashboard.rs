//! Dashboard — per-chat summaries and board totals for the admin view.
//!
//! DESIGN
//! ======
//! Summaries are built from the registry's active chats plus one comment
//! listing per chat, fetched one after another. A chat whose listing fails
//! is reported with zero messages instead of failing the whole view.
//!
//! The dashboard is a [`PollSource`] over `()`: the poller redelivers the
//! summary list when the set of active chats changes or any chat gains a
//! message (each summary's revision is its message count). [`Dashboard::watch_chats`]
//! starts one message poller per active chat for views that need every new
//! message.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use time::OffsetDateTime;
use tracing::warn;

use super::ChatError;
use super::channel::MessageChannel;
use super::config::ChatRecord;
use super::poller::{PollEvent, PollItem, PollSource, Poller};
use super::registry::ChatRegistry;
use crate::github::Message;
use crate::validate::truncate_text;

pub const PREVIEW_CHARS: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessagePreview {
    pub author: String,
    pub body: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl MessagePreview {
    fn of(message: &Message) -> Self {
        Self {
            author: message.author.clone(),
            body: truncate_text(&message.body, PREVIEW_CHARS),
            created_at: message.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatSummary {
    pub record: ChatRecord,
    pub message_count: usize,
    pub last_message: Option<MessagePreview>,
}

impl PollItem for ChatSummary {
    fn observed_at(&self) -> Option<OffsetDateTime> {
        Some(self.last_message.as_ref().map_or(self.record.created_at, |m| m.created_at))
    }

    fn revision(&self) -> u64 {
        u64::try_from(self.message_count).unwrap_or(u64::MAX)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BoardStats {
    /// Every registered chat, deleted ones included.
    pub total_keys: usize,
    pub active_chats: usize,
    /// Messages across active chats.
    pub total_messages: usize,
}

pub struct Dashboard {
    registry: Arc<ChatRegistry>,
    channel: Arc<MessageChannel>,
}

impl Dashboard {
    #[must_use]
    pub fn new(registry: Arc<ChatRegistry>, channel: Arc<MessageChannel>) -> Self {
        Self { registry, channel }
    }

    /// One summary per active chat, in registry order.
    ///
    /// # Errors
    ///
    /// Returns the registry error if the chat list cannot be loaded.
    pub async fn summaries(&self) -> Result<Vec<ChatSummary>, ChatError> {
        let chats = self.registry.list().await?;
        Ok(self.summarize_all(chats).await)
    }

    async fn summarize_all(&self, chats: Vec<ChatRecord>) -> Vec<ChatSummary> {
        let mut summaries = Vec::with_capacity(chats.len());
        for record in chats {
            summaries.push(self.summarize(record).await);
        }
        summaries
    }

    async fn summarize(&self, record: ChatRecord) -> ChatSummary {
        match self.channel.fetch(record.id).await {
            Ok(messages) => ChatSummary {
                message_count: messages.len(),
                last_message: messages.last().map(MessagePreview::of),
                record,
            },
            Err(e) => {
                warn!(chat_id = record.id, error = %e, "chat summary unavailable");
                ChatSummary { record, message_count: 0, last_message: None }
            }
        }
    }

    /// Totals from one configuration snapshot.
    ///
    /// # Errors
    ///
    /// Returns the registry error if the chat list cannot be loaded.
    pub async fn stats(&self) -> Result<BoardStats, ChatError> {
        let all = self.registry.list_all().await?;
        let total_keys = all.len();
        let active: Vec<ChatRecord> = all.into_iter().filter(|c| c.active).collect();
        let active_chats = active.len();
        let total_messages = self.summarize_all(active).await.iter().map(|s| s.message_count).sum();
        Ok(BoardStats { total_keys, active_chats, total_messages })
    }

    /// Start a message poller for every active chat. `callback` receives the
    /// chat id with each event. Returns the number of pollers started.
    ///
    /// # Errors
    ///
    /// Returns the registry error if the chat list cannot be loaded.
    pub async fn watch_chats<F>(
        &self,
        poller: &Poller<MessageChannel>,
        interval: Duration,
        callback: F,
    ) -> Result<usize, ChatError>
    where
        F: Fn(u64, PollEvent<Message>) + Send + Sync + 'static,
    {
        let chats = self.registry.list().await?;
        let callback = Arc::new(callback);
        for chat in &chats {
            let id = chat.id;
            let callback = callback.clone();
            poller.start(id, interval, move |event| (*callback)(id, event));
        }
        Ok(chats.len())
    }
}

#[async_trait::async_trait]
impl PollSource for Dashboard {
    type Target = ();
    type Item = ChatSummary;
    type Error = ChatError;

    async fn fetch(&self, _view: ()) -> Result<Vec<ChatSummary>, ChatError> {
        self.summaries().await
    }
}

#[cfg(test)]
#[path = "dashboard_test.rs"]
mod tests;
