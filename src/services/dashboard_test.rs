use tokio::sync::mpsc;
use tokio::time::timeout;

use super::*;
use crate::services::poller::TickOutcome;
use crate::github::StoreError;
use crate::github::memory::{MemoryStore, StoreOp};
use crate::services::config::ConfigStore;
use crate::services::session::StaticToken;

const TOKEN: &str = "ghp_test";
const WAIT: Duration = Duration::from_secs(2);

struct Fixture {
    remote: Arc<MemoryStore>,
    registry: Arc<ChatRegistry>,
    channel: Arc<MessageChannel>,
    dashboard: Arc<Dashboard>,
}

async fn fixture() -> Fixture {
    let remote = Arc::new(MemoryStore::new());
    let config = Arc::new(ConfigStore::new(remote.clone(), 1));
    config.initialize(TOKEN, "admin", "secret1").await.unwrap();
    let tokens = Arc::new(StaticToken::new(Some(TOKEN.into())));
    let registry = Arc::new(ChatRegistry::new(config, remote.clone(), tokens.clone(), false));
    let channel = Arc::new(MessageChannel::new(remote.clone(), tokens, 1_000));
    let dashboard = Arc::new(Dashboard::new(registry.clone(), channel.clone()));
    Fixture { remote, registry, channel, dashboard }
}

#[tokio::test]
async fn summaries_count_messages_and_truncate_preview() {
    let f = fixture().await;
    let busy = f.registry.create("busy", "abc").await.unwrap();
    let quiet = f.registry.create("quiet", "xyz").await.unwrap();
    f.channel.send(busy.id, "first").await.unwrap();
    f.channel.send(busy.id, &"x".repeat(60)).await.unwrap();

    let summaries = f.dashboard.summaries().await.unwrap();
    assert_eq!(summaries.len(), 2);

    assert_eq!(summaries[0].record, busy);
    assert_eq!(summaries[0].message_count, 2);
    let preview = summaries[0].last_message.as_ref().unwrap();
    assert_eq!(preview.body, format!("{}...", "x".repeat(50)));
    assert_eq!(preview.author, "board-admin");

    assert_eq!(summaries[1].record, quiet);
    assert_eq!(summaries[1].message_count, 0);
    assert_eq!(summaries[1].last_message, None);
}

#[tokio::test]
async fn failing_chat_degrades_to_zero_messages() {
    let f = fixture().await;
    let chat = f.registry.create("busy", "abc").await.unwrap();
    f.channel.send(chat.id, "hello").await.unwrap();
    f.remote.fail_next(StoreOp::ListComments, StoreError::Network("reset".into()));

    let summaries = f.dashboard.summaries().await.unwrap();
    assert_eq!(summaries[0].message_count, 0);
    assert!(f.dashboard.summaries().await.unwrap()[0].last_message.is_some());
}

#[tokio::test]
async fn stats_cover_keys_active_chats_and_messages() {
    let f = fixture().await;
    let one = f.registry.create("one", "k-one").await.unwrap();
    let two = f.registry.create("two", "k-two").await.unwrap();
    let gone = f.registry.create("gone", "k-gone").await.unwrap();
    f.channel.send(one.id, "a").await.unwrap();
    f.channel.send(two.id, "b").await.unwrap();
    f.channel.send(gone.id, "c").await.unwrap();
    f.registry.soft_delete(gone.id).await.unwrap();

    let stats = f.dashboard.stats().await.unwrap();
    assert_eq!(stats, BoardStats { total_keys: 3, active_chats: 2, total_messages: 2 });
}

#[tokio::test]
async fn stats_read_the_configuration_once() {
    let f = fixture().await;
    f.registry.create("one", "k-one").await.unwrap();
    let reads = f.remote.calls(StoreOp::ReadResource);

    f.dashboard.stats().await.unwrap();
    assert_eq!(f.remote.calls(StoreOp::ReadResource), reads + 1);
}

#[tokio::test]
async fn new_message_in_existing_chat_is_redelivered() {
    let f = fixture().await;
    let chat = f.registry.create("one", "abc").await.unwrap();

    let poller = Poller::new(f.dashboard.clone());
    let (tx, mut rx) = mpsc::unbounded_channel();
    poller.start((), Duration::from_secs(3_600), move |event| {
        let _ = tx.send(event);
    });
    timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    timeout(WAIT, async {
        while poller.status(()).is_some_and(|s| s.in_flight) {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
    assert_eq!(poller.force_sync(()).await, Some(TickOutcome::Unchanged));

    f.channel.send(chat.id, "hello").await.unwrap();
    assert!(matches!(poller.force_sync(()).await, Some(TickOutcome::Delivered { total: 1, .. })));
    match timeout(WAIT, rx.recv()).await.unwrap().unwrap() {
        PollEvent::Update { all, .. } => {
            assert_eq!(all[0].message_count, 1);
            assert_eq!(all[0].last_message.as_ref().unwrap().body, "hello");
        }
        PollEvent::Failed(e) => panic!("unexpected failure: {e}"),
    }
}

#[tokio::test]
async fn dashboard_is_pollable() {
    let f = fixture().await;
    f.registry.create("one", "abc").await.unwrap();

    let poller = Poller::new(f.dashboard.clone());
    let (tx, mut rx) = mpsc::unbounded_channel();
    poller.start((), Duration::from_secs(3_600), move |event| {
        let _ = tx.send(event);
    });

    match timeout(WAIT, rx.recv()).await.unwrap().unwrap() {
        PollEvent::Update { all, fresh } => {
            assert_eq!(all.len(), 1);
            assert_eq!(fresh.len(), 1);
        }
        PollEvent::Failed(e) => panic!("unexpected failure: {e}"),
    }
}

#[tokio::test]
async fn watch_chats_starts_one_poller_per_active_chat() {
    let f = fixture().await;
    let one = f.registry.create("one", "abc").await.unwrap();
    let two = f.registry.create("two", "xyz").await.unwrap();
    let gone = f.registry.create("gone", "old").await.unwrap();
    f.registry.soft_delete(gone.id).await.unwrap();

    let poller = Poller::new(f.channel.clone());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let started = f
        .dashboard
        .watch_chats(&poller, Duration::from_secs(3_600), move |chat_id, _event| {
            let _ = tx.send(chat_id);
        })
        .await
        .unwrap();
    assert_eq!(started, 2);

    let mut seen = vec![
        timeout(WAIT, rx.recv()).await.unwrap().unwrap(),
        timeout(WAIT, rx.recv()).await.unwrap().unwrap(),
    ];
    seen.sort_unstable();
    assert_eq!(seen, vec![one.id, two.id]);
}
