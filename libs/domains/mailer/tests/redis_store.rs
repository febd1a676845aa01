//! RedisStore integration tests against a real Redis container.
//!
//! These exercise the production store implementation end to end. They are
//! ignored by default because they need a Docker daemon; run them with
//! `cargo test -p domain_mailer -- --ignored`.

use async_trait::async_trait;
use domain_mailer::{
    EmailDraft, IdempotencyGuard, MailQueue, MailTransport, MailWorker, QueueConfig, QueueStore,
    QueuedEmail, RedisStore, SendError, SendReceipt, WorkerConfig,
};
use std::sync::Arc;
use test_utils::{TestDataBuilder, TestRedis};

struct AlwaysOk;

#[async_trait]
impl MailTransport for AlwaysOk {
    async fn send(&self, _email: &QueuedEmail) -> Result<SendReceipt, SendError> {
        Ok(SendReceipt::default())
    }

    fn name(&self) -> &'static str {
        "always-ok"
    }
}

fn config(test_name: &str) -> QueueConfig {
    // Prefix keys per test so the suite can share one container
    let prefix = TestDataBuilder::from_test_name(test_name).name("mailer", "keys");
    QueueConfig::default().with_key_prefix(format!("{}:", prefix))
}

#[tokio::test]
#[ignore = "requires a local Docker daemon"]
async fn store_primitives_against_real_redis() {
    let redis = TestRedis::new().await;
    let store = RedisStore::new(redis.connection_manager().await);

    store.set_ex("k", "v", 60).await.unwrap();
    assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));

    assert!(store.set_nx_ex("nx", "first", 60).await.unwrap());
    assert!(!store.set_nx_ex("nx", "second", 60).await.unwrap());

    assert_eq!(store.incr("counter").await.unwrap(), 1);
    assert_eq!(store.incr("counter").await.unwrap(), 2);

    store.list_push_back("l", "a").await.unwrap();
    store.list_push_back("l", "b").await.unwrap();
    assert_eq!(store.list_range("l", 0, -1).await.unwrap(), vec!["a", "b"]);
    assert_eq!(store.list_remove("l", "a").await.unwrap(), 1);
    assert_eq!(store.list_remove("l", "a").await.unwrap(), 0);
    assert_eq!(store.list_len("l").await.unwrap(), 1);

    assert!(store.set_add("s", "m").await.unwrap());
    assert!(!store.set_add("s", "m").await.unwrap());
    assert_eq!(store.set_len("s").await.unwrap(), 1);
    assert!(store.set_remove("s", "m").await.unwrap());
}

#[tokio::test]
#[ignore = "requires a local Docker daemon"]
async fn enqueue_and_deliver_through_redis() {
    let redis = TestRedis::new().await;
    let store = Arc::new(RedisStore::new(redis.connection_manager().await));
    let queue = Arc::new(MailQueue::new(
        store,
        config("enqueue_and_deliver_through_redis"),
    ));

    let draft = EmailDraft::booking(
        "guest@example.com",
        "Booking confirmed",
        "<p>Thanks!</p>",
        "Thanks!",
        "B1",
    );
    queue.enqueue(draft).await.unwrap();

    let worker = MailWorker::new(queue.clone(), Arc::new(AlwaysOk), WorkerConfig::default());
    let outcome = worker.process_batch(25).await.unwrap();
    assert_eq!(outcome.sent, 1);

    let stats = queue.stats().await.unwrap();
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.processing, 0);
    assert_eq!(stats.succeeded_total, 1);
}

#[tokio::test]
#[ignore = "requires a local Docker daemon"]
async fn concurrent_idempotency_claims_have_one_winner() {
    let redis = TestRedis::new().await;
    let store = Arc::new(RedisStore::new(redis.connection_manager().await));
    let guard = Arc::new(IdempotencyGuard::new(
        store,
        &config("concurrent_idempotency_claims_have_one_winner"),
    ));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let guard = guard.clone();
        handles.push(tokio::spawn(
            async move { guard.claim("B1").await.unwrap() },
        ));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}
