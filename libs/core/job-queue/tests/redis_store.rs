//! Redis store tests against a real Redis (testcontainers).
//!
//! Run with: `cargo test -p job-queue --test redis_store -- --ignored`

use job_queue::{
    Job, JobId, JobStatus, QueueConfig, QueueStats, QueueStore, RedisStore, Resolution, StoreError,
};
use redis::Client;
use serde_json::json;
use std::time::Duration;
use test_utils::{TestDataBuilder, TestRedis};

async fn store(
    redis: &TestRedis,
    test_name: &str,
    config: impl FnOnce(QueueConfig) -> QueueConfig,
) -> RedisStore {
    let builder = TestDataBuilder::from_test_name(test_name);
    let config = config(QueueConfig::new(builder.queue_name()));
    let client = Client::open(redis.connection_string()).unwrap();
    let store = RedisStore::from_client(client, config);
    store.connect().await.unwrap();
    store
}

fn job(n: u32, max_attempts: u32) -> Job {
    Job::new("ping", json!({ "n": n }), max_attempts)
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_fifo_lease_and_ack() {
    let redis = TestRedis::new().await;
    let store = store(&redis, "redis_fifo", |c| c).await;

    let first = job(1, 5);
    let second = job(2, 5);
    store.enqueue(&first).await.unwrap();
    store.enqueue(&second).await.unwrap();

    let leased = store.lease("w1").await.unwrap().unwrap();
    assert_eq!(leased.id, first.id);
    assert_eq!(leased.attempt, 1);
    assert_eq!(leased.status, JobStatus::Leased);
    assert_eq!(leased.payload, json!({ "n": 1 }));

    assert!(store.ack(first.id.into()).await.unwrap());
    assert!(!store.ack(first.id.into()).await.unwrap());

    let record = store.get(first.id).await.unwrap().unwrap();
    assert_eq!(record.status, JobStatus::Completed);

    let leased = store.lease("w2").await.unwrap().unwrap();
    assert_eq!(leased.id, second.id);
    assert!(store.lease("w3").await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_connect_twice_reuses_consumer_group() {
    let redis = TestRedis::new().await;
    let store = store(&redis, "redis_busygroup", |c| c).await;

    store.connect().await.unwrap();
    store.ping().await.unwrap();
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_retry_is_delayed() {
    let redis = TestRedis::new().await;
    let store = store(&redis, "redis_retry", |c| c).await;

    let first = job(1, 5);
    store.enqueue(&first).await.unwrap();
    store.lease("w").await.unwrap().unwrap();

    let resolution = store
        .retry(first.id.into(), Duration::from_millis(300), "flaky")
        .await
        .unwrap();
    assert_eq!(resolution, Resolution::Rescheduled);
    assert!(store.lease("w").await.unwrap().is_none());
    assert_eq!(store.stats().await.unwrap().delayed, 1);

    tokio::time::sleep(Duration::from_millis(400)).await;
    let leased = store.lease("w").await.unwrap().unwrap();
    assert_eq!(leased.id, first.id);
    assert_eq!(leased.attempt, 2);
    assert_eq!(leased.last_error.as_deref(), Some("flaky"));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_expired_lease_is_redelivered_to_another_consumer() {
    let redis = TestRedis::new().await;
    let store = store(&redis, "redis_expiry", |c| {
        c.with_lease_timeout(Duration::from_millis(200))
    })
    .await;

    let first = job(1, 5);
    store.enqueue(&first).await.unwrap();
    store.lease("w1").await.unwrap().unwrap();
    assert!(store.lease("w2").await.unwrap().is_none());

    tokio::time::sleep(Duration::from_millis(300)).await;
    let redelivered = store.lease("w2").await.unwrap().unwrap();
    assert_eq!(redelivered.id, first.id);
    assert_eq!(redelivered.attempt, 2);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_exhausted_retry_dead_letters() {
    let redis = TestRedis::new().await;
    let store = store(&redis, "redis_dead_letter", |c| c).await;

    let only = job(1, 1);
    store.enqueue(&only).await.unwrap();
    store.lease("w").await.unwrap().unwrap();

    let resolution = store
        .retry(only.id.into(), Duration::ZERO, "still failing")
        .await
        .unwrap();
    assert_eq!(resolution, Resolution::DeadLettered("still failing".into()));
    assert!(store.lease("w").await.unwrap().is_none());

    let letters = store.dead_letters(10).await.unwrap();
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].job_id, only.id);
    assert_eq!(letters[0].reason, "still failing");

    assert_eq!(
        store.stats().await.unwrap(),
        QueueStats {
            pending: 0,
            leased: 0,
            delayed: 0,
            dead_lettered: 1,
        }
    );
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_unknown_ids_resolve_missing() {
    let redis = TestRedis::new().await;
    let store = store(&redis, "redis_missing", |c| c).await;
    let unknown = JobId::new();

    assert!(!store.ack(unknown.into()).await.unwrap());
    assert_eq!(store.fail(unknown.into(), "x").await.unwrap(), Resolution::Missing);
    assert!(store.get(unknown).await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_full_queue_refuses_instead_of_trimming() {
    let redis = TestRedis::new().await;
    let store = store(&redis, "redis_full", |c| c.with_max_length(2)).await;

    let first = job(1, 5);
    store.enqueue(&first).await.unwrap();
    store.enqueue(&job(2, 5)).await.unwrap();

    let err = store.enqueue(&job(3, 5)).await.unwrap_err();
    assert!(matches!(err, StoreError::Full { backlog: 2, limit: 2 }));

    // the oldest job is still there and leases first
    let leased = store.lease("w").await.unwrap().unwrap();
    assert_eq!(leased.id, first.id);
    assert!(store.ack((&leased).into()).await.unwrap());
    store.enqueue(&job(3, 5)).await.unwrap();
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_expired_holder_cannot_resolve_redelivered_job() {
    let redis = TestRedis::new().await;
    let store = store(&redis, "redis_stale_holder", |c| {
        c.with_lease_timeout(Duration::from_millis(200))
    })
    .await;

    let first = job(1, 5);
    store.enqueue(&first).await.unwrap();
    let stale = store.lease("w1").await.unwrap().unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    let current = store.lease("w2").await.unwrap().unwrap();
    assert_eq!(current.attempt, 2);

    assert!(!store.ack((&stale).into()).await.unwrap());
    assert_eq!(
        store
            .retry((&stale).into(), Duration::ZERO, "late")
            .await
            .unwrap(),
        Resolution::Missing
    );
    assert_eq!(
        store.fail((&stale).into(), "late").await.unwrap(),
        Resolution::Missing
    );

    let record = store.get(first.id).await.unwrap().unwrap();
    assert_eq!(record.status, JobStatus::Leased);
    assert_eq!(record.attempt, 2);

    assert!(store.ack((&current).into()).await.unwrap());
}
