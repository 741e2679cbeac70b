//! End-to-end `notify-admin` flow: producer facade -> in-memory queue ->
//! worker pool -> admin email handler -> mock notifier.
//!
//! Runs on tokio's paused clock so retry delays are exact.

use email::{
    AdminEmailHandler, AdminNotifications, MockNotifier, NotifierError, NotifyAdmin,
    TemplateEngine,
};
use job_queue::{
    BrokerConnection, BrokerSettings, HandlerRegistry, Job, JobId, JobStatus, MemoryStore, Queue,
    QueueConfig, WorkerConfig, WorkerContext, WorkerPool,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use test_utils::TestDataBuilder;
use tokio::sync::watch;
use tokio::time::Instant;

struct Setup {
    queue: Queue,
    notifications: AdminNotifications,
    notifier: MockNotifier,
    store: Arc<MemoryStore>,
}

async fn setup() -> Setup {
    let config = QueueConfig::new("notifications");
    let store = Arc::new(MemoryStore::new(config.clone()));
    let broker = Arc::new(BrokerConnection::new(store.clone(), BrokerSettings::new()));
    broker.connect().await.unwrap();
    let queue = Queue::new(broker, config);

    Setup {
        notifications: AdminNotifications::new(queue.clone()),
        queue,
        notifier: MockNotifier::new(),
        store,
    }
}

fn run_pool(setup: &Setup) -> (watch::Sender<bool>, tokio::task::JoinHandle<()>) {
    let handler = AdminEmailHandler::new(
        Arc::new(setup.notifier.clone()),
        Arc::new(TemplateEngine::new().unwrap()),
        "admin@example.com",
        "onboarding@resend.dev",
    );
    let registry = HandlerRegistry::builder()
        .register_payload(handler)
        .unwrap()
        .build();
    let config = WorkerConfig::new()
        .with_concurrency(1)
        .with_execution_timeout(Duration::from_secs(5))
        .with_lease_wait(Duration::from_millis(100));

    let pool = WorkerPool::new(WorkerContext::new(setup.queue.clone(), registry, config));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move {
        pool.run(shutdown_rx).await.unwrap();
    });
    (shutdown_tx, handle)
}

async fn wait_for_status(queue: &Queue, id: JobId, status: JobStatus) -> Job {
    for _ in 0..1000 {
        if let Some(job) = queue.job(id).await.unwrap() {
            if job.status == status {
                return job;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {id} never reached {status}");
}

fn payload(test_name: &str) -> NotifyAdmin {
    let builder = TestDataBuilder::from_test_name(test_name);
    NotifyAdmin::new(
        builder.issue_id().to_string(),
        builder.name("issue", "title"),
        builder.identity(),
    )
}

#[tokio::test(start_paused = true)]
async fn test_notification_delivered_once() {
    let setup = setup().await;
    let (shutdown, pool) = run_pool(&setup);

    let payload = payload("test_notification_delivered_once");
    let job_id = setup
        .notifications
        .issue_created(&payload)
        .await
        .unwrap()
        .job_id()
        .unwrap();

    let job = wait_for_status(&setup.queue, job_id, JobStatus::Completed).await;
    assert_eq!(job.attempt, 1);

    let sent = setup.notifier.sent().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "admin@example.com");
    assert_eq!(sent[0].subject, format!("New Issue: {}", payload.title));
    assert!(sent[0].html.contains(&payload.requester_identity));

    shutdown.send(true).unwrap();
    pool.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_minimal_payload_is_delivered() {
    let setup = setup().await;
    let (shutdown, pool) = run_pool(&setup);

    let job_id = setup
        .queue
        .enqueue("notify-admin", json!({ "issue_id": "I1", "title": "bug" }))
        .await
        .unwrap();

    let job = wait_for_status(&setup.queue, job_id, JobStatus::Completed).await;
    assert_eq!(job.attempt, 1);

    let sent = setup.notifier.sent().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].subject, "New Issue: bug");
    assert!(sent[0].html.contains("an unknown requester"));

    shutdown.send(true).unwrap();
    pool.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_two_transient_failures_then_success() {
    let setup = setup().await;
    setup
        .notifier
        .fail_next([
            NotifierError::transport("connection reset"),
            NotifierError::RateLimited("slow down".into()),
        ])
        .await;
    let (shutdown, pool) = run_pool(&setup);

    let started = Instant::now();
    let job_id = setup
        .notifications
        .issue_created(&payload("test_two_transient_failures_then_success"))
        .await
        .unwrap()
        .job_id()
        .unwrap();

    let job = wait_for_status(&setup.queue, job_id, JobStatus::Completed).await;
    assert_eq!(job.attempt, 3);
    assert_eq!(setup.notifier.attempts().await, 3);
    assert_eq!(setup.notifier.sent_count().await, 1);
    // 500ms after the first failure, 1000ms after the second
    assert!(started.elapsed() >= Duration::from_millis(1500));

    shutdown.send(true).unwrap();
    pool.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_rejected_message_is_dead_lettered_without_retry() {
    let setup = setup().await;
    setup
        .notifier
        .fail_next([NotifierError::Rejected {
            status: 422,
            body: "invalid `to` field".into(),
        }])
        .await;
    let (shutdown, pool) = run_pool(&setup);

    let job_id = setup
        .notifications
        .issue_created(&payload("test_rejected_message_is_dead_lettered_without_retry"))
        .await
        .unwrap()
        .job_id()
        .unwrap();

    let job = wait_for_status(&setup.queue, job_id, JobStatus::DeadLettered).await;
    assert_eq!(job.attempt, 1);
    assert_eq!(setup.notifier.attempts().await, 1);

    let letters = setup.queue.dead_letters(10).await.unwrap();
    assert_eq!(letters.len(), 1);
    assert!(letters[0].reason.contains("422"));

    shutdown.send(true).unwrap();
    pool.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_broker_outage_does_not_fail_the_producer() {
    let setup = setup().await;
    setup.store.set_available(false);

    let enqueued = setup
        .notifications
        .issue_created(&payload("test_broker_outage_does_not_fail_the_producer"))
        .await
        .unwrap();
    assert_eq!(enqueued.job_id(), None);

    setup.store.set_available(true);
    assert!(setup.store.is_empty());
}
