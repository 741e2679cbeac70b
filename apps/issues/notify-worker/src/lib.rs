//! Notify Worker Service
//!
//! Leases `notify-admin` jobs from the Redis-backed queue and emails the
//! admin about each new issue.
//!
//! ## Architecture
//!
//! ```text
//! Issue API (producer, AdminNotifications)
//!   ↓ enqueue
//! Redis Stream ({QUEUE_NAME}:stream, group {QUEUE_NAME}:workers)
//!   ↓ lease
//! WorkerPool (WORKER_CONCURRENCY executors)
//!   ↓ dispatch by kind
//! AdminEmailHandler -> Notifier (Resend / SMTP / mock)
//! ```
//!
//! One supervised broker connection is shared by every executor and by the
//! health server.

use axum::Router;
use core_config::{redis::RedisConfig, server::ServerConfig, Environment, FromEnv};
use email::{build_notifier, AdminEmailHandler, EmailConfig, TemplateEngine};
use eyre::{Result, WrapErr};
use job_queue::{
    health_router, metrics, BrokerConnection, BrokerSettings, HandlerRegistry, HealthState, Queue,
    QueueConfig, RedisStore, WorkerConfig, WorkerContext, WorkerPool,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// How long startup waits for the first broker connection before running
/// anyway (the supervisor keeps reconnecting in the background)
const STARTUP_CONNECT_WAIT: Duration = Duration::from_secs(10);

/// Everything the worker reads from the environment.
#[derive(Debug, Clone)]
pub struct Settings {
    pub redis: RedisConfig,
    pub broker: BrokerSettings,
    pub queue: QueueConfig,
    pub worker: WorkerConfig,
    pub email: EmailConfig,
    pub server: ServerConfig,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let settings = Self {
            redis: RedisConfig::from_env().wrap_err("Failed to load Redis configuration")?,
            broker: BrokerSettings::from_env().wrap_err("Failed to load broker settings")?,
            queue: QueueConfig::from_env().wrap_err("Failed to load queue configuration")?,
            worker: WorkerConfig::from_env().wrap_err("Failed to load worker configuration")?,
            email: EmailConfig::from_env().wrap_err("Failed to load email configuration")?,
            server: ServerConfig::from_env().wrap_err("Failed to load health server configuration")?,
        };

        settings
            .worker
            .validate_against(&settings.queue)
            .wrap_err("Invalid worker configuration")?;
        Ok(settings)
    }
}

/// Start the health and admin HTTP server
///
/// - Liveness probes: `/health`, `/healthz`
/// - Readiness probes: `/ready`, `/readyz`
/// - Queue monitoring: `/queue/info`
/// - Prometheus metrics: `/metrics`
/// - Dead letters: `/admin/dead-letters`
async fn start_health_server(
    health_state: HealthState,
    server: ServerConfig,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let app: Router = health_router(health_state);

    let addr = server.address();
    let listener = TcpListener::bind(&addr)
        .await
        .wrap_err_with(|| format!("Failed to bind health server to {}", addr))?;

    info!(address = %addr, "Health and admin server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await
        .wrap_err("Health server failed")?;

    Ok(())
}

/// Build the handler registry for this worker.
pub fn build_registry(email: &EmailConfig) -> Result<HandlerRegistry> {
    let notifier = build_notifier(email).wrap_err("Failed to build notifier")?;
    let templates = Arc::new(TemplateEngine::new().wrap_err("Failed to load email templates")?);

    let registry = HandlerRegistry::builder()
        .register_payload(AdminEmailHandler::from_config(notifier, templates, email))
        .wrap_err("Failed to register admin email handler")?
        .build();
    Ok(registry)
}

/// Run the notify worker
///
/// 1. Installs error reporting, tracing and metrics
/// 2. Loads configuration from the environment
/// 3. Starts the broker supervisor and waits (bounded) for a connection
/// 4. Serves health endpoints and runs the worker pool until SIGINT/SIGTERM
/// 5. Drains in-flight jobs, then stops the supervisor
///
/// # Errors
///
/// Returns an error if configuration is invalid, the notifier cannot be
/// built, or the health server cannot bind.
pub async fn run() -> Result<()> {
    core_config::tracing::install_color_eyre();
    let environment = Environment::from_env();
    core_config::tracing::init_tracing(&environment);

    metrics::init_metrics().wrap_err("Failed to initialize metrics")?;

    let app_name = env!("CARGO_PKG_NAME");
    let app_version = env!("CARGO_PKG_VERSION");
    info!(name = %app_name, version = %app_version, environment = ?environment, "Starting notify worker");

    let settings = Settings::from_env()?;
    info!(
        redis = %settings.redis.redacted_url(),
        queue = %settings.queue.name,
        consumer_id = %settings.queue.consumer_id,
        concurrency = settings.worker.concurrency,
        execution_timeout_ms = settings.worker.execution_timeout.as_millis() as u64,
        max_attempts = settings.queue.max_attempts,
        notifier = %settings.email.provider,
        "Worker configuration loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let store = RedisStore::new(&settings.redis, settings.queue.clone())
        .wrap_err("Failed to create Redis store")?;
    let broker = Arc::new(BrokerConnection::new(Arc::new(store), settings.broker));
    let supervisor = broker.spawn_supervisor(shutdown_rx.clone());

    info!("Connecting to Redis...");
    if broker.wait_connected(STARTUP_CONNECT_WAIT).await {
        info!("Connected to Redis successfully");
    } else {
        warn!(
            wait_secs = STARTUP_CONNECT_WAIT.as_secs(),
            "Redis not reachable yet, starting anyway and reconnecting in the background"
        );
    }

    let registry = build_registry(&settings.email)?;
    let queue = Queue::new(broker.clone(), settings.queue);

    tokio::spawn(async move {
        if let Err(e) = shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        let _ = shutdown_tx.send(true);
    });

    let health_state = HealthState::new(queue.clone(), app_name, app_version);
    let health_shutdown = shutdown_rx.clone();
    let server = settings.server;
    let health = tokio::spawn(async move {
        if let Err(e) = start_health_server(health_state, server, health_shutdown).await {
            error!(error = %e, "Health server failed");
        }
    });

    let pool = WorkerPool::new(WorkerContext::new(queue, registry, settings.worker));
    pool.run(shutdown_rx)
        .await
        .wrap_err("Worker pool failed")?;

    if let Err(e) = supervisor.await {
        warn!(error = %e, "Broker supervisor task ended abnormally");
    }
    if let Err(e) = health.await {
        warn!(error = %e, "Health server task ended abnormally");
    }

    info!("Notify worker stopped");
    Ok(())
}

/// Wait for a shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
            .wrap_err("Failed to install SIGTERM handler")?;

        tokio::select! {
            result = signal::ctrl_c() => {
                result.wrap_err("Failed to listen for Ctrl+C")?;
                info!("Received Ctrl+C, initiating shutdown...");
            },
            _ = terminate.recv() => {
                info!("Received SIGTERM, initiating shutdown...");
            },
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c()
            .await
            .wrap_err("Failed to listen for Ctrl+C")?;
        info!("Received Ctrl+C, initiating shutdown...");
    }

    Ok(())
}
