//! Job Queue
//!
//! A durable, at-least-once job queue on Redis Streams with a worker pool.
//!
//! ## Features
//!
//! - **Queue**: `enqueue` / `lease` / `ack` / `retry` / `fail` on a named queue
//! - **Shared broker connection**: one supervised, reconnecting connection
//!   shared by producers and workers
//! - **Worker pool**: N executors dispatching by job kind, with an execution
//!   timeout and panic isolation
//! - **Linear backoff**: `min(attempt * base, cap)` between retries
//! - **Dead letters**: exhausted and poison jobs are retained for inspection
//! - **Prometheus metrics** and K8s-ready health endpoints
//!
//! ## Example
//!
//! ```ignore
//! use job_queue::{BrokerConnection, HandlerRegistry, Queue, RedisStore, WorkerContext, WorkerPool};
//!
//! let store = Arc::new(RedisStore::new(&redis_config, queue_config.clone())?);
//! let broker = Arc::new(BrokerConnection::new(store, broker_settings));
//! let supervisor = broker.spawn_supervisor(shutdown_rx.clone());
//!
//! let queue = Queue::new(broker.clone(), queue_config);
//! let registry = HandlerRegistry::builder()
//!     .register_payload(AdminEmailHandler::new(notifier, templates, recipients))?
//!     .build();
//!
//! WorkerPool::new(WorkerContext::new(queue, registry, worker_config))
//!     .run(shutdown_rx)
//!     .await?;
//! ```

mod backoff;
mod broker;
mod config;
mod error;
mod health;
mod job;
pub mod metrics;
mod queue;
mod registry;
pub mod store;
mod worker;

pub use backoff::LinearBackoff;
pub use broker::{BrokerConnection, ConnectionState};
pub use config::{BrokerSettings, QueueConfig, WorkerConfig};
pub use error::{ErrorCategory, HandlerError, QueueError, RegistryError, StoreError};
pub use health::{health_router, HealthResponse, HealthState};
pub use job::{DeadLetter, Job, JobId, JobPayload, JobStatus, LeaseRef, Resolution};
pub use metrics::{init_metrics, QueueMetrics};
pub use queue::Queue;
pub use registry::{HandlerRegistry, HandlerRegistryBuilder, JobHandler, PayloadHandler, Typed};
pub use store::{MemoryStore, QueueStats, QueueStore, RedisStore};
pub use worker::{dispatch, Outcome, WorkerContext, WorkerPool, UNKNOWN_KIND};
