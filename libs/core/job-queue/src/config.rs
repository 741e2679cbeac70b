//! Queue, worker and broker configuration
//!
//! Every struct has builder-style setters for tests and a `FromEnv`
//! implementation for the worker binary.

use crate::backoff::LinearBackoff;
use core_config::{env_or_default, env_parse, ConfigError, FromEnv};
use std::time::Duration;
use uuid::Uuid;

/// Configuration for a named queue
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Queue name, used as the store key prefix
    pub name: String,

    /// Unique consumer ID for this process (auto-generated)
    pub consumer_id: String,

    /// Attempts before a job is dead-lettered
    pub max_attempts: u32,

    /// A lease not acknowledged within this window is redelivered
    pub lease_timeout: Duration,

    /// Sleep between lease polls when the queue is empty
    pub poll_interval: Duration,

    /// Unresolved jobs (pending, delayed or leased) beyond which enqueue is
    /// refused
    pub max_length: u64,

    /// How long completed records stay inspectable
    pub completed_retention: Duration,

    /// How long dead-lettered records are retained
    pub dead_letter_retention: Duration,
}

impl QueueConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            consumer_id: format!("worker-{}", Uuid::new_v4()),
            max_attempts: 5,
            lease_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(100),
            max_length: 100_000,
            completed_retention: Duration::from_secs(60),
            dead_letter_retention: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }

    pub fn with_consumer_id(mut self, id: impl Into<String>) -> Self {
        self.consumer_id = id.into();
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_lease_timeout(mut self, timeout: Duration) -> Self {
        self.lease_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_max_length(mut self, max_length: u64) -> Self {
        self.max_length = max_length.max(1);
        self
    }

    pub fn with_completed_retention(mut self, retention: Duration) -> Self {
        self.completed_retention = retention;
        self
    }

    pub fn with_dead_letter_retention(mut self, retention: Duration) -> Self {
        self.dead_letter_retention = retention;
        self
    }

    /// Consumer group name for this queue.
    pub fn consumer_group(&self) -> String {
        format!("{}:workers", self.name)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::invalid("QUEUE_NAME", "must not be empty"));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid("QUEUE_MAX_ATTEMPTS", "must be at least 1"));
        }
        if self.lease_timeout.is_zero() {
            return Err(ConfigError::invalid("QUEUE_LEASE_TIMEOUT_MS", "must be positive"));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::invalid("QUEUE_POLL_INTERVAL_MS", "must be positive"));
        }
        if self.max_length == 0 {
            return Err(ConfigError::invalid("QUEUE_MAX_LENGTH", "must be at least 1"));
        }
        Ok(())
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self::new("notifications")
    }
}

impl FromEnv for QueueConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::new(env_or_default("QUEUE_NAME", "notifications"));

        let config = Self {
            max_attempts: env_parse("QUEUE_MAX_ATTEMPTS", defaults.max_attempts)?,
            lease_timeout: millis("QUEUE_LEASE_TIMEOUT_MS", defaults.lease_timeout)?,
            poll_interval: millis("QUEUE_POLL_INTERVAL_MS", defaults.poll_interval)?,
            max_length: env_parse("QUEUE_MAX_LENGTH", defaults.max_length)?,
            completed_retention: secs(
                "QUEUE_COMPLETED_RETENTION_SECS",
                defaults.completed_retention,
            )?,
            dead_letter_retention: secs(
                "QUEUE_DEAD_LETTER_RETENTION_SECS",
                defaults.dead_letter_retention,
            )?,
            ..defaults
        };

        config.validate()?;
        Ok(config)
    }
}

/// Configuration for the worker pool
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Number of concurrent executors
    pub concurrency: usize,

    /// Bound on a single handler invocation
    pub execution_timeout: Duration,

    /// How long each lease call waits for a job
    pub lease_wait: Duration,

    /// Delay policy for transient failures
    pub retry_backoff: LinearBackoff,
}

impl WorkerConfig {
    pub fn new() -> Self {
        Self {
            concurrency: 2,
            execution_timeout: Duration::from_secs(30),
            lease_wait: Duration::from_secs(1),
            retry_backoff: LinearBackoff::default(),
        }
    }

    pub fn with_concurrency(mut self, count: usize) -> Self {
        self.concurrency = count.max(1);
        self
    }

    pub fn with_execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = timeout;
        self
    }

    pub fn with_lease_wait(mut self, wait: Duration) -> Self {
        self.lease_wait = wait;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: LinearBackoff) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// A lease must outlive the handler bound, otherwise every slow job is
    /// redelivered while still running.
    pub fn validate_against(&self, queue: &QueueConfig) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::invalid("WORKER_CONCURRENCY", "must be at least 1"));
        }
        if self.execution_timeout.is_zero() {
            return Err(ConfigError::invalid(
                "WORKER_EXECUTION_TIMEOUT_MS",
                "must be positive",
            ));
        }
        if queue.lease_timeout <= self.execution_timeout {
            return Err(ConfigError::invalid(
                "QUEUE_LEASE_TIMEOUT_MS",
                format!(
                    "lease timeout ({:?}) must exceed the execution timeout ({:?})",
                    queue.lease_timeout, self.execution_timeout
                ),
            ));
        }
        Ok(())
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl FromEnv for WorkerConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::new();

        let concurrency: usize = env_parse("WORKER_CONCURRENCY", defaults.concurrency)?;
        if concurrency == 0 {
            return Err(ConfigError::invalid("WORKER_CONCURRENCY", "must be at least 1"));
        }

        Ok(Self {
            concurrency,
            execution_timeout: millis("WORKER_EXECUTION_TIMEOUT_MS", defaults.execution_timeout)?,
            lease_wait: millis("WORKER_LEASE_WAIT_MS", defaults.lease_wait)?,
            retry_backoff: backoff_from_env("RETRY_BACKOFF")?,
        })
    }
}

/// Configuration for the shared broker connection
#[derive(Debug, Clone)]
pub struct BrokerSettings {
    /// Bound on every store operation
    pub operation_timeout: Duration,

    /// Interval between liveness pings while connected
    pub health_interval: Duration,

    /// Delay policy between reconnect attempts
    pub reconnect_backoff: LinearBackoff,
}

impl BrokerSettings {
    pub fn new() -> Self {
        Self {
            operation_timeout: Duration::from_secs(2),
            health_interval: Duration::from_secs(5),
            reconnect_backoff: LinearBackoff::default(),
        }
    }

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub fn with_health_interval(mut self, interval: Duration) -> Self {
        self.health_interval = interval;
        self
    }

    pub fn with_reconnect_backoff(mut self, backoff: LinearBackoff) -> Self {
        self.reconnect_backoff = backoff;
        self
    }
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self::new()
    }
}

impl FromEnv for BrokerSettings {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::new();

        Ok(Self {
            operation_timeout: millis("BROKER_OPERATION_TIMEOUT_MS", defaults.operation_timeout)?,
            health_interval: millis("BROKER_HEALTH_INTERVAL_MS", defaults.health_interval)?,
            reconnect_backoff: backoff_from_env("BROKER_BACKOFF")?,
        })
    }
}

/// Reads `{prefix}_BASE_MS`, `{prefix}_CAP_MS` and `{prefix}_JITTER`.
fn backoff_from_env(prefix: &str) -> Result<LinearBackoff, ConfigError> {
    let base = millis(&format!("{prefix}_BASE_MS"), LinearBackoff::DEFAULT_BASE)?;
    let cap = millis(&format!("{prefix}_CAP_MS"), LinearBackoff::DEFAULT_CAP)?;
    if cap < base {
        return Err(ConfigError::invalid(
            format!("{prefix}_CAP_MS"),
            "cap must not be smaller than base",
        ));
    }

    let jitter_key = format!("{prefix}_JITTER");
    let jitter: f64 = env_parse(&jitter_key, 0.0)?;
    if !(0.0..=1.0).contains(&jitter) {
        return Err(ConfigError::invalid(jitter_key, "must be within [0, 1]"));
    }

    Ok(LinearBackoff::new(base, cap).with_jitter(jitter))
}

fn millis(key: &str, default: Duration) -> Result<Duration, ConfigError> {
    env_parse(key, default.as_millis() as u64).map(Duration::from_millis)
}

fn secs(key: &str, default: Duration) -> Result<Duration, ConfigError> {
    env_parse(key, default.as_secs()).map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_defaults() {
        let config = QueueConfig::default();

        assert_eq!(config.name, "notifications");
        assert_eq!(config.consumer_group(), "notifications:workers");
        assert_eq!(config.max_attempts, 5);
        assert!(config.consumer_id.starts_with("worker-"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_pattern() {
        let config = QueueConfig::new("email")
            .with_consumer_id("worker-1")
            .with_max_attempts(0)
            .with_lease_timeout(Duration::from_secs(90));

        assert_eq!(config.consumer_id, "worker-1");
        assert_eq!(config.max_attempts, 1);
        assert_eq!(config.lease_timeout, Duration::from_secs(90));

        let worker = WorkerConfig::new().with_concurrency(0);
        assert_eq!(worker.concurrency, 1);
    }

    #[test]
    fn test_queue_from_env() {
        temp_env::with_vars(
            [
                ("QUEUE_NAME", Some("issues")),
                ("QUEUE_MAX_ATTEMPTS", Some("3")),
                ("QUEUE_LEASE_TIMEOUT_MS", Some("45000")),
                ("QUEUE_POLL_INTERVAL_MS", None),
            ],
            || {
                let config = QueueConfig::from_env().unwrap();
                assert_eq!(config.name, "issues");
                assert_eq!(config.max_attempts, 3);
                assert_eq!(config.lease_timeout, Duration::from_secs(45));
                assert_eq!(config.poll_interval, Duration::from_millis(100));
            },
        );
    }

    #[test]
    fn test_queue_from_env_rejects_zero_attempts() {
        temp_env::with_var("QUEUE_MAX_ATTEMPTS", Some("0"), || {
            let err = QueueConfig::from_env().unwrap_err();
            assert!(err.to_string().contains("QUEUE_MAX_ATTEMPTS"));
        });
    }

    #[test]
    fn test_worker_from_env() {
        temp_env::with_vars(
            [
                ("WORKER_CONCURRENCY", Some("4")),
                ("WORKER_EXECUTION_TIMEOUT_MS", Some("10000")),
                ("RETRY_BACKOFF_BASE_MS", Some("250")),
                ("RETRY_BACKOFF_CAP_MS", Some("1000")),
                ("RETRY_BACKOFF_JITTER", None),
            ],
            || {
                let config = WorkerConfig::from_env().unwrap();
                assert_eq!(config.concurrency, 4);
                assert_eq!(config.execution_timeout, Duration::from_secs(10));
                assert_eq!(config.retry_backoff.delay(1), Duration::from_millis(250));
                assert_eq!(config.retry_backoff.delay(9), Duration::from_millis(1000));
            },
        );
    }

    #[test]
    fn test_worker_from_env_rejects_bad_jitter() {
        temp_env::with_var("RETRY_BACKOFF_JITTER", Some("1.5"), || {
            assert!(WorkerConfig::from_env().is_err());
        });
    }

    #[test]
    fn test_broker_from_env_rejects_inverted_backoff() {
        temp_env::with_vars(
            [
                ("BROKER_BACKOFF_BASE_MS", Some("3000")),
                ("BROKER_BACKOFF_CAP_MS", Some("1000")),
            ],
            || {
                let err = BrokerSettings::from_env().unwrap_err();
                assert!(err.to_string().contains("BROKER_BACKOFF_CAP_MS"));
            },
        );
    }

    #[test]
    fn test_lease_must_exceed_execution_timeout() {
        let queue = QueueConfig::default().with_lease_timeout(Duration::from_secs(10));
        let worker = WorkerConfig::new().with_execution_timeout(Duration::from_secs(30));
        assert!(worker.validate_against(&queue).is_err());

        let queue = queue.with_lease_timeout(Duration::from_secs(60));
        assert!(worker.validate_against(&queue).is_ok());
    }
}
