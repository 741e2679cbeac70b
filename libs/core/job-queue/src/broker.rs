//! Shared broker connection
//!
//! One [`BrokerConnection`] wraps the store for the whole process. A
//! supervisor task owns connectivity: it connects, pings on an interval and
//! reconnects with linear backoff after a loss. Callers never reconnect
//! themselves; they see the current [`ConnectionState`] and either proceed,
//! fail fast or wait for the supervisor.

use crate::backoff::LinearBackoff;
use crate::config::BrokerSettings;
use crate::error::{QueueError, StoreError};
use crate::metrics;
use crate::store::QueueStore;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use strum::Display;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Observable state of the broker connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionState {
    Connected,
    Reconnecting,
    Disconnected,
}

impl ConnectionState {
    fn gauge_value(self) -> u8 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Reconnecting => 1,
            ConnectionState::Connected => 2,
        }
    }
}

/// Reconnecting connection to the queue store, shared by producers and workers.
pub struct BrokerConnection {
    store: Arc<dyn QueueStore>,
    settings: BrokerSettings,
    state: watch::Sender<ConnectionState>,
}

impl BrokerConnection {
    pub fn new(store: Arc<dyn QueueStore>, settings: BrokerSettings) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            store,
            settings,
            state,
        }
    }

    pub fn settings(&self) -> &BrokerSettings {
        &self.settings
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Try to connect once, bounded by the operation timeout.
    pub async fn connect(&self) -> Result<(), QueueError> {
        let timeout = self.settings.operation_timeout;
        match tokio::time::timeout(timeout, self.store.connect()).await {
            Ok(Ok(())) => {
                self.set_state(ConnectionState::Connected);
                info!(store = self.store.name(), "Broker connection ready");
                Ok(())
            }
            Ok(Err(e)) => Err(QueueError::BrokerUnavailable(e.to_string())),
            Err(_) => Err(QueueError::BrokerUnavailable(format!(
                "connect timed out after {}ms",
                timeout.as_millis()
            ))),
        }
    }

    /// Wait until the connection is up, or `timeout` elapses.
    pub async fn wait_connected(&self, timeout: Duration) -> bool {
        let mut rx = self.subscribe();
        matches!(
            tokio::time::timeout(timeout, rx.wait_for(|s| *s == ConnectionState::Connected)).await,
            Ok(Ok(_))
        )
    }

    /// Run one store operation through the connection.
    ///
    /// Fails fast with `BrokerUnavailable` when not connected. The operation
    /// is bounded by the operation timeout; a connection error or timeout
    /// marks the connection lost so the supervisor reconnects.
    pub async fn execute<T, F>(&self, op: &'static str, fut: F) -> Result<T, QueueError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        let state = self.state();
        if state != ConnectionState::Connected {
            return Err(QueueError::BrokerUnavailable(format!("{op}: broker {state}")));
        }

        match tokio::time::timeout(self.settings.operation_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) if e.is_connection() => {
                self.mark_lost(&e.to_string());
                Err(QueueError::BrokerUnavailable(format!("{op}: {e}")))
            }
            Ok(Err(e)) => Err(QueueError::Store(e)),
            Err(_) => {
                let reason = format!(
                    "{op}: timed out after {}ms",
                    self.settings.operation_timeout.as_millis()
                );
                self.mark_lost(&reason);
                Err(QueueError::BrokerUnavailable(reason))
            }
        }
    }

    /// The store behind this connection.
    pub fn store(&self) -> &Arc<dyn QueueStore> {
        &self.store
    }

    /// Flag the connection as lost. Only the first report per outage counts.
    pub fn mark_lost(&self, reason: &str) {
        let changed = self.state.send_if_modified(|state| {
            if *state == ConnectionState::Connected {
                *state = ConnectionState::Reconnecting;
                true
            } else {
                false
            }
        });
        if changed {
            metrics::broker_state(ConnectionState::Reconnecting.gauge_value());
            warn!(%reason, "Broker connection lost");
        }
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            metrics::broker_state(next.gauge_value());
            debug!(from = %previous, to = %next, "Broker state changed");
        }
    }

    /// Spawn the supervisor. It runs until `shutdown` flips to true (or its
    /// sender is dropped) and leaves the connection `Disconnected`.
    pub fn spawn_supervisor(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let broker = Arc::clone(self);
        tokio::spawn(async move { broker.supervise(shutdown).await })
    }

    async fn supervise(&self, mut shutdown: watch::Receiver<bool>) {
        let backoff: LinearBackoff = self.settings.reconnect_backoff;
        let mut failures: u32 = 0;

        info!(
            health_interval_ms = self.settings.health_interval.as_millis() as u64,
            "Broker supervisor started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            if self.is_connected() {
                let mut state_rx = self.subscribe();
                // the watch::Ref guard must not outlive the arm
                let lost = async move {
                    let _ = state_rx
                        .wait_for(|s| *s != ConnectionState::Connected)
                        .await;
                };
                tokio::select! {
                    _ = shutdown.changed() => break,
                    () = lost => {}
                    () = tokio::time::sleep(self.settings.health_interval) => {
                        self.health_check().await;
                    }
                }
                continue;
            }

            metrics::reconnect_attempt();
            match self.connect().await {
                Ok(()) => {
                    if failures > 0 {
                        info!(failures, "Broker connection recovered");
                    }
                    failures = 0;
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    let delay = backoff.delay_with_jitter(failures);
                    self.set_state(ConnectionState::Reconnecting);
                    error!(error = %e, "Broker connection error");
                    warn!(
                        attempt = failures,
                        delay_ms = delay.as_millis() as u64,
                        "Broker reconnecting in {}ms",
                        delay.as_millis()
                    );
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        self.set_state(ConnectionState::Disconnected);
        info!("Broker supervisor stopped");
    }

    async fn health_check(&self) {
        let timeout = self.settings.operation_timeout;
        match tokio::time::timeout(timeout, self.store.ping()).await {
            Ok(Ok(())) => debug!("Broker ping ok"),
            Ok(Err(e)) => self.mark_lost(&format!("ping failed: {e}")),
            Err(_) => self.mark_lost("ping timed out"),
        }
    }
}
