//! Transport listeners.
//!
//! One listener per configured service. Each transport owns its accept or
//! read loop as a spawned task and shares the same lifecycle state machine,
//! so start and stop behave identically everywhere.

mod http;
mod sequencer;
mod serial;
mod tcp;

pub use http::HttpListener;
pub use serial::SerialListener;
pub use tcp::RawTcpListener;

use crate::config::{ServiceConfig, TransportKind};
use crate::error::MockError;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Lifecycle states of a transport listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Stopped,
    Starting,
    Listening,
    Stopping,
}

impl fmt::Display for ListenerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ListenerState::Stopped => "stopped",
            ListenerState::Starting => "starting",
            ListenerState::Listening => "listening",
            ListenerState::Stopping => "stopping",
        };
        write!(f, "{}", name)
    }
}

/// A running transport bound to one service definition.
#[async_trait]
pub trait Listener: Send + Sync {
    fn service_name(&self) -> &str;

    /// Bind the transport and spawn its loop task.
    ///
    /// Starting an already-running listener is a no-op. Errors mean the
    /// transport never became ready and the listener is back in `Stopped`.
    async fn start(&self) -> Result<(), MockError>;

    /// Cancel in-flight work, await the loop task, and release the
    /// transport. Stopping a stopped listener is a no-op.
    async fn stop(&self);
}

/// Validate the service definition and construct the matching listener.
pub fn build_listener(service: ServiceConfig) -> Result<Arc<dyn Listener>, MockError> {
    service.validate()?;
    let listener: Arc<dyn Listener> = match service.transport {
        TransportKind::Rest | TransportKind::Soap => Arc::new(HttpListener::new(service)),
        TransportKind::Tcp => Arc::new(RawTcpListener::new(service)),
        TransportKind::Com => Arc::new(SerialListener::new(service)),
    };
    Ok(listener)
}

struct LifecycleInner {
    state: ListenerState,
    task: Option<JoinHandle<()>>,
    shutdown: CancellationToken,
}

/// Shared start/stop bookkeeping for all listener implementations.
///
/// Holds the loop task handle and the shutdown token that every spawned
/// handler clones. The mutex is only taken for state transitions, never
/// across request handling.
pub(crate) struct ListenerLifecycle {
    name: String,
    inner: Mutex<LifecycleInner>,
}

impl ListenerLifecycle {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(LifecycleInner {
                state: ListenerState::Stopped,
                task: None,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Transition to `Starting` and hand out a fresh shutdown token.
    ///
    /// Returns `None` when the listener is not stopped, which the caller
    /// treats as "already running".
    pub(crate) async fn begin_start(&self) -> Option<CancellationToken> {
        let mut inner = self.inner.lock().await;
        if inner.state != ListenerState::Stopped {
            warn!(
                service = %self.name,
                state = %inner.state,
                "Listener already running, ignoring start"
            );
            return None;
        }
        inner.state = ListenerState::Starting;
        inner.shutdown = CancellationToken::new();
        Some(inner.shutdown.clone())
    }

    /// Record the loop task and move to `Listening`.
    pub(crate) async fn confirm_started(&self, task: JoinHandle<()>) {
        let mut inner = self.inner.lock().await;
        inner.task = Some(task);
        inner.state = ListenerState::Listening;
    }

    /// Roll back a failed start so the listener can be started again.
    pub(crate) async fn abort_start(&self) {
        let mut inner = self.inner.lock().await;
        inner.state = ListenerState::Stopped;
    }

    /// Cancel the shutdown token, await the loop task, and settle in
    /// `Stopped`.
    pub(crate) async fn stop(&self) {
        let task = {
            let mut inner = self.inner.lock().await;
            if inner.state == ListenerState::Stopped {
                return;
            }
            inner.state = ListenerState::Stopping;
            inner.shutdown.cancel();
            inner.task.take()
        };

        if let Some(task) = task {
            // The loop ends by observing the cancelled token; a join error
            // only means the task was already torn down.
            if let Err(e) = task.await {
                debug!(service = %self.name, error = %e, "Listener task ended abruptly");
            }
        }

        self.inner.lock().await.state = ListenerState::Stopped;
        info!(service = %self.name, "Listener stopped");
    }

    #[cfg(test)]
    pub(crate) async fn state(&self) -> ListenerState {
        self.inner.lock().await.state
    }
}

/// Sleep for an endpoint's configured delay.
///
/// Returns `false` when shutdown wins the race, in which case the caller
/// must not write the response.
pub(crate) async fn apply_delay(delay_ms: u64, shutdown: &CancellationToken) -> bool {
    if delay_ms == 0 {
        return true;
    }
    tokio::select! {
        _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => true,
        _ = shutdown.cancelled() => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_lifecycle_start_stop_cycle() {
        let lifecycle = ListenerLifecycle::new("svc");
        assert_eq!(lifecycle.state().await, ListenerState::Stopped);

        let token = lifecycle.begin_start().await.expect("fresh start");
        assert_eq!(lifecycle.state().await, ListenerState::Starting);

        let loop_token = token.clone();
        let task = tokio::spawn(async move { loop_token.cancelled().await });
        lifecycle.confirm_started(task).await;
        assert_eq!(lifecycle.state().await, ListenerState::Listening);

        lifecycle.stop().await;
        assert_eq!(lifecycle.state().await, ListenerState::Stopped);
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_lifecycle_double_start_is_rejected() {
        let lifecycle = ListenerLifecycle::new("svc");
        let token = lifecycle.begin_start().await.unwrap();
        let loop_token = token.clone();
        lifecycle
            .confirm_started(tokio::spawn(async move { loop_token.cancelled().await }))
            .await;

        assert!(lifecycle.begin_start().await.is_none());
        assert_eq!(lifecycle.state().await, ListenerState::Listening);

        lifecycle.stop().await;
    }

    #[tokio::test]
    async fn test_lifecycle_stop_when_stopped_is_noop() {
        let lifecycle = ListenerLifecycle::new("svc");
        lifecycle.stop().await;
        assert_eq!(lifecycle.state().await, ListenerState::Stopped);
    }

    #[tokio::test]
    async fn test_lifecycle_abort_start_allows_retry() {
        let lifecycle = ListenerLifecycle::new("svc");
        assert!(lifecycle.begin_start().await.is_some());
        lifecycle.abort_start().await;
        assert!(lifecycle.begin_start().await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_apply_delay_waits_the_configured_time() {
        let token = CancellationToken::new();
        let started = tokio::time::Instant::now();
        assert!(apply_delay(250, &token).await);
        assert_eq!(started.elapsed(), Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_apply_delay_zero_completes_immediately() {
        let token = CancellationToken::new();
        assert!(apply_delay(0, &token).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_apply_delay_interrupted_by_shutdown() {
        let token = CancellationToken::new();
        let racer = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            racer.cancel();
        });
        assert!(!apply_delay(60_000, &token).await);
    }

    #[tokio::test]
    async fn test_build_listener_rejects_invalid_service() {
        let service: ServiceConfig = serde_json::from_value(json!({
            "type": "TCP",
            "name": "",
            "port": 9000
        }))
        .unwrap();

        let err = build_listener(service).err().unwrap();
        assert!(matches!(err, MockError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_build_listener_constructs_each_transport() {
        for (kind, port) in [("REST", json!(0)), ("SOAP", json!(0)), ("TCP", json!(0)), ("COM", json!(3))] {
            let service: ServiceConfig = serde_json::from_value(json!({
                "type": kind,
                "name": format!("{}-svc", kind.to_lowercase()),
                "port": port,
                "endpoints": []
            }))
            .unwrap();
            let listener = build_listener(service).unwrap();
            assert!(listener.service_name().ends_with("-svc"));
        }
    }
}
