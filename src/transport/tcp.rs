//! Raw TCP transport.
//!
//! One message per connection: a single bounded read, message-mode endpoint
//! matching, one raw write, then the connection is closed. Connections are
//! never kept alive for further messages.

use super::{apply_delay, Listener, ListenerLifecycle};
use crate::config::ServiceConfig;
use crate::context;
use crate::engine::ResponseEngine;
use crate::error::MockError;
use crate::matcher::Matcher;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Upper bound for a single inbound message.
const READ_BUFFER_SIZE: usize = 64 * 1024;

struct TcpShared {
    service: ServiceConfig,
    matcher: Matcher,
    engine: ResponseEngine,
}

/// Listener for raw TCP services.
pub struct RawTcpListener {
    shared: Arc<TcpShared>,
    lifecycle: ListenerLifecycle,
    bound: RwLock<Option<SocketAddr>>,
}

impl RawTcpListener {
    pub fn new(service: ServiceConfig) -> Self {
        let matcher = Matcher::new(&service);
        Self {
            lifecycle: ListenerLifecycle::new(service.name.clone()),
            shared: Arc::new(TcpShared {
                service,
                matcher,
                engine: ResponseEngine::new(),
            }),
            bound: RwLock::new(None),
        }
    }

    /// Address the socket is actually bound to, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.bound.read().ok().and_then(|guard| *guard)
    }
}

#[async_trait]
impl Listener for RawTcpListener {
    fn service_name(&self) -> &str {
        &self.shared.service.name
    }

    async fn start(&self) -> Result<(), MockError> {
        let Some(shutdown) = self.lifecycle.begin_start().await else {
            return Ok(());
        };

        let port = match self.shared.service.port.number() {
            Some(port) => port,
            None => {
                self.lifecycle.abort_start().await;
                return Err(MockError::Configuration(format!(
                    "service '{}' needs a numeric port",
                    self.shared.service.name
                )));
            }
        };

        let listener = match TcpListener::bind(("0.0.0.0", port)).await {
            Ok(listener) => listener,
            Err(e) => {
                self.lifecycle.abort_start().await;
                return Err(MockError::Transport(format!(
                    "failed to bind port {}: {}",
                    port, e
                )));
            }
        };
        if let Ok(addr) = listener.local_addr() {
            if let Ok(mut guard) = self.bound.write() {
                *guard = Some(addr);
            }
        }

        let shared = Arc::clone(&self.shared);
        let loop_shutdown = shutdown.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, peer)) => {
                                let shared = Arc::clone(&shared);
                                let shutdown = loop_shutdown.clone();
                                tokio::spawn(async move {
                                    handle_connection(shared, shutdown, stream, peer).await;
                                });
                            }
                            Err(e) => {
                                error!(service = %shared.service.name, error = %e, "Accept error");
                            }
                        }
                    }
                    _ = loop_shutdown.cancelled() => break,
                }
            }
        });

        self.lifecycle.confirm_started(task).await;
        info!(
            service = %self.shared.service.name,
            port = port,
            "TCP listener ready"
        );
        Ok(())
    }

    async fn stop(&self) {
        self.lifecycle.stop().await;
    }
}

async fn handle_connection(
    shared: Arc<TcpShared>,
    shutdown: CancellationToken,
    mut stream: TcpStream,
    peer: SocketAddr,
) {
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    let read = match stream.read(&mut buffer).await {
        Ok(0) => return,
        Ok(n) => n,
        Err(e) => {
            warn!(service = %shared.service.name, client = %peer, error = %e, "Read error");
            return;
        }
    };
    let message = String::from_utf8_lossy(&buffer[..read]).into_owned();

    if let Some(reply) = build_reply(&shared, &shutdown, &message, peer).await {
        if let Err(e) = stream.write_all(reply.as_bytes()).await {
            if !shutdown.is_cancelled() {
                warn!(service = %shared.service.name, client = %peer, error = %e, "Write error");
            }
        }
    }
    // Dropping the stream closes the connection.
}

/// Resolve and render the reply for one inbound message.
///
/// Returns `None` when the message is dropped: no endpoint, shutdown during
/// the delay, a bodyless endpoint, or a failed body resolution.
async fn build_reply(
    shared: &TcpShared,
    shutdown: &CancellationToken,
    message: &str,
    peer: SocketAddr,
) -> Option<String> {
    let matched = match shared
        .matcher
        .match_message(&shared.service.endpoints, message)
    {
        Some(matched) => matched,
        None => {
            debug!(
                service = %shared.service.name,
                client = %peer,
                "No endpoint for message, dropping"
            );
            return None;
        }
    };

    if !apply_delay(matched.endpoint.delay_ms, shutdown).await {
        return None;
    }

    let context = context::message_context(message, matched.captures.as_ref(), Some(peer));

    match shared
        .engine
        .synthesize(matched.endpoint.response_spec(), &context)
    {
        Ok(reply) => reply,
        Err(e) => {
            warn!(
                service = %shared.service.name,
                client = %peer,
                error = %e,
                "Dropping message"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn shared_for(config: serde_json::Value) -> TcpShared {
        let service: ServiceConfig = serde_json::from_value(config).unwrap();
        let matcher = Matcher::new(&service);
        TcpShared {
            service,
            matcher,
            engine: ResponseEngine::new(),
        }
    }

    fn peer() -> SocketAddr {
        "192.0.2.7:49152".parse().unwrap()
    }

    #[tokio::test]
    async fn test_build_reply_uses_pattern_captures() {
        let shared = shared_for(json!({
            "type": "TCP",
            "name": "kv",
            "port": 0,
            "endpoints": [{
                "pattern": "CMD:(?<command>\\w+)\\s+KEY:(?<key>\\w+)",
                "responseBody": "OK {{request.captures.command}}/{{request.captures.key}}"
            }]
        }));
        let shutdown = CancellationToken::new();

        let reply = build_reply(&shared, &shutdown, "CMD:SET KEY:username", peer())
            .await
            .unwrap();
        assert_eq!(reply, "OK SET/username");
    }

    #[tokio::test]
    async fn test_build_reply_falls_back_to_first_endpoint() {
        let shared = shared_for(json!({
            "type": "TCP",
            "name": "kv",
            "port": 0,
            "endpoints": [
                {"responseBody": "DEFAULT"},
                {"pattern": "PING", "responseBody": "PONG"}
            ]
        }));
        let shutdown = CancellationToken::new();

        let reply = build_reply(&shared, &shutdown, "UNKNOWN VERB", peer())
            .await
            .unwrap();
        assert_eq!(reply, "DEFAULT");
    }

    #[tokio::test]
    async fn test_build_reply_without_endpoints_drops_message() {
        let shared = shared_for(json!({
            "type": "TCP",
            "name": "mute",
            "port": 0,
            "endpoints": []
        }));
        let shutdown = CancellationToken::new();

        assert!(build_reply(&shared, &shutdown, "anything", peer()).await.is_none());
    }

    #[tokio::test]
    async fn test_build_reply_exposes_client_fields() {
        let shared = shared_for(json!({
            "type": "TCP",
            "name": "who",
            "port": 0,
            "endpoints": [{
                "pattern": "WHOAMI",
                "responseBody": "{{request.clientAddress}}:{{request.clientPort}}"
            }]
        }));
        let shutdown = CancellationToken::new();

        let reply = build_reply(&shared, &shutdown, "WHOAMI", peer()).await.unwrap();
        assert_eq!(reply, "192.0.2.7:49152");
    }

    #[tokio::test]
    async fn test_build_reply_missing_file_drops_message() {
        let shared = shared_for(json!({
            "type": "TCP",
            "name": "files",
            "port": 0,
            "endpoints": [{
                "pattern": "GET",
                "responseBodyFilePath": "no/such/reply.txt"
            }]
        }));
        let shutdown = CancellationToken::new();

        assert!(build_reply(&shared, &shutdown, "GET it", peer()).await.is_none());
    }
}
