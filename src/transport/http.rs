//! HTTP transport.
//!
//! Serves REST and SOAP services over hyper. Each accepted connection gets
//! its own task; the accept loop runs until the shutdown token fires.

use super::{apply_delay, Listener, ListenerLifecycle};
use crate::config::{ServiceConfig, TransportKind};
use crate::context;
use crate::engine::ResponseEngine;
use crate::error::MockError;
use crate::matcher::Matcher;
use async_trait::async_trait;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const SOAP_CONTENT_TYPE: &str = "text/xml; charset=utf-8";

struct HttpShared {
    service: ServiceConfig,
    matcher: Matcher,
    engine: ResponseEngine,
}

/// Listener for REST and SOAP services.
pub struct HttpListener {
    shared: Arc<HttpShared>,
    lifecycle: ListenerLifecycle,
    bound: RwLock<Option<SocketAddr>>,
}

impl HttpListener {
    pub fn new(service: ServiceConfig) -> Self {
        let matcher = Matcher::new(&service);
        Self {
            lifecycle: ListenerLifecycle::new(service.name.clone()),
            shared: Arc::new(HttpShared {
                service,
                matcher,
                engine: ResponseEngine::new(),
            }),
            bound: RwLock::new(None),
        }
    }

    /// Address the socket is actually bound to, once started. Useful when
    /// the service is configured with port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.bound.read().ok().and_then(|guard| *guard)
    }
}

#[async_trait]
impl Listener for HttpListener {
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
                            Ok((stream, _)) => {
                                let io = TokioIo::new(stream);
                                let shared = Arc::clone(&shared);
                                let shutdown = loop_shutdown.clone();
                                let name = shared.service.name.clone();
                                tokio::spawn(async move {
                                    let service = service_fn(move |req| {
                                        let shared = Arc::clone(&shared);
                                        let shutdown = shutdown.clone();
                                        async move { handle_request(shared, shutdown, req).await }
                                    });
                                    if let Err(e) =
                                        http1::Builder::new().serve_connection(io, service).await
                                    {
                                        debug!(service = %name, error = %e, "Connection error");
                                    }
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
            kind = %self.shared.service.transport,
            port = port,
            "HTTP listener ready"
        );
        Ok(())
    }

    async fn stop(&self) {
        self.lifecycle.stop().await;
    }
}

async fn handle_request(
    shared: Arc<HttpShared>,
    shutdown: CancellationToken,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let method = req.method().as_str().to_string();
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(|q| q.to_string());
    let headers: HashMap<String, String> = req
        .headers()
        .iter()
        .map(|(k, v)| (k.as_str().to_string(), v.to_str().unwrap_or("").to_string()))
        .collect();

    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!(service = %shared.service.name, error = %e, "Failed to read request body");
            return Ok(empty_response(StatusCode::BAD_REQUEST));
        }
    };
    let body_text = String::from_utf8_lossy(&body).into_owned();

    Ok(respond(&shared, &shutdown, &method, &path, query.as_deref(), &headers, &body_text).await)
}

/// Build the response for one parsed request.
async fn respond(
    shared: &HttpShared,
    shutdown: &CancellationToken,
    method: &str,
    path: &str,
    query: Option<&str>,
    headers: &HashMap<String, String>,
    body: &str,
) -> Response<Full<Bytes>> {
    let endpoint = match shared
        .matcher
        .match_request(&shared.service.endpoints, method, path)
    {
        Some(endpoint) => endpoint,
        None => {
            debug!(
                service = %shared.service.name,
                method = %method,
                path = %path,
                "No endpoint matched, returning 404"
            );
            return empty_response(StatusCode::NOT_FOUND);
        }
    };

    if !apply_delay(endpoint.delay_ms, shutdown).await {
        return empty_response(StatusCode::SERVICE_UNAVAILABLE);
    }

    let soap = shared.service.transport == TransportKind::Soap;
    let context = context::http_context(method, path, query, headers, body, soap);

    let wire = match shared.engine.synthesize(endpoint.response_spec(), &context) {
        Ok(wire) => wire,
        Err(e) => {
            warn!(
                service = %shared.service.name,
                method = %method,
                path = %path,
                error = %e,
                "Failed to build response"
            );
            return empty_response(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    let status =
        StatusCode::from_u16(endpoint.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut builder = Response::builder().status(status);
    for (name, value) in &endpoint.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    if soap && !has_header(&endpoint.headers, "content-type") {
        builder = builder.header("Content-Type", SOAP_CONTENT_TYPE);
    }

    let body = wire.map(Bytes::from).unwrap_or_default();
    match builder.body(Full::new(body)) {
        Ok(response) => response,
        Err(e) => {
            warn!(service = %shared.service.name, error = %e, "Invalid response metadata");
            empty_response(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

fn has_header(headers: &HashMap<String, String>, name: &str) -> bool {
    headers.keys().any(|k| k.eq_ignore_ascii_case(name))
}

fn empty_response(status: StatusCode) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::new()))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())))
}
