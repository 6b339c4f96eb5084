//! Serial (COM) transport.
//!
//! One persistent port for the listener's lifetime. Inbound bytes are
//! framed into line-terminated messages through a lock-protected receive
//! buffer; each framed message is dispatched to a detached handler. All
//! port writes share that same lock, so concurrent handlers never
//! interleave their output bytes.

use super::{apply_delay, sequencer, Listener, ListenerLifecycle};
use crate::config::ServiceConfig;
use crate::context;
use crate::engine::ResponseEngine;
use crate::error::MockError;
use crate::matcher::Matcher;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_serial::SerialPortBuilderExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const BAUD_RATE: u32 = 9600;
const CHUNK_SIZE: usize = 4096;

#[cfg(windows)]
const LINE_TERMINATOR: &str = "\r\n";
#[cfg(not(windows))]
const LINE_TERMINATOR: &str = "\n";

struct SerialShared {
    service: ServiceConfig,
    matcher: Matcher,
    engine: ResponseEngine,
}

/// Rolling accumulator for bytes that arrived off the wire.
#[derive(Default)]
struct ReceiveBuffer {
    data: Vec<u8>,
}

impl ReceiveBuffer {
    fn push(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Extract one framed message if a line terminator has arrived.
    ///
    /// Everything before the first terminator becomes the message and the
    /// whole buffer is cleared, so bytes after the terminator are dropped.
    /// Terminator characters are trimmed from the extracted message.
    fn take_message(&mut self) -> Option<String> {
        let pos = self.data.iter().position(|&b| b == b'\n')?;
        let message = String::from_utf8_lossy(&self.data[..pos])
            .trim_matches(|c| c == '\r' || c == '\n')
            .to_string();
        self.data.clear();
        Some(message)
    }
}

/// The write half of the port plus the receive buffer, guarded by one lock.
pub(super) struct SharedPort<W> {
    writer: W,
    buffer: ReceiveBuffer,
}

impl<W: AsyncWrite + Unpin> SharedPort<W> {
    pub(super) fn new(writer: W) -> Self {
        Self {
            writer,
            buffer: ReceiveBuffer::default(),
        }
    }

    async fn write(&mut self, text: &str) -> std::io::Result<()> {
        self.writer.write_all(text.as_bytes()).await?;
        self.writer.write_all(LINE_TERMINATOR.as_bytes()).await?;
        self.writer.flush().await
    }
}

/// Write one message and its line terminator while holding the port lock.
pub(super) async fn write_message<W>(
    service: &str,
    port: &Mutex<SharedPort<W>>,
    text: &str,
    shutdown: &CancellationToken,
) where
    W: AsyncWrite + Unpin + Send,
{
    let mut port = port.lock().await;
    if let Err(e) = port.write(text).await {
        if !shutdown.is_cancelled() {
            warn!(service = %service, error = %e, "Serial write error");
        }
    }
}

/// Listener for serial COM services.
pub struct SerialListener {
    shared: Arc<SerialShared>,
    lifecycle: ListenerLifecycle,
}

impl SerialListener {
    pub fn new(service: ServiceConfig) -> Self {
        let matcher = Matcher::new(&service);
        Self {
            lifecycle: ListenerLifecycle::new(service.name.clone()),
            shared: Arc::new(SerialShared {
                service,
                matcher,
                engine: ResponseEngine::new(),
            }),
        }
    }
}

#[async_trait]
impl Listener for SerialListener {
    fn service_name(&self) -> &str {
        &self.shared.service.name
    }

    async fn start(&self) -> Result<(), MockError> {
        let Some(shutdown) = self.lifecycle.begin_start().await else {
            return Ok(());
        };

        let device = self.shared.service.port.device_name();
        let stream = match tokio_serial::new(&device, BAUD_RATE).open_native_async() {
            Ok(stream) => stream,
            Err(e) => {
                self.lifecycle.abort_start().await;
                return Err(MockError::Resource(format!(
                    "failed to open serial device {}: {}",
                    device, e
                )));
            }
        };
        let (reader, writer) = tokio::io::split(stream);
        let port = Arc::new(Mutex::new(SharedPort::new(writer)));

        let shared = Arc::clone(&self.shared);
        let loop_shutdown = shutdown.clone();
        let task = tokio::spawn(async move {
            run_read_loop(shared, port, reader, loop_shutdown).await;
        });

        self.lifecycle.confirm_started(task).await;
        info!(
            service = %self.shared.service.name,
            device = %device,
            "Serial listener ready"
        );
        Ok(())
    }

    async fn stop(&self) {
        self.lifecycle.stop().await;
    }
}

/// Pull chunks off the port, frame them, and dispatch detached handlers.
async fn run_read_loop<R, W>(
    shared: Arc<SerialShared>,
    port: Arc<Mutex<SharedPort<W>>>,
    mut reader: R,
    shutdown: CancellationToken,
) where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut chunk = vec![0u8; CHUNK_SIZE];
    loop {
        tokio::select! {
            result = reader.read(&mut chunk) => {
                match result {
                    Ok(0) => {
                        warn!(service = %shared.service.name, "Serial port closed");
                        break;
                    }
                    Ok(n) => {
                        let message = {
                            let mut port = port.lock().await;
                            port.buffer.push(&chunk[..n]);
                            port.buffer.take_message()
                        };
                        if let Some(message) = message {
                            let shared = Arc::clone(&shared);
                            let port = Arc::clone(&port);
                            let shutdown = shutdown.clone();
                            tokio::spawn(async move {
                                dispatch_message(shared, port, message, shutdown).await;
                            });
                        }
                    }
                    Err(e) => {
                        if shutdown.is_cancelled() {
                            break;
                        }
                        error!(service = %shared.service.name, error = %e, "Serial read error");
                        break;
                    }
                }
            }
            _ = shutdown.cancelled() => break,
        }
    }
}

/// Handle one framed message: single delayed response or a sequence.
async fn dispatch_message<W>(
    shared: Arc<SerialShared>,
    port: Arc<Mutex<SharedPort<W>>>,
    message: String,
    shutdown: CancellationToken,
) where
    W: AsyncWrite + Unpin + Send,
{
    let matched = match shared
        .matcher
        .match_message(&shared.service.endpoints, &message)
    {
        Some(matched) => matched,
        None => {
            debug!(service = %shared.service.name, "No endpoint for message, dropping");
            return;
        }
    };
    let context = context::message_context(&message, matched.captures.as_ref(), None);

    if !matched.endpoint.responses.is_empty() {
        sequencer::deliver(
            &shared.service.name,
            &matched.endpoint.responses,
            &context,
            &shared.engine,
            &port,
            &shutdown,
        )
        .await;
        return;
    }

    if !apply_delay(matched.endpoint.delay_ms, &shutdown).await {
        return;
    }
    match shared
        .engine
        .synthesize(matched.endpoint.response_spec(), &context)
    {
        Ok(Some(reply)) => write_message(&shared.service.name, &port, &reply, &shutdown).await,
        Ok(None) => {}
        Err(e) => {
            warn!(service = %shared.service.name, error = %e, "Dropping message");
        }
    }
}
