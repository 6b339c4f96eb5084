//! Ordered delayed response delivery for the serial transport.
//!
//! Each sequence step awaits its own delay, then writes under the same
//! port lock used by single responses, so a running sequence never
//! interleaves with another handler's output.

use super::apply_delay;
use super::serial::{write_message, SharedPort};
use crate::config::SequentialResponse;
use crate::engine::ResponseEngine;
use crate::value::Value;
use tokio::io::AsyncWrite;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Deliver one endpoint's sequence for one inbound message.
///
/// A step that fails to resolve or render is logged and skipped; the
/// sequence continues with the next step. Shutdown during a step's delay
/// abandons the remainder.
pub(super) async fn deliver<W>(
    service: &str,
    steps: &[SequentialResponse],
    context: &Value,
    engine: &ResponseEngine,
    port: &Mutex<SharedPort<W>>,
    shutdown: &CancellationToken,
) where
    W: AsyncWrite + Unpin + Send,
{
    for (index, step) in steps.iter().enumerate() {
        if !apply_delay(step.delay_ms, shutdown).await {
            return;
        }
        let text = match engine.synthesize(step.response_spec(), context) {
            Ok(Some(text)) => text,
            Ok(None) => continue,
            Err(e) => {
                warn!(
                    service = %service,
                    step = index,
                    error = %e,
                    "Skipping sequence step"
                );
                continue;
            }
        };
        write_message(service, port, &text, shutdown).await;
    }
}
