//! Error taxonomy for service construction and request handling.

use thiserror::Error;

/// Errors raised while building services and serving traffic.
///
/// Per-request failures (`Validation`, `Resource`, `Template`, `Transport`)
/// are isolated to the request or message that triggered them; the owning
/// listener keeps running. `Configuration` is fatal to a single service,
/// and a `Resource` failure during serial startup is fatal to that listener.
#[derive(Debug, Error)]
pub enum MockError {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Invalid response spec: {0}")]
    Validation(String),

    #[error("Resource unavailable: {0}")]
    Resource(String),

    #[error("Template expansion failed: {0}")]
    Template(String),

    #[error("Transport failure: {0}")]
    Transport(String),
}

impl MockError {
    /// Whether this error may abort a whole service rather than one request.
    pub fn is_startup_fatal(&self) -> bool {
        matches!(self, MockError::Configuration(_) | MockError::Resource(_))
    }
}
