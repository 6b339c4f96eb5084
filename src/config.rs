//! Service and endpoint configuration.
//!
//! Defines the declarative endpoint table consumed from a JSON config file:
//! one entry per impersonated service, each carrying an ordered endpoint
//! list with matchers, response bodies, and delays.

use crate::error::MockError;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

/// Load service definitions from a JSON config file.
///
/// A file that cannot be read or parsed is fatal to startup; per-service
/// problems are reported later by [`ServiceConfig::validate`] so one bad
/// service does not block the others.
pub fn load_services(path: &Path) -> anyhow::Result<Vec<ServiceConfig>> {
    let content = std::fs::read_to_string(path)?;
    let services: Vec<ServiceConfig> = serde_json::from_str(&content)?;
    Ok(services)
}

/// One impersonated service: a transport, a port, and its endpoint table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    /// Transport flavor
    #[serde(rename = "type")]
    pub transport: TransportKind,

    /// Service name used in logs
    pub name: String,

    /// TCP port for socket transports, device number or path for COM
    pub port: PortValue,

    /// Ordered endpoint table; list order is the sole matching tie-break
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,
}

impl ServiceConfig {
    /// Validate this service definition.
    pub fn validate(&self) -> Result<(), MockError> {
        if self.name.is_empty() {
            return Err(MockError::Configuration(
                "service name cannot be empty".to_string(),
            ));
        }

        if self.transport != TransportKind::Com && self.port.number().is_none() {
            return Err(MockError::Configuration(format!(
                "service '{}': {} transport requires a numeric port",
                self.name, self.transport
            )));
        }

        for (i, endpoint) in self.endpoints.iter().enumerate() {
            endpoint.validate(self.transport).map_err(|e| {
                MockError::Configuration(format!(
                    "service '{}' endpoint {}: {}",
                    self.name, i, e
                ))
            })?;
        }

        Ok(())
    }
}

/// Transport flavor of one service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransportKind {
    Rest,
    Tcp,
    Soap,
    Com,
}

impl TransportKind {
    /// Whether this transport matches requests by method and path.
    pub fn is_http(&self) -> bool {
        matches!(self, TransportKind::Rest | TransportKind::Soap)
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportKind::Rest => "REST",
            TransportKind::Tcp => "TCP",
            TransportKind::Soap => "SOAP",
            TransportKind::Com => "COM",
        };
        write!(f, "{}", name)
    }
}

/// Service port: numeric for socket transports, free-form for serial devices.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PortValue {
    Number(u16),
    Name(String),
}

impl PortValue {
    /// Numeric port, `None` for non-numeric device names.
    pub fn number(&self) -> Option<u16> {
        match self {
            PortValue::Number(n) => Some(*n),
            PortValue::Name(name) => name.parse().ok(),
        }
    }

    /// Serial device path: a numeric value N binds "COM{N}", anything else
    /// is used verbatim.
    pub fn device_name(&self) -> String {
        match self {
            PortValue::Number(n) => format!("COM{}", n),
            PortValue::Name(name) => match name.parse::<u16>() {
                Ok(n) => format!("COM{}", n),
                Err(_) => name.clone(),
            },
        }
    }
}

impl fmt::Display for PortValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortValue::Number(n) => write!(f, "{}", n),
            PortValue::Name(name) => write!(f, "{}", name),
        }
    }
}

/// One configured matcher plus the recipe for its response.
///
/// HTTP-like services match on `path` + `method`; message-oriented services
/// match on `pattern`. The response is an inline body, a file-backed body,
/// or (COM only) an ordered list of delayed sequential responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EndpointConfig {
    /// Request path, matched case-insensitively (HTTP-like services)
    #[serde(default)]
    pub path: Option<String>,

    /// HTTP method, matched case-insensitively (HTTP-like services)
    #[serde(default)]
    pub method: Option<String>,

    /// Regex searched case-insensitively over inbound messages (TCP/COM)
    #[serde(default)]
    pub pattern: Option<String>,

    /// Response status code (HTTP-like services)
    #[serde(default = "default_status")]
    pub status_code: u16,

    /// Response headers (HTTP-like services)
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Inline response body
    #[serde(default)]
    pub response_body: Option<Value>,

    /// Path to a file holding the response body
    #[serde(default)]
    pub response_body_file_path: Option<String>,

    /// Ordered delayed responses (COM services only)
    #[serde(default)]
    pub responses: Vec<SequentialResponse>,

    /// Delay before responding, in milliseconds
    #[serde(default)]
    pub delay_ms: u64,
}

fn default_status() -> u16 {
    200
}

impl EndpointConfig {
    /// The single-response specification carried by this endpoint.
    pub fn response_spec(&self) -> ResponseSpec<'_> {
        ResponseSpec {
            inline: self.response_body.as_ref(),
            file_path: self.response_body_file_path.as_deref(),
        }
    }

    fn validate(&self, transport: TransportKind) -> Result<(), String> {
        if self.status_code < 100 || self.status_code > 599 {
            return Err(format!("invalid status code: {}", self.status_code));
        }

        if self.response_body.is_some() && self.response_body_file_path.is_some() {
            return Err(
                "responseBody and responseBodyFilePath are mutually exclusive".to_string(),
            );
        }

        if !self.responses.is_empty() {
            if transport != TransportKind::Com {
                return Err(format!(
                    "sequential responses are not supported on {} services",
                    transport
                ));
            }
            if self.response_body.is_some() || self.response_body_file_path.is_some() {
                return Err(
                    "an endpoint with sequential responses cannot also carry its own body"
                        .to_string(),
                );
            }
            for (i, step) in self.responses.iter().enumerate() {
                if step.response_body.is_some() && step.response_body_file_path.is_some() {
                    return Err(format!(
                        "response {}: responseBody and responseBodyFilePath are mutually exclusive",
                        i
                    ));
                }
            }
        }

        Ok(())
    }
}

/// One step of an ordered multi-message reply (COM services).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SequentialResponse {
    /// Inline response body
    #[serde(default)]
    pub response_body: Option<Value>,

    /// Path to a file holding the response body
    #[serde(default)]
    pub response_body_file_path: Option<String>,

    /// Delay before this step, independent of the other steps
    #[serde(default)]
    pub delay_ms: u64,
}

impl SequentialResponse {
    /// The response specification carried by this step.
    pub fn response_spec(&self) -> ResponseSpec<'_> {
        ResponseSpec {
            inline: self.response_body.as_ref(),
            file_path: self.response_body_file_path.as_deref(),
        }
    }
}

/// Borrowed view of one response specification.
///
/// At most one of `inline`/`file_path` may be present; the response body
/// resolver rejects specs carrying both.
#[derive(Debug, Clone, Copy)]
pub struct ResponseSpec<'a> {
    pub inline: Option<&'a Value>,
    pub file_path: Option<&'a str>,
}
