//! Mockhost
//!
//! A mock host for backend services that answers over REST, SOAP, raw TCP,
//! and serial COM ports from one declarative endpoint table. Useful for
//! integration testing against services that are unavailable, expensive, or
//! still being built.
//!
//! # Features
//!
//! - **Four Transports**: REST and SOAP over HTTP, raw TCP, and serial/COM
//! - **Endpoint Matching**: Path+method for HTTP, regex with capture groups
//!   for message transports
//! - **Dynamic Templates**: Handlebars bodies rendered against the inbound
//!   request
//! - **XML Bridging**: SOAP request bodies become addressable values in
//!   templates
//! - **Latency Simulation**: Per-endpoint and per-sequence-step delays
//! - **Sequential Responses**: Ordered multi-message replies on serial ports
//!
//! # Example Configuration
//!
//! ```json
//! [
//!   {
//!     "type": "REST",
//!     "name": "user-service",
//!     "port": 8080,
//!     "endpoints": [
//!       {
//!         "path": "/api/users",
//!         "method": "GET",
//!         "statusCode": 200,
//!         "responseBody": { "users": [], "total": 0 }
//!       }
//!     ]
//!   },
//!   {
//!     "type": "TCP",
//!     "name": "device-gateway",
//!     "port": 9000,
//!     "endpoints": [
//!       {
//!         "pattern": "CMD:(?<command>\\w+)",
//!         "responseBody": "OK {{request.captures.command}}"
//!       }
//!     ]
//!   }
//! ]
//! ```

pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod matcher;
pub mod response;
pub mod template;
pub mod transport;
pub mod value;
pub mod xml;

pub use config::{load_services, ServiceConfig};
pub use error::MockError;
pub use transport::{build_listener, Listener};
