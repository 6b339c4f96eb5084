//! Response synthesis.
//!
//! Chains body resolution, template rendering, and wire serialization into
//! the single entry point the transport listeners call.

use crate::config::ResponseSpec;
use crate::error::MockError;
use crate::response;
use crate::template::TemplateEngine;
use crate::value::{self, Value};

/// Resolves, renders, and serializes response bodies.
pub struct ResponseEngine {
    templates: TemplateEngine,
}

impl ResponseEngine {
    pub fn new() -> Self {
        Self {
            templates: TemplateEngine::new(),
        }
    }

    /// Produce the wire text for one response spec.
    ///
    /// Returns `Ok(None)` when the spec carries no body at all, in which
    /// case the caller sends nothing. Rendering failures degrade inside
    /// [`TemplateEngine::render`] and never surface here; resolution
    /// failures abort the response.
    pub fn synthesize(
        &self,
        spec: ResponseSpec<'_>,
        context: &Value,
    ) -> Result<Option<String>, MockError> {
        let body = match response::resolve(spec)? {
            Some(body) => body,
            None => return Ok(None),
        };
        let rendered = self.templates.render(&body, context);
        Ok(Some(value::to_wire_text(&rendered)))
    }
}

impl Default for ResponseEngine {
    fn default() -> Self {
        Self::new()
    }
}
