//! Template engine for dynamic responses.
//!
//! Uses Handlebars for directive expansion against the request context.
//! String bodies are expanded as raw template text; structured bodies are
//! serialized to JSON, expanded, and parsed back. After expansion, string
//! leaves that look like embedded JSON are rehydrated into real structure.

use crate::error::MockError;
use crate::value::{self, Value};
use handlebars::Handlebars;
use tracing::warn;

/// Template engine for rendering response bodies.
pub struct TemplateEngine {
    handlebars: Handlebars<'static>,
}

impl TemplateEngine {
    /// Create a new template engine.
    pub fn new() -> Self {
        let mut handlebars = Handlebars::new();

        // Register custom helpers
        handlebars.register_helper("json", Box::new(json_helper));
        handlebars.register_helper("uuid", Box::new(uuid_helper));
        handlebars.register_helper("now", Box::new(now_helper));
        handlebars.register_helper("random", Box::new(random_helper));
        handlebars.register_helper("default", Box::new(default_helper));
        handlebars.register_helper("upper", Box::new(upper_helper));
        handlebars.register_helper("lower", Box::new(lower_helper));

        // Don't escape HTML (bodies are JSON, XML, or plain text)
        handlebars.register_escape_fn(handlebars::no_escape);

        Self { handlebars }
    }

    /// Render a response body against a request context.
    ///
    /// Expansion failures never propagate: the body is returned unrendered
    /// and the failure is logged. Successful output is rehydrated so string
    /// leaves holding JSON text come back as structure.
    pub fn render(&self, body: &Value, context: &Value) -> Value {
        match self.expand_value(body, context) {
            Ok(rendered) => rehydrate(rendered),
            Err(e) => {
                warn!(error = %e, "Returning response body unrendered");
                body.clone()
            }
        }
    }

    fn expand_value(&self, body: &Value, context: &Value) -> Result<Value, MockError> {
        match body {
            // A bare string is the template text itself, kept raw so XML and
            // plain text are not JSON-quoted on the way through.
            Value::String(template) => Ok(Value::String(self.expand(template, context)?)),
            structured => {
                let expanded = self.expand(&structured.to_string(), context)?;
                serde_json::from_str(&expanded).map_err(|e| {
                    MockError::Template(format!("expanded body is not valid JSON: {}", e))
                })
            }
        }
    }

    fn expand(&self, template: &str, context: &Value) -> Result<String, MockError> {
        // Check if it contains template syntax
        if !template.contains("{{") {
            return Ok(template.to_string());
        }
        self.handlebars
            .render_template(template, context)
            .map_err(|e| MockError::Template(e.to_string()))
    }
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Recursively reparse string leaves whose trimmed text starts with `{` or
/// `[`. A successfully parsed leaf is walked again so nested encodings
/// unfold fully; leaves that fail to parse stay plain text.
pub fn rehydrate(value: Value) -> Value {
    match value {
        Value::String(text) => {
            if value::looks_structured(&text) {
                match value::try_parse(&text) {
                    Some(parsed) => rehydrate(parsed),
                    None => Value::String(text),
                }
            } else {
                Value::String(text)
            }
        }
        Value::Array(items) => Value::Array(items.into_iter().map(rehydrate).collect()),
        Value::Object(map) => {
            Value::Object(map.into_iter().map(|(k, v)| (k, rehydrate(v))).collect())
        }
        other => other,
    }
}

// Custom Handlebars helpers

fn json_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let value = h.param(0).map(|v| v.value().clone()).unwrap_or(Value::Null);
    out.write(&value.to_string())?;
    Ok(())
}

fn uuid_helper(
    _: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let uuid = format!(
        "{:08x}-{:04x}-4{:03x}-{:04x}-{:012x}",
        rng.gen::<u32>(),
        rng.gen::<u16>(),
        rng.gen::<u16>() & 0x0fff,
        (rng.gen::<u16>() & 0x3fff) | 0x8000,
        rng.gen::<u64>() & 0xffffffffffff,
    );
    out.write(&uuid)?;
    Ok(())
}

fn now_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    use chrono::Utc;

    let format = h
        .param(0)
        .and_then(|v| v.value().as_str())
        .unwrap_or("%Y-%m-%dT%H:%M:%S%.3fZ");

    let now = Utc::now();
    out.write(&now.format(format).to_string())?;
    Ok(())
}

fn random_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    use rand::Rng;

    let min = h.param(0).and_then(|v| v.value().as_i64()).unwrap_or(0);
    let max = h.param(1).and_then(|v| v.value().as_i64()).unwrap_or(100);

    let mut rng = rand::thread_rng();
    let value = rng.gen_range(min..=max);
    out.write(&value.to_string())?;
    Ok(())
}

fn default_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let value = h.param(0).map(|v| v.value());
    let default = h.param(1).and_then(|v| v.value().as_str()).unwrap_or("");

    match value {
        Some(v) if !v.is_null() => {
            if let Some(s) = v.as_str() {
                if !s.is_empty() {
                    out.write(s)?;
                    return Ok(());
                }
            } else {
                out.write(&v.to_string())?;
                return Ok(());
            }
        }
        _ => {}
    }

    out.write(default)?;
    Ok(())
}

fn upper_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let value = h.param(0).and_then(|v| v.value().as_str()).unwrap_or("");
    out.write(&value.to_uppercase())?;
    Ok(())
}

fn lower_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let value = h.param(0).and_then(|v| v.value().as_str()).unwrap_or("");
    out.write(&value.to_lowercase())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context() -> Value {
        json!({
            "request": {
                "method": "GET",
                "path": "/api/users",
                "query": {"page": "2", "name": "ada"},
                "captures": {"command": "SET", "key": "mode"},
                "parsedMessage": {"items": [1, 2, 3]}
            }
        })
    }

    #[test]
    fn test_bare_string_expansion() {
        let engine = TemplateEngine::new();
        let body = json!("ACK {{request.captures.command}} {{request.captures.key}}");

        let rendered = engine.render(&body, &context());
        assert_eq!(rendered, json!("ACK SET mode"));
    }

    #[test]
    fn test_structured_body_expansion() {
        let engine = TemplateEngine::new();
        let body = json!({
            "page": "{{request.query.page}}",
            "greeting": "hello {{request.query.name}}",
            "static": 7
        });

        let rendered = engine.render(&body, &context());
        assert_eq!(rendered["page"], "2");
        assert_eq!(rendered["greeting"], "hello ada");
        assert_eq!(rendered["static"], 7);
    }

    #[test]
    fn test_string_body_rehydrates_to_array() {
        let engine = TemplateEngine::new();
        let body = json!("[1,2,3]");

        let rendered = engine.render(&body, &context());
        assert_eq!(rendered, json!([1, 2, 3]));
    }

    #[test]
    fn test_rehydration_is_recursive() {
        let engine = TemplateEngine::new();
        let body = json!({"payload": "{\"inner\": \"[1,2]\"}"});

        let rendered = engine.render(&body, &context());
        assert_eq!(rendered["payload"]["inner"], json!([1, 2]));
    }

    #[test]
    fn test_non_json_string_leaf_stays_text() {
        let engine = TemplateEngine::new();
        let body = json!({"note": "{not json", "plain": "hello"});

        let rendered = engine.render(&body, &context());
        assert_eq!(rendered["note"], "{not json");
        assert_eq!(rendered["plain"], "hello");
    }

    #[test]
    fn test_expansion_failure_returns_original() {
        let engine = TemplateEngine::new();
        let body = json!("{{#each}}broken");

        let rendered = engine.render(&body, &context());
        assert_eq!(rendered, body);
    }

    #[test]
    fn test_unparseable_expansion_returns_original() {
        let engine = TemplateEngine::new();
        // The interpolated quote corrupts the serialized JSON text.
        let ctx = json!({"request": {"message": "he said \"hi\""}});
        let body = json!({"echo": "{{request.message}}"});

        let rendered = engine.render(&body, &ctx);
        assert_eq!(rendered, body);
    }

    #[test]
    fn test_each_iteration_over_context_array() {
        let engine = TemplateEngine::new();
        let body = json!("{{#each request.parsedMessage.items}}{{this}};{{/each}}");

        let rendered = engine.render(&body, &context());
        assert_eq!(rendered, json!("1;2;3;"));
    }

    #[test]
    fn test_uuid_helper() {
        let engine = TemplateEngine::new();
        let rendered = engine.render(&json!("{{uuid}}"), &context());

        // UUID format: xxxxxxxx-xxxx-4xxx-xxxx-xxxxxxxxxxxx
        let uuid = rendered.as_str().unwrap();
        assert_eq!(uuid.len(), 36);
        assert_eq!(uuid.chars().nth(8), Some('-'));
        assert_eq!(uuid.chars().nth(14), Some('4'));
    }

    #[test]
    fn test_now_helper_custom_format() {
        let engine = TemplateEngine::new();
        let rendered = engine.render(&json!("{{now \"%Y\"}}"), &context());

        let year = rendered.as_str().unwrap();
        assert_eq!(year.len(), 4);
        assert!(year.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_random_helper_in_range() {
        let engine = TemplateEngine::new();
        let rendered = engine.render(&json!("{{random 5 9}}"), &context());

        let n: i64 = rendered.as_str().unwrap().parse().unwrap();
        assert!((5..=9).contains(&n));
    }

    #[test]
    fn test_default_helper() {
        let engine = TemplateEngine::new();
        let rendered = engine.render(
            &json!("{{default request.query.missing \"fallback\"}}"),
            &context(),
        );
        assert_eq!(rendered, json!("fallback"));

        let rendered = engine.render(
            &json!("{{default request.query.page \"fallback\"}}"),
            &context(),
        );
        assert_eq!(rendered, json!("2"));
    }

    #[test]
    fn test_upper_lower_helpers() {
        let engine = TemplateEngine::new();
        let rendered = engine.render(
            &json!("{{upper request.query.name}}/{{lower request.captures.command}}"),
            &context(),
        );
        assert_eq!(rendered, json!("ADA/set"));
    }

    #[test]
    fn test_json_helper_embeds_context_value() {
        let engine = TemplateEngine::new();
        let body = json!("{{json request.parsedMessage}}");

        let rendered = engine.render(&body, &context());
        // The embedded JSON text rehydrates into structure.
        assert_eq!(rendered, json!({"items": [1, 2, 3]}));
    }
}
