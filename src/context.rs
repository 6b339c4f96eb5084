//! Request context construction.
//!
//! Builds the per-request value tree exposed to templates, always nested
//! under the single top-level `request` key. The context lives for one
//! request or message and is discarded once the response is written.

use crate::value::{self, Value};
use crate::xml;
use serde_json::{json, Map};
use std::collections::HashMap;
use std::net::SocketAddr;

/// Context for an HTTP-like request.
///
/// SOAP bodies are imported from XML first; both flavors fall back to JSON
/// and then to the raw text.
pub fn http_context(
    method: &str,
    path: &str,
    query: Option<&str>,
    headers: &HashMap<String, String>,
    body: &str,
    soap: bool,
) -> Value {
    let body_value = if body.is_empty() {
        Value::Null
    } else if soap {
        xml::try_parse_xml(body).unwrap_or_else(|| value::parse_or_string(body))
    } else {
        value::parse_or_string(body)
    };

    json!({
        "request": {
            "method": method,
            "path": path,
            "query": parse_query_string(query.unwrap_or("")),
            "headers": headers,
            "body": body_value,
        }
    })
}

/// Context for a message-oriented (TCP/COM) unit of work.
///
/// `captures` is present only when a pattern actually matched; the client
/// address fields are present only for TCP connections.
pub fn message_context(
    message: &str,
    captures: Option<&HashMap<String, String>>,
    client: Option<SocketAddr>,
) -> Value {
    let mut request = Map::new();
    request.insert("message".to_string(), Value::String(message.to_string()));
    request.insert("parsedMessage".to_string(), value::parse_or_string(message));
    request.insert(
        "timestamp".to_string(),
        Value::String(chrono::Utc::now().to_rfc3339()),
    );

    if let Some(captures) = captures {
        request.insert("captures".to_string(), json!(captures));
    }
    if let Some(addr) = client {
        request.insert(
            "clientAddress".to_string(),
            Value::String(addr.ip().to_string()),
        );
        request.insert("clientPort".to_string(), json!(addr.port()));
    }

    let mut context = Map::new();
    context.insert("request".to_string(), Value::Object(request));
    Value::Object(context)
}

/// Parse a query string into key-value pairs.
pub fn parse_query_string(query: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();

    for part in query.split('&') {
        if part.is_empty() {
            continue;
        }
        if let Some((key, value)) = part.split_once('=') {
            params.insert(urlencoding_decode(key), urlencoding_decode(value));
        } else {
            params.insert(urlencoding_decode(part), String::new());
        }
    }

    params
}

/// Simple URL decoding.
fn urlencoding_decode(s: &str) -> String {
    let mut result = String::new();
    let mut chars = s.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '%' {
            let hex: String = chars.by_ref().take(2).collect();
            if hex.len() == 2 {
                if let Ok(byte) = u8::from_str_radix(&hex, 16) {
                    result.push(byte as char);
                    continue;
                }
            }
            result.push('%');
            result.push_str(&hex);
        } else if ch == '+' {
            result.push(' ');
        } else {
            result.push(ch);
        }
    }

    result
}
