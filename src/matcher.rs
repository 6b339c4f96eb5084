//! Endpoint resolution.
//!
//! Scans a service's endpoint table in configured order and returns the
//! first match: method + path equality for HTTP-like services, regex search
//! for message-oriented services. List order is the sole tie-break.

use crate::config::{EndpointConfig, ServiceConfig};
use regex::{Regex, RegexBuilder};
use std::collections::HashMap;
use tracing::warn;

/// Result of resolving an inbound message against the endpoint table.
#[derive(Debug)]
pub struct MessageMatch<'a> {
    /// The matched endpoint
    pub endpoint: &'a EndpointConfig,
    /// Regex capture groups, present only when a pattern actually matched
    pub captures: Option<HashMap<String, String>>,
}

/// Endpoint resolver with precompiled message patterns.
pub struct Matcher {
    /// Compiled patterns, index-aligned with the endpoint list. `None` marks
    /// endpoints without a pattern or with a malformed one.
    patterns: Vec<Option<Regex>>,
}

impl Matcher {
    /// Compile the message patterns of a service's endpoint table.
    ///
    /// A malformed pattern is logged and its endpoint skipped during message
    /// matching; construction itself never fails.
    pub fn new(service: &ServiceConfig) -> Self {
        let patterns = service
            .endpoints
            .iter()
            .enumerate()
            .map(|(i, endpoint)| {
                let pattern = endpoint.pattern.as_deref()?;
                match RegexBuilder::new(pattern).case_insensitive(true).build() {
                    Ok(regex) => Some(regex),
                    Err(e) => {
                        warn!(
                            service = %service.name,
                            endpoint = i,
                            pattern = %pattern,
                            error = %e,
                            "Ignoring endpoint with malformed pattern"
                        );
                        None
                    }
                }
            })
            .collect();

        Self { patterns }
    }

    /// Find the first endpoint whose method and path both match the request,
    /// case-insensitively. No fallback: `None` maps to a 404.
    pub fn match_request<'a>(
        &self,
        endpoints: &'a [EndpointConfig],
        method: &str,
        path: &str,
    ) -> Option<&'a EndpointConfig> {
        endpoints.iter().find(|endpoint| {
            let method_ok = endpoint
                .method
                .as_deref()
                .map(|m| m.eq_ignore_ascii_case(method))
                .unwrap_or(false);
            let path_ok = endpoint
                .path
                .as_deref()
                .map(|p| p.eq_ignore_ascii_case(path))
                .unwrap_or(false);
            method_ok && path_ok
        })
    }

    /// Resolve a message against the endpoint table.
    ///
    /// The first endpoint whose pattern matches (unanchored search over the
    /// whole message) wins and yields its captures. When no pattern matches,
    /// the first endpoint in the list is the default; an empty list yields
    /// `None`.
    pub fn match_message<'a>(
        &self,
        endpoints: &'a [EndpointConfig],
        message: &str,
    ) -> Option<MessageMatch<'a>> {
        for (endpoint, pattern) in endpoints.iter().zip(&self.patterns) {
            if let Some(regex) = pattern {
                if let Some(captures) = regex.captures(message) {
                    return Some(MessageMatch {
                        endpoint,
                        captures: Some(extract_captures(regex, &captures)),
                    });
                }
            }
        }

        endpoints.first().map(|endpoint| MessageMatch {
            endpoint,
            captures: None,
        })
    }
}

/// Collect the named groups that matched; when none did, fall back to
/// positional "group{i}" labels (1-indexed). The schemes never mix.
fn extract_captures(regex: &Regex, captures: &regex::Captures<'_>) -> HashMap<String, String> {
    let mut values = HashMap::new();

    for name in regex.capture_names().flatten() {
        if let Some(m) = captures.name(name) {
            values.insert(name.to_string(), m.as_str().to_string());
        }
    }

    if values.is_empty() {
        for (i, group) in captures.iter().enumerate().skip(1) {
            if let Some(m) = group {
                values.insert(format!("group{}", i), m.as_str().to_string());
            }
        }
    }

    values
}
