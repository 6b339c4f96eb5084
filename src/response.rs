//! Response body resolution.
//!
//! Turns one response specification into a value: the inline literal, the
//! contents of a file, or nothing.

use crate::config::ResponseSpec;
use crate::error::MockError;
use crate::value::{self, Value};

/// Resolve a response specification into a body value.
///
/// `Ok(None)` means the endpoint sends nothing. A spec carrying both an
/// inline body and a file path fails validation before any I/O happens; a
/// missing or unreadable file is a resource failure that aborts the current
/// request.
pub fn resolve(spec: ResponseSpec<'_>) -> Result<Option<Value>, MockError> {
    match (spec.inline, spec.file_path) {
        (Some(_), Some(_)) => Err(MockError::Validation(
            "responseBody and responseBodyFilePath are mutually exclusive".to_string(),
        )),
        (Some(inline), None) => Ok(Some(inline.clone())),
        (None, Some(path)) => read_file_body(path).map(Some),
        (None, None) => Ok(None),
    }
}

/// Read a file-backed body, parsing JSON content and keeping anything else
/// as an opaque string. Relative paths resolve against the working directory.
fn read_file_body(path: &str) -> Result<Value, MockError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| MockError::Resource(format!("response file {}: {}", path, e)))?;
    Ok(value::parse_or_string(&content))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn spec<'a>(inline: Option<&'a Value>, file_path: Option<&'a str>) -> ResponseSpec<'a> {
        ResponseSpec { inline, file_path }
    }

    #[test]
    fn test_both_set_is_rejected_before_io() {
        let inline = json!({"a": 1});
        // A nonexistent path: rejection must come from the spec, not the file.
        let err = resolve(spec(Some(&inline), Some("/nonexistent/never-read.json"))).unwrap_err();
        assert!(matches!(err, MockError::Validation(_)));
    }

    #[test]
    fn test_neither_set_means_no_body() {
        assert!(resolve(spec(None, None)).unwrap().is_none());
    }

    #[test]
    fn test_inline_is_used_directly() {
        let inline = json!({"status": "ok", "items": [1, 2]});
        let body = resolve(spec(Some(&inline), None)).unwrap().unwrap();
        assert_eq!(body, inline);
    }

    #[test]
    fn test_file_with_json_content() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"from": "file"}}"#).unwrap();

        let path = file.path().to_str().unwrap().to_string();
        let body = resolve(spec(None, Some(&path))).unwrap().unwrap();
        assert_eq!(body, json!({"from": "file"}));
    }

    #[test]
    fn test_file_with_plain_text_content() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "<soap>payload</soap>").unwrap();

        let path = file.path().to_str().unwrap().to_string();
        let body = resolve(spec(None, Some(&path))).unwrap().unwrap();
        assert_eq!(body, Value::String("<soap>payload</soap>".to_string()));
    }

    #[test]
    fn test_missing_file_is_resource_error() {
        let err = resolve(spec(None, Some("no/such/file.json"))).unwrap_err();
        assert!(matches!(err, MockError::Resource(_)));
    }
}
