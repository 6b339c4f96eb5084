//! XML import for SOAP request bodies.
//!
//! Converts an XML document into the generic value model: attributes become
//! `@`-prefixed keys, repeated sibling elements collapse into arrays, empty
//! elements become empty maps, and text-only elements become strings. Names
//! keep their local part; namespace prefixes and declarations are dropped.

use crate::value::Value;
use serde_json::Map;
use sxd_document::dom::{ChildOfElement, ChildOfRoot, Element};
use sxd_document::parser;

/// Parse XML text into a value tree, `None` when the document is not
/// well-formed. The root element becomes a single-entry map.
pub fn try_parse_xml(xml: &str) -> Option<Value> {
    let package = parser::parse(xml).ok()?;
    let document = package.as_document();

    let root = document
        .root()
        .children()
        .into_iter()
        .find_map(|child| match child {
            ChildOfRoot::Element(element) => Some(element),
            _ => None,
        })?;

    let mut map = Map::new();
    map.insert(root.name().local_part().to_string(), convert_element(root));
    Some(Value::Object(map))
}

fn convert_element(element: Element<'_>) -> Value {
    let attributes = element.attributes();
    let child_elements: Vec<Element<'_>> = element
        .children()
        .into_iter()
        .filter_map(|child| match child {
            ChildOfElement::Element(e) => Some(e),
            _ => None,
        })
        .collect();
    let text = element_text(element);

    if attributes.is_empty() && child_elements.is_empty() {
        return match text {
            Some(text) => Value::String(text),
            None => Value::Object(Map::new()),
        };
    }

    let mut map = Map::new();
    for attribute in attributes {
        map.insert(
            format!("@{}", attribute.name().local_part()),
            Value::String(attribute.value().to_string()),
        );
    }

    // Repeated sibling names collapse into an array at the first occurrence.
    for child in child_elements {
        let name = child.name().local_part().to_string();
        let converted = convert_element(child);
        match map.get_mut(&name) {
            None => {
                map.insert(name, converted);
            }
            Some(Value::Array(items)) => items.push(converted),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, converted]);
            }
        }
    }

    if let Some(text) = text {
        map.insert("#text".to_string(), Value::String(text));
    }

    Value::Object(map)
}

fn element_text(element: Element<'_>) -> Option<String> {
    let mut text = String::new();
    for child in element.children() {
        if let ChildOfElement::Text(t) = child {
            text.push_str(t.text());
        }
    }
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_text_only_element() {
        let v = try_parse_xml("<status>ok</status>").unwrap();
        assert_eq!(v, json!({"status": "ok"}));
    }

    #[test]
    fn test_empty_element_is_empty_map() {
        let v = try_parse_xml("<ping/>").unwrap();
        assert_eq!(v, json!({"ping": {}}));
    }

    #[test]
    fn test_attributes_prefixed() {
        let v = try_parse_xml(r#"<user id="7" role="admin">Ada</user>"#).unwrap();
        assert_eq!(
            v,
            json!({"user": {"@id": "7", "@role": "admin", "#text": "Ada"}})
        );
    }

    #[test]
    fn test_nested_single_children() {
        let v = try_parse_xml("<order><id>42</id><state>open</state></order>").unwrap();
        assert_eq!(v, json!({"order": {"id": "42", "state": "open"}}));
    }

    #[test]
    fn test_repeated_siblings_collapse_to_array() {
        let v = try_parse_xml("<list><item>a</item><item>b</item><item>c</item></list>").unwrap();
        assert_eq!(v, json!({"list": {"item": ["a", "b", "c"]}}));
    }

    #[test]
    fn test_mixed_text_and_children() {
        let v = try_parse_xml("<msg>hello<to>world</to></msg>").unwrap();
        assert_eq!(v, json!({"msg": {"to": "world", "#text": "hello"}}));
    }

    #[test]
    fn test_soap_envelope_uses_local_names() {
        let xml = r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">
            <soap:Body>
                <GetUser><id>99</id></GetUser>
            </soap:Body>
        </soap:Envelope>"#;
        let v = try_parse_xml(xml).unwrap();
        assert_eq!(v["Envelope"]["Body"]["GetUser"]["id"], "99");
    }

    #[test]
    fn test_malformed_is_none() {
        assert!(try_parse_xml("<unclosed>").is_none());
        assert!(try_parse_xml("not xml at all").is_none());
    }
}
