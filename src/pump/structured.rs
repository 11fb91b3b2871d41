//! Structured-state sub-protocol
//!
//! A guest line of the form `<prefix><JSON object>` carries a state update.
//! The object is opaque and forwarded verbatim.

use serde_json::{Map, Value};

/// Classification of one stdout line
#[derive(Debug, Clone, PartialEq)]
pub enum StructuredLine {
    /// Ordinary output
    Plain,
    /// Well-formed state update
    State(Map<String, Value>),
    /// Prefixed but unusable; the reason is for logs only
    Malformed(String),
}

/// Classify `line` against the reserved `prefix`
pub fn classify(line: &str, prefix: &str) -> StructuredLine {
    let Some(payload) = line.trim().strip_prefix(prefix) else {
        return StructuredLine::Plain;
    };

    match serde_json::from_str::<Value>(payload.trim()) {
        Ok(Value::Object(map)) => StructuredLine::State(map),
        Ok(other) => StructuredLine::Malformed(format!("expected a JSON object, got {}", kind(&other))),
        Err(e) => StructuredLine::Malformed(e.to_string()),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const PREFIX: &str = "JOINT_STATE:";

    #[test]
    fn test_state_line() {
        match classify(r#"JOINT_STATE:{"a": 1.0}"#, PREFIX) {
            StructuredLine::State(map) => assert_eq!(Value::Object(map), json!({"a": 1.0})),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_surrounding_whitespace_is_ignored() {
        assert!(matches!(
            classify("  JOINT_STATE: {\"shoulder\": -0.25}  ", PREFIX),
            StructuredLine::State(_)
        ));
    }

    #[test]
    fn test_malformed_and_non_object_payloads() {
        assert!(matches!(
            classify("JOINT_STATE:{not valid}", PREFIX),
            StructuredLine::Malformed(_)
        ));
        match classify("JOINT_STATE:[1, 2]", PREFIX) {
            StructuredLine::Malformed(reason) => assert!(reason.contains("an array")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_plain_lines() {
        assert_eq!(classify("hello", PREFIX), StructuredLine::Plain);
        assert_eq!(classify("state JOINT_STATE:{}", PREFIX), StructuredLine::Plain);
    }
}
