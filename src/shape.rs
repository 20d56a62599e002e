//! Normalisation of the response records the conversation service emits.

use crate::repair;
use serde::Deserialize;
use serde_json::Value;

/// One recognised response record
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseShape {
    /// A complete chart response: `{"object": {"data": ...}}` or
    /// `{"object": {"message": ...}}`. Holds the inner object.
    ChartEnvelope(Value),
    /// `{"error": ...}` with the error flattened to display text
    ErrorEnvelope(String),
    /// A streaming record carrying `choices[0].messages[0].content`
    TextDelta(String),
}

#[derive(Debug, Deserialize)]
struct RawRecord {
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    object: Option<Value>,
    #[serde(default)]
    choices: Vec<RawChoice>,
}

#[derive(Debug, Deserialize)]
struct RawChoice {
    #[serde(default)]
    messages: Vec<RawMessage>,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(default)]
    content: Option<Value>,
}

impl ResponseShape {
    /// Parse text strictly; `None` when it is not JSON or not a known record
    pub fn parse(text: &str) -> Option<Self> {
        Self::from_value(repair::try_parse(text.trim())?)
    }

    pub fn from_value(value: Value) -> Option<Self> {
        // Structs also deserialize from sequences; records are always objects
        if !value.is_object() {
            return None;
        }
        let record: RawRecord = serde_json::from_value(value).ok()?;

        if let Some(error) = record.error.filter(|error| !error.is_null()) {
            return Some(ResponseShape::ErrorEnvelope(error_text(&error)));
        }

        if let Some(object) = record.object {
            if object.get("data").is_some() || object.get("message").is_some() {
                return Some(ResponseShape::ChartEnvelope(object));
            }
        }

        let content = record
            .choices
            .into_iter()
            .next()?
            .messages
            .into_iter()
            .next()?
            .content?;

        Some(ResponseShape::TextDelta(match content {
            Value::String(text) => text,
            other => other.to_string(),
        }))
    }
}

/// Display text for an `error` value, which is a string or `{message}` object
pub fn error_text(error: &Value) -> String {
    match error {
        Value::String(text) => text.clone(),
        Value::Object(map) => map
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string()),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn recognises_error_records() {
        assert_eq!(
            ResponseShape::parse(r#"{"error":"rate limited"}"#),
            Some(ResponseShape::ErrorEnvelope("rate limited".to_string()))
        );
        assert_eq!(
            ResponseShape::parse(r#"{"error":{"code":429,"message":"slow down"}}"#),
            Some(ResponseShape::ErrorEnvelope("slow down".to_string()))
        );
    }

    #[test]
    fn recognises_chart_objects() {
        let shape = ResponseShape::parse(r#"{"object":{"type":"bar","data":{"labels":[]}}}"#);
        assert_eq!(
            shape,
            Some(ResponseShape::ChartEnvelope(
                json!({"type": "bar", "data": {"labels": []}})
            ))
        );
        assert_eq!(
            ResponseShape::parse(r#"{"object":{"message":"no data"}}"#),
            Some(ResponseShape::ChartEnvelope(json!({"message": "no data"})))
        );
    }

    #[test]
    fn recognises_text_deltas() {
        let shape = ResponseShape::parse(
            r#"{"choices":[{"messages":[{"role":"assistant","content":"Hello"}]}]}"#,
        );
        assert_eq!(shape, Some(ResponseShape::TextDelta("Hello".to_string())));
    }

    #[test]
    fn rejects_unknown_and_malformed_records() {
        assert_eq!(ResponseShape::parse("{}"), None);
        assert_eq!(ResponseShape::parse(r#"{"choices":[]}"#), None);
        assert_eq!(ResponseShape::parse(r#"{"choices":[{"messages":[{"con"#), None);
        assert_eq!(ResponseShape::parse("[1,2]"), None);
        assert_eq!(ResponseShape::parse(r#"{"object":{"other":1}}"#), None);
    }

    #[test]
    fn arrays_are_not_records() {
        assert_eq!(ResponseShape::parse(r#"["Revenue grew"]"#), None);
        assert_eq!(ResponseShape::parse(r#"[null,{"data":1}]"#), None);
        assert_eq!(ResponseShape::from_value(json!(["rate limited", null])), None);
    }
}
