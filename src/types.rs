use crate::extract;
use crate::repair;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    Error,
    Tool,
}

/// A renderable chart description
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChartPayload {
    #[serde(rename = "type", alias = "chartType")]
    pub chart_type: String,
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Value>,
}

impl ChartPayload {
    /// Build a chart from an object carrying `type` (or `chartType`) and `data`
    pub fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let chart_type = object
            .get("type")
            .or_else(|| object.get("chartType"))
            .and_then(Value::as_str)?;
        let data = object.get("data").filter(|data| !data.is_null())?;

        Some(Self {
            chart_type: chart_type.to_string(),
            data: data.clone(),
            options: object.get("options").filter(|o| !o.is_null()).cloned(),
        })
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum MessageContent {
    Chart(ChartPayload),
    Text(String),
}

impl MessageContent {
    /// Restore content that was persisted as a string, promoting serialized charts
    pub fn from_stored(stored: &str) -> Self {
        if stored.trim_start().starts_with('{') {
            let repaired = repair::repair_json(stored);
            if let Ok(value) = serde_json::from_str::<Value>(&repaired.text) {
                if let Some(chart) = ChartPayload::from_value(&value) {
                    return MessageContent::Chart(chart);
                }
            }
        }
        MessageContent::Text(stored.to_string())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            MessageContent::Text(text) => Some(text),
            MessageContent::Chart(_) => None,
        }
    }
}

/// What the UI has to draw for a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderKind {
    Text,
    Chart,
    Error,
}

/// One conversation turn
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Message {
    pub id: String,
    pub role: MessageRole,
    pub content: MessageContent,
    /// Raw citation span as it arrived in the stream
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citations: Option<String>,
    pub date: DateTime<Utc>,
    /// Set when the turn was finalized after the user cancelled it
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub aborted: bool,
}

impl Message {
    pub fn new(role: MessageRole, content: MessageContent) -> Self {
        Self {
            id: generate_message_id(),
            role,
            content,
            citations: None,
            date: Utc::now(),
            aborted: false,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(MessageRole::User, MessageContent::Text(text.into()))
    }

    pub fn assistant_text(text: impl Into<String>, citations: Option<String>) -> Self {
        Self {
            citations,
            ..Self::new(MessageRole::Assistant, MessageContent::Text(text.into()))
        }
    }

    pub fn chart(chart: ChartPayload) -> Self {
        Self::new(MessageRole::Assistant, MessageContent::Chart(chart))
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::new(MessageRole::Error, MessageContent::Text(text.into()))
    }

    pub fn render_kind(&self) -> RenderKind {
        match (&self.role, &self.content) {
            (MessageRole::Error, _) => RenderKind::Error,
            (_, MessageContent::Chart(_)) => RenderKind::Chart,
            (_, MessageContent::Text(_)) => RenderKind::Text,
        }
    }

    /// Parse the citation span on demand
    pub fn citations(&self) -> Vec<Citation> {
        self.citations
            .as_deref()
            .map(extract::parse_citations)
            .unwrap_or_default()
    }
}

/// A source reference attached to an answer
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct Citation {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub filepath: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Outbound request to the conversation service
#[derive(Debug, Serialize, Clone)]
pub struct ConversationRequest {
    pub id: String,
    pub messages: Vec<Message>,
    pub last_rag_response: Option<String>,
}

/// Body sent to the history service
#[derive(Debug, Serialize, Clone)]
pub struct HistorySaveRequest {
    pub conversation_id: Option<String>,
    pub messages: Vec<Message>,
}

/// Conversation metadata returned by the history service
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct SavedConversation {
    pub conversation_id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
}

pub fn generate_message_id() -> String {
    format!(
        "{:x}{:08x}",
        Utc::now().timestamp_millis(),
        rand::random::<u32>()
    )
}

pub fn generate_conversation_id() -> String {
    format!("conv_{}", generate_message_id())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn chart_accepts_chart_type_alias() {
        let chart = ChartPayload::from_value(&json!({
            "chartType": "pie",
            "data": {"labels": ["a"], "datasets": []}
        }))
        .unwrap();
        assert_eq!(chart.chart_type, "pie");
        assert!(chart.options.is_none());
    }

    #[test]
    fn chart_requires_data() {
        assert!(ChartPayload::from_value(&json!({"type": "bar"})).is_none());
        assert!(ChartPayload::from_value(&json!({"type": "bar", "data": null})).is_none());
    }

    #[test]
    fn stored_chart_string_is_promoted() {
        let content =
            MessageContent::from_stored(r#"{"type":"line","data":{"labels":[]},"options":{}}"#);
        match content {
            MessageContent::Chart(chart) => assert_eq!(chart.chart_type, "line"),
            other => panic!("expected chart, got {other:?}"),
        }
        assert_eq!(
            MessageContent::from_stored("plain words"),
            MessageContent::Text("plain words".to_string())
        );
    }

    #[test]
    fn render_kind_follows_shape() {
        assert_eq!(Message::error("boom").render_kind(), RenderKind::Error);
        assert_eq!(Message::user("hi").render_kind(), RenderKind::Text);
        let chart = ChartPayload::from_value(&json!({"type": "bar", "data": {}})).unwrap();
        assert_eq!(Message::chart(chart).render_kind(), RenderKind::Chart);
    }

    #[test]
    fn message_round_trips_through_serde() {
        let mut message = Message::assistant_text("hello", None);
        message.aborted = true;
        let json = serde_json::to_string(&message).unwrap();
        assert!(json.contains("\"role\":\"assistant\""));
        assert!(json.contains("\"aborted\":true"));
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back, message);

        let complete = Message::user("hi");
        let json = serde_json::to_string(&complete).unwrap();
        assert!(!json.contains("aborted"));
    }
}
