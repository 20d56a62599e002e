//! Final classification of a drained response into one transcript message.

use crate::reader::StreamOutcome;
use crate::repair;
use crate::shape::error_text;
use crate::types::{ChartPayload, Message};
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;
use tracing::{debug, warn};

/// Upstream SDK error that means nothing to an end user
const UNREAD_STREAM_ERROR: &str =
    "Attempted to access streaming response content, without having called `read()`.";

pub const GENERIC_ERROR: &str =
    "An error occurred. Please try again. If the problem persists, please contact the site administrator.";

pub const CHART_FAILURE: &str = "Chart can't be generated, please try again.";

/// Chart payloads are sometimes serialized several times over
const MAX_DECODE_DEPTH: usize = 5;

fn chart_intent() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(chart|graph|visualize|plot|donut|pie|bar|line)\b").unwrap()
    })
}

/// Whether the user asked for a visualisation
pub fn is_chart_query(query: &str) -> bool {
    chart_intent().is_match(query)
}

/// Turn a finished stream into the message to append, if there is one.
///
/// Errors win over everything. Chart queries (or responses that delivered a
/// chart object anyway) go through chart resolution. Everything else becomes
/// the last answer snapshot.
pub fn classify(outcome: &StreamOutcome, query: &str) -> Option<Message> {
    if outcome.has_error {
        return Some(Message::error(error_message(&outcome.running_text)));
    }

    if outcome.chart_received || is_chart_query(query) {
        return Some(classify_chart(outcome));
    }

    let latest = outcome.latest.as_ref()?;
    if latest.answer.trim().is_empty() && latest.citations.is_none() {
        return None;
    }
    Some(Message::assistant_text(
        latest.answer.clone(),
        latest.citations.clone(),
    ))
}

fn error_message(raw: &str) -> String {
    let text = repair::repair_json(raw)
        .value()
        .and_then(|value| value.get("error").map(error_text))
        .unwrap_or_default();

    if text.trim().is_empty() || text == UNREAD_STREAM_ERROR {
        GENERIC_ERROR.to_string()
    } else {
        text
    }
}

#[derive(Debug, PartialEq)]
enum ChartContent {
    Chart(ChartPayload),
    Error(String),
    Prose(String),
    Unusable,
}

fn classify_chart(outcome: &StreamOutcome) -> Message {
    let source = if outcome.running_text.trim().is_empty() {
        outcome.last_fragment.as_deref().unwrap_or_default()
    } else {
        outcome.running_text.as_str()
    };

    match resolve_chart(&last_object_segment(source)) {
        ChartContent::Chart(chart) => Message::chart(chart),
        ChartContent::Error(text) => Message::error(text),
        ChartContent::Prose(text) => {
            let citations = outcome
                .latest
                .as_ref()
                .and_then(|latest| latest.citations.clone());
            Message::assistant_text(text, citations)
        }
        ChartContent::Unusable => {
            warn!("No chart could be recovered from response");
            Message::error(CHART_FAILURE)
        }
    }
}

/// Keep only the last of several concatenated objects
fn last_object_segment(text: &str) -> String {
    match text.rsplit_once("}{") {
        Some((_, last)) => format!("{{{last}"),
        None => text.to_string(),
    }
}

fn resolve_chart(candidate: &str) -> ChartContent {
    let Some(envelope) = repair::repair_json(candidate).value() else {
        debug!("Chart envelope did not parse");
        return ChartContent::Unusable;
    };

    let inner = match envelope.get("object") {
        Some(object) => object.clone(),
        None => match envelope.pointer("/choices/0/messages/0/content") {
            Some(content) => content.clone(),
            None => envelope,
        },
    };

    interpret(inner)
}

fn interpret(value: Value) -> ChartContent {
    let mut current = value;

    for _ in 0..MAX_DECODE_DEPTH {
        if current.is_object() {
            return object_content(&current);
        }
        let Value::String(text) = current else {
            return ChartContent::Unusable;
        };

        let trimmed = text.trim();
        if trimmed.is_empty() {
            return ChartContent::Unusable;
        }
        if !looks_like_json(trimmed) {
            return ChartContent::Prose(trimmed.to_string());
        }

        match repair::repair_json(trimmed).value() {
            Some(next) => current = next,
            None => return ChartContent::Unusable,
        }
    }

    ChartContent::Unusable
}

fn looks_like_json(text: &str) -> bool {
    text.starts_with('{') || text.starts_with('[') || text.starts_with('"')
}

fn object_content(value: &Value) -> ChartContent {
    if let Some(chart) = ChartPayload::from_value(value) {
        return ChartContent::Chart(chart);
    }

    for key in ["message", "error"] {
        let text = match value.get(key) {
            Some(Value::String(text)) => text.clone(),
            Some(error @ Value::Object(_)) => error_text(error),
            _ => continue,
        };
        if !text.trim().is_empty() {
            return ChartContent::Error(text);
        }
    }

    ChartContent::Unusable
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::extract_answer;
    use crate::types::{MessageContent, MessageRole, RenderKind};
    use serde_json::json;

    fn delta_record(content: &str) -> String {
        json!({"choices": [{"messages": [{"role": "assistant", "content": content}]}]}).to_string()
    }

    fn text_outcome(content: &str) -> StreamOutcome {
        StreamOutcome {
            last_fragment: Some(delta_record(content)),
            latest: Some(extract_answer(content)),
            ..Default::default()
        }
    }

    fn chart_of(message: &Message) -> &ChartPayload {
        match &message.content {
            MessageContent::Chart(chart) => chart,
            other => panic!("expected chart, got {other:?}"),
        }
    }

    #[test]
    fn detects_chart_intent_on_whole_words() {
        assert!(is_chart_query("show me a bar chart of revenue"));
        assert!(is_chart_query("Plot the LINE"));
        assert!(is_chart_query("visualize sales"));
        assert!(!is_chart_query("scan the barcode"));
        assert!(!is_chart_query("what is the total revenue?"));
        assert!(!is_chart_query("pipeline status"));
    }

    #[test]
    fn error_envelope_becomes_error_message() {
        let outcome = StreamOutcome {
            has_error: true,
            running_text: r#"{"error":"rate limited"}"#.to_string(),
            ..Default::default()
        };
        let message = classify(&outcome, "anything").unwrap();
        assert_eq!(message.role, MessageRole::Error);
        assert_eq!(message.content.as_text(), Some("rate limited"));
    }

    #[test]
    fn sdk_read_error_is_replaced() {
        let outcome = StreamOutcome {
            has_error: true,
            running_text: json!({ "error": { "message": UNREAD_STREAM_ERROR } }).to_string(),
            ..Default::default()
        };
        let message = classify(&outcome, "bar chart please").unwrap();
        assert_eq!(message.content.as_text(), Some(GENERIC_ERROR));
    }

    #[test]
    fn chart_object_for_chart_query() {
        let outcome = StreamOutcome {
            chart_received: true,
            running_text: r#"{"object":{"type":"bar","data":{"labels":["Q1","Q2"],"datasets":[{"data":[1,2]}]}}}"#
                .to_string(),
            ..Default::default()
        };
        let message = classify(&outcome, "show me a bar chart of revenue").unwrap();
        assert_eq!(message.render_kind(), RenderKind::Chart);
        let chart = chart_of(&message);
        assert_eq!(chart.chart_type, "bar");
        assert_eq!(chart.data["labels"], json!(["Q1", "Q2"]));
    }

    #[test]
    fn chart_serialized_inside_delta_content() {
        let payload = json!({"chartType": "pie", "data": {"labels": ["a", "b"]}}).to_string();
        let serialized = serde_json::to_string(&payload).unwrap();
        let outcome = text_outcome(&serialized);

        let message = classify(&outcome, "pie chart of spend").unwrap();
        assert_eq!(chart_of(&message).chart_type, "pie");
    }

    #[test]
    fn javascript_chart_config_is_repaired() {
        let content = "{type: 'line', data: {labels: ['jan', 'feb'], datasets: [{data: [3, 4],}]}, options: {tooltip: function(item) { return item.label; }}}";
        let outcome = text_outcome(content);

        let message = classify(&outcome, "line graph of signups").unwrap();
        let chart = chart_of(&message);
        assert_eq!(chart.chart_type, "line");
        assert_eq!(chart.options.as_ref().unwrap()["tooltip"], "[Function]");
    }

    #[test]
    fn concatenated_objects_use_the_last() {
        let outcome = StreamOutcome {
            running_text: format!(
                "{}{}",
                delta_record("working on it"),
                delta_record(r#"{"type":"bar","data":{"labels":["x"]}}"#)
            ),
            ..Default::default()
        };
        let message = classify(&outcome, "bar chart").unwrap();
        assert_eq!(chart_of(&message).chart_type, "bar");
    }

    #[test]
    fn chart_message_object_becomes_error() {
        let outcome = StreamOutcome {
            chart_received: true,
            running_text: r#"{"object":{"message":"No data available for that period"}}"#
                .to_string(),
            ..Default::default()
        };
        let message = classify(&outcome, "chart it").unwrap();
        assert_eq!(message.role, MessageRole::Error);
        assert_eq!(
            message.content.as_text(),
            Some("No data available for that period")
        );
    }

    #[test]
    fn prose_answer_to_chart_query_stays_text() {
        let outcome = text_outcome("I can only chart numeric data.");
        let message = classify(&outcome, "graph the names").unwrap();
        assert_eq!(message.role, MessageRole::Assistant);
        assert_eq!(
            message.content.as_text(),
            Some("I can only chart numeric data.")
        );
    }

    #[test]
    fn unusable_chart_falls_back_to_notice() {
        let outcome = text_outcome(r#"{"labels": ["no type or data"]}"#);
        let message = classify(&outcome, "donut chart").unwrap();
        assert_eq!(message.role, MessageRole::Error);
        assert_eq!(message.content.as_text(), Some(CHART_FAILURE));

        let message = classify(&StreamOutcome::default(), "donut chart").unwrap();
        assert_eq!(message.content.as_text(), Some(CHART_FAILURE));
    }

    #[test]
    fn plain_answer_carries_citations() {
        let outcome =
            text_outcome(r#"{"answer": "The total is 42.", "citations": [{"title":"doc1"}]}"#);
        let message = classify(&outcome, "what is the total?").unwrap();
        assert_eq!(message.content.as_text(), Some("The total is 42."));
        let citations = message.citations();
        assert_eq!(citations.len(), 1);
        assert_eq!(citations[0].title.as_deref(), Some("doc1"));
    }

    #[test]
    fn empty_stream_yields_nothing() {
        assert!(classify(&StreamOutcome::default(), "hello").is_none());
    }
}
