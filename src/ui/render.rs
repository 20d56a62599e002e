//! Plain-text rendering of transcript messages.

use crate::types::{ChartPayload, Message, MessageContent, RenderKind};
use serde_json::Value;
use thiserror::Error;

pub const CHART_NOTICE: &str = "Couldn't display the chart.";

#[derive(Error, Debug, PartialEq)]
pub enum RenderError {
    #[error("malformed chart data: {0}")]
    MalformedChart(String),
}

/// One-paragraph description of a chart
pub fn chart_summary(chart: &ChartPayload) -> Result<String, RenderError> {
    let data = chart
        .data
        .as_object()
        .ok_or_else(|| RenderError::MalformedChart("data is not an object".to_string()))?;

    let labels = match data.get("labels") {
        None => Vec::new(),
        Some(Value::Array(labels)) => labels.iter().map(label_text).collect(),
        Some(_) => return Err(RenderError::MalformedChart("labels is not a list".to_string())),
    };

    let datasets = match data.get("datasets") {
        None => &[][..],
        Some(Value::Array(datasets)) => datasets.as_slice(),
        Some(_) => {
            return Err(RenderError::MalformedChart(
                "datasets is not a list".to_string(),
            ))
        }
    };

    if labels.is_empty() && datasets.is_empty() {
        return Err(RenderError::MalformedChart("no labels or datasets".to_string()));
    }

    let mut lines = vec![format!("[{} chart]", chart.chart_type)];
    if !labels.is_empty() {
        lines.push(format!("labels: {}", labels.join(", ")));
    }
    for (index, dataset) in datasets.iter().enumerate() {
        let name = dataset
            .get("label")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("series {}", index + 1));
        let values = match dataset.get("data") {
            Some(Value::Array(values)) => values.iter().map(label_text).collect::<Vec<_>>(),
            _ => {
                return Err(RenderError::MalformedChart(format!(
                    "dataset {name} has no data"
                )))
            }
        };
        lines.push(format!("{name}: {}", values.join(", ")));
    }

    Ok(lines.join("\n"))
}

fn label_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Body text for a message, without any styling
pub fn render_message(message: &Message) -> String {
    match (message.render_kind(), &message.content) {
        (RenderKind::Chart, MessageContent::Chart(chart)) => {
            chart_summary(chart).unwrap_or_else(|error| {
                tracing::warn!("Failed to render chart: {}", error);
                CHART_NOTICE.to_string()
            })
        }
        (RenderKind::Error, content) => format!("Error: {}", content_text(content)),
        (_, content) => {
            let mut text = content_text(content);
            let citations = message.citations();
            if !citations.is_empty() {
                text.push_str("\n\nSources:");
                for (index, citation) in citations.iter().enumerate() {
                    let title = citation
                        .title
                        .as_deref()
                        .or(citation.filepath.as_deref())
                        .unwrap_or("untitled");
                    text.push_str(&format!("\n  [{}] {}", index + 1, title));
                    if let Some(url) = &citation.url {
                        text.push_str(&format!(" ({url})"));
                    }
                }
            }
            if message.aborted {
                text.push_str("\n(stopped)");
            }
            text
        }
    }
}

fn content_text(content: &MessageContent) -> String {
    match content {
        MessageContent::Text(text) => text.clone(),
        MessageContent::Chart(chart) => serde_json::to_string(chart).unwrap_or_default(),
    }
}
