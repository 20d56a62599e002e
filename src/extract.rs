//! Answer and citation extraction from partial assistant records.
//!
//! The agent streams `{"answer": ..., "citations": ...}` as text which may be
//! cut off anywhere, so this works on substring offsets instead of parsing.

use crate::repair;
use crate::types::Citation;
use serde_json::Value;

const ANSWER_KEY: &str = "\"answer\":";
const CITATIONS_KEY: &str = "\"citations\":";

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExtractedAnswer {
    /// Markdown-ready answer text
    pub answer: String,
    /// Raw span starting at `"citations":`, if present
    pub citations: Option<String>,
}

/// Split a fragment into its answer text and raw citation span.
pub fn extract_answer(fragment: &str) -> ExtractedAnswer {
    let Some(answer_idx) = fragment.find(ANSWER_KEY) else {
        return ExtractedAnswer {
            answer: fragment.to_string(),
            citations: None,
        };
    };

    let answer_start = answer_idx + ANSWER_KEY.len();
    let citations_idx = fragment[answer_start..]
        .find(CITATIONS_KEY)
        .map(|offset| answer_start + offset);
    let answer_end = citations_idx.unwrap_or(fragment.len());

    ExtractedAnswer {
        answer: clean_answer(&fragment[answer_start..answer_end]),
        citations: citations_idx.map(|idx| fragment[idx..].to_string()),
    }
}

fn clean_answer(span: &str) -> String {
    let mut text = span.trim().trim_start_matches('"');

    // Strip closing quote/comma/brace artifacts, keeping an escaped quote.
    loop {
        let Some(last) = text.chars().last() else {
            break;
        };
        let escaped_quote = last == '"' && text[..text.len() - 1].ends_with('\\');
        if escaped_quote || !(last == '"' || last == ',' || last == '}' || last.is_whitespace()) {
            break;
        }
        text = &text[..text.len() - last.len_utf8()];
    }

    text.replace("\\\"", "\"").replace("\\n", "  \n")
}

/// Parse a raw citation span into citation records. Unparseable input
/// yields no citations.
pub fn parse_citations(raw: &str) -> Vec<Citation> {
    let trimmed = raw.trim();
    let candidate = if trimmed.starts_with(CITATIONS_KEY) {
        format!("{{{trimmed}")
    } else {
        trimmed.to_string()
    };

    let list = match repair::repair_json(&candidate).value() {
        Some(Value::Object(mut map)) => map.remove("citations"),
        Some(list @ Value::Array(_)) => Some(list),
        _ => None,
    };

    // Citations sometimes arrive as a serialized list inside a string.
    let list = match list {
        Some(Value::String(serialized)) => repair::repair_json(&serialized).value(),
        other => other,
    };

    let Some(Value::Array(items)) = list else {
        return Vec::new();
    };

    items
        .into_iter()
        .filter_map(|item| match item {
            Value::String(title) => Some(Citation {
                title: Some(title),
                ..Default::default()
            }),
            Value::Object(_) => serde_json::from_value(item).ok(),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_answer_and_citations() {
        let fragment = r#"{"answer": "The total is 42.", "citations": [{"title":"doc1"}]}"#;
        let extracted = extract_answer(fragment);
        assert_eq!(extracted.answer, "The total is 42.");
        let citations = extracted.citations.unwrap();
        assert!(citations.starts_with("\"citations\":"));
        assert_eq!(citations, r#""citations": [{"title":"doc1"}]}"#);
    }

    #[test]
    fn whole_fragment_without_answer_key() {
        let extracted = extract_answer("Just some text");
        assert_eq!(extracted.answer, "Just some text");
        assert!(extracted.citations.is_none());
    }

    #[test]
    fn tolerates_truncation() {
        let extracted = extract_answer(r#"{"answer": "The tot"#);
        assert_eq!(extracted.answer, "The tot");
        assert!(extracted.citations.is_none());

        let extracted = extract_answer(r#"{"answer": "Done"}"#);
        assert_eq!(extracted.answer, "Done");
    }

    #[test]
    fn converts_escaped_newlines_to_markdown_breaks() {
        let extracted = extract_answer(r#"{"answer": "Line one\nLine two", "citations": []}"#);
        assert_eq!(extracted.answer, "Line one  \nLine two");
    }

    #[test]
    fn keeps_escaped_quote_at_end() {
        let extracted = extract_answer(r#"{"answer": "He said \"hi\"", "citations": []}"#);
        assert_eq!(extracted.answer, r#"He said "hi""#);
    }

    #[test]
    fn citations_key_before_answer_is_ignored() {
        let extracted = extract_answer(r#"{"citations": [], "answer": "Later"}"#);
        assert_eq!(extracted.answer, "Later");
        assert!(extracted.citations.is_none());
    }

    #[test]
    fn parses_citation_span() {
        let citations =
            parse_citations(r#""citations": [{"title":"doc1","url":"https://x/1"}, "doc2"]}"#);
        assert_eq!(citations.len(), 2);
        assert_eq!(citations[0].title.as_deref(), Some("doc1"));
        assert_eq!(citations[0].url.as_deref(), Some("https://x/1"));
        assert_eq!(citations[1].title.as_deref(), Some("doc2"));
    }

    #[test]
    fn parses_truncated_and_serialized_spans() {
        let citations = parse_citations(r#""citations": [{"title":"doc1"}"#);
        assert_eq!(citations.len(), 1);

        let citations = parse_citations(r#""citations": "[{\"title\":\"doc3\"}]"}"#);
        assert_eq!(citations.len(), 1);
        assert_eq!(citations[0].title.as_deref(), Some("doc3"));

        assert!(parse_citations("garbage").is_empty());
    }
}
