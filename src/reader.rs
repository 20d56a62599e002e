//! Incremental reader for conversation response bodies.
//!
//! The body is a run of newline-delimited JSON records, possibly followed by
//! one whole-object chart or error response. The reader drains it, keeps the
//! latest answer snapshot, and reports live updates through a callback.

use crate::error::StreamingError;
use crate::extract::{extract_answer, ExtractedAnswer};
use crate::repair;
use crate::shape::ResponseShape;
use crate::streaming::{ChunkStream, Utf8Decoder};
use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Live update dispatched for every parsed answer record
#[derive(Debug, Clone, PartialEq)]
pub struct StreamUpdate {
    pub answer: String,
    pub citations: Option<String>,
}

pub type StreamingCallback = Box<dyn Fn(&StreamUpdate) -> Result<()> + Send + Sync>;

/// Everything the classifier needs once the body is exhausted
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamOutcome {
    /// Concatenation of all decoded chunks
    pub buffer: String,
    /// The authoritative chart/error object, or record text that has not
    /// parsed yet
    pub running_text: String,
    /// Raw text of the last answer record that parsed
    pub last_fragment: Option<String>,
    /// Answer and citations from the last answer record
    pub latest: Option<ExtractedAnswer>,
    pub has_error: bool,
    pub chart_received: bool,
    pub cancelled: bool,
}

impl StreamOutcome {
    /// The accumulated answer text, if any arrived
    pub fn partial_answer(&self) -> Option<&str> {
        self.latest
            .as_ref()
            .map(|latest| latest.answer.as_str())
            .filter(|answer| !answer.trim().is_empty())
    }
}

#[derive(Default)]
pub struct StreamReader {
    outcome: StreamOutcome,
    decoder: Utf8Decoder,
    partial_line: String,
}

impl StreamReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drive `stream` to completion or cancellation.
    ///
    /// Transport errors are returned as-is; a callback failing with
    /// [`StreamingError::UserCancelled`] ends the read like a cancellation.
    pub async fn read(
        mut self,
        stream: &mut dyn ChunkStream,
        cancel: &CancellationToken,
        callback: Option<&StreamingCallback>,
    ) -> Result<StreamOutcome> {
        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Stream read cancelled");
                    self.outcome.cancelled = true;
                    break;
                }
                chunk = stream.next_chunk() => chunk?,
            };

            let Some(bytes) = chunk else {
                break;
            };

            let text = self.decoder.decode(&bytes);
            if let Err(error) = self.process_text(&text, callback) {
                if matches!(
                    error.downcast_ref::<StreamingError>(),
                    Some(StreamingError::UserCancelled)
                ) {
                    debug!("Stream read stopped by callback");
                    self.outcome.cancelled = true;
                    break;
                }
                return Err(error);
            }
        }

        if !self.outcome.cancelled {
            let rest = self.decoder.finish();
            self.process_text(&rest, callback)?;
            let line = std::mem::take(&mut self.partial_line);
            if !self.outcome.has_error && !self.outcome.chart_received {
                self.process_fragment(&line, callback)?;
            }
        }

        Ok(self.outcome)
    }

    /// Route one decoded chunk
    pub fn process_text(&mut self, text: &str, callback: Option<&StreamingCallback>) -> Result<()> {
        if text.is_empty() {
            return Ok(());
        }
        self.outcome.buffer.push_str(text);

        // After an error the rest of the body is drained without effect
        if self.outcome.has_error {
            return Ok(());
        }

        match ResponseShape::parse(text) {
            Some(shape @ (ResponseShape::ChartEnvelope(_) | ResponseShape::ErrorEnvelope(_))) => {
                return self.apply(shape, text.trim(), callback);
            }
            Some(shape @ ResponseShape::TextDelta(_))
                if self.partial_line.is_empty() && !self.outcome.chart_received =>
            {
                return self.apply(shape, text.trim(), callback);
            }
            _ => {}
        }

        if self.outcome.chart_received {
            return Ok(());
        }

        let mut rest = text;
        while let Some(pos) = rest.find('\n') {
            self.partial_line.push_str(&rest[..pos]);
            let line = std::mem::take(&mut self.partial_line);
            self.process_fragment(&line, callback)?;
            if self.outcome.has_error || self.outcome.chart_received {
                return Ok(());
            }
            rest = &rest[pos + 1..];
        }
        self.partial_line.push_str(rest);

        Ok(())
    }

    fn process_fragment(&mut self, line: &str, callback: Option<&StreamingCallback>) -> Result<()> {
        let fragment = line.trim();
        if fragment.is_empty() || fragment == "{}" {
            return Ok(());
        }

        if !self.outcome.running_text.is_empty() {
            let combined = format!("{}{}", self.outcome.running_text, fragment);
            if let Some(shape) = ResponseShape::parse(&combined) {
                self.outcome.running_text.clear();
                return self.apply(shape, &combined, callback);
            }
            if let Some(shape) = ResponseShape::parse(fragment) {
                trace!(
                    "Dropping {} bytes of unparsed stream text",
                    self.outcome.running_text.len()
                );
                self.outcome.running_text.clear();
                return self.apply(shape, fragment, callback);
            }
            self.outcome.running_text = combined;
            return Ok(());
        }

        match repair::try_parse(fragment) {
            Some(value) => match ResponseShape::from_value(value) {
                Some(shape) => self.apply(shape, fragment, callback),
                None => {
                    trace!("Skipping unrecognised record: {}", fragment);
                    Ok(())
                }
            },
            None => {
                self.outcome.running_text.push_str(fragment);
                Ok(())
            }
        }
    }

    fn apply(
        &mut self,
        shape: ResponseShape,
        raw: &str,
        callback: Option<&StreamingCallback>,
    ) -> Result<()> {
        match shape {
            ResponseShape::TextDelta(content) => {
                let extracted = extract_answer(&content);
                let update = StreamUpdate {
                    answer: extracted.answer.clone(),
                    citations: extracted.citations.clone(),
                };
                // A record that parsed supersedes any unparsed text before it
                self.outcome.running_text.clear();
                self.outcome.last_fragment = Some(raw.to_string());
                self.outcome.latest = Some(extracted);
                if let Some(callback) = callback {
                    callback(&update)?;
                }
            }
            ResponseShape::ErrorEnvelope(message) => {
                debug!("Error record in stream: {}", message);
                self.outcome.has_error = true;
                self.outcome.running_text = raw.to_string();
            }
            ResponseShape::ChartEnvelope(_) => {
                debug!("Chart record in stream");
                self.outcome.chart_received = true;
                self.outcome.running_text = raw.to_string();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::PlaybackChunkStream;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn delta(content: &str) -> String {
        format!(
            "{}\n",
            json!({"choices": [{"messages": [{"role": "assistant", "content": content}]}]})
        )
    }

    fn collecting_callback() -> (StreamingCallback, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: StreamingCallback = Box::new(move |update: &StreamUpdate| {
            sink.lock().unwrap().push(update.answer.clone());
            Ok(())
        });
        (callback, seen)
    }

    async fn read_texts(texts: Vec<String>) -> (StreamOutcome, Vec<String>) {
        let mut stream = PlaybackChunkStream::from_texts(texts);
        let (callback, seen) = collecting_callback();
        let outcome = StreamReader::new()
            .read(&mut stream, &CancellationToken::new(), Some(&callback))
            .await
            .unwrap();
        let seen = seen.lock().unwrap().clone();
        (outcome, seen)
    }

    /// Yields its chunks, then either fails or never finishes
    struct StallingStream {
        chunks: Vec<String>,
        fail: bool,
    }

    #[async_trait]
    impl ChunkStream for StallingStream {
        async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
            if !self.chunks.is_empty() {
                return Ok(Some(self.chunks.remove(0).into_bytes()));
            }
            if self.fail {
                anyhow::bail!("connection reset");
            }
            futures::future::pending().await
        }
    }

    #[tokio::test]
    async fn snapshots_replace_previous_answer() {
        let (outcome, seen) = read_texts(vec![
            delta(r#"{"answer": "The"#),
            delta(r#"{"answer": "The total is 42.", "citations": [{"title":"doc1"}]}"#),
        ])
        .await;

        assert_eq!(seen, vec!["The", "The total is 42."]);
        let latest = outcome.latest.unwrap();
        assert_eq!(latest.answer, "The total is 42.");
        assert!(latest.citations.unwrap().starts_with("\"citations\":"));
        assert!(!outcome.has_error);
        assert!(outcome.running_text.is_empty());
    }

    #[tokio::test]
    async fn records_split_across_chunks_are_joined() {
        let record = delta("Hello world");
        let (head, tail) = record.split_at(20);
        let (outcome, seen) =
            read_texts(vec![head.to_string(), tail.to_string(), "{}\n\n".to_string()]).await;

        assert_eq!(seen, vec!["Hello world"]);
        assert_eq!(outcome.partial_answer(), Some("Hello world"));
        assert_eq!(outcome.buffer, format!("{record}{{}}\n\n"));
    }

    #[tokio::test]
    async fn multiple_records_in_one_chunk() {
        let chunk = format!("{}{}", delta("one"), delta("one two"));
        let (outcome, seen) = read_texts(vec![chunk]).await;
        assert_eq!(seen, vec!["one", "one two"]);
        assert!(outcome.last_fragment.unwrap().contains("one two"));
    }

    #[tokio::test]
    async fn error_record_stops_text_accumulation() {
        let (outcome, seen) = read_texts(vec![
            r#"{"error":"rate limited"}"#.to_string(),
            delta("ignored text"),
        ])
        .await;

        assert!(outcome.has_error);
        assert!(seen.is_empty());
        assert_eq!(outcome.running_text, r#"{"error":"rate limited"}"#);
        assert!(outcome.latest.is_none());
        assert!(outcome.buffer.contains("ignored text"));
    }

    #[tokio::test]
    async fn chart_object_becomes_running_text() {
        let chart = r#"{"object":{"type":"bar","data":{"labels":["a"]}}}"#;
        let (outcome, seen) =
            read_texts(vec![delta("thinking"), chart.to_string(), delta("late")]).await;

        assert!(outcome.chart_received);
        assert_eq!(outcome.running_text, chart);
        assert_eq!(seen, vec!["thinking"]);
    }

    #[tokio::test]
    async fn concatenated_objects_stay_pending() {
        let line = r#"{"choices":[{"messages":[{"content":"a"}]}]}{"choices":[{"messages":[{"content":"b"}]}]}"#;
        let (outcome, _) = read_texts(vec![format!("{line}\n")]).await;
        assert_eq!(outcome.running_text, line);
        assert!(outcome.latest.is_none());
    }

    #[tokio::test]
    async fn cancellation_keeps_partial_answer() {
        let token = CancellationToken::new();
        let trigger = token.clone();
        let callback: StreamingCallback = Box::new(move |_update: &StreamUpdate| {
            trigger.cancel();
            Ok(())
        });
        let mut stream = StallingStream {
            chunks: vec![delta("Partial ans")],
            fail: false,
        };

        let outcome = StreamReader::new()
            .read(&mut stream, &token, Some(&callback))
            .await
            .unwrap();

        assert!(outcome.cancelled);
        assert_eq!(outcome.partial_answer(), Some("Partial ans"));
    }

    #[tokio::test]
    async fn callback_can_stop_the_read() {
        let callback: StreamingCallback =
            Box::new(|_update: &StreamUpdate| Err(StreamingError::UserCancelled.into()));
        let mut stream = StallingStream {
            chunks: vec![delta("first"), delta("second")],
            fail: false,
        };

        let outcome = StreamReader::new()
            .read(&mut stream, &CancellationToken::new(), Some(&callback))
            .await
            .unwrap();

        assert!(outcome.cancelled);
        assert_eq!(outcome.partial_answer(), Some("first"));
    }

    #[tokio::test]
    async fn transport_errors_propagate() {
        let mut stream = StallingStream {
            chunks: vec![delta("before")],
            fail: true,
        };
        let result = StreamReader::new()
            .read(&mut stream, &CancellationToken::new(), None)
            .await;
        assert!(result.unwrap_err().to_string().contains("connection reset"));
    }

    #[tokio::test]
    async fn unparsed_line_is_dropped_by_next_record() {
        let record = delta("after noise");
        let (split, _) =
            read_texts(vec!["keep-alive\n".to_string(), record.clone()]).await;
        let (joined, _) = read_texts(vec![format!("keep-alive\n{record}")]).await;

        for outcome in [&split, &joined] {
            assert!(outcome.running_text.is_empty());
            assert_eq!(outcome.partial_answer(), Some("after noise"));
        }
    }

    #[tokio::test]
    async fn trailing_record_without_newline_is_flushed() {
        let record = delta("tail");
        let record = record.trim_end();
        let (head, tail) = record.split_at(10);
        let (outcome, _) = read_texts(vec![head.to_string(), tail.to_string()]).await;
        assert_eq!(outcome.partial_answer(), Some("tail"));
    }
}
