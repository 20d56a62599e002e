//! Chunk sources for the stream reader
//!
//! The reader consumes chunks through [`ChunkStream`] so that a live HTTP
//! body and a recorded session go through identical processing.

use crate::recording::{RecordedChunk, StreamRecorder};
use anyhow::Result;
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use reqwest::Response;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Source of raw response body chunks
#[async_trait]
pub trait ChunkStream: Send {
    /// Next chunk, or `None` once the body is exhausted
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>>;
}

/// Live HTTP response body
pub struct HttpChunkStream {
    body: BoxStream<'static, reqwest::Result<Vec<u8>>>,
}

impl HttpChunkStream {
    pub fn new(response: Response) -> Self {
        Self {
            body: response
                .bytes_stream()
                .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
                .boxed(),
        }
    }
}

#[async_trait]
impl ChunkStream for HttpChunkStream {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        match self.body.next().await {
            Some(Ok(chunk)) => Ok(Some(chunk)),
            Some(Err(e)) => Err(anyhow::anyhow!("HTTP chunk error: {}", e)),
            None => Ok(None),
        }
    }
}

/// Recorded chunks replayed with their original timing (or quickly)
pub struct PlaybackChunkStream {
    chunks: Vec<RecordedChunk>,
    current_index: usize,
    start_time: Instant,
    fast_mode: bool,
}

impl PlaybackChunkStream {
    pub fn new(chunks: Vec<RecordedChunk>, fast_mode: bool) -> Self {
        Self {
            chunks,
            current_index: 0,
            start_time: Instant::now(),
            fast_mode,
        }
    }

    /// Build an instant playback stream from literal chunk texts
    pub fn from_texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let chunks = texts
            .into_iter()
            .map(|data| RecordedChunk {
                data: data.into(),
                timestamp_ms: 0,
            })
            .collect();
        Self::new(chunks, true)
    }
}

#[async_trait]
impl ChunkStream for PlaybackChunkStream {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        let Some(chunk) = self.chunks.get(self.current_index) else {
            return Ok(None);
        };

        if !self.fast_mode {
            let elapsed = self.start_time.elapsed();
            let expected_time = Duration::from_millis(chunk.timestamp_ms);
            if elapsed < expected_time {
                tokio::time::sleep(expected_time - elapsed).await;
            }
        } else {
            tokio::task::yield_now().await;
        }

        self.current_index += 1;
        Ok(Some(chunk.data.clone().into_bytes()))
    }
}

/// Wraps another stream and records every chunk passing through
pub struct RecordingChunkStream {
    inner: Box<dyn ChunkStream>,
    recorder: Arc<StreamRecorder>,
    decoder: Utf8Decoder,
}

impl RecordingChunkStream {
    pub fn new(inner: Box<dyn ChunkStream>, recorder: Arc<StreamRecorder>) -> Self {
        Self {
            inner,
            recorder,
            decoder: Utf8Decoder::new(),
        }
    }
}

#[async_trait]
impl ChunkStream for RecordingChunkStream {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        match self.inner.next_chunk().await? {
            Some(chunk) => {
                self.recorder.record_chunk(&self.decoder.decode(&chunk))?;
                Ok(Some(chunk))
            }
            None => {
                let rest = self.decoder.finish();
                if !rest.is_empty() {
                    self.recorder.record_chunk(&rest)?;
                }
                self.recorder.end_recording()?;
                Ok(None)
            }
        }
    }
}

/// Incremental UTF-8 decoder
///
/// A multi-byte character split across two chunks is held back until the
/// rest of it arrives. Invalid sequences decode to U+FFFD.
#[derive(Debug, Default, Clone)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let mut text = String::new();

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(valid) => {
                    text.push_str(valid);
                    self.pending.clear();
                    return text;
                }
                Err(error) => {
                    let valid_up_to = error.valid_up_to();
                    // from_utf8 guarantees this prefix is valid
                    text.push_str(&String::from_utf8_lossy(&self.pending[..valid_up_to]));
                    match error.error_len() {
                        // Incomplete sequence at the end: wait for more bytes
                        None => {
                            self.pending.drain(..valid_up_to);
                            return text;
                        }
                        Some(len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid_up_to + len);
                        }
                    }
                }
            }
        }
    }

    /// Flush whatever is still held back
    pub fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoder_joins_split_characters() {
        let bytes = "größe €".as_bytes();
        let mut decoder = Utf8Decoder::new();
        let mut text = String::new();
        for byte in bytes {
            text.push_str(&decoder.decode(std::slice::from_ref(byte)));
        }
        text.push_str(&decoder.finish());
        assert_eq!(text, "größe €");
    }

    #[test]
    fn decoder_replaces_invalid_bytes() {
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.decode(&[b'a', 0xff, b'b']), "a\u{fffd}b");
        assert_eq!(decoder.decode(&[0xe2, 0x82]), "");
        assert_eq!(decoder.finish(), "\u{fffd}");
    }

    #[tokio::test]
    async fn playback_yields_chunks_in_order() -> Result<()> {
        let mut stream = PlaybackChunkStream::from_texts(["a", "b"]);
        assert_eq!(stream.next_chunk().await?, Some(b"a".to_vec()));
        assert_eq!(stream.next_chunk().await?, Some(b"b".to_vec()));
        assert_eq!(stream.next_chunk().await?, None);
        Ok(())
    }
}
