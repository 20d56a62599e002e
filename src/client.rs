use crate::error::ChatError;
use crate::recording::{PlaybackState, StreamRecorder};
use crate::streaming::{ChunkStream, HttpChunkStream, PlaybackChunkStream, RecordingChunkStream};
use crate::types::{ConversationRequest, HistorySaveRequest, SavedConversation};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Opens a streaming response for one conversation request
#[async_trait]
pub trait ConversationApi: Send + Sync {
    async fn open_stream(&self, request: &ConversationRequest) -> Result<Box<dyn ChunkStream>>;
}

/// Persists finished turns
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn save(&self, request: &HistorySaveRequest) -> Result<SavedConversation>;
}

/// Turn a non-success response into a [`ChatError`]
pub async fn check_response_error(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let response_text = response
        .text()
        .await
        .map_err(|e| ChatError::NetworkError(e.to_string()))?;

    Err(ChatError::from_status(status, response_text).into())
}

fn build_client(connect_timeout: Option<Duration>) -> Result<Client> {
    let mut builder = Client::builder();
    // Bounds connecting only, never the streamed body
    if let Some(timeout) = connect_timeout {
        builder = builder.connect_timeout(timeout);
    }
    builder.build().context("Failed to build HTTP client")
}

pub struct HttpConversationApi {
    client: Client,
    url: String,
    recorder: Option<Arc<StreamRecorder>>,
}

impl HttpConversationApi {
    pub fn new(url: String, connect_timeout: Option<Duration>) -> Result<Self> {
        Ok(Self {
            client: build_client(connect_timeout)?,
            url,
            recorder: None,
        })
    }

    /// Record every response body into `recorder`
    pub fn with_recorder(mut self, recorder: Arc<StreamRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }
}

#[async_trait]
impl ConversationApi for HttpConversationApi {
    async fn open_stream(&self, request: &ConversationRequest) -> Result<Box<dyn ChunkStream>> {
        debug!(
            "Sending conversation request {} with {} messages",
            request.id,
            request.messages.len()
        );

        let response = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| ChatError::NetworkError(e.to_string()))?;

        let response = check_response_error(response).await?;
        let stream: Box<dyn ChunkStream> = Box::new(HttpChunkStream::new(response));

        match &self.recorder {
            Some(recorder) => {
                recorder.start_recording(serde_json::to_value(request)?)?;
                Ok(Box::new(RecordingChunkStream::new(stream, recorder.clone())))
            }
            None => Ok(stream),
        }
    }
}

/// Serves recorded sessions in order instead of calling the service
pub struct PlaybackConversationApi {
    state: PlaybackState,
}

impl PlaybackConversationApi {
    pub fn new(state: PlaybackState) -> Self {
        Self { state }
    }
}

#[async_trait]
impl ConversationApi for PlaybackConversationApi {
    async fn open_stream(&self, request: &ConversationRequest) -> Result<Box<dyn ChunkStream>> {
        let session = self
            .state
            .next_session()
            .ok_or_else(|| anyhow::anyhow!("No more recorded sessions to play back"))?;
        debug!(
            "Playing back {} recorded chunks for request {}",
            session.chunks.len(),
            request.id
        );
        Ok(Box::new(PlaybackChunkStream::new(
            session.chunks,
            self.state.fast,
        )))
    }
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Option<SavedConversation>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

pub struct HttpHistoryStore {
    client: Client,
    url: String,
}

impl HttpHistoryStore {
    pub fn new(url: String, connect_timeout: Option<Duration>) -> Result<Self> {
        Ok(Self {
            client: build_client(connect_timeout)?,
            url,
        })
    }
}

#[async_trait]
impl HistoryStore for HttpHistoryStore {
    async fn save(&self, request: &HistorySaveRequest) -> Result<SavedConversation> {
        let response = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(|e| ChatError::NetworkError(e.to_string()))?;

        let response = check_response_error(response).await?;
        let body: HistoryResponse = response
            .json()
            .await
            .context("Failed to parse history response")?;

        match body {
            HistoryResponse {
                success: true,
                data: Some(saved),
                ..
            } => Ok(saved),
            HistoryResponse { error, .. } => Err(ChatError::History(
                error
                    .map(|error| crate::shape::error_text(&error))
                    .unwrap_or_else(|| "save was not acknowledged".to_string()),
            )
            .into()),
        }
    }
}

/// Accepts every save and hands back the session's own id
pub struct NullHistoryStore;

#[async_trait]
impl HistoryStore for NullHistoryStore {
    async fn save(&self, request: &HistorySaveRequest) -> Result<SavedConversation> {
        Ok(SavedConversation {
            conversation_id: request
                .conversation_id
                .clone()
                .unwrap_or_else(crate::types::generate_conversation_id),
            title: None,
            date: None,
        })
    }
}
