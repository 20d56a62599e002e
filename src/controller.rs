//! Merges classified responses into conversation transcripts.
//!
//! The controller owns every [`ConversationSession`]. A send appends the user
//! turn, streams the response, classifies it, appends the result and saves
//! the pair through the [`HistoryStore`]. The state lock is only taken for
//! short synchronous sections and never across an `.await`.

use crate::classifier::{classify, is_chart_query};
use crate::client::{ConversationApi, HistoryStore};
use crate::reader::{StreamOutcome, StreamReader, StreamUpdate, StreamingCallback};
use crate::session::{ConversationSession, AUTO_CHART_PROMPT};
use crate::types::{
    generate_conversation_id, ConversationRequest, HistorySaveRequest, Message, MessageRole,
    RenderKind,
};
use crate::ui::ChatUi;
use anyhow::Result;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct ChatOptions {
    /// Ask for a chart of every plain text answer
    pub auto_chart: bool,
    pub auto_chart_delay: Duration,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            auto_chart: false,
            auto_chart_delay: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// A response was classified and appended
    Completed,
    /// Another request was still running in that conversation
    Ignored,
    /// The request was cancelled; any partial answer was kept
    Aborted,
    /// The request failed and the user was alerted
    Failed,
}

/// Summary line for listing conversations
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationSummary {
    pub id: String,
    pub title: Option<String>,
    pub message_count: usize,
    pub active: bool,
}

struct ControllerState {
    sessions: HashMap<String, ConversationSession>,
    /// Local ids that the history service replaced
    aliases: HashMap<String, String>,
    active: String,
}

impl ControllerState {
    fn resolve(&self, id: &str) -> String {
        let mut current = id;
        while let Some(next) = self.aliases.get(current) {
            current = next;
        }
        current.to_string()
    }

    fn rename(&mut self, old: &str, new: &str) {
        if old == new || self.sessions.contains_key(new) {
            return;
        }
        if let Some(mut session) = self.sessions.remove(old) {
            debug!("Conversation {} is now {}", old, new);
            session.id = new.to_string();
            self.sessions.insert(new.to_string(), session);
            self.aliases.insert(old.to_string(), new.to_string());
            if self.active == old {
                self.active = new.to_string();
            }
        }
    }

    fn session(&mut self, id: &str) -> Option<&mut ConversationSession> {
        let key = self.resolve(id);
        self.sessions.get_mut(&key)
    }
}

struct Inner {
    api: Arc<dyn ConversationApi>,
    history: Arc<dyn HistoryStore>,
    ui: Arc<dyn ChatUi>,
    options: ChatOptions,
    state: Mutex<ControllerState>,
}

#[derive(Clone)]
pub struct ChatController {
    inner: Arc<Inner>,
}

impl ChatController {
    pub fn new(
        api: Arc<dyn ConversationApi>,
        history: Arc<dyn HistoryStore>,
        ui: Arc<dyn ChatUi>,
        options: ChatOptions,
    ) -> Self {
        let id = generate_conversation_id();
        let mut sessions = HashMap::new();
        sessions.insert(id.clone(), ConversationSession::new(id.clone()));

        Self {
            inner: Arc::new(Inner {
                api,
                history,
                ui,
                options,
                state: Mutex::new(ControllerState {
                    sessions,
                    aliases: HashMap::new(),
                    active: id,
                }),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ControllerState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn active_id(&self) -> String {
        self.lock().active.clone()
    }

    pub fn is_generating(&self, conversation_id: &str) -> bool {
        self.lock()
            .session(conversation_id)
            .is_some_and(|session| session.is_generating())
    }

    /// Visible transcript of a conversation
    pub fn transcript(&self, conversation_id: &str) -> Vec<Message> {
        self.lock()
            .session(conversation_id)
            .map(|session| session.visible_messages())
            .unwrap_or_default()
    }

    pub fn conversations(&self) -> Vec<ConversationSummary> {
        let state = self.lock();
        let mut summaries: Vec<_> = state
            .sessions
            .values()
            .map(|session| ConversationSummary {
                id: session.id.clone(),
                title: session.title.clone(),
                message_count: session.visible_messages().len(),
                active: session.id == state.active,
            })
            .collect();
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        summaries
    }

    /// Cancel whatever runs in the active conversation
    pub fn abort(&self) -> bool {
        let mut state = self.lock();
        let active = state.active.clone();
        state
            .session(&active)
            .is_some_and(|session| session.abort())
    }

    /// Abort the active conversation and start an empty one
    pub fn new_conversation(&self) -> String {
        let mut state = self.lock();
        let active = state.active.clone();
        if let Some(session) = state.session(&active) {
            session.abort();
        }

        let id = generate_conversation_id();
        state
            .sessions
            .insert(id.clone(), ConversationSession::new(id.clone()));
        state.active = id.clone();
        info!("Started conversation {}", id);
        id
    }

    /// Abort the active conversation and make `conversation_id` active
    pub fn switch_conversation(&self, conversation_id: &str) -> Result<()> {
        let mut state = self.lock();
        let target = state.resolve(conversation_id);
        if !state.sessions.contains_key(&target) {
            anyhow::bail!("Unknown conversation: {}", conversation_id);
        }

        let active = state.active.clone();
        if active != target {
            if let Some(session) = state.session(&active) {
                session.abort();
            }
            state.active = target;
        }
        Ok(())
    }

    /// Send a user message in the active conversation
    pub async fn send(&self, text: &str) -> SendOutcome {
        let conversation_id = self.active_id();
        self.send_to(&conversation_id, text.to_string(), None).await
    }

    async fn send_to(
        &self,
        conversation_id: &str,
        text: String,
        rag_override: Option<String>,
    ) -> SendOutcome {
        let prepared = {
            let mut state = self.lock();
            let key = state.resolve(conversation_id);
            let session = state
                .sessions
                .entry(key.clone())
                .or_insert_with(|| ConversationSession::new(key.clone()));

            match session.begin_generation() {
                None => None,
                Some(token) => {
                    session.cancel_follow_up();
                    session.messages.push(Message::user(text.clone()));

                    let last_rag_response = rag_override.or_else(|| {
                        is_chart_query(&text)
                            .then(|| session.last_rag_response.clone())
                            .flatten()
                    });
                    let request = ConversationRequest {
                        id: key.clone(),
                        messages: session.request_messages(),
                        last_rag_response,
                    };
                    Some((key, token, request, session.visible_messages()))
                }
            }
        };

        let Some((key, token, request, visible)) = prepared else {
            debug!("Ignoring send while a response is generating");
            return SendOutcome::Ignored;
        };
        self.inner.ui.transcript_changed(&key, &visible);

        let ui = self.inner.ui.clone();
        let partial_key = key.clone();
        let callback: StreamingCallback = Box::new(move |update: &StreamUpdate| {
            ui.show_partial(&partial_key, update);
            Ok(())
        });

        let result = self.stream_response(&request, &token, &callback).await;

        match result {
            Err(error) => {
                self.finish_generation(&key);
                if token.is_cancelled() {
                    debug!("Request failed after cancellation: {}", error);
                    return SendOutcome::Aborted;
                }
                warn!("Conversation request failed: {}", error);
                self.inner.ui.alert(&error.to_string());
                SendOutcome::Failed
            }
            Ok(outcome) if outcome.cancelled => {
                if let Some(answer) = outcome.partial_answer() {
                    let mut message = Message::assistant_text(
                        answer,
                        outcome
                            .latest
                            .as_ref()
                            .and_then(|latest| latest.citations.clone()),
                    );
                    message.aborted = true;
                    self.finalize(&key, message).await;
                }
                self.finish_generation(&key);
                SendOutcome::Aborted
            }
            Ok(outcome) => {
                let Some(message) = classify(&outcome, &text) else {
                    debug!("Response carried no content");
                    self.finish_generation(&key);
                    return SendOutcome::Completed;
                };

                let follow_up = (message.role == MessageRole::Assistant
                    && message.render_kind() == RenderKind::Text)
                    .then(|| message.content.as_text().map(str::to_string))
                    .flatten();

                let key = self.finalize(&key, message).await;
                self.finish_generation(&key);

                if let Some(answer) = follow_up {
                    if let Some(session) = self.lock().session(&key) {
                        session.last_rag_response = Some(answer.clone());
                    }
                    if self.inner.options.auto_chart
                        && text != AUTO_CHART_PROMPT
                        && !is_chart_query(&text)
                    {
                        self.schedule_auto_chart(&key, answer);
                    }
                }
                SendOutcome::Completed
            }
        }
    }

    async fn stream_response(
        &self,
        request: &ConversationRequest,
        token: &CancellationToken,
        callback: &StreamingCallback,
    ) -> Result<StreamOutcome> {
        let mut stream = tokio::select! {
            biased;
            _ = token.cancelled() => {
                return Ok(StreamOutcome {
                    cancelled: true,
                    ..Default::default()
                });
            }
            stream = self.inner.api.open_stream(request) => stream?,
        };

        StreamReader::new()
            .read(stream.as_mut(), token, Some(callback))
            .await
    }

    fn finish_generation(&self, conversation_id: &str) {
        if let Some(session) = self.lock().session(conversation_id) {
            session.finish_generation();
        }
    }

    /// Append the assistant turn and save it together with its user turn.
    /// Returns the conversation key, which the first save may replace.
    async fn finalize(&self, conversation_id: &str, message: Message) -> String {
        let (key, visible, save) = {
            let mut state = self.lock();
            let key = state.resolve(conversation_id);
            let Some(session) = state.sessions.get_mut(&key) else {
                return key;
            };

            let user = session
                .messages
                .iter()
                .rev()
                .find(|m| m.role == MessageRole::User)
                .cloned();
            session.messages.push(message.clone());

            let save = HistorySaveRequest {
                conversation_id: session.persisted.then(|| key.clone()),
                messages: user.into_iter().chain(Some(message)).collect(),
            };
            (key, session.visible_messages(), save)
        };
        self.inner.ui.transcript_changed(&key, &visible);

        match self.inner.history.save(&save).await {
            Ok(saved) => {
                let mut state = self.lock();
                let key = state.resolve(&key);
                state.rename(&key, &saved.conversation_id);
                let canonical = state.resolve(&key);
                if let Some(session) = state.sessions.get_mut(&canonical) {
                    session.persisted = true;
                    if saved.title.is_some() {
                        session.title = saved.title;
                    }
                }
                canonical
            }
            Err(error) => {
                warn!("Failed to save conversation history: {}", error);
                key
            }
        }
    }

    fn schedule_auto_chart(&self, conversation_id: &str, answer: String) {
        let mut state = self.lock();
        let Some(session) = state.session(conversation_id) else {
            return;
        };

        let controller = self.clone();
        let delay = self.inner.options.auto_chart_delay;
        let key = session.id.clone();
        debug!("Scheduling chart follow-up for {} in {:?}", key, delay);

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(session) = controller.lock().session(&key) {
                session.detach_follow_up();
            }
            controller
                .send_to(&key, AUTO_CHART_PROMPT.to_string(), Some(answer))
                .await;
        });
        session.set_follow_up(handle);
    }
}
