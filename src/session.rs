use crate::types::{Message, MessageRole};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Prompt sent by the automatic chart follow-up. Never shown to the user.
pub const AUTO_CHART_PROMPT: &str = "show in a graph by default";

/// State of a single conversation
pub struct ConversationSession {
    pub id: String,
    pub title: Option<String>,
    pub messages: Vec<Message>,
    /// Previous assistant answer, replayed for chart follow-ups
    pub last_rag_response: Option<String>,
    /// Whether the history service knows this conversation
    pub persisted: bool,
    generating: bool,
    cancel: Option<CancellationToken>,
    follow_up: Option<JoinHandle<()>>,
}

impl ConversationSession {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: None,
            messages: Vec::new(),
            last_rag_response: None,
            persisted: false,
            generating: false,
            cancel: None,
            follow_up: None,
        }
    }

    pub fn is_generating(&self) -> bool {
        self.generating
    }

    /// Claim the session for a new request. Returns `None` while another
    /// request is still in flight.
    pub fn begin_generation(&mut self) -> Option<CancellationToken> {
        if self.generating {
            return None;
        }
        let token = CancellationToken::new();
        self.generating = true;
        self.cancel = Some(token.clone());
        Some(token)
    }

    pub fn finish_generation(&mut self) {
        self.generating = false;
        self.cancel = None;
    }

    /// Cancel the in-flight request and any pending follow-up.
    /// Returns whether a request was running.
    pub fn abort(&mut self) -> bool {
        self.cancel_follow_up();
        match &self.cancel {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn set_follow_up(&mut self, handle: JoinHandle<()>) {
        if let Some(previous) = self.follow_up.replace(handle) {
            previous.abort();
        }
    }

    pub fn cancel_follow_up(&mut self) {
        if let Some(handle) = self.follow_up.take() {
            handle.abort();
        }
    }

    /// Forget the follow-up handle without aborting it. The follow-up task
    /// calls this on itself right before it sends.
    pub fn detach_follow_up(&mut self) {
        self.follow_up.take();
    }

    /// Transcript as shown to the user
    pub fn visible_messages(&self) -> Vec<Message> {
        self.messages
            .iter()
            .filter(|message| !is_auto_chart_prompt(message))
            .cloned()
            .collect()
    }

    /// Messages forwarded to the conversation service
    pub fn request_messages(&self) -> Vec<Message> {
        self.messages
            .iter()
            .filter(|message| message.role != MessageRole::Error)
            .cloned()
            .collect()
    }
}

fn is_auto_chart_prompt(message: &Message) -> bool {
    message.role == MessageRole::User && message.content.as_text() == Some(AUTO_CHART_PROMPT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_second_generation() {
        let mut session = ConversationSession::new("conv");
        let token = session.begin_generation().unwrap();
        assert!(session.begin_generation().is_none());

        assert!(session.abort());
        assert!(token.is_cancelled());
        // Still claimed until the running request finalizes
        assert!(session.is_generating());

        session.finish_generation();
        assert!(session.begin_generation().is_some());
    }

    #[test]
    fn abort_without_request() {
        let mut session = ConversationSession::new("conv");
        assert!(!session.abort());
    }

    #[test]
    fn hides_auto_chart_prompt() {
        let mut session = ConversationSession::new("conv");
        session.messages.push(Message::user("revenue by quarter"));
        session
            .messages
            .push(Message::assistant_text("Q1 was best", None));
        session.messages.push(Message::user(AUTO_CHART_PROMPT));
        session.messages.push(Message::error("rate limited"));

        let visible = session.visible_messages();
        assert_eq!(visible.len(), 3);
        assert!(visible
            .iter()
            .all(|m| m.content.as_text() != Some(AUTO_CHART_PROMPT)));

        let outgoing = session.request_messages();
        assert_eq!(outgoing.len(), 3);
        assert!(outgoing.iter().all(|m| m.role != MessageRole::Error));
    }

    #[tokio::test]
    async fn abort_cancels_pending_follow_up() {
        let mut session = ConversationSession::new("conv");
        let handle = tokio::spawn(async {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
        });
        session.set_follow_up(handle);
        assert!(session.follow_up.is_some());

        session.abort();
        assert!(session.follow_up.is_none());
    }
}
