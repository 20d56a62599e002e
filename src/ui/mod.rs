pub mod render;
pub mod terminal;

use crate::reader::StreamUpdate;
use crate::types::Message;
use std::sync::Mutex;

/// Presentation surface driven by the controller.
///
/// Calls arrive from the task running a request, so implementations must not
/// block for long.
pub trait ChatUi: Send + Sync {
    /// Latest answer snapshot of an in-flight request
    fn show_partial(&self, conversation_id: &str, update: &StreamUpdate);

    /// The visible transcript of a conversation changed
    fn transcript_changed(&self, conversation_id: &str, messages: &[Message]);

    /// A failure the user has to acknowledge
    fn alert(&self, text: &str);
}

/// Event captured by [`RecordingUi`]
#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    Partial { conversation_id: String, answer: String },
    Transcript { conversation_id: String, messages: Vec<Message> },
    Alert(String),
}

/// Keeps every call, for tests and headless runs
#[derive(Default)]
pub struct RecordingUi {
    events: Mutex<Vec<UiEvent>>,
}

impl RecordingUi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<UiEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn alerts(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                UiEvent::Alert(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn partials(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                UiEvent::Partial { answer, .. } => Some(answer),
                _ => None,
            })
            .collect()
    }
}

impl ChatUi for RecordingUi {
    fn show_partial(&self, conversation_id: &str, update: &StreamUpdate) {
        self.events.lock().unwrap().push(UiEvent::Partial {
            conversation_id: conversation_id.to_string(),
            answer: update.answer.clone(),
        });
    }

    fn transcript_changed(&self, conversation_id: &str, messages: &[Message]) {
        self.events.lock().unwrap().push(UiEvent::Transcript {
            conversation_id: conversation_id.to_string(),
            messages: messages.to_vec(),
        });
    }

    fn alert(&self, text: &str) {
        self.events
            .lock()
            .unwrap()
            .push(UiEvent::Alert(text.to_string()));
    }
}
