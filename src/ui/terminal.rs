use super::render::render_message;
use super::ChatUi;
use crate::reader::StreamUpdate;
use crate::types::{Message, MessageRole, RenderKind};
use std::io::{self, Write};
use std::sync::Mutex;

struct Colors {
    reset: &'static str,
    dim: &'static str,
    bold: &'static str,
    green: &'static str,
    red: &'static str,
    cyan: &'static str,
}

impl Colors {
    fn new() -> Self {
        Colors {
            reset: "\x1b[0m",
            dim: "\x1b[2m",
            bold: "\x1b[1m",
            green: "\x1b[32m",
            red: "\x1b[31m",
            cyan: "\x1b[36m",
        }
    }
}

// What has been written for the request in flight
#[derive(Default)]
struct StreamingState {
    conversation_id: String,
    printed: String,
}

pub struct TerminalUi {
    colors: Colors,
    state: Mutex<StreamingState>,
    out: Mutex<Box<dyn Write + Send>>,
}

impl TerminalUi {
    pub fn new() -> Self {
        Self::with_writer(Box::new(io::stdout()))
    }

    pub fn with_writer(out: Box<dyn Write + Send>) -> Self {
        Self {
            colors: Colors::new(),
            state: Mutex::new(StreamingState::default()),
            out: Mutex::new(out),
        }
    }

    fn write(&self, text: &str) {
        let mut out = self.out.lock().unwrap();
        // Terminal output is best effort
        let _ = write!(out, "{text}");
        let _ = out.flush();
    }

    fn format_message(&self, message: &Message) -> String {
        let body = render_message(message);
        match (message.role, message.render_kind()) {
            (_, RenderKind::Error) => {
                format!("{}{}✗ {}{}\n", self.colors.red, self.colors.bold, body, self.colors.reset)
            }
            (_, RenderKind::Chart) => format!("{}{}{}\n", self.colors.cyan, body, self.colors.reset),
            (MessageRole::User, _) => format!(
                "{}> {}{}\n",
                self.colors.green, self.colors.reset, body
            ),
            _ => format!("{body}\n"),
        }
    }
}

impl Default for TerminalUi {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatUi for TerminalUi {
    fn show_partial(&self, conversation_id: &str, update: &StreamUpdate) {
        let mut state = self.state.lock().unwrap();
        if state.conversation_id != conversation_id {
            state.conversation_id = conversation_id.to_string();
            state.printed.clear();
        }

        // Snapshots normally extend what is on screen; anything else is
        // printed again from the start.
        let text = match update.answer.strip_prefix(state.printed.as_str()) {
            Some(suffix) => suffix.to_string(),
            None => format!("\n{}", update.answer),
        };
        state.printed = update.answer.clone();
        drop(state);

        self.write(&text);
    }

    fn transcript_changed(&self, conversation_id: &str, messages: &[Message]) {
        let Some(last) = messages.last() else {
            return;
        };
        if last.role == MessageRole::User {
            return;
        }

        let mut state = self.state.lock().unwrap();
        let streamed = state.conversation_id == conversation_id
            && !state.printed.is_empty()
            && last.content.as_text() == Some(state.printed.as_str());
        state.printed.clear();
        drop(state);

        if streamed {
            // Answer is already on screen, only the trailer is missing
            let rendered = render_message(last);
            let trailer = rendered
                .strip_prefix(last.content.as_text().unwrap_or_default())
                .unwrap_or_default();
            self.write(&format!("{}{}{}\n", self.colors.dim, trailer, self.colors.reset));
        } else {
            self.write("\n");
            self.write(&self.format_message(last));
        }
    }

    fn alert(&self, text: &str) {
        self.write(&format!(
            "\n{}{}Error:{} {}\n",
            self.colors.red, self.colors.bold, self.colors.reset, text
        ));
    }
}
