//! Client pipeline for a streaming chat service: reads newline-delimited
//! response records, repairs malformed chart JSON, classifies the final
//! answer and reconciles it into persisted conversation transcripts.

pub mod classifier;
pub mod cli;
pub mod client;
pub mod config;
pub mod controller;
pub mod error;
pub mod extract;
pub mod logging;
pub mod reader;
pub mod recording;
pub mod repair;
pub mod session;
pub mod shape;
pub mod streaming;
pub mod types;
pub mod ui;


pub use classifier::{classify, is_chart_query};
pub use client::{ConversationApi, HistoryStore};
pub use controller::{ChatController, ChatOptions, SendOutcome};
pub use error::{ChatError, StreamingError};
pub use reader::{StreamOutcome, StreamReader, StreamUpdate, StreamingCallback};
pub use repair::{repair, repair_json, RepairStrategy, Repaired};
pub use types::{ChartPayload, Citation, Message, MessageContent, MessageRole, RenderKind};
