use crate::config::ClientConfig;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Subcommand, Debug)]
pub enum Mode {
    /// Repair a JSON document read from a file (or stdin) and print it
    Repair {
        file: Option<PathBuf>,

        /// Report which repair step succeeded on stderr
        #[arg(long)]
        strategy: bool,
    },

    /// Run recorded response streams through the reader and classifier
    Replay {
        file: PathBuf,

        /// Query to classify against (defaults to the recorded user message)
        #[arg(short, long)]
        query: Option<String>,
    },
}

/// Define the application arguments
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub mode: Option<Mode>,

    /// Configuration file (defaults to ~/.config/chat-stream/config.json)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Conversation endpoint
    #[arg(long)]
    pub conversation_url: Option<String>,

    /// History save endpoint
    #[arg(long)]
    pub history_url: Option<String>,

    /// Request a chart after every text answer
    #[arg(long)]
    pub auto_chart: bool,

    /// Delay before the automatic chart request, in milliseconds
    #[arg(long)]
    pub auto_chart_delay_ms: Option<u64>,

    /// Connect timeout in seconds (does not bound the streamed body)
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Enable verbose logging (use multiple times for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Log file for interactive mode
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Record response streams to a file
    #[arg(long)]
    pub record: Option<PathBuf>,

    /// Play back recorded response streams instead of calling the service
    #[arg(long)]
    pub playback: Option<PathBuf>,

    /// Fast playback mode - ignore chunk timing when playing recordings
    #[arg(long)]
    pub fast_playback: bool,
}

impl Args {
    pub fn parse() -> Self {
        <Args as Parser>::parse()
    }

    /// Flags take precedence over file and environment
    pub fn apply_to(&self, config: &mut ClientConfig) {
        if let Some(url) = &self.conversation_url {
            config.conversation_url = url.clone();
        }
        if let Some(url) = &self.history_url {
            config.history_url = Some(url.clone());
        }
        if self.auto_chart {
            config.auto_chart = true;
        }
        if let Some(delay) = self.auto_chart_delay_ms {
            config.auto_chart_delay_ms = delay;
        }
        if let Some(timeout) = self.timeout {
            config.connect_timeout_secs = Some(timeout);
        }
    }
}

/// A line typed at the interactive prompt
#[derive(Debug, PartialEq)]
pub enum ChatCommand {
    Send(String),
    New,
    Switch(String),
    List,
    Quit,
    Help,
    Empty,
    Unknown(String),
}

pub fn parse_command(line: &str) -> ChatCommand {
    let line = line.trim();
    if line.is_empty() {
        return ChatCommand::Empty;
    }
    let Some(command) = line.strip_prefix('/') else {
        return ChatCommand::Send(line.to_string());
    };

    let (name, rest) = command
        .split_once(char::is_whitespace)
        .map(|(name, rest)| (name, rest.trim()))
        .unwrap_or((command, ""));

    match (name, rest) {
        ("new", _) => ChatCommand::New,
        ("switch", id) if !id.is_empty() => ChatCommand::Switch(id.to_string()),
        ("list", _) => ChatCommand::List,
        ("quit" | "exit", _) => ChatCommand::Quit,
        ("help", _) => ChatCommand::Help,
        _ => ChatCommand::Unknown(line.to_string()),
    }
}
