use anyhow::{Context, Result};
use chat_stream::classifier::classify;
use chat_stream::cli::{parse_command, Args, ChatCommand, Mode};
use chat_stream::client::{
    ConversationApi, HistoryStore, HttpConversationApi, HttpHistoryStore, NullHistoryStore,
    PlaybackConversationApi,
};
use chat_stream::config::{get_config_path, ClientConfig};
use chat_stream::controller::{ChatController, ChatOptions, SendOutcome};
use chat_stream::logging::{chat_log_path, setup_logging};
use chat_stream::reader::StreamReader;
use chat_stream::recording::{PlaybackState, StreamRecorder};
use chat_stream::repair::repair_json;
use chat_stream::streaming::PlaybackChunkStream;
use chat_stream::ui::render::render_message;
use chat_stream::ui::terminal::TerminalUi;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::io::Read;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const HELP: &str = "Commands: /new, /switch <id>, /list, /quit. Ctrl-C stops a running answer.";

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    match &args.mode {
        Some(Mode::Repair { file, strategy }) => {
            setup_logging(args.verbose, None);
            run_repair(file.as_deref(), *strategy)
        }
        Some(Mode::Replay { file, query }) => {
            setup_logging(args.verbose, None);
            run_replay(file, query.as_deref()).await
        }
        None => {
            let log_file = args.log_file.clone().unwrap_or_else(chat_log_path);
            setup_logging(args.verbose, Some(log_file));
            run_chat(&args).await
        }
    }
}

fn run_repair(file: Option<&Path>, show_strategy: bool) -> Result<()> {
    let input = match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        None => {
            let mut input = String::new();
            std::io::stdin().read_to_string(&mut input)?;
            input
        }
    };

    let repaired = repair_json(&input);
    println!("{}", repaired.text);
    if show_strategy {
        eprintln!("{:?}", repaired.strategy);
    }
    if !repaired.is_repaired() {
        anyhow::bail!("Input could not be repaired");
    }
    Ok(())
}

async fn run_replay(file: &Path, query: Option<&str>) -> Result<()> {
    let state = PlaybackState::from_file(file, true)?;
    info!("Replaying {} recorded sessions", state.session_count());

    while let Some(session) = state.next_session() {
        let recorded_query = session
            .request
            .get("messages")
            .and_then(|messages| messages.as_array())
            .and_then(|messages| {
                messages
                    .iter()
                    .rev()
                    .find(|message| message["role"] == "user")
            })
            .and_then(|message| message["content"].as_str())
            .unwrap_or_default()
            .to_string();
        let query = query.map(str::to_string).unwrap_or(recorded_query);

        let mut stream = PlaybackChunkStream::new(session.chunks, true);
        let outcome = StreamReader::new()
            .read(&mut stream, &CancellationToken::new(), None)
            .await?;

        println!("> {query}");
        match classify(&outcome, &query) {
            Some(message) => println!("{}\n", render_message(&message)),
            None => println!("(empty response)\n"),
        }
    }
    Ok(())
}

fn load_config(args: &Args) -> Result<ClientConfig> {
    let path = match &args.config {
        Some(path) => path.clone(),
        None => get_config_path()?,
    };
    let mut config = ClientConfig::load_from(&path)?;
    config.apply_env(|key| std::env::var(key).ok())?;
    args.apply_to(&mut config);
    Ok(config)
}

fn build_api(args: &Args, config: &ClientConfig) -> Result<Arc<dyn ConversationApi>> {
    if let Some(path) = &args.playback {
        let state = PlaybackState::from_file(path, args.fast_playback)?;
        info!("Playing back {} recorded sessions", state.session_count());
        return Ok(Arc::new(PlaybackConversationApi::new(state)));
    }

    let mut api = HttpConversationApi::new(
        config.conversation_url.clone(),
        config.connect_timeout(),
    )?;
    if let Some(path) = &args.record {
        api = api.with_recorder(Arc::new(StreamRecorder::new(path)));
    }
    Ok(Arc::new(api))
}

async fn read_line(
    editor: Arc<Mutex<DefaultEditor>>,
    prompt: String,
) -> Result<Result<String, ReadlineError>> {
    let line = tokio::task::spawn_blocking(move || {
        let mut editor = editor.lock().unwrap();
        let line = editor.readline(&prompt);
        if let Ok(line) = &line {
            let _ = editor.add_history_entry(line.as_str());
        }
        line
    })
    .await?;
    Ok(line)
}

async fn run_chat(args: &Args) -> Result<()> {
    let config = load_config(args)?;
    debug!("Using configuration {:?}", config);

    let api = build_api(args, &config)?;
    let history: Arc<dyn HistoryStore> = match &config.history_url {
        Some(url) => Arc::new(HttpHistoryStore::new(url.clone(), config.connect_timeout())?),
        None => Arc::new(NullHistoryStore),
    };
    let options = ChatOptions {
        auto_chart: config.auto_chart,
        auto_chart_delay: config.auto_chart_delay(),
    };
    let controller = ChatController::new(api, history, Arc::new(TerminalUi::new()), options);

    let editor = Arc::new(Mutex::new(
        DefaultEditor::new().context("Failed to create line editor")?,
    ));
    println!("{HELP}");

    loop {
        let line = match read_line(editor.clone(), "> ".to_string()).await? {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };

        match parse_command(&line) {
            ChatCommand::Empty => {}
            ChatCommand::Send(text) => {
                let send = controller.send(&text);
                tokio::pin!(send);
                let outcome = tokio::select! {
                    outcome = &mut send => outcome,
                    _ = tokio::signal::ctrl_c() => {
                        controller.abort();
                        send.await
                    }
                };
                if outcome == SendOutcome::Ignored {
                    println!("Still answering the previous message.");
                }
            }
            ChatCommand::New => {
                let id = controller.new_conversation();
                println!("Started {id}");
            }
            ChatCommand::Switch(id) => match controller.switch_conversation(&id) {
                Ok(()) => {
                    for message in controller.transcript(&id) {
                        println!("{}", render_message(&message));
                    }
                }
                Err(e) => println!("{e}"),
            },
            ChatCommand::List => {
                for summary in controller.conversations() {
                    println!(
                        "{} {} {} ({} messages)",
                        if summary.active { "*" } else { " " },
                        summary.id,
                        summary.title.as_deref().unwrap_or("(untitled)"),
                        summary.message_count
                    );
                }
            }
            ChatCommand::Help => println!("{HELP}"),
            ChatCommand::Unknown(command) => println!("Unknown command {command}. {HELP}"),
            ChatCommand::Quit => break,
        }
    }

    controller.abort();
    Ok(())
}
