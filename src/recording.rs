use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Recorded conversation request with every raw body chunk
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RecordingSession {
    /// The request that was sent
    pub request: serde_json::Value,
    /// Timestamp of when the recording was started
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Decoded chunks as received from the conversation service
    pub chunks: Vec<RecordedChunk>,
}

/// Single recorded chunk with timing info
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RecordedChunk {
    pub data: String,
    /// Milliseconds since recording start
    pub timestamp_ms: u64,
}

/// Appends recorded sessions to a JSON array file
pub struct StreamRecorder {
    file_path: PathBuf,
    current_session: Mutex<Option<RecordingSession>>,
    start_time: Mutex<Option<Instant>>,
}

impl StreamRecorder {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            file_path: path.as_ref().to_path_buf(),
            current_session: Mutex::new(None),
            start_time: Mutex::new(None),
        }
    }

    pub fn start_recording(&self, request: serde_json::Value) -> Result<()> {
        let mut session_guard = self.current_session.lock().unwrap();
        let mut start_guard = self.start_time.lock().unwrap();

        *session_guard = Some(RecordingSession {
            request,
            timestamp: chrono::Utc::now(),
            chunks: Vec::new(),
        });
        *start_guard = Some(Instant::now());

        Ok(())
    }

    pub fn record_chunk(&self, data: &str) -> Result<()> {
        let mut session_guard = self.current_session.lock().unwrap();
        let start_guard = self.start_time.lock().unwrap();

        if let (Some(session), Some(start_time)) = (session_guard.as_mut(), *start_guard) {
            session.chunks.push(RecordedChunk {
                data: data.to_string(),
                timestamp_ms: start_time.elapsed().as_millis() as u64,
            });
        }

        Ok(())
    }

    /// End the current session and append it to the recording file
    pub fn end_recording(&self) -> Result<()> {
        let mut session_guard = self.current_session.lock().unwrap();
        let mut start_guard = self.start_time.lock().unwrap();
        *start_guard = None;

        let Some(session) = session_guard.take() else {
            return Ok(());
        };

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&self.file_path)
            .context("Failed to open recording file")?;

        let file_size = file.metadata()?.len();
        if file_size == 0 {
            writeln!(file, "[")?;
        } else {
            // Drop the closing "\n]\n" and continue the array
            file.set_len(file_size.saturating_sub(3))?;
            file.seek(std::io::SeekFrom::End(0))?;
            writeln!(file, ",")?;
        }

        let json = serde_json::to_string_pretty(&session)?;
        writeln!(file, "{json}")?;
        writeln!(file, "]")?;

        Ok(())
    }
}

/// Recorded sessions handed out one per request
#[derive(Clone)]
pub struct PlaybackState {
    sessions: Arc<Vec<RecordingSession>>,
    index: Arc<Mutex<usize>>,
    pub fast: bool,
}

impl PlaybackState {
    pub fn from_file<P: AsRef<Path>>(path: P, fast: bool) -> Result<Self> {
        let mut file = File::open(path).context("Failed to open recording file")?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .context("Failed to read recording file")?;
        let sessions: Vec<RecordingSession> =
            serde_json::from_str(&contents).context("Failed to parse recording file")?;
        Ok(Self {
            sessions: Arc::new(sessions),
            index: Arc::new(Mutex::new(0)),
            fast,
        })
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Take the next session, or None if exhausted
    pub fn next_session(&self) -> Option<RecordingSession> {
        let mut idx = self.index.lock().unwrap();
        let session = self.sessions.get(*idx)?.clone();
        *idx += 1;
        Some(session)
    }
}
