use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_PREFIX: &str = "CHAT_STREAM_";

/// Client settings. Resolved from the config file, then the environment,
/// then command line flags.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    pub conversation_url: String,
    /// History saving is off when unset
    pub history_url: Option<String>,
    pub auto_chart: bool,
    pub auto_chart_delay_ms: u64,
    pub connect_timeout_secs: Option<u64>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            conversation_url: "http://localhost:5000/conversation".to_string(),
            history_url: None,
            auto_chart: false,
            auto_chart_delay_ms: 1000,
            connect_timeout_secs: Some(30),
        }
    }
}

/// Get the path to the configuration file
pub fn get_config_path() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Could not determine home directory"))?;
    Ok(home.join(".config").join("chat-stream").join("config.json"))
}

impl ClientConfig {
    /// Defaults when the file does not exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Override settings from `CHAT_STREAM_*` variables
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(url) = var("CONVERSATION_URL") {
            self.conversation_url = url;
        }
        if let Some(url) = var("HISTORY_URL") {
            self.history_url = Some(url).filter(|url| !url.is_empty());
        }
        if let Some(flag) = var("AUTO_CHART") {
            self.auto_chart = matches!(flag.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Some(delay) = var("AUTO_CHART_DELAY_MS") {
            self.auto_chart_delay_ms = delay
                .parse()
                .with_context(|| format!("Invalid {ENV_PREFIX}AUTO_CHART_DELAY_MS: {delay}"))?;
        }
        if let Some(timeout) = var("TIMEOUT_SECS") {
            self.connect_timeout_secs = Some(
                timeout
                    .parse()
                    .with_context(|| format!("Invalid {ENV_PREFIX}TIMEOUT_SECS: {timeout}"))?,
            );
        }
        Ok(())
    }

    pub fn auto_chart_delay(&self) -> Duration {
        Duration::from_millis(self.auto_chart_delay_ms)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_secs.map(Duration::from_secs)
    }
}
