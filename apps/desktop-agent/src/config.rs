//! Agent configuration file (`~/.deskrelay/agent.json`).

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use deskrelay_executor::{EncodeOptions, StreamConfig};
use deskrelay_transport::AgentConfig;
use serde::{Deserialize, Serialize};

const CONFIG_DIR: &str = ".deskrelay";
const CONFIG_FILE: &str = "agent.json";

/// Settings read from disk. Missing keys take the defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub relay_url: String,
    pub fps: f64,
    pub max_width: u32,
    pub max_height: u32,
    pub jpeg_quality: u8,
    pub capture_backoff_ms: u64,
    pub settle_delay_ms: u64,
    pub reconnect_delay_secs: u64,
    /// Screenshot command with an `{output}` placeholder; detected if unset.
    pub capture_command: Option<String>,
}

impl Default for FileConfig {
    fn default() -> Self {
        let encode = EncodeOptions::default();
        Self {
            relay_url: "ws://localhost:8000/ws".to_string(),
            fps: 5.0,
            max_width: encode.max_width,
            max_height: encode.max_height,
            jpeg_quality: encode.quality,
            capture_backoff_ms: 1000,
            settle_delay_ms: 300,
            reconnect_delay_secs: 5,
            capture_command: None,
        }
    }
}

impl FileConfig {
    /// Default location under the home directory.
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Read `path`, falling back to defaults when it does not exist.
    ///
    /// # Errors
    /// Returns error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", path.display()));
            }
        };
        serde_json::from_str(&text).with_context(|| format!("invalid config in {}", path.display()))
    }

    #[must_use]
    pub fn into_agent_config(self, access_code: String) -> AgentConfig {
        let mut config = AgentConfig::new(self.relay_url, access_code);
        config.stream = StreamConfig {
            fps: self.fps,
            encode: EncodeOptions {
                max_width: self.max_width,
                max_height: self.max_height,
                quality: self.jpeg_quality,
            },
            error_backoff: Duration::from_millis(self.capture_backoff_ms),
        };
        config.settle_delay = Duration::from_millis(self.settle_delay_ms);
        config.reconnect_delay = Duration::from_secs(self.reconnect_delay_secs);
        config
    }
}
