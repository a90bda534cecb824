//! CLI configuration.
//!
//! Stored as TOML:
//! - Linux: `~/.config/codedrop/config.toml` (or `$XDG_CONFIG_HOME`)
//! - Windows: `%APPDATA%/codedrop/config.toml`

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// WebSocket URL of the signaling relay.
    #[serde(default = "default_signaling_url")]
    pub signaling_url: String,

    /// STUN/TURN server URLs handed to the peer connection.
    #[serde(default = "default_ice_servers")]
    pub ice_servers: Vec<String>,

    /// Where received files are saved.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Inactivity window in seconds before a session is abandoned.
    #[serde(default = "default_session_timeout_secs")]
    pub session_timeout_secs: u64,
}

fn default_signaling_url() -> String {
    "ws://127.0.0.1:8080/ws".into()
}

fn default_ice_servers() -> Vec<String> {
    vec!["stun:stun.l.google.com:19302".into()]
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_session_timeout_secs() -> u64 {
    codedrop_protocol::constants::SESSION_TIMEOUT.as_secs()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            signaling_url: default_signaling_url(),
            ice_servers: default_ice_servers(),
            output_dir: default_output_dir(),
            session_timeout_secs: default_session_timeout_secs(),
        }
    }
}

impl Config {
    /// Loads the configuration from its default location.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&config_path()?)
    }

    /// Loads configuration from `path`, writing defaults there if the file
    /// does not exist yet.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs.max(1))
    }
}

/// Returns the platform-specific configuration file path.
pub fn config_path() -> anyhow::Result<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        let base = match std::env::var_os("XDG_CONFIG_HOME") {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
                PathBuf::from(home).join(".config")
            }
        };
        Ok(base.join("codedrop").join("config.toml"))
    }

    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        Ok(PathBuf::from(appdata).join("codedrop").join("config.toml"))
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        Ok(PathBuf::from("/tmp/codedrop/config.toml"))
    }
}
