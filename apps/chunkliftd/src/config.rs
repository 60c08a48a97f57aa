//! Daemon configuration management.
//!
//! Configuration is stored as TOML at `~/.config/chunklift/chunkliftd.toml`
//! and created with defaults on first run.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// TCP port the WebSocket server listens on (0 = OS-assigned).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Root directory for chunk and final-file storage.
    #[serde(default = "default_upload_dir")]
    pub upload_dir: String,
}

fn default_port() -> u16 {
    1234
}

fn default_upload_dir() -> String {
    "~/.local/share/chunklift/upload".into()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            upload_dir: default_upload_dir(),
        }
    }
}

impl Config {
    /// Loads configuration from disk, or creates a default if not found.
    pub fn load() -> anyhow::Result<Self> {
        let path = config_path();

        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    /// Saves the current configuration to disk.
    pub fn save(&self) -> anyhow::Result<()> {
        let path = config_path();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Returns the upload directory with `~` expanded.
    pub fn upload_path(&self) -> PathBuf {
        expand_home(&self.upload_dir)
    }
}

fn config_path() -> PathBuf {
    expand_home("~/.config/chunklift").join("chunkliftd.toml")
}

/// Expands a `~` prefix to the user's home directory.
fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        home_dir().join(rest)
    } else if path == "~" {
        home_dir()
    } else {
        PathBuf::from(path)
    }
}

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}
