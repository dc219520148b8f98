use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Agent configuration. Loaded from a TOML file with defaults
/// filled in for anything the file omits, following the same
/// load-or-create-default pattern used elsewhere for this agent's config.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    pub controller_url: String,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub agent_id_override: Option<String>,
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,
    #[serde(default)]
    pub remote: RemoteConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct RemoteConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default = "default_remote_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub key_path: Option<PathBuf>,
    #[serde(default = "default_remote_timeout")]
    pub timeout_secs: u64,
}

fn default_reconnect_delay() -> u64 {
    5
}

fn default_max_reconnect_attempts() -> u32 {
    0 // 0 means unbounded retries
}

fn default_concurrency_limit() -> usize {
    1
}

fn default_remote_port() -> u16 {
    22
}

fn default_remote_timeout() -> u64 {
    30
}

impl Default for Config {
    fn default() -> Self {
        Self {
            controller_url: "ws://localhost:3000/ws/agent".to_string(),
            username: "admin".to_string(),
            password: "change-me".to_string(),
            agent_id_override: None,
            reconnect_delay_secs: default_reconnect_delay(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            concurrency_limit: default_concurrency_limit(),
            remote: RemoteConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from the platform-appropriate file, creating a
    /// default one on first run.
    pub async fn load() -> Result<Self> {
        let config_path = Self::get_config_path()?;

        if config_path.exists() {
            Self::load_from_file(&config_path).await
        } else {
            let config = Self::default();
            config.save_to_file(&config_path).await?;
            Ok(config)
        }
    }

    pub async fn load_from_file(path: &PathBuf) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub async fn save_to_file(&self, path: &PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let content = toml::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    pub fn get_config_path() -> Result<PathBuf> {
        #[cfg(target_os = "windows")]
        {
            let mut path = PathBuf::from(
                std::env::var("PROGRAMDATA").unwrap_or_else(|_| "C:\\ProgramData".to_string()),
            );
            path.push("Ogent");
            path.push("config.toml");
            Ok(path)
        }

        #[cfg(target_os = "macos")]
        {
            let mut path = PathBuf::from("/Library/Application Support");
            path.push("Ogent");
            path.push("config.toml");
            Ok(path)
        }

        #[cfg(target_os = "linux")]
        {
            let mut path = PathBuf::from("/etc");
            path.push("ogent");
            path.push("config.toml");
            Ok(path)
        }

        #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
        {
            let mut path = std::env::current_dir()?;
            path.push("config.toml");
            Ok(path)
        }
    }
}
