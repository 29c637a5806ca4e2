use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use anyhow::{Result, anyhow};

use crate::model::ViewMode;

pub const DEFAULT_API_URL: &str = "http://localhost:8000/api/v1";
pub const API_URL_ENV: &str = "DUALCHAT_API_URL";
const API_VERSION_SUFFIX: &str = "/api/v1";

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";
pub const MESSAGE_MAX_LENGTH: usize = 32_000;
pub const SYSTEM_PROMPT_MAX_LENGTH: usize = 4_000;

pub const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);
pub const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub view_mode: Option<String>,
}

impl Config {
    pub fn new() -> Self {
        Self {
            api_url: None,
            system_prompt: Some(DEFAULT_SYSTEM_PROMPT.to_string()),
            view_mode: Some(ViewMode::Both.as_str().to_string()),
        }
    }

    pub fn load() -> Result<Self> {
        let config_path = Self::get_config_path()?;

        if !config_path.exists() {
            return Ok(Self::new());
        }

        let config_content = fs::read_to_string(&config_path)?;
        let config: Config = serde_json::from_str(&config_content)?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::get_config_path()?;

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let config_content = serde_json::to_string_pretty(self)?;
        fs::write(&config_path, config_content)?;
        Ok(())
    }

    /// Env var first, then the config file, then the local default.
    pub fn api_url(&self) -> String {
        resolve_api_url(std::env::var(API_URL_ENV).ok(), self.api_url.as_deref())
    }

    pub fn system_prompt(&self) -> String {
        let prompt = self
            .system_prompt
            .as_deref()
            .unwrap_or(DEFAULT_SYSTEM_PROMPT);
        clamp_system_prompt(prompt)
    }

    pub fn view_mode(&self) -> ViewMode {
        self.view_mode
            .as_deref()
            .and_then(ViewMode::from_str)
            .unwrap_or_default()
    }

    fn get_config_path() -> Result<PathBuf> {
        Ok(data_dir()?.join("config.json"))
    }
}

/// `<config dir>/dualchat`, home of config, history and the log file.
pub fn data_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| anyhow!("Could not determine config directory"))?;

    Ok(config_dir.join("dualchat"))
}

fn resolve_api_url(from_env: Option<String>, from_file: Option<&str>) -> String {
    from_env
        .filter(|url| !url.trim().is_empty())
        .or_else(|| from_file.map(str::to_string))
        .unwrap_or_else(|| DEFAULT_API_URL.to_string())
}

/// Health lives at the server root, outside the versioned API prefix.
pub fn health_url(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let root = base.strip_suffix(API_VERSION_SUFFIX).unwrap_or(base);
    format!("{}/health", root)
}

pub fn clamp_system_prompt(prompt: &str) -> String {
    prompt.chars().take(SYSTEM_PROMPT_MAX_LENGTH).collect()
}
