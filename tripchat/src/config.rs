use crate::types::{DEFAULT_MAX_TOKENS, DEFAULT_MODEL, DEFAULT_TEMPERATURE};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://www.blueshirtmap.com/v1";
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_MAX_PROMPT_CHARS: usize = 20_000;

pub const ENV_API_KEY: &str = "TRIPCHAT_API_KEY";
pub const ENV_BASE_URL: &str = "TRIPCHAT_BASE_URL";
pub const ENV_MODEL: &str = "TRIPCHAT_MODEL";

/// Settings for a [`crate::ChatClient`], as stored in `config.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// API root; `/chat/completions` is appended unless already present.
    pub base_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Model used when a call does not name one.
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u64,
    pub timeout_secs: u64,
    /// Prompts longer than this many characters are cut. `null` disables the cut.
    pub max_prompt_chars: Option<usize>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_prompt_chars: Some(DEFAULT_MAX_PROMPT_CHARS),
        }
    }
}

impl ChatConfig {
    /// `~/.tripchat/config.json`
    pub fn default_path() -> PathBuf {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        home.join(".tripchat").join("config.json")
    }

    /// Read the config file, falling back to defaults when it does not exist.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let cfg = serde_json::from_str(&raw)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(cfg)
    }

    /// Read the config file, then apply `TRIPCHAT_*` environment overrides.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        Ok(Self::from_file(path)?.with_overrides(|name| std::env::var(name).ok()))
    }

    /// Apply overrides from `lookup` (normally the process environment).
    /// Empty values are ignored.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        if let Some(key) = get(ENV_API_KEY) {
            self.api_key = Some(key);
        }
        if let Some(url) = get(ENV_BASE_URL) {
            self.base_url = url;
        }
        if let Some(model) = get(ENV_MODEL) {
            self.model = model;
        }
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
