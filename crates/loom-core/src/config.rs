//! Configuration management for Loom
//!
//! Settings for the language-model provider, the completion session limits,
//! the HTTP server and the sandbox. Loaded from `.loom/config.toml` in the
//! working root, then overridden by environment variables.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{LoomError, Result};

/// Environment variable overriding `provider.base_url`
pub const BASE_URL_ENV: &str = "OPENAI_API_BASE_URL";
/// Environment variable overriding `provider.model`
pub const MODEL_ENV: &str = "OPENAI_API_MODEL";
/// Model used when neither config nor environment names one
pub const DEFAULT_MODEL: &str = "claude-3-5-sonnet-20240620";

/// Repository-level Loom configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoomConfig {
    #[serde(default)]
    pub provider: ProviderConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub sandbox: SandboxConfig,
}

/// Language-model provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Base URL of an OpenAI-compatible API (without `/chat/completions`)
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model identifier sent with every request
    #[serde(default = "default_model")]
    pub model: String,

    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Output token budget per segment
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Prepended as a system message to every provider call
    #[serde(default)]
    pub system_prompt: Option<String>,

    /// TCP connect timeout; streamed bodies are not time-limited
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

/// Completion session limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Maximum continuation splices per response
    #[serde(default = "default_max_segments")]
    pub max_segments: u32,

    /// Total provider attempts per segment (first call included)
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Linear backoff unit: the k-th retry waits `k * retry_base_delay_ms`
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
}

/// HTTP server binding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

/// Local sandbox settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Directory that file actions and commands are confined to
    #[serde(default = "default_sandbox_root")]
    pub root: PathBuf,

    /// Project start command launched after every artifact
    #[serde(default = "default_start_command")]
    pub start_command: String,

    /// Shell used as `<shell> -c <command>`
    #[serde(default = "default_shell")]
    pub shell: String,

    /// Seconds a shell action may run before it is reported as still running
    #[serde(default = "default_slow_command_secs")]
    pub slow_command_secs: u64,
}

// Default value providers
fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_max_tokens() -> u32 {
    8192
}

fn default_temperature() -> f32 {
    0.7
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_max_segments() -> u32 {
    5
}

fn default_retry_attempts() -> u32 {
    5
}

fn default_retry_base_delay_ms() -> u64 {
    2000
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8787
}

fn default_sandbox_root() -> PathBuf {
    PathBuf::from("workspace")
}

fn default_start_command() -> String {
    "npm run dev".to_string()
}

fn default_shell() -> String {
    "sh".to_string()
}

fn default_slow_command_secs() -> u64 {
    30
}

impl LoomConfig {
    /// Load configuration from `.loom/config.toml` or use defaults
    pub fn load_or_default(root: &Path) -> Result<Self> {
        let config_path = root.join(".loom/config.toml");

        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from an explicit file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| {
            LoomError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })
    }

    /// Write default configuration to `.loom/config.toml`
    pub fn write_default(root: &Path) -> Result<PathBuf> {
        let config_dir = root.join(".loom");
        std::fs::create_dir_all(&config_dir)?;

        let config_path = config_dir.join("config.toml");
        let content = toml::to_string_pretty(&Self::default())
            .map_err(|e| LoomError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(&config_path, content)?;
        Ok(config_path)
    }

    /// Apply `OPENAI_API_BASE_URL` / `OPENAI_API_MODEL` on top of file values
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(base_url) = non_empty_env(BASE_URL_ENV) {
            tracing::debug!("Provider base URL overridden by {}", BASE_URL_ENV);
            self.provider.base_url = base_url;
        }
        if let Some(model) = non_empty_env(MODEL_ENV) {
            tracing::debug!("Provider model overridden by {}", MODEL_ENV);
            self.provider.model = model;
        }
        self
    }

    /// Check invariants the rest of the system relies on
    pub fn validate(&self) -> Result<()> {
        if self.session.retry_attempts == 0 {
            return Err(LoomError::Config(
                "session.retry_attempts must be at least 1".to_string(),
            ));
        }
        if self.sandbox.start_command.trim().is_empty() {
            return Err(LoomError::Config(
                "sandbox.start_command must not be empty".to_string(),
            ));
        }
        if self.provider.base_url.trim().is_empty() {
            return Err(LoomError::Config("provider.base_url must not be empty".to_string()));
        }
        Ok(())
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            system_prompt: None,
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_segments: default_max_segments(),
            retry_attempts: default_retry_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            root: default_sandbox_root(),
            start_command: default_start_command(),
            shell: default_shell(),
            slow_command_secs: default_slow_command_secs(),
        }
    }
}
