//! Configuration management
//!
//! This module handles loading, validation, and management of the Wren configuration.
//! Configuration is stored in TOML format at ~/.wren/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: Log level, data directory
//! - **llm**: Default provider and per-provider endpoints and models
//! - **agent**: Conversation loop limits and confirmation policy
//! - **tools**: Limits for the built-in tools
//!
//! Every field has a default, so a partial file is valid.
//!
//! # Environment Overrides
//!
//! - `WREN_AUTO_APPLY=y|yes|1|true` turns on `agent.auto_apply`
//! - `WREN_LOG=<level>` replaces `core.log_level`
//!
//! # Examples
//!
//! ```no_run
//! use wren_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create()?;
//! println!("Default provider: {}", config.llm.default_provider);
//! # Ok(())
//! # }
//! ```

use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub core: CoreConfig,

    #[serde(default)]
    pub llm: LLMConfig,

    #[serde(default)]
    pub agent: AgentConfig,

    #[serde(default)]
    pub tools: ToolsConfig,
}

/// Core engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Where the session database lives (supports ~ expansion)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

/// LLM provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMConfig {
    /// Provider active at startup
    #[serde(default = "default_provider")]
    pub default_provider: String,

    #[serde(default)]
    pub ollama: OllamaConfig,

    #[serde(default)]
    pub openai: OpenAIConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    #[serde(default = "default_ollama_base_url")]
    pub base_url: String,

    #[serde(default = "default_ollama_model")]
    pub model: String,
}

/// Any OpenAI-compatible chat completions endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIConfig {
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,

    #[serde(default = "default_openai_model")]
    pub model: String,

    /// Name of the environment variable holding the API key
    #[serde(default = "default_openai_api_key_env")]
    pub api_key_env: String,
}

/// Conversation loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Apply mutating tools without asking. Destructive tools always ask.
    #[serde(default)]
    pub auto_apply: bool,

    /// Model calls per user turn at most
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,

    /// History messages kept in context at most
    #[serde(default = "default_context_turns")]
    pub context_turns: usize,

    /// Token budget for history (estimated as chars / 4)
    #[serde(default = "default_context_token_budget")]
    pub context_token_budget: usize,

    #[serde(default = "default_llm_timeout_secs")]
    pub llm_timeout_secs: u64,
}

/// Built-in tool limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_shell_timeout_secs")]
    pub shell_timeout_secs: u64,

    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,

    #[serde(default = "default_max_read_bytes")]
    pub max_read_bytes: u64,

    #[serde(default = "default_max_search_results")]
    pub max_search_results: usize,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("~/.wren/data")
}

fn default_provider() -> String {
    "ollama".to_string()
}

fn default_ollama_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_ollama_model() -> String {
    "qwen2.5-coder:7b".to_string()
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_openai_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_openai_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_max_tool_rounds() -> usize {
    8
}

fn default_context_turns() -> usize {
    20
}

fn default_context_token_budget() -> usize {
    6000
}

fn default_llm_timeout_secs() -> u64 {
    120
}

fn default_shell_timeout_secs() -> u64 {
    30
}

fn default_max_output_bytes() -> usize {
    4096
}

fn default_max_read_bytes() -> u64 {
    1024 * 1024
}

fn default_max_search_results() -> usize {
    50
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            data_dir: default_data_dir(),
        }
    }
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            default_provider: default_provider(),
            ollama: OllamaConfig::default(),
            openai: OpenAIConfig::default(),
        }
    }
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: default_ollama_base_url(),
            model: default_ollama_model(),
        }
    }
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            base_url: default_openai_base_url(),
            model: default_openai_model(),
            api_key_env: default_openai_api_key_env(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            auto_apply: false,
            max_tool_rounds: default_max_tool_rounds(),
            context_turns: default_context_turns(),
            context_token_budget: default_context_token_budget(),
            llm_timeout_secs: default_llm_timeout_secs(),
        }
    }
}

impl AgentConfig {
    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_secs)
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            shell_timeout_secs: default_shell_timeout_secs(),
            max_output_bytes: default_max_output_bytes(),
            max_read_bytes: default_max_read_bytes(),
            max_search_results: default_max_search_results(),
        }
    }
}

impl ToolsConfig {
    pub fn shell_timeout(&self) -> Duration {
        Duration::from_secs(self.shell_timeout_secs)
    }
}

const VALID_LOG_LEVELS: &[&str] = &["error", "warn", "info", "debug", "trace"];
const VALID_PROVIDERS: &[&str] = &["ollama", "openai"];

impl Config {
    /// Load configuration from the default location (~/.wren/config.toml),
    /// writing a default file first if there is none.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if
    /// validation fails.
    pub fn load_or_create() -> Result<Self, EngineError> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Self::create_default(&config_path)
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, EngineError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read config file: {}", e)))?;

        let mut config = Self::from_toml(&contents)?;
        config.validate_and_process()?;
        Ok(config)
    }

    /// Parse and apply environment overrides, without touching the filesystem
    pub fn from_toml(contents: &str) -> Result<Self, EngineError> {
        let mut config: Config = toml::from_str(contents)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn create_default(path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let defaults = Self::default();
        let toml_string = toml::to_string_pretty(&defaults)
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| EngineError::Config(format!("Failed to write config file: {}", e)))?;

        let mut config = defaults;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate_and_process()?;
        Ok(config)
    }

    /// ~/.wren/config.toml
    pub fn default_config_path() -> Result<PathBuf, EngineError> {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".wren").join("config.toml"))
    }

    /// Apply `WREN_AUTO_APPLY` and `WREN_LOG` as read through `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("WREN_AUTO_APPLY") {
            let value = value.trim().to_lowercase();
            self.agent.auto_apply = matches!(value.as_str(), "y" | "yes" | "1" | "true");
        }
        if let Some(level) = lookup("WREN_LOG") {
            let level = level.trim().to_lowercase();
            if !level.is_empty() {
                self.core.log_level = level;
            }
        }
    }

    /// Session database file
    pub fn database_path(&self) -> PathBuf {
        self.core.data_dir.join("wren.db")
    }

    /// Validate limits and names, then expand and create the data directory.
    pub fn validate_and_process(&mut self) -> Result<(), EngineError> {
        self.validate()?;

        self.core.data_dir = expand_path(&self.core.data_dir)?;
        if !self.core.data_dir.exists() {
            fs::create_dir_all(&self.core.data_dir).map_err(|e| {
                EngineError::Config(format!("Failed to create data directory: {}", e))
            })?;
        }

        Ok(())
    }

    fn validate(&self) -> Result<(), EngineError> {
        if !VALID_LOG_LEVELS.contains(&self.core.log_level.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                VALID_LOG_LEVELS.join(", ")
            )));
        }

        if !VALID_PROVIDERS.contains(&self.llm.default_provider.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid default provider '{}'. Must be one of: {}",
                self.llm.default_provider,
                VALID_PROVIDERS.join(", ")
            )));
        }

        if self.llm.ollama.model.trim().is_empty() || self.llm.openai.model.trim().is_empty() {
            return Err(EngineError::Config("Model names must not be empty".to_string()));
        }

        let limits = [
            ("agent.max_tool_rounds", self.agent.max_tool_rounds as u64),
            ("agent.context_turns", self.agent.context_turns as u64),
            ("agent.context_token_budget", self.agent.context_token_budget as u64),
            ("agent.llm_timeout_secs", self.agent.llm_timeout_secs),
            ("tools.shell_timeout_secs", self.tools.shell_timeout_secs),
            ("tools.max_output_bytes", self.tools.max_output_bytes as u64),
            ("tools.max_read_bytes", self.tools.max_read_bytes),
            ("tools.max_search_results", self.tools.max_search_results as u64),
        ];
        if let Some((name, _)) = limits.iter().find(|(_, value)| *value == 0) {
            return Err(EngineError::Config(format!("{} must be positive", name)));
        }

        Ok(())
    }
}

/// Expand ~ in path to user's home directory
fn expand_path(path: &Path) -> Result<PathBuf, EngineError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| EngineError::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}
