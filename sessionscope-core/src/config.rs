//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/sessionscope/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/sessionscope/` (~/.config/sessionscope/)
//! - Data: `$XDG_DATA_HOME/sessionscope/` (~/.local/share/sessionscope/)
//! - State/Logs: `$XDG_STATE_HOME/sessionscope/` (~/.local/state/sessionscope/)

use crate::error::{Error, Result};
use crate::ingest::{ParserOptions, TextEncoding};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use std::path::PathBuf;

const APP_DIR: &str = "sessionscope";

/// Log files are `{LOG_FILE_PREFIX}.YYYY-MM-DD.{LOG_FILE_SUFFIX}`, one per UTC day.
pub const LOG_FILE_PREFIX: &str = "sessionscope";
pub const LOG_FILE_SUFFIX: &str = "log";

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// LLM configuration for the chat assistant (optional)
    #[serde(default)]
    pub llm: Option<LlmConfig>,

    /// Session parser settings
    #[serde(default)]
    pub parser: ParserConfig,

    /// Prompt budget for the chat assistant
    #[serde(default)]
    pub chat: ChatConfig,

    /// Instruction file discovery
    #[serde(default)]
    pub rules: RulesConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// LLM provider configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// Provider type
    pub provider: LlmProvider,
    /// Model to use
    pub model: String,
    /// API endpoint (optional, uses default for provider)
    pub endpoint: Option<String>,
    /// API key (can also use env var)
    pub api_key: Option<String>,
    /// HTTP request timeout in seconds
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

fn default_llm_timeout() -> u64 {
    60
}

/// Supported LLM providers
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    Ollama,
    Claude,
    OpenAI,
}

impl LlmProvider {
    /// Returns the default endpoint for this provider
    pub fn default_endpoint(&self) -> &'static str {
        match self {
            LlmProvider::Ollama => "http://localhost:11434",
            LlmProvider::Claude => "https://api.anthropic.com",
            LlmProvider::OpenAI => "https://api.openai.com",
        }
    }

    /// Environment variable consulted when no key is configured
    pub fn api_key_env(&self) -> Option<&'static str> {
        match self {
            LlmProvider::Ollama => None,
            LlmProvider::Claude => Some("ANTHROPIC_API_KEY"),
            LlmProvider::OpenAI => Some("OPENAI_API_KEY"),
        }
    }
}

/// Parser configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ParserConfig {
    /// Stop a parse pass after this many failed lines (unset = never)
    #[serde(default)]
    pub max_errors: Option<usize>,

    /// Input text encoding
    #[serde(default)]
    pub encoding: TextEncoding,
}

impl ParserConfig {
    pub fn options(&self) -> ParserOptions {
        ParserOptions {
            max_errors: self.max_errors,
            encoding: self.encoding,
        }
    }
}

/// Chat context budget
#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    /// Model context window in tokens
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,

    /// Tokens reserved for the model's answer
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: usize,

    /// Most recent events included in the prompt
    #[serde(default = "default_max_events")]
    pub max_events: usize,

    /// Most recent chat turns included in the prompt
    #[serde(default = "default_max_history")]
    pub max_history: usize,

    /// Rules included in the prompt
    #[serde(default = "default_max_rules")]
    pub max_rules: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_context_tokens: default_max_context_tokens(),
            max_output_tokens: default_max_output_tokens(),
            max_events: default_max_events(),
            max_history: default_max_history(),
            max_rules: default_max_rules(),
        }
    }
}

fn default_max_context_tokens() -> usize {
    32768
}

fn default_max_output_tokens() -> usize {
    2048
}

fn default_max_events() -> usize {
    25
}

fn default_max_history() -> usize {
    20
}

fn default_max_rules() -> usize {
    15
}

/// Instruction file discovery configuration
#[derive(Debug, Deserialize, Clone)]
pub struct RulesConfig {
    /// Glob patterns, relative to the repository root
    #[serde(default = "default_rule_patterns")]
    pub patterns: Vec<String>,

    /// Path components that exclude a match
    #[serde(default = "default_rule_ignore")]
    pub ignore: Vec<String>,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            patterns: default_rule_patterns(),
            ignore: default_rule_ignore(),
        }
    }
}

fn default_rule_patterns() -> Vec<String> {
    [
        "**/AGENTS.md",
        "**/CLAUDE.md",
        "**/.ruler/*.md",
        "**/.cursor/rules/*.md",
        "docs/agents/**/*.md",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_rule_ignore() -> Vec<String> {
    ["node_modules", "dist", ".git", "target", "tests/fixtures"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject settings that can never produce a usable prompt
    pub fn validate(&self) -> Result<()> {
        if self.chat.max_output_tokens >= self.chat.max_context_tokens {
            return Err(Error::Config(format!(
                "chat.max_output_tokens ({}) must be smaller than chat.max_context_tokens ({})",
                self.chat.max_output_tokens, self.chat.max_context_tokens
            )));
        }
        if self.rules.patterns.is_empty() {
            return Err(Error::Config(
                "rules.patterns must list at least one glob".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/sessionscope/config.toml` (~/.config/sessionscope/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join(APP_DIR).join("config.toml")
    }

    /// Returns the data directory path (for SQLite database)
    ///
    /// `$XDG_DATA_HOME/sessionscope/` (~/.local/share/sessionscope/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join(APP_DIR)
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/sessionscope/` (~/.local/state/sessionscope/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join(APP_DIR)
    }

    /// Returns the database file path
    ///
    /// `$XDG_DATA_HOME/sessionscope/data.db`
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("data.db")
    }

    /// Returns today's log file path
    ///
    /// `$XDG_STATE_HOME/sessionscope/sessionscope.YYYY-MM-DD.log`
    pub fn log_path() -> PathBuf {
        Self::log_path_for(Utc::now().date_naive())
    }

    /// Log file written on `date` (UTC).
    pub fn log_path_for(date: NaiveDate) -> PathBuf {
        Self::state_dir().join(format!(
            "{}.{}.{}",
            LOG_FILE_PREFIX,
            date.format("%Y-%m-%d"),
            LOG_FILE_SUFFIX
        ))
    }

    /// Ensure XDG base directory environment variables are set.
    ///
    /// CLI binaries call this before anything reads the paths above.
    pub fn ensure_xdg_env() {
        let home = home_dir();

        if std::env::var("XDG_DATA_HOME").is_err() {
            std::env::set_var("XDG_DATA_HOME", home.join(".local/share"));
        }

        if std::env::var("XDG_STATE_HOME").is_err() {
            std::env::set_var("XDG_STATE_HOME", home.join(".local/state"));
        }

        if std::env::var("XDG_CONFIG_HOME").is_err() {
            std::env::set_var("XDG_CONFIG_HOME", home.join(".config"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.llm.is_none());
        assert_eq!(config.chat.max_context_tokens, 32768);
        assert_eq!(config.chat.max_output_tokens, 2048);
        assert_eq!(config.chat.max_events, 25);
        assert_eq!(config.parser.max_errors, None);
        assert_eq!(config.parser.encoding, TextEncoding::Utf8);
        assert!(config.rules.patterns.iter().any(|p| p == "**/AGENTS.md"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[llm]
provider = "ollama"
model = "llama3.2"

[parser]
max_errors = 10
encoding = "utf-16le"

[chat]
max_context_tokens = 8192

[logging]
level = "debug"
"#;
        let config: Config = toml::from_str(toml).unwrap();

        let llm = config.llm.unwrap();
        assert_eq!(llm.provider, LlmProvider::Ollama);
        assert_eq!(llm.model, "llama3.2");
        assert_eq!(llm.timeout_secs, 60);
        assert_eq!(config.parser.max_errors, Some(10));
        assert_eq!(config.parser.encoding, TextEncoding::Utf16Le);
        assert_eq!(config.chat.max_context_tokens, 8192);
        assert_eq!(config.chat.max_output_tokens, 2048);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_llm_provider_endpoints() {
        assert_eq!(
            LlmProvider::Ollama.default_endpoint(),
            "http://localhost:11434"
        );
        assert_eq!(
            LlmProvider::Claude.default_endpoint(),
            "https://api.anthropic.com"
        );
        assert_eq!(LlmProvider::OpenAI.api_key_env(), Some("OPENAI_API_KEY"));
    }

    #[test]
    fn test_validate_rejects_output_reserve_covering_context() {
        let toml = r#"
[chat]
max_context_tokens = 1000
max_output_tokens = 1000
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_load_from_reports_bad_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[chat\nmax_events = ").unwrap();
        assert!(matches!(Config::load_from(&path), Err(Error::Config(_))));
    }
}
