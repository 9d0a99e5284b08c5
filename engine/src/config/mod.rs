//! Configuration management
//!
//! This module handles loading, validation, and management of the Taskmesh
//! configuration. Configuration is stored in TOML format at
//! ~/.taskmesh/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: Log level, data directory
//! - **sandbox**: Interpreter, timeout, output cap, extra denylist entries
//! - **memory**: Structured log path, semantic index location, recall size
//! - **history**: Optional cap on the in-process execution history
//! - **generation**: Text generation provider used by the code generation worker
//! - **search**: Web search provider used by the search worker
//! - **server**: HTTP/WebSocket bind address
//!
//! Provider credentials are never stored here. Each provider section names the
//! environment variable that holds its key (`api_key_env`), read at call time.
//!
//! # Examples
//!
//! ```no_run
//! use taskmesh_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create()?;
//!
//! println!("Data dir: {:?}", config.core.data_dir);
//! println!("Sandbox timeout: {}s", config.sandbox.timeout_secs);
//! # Ok(())
//! # }
//! ```

use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Core engine settings
    pub core: CoreConfig,

    /// Sandboxed execution settings
    #[serde(default)]
    pub sandbox: SandboxConfig,

    /// Memory store settings
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Execution history settings
    #[serde(default)]
    pub history: HistoryConfig,

    /// Generation provider settings
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Search provider settings
    #[serde(default)]
    pub search: SearchConfig,

    /// Transport settings
    #[serde(default)]
    pub server: ServerConfig,
}

/// Core engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Data directory path (supports ~ expansion)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

/// Sandbox configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Interpreter used to run scratch files
    #[serde(default = "default_interpreter")]
    pub interpreter: String,

    /// Wall-clock limit per execution (seconds)
    #[serde(default = "default_sandbox_timeout")]
    pub timeout_secs: u64,

    /// Maximum characters kept from stdout and from stderr
    #[serde(default = "default_max_output_chars")]
    pub max_output_chars: usize,

    /// Additional case-insensitive substrings rejected before execution
    #[serde(default)]
    pub extra_denylist: Vec<String>,
}

/// Memory store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Structured log database path (defaults to `<data_dir>/memory.db`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<PathBuf>,

    /// Semantic index location (defaults to `<data_dir>/index`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_dir: Option<PathBuf>,

    /// Number of memories returned by context recall
    #[serde(default = "default_recall_k")]
    pub recall_k: usize,

    /// Dimension of the hashed embedding vectors
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: usize,
}

/// Execution history configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Maximum retained records; unbounded when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_entries: Option<usize>,
}

/// Generation provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Provider name (openai, ollama)
    #[serde(default = "default_generation_provider")]
    pub provider: String,

    /// Base URL for the provider API (provider default when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Model name (provider default when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Environment variable holding the API key
    #[serde(default = "default_generation_key_env")]
    pub api_key_env: String,

    /// HTTP timeout (seconds)
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
}

/// Search provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Base URL for the search API
    #[serde(default = "default_search_base_url")]
    pub base_url: String,

    /// Environment variable holding the API key
    #[serde(default = "default_search_key_env")]
    pub api_key_env: String,

    /// Maximum results kept per query
    #[serde(default = "default_max_results")]
    pub max_results: usize,

    /// HTTP timeout (seconds)
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
}

/// Transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("~/.taskmesh")
}

fn default_interpreter() -> String {
    "python3".to_string()
}

fn default_sandbox_timeout() -> u64 {
    30
}

fn default_max_output_chars() -> usize {
    10_000
}

fn default_recall_k() -> usize {
    5
}

fn default_embedding_dimensions() -> usize {
    256
}

fn default_generation_provider() -> String {
    "openai".to_string()
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_openai_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_ollama_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_ollama_model() -> String {
    "llama3.1:8b".to_string()
}

fn default_generation_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_provider_timeout() -> u64 {
    60
}

fn default_search_base_url() -> String {
    "https://serpapi.com".to_string()
}

fn default_search_key_env() -> String {
    "SERPAPI_API_KEY".to_string()
}

fn default_max_results() -> usize {
    5
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            data_dir: default_data_dir(),
        }
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            timeout_secs: default_sandbox_timeout(),
            max_output_chars: default_max_output_chars(),
            extra_denylist: Vec::new(),
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            database: None,
            index_dir: None,
            recall_k: default_recall_k(),
            embedding_dimensions: default_embedding_dimensions(),
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            base_url: None,
            model: None,
            api_key_env: default_generation_key_env(),
            timeout_secs: default_provider_timeout(),
        }
    }
}

impl GenerationConfig {
    /// Effective base URL for the configured provider
    pub fn base_url(&self) -> String {
        self.base_url.clone().unwrap_or_else(|| match self.provider.as_str() {
            "ollama" => default_ollama_base_url(),
            _ => default_openai_base_url(),
        })
    }

    /// Effective model for the configured provider
    pub fn model(&self) -> String {
        self.model.clone().unwrap_or_else(|| match self.provider.as_str() {
            "ollama" => default_ollama_model(),
            _ => default_openai_model(),
        })
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            base_url: default_search_base_url(),
            api_key_env: default_search_key_env(),
            max_results: default_max_results(),
            timeout_secs: default_provider_timeout(),
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

impl Config {
    /// Load configuration from the default location (~/.taskmesh/config.toml)
    ///
    /// If the configuration file doesn't exist, creates a default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file cannot be read
    /// - TOML parsing fails
    /// - Validation fails
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

        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self, EngineError> {
        let mut config: Config = toml::from_str(contents)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate_and_process()?;

        Ok(config)
    }

    /// Create default configuration and save to path
    fn create_default(path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        // Serialize before processing so the file keeps the portable ~ paths
        let config = Self::default_config();
        let toml_string = toml::to_string_pretty(&config)
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| EngineError::Config(format!("Failed to write config file: {}", e)))?;

        let mut config = config;
        config.validate_and_process()?;

        Ok(config)
    }

    /// Get the default configuration file path (~/.taskmesh/config.toml)
    fn default_config_path() -> Result<PathBuf, EngineError> {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".taskmesh").join("config.toml"))
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            core: CoreConfig::default(),
            sandbox: SandboxConfig::default(),
            memory: MemoryConfig::default(),
            history: HistoryConfig::default(),
            generation: GenerationConfig::default(),
            search: SearchConfig::default(),
            server: ServerConfig::default(),
        }
    }

    /// Structured log database path
    pub fn memory_db_path(&self) -> PathBuf {
        self.memory
            .database
            .clone()
            .unwrap_or_else(|| self.core.data_dir.join("memory.db"))
    }

    /// Semantic index location
    pub fn index_dir(&self) -> PathBuf {
        self.memory
            .index_dir
            .clone()
            .unwrap_or_else(|| self.core.data_dir.join("index"))
    }

    /// Validate and process configuration
    ///
    /// This method:
    /// - Validates enumerated and numeric fields
    /// - Expands ~ in paths
    /// - Creates the data directory if it doesn't exist
    fn validate_and_process(&mut self) -> Result<(), EngineError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        let valid_providers = ["openai", "ollama"];
        if !valid_providers.contains(&self.generation.provider.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid generation provider '{}'. Must be one of: {}",
                self.generation.provider,
                valid_providers.join(", ")
            )));
        }

        if self.sandbox.timeout_secs == 0 {
            return Err(EngineError::Config(
                "sandbox.timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.sandbox.max_output_chars == 0 {
            return Err(EngineError::Config(
                "sandbox.max_output_chars must be greater than 0".to_string(),
            ));
        }
        if self.sandbox.interpreter.trim().is_empty() {
            return Err(EngineError::Config(
                "sandbox.interpreter must not be empty".to_string(),
            ));
        }

        if self.memory.recall_k == 0 {
            return Err(EngineError::Config(
                "memory.recall_k must be greater than 0".to_string(),
            ));
        }
        if self.memory.embedding_dimensions == 0 {
            return Err(EngineError::Config(
                "memory.embedding_dimensions must be greater than 0".to_string(),
            ));
        }

        if self.history.max_entries == Some(0) {
            return Err(EngineError::Config(
                "history.max_entries must be greater than 0 when set".to_string(),
            ));
        }

        self.core.data_dir = expand_path(&self.core.data_dir)?;
        if let Some(database) = &self.memory.database {
            self.memory.database = Some(expand_path(database)?);
        }
        if let Some(index_dir) = &self.memory.index_dir {
            self.memory.index_dir = Some(expand_path(index_dir)?);
        }

        if !self.core.data_dir.exists() {
            fs::create_dir_all(&self.core.data_dir).map_err(|e| {
                EngineError::Config(format!("Failed to create data directory: {}", e))
            })?;
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

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_creation() {
        let config = Config::default_config();

        assert_eq!(config.core.log_level, "info");
        assert_eq!(config.sandbox.interpreter, "python3");
        assert_eq!(config.sandbox.timeout_secs, 30);
        assert_eq!(config.memory.recall_k, 5);
        assert_eq!(config.generation.provider, "openai");
        assert_eq!(config.generation.base_url(), "https://api.openai.com/v1");
        assert!(config.history.max_entries.is_none());
    }

    #[test]
    fn test_expand_path_with_tilde() {
        let path = PathBuf::from("~/test");
        let expanded = expand_path(&path).unwrap();

        let home = dirs::home_dir().unwrap();
        assert_eq!(expanded, home.join("test"));
    }

    #[test]
    fn test_expand_path_without_tilde() {
        let path = PathBuf::from("/absolute/path");
        let expanded = expand_path(&path).unwrap();

        assert_eq!(expanded, path);
    }

    #[test]
    fn test_minimal_toml_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let toml = format!(
            "[core]\ndata_dir = \"{}\"\n",
            temp_dir.path().join("data").display()
        );

        let config = Config::from_toml_str(&toml).unwrap();
        assert_eq!(config.sandbox.max_output_chars, 10_000);
        assert_eq!(config.memory_db_path(), temp_dir.path().join("data/memory.db"));
        assert_eq!(config.index_dir(), temp_dir.path().join("data/index"));
        assert!(temp_dir.path().join("data").is_dir());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let data_dir = temp_dir.path().display().to_string();

        let bad_level = format!("[core]\nlog_level = \"loud\"\ndata_dir = \"{}\"\n", data_dir);
        assert!(matches!(
            Config::from_toml_str(&bad_level),
            Err(EngineError::Config(_))
        ));

        let bad_timeout = format!(
            "[core]\ndata_dir = \"{}\"\n[sandbox]\ntimeout_secs = 0\n",
            data_dir
        );
        assert!(matches!(
            Config::from_toml_str(&bad_timeout),
            Err(EngineError::Config(_))
        ));

        let bad_provider = format!(
            "[core]\ndata_dir = \"{}\"\n[generation]\nprovider = \"gemini\"\n",
            data_dir
        );
        assert!(matches!(
            Config::from_toml_str(&bad_provider),
            Err(EngineError::Config(_))
        ));
    }

    #[test]
    fn test_generation_defaults_follow_provider() {
        let mut generation = GenerationConfig {
            provider: "ollama".to_string(),
            ..Default::default()
        };
        assert_eq!(generation.base_url(), "http://localhost:11434");
        assert_eq!(generation.model(), "llama3.1:8b");

        generation.model = Some("qwen2.5-coder".to_string());
        assert_eq!(generation.model(), "qwen2.5-coder");
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default_config();
        let toml_string = toml::to_string(&config).unwrap();

        let deserialized: Config = toml::from_str(&toml_string).unwrap();
        assert_eq!(config.core.log_level, deserialized.core.log_level);
        assert_eq!(config.sandbox.timeout_secs, deserialized.sandbox.timeout_secs);
        assert_eq!(config.search.base_url, deserialized.search.base_url);
    }
}
