//! Configuration management
//!
//! This module handles loading, validation, and management of the Helix configuration.
//! Configuration is stored in TOML format at ~/.helix/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: Log level
//! - **llm**: Language model provider settings
//! - **agent**: Round budget, early completion, context mode, model timeout
//! - **policy**: Rate-limit windows and tool policy class overrides
//! - **registry**: Capability source order
//!
//! # Examples
//!
//! ```no_run
//! use helix_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create()?;
//! println!("Max rounds: {}", config.agent.max_rounds);
//! # Ok(())
//! # }
//! ```

use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Core settings
    #[serde(default)]
    pub core: CoreConfig,

    /// LLM provider configuration
    #[serde(default)]
    pub llm: LLMConfig,

    /// Orchestration loop settings
    #[serde(default)]
    pub agent: AgentConfig,

    /// Execution policy settings
    #[serde(default)]
    pub policy: PolicyConfig,

    /// Capability registry settings
    #[serde(default)]
    pub registry: RegistryConfig,
}

/// Core configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// LLM provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMConfig {
    /// Default LLM provider (only "ollama" ships with the engine)
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Ollama provider settings
    #[serde(default)]
    pub ollama: OllamaConfig,
}

/// Ollama provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    /// Base URL for Ollama API
    #[serde(default = "default_ollama_base_url")]
    pub base_url: String,

    /// Model name
    #[serde(default = "default_ollama_model")]
    pub model: String,
}

/// How much persistent history is replayed into a new turn
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContextMode {
    /// Include the recent turn history (the memory window)
    FullHistory,
    /// Only the system context and the current user message
    CurrentMessage,
}

impl std::str::FromStr for ContextMode {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full_history" | "full" => Ok(Self::FullHistory),
            "current_message" | "current" => Ok(Self::CurrentMessage),
            other => Err(EngineError::Config(format!(
                "Invalid context mode '{}'. Must be one of: full_history, current_message",
                other
            ))),
        }
    }
}

/// Orchestration loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum model rounds per turn
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,

    /// End turns early when the completion heuristic fires
    #[serde(default = "default_true")]
    pub early_completion: bool,

    /// Confidence needed for early completion (0.0-1.0)
    #[serde(default = "default_completion_threshold")]
    pub completion_threshold: f64,

    /// Persistent history replay mode
    #[serde(default = "default_context_mode")]
    pub context_mode: ContextMode,

    /// Number of persistent messages replayed in full-history mode
    #[serde(default = "default_memory_window")]
    pub memory_window: usize,

    /// Timeout for each model call in seconds
    #[serde(default = "default_llm_timeout")]
    pub llm_timeout_secs: u64,
}

/// Execution policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Window for incremental view nudges (zoom, scroll)
    #[serde(default = "default_view_nudge_window")]
    pub view_nudge_window_secs: u64,

    /// Window for external network lookups
    #[serde(default = "default_network_window")]
    pub network_window_secs: u64,

    /// Per-tool class overrides, e.g. `navigate_to = "parameter_based"`
    #[serde(default)]
    pub classes: BTreeMap<String, String>,
}

/// Capability registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Source ids in the order they are consulted
    #[serde(default = "default_source_order")]
    pub source_order: Vec<String>,
}

/// Source ids the engine knows how to build
pub const KNOWN_SOURCES: &[&str] = &["builtin", "function_library", "plugin", "remote"];

/// Policy class names accepted in `[policy.classes]`
pub const KNOWN_POLICY_CLASSES: &[&str] = &[
    "conditional_reexecution",
    "once_per_round",
    "parameter_based",
    "rate_limited_view",
    "rate_limited_network",
    "always_allowed",
];

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_provider() -> String {
    "ollama".to_string()
}

fn default_ollama_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_ollama_model() -> String {
    "llama3.1:8b".to_string()
}

fn default_max_rounds() -> usize {
    3
}

fn default_completion_threshold() -> f64 {
    0.7
}

fn default_context_mode() -> ContextMode {
    ContextMode::FullHistory
}

fn default_memory_window() -> usize {
    10
}

fn default_llm_timeout() -> u64 {
    120
}

fn default_view_nudge_window() -> u64 {
    2
}

fn default_network_window() -> u64 {
    30
}

fn default_source_order() -> Vec<String> {
    KNOWN_SOURCES.iter().map(|s| s.to_string()).collect()
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            default_provider: default_provider(),
            ollama: OllamaConfig::default(),
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

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
            early_completion: true,
            completion_threshold: default_completion_threshold(),
            context_mode: default_context_mode(),
            memory_window: default_memory_window(),
            llm_timeout_secs: default_llm_timeout(),
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            view_nudge_window_secs: default_view_nudge_window(),
            network_window_secs: default_network_window(),
            classes: BTreeMap::new(),
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            source_order: default_source_order(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            core: CoreConfig::default(),
            llm: LLMConfig::default(),
            agent: AgentConfig::default(),
            policy: PolicyConfig::default(),
            registry: RegistryConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default location (~/.helix/config.toml)
    ///
    /// If the configuration file doesn't exist, creates a default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or written, TOML parsing
    /// fails, or validation fails.
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

        let config: Config = toml::from_str(&contents)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    /// Create default configuration and save to path
    fn create_default(path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let config = Self::default();
        config.validate()?;

        let toml_string = toml::to_string_pretty(&config)
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| EngineError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(config)
    }

    /// Get the default configuration file path (~/.helix/config.toml)
    fn default_config_path() -> Result<PathBuf, EngineError> {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".helix").join("config.toml"))
    }

    /// Validate field ranges and names
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Config` describing the first invalid field.
    pub fn validate(&self) -> Result<(), EngineError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        if self.llm.default_provider != "ollama" {
            return Err(EngineError::Config(format!(
                "Invalid default provider '{}'. Must be one of: ollama",
                self.llm.default_provider
            )));
        }

        if self.agent.max_rounds == 0 {
            return Err(EngineError::Config(
                "max_rounds must be at least 1".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.agent.completion_threshold) {
            return Err(EngineError::Config(
                "completion_threshold must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.agent.llm_timeout_secs == 0 {
            return Err(EngineError::Config(
                "llm_timeout_secs must be positive".to_string(),
            ));
        }

        if self.policy.view_nudge_window_secs == 0 || self.policy.network_window_secs == 0 {
            return Err(EngineError::Config(
                "policy windows must be positive".to_string(),
            ));
        }

        for (tool, class) in &self.policy.classes {
            if !KNOWN_POLICY_CLASSES.contains(&class.as_str()) {
                return Err(EngineError::Config(format!(
                    "Invalid policy class '{}' for tool '{}'. Must be one of: {}",
                    class,
                    tool,
                    KNOWN_POLICY_CLASSES.join(", ")
                )));
            }
        }

        for source in &self.registry.source_order {
            if !KNOWN_SOURCES.contains(&source.as_str()) {
                return Err(EngineError::UnknownSource(source.clone()));
            }
        }

        Ok(())
    }
}
