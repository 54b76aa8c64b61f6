//! Error types and handling
//!
//! This module provides the error types used throughout the Helix engine.
//! All errors implement the `HelixErrorExt` trait which provides user-friendly
//! hints and indicates whether errors are recoverable.
//!
//! Hints are static strings: they never echo tool parameters, sequences or
//! provider responses back to the user.

use thiserror::Error;

/// Trait for Helix error extensions
///
/// This trait provides additional context for errors, including user-friendly
/// hints and recoverability information.
pub trait HelixErrorExt {
    /// Returns a user-friendly hint for the error
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors can be retried or worked around. Non-recoverable
    /// errors typically require a configuration change.
    fn is_recoverable(&self) -> bool;
}

/// Main engine error type
///
/// # Error Categories
///
/// - **Configuration**: Invalid or missing configuration
/// - **Tool**: Unknown tools, invalid parameters, failed executions
/// - **Network**: Transport failures talking to remote capability sources
///
/// # Examples
///
/// ```
/// use sdk::errors::{EngineError, HelixErrorExt};
///
/// let error = EngineError::ToolNotFound("navigate_to".to_string());
/// println!("Hint: {}", error.user_hint());
/// assert!(error.is_recoverable());
///
/// let fatal_error = EngineError::Config("bad threshold".to_string());
/// assert!(!fatal_error.is_recoverable());
/// ```
#[derive(Debug, Error)]
pub enum EngineError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // LLM provider errors
    #[error("LLM provider error: {0}")]
    LLMProvider(String),

    // Tool errors
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Invalid parameters for {tool}: {reason}")]
    InvalidParameters { tool: String, reason: String },

    #[error("Tool error: {0}")]
    ToolError(String),

    // Capability source errors
    #[error("Unknown capability source: {0}")]
    UnknownSource(String),

    // Network errors
    #[error("Network error: {0}")]
    Network(String),

    // Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HelixErrorExt for EngineError {
    fn user_hint(&self) -> &str {
        match self {
            Self::Config(_) => "Check your config.toml file for errors",
            Self::LLMProvider(_) => "LLM provider unavailable. Check your model server and network",
            Self::ToolNotFound(_) => "The requested tool is not available",
            Self::InvalidParameters { .. } => "The tool was called with invalid parameters",
            Self::ToolError(_) => "Tool operation failed",
            Self::UnknownSource(_) => "Check the registry source_order in config.toml",
            Self::Network(_) => "Network operation failed. Check your connection",
            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Config(_) | Self::UnknownSource(_))
    }
}
