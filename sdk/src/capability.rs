//! Capability source trait and errors
//!
//! A capability source is any provider of named, invokable tools: the engine's
//! local built-ins, the domain function library, plugins, or remote servers.
//! The engine's registry holds an ordered list of sources and routes every
//! invocation to the first one that claims the tool name.

use async_trait::async_trait;

use crate::types::Parameters;

/// Errors a capability source can report from `invoke`
///
/// Only `Failed` is a business-level outcome. The other variants tell the
/// router to try the next source.
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum CapabilityError {
    /// The tool ran and reported an error. Returned to the model as-is.
    #[error("{0}")]
    Failed(String),

    /// This source does not know the tool after all
    #[error("Tool not resolved by this source: {0}")]
    Unresolved(String),

    /// The source could not be reached
    #[error("Transport error: {0}")]
    Transport(String),

    /// The source is temporarily unavailable
    #[error("Source unavailable: {0}")]
    Unavailable(String),
}

impl CapabilityError {
    /// Whether the router should fall through to the next source
    pub fn falls_through(&self) -> bool {
        !matches!(self, Self::Failed(_))
    }
}

impl From<crate::types::ToolError> for CapabilityError {
    fn from(err: crate::types::ToolError) -> Self {
        Self::Failed(err.to_string())
    }
}

/// Trait that every capability source must implement
#[async_trait]
pub trait CapabilitySource: Send + Sync {
    /// Stable identifier (e.g. "builtin", "function_library")
    fn id(&self) -> &str;

    /// Lower values are consulted first
    fn priority(&self) -> i32;

    /// Names of the tools this source currently exposes
    fn list_names(&self) -> Vec<String>;

    /// Invoke a tool by name
    async fn invoke(
        &self,
        name: &str,
        parameters: &Parameters,
    ) -> Result<serde_json::Value, CapabilityError>;

    /// One-line descriptions used in the system prompt, keyed by tool name.
    /// Default implementation describes nothing.
    fn describe(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    /// Whether this source claims the given tool name
    fn handles(&self, name: &str) -> bool {
        self.list_names().iter().any(|n| n == name)
    }
}
