//! Helix SDK
//!
//! Shared library providing traits, types, and utilities for Helix components.
//! This crate is used by the engine and by every capability source that
//! exposes tools to the orchestration loop.

/// Capability source trait and errors
pub mod capability;

/// Error types and handling
pub mod errors;

/// Tool invocation and result types
pub mod types;

// Re-export commonly used types
pub use capability::{CapabilityError, CapabilitySource};
pub use errors::{EngineError, HelixErrorExt};
pub use types::{Parameters, ToolError, ToolInvocation, ToolResult};
