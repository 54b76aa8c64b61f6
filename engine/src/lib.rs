//! Helix Engine Library
//!
//! This library provides the core functionality of the Helix engine: the
//! agentic tool-call orchestration loop and the capability sources it drives.
//! It is used by both the main binary and integration tests.

/// Configuration management module
pub mod config;

/// LLM provider abstraction layer
pub mod llm;

/// Orchestration loop and its components
pub mod agent;

/// Capability registry and dynamic sources
pub mod registry;

/// Built-in domain tools
pub mod tools;

/// Telemetry and Observability
pub mod telemetry;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;
