//! Command handlers for CLI operations
//!
//! This module implements the handlers for all CLI commands:
//! - run: Run one conversational turn against the configured model
//! - tools: List registered tools per capability source
//! - config show: Print the effective configuration

use anyhow::{Context, Result};
use sdk::errors::HelixErrorExt;
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::agent::{Conversation, Orchestrator, StopReason};
use crate::config::{Config, ContextMode};
use crate::llm::ollama::OllamaProvider;
use crate::llm::LLMProvider;
use crate::registry::CapabilityRegistry;
use crate::tools::{default_sources, GenomeView};

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

/// Per-invocation overrides from the `run` command line
#[derive(Debug, Clone, Default)]
pub struct RunOverrides {
    pub max_rounds: Option<usize>,
    pub context_mode: Option<ContextMode>,
}

/// Registry over the shipped sources, in the configured order
pub fn build_registry(config: &Config, view: Arc<GenomeView>) -> CapabilityRegistry {
    CapabilityRegistry::with_order(&config.registry.source_order, default_sources(view))
}

/// Build the configured model provider
pub fn build_provider(config: &Config) -> Result<Arc<dyn LLMProvider>> {
    match config.llm.default_provider.as_str() {
        "ollama" => Ok(Arc::new(OllamaProvider::new(
            config.llm.ollama.base_url.clone(),
            config.llm.ollama.model.clone(),
        ))),
        other => Err(anyhow::anyhow!(
            "Unsupported LLM provider '{}'. Only 'ollama' is available",
            other
        )),
    }
}

/// Run one turn
///
/// Ctrl-C cancels the turn; the partial work is discarded.
pub async fn handle_run(
    message: String,
    overrides: RunOverrides,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let mut config = config.clone();
    if let Some(max_rounds) = overrides.max_rounds {
        config.agent.max_rounds = max_rounds;
    }
    if let Some(mode) = overrides.context_mode {
        config.agent.context_mode = mode;
    }
    config.validate().context("Invalid run options")?;

    let provider = build_provider(&config)?;
    if !provider.check_health().await {
        tracing::warn!("Provider '{}' did not pass its health check", provider.name());
    }

    let view = Arc::new(GenomeView::default());
    let registry = Arc::new(build_registry(&config, view.clone()));
    let state_view = view.clone();
    let orchestrator = Orchestrator::new(provider, registry, &config)
        .with_domain_context(Arc::new(move || state_view.describe_state()));

    let cancel = CancellationToken::new();
    let ctrl_c_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, cancelling turn");
            ctrl_c_token.cancel();
        }
    });

    if let OutputFormat::Text = format {
        println!("> {}", message);
        println!();
    }

    let conversation = Conversation::new();
    let result = orchestrator.run_turn(&conversation, &message, &cancel).await;

    match result {
        Ok(outcome) => {
            match format {
                OutputFormat::Text => {
                    println!("{}", outcome.answer);
                    println!();
                    let marker = match outcome.stop_reason {
                        StopReason::Completed => "✓",
                        StopReason::NoProgress => "✗",
                        StopReason::Exhausted => "…",
                    };
                    println!("{} {:?}", marker, outcome.stop_reason);
                    println!("  Rounds: {}", outcome.rounds.len());
                    println!("  Model calls: {}", outcome.model_calls);
                    println!("  Duration: {}ms", outcome.duration_ms);
                    println!("  View: {}", view.current());
                }
                OutputFormat::Json => {
                    let output = json!({
                        "status": outcome.stop_reason,
                        "turn_id": outcome.turn_id,
                        "answer": outcome.answer,
                        "rounds": outcome.rounds,
                        "model_calls": outcome.model_calls,
                        "duration_ms": outcome.duration_ms,
                        "view": view.current().to_string(),
                    });
                    println!("{}", serde_json::to_string_pretty(&output)?);
                }
            }
            Ok(())
        }
        Err(e) => {
            match format {
                OutputFormat::Text => {
                    println!("✗ {}", e);
                    println!("  {}", e.user_hint());
                }
                OutputFormat::Json => {
                    let output = json!({
                        "status": "failed",
                        "error": e.to_string(),
                        "hint": e.user_hint(),
                        "recoverable": e.is_recoverable(),
                    });
                    println!("{}", serde_json::to_string_pretty(&output)?);
                }
            }
            Err(e.into())
        }
    }
}

/// List registered tools per source
pub fn handle_tools(config: &Config, format: OutputFormat) -> Result<()> {
    let registry = build_registry(config, Arc::new(GenomeView::default()));
    let listing = registry.list_by_source();

    match format {
        OutputFormat::Text => {
            println!("Registered tools:");
            for (source, names) in &listing {
                println!();
                println!("[{}]", source);
                for name in names {
                    println!("  {}", name);
                }
            }
        }
        OutputFormat::Json => {
            let output: serde_json::Map<String, serde_json::Value> = listing
                .into_iter()
                .map(|(source, names)| (source, json!(names)))
                .collect();
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Print the effective configuration
pub fn handle_config_show(config: &Config, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            let rendered = toml::to_string_pretty(config).context("Failed to render config")?;
            println!("{}", rendered);
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(config)?);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_registry_respects_order() {
        let mut config = Config::default();
        config.registry.source_order = vec!["function_library".to_string(), "builtin".to_string()];

        let registry = build_registry(&config, Arc::new(GenomeView::default()));
        let ids: Vec<String> = registry.list_by_source().into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["function_library", "builtin"]);
    }

    #[test]
    fn test_build_provider() {
        let mut config = Config::default();
        assert_eq!(build_provider(&config).unwrap().name(), "ollama");

        config.llm.default_provider = "mystery".to_string();
        assert!(build_provider(&config).is_err());
    }

    #[test]
    fn test_handle_tools_and_config_show() {
        let config = Config::default();
        assert!(handle_tools(&config, OutputFormat::Json).is_ok());
        assert!(handle_config_show(&config, OutputFormat::Text).is_ok());
    }
}
