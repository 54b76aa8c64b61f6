//! Integration tests for configuration management
//!
//! These tests verify that the Config struct can be loaded from disk,
//! filled with defaults, and validated.

use std::fs;
use tempfile::TempDir;

use helix_engine::config::{Config, ContextMode};

#[test]
fn test_config_toml_parsing() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.toml");

    fs::write(
        &path,
        r#"
[core]
log_level = "debug"

[llm]
default_provider = "ollama"

[llm.ollama]
base_url = "http://127.0.0.1:11434"
model = "qwen2.5:7b"

[agent]
max_rounds = 5
early_completion = false
completion_threshold = 0.8
context_mode = "current_message"
memory_window = 4
llm_timeout_secs = 60

[policy]
view_nudge_window_secs = 3
network_window_secs = 45

[policy.classes]
navigate_to = "always_allowed"

[registry]
source_order = ["function_library", "builtin"]
"#,
    )
    .unwrap();

    let config = Config::load_from_path(&path).unwrap();

    assert_eq!(config.core.log_level, "debug");
    assert_eq!(config.llm.ollama.model, "qwen2.5:7b");
    assert_eq!(config.agent.max_rounds, 5);
    assert!(!config.agent.early_completion);
    assert_eq!(config.agent.context_mode, ContextMode::CurrentMessage);
    assert_eq!(config.agent.memory_window, 4);
    assert_eq!(config.policy.network_window_secs, 45);
    assert_eq!(config.policy.classes["navigate_to"], "always_allowed");
    assert_eq!(config.registry.source_order, vec!["function_library", "builtin"]);
}

#[test]
fn test_missing_sections_use_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.toml");
    fs::write(&path, "[agent]\nmax_rounds = 7\n").unwrap();

    let config = Config::load_from_path(&path).unwrap();

    assert_eq!(config.agent.max_rounds, 7);
    assert!(config.agent.early_completion);
    assert_eq!(config.agent.completion_threshold, 0.7);
    assert_eq!(config.agent.context_mode, ContextMode::FullHistory);
    assert_eq!(config.llm.default_provider, "ollama");
    assert_eq!(config.registry.source_order.len(), 4);
}

#[test]
fn test_invalid_values_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let cases = [
        "[agent]\nmax_rounds = 0\n",
        "[agent]\ncompletion_threshold = 1.5\n",
        "[core]\nlog_level = \"loud\"\n",
        "[policy.classes]\nnavigate_to = \"sometimes\"\n",
        "[registry]\nsource_order = [\"builtin\", \"mcp\"]\n",
        "[agent]\ncontext_mode = \"everything\"\n",
        "this is not toml",
    ];

    for (i, contents) in cases.iter().enumerate() {
        let path = temp_dir.path().join(format!("config-{}.toml", i));
        fs::write(&path, contents).unwrap();
        assert!(
            Config::load_from_path(&path).is_err(),
            "expected rejection for: {}",
            contents
        );
    }
}

#[test]
fn test_missing_file_is_error() {
    let temp_dir = TempDir::new().unwrap();
    let result = Config::load_from_path(&temp_dir.path().join("absent.toml"));
    assert!(result.is_err());
}

#[test]
fn test_serialized_default_reloads() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.toml");

    let rendered = toml::to_string_pretty(&Config::default()).unwrap();
    fs::write(&path, rendered).unwrap();

    let config = Config::load_from_path(&path).unwrap();
    assert_eq!(config.agent.max_rounds, 3);
    assert_eq!(config.agent.llm_timeout_secs, 120);
}
