//! Capability Registry
//!
//! Routes a tool name to exactly one executor. Sources are consulted in
//! order (configured source order, then priority); the first source that
//! lists the name handles it. A business error from that source is final.
//! Transport or resolution errors fall through to the next source. A
//! source that panics yields a failed result for that call only.
//!
//! The source list is an immutable snapshot behind a lock and is replaced
//! wholesale, so an in-flight round keeps routing against the list it
//! started with.

pub mod dynamic;

pub use dynamic::{spawn_refresh_listener, DynamicSource, RefreshEvent, ToolTransport};

use futures::FutureExt;
use sdk::capability::{CapabilityError, CapabilitySource};
use sdk::types::{ToolInvocation, ToolResult};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

use crate::agent::parser::{PARAMETERS_KEY, TOOL_NAME_KEY};

/// Shared handle to a capability source
pub type SourceRef = Arc<dyn CapabilitySource>;

/// Ordered set of capability sources
pub struct CapabilityRegistry {
    sources: RwLock<Arc<Vec<SourceRef>>>,
}

impl CapabilityRegistry {
    /// Create a registry with no sources
    pub fn empty() -> Self {
        Self {
            sources: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// Create a registry ordered by source priority
    pub fn new(sources: Vec<SourceRef>) -> Self {
        let registry = Self::empty();
        registry.replace_sources(sources);
        registry
    }

    /// Create a registry ordered by the configured source ids, then priority.
    ///
    /// Sources whose id is not in `order` are left out.
    pub fn with_order(order: &[String], sources: Vec<SourceRef>) -> Self {
        let mut kept: Vec<(usize, SourceRef)> = Vec::new();
        for source in sources {
            match order.iter().position(|id| id == source.id()) {
                Some(position) => kept.push((position, source)),
                None => debug!("Source '{}' not in source_order, skipping", source.id()),
            }
        }
        kept.sort_by_key(|(position, source)| (*position, source.priority()));

        Self {
            sources: RwLock::new(Arc::new(kept.into_iter().map(|(_, s)| s).collect())),
        }
    }

    /// Replace the whole source list, re-sorting by priority
    pub fn replace_sources(&self, mut sources: Vec<SourceRef>) {
        sources.sort_by_key(|s| s.priority());
        let mut guard = self.sources.write().expect("Registry lock poisoned");
        *guard = Arc::new(sources);
    }

    /// Current source list snapshot
    pub fn sources(&self) -> Arc<Vec<SourceRef>> {
        self.sources.read().expect("Registry lock poisoned").clone()
    }

    /// Id of the first source that lists the tool
    pub fn source_id_for(&self, name: &str) -> Option<String> {
        self.sources()
            .iter()
            .find(|s| s.handles(name))
            .map(|s| s.id().to_string())
    }

    /// Every routable tool name, first claimant wins
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for source in self.sources().iter() {
            for name in source.list_names() {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }
        names
    }

    /// Tool names grouped by source, in routing order
    pub fn list_by_source(&self) -> Vec<(String, Vec<String>)> {
        self.sources()
            .iter()
            .map(|s| (s.id().to_string(), s.list_names()))
            .collect()
    }

    /// Execute an invocation against the first source that can run it
    pub async fn execute(&self, invocation: &ToolInvocation) -> ToolResult {
        let name = invocation.name.as_str();
        let snapshot = self.sources();
        let mut last_error: Option<CapabilityError> = None;

        for source in snapshot.iter().filter(|s| s.handles(name)) {
            debug!("Routing '{}' to source '{}'", name, source.id());

            let outcome = AssertUnwindSafe(source.invoke(name, &invocation.parameters))
                .catch_unwind()
                .await;

            match outcome {
                Err(_) => {
                    warn!("Tool '{}' panicked in source '{}'", name, source.id());
                    return ToolResult::failure(
                        invocation.clone(),
                        format!("Tool '{}' panicked in source '{}'", name, source.id()),
                    );
                }
                Ok(Ok(value)) => return ToolResult::success(invocation.clone(), value),
                Ok(Err(e)) if !e.falls_through() => {
                    debug!("Tool '{}' failed in '{}': {}", name, source.id(), e);
                    return ToolResult::failure(invocation.clone(), e.to_string());
                }
                Ok(Err(e)) => {
                    warn!(
                        "Source '{}' could not run '{}': {}; trying next source",
                        source.id(),
                        name,
                        e
                    );
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) => ToolResult::failure(invocation.clone(), e.to_string()),
            None => {
                warn!("Unknown tool requested: {}", name);
                ToolResult::failure(
                    invocation.clone(),
                    format!(
                        "Unknown tool '{}'. Available tools: {}",
                        name,
                        self.tool_names().join(", ")
                    ),
                )
            }
        }
    }

    /// Tool catalogue for the system prompt
    pub fn catalogue(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        let mut seen: Vec<String> = Vec::new();

        for source in self.sources().iter() {
            let descriptions = source.describe();
            for name in source.list_names() {
                if seen.contains(&name) {
                    continue;
                }
                let description = descriptions
                    .iter()
                    .find(|(n, _)| *n == name)
                    .map(|(_, d)| d.as_str())
                    .unwrap_or("No description available.");
                parts.push(format!("- {}: {}", name, description));
                seen.push(name);
            }
        }

        parts.join("\n")
    }

    /// System prompt describing the call format and the available tools
    pub fn system_prompt(&self) -> String {
        let format_line = format!(
            r#"{{"{}": "navigate_to", "{}": {{"chromosome": "chr1", "start": 1000, "end": 2000}}}}"#,
            TOOL_NAME_KEY, PARAMETERS_KEY
        );

        [
            "You are Helix, an assistant that drives a genome browser and sequence-analysis tools.".to_string(),
            String::new(),
            "RULES:".to_string(),
            "1. To call tools, reply with a JSON object, or a JSON array of objects to call several at once.".to_string(),
            "2. Use exactly the keys shown below. Other key names are ignored.".to_string(),
            "3. Never invent tool output. Wait for the tool results before answering.".to_string(),
            "4. When the task is finished, answer in plain text without JSON.".to_string(),
            String::new(),
            "Tool call format:".to_string(),
            format_line,
            String::new(),
            "Available tools:".to_string(),
            self.catalogue(),
        ]
        .join("\n")
    }
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sdk::types::Parameters;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubSource {
        id: &'static str,
        priority: i32,
        names: Vec<&'static str>,
        outcome: Result<Value, CapabilityError>,
        calls: AtomicUsize,
    }

    impl StubSource {
        fn new(
            id: &'static str,
            priority: i32,
            names: Vec<&'static str>,
            outcome: Result<Value, CapabilityError>,
        ) -> Arc<Self> {
            Arc::new(Self {
                id,
                priority,
                names,
                outcome,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl CapabilitySource for StubSource {
        fn id(&self) -> &str {
            self.id
        }

        fn priority(&self) -> i32 {
            self.priority
        }

        fn list_names(&self) -> Vec<String> {
            self.names.iter().map(|n| n.to_string()).collect()
        }

        async fn invoke(&self, _name: &str, _parameters: &Parameters) -> Result<Value, CapabilityError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcome.clone()
        }
    }

    #[tokio::test]
    async fn test_first_source_wins() {
        let first = StubSource::new("builtin", 0, vec!["zoom_in"], Ok(json!("first")));
        let second = StubSource::new("plugin", 20, vec!["zoom_in"], Ok(json!("second")));
        let registry = CapabilityRegistry::new(vec![second.clone() as SourceRef, first.clone()]);

        let result = registry.execute(&ToolInvocation::new("zoom_in")).await;
        assert!(result.success);
        assert_eq!(result.value, Some(json!("first")));
        assert_eq!(second.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_business_error_does_not_fall_through() {
        let failing = StubSource::new(
            "builtin",
            0,
            vec!["navigate_to"],
            Err(CapabilityError::Failed("unknown chromosome".into())),
        );
        let backup = StubSource::new("plugin", 20, vec!["navigate_to"], Ok(json!("ok")));
        let registry = CapabilityRegistry::new(vec![failing as SourceRef, backup.clone()]);

        let result = registry.execute(&ToolInvocation::new("navigate_to")).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("unknown chromosome"));
        assert_eq!(backup.calls.load(Ordering::SeqCst), 0);
    }

    struct PanickingSource;

    #[async_trait]
    impl CapabilitySource for PanickingSource {
        fn id(&self) -> &str {
            "plugin"
        }

        fn priority(&self) -> i32 {
            20
        }

        fn list_names(&self) -> Vec<String> {
            vec!["plot".to_string()]
        }

        async fn invoke(&self, _name: &str, _parameters: &Parameters) -> Result<Value, CapabilityError> {
            panic!("plot renderer crashed");
        }
    }

    #[tokio::test]
    async fn test_panicking_source_yields_failure() {
        let backup = StubSource::new("remote", 30, vec!["plot"], Ok(json!("drawn")));
        let builtin = StubSource::new("builtin", 0, vec!["zoom_in"], Ok(json!("zoomed")));
        let registry = CapabilityRegistry::new(vec![
            Arc::new(PanickingSource) as SourceRef,
            backup.clone(),
            builtin,
        ]);

        let result = registry.execute(&ToolInvocation::new("plot")).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("panicked"));
        assert_eq!(backup.calls.load(Ordering::SeqCst), 0);

        // The registry keeps serving after a panic
        let result = registry.execute(&ToolInvocation::new("zoom_in")).await;
        assert!(result.success);
    }

    #[tokio::test]
    async fn test_transport_error_falls_through() {
        let down = StubSource::new(
            "plugin",
            20,
            vec!["search_ncbi"],
            Err(CapabilityError::Transport("connection refused".into())),
        );
        let remote = StubSource::new("remote", 30, vec!["search_ncbi"], Ok(json!({"hits": 3})));
        let registry = CapabilityRegistry::new(vec![down.clone() as SourceRef, remote.clone()]);

        let result = registry.execute(&ToolInvocation::new("search_ncbi")).await;
        assert!(result.success);
        assert_eq!(down.calls.load(Ordering::SeqCst), 1);
        assert_eq!(remote.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_only_failed_errors_are_final() {
        for error in [
            CapabilityError::Unresolved("zoom_in".into()),
            CapabilityError::Transport("reset".into()),
            CapabilityError::Unavailable("restarting".into()),
        ] {
            let first = StubSource::new("plugin", 20, vec!["zoom_in"], Err(error));
            let second = StubSource::new("remote", 30, vec!["zoom_in"], Ok(json!("zoomed")));
            let registry = CapabilityRegistry::new(vec![first as SourceRef, second.clone()]);

            let result = registry.execute(&ToolInvocation::new("zoom_in")).await;
            assert!(result.success);
            assert_eq!(second.calls.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn test_all_sources_unavailable() {
        let down = StubSource::new(
            "remote",
            30,
            vec!["search_ncbi"],
            Err(CapabilityError::Unavailable("maintenance".into())),
        );
        let registry = CapabilityRegistry::new(vec![down as SourceRef]);

        let result = registry.execute(&ToolInvocation::new("search_ncbi")).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("maintenance"));
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let builtin = StubSource::new("builtin", 0, vec!["zoom_in"], Ok(json!(null)));
        let registry = CapabilityRegistry::new(vec![builtin as SourceRef]);

        let result = registry.execute(&ToolInvocation::new("teleport")).await;
        assert!(!result.success);
        let error = result.error.unwrap();
        assert!(error.starts_with("Unknown tool 'teleport'"));
        assert!(error.contains("zoom_in"));
    }

    #[test]
    fn test_with_order_overrides_priority() {
        let builtin = StubSource::new("builtin", 0, vec!["a"], Ok(json!(null)));
        let remote = StubSource::new("remote", 30, vec!["b"], Ok(json!(null)));
        let stray = StubSource::new("stray", 5, vec!["c"], Ok(json!(null)));

        let order = vec!["remote".to_string(), "builtin".to_string()];
        let registry = CapabilityRegistry::with_order(&order, vec![builtin as SourceRef, remote, stray]);

        let ids: Vec<String> = registry.list_by_source().into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["remote", "builtin"]);
        assert_eq!(registry.source_id_for("a").as_deref(), Some("builtin"));
        assert_eq!(registry.source_id_for("c"), None);
    }

    #[test]
    fn test_replace_sources_keeps_old_snapshot() {
        let registry = CapabilityRegistry::new(vec![
            StubSource::new("builtin", 0, vec!["a"], Ok(json!(null))) as SourceRef,
        ]);
        let before = registry.sources();

        registry.replace_sources(vec![
            StubSource::new("plugin", 20, vec!["b"], Ok(json!(null))) as SourceRef,
        ]);

        assert_eq!(before.len(), 1);
        assert_eq!(before[0].id(), "builtin");
        assert_eq!(registry.tool_names(), vec!["b"]);
    }

    #[test]
    fn test_system_prompt_lists_tools() {
        let builtin = StubSource::new("builtin", 0, vec!["zoom_in", "zoom_out"], Ok(json!(null)));
        let plugin = StubSource::new("plugin", 20, vec!["zoom_in", "plot"], Ok(json!(null)));
        let registry = CapabilityRegistry::new(vec![builtin as SourceRef, plugin]);

        let prompt = registry.system_prompt();
        assert!(prompt.contains(r#""tool_name": "navigate_to""#));
        assert!(prompt.contains("- zoom_out"));
        assert!(prompt.contains("- plot"));
        assert_eq!(prompt.matches("- zoom_in").count(), 1);
    }
}
