//! Dynamic capability sources
//!
//! Plugin and remote-server tools whose names are only known at runtime.
//! The name list lives behind a lock as an immutable snapshot and is replaced
//! wholesale, either by `refresh` (ask the transport) or by a refresh listener
//! task fed from a channel.

use async_trait::async_trait;
use sdk::capability::{CapabilityError, CapabilitySource};
use sdk::types::Parameters;
use serde_json::Value;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How a dynamic source reaches its tools
#[async_trait]
pub trait ToolTransport: Send + Sync {
    /// Names the other end currently exposes
    async fn list_tools(&self) -> Result<Vec<String>, CapabilityError>;

    /// Invoke one tool
    async fn call(&self, name: &str, parameters: &Parameters) -> Result<Value, CapabilityError>;
}

/// Change notifications for a dynamic source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshEvent {
    /// Use this name list as-is
    Replace(Vec<String>),
    /// Ask the transport for the current list
    Refetch,
}

/// A capability source whose tool list can change at runtime
pub struct DynamicSource<T: ToolTransport> {
    id: String,
    priority: i32,
    transport: T,
    names: RwLock<Arc<Vec<String>>>,
}

impl<T: ToolTransport> DynamicSource<T> {
    /// Create a source with an empty tool list
    pub fn new(id: impl Into<String>, priority: i32, transport: T) -> Self {
        Self {
            id: id.into(),
            priority,
            transport,
            names: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// Current name list snapshot
    pub fn names(&self) -> Arc<Vec<String>> {
        self.names.read().expect("DynamicSource lock poisoned").clone()
    }

    /// Replace the name list
    pub fn set_names(&self, names: Vec<String>) {
        debug!("Source '{}' now exposes {} tools", self.id, names.len());
        let mut guard = self.names.write().expect("DynamicSource lock poisoned");
        *guard = Arc::new(names);
    }

    /// Fetch the name list from the transport and swap it in
    ///
    /// On failure the previous list stays in place.
    pub async fn refresh(&self) -> Result<usize, CapabilityError> {
        let names = self.transport.list_tools().await?;
        let count = names.len();
        self.set_names(names);
        Ok(count)
    }
}

#[async_trait]
impl<T: ToolTransport + 'static> CapabilitySource for DynamicSource<T> {
    fn id(&self) -> &str {
        &self.id
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn list_names(&self) -> Vec<String> {
        self.names().as_ref().clone()
    }

    async fn invoke(&self, name: &str, parameters: &Parameters) -> Result<Value, CapabilityError> {
        if !self.names().iter().any(|n| n == name) {
            return Err(CapabilityError::Unresolved(name.to_string()));
        }
        self.transport.call(name, parameters).await
    }

    fn handles(&self, name: &str) -> bool {
        self.names().iter().any(|n| n == name)
    }
}

/// Apply refresh events to a source until the channel closes
pub fn spawn_refresh_listener<T>(
    source: Arc<DynamicSource<T>>,
    mut events: mpsc::Receiver<RefreshEvent>,
) -> JoinHandle<()>
where
    T: ToolTransport + 'static,
{
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                RefreshEvent::Replace(names) => source.set_names(names),
                RefreshEvent::Refetch => {
                    if let Err(e) = source.refresh().await {
                        warn!("Failed to refresh tools for '{}': {}", source.id, e);
                    }
                }
            }
        }
        info!("Refresh listener for '{}' stopped", source.id);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    struct ScriptedTransport {
        listings: Mutex<Vec<Result<Vec<String>, CapabilityError>>>,
    }

    impl ScriptedTransport {
        fn new(listings: Vec<Result<Vec<String>, CapabilityError>>) -> Self {
            Self {
                listings: Mutex::new(listings),
            }
        }
    }

    #[async_trait]
    impl ToolTransport for ScriptedTransport {
        async fn list_tools(&self) -> Result<Vec<String>, CapabilityError> {
            let mut listings = self.listings.lock().unwrap();
            if listings.is_empty() {
                Ok(Vec::new())
            } else {
                listings.remove(0)
            }
        }

        async fn call(&self, name: &str, _parameters: &Parameters) -> Result<Value, CapabilityError> {
            Ok(json!({ "called": name }))
        }
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_refresh_replaces_and_keeps_on_error() {
        let source = DynamicSource::new(
            "remote",
            30,
            ScriptedTransport::new(vec![
                Ok(names(&["search_ncbi"])),
                Err(CapabilityError::Transport("down".into())),
            ]),
        );
        assert!(source.list_names().is_empty());

        assert_eq!(source.refresh().await.unwrap(), 1);
        let snapshot = source.names();
        assert_eq!(*snapshot, names(&["search_ncbi"]));

        assert!(source.refresh().await.is_err());
        assert_eq!(source.list_names(), names(&["search_ncbi"]));
    }

    #[tokio::test]
    async fn test_invoke_requires_listed_name() {
        let source = DynamicSource::new("plugin", 20, ScriptedTransport::new(vec![]));
        source.set_names(names(&["plot_coverage"]));

        let value = source.invoke("plot_coverage", &Parameters::new()).await.unwrap();
        assert_eq!(value["called"], "plot_coverage");

        let err = source.invoke("other", &Parameters::new()).await.unwrap_err();
        assert!(matches!(err, CapabilityError::Unresolved(_)));
    }

    #[tokio::test]
    async fn test_refresh_listener() {
        let source = Arc::new(DynamicSource::new(
            "remote",
            30,
            ScriptedTransport::new(vec![Ok(names(&["fetch_remote_annotation"]))]),
        ));
        let (tx, rx) = mpsc::channel(4);
        let handle = spawn_refresh_listener(source.clone(), rx);

        tx.send(RefreshEvent::Replace(names(&["a", "b"]))).await.unwrap();
        tx.send(RefreshEvent::Refetch).await.unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(source.list_names(), names(&["fetch_remote_annotation"]));
    }
}
