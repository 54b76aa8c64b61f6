//! Execution Policy Engine
//!
//! Decides, before anything runs, whether a proposed invocation may execute.
//! This is what stops a model that keeps re-issuing the same call from
//! looping forever while still letting it read new data with new arguments.
//!
//! Every tool belongs to one policy class:
//!
//! - **ConditionalReexecution**: resource loads; denied once an identical call succeeded
//! - **OncePerRound**: UI-mutating actions; one execution per tool per round
//! - **ParameterBased**: lookups and navigation; identical calls denied, new arguments allowed
//! - **RateLimited**: view nudges and network lookups; sliding time window per tool
//! - **AlwaysAllowed**: stateless reads
//!
//! Tools with no class fall back to parameter-based "allow once ever" and are
//! logged, so an unrecognised tool can never repeat without limit.
//!
//! Identity is a blake3 hash of the canonical JSON form of (name, parameters);
//! object keys are sorted at every depth so key order never matters.

use chrono::{DateTime, Utc};
use sdk::types::{ToolInvocation, ToolResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::PolicyConfig;

/// Rate-limit buckets with their own window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateBucket {
    /// Incremental pan/zoom
    ViewNudge,
    /// External network calls
    Network,
}

/// Re-execution rule for a tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyClass {
    ConditionalReexecution,
    OncePerRound,
    ParameterBased,
    RateLimited(RateBucket),
    AlwaysAllowed,
}

impl PolicyClass {
    /// Parse a `[policy.classes]` value
    pub fn from_config_name(name: &str) -> Option<Self> {
        match name {
            "conditional_reexecution" => Some(Self::ConditionalReexecution),
            "once_per_round" => Some(Self::OncePerRound),
            "parameter_based" => Some(Self::ParameterBased),
            "rate_limited_view" => Some(Self::RateLimited(RateBucket::ViewNudge)),
            "rate_limited_network" => Some(Self::RateLimited(RateBucket::Network)),
            "always_allowed" => Some(Self::AlwaysAllowed),
            _ => None,
        }
    }
}

const DEFAULT_CLASSES: &[(&str, PolicyClass)] = &[
    ("load_genome", PolicyClass::ConditionalReexecution),
    ("load_annotations", PolicyClass::ConditionalReexecution),
    ("load_track", PolicyClass::ConditionalReexecution),
    ("create_bookmark", PolicyClass::OncePerRound),
    ("export_bookmarks", PolicyClass::OncePerRound),
    ("open_view", PolicyClass::OncePerRound),
    ("navigate_to", PolicyClass::ParameterBased),
    ("search_feature", PolicyClass::ParameterBased),
    ("translate_dna", PolicyClass::ParameterBased),
    ("reverse_complement", PolicyClass::ParameterBased),
    ("gc_content", PolicyClass::ParameterBased),
    ("codon_usage", PolicyClass::ParameterBased),
    ("amino_acid_composition", PolicyClass::ParameterBased),
    ("region_length", PolicyClass::ParameterBased),
    ("zoom_in", PolicyClass::RateLimited(RateBucket::ViewNudge)),
    ("zoom_out", PolicyClass::RateLimited(RateBucket::ViewNudge)),
    ("scroll_left", PolicyClass::RateLimited(RateBucket::ViewNudge)),
    ("scroll_right", PolicyClass::RateLimited(RateBucket::ViewNudge)),
    ("search_ncbi", PolicyClass::RateLimited(RateBucket::Network)),
    ("fetch_remote_annotation", PolicyClass::RateLimited(RateBucket::Network)),
    ("get_current_state", PolicyClass::AlwaysAllowed),
    ("list_bookmarks", PolicyClass::AlwaysAllowed),
];

/// Whether an invocation may run, and why
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub allow: bool,
    pub reason: String,
}

impl PolicyDecision {
    fn allow(reason: impl Into<String>) -> Self {
        Self {
            allow: true,
            reason: reason.into(),
        }
    }

    fn deny(reason: impl Into<String>) -> Self {
        Self {
            allow: false,
            reason: reason.into(),
        }
    }
}

/// Order-independent identity of an invocation
pub type InvocationKey = blake3::Hash;

/// Canonical key of (name, parameters)
pub fn canonical_key(invocation: &ToolInvocation) -> InvocationKey {
    let mut canonical = String::new();
    canonical.push_str(&invocation.name);
    canonical.push('\u{0}');
    write_canonical(
        &serde_json::Value::Object(invocation.parameters.clone()),
        &mut canonical,
    );
    blake3::hash(canonical.as_bytes())
}

fn write_canonical(value: &serde_json::Value, out: &mut String) {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        serde_json::Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Results executed so far in a turn, queryable by canonical key and tool name.
/// Execution times carried over from earlier turns feed the rate windows only.
#[derive(Debug, Clone, Default)]
pub struct ExecutionHistory {
    entries: Vec<(InvocationKey, ToolResult)>,
    carried: HashMap<String, DateTime<Utc>>,
}

impl ExecutionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty history that still remembers when each tool last ran
    pub fn carrying(last_executions: HashMap<String, DateTime<Utc>>) -> Self {
        Self {
            entries: Vec::new(),
            carried: last_executions,
        }
    }

    /// Latest execution time per tool, carried times included
    pub fn last_executions(&self) -> HashMap<String, DateTime<Utc>> {
        let mut times = self.carried.clone();
        for (_, result) in &self.entries {
            let time = times
                .entry(result.invocation.name.clone())
                .or_insert(result.timestamp);
            if result.timestamp > *time {
                *time = result.timestamp;
            }
        }
        times
    }

    /// Append a settled result
    pub fn record(&mut self, result: ToolResult) {
        let key = canonical_key(&result.invocation);
        self.entries.push((key, result));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All results in execution order
    pub fn results(&self) -> impl Iterator<Item = &ToolResult> {
        self.entries.iter().map(|(_, result)| result)
    }

    /// Whether an invocation with this key ever succeeded
    pub fn succeeded(&self, key: &InvocationKey) -> bool {
        self.entries
            .iter()
            .any(|(k, result)| k == key && result.success)
    }

    /// Whether an invocation with this key was executed at all
    pub fn executed(&self, key: &InvocationKey) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    /// Whether the tool executed in the given round
    pub fn executed_in_round(&self, name: &str, round_index: usize) -> bool {
        self.entries.iter().any(|(_, result)| {
            result.invocation.name == name && result.invocation.round_index == round_index
        })
    }

    /// Most recent execution time of the tool
    pub fn last_execution(&self, name: &str) -> Option<DateTime<Utc>> {
        self.entries
            .iter()
            .filter(|(_, result)| result.invocation.name == name)
            .map(|(_, result)| result.timestamp)
            .chain(self.carried.get(name).copied())
            .max()
    }
}

/// Per-invocation gatekeeper
#[derive(Debug, Clone)]
pub struct ExecutionPolicyEngine {
    classes: HashMap<String, PolicyClass>,
    view_nudge_window: Duration,
    network_window: Duration,
}

impl Default for ExecutionPolicyEngine {
    fn default() -> Self {
        Self::new(&PolicyConfig::default())
    }
}

impl ExecutionPolicyEngine {
    /// Build the default class table, then apply config overrides
    pub fn new(config: &PolicyConfig) -> Self {
        let mut classes: HashMap<String, PolicyClass> = DEFAULT_CLASSES
            .iter()
            .map(|(name, class)| (name.to_string(), *class))
            .collect();

        for (tool, class_name) in &config.classes {
            match PolicyClass::from_config_name(class_name) {
                Some(class) => {
                    classes.insert(tool.clone(), class);
                }
                None => warn!(
                    "Ignoring unknown policy class '{}' for tool '{}'",
                    class_name, tool
                ),
            }
        }

        Self {
            classes,
            view_nudge_window: Duration::from_secs(config.view_nudge_window_secs),
            network_window: Duration::from_secs(config.network_window_secs),
        }
    }

    /// Assign a class to a tool
    pub fn with_class(mut self, tool: impl Into<String>, class: PolicyClass) -> Self {
        self.classes.insert(tool.into(), class);
        self
    }

    /// Class registered for a tool, if any
    pub fn classify(&self, name: &str) -> Option<PolicyClass> {
        self.classes.get(name).copied()
    }

    /// Class applied to unclassified tools served by the given source
    pub fn source_default(&self, source_id: &str) -> Option<PolicyClass> {
        match source_id {
            "remote" => Some(PolicyClass::RateLimited(RateBucket::Network)),
            _ => None,
        }
    }

    fn window(&self, bucket: RateBucket) -> Duration {
        match bucket {
            RateBucket::ViewNudge => self.view_nudge_window,
            RateBucket::Network => self.network_window,
        }
    }

    /// Decide using the tool's registered class
    ///
    /// `admitted_this_round` are siblings already cleared to run in this
    /// round; they have not produced results yet.
    pub fn allow(
        &self,
        invocation: &ToolInvocation,
        history: &ExecutionHistory,
        round_index: usize,
        admitted_this_round: &[ToolInvocation],
    ) -> PolicyDecision {
        self.decide(
            self.classify(&invocation.name),
            invocation,
            history,
            round_index,
            admitted_this_round,
            Utc::now(),
        )
    }

    /// Decide with an explicit class (or none) at an explicit time
    pub fn decide(
        &self,
        class: Option<PolicyClass>,
        invocation: &ToolInvocation,
        history: &ExecutionHistory,
        round_index: usize,
        admitted_this_round: &[ToolInvocation],
        now: DateTime<Utc>,
    ) -> PolicyDecision {
        let key = canonical_key(invocation);
        let admitted_same_key = || admitted_this_round.iter().any(|i| canonical_key(i) == key);
        let admitted_same_name = || {
            admitted_this_round
                .iter()
                .any(|i| i.name == invocation.name)
        };

        let decision = match class {
            Some(PolicyClass::AlwaysAllowed) => PolicyDecision::allow("stateless read"),

            Some(PolicyClass::ConditionalReexecution) => {
                if history.succeeded(&key) || admitted_same_key() {
                    PolicyDecision::deny("identical load already succeeded")
                } else {
                    PolicyDecision::allow("not loaded yet")
                }
            }

            Some(PolicyClass::OncePerRound) => {
                if history.executed_in_round(&invocation.name, round_index) || admitted_same_name()
                {
                    PolicyDecision::deny(format!(
                        "'{}' already executed in round {}",
                        invocation.name, round_index
                    ))
                } else {
                    PolicyDecision::allow("first execution this round")
                }
            }

            Some(PolicyClass::ParameterBased) => {
                if history.succeeded(&key) || admitted_same_key() {
                    PolicyDecision::deny("identical parameters already succeeded")
                } else {
                    PolicyDecision::allow("new parameters")
                }
            }

            Some(PolicyClass::RateLimited(bucket)) => {
                let window = self.window(bucket);
                let recent = history.last_execution(&invocation.name).is_some_and(|last| {
                    now.signed_duration_since(last)
                        .to_std()
                        .map_or(true, |elapsed| elapsed < window)
                });
                if recent || admitted_same_name() {
                    PolicyDecision::deny(format!(
                        "'{}' executed within the last {}s",
                        invocation.name,
                        window.as_secs()
                    ))
                } else {
                    PolicyDecision::allow("outside rate window")
                }
            }

            None => {
                warn!(
                    "No policy class for tool '{}'; allowing each parameter set once",
                    invocation.name
                );
                if history.succeeded(&key) || admitted_same_key() {
                    PolicyDecision::deny("unclassified tool already ran with these parameters")
                } else {
                    PolicyDecision::allow("unclassified tool, first execution")
                }
            }
        };

        debug!(
            "Policy for '{}' (round {}): allow={} ({})",
            invocation.name, round_index, decision.allow, decision.reason
        );

        decision
    }
}
