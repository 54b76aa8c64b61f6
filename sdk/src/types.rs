//! Tool invocation and result types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Named parameters passed to a tool.
///
/// A JSON object; `serde_json::Map` keeps keys sorted, which the canonical
/// invocation key relies on only as a convenience, never as a guarantee.
pub type Parameters = serde_json::Map<String, serde_json::Value>;

/// A structured tool call recovered from a model response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolInvocation {
    /// Tool name as emitted by the model (`tool_name` on the wire)
    pub name: String,

    /// Named parameters
    pub parameters: Parameters,

    /// Round in which the invocation was proposed (1-based, 0 if unassigned)
    pub round_index: usize,
}

impl ToolInvocation {
    /// Create a new invocation with no parameters
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: Parameters::new(),
            round_index: 0,
        }
    }

    /// Create an invocation from an already-built parameter object
    pub fn with_parameters(name: impl Into<String>, parameters: Parameters) -> Self {
        Self {
            name: name.into(),
            parameters,
            round_index: 0,
        }
    }

    /// Add a parameter
    pub fn with_param(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    /// Assign the round the invocation belongs to
    pub fn in_round(mut self, round_index: usize) -> Self {
        self.round_index = round_index;
        self
    }

    /// Get a string parameter
    pub fn param_str(&self, key: &str) -> Result<&str, ToolError> {
        self.parameters
            .get(key)
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::MissingParameter(key.to_string()))
    }

    /// Get an i64 parameter, accepting numeric strings
    pub fn param_i64(&self, key: &str) -> Result<i64, ToolError> {
        match self.parameters.get(key) {
            Some(serde_json::Value::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .ok_or_else(|| ToolError::InvalidParameter(key.to_string())),
            Some(serde_json::Value::String(s)) => s
                .trim()
                .replace(',', "")
                .parse()
                .map_err(|_| ToolError::InvalidParameter(key.to_string())),
            Some(_) => Err(ToolError::InvalidParameter(key.to_string())),
            None => Err(ToolError::MissingParameter(key.to_string())),
        }
    }

    /// Get an optional string parameter
    pub fn param_str_opt(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(|v| v.as_str())
    }

    /// Get an optional i64 parameter
    pub fn param_i64_opt(&self, key: &str) -> Option<i64> {
        self.param_i64(key).ok()
    }

    /// Get an optional f64 parameter
    pub fn param_f64_opt(&self, key: &str) -> Option<f64> {
        self.parameters.get(key).and_then(|v| v.as_f64())
    }

    /// Render the invocation in the wire shape the model is asked to emit
    pub fn to_wire(&self) -> serde_json::Value {
        serde_json::json!({
            "tool_name": self.name,
            "parameters": self.parameters,
        })
    }
}

/// Outcome of executing one invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// The invocation this result belongs to
    pub invocation: ToolInvocation,

    /// Whether the tool reported success
    pub success: bool,

    /// Returned value on success
    pub value: Option<serde_json::Value>,

    /// Error message on failure
    pub error: Option<String>,

    /// When execution settled
    pub timestamp: DateTime<Utc>,
}

impl ToolResult {
    /// Create a successful result
    pub fn success(invocation: ToolInvocation, value: serde_json::Value) -> Self {
        Self {
            invocation,
            success: true,
            value: Some(value),
            error: None,
            timestamp: Utc::now(),
        }
    }

    /// Create a failed result
    pub fn failure(invocation: ToolInvocation, error: impl Into<String>) -> Self {
        Self {
            invocation,
            success: false,
            value: None,
            error: Some(error.into()),
            timestamp: Utc::now(),
        }
    }

    /// Override the settlement time
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Name of the tool that produced this result
    pub fn tool_name(&self) -> &str {
        &self.invocation.name
    }
}

/// Tool-specific parameter errors
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Missing parameter: {0}")]
    MissingParameter(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Unknown method: {0}")]
    UnknownMethod(String),
}
