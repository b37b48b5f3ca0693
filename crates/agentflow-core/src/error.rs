use thiserror::Error;

use crate::types::NodeState;

#[derive(Debug, Error)]
pub enum AgentFlowError {
    // Adapter errors
    #[error("adapter '{adapter}' timed out after {timeout_secs}s")]
    AdapterTimeout { adapter: String, timeout_secs: u64 },

    #[error("adapter '{adapter}' process failure: {message}")]
    AdapterProcess { adapter: String, message: String },

    #[error("adapter '{adapter}' produced malformed output: {message}")]
    AdapterOutput { adapter: String, message: String },

    // Plan store errors
    #[error("plan store error: {0}")]
    Store(String),

    // Graph errors
    #[error("graph integrity violation: {0}")]
    GraphIntegrity(String),

    #[error("illegal lifecycle transition for node '{node}': {from} -> {to}")]
    Lifecycle {
        node: String,
        from: NodeState,
        to: NodeState,
    },

    // Config errors
    #[error("config error: {0}")]
    Config(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, AgentFlowError>;

/// Recoverable outcome of flow-spec parsing.
///
/// Both variants trigger the synthesizer's linear-chain fallback rather than
/// aborting the plan pass; consumers pattern-match instead of propagating.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("no structured flow block found in response")]
    NoStructuredFlow,

    #[error("malformed flow specification: {detail}")]
    MalformedFlow { detail: String },
}

impl ParseError {
    pub fn malformed(detail: impl Into<String>) -> Self {
        Self::MalformedFlow {
            detail: detail.into(),
        }
    }
}
