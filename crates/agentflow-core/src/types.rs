use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::graph::FlowGraph;

/// Unique plan identifier.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct PlanId(pub String);

impl PlanId {
    pub fn new() -> Self {
        Self(format!("plan-{}", Uuid::new_v4()))
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }
}

impl Default for PlanId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PlanId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Token usage for one adapter invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

impl Usage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        }
    }
}

/// One prompt/response round trip. Append-only: never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exchange {
    pub prompt: String,
    pub response: String,
    #[serde(default)]
    pub usage: Usage,
    pub timestamp: DateTime<Utc>,
    /// Originating adapter identifier.
    pub adapter: String,
    /// Typed cause recorded when the adapter invocation failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Exchange {
    pub fn new(
        prompt: impl Into<String>,
        response: impl Into<String>,
        usage: Usage,
        adapter: impl Into<String>,
    ) -> Self {
        Self {
            prompt: prompt.into(),
            response: response.into(),
            usage,
            timestamp: Utc::now(),
            adapter: adapter.into(),
            error: None,
        }
    }

    /// Record an adapter failure as an exchange with a typed cause.
    pub fn failed(
        prompt: impl Into<String>,
        adapter: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            prompt: prompt.into(),
            response: String::new(),
            usage: Usage::default(),
            timestamp: Utc::now(),
            adapter: adapter.into(),
            error: Some(error.into()),
        }
    }
}

/// Overall plan status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Planning,
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PlanStatus::Planning => "planning",
            PlanStatus::Running => "running",
            PlanStatus::Completed => "completed",
            PlanStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Per-node execution lifecycle state.
///
/// `skipped` is reserved for branch arms not taken and loop bodies beyond
/// the permitted iteration bound. Terminal states never transition again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl NodeState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NodeState::Succeeded | NodeState::Failed | NodeState::Skipped
        )
    }
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NodeState::Pending => "pending",
            NodeState::Running => "running",
            NodeState::Succeeded => "succeeded",
            NodeState::Failed => "failed",
            NodeState::Skipped => "skipped",
        };
        f.pad(s)
    }
}

/// The root artifact for one run: exchanges, the canonical graph, and the
/// per-node lifecycle states, persisted as a single document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanDocument {
    pub id: PlanId,
    pub created_at: DateTime<Utc>,
    pub status: PlanStatus,
    #[serde(default)]
    pub exchanges: Vec<Exchange>,
    #[serde(default)]
    pub graph: FlowGraph,
    #[serde(default)]
    pub node_states: BTreeMap<String, NodeState>,
}

impl PlanDocument {
    pub fn new(id: PlanId) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            status: PlanStatus::Planning,
            exchanges: Vec::new(),
            graph: FlowGraph::default(),
            node_states: BTreeMap::new(),
        }
    }

    pub fn state_of(&self, node_id: &str) -> Option<NodeState> {
        self.node_states.get(node_id).copied()
    }
}
