//! Node lifecycle tracker.
//!
//! One state machine entry per graph node:
//! `pending -> running -> {succeeded, failed}` and `pending -> skipped`.
//! Terminal states never transition again, and entries are never removed,
//! so the full history of a plan stays auditable. At most one node is
//! `running` at a time within a plan.

use std::collections::BTreeMap;

use agentflow_core::{AgentFlowError, NodeState, Result};

#[derive(Debug, Default)]
pub struct LifecycleTracker {
    states: BTreeMap<String, NodeState>,
    running: Option<String>,
}

impl LifecycleTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a `pending` entry for a node. Idempotent: an existing entry
    /// is left untouched.
    pub fn register(&mut self, node_id: &str) {
        self.states
            .entry(node_id.to_string())
            .or_insert(NodeState::Pending);
    }

    pub fn state(&self, node_id: &str) -> Option<NodeState> {
        self.states.get(node_id).copied()
    }

    pub fn states(&self) -> &BTreeMap<String, NodeState> {
        &self.states
    }

    /// Ids still awaiting execution.
    pub fn pending(&self) -> Vec<String> {
        self.states
            .iter()
            .filter(|(_, state)| **state == NodeState::Pending)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn all_terminal(&self) -> bool {
        self.states.values().all(NodeState::is_terminal)
    }

    /// Apply one lifecycle transition, rejecting anything outside the legal
    /// edges of the state machine.
    pub fn transition(&mut self, node_id: &str, to: NodeState) -> Result<()> {
        let from = *self.states.get(node_id).ok_or_else(|| {
            AgentFlowError::GraphIntegrity(format!("no lifecycle entry for node '{}'", node_id))
        })?;

        let legal = matches!(
            (from, to),
            (NodeState::Pending, NodeState::Running)
                | (NodeState::Running, NodeState::Succeeded)
                | (NodeState::Running, NodeState::Failed)
                | (NodeState::Pending, NodeState::Skipped)
        );
        if !legal {
            return Err(AgentFlowError::Lifecycle {
                node: node_id.to_string(),
                from,
                to,
            });
        }

        if to == NodeState::Running {
            if let Some(current) = &self.running {
                return Err(AgentFlowError::Lifecycle {
                    node: format!("{} (while '{}' is running)", node_id, current),
                    from,
                    to,
                });
            }
            self.running = Some(node_id.to_string());
        } else if self.running.as_deref() == Some(node_id) {
            self.running = None;
        }

        self.states.insert(node_id.to_string(), to);
        Ok(())
    }

    /// Bulk-skip pending nodes: untaken branch arms and loop bodies beyond
    /// the iteration bound. Nodes already past `pending` are left alone.
    pub fn skip_all<I, S>(&mut self, node_ids: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for id in node_ids {
            let id = id.as_ref();
            if self.state(id) == Some(NodeState::Pending) {
                self.states.insert(id.to_string(), NodeState::Skipped);
            }
        }
    }
}
