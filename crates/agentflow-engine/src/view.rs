//! Read-only graph projection for renderers.
//!
//! A `GraphView` is self-contained: node labels, kind tags, synthetic
//! markers, lifecycle states, and edge kinds are all inlined so a renderer
//! can draw a fully labeled, status-colored directed graph without any
//! further lookups.

use std::collections::BTreeMap;

use serde::Serialize;

use agentflow_core::{NodeState, PlanDocument, PlanStatus};

#[derive(Debug, Clone, Serialize)]
pub struct GraphView {
    pub plan_id: String,
    pub status: PlanStatus,
    pub nodes: Vec<NodeView>,
    pub edges: Vec<EdgeView>,
    /// Lifecycle state tally, for completion roll-ups.
    pub counts: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeView {
    pub id: String,
    pub label: String,
    pub kind: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub synthetic: bool,
    pub status: NodeState,
}

#[derive(Debug, Clone, Serialize)]
pub struct EdgeView {
    pub from: String,
    pub to: String,
    pub kind: String,
}

impl GraphView {
    pub fn from_plan(plan: &PlanDocument) -> Self {
        let nodes: Vec<NodeView> = plan
            .graph
            .nodes()
            .iter()
            .map(|node| NodeView {
                id: node.id.clone(),
                label: node.label.clone(),
                kind: node.kind.tag().to_string(),
                synthetic: node.synthetic,
                status: plan.state_of(&node.id).unwrap_or(NodeState::Pending),
            })
            .collect();

        let edges = plan
            .graph
            .edges()
            .iter()
            .map(|edge| EdgeView {
                from: edge.from.clone(),
                to: edge.to.clone(),
                kind: edge_kind_tag(edge.kind).to_string(),
            })
            .collect();

        let mut counts = BTreeMap::new();
        for node in &nodes {
            *counts.entry(node.status.to_string()).or_insert(0) += 1;
        }

        Self {
            plan_id: plan.id.to_string(),
            status: plan.status,
            nodes,
            edges,
            counts,
        }
    }
}

fn edge_kind_tag(kind: agentflow_core::EdgeKind) -> &'static str {
    use agentflow_core::EdgeKind;
    match kind {
        EdgeKind::Sequential => "sequential",
        EdgeKind::TrueBranch => "true_branch",
        EdgeKind::FalseBranch => "false_branch",
        EdgeKind::LoopContinue => "loop_continue",
        EdgeKind::LoopExit => "loop_exit",
    }
}

impl std::fmt::Display for GraphView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "plan {} [{}]", self.plan_id, self.status)?;
        for node in &self.nodes {
            let marker = if node.synthetic { "*" } else { " " };
            writeln!(
                f,
                "  {}[{:>9}] {:<12} {}: {}",
                marker, node.status, node.kind, node.id, node.label
            )?;
        }
        for edge in &self.edges {
            writeln!(f, "   {} -{}-> {}", edge.from, edge.kind, edge.to)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentflow_core::{Exchange, PlanId, Usage};

    use crate::synthesizer::synthesize;

    #[test]
    fn test_view_is_self_contained() {
        let mut plan = PlanDocument::new(PlanId::from_string("plan-view-test"));
        let exchange = Exchange::new("ask", "answer", Usage::new(1, 2), "mock");
        plan.graph = synthesize(&exchange, None).unwrap();
        plan.node_states
            .insert("prompt".to_string(), NodeState::Succeeded);
        plan.node_states
            .insert("response".to_string(), NodeState::Running);

        let view = GraphView::from_plan(&plan);
        assert_eq!(view.nodes.len(), 2);
        assert_eq!(view.nodes[0].kind, "prompt");
        assert_eq!(view.nodes[0].status, NodeState::Succeeded);
        assert_eq!(view.edges[0].kind, "sequential");
        assert_eq!(view.counts.get("succeeded"), Some(&1));
        assert_eq!(view.counts.get("running"), Some(&1));
    }

    #[test]
    fn test_missing_state_defaults_to_pending() {
        let mut plan = PlanDocument::new(PlanId::from_string("plan-view-test"));
        let exchange = Exchange::new("ask", "answer", Usage::default(), "mock");
        plan.graph = synthesize(&exchange, None).unwrap();

        let view = GraphView::from_plan(&plan);
        assert!(view.nodes.iter().all(|n| n.status == NodeState::Pending));
    }
}
