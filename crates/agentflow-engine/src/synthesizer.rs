//! Graph synthesizer.
//!
//! Expands a normalized flow specification into the canonical `FlowGraph`,
//! injecting a synthetic evaluation checkpoint ahead of every branch and
//! loop node so each decision point is independently trackable. Synthesis
//! is a pure function of its inputs: synthetic ids derive from the
//! originating node id and edges materialize in a fixed order, so repeated
//! synthesis from identical input yields an identical graph.

use std::collections::HashSet;

use serde_json::json;
use tracing::warn;

use agentflow_core::{
    Edge, Exchange, FlowGraph, FlowNode, NodeKind, Result, Score,
};

use crate::parser::{FlowSpec, SpecNode, SpecNodeType};

/// Build the canonical graph for one exchange.
///
/// With no specification the result is the minimal two-node fallback:
/// `prompt` -> `response`, so every exchange stays renderable.
pub fn synthesize(exchange: &Exchange, spec: Option<&FlowSpec>) -> Result<FlowGraph> {
    let graph = match spec {
        None => fallback_graph(exchange)?,
        Some(spec) => expand_spec(spec)?,
    };
    graph.validate()?;
    Ok(graph)
}

/// Deterministic id for the checkpoint injected ahead of a decision node.
pub fn checkpoint_id(node_id: &str) -> String {
    format!("{}.check", node_id)
}

fn fallback_graph(exchange: &Exchange) -> Result<FlowGraph> {
    let mut graph = FlowGraph::new();
    graph.add_node(FlowNode::new(
        "prompt",
        summarize(&exchange.prompt, "Prompt"),
        NodeKind::Prompt,
    ))?;
    graph.add_node(FlowNode::new(
        "response",
        summarize(&exchange.response, "Response"),
        NodeKind::Response,
    ))?;
    graph.add_edge(Edge::sequential("prompt", "response"))?;
    Ok(graph)
}

fn expand_spec(spec: &FlowSpec) -> Result<FlowGraph> {
    let mut graph = FlowGraph::new();

    // Nodes first, checkpoints immediately ahead of their decision node so
    // the insertion-order walk records the checkpoint verdict before the
    // decision resolves.
    for node in &spec.nodes {
        if node.node_type == SpecNodeType::Branch || node.node_type == SpecNodeType::Loop {
            graph.add_node(
                FlowNode::new(
                    checkpoint_id(&node.id),
                    format!("checkpoint: {}", node.label),
                    NodeKind::Evaluation {
                        verdict: None,
                        score: None,
                    },
                )
                .synthetic(),
            )?;
        }
        graph.add_node(flow_node(node))?;
    }

    // A (source, target) pair claimed by a branch or loop edge drops the
    // overlapping generic sequential edge.
    let claimed = claimed_pairs(spec);

    for edge in &spec.edges {
        if claimed.contains(&(edge.from.as_str(), edge.to.as_str())) {
            continue;
        }
        graph.add_edge(Edge::sequential(&edge.from, &edge.to))?;
    }

    for node in &spec.nodes {
        if node.node_type == SpecNodeType::Branch || node.node_type == SpecNodeType::Loop {
            graph.add_edge(Edge::sequential(checkpoint_id(&node.id), &node.id))?;
        }
    }

    for node in &spec.nodes {
        if node.node_type == SpecNodeType::Branch {
            // Arms were validated present by the parser.
            if let (Some(on_true), Some(on_false)) = (&node.on_true, &node.on_false) {
                graph.add_edge(Edge::true_branch(&node.id, on_true))?;
                graph.add_edge(Edge::false_branch(&node.id, on_false))?;
            }
        }
    }

    for node in &spec.nodes {
        if node.node_type == SpecNodeType::Loop {
            let target = node.target.as_deref().unwrap_or(&node.id);
            graph.add_edge(Edge::loop_continue(&node.id, target))?;
            match loop_exit_target(spec, node) {
                Some(exit) => graph.add_edge(Edge::loop_exit(&node.id, exit))?,
                None => warn!(
                    node_id = %node.id,
                    "loop node has no exit successor; omitting loop_exit edge"
                ),
            }
        }
    }

    Ok(graph)
}

fn flow_node(node: &SpecNode) -> FlowNode {
    let kind = match &node.node_type {
        SpecNodeType::Prompt => NodeKind::Prompt,
        SpecNodeType::Response => NodeKind::Response,
        SpecNodeType::Branch => NodeKind::Branch {
            on_true: node.on_true.clone().unwrap_or_default(),
            on_false: node.on_false.clone().unwrap_or_default(),
        },
        SpecNodeType::Loop => NodeKind::Loop {
            target: node.target.clone(),
            max_iterations: clamp_iterations(node),
            iteration: 0,
        },
        SpecNodeType::Evaluation => NodeKind::Evaluation {
            verdict: node.verdict,
            score: node.score.as_ref().and_then(score_from_value),
        },
        SpecNodeType::Other(declared) => NodeKind::Unrecognized {
            declared: declared.clone(),
        },
    };

    let mut flow_node = FlowNode::new(&node.id, &node.label, kind);
    flow_node.metadata.extend(node.metadata.clone());
    if matches!(node.node_type, SpecNodeType::Loop) {
        if let Some(declared) = node.max_iterations {
            if declared < 1 {
                flow_node
                    .metadata
                    .insert("clamped_max_iterations".to_string(), json!(declared));
            }
        }
    }
    flow_node
}

/// Loop bounds below 1 clamp to 1 with a recorded warning, keeping every
/// synthesized graph finite.
fn clamp_iterations(node: &SpecNode) -> u32 {
    let declared = node.max_iterations.unwrap_or(1);
    if declared < 1 {
        warn!(
            node_id = %node.id,
            declared,
            "clamping max_iterations to 1"
        );
        1
    } else {
        declared.min(u32::MAX as i64) as u32
    }
}

fn score_from_value(value: &serde_json::Value) -> Option<Score> {
    if let Some(n) = value.as_f64() {
        Some(Score::Number(n))
    } else {
        value.as_str().map(|s| Score::Text(s.to_string()))
    }
}

fn loop_exit_target<'a>(spec: &'a FlowSpec, node: &'a SpecNode) -> Option<&'a str> {
    if let Some(exit) = node.on_exit.as_deref() {
        return Some(exit);
    }
    spec.edges
        .iter()
        .find(|e| e.from == node.id)
        .map(|e| e.to.as_str())
}

fn claimed_pairs(spec: &FlowSpec) -> HashSet<(&str, &str)> {
    let mut claimed = HashSet::new();
    for node in &spec.nodes {
        match node.node_type {
            SpecNodeType::Branch => {
                if let Some(on_true) = node.on_true.as_deref() {
                    claimed.insert((node.id.as_str(), on_true));
                }
                if let Some(on_false) = node.on_false.as_deref() {
                    claimed.insert((node.id.as_str(), on_false));
                }
            }
            SpecNodeType::Loop => {
                let target = node.target.as_deref().unwrap_or(&node.id);
                claimed.insert((node.id.as_str(), target));
                if let Some(exit) = loop_exit_target(spec, node) {
                    claimed.insert((node.id.as_str(), exit));
                }
            }
            _ => {}
        }
    }
    claimed
}

fn summarize(text: &str, fallback: &str) -> String {
    let collapsed: String = text
        .chars()
        .take(80)
        .map(|c| if c == '\n' { ' ' } else { c })
        .collect();
    let trimmed = collapsed.trim();
    if trimmed.is_empty() {
        fallback.to_string()
    } else {
        trimmed.to_string()
    }
}
