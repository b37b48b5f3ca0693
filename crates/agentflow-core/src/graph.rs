use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{AgentFlowError, Result};

/// Pass/fail outcome recorded on an evaluation node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Fail,
}

/// Evaluation score: either numeric or free text, as proposed by the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Score {
    Number(f64),
    Text(String),
}

/// Node kind plus kind-specific payload.
///
/// Unknown agent-invented kinds are preserved as `Unrecognized` rather than
/// rejected, so future node types round-trip through the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeKind {
    Prompt,
    Response,
    Branch {
        on_true: String,
        on_false: String,
    },
    Loop {
        /// Body entry the loop re-enters; `None` means the loop node itself.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<String>,
        max_iterations: u32,
        #[serde(default)]
        iteration: u32,
    },
    Evaluation {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        verdict: Option<Verdict>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        score: Option<Score>,
    },
    Unrecognized {
        declared: String,
    },
}

impl NodeKind {
    /// Stable tag string, matching the serialized `kind` field.
    pub fn tag(&self) -> &'static str {
        match self {
            NodeKind::Prompt => "prompt",
            NodeKind::Response => "response",
            NodeKind::Branch { .. } => "branch",
            NodeKind::Loop { .. } => "loop",
            NodeKind::Evaluation { .. } => "evaluation",
            NodeKind::Unrecognized { .. } => "unrecognized",
        }
    }

    pub fn is_decision(&self) -> bool {
        matches!(self, NodeKind::Branch { .. } | NodeKind::Loop { .. })
    }
}

/// A node in the canonical flow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowNode {
    /// Opaque stable identifier, unique within the graph.
    pub id: String,
    /// Human-readable label.
    pub label: String,
    #[serde(flatten)]
    pub kind: NodeKind,
    /// Marks structural nodes injected by the synthesizer, not declared by
    /// the agent.
    #[serde(default, skip_serializing_if = "is_false")]
    pub synthetic: bool,
    /// Free-form metadata carried through from the flow specification.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl FlowNode {
    pub fn new(id: impl Into<String>, label: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            kind,
            synthetic: false,
            metadata: BTreeMap::new(),
        }
    }

    /// Mark this node as synthesizer-injected.
    pub fn synthetic(mut self) -> Self {
        self.synthetic = true;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Edge kind tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    Sequential,
    TrueBranch,
    FalseBranch,
    LoopContinue,
    LoopExit,
}

impl EdgeKind {
    /// Loop edges are the sole tags permitted to close a cycle.
    pub fn is_loop(&self) -> bool {
        matches!(self, EdgeKind::LoopContinue | EdgeKind::LoopExit)
    }
}

/// A directed edge between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
    pub kind: EdgeKind,
}

impl Edge {
    pub fn sequential(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            kind: EdgeKind::Sequential,
        }
    }

    pub fn true_branch(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            kind: EdgeKind::TrueBranch,
        }
    }

    pub fn false_branch(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            kind: EdgeKind::FalseBranch,
        }
    }

    pub fn loop_continue(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            kind: EdgeKind::LoopContinue,
        }
    }

    pub fn loop_exit(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            kind: EdgeKind::LoopExit,
        }
    }
}

/// The canonical execution graph: an arena of nodes and edges indexed by
/// stable string ids, insertion order preserved for deterministic rendering.
///
/// Invariants enforced on mutation: node ids are unique, every edge's
/// endpoints already exist, and `validate` checks that non-loop edges form
/// no cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowGraph {
    #[serde(default)]
    nodes: Vec<FlowNode>,
    #[serde(default)]
    edges: Vec<Edge>,
}

impl FlowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn nodes(&self) -> &[FlowNode] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.iter().any(|n| n.id == id)
    }

    pub fn node(&self, id: &str) -> Option<&FlowNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|n| n.id.as_str())
    }

    /// Add a node; duplicate ids are an integrity violation.
    pub fn add_node(&mut self, node: FlowNode) -> Result<()> {
        if self.contains(&node.id) {
            return Err(AgentFlowError::GraphIntegrity(format!(
                "duplicate node id '{}'",
                node.id
            )));
        }
        self.nodes.push(node);
        Ok(())
    }

    /// Add an edge; both endpoints must already be present.
    pub fn add_edge(&mut self, edge: Edge) -> Result<()> {
        for endpoint in [&edge.from, &edge.to] {
            if !self.contains(endpoint) {
                return Err(AgentFlowError::GraphIntegrity(format!(
                    "edge references unknown node '{}'",
                    endpoint
                )));
            }
        }
        self.edges.push(edge);
        Ok(())
    }

    pub fn incoming<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.to == id)
    }

    pub fn outgoing<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.from == id)
    }

    /// Record a verdict (and optional score) on an evaluation node.
    pub fn record_verdict(
        &mut self,
        id: &str,
        verdict: Verdict,
        score: Option<Score>,
    ) -> Result<()> {
        let node = self.node_mut(id)?;
        match &mut node.kind {
            NodeKind::Evaluation {
                verdict: slot,
                score: score_slot,
            } => {
                *slot = Some(verdict);
                if score.is_some() {
                    *score_slot = score;
                }
                Ok(())
            }
            other => Err(AgentFlowError::GraphIntegrity(format!(
                "cannot record verdict on '{}' node '{}'",
                other.tag(),
                id
            ))),
        }
    }

    /// Advance a loop node's iteration counter to its permitted bound,
    /// returning the bound.
    pub fn exhaust_loop(&mut self, id: &str) -> Result<u32> {
        let node = self.node_mut(id)?;
        match &mut node.kind {
            NodeKind::Loop {
                max_iterations,
                iteration,
                ..
            } => {
                *iteration = *max_iterations;
                Ok(*iteration)
            }
            other => Err(AgentFlowError::GraphIntegrity(format!(
                "cannot advance iteration on '{}' node '{}'",
                other.tag(),
                id
            ))),
        }
    }

    /// All node ids reachable from `start` (inclusive), following every edge
    /// kind. Cycles are handled by the visited set.
    pub fn reachable_from(&self, start: &str) -> HashSet<String> {
        let mut visited = HashSet::new();
        let mut stack = vec![start.to_string()];
        while let Some(id) = stack.pop() {
            if !visited.insert(id.clone()) {
                continue;
            }
            for edge in self.outgoing(&id) {
                if !visited.contains(&edge.to) {
                    stack.push(edge.to.clone());
                }
            }
        }
        visited
    }

    /// Check that the graph is acyclic along all non-loop edges.
    ///
    /// Loop-tagged edges (`loop_continue`, `loop_exit`) are the only
    /// permitted way to revisit a node; a cycle through any other edge kind
    /// is a defect in the synthesized graph.
    pub fn validate(&self) -> Result<()> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            InProgress,
            Done,
        }

        let mut marks: BTreeMap<&str, Mark> = BTreeMap::new();

        fn visit<'a>(
            graph: &'a FlowGraph,
            id: &'a str,
            marks: &mut BTreeMap<&'a str, Mark>,
        ) -> Result<()> {
            match marks.get(id) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::InProgress) => {
                    return Err(AgentFlowError::GraphIntegrity(format!(
                        "cycle through non-loop edge at node '{}'",
                        id
                    )));
                }
                None => {}
            }
            marks.insert(id, Mark::InProgress);
            for edge in graph.outgoing(id) {
                if edge.kind.is_loop() {
                    continue;
                }
                visit(graph, &edge.to, marks)?;
            }
            marks.insert(id, Mark::Done);
            Ok(())
        }

        for node in &self.nodes {
            visit(self, &node.id, &mut marks)?;
        }
        Ok(())
    }

    fn node_mut(&mut self, id: &str) -> Result<&mut FlowNode> {
        self.nodes
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or_else(|| AgentFlowError::GraphIntegrity(format!("unknown node '{}'", id)))
    }
}
