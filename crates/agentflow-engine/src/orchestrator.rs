//! Orchestrator for a single planning/execution pass.
//!
//! Invokes the adapter, feeds the response through the parser and
//! synthesizer, walks the resulting graph through the lifecycle tracker,
//! and commits the plan document to the store after every node transition
//! so a crash mid-run leaves a partially but validly updated document.
//! Adapter failures are caught here, recorded as a failed exchange, and
//! never raise past this layer.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use agentflow_core::traits::{Adapter, PlanStore};
use agentflow_core::{
    EdgeKind, Exchange, FlowGraph, NodeKind, NodeState, ParseError, PlanDocument, PlanId,
    PlanStatus, Result, Verdict,
};

use crate::lifecycle::LifecycleTracker;
use crate::parser;
use crate::synthesizer;

pub struct Orchestrator {
    adapter: Arc<dyn Adapter>,
    store: Arc<dyn PlanStore>,
    timeout: Duration,
    working_dir: PathBuf,
}

impl Orchestrator {
    pub fn new(adapter: Arc<dyn Adapter>, store: Arc<dyn PlanStore>) -> Self {
        Self {
            adapter,
            store,
            timeout: Duration::from_secs(300),
            working_dir: PathBuf::from("."),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    /// Run one pass to completion.
    pub async fn run(&self, prompt: &str) -> Result<PlanDocument> {
        self.run_with_cancel(prompt, CancellationToken::new()).await
    }

    /// Run one pass, observing `cancel` between node transitions.
    /// Cancellation leaves the store at the last committed state.
    pub async fn run_with_cancel(
        &self,
        prompt: &str,
        cancel: CancellationToken,
    ) -> Result<PlanDocument> {
        let mut plan = PlanDocument::new(PlanId::new());
        info!(plan_id = %plan.id, adapter = %self.adapter.name(), "Starting plan pass");
        self.store.append(&plan).await?;

        let response = self
            .adapter
            .invoke(prompt, self.timeout, &self.working_dir)
            .await;

        let exchange = match response {
            Ok(response) => Exchange::new(prompt, &response.text, response.usage, self.adapter.name()),
            Err(cause) => {
                warn!(plan_id = %plan.id, error = %cause, "Adapter invocation failed");
                plan.exchanges
                    .push(Exchange::failed(prompt, self.adapter.name(), cause.to_string()));
                plan.status = PlanStatus::Failed;
                self.store.append(&plan).await?;
                return Ok(plan);
            }
        };

        let spec = match parser::parse(&exchange.response) {
            Ok(spec) => Some(spec),
            Err(ParseError::NoStructuredFlow) => {
                debug!(plan_id = %plan.id, "No structured flow in response; using linear fallback");
                None
            }
            Err(ParseError::MalformedFlow { detail }) => {
                warn!(
                    plan_id = %plan.id,
                    detail = %detail,
                    "Malformed flow specification; using linear fallback"
                );
                None
            }
        };

        let graph = synthesizer::synthesize(&exchange, spec.as_ref())?;
        plan.exchanges.push(exchange);

        let mut tracker = LifecycleTracker::new();
        for id in graph.node_ids() {
            tracker.register(id);
        }
        plan.graph = graph;
        plan.status = PlanStatus::Running;
        self.commit(&mut plan, &tracker).await?;

        let order: Vec<String> = plan.graph.node_ids().map(str::to_string).collect();
        for node_id in order {
            if cancel.is_cancelled() {
                info!(plan_id = %plan.id, "Plan cancelled; leaving last committed state");
                return Ok(plan);
            }
            if tracker.state(&node_id) != Some(NodeState::Pending) {
                continue;
            }

            tracker.transition(&node_id, NodeState::Running)?;
            self.commit(&mut plan, &tracker).await?;

            if let Err(cause) = advance_node(&mut plan, &mut tracker, &node_id) {
                error!(plan_id = %plan.id, node_id = %node_id, error = %cause, "Node failed");
                if tracker.state(&node_id) == Some(NodeState::Running) {
                    tracker.transition(&node_id, NodeState::Failed)?;
                }
                let orphaned = downstream_unreachable(&plan.graph, &tracker, &node_id);
                tracker.skip_all(&orphaned);

                if !has_alternate_branch_path(&plan.graph, &tracker, &node_id) {
                    plan.status = PlanStatus::Failed;
                    self.commit(&mut plan, &tracker).await?;
                    return Ok(plan);
                }
            }
            self.commit(&mut plan, &tracker).await?;
        }

        plan.status = PlanStatus::Completed;
        self.commit(&mut plan, &tracker).await?;
        info!(plan_id = %plan.id, "Plan pass completed");
        Ok(plan)
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    async fn commit(&self, plan: &mut PlanDocument, tracker: &LifecycleTracker) -> Result<()> {
        plan.node_states = tracker.states().clone();
        self.store.append(plan).await
    }
}

/// Resolve a single node: record evaluation verdicts, resolve branches via
/// their checkpoint, exhaust loop counters, and mark the node succeeded.
fn advance_node(
    plan: &mut PlanDocument,
    tracker: &mut LifecycleTracker,
    node_id: &str,
) -> Result<()> {
    let kind = plan
        .graph
        .node(node_id)
        .map(|n| n.kind.clone())
        .ok_or_else(|| {
            agentflow_core::AgentFlowError::GraphIntegrity(format!("unknown node '{}'", node_id))
        })?;

    match kind {
        NodeKind::Evaluation { verdict, .. } => {
            // A verdict must be recorded before an evaluation node can
            // succeed; unscored checkpoints resolve to pass.
            if verdict.is_none() {
                plan.graph.record_verdict(node_id, Verdict::Pass, None)?;
            }
            tracker.transition(node_id, NodeState::Succeeded)?;
        }
        NodeKind::Branch { on_true, on_false } => {
            let verdict = decision_verdict(&plan.graph, node_id);
            let (taken, untaken) = match verdict {
                Verdict::Pass => (on_true, on_false),
                Verdict::Fail => (on_false, on_true),
            };
            debug!(node_id = %node_id, taken = %taken, "Branch resolved");

            let skip = untaken_arm_nodes(&plan.graph, &taken, &untaken);
            tracker.skip_all(&skip);
            tracker.transition(node_id, NodeState::Succeeded)?;
        }
        NodeKind::Loop { .. } => {
            let bound = plan.graph.exhaust_loop(node_id)?;
            debug!(node_id = %node_id, iterations = bound, "Loop exhausted");
            tracker.transition(node_id, NodeState::Succeeded)?;
        }
        _ => tracker.transition(node_id, NodeState::Succeeded)?,
    }
    Ok(())
}

/// Verdict governing a decision node, read from its recorded evaluation
/// predecessors (the injected checkpoint and any declared evaluation).
/// A single recorded failure resolves the decision to `fail`.
fn decision_verdict(graph: &FlowGraph, node_id: &str) -> Verdict {
    let mut verdict = Verdict::Pass;
    for edge in graph.incoming(node_id) {
        if let Some(NodeKind::Evaluation {
            verdict: Some(recorded),
            ..
        }) = graph.node(&edge.from).map(|n| &n.kind)
        {
            if *recorded == Verdict::Fail {
                return Verdict::Fail;
            }
            verdict = *recorded;
        }
    }
    verdict
}

/// Nodes reachable only through the untaken arm of a resolved branch.
fn untaken_arm_nodes(graph: &FlowGraph, taken: &str, untaken: &str) -> Vec<String> {
    let taken_reach = graph.reachable_from(taken);
    graph
        .reachable_from(untaken)
        .into_iter()
        .filter(|id| !taken_reach.contains(id))
        .collect()
}

/// Pending nodes that can no longer be reached once `failed_id` failed:
/// everything downstream of the failure that no surviving pending node can
/// still reach.
fn downstream_unreachable(
    graph: &FlowGraph,
    tracker: &LifecycleTracker,
    failed_id: &str,
) -> Vec<String> {
    let failed_reach = graph.reachable_from(failed_id);
    let mut alive: HashSet<String> = HashSet::new();
    for (id, state) in tracker.states() {
        if *state == NodeState::Pending && !failed_reach.contains(id) {
            alive.extend(graph.reachable_from(id));
        }
    }
    failed_reach
        .into_iter()
        .filter(|id| id != failed_id && !alive.contains(id))
        .collect()
}

/// Whether a failed node sits on a branch arm whose sibling arm is still
/// viable; if so the plan can continue down the alternate path.
fn has_alternate_branch_path(
    graph: &FlowGraph,
    tracker: &LifecycleTracker,
    failed_id: &str,
) -> bool {
    for edge in graph.incoming(failed_id) {
        let sibling = match edge.kind {
            EdgeKind::TrueBranch | EdgeKind::FalseBranch => {
                match graph.node(&edge.from).map(|n| &n.kind) {
                    Some(NodeKind::Branch { on_true, on_false }) => {
                        if edge.kind == EdgeKind::TrueBranch {
                            on_false.clone()
                        } else {
                            on_true.clone()
                        }
                    }
                    _ => continue,
                }
            }
            _ => continue,
        };
        if sibling != failed_id {
            match tracker.state(&sibling) {
                Some(NodeState::Failed) | Some(NodeState::Skipped) | None => {}
                Some(_) => return true,
            }
        }
    }
    false
}
