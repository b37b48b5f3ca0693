//! End-to-end orchestrator runs against the YAML plan store.

use std::sync::Arc;

use agentflow_adapters::MockAdapter;
use agentflow_core::traits::PlanStore;
use agentflow_core::{EdgeKind, NodeState, PlanStatus, Usage};
use agentflow_engine::Orchestrator;
use agentflow_store::YamlPlanStore;

fn orchestrator_in(
    dir: &std::path::Path,
    adapter: MockAdapter,
) -> (Orchestrator, Arc<YamlPlanStore>) {
    let store = Arc::new(YamlPlanStore::open(dir).unwrap());
    let orchestrator = Orchestrator::new(Arc::new(adapter), store.clone());
    (orchestrator, store)
}

const SIX_NODE_FLOW: &str = r#"Proposed plan:

```json
{
  "nodes": [
    {"id": "n1", "label": "Collect requirements", "type": "prompt"},
    {"id": "n2", "label": "Draft the change", "type": "response"},
    {"id": "n3", "label": "Tests green?", "type": "branch", "on_true": "n4", "on_false": "n5"},
    {"id": "n4", "label": "Prepare summary", "type": "prompt"},
    {"id": "n5", "label": "Fix regressions", "type": "prompt"},
    {"id": "n6", "label": "Iterate on draft", "type": "loop", "target": "n2", "on_exit": "n5", "max_iterations": 2}
  ],
  "edges": [
    {"from": "n1", "to": "n2"},
    {"from": "n2", "to": "n3"},
    {"from": "n4", "to": "n6"}
  ]
}
```"#;

#[tokio::test]
async fn six_node_scenario_synthesizes_checkpoints_and_loop_edges() {
    let dir = tempfile::tempdir().unwrap();
    let adapter = MockAdapter::new(SIX_NODE_FLOW).with_usage(Usage::new(200, 90));
    let (orchestrator, store) = orchestrator_in(dir.path(), adapter);

    let plan = orchestrator.run("implement the feature").await.unwrap();

    assert_eq!(plan.status, PlanStatus::Completed);
    assert!(plan.graph.nodes().len() >= 8, "checkpoints not injected");

    let count = |kind: EdgeKind| {
        plan.graph
            .edges()
            .iter()
            .filter(|e| e.kind == kind)
            .count()
    };
    assert_eq!(count(EdgeKind::TrueBranch), 1);
    assert_eq!(count(EdgeKind::FalseBranch), 1);
    assert_eq!(count(EdgeKind::LoopContinue), 1);
    assert_eq!(count(EdgeKind::LoopExit), 1);

    // The persisted document reconstructs the same graph and states.
    let stored = store.load(&plan.id).await.unwrap();
    assert_eq!(stored.graph, plan.graph);
    assert_eq!(stored.node_states, plan.node_states);
    assert!(stored
        .node_states
        .values()
        .all(|state| state.is_terminal()));
}

#[tokio::test]
async fn unstructured_response_falls_back_to_linear_chain() {
    let dir = tempfile::tempdir().unwrap();
    let adapter = MockAdapter::new("I just did the task, no plan needed.");
    let (orchestrator, store) = orchestrator_in(dir.path(), adapter);

    let plan = orchestrator.run("quick task").await.unwrap();

    assert_eq!(plan.status, PlanStatus::Completed);
    assert_eq!(plan.graph.nodes().len(), 2);
    assert_eq!(plan.graph.edges().len(), 1);
    assert_eq!(plan.graph.edges()[0].kind, EdgeKind::Sequential);

    let stored = store.load(&plan.id).await.unwrap();
    assert_eq!(stored.state_of("prompt"), Some(NodeState::Succeeded));
    assert_eq!(stored.state_of("response"), Some(NodeState::Succeeded));
}

#[tokio::test]
async fn adapter_failure_leaves_queryable_failed_plan() {
    let dir = tempfile::tempdir().unwrap();
    let adapter = MockAdapter::failing("exit code 127: command not found");
    let (orchestrator, store) = orchestrator_in(dir.path(), adapter);

    let plan = orchestrator.run("doomed").await.unwrap();
    assert_eq!(plan.status, PlanStatus::Failed);

    let stored = store.load(&plan.id).await.unwrap();
    assert_eq!(stored.status, PlanStatus::Failed);
    assert_eq!(stored.exchanges.len(), 1);
    assert!(stored.exchanges[0]
        .error
        .as_deref()
        .unwrap()
        .contains("command not found"));
    assert!(stored.graph.is_empty());
}

#[tokio::test]
async fn malformed_flow_spec_still_completes_via_fallback() {
    let flow = r#"```json
{"nodes": [{"id": "a", "label": "A", "type": "branch", "on_true": "missing", "on_false": "also-missing"}], "edges": []}
```"#;
    let dir = tempfile::tempdir().unwrap();
    let adapter = MockAdapter::new(flow);
    let (orchestrator, _store) = orchestrator_in(dir.path(), adapter);

    let plan = orchestrator.run("broken spec").await.unwrap();
    assert_eq!(plan.status, PlanStatus::Completed);
    assert_eq!(plan.graph.nodes().len(), 2);
}

#[tokio::test]
async fn independent_plans_share_one_store() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(YamlPlanStore::open(dir.path()).unwrap());

    let first = Orchestrator::new(Arc::new(MockAdapter::new("one")), store.clone());
    let second = Orchestrator::new(Arc::new(MockAdapter::new("two")), store.clone());

    let (a, b) = tokio::join!(first.run("first"), second.run("second"));
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_ne!(a.id, b.id);
    let ids = store.list().await.unwrap();
    assert_eq!(ids.len(), 2);
}
