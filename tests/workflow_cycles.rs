//! Adaptive workflow runs: history accumulation and halt-on-failure.

use std::sync::Arc;

use agentflow_adapters::MockAdapter;
use agentflow_core::PlanStatus;
use agentflow_engine::{Orchestrator, WorkflowHistory, WorkflowRunner};
use agentflow_store::YamlPlanStore;

const EVALUATED_FLOW: &str = r#"```json
{
  "nodes": [
    {"id": "work", "label": "Do the work", "type": "prompt"},
    {"id": "check", "label": "Self-check", "type": "evaluation",
     "verdict": "pass", "score": 0.8, "justification": "loop coverage is thin"}
  ],
  "edges": [
    {"from": "work", "to": "check"}
  ]
}
```"#;

fn runner_in(
    dir: &std::path::Path,
    adapter: MockAdapter,
    workflow_id: &str,
) -> WorkflowRunner {
    let store = Arc::new(YamlPlanStore::open(dir.join("plans")).unwrap());
    let orchestrator = Orchestrator::new(Arc::new(adapter), store);
    WorkflowRunner::new(
        orchestrator,
        dir.join("workflows"),
        Some(workflow_id.to_string()),
    )
}

async fn read_history(path: &std::path::Path) -> WorkflowHistory {
    let raw = tokio::fs::read_to_string(path).await.unwrap();
    serde_yaml::from_str(&raw).unwrap()
}

#[tokio::test]
async fn history_accumulates_one_record_per_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let runner = runner_in(dir.path(), MockAdapter::new(EVALUATED_FLOW), "wf-accumulate");

    let outcome = runner.run("improve the tool", 3).await.unwrap();
    assert!(outcome.failed_cycle.is_none());

    let history = read_history(&outcome.history_path).await;
    assert_eq!(history.workflow_id, "wf-accumulate");
    assert_eq!(history.runs.len(), 3);
    assert_eq!(history.runs[0].cycle, 1);
    assert_eq!(history.runs[2].cycle, 3);
    assert!(history
        .runs
        .iter()
        .all(|r| r.plan_status == PlanStatus::Completed));

    // Evaluation feedback flowed into the second cycle's prompt.
    assert!(history.runs[1].prompt.contains("### Reflection Log"));
    assert!(history.runs[1].prompt.contains("loop coverage is thin"));
    assert_eq!(history.runs[1].flow_summary.evaluation_nodes, 1);
}

#[tokio::test]
async fn failed_cycle_halts_and_preserves_history() {
    let dir = tempfile::tempdir().unwrap();
    let runner = runner_in(
        dir.path(),
        MockAdapter::failing("adapter exploded"),
        "wf-halt",
    );

    let outcome = runner.run("doomed workflow", 3).await.unwrap();
    assert_eq!(outcome.failed_cycle, Some(1));

    let history = read_history(&outcome.history_path).await;
    assert_eq!(history.runs.len(), 1);
    assert_eq!(history.runs[0].plan_status, PlanStatus::Failed);
}

#[tokio::test]
async fn rerun_continues_cycle_numbering() {
    let dir = tempfile::tempdir().unwrap();

    let first = runner_in(dir.path(), MockAdapter::new(EVALUATED_FLOW), "wf-resume");
    first.run("base", 2).await.unwrap();

    let second = runner_in(dir.path(), MockAdapter::new(EVALUATED_FLOW), "wf-resume");
    let outcome = second.run("base", 1).await.unwrap();

    let history = read_history(&outcome.history_path).await;
    assert_eq!(history.runs.len(), 3);
    assert_eq!(history.runs[2].cycle, 3);
}
