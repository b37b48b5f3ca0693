//! Adaptive workflow cycles.
//!
//! `agentflow workflow` runs several orchestrator passes in sequence. Each
//! cycle's prompt is rebuilt from the previous cycles' evaluation feedback
//! (a reflection log plus targeted improvement directives), and a
//! cross-cycle history document is persisted after every cycle so a halted
//! workflow keeps everything written so far.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use agentflow_core::{
    AgentFlowError, NodeKind, PlanDocument, PlanStatus, Result, Score, Verdict,
};

use crate::orchestrator::Orchestrator;

/// Cross-cycle history document, one per workflow id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowHistory {
    pub workflow_id: String,
    pub base_prompt: String,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub runs: Vec<CycleRecord>,
}

/// One completed cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleRecord {
    pub cycle: usize,
    pub prompt: String,
    pub prompt_adjustment: String,
    pub plan_id: String,
    pub plan_status: PlanStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<EvaluationSummary>,
    pub flow_summary: FlowSummary,
    pub created_at: DateTime<Utc>,
}

/// Outcome extracted from a plan's first declared evaluation node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationSummary {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verdict: Option<Verdict>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<Score>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub justification: Option<String>,
}

/// Shape statistics for one plan's graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowSummary {
    pub node_count: usize,
    pub edge_count: usize,
    pub branch_nodes: usize,
    pub loop_nodes: usize,
    pub evaluation_nodes: usize,
}

#[derive(Debug)]
pub struct WorkflowOutcome {
    pub workflow_id: String,
    pub history_path: PathBuf,
    pub failed_cycle: Option<usize>,
}

pub struct WorkflowRunner {
    orchestrator: Orchestrator,
    history_root: PathBuf,
    workflow_id: String,
}

impl WorkflowRunner {
    pub fn new(
        orchestrator: Orchestrator,
        history_root: impl Into<PathBuf>,
        workflow_id: Option<String>,
    ) -> Self {
        let workflow_id = match workflow_id {
            Some(candidate) => sanitize_identifier(&candidate),
            None => Utc::now().format("workflow-%Y%m%d%H%M%S").to_string(),
        };
        Self {
            orchestrator,
            history_root: history_root.into(),
            workflow_id,
        }
    }

    /// Run `cycles` adaptive passes, halting on the first failed plan.
    pub async fn run(&self, base_prompt: &str, cycles: usize) -> Result<WorkflowOutcome> {
        let history_dir = self.history_root.join(&self.workflow_id);
        tokio::fs::create_dir_all(&history_dir).await?;

        let mut history = load_history(&history_dir)
            .await
            .unwrap_or_else(|| WorkflowHistory {
                workflow_id: self.workflow_id.clone(),
                base_prompt: base_prompt.to_string(),
                created_at: Utc::now(),
                last_updated: Utc::now(),
                runs: Vec::new(),
            });

        let starting_cycle = history.runs.len() + 1;
        let mut failed_cycle = None;
        let history_path = history_dir.join("history.yaml");

        for offset in 0..cycles {
            let cycle = starting_cycle + offset;
            let (prompt, adjustment) = build_cycle_prompt(base_prompt, &history.runs);

            info!(workflow_id = %self.workflow_id, cycle, "Starting workflow cycle");
            let plan = self.orchestrator.run(&prompt).await?;

            let record = CycleRecord {
                cycle,
                prompt,
                prompt_adjustment: adjustment,
                plan_id: plan.id.to_string(),
                plan_status: plan.status,
                evaluation: extract_evaluation(&plan),
                flow_summary: summarize_flow(&plan),
                created_at: Utc::now(),
            };
            let failed = record.plan_status == PlanStatus::Failed;
            history.runs.push(record);
            history.last_updated = Utc::now();
            save_history(&history_dir, &history).await?;

            if failed {
                warn!(workflow_id = %self.workflow_id, cycle, "Cycle failed; halting workflow");
                failed_cycle = Some(cycle);
                break;
            }
        }

        Ok(WorkflowOutcome {
            workflow_id: self.workflow_id.clone(),
            history_path,
            failed_cycle,
        })
    }
}

/// Build the prompt for the next cycle from prior runs: a reflection log of
/// the last three cycles plus improvement directives keyed off the latest
/// feedback.
pub fn build_cycle_prompt(base_prompt: &str, runs: &[CycleRecord]) -> (String, String) {
    if runs.is_empty() {
        return (
            base_prompt.to_string(),
            "Initial cycle prompt with no adjustments.".to_string(),
        );
    }

    let mut reflection_lines = Vec::new();
    for record in runs.iter().rev().take(3).rev() {
        let score = record
            .evaluation
            .as_ref()
            .and_then(|e| e.score.as_ref())
            .map(format_score)
            .unwrap_or_else(|| "n/a".to_string());
        let mut line = format!("Cycle {} | score={}", record.cycle, score);
        if let Some(feedback) = record
            .evaluation
            .as_ref()
            .and_then(|e| e.justification.as_deref())
        {
            line.push_str(&format!(" | feedback={}", feedback));
        }
        line.push_str(&format!(" | nodes={}", record.flow_summary.node_count));
        reflection_lines.push(line);
    }

    let last_feedback = runs
        .last()
        .and_then(|r| r.evaluation.as_ref())
        .and_then(|e| e.justification.as_deref())
        .unwrap_or("");
    let directives = derive_adjustment_directives(last_feedback);

    let reflection_block: String = reflection_lines
        .iter()
        .map(|line| format!("- {}\n", line))
        .collect();
    let directive_block: String = directives
        .iter()
        .map(|line| format!("- {}\n", line))
        .collect();

    let prompt = format!(
        "{}\n\n### Reflection Log\n{}\n### Improvement Directives\n{}\n\
         Using the reflections above, regenerate or refine the flow plan. \
         Be explicit about how this cycle differs from earlier attempts and \
         explain the adjustments inside the self-evaluation justification.",
        base_prompt, reflection_block, directive_block
    );

    (
        prompt,
        "Injected reflective context from previous cycles and targeted improvements.".to_string(),
    )
}

/// Map feedback keywords to targeted directives for the next cycle.
pub fn derive_adjustment_directives(feedback: &str) -> Vec<String> {
    let normalized = feedback.to_lowercase();
    let mut directives = Vec::new();

    if normalized.contains("branch") || normalized.contains("condition") {
        directives.push(
            "Strengthen branching coverage to handle the missing conditions noted above."
                .to_string(),
        );
    }
    if normalized.contains("loop") || normalized.contains("iteration") {
        directives.push(
            "Refine loop nodes with clearer exit criteria and tracking of iterations.".to_string(),
        );
    }
    if normalized.contains("evaluation") || normalized.contains("self") {
        directives
            .push("Improve the evaluation node to report precise pass/fail signals.".to_string());
    }
    if normalized.contains("prompt") || normalized.contains("clarity") {
        directives.push(
            "Clarify each node's prompt so tool calls and outputs are unambiguous.".to_string(),
        );
    }

    if directives.is_empty() {
        directives.push(
            "Address the critique directly and document how the flow changes resolve it."
                .to_string(),
        );
    }
    directives.push("Track concrete changes in the evaluation justification for this cycle.".to_string());
    directives
}

/// First declared (non-synthetic) evaluation node's outcome, if any.
pub fn extract_evaluation(plan: &PlanDocument) -> Option<EvaluationSummary> {
    plan.graph
        .nodes()
        .iter()
        .filter(|node| !node.synthetic)
        .find_map(|node| match &node.kind {
            NodeKind::Evaluation { verdict, score } => Some(EvaluationSummary {
                verdict: *verdict,
                score: score.clone(),
                justification: node
                    .metadata
                    .get("justification")
                    .and_then(|v| v.as_str())
                    .map(str::to_string),
            }),
            _ => None,
        })
}

pub fn summarize_flow(plan: &PlanDocument) -> FlowSummary {
    let mut summary = FlowSummary {
        node_count: plan.graph.nodes().len(),
        edge_count: plan.graph.edges().len(),
        ..FlowSummary::default()
    };
    for node in plan.graph.nodes() {
        match node.kind {
            NodeKind::Branch { .. } => summary.branch_nodes += 1,
            NodeKind::Loop { .. } => summary.loop_nodes += 1,
            NodeKind::Evaluation { .. } => summary.evaluation_nodes += 1,
            _ => {}
        }
    }
    summary
}

fn format_score(score: &Score) -> String {
    match score {
        Score::Number(n) => format!("{:.3}", n),
        Score::Text(t) => t.clone(),
    }
}

fn sanitize_identifier(value: &str) -> String {
    let mut sanitized = String::with_capacity(value.len());
    let mut last_dash = false;
    for c in value.chars() {
        if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
            sanitized.push(c);
            last_dash = false;
        } else if !last_dash {
            sanitized.push('-');
            last_dash = true;
        }
    }
    let sanitized = sanitized.trim_matches('-').to_string();
    if sanitized.is_empty() {
        Utc::now().format("workflow-%Y%m%d%H%M%S").to_string()
    } else {
        sanitized
    }
}

async fn load_history(history_dir: &Path) -> Option<WorkflowHistory> {
    let path = history_dir.join("history.yaml");
    let raw = tokio::fs::read_to_string(&path).await.ok()?;
    match serde_yaml::from_str(&raw) {
        Ok(history) => Some(history),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Ignoring unreadable workflow history");
            None
        }
    }
}

async fn save_history(history_dir: &Path, history: &WorkflowHistory) -> Result<PathBuf> {
    let path = history_dir.join("history.yaml");
    let tmp = history_dir.join("history.yaml.tmp");
    let yaml = serde_yaml::to_string(history)?;
    tokio::fs::write(&tmp, yaml).await?;
    tokio::fs::rename(&tmp, &path)
        .await
        .map_err(|e| AgentFlowError::Store(format!("failed to commit history: {}", e)))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(cycle: usize, score: Option<f64>, justification: Option<&str>) -> CycleRecord {
        CycleRecord {
            cycle,
            prompt: "p".to_string(),
            prompt_adjustment: "a".to_string(),
            plan_id: format!("plan-{}", cycle),
            plan_status: PlanStatus::Completed,
            evaluation: Some(EvaluationSummary {
                verdict: Some(Verdict::Pass),
                score: score.map(Score::Number),
                justification: justification.map(str::to_string),
            }),
            flow_summary: FlowSummary {
                node_count: 4,
                ..FlowSummary::default()
            },
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_first_cycle_uses_base_prompt() {
        let (prompt, adjustment) = build_cycle_prompt("build a parser", &[]);
        assert_eq!(prompt, "build a parser");
        assert!(adjustment.contains("no adjustments"));
    }

    #[test]
    fn test_later_cycles_inject_reflection() {
        let runs = vec![record(1, Some(0.5), Some("loop exit unclear"))];
        let (prompt, _) = build_cycle_prompt("build a parser", &runs);

        assert!(prompt.starts_with("build a parser"));
        assert!(prompt.contains("### Reflection Log"));
        assert!(prompt.contains("Cycle 1 | score=0.500"));
        assert!(prompt.contains("exit criteria"));
    }

    #[test]
    fn test_reflection_limited_to_last_three() {
        let runs: Vec<CycleRecord> = (1..=5).map(|c| record(c, Some(0.1), None)).collect();
        let (prompt, _) = build_cycle_prompt("base", &runs);
        assert!(!prompt.contains("Cycle 1 |"));
        assert!(!prompt.contains("Cycle 2 |"));
        assert!(prompt.contains("Cycle 3 |"));
        assert!(prompt.contains("Cycle 5 |"));
    }

    #[test]
    fn test_directives_fall_back_to_generic() {
        let directives = derive_adjustment_directives("nothing matched here");
        assert_eq!(directives.len(), 2);
        assert!(directives[0].contains("Address the critique"));
    }

    #[test]
    fn test_directives_keyed_on_feedback() {
        let directives = derive_adjustment_directives("branch conditions missing; loop too deep");
        assert!(directives.iter().any(|d| d.contains("branching coverage")));
        assert!(directives.iter().any(|d| d.contains("exit criteria")));
    }

    #[test]
    fn test_sanitize_identifier() {
        assert_eq!(sanitize_identifier("My Workflow #3"), "My-Workflow-3");
        assert_eq!(sanitize_identifier("already-clean_id"), "already-clean_id");
    }

    #[tokio::test]
    async fn test_history_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let history = WorkflowHistory {
            workflow_id: "wf-persist".to_string(),
            base_prompt: "base".to_string(),
            created_at: Utc::now(),
            last_updated: Utc::now(),
            runs: vec![record(1, Some(0.7), None)],
        };

        let path = save_history(dir.path(), &history).await.unwrap();
        assert!(path.exists());
        assert!(!dir.path().join("history.yaml.tmp").exists());

        let loaded = load_history(dir.path()).await.unwrap();
        assert_eq!(loaded.workflow_id, "wf-persist");
        assert_eq!(loaded.runs.len(), 1);
    }

    #[test]
    fn test_history_round_trip() {
        let history = WorkflowHistory {
            workflow_id: "wf-test".to_string(),
            base_prompt: "base".to_string(),
            created_at: Utc::now(),
            last_updated: Utc::now(),
            runs: vec![record(1, Some(0.9), Some("fine"))],
        };
        let yaml = serde_yaml::to_string(&history).unwrap();
        let back: WorkflowHistory = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back.workflow_id, "wf-test");
        assert_eq!(back.runs.len(), 1);
        assert_eq!(back.runs[0].cycle, 1);
    }
}
