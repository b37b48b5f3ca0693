use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use agentflow_adapters::create_adapter;
use agentflow_core::config::AppConfig;
use agentflow_core::traits::PlanStore;
use agentflow_core::{PlanId, PlanStatus};
use agentflow_engine::{GraphView, Orchestrator, WorkflowRunner};
use agentflow_store::YamlPlanStore;

#[derive(Parser)]
#[command(
    name = "agentflow",
    version,
    about = "Capture agent runs as durable, inspectable flow-graph plans"
)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "agentflow.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a prompt and persist the resulting plan artifact
    Run {
        /// The prompt to send through the configured adapter
        #[arg(trailing_var_arg = true)]
        prompt: Vec<String>,
    },
    /// Run multiple prompt cycles that adapt using self-evaluation feedback
    Workflow {
        /// Number of adaptive cycles (default from config)
        #[arg(long)]
        cycles: Option<usize>,
        /// Identifier for the workflow archive (generated when omitted)
        #[arg(long)]
        workflow_id: Option<String>,
        /// Directory used to persist cross-cycle history
        #[arg(long)]
        history_root: Option<PathBuf>,
        /// Base prompt text supplied to the first cycle
        #[arg(trailing_var_arg = true)]
        prompt: Vec<String>,
    },
    /// Inspect persisted plan artifacts
    View {
        /// Directory containing plan artifacts
        #[arg(long)]
        directory: Option<PathBuf>,
        /// Show the full graph of one plan instead of the listing
        #[arg(long)]
        plan: Option<String>,
    },
    /// Show effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("agentflow=info,warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load_or_default(&cli.config)?;

    match cli.command {
        Commands::Run { prompt } => {
            let prompt = join_prompt(prompt)?;
            run_once(&config, &prompt).await
        }
        Commands::Workflow {
            cycles,
            workflow_id,
            history_root,
            prompt,
        } => {
            let prompt = join_prompt(prompt)?;
            let cycles = cycles.unwrap_or(config.workflow.cycles);
            let history_root = history_root.unwrap_or_else(|| config.workflow.history_root.clone());
            run_workflow(&config, &prompt, cycles, workflow_id, history_root).await
        }
        Commands::View { directory, plan } => {
            let directory = directory.unwrap_or_else(|| config.store.artifact_dir.clone());
            view(directory, plan).await
        }
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn join_prompt(parts: Vec<String>) -> anyhow::Result<String> {
    let prompt = parts.join(" ").trim().to_string();
    if prompt.is_empty() {
        anyhow::bail!("prompt text is required");
    }
    Ok(prompt)
}

fn build_orchestrator(config: &AppConfig) -> anyhow::Result<(Orchestrator, Arc<YamlPlanStore>)> {
    let adapter = create_adapter(&config.adapter)?;
    let store = Arc::new(YamlPlanStore::open(&config.store.artifact_dir)?);
    let mut orchestrator = Orchestrator::new(adapter, store.clone())
        .with_timeout(Duration::from_secs(config.adapter.timeout_secs));
    if let Some(dir) = &config.adapter.working_dir {
        orchestrator = orchestrator.with_working_dir(dir);
    }
    Ok((orchestrator, store))
}

/// Cancel the returned token on ctrl-c, so an interrupted run leaves the
/// store at its last committed state.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });
    cancel
}

async fn run_once(config: &AppConfig, prompt: &str) -> anyhow::Result<()> {
    let (orchestrator, store) = build_orchestrator(config)?;

    let plan = orchestrator
        .run_with_cancel(prompt, cancel_on_ctrl_c())
        .await?;

    println!("Wrote plan artifact: {}", store.plan_path(&plan.id).display());
    if plan.status == PlanStatus::Failed {
        eprintln!("Execution failed; inspect the YAML artifact for details.");
        std::process::exit(1);
    }
    Ok(())
}

async fn run_workflow(
    config: &AppConfig,
    prompt: &str,
    cycles: usize,
    workflow_id: Option<String>,
    history_root: PathBuf,
) -> anyhow::Result<()> {
    if cycles == 0 {
        anyhow::bail!("--cycles must be a positive integer");
    }

    let (orchestrator, _store) = build_orchestrator(config)?;
    let runner = WorkflowRunner::new(orchestrator, history_root, workflow_id);
    let outcome = runner.run(prompt, cycles).await?;

    println!("Workflow history written to: {}", outcome.history_path.display());
    if let Some(cycle) = outcome.failed_cycle {
        println!("Workflow halted after cycle {}; inspect per-cycle artifacts for details.", cycle);
        std::process::exit(1);
    }
    Ok(())
}

async fn view(directory: PathBuf, plan: Option<String>) -> anyhow::Result<()> {
    let store = YamlPlanStore::open(&directory)?;

    if let Some(plan_id) = plan {
        let document = store.load(&PlanId::from_string(plan_id)).await?;
        print!("{}", GraphView::from_plan(&document));
        return Ok(());
    }

    let ids = store.list().await?;
    if ids.is_empty() {
        println!("No plan artifacts in {}", directory.display());
        return Ok(());
    }
    for id in ids {
        let document = store.load(&id).await?;
        let view = GraphView::from_plan(&document);
        println!(
            "{} [{}] {} nodes, {} edges",
            id,
            document.status,
            view.nodes.len(),
            view.edges.len()
        );
    }
    Ok(())
}
