use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use dagrun_core::events::EventLog;
use dagrun_core::storage::{DefinitionStore, JsonlEventLog, RedbStore, RunStore};
use dagrun_core::{
    ExecuteRequest, ExecutionGraph, RagPipelineBuilder, RunId, RunOutcome, RunStatus,
    WorkflowDefinition, WorkflowExecutor, WorkflowId,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

mod config;

use config::CliConfig;

#[derive(Parser, Debug)]
#[command(name = "dagrun", version)]
#[command(about = "DAG workflow execution engine", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "DAGRUN_CONFIG", default_value = "dagrun.toml")]
    config: PathBuf,

    /// Data directory for storage
    #[arg(short, long, default_value = "./data")]
    data_dir: PathBuf,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store a workflow definition (JSON or TOML)
    Import { file: PathBuf },
    /// Check a definition file without storing it
    Validate { file: PathBuf },
    /// List stored workflows
    Workflows,
    /// Execute a stored workflow
    Run {
        workflow_id: String,
        /// Delivery channel for progress notifications
        #[arg(long, default_value = "cli")]
        channel: String,
        /// JSON payload available to templates as {{input...}}
        #[arg(long)]
        input: Option<String>,
        #[arg(long)]
        max_concurrency: Option<usize>,
    },
    /// List runs, most recent first
    Runs {
        #[arg(long)]
        workflow: Option<String>,
    },
    /// Show a run and its node runs
    Show { run_id: String },
    /// Print the event log of a run
    Events { run_id: String },
    /// Answer a question with the RAG pipeline
    Rag {
        #[arg(trailing_var_arg = true, required = true)]
        query: Vec<String>,
        #[arg(long, default_value = "5")]
        top_n: usize,
        /// Search with the question as asked
        #[arg(long)]
        skip_rewrite: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose {
        "dagrun=debug,dagrun_core=debug"
    } else {
        "dagrun=info,dagrun_core=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with_target(false)
        .init();

    let mut config = CliConfig::load(&args.config, args.data_dir)?;
    tracing::debug!("Data directory: {}", config.data_dir.display());

    let store = Arc::new(RedbStore::new(config.index_path()).context("Failed to open store")?);

    match args.command {
        Command::Import { file } => {
            let definition = read_definition(&file)?;
            ExecutionGraph::build(&definition.nodes, &definition.edges)?;
            store.save_workflow(&definition).await?;
            println!("Imported workflow {} ({} nodes)", definition.id, definition.nodes.len());
        }
        Command::Validate { file } => {
            let definition = read_definition(&file)?;
            let graph = ExecutionGraph::build(&definition.nodes, &definition.edges)?;
            let order: Vec<String> = graph
                .topological_order()
                .into_iter()
                .map(|id| id.0)
                .collect();
            println!("Workflow {} is valid", definition.id);
            println!("Execution order: {}", order.join(" -> "));
        }
        Command::Workflows => {
            for workflow in store.list_workflows().await? {
                println!(
                    "{}\t{}\t{} nodes",
                    workflow.id,
                    workflow.name,
                    workflow.nodes.len()
                );
            }
        }
        Command::Run {
            workflow_id,
            channel,
            input,
            max_concurrency,
        } => {
            if let Some(max) = max_concurrency {
                config.engine.max_concurrency = max;
            }
            let input = match input {
                Some(raw) => serde_json::from_str(&raw).context("--input must be JSON")?,
                None => serde_json::Value::Null,
            };

            let executor = executor(&config, store.clone())?;
            let request = ExecuteRequest::new(WorkflowId::new(workflow_id), channel)
                .with_input(input);
            let outcome = executor.execute(request).await?;
            report(&outcome)?;
        }
        Command::Runs { workflow } => {
            let workflow = workflow.map(WorkflowId::new);
            for run in store.list_runs(workflow.as_ref()).await? {
                println!(
                    "{}\t{}\t{}\t{}",
                    run.id,
                    run.workflow_id,
                    run.status.as_str(),
                    run.started_at.to_rfc3339()
                );
            }
        }
        Command::Show { run_id } => {
            let run_id = parse_run_id(&run_id)?;
            let Some(run) = store.get_run(run_id).await? else {
                bail!("run {} not found", run_id);
            };
            let node_runs = store.list_node_runs(run_id).await?;
            let view = serde_json::json!({ "run": run, "nodes": node_runs });
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
        Command::Events { run_id } => {
            let run_id = parse_run_id(&run_id)?;
            let event_log = JsonlEventLog::new(config.event_log_path())?;
            for event in event_log.get_run_events(run_id).await? {
                println!(
                    "{}  {}",
                    event.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
                    event.event_type.describe()
                );
            }
        }
        Command::Rag {
            query,
            top_n,
            skip_rewrite,
        } => {
            let question = query.join(" ");
            let mut builder = RagPipelineBuilder::new("rag")
                .top_n(top_n)
                .retrieve_k(top_n.max(20));
            if skip_rewrite {
                builder = builder.skip_rewrite();
            }
            let definition = builder.build()?;

            let executor = executor(&config, store.clone())?;
            let outcome = executor
                .execute_definition(&definition, "cli", RagPipelineBuilder::input(&question))
                .await?;

            let run = store.get_run(outcome.run_id).await?;
            let answer = run.and_then(|run| run.result).and_then(|result| {
                result["outputs"]["generate"]["response"]
                    .as_str()
                    .map(String::from)
            });
            match answer {
                Some(answer) => println!("{}", answer),
                None => report(&outcome)?,
            }
        }
    }

    Ok(())
}

fn executor(config: &CliConfig, store: Arc<RedbStore>) -> Result<WorkflowExecutor> {
    let event_log = Arc::new(
        JsonlEventLog::new(config.event_log_path()).context("Failed to create event log")?,
    );
    let services = config.services()?;

    let executor =
        WorkflowExecutor::with_services(store.clone(), store, &services, config.engine.clone())?
            .with_event_log(event_log);
    Ok(executor)
}

/// Definitions are TOML when the extension says so, JSON otherwise
fn read_definition(path: &Path) -> Result<WorkflowDefinition> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let definition = match path.extension().and_then(|ext| ext.to_str()) {
        Some("toml") => toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?,
        _ => serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?,
    };
    Ok(definition)
}

fn parse_run_id(raw: &str) -> Result<RunId> {
    raw.parse()
        .with_context(|| format!("'{}' is not a run id", raw))
}

fn report(outcome: &RunOutcome) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(outcome)?);
    if outcome.status == RunStatus::Failed {
        bail!(
            "run {} failed: {}",
            outcome.run_id,
            outcome.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}
