//! CLI command definitions for monarch-runner.
//!
//! Each subcommand wires the library components together for one operation:
//! reaping orphaned sandboxes, running a raw command, running a project's
//! gates, parsing tool output, and moving tasks through the attempt breaker.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use tokio::io::AsyncReadExt;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::config::{RunnerConfig, DEFAULT_EVAL_SIZE_LIMIT, DEFAULT_IMAGE, DEFAULT_MAX_ATTEMPTS, DEFAULT_STACK};
use crate::eval::EvaluationEngine;
use crate::gates::{detect_stack, GateConfig, GateKind};
use crate::llm::{ChatCompletionsClient, JudgmentBackend, UnconfiguredBackend, DEFAULT_MODEL};
use crate::metrics;
use crate::parser::{self, ToolFormat};
use crate::runner::{reap_zombies, CommandExecutor, GateOutcome, GateReport, RunnerService, SandboxPool};
use crate::runtime::{ContainerRuntime, DockerRuntime};
use crate::tasks::{AttemptBreaker, SqliteTaskStore, TaskRecord};

/// Default path of the SQLite task database.
const DEFAULT_TASK_DB: &str = "monarch-tasks.db";

/// Sandbox runner and verification gates for agent-driven development.
#[derive(Parser)]
#[command(name = "monarch-runner")]
#[command(about = "Run quality gates in pooled sandboxes and parse tool diagnostics")]
#[command(version)]
#[command(
    long_about = "monarch-runner keeps one warm sandbox per (project, stack), runs quality gates inside it, \
and turns tool output into uniform diagnostics.\n\nExample usage:\n  monarch-runner gate --project proj-1 --root ./proj-1\n  monarch-runner parse --format eslint report.json"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Remove every managed sandbox left behind by a previous run.
    Reap(ReapArgs),

    /// Run a raw command in a project's default sandbox and print its stdout.
    Exec(ExecArgs),

    /// Run a project's quality gates and report each outcome.
    Gate(GateArgs),

    /// Parse ESLint JSON or `go test -json` output into uniform diagnostics.
    Parse(ParseArgs),

    /// Register a new task in the task database and print its id.
    #[command(name = "add-task")]
    AddTask(AddTaskArgs),

    /// Mark a task as IN_PROGRESS.
    Claim(TaskArgs),

    /// Submit a verification attempt for a task through the circuit breaker.
    Submit(SubmitArgs),
}

/// Container runtime connection options.
#[derive(Parser, Debug, Clone)]
pub struct RuntimeArgs {
    /// Seconds Docker waits after SIGTERM before killing a stopped sandbox.
    #[arg(long, env = "MONARCH_STOP_GRACE_SECS", default_value = "10")]
    pub stop_grace_secs: i64,
}

/// Sandbox pool options.
#[derive(Parser, Debug, Clone)]
pub struct PoolArgs {
    #[command(flatten)]
    pub runtime: RuntimeArgs,

    /// Stack used for raw commands and when none is detected.
    #[arg(long, env = "MONARCH_DEFAULT_STACK", default_value = DEFAULT_STACK)]
    pub default_stack: String,

    /// Image for stacks without an explicit mapping.
    #[arg(long, env = "MONARCH_DEFAULT_IMAGE", default_value = DEFAULT_IMAGE)]
    pub default_image: String,

    /// Stack image mapping as STACK=IMAGE (repeatable).
    #[arg(long = "stack-image", value_name = "STACK=IMAGE")]
    pub stack_images: Vec<String>,

    /// Seconds a sandbox may sit idle before it is stopped.
    #[arg(long, env = "MONARCH_IDLE_TIMEOUT_SECS", default_value = "300")]
    pub idle_timeout: u64,

    /// Seconds between idle sweeps.
    #[arg(long, env = "MONARCH_MONITOR_INTERVAL_SECS", default_value = "60")]
    pub monitor_interval: u64,

    /// Largest file, in bytes, submitted for judgment.
    #[arg(long, env = "MONARCH_EVAL_SIZE_LIMIT", default_value_t = DEFAULT_EVAL_SIZE_LIMIT)]
    pub size_limit: u64,

    /// Skip the startup reap of orphaned sandboxes.
    #[arg(long)]
    pub no_reap: bool,
}

impl PoolArgs {
    fn runner_config(&self) -> anyhow::Result<RunnerConfig> {
        let stack_images = RunnerConfig::parse_stack_images(self.stack_images.iter().map(String::as_str))
            .map_err(|e| anyhow::anyhow!(e))?;

        let mut config = RunnerConfig::default()
            .with_default_stack(&self.default_stack)
            .with_default_image(&self.default_image)
            .with_idle_timeout(Duration::from_secs(self.idle_timeout))
            .with_monitor_interval(Duration::from_secs(self.monitor_interval))
            .with_eval_size_limit(self.size_limit);
        for (stack, image) in stack_images {
            config = config.with_stack_image(stack, image);
        }
        Ok(config)
    }
}

/// Judgment backend options.
#[derive(Parser, Debug, Clone)]
pub struct LlmArgs {
    /// Base URL of an OpenAI-compatible API. `llm_eval` gates fail without it.
    #[arg(long, env = "MONARCH_LLM_API_BASE")]
    pub llm_api_base: Option<String>,

    /// Bearer token for the judgment API.
    #[arg(long, env = "MONARCH_LLM_API_KEY", hide_env_values = true)]
    pub llm_api_key: Option<String>,

    /// Model used for judgments.
    #[arg(long, env = "MONARCH_LLM_MODEL", default_value = DEFAULT_MODEL)]
    pub llm_model: String,
}

impl LlmArgs {
    fn backend(&self) -> anyhow::Result<Arc<dyn JudgmentBackend>> {
        match &self.llm_api_base {
            Some(api_base) => Ok(Arc::new(ChatCompletionsClient::new(
                api_base.clone(),
                self.llm_api_key.clone(),
                self.llm_model.clone(),
            )?)),
            None => Ok(Arc::new(UnconfiguredBackend)),
        }
    }
}

/// Arguments for `monarch-runner reap`.
#[derive(Parser, Debug)]
pub struct ReapArgs {
    #[command(flatten)]
    pub runtime: RuntimeArgs,
}

/// Arguments for `monarch-runner exec`.
#[derive(Parser, Debug)]
pub struct ExecArgs {
    /// Project whose sandbox runs the command.
    #[arg(short, long)]
    pub project: String,

    #[command(flatten)]
    pub pool: PoolArgs,

    /// Command and arguments, after `--`.
    #[arg(last = true, required = true)]
    pub argv: Vec<String>,
}

/// Arguments for `monarch-runner gate`.
#[derive(Parser, Debug)]
pub struct GateArgs {
    /// Project the gates run for.
    #[arg(short, long)]
    pub project: String,

    /// Project root used for stack detection and `.monarch/gates.yaml`.
    #[arg(short, long, default_value = ".")]
    pub root: PathBuf,

    /// Explicit gate configuration file; overrides detection.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Stack override for standard gates.
    #[arg(long)]
    pub stack: Option<String>,

    #[command(flatten)]
    pub pool: PoolArgs,

    #[command(flatten)]
    pub llm: LlmArgs,

    /// Print the report as JSON.
    #[arg(long)]
    pub json: bool,

    /// Print Prometheus metrics after the run.
    #[arg(long)]
    pub print_metrics: bool,
}

/// Arguments for `monarch-runner parse`.
#[derive(Parser, Debug)]
pub struct ParseArgs {
    /// Tool output format: eslint or go-test.
    #[arg(short, long)]
    pub format: String,

    /// File with the raw tool output. Reads stdin when omitted.
    pub file: Option<PathBuf>,

    /// Do not attach remediation hints.
    #[arg(long)]
    pub no_hints: bool,
}

/// Task database location.
#[derive(Parser, Debug, Clone)]
pub struct DbArgs {
    /// SQLite task database.
    #[arg(long, env = "MONARCH_TASK_DB", default_value = DEFAULT_TASK_DB)]
    pub db: String,
}

/// Arguments for `monarch-runner add-task`.
#[derive(Parser, Debug)]
pub struct AddTaskArgs {
    /// Project the task belongs to.
    #[arg(short, long)]
    pub project: String,

    #[command(flatten)]
    pub db: DbArgs,
}

/// Arguments for `monarch-runner claim`.
#[derive(Parser, Debug)]
pub struct TaskArgs {
    /// Task id (UUID).
    #[arg(short, long)]
    pub task_id: String,

    #[command(flatten)]
    pub db: DbArgs,
}

/// Arguments for `monarch-runner submit`.
#[derive(Parser, Debug)]
pub struct SubmitArgs {
    #[command(flatten)]
    pub task: TaskArgs,

    /// Attempts allowed before the task is blocked.
    #[arg(long, env = "MONARCH_MAX_ATTEMPTS", default_value_t = DEFAULT_MAX_ATTEMPTS)]
    pub max_attempts: u32,
}

impl SubmitArgs {
    fn runner_config(&self) -> RunnerConfig {
        RunnerConfig::default().with_max_attempts(self.max_attempts)
    }
}

/// Parse CLI arguments and return the Cli struct.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    metrics::init_metrics().context("Failed to initialize metrics")?;

    match cli.command {
        Commands::Reap(args) => run_reap_command(args).await,
        Commands::Exec(args) => run_exec_command(args).await,
        Commands::Gate(args) => run_gate_command(args).await,
        Commands::Parse(args) => run_parse_command(args).await,
        Commands::AddTask(args) => run_add_task_command(args).await,
        Commands::Claim(args) => run_claim_command(args).await,
        Commands::Submit(args) => run_submit_command(args).await,
    }
}

// ============================================================================
// Sandbox commands
// ============================================================================

fn connect_runtime(args: &RuntimeArgs) -> anyhow::Result<Arc<DockerRuntime>> {
    let runtime = DockerRuntime::connect()
        .context("Docker is unavailable")?
        .with_stop_grace_secs(args.stop_grace_secs);
    Ok(Arc::new(runtime))
}

async fn run_reap_command(args: ReapArgs) -> anyhow::Result<()> {
    let runtime = connect_runtime(&args.runtime)?;
    let reaped = reap_zombies(runtime.as_ref()).await?;
    println!("Reaped {} sandbox(es)", reaped);
    Ok(())
}

/// A pool with its idle monitor running. Call [`PoolSession::close`] when done.
struct PoolSession {
    pool: Arc<SandboxPool>,
    runtime: Arc<dyn ContainerRuntime>,
    shutdown: broadcast::Sender<()>,
    monitor: tokio::task::JoinHandle<()>,
}

impl PoolSession {
    async fn open(args: &PoolArgs) -> anyhow::Result<(Self, RunnerConfig)> {
        let config = args.runner_config()?;
        let runtime: Arc<dyn ContainerRuntime> = connect_runtime(&args.runtime)?;

        if !args.no_reap {
            let reaped = reap_zombies(runtime.as_ref()).await?;
            if reaped > 0 {
                info!(reaped = reaped, "Removed orphaned sandboxes");
            }
        }

        let pool = Arc::new(SandboxPool::new(runtime.clone(), config.clone()));
        let (shutdown, shutdown_rx) = broadcast::channel(1);
        let monitor = pool.start_monitor(config.monitor_interval, config.idle_timeout, shutdown_rx);

        Ok((
            Self {
                pool,
                runtime,
                shutdown,
                monitor,
            },
            config,
        ))
    }

    async fn close(self) {
        let _ = self.shutdown.send(());
        if let Err(e) = self.monitor.await {
            warn!(error = %e, "Idle monitor task failed");
        }
        let drained = self.pool.drain().await;
        info!(drained = drained, "Sandbox pool drained");
    }
}

async fn run_exec_command(args: ExecArgs) -> anyhow::Result<()> {
    let (session, config) = PoolSession::open(&args.pool).await?;
    let service = RunnerService::new(
        session.pool.clone(),
        CommandExecutor::new(session.runtime.clone()),
        EvaluationEngine::from_config(Arc::new(UnconfiguredBackend), &config),
        config.default_stack.clone(),
    );

    let result = service.execute(&args.project, &args.argv).await;
    session.close().await;

    let stdout = result?;
    print!("{}", stdout);
    Ok(())
}

async fn run_gate_command(args: GateArgs) -> anyhow::Result<()> {
    let mut gate_config = match &args.config {
        Some(path) => GateConfig::load(path)
            .await
            .with_context(|| format!("Failed to load gate config {}", path.display()))?,
        None => detect_stack(&args.root).await?,
    };
    if let Some(stack) = &args.stack {
        gate_config.stack = stack.clone();
    }

    // llm_eval paths are relative to the project root.
    for gate in &mut gate_config.gates {
        if let GateKind::LlmEval { file, .. } = &mut gate.kind {
            if file.is_relative() {
                *file = args.root.join(&*file);
            }
        }
    }

    if gate_config.gates.is_empty() {
        warn!(stack = %gate_config.stack, "No gates configured");
    }

    let backend = args.llm.backend()?;
    let (session, config) = PoolSession::open(&args.pool).await?;
    let service = RunnerService::new(
        session.pool.clone(),
        CommandExecutor::new(session.runtime.clone()),
        EvaluationEngine::from_config(backend, &config),
        config.default_stack.clone(),
    );

    let report = service.run_gates(&args.project, &gate_config).await;
    session.close().await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    if args.print_metrics {
        print!("{}", metrics::export_metrics());
    }

    if !report.passed() {
        anyhow::bail!("{} gate(s) did not pass", report.failures().count());
    }
    Ok(())
}

fn print_report(report: &GateReport) {
    println!("Project {} (stack {})", report.project_id, report.stack);
    for result in &report.results {
        let (mark, detail) = match &result.outcome {
            GateOutcome::Passed => ("PASS", None),
            GateOutcome::Failed(detail) => ("FAIL", Some(detail)),
            GateOutcome::Errored(detail) => ("ERROR", Some(detail)),
        };
        println!(
            "  [{}] {:<5} {} ({}, {} ms)",
            result.tier, mark, result.name, result.kind, result.duration_ms
        );
        if let Some(detail) = detail {
            for line in detail.lines() {
                println!("        {}", line);
            }
        }
    }
}

// ============================================================================
// Diagnostics
// ============================================================================

async fn run_parse_command(args: ParseArgs) -> anyhow::Result<()> {
    let format: ToolFormat = args.format.parse()?;

    let raw = match &args.file {
        Some(path) => tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?,
        None => {
            let mut buf = Vec::new();
            tokio::io::stdin().read_to_end(&mut buf).await?;
            buf
        }
    };

    let entries = if args.no_hints {
        parser::parse(format, &raw)?
    } else {
        parser::parse_and_enrich(format, &raw)?
    };

    println!("{}", serde_json::to_string_pretty(&entries)?);
    Ok(())
}

// ============================================================================
// Tasks
// ============================================================================

#[derive(Debug, Serialize)]
struct SubmitOutput {
    task_id: String,
    attempt: u32,
    max_attempts: u32,
}

async fn open_store(args: &DbArgs) -> anyhow::Result<Arc<SqliteTaskStore>> {
    let store = SqliteTaskStore::open(&args.db)
        .await
        .with_context(|| format!("Failed to open task database {}", args.db))?;
    Ok(Arc::new(store))
}

async fn run_add_task_command(args: AddTaskArgs) -> anyhow::Result<()> {
    let store = open_store(&args.db).await?;
    let task = TaskRecord::new(args.project);
    store.insert(&task).await?;
    println!("{}", task.id);
    Ok(())
}

async fn run_claim_command(args: TaskArgs) -> anyhow::Result<()> {
    let store = open_store(&args.db).await?;
    AttemptBreaker::new(store).claim(&args.task_id).await?;
    println!("Task claimed");
    Ok(())
}

async fn run_submit_command(args: SubmitArgs) -> anyhow::Result<()> {
    let store = open_store(&args.task.db).await?;
    let breaker = AttemptBreaker::from_config(store, &args.runner_config());

    let admission = breaker.submit(&args.task.task_id).await?;
    let output = SubmitOutput {
        task_id: args.task.task_id,
        attempt: admission.attempt,
        max_attempts: admission.max_attempts,
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
