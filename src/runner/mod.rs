//! Sandbox runner for gate execution.
//!
//! # Architecture
//!
//! ```text
//! RunnerService ─┬─> SandboxPool (project, stack) -> sandbox id
//!                ├─> CommandExecutor  argv -> stdout / stderr / exit code
//!                └─> EvaluationEngine file + instruction -> verdict
//! ```
//!
//! On startup the process calls [`reap_zombies`] once, before the pool serves
//! any request, to remove sandboxes orphaned by a previous run.
//!
//! # Example
//!
//! ```ignore
//! use monarch_runner::runner::{reap_zombies, CommandExecutor, RunnerService, SandboxPool};
//!
//! let runtime = Arc::new(DockerRuntime::connect()?);
//! reap_zombies(runtime.as_ref()).await?;
//!
//! let pool = Arc::new(SandboxPool::new(runtime.clone(), config.clone()));
//! let monitor = pool.start_monitor(config.monitor_interval, config.idle_timeout, shutdown_rx);
//!
//! let service = RunnerService::new(pool, CommandExecutor::new(runtime), engine, "default");
//! service.run_gate("proj-1", &gate).await?;
//! ```

pub mod executor;
pub mod manager;
pub mod reaper;
pub mod service;

pub use executor::{CommandExecutor, ExecOutput};
pub use manager::{BindingInfo, SandboxPool};
pub use reaper::reap_zombies;
pub use service::{verdict_is_failure, GateOutcome, GateReport, GateResult, RunnerService};
