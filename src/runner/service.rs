//! Gate execution service: the entry point for running quality gates and raw
//! commands against a project's sandbox.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

use super::executor::CommandExecutor;
use super::manager::SandboxPool;
use crate::error::GateError;
use crate::eval::EvaluationEngine;
use crate::gates::{Gate, GateConfig, GateKind, Tier, UNKNOWN_STACK};
use crate::metrics;

/// Decides whether a judgment verdict is a failure.
///
/// This is a deliberately coarse heuristic: any occurrence of `FAIL`, in any
/// case, fails the gate. A verdict such as "no failures found" therefore
/// fails too. The judge is prompted to end its answer with PASS or FAIL.
pub fn verdict_is_failure(verdict: &str) -> bool {
    verdict.to_uppercase().contains("FAIL")
}

/// Result of one gate within a [`GateReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum GateOutcome {
    Passed,
    /// The check ran and did not pass.
    Failed(String),
    /// The check could not be run.
    Errored(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct GateResult {
    pub name: String,
    pub tier: Tier,
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(flatten)]
    pub outcome: GateOutcome,
    pub duration_ms: u64,
}

/// Per-gate outcomes of a [`RunnerService::run_gates`] call, in config order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GateReport {
    pub project_id: String,
    pub stack: String,
    pub results: Vec<GateResult>,
}

impl GateReport {
    /// True when every gate passed. An empty report passes.
    pub fn passed(&self) -> bool {
        self.results
            .iter()
            .all(|r| r.outcome == GateOutcome::Passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &GateResult> {
        self.results
            .iter()
            .filter(|r| r.outcome != GateOutcome::Passed)
    }
}

/// Runs gates and raw commands. Performs no retries.
pub struct RunnerService {
    pool: Arc<SandboxPool>,
    executor: CommandExecutor,
    eval: EvaluationEngine,
    default_stack: String,
}

impl RunnerService {
    pub fn new(
        pool: Arc<SandboxPool>,
        executor: CommandExecutor,
        eval: EvaluationEngine,
        default_stack: impl Into<String>,
    ) -> Self {
        Self {
            pool,
            executor,
            eval,
            default_stack: default_stack.into(),
        }
    }

    pub fn default_stack(&self) -> &str {
        &self.default_stack
    }

    /// Runs `argv` in the project's default-stack sandbox and returns stdout.
    ///
    /// # Errors
    ///
    /// `GateError::CommandFailed` on a non-zero exit, carrying the exit code
    /// and stderr; `GateError::Runtime` if the sandbox or exec fails.
    pub async fn execute(&self, project_id: &str, argv: &[String]) -> Result<String, GateError> {
        let sandbox_id = self.pool.get_or_start(project_id, &self.default_stack).await?;
        let output = self.executor.run(&sandbox_id, argv).await?;

        if !output.success() {
            return Err(GateError::CommandFailed {
                exit_code: output.exit_code,
                stderr: output.stderr,
            });
        }

        Ok(output.stdout)
    }

    /// Runs one gate on the default stack.
    pub async fn run_gate(&self, project_id: &str, gate: &Gate) -> Result<(), GateError> {
        self.run_gate_on_stack(project_id, &self.default_stack, gate).await
    }

    /// Runs one gate, using a sandbox for `stack` when the gate needs one.
    pub async fn run_gate_on_stack(
        &self,
        project_id: &str,
        stack: &str,
        gate: &Gate,
    ) -> Result<(), GateError> {
        let result = match &gate.kind {
            GateKind::LlmEval { instruction, file } => {
                let verdict = self.eval.evaluate_snapshot(file, instruction).await?;
                if verdict_is_failure(&verdict) {
                    Err(GateError::Failed {
                        gate: gate.name.clone(),
                        detail: format!("LLM evaluation failed: {}", verdict.trim()),
                    })
                } else {
                    Ok(())
                }
            }
            GateKind::Standard { command } => {
                self.run_standard(project_id, stack, &gate.name, command)
                    .await
            }
        };

        let outcome = match &result {
            Ok(()) => "pass",
            Err(e) if e.is_verification_failure() => "fail",
            Err(_) => "error",
        };
        metrics::record_gate_run(gate.type_name(), outcome);

        match &result {
            Ok(()) => info!(project = project_id, gate = %gate.name, tier = %gate.tier, "Gate passed"),
            Err(e) => warn!(project = project_id, gate = %gate.name, tier = %gate.tier, error = %e, "Gate did not pass"),
        }

        result
    }

    async fn run_standard(
        &self,
        project_id: &str,
        stack: &str,
        gate_name: &str,
        command: &str,
    ) -> Result<(), GateError> {
        let argv: Vec<String> = command.split_whitespace().map(String::from).collect();
        if argv.is_empty() {
            return Err(GateError::InvalidGate {
                gate: gate_name.to_string(),
                reason: "empty command".to_string(),
            });
        }

        let sandbox_id = self.pool.get_or_start(project_id, stack).await?;
        let output = self.executor.run(&sandbox_id, &argv).await?;

        if !output.success() {
            return Err(GateError::Failed {
                gate: gate_name.to_string(),
                detail: output.stderr,
            });
        }

        Ok(())
    }

    /// Runs every gate of `config` in order and reports each outcome.
    ///
    /// A failing gate does not stop the run. Standard gates use the
    /// configured stack, or the default stack when none was detected.
    pub async fn run_gates(&self, project_id: &str, config: &GateConfig) -> GateReport {
        let stack = if config.stack.is_empty() || config.stack == UNKNOWN_STACK {
            self.default_stack.clone()
        } else {
            config.stack.clone()
        };

        let mut results = Vec::with_capacity(config.gates.len());
        for gate in &config.gates {
            let started = Instant::now();
            let outcome = match self.run_gate_on_stack(project_id, &stack, gate).await {
                Ok(()) => GateOutcome::Passed,
                Err(e) if e.is_verification_failure() => GateOutcome::Failed(e.to_string()),
                Err(e) => GateOutcome::Errored(e.to_string()),
            };
            results.push(GateResult {
                name: gate.name.clone(),
                tier: gate.tier,
                kind: gate.type_name(),
                outcome,
                duration_ms: duration_ms(started.elapsed()),
            });
        }

        GateReport {
            project_id: project_id.to_string(),
            stack,
            results,
        }
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunnerConfig;
    use crate::error::{EvalError, RuntimeError};
    use crate::eval::engine::tests::StaticJudge;
    use crate::runtime::fake::{FakeRuntime, ScriptedExec};
    use crate::runtime::LABEL_STACK;

    struct Fixture {
        runtime: Arc<FakeRuntime>,
        judge: Arc<StaticJudge>,
        service: RunnerService,
    }

    fn fixture_with(runtime: FakeRuntime, verdict: &str, size_limit: u64) -> Fixture {
        let runtime = Arc::new(runtime);
        let judge = Arc::new(StaticJudge::new(verdict));
        let pool = Arc::new(SandboxPool::new(runtime.clone(), RunnerConfig::default()));
        let service = RunnerService::new(
            pool,
            CommandExecutor::new(runtime.clone()),
            EvaluationEngine::new(judge.clone(), size_limit),
            "default",
        );
        Fixture {
            runtime,
            judge,
            service,
        }
    }

    fn fixture(verdict: &str) -> Fixture {
        fixture_with(FakeRuntime::new(), verdict, 1024)
    }

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_verdict_heuristic() {
        assert!(verdict_is_failure("FAIL"));
        assert!(verdict_is_failure("this will fail"));
        assert!(verdict_is_failure("No failures found"));
        assert!(!verdict_is_failure("PASS: all good"));
        assert!(!verdict_is_failure(""));
    }

    #[tokio::test]
    async fn test_execute_returns_stdout() {
        let f = fixture("PASS");
        f.runtime.script_exec(ScriptedExec::new("ok\n", "noise", 0));

        let out = f.service.execute("proj", &argv(&["echo", "ok"])).await.unwrap();

        assert_eq!(out, "ok\n");
        assert_eq!(f.runtime.last_argv().unwrap(), argv(&["echo", "ok"]));
    }

    #[tokio::test]
    async fn test_execute_nonzero_exit() {
        let f = fixture("PASS");
        f.runtime.script_exec(ScriptedExec::new("", "boom", 2));

        let err = f.service.execute("proj", &argv(&["false"])).await.unwrap_err();

        assert!(matches!(err, GateError::CommandFailed { exit_code: 2, ref stderr } if stderr == "boom"));
        assert_eq!(err.to_string(), "execution failed (exit 2): boom");
    }

    #[tokio::test]
    async fn test_execute_uses_default_stack() {
        let f = fixture("PASS");
        f.service.execute("proj", &argv(&["true"])).await.unwrap();

        let ids = f.runtime.sandbox_ids();
        assert_eq!(ids.len(), 1);
        assert_eq!(f.runtime.labels_of(&ids[0]).unwrap()[LABEL_STACK], "default");
    }

    #[tokio::test]
    async fn test_execute_runtime_failure() {
        let f = fixture_with(
            FakeRuntime {
                fail_create: true,
                ..Default::default()
            },
            "PASS",
            1024,
        );

        let err = f.service.execute("proj", &argv(&["true"])).await.unwrap_err();
        assert!(matches!(err, GateError::Runtime(RuntimeError::CreateFailed { .. })));
        assert!(!err.is_verification_failure());
    }

    #[tokio::test]
    async fn test_standard_gate_tokenizes_on_whitespace() {
        let f = fixture("PASS");
        let gate = Gate::standard("build", Tier::A, "  go   build\t./... ");

        f.service.run_gate("proj", &gate).await.unwrap();

        assert_eq!(f.runtime.last_argv().unwrap(), argv(&["go", "build", "./..."]));
    }

    #[tokio::test]
    async fn test_standard_gate_failure_carries_name_and_stderr() {
        let f = fixture("PASS");
        f.runtime.script_exec(ScriptedExec::new("", "undefined: x", 1));
        let gate = Gate::standard("build", Tier::A, "go build ./...");

        let err = f.service.run_gate("proj", &gate).await.unwrap_err();

        assert_eq!(err.to_string(), "gate build failed: undefined: x");
        assert!(err.is_verification_failure());
    }

    #[tokio::test]
    async fn test_standard_gate_empty_command() {
        let f = fixture("PASS");
        let gate = Gate::standard("noop", Tier::C, "   ");

        let err = f.service.run_gate("proj", &gate).await.unwrap_err();

        assert!(matches!(err, GateError::InvalidGate { .. }));
        assert_eq!(f.runtime.creates(), 0);
    }

    #[tokio::test]
    async fn test_run_gate_on_explicit_stack() {
        let f = fixture("PASS");
        let gate = Gate::standard("test", Tier::B, "go test ./...");

        f.service.run_gate_on_stack("proj", "go", &gate).await.unwrap();

        let ids = f.runtime.sandbox_ids();
        assert_eq!(f.runtime.labels_of(&ids[0]).unwrap()[LABEL_STACK], "go");
    }

    #[tokio::test]
    async fn test_llm_gate_pass_and_fail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("main.go");
        std::fs::write(&path, "package main").unwrap();
        let gate = Gate::llm_eval("review", Tier::B, "No globals", &path);

        let pass = fixture("Looks good. PASS");
        pass.service.run_gate("proj", &gate).await.unwrap();
        assert_eq!(pass.judge.call_count(), 1);
        assert_eq!(pass.runtime.creates(), 0);

        let fail = fixture("uses a global: fail");
        let err = fail.service.run_gate("proj", &gate).await.unwrap_err();
        assert!(matches!(err, GateError::Failed { ref gate, .. } if gate == "review"));
        assert!(err.to_string().contains("uses a global"));
    }

    #[tokio::test]
    async fn test_llm_gate_size_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.go");
        std::fs::write(&path, "x".repeat(101)).unwrap();
        let f = fixture_with(FakeRuntime::new(), "PASS", 100);

        let gate = Gate::llm_eval("review", Tier::B, "anything", &path);
        let err = f.service.run_gate("proj", &gate).await.unwrap_err();

        assert!(matches!(
            err,
            GateError::Eval(EvalError::SizeLimitExceeded { actual: 101, limit: 100 })
        ));
        assert_eq!(f.judge.call_count(), 0);
    }

    #[tokio::test]
    async fn test_run_gates_reports_every_gate() {
        let f = fixture("PASS");
        f.runtime.script_exec(ScriptedExec::new("", "", 0));
        f.runtime.script_exec(ScriptedExec::new("", "lint errors", 1));
        f.runtime.script_exec(ScriptedExec::new("", "", 0));

        let config = GateConfig {
            stack: "go".to_string(),
            gates: vec![
                Gate::standard("build", Tier::A, "go build ./..."),
                Gate::standard("lint", Tier::B, "golangci-lint run"),
                Gate::standard("test", Tier::A, "go test ./..."),
            ],
        };

        let report = f.service.run_gates("proj", &config).await;

        assert_eq!(report.stack, "go");
        assert_eq!(report.results.len(), 3);
        assert_eq!(report.results[0].outcome, GateOutcome::Passed);
        assert!(matches!(report.results[1].outcome, GateOutcome::Failed(ref d) if d.contains("lint errors")));
        assert_eq!(report.results[2].outcome, GateOutcome::Passed);
        assert!(!report.passed());
        assert_eq!(report.failures().count(), 1);
        // one sandbox reused for all three gates
        assert_eq!(f.runtime.creates(), 1);
    }

    #[tokio::test]
    async fn test_run_gates_unknown_stack_falls_back_to_default() {
        let f = fixture("PASS");
        let config = GateConfig {
            stack: UNKNOWN_STACK.to_string(),
            gates: vec![Gate::standard("build", Tier::A, "make")],
        };

        let report = f.service.run_gates("proj", &config).await;

        assert!(report.passed());
        assert_eq!(report.stack, "default");
    }

    #[tokio::test]
    async fn test_run_gates_system_fault_is_errored() {
        let f = fixture_with(
            FakeRuntime {
                fail_start: true,
                ..Default::default()
            },
            "PASS",
            1024,
        );
        let config = GateConfig {
            stack: "go".to_string(),
            gates: vec![Gate::standard("build", Tier::A, "go build")],
        };

        let report = f.service.run_gates("proj", &config).await;

        assert!(matches!(report.results[0].outcome, GateOutcome::Errored(_)));
        assert!(!report.passed());
    }

    #[test]
    fn test_report_serializes_outcome() {
        let report = GateReport {
            project_id: "p".to_string(),
            stack: "go".to_string(),
            results: vec![GateResult {
                name: "build".to_string(),
                tier: Tier::A,
                kind: "standard",
                outcome: GateOutcome::Failed("boom".to_string()),
                duration_ms: 5,
            }],
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["results"][0]["outcome"], "failed");
        assert_eq!(json["results"][0]["detail"], "boom");
        assert_eq!(json["results"][0]["type"], "standard");
    }
}
