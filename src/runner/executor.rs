//! Command execution inside an existing sandbox.

use std::sync::Arc;

use futures::StreamExt;
use tracing::debug;

use crate::error::RuntimeError;
use crate::runtime::{ContainerRuntime, ExecChunk};

/// Captured result of one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code as reported by exec inspection.
    pub exit_code: i64,
}

impl ExecOutput {
    /// Whether the command exited with status 0.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs argument vectors in sandboxes. Stateless per call.
#[derive(Clone)]
pub struct CommandExecutor {
    runtime: Arc<dyn ContainerRuntime>,
}

impl CommandExecutor {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime }
    }

    /// Runs `argv` inside `sandbox_id` and captures both streams and the exit
    /// code.
    ///
    /// The three remote stages (create, attach, inspect) run in order; the
    /// first failure aborts the whole call and no partial output is returned.
    /// The attachment is dropped before inspection and on every error path.
    pub async fn run(&self, sandbox_id: &str, argv: &[String]) -> Result<ExecOutput, RuntimeError> {
        let exec_id = self.runtime.exec_create(sandbox_id, argv).await?;

        let mut attachment = self.runtime.exec_attach(&exec_id).await?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        while let Some(chunk) = attachment.output.next().await {
            match chunk? {
                ExecChunk::Stdout(bytes) => stdout.extend_from_slice(&bytes),
                ExecChunk::Stderr(bytes) => stderr.extend_from_slice(&bytes),
            }
        }
        drop(attachment);

        let exit_code = self.runtime.exec_inspect(&exec_id).await?;

        debug!(
            sandbox = sandbox_id,
            exec = %exec_id,
            exit_code = exit_code,
            stdout_bytes = stdout.len(),
            stderr_bytes = stderr.len(),
            "Exec finished"
        );

        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_code,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::fake::{FakeRuntime, ScriptedExec};

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_run_captures_streams_and_exit_code() {
        let runtime = Arc::new(FakeRuntime::new());
        runtime.script_exec(ScriptedExec::new("hello\n", "warning: x\n", 3));
        let executor = CommandExecutor::new(runtime.clone());

        let out = executor
            .run("sandbox-0", &argv(&["sh", "-c", "echo hello"]))
            .await
            .unwrap();

        assert_eq!(out.stdout, "hello\n");
        assert_eq!(out.stderr, "warning: x\n");
        assert_eq!(out.exit_code, 3);
        assert!(!out.success());
        assert_eq!(runtime.last_argv(), Some(argv(&["sh", "-c", "echo hello"])));
        assert_eq!(runtime.releases(), 1);
    }

    #[tokio::test]
    async fn test_interleaved_chunks_are_demultiplexed() {
        let runtime = Arc::new(FakeRuntime::new());
        runtime.script_exec(ScriptedExec {
            chunks: vec![
                ExecChunk::Stdout(b"a".to_vec()),
                ExecChunk::Stderr(b"1".to_vec()),
                ExecChunk::Stdout(b"b".to_vec()),
                ExecChunk::Stderr(b"2".to_vec()),
            ],
            exit_code: 0,
        });
        let executor = CommandExecutor::new(runtime);

        let out = executor.run("sandbox-0", &argv(&["true"])).await.unwrap();

        assert_eq!(out.stdout, "ab");
        assert_eq!(out.stderr, "12");
        assert!(out.success());
    }

    #[tokio::test]
    async fn test_exec_create_failure_aborts() {
        let runtime = Arc::new(FakeRuntime {
            fail_exec_create: true,
            ..Default::default()
        });
        let executor = CommandExecutor::new(runtime);

        let err = executor.run("sandbox-0", &argv(&["ls"])).await.unwrap_err();
        assert!(matches!(err, RuntimeError::ExecCreateFailed { .. }));
    }

    #[tokio::test]
    async fn test_attach_failure_aborts() {
        let runtime = Arc::new(FakeRuntime {
            fail_attach: true,
            ..Default::default()
        });
        let executor = CommandExecutor::new(runtime);

        let err = executor.run("sandbox-0", &argv(&["ls"])).await.unwrap_err();
        assert!(matches!(err, RuntimeError::ExecAttachFailed { .. }));
    }

    #[tokio::test]
    async fn test_stream_failure_aborts_and_releases_attachment() {
        let runtime = Arc::new(FakeRuntime {
            fail_stream: true,
            ..Default::default()
        });
        runtime.script_exec(ScriptedExec::new("partial", "", 0));
        let executor = CommandExecutor::new(runtime.clone());

        let err = executor.run("sandbox-0", &argv(&["ls"])).await.unwrap_err();

        assert!(matches!(err, RuntimeError::ExecStreamFailed { .. }));
        assert_eq!(runtime.releases(), 1);
    }

    #[tokio::test]
    async fn test_inspect_failure_aborts() {
        let runtime = Arc::new(FakeRuntime {
            fail_inspect: true,
            ..Default::default()
        });
        runtime.script_exec(ScriptedExec::new("out", "", 0));
        let executor = CommandExecutor::new(runtime.clone());

        let err = executor.run("sandbox-0", &argv(&["ls"])).await.unwrap_err();

        assert!(matches!(err, RuntimeError::ExecInspectFailed { .. }));
        assert_eq!(runtime.releases(), 1);
    }
}
