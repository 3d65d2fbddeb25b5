//! Docker implementation of [`ContainerRuntime`] using the bollard crate.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bollard::container::{
    Config, ListContainersOptions, LogOutput, RemoveContainerOptions, StartContainerOptions,
    StopContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::Docker;
use futures::StreamExt;
use tracing::debug;

use super::{ContainerRuntime, ExecAttachment, ExecChunk, SandboxSpec, SandboxSummary};
use crate::error::RuntimeError;

/// Seconds Docker waits after SIGTERM before sending SIGKILL on stop.
const DEFAULT_STOP_GRACE_SECS: i64 = 10;

/// Inspect polls while the daemon still reports the exec as running after
/// its output stream closed.
const EXEC_INSPECT_ATTEMPTS: u32 = 20;
const EXEC_INSPECT_BACKOFF: Duration = Duration::from_millis(50);

/// What one exec inspection tells us about completion.
#[derive(Debug, PartialEq, Eq)]
enum ExecState {
    Exited(i64),
    Running,
    Unknown,
}

fn exec_state(running: Option<bool>, exit_code: Option<i64>) -> ExecState {
    match (running, exit_code) {
        (Some(true), _) => ExecState::Running,
        (_, Some(code)) => ExecState::Exited(code),
        (_, None) => ExecState::Unknown,
    }
}

/// Docker-backed container runtime.
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
    stop_grace_secs: i64,
}

impl DockerRuntime {
    /// Connects to the local Docker daemon using the environment defaults
    /// (`DOCKER_HOST` or the local socket).
    ///
    /// # Errors
    ///
    /// Returns `RuntimeError::Unavailable` if the daemon cannot be reached.
    pub fn connect() -> Result<Self, RuntimeError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| RuntimeError::Unavailable(format!("Failed to connect: {e}")))?;

        Ok(Self::from_docker(docker))
    }

    /// Wraps an existing bollard client.
    pub fn from_docker(docker: Docker) -> Self {
        Self {
            docker,
            stop_grace_secs: DEFAULT_STOP_GRACE_SECS,
        }
    }

    /// Sets the stop grace period in seconds.
    pub fn with_stop_grace_secs(mut self, secs: i64) -> Self {
        self.stop_grace_secs = secs;
        self
    }

    /// Pings the daemon.
    pub async fn ping(&self) -> Result<(), RuntimeError> {
        self.docker
            .ping()
            .await
            .map_err(|e| RuntimeError::Unavailable(e.to_string()))?;
        Ok(())
    }
}

fn is_not_found(err: &BollardError) -> bool {
    matches!(
        err,
        BollardError::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn create(&self, spec: &SandboxSpec) -> Result<String, RuntimeError> {
        let config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(spec.cmd.clone()),
            labels: Some(spec.labels.clone()),
            tty: Some(false),
            attach_stdin: Some(false),
            attach_stdout: Some(false),
            attach_stderr: Some(false),
            ..Default::default()
        };

        let response = self
            .docker
            .create_container::<String, String>(None, config)
            .await
            .map_err(|e| RuntimeError::CreateFailed {
                project: spec.project().unwrap_or_default().to_string(),
                stack: spec.stack().unwrap_or_default().to_string(),
                reason: e.to_string(),
            })?;

        for warning in &response.warnings {
            debug!(sandbox = %response.id, warning = %warning, "Docker create warning");
        }

        Ok(response.id)
    }

    async fn start(&self, id: &str) -> Result<(), RuntimeError> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| RuntimeError::StartFailed {
                id: id.to_string(),
                reason: e.to_string(),
            })
    }

    async fn stop(&self, id: &str) -> Result<(), RuntimeError> {
        let options = StopContainerOptions {
            t: self.stop_grace_secs,
        };

        self.docker
            .stop_container(id, Some(options))
            .await
            .map_err(|e| {
                if is_not_found(&e) {
                    RuntimeError::SandboxNotFound { id: id.to_string() }
                } else {
                    RuntimeError::StopFailed {
                        id: id.to_string(),
                        reason: e.to_string(),
                    }
                }
            })
    }

    async fn list(
        &self,
        label_filter: &HashMap<String, String>,
    ) -> Result<Vec<SandboxSummary>, RuntimeError> {
        let labels: Vec<String> = label_filter
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        let mut filters = HashMap::new();
        if !labels.is_empty() {
            filters.insert("label".to_string(), labels);
        }

        let options = ListContainersOptions::<String> {
            all: true,
            filters,
            ..Default::default()
        };

        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| RuntimeError::ListFailed(e.to_string()))?;

        Ok(containers
            .into_iter()
            .filter_map(|c| {
                Some(SandboxSummary {
                    id: c.id?,
                    labels: c.labels.unwrap_or_default(),
                    state: c.state,
                })
            })
            .collect())
    }

    async fn remove(&self, id: &str, force: bool) -> Result<(), RuntimeError> {
        let options = RemoveContainerOptions {
            force,
            v: true,
            ..Default::default()
        };

        self.docker
            .remove_container(id, Some(options))
            .await
            .map_err(|e| {
                if is_not_found(&e) {
                    RuntimeError::SandboxNotFound { id: id.to_string() }
                } else {
                    RuntimeError::RemoveFailed {
                        id: id.to_string(),
                        reason: e.to_string(),
                    }
                }
            })
    }

    async fn exec_create(&self, sandbox_id: &str, argv: &[String]) -> Result<String, RuntimeError> {
        let options = CreateExecOptions {
            cmd: Some(argv.to_vec()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(sandbox_id, options)
            .await
            .map_err(|e| RuntimeError::ExecCreateFailed {
                id: sandbox_id.to_string(),
                reason: e.to_string(),
            })?;

        Ok(exec.id)
    }

    async fn exec_attach(&self, exec_id: &str) -> Result<ExecAttachment, RuntimeError> {
        let started = self
            .docker
            .start_exec(exec_id, None)
            .await
            .map_err(|e| RuntimeError::ExecAttachFailed {
                id: exec_id.to_string(),
                reason: e.to_string(),
            })?;

        let StartExecResults::Attached { output, .. } = started else {
            return Err(RuntimeError::ExecAttachFailed {
                id: exec_id.to_string(),
                reason: "exec started detached".to_string(),
            });
        };

        let id = exec_id.to_string();
        let output = output
            .filter_map(move |chunk| {
                let mapped = match chunk {
                    Ok(LogOutput::StdOut { message }) | Ok(LogOutput::Console { message }) => {
                        Some(Ok(ExecChunk::Stdout(message.to_vec())))
                    }
                    Ok(LogOutput::StdErr { message }) => {
                        Some(Ok(ExecChunk::Stderr(message.to_vec())))
                    }
                    Ok(LogOutput::StdIn { .. }) => None,
                    Err(e) => Some(Err(RuntimeError::ExecStreamFailed {
                        id: id.clone(),
                        reason: e.to_string(),
                    })),
                };
                futures::future::ready(mapped)
            })
            .boxed();

        Ok(ExecAttachment { output })
    }

    async fn exec_inspect(&self, exec_id: &str) -> Result<i64, RuntimeError> {
        let failed = |reason: String| RuntimeError::ExecInspectFailed {
            id: exec_id.to_string(),
            reason,
        };

        for _ in 0..EXEC_INSPECT_ATTEMPTS {
            let info = self
                .docker
                .inspect_exec(exec_id)
                .await
                .map_err(|e| failed(e.to_string()))?;

            match exec_state(info.running, info.exit_code) {
                ExecState::Exited(code) => return Ok(code),
                ExecState::Running => {
                    debug!(exec = exec_id, "Exec still running after stream end");
                    tokio::time::sleep(EXEC_INSPECT_BACKOFF).await;
                }
                ExecState::Unknown => return Err(failed("no exit code reported".to_string())),
            }
        }

        Err(failed(format!(
            "still running after {} inspections",
            EXEC_INSPECT_ATTEMPTS
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_detection() {
        let not_found = BollardError::DockerResponseServerError {
            status_code: 404,
            message: "No such container: abc".to_string(),
        };
        let conflict = BollardError::DockerResponseServerError {
            status_code: 409,
            message: "conflict".to_string(),
        };

        assert!(is_not_found(&not_found));
        assert!(!is_not_found(&conflict));
    }

    #[test]
    fn test_exec_state_requires_reported_exit_code() {
        assert_eq!(exec_state(Some(false), Some(0)), ExecState::Exited(0));
        assert_eq!(exec_state(None, Some(2)), ExecState::Exited(2));
        assert_eq!(exec_state(Some(true), None), ExecState::Running);
        assert_eq!(exec_state(Some(true), Some(0)), ExecState::Running);
        assert_eq!(exec_state(Some(false), None), ExecState::Unknown);
        assert_eq!(exec_state(None, None), ExecState::Unknown);
    }
}
