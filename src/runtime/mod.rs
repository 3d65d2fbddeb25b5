//! Container runtime abstraction.
//!
//! The runner never talks to Docker directly; it goes through the
//! [`ContainerRuntime`] trait so the pool, executor and reaper can be driven
//! by an in-process fake in tests. [`DockerRuntime`] is the production
//! implementation on top of bollard.
//!
//! Every sandbox this crate creates carries three labels:
//!
//! ```text
//! monarch.managed = "true"
//! monarch.project = <project id>
//! monarch.stack   = <stack>
//! ```
//!
//! The managed marker is what the reaper filters on after a crash.

pub mod docker;

#[cfg(test)]
pub(crate) mod fake;

use std::collections::HashMap;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::RuntimeError;

pub use docker::DockerRuntime;

/// Label marking a sandbox as owned by this system.
pub const LABEL_MANAGED: &str = "monarch.managed";
/// Label carrying the owning project id.
pub const LABEL_PROJECT: &str = "monarch.project";
/// Label carrying the owning stack.
pub const LABEL_STACK: &str = "monarch.stack";

/// Everything needed to create a sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxSpec {
    /// Image to create the sandbox from.
    pub image: String,
    /// Long-running command keeping the sandbox alive.
    pub cmd: Vec<String>,
    /// Labels attached to the sandbox.
    pub labels: HashMap<String, String>,
}

impl SandboxSpec {
    /// Builds a spec for a managed sandbox owned by `project`/`stack`.
    pub fn managed(
        image: impl Into<String>,
        cmd: Vec<String>,
        project: &str,
        stack: &str,
    ) -> Self {
        let labels = HashMap::from([
            (LABEL_MANAGED.to_string(), "true".to_string()),
            (LABEL_PROJECT.to_string(), project.to_string()),
            (LABEL_STACK.to_string(), stack.to_string()),
        ]);
        Self {
            image: image.into(),
            cmd,
            labels,
        }
    }

    /// Project label, if present.
    pub fn project(&self) -> Option<&str> {
        self.labels.get(LABEL_PROJECT).map(String::as_str)
    }

    /// Stack label, if present.
    pub fn stack(&self) -> Option<&str> {
        self.labels.get(LABEL_STACK).map(String::as_str)
    }
}

/// A sandbox as reported by a list call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxSummary {
    pub id: String,
    pub labels: HashMap<String, String>,
    /// Runtime-reported state, e.g. "running" or "exited".
    pub state: Option<String>,
}

/// One demultiplexed piece of exec output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecChunk {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
}

/// Live attachment to an exec context.
///
/// Dropping the attachment closes the underlying connection.
pub struct ExecAttachment {
    pub output: BoxStream<'static, Result<ExecChunk, RuntimeError>>,
}

impl std::fmt::Debug for ExecAttachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecAttachment").finish_non_exhaustive()
    }
}

/// Narrow interface to the container runtime control plane.
///
/// All calls are async; callers cancel them by dropping the future.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Creates (but does not start) a sandbox and returns its id.
    async fn create(&self, spec: &SandboxSpec) -> Result<String, RuntimeError>;

    /// Starts a created sandbox.
    async fn start(&self, id: &str) -> Result<(), RuntimeError>;

    /// Stops a running sandbox.
    async fn stop(&self, id: &str) -> Result<(), RuntimeError>;

    /// Lists sandboxes in any state whose labels match every `key=value` pair
    /// in `label_filter`.
    async fn list(
        &self,
        label_filter: &HashMap<String, String>,
    ) -> Result<Vec<SandboxSummary>, RuntimeError>;

    /// Removes a sandbox, killing it first when `force` is set.
    async fn remove(&self, id: &str, force: bool) -> Result<(), RuntimeError>;

    /// Creates an exec context in `sandbox_id` with stdout and stderr attached.
    /// Returns the exec id.
    async fn exec_create(&self, sandbox_id: &str, argv: &[String]) -> Result<String, RuntimeError>;

    /// Starts the exec and attaches to its combined output stream.
    async fn exec_attach(&self, exec_id: &str) -> Result<ExecAttachment, RuntimeError>;

    /// Returns the exit code of a finished exec.
    async fn exec_inspect(&self, exec_id: &str) -> Result<i64, RuntimeError>;
}
