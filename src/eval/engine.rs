//! Evaluation engine: submits a file snapshot or a diff plus an instruction
//! to the judgment backend and returns its raw verdict text.
//!
//! The size ceiling bounds the cost and latency of each judgment call. Diff
//! mode skips the backend entirely when the file has no changes.

use std::path::Path;
use std::sync::Arc;

use tokio::process::Command;
use tracing::debug;

use crate::config::RunnerConfig;
use crate::error::EvalError;
use crate::llm::JudgmentBackend;

/// Returned by [`EvaluationEngine::evaluate_diff`] when the file is unchanged.
pub const NO_CHANGES_SENTINEL: &str = "No changes detected";

/// Runs snapshot and diff evaluations. Stateless per call.
#[derive(Clone)]
pub struct EvaluationEngine {
    backend: Arc<dyn JudgmentBackend>,
    size_limit: u64,
}

impl EvaluationEngine {
    /// Creates an engine that rejects snapshots larger than `size_limit` bytes.
    pub fn new(backend: Arc<dyn JudgmentBackend>, size_limit: u64) -> Self {
        Self {
            backend,
            size_limit,
        }
    }

    /// Creates an engine with the size ceiling from `config`.
    pub fn from_config(backend: Arc<dyn JudgmentBackend>, config: &RunnerConfig) -> Self {
        Self::new(backend, config.eval_size_limit)
    }

    pub fn size_limit(&self) -> u64 {
        self.size_limit
    }

    /// Evaluates the full content of `path` against `instruction`.
    ///
    /// # Errors
    ///
    /// `EvalError::SizeLimitExceeded` if the file is larger than the ceiling
    /// (the backend is not called), `EvalError::Io` if it cannot be read, or
    /// `EvalError::Backend` if the judgment call fails.
    pub async fn evaluate_snapshot(
        &self,
        path: impl AsRef<Path>,
        instruction: &str,
    ) -> Result<String, EvalError> {
        let path = path.as_ref();
        self.check_size(tokio::fs::metadata(path).await?.len())?;

        // The file may have grown between the metadata call and the read.
        let content = tokio::fs::read(path).await?;
        let size = content.len() as u64;
        self.check_size(size)?;

        let prompt = snapshot_prompt(path, &String::from_utf8_lossy(&content), instruction);

        debug!(path = %path.display(), bytes = size, "Submitting snapshot for judgment");
        Ok(self.backend.generate(&prompt).await?)
    }

    fn check_size(&self, actual: u64) -> Result<(), EvalError> {
        if actual > self.size_limit {
            return Err(EvalError::SizeLimitExceeded {
                actual,
                limit: self.size_limit,
            });
        }
        Ok(())
    }

    /// Evaluates the uncommitted diff of `path` against `instruction`.
    ///
    /// Returns [`NO_CHANGES_SENTINEL`] without calling the backend when the
    /// diff is empty.
    pub async fn evaluate_diff(
        &self,
        path: impl AsRef<Path>,
        instruction: &str,
    ) -> Result<String, EvalError> {
        let path = path.as_ref();
        let diff = git_diff(path).await?;
        if diff.trim().is_empty() {
            return Ok(NO_CHANGES_SENTINEL.to_string());
        }

        let prompt = diff_prompt(path, &diff, instruction);

        debug!(path = %path.display(), diff_bytes = diff.len(), "Submitting diff for judgment");
        Ok(self.backend.generate(&prompt).await?)
    }
}

fn snapshot_prompt(path: &Path, content: &str, instruction: &str) -> String {
    format!(
        "<file path=\"{}\">\n{}\n</file>\n\n<instruction>\n{}\n</instruction>",
        path.display(),
        content,
        instruction
    )
}

fn diff_prompt(path: &Path, diff: &str, instruction: &str) -> String {
    format!(
        "<diff path=\"{}\">\n{}\n</diff>\n\n<instruction>\n{}\n</instruction>",
        path.display(),
        diff,
        instruction
    )
}

/// Runs `git diff` for a single file from within the file's directory.
async fn git_diff(path: &Path) -> Result<String, EvalError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let file = path.file_name().unwrap_or(path.as_os_str());

    let output = Command::new("git")
        .arg("-C")
        .arg(dir)
        .arg("diff")
        .arg("--")
        .arg(file)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| EvalError::DiffFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(EvalError::DiffFailed {
            path: path.display().to_string(),
            reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
