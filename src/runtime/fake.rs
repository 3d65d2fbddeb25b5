//! In-process fake runtime for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;

use super::{
    ContainerRuntime, ExecAttachment, ExecChunk, SandboxSpec, SandboxSummary, LABEL_MANAGED,
};
use crate::error::RuntimeError;

/// Scripted result for the next exec.
#[derive(Debug, Clone)]
pub struct ScriptedExec {
    pub chunks: Vec<ExecChunk>,
    pub exit_code: i64,
}

impl ScriptedExec {
    pub fn new(stdout: &str, stderr: &str, exit_code: i64) -> Self {
        let mut chunks = Vec::new();
        if !stdout.is_empty() {
            chunks.push(ExecChunk::Stdout(stdout.as_bytes().to_vec()));
        }
        if !stderr.is_empty() {
            chunks.push(ExecChunk::Stderr(stderr.as_bytes().to_vec()));
        }
        Self { chunks, exit_code }
    }
}

#[derive(Debug, Default)]
pub(crate) struct FakeState {
    sandboxes: HashMap<String, (HashMap<String, String>, String)>,
    execs: HashMap<String, (Vec<String>, ScriptedExec)>,
    last_argv: Option<Vec<String>>,
    stopped: Vec<String>,
}

/// Fake container runtime that records calls.
#[derive(Debug, Default)]
pub struct FakeRuntime {
    pub(crate) state: Mutex<FakeState>,
    pub create_calls: AtomicUsize,
    pub start_calls: AtomicUsize,
    pub stop_calls: AtomicUsize,
    pub remove_calls: AtomicUsize,
    /// Number of attach streams dropped so far.
    pub attach_released: Arc<AtomicUsize>,
    pub(crate) next_id: AtomicUsize,
    pub create_delay: Option<Duration>,
    pub stop_delay: Option<Duration>,
    pub fail_create: bool,
    pub fail_start: bool,
    pub fail_stop: bool,
    pub fail_exec_create: bool,
    pub fail_attach: bool,
    pub fail_stream: bool,
    pub fail_inspect: bool,
    /// Ids whose removal fails.
    pub stuck: Vec<String>,
    pub(crate) scripted: Mutex<VecDeque<ScriptedExec>>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds an existing sandbox, e.g. one left by a previous process.
    pub fn seed(&self, id: &str, labels: &[(&str, &str)]) {
        let labels = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.state
            .lock()
            .unwrap()
            .sandboxes
            .insert(id.to_string(), (labels, "exited".to_string()));
    }

    /// Queues the result of a future exec. Unscripted execs succeed silently.
    pub fn script_exec(&self, exec: ScriptedExec) {
        self.scripted.lock().unwrap().push_back(exec);
    }

    pub fn sandbox_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.state.lock().unwrap().sandboxes.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn stopped(&self) -> Vec<String> {
        self.state.lock().unwrap().stopped.clone()
    }

    pub fn last_argv(&self) -> Option<Vec<String>> {
        self.state.lock().unwrap().last_argv.clone()
    }

    pub fn labels_of(&self, id: &str) -> Option<HashMap<String, String>> {
        self.state
            .lock()
            .unwrap()
            .sandboxes
            .get(id)
            .map(|(labels, _)| labels.clone())
    }

    pub fn creates(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.attach_released.load(Ordering::SeqCst)
    }
}

fn injected(op: &str, id: &str) -> String {
    format!("injected {op} failure for {id}")
}

/// Increments a counter when dropped, to observe attach handle release.
struct ReleaseGuard(Arc<AtomicUsize>);

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn create(&self, spec: &SandboxSpec) -> Result<String, RuntimeError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.create_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_create {
            return Err(RuntimeError::CreateFailed {
                project: spec.project().unwrap_or_default().to_string(),
                stack: spec.stack().unwrap_or_default().to_string(),
                reason: "injected".to_string(),
            });
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let id = format!("sandbox-{n}");
        self.state
            .lock()
            .unwrap()
            .sandboxes
            .insert(id.clone(), (spec.labels.clone(), "created".to_string()));
        Ok(id)
    }

    async fn start(&self, id: &str) -> Result<(), RuntimeError> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_start {
            return Err(RuntimeError::StartFailed {
                id: id.to_string(),
                reason: injected("start", id),
            });
        }
        if let Some(entry) = self.state.lock().unwrap().sandboxes.get_mut(id) {
            entry.1 = "running".to_string();
        }
        Ok(())
    }

    async fn stop(&self, id: &str) -> Result<(), RuntimeError> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.stop_delay {
            tokio::time::sleep(delay).await;
        }
        self.state.lock().unwrap().stopped.push(id.to_string());
        if self.fail_stop {
            return Err(RuntimeError::StopFailed {
                id: id.to_string(),
                reason: injected("stop", id),
            });
        }
        Ok(())
    }

    async fn list(
        &self,
        label_filter: &HashMap<String, String>,
    ) -> Result<Vec<SandboxSummary>, RuntimeError> {
        let state = self.state.lock().unwrap();
        let mut out: Vec<_> = state
            .sandboxes
            .iter()
            .filter(|(_, (labels, _))| {
                label_filter
                    .iter()
                    .all(|(k, v)| labels.get(k) == Some(v))
            })
            .map(|(id, (labels, st))| SandboxSummary {
                id: id.clone(),
                labels: labels.clone(),
                state: Some(st.clone()),
            })
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    async fn remove(&self, id: &str, _force: bool) -> Result<(), RuntimeError> {
        self.remove_calls.fetch_add(1, Ordering::SeqCst);
        if self.stuck.iter().any(|s| s == id) {
            return Err(RuntimeError::RemoveFailed {
                id: id.to_string(),
                reason: injected("remove", id),
            });
        }
        match self.state.lock().unwrap().sandboxes.remove(id) {
            Some(_) => Ok(()),
            None => Err(RuntimeError::SandboxNotFound { id: id.to_string() }),
        }
    }

    async fn exec_create(&self, sandbox_id: &str, argv: &[String]) -> Result<String, RuntimeError> {
        if self.fail_exec_create {
            return Err(RuntimeError::ExecCreateFailed {
                id: sandbox_id.to_string(),
                reason: injected("exec create", sandbox_id),
            });
        }
        let scripted = self
            .scripted
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| ScriptedExec::new("", "", 0));
        let mut state = self.state.lock().unwrap();
        let exec_id = format!("exec-{}", state.execs.len());
        state.last_argv = Some(argv.to_vec());
        state.execs.insert(exec_id.clone(), (argv.to_vec(), scripted));
        Ok(exec_id)
    }

    async fn exec_attach(&self, exec_id: &str) -> Result<ExecAttachment, RuntimeError> {
        if self.fail_attach {
            return Err(RuntimeError::ExecAttachFailed {
                id: exec_id.to_string(),
                reason: injected("attach", exec_id),
            });
        }
        let chunks = self
            .state
            .lock()
            .unwrap()
            .execs
            .get(exec_id)
            .map(|(_, s)| s.chunks.clone())
            .unwrap_or_default();

        let mut items: Vec<Result<ExecChunk, RuntimeError>> = chunks.into_iter().map(Ok).collect();
        if self.fail_stream {
            items.push(Err(RuntimeError::ExecStreamFailed {
                id: exec_id.to_string(),
                reason: injected("stream", exec_id),
            }));
        }

        let guard = ReleaseGuard(Arc::clone(&self.attach_released));
        let output = futures::stream::iter(items)
            .map(move |item| {
                let _held = &guard;
                item
            })
            .boxed();

        Ok(ExecAttachment { output })
    }

    async fn exec_inspect(&self, exec_id: &str) -> Result<i64, RuntimeError> {
        if self.fail_inspect {
            return Err(RuntimeError::ExecInspectFailed {
                id: exec_id.to_string(),
                reason: injected("inspect", exec_id),
            });
        }
        self.state
            .lock()
            .unwrap()
            .execs
            .get(exec_id)
            .map(|(_, s)| s.exit_code)
            .ok_or_else(|| RuntimeError::ExecInspectFailed {
                id: exec_id.to_string(),
                reason: "unknown exec".to_string(),
            })
    }
}

/// Convenience: the labels of a managed sandbox.
pub fn managed_labels<'a>(project: &'a str, stack: &'a str) -> Vec<(&'a str, &'a str)> {
    vec![
        (LABEL_MANAGED, "true"),
        (super::LABEL_PROJECT, project),
        (super::LABEL_STACK, stack),
    ]
}
