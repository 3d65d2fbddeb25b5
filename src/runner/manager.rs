//! Sandbox pool: one live sandbox per (project, stack) pair.
//!
//! The pool owns the binding map exclusively. Lookups take the shared lock;
//! a miss escalates to the exclusive lock, re-checks, and only then creates,
//! so concurrent first callers for a pair trigger exactly one creation and all
//! observe the same sandbox id. The exclusive lock is held across the
//! create/start calls on that path, so creation is serialized pool-wide.
//! Eviction and drain unbind under the lock and stop sandboxes after
//! releasing it.
//!
//! Idle sandboxes are evicted by a background monitor started with
//! [`SandboxPool::start_monitor`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::RunnerConfig;
use crate::error::RuntimeError;
use crate::metrics;
use crate::runtime::{ContainerRuntime, SandboxSpec};

/// A live sandbox bound to a (project, stack) pair.
#[derive(Debug)]
struct SandboxBinding {
    sandbox_id: String,
    last_used: Mutex<Instant>,
}

impl SandboxBinding {
    fn new(sandbox_id: String) -> Self {
        Self {
            sandbox_id,
            last_used: Mutex::new(Instant::now()),
        }
    }

    fn touch(&self) {
        let mut last = self.last_used.lock().unwrap_or_else(|p| p.into_inner());
        *last = Instant::now();
    }

    fn idle_for(&self, now: Instant) -> Duration {
        let last = self.last_used.lock().unwrap_or_else(|p| p.into_inner());
        now.saturating_duration_since(*last)
    }
}

/// Read-only view of a binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingInfo {
    pub project_id: String,
    pub stack: String,
    pub sandbox_id: String,
    pub idle: Duration,
}

/// project id -> stack -> binding
type BindingMap = HashMap<String, HashMap<String, SandboxBinding>>;

/// Pool of reusable sandboxes keyed by project and stack.
pub struct SandboxPool {
    runtime: Arc<dyn ContainerRuntime>,
    config: RunnerConfig,
    bindings: RwLock<BindingMap>,
}

impl SandboxPool {
    /// Creates an empty pool. Bindings are never persisted; after a restart
    /// they are rebuilt lazily on demand.
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: RunnerConfig) -> Self {
        Self {
            runtime,
            config,
            bindings: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the sandbox bound to `project_id`/`stack`, creating and
    /// starting one if none exists.
    ///
    /// # Errors
    ///
    /// Returns the runtime error if creation or start fails. No binding is
    /// registered in that case.
    pub async fn get_or_start(&self, project_id: &str, stack: &str) -> Result<String, RuntimeError> {
        {
            let bindings = self.bindings.read().await;
            if let Some(binding) = lookup(&bindings, project_id, stack) {
                binding.touch();
                debug!(project = project_id, stack = stack, sandbox = %binding.sandbox_id, "Reusing sandbox");
                return Ok(binding.sandbox_id.clone());
            }
        }

        let mut bindings = self.bindings.write().await;

        // Another caller may have created it while we waited for the write lock.
        if let Some(binding) = lookup(&bindings, project_id, stack) {
            binding.touch();
            return Ok(binding.sandbox_id.clone());
        }

        let sandbox_id = self.start_sandbox(project_id, stack).await?;
        bindings
            .entry(project_id.to_string())
            .or_default()
            .insert(stack.to_string(), SandboxBinding::new(sandbox_id.clone()));

        Ok(sandbox_id)
    }

    async fn start_sandbox(&self, project_id: &str, stack: &str) -> Result<String, RuntimeError> {
        let image = self.config.image_for_stack(stack);
        let spec = SandboxSpec::managed(image, self.config.sandbox_cmd.clone(), project_id, stack);

        let sandbox_id = self.runtime.create(&spec).await?;

        if let Err(e) = self.runtime.start(&sandbox_id).await {
            // Never register a half-created sandbox. Removal is best-effort;
            // the reaper catches anything left behind.
            if let Err(remove_err) = self.runtime.remove(&sandbox_id, true).await {
                warn!(sandbox = %sandbox_id, error = %remove_err, "Failed to remove sandbox after start failure");
            }
            return Err(e);
        }

        metrics::record_sandbox_created(stack);
        info!(project = project_id, stack = stack, image = image, sandbox = %sandbox_id, "Sandbox started");
        Ok(sandbox_id)
    }

    /// Stops and unbinds every sandbox idle for longer than `idle_timeout`.
    ///
    /// Expired bindings are removed under the exclusive lock; the stop calls
    /// run after it is released, so lookups for other pairs are not blocked
    /// by a slow runtime. Stop failures are logged. Returns the number of
    /// evicted bindings.
    pub async fn evict_idle(&self, idle_timeout: Duration) -> usize {
        let expired = {
            let mut bindings = self.bindings.write().await;
            let now = Instant::now();
            let mut expired = Vec::new();

            for (project, stacks) in bindings.iter_mut() {
                let stale: Vec<String> = stacks
                    .iter()
                    .filter(|(_, b)| b.idle_for(now) > idle_timeout)
                    .map(|(stack, _)| stack.clone())
                    .collect();
                for stack in stale {
                    if let Some(binding) = stacks.remove(&stack) {
                        expired.push((project.clone(), stack, binding.sandbox_id));
                    }
                }
            }
            bindings.retain(|_, stacks| !stacks.is_empty());
            expired
        };

        for (project, stack, sandbox_id) in &expired {
            if let Err(e) = self.runtime.stop(sandbox_id).await {
                warn!(project = %project, stack = %stack, sandbox = %sandbox_id, error = %e, "Failed to stop idle sandbox");
            } else {
                info!(project = %project, stack = %stack, sandbox = %sandbox_id, "Stopped idle sandbox");
            }
            metrics::record_sandbox_evicted();
        }

        expired.len()
    }

    /// Spawns the idle monitor.
    ///
    /// Every `interval` the monitor evicts sandboxes idle past `idle_timeout`.
    /// It exits when `shutdown` fires or its sender is dropped, without a
    /// final sweep.
    pub fn start_monitor(
        self: &Arc<Self>,
        interval: Duration,
        idle_timeout: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let pool = Arc::clone(self);

        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tick.tick().await; // skip the immediate first tick

            loop {
                tokio::select! {
                    _ = shutdown.recv() => {
                        debug!("Sandbox monitor shutting down");
                        break;
                    }
                    _ = tick.tick() => {
                        let evicted = pool.evict_idle(idle_timeout).await;
                        if evicted > 0 {
                            info!(evicted = evicted, "Evicted idle sandboxes");
                        }
                    }
                }
            }
        })
    }

    /// Stops every bound sandbox and clears the pool. Used at process
    /// teardown; failures are logged.
    pub async fn drain(&self) -> usize {
        let drained: Vec<(String, HashMap<String, SandboxBinding>)> =
            self.bindings.write().await.drain().collect();
        let mut stopped = 0;

        for (project, stacks) in drained {
            for (stack, binding) in stacks {
                match self.runtime.stop(&binding.sandbox_id).await {
                    Ok(()) => stopped += 1,
                    Err(e) => {
                        warn!(project = %project, stack = %stack, sandbox = %binding.sandbox_id, error = %e, "Failed to stop sandbox during drain")
                    }
                }
            }
        }

        stopped
    }

    /// Snapshot of the current bindings, sorted by project then stack.
    pub async fn bindings(&self) -> Vec<BindingInfo> {
        let bindings = self.bindings.read().await;
        let now = Instant::now();

        let mut out: Vec<BindingInfo> = bindings
            .iter()
            .flat_map(|(project, stacks)| {
                stacks.iter().map(move |(stack, b)| BindingInfo {
                    project_id: project.clone(),
                    stack: stack.clone(),
                    sandbox_id: b.sandbox_id.clone(),
                    idle: b.idle_for(now),
                })
            })
            .collect();
        out.sort_by(|a, b| (&a.project_id, &a.stack).cmp(&(&b.project_id, &b.stack)));
        out
    }

    /// Number of live bindings.
    pub async fn len(&self) -> usize {
        self.bindings.read().await.values().map(HashMap::len).sum()
    }

    /// Whether the pool holds no bindings.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn lookup<'a>(bindings: &'a BindingMap, project_id: &str, stack: &str) -> Option<&'a SandboxBinding> {
    bindings.get(project_id).and_then(|stacks| stacks.get(stack))
}
