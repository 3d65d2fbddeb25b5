//! Prometheus metrics registration and export.
//!
//! All recording helpers are no-ops until [`init_metrics`] has been called,
//! so library users that never initialize metrics pay nothing.

use prometheus::{Counter, CounterVec, Encoder, Opts, Registry, TextEncoder};
use std::sync::OnceLock;

/// Registry and every collector registered with it.
struct Metrics {
    registry: Registry,
    /// Sandboxes created by the pool, labeled by stack.
    sandboxes_created: CounterVec,
    /// Sandboxes stopped by the idle monitor.
    sandboxes_evicted: Counter,
    /// Orphaned sandboxes removed by the startup reaper.
    sandboxes_reaped: Counter,
    /// Gate runs, labeled by gate type and outcome (pass/fail/error).
    gate_runs_total: CounterVec,
    /// Tasks moved to BLOCKED by the attempt breaker.
    tasks_blocked: Counter,
}

impl Metrics {
    fn build() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let sandboxes_created = CounterVec::new(
            Opts::new("monarch_sandboxes_created_total", "Sandboxes created by the pool"),
            &["stack"],
        )?;
        let sandboxes_evicted = Counter::new(
            "monarch_sandboxes_evicted_total",
            "Idle sandboxes stopped by the monitor",
        )?;
        let sandboxes_reaped = Counter::new(
            "monarch_sandboxes_reaped_total",
            "Orphaned sandboxes removed at startup",
        )?;
        let gate_runs_total = CounterVec::new(
            Opts::new("monarch_gate_runs_total", "Gate runs by type and outcome"),
            &["type", "outcome"],
        )?;
        let tasks_blocked = Counter::new(
            "monarch_tasks_blocked_total",
            "Tasks blocked by the attempt circuit breaker",
        )?;

        registry.register(Box::new(sandboxes_created.clone()))?;
        registry.register(Box::new(sandboxes_evicted.clone()))?;
        registry.register(Box::new(sandboxes_reaped.clone()))?;
        registry.register(Box::new(gate_runs_total.clone()))?;
        registry.register(Box::new(tasks_blocked.clone()))?;

        Ok(Self {
            registry,
            sandboxes_created,
            sandboxes_evicted,
            sandboxes_reaped,
            gate_runs_total,
            tasks_blocked,
        })
    }
}

/// Global metrics; the exported registry and the recorded counters are
/// always the same set.
static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Calling this more than once, or from several threads at once, is
/// harmless: the first set of metrics to be installed wins.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric construction or registration fails.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    if METRICS.get().is_some() {
        return Ok(());
    }

    let metrics = Metrics::build()?;
    if METRICS.set(metrics).is_ok() {
        tracing::info!("Prometheus metrics initialized successfully");
    }

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
pub fn export_metrics() -> String {
    let Some(metrics) = METRICS.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = metrics.registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}

pub fn record_sandbox_created(stack: &str) {
    if let Some(metrics) = METRICS.get() {
        metrics.sandboxes_created.with_label_values(&[stack]).inc();
    }
}

pub fn record_sandbox_evicted() {
    if let Some(metrics) = METRICS.get() {
        metrics.sandboxes_evicted.inc();
    }
}

pub fn record_sandbox_reaped() {
    if let Some(metrics) = METRICS.get() {
        metrics.sandboxes_reaped.inc();
    }
}

/// Records one gate run. `outcome` is `pass`, `fail` or `error`.
pub fn record_gate_run(kind: &str, outcome: &str) {
    if let Some(metrics) = METRICS.get() {
        metrics.gate_runs_total.with_label_values(&[kind, outcome]).inc();
    }
}

pub fn record_task_blocked() {
    if let Some(metrics) = METRICS.get() {
        metrics.tasks_blocked.inc();
    }
}
