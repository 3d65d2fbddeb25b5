//! Startup cleanup of sandboxes orphaned by a previous process.

use std::collections::HashMap;

use tracing::{info, warn};

use crate::error::RuntimeError;
use crate::metrics;
use crate::runtime::{ContainerRuntime, LABEL_MANAGED};

/// Force-removes every sandbox carrying the managed label, in any state.
///
/// Meant to run once at startup, before the pool serves requests. A sandbox
/// that fails to be removed is skipped so one stuck sandbox does not block the
/// rest. Returns the number of sandboxes removed.
///
/// # Errors
///
/// Returns an error only if the sandboxes cannot be listed.
pub async fn reap_zombies(runtime: &dyn ContainerRuntime) -> Result<usize, RuntimeError> {
    let filter = HashMap::from([(LABEL_MANAGED.to_string(), "true".to_string())]);
    let sandboxes = runtime.list(&filter).await?;

    let mut removed = 0;
    for sandbox in &sandboxes {
        match runtime.remove(&sandbox.id, true).await {
            Ok(()) => {
                removed += 1;
                metrics::record_sandbox_reaped();
            }
            Err(e) => {
                warn!(sandbox = %sandbox.id, error = %e, "Failed to reap sandbox");
            }
        }
    }

    if removed > 0 {
        info!(removed = removed, found = sandboxes.len(), "Reaped zombie sandboxes");
    }

    Ok(removed)
}
