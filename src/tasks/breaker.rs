//! Attempt circuit breaker.
//!
//! Every submitted attempt on a task is counted. Once the count reaches the
//! ceiling the task is forced to `BLOCKED` and further submissions are
//! refused until someone outside this crate resets it. The breaker never
//! resets itself.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use super::{AttemptOutcome, TaskStatus, TaskStore};
use crate::config::{RunnerConfig, DEFAULT_MAX_ATTEMPTS};
use crate::error::BreakerError;
use crate::metrics;

/// A permitted attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Admission {
    /// Attempt count after this submission was recorded.
    pub attempt: u32,
    pub max_attempts: u32,
}

pub struct AttemptBreaker {
    store: Arc<dyn TaskStore>,
    max_attempts: u32,
}

impl AttemptBreaker {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self {
            store,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Uses the attempt ceiling from `config`.
    pub fn from_config(store: Arc<dyn TaskStore>, config: &RunnerConfig) -> Self {
        Self::new(store).with_max_attempts(config.max_attempts)
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Marks a task `IN_PROGRESS`.
    pub async fn claim(&self, task_id: &str) -> Result<(), BreakerError> {
        let id = parse_task_id(task_id)?;
        self.store.update_status(id, TaskStatus::InProgress).await?;
        info!(task = %id, "Task claimed");
        Ok(())
    }

    /// Records one verification attempt, or blocks the task if the ceiling
    /// has been reached.
    ///
    /// # Errors
    ///
    /// `BreakerError::InvalidTaskId` if `task_id` is not a UUID,
    /// `BreakerError::Blocked` if the task already used all its attempts (the
    /// count is not incremented), or a store error.
    pub async fn submit(&self, task_id: &str) -> Result<Admission, BreakerError> {
        let id = parse_task_id(task_id)?;

        let attempts = match self.store.increment_attempt_below(id, self.max_attempts).await? {
            AttemptOutcome::Recorded(attempt) => {
                info!(task = %id, attempt = attempt, max = self.max_attempts, "Attempt admitted");
                return Ok(Admission {
                    attempt,
                    max_attempts: self.max_attempts,
                });
            }
            AttemptOutcome::Exhausted(attempts) => attempts,
        };

        if let Err(e) = self.store.update_status(id, TaskStatus::Blocked).await {
            warn!(task = %id, error = %e, "Failed to persist BLOCKED status");
        }
        metrics::record_task_blocked();
        warn!(task = %id, attempts = attempts, "Task blocked by attempt ceiling");
        Err(BreakerError::Blocked {
            task_id: id.to_string(),
            attempts,
        })
    }
}

fn parse_task_id(task_id: &str) -> Result<Uuid, BreakerError> {
    Uuid::parse_str(task_id.trim()).map_err(|_| BreakerError::InvalidTaskId(task_id.to_string()))
}
