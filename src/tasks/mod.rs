//! Task state and the attempt circuit breaker.
//!
//! Tasks are owned by an external system; this crate only reads them, moves
//! their status, and counts verification attempts through a [`TaskStore`].

pub mod breaker;
pub mod memory;
pub mod sqlite;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;

pub use breaker::{Admission, AttemptBreaker};
pub use memory::InMemoryTaskStore;
pub use sqlite::SqliteTaskStore;

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Todo,
    InProgress,
    Blocked,
    Done,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Todo => "TODO",
            TaskStatus::InProgress => "IN_PROGRESS",
            TaskStatus::Blocked => "BLOCKED",
            TaskStatus::Done => "DONE",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TODO" => Ok(TaskStatus::Todo),
            "IN_PROGRESS" => Ok(TaskStatus::InProgress),
            "BLOCKED" => Ok(TaskStatus::Blocked),
            "DONE" => Ok(TaskStatus::Done),
            other => Err(StoreError::InvalidValue(format!("unknown task status '{}'", other))),
        }
    }
}

/// A task as seen by the breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: Uuid,
    pub project_id: String,
    pub status: TaskStatus,
    pub attempt_count: u32,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    /// A fresh `TODO` task with no attempts.
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id: project_id.into(),
            status: TaskStatus::Todo,
            attempt_count: 0,
            updated_at: Utc::now(),
        }
    }
}

/// Persistence seam for task state.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn get_task(&self, id: Uuid) -> Result<TaskRecord, StoreError>;

    async fn update_status(&self, id: Uuid, status: TaskStatus) -> Result<(), StoreError>;

    /// Increments the attempt count only if it is below `ceiling`.
    ///
    /// The check and the increment happen as one step, so concurrent callers
    /// can never push the count past the ceiling.
    async fn increment_attempt_below(
        &self,
        id: Uuid,
        ceiling: u32,
    ) -> Result<AttemptOutcome, StoreError>;
}

/// Result of a conditional attempt increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// The attempt was counted; holds the new count.
    Recorded(u32),
    /// The count had already reached the ceiling; holds the unchanged count.
    Exhausted(u32),
}
