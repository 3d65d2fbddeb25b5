//! In-process task store.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{AttemptOutcome, TaskRecord, TaskStatus, TaskStore};
use crate::error::StoreError;

/// Task store backed by a map. State is lost when the process exits.
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    tasks: RwLock<HashMap<Uuid, TaskRecord>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a task.
    pub async fn insert(&self, task: TaskRecord) {
        self.tasks.write().await.insert(task.id, task);
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn get_task(&self, id: Uuid) -> Result<TaskRecord, StoreError> {
        self.tasks
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::TaskNotFound(id.to_string()))
    }

    async fn update_status(&self, id: Uuid, status: TaskStatus) -> Result<(), StoreError> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(&id)
            .ok_or_else(|| StoreError::TaskNotFound(id.to_string()))?;
        task.status = status;
        task.updated_at = Utc::now();
        Ok(())
    }

    async fn increment_attempt_below(
        &self,
        id: Uuid,
        ceiling: u32,
    ) -> Result<AttemptOutcome, StoreError> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(&id)
            .ok_or_else(|| StoreError::TaskNotFound(id.to_string()))?;
        if task.attempt_count >= ceiling {
            return Ok(AttemptOutcome::Exhausted(task.attempt_count));
        }
        task.attempt_count += 1;
        task.updated_at = Utc::now();
        Ok(AttemptOutcome::Recorded(task.attempt_count))
    }
}
