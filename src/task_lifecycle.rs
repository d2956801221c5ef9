use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::db::{db_timestamp, Task};
use crate::error::NaggerError;
use crate::lifecycle::{self, LifecycleAction};
use crate::store::TaskStore;

/// Applies lifecycle transitions to stored tasks. The state machine decides,
/// the store persists.
#[derive(Clone)]
pub struct TaskLifecycle {
    tasks: Arc<dyn TaskStore>,
}

impl TaskLifecycle {
    pub fn new(tasks: Arc<dyn TaskStore>) -> Self {
        Self { tasks }
    }

    pub async fn complete(&self, task_id: i64) -> Result<Task, NaggerError> {
        self.transition(task_id, LifecycleAction::Complete, Utc::now())
            .await
    }

    pub async fn reactivate(&self, task_id: i64) -> Result<Task, NaggerError> {
        self.transition(task_id, LifecycleAction::Reactivate, Utc::now())
            .await
    }

    pub async fn close(&self, task_id: i64) -> Result<Task, NaggerError> {
        self.transition(task_id, LifecycleAction::Close, Utc::now())
            .await
    }

    /// Button press from a reminder. A task owned by another chat is reported
    /// as not found.
    pub async fn toggle_in_chat(&self, chat_id: i64, task_id: i64) -> Result<Task, NaggerError> {
        let task = self.load(task_id).await?;
        if task.chat_id != chat_id {
            return Err(NaggerError::TaskNotFound(task_id));
        }
        self.apply_to(task, LifecycleAction::Toggle, Utc::now()).await
    }

    /// Physical removal. Not a status transition, so Closed tasks can be deleted too.
    pub async fn delete(&self, task_id: i64) -> Result<(), NaggerError> {
        self.tasks.delete_task(task_id).await?;
        info!("Lifecycle: deleted task #{}", task_id);
        Ok(())
    }

    async fn load(&self, task_id: i64) -> Result<Task, NaggerError> {
        self.tasks
            .get_task(task_id)
            .await?
            .ok_or(NaggerError::TaskNotFound(task_id))
    }

    async fn transition(
        &self,
        task_id: i64,
        action: LifecycleAction,
        now: DateTime<Utc>,
    ) -> Result<Task, NaggerError> {
        let task = self.load(task_id).await?;
        self.apply_to(task, action, now).await
    }

    async fn apply_to(
        &self,
        task: Task,
        action: LifecycleAction,
        now: DateTime<Utc>,
    ) -> Result<Task, NaggerError> {
        let change = lifecycle::apply(action, task.status, task.completed_at_utc(), now)?;
        self.tasks
            .set_status(task.id, change.status, change.completed_at)
            .await?;
        info!(
            "Lifecycle: task #{} {} -> {} ({})",
            task.id,
            task.status.as_str(),
            change.status.as_str(),
            action.as_str()
        );
        Ok(Task {
            status: change.status,
            completed_at: change.completed_at.map(db_timestamp),
            ..task
        })
    }
}
