//! Async store seams used by the scheduler, the retention sweeper and the
//! command handlers. `SqliteStore` is the only production implementation;
//! tests substitute in-memory fakes where a database is not wanted.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use nagger_core::error::NaggerError;
use nagger_core::lifecycle::TaskStatus;
use nagger_core::schedule::ReminderTime;

use crate::db::{call_blocking, db_timestamp, BotMessage, Database, NewTask, Task, UserSettings};

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn add_task(&self, task: NewTask) -> Result<Task, NaggerError>;
    async fn get_task(&self, task_id: i64) -> Result<Option<Task>, NaggerError>;
    async fn tasks_eligible_for_reminder(&self, chat_id: i64) -> Result<Vec<Task>, NaggerError>;
    async fn all_eligible_tasks_grouped_by_chat(
        &self,
    ) -> Result<BTreeMap<i64, Vec<Task>>, NaggerError>;
    /// Fails with `TaskNotFound` when no row matched and with
    /// `InvalidTransition` when the stored task is already closed.
    async fn set_status(
        &self,
        task_id: i64,
        status: TaskStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<(), NaggerError>;
    async fn delete_task(&self, task_id: i64) -> Result<(), NaggerError>;
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get_settings(&self, chat_id: i64) -> Result<Option<UserSettings>, NaggerError>;
    async fn get_all_settings(&self) -> Result<HashMap<i64, UserSettings>, NaggerError>;
    async fn upsert_settings(
        &self,
        chat_id: i64,
        user_id: i64,
        reminder_time: &ReminderTime,
        timezone: Tz,
    ) -> Result<UserSettings, NaggerError>;
}

#[async_trait]
pub trait MessageTrackingStore: Send + Sync {
    async fn track(&self, chat_id: i64, message_id: i32) -> Result<i64, NaggerError>;
    async fn messages_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<BotMessage>, NaggerError>;
    async fn untrack(&self, id: i64) -> Result<(), NaggerError>;
}

#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Database>,
}

impl SqliteStore {
    pub fn new(db: Arc<Database>) -> Self {
        SqliteStore { db }
    }

    pub fn database(&self) -> Arc<Database> {
        self.db.clone()
    }
}

#[async_trait]
impl TaskStore for SqliteStore {
    async fn add_task(&self, task: NewTask) -> Result<Task, NaggerError> {
        call_blocking(self.db.clone(), move |db| {
            let id = db.insert_task(&task)?;
            db.get_task(id)?.ok_or(NaggerError::TaskNotFound(id))
        })
        .await
    }

    async fn get_task(&self, task_id: i64) -> Result<Option<Task>, NaggerError> {
        call_blocking(self.db.clone(), move |db| db.get_task(task_id)).await
    }

    async fn tasks_eligible_for_reminder(&self, chat_id: i64) -> Result<Vec<Task>, NaggerError> {
        call_blocking(self.db.clone(), move |db| db.get_eligible_tasks_for_chat(chat_id)).await
    }

    async fn all_eligible_tasks_grouped_by_chat(
        &self,
    ) -> Result<BTreeMap<i64, Vec<Task>>, NaggerError> {
        let tasks = call_blocking(self.db.clone(), |db| db.get_all_eligible_tasks()).await?;
        let mut grouped: BTreeMap<i64, Vec<Task>> = BTreeMap::new();
        for task in tasks {
            grouped.entry(task.chat_id).or_default().push(task);
        }
        Ok(grouped)
    }

    async fn set_status(
        &self,
        task_id: i64,
        status: TaskStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<(), NaggerError> {
        let stamp = completed_at.map(db_timestamp);
        call_blocking(self.db.clone(), move |db| {
            if db.update_task_status(task_id, status, stamp.as_deref())? {
                return Ok(());
            }
            match db.get_task(task_id)? {
                Some(task) => Err(NaggerError::InvalidTransition {
                    from: task.status,
                    action: "update",
                }),
                None => Err(NaggerError::TaskNotFound(task_id)),
            }
        })
        .await
    }

    async fn delete_task(&self, task_id: i64) -> Result<(), NaggerError> {
        let deleted = call_blocking(self.db.clone(), move |db| db.delete_task(task_id)).await?;
        if deleted {
            Ok(())
        } else {
            Err(NaggerError::TaskNotFound(task_id))
        }
    }
}

#[async_trait]
impl SettingsStore for SqliteStore {
    async fn get_settings(&self, chat_id: i64) -> Result<Option<UserSettings>, NaggerError> {
        call_blocking(self.db.clone(), move |db| db.get_user_settings(chat_id)).await
    }

    async fn get_all_settings(&self) -> Result<HashMap<i64, UserSettings>, NaggerError> {
        let rows = call_blocking(self.db.clone(), |db| db.get_all_user_settings()).await?;
        Ok(rows.into_iter().map(|s| (s.chat_id, s)).collect())
    }

    async fn upsert_settings(
        &self,
        chat_id: i64,
        user_id: i64,
        reminder_time: &ReminderTime,
        timezone: Tz,
    ) -> Result<UserSettings, NaggerError> {
        let time = reminder_time.as_str().to_string();
        let tz = timezone.name().to_string();
        let now = db_timestamp(Utc::now());
        call_blocking(self.db.clone(), move |db| {
            db.upsert_user_settings(chat_id, user_id, &time, &tz, &now)?;
            db.get_user_settings(chat_id)?.ok_or_else(|| {
                NaggerError::Config(format!("settings for chat {chat_id} vanished after upsert"))
            })
        })
        .await
    }
}

#[async_trait]
impl MessageTrackingStore for SqliteStore {
    async fn track(&self, chat_id: i64, message_id: i32) -> Result<i64, NaggerError> {
        let sent_at = db_timestamp(Utc::now());
        call_blocking(self.db.clone(), move |db| {
            db.insert_bot_message(chat_id, message_id, &sent_at)
        })
        .await
    }

    async fn messages_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<BotMessage>, NaggerError> {
        let cutoff = db_timestamp(cutoff);
        call_blocking(self.db.clone(), move |db| db.get_bot_messages_older_than(&cutoff)).await
    }

    async fn untrack(&self, id: i64) -> Result<(), NaggerError> {
        let deleted = call_blocking(self.db.clone(), move |db| db.delete_bot_message(id)).await?;
        if deleted {
            Ok(())
        } else {
            Err(NaggerError::MessageNotFound(id))
        }
    }
}
