//! In-memory fakes for the store and notifier traits.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, OnceLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::db::{db_timestamp, BotMessage, NewTask, Task, UserSettings};
use crate::error::NaggerError;
use crate::lifecycle::TaskStatus;
use crate::notifier::Notifier;
use crate::schedule::ReminderTime;
use crate::store::{MessageTrackingStore, SettingsStore, TaskStore};

pub fn env_lock() -> MutexGuard<'static, ()> {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .expect("env lock poisoned")
}

#[derive(Default)]
struct MemoryState {
    next_task_id: i64,
    tasks: BTreeMap<i64, Task>,
    settings: HashMap<i64, UserSettings>,
    next_message_id: i64,
    messages: BTreeMap<i64, BotMessage>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    pub fail_task_reads: AtomicBool,
    pub fail_settings_reads: AtomicBool,
    pub fail_untrack: AtomicBool,
    pub untrack_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().expect("memory store poisoned")
    }

    pub fn seed_task(&self, chat_id: i64, description: &str, status: TaskStatus) -> i64 {
        let mut state = self.state();
        state.next_task_id += 1;
        let id = state.next_task_id;
        state.tasks.insert(
            id,
            Task {
                id,
                chat_id,
                user_id: 1,
                description: description.to_string(),
                created_at: db_timestamp(Utc::now()),
                status,
                completed_at: None,
            },
        );
        id
    }

    pub fn seed_settings(&self, chat_id: i64, reminder_time: &str, timezone: &str) {
        let now = db_timestamp(Utc::now());
        self.state().settings.insert(
            chat_id,
            UserSettings {
                chat_id,
                user_id: 1,
                reminder_time: reminder_time.to_string(),
                timezone: timezone.to_string(),
                created_at: now.clone(),
                updated_at: now,
            },
        );
    }

    pub fn seed_message(&self, chat_id: i64, message_id: i32, sent_at: DateTime<Utc>) -> i64 {
        let mut state = self.state();
        state.next_message_id += 1;
        let id = state.next_message_id;
        state.messages.insert(
            id,
            BotMessage {
                id,
                chat_id,
                message_id,
                sent_at: db_timestamp(sent_at),
            },
        );
        id
    }

    pub fn message_count(&self) -> usize {
        self.state().messages.len()
    }

    pub fn task(&self, task_id: i64) -> Option<Task> {
        self.state().tasks.get(&task_id).cloned()
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn add_task(&self, task: NewTask) -> Result<Task, NaggerError> {
        let id = self.seed_task(task.chat_id, &task.description, TaskStatus::Active);
        self.task(id).ok_or(NaggerError::TaskNotFound(id))
    }

    async fn get_task(&self, task_id: i64) -> Result<Option<Task>, NaggerError> {
        Ok(self.task(task_id))
    }

    async fn tasks_eligible_for_reminder(&self, chat_id: i64) -> Result<Vec<Task>, NaggerError> {
        Ok(self
            .state()
            .tasks
            .values()
            .filter(|t| t.chat_id == chat_id && t.status.is_eligible_for_reminder())
            .cloned()
            .collect())
    }

    async fn all_eligible_tasks_grouped_by_chat(
        &self,
    ) -> Result<BTreeMap<i64, Vec<Task>>, NaggerError> {
        if self.fail_task_reads.load(Ordering::SeqCst) {
            return Err(NaggerError::Transport("task store offline".into()));
        }
        let mut grouped: BTreeMap<i64, Vec<Task>> = BTreeMap::new();
        for task in self.state().tasks.values() {
            if task.status.is_eligible_for_reminder() {
                grouped.entry(task.chat_id).or_default().push(task.clone());
            }
        }
        Ok(grouped)
    }

    async fn set_status(
        &self,
        task_id: i64,
        status: TaskStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<(), NaggerError> {
        let mut state = self.state();
        let task = state
            .tasks
            .get_mut(&task_id)
            .ok_or(NaggerError::TaskNotFound(task_id))?;
        if task.status.is_terminal() {
            return Err(NaggerError::InvalidTransition {
                from: task.status,
                action: "update",
            });
        }
        task.status = status;
        task.completed_at = completed_at.map(db_timestamp);
        Ok(())
    }

    async fn delete_task(&self, task_id: i64) -> Result<(), NaggerError> {
        self.state()
            .tasks
            .remove(&task_id)
            .map(|_| ())
            .ok_or(NaggerError::TaskNotFound(task_id))
    }
}

#[async_trait]
impl SettingsStore for MemoryStore {
    async fn get_settings(&self, chat_id: i64) -> Result<Option<UserSettings>, NaggerError> {
        Ok(self.state().settings.get(&chat_id).cloned())
    }

    async fn get_all_settings(&self) -> Result<HashMap<i64, UserSettings>, NaggerError> {
        if self.fail_settings_reads.load(Ordering::SeqCst) {
            return Err(NaggerError::Transport("settings store offline".into()));
        }
        Ok(self.state().settings.clone())
    }

    async fn upsert_settings(
        &self,
        chat_id: i64,
        user_id: i64,
        reminder_time: &ReminderTime,
        timezone: Tz,
    ) -> Result<UserSettings, NaggerError> {
        let now = db_timestamp(Utc::now());
        let mut state = self.state();
        let created_at = state
            .settings
            .get(&chat_id)
            .map(|s| s.created_at.clone())
            .unwrap_or_else(|| now.clone());
        let settings = UserSettings {
            chat_id,
            user_id,
            reminder_time: reminder_time.to_string(),
            timezone: timezone.name().to_string(),
            created_at,
            updated_at: now,
        };
        state.settings.insert(chat_id, settings.clone());
        Ok(settings)
    }
}

#[async_trait]
impl MessageTrackingStore for MemoryStore {
    async fn track(&self, chat_id: i64, message_id: i32) -> Result<i64, NaggerError> {
        Ok(self.seed_message(chat_id, message_id, Utc::now()))
    }

    async fn messages_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<BotMessage>, NaggerError> {
        let cutoff = db_timestamp(cutoff);
        Ok(self
            .state()
            .messages
            .values()
            .filter(|m| m.sent_at < cutoff)
            .cloned()
            .collect())
    }

    async fn untrack(&self, id: i64) -> Result<(), NaggerError> {
        self.untrack_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_untrack.load(Ordering::SeqCst) {
            return Err(NaggerError::Transport("message store offline".into()));
        }
        self.state()
            .messages
            .remove(&id)
            .map(|_| ())
            .ok_or(NaggerError::MessageNotFound(id))
    }
}

/// Records every call. Chats listed in `fail_chats` get an error and chats in
/// `hang_chats` never complete.
#[derive(Default)]
pub struct RecordingNotifier {
    pub reminders: Mutex<Vec<(i64, Vec<i64>)>>,
    pub deletes: Mutex<Vec<(i64, i32)>>,
    pub fail_chats: Mutex<HashSet<i64>>,
    pub hang_chats: Mutex<HashSet<i64>>,
    pub fail_deletes: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_for(&self, chat_id: i64) {
        self.fail_chats.lock().unwrap().insert(chat_id);
    }

    pub fn hang_for(&self, chat_id: i64) {
        self.hang_chats.lock().unwrap().insert(chat_id);
    }

    pub fn reminded_chats(&self) -> Vec<i64> {
        self.reminders
            .lock()
            .unwrap()
            .iter()
            .map(|(chat_id, _)| *chat_id)
            .collect()
    }

    pub fn delete_count(&self) -> usize {
        self.deletes.lock().unwrap().len()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send_reminder(&self, chat_id: i64, tasks: &[Task]) -> Result<(), String> {
        let hang = self.hang_chats.lock().unwrap().contains(&chat_id);
        if hang {
            std::future::pending::<()>().await;
        }
        let fail = self.fail_chats.lock().unwrap().contains(&chat_id);
        if fail {
            return Err(format!("chat {chat_id} unreachable"));
        }
        self.reminders
            .lock()
            .unwrap()
            .push((chat_id, tasks.iter().map(|t| t.id).collect()));
        Ok(())
    }

    async fn delete_message(&self, chat_id: i64, message_id: i32) -> Result<(), String> {
        self.deletes.lock().unwrap().push((chat_id, message_id));
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err("message can't be deleted".into());
        }
        Ok(())
    }
}
