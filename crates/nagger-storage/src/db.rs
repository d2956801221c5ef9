use rusqlite::OptionalExtension;
use rusqlite::{params, Connection, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use nagger_core::error::NaggerError;
use nagger_core::lifecycle::TaskStatus;

const SCHEMA_VERSION_CURRENT: i64 = 2;
const DB_FILE_NAME: &str = "nagger.db";

pub struct Database {
    conn: Mutex<Connection>,
}

pub async fn call_blocking<T, F>(db: std::sync::Arc<Database>, f: F) -> Result<T, NaggerError>
where
    T: Send + 'static,
    F: FnOnce(&Database) -> Result<T, NaggerError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || f(db.as_ref()))
        .await
        .map_err(|e| NaggerError::Join(format!("DB task join error: {e}")))?
}

/// Fixed-width UTC timestamps so that text comparison in SQL orders correctly.
pub fn db_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_db_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub id: i64,
    pub chat_id: i64,
    pub user_id: i64,
    pub description: String,
    pub created_at: String,
    pub status: TaskStatus,
    pub completed_at: Option<String>,
}

impl Task {
    pub fn completed_at_utc(&self) -> Option<DateTime<Utc>> {
        self.completed_at.as_deref().and_then(parse_db_timestamp)
    }
}

#[derive(Debug, Clone)]
pub struct NewTask {
    pub chat_id: i64,
    pub user_id: i64,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSettings {
    pub chat_id: i64,
    pub user_id: i64,
    pub reminder_time: String, // "HH:MM", 24-hour
    pub timezone: String,      // IANA name, e.g. "Europe/Berlin"
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotMessage {
    pub id: i64,
    pub chat_id: i64,
    pub message_id: i32,
    pub sent_at: String,
}

const TASK_COLUMNS: &str =
    "id, chat_id, user_id, description, created_at, status, completed_at";

const ELIGIBLE_FILTER: &str = "(status IS NULL OR status != 'closed')";

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    let status: Option<String> = row.get(5)?;
    Ok(Task {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        user_id: row.get(2)?,
        description: row.get(3)?,
        created_at: row.get(4)?,
        status: TaskStatus::from_db(status.as_deref()),
        completed_at: row.get(6)?,
    })
}

fn settings_from_row(row: &Row<'_>) -> rusqlite::Result<UserSettings> {
    Ok(UserSettings {
        chat_id: row.get(0)?,
        user_id: row.get(1)?,
        reminder_time: row.get(2)?,
        timezone: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> Result<bool, NaggerError> {
    if !table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(NaggerError::Config(format!("invalid table name: {table}")));
    }
    // PRAGMA does not support parameter binding.
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(1))?;
    for col in rows {
        if col? == column {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Task tables created before the lifecycle existed only had a `completed`
/// flag. Their rows keep a NULL status and stay eligible for reminders.
fn ensure_task_status_schema(conn: &Connection) -> Result<(), NaggerError> {
    if !table_has_column(conn, "tasks", "status")? {
        conn.execute("ALTER TABLE tasks ADD COLUMN status TEXT", [])?;
    }
    if !table_has_column(conn, "tasks", "completed_at")? {
        conn.execute("ALTER TABLE tasks ADD COLUMN completed_at TEXT", [])?;
    }
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_tasks_chat_status ON tasks(chat_id, status)",
        [],
    )?;
    Ok(())
}

fn get_schema_version(conn: &Connection) -> Result<i64, NaggerError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS db_meta (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
        [],
    )?;
    let raw: Option<String> = conn
        .query_row(
            "SELECT value FROM db_meta WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    Ok(raw.and_then(|s| s.parse::<i64>().ok()).unwrap_or(0))
}

fn set_schema_version(conn: &Connection, version: i64) -> Result<(), NaggerError> {
    conn.execute(
        "INSERT INTO db_meta(key, value) VALUES('schema_version', ?1)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![version.to_string()],
    )?;
    Ok(())
}

fn apply_schema_migrations(conn: &Connection) -> Result<(), NaggerError> {
    let mut version = get_schema_version(conn)?;
    if version < 1 {
        set_schema_version(conn, 1)?;
        version = 1;
    }
    if version < 2 {
        ensure_task_status_schema(conn)?;
        set_schema_version(conn, 2)?;
        version = 2;
    }
    if version != SCHEMA_VERSION_CURRENT {
        set_schema_version(conn, SCHEMA_VERSION_CURRENT)?;
    }
    Ok(())
}

impl Database {
    fn lock_conn(&self) -> MutexGuard<'_, Connection> {
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn new(data_dir: &str) -> Result<Self, NaggerError> {
        let db_path = Path::new(data_dir).join(DB_FILE_NAME);
        std::fs::create_dir_all(data_dir)?;

        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS tasks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                chat_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL DEFAULT 0,
                description TEXT NOT NULL,
                created_at TEXT NOT NULL,
                status TEXT,
                completed_at TEXT
            );

            CREATE TABLE IF NOT EXISTS user_settings (
                chat_id INTEGER PRIMARY KEY,
                user_id INTEGER NOT NULL DEFAULT 0,
                reminder_time TEXT NOT NULL,
                timezone TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS bot_messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                chat_id INTEGER NOT NULL,
                message_id INTEGER NOT NULL,
                sent_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_bot_messages_sent_at
                ON bot_messages(sent_at);",
        )?;
        apply_schema_migrations(&conn)?;

        Ok(Database {
            conn: Mutex::new(conn),
        })
    }

    // --- Tasks ---

    pub fn insert_task(&self, task: &NewTask) -> Result<i64, NaggerError> {
        let conn = self.lock_conn();
        let now = db_timestamp(Utc::now());
        conn.execute(
            "INSERT INTO tasks (chat_id, user_id, description, created_at, status)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                task.chat_id,
                task.user_id,
                task.description,
                now,
                TaskStatus::Active.as_str()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_task(&self, task_id: i64) -> Result<Option<Task>, NaggerError> {
        let conn = self.lock_conn();
        let task = conn
            .query_row(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                params![task_id],
                task_from_row,
            )
            .optional()?;
        Ok(task)
    }

    /// Non-closed tasks of one chat in creation order. `/done 2` etc. index into this.
    pub fn get_eligible_tasks_for_chat(&self, chat_id: i64) -> Result<Vec<Task>, NaggerError> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks
             WHERE chat_id = ?1 AND {ELIGIBLE_FILTER}
             ORDER BY id"
        ))?;
        let tasks = stmt
            .query_map(params![chat_id], task_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tasks)
    }

    pub fn get_all_eligible_tasks(&self) -> Result<Vec<Task>, NaggerError> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks
             WHERE {ELIGIBLE_FILTER}
             ORDER BY chat_id, id"
        ))?;
        let tasks = stmt
            .query_map([], task_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tasks)
    }

    /// Closed rows are never rewritten. `false` means the task is missing or closed.
    pub fn update_task_status(
        &self,
        task_id: i64,
        status: TaskStatus,
        completed_at: Option<&str>,
    ) -> Result<bool, NaggerError> {
        let conn = self.lock_conn();
        let rows = conn.execute(
            &format!(
                "UPDATE tasks SET status = ?1, completed_at = ?2
                 WHERE id = ?3 AND {ELIGIBLE_FILTER}"
            ),
            params![status.as_str(), completed_at, task_id],
        )?;
        Ok(rows > 0)
    }

    pub fn delete_task(&self, task_id: i64) -> Result<bool, NaggerError> {
        let conn = self.lock_conn();
        let rows = conn.execute("DELETE FROM tasks WHERE id = ?1", params![task_id])?;
        Ok(rows > 0)
    }

    // --- User settings ---

    pub fn get_user_settings(&self, chat_id: i64) -> Result<Option<UserSettings>, NaggerError> {
        let conn = self.lock_conn();
        let settings = conn
            .query_row(
                "SELECT chat_id, user_id, reminder_time, timezone, created_at, updated_at
                 FROM user_settings WHERE chat_id = ?1",
                params![chat_id],
                settings_from_row,
            )
            .optional()?;
        Ok(settings)
    }

    pub fn get_all_user_settings(&self) -> Result<Vec<UserSettings>, NaggerError> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare(
            "SELECT chat_id, user_id, reminder_time, timezone, created_at, updated_at
             FROM user_settings ORDER BY chat_id",
        )?;
        let rows = stmt
            .query_map([], settings_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// One row per chat: inserts on first call, afterwards updates in place and
    /// keeps the first `created_at`.
    pub fn upsert_user_settings(
        &self,
        chat_id: i64,
        user_id: i64,
        reminder_time: &str,
        timezone: &str,
        now: &str,
    ) -> Result<(), NaggerError> {
        let conn = self.lock_conn();
        conn.execute(
            "INSERT INTO user_settings (chat_id, user_id, reminder_time, timezone, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)
             ON CONFLICT(chat_id) DO UPDATE SET
                user_id = excluded.user_id,
                reminder_time = excluded.reminder_time,
                timezone = excluded.timezone,
                updated_at = excluded.updated_at",
            params![chat_id, user_id, reminder_time, timezone, now],
        )?;
        Ok(())
    }

    // --- Bot message tracking ---

    pub fn insert_bot_message(
        &self,
        chat_id: i64,
        message_id: i32,
        sent_at: &str,
    ) -> Result<i64, NaggerError> {
        let conn = self.lock_conn();
        conn.execute(
            "INSERT INTO bot_messages (chat_id, message_id, sent_at) VALUES (?1, ?2, ?3)",
            params![chat_id, message_id, sent_at],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_bot_messages_older_than(
        &self,
        cutoff: &str,
    ) -> Result<Vec<BotMessage>, NaggerError> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare(
            "SELECT id, chat_id, message_id, sent_at FROM bot_messages
             WHERE sent_at < ?1
             ORDER BY sent_at, id",
        )?;
        let rows = stmt
            .query_map(params![cutoff], |row| {
                Ok(BotMessage {
                    id: row.get(0)?,
                    chat_id: row.get(1)?,
                    message_id: row.get(2)?,
                    sent_at: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn delete_bot_message(&self, id: i64) -> Result<bool, NaggerError> {
        let conn = self.lock_conn();
        let rows = conn.execute("DELETE FROM bot_messages WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    pub fn count_bot_messages(&self) -> Result<i64, NaggerError> {
        let conn = self.lock_conn();
        let count = conn.query_row("SELECT COUNT(*) FROM bot_messages", [], |row| row.get(0))?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn test_db() -> (Database, std::path::PathBuf) {
        let dir = std::env::temp_dir().join(format!("nagger_test_{}", uuid::Uuid::new_v4()));
        let db = Database::new(dir.to_str().unwrap()).unwrap();
        (db, dir)
    }

    fn cleanup(dir: &std::path::Path) {
        let _ = std::fs::remove_dir_all(dir);
    }

    fn new_task(chat_id: i64, description: &str) -> NewTask {
        NewTask {
            chat_id,
            user_id: 7,
            description: description.into(),
        }
    }

    #[test]
    fn test_new_database_creates_tables() {
        let (db, dir) = test_db();
        assert!(db.get_all_eligible_tasks().unwrap().is_empty());
        assert!(db.get_all_user_settings().unwrap().is_empty());
        assert!(db
            .get_bot_messages_older_than("2099-01-01T00:00:00.000000Z")
            .unwrap()
            .is_empty());
        cleanup(&dir);
    }

    #[test]
    fn test_schema_version_is_tracked() {
        let (db, dir) = test_db();
        let conn = db.lock_conn();
        let version: String = conn
            .query_row(
                "SELECT value FROM db_meta WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION_CURRENT.to_string());
        drop(conn);
        cleanup(&dir);
    }

    #[test]
    fn test_legacy_task_table_is_upgraded_and_rows_stay_eligible() {
        let dir =
            std::env::temp_dir().join(format!("nagger_legacy_upgrade_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let conn = Connection::open(dir.join(DB_FILE_NAME)).unwrap();
        conn.execute_batch(
            "CREATE TABLE tasks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                chat_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL DEFAULT 0,
                description TEXT NOT NULL,
                created_at TEXT NOT NULL,
                completed INTEGER NOT NULL DEFAULT 0
            );
            INSERT INTO tasks (chat_id, user_id, description, created_at, completed)
            VALUES (100, 1, 'water plants', '2025-01-01T00:00:00.000000Z', 0);",
        )
        .unwrap();
        drop(conn);

        let db = Database::new(dir.to_str().unwrap()).unwrap();
        let tasks = db.get_eligible_tasks_for_chat(100).unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].status, TaskStatus::Active);
        assert!(tasks[0].completed_at.is_none());

        let all = db.get_all_eligible_tasks().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].chat_id, 100);
        assert_eq!(all[0].status, TaskStatus::Active);

        let conn = db.lock_conn();
        assert!(table_has_column(&conn, "tasks", "status").unwrap());
        assert!(table_has_column(&conn, "tasks", "completed_at").unwrap());
        drop(conn);
        cleanup(&dir);
    }

    #[test]
    fn test_insert_and_get_task() {
        let (db, dir) = test_db();
        let id = db.insert_task(&new_task(100, "buy milk")).unwrap();
        let task = db.get_task(id).unwrap().unwrap();
        assert_eq!(task.chat_id, 100);
        assert_eq!(task.user_id, 7);
        assert_eq!(task.description, "buy milk");
        assert_eq!(task.status, TaskStatus::Active);
        assert!(parse_db_timestamp(&task.created_at).is_some());
        assert!(db.get_task(id + 1000).unwrap().is_none());
        cleanup(&dir);
    }

    #[test]
    fn test_closed_tasks_are_not_eligible() {
        let (db, dir) = test_db();
        let keep = db.insert_task(&new_task(100, "keep")).unwrap();
        let done = db.insert_task(&new_task(100, "done today")).unwrap();
        let closed = db.insert_task(&new_task(100, "closed")).unwrap();
        db.insert_task(&new_task(200, "other chat")).unwrap();

        db.update_task_status(done, TaskStatus::CompletedToday, Some("2026-01-01T09:00:00.000000Z"))
            .unwrap();
        db.update_task_status(closed, TaskStatus::Closed, None)
            .unwrap();

        let ids: Vec<i64> = db
            .get_eligible_tasks_for_chat(100)
            .unwrap()
            .iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, vec![keep, done]);

        let all = db.get_all_eligible_tasks().unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.iter().all(|t| t.status != TaskStatus::Closed));
        cleanup(&dir);
    }

    #[test]
    fn test_update_task_status_sets_and_clears_completed_at() {
        let (db, dir) = test_db();
        let id = db.insert_task(&new_task(1, "stretch")).unwrap();
        let stamp = "2026-01-01T09:00:00.000000Z";

        assert!(db
            .update_task_status(id, TaskStatus::CompletedToday, Some(stamp))
            .unwrap());
        let task = db.get_task(id).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::CompletedToday);
        assert_eq!(task.completed_at.as_deref(), Some(stamp));
        assert_eq!(
            task.completed_at_utc(),
            Some(Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).unwrap())
        );

        assert!(db.update_task_status(id, TaskStatus::Active, None).unwrap());
        let task = db.get_task(id).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Active);
        assert!(task.completed_at.is_none());
        cleanup(&dir);
    }

    #[test]
    fn test_update_never_rewrites_closed_task() {
        let (db, dir) = test_db();
        let id = db.insert_task(&new_task(1, "retired")).unwrap();
        assert!(db.update_task_status(id, TaskStatus::Closed, None).unwrap());

        assert!(!db
            .update_task_status(
                id,
                TaskStatus::CompletedToday,
                Some("2026-01-01T09:00:00.000000Z")
            )
            .unwrap());
        let task = db.get_task(id).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Closed);
        assert!(task.completed_at.is_none());
        cleanup(&dir);
    }

    #[test]
    fn test_update_and_delete_missing_task_report_false() {
        let (db, dir) = test_db();
        assert!(!db.update_task_status(999, TaskStatus::Closed, None).unwrap());
        assert!(!db.delete_task(999).unwrap());
        cleanup(&dir);
    }

    #[test]
    fn test_delete_task_removes_record() {
        let (db, dir) = test_db();
        let id = db.insert_task(&new_task(1, "temp")).unwrap();
        db.update_task_status(id, TaskStatus::Closed, None).unwrap();
        assert!(db.delete_task(id).unwrap());
        assert!(db.get_task(id).unwrap().is_none());
        cleanup(&dir);
    }

    #[test]
    fn test_upsert_user_settings_keeps_single_row() {
        let (db, dir) = test_db();
        db.upsert_user_settings(100, 1, "09:00", "UTC", "2026-01-01T00:00:00.000000Z")
            .unwrap();
        db.upsert_user_settings(
            100,
            2,
            "14:30",
            "America/New_York",
            "2026-01-02T00:00:00.000000Z",
        )
        .unwrap();

        let all = db.get_all_user_settings().unwrap();
        assert_eq!(all.len(), 1);
        let settings = db.get_user_settings(100).unwrap().unwrap();
        assert_eq!(settings.user_id, 2);
        assert_eq!(settings.reminder_time, "14:30");
        assert_eq!(settings.timezone, "America/New_York");
        assert_eq!(settings.created_at, "2026-01-01T00:00:00.000000Z");
        assert_eq!(settings.updated_at, "2026-01-02T00:00:00.000000Z");
        assert!(db.get_user_settings(200).unwrap().is_none());
        cleanup(&dir);
    }

    #[test]
    fn test_bot_messages_older_than_cutoff() {
        let (db, dir) = test_db();
        let now = Utc.with_ymd_and_hms(2026, 2, 1, 12, 0, 0).unwrap();
        let old = db
            .insert_bot_message(100, 11, &db_timestamp(now - Duration::hours(96)))
            .unwrap();
        db.insert_bot_message(100, 12, &db_timestamp(now - Duration::hours(1)))
            .unwrap();

        let cutoff = db_timestamp(now - Duration::hours(48));
        let stale = db.get_bot_messages_older_than(&cutoff).unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, old);
        assert_eq!(stale[0].message_id, 11);

        assert!(db.delete_bot_message(old).unwrap());
        assert!(!db.delete_bot_message(old).unwrap());
        assert_eq!(db.count_bot_messages().unwrap(), 1);
        cleanup(&dir);
    }

    #[test]
    fn test_db_timestamp_orders_lexically() {
        let a = Utc.with_ymd_and_hms(2026, 2, 1, 12, 0, 0).unwrap();
        let b = a + Duration::milliseconds(1);
        assert!(db_timestamp(a) < db_timestamp(b));
        assert_eq!(parse_db_timestamp(&db_timestamp(a)), Some(a));
    }
}
