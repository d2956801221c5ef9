use thiserror::Error;

use crate::lifecycle::TaskStatus;

#[derive(Error, Debug)]
pub enum NaggerError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Task not found: {0}")]
    TaskNotFound(i64),

    #[error("Tracked message not found: {0}")]
    MessageNotFound(i64),

    #[error("Cannot {action} a task that is {from}")]
    InvalidTransition {
        from: TaskStatus,
        action: &'static str,
    },

    #[error("Invalid reminder time '{0}': expected 24-hour HH:MM")]
    InvalidReminderTime(String),

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Background task join error: {0}")]
    Join(String),
}

impl NaggerError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            NaggerError::TaskNotFound(_) | NaggerError::MessageNotFound(_)
        )
    }
}
