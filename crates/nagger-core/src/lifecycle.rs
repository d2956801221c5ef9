//! Task status state machine.
//!
//! | action       | from                   | to               |
//! |--------------|------------------------|------------------|
//! | `complete`   | Active, CompletedToday | CompletedToday   |
//! | `reactivate` | CompletedToday         | Active           |
//! | `close`      | Active, CompletedToday | Closed           |
//! | `toggle`     | Active / CompletedToday| the other one    |
//!
//! `Closed` is terminal: every transition out of it is rejected here, before
//! anything reaches the store. Physical deletion is not a transition and is
//! handled by the store directly.

use std::fmt;

use chrono::{DateTime, Utc};

use crate::error::NaggerError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    Active,
    CompletedToday,
    Closed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Active => "active",
            TaskStatus::CompletedToday => "completed_today",
            TaskStatus::Closed => "closed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "active" => Some(TaskStatus::Active),
            "completed_today" => Some(TaskStatus::CompletedToday),
            "closed" => Some(TaskStatus::Closed),
            _ => None,
        }
    }

    /// Rows written before statuses existed have no value; they count as active.
    pub fn from_db(raw: Option<&str>) -> Self {
        raw.and_then(Self::parse).unwrap_or(TaskStatus::Active)
    }

    pub fn is_eligible_for_reminder(self) -> bool {
        self != TaskStatus::Closed
    }

    pub fn is_terminal(self) -> bool {
        self == TaskStatus::Closed
    }

    /// Marker shown next to a task on an interactive reminder button.
    pub fn button_marker(self) -> &'static str {
        match self {
            TaskStatus::CompletedToday => "✅",
            TaskStatus::Active | TaskStatus::Closed => "⬜",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TaskStatus::Active => "active",
            TaskStatus::CompletedToday => "completed today",
            TaskStatus::Closed => "closed",
        };
        f.write_str(label)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleAction {
    Complete,
    Reactivate,
    Close,
    Toggle,
}

impl LifecycleAction {
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleAction::Complete => "complete",
            LifecycleAction::Reactivate => "reactivate",
            LifecycleAction::Close => "close",
            LifecycleAction::Toggle => "toggle",
        }
    }
}

/// The status and completion timestamp a task should carry after a transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatusChange {
    pub status: TaskStatus,
    pub completed_at: Option<DateTime<Utc>>,
}

fn rejected(from: TaskStatus, action: LifecycleAction) -> NaggerError {
    NaggerError::InvalidTransition {
        from,
        action: action.as_str(),
    }
}

/// Active|CompletedToday -> CompletedToday, stamping `completed_at = now`.
pub fn complete(current: TaskStatus, now: DateTime<Utc>) -> Result<StatusChange, NaggerError> {
    match current {
        TaskStatus::Active | TaskStatus::CompletedToday => Ok(StatusChange {
            status: TaskStatus::CompletedToday,
            completed_at: Some(now),
        }),
        TaskStatus::Closed => Err(rejected(current, LifecycleAction::Complete)),
    }
}

/// CompletedToday -> Active, clearing `completed_at`.
pub fn reactivate(current: TaskStatus) -> Result<StatusChange, NaggerError> {
    match current {
        TaskStatus::CompletedToday => Ok(StatusChange {
            status: TaskStatus::Active,
            completed_at: None,
        }),
        TaskStatus::Active | TaskStatus::Closed => {
            Err(rejected(current, LifecycleAction::Reactivate))
        }
    }
}

/// Active|CompletedToday -> Closed. An existing completion stamp is kept.
pub fn close(
    current: TaskStatus,
    completed_at: Option<DateTime<Utc>>,
) -> Result<StatusChange, NaggerError> {
    match current {
        TaskStatus::Active | TaskStatus::CompletedToday => Ok(StatusChange {
            status: TaskStatus::Closed,
            completed_at,
        }),
        TaskStatus::Closed => Err(rejected(current, LifecycleAction::Close)),
    }
}

/// Flip between Active and CompletedToday, as the reminder buttons do.
pub fn toggle(current: TaskStatus, now: DateTime<Utc>) -> Result<StatusChange, NaggerError> {
    match current {
        TaskStatus::CompletedToday => reactivate(current),
        TaskStatus::Active => complete(current, now),
        TaskStatus::Closed => Err(rejected(current, LifecycleAction::Toggle)),
    }
}

pub fn apply(
    action: LifecycleAction,
    current: TaskStatus,
    completed_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<StatusChange, NaggerError> {
    match action {
        LifecycleAction::Complete => complete(current, now),
        LifecycleAction::Reactivate => reactivate(current),
        LifecycleAction::Close => close(current, completed_at),
        LifecycleAction::Toggle => toggle(current, now),
    }
}
