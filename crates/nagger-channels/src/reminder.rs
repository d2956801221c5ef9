//! Transport-neutral rendering of reminders and task lists.

use nagger_core::lifecycle::TaskStatus;
use nagger_storage::db::Task;

pub const TOGGLE_CALLBACK_PREFIX: &str = "complete_";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToggleButton {
    pub label: String,
    pub callback_data: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReminderView {
    pub text: String,
    pub buttons: Vec<ToggleButton>,
}

pub fn toggle_callback_data(task_id: i64) -> String {
    format!("{TOGGLE_CALLBACK_PREFIX}{task_id}")
}

/// Task id carried by a reminder button, or `None` for foreign callback data.
pub fn parse_toggle_callback(data: &str) -> Option<i64> {
    data.strip_prefix(TOGGLE_CALLBACK_PREFIX)?
        .trim()
        .parse::<i64>()
        .ok()
}

/// One button per task, in the order given.
pub fn render_buttons(tasks: &[Task]) -> Vec<ToggleButton> {
    tasks
        .iter()
        .map(|task| ToggleButton {
            label: format!("{} {}", task.status.button_marker(), task.description),
            callback_data: toggle_callback_data(task.id),
        })
        .collect()
}

pub fn render_reminder(tasks: &[Task]) -> ReminderView {
    ReminderView {
        text: format!(
            "🔔 Daily Reminder!\n\nYou have {} active task(s). Click on a task to mark it as done:",
            tasks.len()
        ),
        buttons: render_buttons(tasks),
    }
}

/// Numbered list used by `/list`. Numbers match what `/done`, `/undo` and
/// `/close` expect.
pub fn render_task_list(tasks: &[Task]) -> String {
    if tasks.is_empty() {
        return "You have no active tasks. Great job! 🎉".to_string();
    }
    let mut text = String::from("📋 Your tasks:\n\n");
    for (i, task) in tasks.iter().enumerate() {
        let marker = if task.status == TaskStatus::CompletedToday {
            " ✅"
        } else {
            ""
        };
        text.push_str(&format!("{}. {}{}\n", i + 1, task.description, marker));
    }
    text
}
