use tracing::{error, info};

use crate::db::{NewTask, Task};
use crate::error::NaggerError;
use crate::reminder::{parse_toggle_callback, render_task_list};
use crate::runtime::AppState;
use crate::schedule::{parse_timezone, ReminderTime};

const UNKNOWN_COMMAND: &str = "Unknown command. Use /help to see available commands.";

const WELCOME_TEXT: &str = "Welcome to Nagger Bot! 🤖

I'll help you manage your tasks and remind you about them every day.

Use /help to see available commands.";

const HELP_TEXT: &str = "Available commands:

/add <task> - Add a new task
/list - Show all active tasks
/done <task_number> - Mark a task as completed for today
/undo <task_number> - Put a task completed today back on the list
/close <task_number> - Close a task permanently (no more reminders)
/remove <task_number> - Delete a task entirely
/setreminder <HH:MM> [timezone] - Set your daily reminder time (24-hour format)
/settings - Show your reminder time and timezone
/help - Show this help message

I'll send you a reminder about your tasks every day at your configured time.

Examples:
/setreminder 09:00 - Set reminder to 9:00 AM in your current timezone
/setreminder 14:30 America/New_York - Set reminder to 2:30 PM EST/EDT";

fn normalized_slash_command(text: &str) -> Option<&str> {
    let mut s = text.trim_start();
    loop {
        if s.starts_with('/') {
            return Some(s);
        }
        if let Some(rest) = s.strip_prefix('@') {
            if rest.is_empty() {
                return None;
            }
            let end = rest
                .char_indices()
                .find(|(_, c)| c.is_whitespace())
                .map(|(i, _)| i)
                .unwrap_or(rest.len());
            s = rest[end..].trim_start();
            continue;
        }
        return None;
    }
}

/// Split `/cmd@botname args` into (`cmd`, `args`). Command names are lowercased.
pub fn parse_command(text: &str) -> Option<(String, String)> {
    let s = normalized_slash_command(text)?.trim();
    let body = &s[1..];
    let (head, args) = match body.find(char::is_whitespace) {
        Some(i) => (&body[..i], body[i..].trim()),
        None => (body, ""),
    };
    let name = head.split('@').next().unwrap_or(head).to_lowercase();
    if name.is_empty() {
        return None;
    }
    Some((name, args.to_string()))
}

pub async fn handle_chat_command(
    state: &AppState,
    chat_id: i64,
    user_id: i64,
    text: &str,
) -> Option<String> {
    let (command, args) = parse_command(text)?;
    let reply = match command.as_str() {
        "start" => WELCOME_TEXT.to_string(),
        "help" => HELP_TEXT.to_string(),
        "add" => add_task(state, chat_id, user_id, &args).await,
        "list" => list_tasks(state, chat_id).await,
        "done" => task_action(state, chat_id, "done", &args).await,
        "undo" => task_action(state, chat_id, "undo", &args).await,
        "close" | "delete" => task_action(state, chat_id, "close", &args).await,
        "remove" => task_action(state, chat_id, "remove", &args).await,
        "setreminder" => set_reminder(state, chat_id, user_id, &args).await,
        "settings" => show_settings(state, chat_id).await,
        _ => UNKNOWN_COMMAND.to_string(),
    };
    Some(reply)
}

/// Toggle the task behind a reminder button and return the chat's refreshed
/// eligible tasks. `Ok(None)` when `data` is not a toggle callback.
pub async fn handle_toggle_callback(
    state: &AppState,
    chat_id: i64,
    data: &str,
) -> Result<Option<Vec<Task>>, NaggerError> {
    let Some(task_id) = parse_toggle_callback(data) else {
        return Ok(None);
    };
    state.lifecycle.toggle_in_chat(chat_id, task_id).await?;
    let tasks = state.tasks.tasks_eligible_for_reminder(chat_id).await?;
    Ok(Some(tasks))
}

async fn add_task(state: &AppState, chat_id: i64, user_id: i64, args: &str) -> String {
    let description = args.trim();
    if description.is_empty() {
        return "Please provide a task description. Usage: /add <task>".into();
    }
    let new_task = NewTask {
        chat_id,
        user_id,
        description: description.to_string(),
    };
    match state.tasks.add_task(new_task).await {
        Ok(task) => {
            info!("Commands: chat {} added task #{}", chat_id, task.id);
            format!("✅ Task added: {}", task.description)
        }
        Err(e) => {
            error!("Commands: failed to add task for chat {chat_id}: {e}");
            "Failed to add task. Please try again.".into()
        }
    }
}

async fn list_tasks(state: &AppState, chat_id: i64) -> String {
    match state.tasks.tasks_eligible_for_reminder(chat_id).await {
        Ok(tasks) => render_task_list(&tasks),
        Err(e) => {
            error!("Commands: failed to list tasks for chat {chat_id}: {e}");
            "Failed to get tasks. Please try again.".into()
        }
    }
}

/// `/done`, `/undo`, `/close` and `/remove` all address a task by its 1-based
/// position in `/list`.
async fn task_action(state: &AppState, chat_id: i64, action: &str, args: &str) -> String {
    let Ok(number) = args.trim().parse::<usize>() else {
        return format!("Please provide a valid task number. Usage: /{action} <task_number>");
    };
    let tasks = match state.tasks.tasks_eligible_for_reminder(chat_id).await {
        Ok(t) => t,
        Err(e) => {
            error!("Commands: failed to load tasks for chat {chat_id}: {e}");
            return "Failed to get tasks. Please try again.".into();
        }
    };
    let Some(task) = number.checked_sub(1).and_then(|i| tasks.get(i)) else {
        return format!("Invalid task number. You have {} tasks.", tasks.len());
    };

    let result = match action {
        "done" => state.lifecycle.complete(task.id).await.map(|_| "✅ Task completed"),
        "undo" => state
            .lifecycle
            .reactivate(task.id)
            .await
            .map(|_| "↩️ Task reactivated"),
        "close" => state.lifecycle.close(task.id).await.map(|_| "🗑️ Task closed"),
        _ => state.lifecycle.delete(task.id).await.map(|_| "❌ Task removed"),
    };

    match result {
        Ok(prefix) => format!("{prefix}: {}", task.description),
        Err(e @ NaggerError::InvalidTransition { .. }) => format!("{e}: {}", task.description),
        Err(e) if e.is_not_found() => "That task no longer exists. Use /list to refresh.".into(),
        Err(e) => {
            error!(
                "Commands: /{} failed for task #{} in chat {}: {}",
                action, task.id, chat_id, e
            );
            "Failed to update task. Please try again.".into()
        }
    }
}

async fn set_reminder(state: &AppState, chat_id: i64, user_id: i64, args: &str) -> String {
    let mut parts = args.split_whitespace();
    let Some(raw_time) = parts.next() else {
        return "Please provide a reminder time. Usage: /setreminder <HH:MM> [timezone]\nExample: /setreminder 09:00 UTC".into();
    };
    let Ok(time) = ReminderTime::parse(raw_time) else {
        return "Invalid time format. Please use 24-hour format HH:MM (e.g., 09:00, 14:30)".into();
    };

    let tz = match parts.next() {
        Some(raw_tz) => match parse_timezone(raw_tz) {
            Ok(tz) => tz,
            Err(_) => {
                return format!(
                    "Invalid timezone: {raw_tz}. Please use a valid timezone (e.g., UTC, America/New_York)"
                )
            }
        },
        // Keep the chat's existing timezone when only the time changes.
        None => match state.settings.get_settings(chat_id).await {
            Ok(Some(existing)) => {
                parse_timezone(&existing.timezone).unwrap_or(state.defaults.timezone)
            }
            Ok(None) => state.defaults.timezone,
            Err(e) => {
                error!("Commands: failed to read settings for chat {chat_id}: {e}");
                return "Failed to save reminder settings. Please try again.".into();
            }
        },
    };

    match state
        .settings
        .upsert_settings(chat_id, user_id, &time, tz)
        .await
    {
        Ok(saved) => {
            info!(
                "Commands: chat {} reminder set to {} {}",
                chat_id, saved.reminder_time, saved.timezone
            );
            format!(
                "✅ Reminder time set to {} {}",
                saved.reminder_time, saved.timezone
            )
        }
        Err(e) => {
            error!("Commands: failed to save settings for chat {chat_id}: {e}");
            "Failed to save reminder settings. Please try again.".into()
        }
    }
}

async fn show_settings(state: &AppState, chat_id: i64) -> String {
    match state.settings.get_settings(chat_id).await {
        Ok(Some(s)) => format!("⏰ Daily reminder at {} ({})", s.reminder_time, s.timezone),
        Ok(None) => format!(
            "⏰ Daily reminder at {} ({}) - default, change it with /setreminder",
            state.defaults.reminder_time,
            state.defaults.timezone.name()
        ),
        Err(e) => {
            error!("Commands: failed to read settings for chat {chat_id}: {e}");
            "Failed to load reminder settings. Please try again.".into()
        }
    }
}
