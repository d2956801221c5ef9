use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Timelike, Utc};
use chrono_tz::Tz;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::db::UserSettings;
use crate::notifier::Notifier;
use crate::schedule::{is_due, parse_timezone, ReminderDefaults};
use crate::store::{SettingsStore, TaskStore};

const DEFAULT_NOTIFY_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome of one scheduler tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    pub chats_with_tasks: usize,
    pub due: usize,
    pub sent: usize,
    pub failed: usize,
}

/// Sends each chat its task list once a day, at the chat's own wall-clock time.
pub struct ReminderScheduler {
    tasks: Arc<dyn TaskStore>,
    settings: Arc<dyn SettingsStore>,
    notifier: Arc<dyn Notifier>,
    defaults: ReminderDefaults,
    notify_timeout: Duration,
    stop: CancellationToken,
}

impl ReminderScheduler {
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        settings: Arc<dyn SettingsStore>,
        notifier: Arc<dyn Notifier>,
        defaults: ReminderDefaults,
    ) -> Self {
        Self {
            tasks,
            settings,
            notifier,
            defaults,
            notify_timeout: DEFAULT_NOTIFY_TIMEOUT,
            stop: CancellationToken::new(),
        }
    }

    pub fn with_notify_timeout(mut self, timeout: Duration) -> Self {
        self.notify_timeout = timeout;
        self
    }

    pub fn start(self: &Arc<Self>, shutdown: &CancellationToken) -> JoinHandle<()> {
        let scheduler = self.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { scheduler.run_loop(shutdown).await })
    }

    pub fn stop(&self) {
        self.stop.cancel();
    }

    async fn run_loop(&self, shutdown: CancellationToken) {
        info!(
            "Scheduler started (default reminder {} {})",
            self.defaults.reminder_time,
            self.defaults.timezone.name()
        );

        // Re-aligned to the wall clock every iteration. Minutes that pass while
        // a tick is still running are skipped, never replayed.
        let mut last_fired: Option<DateTime<Utc>> = None;
        loop {
            let now = Utc::now();
            let minute = next_fire_minute(now, last_fired);
            let delay = (minute - now).to_std().unwrap_or(Duration::ZERO);

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = self.stop.cancelled() => break,
                _ = tokio::time::sleep(delay) => {
                    let fire_at = minute.max(minute_floor(Utc::now()));
                    self.run_tick_at(fire_at).await;
                    last_fired = Some(fire_at);
                }
            }
        }
        info!("Scheduler stopped");
    }

    /// One pass over every chat with eligible tasks, evaluated at `now`.
    pub async fn run_tick_at(&self, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport::default();

        let grouped = match self.tasks.all_eligible_tasks_grouped_by_chat().await {
            Ok(g) => g,
            Err(e) => {
                error!("Scheduler: failed to query eligible tasks: {e}");
                return report;
            }
        };

        let settings = match self.settings.get_all_settings().await {
            Ok(s) => s,
            Err(e) => {
                warn!("Scheduler: failed to load user settings, using defaults: {e}");
                HashMap::new()
            }
        };

        for (chat_id, tasks) in grouped {
            if tasks.is_empty() {
                continue;
            }
            report.chats_with_tasks += 1;

            let (reminder_time, tz) = self.resolve_schedule(chat_id, settings.get(&chat_id));
            if !is_due(&reminder_time, tz, now) {
                continue;
            }
            report.due += 1;

            info!(
                "Scheduler: sending reminder with {} task(s) to chat {} ({} {})",
                tasks.len(),
                chat_id,
                reminder_time,
                tz.name()
            );
            match tokio::time::timeout(
                self.notify_timeout,
                self.notifier.send_reminder(chat_id, &tasks),
            )
            .await
            {
                Ok(Ok(())) => report.sent += 1,
                Ok(Err(e)) => {
                    report.failed += 1;
                    error!(
                        "Scheduler: {} failed to send reminder to chat {}: {}",
                        self.notifier.name(),
                        chat_id,
                        e
                    );
                }
                Err(_) => {
                    report.failed += 1;
                    error!(
                        "Scheduler: {} timed out after {:?} sending reminder to chat {}",
                        self.notifier.name(),
                        self.notify_timeout,
                        chat_id
                    );
                }
            }
        }

        report
    }

    fn resolve_schedule(&self, chat_id: i64, settings: Option<&UserSettings>) -> (String, Tz) {
        let Some(settings) = settings else {
            return (
                self.defaults.reminder_time.to_string(),
                self.defaults.timezone,
            );
        };
        let tz = match parse_timezone(&settings.timezone) {
            Ok(tz) => tz,
            Err(_) => {
                warn!(
                    "Scheduler: chat {} has unknown timezone '{}', falling back to {}",
                    chat_id,
                    settings.timezone,
                    self.defaults.timezone.name()
                );
                self.defaults.timezone
            }
        };
        (settings.reminder_time.clone(), tz)
    }
}

fn minute_floor(at: DateTime<Utc>) -> DateTime<Utc> {
    at.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(at)
}

/// The next `:00` boundary strictly after `now`, skipping any minute that
/// already fired. A timer that wakes a little early therefore cannot run
/// the same minute twice.
pub fn next_fire_minute(now: DateTime<Utc>, last_fired: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let next = minute_floor(now) + TimeDelta::minutes(1);
    match last_fired {
        Some(last) if next <= last => last + TimeDelta::minutes(1),
        _ => next,
    }
}
