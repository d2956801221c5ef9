use std::sync::Arc;

use anyhow::Context;
use teloxide::Bot;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::db::Database;
use crate::notifier::Notifier;
use crate::retention::RetentionSweeper;
use crate::schedule::ReminderDefaults;
use crate::scheduler::ReminderScheduler;
use crate::store::{MessageTrackingStore, SettingsStore, SqliteStore, TaskStore};
use crate::task_lifecycle::TaskLifecycle;
use crate::telegram::TelegramNotifier;

pub struct AppState {
    pub config: Config,
    pub defaults: ReminderDefaults,
    pub tasks: Arc<dyn TaskStore>,
    pub settings: Arc<dyn SettingsStore>,
    pub messages: Arc<dyn MessageTrackingStore>,
    pub lifecycle: TaskLifecycle,
}

impl AppState {
    /// Wire every store seam to one backing store.
    pub fn from_store<S>(config: Config, store: Arc<S>) -> anyhow::Result<Self>
    where
        S: TaskStore + SettingsStore + MessageTrackingStore + 'static,
    {
        let defaults = config
            .reminder_defaults()
            .context("invalid reminder defaults")?;
        Ok(AppState {
            config,
            defaults,
            tasks: store.clone(),
            settings: store.clone(),
            messages: store.clone(),
            lifecycle: TaskLifecycle::new(store),
        })
    }
}

pub async fn run(config: Config, db: Database) -> anyhow::Result<()> {
    let store = Arc::new(SqliteStore::new(Arc::new(db)));
    let state = Arc::new(AppState::from_store(config, store)?);

    let bot = Bot::new(&state.config.telegram_bot_token);
    let notifier: Arc<dyn Notifier> =
        Arc::new(TelegramNotifier::new(bot.clone(), state.messages.clone()));

    let shutdown = CancellationToken::new();

    let scheduler = Arc::new(
        ReminderScheduler::new(
            state.tasks.clone(),
            state.settings.clone(),
            notifier.clone(),
            state.defaults.clone(),
        )
        .with_notify_timeout(state.config.notify_timeout()),
    );
    let sweeper = Arc::new(
        RetentionSweeper::new(
            state.messages.clone(),
            notifier.clone(),
            state.config.message_ttl(),
            state.config.cleanup_interval(),
        )
        .with_notify_timeout(state.config.notify_timeout()),
    );

    let scheduler_handle = scheduler.start(&shutdown);
    let sweeper_handle = sweeper.start(&shutdown);

    info!("Starting Telegram bot adapter");
    crate::telegram::start_telegram_bot(state.clone(), bot).await?;

    info!("Telegram dispatcher exited; stopping background loops");
    shutdown.cancel();
    for (name, handle) in [("scheduler", scheduler_handle), ("sweeper", sweeper_handle)] {
        if let Err(e) = handle.await {
            warn!("Runtime: {name} task ended abnormally: {e}");
        }
    }
    Ok(())
}
