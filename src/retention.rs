use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::notifier::Notifier;
use crate::store::MessageTrackingStore;

const DEFAULT_NOTIFY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub found: usize,
    pub deleted: usize,
    pub untracked: usize,
    pub failed_untrack: usize,
}

/// Deletes bot messages once they are older than the TTL. Tracking records
/// are dropped whether or not the transport delete worked.
pub struct RetentionSweeper {
    messages: Arc<dyn MessageTrackingStore>,
    notifier: Arc<dyn Notifier>,
    ttl: chrono::Duration,
    interval: Duration,
    notify_timeout: Duration,
    stop: CancellationToken,
}

impl RetentionSweeper {
    pub fn new(
        messages: Arc<dyn MessageTrackingStore>,
        notifier: Arc<dyn Notifier>,
        ttl: chrono::Duration,
        interval: Duration,
    ) -> Self {
        Self {
            messages,
            notifier,
            ttl,
            interval,
            notify_timeout: DEFAULT_NOTIFY_TIMEOUT,
            stop: CancellationToken::new(),
        }
    }

    pub fn with_notify_timeout(mut self, timeout: Duration) -> Self {
        self.notify_timeout = timeout;
        self
    }

    pub fn start(self: &Arc<Self>, shutdown: &CancellationToken) -> JoinHandle<()> {
        let sweeper = self.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { sweeper.run_loop(shutdown).await })
    }

    pub fn stop(&self) {
        self.stop.cancel();
    }

    async fn run_loop(&self, shutdown: CancellationToken) {
        info!(
            "Retention sweeper started (ttl {}h, every {:?})",
            self.ttl.num_hours(),
            self.interval
        );
        if !(shutdown.is_cancelled() || self.stop.is_cancelled()) {
            self.sweep_at(Utc::now()).await;
        }

        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = self.stop.cancelled() => break,
                _ = ticker.tick() => {
                    self.sweep_at(Utc::now()).await;
                }
            }
        }
        info!("Retention sweeper stopped");
    }

    pub async fn sweep_at(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();
        let cutoff = now - self.ttl;

        let stale = match self.messages.messages_older_than(cutoff).await {
            Ok(m) => m,
            Err(e) => {
                error!("Retention: failed to query messages older than {cutoff}: {e}");
                return report;
            }
        };
        report.found = stale.len();
        if stale.is_empty() {
            return report;
        }
        info!("Retention: {} message(s) older than {}", stale.len(), cutoff);

        for msg in stale {
            match tokio::time::timeout(
                self.notify_timeout,
                self.notifier.delete_message(msg.chat_id, msg.message_id),
            )
            .await
            {
                Ok(Ok(())) => report.deleted += 1,
                Ok(Err(e)) => warn!(
                    "Retention: failed to delete message {} in chat {}: {}",
                    msg.message_id, msg.chat_id, e
                ),
                Err(_) => warn!(
                    "Retention: timed out deleting message {} in chat {}",
                    msg.message_id, msg.chat_id
                ),
            }

            match self.messages.untrack(msg.id).await {
                Ok(()) => report.untracked += 1,
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    report.failed_untrack += 1;
                    error!("Retention: failed to untrack message #{}: {}", msg.id, e);
                }
            }
        }

        report
    }
}
