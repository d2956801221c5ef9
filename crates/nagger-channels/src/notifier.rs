use async_trait::async_trait;
use tracing::{error, info};

use nagger_storage::db::Task;
use nagger_storage::store::MessageTrackingStore;

/// Outbound side of a chat transport. The background loops only talk to
/// chats through this.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Unique name used in logs: "telegram", "recording", ...
    fn name(&self) -> &str;

    /// Render `tasks` as an interactive reminder and send it to `chat_id`.
    async fn send_reminder(&self, chat_id: i64, tasks: &[Task]) -> Result<(), String>;

    /// Remove a message the bot sent earlier.
    async fn delete_message(&self, chat_id: i64, message_id: i32) -> Result<(), String>;
}

/// Record a sent message for later retention cleanup. A failed write only
/// means the message will never be swept, so it is logged and swallowed.
pub async fn track_delivery(
    tracker: &dyn MessageTrackingStore,
    channel: &str,
    chat_id: i64,
    message_id: i32,
) -> Option<i64> {
    match tracker.track(chat_id, message_id).await {
        Ok(id) => {
            info!(
                "{}: tracking message {} in chat {} as #{}",
                channel, message_id, chat_id, id
            );
            Some(id)
        }
        Err(e) => {
            error!(
                "{}: failed to track message {} in chat {}: {}",
                channel, message_id, chat_id, e
            );
            None
        }
    }
}
