use std::sync::Arc;

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup, MessageId};
use tracing::{error, warn};

use crate::chat_commands::{handle_chat_command, handle_toggle_callback};
use crate::db::Task;
use crate::notifier::{track_delivery, Notifier};
use crate::reminder::{render_buttons, render_reminder, ToggleButton};
use crate::runtime::AppState;
use crate::store::MessageTrackingStore;

const CHANNEL_NAME: &str = "telegram";

type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

pub struct TelegramNotifier {
    bot: Bot,
    tracker: Arc<dyn MessageTrackingStore>,
}

impl TelegramNotifier {
    pub fn new(bot: Bot, tracker: Arc<dyn MessageTrackingStore>) -> Self {
        Self { bot, tracker }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    fn name(&self) -> &str {
        CHANNEL_NAME
    }

    async fn send_reminder(&self, chat_id: i64, tasks: &[Task]) -> Result<(), String> {
        if tasks.is_empty() {
            return Ok(());
        }
        let view = render_reminder(tasks);
        let sent = self
            .bot
            .send_message(ChatId(chat_id), view.text)
            .reply_markup(toggle_keyboard(&view.buttons))
            .await
            .map_err(|e| format!("send_message failed: {e}"))?;
        track_delivery(self.tracker.as_ref(), CHANNEL_NAME, chat_id, sent.id.0).await;
        Ok(())
    }

    async fn delete_message(&self, chat_id: i64, message_id: i32) -> Result<(), String> {
        self.bot
            .delete_message(ChatId(chat_id), MessageId(message_id))
            .await
            .map(|_| ())
            .map_err(|e| format!("delete_message failed: {e}"))
    }
}

/// One button per row.
pub fn toggle_keyboard(buttons: &[ToggleButton]) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(buttons.iter().map(|b| {
        vec![InlineKeyboardButton::callback(
            b.label.clone(),
            b.callback_data.clone(),
        )]
    }))
}

pub async fn start_telegram_bot(state: Arc<AppState>, bot: Bot) -> anyhow::Result<()> {
    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(handle_message))
        .branch(Update::filter_callback_query().endpoint(handle_callback_query));

    Dispatcher::builder(bot, handler)
        .default_handler(|_| async {})
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}

async fn handle_message(bot: Bot, msg: Message, state: Arc<AppState>) -> HandlerResult {
    let Some(text) = msg.text() else {
        return Ok(());
    };
    let chat_id = msg.chat.id.0;
    let user_id = msg.from.as_ref().map(|u| u.id.0 as i64).unwrap_or(0);

    if let Some(reply) = handle_chat_command(&state, chat_id, user_id, text).await {
        send_tracked_text(&bot, state.messages.as_ref(), chat_id, &reply).await;
    }
    Ok(())
}

async fn handle_callback_query(
    bot: Bot,
    q: CallbackQuery,
    state: Arc<AppState>,
) -> HandlerResult {
    if let Err(e) = bot.answer_callback_query(q.id.clone()).await {
        warn!("Telegram: failed to acknowledge callback: {e}");
    }

    let (Some(data), Some(message)) = (q.data.as_deref(), q.message.as_ref()) else {
        return Ok(());
    };
    let chat_id = message.chat().id;

    let tasks = match handle_toggle_callback(&state, chat_id.0, data).await {
        Ok(Some(tasks)) => tasks,
        Ok(None) => return Ok(()),
        Err(e) => {
            warn!(
                "Telegram: toggle '{}' in chat {} rejected: {}",
                data, chat_id.0, e
            );
            return Ok(());
        }
    };

    let keyboard = toggle_keyboard(&render_buttons(&tasks));
    if let Err(e) = bot
        .edit_message_reply_markup(chat_id, message.id())
        .reply_markup(keyboard)
        .await
    {
        error!("Telegram: failed to refresh reminder keyboard in chat {}: {e}", chat_id.0);
    }
    Ok(())
}

/// Send a plain reply and register it for retention cleanup.
pub async fn send_tracked_text(
    bot: &Bot,
    tracker: &dyn MessageTrackingStore,
    chat_id: i64,
    text: &str,
) {
    match bot.send_message(ChatId(chat_id), text).await {
        Ok(sent) => {
            track_delivery(tracker, CHANNEL_NAME, chat_id, sent.id.0).await;
        }
        Err(e) => {
            error!("Telegram: failed to send reply to chat {chat_id}: {e}");
        }
    }
}
