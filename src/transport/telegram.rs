//! Telegram transport over long polling

use super::{InboundEvent, Payload, TransportError};
use crate::commands::CommandRegistry;
use crate::directory::UserIdentity;
use crate::runtime::Transport;
use crate::state_machine::MenuButton;
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{BotCommand, InlineKeyboardButton, InlineKeyboardMarkup, User, UserId};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Buffer between the polling task and the dispatcher
const INBOUND_BUFFER: usize = 100;

pub struct TelegramTransport {
    bot: Bot,
}

impl TelegramTransport {
    pub fn new(token: &str) -> Self {
        Self {
            bot: Bot::new(token),
        }
    }

    /// Publish the registry's commands as the bot's command menu
    pub async fn publish_commands(&self, registry: &CommandRegistry) -> Result<(), TransportError> {
        let commands: Vec<BotCommand> = registry
            .commands()
            .map(|c| BotCommand::new(c.token.trim_start_matches('/'), c.description))
            .collect();
        self.bot.set_my_commands(commands).await?;
        Ok(())
    }

    /// Start long polling and stream normalized inbound events.
    ///
    /// The stream ends when polling stops (Ctrl-C).
    pub fn receive_events(&self) -> ReceiverStream<InboundEvent> {
        let (tx, rx) = mpsc::channel(INBOUND_BUFFER);
        let bot = self.bot.clone();

        tokio::spawn(async move {
            tracing::info!("Starting Telegram long polling");

            let handler = dptree::entry()
                .branch(Update::filter_message().endpoint(on_message))
                .branch(Update::filter_callback_query().endpoint(on_callback_query));

            Dispatcher::builder(bot, handler)
                .dependencies(dptree::deps![tx])
                .default_handler(|_| async {})
                .enable_ctrlc_handler()
                .build()
                .dispatch()
                .await;

            tracing::info!("Telegram long polling stopped");
        });

        ReceiverStream::new(rx)
    }
}

async fn on_message(msg: Message, tx: mpsc::Sender<InboundEvent>) -> ResponseResult<()> {
    match event_from_message(&msg) {
        Some(event) => forward(&tx, event).await,
        None => tracing::debug!(chat_id = msg.chat.id.0, "Ignoring message without a sender"),
    }
    Ok(())
}

async fn on_callback_query(
    bot: Bot,
    query: CallbackQuery,
    tx: mpsc::Sender<InboundEvent>,
) -> ResponseResult<()> {
    forward(&tx, event_from_callback(&query)).await;

    // Stops the client's loading spinner; losing it is harmless
    if let Err(e) = bot.answer_callback_query(query.id.clone()).await {
        tracing::warn!(error = %e, "Failed to answer callback query");
    }
    Ok(())
}

async fn forward(tx: &mpsc::Sender<InboundEvent>, event: InboundEvent) {
    if tx.send(event).await.is_err() {
        tracing::warn!("Inbound channel closed, dropping event");
    }
}

/// Any chat kind is accepted; the session is keyed by the sender and replies
/// go to the sender's private chat
fn event_from_message(msg: &Message) -> Option<InboundEvent> {
    let user = msg.from.as_ref()?;
    let payload = match msg.text() {
        Some(text) => Payload::Text(text.to_string()),
        None => Payload::Empty,
    };
    Some(sender_event(user, payload))
}

fn event_from_callback(query: &CallbackQuery) -> InboundEvent {
    let payload = match &query.data {
        Some(data) => Payload::Callback(data.clone()),
        None => Payload::Empty,
    };
    sender_event(&query.from, payload)
}

fn sender_event(user: &User, payload: Payload) -> InboundEvent {
    InboundEvent::new(identity(user.id), payload).with_display_name(user.username.clone())
}

fn identity(id: UserId) -> UserIdentity {
    UserIdentity(ChatId::from(id).0)
}

#[async_trait]
impl Transport for TelegramTransport {
    async fn send_text(&self, to: UserIdentity, text: &str) -> Result<(), TransportError> {
        self.bot.send_message(ChatId(to.0), text).await?;
        Ok(())
    }

    async fn send_menu(
        &self,
        to: UserIdentity,
        text: &str,
        buttons: &[MenuButton],
    ) -> Result<(), TransportError> {
        let row: Vec<InlineKeyboardButton> = buttons
            .iter()
            .map(|b| InlineKeyboardButton::callback(b.label.clone(), b.callback.clone()))
            .collect();

        self.bot
            .send_message(ChatId(to.0), text)
            .reply_markup(InlineKeyboardMarkup::new(vec![row]))
            .await?;
        Ok(())
    }
}
