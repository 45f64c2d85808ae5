//! Telegram adapter: update routing, keyboards and outbound delivery.

use std::sync::Arc;

use async_trait::async_trait;
use teloxide::{
    dispatching::UpdateHandler,
    prelude::*,
    types::{
        ButtonRequest, InlineKeyboardButton, InlineKeyboardMarkup, KeyboardButton, KeyboardMarkup,
        Location,
    },
    utils::command::BotCommands,
};
use tracing::{debug, info};
use weather_core::{
    Action, Conversation, Keyboard, Messenger, Reply, SendError,
    conversation::SHARE_LOCATION_BUTTON,
};

#[derive(Debug, Clone, BotCommands)]
#[command(rename_rule = "lowercase", description = "These commands are supported:")]
pub enum Command {
    #[command(description = "get current weather or subscribe to daily updates.")]
    Start,
    #[command(description = "show this message.")]
    Help,
    #[command(description = "stop the daily updates.")]
    Unsubscribe,
    #[command(description = "delete everything stored about this chat.")]
    Forget,
}

/// Route commands, location shares and button presses to the conversation.
pub fn schema() -> UpdateHandler<anyhow::Error> {
    let commands = Update::filter_message()
        .filter_command::<Command>()
        .endpoint(on_command);

    let locations = Update::filter_message()
        .filter_map(|msg: Message| msg.location().cloned())
        .endpoint(on_location);

    let buttons = Update::filter_callback_query().endpoint(on_button);

    dptree::entry().branch(commands).branch(locations).branch(buttons)
}

/// Long-poll Telegram until Ctrl-C.
pub async fn run(bot: Bot, conversation: Arc<Conversation>) -> anyhow::Result<()> {
    bot.set_my_commands(Command::bot_commands()).await?;
    info!("Bot commands registered, start polling");

    Dispatcher::builder(bot, schema())
        .dependencies(dptree::deps![conversation])
        .error_handler(LoggingErrorHandler::with_custom_text(
            "An error has occurred in the dispatcher",
        ))
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    info!("Dispatcher stopped");
    Ok(())
}

async fn on_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    conversation: Arc<Conversation>,
) -> anyhow::Result<()> {
    let chat_id = msg.chat.id;
    debug!(%chat_id, ?cmd, "Command received");

    let replies = match cmd {
        Command::Start => conversation.start(),
        Command::Help => conversation.help(),
        Command::Unsubscribe => conversation.unsubscribe(&chat_id.to_string()).await,
        Command::Forget => conversation.forget(&chat_id.to_string()).await,
    };
    send_replies(&bot, chat_id, replies).await
}

async fn on_location(
    bot: Bot,
    msg: Message,
    location: Location,
    conversation: Arc<Conversation>,
) -> anyhow::Result<()> {
    let chat_id = msg.chat.id;
    debug!(%chat_id, "Location received");

    let replies = conversation
        .location(&chat_id.to_string(), location.latitude, location.longitude)
        .await;
    send_replies(&bot, chat_id, replies).await
}

async fn on_button(
    bot: Bot,
    query: CallbackQuery,
    conversation: Arc<Conversation>,
) -> anyhow::Result<()> {
    bot.answer_callback_query(query.id.clone()).await?;

    let Some(payload) = query.data.as_deref() else {
        return Ok(());
    };
    let chat_id = button_chat(&query);

    let replies = conversation.button(&chat_id.to_string(), payload).await;
    send_replies(&bot, chat_id, replies).await
}

/// The chat the button was pressed in, so button state and location shares
/// share one key in groups too. Falls back to the user's private chat.
fn button_chat(query: &CallbackQuery) -> ChatId {
    query
        .message
        .as_ref()
        .map(|message| message.chat().id)
        .unwrap_or_else(|| ChatId::from(query.from.id))
}

async fn send_replies(bot: &Bot, chat_id: ChatId, replies: Vec<Reply>) -> anyhow::Result<()> {
    for reply in replies {
        let request = bot.send_message(chat_id, reply.text);
        match reply.keyboard {
            Keyboard::None => request.await?,
            Keyboard::Actions(actions) => request.reply_markup(action_keyboard(&actions)).await?,
            Keyboard::RequestLocation => request.reply_markup(location_keyboard()).await?,
        };
    }
    Ok(())
}

fn action_keyboard(actions: &[Action]) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(
        actions
            .iter()
            .map(|action| vec![InlineKeyboardButton::callback(action.label(), action.as_str())]),
    )
}

fn location_keyboard() -> KeyboardMarkup {
    let button = KeyboardButton::new(SHARE_LOCATION_BUTTON).request(ButtonRequest::Location);
    KeyboardMarkup::new(vec![vec![button]]).one_time_keyboard().resize_keyboard()
}

/// Delivers broadcast messages through the Bot API.
#[derive(Debug, Clone)]
pub struct TelegramMessenger {
    bot: Bot,
}

impl TelegramMessenger {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl Messenger for TelegramMessenger {
    async fn send_text(&self, chat_id: &str, text: &str) -> Result<(), SendError> {
        let id: i64 = chat_id.parse().map_err(|e| SendError {
            chat_id: chat_id.to_string(),
            reason: format!("not a Telegram chat id: {e}"),
        })?;

        self.bot
            .send_message(ChatId(id), text)
            .await
            .map(|_| ())
            .map_err(|e| SendError { chat_id: chat_id.to_string(), reason: e.to_string() })
    }
}
