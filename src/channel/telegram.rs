//! Telegram group chat as the relay's channel.
//!
//! Outbound messages go through `sendMessage` with HTML parse mode. Inbound
//! messages are received by a teloxide dispatcher, filtered to the configured
//! chat and handed to the relay's inbound queue.

use async_trait::async_trait;
use teloxide::dispatching::UpdateFilterExt;
use teloxide::prelude::*;
use teloxide::types::{ParseMode, User};
use tokio::sync::watch;
use tracing::{debug, info};

use super::{ChannelError, ChatChannel, InboundMessage, ReplyRef};
use crate::relay::InboundSender;

/// Telegram bot posting into one group chat.
#[derive(Clone)]
pub struct TelegramChannel {
    bot: Bot,
}

impl TelegramChannel {
    /// Create a channel from a bot token.
    pub fn new(bot_token: &str) -> Self {
        Self {
            bot: Bot::new(bot_token),
        }
    }

    /// Underlying bot handle, shared with the dispatcher.
    pub fn bot(&self) -> Bot {
        self.bot.clone()
    }
}

#[async_trait]
impl ChatChannel for TelegramChannel {
    async fn send_message(&self, channel_id: i64, text: &str) -> Result<(), ChannelError> {
        self.bot
            .send_message(ChatId(channel_id), html_escape(text))
            .parse_mode(ParseMode::Html)
            .await
            .map(|_| ())
            .map_err(|e| ChannelError::SendFailed {
                channel_id,
                reason: e.to_string(),
            })
    }
}

// ---------------------------------------------------------------------------
// Inbound dispatcher
// ---------------------------------------------------------------------------

/// Dependencies injected into the message handler via `dptree::deps!`.
#[derive(Clone)]
struct InboundState {
    chat_id: i64,
    queue: InboundSender,
}

/// Receive messages from `chat_id` and push them into `queue` until shutdown.
pub async fn run_inbound(
    channel: TelegramChannel,
    chat_id: i64,
    queue: InboundSender,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let handler = Update::filter_message().endpoint(handle_message);
    let mut dispatcher = Dispatcher::builder(channel.bot(), handler)
        .dependencies(dptree::deps![InboundState { chat_id, queue }])
        .build();

    let token = dispatcher.shutdown_token();
    tokio::spawn(async move {
        crate::shutdown::requested(&mut shutdown_rx).await;
        match token.shutdown() {
            Ok(done) => done.await,
            Err(e) => debug!(error = %e, "dispatcher was not running"),
        }
    });

    info!(chat_id, "telegram dispatcher starting");
    dispatcher.dispatch().await;
    info!("telegram dispatcher stopped");
}

async fn handle_message(msg: Message, state: InboundState) -> ResponseResult<()> {
    if msg.chat.id.0 != state.chat_id {
        debug!(chat_id = msg.chat.id.0, "message from another chat ignored");
        return Ok(());
    }
    let Some(inbound) = to_inbound(&msg) else {
        return Ok(());
    };
    debug!(author = %inbound.author, "telegram message received");
    state.queue.offer(inbound).await;
    Ok(())
}

fn to_inbound(msg: &Message) -> Option<InboundMessage> {
    let from = msg.from.as_ref()?;
    if from.is_bot {
        return None;
    }
    let text = msg.text().or_else(|| msg.caption()).unwrap_or_default();
    let attached = has_attachment(msg);
    if text.trim().is_empty() && !attached {
        return None;
    }

    let reply = msg.reply_to_message().map(|parent| ReplyRef {
        author: parent.from.as_ref().map(display_name),
        text: parent
            .text()
            .or_else(|| parent.caption())
            .unwrap_or_default()
            .to_owned(),
        has_attachment: has_attachment(parent),
    });

    Some(InboundMessage {
        author: display_name(from),
        text: text.to_owned(),
        has_attachment: attached,
        reply,
    })
}

fn has_attachment(msg: &Message) -> bool {
    msg.photo().is_some()
        || msg.document().is_some()
        || msg.video().is_some()
        || msg.animation().is_some()
        || msg.sticker().is_some()
}

fn display_name(user: &User) -> String {
    let name = user.full_name();
    if name.trim().is_empty() {
        user.username.clone().unwrap_or_else(|| "unknown".to_owned())
    } else {
        name
    }
}

/// Escape text for Telegram's HTML parse mode.
fn html_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
