//! Chat channel abstraction and the Telegram implementation.

use async_trait::async_trait;

pub mod telegram;

/// Errors from a chat channel.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// The message could not be delivered.
    #[error("failed to send to channel {channel_id}: {reason}")]
    SendFailed {
        /// Destination channel.
        channel_id: i64,
        /// Transport error text.
        reason: String,
    },
}

/// Outbound side of a chat channel.
#[async_trait]
pub trait ChatChannel: Send + Sync {
    /// Post `text` to `channel_id`.
    async fn send_message(&self, channel_id: i64, text: &str) -> Result<(), ChannelError>;
}

/// A message posted in the channel, on its way into the game.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Display name of the sender.
    pub author: String,
    /// Message text or caption. May be empty for bare attachments.
    pub text: String,
    /// Whether the message carries an image or file.
    pub has_attachment: bool,
    /// The message this one replies to.
    pub reply: Option<ReplyRef>,
}

impl InboundMessage {
    /// Plain text message without attachment or reply.
    pub fn text(author: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            text: text.into(),
            has_attachment: false,
            reply: None,
        }
    }
}

/// The replied-to message, as shown in game.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyRef {
    /// Author of the replied-to message, if known.
    pub author: Option<String>,
    /// Its text or caption.
    pub text: String,
    /// Whether it carried an attachment.
    pub has_attachment: bool,
}
