//! Channel messages to in-game chat.

use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::commands::{respond, SlashCommand};
use super::format::{chat_command, inbound_text, InboundStyle};
use crate::channel::{ChatChannel, InboundMessage};
use crate::rcon::{CommandSink, RconError};

/// Producer handle of the bounded inbound queue.
///
/// Never blocks: a full queue drops the new message, logs a warning and
/// posts a notice to the channel.
#[derive(Clone)]
pub struct InboundSender {
    tx: mpsc::Sender<InboundMessage>,
    channel: Arc<dyn ChatChannel>,
    channel_id: i64,
}

impl InboundSender {
    /// Queue `msg` for delivery. Returns `false` if it was dropped.
    pub async fn offer(&self, msg: InboundMessage) -> bool {
        match self.tx.try_send(msg) {
            Ok(()) => true,
            Err(TrySendError::Full(msg)) => {
                warn!(
                    author = %msg.author,
                    capacity = self.tx.max_capacity(),
                    "inbound queue full, dropping message"
                );
                let notice = format!(
                    "Message from {} was not delivered: too many messages are waiting.",
                    msg.author
                );
                if let Err(e) = self.channel.send_message(self.channel_id, &notice).await {
                    warn!(error = %e, "failed to post queue-full notice");
                }
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!("inbound queue closed, dropping message");
                false
            }
        }
    }
}

/// Create the inbound queue with room for `capacity` messages.
pub fn inbound_queue(
    capacity: usize,
    channel: Arc<dyn ChatChannel>,
    channel_id: i64,
) -> (InboundSender, mpsc::Receiver<InboundMessage>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        InboundSender {
            tx,
            channel,
            channel_id,
        },
        rx,
    )
}

/// Delivers queued messages one at a time through the command sink.
#[derive(Clone)]
pub struct InboundWorker {
    channel: Arc<dyn ChatChannel>,
    sink: Arc<dyn CommandSink>,
    channel_id: i64,
    style: InboundStyle,
}

impl InboundWorker {
    /// Create a worker.
    pub fn new(
        channel: Arc<dyn ChatChannel>,
        sink: Arc<dyn CommandSink>,
        channel_id: i64,
        style: InboundStyle,
    ) -> Self {
        Self {
            channel,
            sink,
            channel_id,
            style,
        }
    }

    /// Deliver one message: answer slash commands, send everything else into
    /// the game, and report failures to the channel.
    pub async fn deliver(&self, msg: InboundMessage) {
        if let Some(command) = SlashCommand::parse(&msg.text) {
            let reply = respond(&command, self.sink.as_ref()).await;
            self.notify(&reply).await;
            return;
        }

        let text = inbound_text(&msg);
        let command = chat_command(self.style, &text);
        match self.sink.execute(&command).await {
            Ok(_) => debug!(author = %msg.author, "message delivered in game"),
            Err(e) => {
                warn!(author = %msg.author, error = %e, "failed to deliver message in game");
                let notice = match e {
                    RconError::Timeout(_) => {
                        "The server did not confirm the message; it may not have been delivered."
                    }
                    RconError::CommandTooLong { .. } => "Message not delivered: it is too long.",
                    RconError::AuthRejected => {
                        "Message not delivered: the relay's RCON password was rejected."
                    }
                    RconError::Closed => "Message not delivered: the relay is shutting down.",
                    RconError::Protocol(_) => {
                        "Message not delivered: the server sent an invalid response."
                    }
                    RconError::Disconnected(_) | RconError::Unavailable { .. } => {
                        "Message not delivered: the server is unavailable right now."
                    }
                };
                self.notify(notice).await;
            }
        }
    }

    /// Show `text` to players, logging failures.
    pub async fn say(&self, text: &str) {
        let command = chat_command(self.style, text);
        if let Err(e) = self.sink.execute(&command).await {
            warn!(error = %e, "failed to send announcement in game");
        }
    }

    /// Drain the queue until it closes or shutdown is requested. An
    /// in-flight delivery is abandoned on shutdown.
    pub async fn run(
        self,
        greeting: Option<String>,
        mut queue: mpsc::Receiver<InboundMessage>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        info!("inbound relay started");
        if let Some(greeting) = greeting {
            tokio::select! {
                () = self.say(&greeting) => {}
                () = crate::shutdown::requested(&mut shutdown_rx) => return,
            }
        }
        loop {
            let msg = tokio::select! {
                msg = queue.recv() => match msg {
                    Some(msg) => msg,
                    None => break,
                },
                () = crate::shutdown::requested(&mut shutdown_rx) => break,
            };
            tokio::select! {
                () = self.deliver(msg) => {}
                () = crate::shutdown::requested(&mut shutdown_rx) => break,
            }
        }
        info!("inbound relay stopped");
    }

    async fn notify(&self, text: &str) {
        if let Err(e) = self.channel.send_message(self.channel_id, text).await {
            warn!(error = %e, "failed to post to channel");
        }
    }
}
