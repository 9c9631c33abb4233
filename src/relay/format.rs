//! Text rendering in both directions.

use serde::{Deserialize, Serialize};

use crate::channel::InboundMessage;
use crate::event::{Event, EventKind};
use crate::rcon::packet::MAX_REQUEST_PAYLOAD;

/// Longest replied-to text shown in game, in characters.
pub const MAX_REPLY_TEXT: usize = 100;
/// Longest replied-to author shown in game, in characters.
pub const MAX_REPLY_AUTHOR: usize = 10;

const ATTACHMENT_TAG: &str = "[image] ";

/// How inbound messages are shown in game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InboundStyle {
    /// `tellraw @a` with a JSON text component.
    #[default]
    Tellraw,
    /// `say`, prefixed by the server name in game.
    Say,
}

/// Channel text for an event, or `None` if it is never posted.
pub fn outbound_text(event: &Event) -> Option<String> {
    let text = match &event.kind {
        EventKind::Chat { player, text, .. } => format!("<{player}> {text}"),
        EventKind::Announcement { text, .. } => text.clone(),
        EventKind::PlayerJoin { player, .. } => format!("{player} joined the game"),
        EventKind::PlayerLeave { player, .. } => format!("{player} left the game"),
        EventKind::ServerStopped { .. } => "Server stopped.".to_owned(),
        EventKind::ServerStarting { .. } => "Server is starting...".to_owned(),
        EventKind::ServerStarted { .. } => "Server started.".to_owned(),
        EventKind::PerfReport { tps, .. } => format!("TPS: {tps:.1}"),
        EventKind::VanishToggle { .. } | EventKind::Unrecognized => return None,
    };
    Some(text)
}

/// In-game text for a channel message:
/// `<Author>: [image] [RefAuthor: [image] ref text] -> text`.
pub fn inbound_text(msg: &InboundMessage) -> String {
    let mut out = format!("<{}>: ", msg.author);
    if msg.has_attachment {
        out.push_str(ATTACHMENT_TAG);
    }
    if let Some(reply) = &msg.reply {
        let author = reply.author.as_deref().unwrap_or("unknown");
        out.push('[');
        out.push_str(&truncate_chars(author, MAX_REPLY_AUTHOR));
        out.push_str(": ");
        if reply.has_attachment {
            out.push_str(ATTACHMENT_TAG);
        }
        out.push_str(&truncate_chars(&reply.text, MAX_REPLY_TEXT));
        out.push_str("] -> ");
    }
    out.push_str(&msg.text);
    out
}

/// Console command showing `text` to every player, shortened to fit one
/// RCON request.
pub fn chat_command(style: InboundStyle, text: &str) -> String {
    let text = single_line(text);
    let mut keep = text.chars().count();
    loop {
        let shown = truncate_chars(&text, keep);
        let command = render(style, &shown);
        if command.len() <= MAX_REQUEST_PAYLOAD || keep == 0 {
            return command;
        }
        // A character takes at most four bytes, more once JSON-escaped.
        let over = command.len().saturating_sub(MAX_REQUEST_PAYLOAD);
        keep = keep.saturating_sub(over.div_ceil(4).max(1));
    }
}

fn render(style: InboundStyle, text: &str) -> String {
    match style {
        InboundStyle::Tellraw => {
            let component = serde_json::json!({ "text": text });
            format!("tellraw @a {component}")
        }
        InboundStyle::Say => format!("say {text}"),
    }
}

fn single_line(text: &str) -> String {
    text.lines()
        .map(str::trim_end)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Cut `text` to `max` characters, marking the cut with `...`.
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", text.get(..idx).unwrap_or(text)),
        None => text.to_owned(),
    }
}
