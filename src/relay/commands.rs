//! Slash commands answered by the relay instead of being sent into the game.

use tracing::{info, warn};

use crate::rcon::CommandSink;

/// Commands listed by `/info`.
pub const SUPPORTED_COMMANDS: &str = "/info, /list, /tps";

/// A parsed slash command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlashCommand {
    /// Online players.
    List,
    /// Server tick rate.
    Tps,
    /// Supported commands.
    Info,
    /// Anything else starting with `/`.
    Unknown(String),
}

impl SlashCommand {
    /// Parse `text` as a command. Returns `None` for ordinary messages.
    ///
    /// A Telegram `@botname` suffix and any arguments are ignored.
    pub fn parse(text: &str) -> Option<Self> {
        let word = text.trim_start().strip_prefix('/')?;
        let name = word.split_whitespace().next().unwrap_or_default();
        let name = name.split('@').next().unwrap_or_default().to_lowercase();
        let command = match name.as_str() {
            "list" => Self::List,
            "tps" => Self::Tps,
            "info" | "help" => Self::Info,
            _ => Self::Unknown(name),
        };
        Some(command)
    }
}

/// Run `command` and return the reply posted to the channel.
pub async fn respond(command: &SlashCommand, sink: &dyn CommandSink) -> String {
    info!(command = ?command, "slash command received");
    match command {
        SlashCommand::List => match sink.list_players().await {
            Ok(players) if !players.is_empty() => players,
            Ok(_) => "Could not get the player list.".to_owned(),
            Err(e) => {
                warn!(error = %e, "/list failed");
                "Could not get the player list.".to_owned()
            }
        },
        SlashCommand::Tps => match sink.execute(sink.perf_command()).await {
            Ok(response) => match crate::classifier::parse_tps(&response) {
                Some(tps) => format!("TPS: {tps:.1}"),
                None if !response.trim().is_empty() => response.trim().to_owned(),
                None => "Could not get the server TPS.".to_owned(),
            },
            Err(e) => {
                warn!(error = %e, "/tps failed");
                "Could not get the server TPS.".to_owned()
            }
        },
        SlashCommand::Info => format!("Available commands: {SUPPORTED_COMMANDS}"),
        SlashCommand::Unknown(name) => {
            info!(command = %name, "unknown slash command");
            format!("Unknown command. Available commands: {SUPPORTED_COMMANDS}")
        }
    }
}
