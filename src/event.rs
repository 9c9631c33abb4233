//! Typed events produced by classifying Minecraft server log lines.

use chrono::NaiveDateTime;

/// A classified log line.
///
/// Every event keeps the raw line it was produced from so that dropped or
/// suspicious events can be diagnosed from the relay's own logs.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// What the line means.
    pub kind: EventKind,
    /// The originating log line, without its trailing newline.
    pub raw: String,
}

/// Kind of a classified log line, with its extracted fields.
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    /// A player chat message.
    Chat {
        /// Player name as printed in the chat prefix.
        player: String,
        /// Message body.
        text: String,
        /// Log timestamp of the line.
        timestamp: NaiveDateTime,
    },
    /// A public player announcement: death message, advancement, goal or challenge.
    Announcement {
        /// Player the announcement is about.
        player: String,
        /// Full announcement text, player name included.
        text: String,
        /// Log timestamp of the line.
        timestamp: NaiveDateTime,
    },
    /// A player joined the game.
    PlayerJoin {
        /// Player name.
        player: String,
        /// Log timestamp of the line.
        timestamp: NaiveDateTime,
    },
    /// A player left the game.
    PlayerLeave {
        /// Player name.
        player: String,
        /// Log timestamp of the line.
        timestamp: NaiveDateTime,
    },
    /// A vanish mod hid or revealed a player.
    VanishToggle {
        /// Player name.
        player: String,
        /// `true` when the player became visible again.
        visible: bool,
    },
    /// The server announced it has stopped.
    ServerStopped {
        /// Log timestamp of the line.
        timestamp: NaiveDateTime,
    },
    /// The server announced it is starting.
    ServerStarting {
        /// Log timestamp of the line.
        timestamp: NaiveDateTime,
    },
    /// The server announced it has fully started.
    ServerStarted {
        /// Log timestamp of the line.
        timestamp: NaiveDateTime,
    },
    /// A performance report with ticks per second.
    PerfReport {
        /// Mean ticks per second.
        tps: f64,
        /// Log timestamp of the line.
        timestamp: NaiveDateTime,
    },
    /// Anything else. Never forwarded.
    Unrecognized,
}

impl Event {
    /// Build an event from its kind and originating line.
    pub fn new(kind: EventKind, raw: impl Into<String>) -> Self {
        Self {
            kind,
            raw: raw.into(),
        }
    }

    /// Whether this event is one of the three server lifecycle markers.
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self.kind,
            EventKind::ServerStopped { .. }
                | EventKind::ServerStarting { .. }
                | EventKind::ServerStarted { .. }
        )
    }

    /// The player this event concerns, if any.
    pub fn player(&self) -> Option<&str> {
        match &self.kind {
            EventKind::Chat { player, .. }
            | EventKind::Announcement { player, .. }
            | EventKind::PlayerJoin { player, .. }
            | EventKind::PlayerLeave { player, .. }
            | EventKind::VanishToggle { player, .. } => Some(player),
            _ => None,
        }
    }

    /// Short machine-readable kind name for structured logs.
    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            EventKind::Chat { .. } => "chat",
            EventKind::Announcement { .. } => "announcement",
            EventKind::PlayerJoin { .. } => "player_join",
            EventKind::PlayerLeave { .. } => "player_leave",
            EventKind::VanishToggle { .. } => "vanish_toggle",
            EventKind::ServerStopped { .. } => "server_stopped",
            EventKind::ServerStarting { .. } => "server_starting",
            EventKind::ServerStarted { .. } => "server_started",
            EventKind::PerfReport { .. } => "perf_report",
            EventKind::Unrecognized => "unrecognized",
        }
    }
}
