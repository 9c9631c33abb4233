//! Server lifecycle tracking and event forwarding decisions.
//!
//! The machine only moves on the three lifecycle events:
//!
//! | event            | from                  | to         |
//! |------------------|-----------------------|------------|
//! | `ServerStopped`  | any                   | `Stopped`  |
//! | `ServerStarting` | any                   | `Starting` |
//! | `ServerStarted`  | `Starting`, `Stopped` | `Started`  |
//! | `ServerStarted`  | `Started`             | `Started`  |
//!
//! While `Starting`, every non-lifecycle event is dropped. That removes the
//! flood of mod-loading output between a stop and the next full start.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::classifier::{LineClassifier, TimestampExtractor};
use crate::event::{Event, EventKind};

/// Lifecycle phase of the Minecraft server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerState {
    /// Not running.
    Stopped,
    /// Booting; log output is noise until the start completes.
    Starting,
    /// Fully started and accepting players.
    Started,
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Started => "started",
        };
        f.write_str(name)
    }
}

/// What to do with an event after the state machine has seen it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Pass the event on to the channel.
    Forward,
    /// Drop the event; it is not queued for later.
    Suppress,
}

/// Decide whether `event` is forwarded when the server is in `state`.
///
/// Lifecycle events are always forwarded, unrecognized lines never are,
/// and everything else is forwarded unless the server is starting.
pub fn forwarding_decision(event: &Event, state: ServerState) -> Decision {
    if event.is_lifecycle() {
        return Decision::Forward;
    }
    match (&event.kind, state) {
        (EventKind::Unrecognized, _) | (_, ServerState::Starting) => Decision::Suppress,
        _ => Decision::Forward,
    }
}

/// Owns the current [`ServerState`] and applies events to it.
#[derive(Debug, Clone)]
pub struct LifecycleStateMachine {
    state: ServerState,
}

impl LifecycleStateMachine {
    /// Create a machine in the given initial state.
    pub fn new(initial: ServerState) -> Self {
        Self { state: initial }
    }

    /// Current state.
    pub fn state(&self) -> ServerState {
        self.state
    }

    /// Apply one event, returning the resulting state and the forwarding
    /// decision for that event.
    ///
    /// The decision for a non-lifecycle event is taken against the state
    /// before the call (which is also the state after it, since only
    /// lifecycle events change state).
    pub fn apply(&mut self, event: &Event) -> (ServerState, Decision) {
        let decision = forwarding_decision(event, self.state);
        let next = match event.kind {
            EventKind::ServerStopped { .. } => ServerState::Stopped,
            EventKind::ServerStarting { .. } => ServerState::Starting,
            EventKind::ServerStarted { .. } => ServerState::Started,
            _ => self.state,
        };
        if next != self.state {
            info!(from = %self.state, to = %next, "server state changed");
            self.state = next;
        } else if event.is_lifecycle() {
            debug!(state = %self.state, event = event.kind_name(), "repeated lifecycle marker");
        }
        (self.state, decision)
    }
}

impl Default for LifecycleStateMachine {
    fn default() -> Self {
        Self::new(ServerState::Stopped)
    }
}

/// Replay the lifecycle markers in an existing log to find the state the
/// server is in right now.
///
/// Returns `None` when the file does not exist or contains no marker, so
/// the caller can fall back to its default.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read.
pub fn detect_initial_state(
    path: &Path,
    classifier: &LineClassifier,
    timestamps: &dyn TimestampExtractor,
) -> std::io::Result<Option<ServerState>> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    let text = String::from_utf8_lossy(&bytes);

    let mut machine: Option<LifecycleStateMachine> = None;
    for line in text.lines() {
        let event = classifier.classify(line, timestamps);
        if event.is_lifecycle() {
            machine
                .get_or_insert_with(LifecycleStateMachine::default)
                .apply(&event);
        }
    }
    Ok(machine.map(|m| m.state()))
}
