//! Tracking of players hidden by a vanish mod.
//!
//! A vanishing player is presented to the channel as leaving the game and a
//! reappearing one as joining. While vanished, nothing the player does is
//! forwarded.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Local;
use tracing::{debug, info, warn};

use crate::event::{Event, EventKind};

/// Set of vanished players, optionally persisted as a JSON array.
#[derive(Debug, Default)]
pub struct VanishRegistry {
    players: BTreeSet<String>,
    store: Option<PathBuf>,
}

impl VanishRegistry {
    /// Registry that lives only in memory.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load the registry from `path`.
    ///
    /// A missing file gives an empty registry. A file that is not a JSON array
    /// of strings is logged and treated as empty; it is overwritten on the
    /// next change.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let players = match std::fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<Vec<String>>(&contents) {
                Ok(names) => names.iter().map(|n| n.to_lowercase()).collect(),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "vanish store is corrupt, starting empty");
                    BTreeSet::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "vanish store does not exist yet");
                BTreeSet::new()
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read vanish store, starting empty");
                BTreeSet::new()
            }
        };
        Self {
            players,
            store: Some(path),
        }
    }

    /// Whether `player` is currently vanished. Case-insensitive.
    pub fn is_vanished(&self, player: &str) -> bool {
        self.players.contains(&player.to_lowercase())
    }

    /// Vanished player names, lower-cased and sorted.
    pub fn players(&self) -> impl Iterator<Item = &str> {
        self.players.iter().map(String::as_str)
    }

    /// Mark `player` as vanished. Returns `false` if already vanished.
    pub fn vanish(&mut self, player: &str) -> bool {
        let added = self.players.insert(player.to_lowercase());
        if added {
            self.persist();
        }
        added
    }

    /// Mark `player` as visible. Returns `false` if not vanished.
    pub fn reveal(&mut self, player: &str) -> bool {
        let removed = self.players.remove(&player.to_lowercase());
        if removed {
            self.persist();
        } else {
            warn!(player, "unvanish for a player that was not vanished");
        }
        removed
    }

    /// Apply vanish handling to an event on its way to the channel.
    ///
    /// Vanish toggles update the set and come back as a leave or join;
    /// player events from vanished players return `None`.
    pub fn filter(&mut self, event: Event) -> Option<Event> {
        match &event.kind {
            EventKind::VanishToggle { player, visible } => {
                let player = player.clone();
                let timestamp = Local::now().naive_local();
                let kind = if *visible {
                    self.reveal(&player);
                    info!(player = %player, "player unvanished");
                    EventKind::PlayerJoin { player, timestamp }
                } else {
                    self.vanish(&player);
                    info!(player = %player, "player vanished");
                    EventKind::PlayerLeave { player, timestamp }
                };
                Some(Event::new(kind, event.raw))
            }
            EventKind::Chat { player, .. }
            | EventKind::Announcement { player, .. }
            | EventKind::PlayerJoin { player, .. }
            | EventKind::PlayerLeave { player, .. }
                if self.is_vanished(player) =>
            {
                debug!(player = %player, kind = event.kind_name(), "skipping event from vanished player");
                None
            }
            _ => Some(event),
        }
    }

    fn persist(&self) {
        let Some(path) = &self.store else {
            return;
        };
        if let Err(e) = write_store(path, &self.players) {
            warn!(path = %path.display(), error = %e, "failed to persist vanish store");
        }
    }
}

fn write_store(path: &Path, players: &BTreeSet<String>) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string(players).context("failed to serialize vanish store")?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).with_context(|| format!("failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}
