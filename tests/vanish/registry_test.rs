//! Vanish handling and persistence.

use std::fs;

use chrono::Local;
use mcrelay::event::{Event, EventKind};
use mcrelay::vanish::VanishRegistry;

fn toggle(player: &str, visible: bool) -> Event {
    Event::new(
        EventKind::VanishToggle {
            player: player.to_owned(),
            visible,
        },
        "raw vanish line",
    )
}

fn chat(player: &str) -> Event {
    Event::new(
        EventKind::Chat {
            player: player.to_owned(),
            text: "hello".to_owned(),
            timestamp: Local::now().naive_local(),
        },
        "raw chat line",
    )
}

#[test]
fn vanishing_looks_like_leaving() {
    let mut registry = VanishRegistry::in_memory();
    let event = registry.filter(toggle("Iluvator", false)).expect("toggle is forwarded");
    assert!(matches!(
        event.kind,
        EventKind::PlayerLeave { ref player, .. } if player == "Iluvator"
    ));
    assert_eq!(event.raw, "raw vanish line");
    assert!(registry.is_vanished("iluvator"));
}

#[test]
fn unvanishing_looks_like_joining() {
    let mut registry = VanishRegistry::in_memory();
    registry.vanish("Iluvator");
    let event = registry.filter(toggle("Iluvator", true)).expect("toggle is forwarded");
    assert!(matches!(
        event.kind,
        EventKind::PlayerJoin { ref player, .. } if player == "Iluvator"
    ));
    assert!(!registry.is_vanished("Iluvator"));
}

#[test]
fn vanished_players_are_silent() {
    let mut registry = VanishRegistry::in_memory();
    registry.vanish("Ghost");

    assert!(registry.filter(chat("Ghost")).is_none());
    assert!(registry.filter(chat("GHOST")).is_none());
    let leave = Event::new(
        EventKind::PlayerLeave {
            player: "Ghost".to_owned(),
            timestamp: Local::now().naive_local(),
        },
        "",
    );
    assert!(registry.filter(leave).is_none());

    assert!(registry.filter(chat("Bob")).is_some());
}

#[test]
fn lifecycle_events_pass_through() {
    let mut registry = VanishRegistry::in_memory();
    registry.vanish("Ghost");
    let stopped = Event::new(
        EventKind::ServerStopped {
            timestamp: Local::now().naive_local(),
        },
        "",
    );
    assert_eq!(registry.filter(stopped.clone()), Some(stopped));
}

#[test]
fn vanish_and_reveal_report_changes() {
    let mut registry = VanishRegistry::in_memory();
    assert!(registry.vanish("Bob"));
    assert!(!registry.vanish("bob"));
    assert!(registry.reveal("BOB"));
    assert!(!registry.reveal("Bob"));
    assert_eq!(registry.players().count(), 0);
}

#[test]
fn registry_survives_restart() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let path = dir.path().join("state").join("vanished.json");

    let mut registry = VanishRegistry::load(&path);
    assert_eq!(registry.players().count(), 0);
    registry.filter(toggle("Iluvator", false));
    registry.vanish("Alice");
    assert!(path.exists());

    let reloaded = VanishRegistry::load(&path);
    assert_eq!(reloaded.players().collect::<Vec<_>>(), vec!["alice", "iluvator"]);
}

#[test]
fn corrupt_store_starts_empty_and_is_rewritten() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let path = dir.path().join("vanished.json");
    fs::write(&path, "{not json").expect("should write store");

    let mut registry = VanishRegistry::load(&path);
    assert_eq!(registry.players().count(), 0);

    registry.vanish("Bob");
    let stored = fs::read_to_string(&path).expect("store should be readable");
    assert_eq!(stored, r#"["bob"]"#);
}
