//! Log line classification against real server output.

use mcrelay::classifier::{LifecycleMarkers, LineClassifier, LogTimestamp};
use mcrelay::event::{Event, EventKind};

const FORGE: &str = "[14Dec2023 07:29:06.982] [Server thread/INFO] [net.minecraft.server.dedicated.DedicatedServer/]: ";

fn classify(line: &str) -> Event {
    LineClassifier::default().classify(line, &LogTimestamp)
}

fn forge(message: &str) -> Event {
    classify(&format!("{FORGE}{message}"))
}

#[test]
fn forge_chat_line() {
    let event = forge("<Iluvator> TEST");
    match event.kind {
        EventKind::Chat {
            player,
            text,
            timestamp,
        } => {
            assert_eq!(player, "Iluvator");
            assert_eq!(text, "TEST");
            assert_eq!(timestamp.to_string(), "2023-12-14 07:29:06.982");
        }
        other => panic!("expected chat, got {other:?}"),
    }
}

#[test]
fn vanilla_chat_line() {
    let event = classify("[07:29:06] [Server thread/INFO]: <Bob> hello there");
    assert!(matches!(
        event.kind,
        EventKind::Chat { ref player, ref text, .. } if player == "Bob" && text == "hello there"
    ));
}

#[test]
fn rank_tags_are_not_part_of_the_name() {
    let event = forge("<[Admin] Bob> hi");
    assert_eq!(event.player(), Some("Bob"));
    assert_eq!(event.kind_name(), "chat");
}

#[test]
fn unsigned_chat_marker_is_ignored() {
    let event = classify("[07:29:06] [Server thread/INFO]: [Not Secure] <Bob> hi");
    assert_eq!(event.kind_name(), "chat");
    assert_eq!(event.player(), Some("Bob"));
}

#[test]
fn empty_chat_is_unrecognized() {
    assert_eq!(forge("<Bob> ").kind, EventKind::Unrecognized);
}

#[test]
fn raw_line_is_kept_without_newline() {
    let line = format!("{FORGE}<Iluvator> TEST");
    let event = classify(&format!("{line}\r\n"));
    assert_eq!(event.raw, line);
}

#[test]
fn join_and_leave() {
    assert!(matches!(
        forge("Iluvator joined the game").kind,
        EventKind::PlayerJoin { ref player, .. } if player == "Iluvator"
    ));
    assert!(matches!(
        forge("Bob (formerly known as Bobby) joined the game").kind,
        EventKind::PlayerJoin { ref player, .. } if player == "Bob"
    ));
    assert!(matches!(
        forge("Iluvator left the game").kind,
        EventKind::PlayerLeave { ref player, .. } if player == "Iluvator"
    ));
}

#[test]
fn announcements() {
    for message in [
        "Iluvator has made the advancement [Stone Age]",
        "Iluvator was slain by Zombie",
        "Iluvator fell from a high place",
        "Iluvator drowned",
    ] {
        match forge(message).kind {
            EventKind::Announcement { player, text, .. } => {
                assert_eq!(player, "Iluvator");
                assert_eq!(text, message);
            }
            other => panic!("expected announcement for {message:?}, got {other:?}"),
        }
    }
}

#[test]
fn vanish_toggles() {
    assert_eq!(
        forge("[Iluvator: [Vanishmod] Iluvator vanished]").kind,
        EventKind::VanishToggle {
            player: "Iluvator".to_owned(),
            visible: false,
        }
    );
    assert_eq!(
        forge("[Iluvator: [Vanishmod] Iluvator unvanished]").kind,
        EventKind::VanishToggle {
            player: "Iluvator".to_owned(),
            visible: true,
        }
    );
}

#[test]
fn operator_feedback_is_unrecognized() {
    for message in [
        "[Iluvator: Set own game mode to Creative Mode]",
        "[Iluvator: Set own game mode to Survival Mode]",
        "[Rcon: Set the time to 1000]",
        "There are 0 of a max of 20 players online:",
        "Saving the game (this may take a moment!)",
        "Saved the game",
    ] {
        assert_eq!(forge(message).kind, EventKind::Unrecognized, "{message}");
    }
}

#[test]
fn other_threads_and_loggers_are_unrecognized() {
    let auth = "[14Dec2023 07:29:01.100] [User Authenticator #1/INFO] [net.minecraft.server.network.ServerLoginPacketListenerImpl/]: UUID of player Iluvator is 0b7a";
    assert_eq!(classify(auth).kind, EventKind::Unrecognized);

    let mod_log = "[14Dec2023 07:29:01.100] [Server thread/INFO] [com.example.SomeMod/]: <Bob> not chat";
    assert_eq!(classify(mod_log).kind, EventKind::Unrecognized);

    let warn = "[07:29:06] [Server thread/WARN]: <Bob> not chat either";
    assert_eq!(classify(warn).kind, EventKind::Unrecognized);
}

#[test]
fn rcon_lifecycle_markers() {
    assert!(matches!(
        forge("[Rcon] SERVER STOPPED...").kind,
        EventKind::ServerStopped { .. }
    ));
    assert!(matches!(
        forge("[Rcon] SERVER STARTING...").kind,
        EventKind::ServerStarting { .. }
    ));
    assert!(matches!(
        forge("[Rcon] SERVER STARTED...").kind,
        EventKind::ServerStarted { .. }
    ));
    // Marker written straight into the log without a prefix.
    assert!(matches!(
        classify("[Rcon] SERVER STOPPED...").kind,
        EventKind::ServerStopped { .. }
    ));
}

#[test]
fn vanilla_lifecycle_lines() {
    assert!(matches!(
        classify("[07:00:00] [main/INFO]: Starting minecraft server version 1.20.1").kind,
        EventKind::ServerStarting { .. }
    ));
    assert!(matches!(
        classify(r#"[07:00:12] [Server thread/INFO]: Done (12.345s)! For help, type "help""#).kind,
        EventKind::ServerStarted { .. }
    ));
    assert!(matches!(
        classify("[07:30:00] [Server thread/INFO]: Stopping server").kind,
        EventKind::ServerStopped { .. }
    ));
}

#[test]
fn perf_report_line() {
    match forge("Overall: Mean tick time: 40.000 ms. Mean TPS: 19.250").kind {
        EventKind::PerfReport { tps, .. } => assert_eq!(tps, 19.25),
        other => panic!("expected perf report, got {other:?}"),
    }
}

#[test]
fn extra_markers_extend_builtins() {
    let markers = LifecycleMarkers {
        stopped: vec!["Server halted".to_owned()],
        starting: vec![],
        started: vec!["All mods (loaded)".to_owned()],
    };
    let classifier = LineClassifier::with_markers(&markers).expect("markers should compile");

    let halted = classifier.classify(&format!("{FORGE}server HALTED by admin"), &LogTimestamp);
    assert!(matches!(halted.kind, EventKind::ServerStopped { .. }));

    // Markers are literal text, not patterns.
    let loaded = classifier.classify(&format!("{FORGE}All mods (loaded)"), &LogTimestamp);
    assert!(matches!(loaded.kind, EventKind::ServerStarted { .. }));

    let builtin = classifier.classify(&format!("{FORGE}[Rcon] SERVER STOPPED..."), &LogTimestamp);
    assert!(matches!(builtin.kind, EventKind::ServerStopped { .. }));
}
