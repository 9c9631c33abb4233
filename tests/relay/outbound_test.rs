//! Log lines through the outbound pipeline.

use std::sync::Arc;
use std::time::Duration;

use mcrelay::lifecycle::ServerState;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::fakes::{log_line, pipeline, RecordingChannel, CHAT_ID};

fn process_all(lines: &[&str], initial: ServerState) -> Vec<String> {
    let channel = Arc::new(RecordingChannel::default());
    let mut pipeline = pipeline(channel, initial);
    let now = Instant::now();
    lines
        .iter()
        .filter_map(|message| pipeline.process_line(&log_line(message), now))
        .collect()
}

#[test]
fn startup_noise_is_suppressed() {
    let forwarded = process_all(
        &[
            "[Rcon] SERVER STOPPED...",
            "[Rcon] SERVER STARTING...",
            "<Bob> anyone here?",
            "Iluvator joined the game",
            "[Rcon] SERVER STARTED...",
        ],
        ServerState::Stopped,
    );
    assert_eq!(
        forwarded,
        vec!["Server stopped.", "Server is starting...", "Server started."]
    );
}

#[test]
fn chat_and_announcements_after_start() {
    let forwarded = process_all(
        &[
            "<Iluvator> TEST",
            "Iluvator has made the advancement [Stone Age]",
            "[Iluvator: Set own game mode to Creative Mode]",
            "Iluvator left the game",
        ],
        ServerState::Started,
    );
    assert_eq!(
        forwarded,
        vec![
            "<Iluvator> TEST",
            "Iluvator has made the advancement [Stone Age]",
            "Iluvator left the game",
        ]
    );
}

#[test]
fn duplicate_start_markers_collapse_within_window() {
    let channel = Arc::new(RecordingChannel::default());
    let mut pipeline = pipeline(channel, ServerState::Starting);
    let t0 = Instant::now();
    let started = log_line("[Rcon] SERVER STARTED...");
    let done = log_line(r#"Done (8.123s)! For help, type "help""#);

    assert_eq!(
        pipeline.process_line(&started, t0).as_deref(),
        Some("Server started.")
    );
    assert_eq!(pipeline.process_line(&done, t0), None);

    let later = t0
        .checked_add(Duration::from_secs(6))
        .expect("instant in range");
    assert_eq!(
        pipeline.process_line(&started, later).as_deref(),
        Some("Server started.")
    );
}

#[test]
fn vanish_is_shown_as_leave_and_join() {
    let forwarded = process_all(
        &[
            "[Iluvator: [Vanishmod] Iluvator vanished]",
            "<Iluvator> nobody can see me",
            "<Bob> hello?",
            "[Iluvator: [Vanishmod] Iluvator unvanished]",
            "<Iluvator> back",
        ],
        ServerState::Started,
    );
    assert_eq!(
        forwarded,
        vec![
            "Iluvator left the game",
            "<Bob> hello?",
            "Iluvator joined the game",
            "<Iluvator> back",
        ]
    );
}

#[test]
fn state_changes_are_published() {
    let channel = Arc::new(RecordingChannel::default());
    let mut pipeline = pipeline(channel, ServerState::Stopped);
    let mut state_rx = pipeline.subscribe_state();
    assert_eq!(*state_rx.borrow_and_update(), ServerState::Stopped);

    pipeline.process_line(&log_line("<Bob> hi"), Instant::now());
    assert!(!state_rx.has_changed().expect("sender alive"));

    pipeline.process_line(&log_line("[Rcon] SERVER STARTING..."), Instant::now());
    assert!(state_rx.has_changed().expect("sender alive"));
    assert_eq!(*state_rx.borrow_and_update(), ServerState::Starting);
    assert_eq!(pipeline.state(), ServerState::Starting);
}

#[tokio::test]
async fn run_posts_forwarded_lines() {
    let channel = Arc::new(RecordingChannel::default());
    let pipeline = pipeline(Arc::clone(&channel), ServerState::Started);
    let (lines_tx, lines_rx) = mpsc::channel(8);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    for message in ["<Bob> one", "garbage that means nothing", "<Bob> two"] {
        lines_tx
            .send(log_line(message))
            .await
            .expect("pipeline queue open");
    }
    drop(lines_tx);

    tokio::time::timeout(Duration::from_secs(5), pipeline.run(lines_rx, shutdown_rx))
        .await
        .expect("pipeline should stop when the tailer is gone");

    assert_eq!(channel.texts(), vec!["<Bob> one", "<Bob> two"]);
    assert_eq!(channel.ids(), vec![CHAT_ID, CHAT_ID]);
}
