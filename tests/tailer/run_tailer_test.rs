//! The async tailing loop.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use mcrelay::tailer::{run_tailer, LogTailer, StartPosition, TailerOptions};
use tokio::sync::{mpsc, watch};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

fn append(path: &Path, text: &str) {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .expect("should open log for append");
    file.write_all(text.as_bytes()).expect("should append");
}

fn fast_options() -> TailerOptions {
    TailerOptions {
        poll_interval: Duration::from_millis(20),
        max_backoff: Duration::from_millis(200),
    }
}

async fn recv(rx: &mut mpsc::Receiver<String>) -> String {
    tokio::time::timeout(RECV_TIMEOUT, rx.recv())
        .await
        .expect("line should arrive in time")
        .expect("tailer should still be running")
}

#[tokio::test]
async fn streams_appended_lines_and_returns_cursor() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let path = dir.path().join("latest.log");
    append(&path, "history\n");

    let (lines_tx, mut lines_rx) = mpsc::channel(8);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let tailer = LogTailer::open(&path, StartPosition::End);
    let handle = tokio::spawn(run_tailer(tailer, fast_options(), lines_tx, shutdown_rx));

    append(&path, "one\ntwo\n");
    assert_eq!(recv(&mut lines_rx).await, "one");
    assert_eq!(recv(&mut lines_rx).await, "two");

    shutdown_tx.send(true).expect("tailer should be listening");
    let cursor = tokio::time::timeout(RECV_TIMEOUT, handle)
        .await
        .expect("tailer should stop")
        .expect("tailer should not panic");
    assert_eq!(cursor.offset, 16);
}

#[tokio::test]
async fn follows_file_created_after_start() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let path = dir.path().join("latest.log");

    let (lines_tx, mut lines_rx) = mpsc::channel(8);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let tailer = LogTailer::open(&path, StartPosition::End);
    let handle = tokio::spawn(run_tailer(tailer, fast_options(), lines_tx, shutdown_rx));

    tokio::time::sleep(Duration::from_millis(50)).await;
    append(&path, "hello\n");
    assert_eq!(recv(&mut lines_rx).await, "hello");

    shutdown_tx.send(true).expect("tailer should be listening");
    tokio::time::timeout(RECV_TIMEOUT, handle)
        .await
        .expect("tailer should stop")
        .expect("tailer should not panic");
}

#[tokio::test]
async fn stops_when_consumer_is_gone() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let path = dir.path().join("latest.log");
    append(&path, "a\nb\n");

    let (lines_tx, lines_rx) = mpsc::channel(1);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    drop(lines_rx);
    let tailer = LogTailer::open(&path, StartPosition::Beginning);

    let cursor = tokio::time::timeout(
        RECV_TIMEOUT,
        run_tailer(tailer, fast_options(), lines_tx, shutdown_rx),
    )
    .await
    .expect("tailer should stop on its own");
    // "a" was taken from the file before the send failed.
    assert_eq!(cursor.offset, 2);
}

#[tokio::test]
async fn read_errors_are_retried_until_the_log_is_readable() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let path = dir.path().join("latest.log");
    fs::create_dir(&path).expect("should create directory");
    append(&path.join("entry"), "makes the directory non-empty\n");

    let (lines_tx, mut lines_rx) = mpsc::channel(8);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let tailer = LogTailer::open(&path, StartPosition::Beginning);
    let handle = tokio::spawn(run_tailer(tailer, fast_options(), lines_tx, shutdown_rx));

    // Let a few reads fail and the backoff reach its cap.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!handle.is_finished());

    fs::remove_dir_all(&path).expect("should remove directory");
    append(&path, "after\n");
    assert_eq!(recv(&mut lines_rx).await, "after");

    shutdown_tx.send(true).expect("tailer should be listening");
    tokio::time::timeout(RECV_TIMEOUT, handle)
        .await
        .expect("tailer should stop")
        .expect("tailer should not panic");
}
