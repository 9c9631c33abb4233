//! The full relay loop with announcements and the perf poll.

use std::sync::Arc;
use std::time::Duration;

use mcrelay::lifecycle::ServerState;
use mcrelay::relay::{InboundStyle, Relay, RelayOptions};
use tokio::sync::{mpsc, watch};

use crate::fakes::{eventually, log_line, pipeline, FakeSink, RecordingChannel, CHAT_ID};

fn options() -> RelayOptions {
    RelayOptions {
        channel_id: CHAT_ID,
        name: "Bridge".to_owned(),
        announce: true,
        inbound_style: InboundStyle::Say,
        ping_interval: Duration::from_secs(300),
        perf_poll: None,
        low_tps_threshold: 15.0,
    }
}

#[tokio::test]
async fn relays_both_ways_and_announces() {
    let channel = Arc::new(RecordingChannel::default());
    let sink = Arc::new(FakeSink::ok());
    let relay = Relay::new(Arc::clone(&channel) as _, Arc::clone(&sink) as _, options());
    let (inbound_tx, inbound_rx) = relay.inbound_queue(8);
    let pipeline = pipeline(Arc::clone(&channel), ServerState::Started);
    let (lines_tx, lines_rx) = mpsc::channel(8);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let handle = tokio::spawn(relay.run(pipeline, lines_rx, inbound_rx, shutdown_rx));

    lines_tx
        .send(log_line("<Iluvator> TEST"))
        .await
        .expect("relay reading lines");
    assert!(inbound_tx.offer(mcrelay::channel::InboundMessage::text("Alice", "hi")).await);

    assert!(eventually(|| channel.texts().iter().any(|t| t == "<Iluvator> TEST")).await);
    assert!(eventually(|| sink.executed().len() == 2).await);

    shutdown_tx.send(true).expect("relay listening");
    tokio::time::timeout(Duration::from_secs(10), handle)
        .await
        .expect("relay should stop")
        .expect("relay should not panic");

    let texts = channel.texts();
    assert_eq!(texts.first().map(String::as_str), Some("Bridge joined the chat."));
    assert_eq!(texts.last().map(String::as_str), Some("Bridge left the chat."));
    assert_eq!(
        sink.executed(),
        vec![
            "say Bridge joined the game",
            "say <Alice>: hi",
            "say Bridge left the game",
        ]
    );
}

#[tokio::test]
async fn quiet_relay_makes_no_announcements() {
    let channel = Arc::new(RecordingChannel::default());
    let sink = Arc::new(FakeSink::ok());
    let relay = Relay::new(
        Arc::clone(&channel) as _,
        Arc::clone(&sink) as _,
        RelayOptions {
            announce: false,
            ..options()
        },
    );
    let (_inbound_tx, inbound_rx) = relay.inbound_queue(8);
    let pipeline = pipeline(Arc::clone(&channel), ServerState::Stopped);
    let (_lines_tx, lines_rx) = mpsc::channel(8);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let handle = tokio::spawn(relay.run(pipeline, lines_rx, inbound_rx, shutdown_rx));
    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown_tx.send(true).expect("relay listening");
    tokio::time::timeout(Duration::from_secs(10), handle)
        .await
        .expect("relay should stop")
        .expect("relay should not panic");

    assert!(channel.texts().is_empty());
    assert!(sink.executed().is_empty());
}

#[tokio::test]
async fn low_tps_is_reported_only_while_started() {
    let channel = Arc::new(RecordingChannel::default());
    let sink = Arc::new(FakeSink::new(|command| match command {
        "forge tps" => Ok("Overall: Mean tick time: 98.0 ms. Mean TPS: 10.200".to_owned()),
        _ => Ok(String::new()),
    }));
    let relay = Relay::new(
        Arc::clone(&channel) as _,
        Arc::clone(&sink) as _,
        RelayOptions {
            announce: false,
            perf_poll: Some(Duration::from_millis(30)),
            ..options()
        },
    );
    let (_inbound_tx, inbound_rx) = relay.inbound_queue(8);
    let pipeline = pipeline(Arc::clone(&channel), ServerState::Stopped);
    let (lines_tx, lines_rx) = mpsc::channel(8);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let handle = tokio::spawn(relay.run(pipeline, lines_rx, inbound_rx, shutdown_rx));

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(sink.executed().is_empty(), "no polling while stopped");

    lines_tx
        .send(log_line("[Rcon] SERVER STARTED..."))
        .await
        .expect("relay reading lines");
    assert!(
        eventually(|| channel
            .texts()
            .iter()
            .any(|t| t == "Server is lagging. TPS: 10.2"))
        .await
    );

    shutdown_tx.send(true).expect("relay listening");
    tokio::time::timeout(Duration::from_secs(10), handle)
        .await
        .expect("relay should stop")
        .expect("relay should not panic");
    assert_eq!(channel.texts().first().map(String::as_str), Some("Server started."));
}
