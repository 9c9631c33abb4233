//! The relay: log events out to the channel, channel messages into the game.
//!
//! [`Relay::run`] spawns four tasks coordinated by one shutdown signal:
//!
//! 1. **Outbound** -- tailed lines through [`OutboundPipeline`] to the channel.
//! 2. **Inbound** -- queued channel messages through [`InboundWorker`] to RCON.
//! 3. **Perf poll** -- optional periodic TPS check with a low-TPS notice.
//! 4. **Ping** -- periodic debug-level liveness log.
//!
//! The outbound task owns the lifecycle state and publishes it over a
//! `watch` channel. The only resource shared between tasks is the command
//! sink, which serializes its own access.

pub mod commands;
pub mod dedup;
pub mod format;
pub mod inbound;
pub mod outbound;

use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::channel::{ChatChannel, InboundMessage};
use crate::event::{Event, EventKind};
use crate::lifecycle::ServerState;
use crate::rcon::CommandSink;

pub use dedup::RecentMessages;
pub use format::InboundStyle;
pub use inbound::{inbound_queue, InboundSender, InboundWorker};
pub use outbound::OutboundPipeline;

/// How long the leave announcements may take during shutdown.
const FAREWELL_TIMEOUT: Duration = Duration::from_secs(5);

/// Relay behaviour.
#[derive(Debug, Clone)]
pub struct RelayOptions {
    /// Channel receiving server events.
    pub channel_id: i64,
    /// Name used in the join and leave announcements.
    pub name: String,
    /// Announce joining and leaving in game and in the channel.
    pub announce: bool,
    /// How inbound messages are shown in game.
    pub inbound_style: InboundStyle,
    /// Interval of the liveness log.
    pub ping_interval: Duration,
    /// Interval of the TPS poll, `None` to disable.
    pub perf_poll: Option<Duration>,
    /// TPS below which the poll posts a notice.
    pub low_tps_threshold: f64,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            channel_id: 0,
            name: "Relay".to_owned(),
            announce: true,
            inbound_style: InboundStyle::Tellraw,
            ping_interval: Duration::from_secs(300),
            perf_poll: None,
            low_tps_threshold: 15.0,
        }
    }
}

/// Wires the channel and the command sink together.
pub struct Relay {
    channel: Arc<dyn ChatChannel>,
    sink: Arc<dyn CommandSink>,
    options: RelayOptions,
}

impl Relay {
    /// Create a relay.
    pub fn new(
        channel: Arc<dyn ChatChannel>,
        sink: Arc<dyn CommandSink>,
        options: RelayOptions,
    ) -> Self {
        Self {
            channel,
            sink,
            options,
        }
    }

    /// Bounded inbound queue posting overflow notices to this relay's channel.
    pub fn inbound_queue(
        &self,
        capacity: usize,
    ) -> (InboundSender, mpsc::Receiver<InboundMessage>) {
        inbound_queue(capacity, Arc::clone(&self.channel), self.options.channel_id)
    }

    /// Worker delivering inbound messages through this relay's sink.
    pub fn inbound_worker(&self) -> InboundWorker {
        InboundWorker::new(
            Arc::clone(&self.channel),
            Arc::clone(&self.sink),
            self.options.channel_id,
            self.options.inbound_style,
        )
    }

    /// Run until `shutdown_rx` turns true.
    pub async fn run(
        self,
        pipeline: OutboundPipeline,
        lines_rx: mpsc::Receiver<String>,
        inbound_rx: mpsc::Receiver<InboundMessage>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let name = self.options.name.clone();
        info!(channel_id = self.options.channel_id, state = %pipeline.state(), "relay starting");

        if self.options.announce {
            self.post(&format!("{name} joined the chat.")).await;
        }

        let state_rx = pipeline.subscribe_state();
        let worker = self.inbound_worker();
        let greeting = self
            .options
            .announce
            .then(|| format!("{name} joined the game"));

        let mut tasks = Vec::new();
        tasks.push(tokio::spawn(pipeline.run(lines_rx, shutdown_rx.clone())));
        tasks.push(tokio::spawn(worker.clone().run(
            greeting,
            inbound_rx,
            shutdown_rx.clone(),
        )));
        tasks.push(tokio::spawn(ping_loop(
            self.options.ping_interval,
            state_rx.clone(),
            shutdown_rx.clone(),
        )));
        if let Some(every) = self.options.perf_poll {
            tasks.push(tokio::spawn(perf_poll_loop(
                every,
                self.options.low_tps_threshold,
                Arc::clone(&self.sink),
                Arc::clone(&self.channel),
                self.options.channel_id,
                state_rx,
                shutdown_rx.clone(),
            )));
        }

        crate::shutdown::requested(&mut shutdown_rx).await;
        info!("relay shutting down");

        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "relay task ended abnormally");
            }
        }

        if self.options.announce {
            let farewell = async {
                worker.say(&format!("{name} left the game")).await;
                self.post(&format!("{name} left the chat.")).await;
            };
            if tokio::time::timeout(FAREWELL_TIMEOUT, farewell).await.is_err() {
                warn!("leave announcements timed out");
            }
        }
        info!("relay stopped");
    }

    async fn post(&self, text: &str) {
        if let Err(e) = self
            .channel
            .send_message(self.options.channel_id, text)
            .await
        {
            warn!(error = %e, "failed to post to channel");
        }
    }
}

async fn ping_loop(
    every: Duration,
    state_rx: watch::Receiver<ServerState>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    if every.is_zero() {
        return;
    }
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                debug!(state = %*state_rx.borrow(), "relay alive");
            }
            () = crate::shutdown::requested(&mut shutdown_rx) => break,
        }
    }
}

async fn perf_poll_loop(
    every: Duration,
    threshold: f64,
    sink: Arc<dyn CommandSink>,
    channel: Arc<dyn ChatChannel>,
    channel_id: i64,
    state_rx: watch::Receiver<ServerState>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval.tick().await;
    info!(every_secs = every.as_secs(), threshold, "perf poll started");

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            () = crate::shutdown::requested(&mut shutdown_rx) => break,
        }
        if *state_rx.borrow() != ServerState::Started {
            continue;
        }

        let tps = tokio::select! {
            result = sink.query_tps() => result,
            () = crate::shutdown::requested(&mut shutdown_rx) => break,
        };
        match tps {
            Ok(Some(tps)) if tps < threshold => {
                let event = Event::new(
                    EventKind::PerfReport {
                        tps,
                        timestamp: Local::now().naive_local(),
                    },
                    "",
                );
                let Some(report) = format::outbound_text(&event) else {
                    continue;
                };
                warn!(tps, threshold, "server tick rate is low");
                let text = format!("Server is lagging. {report}");
                if let Err(e) = channel.send_message(channel_id, &text).await {
                    warn!(error = %e, "failed to post perf report");
                }
            }
            Ok(Some(tps)) => debug!(tps, "server tick rate ok"),
            Ok(None) => warn!("could not parse perf command output"),
            Err(e) => warn!(error = %e, "perf poll failed"),
        }
    }
}
