//! Log lines to channel messages.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::dedup::RecentMessages;
use super::format::outbound_text;
use crate::channel::ChatChannel;
use crate::classifier::{LineClassifier, TimestampExtractor};
use crate::lifecycle::{Decision, LifecycleStateMachine, ServerState};
use crate::vanish::VanishRegistry;

/// Classification, lifecycle gating, vanish filtering, formatting and
/// deduplication for one log stream.
///
/// Owns the lifecycle state; other tasks observe it through
/// [`Self::subscribe_state`].
pub struct OutboundPipeline {
    classifier: LineClassifier,
    timestamps: Box<dyn TimestampExtractor>,
    machine: LifecycleStateMachine,
    vanish: VanishRegistry,
    recent: RecentMessages,
    channel: Arc<dyn ChatChannel>,
    channel_id: i64,
    state_tx: watch::Sender<ServerState>,
}

impl OutboundPipeline {
    /// Assemble a pipeline posting to `channel_id`.
    pub fn new(
        classifier: LineClassifier,
        timestamps: Box<dyn TimestampExtractor>,
        machine: LifecycleStateMachine,
        vanish: VanishRegistry,
        recent: RecentMessages,
        channel: Arc<dyn ChatChannel>,
        channel_id: i64,
    ) -> Self {
        let (state_tx, _) = watch::channel(machine.state());
        Self {
            classifier,
            timestamps,
            machine,
            vanish,
            recent,
            channel,
            channel_id,
            state_tx,
        }
    }

    /// Current server state.
    pub fn state(&self) -> ServerState {
        self.machine.state()
    }

    /// Follow state changes from another task.
    pub fn subscribe_state(&self) -> watch::Receiver<ServerState> {
        self.state_tx.subscribe()
    }

    /// Run one line through the pipeline and return the text to post, if any.
    pub fn process_line(&mut self, line: &str, now: Instant) -> Option<String> {
        let event = self.classifier.classify(line, self.timestamps.as_ref());
        let (state, decision) = self.machine.apply(&event);
        self.state_tx.send_if_modified(|current| {
            let changed = *current != state;
            *current = state;
            changed
        });

        if decision == Decision::Suppress {
            debug!(kind = event.kind_name(), state = %state, raw = %event.raw, "event suppressed");
            return None;
        }

        let event = self.vanish.filter(event)?;
        let text = outbound_text(&event)?;
        if !self.recent.admit(&text, now) {
            debug!(kind = event.kind_name(), text = %text, "duplicate message dropped");
            return None;
        }
        info!(kind = event.kind_name(), player = event.player().unwrap_or(""), "forwarding event");
        Some(text)
    }

    /// Process `line` and post the result. Returns the posted text.
    ///
    /// A failed post is logged; the text still counts as sent for
    /// deduplication.
    pub async fn handle_line(&mut self, line: &str) -> Option<String> {
        let text = self.process_line(line, Instant::now())?;
        if let Err(e) = self.channel.send_message(self.channel_id, &text).await {
            warn!(error = %e, "failed to post to channel");
        }
        Some(text)
    }

    /// Consume lines until the tailer stops or shutdown is requested.
    pub async fn run(
        mut self,
        mut lines_rx: mpsc::Receiver<String>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        info!(state = %self.state(), "outbound relay started");
        loop {
            let line = tokio::select! {
                line = lines_rx.recv() => match line {
                    Some(line) => line,
                    None => break,
                },
                () = crate::shutdown::requested(&mut shutdown_rx) => break,
            };
            self.handle_line(&line).await;
        }
        info!(state = %self.state(), "outbound relay stopped");
    }
}
