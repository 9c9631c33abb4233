//! Suppression of repeated outbound messages.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

/// Bounded cache of recently sent texts.
///
/// A text is a duplicate if the exact same text was recorded within the
/// window. When the cache is full the oldest entry is evicted.
#[derive(Debug)]
pub struct RecentMessages {
    window: Duration,
    capacity: usize,
    entries: VecDeque<(String, Instant)>,
}

impl RecentMessages {
    /// Create a cache. A zero window disables deduplication.
    pub fn new(window: Duration, capacity: usize) -> Self {
        Self {
            window,
            capacity: capacity.max(1),
            entries: VecDeque::new(),
        }
    }

    /// Record `text` at `now`. Returns `false` if it duplicates a recent one.
    pub fn admit(&mut self, text: &str, now: Instant) -> bool {
        if self.window.is_zero() {
            return true;
        }
        self.entries
            .retain(|(_, seen)| now.saturating_duration_since(*seen) < self.window);

        if self.entries.iter().any(|(recent, _)| recent == text) {
            return false;
        }
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back((text.to_owned(), now));
        true
    }

    /// Number of cached texts.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
