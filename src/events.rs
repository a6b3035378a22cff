//! Analytics events, one per decision, delivered fire-and-forget.
//!
//! The engine only emits the tuple; persisting it (typically one row per
//! decision in an append-only log) is a consumer concern. Publication must
//! never block or fail the hot path, so events flow through
//! a broadcast channel: no subscribers means the event is counted as dropped
//! and forgotten.

use crate::policy::Strategy;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

/// One record per rate decision, mirroring the analytics schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionEvent {
    pub client_id: String,
    pub endpoint: String,
    pub allowed: bool,
    pub strategy: Strategy,
    pub limit: u32,
    pub remaining: u32,
    /// Epoch millis at decision time.
    pub timestamp_millis: u64,
    /// True when the decision was produced without consulting the store.
    pub fallback: bool,
}

/// Broadcast stream of [`DecisionEvent`]s with drop accounting.
#[derive(Debug, Clone)]
pub struct EventStream {
    sender: broadcast::Sender<DecisionEvent>,
    dropped: Arc<AtomicU64>,
}

impl EventStream {
    /// Create a stream buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender, dropped: Arc::new(AtomicU64::new(0)) }
    }

    /// Subscribe to subsequent events. Slow subscribers lag and lose the
    /// oldest buffered events, never slowing the publisher.
    pub fn subscribe(&self) -> broadcast::Receiver<DecisionEvent> {
        self.sender.subscribe()
    }

    /// Events published while no subscriber was listening.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub(crate) fn publish(&self, event: DecisionEvent) {
        if self.sender.send(event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl Default for EventStream {
    fn default() -> Self {
        Self::new(1024)
    }
}
