//! Per-request progress streaming
//!
//! Strategies and the router produce progress events into a bounded
//! per-request channel; the SSE handler consumes them. When the consumer
//! lags, intermediate events are dropped (the final result never travels
//! through this channel). A closed channel signals cancellation to
//! producers.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Default channel capacity per request
pub const PROGRESS_BUFFER: usize = 64;

/// One progress event with a monotonic step index per request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Monotonic step index (1..N)
    pub step: u32,

    /// Human-readable message
    pub message: String,

    /// Optional structured metadata (batch index, latency so far)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Summary of a completed retrieval stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalSummary {
    pub num_chunks: usize,
    pub retrieval_time_ms: u64,
    /// Distinct source paths of the retrieved chunks
    pub citations: Vec<String>,
}

/// Items delivered to the stream consumer
#[derive(Debug, Clone)]
pub enum StreamItem {
    Progress(ProgressEvent),
    Retrieval(RetrievalSummary),
}

/// Producer handle for a per-request progress channel
///
/// Cheap to clone; all clones share the step counter so indices stay
/// monotonic across concurrent producers.
#[derive(Clone)]
pub struct ProgressBus {
    tx: Option<mpsc::Sender<StreamItem>>,
    step: Arc<AtomicU32>,
}

impl ProgressBus {
    /// Create a bus with an attached consumer
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<StreamItem>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                tx: Some(tx),
                step: Arc::new(AtomicU32::new(0)),
            },
            rx,
        )
    }

    /// Bus with no consumer, for non-streaming requests
    pub fn disabled() -> Self {
        Self {
            tx: None,
            step: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Emit a progress message
    pub fn emit(&self, message: impl Into<String>) {
        self.emit_with(message, None);
    }

    /// Emit a progress message with metadata
    ///
    /// The step index advances even when the event is dropped, so observed
    /// indices stay monotonic.
    pub fn emit_with(&self, message: impl Into<String>, metadata: Option<serde_json::Value>) {
        let step = self.step.fetch_add(1, Ordering::Relaxed) + 1;
        let Some(tx) = &self.tx else {
            return;
        };
        let event = ProgressEvent {
            step,
            message: message.into(),
            metadata,
        };
        // Drop intermediate events when the consumer is slow or gone
        if let Err(e) = tx.try_send(StreamItem::Progress(event)) {
            tracing::debug!(error = %e, "Dropped progress event");
        }
    }

    /// Emit a retrieval summary
    pub fn emit_retrieval(&self, summary: RetrievalSummary) {
        let Some(tx) = &self.tx else {
            return;
        };
        if let Err(e) = tx.try_send(StreamItem::Retrieval(summary)) {
            tracing::debug!(error = %e, "Dropped retrieval event");
        }
    }

    /// Whether the consumer has gone away; producers treat this as a
    /// cancellation signal
    pub fn is_closed(&self) -> bool {
        match &self.tx {
            Some(tx) => tx.is_closed(),
            None => false,
        }
    }

    /// Last emitted step index
    pub fn current_step(&self) -> u32 {
        self.step.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_arrive_in_order_with_monotonic_steps() {
        let (bus, mut rx) = ProgressBus::channel(16);

        bus.emit("first");
        bus.emit("second");
        bus.emit_with("third", Some(serde_json::json!({"batch": 1})));

        let mut steps = Vec::new();
        while let Ok(item) = rx.try_recv() {
            if let StreamItem::Progress(event) = item {
                steps.push(event.step);
            }
        }
        assert_eq!(steps, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_full_buffer_drops_but_keeps_counting() {
        let (bus, mut rx) = ProgressBus::channel(1);

        bus.emit("kept");
        bus.emit("dropped");
        bus.emit("dropped too");

        assert_eq!(bus.current_step(), 3);

        let StreamItem::Progress(first) = rx.try_recv().unwrap() else {
            panic!("expected progress item");
        };
        assert_eq!(first.step, 1);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_channel_is_cancellation_signal() {
        let (bus, rx) = ProgressBus::channel(4);
        assert!(!bus.is_closed());
        drop(rx);
        assert!(bus.is_closed());
        // Emitting into a closed channel must not panic
        bus.emit("into the void");
    }

    #[tokio::test]
    async fn test_disabled_bus_is_inert() {
        let bus = ProgressBus::disabled();
        assert!(!bus.is_closed());
        bus.emit("nothing happens");
        assert_eq!(bus.current_step(), 1);
    }

    #[tokio::test]
    async fn test_clones_share_step_counter() {
        let (bus, mut rx) = ProgressBus::channel(16);
        let clone = bus.clone();

        bus.emit("a");
        clone.emit("b");

        let mut steps = Vec::new();
        while let Ok(StreamItem::Progress(event)) = rx.try_recv() {
            steps.push(event.step);
        }
        assert_eq!(steps, vec![1, 2]);
    }
}
