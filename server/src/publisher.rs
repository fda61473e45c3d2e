//! Synchronous fan-out of [`IngestEvent`]s to registered sinks.
//!
//! Dispatch happens on whichever task produced the event, usually the I/O
//! task. Sinks must return quickly; there is no queue and no backpressure.

use crate::events::IngestEvent;
use shared::Point;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::mpsc;

/// Receives events from the [`Publisher`].
pub trait EventSink: Send + Sync {
    fn handle(&self, event: &IngestEvent);
}

impl<F> EventSink for F
where
    F: Fn(&IngestEvent) + Send + Sync,
{
    fn handle(&self, event: &IngestEvent) {
        self(event)
    }
}

/// Forwards events into an unbounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelSink(pub mpsc::UnboundedSender<IngestEvent>);

impl EventSink for ChannelSink {
    fn handle(&self, event: &IngestEvent) {
        // A closed receiver just means nobody is listening anymore
        let _ = self.0.send(event.clone());
    }
}

#[derive(Default)]
pub struct Publisher {
    sinks: RwLock<Vec<Arc<dyn EventSink>>>,
}

impl Publisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, sink: Arc<dyn EventSink>) {
        self.sinks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sink);
    }

    /// Delivers `event` to every sink in subscription order.
    pub fn publish(&self, event: IngestEvent) {
        // Snapshot so a sink may subscribe others without deadlocking
        let sinks: Vec<Arc<dyn EventSink>> = self
            .sinks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for sink in sinks {
            sink.handle(&event);
        }
    }
}

/// Forwards every event to the `log` facade at its notification severity.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl EventSink for LogNotifier {
    fn handle(&self, event: &IngestEvent) {
        let severity = event.severity();
        log::log!(severity.log_level(), "[{}] {}", severity, event.message());
    }
}

/// Single-slot holder for the most recent frame.
///
/// Every frame overwrites the previous one; nothing is queued.
#[derive(Debug, Default)]
pub struct LatestFrame {
    slot: Mutex<Option<Arc<[Point]>>>,
    frames_seen: AtomicU64,
}

impl LatestFrame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self) -> Option<Arc<[Point]>> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Removes and returns the held frame, leaving the slot empty.
    pub fn take(&self) -> Option<Arc<[Point]>> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen.load(Ordering::Relaxed)
    }
}

impl EventSink for LatestFrame {
    fn handle(&self, event: &IngestEvent) {
        if let IngestEvent::FrameReceived { points, .. } = event {
            *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(points));
            self.frames_seen.fetch_add(1, Ordering::Relaxed);
        }
    }
}
