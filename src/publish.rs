//! Visualization fan-out.
//!
//! One active sink per session: a later subscribe replaces the previous sink,
//! and a publish with no sink is dropped after a debug trace. Delivery is
//! at-most-once and best-effort; a client that reconnects re-requests current
//! state instead of replaying missed deltas. The sink table has its own lock,
//! so subscribing for one session never blocks publishing for another.

use crate::model::VisualizationEvent;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Callback invoked with each event published for a session.
pub trait VisualizationSink: Send + Sync {
    fn deliver(&self, event: VisualizationEvent);
}

impl<F> VisualizationSink for F
where
    F: Fn(VisualizationEvent) + Send + Sync,
{
    fn deliver(&self, event: VisualizationEvent) {
        self(event);
    }
}

/// Sink backed by an unbounded channel; the transport drains the receiver.
pub struct ChannelSink {
    sender: tokio::sync::mpsc::UnboundedSender<VisualizationEvent>,
}

impl ChannelSink {
    pub fn new(sender: tokio::sync::mpsc::UnboundedSender<VisualizationEvent>) -> Self {
        ChannelSink { sender }
    }
}

impl VisualizationSink for ChannelSink {
    fn deliver(&self, event: VisualizationEvent) {
        // A closed receiver means the subscriber went away; best-effort drop.
        let _ = self.sender.send(event);
    }
}

#[derive(Default)]
pub struct VisualizationPublisher {
    sinks: RwLock<HashMap<String, Arc<dyn VisualizationSink>>>,
}

impl VisualizationPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the sink for a session, replacing any previous one.
    /// Returns true when a previous sink was replaced.
    pub fn subscribe(&self, session_id: &str, sink: Arc<dyn VisualizationSink>) -> bool {
        let replaced = self
            .sinks
            .write()
            .insert(session_id.to_string(), sink)
            .is_some();
        debug!(session_id, replaced, "visualization sink registered");
        replaced
    }

    pub fn unsubscribe(&self, session_id: &str) -> bool {
        self.sinks.write().remove(session_id).is_some()
    }

    pub fn has_subscriber(&self, session_id: &str) -> bool {
        self.sinks.read().contains_key(session_id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sinks.read().len()
    }

    /// Deliver to the session's current sink, if any. The table lock is
    /// released before delivery so a slow sink cannot block other sessions.
    pub fn publish(&self, session_id: &str, event: VisualizationEvent) {
        let sink = self.sinks.read().get(session_id).cloned();
        match sink {
            Some(sink) => {
                sink.deliver(event);
                crate::metrics::METRICS.record_publish(true);
            }
            None => {
                debug!(session_id, "no visualization sink, event dropped");
                crate::metrics::METRICS.record_publish(false);
            }
        }
    }
}
