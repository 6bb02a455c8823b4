//! Bounded in-memory event log.
//!
//! Appends flow through a command channel drained by a single task that owns
//! insertion into the buffer, so recorders on the dispatch, webhook, and sync
//! paths never serialize behind one another on a buffer lock. The buffer
//! retains at most `capacity` events; once full, the oldest are evicted
//! first.

use crate::event::IntegrationEvent;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, RwLock};
use switchboard_core::IntegrationId;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Default maximum number of retained events.
pub const DEFAULT_CAPACITY: usize = 10_000;

enum LogCommand {
    Append(IntegrationEvent),
    Flush(oneshot::Sender<()>),
    Shutdown,
}

/// Bounded, append-only log of integration activity.
///
/// `append` is non-blocking; the event becomes visible to readers once the
/// drain task has processed it. Call [`EventLog::flush`] to wait for every
/// previously appended event to land, and [`EventLog::close`] to stop the
/// drain task. Construction spawns the drain task and therefore requires a
/// running Tokio runtime.
#[derive(Debug)]
pub struct EventLog {
    buffer: Arc<RwLock<VecDeque<IntegrationEvent>>>,
    sender: mpsc::UnboundedSender<LogCommand>,
    capacity: usize,
    drain: Mutex<Option<JoinHandle<()>>>,
}

impl EventLog {
    /// Creates an event log with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Creates an event log retaining at most `capacity` events.
    ///
    /// A capacity of zero is treated as one.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let buffer = Arc::new(RwLock::new(VecDeque::with_capacity(capacity.min(1024))));
        let (sender, mut receiver) = mpsc::unbounded_channel();

        let drain_buffer = Arc::clone(&buffer);
        let drain = tokio::spawn(async move {
            while let Some(command) = receiver.recv().await {
                match command {
                    LogCommand::Append(event) => {
                        let mut buffer = drain_buffer.write().unwrap();
                        while buffer.len() >= capacity {
                            buffer.pop_front();
                        }
                        buffer.push_back(event);
                    }
                    LogCommand::Flush(ack) => {
                        // Channel order guarantees every prior append landed.
                        let _ = ack.send(());
                    }
                    LogCommand::Shutdown => break,
                }
            }
        });

        Self {
            buffer,
            sender,
            capacity,
            drain: Mutex::new(Some(drain)),
        }
    }

    /// Appends an event.
    ///
    /// Never blocks. Events appended after [`EventLog::close`] are dropped
    /// with a warning.
    pub fn append(&self, event: IntegrationEvent) {
        if let Err(send_error) = self.sender.send(LogCommand::Append(event)) {
            if let LogCommand::Append(event) = send_error.0 {
                tracing::warn!(
                    integration_id = %event.integration_id,
                    event_type = ?event.event_type,
                    "event log closed, dropping event"
                );
            }
        }
    }

    /// Waits until every event appended before this call is visible to
    /// readers.
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.sender.send(LogCommand::Flush(ack)).is_ok() {
            let _ = done.await;
        }
    }

    /// Drains outstanding appends and stops the drain task.
    pub async fn close(&self) {
        let drain = self.drain.lock().unwrap().take();
        if let Some(drain) = drain {
            let _ = self.sender.send(LogCommand::Shutdown);
            let _ = drain.await;
        }
    }

    /// Returns the most recent events, newest first.
    ///
    /// When `integration_id` is given, only events for that integration are
    /// returned. At most `limit` events are returned.
    #[must_use]
    pub fn query(
        &self,
        integration_id: Option<&IntegrationId>,
        limit: usize,
    ) -> Vec<IntegrationEvent> {
        let buffer = self.buffer.read().unwrap();
        buffer
            .iter()
            .rev()
            .filter(|event| match integration_id {
                Some(id) => &event.integration_id == id,
                None => true,
            })
            .take(limit)
            .cloned()
            .collect()
    }

    /// Returns the number of retained events.
    ///
    /// Appends still in the drain queue are not counted; call
    /// [`EventLog::flush`] first for an exact figure.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.read().unwrap().len()
    }

    /// Returns `true` when no events are retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the maximum number of retained events.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Runs `f` against the retained events, oldest first.
    pub(crate) fn with_events<R>(&self, f: impl FnOnce(&VecDeque<IntegrationEvent>) -> R) -> R {
        let buffer = self.buffer.read().unwrap();
        f(&buffer)
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventDirection, EventStatus, EventType};

    fn event_for(id: &str, marker: u64) -> IntegrationEvent {
        IntegrationEvent::new(
            IntegrationId::from(id),
            EventType::ApiCall,
            EventDirection::Outbound,
            EventStatus::Success,
        )
        .with_data(serde_json::json!({ "marker": marker }))
    }

    #[tokio::test]
    async fn append_is_visible_after_flush() {
        let log = EventLog::new();
        log.append(event_for("google-calendar", 1));
        log.flush().await;

        assert_eq!(log.len(), 1);
        let events = log.query(None, 10);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data["marker"], 1);
    }

    #[tokio::test]
    async fn capacity_evicts_oldest_first() {
        let log = EventLog::with_capacity(5);
        for marker in 0..8 {
            log.append(event_for("stripe", marker));
        }
        log.flush().await;

        assert_eq!(log.len(), 5);
        let events = log.query(None, 10);
        let markers: Vec<u64> = events
            .iter()
            .map(|e| e.data["marker"].as_u64().unwrap())
            .collect();
        // Newest first; markers 0..=2 were evicted.
        assert_eq!(markers, vec![7, 6, 5, 4, 3]);
    }

    #[tokio::test]
    async fn query_filters_by_integration() {
        let log = EventLog::new();
        log.append(event_for("stripe", 1));
        log.append(event_for("hubspot", 2));
        log.append(event_for("stripe", 3));
        log.flush().await;

        let stripe = IntegrationId::from("stripe");
        let events = log.query(Some(&stripe), 10);
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.integration_id == stripe));
        // Newest first.
        assert_eq!(events[0].data["marker"], 3);
        assert_eq!(events[1].data["marker"], 1);
    }

    #[tokio::test]
    async fn query_respects_limit() {
        let log = EventLog::new();
        for marker in 0..10 {
            log.append(event_for("stripe", marker));
        }
        log.flush().await;

        let events = log.query(None, 3);
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].data["marker"], 9);
        assert_eq!(events[2].data["marker"], 7);
    }

    #[tokio::test]
    async fn append_after_close_is_dropped() {
        let log = EventLog::new();
        log.append(event_for("stripe", 1));
        log.close().await;

        // The close drained the pending append.
        assert_eq!(log.len(), 1);

        log.append(event_for("stripe", 2));
        log.flush().await;
        assert_eq!(log.len(), 1);
    }

    #[tokio::test]
    async fn close_twice_is_harmless() {
        let log = EventLog::new();
        log.close().await;
        log.close().await;
    }

    #[test]
    fn default_capacity_is_ten_thousand() {
        assert_eq!(DEFAULT_CAPACITY, 10_000);
    }

    #[tokio::test]
    async fn zero_capacity_retains_the_latest_event() {
        let log = EventLog::with_capacity(0);
        log.append(event_for("stripe", 1));
        log.append(event_for("stripe", 2));
        log.flush().await;

        assert_eq!(log.len(), 1);
        assert_eq!(log.query(None, 10)[0].data["marker"], 2);
    }

    #[tokio::test]
    async fn empty_log_reports_empty() {
        let log = EventLog::new();
        assert!(log.is_empty());
        assert_eq!(log.query(None, 10).len(), 0);
    }
}
