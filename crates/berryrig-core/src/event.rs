/*!
 * Change-event bus for berryrig.
 *
 * Devices publish a [`ChangeEvent`] whenever their observable state changes;
 * the dispatch engine and any outward broadcast layer subscribe to the same
 * bus. This replaces per-device callback registration with a typed event
 * stream the engine can wire up once at build time.
 */
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::trace;

use crate::error::{Error, Result};
use crate::types::{Id, Value};

/// Maximum number of events that can be buffered in the channel
const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// A state change reported by a device
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    /// Id of the element whose device changed
    pub source: Id,
    /// Element kind as its wire name (e.g. "Button", "LED")
    pub kind: &'static str,
    /// The new value
    pub value: Value,
    /// When the change was observed
    pub timestamp: DateTime<Utc>,
}

impl ChangeEvent {
    /// Create a new change event stamped with the current time
    pub fn new(source: Id, kind: &'static str, value: Value) -> Self {
        Self {
            source,
            kind,
            value,
            timestamp: Utc::now(),
        }
    }
}

/// Bus carrying [`ChangeEvent`]s from devices to subscribers.
///
/// Cloning is cheap; all clones publish into the same channel. Publishing
/// with no live subscriber is not an error (a bare hardware without an
/// engine attached is a valid configuration).
#[derive(Debug, Clone)]
pub struct ChangeBus {
    sender: Arc<broadcast::Sender<ChangeEvent>>,
}

impl ChangeBus {
    /// Create a new change bus with the default capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new change bus with a specific channel capacity
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Publish a change event, returning the number of receivers
    pub fn publish(&self, event: ChangeEvent) -> Result<usize> {
        if self.sender.receiver_count() == 0 {
            trace!("no receivers for change event from {}", event.source);
            return Ok(0);
        }
        self.sender
            .send(event)
            .map_err(|e| Error::event(format!("Failed to publish change event: {}", e)))
    }

    /// Subscribe to change events
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.sender.subscribe()
    }
}

impl Default for ChangeBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = ChangeBus::new();
        let mut rx = bus.subscribe();

        let receivers = bus
            .publish(ChangeEvent::new("led1".into(), "LED", Value::Integer(1)))
            .unwrap();
        assert_eq!(receivers, 1);

        let received = rx.recv().await.unwrap();
        assert_eq!(received.source.as_str(), "led1");
        assert_eq!(received.kind, "LED");
        assert_eq!(received.value, Value::Integer(1));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = ChangeBus::new();
        let receivers = bus
            .publish(ChangeEvent::new("b1".into(), "Button", Value::Integer(2)))
            .unwrap();
        assert_eq!(receivers, 0);
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let bus = ChangeBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(ChangeEvent::new("pw1".into(), "PWDevice", Value::Float(0.5)))
            .unwrap();

        assert_eq!(rx1.recv().await.unwrap().value, Value::Float(0.5));
        assert_eq!(rx2.recv().await.unwrap().value, Value::Float(0.5));
    }
}
