//! Engine event system for polled data and error notifications.
//!
//! Each engine owns an [`EventDispatcher`]; observers subscribe and receive
//! every event broadcast after the subscription. Events carry their own
//! snapshots, so observers must not assume ordering relative to direct
//! command results.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Category of a command error raised by the device, outside any request.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new kinds
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum CommandErrorKind {
    /// The device announced it is shutting down.
    Shutdown,
    /// The auto-ignition sequence failed.
    AutoIgnitionSequence,
    /// A device-reported error with a human-readable message.
    Message,
}

/// Events emitted by an analyzer engine.
///
/// All events are serializable for logging, persistence, and IPC.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event types
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum DeviceEvent {
    /// A decoded periodic status arrived.
    DataPolled {
        /// The string-keyed property snapshot.
        properties: HashMap<String, String>,
        /// The derived PPM reading; negative when unavailable.
        ppm: f64,
    },
    /// A recoverable error occurred inside a worker.
    Error {
        /// Description of the failure.
        message: String,
    },
    /// The device raised an error outside the request/response path.
    CommandError {
        /// The error category.
        kind: CommandErrorKind,
        /// Human-readable message.
        message: String,
    },
}

/// Sender for engine events.
pub type EventSender = broadcast::Sender<DeviceEvent>;

/// Receiver for engine events.
pub type EventReceiver = broadcast::Receiver<DeviceEvent>;

/// Event dispatcher fanning events out to any number of receivers.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: EventSender,
}

impl EventDispatcher {
    /// Create a new event dispatcher with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Send an event.
    pub fn send(&self, event: DeviceEvent) {
        // Ignore error if no receivers
        let _ = self.sender.send(event);
    }

    /// Get the number of active receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_without_receivers() {
        let dispatcher = EventDispatcher::new(10);
        dispatcher.send(DeviceEvent::Error {
            message: "no one listening".to_string(),
        });
    }

    #[tokio::test]
    async fn test_send_receive() {
        let dispatcher = EventDispatcher::new(10);
        let mut rx = dispatcher.subscribe();

        let mut props = HashMap::new();
        props.insert("PPM".to_string(), "10".to_string());
        dispatcher.send(DeviceEvent::DataPolled {
            properties: props,
            ppm: 10.0,
        });

        match rx.recv().await.unwrap() {
            DeviceEvent::DataPolled { properties, ppm } => {
                assert_eq!(properties.get("PPM").unwrap(), "10");
                assert_eq!(ppm, 10.0);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_multiple_receivers() {
        let dispatcher = EventDispatcher::new(10);
        let mut rx1 = dispatcher.subscribe();
        let mut rx2 = dispatcher.subscribe();
        assert_eq!(dispatcher.receiver_count(), 2);

        dispatcher.send(DeviceEvent::CommandError {
            kind: CommandErrorKind::Shutdown,
            message: "device shutting down".to_string(),
        });

        for rx in [&mut rx1, &mut rx2] {
            match rx.recv().await.unwrap() {
                DeviceEvent::CommandError { kind, .. } => {
                    assert_eq!(kind, CommandErrorKind::Shutdown);
                }
                other => panic!("unexpected event: {:?}", other),
            }
        }
    }

    #[test]
    fn test_event_serialization() {
        let event = DeviceEvent::CommandError {
            kind: CommandErrorKind::AutoIgnitionSequence,
            message: "no flame".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("command_error"));
        let back: DeviceEvent = serde_json::from_str(&json).unwrap();
        assert!(matches!(back, DeviceEvent::CommandError { .. }));
    }
}
