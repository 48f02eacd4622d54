//! Typed, topic-based diagnostic bus.
//!
//! Uses [`tokio::sync::broadcast`] channels so that every subscriber
//! receives every event and a slow subscriber never blocks the control
//! loop. Publishing is synchronous and never awaits, so the loop and the
//! wireless receive thread publish directly.
//!
//! # Topics
//!
//! | Topic | Typical traffic |
//! |---|---|
//! | [`Topic::Markup`] | One line per frame crossing a transport |
//! | [`Topic::Link`] | Pairing, registry and visibility events |
//! | [`Topic::Telemetry`] | Per-cycle speed / steer / battery / current snapshots |

use chrono::{DateTime, Utc};
use hoverlink_types::{PeerAddress, Telemetry};
use tokio::sync::broadcast;
use tracing::warn;

use crate::markup::{MarkupSink, MarkupSource};

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Markup,
    Link,
    Telemetry,
}

/// Discovery and pairing milestones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    PeerPaired(PeerAddress),
    /// A discovered peer was dropped because the registry is full.
    RegistryFull(PeerAddress),
    /// Broadcast discoverability switched off after the first valid frame.
    BroadcastHidden,
    /// A scan completed without finding a peer.
    ScanMiss,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DiagnosticPayload {
    MarkupLine { source: MarkupSource, line: String },
    Link(LinkEvent),
    Telemetry(Telemetry),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DiagnosticEvent {
    pub timestamp: DateTime<Utc>,
    /// Component that produced the event, e.g. `"discovery"`.
    pub source: String,
    pub payload: DiagnosticPayload,
}

impl DiagnosticEvent {
    pub fn now(source: impl Into<String>, payload: DiagnosticPayload) -> Self {
        Self {
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Shared diagnostic bus. Clones share the same channels.
#[derive(Clone, Debug)]
pub struct DiagnosticBus {
    markup: broadcast::Sender<DiagnosticEvent>,
    link: broadcast::Sender<DiagnosticEvent>,
    telemetry: broadcast::Sender<DiagnosticEvent>,
}

impl DiagnosticBus {
    /// Create a new bus; `capacity` applies to every topic independently.
    pub fn new(capacity: usize) -> Self {
        let (markup, _) = broadcast::channel(capacity);
        let (link, _) = broadcast::channel(capacity);
        let (telemetry, _) = broadcast::channel(capacity);
        Self {
            markup,
            link,
            telemetry,
        }
    }

    /// Publish `event` on `topic`.
    ///
    /// Returns the number of receivers handed the event; `0` when nobody is
    /// listening, which is the normal state with diagnostics switched off.
    pub fn publish_to(&self, topic: Topic, event: DiagnosticEvent) -> usize {
        self.sender(topic).send(event).unwrap_or(0)
    }

    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic,
            receiver: self.sender(topic).subscribe(),
        }
    }

    fn sender(&self, topic: Topic) -> &broadcast::Sender<DiagnosticEvent> {
        match topic {
            Topic::Markup => &self.markup,
            Topic::Link => &self.link,
            Topic::Telemetry => &self.telemetry,
        }
    }
}

impl Default for DiagnosticBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// An async receiver bound to one [`Topic`].
pub struct TopicReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<DiagnosticEvent>,
}

impl TopicReceiver {
    /// Next event on this topic, skipping over lag. `None` once the bus is
    /// gone.
    pub async fn recv(&mut self) -> Option<DiagnosticEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(topic = ?self.topic, lagged_by = n, "Diagnostic subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking poll; `None` when nothing is queued.
    pub fn try_recv(&mut self) -> Option<DiagnosticEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }
}

/// Markup sink publishing every line on [`Topic::Markup`].
#[derive(Debug, Clone)]
pub struct BusMarkupSink {
    bus: DiagnosticBus,
}

impl BusMarkupSink {
    pub fn new(bus: DiagnosticBus) -> Self {
        Self { bus }
    }
}

impl MarkupSink for BusMarkupSink {
    fn emit(&self, source: MarkupSource, line: &str) {
        self.bus.publish_to(
            Topic::Markup,
            DiagnosticEvent::now(
                "markup",
                DiagnosticPayload::MarkupLine {
                    source,
                    line: line.to_string(),
                },
            ),
        );
    }
}
