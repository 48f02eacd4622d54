//! Generic `WirelessLink` trait for the best-effort peer-to-peer radio.

use std::sync::Arc;
use std::time::Duration;

use hoverlink_types::{LinkError, PeerAddress};

/// Receive notification: `(sender, frame)`.
///
/// Invoked on the driver's own receive context, concurrently with the
/// control loop.
pub type ReceiveCallback = Arc<dyn Fn(PeerAddress, &[u8]) + Send + Sync>;

/// A packet-oriented link that needs discovery before frames can be sent.
///
/// Methods take `&self`: the driver is shared between the control loop and
/// its receive context, so implementations use interior mutability.
pub trait WirelessLink: Send + Sync {
    /// Stable identifier for this link.
    fn id(&self) -> &str;

    /// Actively scan for reachable peers for at most `window`.
    fn scan(&self, window: Duration) -> Result<Vec<PeerAddress>, LinkError>;

    /// Add `peer` as a send target.
    fn register_peer(&self, peer: PeerAddress) -> Result<(), LinkError>;

    /// Send one frame to a registered peer.
    fn send(&self, peer: PeerAddress, frame: &[u8]) -> Result<usize, LinkError>;

    /// Toggle whether this node answers other nodes' scans.
    fn set_discoverable(&self, visible: bool) -> Result<(), LinkError>;

    /// Install the receive notification, replacing any previous one.
    fn on_receive(&self, callback: ReceiveCallback);
}
