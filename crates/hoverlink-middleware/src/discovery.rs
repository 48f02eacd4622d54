//! Peer discovery and pairing for the wireless link.
//!
//! * [`PeerRegistry`] – the trusted send targets (one slot by default).
//! * [`Discovery`] – outbound path: send when paired, otherwise scan behind a
//!   cooldown and report [`LinkError::NotSent`].
//! * [`WirelessReceiver`] – inbound path, run on the driver's receive
//!   context: drop unknown senders, hide from broadcast after the first
//!   valid frame, push the bytes into the endpoint.
//!
//! The registry is the only state shared with the receive context. Every
//! access holds its lock for a single check or mutation, never across a
//! scan or an endpoint push.

use std::sync::{Arc, Weak};
use std::time::Duration;

use hoverlink_hal::WirelessLink;
use hoverlink_types::{
    LinkDirection, LinkError, LinkState, PeerAddress, TransportKind, TransportLink,
};
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use crate::bus::LinkEvent;
use crate::diagnostics::Diagnostics;
use crate::endpoint::{EndpointHandle, FrameSink};
use crate::markup::MarkupSource;

/// Real-time interval between scans while unpaired.
pub const SCAN_COOLDOWN: Duration = Duration::from_secs(10);

/// Default bound on a single scan.
pub const DEFAULT_SCAN_WINDOW: Duration = Duration::from_millis(200);

// ────────────────────────────────────────────────────────────────────────────
// Registry
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerEntry {
    pub address: PeerAddress,
    pub state: LinkState,
}

/// Trusted peers plus the wireless link's connectivity state. Entries live
/// until restart.
#[derive(Debug)]
pub struct PeerRegistry {
    capacity: usize,
    peers: Vec<PeerEntry>,
    broadcast_hidden: bool,
    transport: TransportLink,
}

impl Default for PeerRegistry {
    fn default() -> Self {
        Self::new(1)
    }
}

impl PeerRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            peers: Vec::with_capacity(capacity),
            broadcast_hidden: false,
            transport: TransportLink::new(
                TransportKind::Wireless,
                LinkDirection::Both,
                LinkState::Unpaired,
            ),
        }
    }

    /// Add `address`. Registering a known peer again is a no-op.
    ///
    /// # Errors
    ///
    /// [`LinkError::RegistryFull`] when every slot is taken.
    pub fn register(&mut self, address: PeerAddress) -> Result<(), LinkError> {
        if self.contains(address) {
            return Ok(());
        }
        if self.is_full() {
            return Err(LinkError::RegistryFull {
                capacity: self.capacity,
                address,
            });
        }
        self.peers.push(PeerEntry {
            address,
            state: LinkState::Paired,
        });
        self.transport.state = LinkState::Paired;
        Ok(())
    }

    pub fn contains(&self, address: PeerAddress) -> bool {
        self.peers.iter().any(|p| p.address == address)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.peers.len() >= self.capacity
    }

    /// The peer outbound frames go to.
    pub fn active_peer(&self) -> Option<PeerAddress> {
        self.peers.first().map(|p| p.address)
    }

    pub fn peers(&self) -> &[PeerEntry] {
        &self.peers
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// The wireless link: unpaired until the first peer registers.
    pub fn transport(&self) -> TransportLink {
        self.transport
    }

    pub fn broadcast_hidden(&self) -> bool {
        self.broadcast_hidden
    }

    /// Latch the hidden flag. Returns `true` only on the first call.
    pub fn hide_broadcast(&mut self) -> bool {
        !std::mem::replace(&mut self.broadcast_hidden, true)
    }
}

pub type SharedRegistry = Arc<Mutex<PeerRegistry>>;

pub fn shared_registry(capacity: usize) -> SharedRegistry {
    Arc::new(Mutex::new(PeerRegistry::new(capacity)))
}

// ────────────────────────────────────────────────────────────────────────────
// Scan cooldown
// ────────────────────────────────────────────────────────────────────────────

/// Counts outbound attempts, not wall time, between scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanCooldown {
    remaining: u32,
    arm_to: u32,
}

impl ScanCooldown {
    /// Cooldown worth [`SCAN_COOLDOWN`] at one attempt per `control_period`.
    pub fn for_period(control_period: Duration) -> Self {
        let period_ms = control_period.as_millis().max(1);
        let arm_to = (SCAN_COOLDOWN.as_millis() / period_ms).min(u128::from(u32::MAX)) as u32;
        Self {
            remaining: 0,
            arm_to,
        }
    }

    pub fn ready(&self) -> bool {
        self.remaining == 0
    }

    pub fn arm(&mut self) {
        self.remaining = self.arm_to;
    }

    /// Count one suppressed attempt.
    pub fn tick(&mut self) {
        self.remaining = self.remaining.saturating_sub(1);
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn armed_length(&self) -> u32 {
        self.arm_to
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Outbound
// ────────────────────────────────────────────────────────────────────────────

/// Outbound side of the wireless link; becomes the wireless endpoint's
/// frame sink via [`Discovery::into_sink`].
///
/// The link is held weakly: the link's receive callback reaches back into
/// the endpoint that owns this sink, so a strong handle would keep the
/// driver alive forever. Whoever created the link owns it.
pub struct Discovery {
    link: Weak<dyn WirelessLink>,
    registry: SharedRegistry,
    cooldown: ScanCooldown,
    scan_window: Duration,
    diagnostics: Diagnostics,
}

impl Discovery {
    pub fn new(
        link: &Arc<dyn WirelessLink>,
        registry: SharedRegistry,
        control_period: Duration,
        scan_window: Duration,
        diagnostics: Diagnostics,
    ) -> Self {
        Self {
            link: Arc::downgrade(link),
            registry,
            cooldown: ScanCooldown::for_period(control_period),
            scan_window,
            diagnostics,
        }
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    pub fn cooldown(&self) -> ScanCooldown {
        self.cooldown
    }

    /// Run one bounded scan and pair with the first new peer found.
    ///
    /// Returns the active peer afterwards. Scanning while already paired
    /// returns the current peer without touching the radio.
    pub fn scan_for_peer(&mut self) -> Option<PeerAddress> {
        if let Some(peer) = self.registry.lock().active_peer() {
            return Some(peer);
        }
        let link = match self.link() {
            Ok(link) => link,
            Err(e) => {
                debug!(error = %e, "Scan skipped");
                return None;
            }
        };

        let found = match link.scan(self.scan_window) {
            Ok(found) => found,
            Err(e) => {
                warn!(link = %link.id(), error = %e, "Peer scan failed");
                return None;
            }
        };

        let Some(candidate) = found.into_iter().find(|p| *p != PeerAddress::BROADCAST) else {
            debug!(link = %link.id(), "Scan found no peer");
            self.diagnostics.link_event("discovery", LinkEvent::ScanMiss);
            return None;
        };

        match self.register_peer(candidate) {
            Ok(()) => Some(candidate),
            Err(_) => None,
        }
    }

    /// Trust `peer` as a send target.
    ///
    /// A full registry is logged and reported, never fatal.
    pub fn register_peer(&self, peer: PeerAddress) -> Result<(), LinkError> {
        {
            let registry = self.registry.lock();
            if registry.contains(peer) {
                return Ok(());
            }
            if registry.is_full() {
                warn!(%peer, capacity = registry.capacity(), "Peer registry full; dropping discovery result");
                self.diagnostics.link_event("discovery", LinkEvent::RegistryFull(peer));
                return Err(LinkError::RegistryFull {
                    capacity: registry.capacity(),
                    address: peer,
                });
            }
        }

        let link = self.link()?;
        link.register_peer(peer)?;
        self.registry.lock().register(peer)?;
        info!(%peer, link = %link.id(), "Peer paired");
        self.diagnostics.link_event("discovery", LinkEvent::PeerPaired(peer));
        Ok(())
    }

    /// Send `frame` to the paired peer.
    ///
    /// While unpaired this either scans (when the cooldown allows) or counts
    /// the attempt against the cooldown; both report
    /// [`LinkError::NotSent`] so the caller retries on its next schedule.
    pub fn send(&mut self, frame: &[u8]) -> Result<usize, LinkError> {
        self.diagnostics.markup(MarkupSource::WirelessOut, frame);

        let peer = self.registry.lock().active_peer();
        if let Some(peer) = peer {
            return self.link()?.send(peer, frame);
        }

        if self.cooldown.ready() {
            self.scan_for_peer();
            self.cooldown.arm();
        } else {
            self.cooldown.tick();
        }
        trace!(cooldown = self.cooldown.remaining(), "Wireless frame not sent");
        Err(LinkError::NotSent)
    }

    pub fn into_sink(mut self) -> FrameSink {
        Box::new(move |frame: &[u8]| self.send(frame))
    }

    fn link(&self) -> Result<Arc<dyn WirelessLink>, LinkError> {
        self.link.upgrade().ok_or_else(|| LinkError::Transport {
            link: TransportKind::Wireless,
            details: "wireless link closed".into(),
        })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Inbound
// ────────────────────────────────────────────────────────────────────────────

/// Inbound side of the wireless link.
pub struct WirelessReceiver {
    link: Weak<dyn WirelessLink>,
    registry: SharedRegistry,
    endpoint: EndpointHandle,
    diagnostics: Diagnostics,
}

impl WirelessReceiver {
    pub fn new(
        link: &Arc<dyn WirelessLink>,
        registry: SharedRegistry,
        endpoint: EndpointHandle,
        diagnostics: Diagnostics,
    ) -> Self {
        Self {
            link: Arc::downgrade(link),
            registry,
            endpoint,
            diagnostics,
        }
    }

    /// Handle one received frame. Returns `false` when the sender is not a
    /// registered peer and the frame was dropped.
    pub fn on_receive(&self, sender: PeerAddress, frame: &[u8]) -> bool {
        let first_frame = {
            let mut registry = self.registry.lock();
            if !registry.contains(sender) {
                trace!(%sender, len = frame.len(), "Dropping frame from unknown sender");
                return false;
            }
            registry.hide_broadcast()
        };

        if first_frame {
            if let Some(link) = self.link.upgrade() {
                if let Err(e) = link.set_discoverable(false) {
                    warn!(error = %e, "Could not hide from broadcast");
                }
            }
            self.diagnostics.link_event("discovery", LinkEvent::BroadcastHidden);
        }

        self.diagnostics.markup(MarkupSource::WirelessIn, frame);
        self.endpoint.lock().push_bytes(frame);
        true
    }

    /// Route the link's receive notifications here.
    pub fn install(self) {
        let Some(link) = self.link.upgrade() else {
            return;
        };
        let receiver = Arc::new(self);
        link.on_receive(Arc::new(move |sender: PeerAddress, frame: &[u8]| {
            receiver.on_receive(sender, frame);
        }));
    }
}
