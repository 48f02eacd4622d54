//! In-process link doubles for CI/CD testing without physical hardware.
//!
//! Both doubles are cheap handles over shared state: clone one, hand the
//! clone to the code under test, and use the original to inject traffic and
//! inspect what was written.
//!
//! # Example
//!
//! ```rust
//! use hoverlink_hal::sim::SimWiredLink;
//! use hoverlink_hal::WiredLink;
//!
//! let uart = SimWiredLink::new("uart0");
//! let mut link = uart.clone();
//!
//! uart.feed(&[0x04, 0x01]);
//! assert_eq!(link.available(), 2);
//! link.write(&[0xAA]).unwrap();
//! assert_eq!(uart.take_written(), vec![vec![0xAA]]);
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use hoverlink_types::{LinkError, PeerAddress, TransportKind};
use parking_lot::Mutex;

use crate::wired::WiredLink;
use crate::wireless::{ReceiveCallback, WirelessLink};

// ────────────────────────────────────────────────────────────────────────────
// Wired double
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct WiredState {
    rx: VecDeque<u8>,
    written: Vec<Vec<u8>>,
}

/// A simulated serial link. Records every written frame.
#[derive(Clone)]
pub struct SimWiredLink {
    id: String,
    state: Arc<Mutex<WiredState>>,
}

impl SimWiredLink {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: Arc::new(Mutex::new(WiredState::default())),
        }
    }

    /// Queue bytes as if the far end had sent them.
    pub fn feed(&self, bytes: &[u8]) {
        self.state.lock().rx.extend(bytes);
    }

    /// Drain and return every frame written so far.
    pub fn take_written(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.state.lock().written)
    }

    /// Number of received bytes not yet read by the link's user.
    pub fn pending_rx(&self) -> usize {
        self.state.lock().rx.len()
    }
}

impl WiredLink for SimWiredLink {
    fn id(&self) -> &str {
        &self.id
    }

    fn available(&mut self) -> usize {
        self.state.lock().rx.len()
    }

    fn read(&mut self) -> Option<u8> {
        self.state.lock().rx.pop_front()
    }

    fn write(&mut self, frame: &[u8]) -> Result<usize, LinkError> {
        self.state.lock().written.push(frame.to_vec());
        Ok(frame.len())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Wireless double
// ────────────────────────────────────────────────────────────────────────────

struct WirelessState {
    visible: Vec<PeerAddress>,
    registered: Vec<PeerAddress>,
    sent: Vec<(PeerAddress, Vec<u8>)>,
    scans: u32,
    discoverable: bool,
    callback: Option<ReceiveCallback>,
}

/// A simulated radio. Peers made visible with
/// [`SimWirelessLink::add_visible_peer`] are returned by scans; inbound
/// traffic is injected with [`SimWirelessLink::deliver`].
#[derive(Clone)]
pub struct SimWirelessLink {
    id: String,
    state: Arc<Mutex<WirelessState>>,
}

impl SimWirelessLink {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: Arc::new(Mutex::new(WirelessState {
                visible: Vec::new(),
                registered: Vec::new(),
                sent: Vec::new(),
                scans: 0,
                discoverable: true,
                callback: None,
            })),
        }
    }

    /// Make `peer` answer subsequent scans.
    pub fn add_visible_peer(&self, peer: PeerAddress) {
        self.state.lock().visible.push(peer);
    }

    /// Invoke the receive callback as the radio driver would.
    ///
    /// Returns `false` when no callback is installed.
    pub fn deliver(&self, sender: PeerAddress, frame: &[u8]) -> bool {
        // Release the state lock before calling out; the callback may send.
        let callback = self.state.lock().callback.clone();
        match callback {
            Some(cb) => {
                cb(sender, frame);
                true
            }
            None => false,
        }
    }

    pub fn scan_count(&self) -> u32 {
        self.state.lock().scans
    }

    pub fn registered(&self) -> Vec<PeerAddress> {
        self.state.lock().registered.clone()
    }

    /// Drain and return every `(peer, frame)` sent so far.
    pub fn take_sent(&self) -> Vec<(PeerAddress, Vec<u8>)> {
        std::mem::take(&mut self.state.lock().sent)
    }

    pub fn is_discoverable(&self) -> bool {
        self.state.lock().discoverable
    }
}

impl WirelessLink for SimWirelessLink {
    fn id(&self) -> &str {
        &self.id
    }

    fn scan(&self, _window: Duration) -> Result<Vec<PeerAddress>, LinkError> {
        let mut state = self.state.lock();
        state.scans += 1;
        Ok(state.visible.clone())
    }

    fn register_peer(&self, peer: PeerAddress) -> Result<(), LinkError> {
        let mut state = self.state.lock();
        if !state.registered.contains(&peer) {
            state.registered.push(peer);
        }
        Ok(())
    }

    fn send(&self, peer: PeerAddress, frame: &[u8]) -> Result<usize, LinkError> {
        let mut state = self.state.lock();
        if !state.registered.contains(&peer) {
            return Err(LinkError::Transport {
                link: TransportKind::Wireless,
                details: format!("peer {peer} is not registered"),
            });
        }
        state.sent.push((peer, frame.to_vec()));
        Ok(frame.len())
    }

    fn set_discoverable(&self, visible: bool) -> Result<(), LinkError> {
        self.state.lock().discoverable = visible;
        Ok(())
    }

    fn on_receive(&self, callback: ReceiveCallback) {
        self.state.lock().callback = Some(callback);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const PEER: PeerAddress = PeerAddress([0x24, 0x0a, 0xc4, 0, 0, 1]);

    #[test]
    fn wired_double_reads_fed_bytes_in_order() {
        let uart = SimWiredLink::new("uart");
        let mut link = uart.clone();
        uart.feed(&[1, 2, 3]);
        assert_eq!(link.read(), Some(1));
        assert_eq!(link.read(), Some(2));
        assert_eq!(uart.pending_rx(), 1);
    }

    #[test]
    fn wireless_double_scans_visible_peers() {
        let radio = SimWirelessLink::new("radio");
        assert!(radio.scan(Duration::ZERO).unwrap().is_empty());
        radio.add_visible_peer(PEER);
        assert_eq!(radio.scan(Duration::ZERO).unwrap(), vec![PEER]);
        assert_eq!(radio.scan_count(), 2);
    }

    #[test]
    fn wireless_double_refuses_unregistered_send() {
        let radio = SimWirelessLink::new("radio");
        assert!(radio.send(PEER, &[1]).is_err());
        radio.register_peer(PEER).unwrap();
        assert_eq!(radio.send(PEER, &[1, 2]).unwrap(), 2);
        assert_eq!(radio.take_sent(), vec![(PEER, vec![1, 2])]);
    }

    #[test]
    fn wireless_double_delivers_to_callback() {
        let radio = SimWirelessLink::new("radio");
        assert!(!radio.deliver(PEER, &[1]));

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        radio.on_receive(Arc::new(move |_sender: PeerAddress, frame: &[u8]| {
            counter.fetch_add(frame.len(), Ordering::SeqCst);
        }));
        assert!(radio.deliver(PEER, &[1, 2, 3]));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }
}
