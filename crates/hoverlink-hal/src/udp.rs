//! [`UdpWirelessLink`] – a [`WirelessLink`] over UDP datagrams.
//!
//! Stands in for the peer-to-peer radio on hosts that lack one. Every
//! datagram carries a small header so that discovery works the same way it
//! does over the air:
//!
//! ```text
//! [2 bytes: "HL"][1 byte: kind][6 bytes: sender address][payload...]
//! ```
//!
//! | Kind | Meaning |
//! |---|---|
//! | `QUERY` | broadcast by a scanning node |
//! | `ANNOUNCE` | reply to a query, sent only while discoverable |
//! | `DATA` | one protocol frame |
//!
//! A dedicated receive thread plays the part of the radio's receive
//! interrupt: it answers queries, collects announcements and invokes the
//! [`ReceiveCallback`] for data frames.
//!
//! Socket addresses are learned only from announcements that answer one of
//! our own scans. Entries for registered peers are pinned; everything else
//! is forgotten when the next scan starts.

use std::collections::{HashMap, HashSet};
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use hoverlink_types::{LinkError, PeerAddress, TransportKind};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::wireless::{ReceiveCallback, WirelessLink};

const MAGIC: [u8; 2] = *b"HL";
const KIND_QUERY: u8 = 0x01;
const KIND_ANNOUNCE: u8 = 0x02;
const KIND_DATA: u8 = 0x03;
const HEADER_LEN: usize = 9;
const MAX_DATAGRAM: usize = 512;
const RECV_TIMEOUT: Duration = Duration::from_millis(50);

/// Configuration for [`UdpWirelessLink`].
#[derive(Debug, Clone)]
pub struct UdpConfig {
    /// Local bind address.
    pub bind: SocketAddr,
    /// Where scan queries are sent (usually the subnet broadcast address).
    pub broadcast: SocketAddr,
    /// This node's peer address.
    pub address: PeerAddress,
}

struct Inner {
    id: String,
    socket: UdpSocket,
    address: PeerAddress,
    broadcast: SocketAddr,
    discoverable: AtomicBool,
    scanning: AtomicBool,
    running: AtomicBool,
    book: Mutex<HashMap<PeerAddress, SocketAddr>>,
    registered: Mutex<HashSet<PeerAddress>>,
    discovered: Mutex<Vec<PeerAddress>>,
    callback: Mutex<Option<ReceiveCallback>>,
}

/// UDP-backed wireless link with a background receive thread.
pub struct UdpWirelessLink {
    inner: Arc<Inner>,
    worker: Option<JoinHandle<()>>,
}

impl UdpWirelessLink {
    /// Bind the socket and start the receive thread.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Transport`] if the socket cannot be bound or
    /// configured.
    pub fn bind(config: UdpConfig) -> Result<Self, LinkError> {
        let socket = UdpSocket::bind(config.bind)
            .map_err(|e| transport(format!("bind {} failed: {e}", config.bind)))?;
        socket
            .set_broadcast(true)
            .map_err(|e| transport(format!("enable broadcast failed: {e}")))?;
        socket
            .set_read_timeout(Some(RECV_TIMEOUT))
            .map_err(|e| transport(format!("set read timeout failed: {e}")))?;
        let local = socket
            .local_addr()
            .map_err(|e| transport(format!("local_addr failed: {e}")))?;

        let inner = Arc::new(Inner {
            id: format!("udp://{local}"),
            socket,
            address: config.address,
            broadcast: config.broadcast,
            discoverable: AtomicBool::new(true),
            scanning: AtomicBool::new(false),
            running: AtomicBool::new(true),
            book: Mutex::new(HashMap::new()),
            registered: Mutex::new(HashSet::new()),
            discovered: Mutex::new(Vec::new()),
            callback: Mutex::new(None),
        });

        let worker_inner = Arc::clone(&inner);
        let worker = thread::Builder::new()
            .name("hoverlink-udp-rx".to_string())
            .spawn(move || receive_loop(&worker_inner))
            .map_err(|e| transport(format!("spawn receive thread failed: {e}")))?;

        debug!(link = %inner.id, address = %inner.address, "udp wireless link up");
        Ok(Self {
            inner,
            worker: Some(worker),
        })
    }

    /// The socket's bound address.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.socket.local_addr().ok()
    }

    /// This node's peer address.
    pub fn address(&self) -> PeerAddress {
        self.inner.address
    }

    pub fn is_discoverable(&self) -> bool {
        self.inner.discoverable.load(Ordering::SeqCst)
    }
}

impl Drop for UdpWirelessLink {
    fn drop(&mut self) {
        self.inner.running.store(false, Ordering::SeqCst);
        self.inner.callback.lock().take();
        if let Some(worker) = self.worker.take()
            && worker.thread().id() != thread::current().id()
        {
            let _ = worker.join();
        }
    }
}

impl WirelessLink for UdpWirelessLink {
    fn id(&self) -> &str {
        &self.inner.id
    }

    fn scan(&self, window: Duration) -> Result<Vec<PeerAddress>, LinkError> {
        let registered = self.inner.registered.lock().clone();
        self.inner.book.lock().retain(|peer, _| registered.contains(peer));
        self.inner.discovered.lock().clear();

        self.inner.scanning.store(true, Ordering::SeqCst);
        let request = self.inner.send_datagram(KIND_QUERY, &[], self.inner.broadcast);
        if request.is_ok() {
            thread::sleep(window);
        }
        self.inner.scanning.store(false, Ordering::SeqCst);
        request?;
        Ok(self.inner.discovered.lock().clone())
    }

    fn register_peer(&self, peer: PeerAddress) -> Result<(), LinkError> {
        if !self.inner.book.lock().contains_key(&peer) {
            return Err(LinkError::UnknownPeer(peer));
        }
        self.inner.registered.lock().insert(peer);
        Ok(())
    }

    fn send(&self, peer: PeerAddress, frame: &[u8]) -> Result<usize, LinkError> {
        if !self.inner.registered.lock().contains(&peer) {
            return Err(LinkError::UnknownPeer(peer));
        }
        let target = self
            .inner
            .book
            .lock()
            .get(&peer)
            .copied()
            .ok_or(LinkError::UnknownPeer(peer))?;
        self.inner.send_datagram(KIND_DATA, frame, target)?;
        Ok(frame.len())
    }

    fn set_discoverable(&self, visible: bool) -> Result<(), LinkError> {
        self.inner.discoverable.store(visible, Ordering::SeqCst);
        Ok(())
    }

    fn on_receive(&self, callback: ReceiveCallback) {
        *self.inner.callback.lock() = Some(callback);
    }
}

impl Inner {
    fn send_datagram(&self, kind: u8, payload: &[u8], target: SocketAddr) -> Result<(), LinkError> {
        if HEADER_LEN + payload.len() > MAX_DATAGRAM {
            return Err(LinkError::Frame(format!(
                "{} byte frame exceeds datagram limit",
                payload.len()
            )));
        }
        let mut datagram = Vec::with_capacity(HEADER_LEN + payload.len());
        datagram.extend_from_slice(&MAGIC);
        datagram.push(kind);
        datagram.extend_from_slice(&self.address.0);
        datagram.extend_from_slice(payload);
        self.socket
            .send_to(&datagram, target)
            .map_err(|e| transport(format!("send to {target} failed: {e}")))?;
        Ok(())
    }

    fn handle(&self, datagram: &[u8], from: SocketAddr) {
        if datagram.len() < HEADER_LEN || datagram[..2] != MAGIC {
            trace!(%from, "ignoring foreign datagram");
            return;
        }
        let kind = datagram[2];
        let mut sender = [0u8; 6];
        sender.copy_from_slice(&datagram[3..HEADER_LEN]);
        let sender = PeerAddress(sender);
        if sender == self.address {
            return;
        }

        match kind {
            KIND_QUERY => {
                if self.discoverable.load(Ordering::SeqCst)
                    && let Err(e) = self.send_datagram(KIND_ANNOUNCE, &[], from)
                {
                    warn!(%sender, error = %e, "failed to answer query");
                }
            }
            KIND_ANNOUNCE => {
                if !self.scanning.load(Ordering::SeqCst) {
                    trace!(%sender, %from, "ignoring unsolicited announce");
                    return;
                }
                if self.registered.lock().contains(&sender) {
                    trace!(%sender, %from, "registered peer keeps its address");
                } else {
                    self.book.lock().insert(sender, from);
                }
                let mut discovered = self.discovered.lock();
                if !discovered.contains(&sender) {
                    discovered.push(sender);
                }
            }
            KIND_DATA => {
                let callback = self.callback.lock().clone();
                if let Some(cb) = callback {
                    cb(sender, &datagram[HEADER_LEN..]);
                }
            }
            other => trace!(%sender, kind = other, "unknown datagram kind"),
        }
    }
}

fn receive_loop(inner: &Inner) {
    let mut buf = [0u8; MAX_DATAGRAM];
    while inner.running.load(Ordering::SeqCst) {
        match inner.socket.recv_from(&mut buf) {
            Ok((n, from)) => inner.handle(&buf[..n], from),
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) => {}
            Err(e) => {
                warn!(link = %inner.id, error = %e, "udp receive failed");
                thread::sleep(RECV_TIMEOUT);
            }
        }
    }
}

fn transport(details: String) -> LinkError {
    LinkError::Transport {
        link: TransportKind::Wireless,
        details,
    }
}
