//! Generic `WiredLink` trait for the point-to-point serial connection to the
//! motor controller.

use std::sync::Arc;

use hoverlink_types::LinkError;
use parking_lot::Mutex;

/// A reliable, always-on byte stream.
///
/// All calls are non-blocking: `available` and `read` only report what has
/// already arrived.
pub trait WiredLink: Send {
    /// Stable identifier for this link, e.g. `"/dev/ttyUSB0"`.
    fn id(&self) -> &str;

    /// Number of received bytes that can be read without blocking.
    fn available(&mut self) -> usize;

    /// Pop the next received byte, if any.
    fn read(&mut self) -> Option<u8>;

    /// Write a complete frame.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Transport`] if the underlying port rejects the
    /// write.
    fn write(&mut self, frame: &[u8]) -> Result<usize, LinkError>;
}

/// A wired link shared between the poller and the endpoint's frame sink.
pub type SharedWiredLink = Arc<Mutex<Box<dyn WiredLink>>>;

/// Wrap a driver for sharing.
pub fn shared(link: impl WiredLink + 'static) -> SharedWiredLink {
    Arc::new(Mutex::new(Box::new(link)))
}
