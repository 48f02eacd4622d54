//! [`SerialWiredLink`] – [`WiredLink`] over a host serial port.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::time::Duration;

use hoverlink_types::{LinkError, TransportKind};
use serialport::SerialPort;
use tracing::{debug, info, warn};

use crate::wired::WiredLink;

/// Upper bound on a single non-blocking read from the port.
const READ_CHUNK: usize = 1024;

/// A motor-controller UART reached through a USB serial adapter.
pub struct SerialWiredLink {
    path: String,
    port: Box<dyn SerialPort>,
    rx: VecDeque<u8>,
}

impl SerialWiredLink {
    /// Open `path` at `baud_rate`, 8N1.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Transport`] when the port cannot be opened.
    pub fn open(path: &str, baud_rate: u32) -> Result<Self, LinkError> {
        info!(port = path, baud_rate, "opening serial link");
        let port = serialport::new(path, baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None)
            .timeout(Duration::from_millis(1))
            .open()
            .map_err(|e| transport(format!("failed to open {path}: {e}")))?;
        Ok(Self {
            path: path.to_string(),
            port,
            rx: VecDeque::new(),
        })
    }

    // Move whatever the driver has buffered into `rx` without blocking.
    fn fill(&mut self) {
        let pending = match self.port.bytes_to_read() {
            Ok(n) => n as usize,
            Err(e) => {
                warn!(port = %self.path, error = %e, "serial bytes_to_read failed");
                return;
            }
        };
        if pending == 0 {
            return;
        }
        let mut buf = [0u8; READ_CHUNK];
        let want = pending.min(READ_CHUNK);
        match self.port.read(&mut buf[..want]) {
            Ok(n) => self.rx.extend(&buf[..n]),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(e) => debug!(port = %self.path, error = %e, "serial read failed"),
        }
    }
}

impl WiredLink for SerialWiredLink {
    fn id(&self) -> &str {
        &self.path
    }

    fn available(&mut self) -> usize {
        if self.rx.is_empty() {
            self.fill();
        }
        self.rx.len()
    }

    fn read(&mut self) -> Option<u8> {
        if self.rx.is_empty() {
            self.fill();
        }
        self.rx.pop_front()
    }

    fn write(&mut self, frame: &[u8]) -> Result<usize, LinkError> {
        self.port
            .write_all(frame)
            .map_err(|e| transport(format!("write to {} failed: {e}", self.path)))?;
        Ok(frame.len())
    }
}

fn transport(details: String) -> LinkError {
    LinkError::Transport {
        link: TransportKind::Wired,
        details,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_missing_port_is_transport_error() {
        let err = SerialWiredLink::open("/dev/hoverlink-does-not-exist", 115_200)
            .err()
            .expect("opening a missing port must fail");
        assert!(matches!(
            err,
            LinkError::Transport {
                link: TransportKind::Wired,
                ..
            }
        ));
    }
}
