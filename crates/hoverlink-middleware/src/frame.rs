//! Frame layout used by the in-process endpoint and motor-controller
//! doubles.
//!
//! ```text
//! [SOM][CI][len][CMD][code][payload...][CS]
//! ```
//!
//! `len` counts `CMD`, `code` and the payload. `CS` is chosen so that the
//! byte sum of everything after `SOM`, checksum included, is zero mod 256.
//! Field positions match what [`crate::markup`] labels.

use hoverlink_types::{Command, LinkError, ParamCode, ProtocolMessage, SOM_ACK, SOM_NOACK};

/// Largest payload a frame may carry.
pub const MAX_PAYLOAD: usize = 250;

/// Serialize `message` into a complete frame.
pub fn encode(message: &ProtocolMessage) -> Vec<u8> {
    let payload = &message.payload[..message.payload.len().min(MAX_PAYLOAD)];
    let mut frame = Vec::with_capacity(payload.len() + 6);
    frame.push(message.som);
    frame.push(message.ci);
    frame.push((payload.len() + 2) as u8);
    frame.push(message.cmd.as_byte());
    frame.push(message.code.0);
    frame.extend_from_slice(payload);
    frame.push(checksum(&frame[1..]));
    frame
}

/// Checksum over the bytes between `SOM` and `CS`.
pub fn checksum(bytes: &[u8]) -> u8 {
    let sum = bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    0u8.wrapping_sub(sum)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Som,
    Ci,
    Len,
    Body,
    Checksum,
}

/// Byte-at-a-time frame parser.
///
/// Feeding the same bytes in any chunking yields the same messages.
#[derive(Debug, Clone)]
pub struct FrameParser {
    state: State,
    som: u8,
    ci: u8,
    len: usize,
    body: Vec<u8>,
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameParser {
    pub fn new() -> Self {
        Self {
            state: State::Som,
            som: 0,
            ci: 0,
            len: 0,
            body: Vec::with_capacity(MAX_PAYLOAD + 2),
        }
    }

    /// Feed one byte. Returns a message (or a framing error) when a frame
    /// completes.
    pub fn push(&mut self, byte: u8) -> Option<Result<ProtocolMessage, LinkError>> {
        match self.state {
            State::Som => {
                if byte == SOM_ACK || byte == SOM_NOACK {
                    self.som = byte;
                    self.state = State::Ci;
                }
                None
            }
            State::Ci => {
                self.ci = byte;
                self.state = State::Len;
                None
            }
            State::Len => {
                let len = byte as usize;
                if !(2..=MAX_PAYLOAD + 2).contains(&len) {
                    self.reset();
                    return Some(Err(LinkError::Frame(format!("invalid length {len}"))));
                }
                self.len = len;
                self.body.clear();
                self.state = State::Body;
                None
            }
            State::Body => {
                self.body.push(byte);
                if self.body.len() == self.len {
                    self.state = State::Checksum;
                }
                None
            }
            State::Checksum => {
                let mut covered = Vec::with_capacity(self.len + 2);
                covered.push(self.ci);
                covered.push(self.len as u8);
                covered.extend_from_slice(&self.body);
                let expected = checksum(&covered);
                let result = if expected == byte {
                    Ok(ProtocolMessage {
                        som: self.som,
                        ci: self.ci,
                        cmd: Command::from_byte(self.body[0]),
                        code: ParamCode(self.body[1]),
                        payload: self.body[2..].to_vec(),
                    })
                } else {
                    Err(LinkError::Frame(format!(
                        "checksum mismatch: expected 0x{expected:02X}, got 0x{byte:02X}"
                    )))
                };
                self.reset();
                Some(result)
            }
        }
    }

    fn reset(&mut self) {
        self.state = State::Som;
        self.len = 0;
        self.body.clear();
    }
}
