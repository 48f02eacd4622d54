//! Diagnostic markup: one labelled line per raw frame.
//!
//! [`protocol_markup`] is pure. It walks the caller's slice and nothing
//! else, so it is safe on truncated or malformed frames of any length ≥ 1.
//! Where the line ends up is a [`MarkupSink`]'s business.

use std::fmt::Write as _;

use hoverlink_types::ParamCode;
use tracing::debug;

/// Where a marked-up frame was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkupSource {
    WiredOut,
    WirelessOut,
    WirelessIn,
    /// Any other interface, rendered by number.
    Other(u8),
}

fn code_label(code: u8) -> Option<&'static str> {
    let label = match ParamCode(code) {
        ParamCode::SET_POINT_PWM => "PWM      ",
        ParamCode::SET_POINT_PWM_DATA => "PWM Data ",
        ParamCode::PROTOCOL_SUBSCRIPTIONS => "Subscribe",
        ParamCode::SENS_HALL => "Hall     ",
        ParamCode::PROTOCOL_COUNT_SUM => "CounterS ",
        ParamCode::SET_BUZZER => "Buzzer   ",
        ParamCode::ENABLE_MOTORS => "Enable   ",
        ParamCode::SENS_ELECTRICAL => "El. Meas ",
        _ => return None,
    };
    Some(label)
}

/// Render `frame` as a labelled line.
///
/// Positions 0..=3 are `SOM`, `CI`, `len` and `CMD`. Position 4 is the
/// parameter label unless it is the final byte. The final byte at position
/// 4 or later is the checksum; everything in between is payload hex.
pub fn protocol_markup(frame: &[u8], source: MarkupSource) -> String {
    let mut line = String::with_capacity(16 + frame.len() * 4);
    match source {
        MarkupSource::WiredOut => line.push_str("Out Wired  "),
        MarkupSource::WirelessOut => line.push_str("Out Radio  "),
        MarkupSource::WirelessIn => line.push_str("In  Radio  "),
        MarkupSource::Other(n) => {
            let _ = write!(line, "if:{n} ");
        }
    }

    let last = frame.len().saturating_sub(1);
    for (i, byte) in frame.iter().copied().enumerate() {
        let _ = match i {
            0 => write!(line, "SOM:{byte} "),
            1 => write!(line, "CI:{byte:03} "),
            2 => write!(line, "len:{byte:03} "),
            3 => write!(line, "CMD:{} ", char::from(byte)),
            _ if i == last => write!(line, "CS:0x{byte:02X} "),
            4 => match code_label(byte) {
                Some(label) => write!(line, "{label} "),
                None => write!(line, "Code:0x{byte:02X} "),
            },
            _ => write!(line, "{byte:02X} "),
        };
    }

    line.truncate(line.trim_end().len());
    line
}

/// Line-oriented destination for markup output.
pub trait MarkupSink: Send + Sync {
    fn emit(&self, source: MarkupSource, line: &str);
}

/// Writes markup lines as debug events under the `hoverlink::markup` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl MarkupSink for TracingSink {
    fn emit(&self, source: MarkupSource, line: &str) {
        debug!(target: "hoverlink::markup", ?source, "{line}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame;
    use hoverlink_types::ProtocolMessage;

    #[test]
    fn short_frame_puts_checksum_at_index_four() {
        let line = protocol_markup(&[0x01, 0x42, 0x05, b'C', 0xAA], MarkupSource::WiredOut);
        assert!(line.starts_with("Out Wired"));
        for field in ["SOM:1", "CI:066", "len:005", "CMD:C", "CS:0xAA"] {
            assert!(line.contains(field), "{field} missing from {line:?}");
        }
        assert!(!line.contains("Code:"));
    }

    #[test]
    fn known_code_gets_its_label() {
        let bytes = frame::encode(&ProtocolMessage::write(ParamCode::SET_BUZZER, vec![0xB8, 0x01]));
        let line = protocol_markup(&bytes, MarkupSource::WirelessOut);
        assert!(line.starts_with("Out Radio"));
        assert!(line.contains("Buzzer"));
        assert!(line.contains("B8 01"));
        assert!(line.ends_with(&format!("CS:0x{:02X}", bytes[bytes.len() - 1])));
    }

    #[test]
    fn unknown_code_falls_back_to_hex() {
        let line = protocol_markup(&[0x04, 0x00, 0x02, b'R', 0x77, 0x00], MarkupSource::WirelessIn);
        assert!(line.starts_with("In  Radio"));
        assert!(line.contains("Code:0x77"));
        assert!(line.contains("CS:0x00"));
    }

    #[test]
    fn other_interfaces_are_numbered() {
        let line = protocol_markup(&[0x04], MarkupSource::Other(3));
        assert_eq!(line, "if:3 SOM:4");
    }

    #[test]
    fn tracing_sink_accepts_lines() {
        TracingSink.emit(MarkupSource::WiredOut, "Out Wired  SOM:4");
    }
}
