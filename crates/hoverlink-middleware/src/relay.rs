//! Relay wiring between two endpoints.
//!
//! For every code both tables share, a handler on the source endpoint hands
//! the message to the destination's [`Outbox`]; the destination transmits it
//! on its next tick via `post`, which never dispatches to its own handlers.
//! Relayed traffic therefore travels exactly one hop.
//!
//! Handlers only touch the destination's outbox, never its lock, so a push
//! on one endpoint can run concurrently with a tick on the other.

use hoverlink_types::ParamCode;
use tracing::{debug, trace, warn};

use crate::endpoint::{Dispatch, EndpointHandle, Outbox, ParamEvent, ParamHandler};

/// Which directions of a relay pair are wired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayDirections {
    pub a_to_b: bool,
    pub b_to_a: bool,
}

impl RelayDirections {
    pub const BOTH: Self = Self {
        a_to_b: true,
        b_to_a: true,
    };
    pub const A_TO_B: Self = Self {
        a_to_b: true,
        b_to_a: false,
    };
    pub const B_TO_A: Self = Self {
        a_to_b: false,
        b_to_a: true,
    };
}

impl Default for RelayDirections {
    fn default() -> Self {
        Self::BOTH
    }
}

/// Codes wired per direction, and codes skipped because the other side
/// lacks them.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RelayReport {
    pub a_to_b: Vec<ParamCode>,
    pub b_to_a: Vec<ParamCode>,
    pub skipped: Vec<ParamCode>,
}

fn relay_handler(target: String, outbox: Outbox) -> ParamHandler {
    Box::new(move |event: &ParamEvent| {
        if !outbox.post(event.message.clone()) {
            trace!(target_endpoint = %target, code = %event.code, "Relay target gone");
        }
        Dispatch::Consumed
    })
}

/// Install forwarding handlers between `a` and `b`.
///
/// A code present on only one side gets no handler; that is reported in
/// [`RelayReport::skipped`], never treated as an error.
pub fn wire_relay(a: &EndpointHandle, b: &EndpointHandle, directions: RelayDirections) -> RelayReport {
    let (a_name, a_codes, a_outbox) = {
        let endpoint = a.lock();
        (endpoint.name().to_string(), endpoint.param_codes(), endpoint.outbox())
    };
    let (b_name, b_codes, b_outbox) = {
        let endpoint = b.lock();
        (endpoint.name().to_string(), endpoint.param_codes(), endpoint.outbox())
    };

    let mut report = RelayReport::default();
    for code in a_codes.iter().chain(b_codes.iter()) {
        if !(a_codes.contains(code) && b_codes.contains(code)) && !report.skipped.contains(code) {
            report.skipped.push(*code);
        }
    }

    if directions.a_to_b {
        report.a_to_b = install(a, &a_codes, &b_codes, &b_name, &b_outbox);
    }
    if directions.b_to_a {
        report.b_to_a = install(b, &b_codes, &a_codes, &a_name, &a_outbox);
    }

    debug!(
        a = %a_name,
        b = %b_name,
        a_to_b = report.a_to_b.len(),
        b_to_a = report.b_to_a.len(),
        skipped = report.skipped.len(),
        "Relay wired"
    );
    report
}

fn install(
    source: &EndpointHandle,
    source_codes: &[ParamCode],
    target_codes: &[ParamCode],
    target_name: &str,
    target_outbox: &Outbox,
) -> Vec<ParamCode> {
    let mut endpoint = source.lock();
    let mut wired = Vec::new();
    for code in source_codes.iter().filter(|c| target_codes.contains(*c)) {
        let handler = relay_handler(target_name.to_string(), target_outbox.clone());
        match endpoint.register_handler(*code, handler) {
            Ok(()) => wired.push(*code),
            Err(e) => warn!(endpoint = %endpoint.name(), %code, error = %e, "Relay handler not installed"),
        }
    }
    wired
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::{FrameSink, ProtocolEndpoint, shared};
    use crate::frame::{self, FrameParser};
    use crate::sim_endpoint::SimEndpoint;
    use hoverlink_types::{Command, ProtocolMessage};
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Instant;

    const X: ParamCode = ParamCode::ENABLE_MOTORS;
    const Y: ParamCode = ParamCode::SET_BUZZER;

    type Captured = Arc<Mutex<Vec<u8>>>;

    fn endpoint(name: &str, codes: &[(ParamCode, usize)]) -> (EndpointHandle, Captured) {
        let out: Captured = Arc::new(Mutex::new(Vec::new()));
        let inner = out.clone();
        let sink: FrameSink = Box::new(move |bytes: &[u8]| {
            inner.lock().extend_from_slice(bytes);
            Ok(bytes.len())
        });
        (shared(SimEndpoint::with_params(name, codes, sink)), out)
    }

    fn sent(captured: &Captured) -> Vec<ProtocolMessage> {
        let mut parser = FrameParser::new();
        std::mem::take(&mut *captured.lock())
            .into_iter()
            .filter_map(|b| parser.push(b))
            .filter_map(Result::ok)
            .collect()
    }

    fn tick_both(a: &EndpointHandle, b: &EndpointHandle) {
        let now = Instant::now();
        a.lock().tick(now);
        b.lock().tick(now);
    }

    #[test]
    fn write_is_forwarded_once_and_not_reflected() {
        let (a, a_out) = endpoint("wired", &[(X, 1), (Y, 5)]);
        let (b, b_out) = endpoint("wireless", &[(X, 1), (Y, 5)]);
        let report = wire_relay(&a, &b, RelayDirections::BOTH);
        assert_eq!(report.a_to_b.len(), 2);
        assert_eq!(report.b_to_a.len(), 2);

        a.lock()
            .push_bytes(&frame::encode(&ProtocolMessage::write(X, vec![1])));
        for _ in 0..3 {
            tick_both(&a, &b);
        }

        let forwarded = sent(&b_out);
        assert_eq!(forwarded.len(), 1);
        assert_eq!(forwarded[0].cmd, Command::Write);
        assert_eq!(forwarded[0].code, X);
        assert_eq!(forwarded[0].payload, vec![1]);
        assert!(sent(&a_out).is_empty(), "relay must not reflect back to A");
    }

    #[test]
    fn each_direction_relays_independently() {
        let (a, a_out) = endpoint("wired", &[(X, 1)]);
        let (b, b_out) = endpoint("wireless", &[(X, 1)]);
        wire_relay(&a, &b, RelayDirections::BOTH);

        b.lock()
            .push_bytes(&frame::encode(&ProtocolMessage::read(X)));
        a.lock()
            .push_bytes(&frame::encode(&ProtocolMessage::write(X, vec![0])));
        tick_both(&a, &b);

        assert_eq!(sent(&a_out).len(), 1);
        assert_eq!(sent(&b_out).len(), 1);
    }

    #[test]
    fn asymmetric_tables_skip_missing_codes() {
        let (a, a_out) = endpoint("wired", &[(X, 1), (Y, 5)]);
        let (b, b_out) = endpoint("wireless", &[(X, 1)]);
        let report = wire_relay(&a, &b, RelayDirections::BOTH);
        assert_eq!(report.a_to_b, vec![X]);
        assert_eq!(report.skipped, vec![Y]);

        a.lock()
            .push_bytes(&frame::encode(&ProtocolMessage::write(Y, vec![1, 0, 1, 0, 1])));
        tick_both(&a, &b);

        assert!(sent(&b_out).is_empty());
        assert!(sent(&a_out).is_empty());
    }

    #[test]
    fn one_way_relay_leaves_other_side_on_default_processing() {
        let (a, _a_out) = endpoint("wired", &[(X, 1)]);
        let (b, b_out) = endpoint("wireless", &[(X, 1)]);
        let report = wire_relay(&a, &b, RelayDirections::A_TO_B);
        assert!(report.b_to_a.is_empty());

        b.lock()
            .push_bytes(&frame::encode(&ProtocolMessage::read(X)));
        tick_both(&a, &b);

        // B answered the read itself instead of forwarding it.
        let replies = sent(&b_out);
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].cmd, Command::ReadResponse);
    }
}
