//! Shared vocabulary for the hoverlink workspace: transport and peer
//! identities, the parameter-protocol message model, scheduling descriptors,
//! the buzzer / PWM value objects and the workspace error type.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ────────────────────────────────────────────────────────────────────────────
// Transports and peers
// ────────────────────────────────────────────────────────────────────────────

/// The two physical channels the relay bridges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportKind {
    /// Reliable, always-on byte stream to the motor controller.
    Wired,
    /// Best-effort, packet-oriented peer-to-peer radio link.
    Wireless,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Wired => write!(f, "wired"),
            TransportKind::Wireless => write!(f, "wireless"),
        }
    }
}

/// Which directions a link is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkDirection {
    Send,
    Receive,
    Both,
}

/// Connectivity state of a [`TransportLink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkState {
    /// No counterpart known yet (wireless link before discovery).
    Unpaired,
    /// Counterpart known; frames can be delivered.
    Paired,
    /// Link constructed but not carrying traffic in the current plan.
    Idle,
}

/// Descriptor of one physical channel. Created once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportLink {
    pub kind: TransportKind,
    pub direction: LinkDirection,
    pub state: LinkState,
}

impl TransportLink {
    pub fn new(kind: TransportKind, direction: LinkDirection, state: LinkState) -> Self {
        Self {
            kind,
            direction,
            state,
        }
    }

    /// A link the active plan does not carry traffic on.
    pub fn idle(kind: TransportKind) -> Self {
        Self::new(kind, LinkDirection::Both, LinkState::Idle)
    }

    pub fn is_paired(&self) -> bool {
        self.state == LinkState::Paired
    }
}

/// Six-byte hardware address of a wireless peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerAddress(pub [u8; 6]);

impl PeerAddress {
    pub const BROADCAST: PeerAddress = PeerAddress([0xFF; 6]);
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl FromStr for PeerAddress {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 6];
        let mut parts = s.split(':');
        for byte in bytes.iter_mut() {
            let part = parts
                .next()
                .ok_or_else(|| LinkError::Config(format!("peer address '{s}' is too short")))?;
            *byte = u8::from_str_radix(part, 16)
                .map_err(|e| LinkError::Config(format!("peer address '{s}': {e}")))?;
        }
        if parts.next().is_some() {
            return Err(LinkError::Config(format!("peer address '{s}' is too long")));
        }
        Ok(PeerAddress(bytes))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Parameter protocol message model
// ────────────────────────────────────────────────────────────────────────────

/// Index into an endpoint's parameter table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParamCode(pub u8);

impl ParamCode {
    pub const PROTOCOL_VERSION: ParamCode = ParamCode(0x00);
    pub const SENS_HALL: ParamCode = ParamCode(0x02);
    pub const SENS_ELECTRICAL: ParamCode = ParamCode(0x08);
    pub const ENABLE_MOTORS: ParamCode = ParamCode(0x09);
    pub const SET_POINT_PWM_DATA: ParamCode = ParamCode(0x0D);
    pub const SET_POINT_PWM: ParamCode = ParamCode(0x0E);
    pub const SET_BUZZER: ParamCode = ParamCode(0x21);
    pub const PROTOCOL_SUBSCRIPTIONS: ParamCode = ParamCode(0x22);
    pub const PROTOCOL_COUNT_SUM: ParamCode = ParamCode(0x23);
    pub const TEXT: ParamCode = ParamCode(0x24);
}

impl fmt::Display for ParamCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X}", self.0)
    }
}

/// Start-of-message byte requesting an acknowledgement.
pub const SOM_ACK: u8 = 0x02;
/// Start-of-message byte for fire-and-forget frames.
pub const SOM_NOACK: u8 = 0x04;

/// Command byte of a protocol message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Command {
    Read,
    ReadResponse,
    Write,
    WriteResponse,
    /// Refresh a value locally without producing a response.
    SilentRead,
    Other(u8),
}

impl Command {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            b'R' => Command::Read,
            b'r' => Command::ReadResponse,
            b'W' => Command::Write,
            b'w' => Command::WriteResponse,
            b'S' => Command::SilentRead,
            other => Command::Other(other),
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            Command::Read => b'R',
            Command::ReadResponse => b'r',
            Command::Write => b'W',
            Command::WriteResponse => b'w',
            Command::SilentRead => b'S',
            Command::Other(b) => b,
        }
    }
}

/// One decoded parameter-protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolMessage {
    pub som: u8,
    /// Continuity index assigned by the sending endpoint.
    pub ci: u8,
    pub cmd: Command,
    pub code: ParamCode,
    pub payload: Vec<u8>,
}

impl ProtocolMessage {
    /// Build an unacknowledged message; the sending endpoint assigns `ci`.
    pub fn new(cmd: Command, code: ParamCode, payload: Vec<u8>) -> Self {
        Self {
            som: SOM_NOACK,
            ci: 0,
            cmd,
            code,
            payload,
        }
    }

    pub fn read(code: ParamCode) -> Self {
        Self::new(Command::Read, code, Vec::new())
    }

    pub fn write(code: ParamCode, payload: Vec<u8>) -> Self {
        Self::new(Command::Write, code, payload)
    }

    /// Request an acknowledgement from the receiver.
    pub fn with_ack(mut self) -> Self {
        self.som = SOM_ACK;
        self
    }

    pub fn wants_ack(&self) -> bool {
        self.som == SOM_ACK
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Scheduling
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScheduleDirection {
    PeriodicRead,
    PeriodicWrite,
    OneShotRead,
}

/// How many times a scheduled operation fires before it retires itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RepeatCount {
    Unlimited,
    Times(u32),
}

/// Period of a scheduled operation. `Disabled` removes the schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchedulePeriod {
    Every(Duration),
    Disabled,
}

/// A periodic read or write registered against an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledOperation {
    pub code: ParamCode,
    pub direction: ScheduleDirection,
    pub repeat: RepeatCount,
    pub period: SchedulePeriod,
}

impl ScheduledOperation {
    pub fn periodic_read(code: ParamCode, repeat: RepeatCount, period: Duration) -> Self {
        Self {
            code,
            direction: ScheduleDirection::PeriodicRead,
            repeat,
            period: SchedulePeriod::Every(period),
        }
    }

    pub fn periodic_write(code: ParamCode, repeat: RepeatCount, period: Duration) -> Self {
        Self {
            code,
            direction: ScheduleDirection::PeriodicWrite,
            repeat,
            period: SchedulePeriod::Every(period),
        }
    }

    pub fn one_shot_read(code: ParamCode) -> Self {
        Self {
            code,
            direction: ScheduleDirection::OneShotRead,
            repeat: RepeatCount::Times(1),
            period: SchedulePeriod::Every(Duration::ZERO),
        }
    }

    /// A descriptor that removes any schedule for `(code, direction)`.
    pub fn disabled(code: ParamCode, direction: ScheduleDirection) -> Self {
        Self {
            code,
            direction,
            repeat: RepeatCount::Times(0),
            period: SchedulePeriod::Disabled,
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.period == SchedulePeriod::Disabled
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Value objects
// ────────────────────────────────────────────────────────────────────────────

/// Transient buzzer request consumed by the scheduler on its next cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuzzerCommand {
    pub frequency: u16,
    pub pattern: u8,
    pub duration: u16,
}

impl BuzzerCommand {
    pub const ENCODED_LEN: usize = 5;

    pub fn new(frequency: u16, pattern: u8, duration: u16) -> Self {
        Self {
            frequency,
            pattern,
            duration,
        }
    }

    /// The all-zero tuple means "nothing to play" and is never sent.
    pub fn is_pending(&self) -> bool {
        self.frequency != 0 || self.pattern != 0 || self.duration != 0
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::ENCODED_LEN);
        out.extend_from_slice(&self.frequency.to_le_bytes());
        out.push(self.pattern);
        out.extend_from_slice(&self.duration.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::ENCODED_LEN {
            return None;
        }
        Some(Self {
            frequency: u16::from_le_bytes([bytes[0], bytes[1]]),
            pattern: bytes[2],
            duration: u16::from_le_bytes([bytes[3], bytes[4]]),
        })
    }
}

/// Left/right PWM setpoints plus the limits the motor controller enforces.
///
/// Configuration convention: `max_power > minimum_pwm > 0 > min_power`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PwmSetpoint {
    pub pwm: [i32; 2],
    pub max_power: i32,
    pub min_power: i32,
    /// Magnitudes below this guard are driven as zero.
    pub minimum_pwm: i32,
}

impl Default for PwmSetpoint {
    fn default() -> Self {
        Self {
            pwm: [0, 0],
            max_power: 400,
            min_power: -400,
            minimum_pwm: 30,
        }
    }
}

impl PwmSetpoint {
    pub const ENCODED_LEN: usize = 20;

    /// Wide limits and a minimal guard for bench test runs.
    pub fn test_run() -> Self {
        Self {
            pwm: [0, 0],
            max_power: 1000,
            min_power: -1000,
            minimum_pwm: 1,
        }
    }

    pub fn with_pwm(mut self, left: i32, right: i32) -> Self {
        self.pwm = [left, right];
        self
    }

    /// What the consuming controller actually drives: clamped to the power
    /// limits, with sub-guard magnitudes forced to zero.
    pub fn effective(&self) -> [i32; 2] {
        // Limits may arrive off the wire inverted; `max`/`min` never panic.
        let guard = self.minimum_pwm.max(0).unsigned_abs();
        self.pwm.map(|v| {
            let clamped = v.max(self.min_power).min(self.max_power);
            if clamped.unsigned_abs() < guard { 0 } else { clamped }
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::ENCODED_LEN);
        for v in [
            self.pwm[0],
            self.pwm[1],
            self.max_power,
            self.min_power,
            self.minimum_pwm,
        ] {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::ENCODED_LEN {
            return None;
        }
        let word = |i: usize| {
            i32::from_le_bytes([bytes[i * 4], bytes[i * 4 + 1], bytes[i * 4 + 2], bytes[i * 4 + 3]])
        };
        Some(Self {
            pwm: [word(0), word(1)],
            max_power: word(2),
            min_power: word(3),
            minimum_pwm: word(4),
        })
    }
}

/// Wheel speeds reported by the hall sensors, in mm/s.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HallSample {
    pub wheel_speed_mm_s: [i32; 2],
}

impl HallSample {
    pub const ENCODED_LEN: usize = 8;
    const MM_S_TO_KMH: f32 = 0.0036;

    // Widened before combining: both words come straight off the wire.
    pub fn speed_kmh(&self) -> f32 {
        let [left, right] = self.wheel_speed_mm_s.map(i64::from);
        (left + right) as f32 / 2.0 * Self::MM_S_TO_KMH
    }

    pub fn steer_kmh(&self) -> f32 {
        let [left, right] = self.wheel_speed_mm_s.map(i64::from);
        (left - right) as f32 / 2.0 * Self::MM_S_TO_KMH
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::ENCODED_LEN);
        out.extend_from_slice(&self.wheel_speed_mm_s[0].to_le_bytes());
        out.extend_from_slice(&self.wheel_speed_mm_s[1].to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::ENCODED_LEN {
            return None;
        }
        Some(Self {
            wheel_speed_mm_s: [
                i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
                i32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            ],
        })
    }
}

/// Battery and per-motor electrical measurements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ElectricalSample {
    pub battery_voltage: f32,
    pub motor_current: [f32; 2],
}

impl ElectricalSample {
    pub const ENCODED_LEN: usize = 12;

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::ENCODED_LEN);
        out.extend_from_slice(&self.battery_voltage.to_le_bytes());
        out.extend_from_slice(&self.motor_current[0].to_le_bytes());
        out.extend_from_slice(&self.motor_current[1].to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::ENCODED_LEN {
            return None;
        }
        let word = |i: usize| {
            f32::from_le_bytes([bytes[i * 4], bytes[i * 4 + 1], bytes[i * 4 + 2], bytes[i * 4 + 3]])
        };
        Some(Self {
            battery_voltage: word(0),
            motor_current: [word(1), word(2)],
        })
    }
}

/// Frame counters kept by an endpoint and readable over the protocol.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolCounters {
    pub rx_frames: u32,
    pub tx_frames: u32,
    pub rx_errors: u32,
}

impl ProtocolCounters {
    pub const ENCODED_LEN: usize = 12;

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::ENCODED_LEN);
        for v in [self.rx_frames, self.tx_frames, self.rx_errors] {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out
    }
}

/// Read-only telemetry snapshot derived from an endpoint's parameter table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    pub speed_kmh: f32,
    pub steer_kmh: f32,
    pub battery_voltage: f32,
    pub motor_current: [f32; 2],
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Workspace error type. None of these are fatal to the control loop.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkError {
    #[error("Frame not sent this attempt: no paired peer")]
    NotSent,

    #[error("Peer registry full (capacity {capacity}); dropping {address}")]
    RegistryFull { capacity: usize, address: PeerAddress },

    #[error("Unknown peer {0}")]
    UnknownPeer(PeerAddress),

    #[error("Transport fault on {link} link: {details}")]
    Transport { link: TransportKind, details: String },

    #[error("Malformed frame: {0}")]
    Frame(String),

    #[error("Parameter {0} is not in the table")]
    UnknownParam(ParamCode),

    #[error("Configuration error: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_address_display_and_parse() {
        let addr = PeerAddress([0x24, 0x0a, 0xc4, 0x01, 0x02, 0xff]);
        let text = addr.to_string();
        assert_eq!(text, "24:0a:c4:01:02:ff");
        assert_eq!(text.parse::<PeerAddress>().unwrap(), addr);
    }

    #[test]
    fn peer_address_rejects_bad_input() {
        assert!("24:0a:c4".parse::<PeerAddress>().is_err());
        assert!("24:0a:c4:01:02:ff:00".parse::<PeerAddress>().is_err());
        assert!("zz:0a:c4:01:02:ff".parse::<PeerAddress>().is_err());
    }

    #[test]
    fn command_byte_mapping() {
        for cmd in [
            Command::Read,
            Command::ReadResponse,
            Command::Write,
            Command::WriteResponse,
            Command::SilentRead,
        ] {
            assert_eq!(Command::from_byte(cmd.as_byte()), cmd);
        }
        assert_eq!(Command::from_byte(b'C'), Command::Other(b'C'));
    }

    #[test]
    fn buzzer_pending_only_when_non_zero() {
        assert!(!BuzzerCommand::default().is_pending());
        assert!(BuzzerCommand::new(0, 0, 1).is_pending());
        assert!(BuzzerCommand::new(440, 1, 100).is_pending());
    }

    #[test]
    fn buzzer_decode_reads_encoded_fields() {
        let cmd = BuzzerCommand::new(440, 1, 100);
        assert_eq!(BuzzerCommand::decode(&cmd.encode()), Some(cmd));
        assert_eq!(BuzzerCommand::decode(&[1, 2]), None);
    }

    #[test]
    fn pwm_effective_applies_guard_and_limits() {
        let sp = PwmSetpoint::default().with_pwm(20, 900);
        assert_eq!(sp.effective(), [0, 400]);

        let sp = PwmSetpoint::default().with_pwm(-29, -500);
        assert_eq!(sp.effective(), [0, -400]);

        let sp = PwmSetpoint::test_run().with_pwm(2, -999);
        assert_eq!(sp.effective(), [2, -999]);
    }

    #[test]
    fn pwm_effective_tolerates_hostile_limits() {
        let sp = PwmSetpoint {
            pwm: [i32::MIN, i32::MAX],
            max_power: i32::MAX,
            min_power: i32::MIN,
            minimum_pwm: 30,
        };
        assert_eq!(sp.effective(), [i32::MIN, i32::MAX]);

        // Inverted limits resolve to max_power instead of panicking.
        let sp = PwmSetpoint {
            pwm: [0, 50],
            max_power: -10,
            min_power: 10,
            minimum_pwm: i32::MIN,
        };
        assert_eq!(sp.effective(), [-10, -10]);
    }

    #[test]
    fn pwm_setpoint_wire_layout() {
        let sp = PwmSetpoint::default().with_pwm(100, -50);
        let bytes = sp.encode();
        assert_eq!(bytes.len(), PwmSetpoint::ENCODED_LEN);
        assert_eq!(&bytes[0..4], &100i32.to_le_bytes());
        assert_eq!(&bytes[16..20], &30i32.to_le_bytes());
        assert_eq!(PwmSetpoint::decode(&bytes), Some(sp));
    }

    #[test]
    fn hall_sample_speed_and_steer() {
        let hall = HallSample {
            wheel_speed_mm_s: [1000, 500],
        };
        assert!((hall.speed_kmh() - 2.7).abs() < 1e-4);
        assert!((hall.steer_kmh() - 0.9).abs() < 1e-4);
    }

    #[test]
    fn hall_sample_extreme_speeds_do_not_overflow() {
        let hall = HallSample {
            wheel_speed_mm_s: [i32::MAX, 1],
        };
        let expected = 1_073_741_824.0_f32 * 0.0036;
        assert!((hall.speed_kmh() - expected).abs() / expected < 1e-4);
        assert!(hall.steer_kmh() > 0.0);

        let hall = HallSample {
            wheel_speed_mm_s: [i32::MIN, i32::MAX],
        };
        assert!((hall.speed_kmh() + 0.0018).abs() < 1e-4);
        let expected = -2_147_483_647.5_f32 * 0.0036;
        assert!((hall.steer_kmh() - expected).abs() / expected.abs() < 1e-4);
    }

    #[test]
    fn schedule_descriptors() {
        let op = ScheduledOperation::periodic_read(
            ParamCode::SENS_HALL,
            RepeatCount::Unlimited,
            Duration::from_millis(30),
        );
        assert!(!op.is_disabled());
        let off = ScheduledOperation::disabled(ParamCode::SENS_HALL, ScheduleDirection::PeriodicRead);
        assert!(off.is_disabled());
        assert_eq!(
            ScheduledOperation::one_shot_read(ParamCode::TEXT).repeat,
            RepeatCount::Times(1)
        );
    }

    #[test]
    fn link_error_display() {
        let err = LinkError::Transport {
            link: TransportKind::Wired,
            details: "port closed".to_string(),
        };
        assert!(err.to_string().contains("wired"));
        assert!(err.to_string().contains("port closed"));

        let err = LinkError::UnknownParam(ParamCode::TEXT);
        assert!(err.to_string().contains("0x24"));
    }

    #[test]
    fn link_error_serialization_roundtrip() {
        let err = LinkError::RegistryFull {
            capacity: 1,
            address: PeerAddress([1, 2, 3, 4, 5, 6]),
        };
        let json = serde_json::to_string(&err).unwrap();
        let back: LinkError = serde_json::from_str(&json).unwrap();
        assert_eq!(err, back);
    }
}
