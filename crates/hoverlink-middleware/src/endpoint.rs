//! The Protocol Endpoint capability interface.
//!
//! An endpoint is one side of the parameter protocol bound to exactly one
//! transport. The relay and the scheduler only ever talk to this trait; the
//! endpoint's parser, parameter table and schedule queue are its own
//! business.
//!
//! # Contract
//!
//! * `push_byte` – feed received bytes into the parser. Completed messages
//!   are dispatched to the code's handler, or to default processing when no
//!   handler is registered.
//! * `post` – serialize and transmit a message immediately. Never re-enters
//!   the endpoint's own handlers.
//! * `outbox` – a cloneable, non-blocking handle for queueing messages from
//!   other contexts (relay handlers). Queued messages are posted on the next
//!   `tick`.
//! * `tick` – drain the outbox, then fire due scheduled operations.

use std::sync::Arc;
use std::sync::mpsc::Sender;
use std::time::{Duration, Instant};

use hoverlink_types::{
    BuzzerCommand, Command, LinkError, ParamCode, ProtocolMessage, PwmSetpoint, RepeatCount,
    ScheduledOperation, Telemetry,
};
use parking_lot::Mutex;

/// A completed inbound message as seen by a parameter handler.
#[derive(Debug, Clone)]
pub struct ParamEvent {
    pub code: ParamCode,
    pub cmd: Command,
    pub message: ProtocolMessage,
}

/// What the endpoint should do after a handler returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// The handler dealt with the message.
    Consumed,
    /// Run the endpoint's default processing as well.
    Default,
}

/// Per-parameter callback. Replaces default processing for its code.
pub type ParamHandler = Box<dyn FnMut(&ParamEvent) -> Dispatch + Send>;

/// Where an endpoint's serialized frames go.
pub type FrameSink = Box<dyn FnMut(&[u8]) -> Result<usize, LinkError> + Send>;

/// Non-blocking queue into an endpoint's outbound path.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: Sender<ProtocolMessage>,
}

impl Outbox {
    pub fn new(tx: Sender<ProtocolMessage>) -> Self {
        Self { tx }
    }

    /// Queue `message` for transmission. Returns `false` once the owning
    /// endpoint has been dropped.
    pub fn post(&self, message: ProtocolMessage) -> bool {
        self.tx.send(message).is_ok()
    }
}

/// Fixed-size variable shared between an endpoint's parameter slot and
/// external code.
///
/// Scheduled writes transmit the variable's current bytes; applied writes
/// and read responses store into it.
#[derive(Debug, Clone)]
pub struct ParamBinding {
    bytes: Arc<Mutex<Vec<u8>>>,
    size: usize,
}

impl ParamBinding {
    /// A zero-filled variable of `size` bytes.
    pub fn new(size: usize) -> Self {
        Self {
            bytes: Arc::new(Mutex::new(vec![0; size])),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Overwrite the variable; extra bytes are dropped, missing ones zeroed.
    pub fn store(&self, value: &[u8]) {
        let mut bytes = self.bytes.lock();
        bytes.iter_mut().for_each(|b| *b = 0);
        let n = value.len().min(self.size);
        bytes[..n].copy_from_slice(&value[..n]);
    }

    pub fn load(&self) -> Vec<u8> {
        self.bytes.lock().clone()
    }
}

/// One side of the parameter protocol.
pub trait ProtocolEndpoint: Send {
    /// Stable identifier used in logs, e.g. `"wired"`.
    fn name(&self) -> &str;

    /// Feed one received byte into the parser.
    fn push_byte(&mut self, byte: u8);

    /// Feed a run of received bytes. Equivalent to pushing them one by one.
    fn push_bytes(&mut self, bytes: &[u8]) {
        for byte in bytes {
            self.push_byte(*byte);
        }
    }

    /// Serialize and transmit `message` now.
    ///
    /// # Errors
    ///
    /// Propagates the frame sink's error, e.g. [`LinkError::NotSent`] while
    /// the wireless link is unpaired.
    fn post(&mut self, message: ProtocolMessage) -> Result<usize, LinkError>;

    /// Handle for queueing messages from other contexts.
    fn outbox(&self) -> Outbox;

    /// Advance internal bookkeeping: drain the outbox, fire due schedules.
    fn tick(&mut self, now: Instant);

    /// Register, re-arm, or (with a disabled period) remove a schedule.
    fn schedule(&mut self, op: ScheduledOperation) -> Result<(), LinkError>;

    fn schedule_read(
        &mut self,
        code: ParamCode,
        repeat: RepeatCount,
        period: Duration,
    ) -> Result<(), LinkError> {
        self.schedule(ScheduledOperation::periodic_read(code, repeat, period))
    }

    fn schedule_write(
        &mut self,
        code: ParamCode,
        repeat: RepeatCount,
        period: Duration,
    ) -> Result<(), LinkError> {
        self.schedule(ScheduledOperation::periodic_write(code, repeat, period))
    }

    /// Install `handler` for `code`, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::UnknownParam`] when `code` is not in the table.
    fn register_handler(&mut self, code: ParamCode, handler: ParamHandler) -> Result<(), LinkError>;

    /// Back `code`'s slot with an externally shared variable.
    fn bind_variable(&mut self, code: ParamCode, binding: ParamBinding) -> Result<(), LinkError>;

    /// Every code present in this endpoint's table.
    fn param_codes(&self) -> Vec<ParamCode>;

    fn has_param(&self, code: ParamCode) -> bool {
        self.param_codes().contains(&code)
    }

    fn speed_kmh(&self) -> f32;

    fn steer_kmh(&self) -> f32;

    fn battery_voltage(&self) -> f32;

    /// Average current of motor `channel` (0 = left, 1 = right).
    fn motor_current(&self, channel: usize) -> f32;

    fn telemetry(&self) -> Telemetry {
        Telemetry {
            speed_kmh: self.speed_kmh(),
            steer_kmh: self.steer_kmh(),
            battery_voltage: self.battery_voltage(),
            motor_current: [self.motor_current(0), self.motor_current(1)],
        }
    }

    fn send_buzzer(&mut self, command: BuzzerCommand) -> Result<usize, LinkError> {
        self.post(ProtocolMessage::write(ParamCode::SET_BUZZER, command.encode()))
    }

    fn send_enable(&mut self, enable: bool, ack: bool) -> Result<usize, LinkError> {
        let message = ProtocolMessage::write(ParamCode::ENABLE_MOTORS, vec![u8::from(enable)]);
        self.post(if ack { message.with_ack() } else { message })
    }

    fn send_pwm_data(&mut self, setpoint: &PwmSetpoint, ack: bool) -> Result<usize, LinkError> {
        let message = ProtocolMessage::write(ParamCode::SET_POINT_PWM_DATA, setpoint.encode());
        self.post(if ack { message.with_ack() } else { message })
    }
}

/// An endpoint shared between the control loop, the relay and the wireless
/// receive context. The lock is only held for one push, post or tick.
pub type EndpointHandle = Arc<Mutex<Box<dyn ProtocolEndpoint>>>;

/// Wrap an endpoint for sharing.
pub fn shared(endpoint: impl ProtocolEndpoint + 'static) -> EndpointHandle {
    Arc::new(Mutex::new(Box::new(endpoint)))
}
