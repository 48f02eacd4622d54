//! In-process [`ProtocolEndpoint`] with the hoverboard parameter table.
//!
//! Serves as the endpoint on both transports when running on a host, and as
//! the test double for relay and scheduler tests. Parsing goes through
//! [`FrameParser`], so feeding bytes in any chunking produces the same
//! dispatch sequence.

use std::collections::BTreeMap;
use std::sync::mpsc::{self, Receiver};
use std::time::Instant;

use hoverlink_types::{
    Command, ElectricalSample, HallSample, LinkError, ParamCode, ProtocolCounters,
    ProtocolMessage, RepeatCount, ScheduleDirection, SchedulePeriod, ScheduledOperation,
};
use tracing::{debug, trace};

use crate::endpoint::{
    Dispatch, FrameSink, Outbox, ParamBinding, ParamEvent, ParamHandler, ProtocolEndpoint,
};
use crate::frame::{self, FrameParser};

/// Size of the `text` parameter's character buffer.
pub const TEXT_LEN: usize = 64;

/// `(code, size)` for every slot of the hoverboard parameter table.
pub const HOVERBOARD_PARAMS: &[(ParamCode, usize)] = &[
    (ParamCode::PROTOCOL_VERSION, 4),
    (ParamCode::SENS_HALL, HallSample::ENCODED_LEN),
    (ParamCode::SENS_ELECTRICAL, ElectricalSample::ENCODED_LEN),
    (ParamCode::ENABLE_MOTORS, 1),
    (ParamCode::SET_POINT_PWM_DATA, hoverlink_types::PwmSetpoint::ENCODED_LEN),
    (ParamCode::SET_POINT_PWM, hoverlink_types::PwmSetpoint::ENCODED_LEN),
    (ParamCode::SET_BUZZER, hoverlink_types::BuzzerCommand::ENCODED_LEN),
    (ParamCode::PROTOCOL_SUBSCRIPTIONS, 4),
    (ParamCode::PROTOCOL_COUNT_SUM, ProtocolCounters::ENCODED_LEN),
    (ParamCode::TEXT, TEXT_LEN),
];

struct ParamSlot {
    size: usize,
    value: Vec<u8>,
    binding: Option<ParamBinding>,
    handler: Option<ParamHandler>,
}

impl ParamSlot {
    fn new(size: usize) -> Self {
        Self {
            size,
            value: vec![0; size],
            binding: None,
            handler: None,
        }
    }

    fn current(&self) -> Vec<u8> {
        match &self.binding {
            Some(binding) => binding.load(),
            None => self.value.clone(),
        }
    }

    fn store(&mut self, bytes: &[u8]) {
        let n = bytes.len().min(self.size);
        self.value.iter_mut().for_each(|b| *b = 0);
        self.value[..n].copy_from_slice(&bytes[..n]);
        if let Some(binding) = &self.binding {
            binding.store(&self.value);
        }
    }
}

struct Schedule {
    op: ScheduledOperation,
    next_due: Option<Instant>,
    remaining: Option<u32>,
}

/// Table-driven endpoint writing its frames into a [`FrameSink`].
pub struct SimEndpoint {
    name: String,
    params: BTreeMap<ParamCode, ParamSlot>,
    parser: FrameParser,
    sink: FrameSink,
    outbox_tx: mpsc::Sender<ProtocolMessage>,
    outbox_rx: Receiver<ProtocolMessage>,
    schedules: Vec<Schedule>,
    next_ci: u8,
    counters: ProtocolCounters,
}

impl SimEndpoint {
    /// Endpoint carrying the full hoverboard table.
    pub fn hoverboard(name: impl Into<String>, sink: FrameSink) -> Self {
        Self::with_params(name, HOVERBOARD_PARAMS, sink)
    }

    /// Endpoint carrying only the given `(code, size)` slots.
    pub fn with_params(name: impl Into<String>, params: &[(ParamCode, usize)], sink: FrameSink) -> Self {
        let (outbox_tx, outbox_rx) = mpsc::channel();
        Self {
            name: name.into(),
            params: params
                .iter()
                .map(|(code, size)| (*code, ParamSlot::new(*size)))
                .collect(),
            parser: FrameParser::new(),
            sink,
            outbox_tx,
            outbox_rx,
            schedules: Vec::new(),
            next_ci: 0,
            counters: ProtocolCounters::default(),
        }
    }

    /// Current bytes of `code`'s slot (the bound variable when bound).
    pub fn value(&self, code: ParamCode) -> Option<Vec<u8>> {
        self.params.get(&code).map(ParamSlot::current)
    }

    /// Overwrite `code`'s slot locally without transmitting anything.
    pub fn set_value(&mut self, code: ParamCode, bytes: &[u8]) -> Result<(), LinkError> {
        let slot = self
            .params
            .get_mut(&code)
            .ok_or(LinkError::UnknownParam(code))?;
        slot.store(bytes);
        Ok(())
    }

    pub fn counters(&self) -> ProtocolCounters {
        self.counters
    }

    /// Number of live schedules.
    pub fn schedule_count(&self) -> usize {
        self.schedules.len()
    }

    fn transmit(&mut self, message: &ProtocolMessage) -> Result<usize, LinkError> {
        let bytes = frame::encode(message);
        let written = (self.sink)(&bytes)?;
        self.counters.tx_frames = self.counters.tx_frames.wrapping_add(1);
        Ok(written)
    }

    fn dispatch(&mut self, message: ProtocolMessage) {
        let code = message.code;
        let Some(slot) = self.params.get_mut(&code) else {
            debug!(endpoint = %self.name, %code, "Ignoring message for unknown parameter");
            return;
        };

        let outcome = match slot.handler.take() {
            Some(mut handler) => {
                let event = ParamEvent {
                    code,
                    cmd: message.cmd,
                    message: message.clone(),
                };
                let outcome = handler(&event);
                if let Some(slot) = self.params.get_mut(&code) {
                    slot.handler = Some(handler);
                }
                outcome
            }
            None => Dispatch::Default,
        };

        if outcome == Dispatch::Default {
            self.process_default(message);
        }
    }

    fn process_default(&mut self, message: ProtocolMessage) {
        let Some(slot) = self.params.get_mut(&message.code) else {
            return;
        };
        match message.cmd {
            Command::Read | Command::SilentRead => {
                let mut reply =
                    ProtocolMessage::new(Command::ReadResponse, message.code, slot.current());
                reply.ci = message.ci;
                if let Err(e) = self.transmit(&reply) {
                    debug!(endpoint = %self.name, error = %e, "Read response not sent");
                }
            }
            Command::ReadResponse | Command::Write => {
                slot.store(&message.payload);
                if message.cmd == Command::Write && message.wants_ack() {
                    let mut reply =
                        ProtocolMessage::new(Command::WriteResponse, message.code, Vec::new());
                    reply.ci = message.ci;
                    if let Err(e) = self.transmit(&reply) {
                        debug!(endpoint = %self.name, error = %e, "Write response not sent");
                    }
                }
            }
            Command::WriteResponse => {
                trace!(endpoint = %self.name, code = %message.code, "Write acknowledged");
            }
            Command::Other(byte) => {
                trace!(endpoint = %self.name, cmd = byte, "Ignoring unknown command");
            }
        }
    }

    fn run_schedules(&mut self, now: Instant) {
        let mut due = Vec::new();
        for (index, schedule) in self.schedules.iter_mut().enumerate() {
            if schedule.next_due.is_some_and(|at| now < at) {
                continue;
            }
            if let SchedulePeriod::Every(period) = schedule.op.period {
                schedule.next_due = Some(now + period);
            }
            if let Some(remaining) = schedule.remaining.as_mut() {
                *remaining = remaining.saturating_sub(1);
            }
            due.push(index);
        }

        for index in &due {
            let op = self.schedules[*index].op;
            let message = match op.direction {
                ScheduleDirection::PeriodicRead | ScheduleDirection::OneShotRead => {
                    ProtocolMessage::read(op.code)
                }
                ScheduleDirection::PeriodicWrite => {
                    let value = self.value(op.code).unwrap_or_default();
                    ProtocolMessage::write(op.code, value)
                }
            };
            if let Err(e) = self.post(message) {
                trace!(endpoint = %self.name, code = %op.code, error = %e, "Scheduled frame not sent");
            }
        }

        self.schedules.retain(|s| {
            s.op.direction != ScheduleDirection::OneShotRead && s.remaining != Some(0)
        });
    }

    fn decode_slot<T>(&self, code: ParamCode, decode: impl Fn(&[u8]) -> Option<T>) -> Option<T> {
        self.value(code).and_then(|bytes| decode(&bytes))
    }
}

impl ProtocolEndpoint for SimEndpoint {
    fn name(&self) -> &str {
        &self.name
    }

    fn push_byte(&mut self, byte: u8) {
        match self.parser.push(byte) {
            Some(Ok(message)) => {
                self.counters.rx_frames = self.counters.rx_frames.wrapping_add(1);
                self.dispatch(message);
            }
            Some(Err(e)) => {
                self.counters.rx_errors = self.counters.rx_errors.wrapping_add(1);
                debug!(endpoint = %self.name, error = %e, "Dropping malformed frame");
            }
            None => {}
        }
    }

    fn post(&mut self, mut message: ProtocolMessage) -> Result<usize, LinkError> {
        message.ci = self.next_ci;
        self.next_ci = self.next_ci.wrapping_add(1);
        self.transmit(&message)
    }

    fn outbox(&self) -> Outbox {
        Outbox::new(self.outbox_tx.clone())
    }

    fn tick(&mut self, now: Instant) {
        while let Ok(message) = self.outbox_rx.try_recv() {
            if let Err(e) = self.post(message) {
                trace!(endpoint = %self.name, error = %e, "Queued frame not sent");
            }
        }
        self.run_schedules(now);
    }

    fn schedule(&mut self, op: ScheduledOperation) -> Result<(), LinkError> {
        if !self.params.contains_key(&op.code) {
            return Err(LinkError::UnknownParam(op.code));
        }
        self.schedules
            .retain(|s| !(s.op.code == op.code && s.op.direction == op.direction));
        if op.is_disabled() {
            return Ok(());
        }
        let remaining = match op.repeat {
            RepeatCount::Unlimited => None,
            RepeatCount::Times(0) => return Ok(()),
            RepeatCount::Times(n) => Some(n),
        };
        self.schedules.push(Schedule {
            op,
            next_due: None,
            remaining,
        });
        Ok(())
    }

    fn register_handler(&mut self, code: ParamCode, handler: ParamHandler) -> Result<(), LinkError> {
        let slot = self
            .params
            .get_mut(&code)
            .ok_or(LinkError::UnknownParam(code))?;
        slot.handler = Some(handler);
        Ok(())
    }

    fn bind_variable(&mut self, code: ParamCode, binding: ParamBinding) -> Result<(), LinkError> {
        let slot = self
            .params
            .get_mut(&code)
            .ok_or(LinkError::UnknownParam(code))?;
        slot.binding = Some(binding);
        Ok(())
    }

    fn param_codes(&self) -> Vec<ParamCode> {
        self.params.keys().copied().collect()
    }

    fn has_param(&self, code: ParamCode) -> bool {
        self.params.contains_key(&code)
    }

    fn speed_kmh(&self) -> f32 {
        self.decode_slot(ParamCode::SENS_HALL, HallSample::decode)
            .map(|h| h.speed_kmh())
            .unwrap_or_default()
    }

    fn steer_kmh(&self) -> f32 {
        self.decode_slot(ParamCode::SENS_HALL, HallSample::decode)
            .map(|h| h.steer_kmh())
            .unwrap_or_default()
    }

    fn battery_voltage(&self) -> f32 {
        self.decode_slot(ParamCode::SENS_ELECTRICAL, ElectricalSample::decode)
            .map(|e| e.battery_voltage)
            .unwrap_or_default()
    }

    fn motor_current(&self, channel: usize) -> f32 {
        self.decode_slot(ParamCode::SENS_ELECTRICAL, ElectricalSample::decode)
            .and_then(|e| e.motor_current.get(channel).copied())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hoverlink_types::{BuzzerCommand, SOM_ACK};
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;

    type Captured = Arc<Mutex<Vec<Vec<u8>>>>;

    fn capture_sink() -> (FrameSink, Captured) {
        let frames: Captured = Arc::new(Mutex::new(Vec::new()));
        let inner = frames.clone();
        let sink: FrameSink = Box::new(move |bytes: &[u8]| {
            inner.lock().push(bytes.to_vec());
            Ok(bytes.len())
        });
        (sink, frames)
    }

    fn decode_all(frames: &Captured) -> Vec<ProtocolMessage> {
        let mut parser = FrameParser::new();
        frames
            .lock()
            .iter()
            .flatten()
            .filter_map(|b| parser.push(*b))
            .filter_map(Result::ok)
            .collect()
    }

    fn wire(message: ProtocolMessage) -> Vec<u8> {
        frame::encode(&message)
    }

    #[test]
    fn chunking_does_not_change_dispatch() {
        let mut stream = Vec::new();
        stream.extend(wire(ProtocolMessage::write(ParamCode::ENABLE_MOTORS, vec![1])));
        stream.extend([0x00, 0x7F]);
        stream.extend(wire(ProtocolMessage::read(ParamCode::SENS_HALL)));
        stream.extend(wire(ProtocolMessage::write(
            ParamCode::SET_BUZZER,
            BuzzerCommand::new(440, 1, 100).encode(),
        )));

        let run = |chunk: usize| {
            let (sink, frames) = capture_sink();
            let mut endpoint = SimEndpoint::hoverboard("chunked", sink);
            let seen = Arc::new(Mutex::new(Vec::new()));
            for code in endpoint.param_codes() {
                let seen = seen.clone();
                endpoint
                    .register_handler(
                        code,
                        Box::new(move |ev: &ParamEvent| {
                            seen.lock().push((ev.code, ev.cmd, ev.message.payload.clone()));
                            Dispatch::Default
                        }),
                    )
                    .unwrap();
            }
            for piece in stream.chunks(chunk) {
                endpoint.push_bytes(piece);
            }
            let seen = seen.lock().clone();
            (
                seen,
                endpoint.value(ParamCode::SET_BUZZER),
                frames.lock().len(),
            )
        };

        let whole = run(stream.len());
        assert_eq!(whole.0.len(), 3);
        for chunk in [1, 2, 3, 7] {
            assert_eq!(run(chunk), whole, "chunk size {chunk}");
        }
    }

    #[test]
    fn read_is_answered_with_current_value() {
        let (sink, frames) = capture_sink();
        let mut endpoint = SimEndpoint::hoverboard("wired", sink);
        endpoint.set_value(ParamCode::ENABLE_MOTORS, &[1]).unwrap();

        let mut read = ProtocolMessage::read(ParamCode::ENABLE_MOTORS);
        read.ci = 9;
        endpoint.push_bytes(&wire(read));

        let replies = decode_all(&frames);
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].cmd, Command::ReadResponse);
        assert_eq!(replies[0].ci, 9);
        assert_eq!(replies[0].payload, vec![1]);
    }

    #[test]
    fn acknowledged_write_stores_and_replies() {
        let (sink, frames) = capture_sink();
        let mut endpoint = SimEndpoint::hoverboard("wired", sink);
        let binding = ParamBinding::new(1);
        endpoint
            .bind_variable(ParamCode::ENABLE_MOTORS, binding.clone())
            .unwrap();

        endpoint.push_bytes(&wire(
            ProtocolMessage::write(ParamCode::ENABLE_MOTORS, vec![1]).with_ack(),
        ));

        assert_eq!(binding.load(), vec![1]);
        let replies = decode_all(&frames);
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].cmd, Command::WriteResponse);
    }

    #[test]
    fn consuming_handler_replaces_default_processing() {
        let (sink, frames) = capture_sink();
        let mut endpoint = SimEndpoint::hoverboard("wired", sink);
        endpoint
            .register_handler(ParamCode::ENABLE_MOTORS, Box::new(|_: &ParamEvent| Dispatch::Consumed))
            .unwrap();

        endpoint.push_bytes(&wire(
            ProtocolMessage::write(ParamCode::ENABLE_MOTORS, vec![1]).with_ack(),
        ));

        assert_eq!(endpoint.value(ParamCode::ENABLE_MOTORS), Some(vec![0]));
        assert!(frames.lock().is_empty());
    }

    #[test]
    fn unknown_codes_are_ignored() {
        let (sink, frames) = capture_sink();
        let mut endpoint = SimEndpoint::with_params("tiny", &[(ParamCode::SENS_HALL, 8)], sink);
        endpoint.push_bytes(&wire(ProtocolMessage::read(ParamCode::TEXT)));
        assert!(frames.lock().is_empty());
        assert_eq!(endpoint.counters().rx_frames, 1);
        assert_eq!(
            endpoint.register_handler(ParamCode::TEXT, Box::new(|_: &ParamEvent| Dispatch::Consumed)),
            Err(LinkError::UnknownParam(ParamCode::TEXT))
        );
    }

    #[test]
    fn malformed_frames_count_as_errors() {
        let (sink, _frames) = capture_sink();
        let mut endpoint = SimEndpoint::hoverboard("wired", sink);
        let mut bad = wire(ProtocolMessage::read(ParamCode::SENS_HALL));
        let last = bad.len() - 1;
        bad[last] = bad[last].wrapping_add(1);
        endpoint.push_bytes(&bad);
        assert_eq!(endpoint.counters().rx_errors, 1);
        assert_eq!(endpoint.counters().rx_frames, 0);
    }

    #[test]
    fn post_assigns_increasing_ci_and_keeps_som() {
        let (sink, frames) = capture_sink();
        let mut endpoint = SimEndpoint::hoverboard("wired", sink);
        endpoint.send_enable(true, true).unwrap();
        endpoint.send_buzzer(BuzzerCommand::new(440, 1, 100)).unwrap();

        let sent = decode_all(&frames);
        assert_eq!(sent[0].ci, 0);
        assert_eq!(sent[0].som, SOM_ACK);
        assert_eq!(sent[1].ci, 1);
        assert_eq!(sent[1].code, ParamCode::SET_BUZZER);
        assert_eq!(endpoint.counters().tx_frames, 2);
    }

    #[test]
    fn tick_drains_outbox() {
        let (sink, frames) = capture_sink();
        let mut endpoint = SimEndpoint::hoverboard("wireless", sink);
        let outbox = endpoint.outbox();
        assert!(outbox.post(ProtocolMessage::read(ParamCode::SENS_HALL)));
        assert!(frames.lock().is_empty());

        endpoint.tick(Instant::now());
        assert_eq!(decode_all(&frames).len(), 1);
    }

    #[test]
    fn periodic_schedule_fires_on_period() {
        let (sink, frames) = capture_sink();
        let mut endpoint = SimEndpoint::hoverboard("wired", sink);
        endpoint
            .schedule_read(ParamCode::SENS_HALL, RepeatCount::Unlimited, Duration::from_millis(30))
            .unwrap();

        let t0 = Instant::now();
        endpoint.tick(t0);
        endpoint.tick(t0 + Duration::from_millis(10));
        endpoint.tick(t0 + Duration::from_millis(30));
        endpoint.tick(t0 + Duration::from_millis(45));
        endpoint.tick(t0 + Duration::from_millis(60));

        let sent = decode_all(&frames);
        assert_eq!(sent.len(), 3);
        assert!(sent.iter().all(|m| m.cmd == Command::Read));
    }

    #[test]
    fn bounded_and_one_shot_schedules_expire() {
        let (sink, frames) = capture_sink();
        let mut endpoint = SimEndpoint::hoverboard("wired", sink);
        endpoint
            .schedule_write(ParamCode::ENABLE_MOTORS, RepeatCount::Times(2), Duration::ZERO)
            .unwrap();
        endpoint
            .schedule(ScheduledOperation::one_shot_read(ParamCode::PROTOCOL_VERSION))
            .unwrap();
        assert_eq!(endpoint.schedule_count(), 2);

        let t0 = Instant::now();
        for i in 0..5 {
            endpoint.tick(t0 + Duration::from_millis(i));
        }
        assert_eq!(endpoint.schedule_count(), 0);
        assert_eq!(decode_all(&frames).len(), 3);
    }

    #[test]
    fn disabled_period_removes_schedule() {
        let (sink, _frames) = capture_sink();
        let mut endpoint = SimEndpoint::hoverboard("wired", sink);
        endpoint
            .schedule_read(ParamCode::SENS_HALL, RepeatCount::Unlimited, Duration::from_millis(30))
            .unwrap();
        endpoint
            .schedule(ScheduledOperation::disabled(
                ParamCode::SENS_HALL,
                ScheduleDirection::PeriodicRead,
            ))
            .unwrap();
        assert_eq!(endpoint.schedule_count(), 0);
    }

    #[test]
    fn scheduled_write_sends_bound_variable() {
        let (sink, frames) = capture_sink();
        let mut endpoint = SimEndpoint::hoverboard("wired", sink);
        let binding = ParamBinding::new(1);
        binding.store(&[1]);
        endpoint
            .bind_variable(ParamCode::ENABLE_MOTORS, binding)
            .unwrap();
        endpoint
            .schedule_write(ParamCode::ENABLE_MOTORS, RepeatCount::Times(1), Duration::ZERO)
            .unwrap();
        endpoint.tick(Instant::now());

        let sent = decode_all(&frames);
        assert_eq!(sent[0].cmd, Command::Write);
        assert_eq!(sent[0].payload, vec![1]);
    }

    #[test]
    fn telemetry_getters_decode_sensor_slots() {
        let (sink, _frames) = capture_sink();
        let mut endpoint = SimEndpoint::hoverboard("wired", sink);
        let hall = HallSample {
            wheel_speed_mm_s: [1000, 1000],
        };
        let electrical = ElectricalSample {
            battery_voltage: 36.5,
            motor_current: [1.5, 2.0],
        };
        endpoint.push_bytes(&wire(ProtocolMessage::new(
            Command::ReadResponse,
            ParamCode::SENS_HALL,
            hall.encode(),
        )));
        endpoint
            .set_value(ParamCode::SENS_ELECTRICAL, &electrical.encode())
            .unwrap();

        let telemetry = endpoint.telemetry();
        assert!((telemetry.speed_kmh - 3.6).abs() < 1e-4);
        assert!(telemetry.steer_kmh.abs() < 1e-6);
        assert_eq!(telemetry.battery_voltage, 36.5);
        assert_eq!(telemetry.motor_current, [1.5, 2.0]);
        assert_eq!(endpoint.motor_current(7), 0.0);
    }
}
