//! Motor-controller double sitting on the far end of a
//! [`SimWiredLink`].
//!
//! Each [`SimHoverboard::step`] consumes what the near side wrote, applies
//! writes (PWM with the controller's limits and guard, enable, buzzer),
//! answers reads, and feeds the replies back into the link.

use hoverlink_hal::sim::SimWiredLink;
use hoverlink_types::{
    BuzzerCommand, Command, ElectricalSample, HallSample, ParamCode, ProtocolCounters,
    ProtocolMessage, PwmSetpoint,
};
use tracing::{debug, trace};

use crate::frame::{self, FrameParser};

/// Wheel speed per unit of effective PWM.
const MM_S_PER_PWM: i32 = 2;

/// Pack voltage reported by the double.
const BATTERY_VOLTAGE: f32 = 36.0;

pub struct SimHoverboard {
    link: SimWiredLink,
    parser: FrameParser,
    enabled: bool,
    setpoint: PwmSetpoint,
    last_buzzer: Option<BuzzerCommand>,
    counters: ProtocolCounters,
    text: String,
}

impl SimHoverboard {
    /// `link` must share state with the link the near-side endpoint uses.
    pub fn new(link: SimWiredLink) -> Self {
        Self {
            link,
            parser: FrameParser::new(),
            enabled: false,
            setpoint: PwmSetpoint::default(),
            last_buzzer: None,
            counters: ProtocolCounters::default(),
            text: String::from("hoverboard sim"),
        }
    }

    /// Process everything written since the last step.
    pub fn step(&mut self) {
        let written: Vec<u8> = self.link.take_written().into_iter().flatten().collect();
        for byte in written {
            match self.parser.push(byte) {
                Some(Ok(message)) => {
                    self.counters.rx_frames = self.counters.rx_frames.wrapping_add(1);
                    self.handle(message);
                }
                Some(Err(e)) => {
                    self.counters.rx_errors = self.counters.rx_errors.wrapping_add(1);
                    debug!(error = %e, "Hoverboard double dropped a frame");
                }
                None => {}
            }
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn setpoint(&self) -> PwmSetpoint {
        self.setpoint
    }

    pub fn last_buzzer(&self) -> Option<BuzzerCommand> {
        self.last_buzzer
    }

    /// Wheel speeds implied by the applied setpoint.
    pub fn hall(&self) -> HallSample {
        let effective = if self.enabled {
            self.setpoint.effective()
        } else {
            [0, 0]
        };
        HallSample {
            wheel_speed_mm_s: effective.map(|pwm| pwm.saturating_mul(MM_S_PER_PWM)),
        }
    }

    pub fn electrical(&self) -> ElectricalSample {
        let hall = self.hall();
        ElectricalSample {
            battery_voltage: BATTERY_VOLTAGE,
            motor_current: hall.wheel_speed_mm_s.map(|v| v.unsigned_abs() as f32 * 0.005),
        }
    }

    fn handle(&mut self, message: ProtocolMessage) {
        trace!(cmd = ?message.cmd, code = %message.code, "Hoverboard double received");
        match message.cmd {
            Command::Read | Command::SilentRead => {
                if let Some(value) = self.read_value(message.code) {
                    self.reply(&message, Command::ReadResponse, value);
                }
            }
            Command::Write => {
                self.apply_write(&message);
                if message.wants_ack() {
                    self.reply(&message, Command::WriteResponse, Vec::new());
                }
            }
            _ => {}
        }
    }

    fn read_value(&self, code: ParamCode) -> Option<Vec<u8>> {
        let value = match code {
            ParamCode::SENS_HALL => self.hall().encode(),
            ParamCode::SENS_ELECTRICAL => self.electrical().encode(),
            ParamCode::PROTOCOL_COUNT_SUM => self.counters.encode(),
            ParamCode::ENABLE_MOTORS => vec![u8::from(self.enabled)],
            ParamCode::SET_POINT_PWM | ParamCode::SET_POINT_PWM_DATA => self.setpoint.encode(),
            ParamCode::TEXT => {
                let mut bytes = self.text.clone().into_bytes();
                bytes.push(0);
                bytes
            }
            _ => return None,
        };
        Some(value)
    }

    fn apply_write(&mut self, message: &ProtocolMessage) {
        match message.code {
            ParamCode::SET_POINT_PWM | ParamCode::SET_POINT_PWM_DATA => {
                if let Some(setpoint) = PwmSetpoint::decode(&message.payload) {
                    self.setpoint = setpoint;
                }
            }
            ParamCode::ENABLE_MOTORS => {
                self.enabled = message.payload.first().is_some_and(|b| *b != 0);
            }
            ParamCode::SET_BUZZER => {
                self.last_buzzer = BuzzerCommand::decode(&message.payload);
            }
            _ => {}
        }
    }

    fn reply(&mut self, request: &ProtocolMessage, cmd: Command, payload: Vec<u8>) {
        let mut reply = ProtocolMessage::new(cmd, request.code, payload);
        reply.ci = request.ci;
        self.link.feed(&frame::encode(&reply));
        self.counters.tx_frames = self.counters.tx_frames.wrapping_add(1);
    }
}
