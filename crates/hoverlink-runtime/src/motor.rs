//! Drive command in, measured motion out.
//!
//! [`MotorState`] is the shared record between whoever steers the board
//! (console, remote input) and the control loop: the loop reads the command
//! every cycle to refresh the PWM setpoint, and the hall handler writes the
//! measured speed back.

use std::sync::Arc;

use hoverlink_types::PwmSetpoint;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Requested drive: common-mode `pwm` and differential `steer`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotorCommand {
    pub pwm: i32,
    pub steer: i32,
}

/// Speed and steer measured by the controller, in km/h.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MotorFeedback {
    pub speed_kmh: f32,
    pub steer_kmh: f32,
}

/// Anything the control loop can poll for the current drive command.
pub trait MotorCommandSource: Send + Sync {
    fn command(&self) -> MotorCommand;
}

#[derive(Debug, Default)]
struct MotorInner {
    setpoint: MotorCommand,
    measured: MotorFeedback,
}

#[derive(Debug, Clone, Default)]
pub struct MotorState {
    inner: Arc<Mutex<MotorInner>>,
}

impl MotorState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_command(&self, command: MotorCommand) {
        self.inner.lock().setpoint = command;
    }

    pub fn set_measured(&self, feedback: MotorFeedback) {
        self.inner.lock().measured = feedback;
    }

    pub fn measured(&self) -> MotorFeedback {
        self.inner.lock().measured
    }
}

impl MotorCommandSource for MotorState {
    fn command(&self) -> MotorCommand {
        self.inner.lock().setpoint
    }
}

/// Per-wheel setpoint for `command` under `limits`: left is `pwm + steer`,
/// right is `pwm - steer`.
pub fn derive_setpoint(command: MotorCommand, limits: &PwmSetpoint) -> PwmSetpoint {
    limits.with_pwm(
        command.pwm.saturating_add(command.steer),
        command.pwm.saturating_sub(command.steer),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steer_splits_across_wheels() {
        let setpoint = derive_setpoint(MotorCommand { pwm: 100, steer: 20 }, &PwmSetpoint::default());
        assert_eq!(setpoint.pwm, [120, 80]);
        assert_eq!(setpoint.max_power, 400);
    }

    #[test]
    fn derivation_keeps_limits_and_saturates() {
        let limits = PwmSetpoint::test_run();
        let setpoint = derive_setpoint(
            MotorCommand {
                pwm: i32::MAX,
                steer: 1,
            },
            &limits,
        );
        assert_eq!(setpoint.pwm, [i32::MAX, i32::MAX - 1]);
        assert_eq!(setpoint.minimum_pwm, 1);
    }

    #[test]
    fn state_is_shared_between_clones() {
        let console = MotorState::new();
        let control = console.clone();
        console.set_command(MotorCommand { pwm: 50, steer: 0 });
        assert_eq!(control.command().pwm, 50);

        control.set_measured(MotorFeedback {
            speed_kmh: 1.5,
            steer_kmh: 0.0,
        });
        assert_eq!(console.measured().speed_kmh, 1.5);
    }

    #[test]
    fn command_serializes_as_plain_fields() {
        let json = serde_json::to_string(&MotorCommand { pwm: 10, steer: -5 }).unwrap();
        assert_eq!(json, r#"{"pwm":10,"steer":-5}"#);
    }
}
