//! `hoverlink-runtime` – the control loop and everything it needs to start.
//!
//! # Modules
//!
//! - [`setup`] – [`setup_communication`][setup::setup_communication]: builds
//!   endpoints for a [`LinkPlan`][setup::LinkPlan], wires the relay or the
//!   local startup sequence, and returns a ready scheduler.
//! - [`scheduler`] – [`Scheduler`][scheduler::Scheduler]: the fixed-period
//!   cooperative loop (buzzer flush, wired poll, endpoint ticks).
//! - [`motor`] – shared drive command and measured motion, and setpoint
//!   derivation.
//! - [`command_slot`] – capacity-one overwrite queue between producers and
//!   the loop.
//! - [`clock`] – real and manual time sources.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: log
//!   subscriber with optional OTLP span export.

pub mod clock;
pub mod command_slot;
pub mod motor;
pub mod scheduler;
pub mod setup;
pub mod telemetry;

pub use clock::{Clock, ManualClock, SystemClock};
pub use command_slot::CommandSlot;
pub use motor::{MotorCommand, MotorCommandSource, MotorFeedback, MotorState, derive_setpoint};
pub use scheduler::{CycleReport, Scheduler, SchedulerConfig, SchedulerHandle};
pub use setup::{
    Communication, CommunicationConfig, LinkPlan, PwmProfile, TransportStatus, Transports,
    setup_communication, setup_with_clock,
};
pub use telemetry::{TracerProviderGuard, init_tracing};
