//! The cooperative control loop.
//!
//! One cycle:
//!
//! 1. flush a pending buzzer command to the primary endpoint;
//! 2. refresh the bound PWM variable from the motor command source;
//! 3. until one control period has passed since the cycle started: drain up
//!    to [`POLL_CHUNK`] bytes from the wired link into its endpoint, tick
//!    every endpoint, yield for [`POLL_YIELD`].
//!
//! With a console attached ([`Scheduler::with_console`]) every byte read from
//! the wired link is echoed to the console and console input is written to
//! the wired link, sharing the same per-poll byte budget.
//!
//! The period is a floor. A cycle that overruns is followed immediately by
//! the next one; nothing sleeps to catch up.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use hoverlink_hal::{SharedWiredLink, WiredLink};
use hoverlink_middleware::{Diagnostics, EndpointHandle, ParamBinding, ProtocolEndpoint};
use hoverlink_types::{BuzzerCommand, PwmSetpoint};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::clock::{Clock, SystemClock};
use crate::command_slot::CommandSlot;
use crate::motor::{MotorCommandSource, derive_setpoint};

/// Most bytes moved from the wired link per poll.
pub const POLL_CHUNK: usize = 1024;

/// Pause between polls inside a cycle.
pub const POLL_YIELD: Duration = Duration::from_micros(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub control_period: Duration,
    /// Publish a telemetry snapshot on the diagnostic bus every cycle.
    pub publish_telemetry: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            control_period: Duration::from_millis(30),
            publish_telemetry: false,
        }
    }
}

/// Producer side of the scheduler's command slots. Cheap to clone and safe
/// to use from any thread.
#[derive(Debug, Clone, Default)]
pub struct SchedulerHandle {
    buzzer: CommandSlot<BuzzerCommand>,
}

impl SchedulerHandle {
    /// Queue a buzzer command for the next cycle, replacing any unsent one.
    ///
    /// The all-zero command means "silence" on the controller and is never
    /// transmitted; it is rejected here and `false` is returned.
    pub fn set_buzzer(&self, command: BuzzerCommand) -> bool {
        if !command.is_pending() {
            return false;
        }
        self.buzzer.set(command);
        true
    }

    pub fn buzzer_pending(&self) -> bool {
        self.buzzer.is_pending()
    }
}

/// Keeps a bound PWM variable in step with a motor command source.
pub struct PwmFeed {
    pub binding: ParamBinding,
    pub limits: PwmSetpoint,
    pub source: Arc<dyn MotorCommandSource>,
}

/// Wired link drained into `endpoint` each poll.
pub struct WiredPoll {
    pub link: SharedWiredLink,
    pub endpoint: EndpointHandle,
}

/// What one cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub started: Instant,
    pub finished: Instant,
    pub polls: u32,
    pub bytes_in: usize,
    pub buzzer_sent: bool,
}

pub struct Scheduler {
    config: SchedulerConfig,
    clock: Arc<dyn Clock>,
    /// First entry is the primary endpoint.
    endpoints: Vec<EndpointHandle>,
    wired: Option<WiredPoll>,
    console: Option<SharedWiredLink>,
    pwm: Option<PwmFeed>,
    handle: SchedulerHandle,
    diagnostics: Diagnostics,
    cycles: u64,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, primary: EndpointHandle) -> Self {
        Self {
            config,
            clock: Arc::new(SystemClock),
            endpoints: vec![primary],
            wired: None,
            console: None,
            pwm: None,
            handle: SchedulerHandle::default(),
            diagnostics: Diagnostics::disabled(),
            cycles: 0,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Tick `endpoint` alongside the primary.
    pub fn with_endpoint(mut self, endpoint: EndpointHandle) -> Self {
        self.endpoints.push(endpoint);
        self
    }

    pub fn with_wired(mut self, poll: WiredPoll) -> Self {
        self.wired = Some(poll);
        self
    }

    /// Mirror raw wired traffic to and from `console`.
    pub fn with_console(mut self, console: SharedWiredLink) -> Self {
        self.console = Some(console);
        self
    }

    pub fn with_pwm_feed(mut self, feed: PwmFeed) -> Self {
        self.pwm = Some(feed);
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: Diagnostics) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn handle(&self) -> SchedulerHandle {
        self.handle.clone()
    }

    pub fn config(&self) -> SchedulerConfig {
        self.config
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Run cycles until `shutdown` is set.
    pub fn run(&mut self, shutdown: &AtomicBool) {
        info!(period_ms = self.config.control_period.as_millis() as u64, "Control loop started");
        while !shutdown.load(Ordering::Relaxed) {
            self.run_cycle();
        }
        info!(cycles = self.cycles, "Control loop stopped");
    }

    /// Run exactly one cycle.
    pub fn run_cycle(&mut self) -> CycleReport {
        let buzzer_sent = self.flush_buzzer();
        self.refresh_setpoint();

        let started = self.clock.now();
        let deadline = started + self.config.control_period;
        let mut polls = 0u32;
        let mut bytes_in = 0usize;
        loop {
            bytes_in += self.poll_wired();
            let now = self.clock.now();
            for endpoint in &self.endpoints {
                endpoint.lock().tick(now);
            }
            self.clock.sleep(POLL_YIELD);
            polls += 1;
            if self.clock.now() >= deadline {
                break;
            }
        }

        if self.config.publish_telemetry {
            let snapshot = self.endpoints[0].lock().telemetry();
            self.diagnostics.telemetry("scheduler", snapshot);
        }

        self.cycles += 1;
        CycleReport {
            started,
            finished: self.clock.now(),
            polls,
            bytes_in,
            buzzer_sent,
        }
    }

    fn flush_buzzer(&mut self) -> bool {
        let Some(command) = self.handle.buzzer.take() else {
            return false;
        };
        match self.endpoints[0].lock().send_buzzer(command) {
            Ok(_) => true,
            Err(e) => {
                debug!(error = %e, "Buzzer command not sent");
                false
            }
        }
    }

    fn refresh_setpoint(&mut self) {
        if let Some(feed) = &self.pwm {
            let setpoint = derive_setpoint(feed.source.command(), &feed.limits);
            feed.binding.store(&setpoint.encode());
        }
    }

    /// Move what the wired link has buffered into its endpoint. The link
    /// lock is released before pushing, since the endpoint may answer
    /// through the same link.
    fn poll_wired(&mut self) -> usize {
        let Some(poll) = &self.wired else {
            return 0;
        };
        let mut buf = [0u8; POLL_CHUNK];
        let mut n = 0;
        {
            let mut link = poll.link.lock();
            while n < POLL_CHUNK && link.available() > 0 {
                match link.read() {
                    Some(byte) => {
                        buf[n] = byte;
                        n += 1;
                    }
                    None => break,
                }
            }
        }
        if n > 0 {
            poll.endpoint.lock().push_bytes(&buf[..n]);
        }

        let Some(console) = &self.console else {
            return n;
        };
        if n > 0
            && let Err(e) = console.lock().write(&buf[..n])
        {
            debug!(error = %e, "Console mirror write failed");
        }
        let mut m = 0;
        {
            let mut console = console.lock();
            while n + m < POLL_CHUNK && console.available() > 0 {
                match console.read() {
                    Some(byte) => {
                        buf[m] = byte;
                        m += 1;
                    }
                    None => break,
                }
            }
        }
        if m > 0
            && let Err(e) = poll.link.lock().write(&buf[..m])
        {
            debug!(error = %e, "Console bytes not forwarded to the wired link");
        }
        n
    }
}
