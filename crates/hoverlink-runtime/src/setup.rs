//! Startup: build endpoints for the chosen [`LinkPlan`], wire them, and
//! hand back a ready [`Scheduler`].
//!
//! * **Relay** – wired and wireless endpoints forward to each other; the
//!   node is a transparent bridge and registers no schedules of its own.
//! * **Wired-only / wireless-only** – the node drives the controller
//!   itself: PWM limits and motor enable are sent once, then statistics,
//!   hall and electrical reads and PWM writes are scheduled.
//! * **Passthrough** – raw bytes are mirrored between a console link and
//!   the controller's serial link. Inbound frames are still parsed, but the
//!   node schedules and sends nothing of its own.

use std::sync::Arc;
use std::time::Duration;

use hoverlink_hal::{SharedWiredLink, WiredLink, WirelessLink};
use hoverlink_middleware::discovery::{DEFAULT_SCAN_WINDOW, shared_registry};
use hoverlink_middleware::endpoint::shared;
use hoverlink_middleware::sim_endpoint::TEXT_LEN;
use hoverlink_middleware::{
    Diagnostics, Discovery, Dispatch, EndpointHandle, FrameSink, MarkupSource, ParamBinding,
    ParamEvent, ProtocolEndpoint, RelayDirections, RelayReport, SharedRegistry, SimEndpoint,
    WirelessReceiver, wire_relay,
};
use hoverlink_types::{
    Command, HallSample, LinkDirection, LinkError, LinkState, ParamCode, PwmSetpoint,
    RepeatCount, TransportKind, TransportLink,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::clock::{Clock, SystemClock};
use crate::motor::{MotorFeedback, MotorState};
use crate::scheduler::{PwmFeed, Scheduler, SchedulerConfig, SchedulerHandle, WiredPoll};

/// Statistics read interval.
const COUNT_SUM_PERIOD: Duration = Duration::from_millis(100);
/// Hall read, PWM write and test-run enable write interval.
const FAST_PERIOD: Duration = Duration::from_millis(30);
/// Electrical measurement read interval.
const ELECTRICAL_PERIOD: Duration = Duration::from_millis(100);

/// Which transports are active and how they are joined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkPlan {
    /// Serial link to the controller only.
    #[default]
    #[serde(rename = "wired")]
    WiredOnly,
    /// The controller is reached over the radio.
    #[serde(rename = "wireless")]
    WirelessOnly,
    /// Bridge between the serial link and the radio.
    Relay,
    /// Byte mirror between a console link and the serial link.
    Passthrough,
}

impl LinkPlan {
    pub fn uses_wired(self) -> bool {
        self != LinkPlan::WirelessOnly
    }

    pub fn uses_wireless(self) -> bool {
        matches!(self, LinkPlan::WirelessOnly | LinkPlan::Relay)
    }
}

/// PWM limit set sent to the controller at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PwmProfile {
    #[default]
    Standard,
    /// Wide limits plus a periodically re-sent enable flag, for bench runs.
    TestRun,
}

impl PwmProfile {
    pub fn limits(self) -> PwmSetpoint {
        match self {
            PwmProfile::Standard => PwmSetpoint::default(),
            PwmProfile::TestRun => PwmSetpoint::test_run(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommunicationConfig {
    pub plan: LinkPlan,
    pub relay_directions: RelayDirections,
    pub scheduler: SchedulerConfig,
    pub scan_window: Duration,
    pub profile: PwmProfile,
    pub registry_capacity: usize,
}

impl Default for CommunicationConfig {
    fn default() -> Self {
        Self {
            plan: LinkPlan::default(),
            relay_directions: RelayDirections::BOTH,
            scheduler: SchedulerConfig::default(),
            scan_window: DEFAULT_SCAN_WINDOW,
            profile: PwmProfile::default(),
            registry_capacity: 1,
        }
    }
}

/// Drivers handed to [`setup_communication`].
#[derive(Default)]
pub struct Transports {
    pub wired: Option<SharedWiredLink>,
    pub wireless: Option<Arc<dyn WirelessLink>>,
    /// Only used by [`LinkPlan::Passthrough`].
    pub console: Option<SharedWiredLink>,
}

/// Live view of both transport links.
///
/// The wired link is fixed at setup: paired when the plan uses it, idle
/// otherwise. The wireless link's state lives in the peer registry and
/// turns paired when discovery registers the first peer.
#[derive(Debug, Clone)]
pub struct TransportStatus {
    wired: TransportLink,
    wireless: Option<SharedRegistry>,
}

impl TransportStatus {
    pub fn wired(&self) -> TransportLink {
        self.wired
    }

    pub fn wireless(&self) -> TransportLink {
        match &self.wireless {
            Some(registry) => registry.lock().transport(),
            None => TransportLink::idle(TransportKind::Wireless),
        }
    }

    pub fn links(&self) -> [TransportLink; 2] {
        [self.wired(), self.wireless()]
    }
}

/// Everything setup produced.
pub struct Communication {
    pub scheduler: Scheduler,
    pub handle: SchedulerHandle,
    pub motor: MotorState,
    pub wired_endpoint: Option<EndpointHandle>,
    pub wireless_endpoint: Option<EndpointHandle>,
    pub registry: Option<SharedRegistry>,
    pub relay: Option<RelayReport>,
    pub links: TransportStatus,
    /// Owner of the wireless driver; dropping it stops the driver.
    pub wireless_link: Option<Arc<dyn WirelessLink>>,
}

/// Build and wire everything `config.plan` asks for.
///
/// # Errors
///
/// [`LinkError::Config`] when a transport the plan needs is missing.
pub fn setup_communication(
    config: &CommunicationConfig,
    transports: Transports,
    diagnostics: Diagnostics,
) -> Result<Communication, LinkError> {
    setup_with_clock(config, transports, diagnostics, Arc::new(SystemClock))
}

/// [`setup_communication`] with an explicit time source.
pub fn setup_with_clock(
    config: &CommunicationConfig,
    transports: Transports,
    diagnostics: Diagnostics,
    clock: Arc<dyn Clock>,
) -> Result<Communication, LinkError> {
    let needs_wired = config.plan.uses_wired();
    let needs_wireless = config.plan.uses_wireless();
    let console = match (config.plan, transports.console) {
        (LinkPlan::Passthrough, Some(link)) => Some(link),
        (LinkPlan::Passthrough, None) => {
            return Err(LinkError::Config("Passthrough needs a console link".into()));
        }
        _ => None,
    };

    let wired = match (needs_wired, transports.wired) {
        (true, Some(link)) => Some(link),
        (true, None) => return Err(missing(TransportKind::Wired, config.plan)),
        (false, _) => None,
    };
    let wireless = match (needs_wireless, transports.wireless) {
        (true, Some(link)) => Some(link),
        (true, None) => return Err(missing(TransportKind::Wireless, config.plan)),
        (false, _) => None,
    };

    let wired_endpoint = wired
        .as_ref()
        .map(|link| shared(SimEndpoint::hoverboard("wired", wired_sink(link.clone(), diagnostics.clone()))));

    let mut registry = None;
    let wireless_endpoint = match &wireless {
        Some(link) => {
            let reg = shared_registry(config.registry_capacity);
            let discovery = Discovery::new(
                link,
                reg.clone(),
                config.scheduler.control_period,
                config.scan_window,
                diagnostics.clone(),
            );
            let endpoint = shared(SimEndpoint::hoverboard("wireless", discovery.into_sink()));
            WirelessReceiver::new(link, reg.clone(), endpoint.clone(), diagnostics.clone()).install();
            link.set_discoverable(true)?;
            registry = Some(reg);
            Some(endpoint)
        }
        None => None,
    };

    let motor = MotorState::new();
    let mut relay = None;

    let mut scheduler = match (&wired_endpoint, &wireless_endpoint) {
        (Some(wired_ep), None) if config.plan == LinkPlan::Passthrough => {
            Scheduler::new(config.scheduler, wired_ep.clone())
        }
        (Some(wired_ep), Some(wireless_ep)) => {
            relay = Some(wire_relay(wired_ep, wireless_ep, config.relay_directions));
            Scheduler::new(config.scheduler, wired_ep.clone()).with_endpoint(wireless_ep.clone())
        }
        (Some(primary), None) | (None, Some(primary)) => {
            let feed = start_local_control(primary, config.profile, &motor)?;
            Scheduler::new(config.scheduler, primary.clone()).with_pwm_feed(feed)
        }
        (None, None) => return Err(LinkError::Config("no transport configured".into())),
    };

    if let (Some(link), Some(endpoint)) = (&wired, &wired_endpoint) {
        scheduler = scheduler.with_wired(WiredPoll {
            link: link.clone(),
            endpoint: endpoint.clone(),
        });
    }
    if let Some(console) = console {
        scheduler = scheduler.with_console(console);
    }
    scheduler = scheduler.with_clock(clock).with_diagnostics(diagnostics);

    let links = TransportStatus {
        wired: if needs_wired {
            TransportLink::new(TransportKind::Wired, LinkDirection::Both, LinkState::Paired)
        } else {
            TransportLink::idle(TransportKind::Wired)
        },
        wireless: registry.clone(),
    };

    info!(plan = ?config.plan, profile = ?config.profile, "Communication set up");
    Ok(Communication {
        handle: scheduler.handle(),
        scheduler,
        motor,
        wired_endpoint,
        wireless_endpoint,
        registry,
        relay,
        links,
        wireless_link: wireless,
    })
}

fn missing(kind: TransportKind, plan: LinkPlan) -> LinkError {
    LinkError::Config(format!("{plan:?} needs a {kind} link"))
}

fn wired_sink(link: SharedWiredLink, diagnostics: Diagnostics) -> FrameSink {
    Box::new(move |frame: &[u8]| {
        diagnostics.markup(MarkupSource::WiredOut, frame);
        link.lock().write(frame)
    })
}

/// Startup sequence for a node that drives the controller itself.
fn start_local_control(
    endpoint: &EndpointHandle,
    profile: PwmProfile,
    motor: &MotorState,
) -> Result<PwmFeed, LinkError> {
    let limits = profile.limits();
    let mut ep = endpoint.lock();

    ep.register_handler(ParamCode::TEXT, Box::new(console_log))?;

    if let Err(e) = ep.send_pwm_data(&limits, true) {
        debug!(error = %e, "PWM limits not sent at startup");
    }
    if let Err(e) = ep.send_enable(true, true) {
        debug!(error = %e, "Motor enable not sent at startup");
    }

    if profile == PwmProfile::TestRun {
        let enable = ParamBinding::new(1);
        enable.store(&[1]);
        ep.bind_variable(ParamCode::ENABLE_MOTORS, enable)?;
        ep.schedule_write(ParamCode::ENABLE_MOTORS, RepeatCount::Unlimited, FAST_PERIOD)?;
    }

    ep.schedule_read(ParamCode::PROTOCOL_COUNT_SUM, RepeatCount::Unlimited, COUNT_SUM_PERIOD)?;

    let measured = motor.clone();
    ep.register_handler(
        ParamCode::SENS_HALL,
        Box::new(move |event: &ParamEvent| {
            if matches!(event.cmd, Command::ReadResponse | Command::Write)
                && let Some(hall) = HallSample::decode(&event.message.payload)
            {
                measured.set_measured(MotorFeedback {
                    speed_kmh: hall.speed_kmh(),
                    steer_kmh: hall.steer_kmh(),
                });
            }
            Dispatch::Default
        }),
    )?;
    ep.schedule_read(ParamCode::SENS_HALL, RepeatCount::Unlimited, FAST_PERIOD)?;

    ep.schedule_read(ParamCode::SENS_ELECTRICAL, RepeatCount::Unlimited, ELECTRICAL_PERIOD)?;

    let binding = ParamBinding::new(PwmSetpoint::ENCODED_LEN);
    binding.store(&limits.encode());
    ep.bind_variable(ParamCode::SET_POINT_PWM, binding.clone())?;
    ep.schedule_write(ParamCode::SET_POINT_PWM, RepeatCount::Unlimited, FAST_PERIOD)?;

    Ok(PwmFeed {
        binding,
        limits,
        source: Arc::new(motor.clone()),
    })
}

/// Log controller text messages that fit the `text` slot.
fn console_log(event: &ParamEvent) -> Dispatch {
    if matches!(event.cmd, Command::Write | Command::ReadResponse) {
        let payload = &event.message.payload;
        let len = payload.iter().position(|b| *b == 0).unwrap_or(payload.len());
        if len <= TEXT_LEN {
            info!(target: "hoverlink::console", "{}", String::from_utf8_lossy(&payload[..len]));
        }
    }
    Dispatch::Consumed
}
