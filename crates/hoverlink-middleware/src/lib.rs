//! `hoverlink-middleware` – endpoints, relay, discovery and diagnostics.
//!
//! # Modules
//!
//! - [`endpoint`] – the [`ProtocolEndpoint`] capability trait, outboxes and
//!   bound variables.
//! - [`sim_endpoint`] – [`SimEndpoint`], a table-driven endpoint used on
//!   hosts and in tests.
//! - [`frame`] – frame layout and byte-at-a-time parser shared by the
//!   in-process endpoint and controller doubles.
//! - [`relay`] – [`wire_relay`]: one-hop forwarding between two endpoints.
//! - [`discovery`] – peer registry, scan cooldown, and the wireless send and
//!   receive paths.
//! - [`markup`] – pure frame-to-line rendering and markup sinks.
//! - [`bus`] – topic-based [`DiagnosticBus`] over tokio broadcast channels.
//! - [`diagnostics`] – [`Diagnostics`], the fan-out handle components log
//!   through.
//! - [`sim_hoverboard`] – motor-controller double for the simulated wired
//!   link.

pub mod bus;
pub mod diagnostics;
pub mod discovery;
pub mod endpoint;
pub mod frame;
pub mod markup;
pub mod relay;
pub mod sim_endpoint;
pub mod sim_hoverboard;

pub use bus::{DiagnosticBus, DiagnosticEvent, DiagnosticPayload, LinkEvent, Topic};
pub use diagnostics::Diagnostics;
pub use discovery::{Discovery, PeerRegistry, SharedRegistry, WirelessReceiver};
pub use endpoint::{
    Dispatch, EndpointHandle, FrameSink, Outbox, ParamBinding, ParamEvent, ParamHandler,
    ProtocolEndpoint,
};
pub use markup::{MarkupSink, MarkupSource, TracingSink, protocol_markup};
pub use relay::{RelayDirections, RelayReport, wire_relay};
pub use sim_endpoint::SimEndpoint;
pub use sim_hoverboard::SimHoverboard;
