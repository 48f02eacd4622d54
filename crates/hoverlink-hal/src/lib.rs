//! `hoverlink-hal` – transport drivers.
//!
//! The rest of the workspace only ever talks to the [`WiredLink`] and
//! [`WirelessLink`] traits, so the serial port and radio drivers can be
//! swapped for the in-process [`sim`] doubles without touching relay or
//! scheduling logic.
//!
//! # Modules
//!
//! - [`wired`] – [`WiredLink`]: non-blocking byte stream to the motor
//!   controller.
//! - [`wireless`] – [`WirelessLink`]: packet link with scan, peer
//!   registration and an asynchronous receive callback.
//! - [`serial`] – [`SerialWiredLink`][serial::SerialWiredLink] backed by the
//!   `serialport` crate.
//! - [`udp`] – [`UdpWirelessLink`][udp::UdpWirelessLink]: a datagram radio
//!   stand-in for hosts without a peer-to-peer radio.
//! - [`sim`] – recording doubles for tests and headless runs.

pub mod serial;
pub mod sim;
pub mod udp;
pub mod wired;
pub mod wireless;

pub use wired::{SharedWiredLink, WiredLink};
pub use wireless::{ReceiveCallback, WirelessLink};
