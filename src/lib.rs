//! # libuplink - Resilient telemetry uplink for IoT devices
//!
//! A Rust library that keeps an always-on device continuously publishing
//! sensor data to a message broker over a lossy network. Two layered
//! connectivity state machines do the heavy lifting: a link supervisor that
//! brings the network link up with an infinite-retry policy, and a session
//! manager whose dedicated background loop owns the broker session, answers
//! quality-of-service acknowledgment handshakes and sends keepalive pings.
//! A top-level orchestrator composes them, ticking on a fixed period.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                     Orchestrator                     │
//! │    LinkDown → LinkConnecting → LinkUp → SessionUp    │
//! └──────────┬──────────────────────────┬────────────────┘
//!            │ polls                    │ connect/publish
//!            ▼                          ▼
//! ┌────────────────────┐   ┌─────────────────────────────┐
//! │   LinkSupervisor   │   │  SessionHandle (facade)     │
//! │  connect + retry   │   │  connected flag + data cb   │
//! └──────────┬─────────┘   └──────────────┬──────────────┘
//!            │ LinkDriver                 ▼
//!            ▼              ┌─────────────────────────────┐
//! ┌────────────────────┐   │   SessionManager background  │
//! │  platform network  │   │   loop: resolve → connect →  │
//! │       stack        │   │   poll → teardown → re-arm   │
//! └────────────────────┘   └──────────────┬──────────────┘
//!                                         │ Connect/Connection
//!                                         ▼
//!                          ┌─────────────────────────────┐
//!                          │  network::mqtt::Client over  │
//!                          │  a platform transport        │
//!                          └─────────────────────────────┘
//! ```
//!
//! The crate is transport-agnostic: platforms implement the
//! [`network`](crate::network) traits over their socket and TLS stacks, a
//! [`LinkDriver`](crate::link::LinkDriver) over their wireless management
//! API, and the collaborator seams
//! ([`DeviceIdentity`](crate::identity::DeviceIdentity),
//! [`TelemetrySource`](crate::telemetry::TelemetrySource)) over their
//! hardware.
//!
//! ## Example
//!
//! ```rust,no_run
//! use libuplink::link::{LinkConfig, LinkSupervisor};
//! use libuplink::network::DnsResolver;
//! use libuplink::orchestrator::{Orchestrator, UplinkConfig};
//! use libuplink::session::{SessionConfig, SessionHandle};
//! # struct MockConnection;
//! # impl libuplink::network::Connection for MockConnection {}
//! # impl libuplink::network::Read for MockConnection {
//! #     type Error = ();
//! #     fn read(&mut self, _buf: &mut [u8]) -> Result<usize, Self::Error> { Ok(0) }
//! # }
//! # impl libuplink::network::Write for MockConnection {
//! #     type Error = ();
//! #     fn write(&mut self, _buf: &[u8]) -> Result<usize, Self::Error> { Ok(0) }
//! #     fn flush(&mut self) -> Result<(), Self::Error> { Ok(()) }
//! # }
//! # impl libuplink::network::Close for MockConnection {
//! #     type Error = ();
//! #     fn close(self) -> Result<(), Self::Error> { Ok(()) }
//! # }
//! # impl libuplink::network::Poll for MockConnection {
//! #     type Error = ();
//! #     fn poll_read(&mut self, _timeout_ms: u32) -> Result<bool, Self::Error> { Ok(false) }
//! # }
//! # struct MockConnector;
//! # impl libuplink::network::Connect for MockConnector {
//! #     type Connection = MockConnection;
//! #     type Error = ();
//! #     fn connect(&mut self, _remote: &str) -> Result<Self::Connection, Self::Error> {
//! #         Ok(MockConnection)
//! #     }
//! # }
//! # struct MockDriver;
//! # impl libuplink::link::LinkDriver for MockDriver {
//! #     type Error = ();
//! #     fn is_up(&mut self) -> bool { true }
//! #     fn register_events(&mut self, _sink: libuplink::link::LinkEventSink) {}
//! #     fn request_connect(
//! #         &mut self,
//! #         _config: &LinkConfig,
//! #     ) -> Result<libuplink::link::ConnectStart, Self::Error> {
//! #         Ok(libuplink::link::ConnectStart::AlreadyConnected)
//! #     }
//! # }
//! # struct MockIdentity;
//! # impl libuplink::identity::DeviceIdentity for MockIdentity {
//! #     fn device_id(&self, buf: &mut [u8]) -> usize { buf[0] = 1; 1 }
//! # }
//! # struct MockSensor;
//! # impl libuplink::telemetry::TelemetrySource for MockSensor {
//! #     type Error = ();
//! #     fn init(&mut self) -> Result<(), Self::Error> { Ok(()) }
//! #     fn read(&mut self) -> Result<f64, Self::Error> { Ok(23.4) }
//! # }
//! # fn main() -> Result<(), libuplink::session::Error> {
//! let mut link = LinkSupervisor::new(MockDriver, LinkConfig::new("workshop", "lab-psk"));
//! link.initialize();
//!
//! let session = SessionHandle::initialize(
//!     SessionConfig::new("broker.example", 1883),
//!     MockConnector,
//!     DnsResolver,
//!     &MockIdentity,
//!     |topic, payload| log::info!("{}: {} bytes", topic, payload.len()),
//! )?;
//!
//! let mut sensor = MockSensor;
//! use libuplink::telemetry::TelemetrySource as _;
//! sensor.init().ok();
//!
//! let mut orchestrator = Orchestrator::new(
//!     link,
//!     session,
//!     sensor,
//!     UplinkConfig {
//!         device_name: "device1",
//!         telemetry_topic: "z/workshop/data",
//!         command_topic: "z/workshop/cmd",
//!     },
//! );
//! orchestrator.run()
//! # }
//! ```
//!
//! ## Optional Features
//!
//! - `std`: the threaded service layer (link, session, orchestrator);
//!   enabled by default. Without it only the protocol and trait layers
//!   remain, for reuse on bare-metal targets.
//! - `tls`: secure-transport provisioning through `session::tls::SecureConnect`.
//! - `defmt`: `defmt::Format` impls on error types for embedded logging.

#![cfg_attr(not(feature = "std"), no_std)]
#![deny(missing_docs)]
#![warn(missing_debug_implementations)]

/// Network abstraction layer: transport traits and the MQTT protocol subset.
pub mod network;

/// Client identity derivation from the hardware-identity collaborator.
pub mod identity;

/// Telemetry source collaborator boundary.
pub mod telemetry;

#[cfg(feature = "std")]
mod sync;

/// Link-connectivity supervisor.
#[cfg(feature = "std")]
pub mod link;

/// Publish/subscribe session manager and facade.
#[cfg(feature = "std")]
pub mod session;

/// Top-level connectivity orchestrator.
#[cfg(feature = "std")]
pub mod orchestrator;
