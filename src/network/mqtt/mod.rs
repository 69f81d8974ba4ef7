//! MQTT 3.1.1 protocol subset for the telemetry session.
//!
//! This is not a general-purpose MQTT implementation. It covers exactly the
//! packets the session layer drives: CONNECT/CONNACK, PUBLISH with all three
//! QoS acknowledgment exchanges, single-topic SUBSCRIBE/UNSUBSCRIBE,
//! PINGREQ/PINGRESP and DISCONNECT. Multi-topic subscription lists,
//! persistent session state and will messages are out of scope.
//!
//! The main entry point is [`client::Client`], which owns a
//! [`Connection`](crate::network::Connection) and exposes packet-level
//! send operations plus a typed event reader.

/// MQTT client implementation and supporting types.
pub mod client;
