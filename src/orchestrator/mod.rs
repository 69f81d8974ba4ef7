//! Top-level connectivity orchestrator.
//!
//! A four-state machine that sequences link bring-up, session bring-up,
//! command subscription and periodic telemetry publishing on a fixed tick.
//! It never touches the transport itself: the link supervisor and session
//! facade do the work, the orchestrator only reads their state and issues
//! requests. Every failure below it lands back in a state this machine
//! treats as retryable, so the device converges on publishing again without
//! outside help.

use std::thread;
use std::time::Duration;

use log::{error, info, warn};
use serde::Serialize;

use crate::link::{LinkDriver, LinkSupervisor};
use crate::session::{self, QoS, SessionHandle};
use crate::telemetry::TelemetrySource;

/// Fixed orchestrator tick period.
pub const TICK_PERIOD_MS: u32 = 2000;

/// Upper bound for an encoded telemetry record.
const TELEMETRY_JSON_LEN: usize = 128;

/// Orchestrator state, re-derived every tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// No link; a link connect must be issued.
    LinkDown,
    /// Link connect issued, waiting for it to report connected.
    LinkConnecting,
    /// Link is up; the session must be brought up.
    LinkUp,
    /// Session requested; publish telemetry while it stays connected.
    SessionUp,
}

/// Fixed topics and naming for the telemetry uplink.
#[derive(Debug, Clone)]
pub struct UplinkConfig {
    /// Device name written into every telemetry record.
    pub device_name: &'static str,
    /// Topic telemetry is published on.
    pub telemetry_topic: &'static str,
    /// Topic subscribed for inbound commands.
    pub command_topic: &'static str,
}

/// What the orchestrator needs from the link supervisor.
pub trait Link {
    /// Connects the link, blocking until it is up.
    fn connect(&mut self);
    /// Last known link connectivity, non-blocking.
    fn is_connected(&mut self) -> bool;
}

/// What the orchestrator needs from the session facade.
pub trait Session {
    /// Requests a session connect cycle.
    fn connect(&mut self) -> Result<(), session::Error>;
    /// Requests a session disconnect.
    fn disconnect(&mut self);
    /// Whether the session is currently connected.
    fn connected(&mut self) -> bool;
    /// Publishes a payload, returning the allocated message id.
    fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS) -> Result<u16, session::Error>;
    /// Subscribes to a topic.
    fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<u16, session::Error>;
}

impl<D: LinkDriver> Link for LinkSupervisor<D> {
    fn connect(&mut self) {
        LinkSupervisor::connect(self);
    }

    fn is_connected(&mut self) -> bool {
        LinkSupervisor::is_connected(self)
    }
}

impl Session for SessionHandle {
    fn connect(&mut self) -> Result<(), session::Error> {
        SessionHandle::connect(self)
    }

    fn disconnect(&mut self) {
        if let Err(err) = SessionHandle::disconnect(self) {
            warn!("Session disconnect request failed: {:?}", err);
        }
    }

    fn connected(&mut self) -> bool {
        SessionHandle::connected(self)
    }

    fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS) -> Result<u16, session::Error> {
        SessionHandle::publish(self, topic, payload, qos)
    }

    fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<u16, session::Error> {
        SessionHandle::subscribe(self, topic, qos)
    }
}

/// One telemetry record on the wire.
#[derive(Serialize)]
struct TelemetryRecord<'a> {
    name: &'a str,
    temp: f64,
}

/// Sequences link, session and telemetry on a fixed tick.
pub struct Orchestrator<L, S, T> {
    link: L,
    session: S,
    source: T,
    config: UplinkConfig,
    state: State,
}

impl<L: Link, S: Session, T: TelemetrySource> Orchestrator<L, S, T> {
    /// Creates the orchestrator in [`State::LinkDown`].
    pub fn new(link: L, session: S, source: T, config: UplinkConfig) -> Self {
        Self {
            link,
            session,
            source,
            config,
            state: State::LinkDown,
        }
    }

    /// Current state.
    pub fn state(&self) -> State {
        self.state
    }

    /// Advances the state machine by one step.
    pub fn tick(&mut self) {
        match self.state {
            State::LinkDown => {
                self.link.connect();
                self.state = State::LinkConnecting;
            }

            State::LinkConnecting => {
                self.state = if self.link.is_connected() {
                    State::LinkUp
                } else {
                    State::LinkDown
                };
            }

            State::LinkUp => match self.session.connect() {
                Ok(()) => {
                    // Fire-and-forget; the request is queued behind the
                    // connect and a failure only shows up in the logs.
                    if let Err(err) = self
                        .session
                        .subscribe(self.config.command_topic, QoS::AtMostOnce)
                    {
                        warn!(
                            "Failed to subscribe to {}: {:?}",
                            self.config.command_topic, err
                        );
                    }
                    self.state = State::SessionUp;
                }
                Err(err) => {
                    warn!("Session connect failed: {:?}", err);
                    self.state = State::LinkConnecting;
                }
            },

            State::SessionUp => {
                if !self.link.is_connected() {
                    self.session.disconnect();
                    self.state = State::LinkDown;
                } else if self.session.connected() {
                    self.publish_telemetry();
                } else {
                    self.session.disconnect();
                    self.state = State::LinkConnecting;
                }
            }
        }
    }

    /// Runs the tick loop forever on the fixed period.
    pub fn run(&mut self) -> ! {
        loop {
            self.tick();
            thread::sleep(Duration::from_millis(u64::from(TICK_PERIOD_MS)));
        }
    }

    fn publish_telemetry(&mut self) {
        let value = match self.source.read() {
            Ok(value) => value,
            Err(err) => {
                error!("Telemetry read failed: {:?}", err);
                return;
            }
        };

        let record = TelemetryRecord {
            name: self.config.device_name,
            // One fractional digit on the wire.
            temp: (value * 10.0).round() / 10.0,
        };
        let payload: heapless::String<TELEMETRY_JSON_LEN> =
            match serde_json_core::to_string(&record) {
                Ok(payload) => payload,
                Err(_) => {
                    error!("Telemetry record does not fit the payload buffer");
                    return;
                }
            };

        info!("Publishing msg: {}", payload);
        if let Err(err) =
            self.session
                .publish(self.config.telemetry_topic, payload.as_bytes(), QoS::AtMostOnce)
        {
            warn!("Telemetry publish failed: {:?}", err);
        }
    }
}

impl<L, S, T> core::fmt::Debug for Orchestrator<L, S, T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("state", &self.state)
            .field("device_name", &self.config.device_name)
            .finish_non_exhaustive()
    }
}
