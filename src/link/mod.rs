//! Link-connectivity supervisor.
//!
//! Owns the state of the underlying network link (the device-to-access-point
//! connection) and brings it up with an infinite retry policy: connect
//! requests are issued to a platform [`LinkDriver`], the asynchronous result
//! is awaited with a bounded timeout, and failures back off and retry
//! forever. An always-on device has nothing better to do without its link,
//! so there is deliberately no attempt cap and no exponential backoff; both
//! timeouts are [`LinkConfig`] tunables.
//!
//! The driver delivers results from its own callback context through a
//! [`LinkEventSink`], which touches only an atomic state word and a
//! semaphore, so it is safe to call from interrupt-style contexts.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::thread;
use std::time::Duration;

use log::{info, warn};

use crate::sync::Semaphore;

/// Interface poll period while waiting for administrative-up at boot.
const IFACE_POLL_MS: u64 = 100;

/// State of the network link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No link, and no connect attempt in flight.
    Disconnected = 0,
    /// A connect request has been issued and its result is pending.
    Connecting = 1,
    /// The link is established.
    Connected = 2,
}

/// Link configuration.
///
/// An empty passphrase selects an open (unsecured) network, mirroring how
/// the pre-shared credential is optional in the field.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Network name to join.
    pub network_name: &'static str,
    /// Pre-shared credential; empty means open network.
    pub passphrase: &'static str,
    /// How long to wait for the driver's connect result.
    pub connect_timeout_ms: u32,
    /// Sleep between connect attempts.
    pub retry_backoff_ms: u32,
}

impl LinkConfig {
    /// Creates a config with the default 2 s result wait and 1 s backoff.
    pub fn new(network_name: &'static str, passphrase: &'static str) -> Self {
        Self {
            network_name,
            passphrase,
            connect_timeout_ms: 2000,
            retry_backoff_ms: 1000,
        }
    }

    /// Whether the network is open (no credential configured).
    pub fn is_open(&self) -> bool {
        self.passphrase.is_empty()
    }
}

/// Outcome of issuing a connect request to the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStart {
    /// The request was accepted; a result will arrive via the event sink.
    Requested,
    /// The driver reports the link is already up. Counts as success.
    AlreadyConnected,
}

/// Platform link driver collaborator.
pub trait LinkDriver {
    /// Associated error type
    type Error: core::fmt::Debug;

    /// Whether the interface is administratively up.
    fn is_up(&mut self) -> bool;

    /// Registers the sink the driver must call with connect results and
    /// link-loss notifications. Called once, at initialization.
    fn register_events(&mut self, sink: LinkEventSink);

    /// Issues an asynchronous connect request.
    fn request_connect(&mut self, config: &LinkConfig) -> Result<ConnectStart, Self::Error>;
}

struct LinkShared {
    state: AtomicU8,
    connect_sem: Semaphore,
}

impl LinkShared {
    fn set_state(&self, state: LinkState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    fn state(&self) -> LinkState {
        match self.state.load(Ordering::SeqCst) {
            0 => LinkState::Disconnected,
            1 => LinkState::Connecting,
            _ => LinkState::Connected,
        }
    }
}

/// Handle the driver uses to deliver link events from its callback context.
///
/// Only atomic state and a semaphore are touched, so calls may race freely
/// with the supervising thread.
#[derive(Clone)]
pub struct LinkEventSink {
    shared: Arc<LinkShared>,
}

impl LinkEventSink {
    /// Reports the result of a pending connect request.
    pub fn connect_result(&self, connected: bool) {
        self.shared.set_state(if connected {
            LinkState::Connected
        } else {
            LinkState::Disconnected
        });
        self.shared.connect_sem.give();
    }

    /// Reports an asynchronous link loss.
    pub fn link_lost(&self) {
        self.shared.set_state(LinkState::Disconnected);
        self.shared.connect_sem.give();
    }
}

impl core::fmt::Debug for LinkEventSink {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LinkEventSink")
            .field("state", &self.shared.state())
            .finish()
    }
}

/// Supervises the network link through a platform driver.
pub struct LinkSupervisor<D: LinkDriver> {
    driver: D,
    config: LinkConfig,
    shared: Arc<LinkShared>,
}

impl<D: LinkDriver> LinkSupervisor<D> {
    /// Creates a supervisor over `driver`.
    pub fn new(driver: D, config: LinkConfig) -> Self {
        Self {
            driver,
            config,
            shared: Arc::new(LinkShared {
                state: AtomicU8::new(LinkState::Disconnected as u8),
                connect_sem: Semaphore::new(),
            }),
        }
    }

    /// Registers for link events and blocks until the interface is
    /// administratively up.
    ///
    /// This is a boot-time precondition, so there is no timeout.
    pub fn initialize(&mut self) {
        info!("Waiting for network interface to come up");
        while !self.driver.is_up() {
            thread::sleep(Duration::from_millis(IFACE_POLL_MS));
        }
        self.driver.register_events(LinkEventSink {
            shared: Arc::clone(&self.shared),
        });
    }

    /// Connects to the configured network, retrying until it succeeds.
    ///
    /// Each attempt waits up to `connect_timeout_ms` for the driver's
    /// result; timeouts, negative results and request errors back off for
    /// `retry_backoff_ms` and try again. Only returns once the link is up.
    pub fn connect(&mut self) {
        info!("Connecting to network {}", self.config.network_name);

        loop {
            self.shared.set_state(LinkState::Connecting);

            match self.driver.request_connect(&self.config) {
                Ok(ConnectStart::AlreadyConnected) => {
                    self.shared.set_state(LinkState::Connected);
                    break;
                }
                Ok(ConnectStart::Requested) => {}
                Err(err) => {
                    warn!("Failed to request link connect: {:?}", err);
                    self.backoff();
                    continue;
                }
            }

            // Wait for the notification from the connect request.
            if !self.shared.connect_sem.take_timeout(self.config.connect_timeout_ms) {
                self.shared.set_state(LinkState::Disconnected);
                self.backoff();
                continue;
            }

            if self.shared.state() == LinkState::Connected {
                info!("Successfully connected to network");
                break;
            }

            self.backoff();
        }
    }

    /// Last known connectivity, non-blocking.
    pub fn is_connected(&self) -> bool {
        self.shared.state() == LinkState::Connected
    }

    /// Current link state.
    pub fn state(&self) -> LinkState {
        self.shared.state()
    }

    fn backoff(&self) {
        thread::sleep(Duration::from_millis(u64::from(self.config.retry_backoff_ms)));
    }
}

impl<D: LinkDriver> core::fmt::Debug for LinkSupervisor<D> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LinkSupervisor")
            .field("state", &self.shared.state())
            .field("network_name", &self.config.network_name)
            .finish_non_exhaustive()
    }
}
