//! Narrow application-facing view of the session.
//!
//! Most applications only care whether the session is up and what data
//! arrived. [`SessionHandle`] folds the manager's event set down to an
//! atomic `connected` flag and forwards incoming data chunks to a single
//! user callback; everything else is logged and dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{info, warn};

use crate::identity::DeviceIdentity;
use crate::network::{Connect, Poll, Resolve};

use super::error::Error;
use super::{Event, QoS, SessionConfig, SessionManager, SessionState};

/// A connected-flag-and-callback view over [`SessionManager`].
pub struct SessionHandle {
    manager: SessionManager,
    connected: Arc<AtomicBool>,
}

impl SessionHandle {
    /// Initializes the session manager with an internal event callback.
    ///
    /// `data_callback` receives the topic and one payload chunk per
    /// [`Event::DataReceived`], verbatim. It runs on the session's
    /// background thread.
    pub fn initialize<C, R, I, D>(
        config: SessionConfig,
        connector: C,
        resolver: R,
        identity: &I,
        data_callback: D,
    ) -> Result<Self, Error>
    where
        C: Connect + Send + 'static,
        C::Connection: Poll,
        R: Resolve + Send + 'static,
        I: DeviceIdentity,
        D: FnMut(&str, &[u8]) + Send + 'static,
    {
        let connected = Arc::new(AtomicBool::new(false));
        let manager = SessionManager::initialize(
            config,
            connector,
            resolver,
            identity,
            Self::event_callback(Arc::clone(&connected), data_callback),
        )?;

        Ok(Self { manager, connected })
    }

    /// Like [`initialize`](Self::initialize), but provisions the connector
    /// with TLS credentials first.
    #[cfg(feature = "tls")]
    pub fn initialize_secure<C, R, I, D>(
        config: SessionConfig,
        credentials: &super::tls::Credentials,
        connector: C,
        resolver: R,
        identity: &I,
        data_callback: D,
    ) -> Result<Self, Error>
    where
        C: super::tls::SecureConnect + Send + 'static,
        C::Connection: Poll,
        R: Resolve + Send + 'static,
        I: DeviceIdentity,
        D: FnMut(&str, &[u8]) + Send + 'static,
    {
        let connected = Arc::new(AtomicBool::new(false));
        let manager = SessionManager::initialize_secure(
            config,
            credentials,
            connector,
            resolver,
            identity,
            Self::event_callback(Arc::clone(&connected), data_callback),
        )?;

        Ok(Self { manager, connected })
    }

    fn event_callback<D>(
        flag: Arc<AtomicBool>,
        mut data_callback: D,
    ) -> impl FnMut(Event) + Send + 'static
    where
        D: FnMut(&str, &[u8]) + Send + 'static,
    {
        move |event| match event {
            Event::Connected => {
                info!("Session client connected");
                flag.store(true, Ordering::SeqCst);
            }
            Event::Disconnected(reason) => {
                warn!("Session client disconnected, reason: {:?}", reason);
                flag.store(false, Ordering::SeqCst);
            }
            Event::BrokerAck { message_id } => {
                info!("Broker has acknowledged message, id = {}", message_id);
            }
            Event::DataReceived(message) => {
                data_callback(message.topic.as_str(), &message.payload);
            }
        }
    }

    /// Whether the session is currently connected. Non-blocking.
    pub fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Delegates to [`SessionManager::request_connect`].
    pub fn connect(&self) -> Result<(), Error> {
        self.manager.request_connect()
    }

    /// Delegates to [`SessionManager::request_disconnect`].
    pub fn disconnect(&self) -> Result<(), Error> {
        self.manager.request_disconnect()
    }

    /// Delegates to [`SessionManager::publish`].
    pub fn publish(&self, topic: &str, payload: &[u8], qos: QoS) -> Result<u16, Error> {
        self.manager.publish(topic, payload, qos)
    }

    /// Delegates to [`SessionManager::subscribe`].
    pub fn subscribe(&self, topic: &str, qos: QoS) -> Result<u16, Error> {
        self.manager.subscribe(topic, qos)
    }

    /// Delegates to [`SessionManager::unsubscribe`].
    pub fn unsubscribe(&self, topic: &str) -> Result<u16, Error> {
        self.manager.unsubscribe(topic)
    }

    /// Current session state, for diagnostics.
    pub fn state(&self) -> SessionState {
        self.manager.state()
    }
}

impl core::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("connected", &self.connected())
            .finish_non_exhaustive()
    }
}
