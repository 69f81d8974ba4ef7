//! Publish/subscribe session manager.
//!
//! Owns one session to a single broker. All transport I/O happens on a
//! dedicated background thread that waits for a start signal, resolves the
//! broker, connects, then polls the socket, answering quality-of-service
//! acknowledgment handshakes, sending keepalive pings and draining caller
//! requests until the cycle dies, at which point it re-arms and waits for
//! the next start signal. The thread runs for the lifetime of the process.
//!
//! Callers never touch the transport: [`SessionManager::publish`] and
//! friends validate locally, allocate a message id and hand the request to
//! the background loop over a channel. Cross-thread coordination is three
//! atomic flags plus one binary semaphore, so the callback and caller
//! contexts stay torn-write-free without a transport lock.
//!
//! Exactly one subscription is held at a time (capacity-1 slot, replaced
//! wholesale on each subscribe/unsubscribe). Subscription acknowledgments
//! are not surfaced: SUBACK/UNSUBACK are logged and dropped, so subscribing
//! is fire-and-forget by contract.

use core::fmt::Write as _;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU16, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Instant;

use heapless::{FnvIndexSet, String, Vec};
use log::{debug, info, warn};

use crate::identity::{self, ClientId, DeviceIdentity};
use crate::network::mqtt::client as mqtt;
use crate::network::mqtt::client::{MAX_TOPIC_LEN, PAYLOAD_CHUNK_LEN};
use crate::network::{Connect, Poll, Resolve};
use crate::sync::Semaphore;

pub mod error;
pub mod handle;
#[cfg(feature = "tls")]
pub mod tls;

#[cfg(test)]
mod tests;

pub use crate::network::mqtt::client::QoS;
pub use error::Error;
pub use handle::SessionHandle;

/// Default keepalive interval.
pub const DEFAULT_KEEP_ALIVE_MS: u32 = 60_000;

/// Maximum outgoing publish payload size in bytes.
pub const MAX_PUBLISH_LEN: usize = 512;

/// Poll slice for the background loop's bounded socket wait.
///
/// The wait is sliced so queued caller requests are serviced promptly; the
/// keepalive ping still fires on interval expiry, not per slice.
const POLL_SLICE_MS: u32 = 100;

/// Incoming QoS 2 message ids awaiting the broker's release.
const PENDING_RELEASE_CAP: usize = 8;

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Broker hostname, resolved to one IPv4 address per connect cycle.
    pub broker_host: &'static str,
    /// Broker port.
    pub broker_port: u16,
    /// Keepalive interval; a ping is sent whenever it expires idle.
    pub keep_alive_ms: u32,
}

impl SessionConfig {
    /// Creates a config with the default 60 s keepalive.
    pub fn new(broker_host: &'static str, broker_port: u16) -> Self {
        Self {
            broker_host,
            broker_port,
            keep_alive_ms: DEFAULT_KEEP_ALIVE_MS,
        }
    }

    fn validate(&self) -> Result<(), Error> {
        if self.broker_host.is_empty() || self.keep_alive_ms == 0 {
            return Err(Error::InvalidArgument);
        }
        Ok(())
    }
}

/// State of the broker session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session established.
    Disconnected = 0,
    /// A connect cycle is running, CONNACK pending.
    Connecting = 1,
    /// The broker acknowledged the connection.
    Connected = 2,
}

/// Why the session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The local side requested the disconnect.
    UserRequest,
    /// The broker closed the connection.
    ClosedByRemote,
    /// The transport handle became invalid.
    InvalidRequest,
    /// Any other transport or protocol failure.
    Other,
}

/// An incoming data chunk.
///
/// Payloads larger than [`PAYLOAD_CHUNK_LEN`] arrive as several messages
/// with the same topic; reassembly is the receiver's responsibility.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Topic the data was published on.
    pub topic: String<MAX_TOPIC_LEN>,
    /// One chunk of payload bytes.
    pub payload: Vec<u8, PAYLOAD_CHUNK_LEN>,
}

/// Events reported to the session event callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The broker accepted the connection.
    Connected,
    /// The session ended.
    Disconnected(DisconnectReason),
    /// The broker acknowledged a QoS 1 publish of ours.
    BrokerAck {
        /// Identifier returned by [`SessionManager::publish`].
        message_id: u16,
    },
    /// Subscribed data arrived.
    DataReceived(Message),
}

/// The single subscription slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    /// Subscribed topic.
    pub topic: String<MAX_TOPIC_LEN>,
    /// Requested delivery guarantee.
    pub qos: QoS,
}

/// Allocates protocol message identifiers.
///
/// Valid identifiers are 1..=65535; zero is the protocol's "no id" sentinel
/// and is skipped on wraparound.
#[derive(Debug)]
pub struct MessageIdAllocator {
    next: AtomicU16,
}

impl MessageIdAllocator {
    /// Creates an allocator starting at 1.
    pub const fn new() -> Self {
        Self {
            next: AtomicU16::new(1),
        }
    }

    /// Returns the next identifier, wrapping 65535 back to 1.
    pub fn next(&self) -> u16 {
        let mut current = self.next.load(Ordering::Relaxed);
        loop {
            let next = if current == u16::MAX { 1 } else { current + 1 };
            match self
                .next
                .compare_exchange_weak(current, next, Ordering::SeqCst, Ordering::Relaxed)
            {
                Ok(_) => return current,
                Err(actual) => current = actual,
            }
        }
    }
}

impl Default for MessageIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

struct Shared {
    state: AtomicU8,
    disconnect_requested: AtomicBool,
    connection_poll_active: AtomicBool,
    broker_disconnected: AtomicBool,
    start: Semaphore,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(SessionState::Disconnected as u8),
            disconnect_requested: AtomicBool::new(false),
            connection_poll_active: AtomicBool::new(false),
            broker_disconnected: AtomicBool::new(true),
            start: Semaphore::new(),
        }
    }

    fn set_state(&self, state: SessionState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    fn state(&self) -> SessionState {
        match self.state.load(Ordering::SeqCst) {
            0 => SessionState::Disconnected,
            1 => SessionState::Connecting,
            _ => SessionState::Connected,
        }
    }
}

enum Request {
    Publish {
        message_id: u16,
        topic: String<MAX_TOPIC_LEN>,
        payload: Vec<u8, MAX_PUBLISH_LEN>,
        qos: QoS,
    },
    Subscribe {
        message_id: u16,
        topic: String<MAX_TOPIC_LEN>,
        qos: QoS,
    },
    Unsubscribe {
        message_id: u16,
        topic: String<MAX_TOPIC_LEN>,
    },
    Disconnect,
}

/// Manages one publish/subscribe session to a single broker.
pub struct SessionManager {
    shared: Arc<Shared>,
    requests: mpsc::Sender<Request>,
    subscription: Mutex<Option<Subscription>>,
    message_ids: MessageIdAllocator,
    client_id: ClientId,
}

impl SessionManager {
    /// Validates the configuration, derives the client identity from the
    /// hardware collaborator, and spawns the background loop.
    ///
    /// `event_callback` runs on the background thread.
    pub fn initialize<C, R, I, F>(
        config: SessionConfig,
        connector: C,
        resolver: R,
        identity: &I,
        event_callback: F,
    ) -> Result<Self, Error>
    where
        C: Connect + Send + 'static,
        C::Connection: Poll,
        R: Resolve + Send + 'static,
        I: DeviceIdentity,
        F: FnMut(Event) + Send + 'static,
    {
        config.validate()?;
        let client_id = identity::client_id(identity);
        Self::start(config, connector, resolver, client_id, event_callback)
    }

    /// Like [`initialize`](Self::initialize), but provisions the connector
    /// with TLS credentials first.
    ///
    /// Peer verification is explicitly skipped by this design
    /// ([`PeerVerification::None`](tls::PeerVerification::None)); callers
    /// wanting real verification must change that policy in their connector.
    #[cfg(feature = "tls")]
    pub fn initialize_secure<C, R, I, F>(
        config: SessionConfig,
        credentials: &tls::Credentials,
        mut connector: C,
        resolver: R,
        identity: &I,
        event_callback: F,
    ) -> Result<Self, Error>
    where
        C: tls::SecureConnect + Send + 'static,
        C::Connection: Poll,
        R: Resolve + Send + 'static,
        I: DeviceIdentity,
        F: FnMut(Event) + Send + 'static,
    {
        config.validate()?;
        connector
            .install_credentials(credentials, tls::PeerVerification::None)
            .map_err(|_| Error::Configuration)?;
        let client_id = identity::client_id(identity);
        Self::start(config, connector, resolver, client_id, event_callback)
    }

    fn start<C, R, F>(
        config: SessionConfig,
        connector: C,
        resolver: R,
        client_id: ClientId,
        event_callback: F,
    ) -> Result<Self, Error>
    where
        C: Connect + Send + 'static,
        C::Connection: Poll,
        R: Resolve + Send + 'static,
        F: FnMut(Event) + Send + 'static,
    {
        debug!("Device client id: {}", client_id.as_str());

        let shared = Arc::new(Shared::new());
        let (requests, receiver) = mpsc::channel();

        let worker = Worker {
            config,
            connector,
            resolver,
            client_id: client_id.clone(),
            shared: Arc::clone(&shared),
            requests: receiver,
            event_callback,
        };
        thread::Builder::new()
            .name("uplink-session".into())
            .spawn(move || worker.run())
            .map_err(|_| Error::Configuration)?;

        Ok(Self {
            shared,
            requests,
            subscription: Mutex::new(None),
            message_ids: MessageIdAllocator::new(),
            client_id,
        })
    }

    /// Asks the background loop to begin a connect cycle.
    ///
    /// Non-blocking; the outcome arrives through the event callback. Fails
    /// with [`Error::Busy`] while a cycle is already active.
    pub fn request_connect(&self) -> Result<(), Error> {
        if self.shared.connection_poll_active.load(Ordering::SeqCst) {
            debug!("Connection poll in progress");
            return Err(Error::Busy);
        }

        self.shared
            .disconnect_requested
            .store(false, Ordering::SeqCst);
        self.shared.start.give();

        Ok(())
    }

    /// Requests a protocol-level disconnect.
    ///
    /// The resulting notification arrives later as
    /// `Disconnected(UserRequest)` through the event callback.
    pub fn request_disconnect(&self) -> Result<(), Error> {
        self.shared
            .disconnect_requested
            .store(true, Ordering::SeqCst);
        self.send(Request::Disconnect)
    }

    /// Publishes `payload` on `topic`, returning the allocated message id.
    ///
    /// A later [`Event::BrokerAck`] can be correlated by this id for QoS 1.
    /// Fails with [`Error::NotConnected`] if no session is established,
    /// before any id is allocated.
    pub fn publish(&self, topic: &str, payload: &[u8], qos: QoS) -> Result<u16, Error> {
        if self.shared.broker_disconnected.load(Ordering::SeqCst) {
            warn!("Not connected, unable to publish");
            return Err(Error::NotConnected);
        }

        let topic = String::try_from(topic).map_err(|_| Error::InvalidArgument)?;
        let payload = Vec::from_slice(payload).map_err(|_| Error::InvalidArgument)?;

        let message_id = self.message_ids.next();
        self.send(Request::Publish {
            message_id,
            topic,
            payload,
            qos,
        })?;

        Ok(message_id)
    }

    /// Replaces the subscription slot and submits a subscribe request.
    ///
    /// Fire-and-forget: the SUBACK is never surfaced, so there is no way to
    /// await confirmation.
    pub fn subscribe(&self, topic: &str, qos: QoS) -> Result<u16, Error> {
        let topic: String<MAX_TOPIC_LEN> =
            String::try_from(topic).map_err(|_| Error::InvalidArgument)?;

        let message_id = self.message_ids.next();
        *self.subscription.lock().unwrap() = Some(Subscription {
            topic: topic.clone(),
            qos,
        });
        self.send(Request::Subscribe {
            message_id,
            topic,
            qos,
        })?;

        Ok(message_id)
    }

    /// Clears the subscription slot and submits an unsubscribe request.
    pub fn unsubscribe(&self, topic: &str) -> Result<u16, Error> {
        let topic: String<MAX_TOPIC_LEN> =
            String::try_from(topic).map_err(|_| Error::InvalidArgument)?;

        let message_id = self.message_ids.next();
        *self.subscription.lock().unwrap() = None;
        self.send(Request::Unsubscribe { message_id, topic })?;

        Ok(message_id)
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// The subscription currently held, if any.
    pub fn subscription(&self) -> Option<Subscription> {
        self.subscription.lock().unwrap().clone()
    }

    /// Hex client identity presented to the broker.
    pub fn client_id(&self) -> &str {
        self.client_id.as_str()
    }

    fn send(&self, request: Request) -> Result<(), Error> {
        self.requests
            .send(request)
            .map_err(|_| Error::Transport(crate::network::error::Error::NotOpen))
    }
}

impl core::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SessionManager")
            .field("state", &self.shared.state())
            .field("client_id", &self.client_id.as_str())
            .finish_non_exhaustive()
    }
}

/// Keepalive bookkeeping: deadline from the last outgoing packet.
struct Deadline {
    last: Instant,
    interval_ms: u32,
}

impl Deadline {
    fn new(interval_ms: u32) -> Self {
        Self {
            last: Instant::now(),
            interval_ms,
        }
    }

    fn reset(&mut self) {
        self.last = Instant::now();
    }

    fn remaining_ms(&self) -> u32 {
        let elapsed = self.last.elapsed().as_millis().min(u128::from(u32::MAX)) as u32;
        self.interval_ms.saturating_sub(elapsed)
    }
}

struct Worker<C: Connect, R, F> {
    config: SessionConfig,
    connector: C,
    resolver: R,
    client_id: ClientId,
    shared: Arc<Shared>,
    requests: mpsc::Receiver<Request>,
    event_callback: F,
}

impl<C, R, F> Worker<C, R, F>
where
    C: Connect,
    C::Connection: Poll,
    R: Resolve,
    F: FnMut(Event),
{
    /// The background loop: wait for a start signal, run one connect/poll
    /// cycle, tear down, re-arm. Runs for the lifetime of the process.
    fn run(mut self) {
        loop {
            self.shared.start.take();
            self.shared
                .connection_poll_active
                .store(true, Ordering::SeqCst);
            self.shared.set_state(SessionState::Connecting);

            self.run_cycle();

            self.shared.set_state(SessionState::Disconnected);
            self.shared
                .connection_poll_active
                .store(false, Ordering::SeqCst);
            // Requests from the dead cycle and a stale start signal must not
            // leak into the next one.
            while self.requests.try_recv().is_ok() {}
            self.shared.start.try_take();
        }
    }

    fn run_cycle(&mut self) {
        info!("Resolving {}", self.config.broker_host);
        let addr = match self
            .resolver
            .resolve_v4(self.config.broker_host, self.config.broker_port)
        {
            Ok(addr) => addr,
            Err(err) => {
                warn!("Broker address resolution failed: {:?}", err);
                return;
            }
        };
        info!("IPv4 address found {}", addr.ip());

        let mut remote: String<21> = String::new();
        let _ = write!(remote, "{}", addr);

        let connection = match self.connector.connect(remote.as_str()) {
            Ok(connection) => connection,
            Err(err) => {
                warn!("Broker connect failed: {:?}", err);
                return;
            }
        };

        let mut client = mqtt::Client::new(connection);
        let options = mqtt::Options {
            client_id: self.client_id.as_str(),
            keep_alive_seconds: (self.config.keep_alive_ms / 1000).min(u32::from(u16::MAX)) as u16,
            clean_session: true,
        };
        if let Err(err) = client.connect_request(&options) {
            warn!("Connection request failed: {:?}", err);
            let _ = client.close();
            return;
        }
        debug!("Broker connection request sent");
        self.shared.broker_disconnected.store(false, Ordering::SeqCst);

        let reason = self.poll_loop(&mut client);

        // On a socket error the application is notified here; a user-requested
        // disconnect reaches this point with the flag set and overrides the
        // reason.
        if !self.shared.broker_disconnected.swap(true, Ordering::SeqCst) {
            let reason = if self.shared.disconnect_requested.load(Ordering::SeqCst) {
                DisconnectReason::UserRequest
            } else {
                reason
            };
            warn!("Session disconnected, reason: {:?}", reason);
            (self.event_callback)(Event::Disconnected(reason));
            let _ = client.disconnect();
        }
        let _ = client.close();
    }

    fn poll_loop(&mut self, client: &mut mqtt::Client<C::Connection>) -> DisconnectReason {
        let mut pending_release: FnvIndexSet<u16, PENDING_RELEASE_CAP> = FnvIndexSet::new();
        let mut keepalive = Deadline::new(self.config.keep_alive_ms);

        loop {
            // Queued caller requests go out before waiting on the wire.
            loop {
                match self.requests.try_recv() {
                    Ok(Request::Disconnect) => return DisconnectReason::UserRequest,
                    Ok(Request::Publish {
                        message_id,
                        topic,
                        payload,
                        qos,
                    }) => {
                        if let Err(err) = client.publish(&topic, &payload, qos, message_id) {
                            warn!("Publish submit failed: {:?}", err);
                            return DisconnectReason::Other;
                        }
                        keepalive.reset();
                    }
                    Ok(Request::Subscribe {
                        message_id,
                        topic,
                        qos,
                    }) => {
                        debug!("Subscribing to {}", topic);
                        if let Err(err) = client.subscribe(message_id, &topic, qos) {
                            warn!("Subscribe submit failed: {:?}", err);
                            return DisconnectReason::Other;
                        }
                        keepalive.reset();
                    }
                    Ok(Request::Unsubscribe { message_id, topic }) => {
                        debug!("Unsubscribing from {}", topic);
                        if let Err(err) = client.unsubscribe(message_id, &topic) {
                            warn!("Unsubscribe submit failed: {:?}", err);
                            return DisconnectReason::Other;
                        }
                        keepalive.reset();
                    }
                    Err(_) => break,
                }
            }

            // One ping per expired keepalive interval, however many poll
            // slices it took to get there.
            let remaining = keepalive.remaining_ms();
            if remaining == 0 {
                if client.ping().is_err() {
                    warn!("Keepalive ping failed");
                    return DisconnectReason::Other;
                }
                debug!("Keepalive ping sent");
                keepalive.reset();
                continue;
            }

            match client.poll_read(remaining.min(POLL_SLICE_MS)) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(err) => {
                    warn!("Socket poll failed: {:?}", err);
                    return DisconnectReason::Other;
                }
            }

            match client.read_event() {
                Ok(event) => {
                    if let Some(reason) =
                        self.dispatch(client, event, &mut pending_release, &mut keepalive)
                    {
                        return reason;
                    }
                }
                Err(crate::network::error::Error::ConnectionClosed) => {
                    debug!("The broker socket is closed");
                    return DisconnectReason::ClosedByRemote;
                }
                Err(crate::network::error::Error::ProtocolError) => {
                    // Best effort: a malformed packet is logged and skipped.
                    warn!("Malformed packet from broker");
                }
                Err(err) => {
                    warn!("Transport input error: {:?}", err);
                    return DisconnectReason::Other;
                }
            }
        }
    }

    fn dispatch(
        &mut self,
        client: &mut mqtt::Client<C::Connection>,
        event: mqtt::Event,
        pending_release: &mut FnvIndexSet<u16, PENDING_RELEASE_CAP>,
        keepalive: &mut Deadline,
    ) -> Option<DisconnectReason> {
        match event {
            mqtt::Event::ConnAck { return_code: 0 } => {
                debug!("Broker accepted the connection");
                self.shared.set_state(SessionState::Connected);
                (self.event_callback)(Event::Connected);
                None
            }
            mqtt::Event::ConnAck { return_code } => {
                warn!("Broker refused connection, return code {}", return_code);
                Some(DisconnectReason::Other)
            }
            mqtt::Event::Publish(publish) => {
                self.deliver_publish(client, publish, pending_release, keepalive)
            }
            mqtt::Event::PubAck { message_id } => {
                debug!("PUBACK packet id: {}", message_id);
                (self.event_callback)(Event::BrokerAck { message_id });
                None
            }
            mqtt::Event::PubRec { message_id } => {
                if client.pubrel(message_id).is_err() {
                    return Some(DisconnectReason::Other);
                }
                keepalive.reset();
                None
            }
            mqtt::Event::PubRel { message_id } => {
                if !pending_release.remove(&message_id) {
                    warn!("PUBREL for unknown message id {}", message_id);
                }
                if client.pubcomp(message_id).is_err() {
                    return Some(DisconnectReason::Other);
                }
                keepalive.reset();
                None
            }
            mqtt::Event::PubComp { message_id } => {
                debug!("PUBCOMP packet id: {}", message_id);
                None
            }
            mqtt::Event::SubAck { .. } => {
                debug!("SUBACK packet");
                None
            }
            mqtt::Event::UnsubAck { .. } => {
                debug!("UNSUBACK packet");
                None
            }
            mqtt::Event::PingResp => {
                debug!("PINGRESP packet");
                None
            }
        }
    }

    /// Delivers an incoming publish chunk by chunk, then answers its QoS
    /// handshake before the next event is read.
    fn deliver_publish(
        &mut self,
        client: &mut mqtt::Client<C::Connection>,
        publish: mqtt::IncomingPublish,
        pending_release: &mut FnvIndexSet<u16, PENDING_RELEASE_CAP>,
        keepalive: &mut Deadline,
    ) -> Option<DisconnectReason> {
        debug!(
            "Publish received, {} bytes on {}",
            publish.payload_len, publish.topic
        );

        let mut chunk = [0u8; PAYLOAD_CHUNK_LEN];
        loop {
            match client.read_payload(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    let message = Message {
                        topic: publish.topic.clone(),
                        payload: Vec::from_slice(&chunk[..n]).unwrap(),
                    };
                    (self.event_callback)(Event::DataReceived(message));
                }
                Err(err) => {
                    warn!("Failed to read payload: {:?}", err);
                    return Some(DisconnectReason::Other);
                }
            }
        }

        match publish.qos {
            QoS::AtMostOnce => {}
            QoS::AtLeastOnce => {
                if client.puback(publish.message_id).is_err() {
                    return Some(DisconnectReason::Other);
                }
                keepalive.reset();
            }
            QoS::ExactlyOnce => {
                if client.pubrec(publish.message_id).is_err() {
                    return Some(DisconnectReason::Other);
                }
                keepalive.reset();
                if pending_release.insert(publish.message_id).is_err() {
                    warn!(
                        "Too many releases pending, dropping id {}",
                        publish.message_id
                    );
                }
            }
        }

        None
    }
}
