//! Shared mock transport pieces for the integration tests.
//!
//! [`Wire`] is a scripted byte pipe: tests feed it the bytes a broker would
//! send and inspect the bytes the client wrote. [`ScriptedConnection`]
//! exposes one end of it through the crate's transport traits.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use libuplink::identity::DeviceIdentity;
use libuplink::network::error::Error;
use libuplink::network::{Close, Connect, Connection, Poll, Read, Resolve, Write};

struct WireBuf {
    inbound: VecDeque<u8>,
    outbound: Vec<u8>,
    closed: bool,
}

struct WireInner {
    buf: Mutex<WireBuf>,
    condvar: Condvar,
}

/// Both ends of a scripted connection. Cloning shares the same pipe.
#[derive(Clone)]
pub struct Wire(Arc<WireInner>);

impl Wire {
    pub fn new() -> Self {
        Self(Arc::new(WireInner {
            buf: Mutex::new(WireBuf {
                inbound: VecDeque::new(),
                outbound: Vec::new(),
                closed: false,
            }),
            condvar: Condvar::new(),
        }))
    }

    /// Queues broker-to-client bytes.
    pub fn feed(&self, bytes: &[u8]) {
        let mut buf = self.0.buf.lock().unwrap();
        buf.inbound.extend(bytes);
        self.0.condvar.notify_all();
    }

    /// Simulates the broker closing the connection.
    pub fn close(&self) {
        let mut buf = self.0.buf.lock().unwrap();
        buf.closed = true;
        self.0.condvar.notify_all();
    }

    /// Everything the client has written so far.
    pub fn written(&self) -> Vec<u8> {
        self.0.buf.lock().unwrap().outbound.clone()
    }

    /// Removes and returns everything the client has written so far.
    pub fn take_written(&self) -> Vec<u8> {
        std::mem::take(&mut self.0.buf.lock().unwrap().outbound)
    }

    /// Waits until the client has written at least `len` bytes in total.
    pub fn wait_written(&self, len: usize, timeout: Duration) -> bool {
        let buf = self.0.buf.lock().unwrap();
        let (buf, _) = self
            .0
            .condvar
            .wait_timeout_while(buf, timeout, |buf| buf.outbound.len() < len)
            .unwrap();
        buf.outbound.len() >= len
    }

    /// Waits until `predicate` holds for the written bytes.
    pub fn wait_written_with(
        &self,
        timeout: Duration,
        mut predicate: impl FnMut(&[u8]) -> bool,
    ) -> bool {
        let buf = self.0.buf.lock().unwrap();
        let (buf, _) = self
            .0
            .condvar
            .wait_timeout_while(buf, timeout, |buf| !predicate(&buf.outbound))
            .unwrap();
        predicate(&buf.outbound)
    }

    pub fn connection(&self) -> ScriptedConnection {
        ScriptedConnection(self.clone())
    }

    fn inner(&self) -> &WireInner {
        &self.0
    }
}

/// Transport-trait view of a [`Wire`].
pub struct ScriptedConnection(Wire);

impl Read for ScriptedConnection {
    type Error = Error;

    fn read(&mut self, out: &mut [u8]) -> Result<usize, Self::Error> {
        let inner = self.0.inner();
        let buf = inner.buf.lock().unwrap();
        // The session only reads after a positive poll, but guard against
        // hanging a broken test forever.
        let deadline = Duration::from_secs(2);
        let (mut buf, _) = inner
            .condvar
            .wait_timeout_while(buf, deadline, |buf| {
                buf.inbound.is_empty() && !buf.closed
            })
            .unwrap();
        if buf.inbound.is_empty() {
            return Ok(0); // closed or timed out: signals end of stream
        }
        let n = out.len().min(buf.inbound.len());
        for slot in out.iter_mut().take(n) {
            *slot = buf.inbound.pop_front().unwrap();
        }
        Ok(n)
    }
}

impl Write for ScriptedConnection {
    type Error = Error;

    fn write(&mut self, bytes: &[u8]) -> Result<usize, Self::Error> {
        let inner = self.0.inner();
        let mut buf = inner.buf.lock().unwrap();
        if buf.closed {
            return Err(Error::WriteError);
        }
        buf.outbound.extend_from_slice(bytes);
        inner.condvar.notify_all();
        Ok(bytes.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

impl Close for ScriptedConnection {
    type Error = Error;

    fn close(self) -> Result<(), Self::Error> {
        Ok(())
    }
}

impl Poll for ScriptedConnection {
    type Error = Error;

    fn poll_read(&mut self, timeout_ms: u32) -> Result<bool, Self::Error> {
        let inner = self.0.inner();
        let buf = inner.buf.lock().unwrap();
        let timeout = Duration::from_millis(u64::from(timeout_ms));
        let (buf, _) = inner
            .condvar
            .wait_timeout_while(buf, timeout, |buf| {
                buf.inbound.is_empty() && !buf.closed
            })
            .unwrap();
        Ok(!buf.inbound.is_empty() || buf.closed)
    }
}

impl Connection for ScriptedConnection {}

/// Hands out one scripted wire per connect attempt and counts them.
pub struct MockConnector {
    wires: Mutex<VecDeque<Wire>>,
    attempts: Arc<AtomicUsize>,
}

impl MockConnector {
    pub fn new(wires: Vec<Wire>) -> (Self, Arc<AtomicUsize>) {
        let attempts = Arc::new(AtomicUsize::new(0));
        (
            Self {
                wires: Mutex::new(wires.into()),
                attempts: Arc::clone(&attempts),
            },
            attempts,
        )
    }
}

impl Connect for MockConnector {
    type Connection = ScriptedConnection;
    type Error = Error;

    fn connect(&mut self, _remote: &str) -> Result<Self::Connection, Self::Error> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.wires
            .lock()
            .unwrap()
            .pop_front()
            .map(|wire| wire.connection())
            .ok_or(Error::ConnectionRefused)
    }
}

/// Resolves every hostname to a documentation address.
pub struct FixedResolver;

impl Resolve for FixedResolver {
    type Error = Error;

    fn resolve_v4(&mut self, _host: &str, port: u16) -> Result<SocketAddrV4, Self::Error> {
        Ok(SocketAddrV4::new(Ipv4Addr::new(192, 0, 2, 1), port))
    }
}

/// Fails every resolution.
pub struct FailingResolver;

impl Resolve for FailingResolver {
    type Error = Error;

    fn resolve_v4(&mut self, _host: &str, _port: u16) -> Result<SocketAddrV4, Self::Error> {
        Err(Error::InvalidAddress)
    }
}

/// Fixed four-byte device id; client identity "deadbeef".
pub struct TestIdentity;

impl DeviceIdentity for TestIdentity {
    fn device_id(&self, buf: &mut [u8]) -> usize {
        let id = [0xDE, 0xAD, 0xBE, 0xEF];
        let len = id.len().min(buf.len());
        buf[..len].copy_from_slice(&id[..len]);
        len
    }
}

// Broker-side packet builders.

pub fn connack(return_code: u8) -> Vec<u8> {
    vec![0x20, 0x02, 0x00, return_code]
}

pub fn puback(message_id: u16) -> Vec<u8> {
    ack(0x40, message_id)
}

pub fn pubrec(message_id: u16) -> Vec<u8> {
    ack(0x50, message_id)
}

pub fn pubrel(message_id: u16) -> Vec<u8> {
    ack(0x62, message_id)
}

pub fn suback(message_id: u16) -> Vec<u8> {
    let id = message_id.to_be_bytes();
    vec![0x90, 0x03, id[0], id[1], 0x00]
}

fn ack(packet_type: u8, message_id: u16) -> Vec<u8> {
    let id = message_id.to_be_bytes();
    vec![packet_type, 0x02, id[0], id[1]]
}

/// Builds a broker-to-client PUBLISH packet. `qos` 0 omits the message id.
pub fn publish(topic: &str, payload: &[u8], qos: u8, message_id: u16) -> Vec<u8> {
    let id_len = if qos == 0 { 0 } else { 2 };
    let remaining = 2 + topic.len() + id_len + payload.len();

    let mut packet = vec![0x30 | (qos << 1)];
    encode_remaining_length(&mut packet, remaining);
    packet.extend_from_slice(&(topic.len() as u16).to_be_bytes());
    packet.extend_from_slice(topic.as_bytes());
    if qos > 0 {
        packet.extend_from_slice(&message_id.to_be_bytes());
    }
    packet.extend_from_slice(payload);
    packet
}

fn encode_remaining_length(packet: &mut Vec<u8>, mut len: usize) {
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        packet.push(byte);
        if len == 0 {
            break;
        }
    }
}

/// Splits a client-to-broker byte stream into (packet type byte, body) pairs.
pub fn packets(mut bytes: &[u8]) -> Vec<(u8, Vec<u8>)> {
    let mut out = Vec::new();
    while !bytes.is_empty() {
        let packet_type = bytes[0];
        let mut idx = 1;
        let mut len = 0usize;
        let mut multiplier = 1usize;
        loop {
            // A single packet is emitted as two writes (fixed header, then
            // body); the buffer may be observed between them. Stop on a
            // partial packet rather than indexing past the end.
            if idx >= bytes.len() {
                return out;
            }
            let byte = bytes[idx];
            idx += 1;
            len += (byte as usize & 127) * multiplier;
            multiplier *= 128;
            if byte & 0x80 == 0 {
                break;
            }
        }
        if bytes.len() < idx + len {
            return out;
        }
        out.push((packet_type, bytes[idx..idx + len].to_vec()));
        bytes = &bytes[idx + len..];
    }
    out
}

/// Packet types of a client-to-broker byte stream, upper nibble only.
pub fn packet_types(bytes: &[u8]) -> Vec<u8> {
    packets(bytes).iter().map(|(t, _)| t & 0xF0).collect()
}
