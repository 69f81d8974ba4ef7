//! An MQTT 3.1.1 client implementation based on the MQTT 3.1.1 specification.
//!
//! The client is packet-oriented rather than call-and-wait: sending CONNECT
//! and consuming the CONNACK are separate operations, because acknowledgments
//! arrive through the same poll-driven event path as everything else. The
//! session layer owns the event loop; this type owns the wire format.

use crate::network::error::Error;
use crate::network::{Connection, Poll, Read, Write};
use heapless::{String, Vec};

// MQTT Control Packet types - these are the fixed header packet type values
const CONNECT: u8 = 0x10;
const CONNACK: u8 = 0x20;
const PUBLISH: u8 = 0x30;
const PUBACK: u8 = 0x40;
const PUBREC: u8 = 0x50;
const PUBREL: u8 = 0x62;
const PUBCOMP: u8 = 0x70;
const SUBSCRIBE: u8 = 0x82;
const SUBACK: u8 = 0x90;
const UNSUBSCRIBE: u8 = 0xA2;
const UNSUBACK: u8 = 0xB0;
const PINGREQ: u8 = 0xC0;
const PINGRESP: u8 = 0xD0;
const DISCONNECT: u8 = 0xE0;

// Protocol constants defined by MQTT 3.1.1 specification
const PROTOCOL_NAME: &[u8] = b"MQTT";
const PROTOCOL_LEVEL: u8 = 4; // MQTT 3.1.1

/// Maximum topic name length, incoming and outgoing.
pub const MAX_TOPIC_LEN: usize = 256;

/// Size of the scratch buffer used to drain incoming publish payloads.
///
/// Payloads larger than this are read in successive chunks; the client never
/// reassembles a full message.
pub const PAYLOAD_CHUNK_LEN: usize = 512;

/// Maximum encoded size of a single outgoing packet.
pub const MAX_PACKET_LEN: usize = 1024;

/// Quality of Service levels for MQTT messages.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum QoS {
    /// At most once delivery.
    AtMostOnce = 0,
    /// At least once delivery, acknowledged with PUBACK.
    AtLeastOnce = 1,
    /// Exactly once delivery, via the PUBREC/PUBREL/PUBCOMP handshake.
    ExactlyOnce = 2,
}

impl QoS {
    fn from_publish_flags(flags: u8) -> Result<Self, Error> {
        match (flags >> 1) & 0x03 {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            _ => Err(Error::ProtocolError),
        }
    }
}

/// Options for configuring the MQTT client connection.
#[derive(Debug, Clone)]
pub struct Options<'a> {
    /// The client identifier, must be unique within the broker.
    pub client_id: &'a str,
    /// The keep-alive time in seconds.
    pub keep_alive_seconds: u16,
    /// Whether to start a clean session.
    pub clean_session: bool,
}

/// Header of an incoming PUBLISH packet.
///
/// The payload stays on the wire; drain it with
/// [`Client::read_payload`] before reading the next event.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct IncomingPublish {
    /// The topic on which the message was published.
    pub topic: String<MAX_TOPIC_LEN>,
    /// Packet identifier; 0 for QoS 0 messages, which carry none.
    pub message_id: u16,
    /// Delivery guarantee the broker sent this message with.
    pub qos: QoS,
    /// Total payload length in bytes.
    pub payload_len: usize,
}

/// A single incoming protocol event.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Event {
    /// CONNACK; `return_code` 0 means the connection was accepted.
    ConnAck {
        /// CONNACK return code, 0 on success.
        return_code: u8,
    },
    /// An incoming PUBLISH header; payload pending on the wire.
    Publish(IncomingPublish),
    /// The broker acknowledged a QoS 1 publish of ours.
    PubAck {
        /// Identifier of the acknowledged publish.
        message_id: u16,
    },
    /// First broker response to a QoS 2 publish of ours.
    PubRec {
        /// Identifier of the publish being received.
        message_id: u16,
    },
    /// Broker released a QoS 2 message it delivered to us.
    PubRel {
        /// Identifier of the message being released.
        message_id: u16,
    },
    /// Broker completed a QoS 2 publish of ours.
    PubComp {
        /// Identifier of the completed publish.
        message_id: u16,
    },
    /// Subscription acknowledged.
    SubAck {
        /// Identifier of the subscribe request.
        message_id: u16,
    },
    /// Unsubscription acknowledged.
    UnsubAck {
        /// Identifier of the unsubscribe request.
        message_id: u16,
    },
    /// Keepalive response.
    PingResp,
}

/// An MQTT 3.1.1 client over a generic [`Connection`].
pub struct Client<C: Connection> {
    connection: C,
    pending_payload: usize,
}

impl<C: Connection> core::fmt::Debug for Client<C> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Client")
            .field("pending_payload", &self.pending_payload)
            .finish_non_exhaustive()
    }
}

impl<C: Connection> Client<C> {
    /// Wraps an established connection. No packets are exchanged yet.
    pub fn new(connection: C) -> Self {
        Self {
            connection,
            pending_payload: 0,
        }
    }

    /// Sends a CONNECT packet.
    ///
    /// The CONNACK is not awaited here; it arrives through [`read_event`]
    /// like every other acknowledgment.
    ///
    /// [`read_event`]: Client::read_event
    pub fn connect_request(&mut self, options: &Options) -> Result<(), Error> {
        // --- Variable Header ---
        let mut vh: Vec<u8, 10> = Vec::new();
        vh.extend_from_slice(&(PROTOCOL_NAME.len() as u16).to_be_bytes())
            .unwrap();
        vh.extend_from_slice(PROTOCOL_NAME).unwrap();
        vh.push(PROTOCOL_LEVEL).unwrap();

        let mut connect_flags = 0;
        if options.clean_session {
            connect_flags |= 0x02;
        }
        vh.push(connect_flags).unwrap();
        vh.extend_from_slice(&options.keep_alive_seconds.to_be_bytes())
            .unwrap();

        // --- Payload ---
        let client_id_bytes = options.client_id.as_bytes();
        let mut payload: Vec<u8, 256> = Vec::new();
        payload
            .extend_from_slice(&(client_id_bytes.len() as u16).to_be_bytes())
            .map_err(|_| Error::ProtocolError)?;
        payload
            .extend_from_slice(client_id_bytes)
            .map_err(|_| Error::ProtocolError)?;

        let remaining_len = vh.len() + payload.len();

        // --- Fixed Header ---
        let mut fixed_header: Vec<u8, 5> = Vec::new();
        fixed_header.push(CONNECT).unwrap();
        encode_remaining_length(&mut fixed_header, remaining_len)
            .map_err(|_| Error::ProtocolError)?;

        self.connection
            .write(&fixed_header)
            .map_err(|_| Error::WriteError)?;
        self.connection.write(&vh).map_err(|_| Error::WriteError)?;
        self.connection
            .write(&payload)
            .map_err(|_| Error::WriteError)?;
        self.connection.flush().map_err(|_| Error::WriteError)?;

        Ok(())
    }

    /// Publishes a message to a topic.
    ///
    /// `message_id` is written for QoS 1 and 2 packets and ignored for QoS 0.
    /// The dup and retain flags are never set.
    pub fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        message_id: u16,
    ) -> Result<(), Error> {
        let topic_bytes = topic.as_bytes();
        let id_len = if qos == QoS::AtMostOnce { 0 } else { 2 };
        if 2 + topic_bytes.len() + id_len + payload.len() > MAX_PACKET_LEN {
            return Err(Error::ProtocolError);
        }

        let mut packet: Vec<u8, MAX_PACKET_LEN> = Vec::new();

        // --- Variable Header ---
        packet
            .extend_from_slice(&(topic_bytes.len() as u16).to_be_bytes())
            .unwrap();
        packet.extend_from_slice(topic_bytes).unwrap();
        if qos != QoS::AtMostOnce {
            packet.extend_from_slice(&message_id.to_be_bytes()).unwrap();
        }

        // --- Payload ---
        packet.extend_from_slice(payload).unwrap();

        // --- Fixed Header ---
        let mut fixed_header: Vec<u8, 5> = Vec::new();
        fixed_header.push(PUBLISH | ((qos as u8) << 1)).unwrap();
        encode_remaining_length(&mut fixed_header, packet.len()).unwrap();

        self.write_packet(&fixed_header, &packet)
    }

    /// Subscribes to a topic. The SUBACK arrives through the event path.
    pub fn subscribe(&mut self, message_id: u16, topic: &str, qos: QoS) -> Result<(), Error> {
        self.send_topic_request(SUBSCRIBE, message_id, topic, Some(qos))
    }

    /// Unsubscribes from a topic. The UNSUBACK arrives through the event path.
    pub fn unsubscribe(&mut self, message_id: u16, topic: &str) -> Result<(), Error> {
        self.send_topic_request(UNSUBSCRIBE, message_id, topic, None)
    }

    /// Sends a PINGREQ keepalive.
    pub fn ping(&mut self) -> Result<(), Error> {
        self.send_bare(PINGREQ)
    }

    /// Sends a DISCONNECT packet.
    pub fn disconnect(&mut self) -> Result<(), Error> {
        self.send_bare(DISCONNECT)
    }

    /// Acknowledges a QoS 1 delivery.
    pub fn puback(&mut self, message_id: u16) -> Result<(), Error> {
        self.send_ack(PUBACK, message_id)
    }

    /// First step of acknowledging a QoS 2 delivery.
    pub fn pubrec(&mut self, message_id: u16) -> Result<(), Error> {
        self.send_ack(PUBREC, message_id)
    }

    /// Releases a QoS 2 publish of ours after the broker's PUBREC.
    pub fn pubrel(&mut self, message_id: u16) -> Result<(), Error> {
        self.send_ack(PUBREL, message_id)
    }

    /// Completes a QoS 2 delivery after the broker's PUBREL.
    pub fn pubcomp(&mut self, message_id: u16) -> Result<(), Error> {
        self.send_ack(PUBCOMP, message_id)
    }

    /// Reads and parses one incoming packet.
    ///
    /// A pending PUBLISH payload must be fully drained with
    /// [`read_payload`](Client::read_payload) first; calling this with bytes
    /// still pending is a protocol error.
    pub fn read_event(&mut self) -> Result<Event, Error> {
        if self.pending_payload > 0 {
            return Err(Error::ProtocolError);
        }

        let mut header = [0u8; 1];
        read_exact(&mut self.connection, &mut header)?;
        let remaining_len = decode_remaining_length(&mut self.connection)?;

        match header[0] & 0xF0 {
            CONNACK => {
                if remaining_len != 2 {
                    return Err(Error::ProtocolError);
                }
                let mut buf = [0u8; 2];
                read_exact(&mut self.connection, &mut buf)?;
                Ok(Event::ConnAck {
                    return_code: buf[1],
                })
            }
            PUBLISH => self.read_publish_header(header[0], remaining_len),
            PINGRESP => {
                if remaining_len != 0 {
                    return Err(Error::ProtocolError);
                }
                Ok(Event::PingResp)
            }
            packet_type => {
                // Acknowledgment packets all start with the packet identifier.
                if !(2..=4).contains(&remaining_len) {
                    return Err(Error::ProtocolError);
                }
                let mut buf = [0u8; 4];
                read_exact(&mut self.connection, &mut buf[..remaining_len])?;
                let message_id = u16::from_be_bytes([buf[0], buf[1]]);

                match packet_type {
                    PUBACK => Ok(Event::PubAck { message_id }),
                    PUBREC => Ok(Event::PubRec { message_id }),
                    _ if header[0] == PUBREL => Ok(Event::PubRel { message_id }),
                    PUBCOMP => Ok(Event::PubComp { message_id }),
                    SUBACK => Ok(Event::SubAck { message_id }),
                    UNSUBACK => Ok(Event::UnsubAck { message_id }),
                    _ => Err(Error::ProtocolError),
                }
            }
        }
    }

    /// Drains part of a pending PUBLISH payload into `buf`.
    ///
    /// Returns the number of bytes read, or 0 once the payload is exhausted.
    pub fn read_payload(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        if self.pending_payload == 0 {
            return Ok(0);
        }
        let n = buf.len().min(self.pending_payload);
        read_exact(&mut self.connection, &mut buf[..n])?;
        self.pending_payload -= n;
        Ok(n)
    }

    /// Bytes of the current PUBLISH payload still on the wire.
    pub fn payload_remaining(&self) -> usize {
        self.pending_payload
    }

    /// Closes the underlying connection.
    pub fn close(self) -> Result<(), Error> {
        self.connection.close().map_err(|_| Error::ConnectionClosed)
    }

    fn read_publish_header(&mut self, flags: u8, remaining_len: usize) -> Result<Event, Error> {
        let qos = QoS::from_publish_flags(flags)?;

        let mut len_buf = [0u8; 2];
        read_exact(&mut self.connection, &mut len_buf)?;
        let topic_len = u16::from_be_bytes(len_buf) as usize;

        let id_len = if qos == QoS::AtMostOnce { 0 } else { 2 };
        if topic_len > MAX_TOPIC_LEN || 2 + topic_len + id_len > remaining_len {
            return Err(Error::ProtocolError);
        }

        let mut topic_buf: Vec<u8, MAX_TOPIC_LEN> = Vec::new();
        topic_buf.resize(topic_len, 0).unwrap();
        read_exact(&mut self.connection, &mut topic_buf)?;
        let topic = String::from_utf8(topic_buf).map_err(|_| Error::ProtocolError)?;

        let message_id = if qos == QoS::AtMostOnce {
            0
        } else {
            let mut id_buf = [0u8; 2];
            read_exact(&mut self.connection, &mut id_buf)?;
            u16::from_be_bytes(id_buf)
        };

        self.pending_payload = remaining_len - 2 - topic_len - id_len;

        Ok(Event::Publish(IncomingPublish {
            topic,
            message_id,
            qos,
            payload_len: self.pending_payload,
        }))
    }

    fn send_topic_request(
        &mut self,
        packet_type: u8,
        message_id: u16,
        topic: &str,
        qos: Option<QoS>,
    ) -> Result<(), Error> {
        let topic_bytes = topic.as_bytes();
        if topic_bytes.len() > MAX_TOPIC_LEN {
            return Err(Error::ProtocolError);
        }

        let mut packet: Vec<u8, { MAX_TOPIC_LEN + 8 }> = Vec::new();

        // --- Variable Header (Packet Identifier) ---
        packet.extend_from_slice(&message_id.to_be_bytes()).unwrap();

        // --- Payload ---
        packet
            .extend_from_slice(&(topic_bytes.len() as u16).to_be_bytes())
            .unwrap();
        packet.extend_from_slice(topic_bytes).unwrap();
        if let Some(qos) = qos {
            packet.push(qos as u8).unwrap();
        }

        // --- Fixed Header ---
        let mut fixed_header: Vec<u8, 5> = Vec::new();
        fixed_header.push(packet_type).unwrap();
        encode_remaining_length(&mut fixed_header, packet.len()).unwrap();

        self.write_packet(&fixed_header, &packet)
    }

    fn send_ack(&mut self, packet_type: u8, message_id: u16) -> Result<(), Error> {
        let id = message_id.to_be_bytes();
        let packet = [packet_type, 0x02, id[0], id[1]];
        self.connection
            .write(&packet)
            .map_err(|_| Error::WriteError)?;
        self.connection.flush().map_err(|_| Error::WriteError)
    }

    fn send_bare(&mut self, packet_type: u8) -> Result<(), Error> {
        self.connection
            .write(&[packet_type, 0x00])
            .map_err(|_| Error::WriteError)?;
        self.connection.flush().map_err(|_| Error::WriteError)
    }

    fn write_packet(&mut self, fixed_header: &[u8], packet: &[u8]) -> Result<(), Error> {
        self.connection
            .write(fixed_header)
            .map_err(|_| Error::WriteError)?;
        self.connection
            .write(packet)
            .map_err(|_| Error::WriteError)?;
        self.connection.flush().map_err(|_| Error::WriteError)
    }
}

impl<C: Connection + Poll> Client<C> {
    /// Waits up to `timeout_ms` for the connection to become readable.
    pub fn poll_read(&mut self, timeout_ms: u32) -> Result<bool, Error> {
        self.connection
            .poll_read(timeout_ms)
            .map_err(|_| Error::ReadError)
    }
}

fn read_exact<C: Read>(connection: &mut C, buf: &mut [u8]) -> Result<(), Error> {
    let mut total_read = 0;
    while total_read < buf.len() {
        match connection.read(&mut buf[total_read..]) {
            Ok(0) => return Err(Error::ConnectionClosed),
            Ok(n) => total_read += n,
            Err(_) => return Err(Error::ReadError),
        }
    }
    Ok(())
}

/// Decodes the variable-length remaining length field.
fn decode_remaining_length<C: Read>(connection: &mut C) -> Result<usize, Error> {
    let mut remaining_len = 0usize;
    let mut multiplier = 1usize;
    for _ in 0..4 {
        let mut byte = [0u8; 1];
        read_exact(connection, &mut byte)?;
        remaining_len += (byte[0] as usize & 127) * multiplier;
        multiplier *= 128;
        if (byte[0] & 0x80) == 0 {
            return Ok(remaining_len);
        }
    }
    Err(Error::ProtocolError)
}

/// Encodes the remaining length field for an MQTT packet.
fn encode_remaining_length(buf: &mut Vec<u8, 5>, mut len: usize) -> Result<(), ()> {
    loop {
        if buf.is_full() {
            return Err(());
        }
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        buf.push(byte).unwrap(); // `is_full` check above ensures this won't panic
        if len == 0 {
            break;
        }
    }
    Ok(())
}
