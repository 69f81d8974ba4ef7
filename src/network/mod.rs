//! A network abstraction layer for embedded telemetry clients
//!
//! This module provides the transport seams the session layer is built on.
//! The crate ships no concrete socket or TLS implementation; target platforms
//! implement these traits over whatever network stack they have, and the
//! session layer drives them.

#![allow(missing_docs)]
#![deny(unsafe_code)]

/// Common error types for network operations
pub mod error;

/// Protocol-specific client implementations
pub mod mqtt;

/// Re-exports of common traits
pub mod prelude {
    pub use super::{Close, Connect, Connection, Poll, Read, Resolve, Write};
}

// Core synchronous traits
pub trait Read {
    /// Associated error type
    type Error: core::fmt::Debug;
    /// Read data from the connection
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;
}

pub trait Write {
    /// Associated error type
    type Error: core::fmt::Debug;
    /// Write data to the connection
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error>;
    /// Flush the write buffer
    fn flush(&mut self) -> Result<(), Self::Error>;
}

pub trait Close {
    /// Associated error type
    type Error: core::fmt::Debug;
    /// Close the connection
    fn close(self) -> Result<(), Self::Error>;
}

/// A bounded wait for readability.
///
/// The session background loop never blocks on a bare read; it waits for
/// readiness with a timeout so keepalive deadlines and queued requests keep
/// being serviced. `Ok(true)` means a subsequent read will not block,
/// `Ok(false)` means the timeout expired with nothing to read.
pub trait Poll {
    /// Associated error type
    type Error: core::fmt::Debug;
    /// Wait up to `timeout_ms` for the connection to become readable
    fn poll_read(&mut self, timeout_ms: u32) -> Result<bool, Self::Error>;
}

/// A synchronous connection
pub trait Connection: Read + Write + Close {}

/// A synchronous connector (client)
pub trait Connect {
    /// Associated connection type
    type Connection: Connection;
    /// Associated error type
    type Error: core::fmt::Debug;
    /// Open a connection
    fn connect(&mut self, remote: &str) -> Result<Self::Connection, Self::Error>;
}

/// Hostname resolution to a single IPv4 address.
///
/// The broker is configured by hostname; one IPv4 answer is taken and the
/// rest are ignored.
pub trait Resolve {
    /// Associated error type
    type Error: core::fmt::Debug;
    /// Resolve `host` to one IPv4 socket address
    fn resolve_v4(
        &mut self,
        host: &str,
        port: u16,
    ) -> Result<core::net::SocketAddrV4, Self::Error>;
}

/// A [`Resolve`] implementation backed by the platform resolver.
#[cfg(feature = "std")]
#[derive(Debug, Default, Clone, Copy)]
pub struct DnsResolver;

#[cfg(feature = "std")]
impl Resolve for DnsResolver {
    type Error = error::Error;

    fn resolve_v4(
        &mut self,
        host: &str,
        port: u16,
    ) -> Result<core::net::SocketAddrV4, Self::Error> {
        use std::net::{SocketAddr, ToSocketAddrs};

        let addrs = (host, port)
            .to_socket_addrs()
            .map_err(|_| error::Error::InvalidAddress)?;
        for addr in addrs {
            if let SocketAddr::V4(v4) = addr {
                return Ok(v4);
            }
        }
        Err(error::Error::InvalidAddress)
    }
}
