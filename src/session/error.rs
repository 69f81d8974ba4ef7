//! Common error types for session operations

use crate::network;

/// A common error type for session operations.
///
/// Only [`Error::Configuration`] and [`Error::InvalidArgument`] at
/// initialization are fatal; everything else is either retried by the caller
/// ([`Error::Busy`]) or resolved by waiting for the session to reconnect
/// ([`Error::NotConnected`]).
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Error {
    /// A configuration value or call argument was rejected.
    InvalidArgument,
    /// A connect cycle is already active; retry later.
    Busy,
    /// The operation requires a connected session.
    NotConnected,
    /// Secure-transport provisioning failed at initialization.
    Configuration,
    /// The transport layer failed.
    Transport(network::error::Error),
}

#[cfg(feature = "defmt")]
impl defmt::Format for Error {
    fn format(&self, f: defmt::Formatter) {
        match self {
            Error::InvalidArgument => defmt::write!(f, "InvalidArgument"),
            Error::Busy => defmt::write!(f, "Busy"),
            Error::NotConnected => defmt::write!(f, "NotConnected"),
            Error::Configuration => defmt::write!(f, "Configuration"),
            Error::Transport(inner) => defmt::write!(f, "Transport({})", inner),
        }
    }
}
