//! Secure-transport provisioning.
//!
//! The crate performs no TLS handshake itself. When built with the `tls`
//! feature, the session hands these credentials to the connector once at
//! initialization and connects through it as usual. Peer verification is
//! explicitly skipped by this design; callers wanting real verification must
//! supply a connector that enforces it regardless.

use crate::network::Connect;

/// Certificates and key material for the secure-transport collaborator.
///
/// All material is immutable for the lifetime of the process.
#[derive(Clone, Copy)]
pub struct Credentials {
    /// Root (CA) certificate, DER encoded.
    pub root_certificate: &'static [u8],
    /// Client certificate, DER encoded.
    pub client_certificate: &'static [u8],
    /// Client private key, DER encoded.
    pub client_key: &'static [u8],
    /// Hostname presented for SNI and certificate matching.
    pub server_hostname: &'static str,
}

impl core::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        // Key material stays out of logs.
        f.debug_struct("Credentials")
            .field("server_hostname", &self.server_hostname)
            .finish_non_exhaustive()
    }
}

/// Peer verification policy handed to the secure-transport collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerVerification {
    /// Do not verify the broker's certificate.
    None,
    /// Require a valid broker certificate chain.
    Required,
}

/// A connector that can be provisioned with TLS credentials.
pub trait SecureConnect: Connect {
    /// Installs credentials and the verification policy. Called once, before
    /// the first connect.
    fn install_credentials(
        &mut self,
        credentials: &Credentials,
        verify: PeerVerification,
    ) -> Result<(), Self::Error>;
}
