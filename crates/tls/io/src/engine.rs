//! The secure-channel engine seam.
//!
//! An engine performs the TLS protocol itself. The session drives it with
//! ciphertext through a [`TransportBridge`] and never blocks on it.

use std::{fmt, sync::Arc};

use crate::{bridge::TransportBridge, hook::HookSlot, process::ProcessHooks};

/// Possible engine errors.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("certificate error: {0}")]
    Certificate(String),
    #[error("invalid state: {0}")]
    State(String),
    #[error("connection closed by peer")]
    Closed,
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Io(err.to_string())
    }
}

/// Minimum protocol version requested for a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum TlsVersion {
    /// TLS 1.0.
    #[default]
    Tls10,
    /// TLS 1.1.
    Tls11,
    /// TLS 1.2.
    Tls12,
    /// TLS 1.3.
    Tls13,
}

impl TlsVersion {
    /// Maps the integer value of the `tls_version` option.
    ///
    /// Unknown values fall back to TLS 1.2.
    pub fn from_option(value: i64) -> Self {
        match value {
            0 | 10 => TlsVersion::Tls10,
            11 => TlsVersion::Tls11,
            12 => TlsVersion::Tls12,
            13 => TlsVersion::Tls13,
            other => {
                tracing::info!(
                    "value of tls version option {} is not known, defaulting to 1.2",
                    other
                );
                TlsVersion::Tls12
            }
        }
    }

    /// Returns the integer value used by the `tls_version` option.
    pub fn as_option(&self) -> i64 {
        match self {
            TlsVersion::Tls10 => 10,
            TlsVersion::Tls11 => 11,
            TlsVersion::Tls12 => 12,
            TlsVersion::Tls13 => 13,
        }
    }
}

/// Client identity presented to the peer.
#[derive(Clone)]
pub struct Identity {
    /// PEM certificate chain.
    pub certificate: String,
    /// PEM private key.
    pub private_key: String,
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("certificate", &self.certificate.len())
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Everything an engine needs to be created.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Name the session connects to, used for SNI and verification.
    pub server_name: String,
    /// Minimum protocol version.
    pub version: TlsVersion,
    /// PEM blobs trusted in addition to the platform anchors.
    pub trusted_certs: Vec<String>,
    /// Client identity, if both halves were supplied.
    pub identity: Option<Identity>,
    /// Verify hook shared with the session.
    pub verify_hook: HookSlot,
}

/// Progress of a handshake step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStatus {
    /// The handshake finished, application data may flow.
    Complete,
    /// More bytes from the peer are needed.
    InProgress,
}

/// A TLS engine instance, one per connection attempt.
///
/// All methods are non-blocking: they consume what is queued in the bridge's
/// inbound queue and append their output to its outbound queue.
pub trait SecureChannelEngine {
    /// Advances the handshake.
    fn handshake(&mut self, bridge: &mut TransportBridge) -> Result<HandshakeStatus, EngineError>;

    /// Decrypts received records into `buf`.
    ///
    /// Returns `Ok(0)` when no more plaintext is available.
    fn decrypt(&mut self, bridge: &mut TransportBridge, buf: &mut [u8])
        -> Result<usize, EngineError>;

    /// Encrypts `plaintext` into the outbound queue.
    fn encrypt(&mut self, bridge: &mut TransportBridge, plaintext: &[u8])
        -> Result<(), EngineError>;

    /// Queues a close-notify alert.
    fn shutdown(&mut self, bridge: &mut TransportBridge) -> Result<(), EngineError>;

    /// Trusts additional PEM certificates from now on.
    fn add_trusted_certs(&mut self, pem: &str) -> Result<(), EngineError>;
}

/// Creates engines for sessions.
pub trait EngineFactory {
    /// Creates an engine for one connection attempt.
    fn create(&self, config: &EngineConfig) -> Result<Box<dyn SecureChannelEngine>, EngineError>;

    /// Process-wide state this factory's engines rely on.
    fn process_hooks(&self) -> Option<Arc<dyn ProcessHooks>> {
        None
    }
}
