//! A [`rustls`] engine for [`tlsio`] sessions.
//!
//! The engine verifies peers against a [`TrustAnchorSource`] plus the
//! certificates trusted on the session, optionally consults CRLs found by a
//! [`RevocationChecker`](tls_revocation::RevocationChecker), and finally
//! hands the outcome to the session's verify hook.

#![deny(missing_docs, unreachable_pub, unused_must_use)]
#![deny(clippy::all)]
#![forbid(unsafe_code)]

pub mod anchors;
mod engine;
mod pem;
mod verifier;

pub use anchors::{DirectoryAnchors, MozillaRoots, NoAnchors, TrustAnchorSource};
pub use engine::{RustlsEngine, RustlsEngineFactory};

use tlsio::{EngineError, Error, Session, SessionConfig, TcpConfig, TcpTransport};

/// Creates a session to `host:port` over TCP using `factory`.
pub fn connect_tcp(
    host: &str,
    port: u16,
    factory: RustlsEngineFactory,
) -> Result<Session, Error> {
    let tcp = TcpConfig::builder()
        .host(host)
        .port(port)
        .build()
        .map_err(|err| EngineError::Config(err.to_string()))?;
    let config = SessionConfig::builder()
        .host(host)
        .port(port)
        .build()
        .map_err(|err| EngineError::Config(err.to_string()))?;

    Session::new(TcpTransport::new(tcp), factory, config)
}
