//! A callback-driven TLS adapter over non-blocking byte-stream transports.
//!
//! [`Session`] layers a TLS client on top of any [`Transport`] without
//! blocking or spawning threads: the caller drives it with
//! [`Session::poll`] and receives results through callbacks. The TLS
//! protocol itself is provided by a [`SecureChannelEngine`].

#![deny(missing_docs, unreachable_pub, unused_must_use)]
#![deny(clippy::all)]
#![forbid(unsafe_code)]

pub mod bridge;
mod config;
pub mod engine;
mod error;
pub mod hook;
pub mod options;
pub mod process;
mod session;
pub mod transport;

pub use bridge::TransportBridge;
pub use config::{SessionConfig, SessionConfigBuilder, SessionConfigBuilderError};
pub use engine::{
    EngineConfig, EngineError, EngineFactory, HandshakeStatus, Identity, SecureChannelEngine,
    TlsVersion,
};
pub use error::{Error, ErrorKind};
pub use hook::{CallbackData, HookSlot, PeerVerification, VerifyCallback, VerifyHook};
pub use options::{OptionBag, OptionValue};
pub use process::{ProcessGuard, ProcessHooks};
pub use session::{OpenCallbacks, OpenResult, SendResult, Session, SessionState};
pub use transport::{
    tcp::{TcpConfig, TcpTransport},
    CloseMode, SendToken, Transport, TransportError, TransportEvent,
};
