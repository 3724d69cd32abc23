//! Session errors.
//!
//! Errors returned synchronously by [`Session`](crate::Session) operations.
//! Asynchronous failures are reported through the session callbacks instead.

use std::{error::Error as StdError, fmt};

use derive_builder::UninitializedFieldError;

use crate::{engine::EngineError, transport::TransportError};

/// The kind of a session error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The operation is not valid in the current session state.
    State,
    /// An option or configuration value was rejected.
    Config,
    /// The secure-channel engine failed.
    Engine,
    /// The underlying transport failed.
    Transport,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::State => write!(f, "state"),
            ErrorKind::Config => write!(f, "config"),
            ErrorKind::Engine => write!(f, "engine"),
            ErrorKind::Transport => write!(f, "transport"),
        }
    }
}

/// A session error.
#[derive(Debug, thiserror::Error)]
#[error("tlsio error: kind {kind}, msg: {msg}")]
pub struct Error {
    kind: ErrorKind,
    msg: String,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    pub(crate) fn new<E>(kind: ErrorKind, msg: impl Into<String>, source: Option<E>) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        Self {
            kind,
            msg: msg.into(),
            source: source.map(Into::into),
        }
    }

    pub(crate) fn state(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::State, msg, None::<Self>)
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, msg, None::<Self>)
    }

    /// Returns the kind of the error.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error message.
    pub fn msg(&self) -> &str {
        &self.msg
    }
}

impl From<EngineError> for Error {
    fn from(err: EngineError) -> Self {
        let kind = match err {
            EngineError::Config(_) => ErrorKind::Config,
            _ => ErrorKind::Engine,
        };
        Self::new(kind, err.to_string(), Some(err))
    }
}

impl From<TransportError> for Error {
    fn from(err: TransportError) -> Self {
        let kind = match err {
            TransportError::UnknownOption(_) | TransportError::InvalidOption(_) => {
                ErrorKind::Config
            }
            _ => ErrorKind::Transport,
        };
        Self::new(kind, err.to_string(), Some(err))
    }
}

impl From<UninitializedFieldError> for Error {
    fn from(err: UninitializedFieldError) -> Self {
        Self::new(ErrorKind::Config, "incomplete configuration", Some(err))
    }
}
