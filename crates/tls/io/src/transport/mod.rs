//! The underlying byte-stream transport.
//!
//! A transport is non-blocking: operations start work and report completion
//! as [`TransportEvent`]s collected by [`Transport::poll`].

pub mod tcp;

use std::collections::VecDeque;

use bytes::Bytes;

use crate::options::{OptionBag, OptionValue};

/// Possible transport errors.
#[allow(missing_docs)]
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid state: {0}")]
    State(String),
    #[error("unknown option: {0}")]
    UnknownOption(String),
    #[error("invalid option value: {0}")]
    InvalidOption(String),
    #[error("unable to resolve {0}")]
    Resolve(String),
    #[error("connection closed")]
    Closed,
}

/// Identifies a send so its completion can be matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SendToken(pub u64);

/// How a transport should close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseMode {
    /// Flush queued sends, then close and report [`TransportEvent::CloseComplete`].
    Graceful,
    /// Close now. Queued sends are dropped and no event is reported.
    Forced,
}

/// Completion and data events of a transport.
#[derive(Debug)]
pub enum TransportEvent {
    /// An open finished.
    OpenComplete(Result<(), TransportError>),
    /// Bytes arrived from the peer.
    BytesReceived(Bytes),
    /// A send finished.
    SendComplete {
        /// The send this completes.
        token: SendToken,
        /// Outcome of the send.
        result: Result<(), TransportError>,
    },
    /// A graceful close finished.
    CloseComplete,
    /// The connection failed.
    Error(TransportError),
}

/// A non-blocking byte-stream connection.
pub trait Transport {
    /// Starts opening the connection.
    ///
    /// Completion is reported with [`TransportEvent::OpenComplete`].
    fn open(&mut self) -> Result<(), TransportError>;

    /// Queues `bytes` for sending.
    ///
    /// Every accepted send is completed with exactly one
    /// [`TransportEvent::SendComplete`] unless the transport is force-closed
    /// first. Sends complete in the order they were queued.
    fn send(&mut self, bytes: Bytes, token: SendToken) -> Result<(), TransportError>;

    /// Closes the connection.
    fn close(&mut self, mode: CloseMode) -> Result<(), TransportError>;

    /// Makes progress and appends the resulting events to `events`.
    fn poll(&mut self, events: &mut VecDeque<TransportEvent>);

    /// Sets a transport option.
    fn set_option(&mut self, name: &str, value: &OptionValue) -> Result<(), TransportError>;

    /// Returns the options set on this transport.
    fn options(&self) -> OptionBag;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn open(&mut self) -> Result<(), TransportError> {
        (**self).open()
    }

    fn send(&mut self, bytes: Bytes, token: SendToken) -> Result<(), TransportError> {
        (**self).send(bytes, token)
    }

    fn close(&mut self, mode: CloseMode) -> Result<(), TransportError> {
        (**self).close(mode)
    }

    fn poll(&mut self, events: &mut VecDeque<TransportEvent>) {
        (**self).poll(events)
    }

    fn set_option(&mut self, name: &str, value: &OptionValue) -> Result<(), TransportError> {
        (**self).set_option(name, value)
    }

    fn options(&self) -> OptionBag {
        (**self).options()
    }
}
