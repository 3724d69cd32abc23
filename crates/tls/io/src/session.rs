//! The TLS session state machine.
//!
//! A [`Session`] sequences handshake, encrypted data transfer and shutdown
//! over a [`Transport`] using a [`SecureChannelEngine`]. All progress happens
//! inside [`Session::open`], [`Session::send`], [`Session::close`] and
//! [`Session::poll`]; results are delivered through callbacks.

use std::collections::VecDeque;

use tracing::{debug, error, info, info_span, warn, Span};

use crate::{
    bridge::TransportBridge,
    config::SessionConfig,
    engine::{
        EngineConfig, EngineFactory, HandshakeStatus, Identity, SecureChannelEngine, TlsVersion,
    },
    error::Error,
    hook::HookSlot,
    options::*,
    process::ProcessGuard,
    transport::{CloseMode, SendToken, Transport, TransportEvent},
};

const DECRYPT_CHUNK_SIZE: usize = 4096;

/// Outcome of an open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenResult {
    /// The handshake completed.
    Ok,
    /// The transport or the handshake failed.
    Error,
    /// The session was closed before the open completed.
    Cancelled,
}

/// Outcome of a send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendResult {
    /// The ciphertext was handed to the peer's connection.
    Ok,
    /// The transport failed to send.
    Error,
    /// The session was closed before the send completed.
    Cancelled,
}

/// Public state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Not connected.
    NotOpen,
    /// Waiting for the transport to open.
    OpeningUnderlyingTransport,
    /// Exchanging handshake messages.
    InHandshake,
    /// Application data may flow.
    Open,
    /// Waiting for a graceful close to complete.
    Closing,
    /// A fatal error occurred; the session must be closed.
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    NotOpen,
    OpeningUnderlyingTransport,
    InHandshake,
    /// Recorded while dispatching transport events, resolved at the end of
    /// the same poll.
    HandshakeFailed,
    Open,
    Closing,
    Error,
}

type OpenCompleteFn = Box<dyn FnOnce(OpenResult)>;
type BytesReceivedFn = Box<dyn FnMut(&[u8])>;
type ErrorFn = Box<dyn FnMut()>;
type SendCompleteFn = Box<dyn FnOnce(SendResult)>;
type CloseCompleteFn = Box<dyn FnOnce()>;

/// Callbacks registered by [`Session::open`].
pub struct OpenCallbacks {
    on_open_complete: OpenCompleteFn,
    on_bytes_received: BytesReceivedFn,
    on_error: ErrorFn,
}

impl OpenCallbacks {
    /// Creates the set of callbacks.
    ///
    /// `on_open_complete` fires once per open; `on_bytes_received` fires for
    /// every chunk of decrypted data; `on_error` fires when an open session
    /// fails.
    pub fn new(
        on_open_complete: impl FnOnce(OpenResult) + 'static,
        on_bytes_received: impl FnMut(&[u8]) + 'static,
        on_error: impl FnMut() + 'static,
    ) -> Self {
        Self {
            on_open_complete: Box::new(on_open_complete),
            on_bytes_received: Box::new(on_bytes_received),
            on_error: Box::new(on_error),
        }
    }
}

/// Engine and bridge, created together and dropped together.
struct EngineContext {
    engine: Box<dyn SecureChannelEngine>,
    bridge: TransportBridge,
}

struct PendingSend {
    token: SendToken,
    callback: SendCompleteFn,
}

/// A TLS session over a non-blocking transport.
pub struct Session {
    state: State,
    config: SessionConfig,
    transport: Box<dyn Transport>,
    factory: Box<dyn EngineFactory>,
    ctx: Option<EngineContext>,

    trusted_certs: Vec<String>,
    certificate: Option<String>,
    private_key: Option<String>,
    version: TlsVersion,
    hook: HookSlot,

    pending_open: Option<OpenCompleteFn>,
    pending_close: Option<CloseCompleteFn>,
    on_data: Option<BytesReceivedFn>,
    on_error: Option<ErrorFn>,
    sends: VecDeque<PendingSend>,
    next_token: u64,
    events: VecDeque<TransportEvent>,

    span: Span,
    _guard: ProcessGuard,
}

impl Session {
    /// Creates a session over `transport`.
    ///
    /// The first session created in a process installs the factory's
    /// process-wide state.
    pub fn new(
        transport: impl Transport + 'static,
        factory: impl EngineFactory + 'static,
        config: SessionConfig,
    ) -> Result<Self, Error> {
        let guard = ProcessGuard::acquire(factory.process_hooks())?;
        let span = info_span!("tlsio", host = config.host(), port = config.port());

        Ok(Self {
            state: State::NotOpen,
            config,
            transport: Box::new(transport),
            factory: Box::new(factory),
            ctx: None,
            trusted_certs: Vec::new(),
            certificate: None,
            private_key: None,
            version: TlsVersion::default(),
            hook: HookSlot::new(),
            pending_open: None,
            pending_close: None,
            on_data: None,
            on_error: None,
            sends: VecDeque::new(),
            next_token: 0,
            events: VecDeque::new(),
            span,
            _guard: guard,
        })
    }

    /// Returns the session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Returns the current state.
    pub fn state(&self) -> SessionState {
        match self.state {
            State::NotOpen => SessionState::NotOpen,
            State::OpeningUnderlyingTransport => SessionState::OpeningUnderlyingTransport,
            State::InHandshake => SessionState::InHandshake,
            State::Open => SessionState::Open,
            State::Closing => SessionState::Closing,
            State::HandshakeFailed | State::Error => SessionState::Error,
        }
    }

    /// Starts opening the session.
    ///
    /// Creates the engine and asks the transport to open. The outcome is
    /// reported through `on_open_complete` from a later [`Session::poll`].
    pub fn open(&mut self, callbacks: OpenCallbacks) -> Result<(), Error> {
        let span = self.span.clone();
        let _enter = span.enter();
        self.check_entry_state();

        if self.state != State::NotOpen {
            return Err(Error::state("open is only valid on a session that is not open"));
        }

        let engine = self.factory.create(&self.engine_config()?).map_err(|err| {
            error!("unable to create the tls engine: {}", err);
            Error::from(err)
        })?;
        self.ctx = Some(EngineContext {
            engine,
            bridge: TransportBridge::new(),
        });

        self.pending_open = Some(callbacks.on_open_complete);
        self.on_data = Some(callbacks.on_bytes_received);
        self.on_error = Some(callbacks.on_error);
        self.state = State::OpeningUnderlyingTransport;

        if let Err(err) = self.transport.open() {
            error!("underlying transport refused to open: {}", err);
            self.ctx = None;
            self.pending_open = None;
            self.state = State::NotOpen;
            return Err(err.into());
        }

        debug!("opening underlying transport");
        Ok(())
    }

    /// Encrypts and sends `bytes`.
    ///
    /// `on_send_complete` fires once the transport finished sending the
    /// resulting ciphertext.
    pub fn send(
        &mut self,
        bytes: &[u8],
        on_send_complete: impl FnOnce(SendResult) + 'static,
    ) -> Result<(), Error> {
        let span = self.span.clone();
        let _enter = span.enter();
        self.check_entry_state();

        if self.state != State::Open {
            return Err(Error::state("send is only valid on an open session"));
        }

        let ctx = self
            .ctx
            .as_mut()
            .ok_or_else(|| Error::state("open session without an engine"))?;
        ctx.engine.encrypt(&mut ctx.bridge, bytes).map_err(|err| {
            error!("unable to encrypt: {}", err);
            Error::from(err)
        })?;

        self.flush(Some(Box::new(on_send_complete)))
    }

    /// Closes the session.
    ///
    /// An open session closes gracefully and `on_close_complete` fires once
    /// the transport closed. In every other state the session is closed
    /// immediately and `on_close_complete` never fires; an outstanding open
    /// is cancelled first.
    pub fn close(&mut self, on_close_complete: impl FnOnce() + 'static) {
        let span = self.span.clone();
        let _enter = span.enter();
        self.check_entry_state();

        if !matches!(self.state, State::Open | State::Error) {
            info!("closing from a state other than open or error");
        }

        match self.state {
            State::OpeningUnderlyingTransport | State::InHandshake => {
                self.indicate_open(OpenResult::Cancelled);
                self.force_close();
            }
            State::Open => {
                self.state = State::Closing;
                self.pending_close = Some(Box::new(on_close_complete));

                if let Err(err) = self.shutdown() {
                    warn!("graceful close failed, forcing: {}", err);
                    self.force_close();
                }
            }
            State::NotOpen => {}
            State::Closing | State::Error | State::HandshakeFailed => self.force_close(),
        }
    }

    /// Makes progress on the session.
    ///
    /// Flushes pending engine output, pumps the transport and dispatches its
    /// events. Must be called regularly while the session is not closed.
    pub fn poll(&mut self) {
        let span = self.span.clone();
        let _enter = span.enter();
        self.check_entry_state();

        if matches!(
            self.state,
            State::OpeningUnderlyingTransport | State::InHandshake | State::Open
        ) {
            if let Err(err) = self.flush(None) {
                warn!("unable to flush engine output: {}", err);
            }
        }

        if self.state != State::NotOpen {
            self.transport.poll(&mut self.events);
            while let Some(event) = self.events.pop_front() {
                self.dispatch(event);
            }
        }

        if self.state == State::HandshakeFailed {
            self.state = State::Error;
            self.force_close();
            self.indicate_open(OpenResult::Error);
            self.indicate_error();
        }
    }

    /// Sets a named option.
    ///
    /// Names not handled by the session are forwarded to the transport.
    pub fn set_option(&mut self, name: &str, value: impl Into<OptionValue>) -> Result<(), Error> {
        let span = self.span.clone();
        let _enter = span.enter();

        let value = value.into();
        let invalid = || Error::config(format!("invalid value for option {name}"));

        match name {
            OPTION_TRUSTED_CERTS => {
                let pem = value.as_str().ok_or_else(invalid)?;
                if let Some(ctx) = self.ctx.as_mut() {
                    ctx.engine.add_trusted_certs(pem)?;
                }
                self.trusted_certs.push(pem.to_string());
            }
            OPTION_X509_CERT | OPTION_X509_ECC_CERT => {
                let pem = value.as_str().ok_or_else(invalid)?;
                if self.certificate.is_some() {
                    error!("unable to set x509 options more than once");
                    return Err(Error::config("client certificate is already set"));
                }
                self.certificate = Some(pem.to_string());
            }
            OPTION_X509_PRIVATE_KEY | OPTION_X509_ECC_KEY => {
                let pem = value.as_str().ok_or_else(invalid)?;
                if self.private_key.is_some() {
                    error!("unable to set x509 options more than once");
                    return Err(Error::config("client private key is already set"));
                }
                self.private_key = Some(pem.to_string());
            }
            OPTION_TLS_VERSION => {
                if self.ctx.is_some() {
                    error!("unable to set the tls version after the engine is created");
                    return Err(Error::config("tls version is fixed once the session opens"));
                }
                self.version = TlsVersion::from_option(value.as_int().ok_or_else(invalid)?);
            }
            OPTION_TLS_VALIDATION_CALLBACK => match value {
                OptionValue::VerifyCallback(callback) => self.hook.set_callback(Some(callback)),
                _ => return Err(invalid()),
            },
            OPTION_TLS_VALIDATION_CALLBACK_DATA => match value {
                OptionValue::CallbackData(data) => self.hook.set_data(Some(data)),
                _ => return Err(invalid()),
            },
            OPTION_UNDERLYING_IO_OPTIONS => match &value {
                OptionValue::Options(bag) => {
                    let transport = &mut self.transport;
                    bag.feed(|name, value| transport.set_option(name, value))
                        .map_err(|err| {
                            error!("failed feeding options to the underlying transport");
                            Error::from(err)
                        })?;
                }
                _ => return Err(invalid()),
            },
            _ => self.transport.set_option(name, &value)?,
        }

        Ok(())
    }

    /// Returns every option set on the session, including the transport's.
    ///
    /// The bag can be replayed into another session with
    /// [`Session::set_options`].
    pub fn options(&self) -> OptionBag {
        let mut bag = OptionBag::new();

        for pem in &self.trusted_certs {
            bag.insert(OPTION_TRUSTED_CERTS, pem.clone());
        }
        if let Some(cert) = &self.certificate {
            bag.insert(OPTION_X509_CERT, cert.clone());
        }
        if let Some(key) = &self.private_key {
            bag.insert(OPTION_X509_PRIVATE_KEY, key.clone());
        }
        bag.insert(OPTION_TLS_VERSION, self.version.as_option());

        let hook = self.hook.get();
        if let Some(callback) = hook.callback {
            bag.insert(OPTION_TLS_VALIDATION_CALLBACK, OptionValue::VerifyCallback(callback));
        }
        if let Some(data) = hook.data {
            bag.insert(OPTION_TLS_VALIDATION_CALLBACK_DATA, OptionValue::CallbackData(data));
        }

        let transport = self.transport.options();
        if !transport.is_empty() {
            bag.insert(OPTION_UNDERLYING_IO_OPTIONS, transport);
        }

        bag
    }

    /// Sets every option in `bag`, stopping at the first error.
    pub fn set_options(&mut self, bag: &OptionBag) -> Result<(), Error> {
        bag.feed(|name, value| self.set_option(name, value.clone()))
    }

    fn check_entry_state(&self) {
        debug_assert_ne!(
            self.state,
            State::HandshakeFailed,
            "handshake failure must be resolved within poll"
        );
    }

    fn engine_config(&self) -> Result<EngineConfig, Error> {
        let identity = match (&self.certificate, &self.private_key) {
            (Some(certificate), Some(private_key)) => Some(Identity {
                certificate: certificate.clone(),
                private_key: private_key.clone(),
            }),
            (None, None) => None,
            _ => {
                return Err(Error::config(
                    "client certificate and private key must be set together",
                ))
            }
        };

        Ok(EngineConfig {
            server_name: self.config.host().to_string(),
            version: self.version,
            trusted_certs: self.trusted_certs.clone(),
            identity,
            verify_hook: self.hook.clone(),
        })
    }

    fn dispatch(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::OpenComplete(result) => self.on_open_complete(result.is_ok()),
            TransportEvent::BytesReceived(bytes) => self.on_bytes_received(&bytes),
            TransportEvent::SendComplete { token, result } => {
                let result = match result {
                    Ok(()) => SendResult::Ok,
                    Err(err) => {
                        warn!("transport failed to send: {}", err);
                        SendResult::Error
                    }
                };
                self.on_send_complete(token, result);
            }
            TransportEvent::CloseComplete => self.on_close_complete(),
            TransportEvent::Error(err) => {
                warn!("underlying transport error: {}", err);
                self.on_transport_error();
            }
        }
    }

    fn on_open_complete(&mut self, ok: bool) {
        if self.state != State::OpeningUnderlyingTransport {
            debug!("ignoring open completion in state {:?}", self.state);
            return;
        }

        if ok {
            debug!("underlying transport open, starting handshake");
            self.state = State::InHandshake;
            self.handshake_step();
        } else {
            error!("underlying transport failed to open");
            self.ctx = None;
            self.state = State::NotOpen;
            self.indicate_open(OpenResult::Error);
        }
    }

    fn on_bytes_received(&mut self, bytes: &[u8]) {
        match self.state {
            State::InHandshake => {
                if let Some(ctx) = self.ctx.as_mut() {
                    ctx.bridge.feed_inbound(bytes);
                }
                self.handshake_step();
            }
            State::Open => {
                if let Some(ctx) = self.ctx.as_mut() {
                    ctx.bridge.feed_inbound(bytes);
                }
                self.decode();
            }
            state => debug!("dropping {} received bytes in state {:?}", bytes.len(), state),
        }
    }

    fn on_send_complete(&mut self, token: SendToken, result: SendResult) {
        if let Some(pos) = self.sends.iter().position(|send| send.token == token) {
            if let Some(send) = self.sends.remove(pos) {
                (send.callback)(result);
            }
        }
    }

    fn on_close_complete(&mut self) {
        match self.state {
            State::Closing => {
                debug!("close complete");
                self.ctx = None;
                self.state = State::NotOpen;
                if let Some(on_close_complete) = self.pending_close.take() {
                    on_close_complete();
                }
            }
            State::OpeningUnderlyingTransport | State::InHandshake => {
                error!("underlying transport closed while opening");
                self.ctx = None;
                self.state = State::NotOpen;
                self.indicate_open(OpenResult::Error);
            }
            state => debug!("ignoring close completion in state {:?}", state),
        }
    }

    fn on_transport_error(&mut self) {
        match self.state {
            State::OpeningUnderlyingTransport | State::InHandshake => {
                self.force_close();
                self.indicate_open(OpenResult::Error);
            }
            State::Open => {
                self.state = State::Error;
                self.indicate_error();
            }
            State::Closing => {
                // No close completion follows a transport failure.
                warn!("transport failed while closing");
                let on_close_complete = self.pending_close.take();
                self.force_close();
                if let Some(on_close_complete) = on_close_complete {
                    on_close_complete();
                }
            }
            _ => {}
        }
    }

    fn handshake_step(&mut self) {
        let Some(ctx) = self.ctx.as_mut() else {
            error!("handshake without an engine");
            self.state = State::HandshakeFailed;
            return;
        };

        match ctx.engine.handshake(&mut ctx.bridge) {
            Ok(HandshakeStatus::Complete) => {
                if let Err(err) = self.flush(None) {
                    error!("unable to send handshake bytes: {}", err);
                    self.state = State::HandshakeFailed;
                    return;
                }

                info!("tls handshake complete");
                self.state = State::Open;
                self.indicate_open(OpenResult::Ok);
                self.decode();
            }
            Ok(HandshakeStatus::InProgress) => {
                if let Err(err) = self.flush(None) {
                    error!("unable to send handshake bytes: {}", err);
                    self.state = State::HandshakeFailed;
                }
            }
            Err(err) => {
                error!("tls handshake failed: {}", err);
                // Deliver the alert the engine may have queued.
                if let Err(err) = self.flush(None) {
                    debug!("unable to send handshake alert: {}", err);
                }
                self.state = State::HandshakeFailed;
            }
        }
    }

    fn decode(&mut self) {
        let mut buf = [0u8; DECRYPT_CHUNK_SIZE];

        while self.state == State::Open {
            let Some(ctx) = self.ctx.as_mut() else {
                error!("tls channel closed while decoding");
                self.state = State::Error;
                self.indicate_error();
                return;
            };

            match ctx.engine.decrypt(&mut ctx.bridge, &mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if let Some(on_data) = self.on_data.as_mut() {
                        on_data(&buf[..n]);
                    }
                }
                Err(err) => {
                    error!("unable to decrypt received bytes: {}", err);
                    self.state = State::Error;
                    self.indicate_error();
                    return;
                }
            }
        }

        if let Err(err) = self.flush(None) {
            warn!("unable to flush engine output: {}", err);
        }
    }

    fn shutdown(&mut self) -> Result<(), Error> {
        if let Some(ctx) = self.ctx.as_mut() {
            ctx.engine.shutdown(&mut ctx.bridge)?;
        }
        self.flush(None)?;
        self.transport.close(CloseMode::Graceful)?;
        Ok(())
    }

    /// Hands everything the engine produced to the transport.
    ///
    /// A send with a callback is forwarded even when the engine produced
    /// nothing, so its completion keeps its place among earlier sends.
    fn flush(&mut self, callback: Option<SendCompleteFn>) -> Result<(), Error> {
        let Some(ctx) = self.ctx.as_mut() else {
            return Ok(());
        };

        let bytes = ctx.bridge.drain_outbound();
        if bytes.is_empty() && callback.is_none() {
            return Ok(());
        }

        let token = SendToken(self.next_token);
        self.next_token = self.next_token.wrapping_add(1);

        self.transport.send(bytes, token).map_err(|err| {
            error!("underlying transport refused to send: {}", err);
            Error::from(err)
        })?;

        if let Some(callback) = callback {
            self.sends.push_back(PendingSend { token, callback });
        }

        Ok(())
    }

    fn force_close(&mut self) {
        if let Err(err) = self.transport.close(CloseMode::Forced) {
            debug!("forced close of the transport failed: {}", err);
        }
        self.ctx = None;
        self.state = State::NotOpen;
        self.pending_close = None;

        for send in self.sends.drain(..) {
            (send.callback)(SendResult::Cancelled);
        }
    }

    fn indicate_open(&mut self, result: OpenResult) {
        match self.pending_open.take() {
            Some(on_open_complete) => on_open_complete(result),
            None => debug!("no open outstanding for result {:?}", result),
        }
    }

    fn indicate_error(&mut self) {
        if let Some(on_error) = self.on_error.as_mut() {
            on_error();
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.state != State::NotOpen {
            let _enter = self.span.enter();
            debug!("dropping a session that is not closed");
            let _ = self.transport.close(CloseMode::Forced);
        }
    }
}
