//! Non-blocking TCP transport.

use std::{
    collections::VecDeque,
    io::{self, Read, Write},
    net::{Shutdown, SocketAddr, ToSocketAddrs},
    time::{Duration, Instant},
};

use bytes::{Buf, Bytes};
use socket2::{Domain, Protocol, Socket, TcpKeepalive, Type};
use tracing::{debug, warn};

use super::{CloseMode, SendToken, Transport, TransportError, TransportEvent};
use crate::options::{OptionBag, OptionValue};

/// Enables TCP keep-alive.
pub const OPTION_TCP_KEEPALIVE: &str = "tcp_keepalive";
/// Idle time in seconds before keep-alive probes are sent.
pub const OPTION_TCP_KEEPALIVE_TIME: &str = "tcp_keepalive_time";
/// Interval in seconds between keep-alive probes.
pub const OPTION_TCP_KEEPALIVE_INTERVAL: &str = "tcp_keepalive_interval";
/// Disables Nagle's algorithm.
pub const OPTION_TCP_NODELAY: &str = "tcp_nodelay";

/// Configuration of a [`TcpTransport`].
#[derive(derive_builder::Builder, Clone, Debug)]
#[builder(build_fn(validate = "Self::validate"))]
pub struct TcpConfig {
    /// Host name or address of the peer.
    #[builder(setter(into))]
    host: String,
    /// Port of the peer.
    port: u16,
    /// Time allowed for the connection to be established.
    #[builder(default = "Duration::from_secs(30)")]
    connect_timeout: Duration,
    /// Size of the buffer used for each read.
    #[builder(default = "16384")]
    read_chunk_size: usize,
}

impl TcpConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if matches!(&self.host, Some(host) if host.is_empty()) {
            return Err("host must not be empty".to_string());
        }
        if self.read_chunk_size == Some(0) {
            return Err("read_chunk_size must be greater than zero".to_string());
        }
        Ok(())
    }
}

impl TcpConfig {
    /// Creates a new builder for `TcpConfig`.
    pub fn builder() -> TcpConfigBuilder {
        TcpConfigBuilder::default()
    }

    /// Returns the host.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Returns the connect timeout.
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }
}

#[derive(Debug, Default, Clone)]
struct SocketOptions {
    keepalive: Option<bool>,
    keepalive_time: Option<u64>,
    keepalive_interval: Option<u64>,
    nodelay: Option<bool>,
}

impl SocketOptions {
    fn apply(&self, socket: &Socket) -> io::Result<()> {
        if let Some(nodelay) = self.nodelay {
            socket.set_nodelay(nodelay)?;
        }

        match self.keepalive {
            Some(true) => {
                let mut keepalive = TcpKeepalive::new();
                if let Some(secs) = self.keepalive_time {
                    keepalive = keepalive.with_time(Duration::from_secs(secs));
                }
                #[cfg(any(
                    target_os = "linux",
                    target_os = "android",
                    target_os = "macos",
                    windows
                ))]
                if let Some(secs) = self.keepalive_interval {
                    keepalive = keepalive.with_interval(Duration::from_secs(secs));
                }
                socket.set_tcp_keepalive(&keepalive)?;
            }
            Some(false) => socket.set_keepalive(false)?,
            None => {}
        }

        Ok(())
    }

    fn to_bag(&self) -> OptionBag {
        let mut bag = OptionBag::new();
        if let Some(v) = self.keepalive {
            bag.insert(OPTION_TCP_KEEPALIVE, v);
        }
        if let Some(v) = self.keepalive_time {
            bag.insert(OPTION_TCP_KEEPALIVE_TIME, v as i64);
        }
        if let Some(v) = self.keepalive_interval {
            bag.insert(OPTION_TCP_KEEPALIVE_INTERVAL, v as i64);
        }
        if let Some(v) = self.nodelay {
            bag.insert(OPTION_TCP_NODELAY, v);
        }
        bag
    }
}

enum Conn {
    Idle,
    Connecting { socket: Socket, started: Instant },
    Open { socket: Socket },
    Closing { socket: Socket },
}

struct QueuedSend {
    bytes: Bytes,
    token: SendToken,
}

/// A [`Transport`] over a non-blocking TCP socket.
pub struct TcpTransport {
    config: TcpConfig,
    options: SocketOptions,
    conn: Conn,
    sends: VecDeque<QueuedSend>,
    ready: VecDeque<TransportEvent>,
}

impl TcpTransport {
    /// Creates a transport; nothing happens until it is opened.
    pub fn new(config: TcpConfig) -> Self {
        Self {
            config,
            options: SocketOptions::default(),
            conn: Conn::Idle,
            sends: VecDeque::new(),
            ready: VecDeque::new(),
        }
    }

    fn resolve(&self) -> Result<SocketAddr, TransportError> {
        let target = format!("{}:{}", self.config.host, self.config.port);
        (self.config.host.as_str(), self.config.port)
            .to_socket_addrs()
            .map_err(|_| TransportError::Resolve(target.clone()))?
            .next()
            .ok_or(TransportError::Resolve(target))
    }

    fn poll_connect(&mut self, events: &mut VecDeque<TransportEvent>) {
        let Conn::Connecting { socket, started } = &self.conn else {
            return;
        };

        let outcome = match socket.take_error() {
            Ok(Some(err)) | Err(err) => Some(Err(err)),
            Ok(None) => match socket.peer_addr() {
                Ok(_) => Some(Ok(())),
                Err(err) if err.kind() == io::ErrorKind::NotConnected => {
                    if started.elapsed() >= self.config.connect_timeout {
                        Some(Err(io::ErrorKind::TimedOut.into()))
                    } else {
                        None
                    }
                }
                Err(err) => Some(Err(err)),
            },
        };

        match outcome {
            None => {}
            Some(Ok(())) => {
                if let Conn::Connecting { socket, .. } = std::mem::replace(&mut self.conn, Conn::Idle)
                {
                    debug!("connected to {}:{}", self.config.host, self.config.port);
                    self.conn = Conn::Open { socket };
                }
                events.push_back(TransportEvent::OpenComplete(Ok(())));
            }
            Some(Err(err)) => {
                debug!("connect failed: {}", err);
                self.conn = Conn::Idle;
                events.push_back(TransportEvent::OpenComplete(Err(err.into())));
            }
        }
    }

    /// Writes queued sends. Returns `false` if the connection failed.
    fn pump_writes(&mut self, events: &mut VecDeque<TransportEvent>) -> bool {
        let socket = match &mut self.conn {
            Conn::Open { socket } | Conn::Closing { socket } => socket,
            _ => return true,
        };

        while let Some(front) = self.sends.front_mut() {
            if front.bytes.is_empty() {
                let token = front.token;
                self.sends.pop_front();
                events.push_back(TransportEvent::SendComplete {
                    token,
                    result: Ok(()),
                });
                continue;
            }

            match socket.write(&front.bytes) {
                Ok(n) => front.bytes.advance(n),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => {
                    warn!("send failed: {}", err);
                    self.fail(err.into(), events);
                    return false;
                }
            }
        }

        true
    }

    fn pump_reads(&mut self, events: &mut VecDeque<TransportEvent>) {
        let Conn::Open { socket } = &mut self.conn else {
            return;
        };

        let mut buf = vec![0u8; self.config.read_chunk_size];
        loop {
            match socket.read(&mut buf) {
                Ok(0) => {
                    debug!("peer closed the connection");
                    self.fail(TransportError::Closed, events);
                    return;
                }
                Ok(n) => events.push_back(TransportEvent::BytesReceived(Bytes::copy_from_slice(
                    &buf[..n],
                ))),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => {
                    warn!("receive failed: {}", err);
                    self.fail(err.into(), events);
                    return;
                }
            }
        }
    }

    fn fail(&mut self, err: TransportError, events: &mut VecDeque<TransportEvent>) {
        self.conn = Conn::Idle;
        for send in self.sends.drain(..) {
            events.push_back(TransportEvent::SendComplete {
                token: send.token,
                result: Err(TransportError::Closed),
            });
        }
        events.push_back(TransportEvent::Error(err));
    }
}

fn connect_in_progress(err: &io::Error) -> bool {
    #[cfg(unix)]
    if err.raw_os_error() == Some(libc::EINPROGRESS) {
        return true;
    }
    err.kind() == io::ErrorKind::WouldBlock
}

impl Transport for TcpTransport {
    fn open(&mut self) -> Result<(), TransportError> {
        if !matches!(self.conn, Conn::Idle) {
            return Err(TransportError::State("already open".to_string()));
        }

        let addr = self.resolve()?;
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        self.options.apply(&socket)?;
        socket.set_nonblocking(true)?;

        match socket.connect(&addr.into()) {
            Ok(()) => {
                self.conn = Conn::Open { socket };
                self.ready.push_back(TransportEvent::OpenComplete(Ok(())));
            }
            Err(err) if connect_in_progress(&err) => {
                self.conn = Conn::Connecting {
                    socket,
                    started: Instant::now(),
                };
            }
            Err(err) => {
                self.ready
                    .push_back(TransportEvent::OpenComplete(Err(err.into())));
            }
        }

        Ok(())
    }

    fn send(&mut self, bytes: Bytes, token: SendToken) -> Result<(), TransportError> {
        if !matches!(self.conn, Conn::Open { .. }) {
            return Err(TransportError::State("send on a connection that is not open".to_string()));
        }
        self.sends.push_back(QueuedSend { bytes, token });
        Ok(())
    }

    fn close(&mut self, mode: CloseMode) -> Result<(), TransportError> {
        match mode {
            CloseMode::Forced => {
                if let Conn::Open { socket } | Conn::Closing { socket } = &self.conn {
                    let _ = socket.shutdown(Shutdown::Both);
                }
                self.conn = Conn::Idle;
                self.sends.clear();
                self.ready.clear();
                Ok(())
            }
            CloseMode::Graceful => match std::mem::replace(&mut self.conn, Conn::Idle) {
                Conn::Open { socket } => {
                    self.conn = Conn::Closing { socket };
                    Ok(())
                }
                other => {
                    self.conn = other;
                    Err(TransportError::State("graceful close requires an open connection".to_string()))
                }
            },
        }
    }

    fn poll(&mut self, events: &mut VecDeque<TransportEvent>) {
        events.extend(self.ready.drain(..));

        self.poll_connect(events);
        if !self.pump_writes(events) {
            return;
        }
        self.pump_reads(events);

        if matches!(self.conn, Conn::Closing { .. }) && self.sends.is_empty() {
            if let Conn::Closing { socket } = std::mem::replace(&mut self.conn, Conn::Idle) {
                let _ = socket.shutdown(Shutdown::Both);
            }
            events.push_back(TransportEvent::CloseComplete);
        }
    }

    fn set_option(&mut self, name: &str, value: &OptionValue) -> Result<(), TransportError> {
        let invalid = || TransportError::InvalidOption(name.to_string());
        let secs = |value: &OptionValue| {
            value
                .as_int()
                .and_then(|v| u64::try_from(v).ok())
                .ok_or_else(invalid)
        };

        match name {
            OPTION_TCP_KEEPALIVE => self.options.keepalive = Some(value.as_bool().ok_or_else(invalid)?),
            OPTION_TCP_KEEPALIVE_TIME => self.options.keepalive_time = Some(secs(value)?),
            OPTION_TCP_KEEPALIVE_INTERVAL => self.options.keepalive_interval = Some(secs(value)?),
            OPTION_TCP_NODELAY => self.options.nodelay = Some(value.as_bool().ok_or_else(invalid)?),
            _ => return Err(TransportError::UnknownOption(name.to_string())),
        }

        if let Conn::Connecting { socket, .. } | Conn::Open { socket } = &self.conn {
            self.options.apply(socket)?;
        }

        Ok(())
    }

    fn options(&self) -> OptionBag {
        self.options.to_bag()
    }
}
