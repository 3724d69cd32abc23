//! Scripted engine and in-memory transport for driving sessions in tests.
//!
//! The scripted engine speaks a toy protocol: the client sends `HELLO`, the
//! server answers `WELCOME`, application data travels in records of
//! `[0x17, len_hi, len_lo, payload ^ 0x55]` and close-notify is `BYE`.

#![allow(dead_code)]

use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    io::{Read, Write},
    rc::Rc,
};

use bytes::Bytes;
use tlsio::{
    CloseMode, EngineConfig, EngineError, EngineFactory, HandshakeStatus, HookSlot, OptionBag,
    OptionValue, PeerVerification, SecureChannelEngine, SendToken, Transport, TransportBridge,
    TransportError, TransportEvent,
};

pub const CLIENT_HELLO: &[u8] = b"HELLO";
pub const SERVER_HELLO: &[u8] = b"WELCOME";
pub const CLOSE_NOTIFY: &[u8] = b"BYE";

const APP_DATA: u8 = 0x17;
const MASK: u8 = 0x55;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Encodes one application data record.
pub fn record(plaintext: &[u8]) -> Vec<u8> {
    let len = u16::try_from(plaintext.len()).unwrap();
    let mut out = vec![APP_DATA];
    out.extend_from_slice(&len.to_be_bytes());
    out.extend(plaintext.iter().map(|b| b ^ MASK));
    out
}

#[derive(Default)]
pub struct EngineLog {
    pub created: Vec<EngineConfig>,
    pub trusted: Vec<String>,
}

#[derive(Clone, Default)]
pub struct ScriptedFactory {
    pub log: Rc<RefCell<EngineLog>>,
    pub fail_create: Rc<Cell<bool>>,
}

impl EngineFactory for ScriptedFactory {
    fn create(&self, config: &EngineConfig) -> Result<Box<dyn SecureChannelEngine>, EngineError> {
        self.log.borrow_mut().created.push(config.clone());
        if self.fail_create.get() {
            return Err(EngineError::Config("engine creation disabled".to_string()));
        }

        Ok(Box::new(ScriptedEngine {
            log: self.log.clone(),
            hook: config.verify_hook.clone(),
            server_name: config.server_name.clone(),
            hello_sent: false,
            received: Vec::new(),
            plaintext: VecDeque::new(),
        }))
    }
}

pub struct ScriptedEngine {
    log: Rc<RefCell<EngineLog>>,
    hook: HookSlot,
    server_name: String,
    hello_sent: bool,
    received: Vec<u8>,
    plaintext: VecDeque<u8>,
}

impl ScriptedEngine {
    fn pull(&mut self, bridge: &mut TransportBridge) {
        let mut buf = [0u8; 256];
        while let Ok(n) = bridge.inbound().read(&mut buf) {
            self.received.extend_from_slice(&buf[..n]);
        }
    }
}

impl SecureChannelEngine for ScriptedEngine {
    fn handshake(&mut self, bridge: &mut TransportBridge) -> Result<HandshakeStatus, EngineError> {
        if !self.hello_sent {
            bridge.outbound().write_all(CLIENT_HELLO)?;
            self.hello_sent = true;
        }
        self.pull(bridge);

        let n = self.received.len().min(SERVER_HELLO.len());
        if self.received[..n] != SERVER_HELLO[..n] {
            return Err(EngineError::Protocol("unexpected handshake message".to_string()));
        }
        if n < SERVER_HELLO.len() {
            return Ok(HandshakeStatus::InProgress);
        }
        self.received.drain(..n);

        let chain: [&[u8]; 1] = [b"server certificate"];
        let peer = PeerVerification {
            server_name: &self.server_name,
            chain: &chain,
            preverified: true,
        };
        if !self.hook.verify(&peer) {
            return Err(EngineError::Certificate("rejected by verify hook".to_string()));
        }

        Ok(HandshakeStatus::Complete)
    }

    fn decrypt(
        &mut self,
        bridge: &mut TransportBridge,
        buf: &mut [u8],
    ) -> Result<usize, EngineError> {
        self.pull(bridge);

        loop {
            if !self.plaintext.is_empty() {
                let n = buf.len().min(self.plaintext.len());
                for (dst, src) in buf.iter_mut().zip(self.plaintext.drain(..n)) {
                    *dst = src;
                }
                return Ok(n);
            }

            if self.received.len() < 3 {
                return Ok(0);
            }
            if self.received[0] != APP_DATA {
                return Err(EngineError::Protocol("bad record type".to_string()));
            }
            let len = u16::from_be_bytes([self.received[1], self.received[2]]) as usize;
            if self.received.len() < 3 + len {
                return Ok(0);
            }

            let payload: Vec<u8> = self
                .received
                .drain(..3 + len)
                .skip(3)
                .map(|b| b ^ MASK)
                .collect();
            self.plaintext.extend(payload);
        }
    }

    fn encrypt(
        &mut self,
        bridge: &mut TransportBridge,
        plaintext: &[u8],
    ) -> Result<(), EngineError> {
        if plaintext.is_empty() {
            return Ok(());
        }
        bridge.outbound().write_all(&record(plaintext))?;
        Ok(())
    }

    fn shutdown(&mut self, bridge: &mut TransportBridge) -> Result<(), EngineError> {
        bridge.outbound().write_all(CLOSE_NOTIFY)?;
        Ok(())
    }

    fn add_trusted_certs(&mut self, pem: &str) -> Result<(), EngineError> {
        if pem.is_empty() {
            return Err(EngineError::Config("empty certificate".to_string()));
        }
        self.log.borrow_mut().trusted.push(pem.to_string());
        Ok(())
    }
}

pub struct TransportState {
    pub opens: usize,
    pub refuse_open: bool,
    pub refuse_graceful_close: bool,
    pub auto_complete_sends: bool,
    pub auto_complete_close: bool,
    pub sent: Vec<(SendToken, Bytes)>,
    pub closes: Vec<CloseMode>,
    pub incoming: VecDeque<TransportEvent>,
    pub options: OptionBag,
}

impl Default for TransportState {
    fn default() -> Self {
        Self {
            opens: 0,
            refuse_open: false,
            refuse_graceful_close: false,
            auto_complete_sends: true,
            auto_complete_close: true,
            sent: Vec::new(),
            closes: Vec::new(),
            incoming: VecDeque::new(),
            options: OptionBag::new(),
        }
    }
}

/// Transport whose events are injected by the test.
#[derive(Clone, Default)]
pub struct MockTransport(pub Rc<RefCell<TransportState>>);

impl MockTransport {
    pub fn push(&self, event: TransportEvent) {
        self.0.borrow_mut().incoming.push_back(event);
    }

    pub fn push_bytes(&self, bytes: &[u8]) {
        self.push(TransportEvent::BytesReceived(Bytes::copy_from_slice(bytes)));
    }

    /// Concatenation of everything sent so far.
    pub fn sent_bytes(&self) -> Vec<u8> {
        self.0
            .borrow()
            .sent
            .iter()
            .flat_map(|(_, bytes)| bytes.iter().copied())
            .collect()
    }

    pub fn closes(&self) -> Vec<CloseMode> {
        self.0.borrow().closes.clone()
    }
}

impl Transport for MockTransport {
    fn open(&mut self) -> Result<(), TransportError> {
        let mut state = self.0.borrow_mut();
        if state.refuse_open {
            return Err(TransportError::State("open refused".to_string()));
        }
        state.opens += 1;
        Ok(())
    }

    fn send(&mut self, bytes: Bytes, token: SendToken) -> Result<(), TransportError> {
        let mut state = self.0.borrow_mut();
        state.sent.push((token, bytes));
        if state.auto_complete_sends {
            state.incoming.push_back(TransportEvent::SendComplete {
                token,
                result: Ok(()),
            });
        }
        Ok(())
    }

    fn close(&mut self, mode: CloseMode) -> Result<(), TransportError> {
        let mut state = self.0.borrow_mut();
        state.closes.push(mode);
        match mode {
            CloseMode::Graceful if state.refuse_graceful_close => {
                Err(TransportError::State("graceful close refused".to_string()))
            }
            CloseMode::Graceful => {
                if state.auto_complete_close {
                    state.incoming.push_back(TransportEvent::CloseComplete);
                }
                Ok(())
            }
            CloseMode::Forced => {
                state.incoming.clear();
                Ok(())
            }
        }
    }

    fn poll(&mut self, events: &mut VecDeque<TransportEvent>) {
        events.extend(self.0.borrow_mut().incoming.drain(..));
    }

    fn set_option(&mut self, name: &str, value: &OptionValue) -> Result<(), TransportError> {
        if name.starts_with("unsupported") {
            return Err(TransportError::UnknownOption(name.to_string()));
        }
        self.0.borrow_mut().options.insert(name, value.clone());
        Ok(())
    }

    fn options(&self) -> OptionBag {
        self.0.borrow().options.clone()
    }
}
