mod common;

use std::{cell::RefCell, rc::Rc, sync::Arc};

use common::*;
use rstest::rstest;
use tlsio::{
    options::*, CallbackData, CloseMode, ErrorKind, OpenCallbacks, PeerVerification, Session,
    SessionConfig, SessionState, TlsVersion, TransportError, TransportEvent,
};

struct Harness {
    session: Session,
    transport: MockTransport,
    factory: ScriptedFactory,
    calls: Rc<RefCell<Vec<String>>>,
    data: Rc<RefCell<Vec<u8>>>,
}

impl Harness {
    fn new() -> Self {
        init_tracing();

        let transport = MockTransport::default();
        let factory = ScriptedFactory::default();
        let config = SessionConfig::builder()
            .host("example.com")
            .port(443)
            .build()
            .unwrap();
        let session = Session::new(transport.clone(), factory.clone(), config).unwrap();

        Self {
            session,
            transport,
            factory,
            calls: Rc::default(),
            data: Rc::default(),
        }
    }

    fn callbacks(&self) -> OpenCallbacks {
        let (open_calls, error_calls) = (self.calls.clone(), self.calls.clone());
        let data = self.data.clone();

        OpenCallbacks::new(
            move |result| open_calls.borrow_mut().push(format!("open:{result:?}")),
            move |bytes| data.borrow_mut().extend_from_slice(bytes),
            move || error_calls.borrow_mut().push("error".to_string()),
        )
    }

    fn open(&mut self) -> Result<(), tlsio::Error> {
        let callbacks = self.callbacks();
        self.session.open(callbacks)
    }

    /// Opens the transport and sends the client hello.
    fn start_handshake(&mut self) {
        self.open().unwrap();
        self.transport.push(TransportEvent::OpenComplete(Ok(())));
        self.session.poll();
        assert_eq!(self.session.state(), SessionState::InHandshake);
    }

    fn open_session(&mut self) {
        self.start_handshake();
        self.deliver(SERVER_HELLO);
        assert_eq!(self.session.state(), SessionState::Open);
    }

    fn deliver(&mut self, bytes: &[u8]) {
        self.transport.push_bytes(bytes);
        self.session.poll();
    }

    fn send(&mut self, bytes: &[u8]) {
        let calls = self.calls.clone();
        self.session
            .send(bytes, move |result| {
                calls.borrow_mut().push(format!("send:{result:?}"))
            })
            .unwrap();
    }

    fn close(&mut self) {
        let calls = self.calls.clone();
        self.session
            .close(move || calls.borrow_mut().push("close".to_string()));
    }

    fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }
}

#[test]
fn test_open_send_close() {
    let mut h = Harness::new();

    h.open_session();
    assert_eq!(h.transport.sent_bytes(), CLIENT_HELLO);

    h.send(b"ping");
    h.session.poll();
    h.close();
    h.session.poll();

    assert_eq!(h.calls(), ["open:Ok", "send:Ok", "close"]);
    assert_eq!(h.session.state(), SessionState::NotOpen);

    let mut expected = CLIENT_HELLO.to_vec();
    expected.extend(record(b"ping"));
    expected.extend(CLOSE_NOTIFY);
    assert_eq!(h.transport.sent_bytes(), expected);
    assert_eq!(h.transport.closes(), [CloseMode::Graceful]);
}

#[test]
fn test_open_completes_once_per_cycle() {
    let mut h = Harness::new();

    h.open_session();
    h.deliver(&record(b"data"));
    for _ in 0..3 {
        h.session.poll();
    }
    assert_eq!(h.calls(), ["open:Ok"]);

    h.close();
    h.session.poll();
    h.open_session();

    assert_eq!(h.calls(), ["open:Ok", "close", "open:Ok"]);
    assert_eq!(h.factory.log.borrow().created.len(), 2);
}

#[test]
fn test_handshake_waits_for_partial_server_hello() {
    let mut h = Harness::new();

    h.start_handshake();
    h.deliver(&SERVER_HELLO[..3]);
    assert_eq!(h.session.state(), SessionState::InHandshake);
    assert!(h.calls().is_empty());

    h.deliver(&SERVER_HELLO[3..]);
    assert_eq!(h.session.state(), SessionState::Open);
    assert_eq!(h.calls(), ["open:Ok"]);
}

#[rstest]
#[case::opening_underlying_transport(false)]
#[case::in_handshake(true)]
fn test_close_while_opening_cancels(#[case] transport_open: bool) {
    let mut h = Harness::new();

    if transport_open {
        h.start_handshake();
    } else {
        h.open().unwrap();
    }

    h.close();
    assert_eq!(h.calls(), ["open:Cancelled"]);
    assert_eq!(h.session.state(), SessionState::NotOpen);
    assert_eq!(h.transport.closes(), [CloseMode::Forced]);

    h.transport.push(TransportEvent::CloseComplete);
    h.session.poll();
    assert_eq!(h.calls(), ["open:Cancelled"]);
}

#[rstest]
#[case::byte_by_byte(1)]
#[case::small(3)]
#[case::unaligned(7)]
#[case::medium(64)]
#[case::whole(usize::MAX)]
fn test_received_data_survives_chunking(#[case] chunk: usize) {
    let mut h = Harness::new();
    h.open_session();

    let plaintext: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
    let mut ciphertext = Vec::new();
    for part in plaintext.chunks(1000) {
        ciphertext.extend(record(part));
    }

    for piece in ciphertext.chunks(chunk.min(ciphertext.len())) {
        h.deliver(piece);
    }

    assert_eq!(*h.data.borrow(), plaintext);
    assert_eq!(h.calls(), ["open:Ok"]);
}

#[test]
fn test_data_behind_handshake_is_delivered() {
    let mut h = Harness::new();
    h.start_handshake();

    let mut bytes = SERVER_HELLO.to_vec();
    bytes.extend(record(b"early"));
    h.deliver(&bytes);

    assert_eq!(h.calls(), ["open:Ok"]);
    assert_eq!(*h.data.borrow(), b"early");
}

#[test]
fn test_handshake_failure_resolves_on_poll() {
    let mut h = Harness::new();
    h.start_handshake();

    h.deliver(b"REJECTED");

    assert_eq!(h.calls(), ["open:Error", "error"]);
    assert_eq!(h.session.state(), SessionState::NotOpen);
    assert_eq!(h.transport.closes(), [CloseMode::Forced]);

    h.session.poll();
    h.session.poll();
    assert_eq!(h.calls(), ["open:Error", "error"]);
}

#[test]
fn test_transport_open_failure() {
    let mut h = Harness::new();
    h.open().unwrap();

    h.transport.push(TransportEvent::OpenComplete(Err(TransportError::Closed)));
    h.session.poll();

    assert_eq!(h.calls(), ["open:Error"]);
    assert_eq!(h.session.state(), SessionState::NotOpen);

    // The session can be opened again.
    h.open_session();
    assert_eq!(h.calls(), ["open:Error", "open:Ok"]);
}

#[test]
fn test_transport_refuses_open() {
    let mut h = Harness::new();
    h.transport.0.borrow_mut().refuse_open = true;

    let err = h.open().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert_eq!(h.session.state(), SessionState::NotOpen);

    h.session.poll();
    assert!(h.calls().is_empty());
}

#[test]
fn test_engine_creation_failure() {
    let mut h = Harness::new();
    h.factory.fail_create.set(true);

    let err = h.open().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
    assert_eq!(h.session.state(), SessionState::NotOpen);
    assert_eq!(h.transport.0.borrow().opens, 0);
    assert!(h.calls().is_empty());
}

#[test]
fn test_open_twice_is_rejected() {
    let mut h = Harness::new();
    h.open().unwrap();

    assert_eq!(h.open().unwrap_err().kind(), ErrorKind::State);
    assert_eq!(h.session.state(), SessionState::OpeningUnderlyingTransport);
}

#[test]
fn test_send_requires_open_session() {
    let mut h = Harness::new();
    let err = h.session.send(b"ping", |_| {}).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::State);

    h.start_handshake();
    let err = h.session.send(b"ping", |_| {}).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::State);
}

#[test]
fn test_decrypt_error_enters_error_state() {
    let mut h = Harness::new();
    h.open_session();

    h.deliver(&[0x15, 0x00, 0x02, 0x02, 0x28]);
    assert_eq!(h.session.state(), SessionState::Error);
    assert_eq!(h.calls(), ["open:Ok", "error"]);

    h.close();
    assert_eq!(h.session.state(), SessionState::NotOpen);
    assert_eq!(h.transport.closes(), [CloseMode::Forced]);

    h.session.poll();
    assert_eq!(h.calls(), ["open:Ok", "error"]);
}

#[test]
fn test_transport_error_while_open() {
    let mut h = Harness::new();
    h.open_session();

    h.transport.push(TransportEvent::Error(TransportError::Closed));
    h.session.poll();

    assert_eq!(h.session.state(), SessionState::Error);
    assert_eq!(h.calls(), ["open:Ok", "error"]);
}

#[test]
fn test_transport_error_while_handshaking() {
    let mut h = Harness::new();
    h.start_handshake();

    h.transport.push(TransportEvent::Error(TransportError::Closed));
    h.session.poll();

    assert_eq!(h.session.state(), SessionState::NotOpen);
    assert_eq!(h.calls(), ["open:Error"]);
}

#[test]
fn test_transport_closed_while_opening() {
    let mut h = Harness::new();
    h.open().unwrap();

    h.transport.push(TransportEvent::CloseComplete);
    h.session.poll();

    assert_eq!(h.session.state(), SessionState::NotOpen);
    assert_eq!(h.calls(), ["open:Error"]);
}

#[test]
fn test_send_completions_keep_order() {
    let mut h = Harness::new();
    h.open_session();
    h.transport.0.borrow_mut().auto_complete_sends = false;

    h.send(b"one");
    h.send(b"");
    h.send(b"three");
    assert!(h.calls().iter().all(|c| !c.starts_with("send")));

    let tokens: Vec<_> = h.transport.0.borrow().sent.iter().skip(1).map(|(t, _)| *t).collect();
    assert_eq!(tokens.len(), 3);
    for token in tokens {
        h.transport.push(TransportEvent::SendComplete {
            token,
            result: Ok(()),
        });
    }
    h.session.poll();

    assert_eq!(h.calls(), ["open:Ok", "send:Ok", "send:Ok", "send:Ok"]);
}

#[test]
fn test_failed_send_reports_error() {
    let mut h = Harness::new();
    h.open_session();
    h.transport.0.borrow_mut().auto_complete_sends = false;

    h.send(b"ping");
    let token = h.transport.0.borrow().sent.last().unwrap().0;
    h.transport.push(TransportEvent::SendComplete {
        token,
        result: Err(TransportError::Closed),
    });
    h.session.poll();

    assert_eq!(h.calls(), ["open:Ok", "send:Error"]);
}

#[test]
fn test_forced_close_cancels_outstanding_sends() {
    let mut h = Harness::new();
    h.open_session();
    {
        let mut state = h.transport.0.borrow_mut();
        state.auto_complete_sends = false;
        state.auto_complete_close = false;
    }

    h.send(b"one");
    h.send(b"two");
    h.close();
    assert_eq!(h.session.state(), SessionState::Closing);

    // A second close while closing forces the session down.
    h.close();
    assert_eq!(h.session.state(), SessionState::NotOpen);
    assert_eq!(
        h.calls(),
        ["open:Ok", "send:Cancelled", "send:Cancelled"]
    );
    assert_eq!(h.transport.closes(), [CloseMode::Graceful, CloseMode::Forced]);
}

#[test]
fn test_transport_error_while_closing_completes_close() {
    let mut h = Harness::new();
    h.open_session();
    {
        let mut state = h.transport.0.borrow_mut();
        state.auto_complete_sends = false;
        state.auto_complete_close = false;
    }

    h.send(b"late");
    h.close();
    assert_eq!(h.session.state(), SessionState::Closing);

    h.transport.push(TransportEvent::Error(TransportError::Closed));
    h.session.poll();

    assert_eq!(h.session.state(), SessionState::NotOpen);
    assert_eq!(h.calls(), ["open:Ok", "send:Cancelled", "close"]);
    assert_eq!(h.transport.closes(), [CloseMode::Graceful, CloseMode::Forced]);

    // Nothing fires twice.
    h.session.poll();
    assert_eq!(h.calls(), ["open:Ok", "send:Cancelled", "close"]);
}

#[test]
fn test_refused_graceful_close_falls_back_to_forced() {
    let mut h = Harness::new();
    h.open_session();
    h.transport.0.borrow_mut().refuse_graceful_close = true;

    h.close();
    h.session.poll();

    assert_eq!(h.session.state(), SessionState::NotOpen);
    assert_eq!(h.transport.closes(), [CloseMode::Graceful, CloseMode::Forced]);
    assert_eq!(h.calls(), ["open:Ok"]);
}

#[test]
fn test_close_when_not_open_is_silent() {
    let mut h = Harness::new();
    h.close();
    h.session.poll();

    assert!(h.calls().is_empty());
    assert!(h.transport.closes().is_empty());
}

#[test]
fn test_drop_closes_transport() {
    let mut h = Harness::new();
    h.open_session();

    let transport = h.transport.clone();
    drop(h);

    assert_eq!(transport.closes(), [CloseMode::Forced]);
}

#[test]
fn test_engine_config_carries_options() {
    let mut h = Harness::new();
    h.session.set_option(OPTION_TRUSTED_CERTS, "ca-one").unwrap();
    h.session.set_option(OPTION_X509_ECC_CERT, "cert").unwrap();
    h.session.set_option(OPTION_X509_ECC_KEY, "key").unwrap();
    h.session.set_option(OPTION_TLS_VERSION, 13).unwrap();

    h.open().unwrap();

    let log = h.factory.log.borrow();
    let config = &log.created[0];
    assert_eq!(config.server_name, "example.com");
    assert_eq!(config.version, TlsVersion::Tls13);
    assert_eq!(config.trusted_certs, ["ca-one"]);
    let identity = config.identity.as_ref().unwrap();
    assert_eq!(identity.certificate, "cert");
    assert_eq!(identity.private_key, "key");
}

#[test]
fn test_trusted_certs_apply_to_live_engine() {
    let mut h = Harness::new();
    h.session.set_option(OPTION_TRUSTED_CERTS, "ca-one").unwrap();
    h.open_session();

    h.session.set_option(OPTION_TRUSTED_CERTS, "ca-two").unwrap();
    assert_eq!(h.factory.log.borrow().trusted, ["ca-two"]);

    let err = h.session.set_option(OPTION_TRUSTED_CERTS, "").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);

    let certs: Vec<_> = h
        .session
        .options()
        .get_all(OPTION_TRUSTED_CERTS)
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect();
    assert_eq!(certs, ["ca-one", "ca-two"]);
}

#[test]
fn test_identity_is_set_once() {
    let mut h = Harness::new();
    h.session.set_option(OPTION_X509_CERT, "cert").unwrap();
    h.session.set_option(OPTION_X509_PRIVATE_KEY, "key").unwrap();

    for name in [OPTION_X509_CERT, OPTION_X509_ECC_CERT, OPTION_X509_PRIVATE_KEY, OPTION_X509_ECC_KEY] {
        let err = h.session.set_option(name, "again").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }
}

#[test]
fn test_identity_halves_must_match() {
    let mut h = Harness::new();
    h.session.set_option(OPTION_X509_CERT, "cert").unwrap();

    assert_eq!(h.open().unwrap_err().kind(), ErrorKind::Config);
    assert_eq!(h.session.state(), SessionState::NotOpen);
}

#[test]
fn test_tls_version_is_fixed_once_open() {
    let mut h = Harness::new();
    h.session.set_option(OPTION_TLS_VERSION, 12).unwrap();
    h.open().unwrap();

    let err = h.session.set_option(OPTION_TLS_VERSION, 13).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
    assert_eq!(
        h.session.options().get(OPTION_TLS_VERSION).and_then(|v| v.as_int()),
        Some(12)
    );
}

#[test]
fn test_option_value_types_are_checked() {
    let mut h = Harness::new();

    for (name, value) in [
        (OPTION_TRUSTED_CERTS, OptionValue::Int(1)),
        (OPTION_TLS_VERSION, OptionValue::from("12")),
        (OPTION_TLS_VALIDATION_CALLBACK, OptionValue::Bool(true)),
        (OPTION_TLS_VALIDATION_CALLBACK_DATA, OptionValue::Int(0)),
        (OPTION_UNDERLYING_IO_OPTIONS, OptionValue::Int(0)),
    ] {
        let err = h.session.set_option(name, value).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config, "{name}");
    }
}

#[test]
fn test_verify_hook_reregisters_on_live_engine() {
    let mut h = Harness::new();
    h.start_handshake();

    h.session
        .set_option(
            OPTION_TLS_VALIDATION_CALLBACK,
            OptionValue::VerifyCallback(Arc::new(
                |peer: &PeerVerification<'_>, data: Option<&CallbackData>| {
                    assert_eq!(peer.server_name, "example.com");
                    peer.preverified && data.and_then(|d| d.downcast_ref::<bool>()) == Some(&true)
                },
            )),
        )
        .unwrap();
    h.session
        .set_option(
            OPTION_TLS_VALIDATION_CALLBACK_DATA,
            OptionValue::CallbackData(Arc::new(false)),
        )
        .unwrap();

    h.deliver(SERVER_HELLO);
    assert_eq!(h.calls(), ["open:Error", "error"]);

    h.session
        .set_option(
            OPTION_TLS_VALIDATION_CALLBACK_DATA,
            OptionValue::CallbackData(Arc::new(true)),
        )
        .unwrap();
    h.calls.borrow_mut().clear();
    h.open_session();
    assert_eq!(h.calls(), ["open:Ok"]);
}

#[test]
fn test_unknown_options_go_to_transport() {
    let mut h = Harness::new();

    let mut nested = OptionBag::new();
    nested.insert("proxy_host", "proxy.local");
    nested.insert("proxy_port", 3128);
    h.session
        .set_option(OPTION_UNDERLYING_IO_OPTIONS, nested)
        .unwrap();
    h.session.set_option("tcp_keepalive", true).unwrap();

    let err = h.session.set_option("unsupported_option", 1).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);

    let options = h.session.options();
    let Some(OptionValue::Options(transport)) = options.get(OPTION_UNDERLYING_IO_OPTIONS) else {
        panic!("transport options missing");
    };
    let names: Vec<_> = transport.iter().map(|(name, _)| name.to_string()).collect();
    assert_eq!(names, ["proxy_host", "proxy_port", "tcp_keepalive"]);
}

#[test]
fn test_options_replay_into_new_session() {
    let mut h = Harness::new();
    h.session.set_option(OPTION_TRUSTED_CERTS, "ca-one").unwrap();
    h.session.set_option(OPTION_X509_CERT, "cert").unwrap();
    h.session.set_option(OPTION_X509_PRIVATE_KEY, "key").unwrap();
    h.session.set_option(OPTION_TLS_VERSION, 11).unwrap();
    h.session.set_option("tcp_nodelay", true).unwrap();

    let bag = h.session.options();

    let mut other = Harness::new();
    other.session.set_options(&bag).unwrap();
    other.open().unwrap();

    let log = other.factory.log.borrow();
    assert_eq!(log.created[0].version, TlsVersion::Tls11);
    assert_eq!(log.created[0].trusted_certs, ["ca-one"]);
    assert!(log.created[0].identity.is_some());
    assert!(other.transport.0.borrow().options.get("tcp_nodelay").is_some());
}
