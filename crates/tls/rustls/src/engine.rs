//! The rustls engine.

use std::{
    io::{self, Read, Write},
    sync::Arc,
};

use parking_lot::RwLock;
use rustls::{
    client::WantsClientCert, crypto::CryptoProvider, pki_types::ServerName, version,
    ClientConfig, ClientConnection, ConfigBuilder, RootCertStore, SupportedProtocolVersion,
};
use tls_revocation::RevocationChecker;
use tlsio::{
    EngineConfig, EngineError, EngineFactory, HandshakeStatus, SecureChannelEngine, TlsVersion,
    TransportBridge,
};
use tracing::{debug, info};

use crate::{
    anchors::{MozillaRoots, TrustAnchorSource},
    pem,
    verifier::RevocationAwareVerifier,
};

static TLS12_AND_UP: &[&SupportedProtocolVersion] = &[&version::TLS13, &version::TLS12];
static TLS13_ONLY: &[&SupportedProtocolVersion] = &[&version::TLS13];

fn protocol_versions(version: TlsVersion) -> &'static [&'static SupportedProtocolVersion] {
    match version {
        TlsVersion::Tls13 => TLS13_ONLY,
        TlsVersion::Tls12 => TLS12_AND_UP,
        TlsVersion::Tls10 | TlsVersion::Tls11 => {
            info!("{:?} is not supported, requiring TLS 1.2 or later", version);
            TLS12_AND_UP
        }
    }
}

fn engine_error(err: rustls::Error) -> EngineError {
    match err {
        rustls::Error::InvalidCertificate(err) => EngineError::Certificate(format!("{err:?}")),
        rustls::Error::AlertReceived(alert) => {
            EngineError::Protocol(format!("peer sent alert {alert:?}"))
        }
        err => EngineError::Protocol(err.to_string()),
    }
}

/// Creates [`RustlsEngine`]s.
#[derive(Debug, Clone)]
pub struct RustlsEngineFactory {
    anchors: Arc<dyn TrustAnchorSource>,
    revocation: Option<RevocationChecker>,
    allow_unknown_revocation: bool,
    provider: Arc<CryptoProvider>,
}

impl Default for RustlsEngineFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl RustlsEngineFactory {
    /// Creates a factory trusting the Mozilla roots, without revocation
    /// checking.
    pub fn new() -> Self {
        Self {
            anchors: Arc::new(MozillaRoots),
            revocation: None,
            allow_unknown_revocation: true,
            provider: Arc::new(rustls::crypto::ring::default_provider()),
        }
    }

    /// Replaces the platform trust anchors.
    pub fn with_anchors(mut self, anchors: impl TrustAnchorSource + 'static) -> Self {
        self.anchors = Arc::new(anchors);
        self
    }

    /// Checks peer certificates against CRLs found by `checker`.
    pub fn with_revocation(mut self, checker: RevocationChecker) -> Self {
        self.revocation = Some(checker);
        self
    }

    /// Sets whether a certificate whose revocation status could not be
    /// determined is accepted. Defaults to `true`.
    pub fn allow_unknown_revocation(mut self, allow: bool) -> Self {
        self.allow_unknown_revocation = allow;
        self
    }

    fn client_auth(
        &self,
        builder: ConfigBuilder<ClientConfig, WantsClientCert>,
        config: &EngineConfig,
    ) -> Result<ClientConfig, EngineError> {
        match &config.identity {
            Some(identity) => {
                let (chain, key) = pem::identity(identity)?;
                builder
                    .with_client_auth_cert(chain, key)
                    .map_err(|err| EngineError::Config(format!("invalid client identity: {err}")))
            }
            None => Ok(builder.with_no_client_auth()),
        }
    }
}

impl EngineFactory for RustlsEngineFactory {
    fn create(&self, config: &EngineConfig) -> Result<Box<dyn SecureChannelEngine>, EngineError> {
        let mut roots = RootCertStore::empty();
        let anchors = self.anchors.load(&mut roots)?;
        for pem in &config.trusted_certs {
            pem::add_trusted(&mut roots, pem)?;
        }
        debug!(
            "engine trusts {} certificates, {} from the platform",
            roots.len(),
            anchors
        );
        let roots = Arc::new(RwLock::new(roots));

        let verifier = RevocationAwareVerifier::new(
            roots.clone(),
            self.provider.clone(),
            self.revocation.clone(),
            self.allow_unknown_revocation,
            config.server_name.clone(),
            config.verify_hook.clone(),
        );

        let builder = ClientConfig::builder_with_provider(self.provider.clone())
            .with_protocol_versions(protocol_versions(config.version))
            .map_err(|err| EngineError::Config(err.to_string()))?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(verifier));
        let client_config = self.client_auth(builder, config)?;

        let server_name = ServerName::try_from(config.server_name.clone())
            .map_err(|err| EngineError::Config(format!("invalid server name: {err}")))?;
        let conn =
            ClientConnection::new(Arc::new(client_config), server_name).map_err(engine_error)?;

        Ok(Box::new(RustlsEngine { conn, roots }))
    }
}

/// A client connection driven through a [`TransportBridge`].
pub struct RustlsEngine {
    conn: ClientConnection,
    roots: Arc<RwLock<RootCertStore>>,
}

impl std::fmt::Debug for RustlsEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RustlsEngine")
            .field("handshaking", &self.conn.is_handshaking())
            .finish_non_exhaustive()
    }
}

impl RustlsEngine {
    /// Reads and processes one batch of inbound records.
    ///
    /// Returns `false` if nothing was queued.
    fn read_records(&mut self, bridge: &mut TransportBridge) -> Result<bool, EngineError> {
        if bridge.pending_inbound_count() == 0 {
            return Ok(false);
        }

        match self.conn.read_tls(&mut bridge.inbound()) {
            Ok(0) => return Ok(false),
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(false),
            Err(err) => return Err(err.into()),
        }

        if let Err(err) = self.conn.process_new_packets() {
            // Queue the alert describing the failure.
            let _ = self.write_records(bridge);
            return Err(engine_error(err));
        }

        Ok(true)
    }

    fn write_records(&mut self, bridge: &mut TransportBridge) -> Result<(), EngineError> {
        while self.conn.wants_write() {
            self.conn.write_tls(&mut bridge.outbound())?;
        }
        Ok(())
    }
}

impl SecureChannelEngine for RustlsEngine {
    fn handshake(&mut self, bridge: &mut TransportBridge) -> Result<HandshakeStatus, EngineError> {
        while self.conn.is_handshaking() && self.read_records(bridge)? {}
        self.write_records(bridge)?;

        if self.conn.is_handshaking() {
            Ok(HandshakeStatus::InProgress)
        } else {
            debug!(
                "negotiated {:?} with {:?}",
                self.conn.protocol_version(),
                self.conn.negotiated_cipher_suite().map(|suite| suite.suite())
            );
            Ok(HandshakeStatus::Complete)
        }
    }

    fn decrypt(
        &mut self,
        bridge: &mut TransportBridge,
        buf: &mut [u8],
    ) -> Result<usize, EngineError> {
        loop {
            match self.conn.reader().read(buf) {
                Ok(0) if !buf.is_empty() => return Err(EngineError::Closed),
                Ok(n) => return Ok(n),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
                Err(err) => return Err(err.into()),
            }

            if !self.read_records(bridge)? {
                // Post-handshake messages such as key updates may need answers.
                self.write_records(bridge)?;
                return Ok(0);
            }
        }
    }

    fn encrypt(
        &mut self,
        bridge: &mut TransportBridge,
        plaintext: &[u8],
    ) -> Result<(), EngineError> {
        let mut rest = plaintext;
        while !rest.is_empty() {
            let n = self.conn.writer().write(rest)?;
            if n == 0 && !self.conn.wants_write() {
                return Err(EngineError::State("engine refused plaintext".to_string()));
            }
            rest = &rest[n..];
            self.write_records(bridge)?;
        }
        self.write_records(bridge)
    }

    fn shutdown(&mut self, bridge: &mut TransportBridge) -> Result<(), EngineError> {
        self.conn.send_close_notify();
        self.write_records(bridge)
    }

    fn add_trusted_certs(&mut self, pem: &str) -> Result<(), EngineError> {
        pem::add_trusted(&mut self.roots.write(), pem).map(|_| ())
    }
}
