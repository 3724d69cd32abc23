//! Server certificate verification with CRLs and the user verify hook.

use std::{fmt, sync::Arc};

use parking_lot::RwLock;
use rustls::{
    client::{
        danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
        WebPkiServerVerifier,
    },
    crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider},
    pki_types::{CertificateDer, CertificateRevocationListDer, ServerName, UnixTime},
    CertificateError, DigitallySignedStruct, Error, RootCertStore, SignatureScheme,
};
use tls_revocation::RevocationChecker;
use tlsio::{HookSlot, PeerVerification};
use tracing::{debug, info, warn};

/// Verifies the peer chain against the trusted roots and the CRLs of its
/// issuers, then lets the verify hook decide.
///
/// The roots are shared with the engine so certificates trusted on a live
/// session apply to the next verification.
pub(crate) struct RevocationAwareVerifier {
    roots: Arc<RwLock<RootCertStore>>,
    provider: Arc<CryptoProvider>,
    revocation: Option<RevocationChecker>,
    allow_unknown_revocation: bool,
    server_name: String,
    hook: HookSlot,
}

impl fmt::Debug for RevocationAwareVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RevocationAwareVerifier")
            .field("roots", &self.roots.read().len())
            .field("revocation", &self.revocation)
            .field("allow_unknown_revocation", &self.allow_unknown_revocation)
            .field("server_name", &self.server_name)
            .finish_non_exhaustive()
    }
}

impl RevocationAwareVerifier {
    pub(crate) fn new(
        roots: Arc<RwLock<RootCertStore>>,
        provider: Arc<CryptoProvider>,
        revocation: Option<RevocationChecker>,
        allow_unknown_revocation: bool,
        server_name: String,
        hook: HookSlot,
    ) -> Self {
        Self {
            roots,
            provider,
            revocation,
            allow_unknown_revocation,
            server_name,
            hook,
        }
    }

    /// Runs the built-in verification.
    fn verify_chain(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<(), Error> {
        let roots = Arc::new(self.roots.read().clone());
        if roots.is_empty() {
            return Err(Error::InvalidCertificate(CertificateError::UnknownIssuer));
        }

        let crls: Vec<CertificateRevocationListDer<'static>> = match &self.revocation {
            Some(checker) => {
                let chain = std::iter::once(end_entity)
                    .chain(intermediates)
                    .map(|cert| cert.as_ref());
                checker
                    .crls_for_chain(chain)
                    .into_iter()
                    .map(|crl| CertificateRevocationListDer::from(crl.into_der()))
                    .collect()
            }
            None => Vec::new(),
        };
        debug!("verifying peer chain with {} crls", crls.len());

        let mut builder =
            WebPkiServerVerifier::builder_with_provider(roots, self.provider.clone())
                .with_crls(crls);
        if self.allow_unknown_revocation {
            builder = builder.allow_unknown_revocation_status();
        }
        let verifier = builder
            .build()
            .map_err(|err| Error::General(format!("unable to build verifier: {err}")))?;

        verifier
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
            .map(|_| ())
    }
}

impl ServerCertVerifier for RevocationAwareVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, Error> {
        let outcome = self.verify_chain(end_entity, intermediates, server_name, ocsp_response, now);
        if let Err(err) = &outcome {
            info!("peer certificate not verified: {}", err);
        }

        let chain: Vec<&[u8]> = std::iter::once(end_entity)
            .chain(intermediates)
            .map(|cert| cert.as_ref())
            .collect();
        let peer = PeerVerification {
            server_name: &self.server_name,
            chain: &chain,
            preverified: outcome.is_ok(),
        };

        if self.hook.verify(&peer) {
            if !peer.preverified {
                warn!("verify callback accepted a peer that failed verification");
            }
            return Ok(ServerCertVerified::assertion());
        }

        Err(outcome.err().unwrap_or_else(|| {
            Error::InvalidCertificate(CertificateError::Other(rustls::OtherError(Arc::new(
                RejectedByCallback,
            ))))
        }))
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[derive(Debug)]
struct RejectedByCallback;

impl fmt::Display for RejectedByCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rejected by verify callback")
    }
}

impl std::error::Error for RejectedByCallback {}
