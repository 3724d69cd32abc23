//! PEM decoding of certificates and keys.

use rustls::{
    pki_types::{CertificateDer, PrivateKeyDer},
    RootCertStore,
};
use tlsio::{EngineError, Identity};
use tracing::debug;

/// Decodes every certificate in a PEM blob.
pub(crate) fn certificates(pem: &str) -> Result<Vec<CertificateDer<'static>>, EngineError> {
    let certs = rustls_pemfile::certs(&mut pem.as_bytes())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| EngineError::Config(format!("unable to read certificates: {err}")))?;

    if certs.is_empty() {
        return Err(EngineError::Config(
            "no certificates found in PEM input".to_string(),
        ));
    }

    Ok(certs)
}

/// Adds the certificates of a PEM blob to `roots`.
///
/// Fails if none of them could be added.
pub(crate) fn add_trusted(roots: &mut RootCertStore, pem: &str) -> Result<usize, EngineError> {
    let (added, ignored) = roots.add_parsable_certificates(certificates(pem)?);
    debug!("added {} trusted certificates, ignored {}", added, ignored);

    if added == 0 {
        return Err(EngineError::Config(
            "no usable trusted certificates in PEM input".to_string(),
        ));
    }

    Ok(added)
}

/// Decodes a client identity.
pub(crate) fn identity(
    identity: &Identity,
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>), EngineError> {
    let chain = certificates(&identity.certificate)?;
    let key = rustls_pemfile::private_key(&mut identity.private_key.as_bytes())
        .map_err(|err| EngineError::Config(format!("unable to read private key: {err}")))?
        .ok_or_else(|| EngineError::Config("no private key found in PEM input".to_string()))?;

    Ok((chain, key))
}
