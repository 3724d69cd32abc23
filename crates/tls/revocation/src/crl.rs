use x509_parser::{
    extensions::ParsedExtension,
    oid_registry::{OID_X509_EXT_CRL_DISTRIBUTION_POINTS, OID_X509_EXT_FRESHEST_CRL},
};

use crate::{dp, error::RevocationError};

const PEM_PREFIX: &[u8] = b"-----BEGIN";

/// A parsed certificate revocation list.
#[derive(Clone, PartialEq, Eq)]
pub struct Crl {
    der: Vec<u8>,
    issuer: Vec<u8>,
    next_update: Option<i64>,
}

impl std::fmt::Debug for Crl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Crl")
            .field("len", &self.der.len())
            .field("next_update", &self.next_update)
            .finish()
    }
}

impl Crl {
    /// Parses a DER or PEM encoded CRL.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RevocationError> {
        let trimmed = bytes.trim_ascii_start();
        if trimmed.starts_with(PEM_PREFIX) {
            let der = rustls_pemfile::crls(&mut &trimmed[..])
                .next()
                .ok_or_else(|| RevocationError::Parse("no crl in pem input".to_string()))??;
            return Self::from_der(der.to_vec());
        }

        Self::from_der(bytes.to_vec())
    }

    /// Parses a DER encoded CRL.
    pub fn from_der(der: Vec<u8>) -> Result<Self, RevocationError> {
        let (issuer, next_update) = {
            let (_, crl) = x509_parser::parse_x509_crl(&der)
                .map_err(|err| RevocationError::Parse(format!("invalid crl: {err}")))?;
            (
                crl.tbs_cert_list.issuer.as_raw().to_vec(),
                crl.next_update().map(|t| t.timestamp()),
            )
        };

        Ok(Self {
            der,
            issuer,
            next_update,
        })
    }

    /// Returns the DER encoding.
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Consumes the CRL, returning its DER encoding.
    pub fn into_der(self) -> Vec<u8> {
        self.der
    }

    /// Returns the DER encoded issuer name.
    pub fn issuer(&self) -> &[u8] {
        &self.issuer
    }

    /// Returns the next update time, in seconds since the Unix epoch.
    pub fn next_update(&self) -> Option<i64> {
        self.next_update
    }

    /// Returns `true` if the CRL may still be used at `now`.
    ///
    /// A CRL without a next update time is never considered current.
    pub fn is_current(&self, now: i64) -> bool {
        matches!(self.next_update, Some(next) if next > now)
    }
}

/// What the checker needs to know about a certificate.
#[derive(Debug, Clone)]
pub struct CertInfo {
    /// DER encoded issuer name.
    pub issuer: Vec<u8>,
    /// URLs from the CRL Distribution Points extension.
    pub crl_urls: Vec<String>,
    /// URLs from the Freshest CRL extension.
    pub delta_urls: Vec<String>,
}

impl CertInfo {
    /// Parses a DER encoded certificate.
    pub fn from_der(der: &[u8]) -> Result<Self, RevocationError> {
        let (_, cert) = x509_parser::parse_x509_certificate(der)
            .map_err(|err| RevocationError::Parse(format!("invalid certificate: {err}")))?;

        let mut info = Self {
            issuer: cert.tbs_certificate.issuer.as_raw().to_vec(),
            crl_urls: Vec::new(),
            delta_urls: Vec::new(),
        };

        for ext in cert.extensions() {
            if ext.oid == OID_X509_EXT_CRL_DISTRIBUTION_POINTS {
                match ext.parsed_extension() {
                    ParsedExtension::CRLDistributionPoints(points) => {
                        info.crl_urls.extend(dp::http_urls_of(points))
                    }
                    other => tracing::warn!("ignoring distribution points: {:?}", other),
                }
            } else if ext.oid == OID_X509_EXT_FRESHEST_CRL {
                match dp::http_urls(ext.value) {
                    Ok(urls) => info.delta_urls.extend(urls),
                    Err(err) => tracing::warn!("ignoring freshest crl points: {}", err),
                }
            }
        }

        Ok(info)
    }
}
