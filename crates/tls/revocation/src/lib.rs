//! Certificate revocation lists for peer certificate verification.
//!
//! The [`RevocationChecker`] finds the CRLs covering a certificate: first in
//! an on-disk cache keyed by a hash of the issuer name, then at the HTTP
//! distribution points named in the certificate. Downloads are cached for
//! later sessions and expired entries are removed as they are found.

#![deny(missing_docs, unreachable_pub, unused_must_use)]
#![deny(clippy::all)]
#![forbid(unsafe_code)]

pub mod cache;
mod checker;
mod config;
mod crl;
pub mod dp;
mod error;
pub mod fetch;
mod hash;

pub use cache::{CrlCache, CrlKind, MAX_SLOTS};
pub use checker::{Clock, RevocationChecker, SystemClock};
pub use config::{
    default_cache_dir, RevocationConfig, RevocationConfigBuilder, RevocationConfigBuilderError,
    CACHE_DIR_ENV, DEFAULT_MAX_RESPONSE_LEN,
};
pub use crl::{CertInfo, Crl};
pub use error::RevocationError;
pub use fetch::{CrlFetcher, HttpFetcher};
pub use hash::{IssuerHasher, Sha256IssuerHasher};
