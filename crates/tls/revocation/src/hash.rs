//! Issuer name hashing for cache file names.

use sha2::{Digest, Sha256};

/// Maps an issuer's DER-encoded distinguished name to a 32-bit bucket.
///
/// Different issuers may share a bucket; the cache tells them apart by
/// comparing the issuer stored in each CRL.
pub trait IssuerHasher: Send + Sync {
    /// Hashes a DER-encoded issuer name.
    fn hash(&self, issuer_der: &[u8]) -> u32;
}

/// Default hasher: the first four bytes of the SHA-256 digest, big endian.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256IssuerHasher;

impl IssuerHasher for Sha256IssuerHasher {
    fn hash(&self, issuer_der: &[u8]) -> u32 {
        let digest = Sha256::digest(issuer_der);
        u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
    }
}
