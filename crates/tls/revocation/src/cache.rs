//! On-disk CRL cache.
//!
//! Each entry is one file named `{issuer_hash:08x}.{kind}.{slot}` holding a
//! DER encoded CRL. Issuers whose names hash to the same value share the
//! slots of one bucket.

use std::{
    fs::{self, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};

use tracing::{debug, info, warn};

use crate::{crl::Crl, error::RevocationError};

/// Number of slots per issuer hash and kind.
pub const MAX_SLOTS: usize = 10;

/// Kind of a cached CRL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrlKind {
    /// A full CRL from the CRL Distribution Points extension.
    Primary,
    /// A delta CRL from the Freshest CRL extension.
    Delta,
}

impl CrlKind {
    /// Returns the file name suffix of this kind.
    pub fn suffix(&self) -> &'static str {
        match self {
            CrlKind::Primary => "crl",
            CrlKind::Delta => "crld",
        }
    }
}

/// A directory of cached CRLs.
#[derive(Debug, Clone)]
pub struct CrlCache {
    dir: PathBuf,
}

impl CrlCache {
    /// Creates a cache rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Returns the cache directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the path of an entry.
    pub fn path(&self, hash: u32, kind: CrlKind, slot: usize) -> PathBuf {
        self.dir.join(format!("{hash:08x}.{}.{slot}", kind.suffix()))
    }

    /// Looks up a current CRL of `issuer`.
    ///
    /// Slots are probed in order until one is absent. Entries of other
    /// issuers in the same bucket are skipped; expired entries of `issuer`
    /// are deleted.
    ///
    /// Deleting an entry leaves a hole in the bucket. Entries of other
    /// issuers stored in later slots are not found until the hole is filled
    /// again, so a colliding issuer may download and store its CRL a second
    /// time meanwhile.
    pub fn lookup(&self, hash: u32, kind: CrlKind, issuer: &[u8], now: i64) -> Option<Crl> {
        for slot in 0..MAX_SLOTS {
            let path = self.path(hash, kind, slot);

            let bytes = match fs::read(&path) {
                Ok(bytes) => bytes,
                Err(err) if err.kind() == io::ErrorKind::NotFound => return None,
                Err(err) => {
                    warn!("unable to read {}: {}", path.display(), err);
                    return None;
                }
            };

            let crl = match Crl::from_bytes(&bytes) {
                Ok(crl) => crl,
                Err(err) => {
                    warn!("skipping unreadable cache entry {}: {}", path.display(), err);
                    continue;
                }
            };

            if crl.issuer() != issuer {
                debug!("issuer hash collision at {}", path.display());
                continue;
            }

            if !crl.is_current(now) {
                info!("deleting expired crl {}", path.display());
                if let Err(err) = fs::remove_file(&path) {
                    warn!("unable to delete {}: {}", path.display(), err);
                }
                continue;
            }

            debug!("crl cache hit at {}", path.display());
            return Some(crl);
        }

        None
    }

    /// Stores a CRL in the first free slot.
    ///
    /// Existing entries are never overwritten. Returns the slot used, or
    /// `None` if every slot is taken.
    pub fn store(&self, hash: u32, kind: CrlKind, crl: &Crl) -> Result<Option<usize>, RevocationError> {
        for slot in 0..MAX_SLOTS {
            let path = self.path(hash, kind, slot);

            let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => file,
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(err) => {
                    return Err(RevocationError::Cache(format!(
                        "unable to create {}: {err}",
                        path.display()
                    )))
                }
            };

            if let Err(err) = file.write_all(crl.der()).and_then(|()| file.sync_all()) {
                let _ = fs::remove_file(&path);
                return Err(RevocationError::Cache(format!(
                    "unable to write {}: {err}",
                    path.display()
                )));
            }

            debug!("cached crl at {}", path.display());
            return Ok(Some(slot));
        }

        info!("all {} cache slots for {:08x} are taken", MAX_SLOTS, hash);
        Ok(None)
    }
}
