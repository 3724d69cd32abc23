//! Trust anchors a fresh engine starts with.

use std::{
    fmt, fs,
    path::{Path, PathBuf},
};

use rustls::RootCertStore;
use tlsio::EngineError;
use tracing::{debug, warn};

use crate::pem;

/// Supplies the platform trust anchors of new engines.
pub trait TrustAnchorSource: fmt::Debug + Send + Sync {
    /// Adds the anchors to `roots`, returning how many were added.
    fn load(&self, roots: &mut RootCertStore) -> Result<usize, EngineError>;
}

/// The Mozilla root program, as bundled by `webpki-roots`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MozillaRoots;

impl TrustAnchorSource for MozillaRoots {
    fn load(&self, roots: &mut RootCertStore) -> Result<usize, EngineError> {
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        Ok(webpki_roots::TLS_SERVER_ROOTS.len())
    }
}

/// No anchors at all; only certificates added through the session are
/// trusted.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAnchors;

impl TrustAnchorSource for NoAnchors {
    fn load(&self, _roots: &mut RootCertStore) -> Result<usize, EngineError> {
        Ok(0)
    }
}

/// PEM files in a directory, such as `/etc/ssl/certs`.
///
/// Files which do not hold certificates are skipped.
#[derive(Debug, Clone)]
pub struct DirectoryAnchors {
    dir: PathBuf,
}

impl DirectoryAnchors {
    /// Creates a source reading from `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Returns the directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl TrustAnchorSource for DirectoryAnchors {
    fn load(&self, roots: &mut RootCertStore) -> Result<usize, EngineError> {
        let entries = fs::read_dir(&self.dir).map_err(|err| {
            EngineError::Config(format!("unable to read {}: {err}", self.dir.display()))
        })?;

        let mut total = 0;
        for entry in entries {
            let path = match entry {
                Ok(entry) => entry.path(),
                Err(err) => {
                    warn!("unable to list {}: {}", self.dir.display(), err);
                    continue;
                }
            };
            if !path.is_file() {
                continue;
            }

            let Ok(contents) = fs::read_to_string(&path) else {
                debug!("skipping unreadable {}", path.display());
                continue;
            };
            match pem::add_trusted(roots, &contents) {
                Ok(added) => total += added,
                Err(_) => debug!("skipping {}, no certificates", path.display()),
            }
        }

        debug!("loaded {} anchors from {}", total, self.dir.display());
        Ok(total)
    }
}
