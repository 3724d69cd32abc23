//! The revocation checker.

use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use tracing::{debug, instrument, warn};

use crate::{
    cache::{CrlCache, CrlKind},
    config::RevocationConfig,
    crl::{CertInfo, Crl},
    fetch::{CrlFetcher, HttpFetcher},
    hash::{IssuerHasher, Sha256IssuerHasher},
};

/// Source of the current time, in seconds since the Unix epoch.
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> i64;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }
}

/// Finds CRLs for certificates, from the disk cache or their distribution
/// points.
#[derive(Clone)]
pub struct RevocationChecker {
    cache: CrlCache,
    fetcher: Arc<dyn CrlFetcher>,
    hasher: Arc<dyn IssuerHasher>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for RevocationChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RevocationChecker")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl RevocationChecker {
    /// Creates a checker that downloads over HTTP.
    pub fn new(config: &RevocationConfig) -> Self {
        Self {
            cache: CrlCache::new(config.cache_dir().clone()),
            fetcher: Arc::new(HttpFetcher::new(config)),
            hasher: Arc::new(Sha256IssuerHasher),
            clock: Arc::new(SystemClock),
        }
    }

    /// Replaces the fetcher.
    pub fn with_fetcher(mut self, fetcher: Arc<dyn CrlFetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    /// Replaces the issuer hasher.
    pub fn with_hasher(mut self, hasher: Arc<dyn IssuerHasher>) -> Self {
        self.hasher = hasher;
        self
    }

    /// Replaces the clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Returns the cache.
    pub fn cache(&self) -> &CrlCache {
        &self.cache
    }

    /// Returns the CRLs covering a DER encoded certificate.
    ///
    /// The result holds the primary CRL followed by the delta CRL when one
    /// is available. A delta CRL is only looked for once a primary CRL was
    /// found. Failures are logged and yield fewer CRLs.
    #[instrument(level = "debug", skip_all)]
    pub fn crls_for(&self, cert_der: &[u8]) -> Vec<Crl> {
        let info = match CertInfo::from_der(cert_der) {
            Ok(info) => info,
            Err(err) => {
                warn!("unable to inspect certificate: {}", err);
                return Vec::new();
            }
        };
        let hash = self.hasher.hash(&info.issuer);
        debug!("issuer hash {:08x}", hash);

        let mut crls = Vec::new();
        let Some(primary) = self.resolve(&info, hash, CrlKind::Primary, &info.crl_urls) else {
            return crls;
        };
        crls.push(primary);

        if let Some(delta) = self.resolve(&info, hash, CrlKind::Delta, &info.delta_urls) {
            crls.push(delta);
        }

        crls
    }

    /// Returns the CRLs covering every certificate of a chain, without
    /// duplicates.
    pub fn crls_for_chain<'a>(&self, chain: impl IntoIterator<Item = &'a [u8]>) -> Vec<Crl> {
        let mut crls: Vec<Crl> = Vec::new();
        for cert in chain {
            for crl in self.crls_for(cert) {
                if !crls.contains(&crl) {
                    crls.push(crl);
                }
            }
        }
        crls
    }

    fn resolve(&self, info: &CertInfo, hash: u32, kind: CrlKind, urls: &[String]) -> Option<Crl> {
        let now = self.clock.now();
        if let Some(crl) = self.cache.lookup(hash, kind, &info.issuer, now) {
            return Some(crl);
        }

        for url in urls {
            let crl = match self.fetcher.fetch(url).and_then(|body| Crl::from_bytes(&body)) {
                Ok(crl) => crl,
                Err(err) => {
                    warn!("unable to load {} crl from {}: {}", kind.suffix(), url, err);
                    continue;
                }
            };

            if crl.issuer() != info.issuer {
                warn!("crl from {} was not issued by the certificate issuer", url);
                continue;
            }

            if let Err(err) = self.cache.store(hash, kind, &crl) {
                warn!("unable to cache crl: {}", err);
            }
            return Some(crl);
        }

        None
    }
}
