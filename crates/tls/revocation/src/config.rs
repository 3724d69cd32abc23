//! Revocation checker configuration.

use std::{env, path::PathBuf, time::Duration};

/// Environment variable naming the CRL cache directory.
pub const CACHE_DIR_ENV: &str = "TLSIO_CRL_CACHE_DIR";

const TEMP_DIR_ENVS: [&str; 2] = ["TMP", "TMPDIR"];

/// Largest CRL download accepted, in bytes.
pub const DEFAULT_MAX_RESPONSE_LEN: usize = 1024 * 1024;

/// Configuration of a [`RevocationChecker`](crate::RevocationChecker).
#[derive(derive_builder::Builder, Clone, Debug)]
#[builder(build_fn(validate = "Self::validate"))]
pub struct RevocationConfig {
    /// Directory holding cached CRLs.
    #[builder(setter(into), default = "default_cache_dir()")]
    cache_dir: PathBuf,
    /// Time allowed to connect to a distribution point.
    #[builder(default = "Duration::from_secs(10)")]
    connect_timeout: Duration,
    /// Time allowed for each read from a distribution point.
    #[builder(default = "Duration::from_secs(10)")]
    read_timeout: Duration,
    /// Largest response accepted from a distribution point.
    #[builder(default = "DEFAULT_MAX_RESPONSE_LEN")]
    max_response_len: usize,
}

impl RevocationConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if self.max_response_len == Some(0) {
            return Err("max_response_len must be greater than zero".to_string());
        }
        if matches!(self.connect_timeout, Some(t) if t.is_zero()) {
            return Err("connect_timeout must be greater than zero".to_string());
        }
        Ok(())
    }
}

impl RevocationConfig {
    /// Creates a new builder for `RevocationConfig`.
    pub fn builder() -> RevocationConfigBuilder {
        RevocationConfigBuilder::default()
    }

    /// Returns the default configuration, with the cache directory taken
    /// from the environment.
    pub fn from_env() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(10),
            max_response_len: DEFAULT_MAX_RESPONSE_LEN,
        }
    }

    /// Returns the cache directory.
    pub fn cache_dir(&self) -> &PathBuf {
        &self.cache_dir
    }

    /// Returns the connect timeout.
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Returns the read timeout.
    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// Returns the largest accepted response.
    pub fn max_response_len(&self) -> usize {
        self.max_response_len
    }
}

/// Resolves the cache directory: `TLSIO_CRL_CACHE_DIR`, then `TMP`, then
/// `TMPDIR`, then the current directory.
pub fn default_cache_dir() -> PathBuf {
    resolve_cache_dir(|name| env::var_os(name))
}

fn resolve_cache_dir(lookup: impl Fn(&str) -> Option<std::ffi::OsString>) -> PathBuf {
    std::iter::once(CACHE_DIR_ENV)
        .chain(TEMP_DIR_ENVS)
        .find_map(|name| lookup(name).filter(|v| !v.is_empty()))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}
