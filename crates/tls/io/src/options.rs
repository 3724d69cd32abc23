//! Named options of sessions and transports.

use std::fmt;

use crate::hook::{CallbackData, VerifyCallback};

/// PEM certificates to trust in addition to the platform anchors.
pub const OPTION_TRUSTED_CERTS: &str = "TrustedCerts";
/// PEM client certificate.
pub const OPTION_X509_CERT: &str = "x509certificate";
/// PEM client private key.
pub const OPTION_X509_PRIVATE_KEY: &str = "x509privatekey";
/// Alias of [`OPTION_X509_CERT`].
pub const OPTION_X509_ECC_CERT: &str = "x509EccCertificate";
/// Alias of [`OPTION_X509_PRIVATE_KEY`].
pub const OPTION_X509_ECC_KEY: &str = "x509EccAliasKey";
/// Minimum TLS version, as an integer (`10`, `11`, `12`, `13`).
pub const OPTION_TLS_VERSION: &str = "tls_version";
/// Peer verification callback.
pub const OPTION_TLS_VALIDATION_CALLBACK: &str = "tls_validation_callback";
/// Data handed to the peer verification callback.
pub const OPTION_TLS_VALIDATION_CALLBACK_DATA: &str = "tls_validation_callback_data";
/// Options forwarded to the underlying transport.
pub const OPTION_UNDERLYING_IO_OPTIONS: &str = "underlying_io_options";

/// Value of a named option.
#[derive(Clone)]
pub enum OptionValue {
    /// A string, e.g. a PEM blob.
    Str(String),
    /// An integer.
    Int(i64),
    /// A flag.
    Bool(bool),
    /// A verify callback.
    VerifyCallback(VerifyCallback),
    /// Opaque callback data.
    CallbackData(CallbackData),
    /// A nested set of options.
    Options(OptionBag),
}

impl OptionValue {
    /// Returns the string, if this is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            OptionValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer, if this is one.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            OptionValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the flag, accepting integers as C-style booleans.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            OptionValue::Bool(v) => Some(*v),
            OptionValue::Int(v) => Some(*v != 0),
            _ => None,
        }
    }
}

impl fmt::Debug for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::Str(s) => f.debug_tuple("Str").field(&s.len()).finish(),
            OptionValue::Int(v) => f.debug_tuple("Int").field(v).finish(),
            OptionValue::Bool(v) => f.debug_tuple("Bool").field(v).finish(),
            OptionValue::VerifyCallback(_) => write!(f, "VerifyCallback"),
            OptionValue::CallbackData(_) => write!(f, "CallbackData"),
            OptionValue::Options(bag) => f.debug_tuple("Options").field(bag).finish(),
        }
    }
}

impl From<&str> for OptionValue {
    fn from(value: &str) -> Self {
        OptionValue::Str(value.to_string())
    }
}

impl From<String> for OptionValue {
    fn from(value: String) -> Self {
        OptionValue::Str(value)
    }
}

impl From<i64> for OptionValue {
    fn from(value: i64) -> Self {
        OptionValue::Int(value)
    }
}

impl From<i32> for OptionValue {
    fn from(value: i32) -> Self {
        OptionValue::Int(value.into())
    }
}

impl From<bool> for OptionValue {
    fn from(value: bool) -> Self {
        OptionValue::Bool(value)
    }
}

impl From<OptionBag> for OptionValue {
    fn from(value: OptionBag) -> Self {
        OptionValue::Options(value)
    }
}

/// Ordered set of named options.
///
/// Names may repeat, e.g. several `TrustedCerts` entries; feeding the bag
/// replays them in insertion order.
#[derive(Debug, Clone, Default)]
pub struct OptionBag {
    entries: Vec<(String, OptionValue)>,
}

impl OptionBag {
    /// Creates an empty bag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an option.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<OptionValue>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Returns the first value stored under `name`.
    pub fn get(&self, name: &str) -> Option<&OptionValue> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Returns every value stored under `name`.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a OptionValue> + 'a {
        self.entries
            .iter()
            .filter(move |(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Iterates over all options in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &OptionValue)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Returns the number of options.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the bag holds no options.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Replays every option into `set`, stopping at the first error.
    pub fn feed<E>(&self, mut set: impl FnMut(&str, &OptionValue) -> Result<(), E>) -> Result<(), E> {
        for (name, value) in &self.entries {
            set(name, value)?;
        }
        Ok(())
    }
}
