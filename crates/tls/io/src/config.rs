//! Session configuration.

/// Configuration of a [`Session`](crate::Session).
#[derive(derive_builder::Builder, Clone, Debug)]
#[builder(build_fn(validate = "Self::validate"))]
pub struct SessionConfig {
    /// Name of the peer, used for SNI and certificate verification.
    #[builder(setter(into))]
    host: String,
    /// Port of the peer.
    port: u16,
}

impl SessionConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if matches!(&self.host, Some(host) if host.is_empty()) {
            return Err("host must not be empty".to_string());
        }
        Ok(())
    }
}

impl SessionConfig {
    /// Creates a new builder for `SessionConfig`.
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::default()
    }

    /// Returns the peer host.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the peer port.
    pub fn port(&self) -> u16 {
        self.port
    }
}
