/// Possible revocation errors.
#[allow(missing_docs)]
#[derive(Debug, thiserror::Error)]
pub enum RevocationError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("fetch of {url} failed: {msg}")]
    Fetch { url: String, msg: String },
    #[error("http error: {0}")]
    Http(String),
    #[error("unsupported url: {0}")]
    UnsupportedUrl(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("cache error: {0}")]
    Cache(String),
}
