//! CRL downloads from distribution points.

use std::{
    io::{Read, Write},
    net::{TcpStream, ToSocketAddrs},
    time::Duration,
};

use tracing::{debug, instrument};

use crate::{config::RevocationConfig, error::RevocationError};

const MAX_HEADERS: usize = 64;

/// Downloads CRLs.
pub trait CrlFetcher: Send + Sync {
    /// Fetches the raw body served at `url`.
    fn fetch(&self, url: &str) -> Result<Vec<u8>, RevocationError>;
}

/// Plain HTTP/1.0 fetcher, one blocking connection per request.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    connect_timeout: Duration,
    read_timeout: Duration,
    max_response_len: usize,
}

impl HttpFetcher {
    /// Creates a fetcher with the limits of `config`.
    pub fn new(config: &RevocationConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            read_timeout: config.read_timeout(),
            max_response_len: config.max_response_len(),
        }
    }

    fn connect(&self, url: &Url<'_>) -> Result<TcpStream, RevocationError> {
        let addrs = (url.host, url.port).to_socket_addrs()?;

        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(stream) => return Ok(stream),
                Err(err) => last_err = Some(err),
            }
        }

        Err(match last_err {
            Some(err) => err.into(),
            None => RevocationError::Http(format!("{} did not resolve", url.host)),
        })
    }
}

impl CrlFetcher for HttpFetcher {
    #[instrument(level = "debug", skip(self), err)]
    fn fetch(&self, url: &str) -> Result<Vec<u8>, RevocationError> {
        let parsed = Url::parse(url)?;

        let mut stream = self.connect(&parsed)?;
        stream.set_read_timeout(Some(self.read_timeout))?;
        stream.set_write_timeout(Some(self.read_timeout))?;

        let request = format!(
            "GET {} HTTP/1.0\r\nHost: {}\r\nAccept: */*\r\nConnection: close\r\n\r\n",
            parsed.path,
            parsed.host_header()
        );
        stream.write_all(request.as_bytes())?;

        let mut response = Vec::new();
        stream
            .take(self.max_response_len as u64 + 1)
            .read_to_end(&mut response)?;
        if response.len() > self.max_response_len {
            return Err(RevocationError::Http(format!(
                "response exceeds {} bytes",
                self.max_response_len
            )));
        }

        let body = parse_response(&response)?;
        debug!("fetched {} bytes", body.len());

        Ok(body.to_vec())
    }
}

/// Returns the body of a complete `200` response.
fn parse_response(response: &[u8]) -> Result<&[u8], RevocationError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parsed = httparse::Response::new(&mut headers);

    let offset = match parsed.parse(response) {
        Ok(httparse::Status::Complete(offset)) => offset,
        Ok(httparse::Status::Partial) => {
            return Err(RevocationError::Http("incomplete response head".to_string()))
        }
        Err(err) => return Err(RevocationError::Http(format!("malformed response: {err}"))),
    };

    match parsed.code {
        Some(200) => {}
        code => return Err(RevocationError::Http(format!("unexpected status {code:?}"))),
    }

    let body = &response[offset..];
    let content_length = parsed
        .headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case("content-length"))
        .and_then(|h| std::str::from_utf8(h.value).ok())
        .and_then(|v| v.trim().parse::<usize>().ok());

    match content_length {
        Some(len) if body.len() < len => Err(RevocationError::Http(format!(
            "body truncated: {} of {len} bytes",
            body.len()
        ))),
        Some(len) => Ok(&body[..len]),
        None => Ok(body),
    }
}

#[derive(Debug, PartialEq, Eq)]
struct Url<'a> {
    host: &'a str,
    port: u16,
    path: &'a str,
}

impl<'a> Url<'a> {
    fn parse(url: &'a str) -> Result<Self, RevocationError> {
        let unsupported = || RevocationError::UnsupportedUrl(url.to_string());

        let rest = url
            .get(..7)
            .filter(|scheme| scheme.eq_ignore_ascii_case("http://"))
            .map(|_| &url[7..])
            .ok_or_else(unsupported)?;

        let (authority, path) = match rest.find('/') {
            Some(i) => (&rest[..i], &rest[i..]),
            None => (rest, "/"),
        };

        let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
            let (host, after) = bracketed.split_once(']').ok_or_else(unsupported)?;
            match after.strip_prefix(':') {
                Some(port) => (host, port.parse().map_err(|_| unsupported())?),
                None if after.is_empty() => (host, 80),
                None => return Err(unsupported()),
            }
        } else {
            match authority.rsplit_once(':') {
                Some((host, port)) => (host, port.parse().map_err(|_| unsupported())?),
                None => (authority, 80),
            }
        };

        if host.is_empty() {
            return Err(unsupported());
        }

        Ok(Self { host, port, path })
    }

    fn host_header(&self) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.to_string()
        };
        if self.port == 80 {
            host
        } else {
            format!("{host}:{}", self.port)
        }
    }
}
