//! Socket-level HTTP session for one host.
//!
//! The host rejects some well-formed clients and serves bodies that trip
//! general-purpose HTTP stacks, so requests are written and responses read
//! by hand over one kept-alive TCP connection. Transient failures retry
//! with reconnect and quadratic backoff.

mod response;

use std::collections::BTreeMap;
use std::io::Read;
use std::time::Duration;

use flate2::read::DeflateDecoder;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tracing::debug;

use crate::error::ScrapeError;

use response::read_response;

/// Connect timeout, then first-byte read timeout.
pub const DEFAULT_TIMEOUT: (Duration, Duration) =
    (Duration::from_secs(3), Duration::from_secs(14));

/// Extra attempts after the first failed request.
const READ_RETRIES: u32 = 2;

/// A reusable HTTP/1.1 connection to one `host:port`.
pub struct Session {
    host: String,
    port: u16,
    connect_timeout: Duration,
    read_timeout: Duration,
    /// Pre-rendered header block appended to every request.
    header_block: String,
    stream: Option<TcpStream>,
}

impl Session {
    pub fn new(host: &str, port: u16, headers: &BTreeMap<String, String>) -> Session {
        let mut session = Session {
            host: host.to_string(),
            port,
            connect_timeout: DEFAULT_TIMEOUT.0,
            read_timeout: DEFAULT_TIMEOUT.1,
            header_block: String::new(),
            stream: None,
        };
        session.set_headers(headers);
        session
    }

    pub fn set_timeouts(&mut self, connect: Duration, read: Duration) {
        self.connect_timeout = connect;
        self.read_timeout = read;
    }

    pub fn set_headers(&mut self, headers: &BTreeMap<String, String>) {
        let mut block = String::new();
        for (name, value) in headers {
            block.push_str(name);
            block.push(':');
            block.push_str(value);
            block.push_str("\r\n");
        }
        self.header_block = block;
    }

    /// Open (or re-open) the connection.
    pub async fn connect(&mut self) -> Result<(), ScrapeError> {
        if self.stream.is_some() {
            debug!("reconnecting to {}:{}", self.host, self.port);
            self.disconnect().await;
        }
        let stream = timeout(
            self.connect_timeout,
            TcpStream::connect((self.host.as_str(), self.port)),
        )
        .await
        .map_err(|_| ScrapeError::ConnectTimeout(format!("{}:{}", self.host, self.port)))?
        .map_err(|e| ScrapeError::ConnectTimeout(e.to_string()))?;
        self.stream = Some(stream);
        debug!("connection established to {}:{}", self.host, self.port);
        Ok(())
    }

    pub async fn disconnect(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
    }

    /// Fetch `uri` and return the inflated, decoded body.
    ///
    /// Transient host errors retry up to [`READ_RETRIES`] additional times,
    /// sleeping `attempt²` seconds and reconnecting in between. When every
    /// attempt failed with the same kind that kind is returned; mixed kinds
    /// come back as [`ScrapeError::Multiple`].
    pub async fn get(&mut self, uri: &str) -> Result<String, ScrapeError> {
        let request = format!("GET {} HTTP/1.1\r\n{}\r\n", uri, self.header_block);
        debug_assert!(request.is_ascii());
        let request = request.into_bytes();

        let mut errors: Vec<ScrapeError> = Vec::new();
        let mut retries = 0u32;
        let raw = loop {
            match self.request_once(&request).await {
                Ok(raw) => break raw,
                Err(e) if e.is_transient() => {
                    debug!(
                        "failed to request from the host {} time(s): {}",
                        retries + 1,
                        e
                    );
                    errors.push(e);
                    if retries >= READ_RETRIES {
                        return Err(ScrapeError::collapse(errors));
                    }
                    sleep(Duration::from_secs(u64::from(retries * retries))).await;
                    self.connect().await?;
                    retries += 1;
                }
                Err(e) => return Err(e),
            }
        };

        if raw.status == 404 {
            return Err(ScrapeError::PageNotFound);
        }
        if raw.status / 100 != 2 {
            return Err(ScrapeError::InvalidResponse(format!(
                "status {}",
                raw.status
            )));
        }
        inflate_and_decode(&raw.body)
    }

    async fn request_once(
        &mut self,
        request: &[u8],
    ) -> Result<response::RawResponse, ScrapeError> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| ScrapeError::ConnectionBroken("session is not connected".into()))?;
        stream
            .write_all(request)
            .await
            .map_err(|e| ScrapeError::ConnectionBroken(e.to_string()))?;
        read_response(stream, self.read_timeout).await
    }
}

/// Bodies arrive as raw DEFLATE (no zlib header). Inflate and decode UTF-8.
pub fn inflate_and_decode(raw: &[u8]) -> Result<String, ScrapeError> {
    let mut decoder = DeflateDecoder::new(raw);
    let mut text = String::new();
    decoder
        .read_to_string(&mut text)
        .map_err(|_| ScrapeError::Decode)?;
    Ok(text)
}

/// Compress text the way the host does; the inverse of
/// [`inflate_and_decode`], used by the test harness.
#[cfg(test)]
fn deflate(text: &str) -> Vec<u8> {
    use flate2::write::DeflateEncoder;
    use flate2::Compression;
    use std::io::Write;

    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(text.as_bytes()).expect("in-memory write");
    encoder.finish().expect("in-memory finish")
}
