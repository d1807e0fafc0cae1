//! Incremental HTTP/1.1 response reading: status line, header scan, and
//! body framing (Content-Length, chunked, or read-to-close).

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::timeout;

use crate::error::ScrapeError;

const READ_CHUNK: usize = 16 * 1024;
const HEAD_END: &[u8] = b"\r\n\r\n";

/// A fully read response, body still compressed.
#[derive(Debug)]
pub(crate) struct RawResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    ContentLength(usize),
    Chunked,
    /// No framing header: read until the peer closes.
    ReadToClose,
}

/// Read one response from `stream`.
///
/// `first_byte_timeout` bounds the wait for the first byte only; once the
/// host starts answering, subsequent reads are not individually timed.
pub(crate) async fn read_response<S>(
    stream: &mut S,
    first_byte_timeout: Duration,
) -> Result<RawResponse, ScrapeError>
where
    S: AsyncRead + Unpin,
{
    let mut buf: Vec<u8> = Vec::with_capacity(READ_CHUNK);

    // Head: everything through the blank line.
    let head_end = loop {
        if let Some(pos) = find(&buf, HEAD_END) {
            break pos + HEAD_END.len();
        }
        let n = read_more(stream, &mut buf, first_byte_timeout).await?;
        if n == 0 {
            if buf.is_empty() {
                return Err(ScrapeError::NoResponseRead);
            }
            return Err(ScrapeError::InvalidResponse(
                "connection closed inside the response head".into(),
            ));
        }
    };

    let status = parse_status(&buf[..head_end])?;
    let framing = parse_framing(&buf[..head_end])?;
    let mut body = buf.split_off(head_end);

    match framing {
        Framing::ContentLength(len) => {
            while body.len() < len {
                let n = read_more(stream, &mut body, first_byte_timeout).await?;
                if n == 0 {
                    return Err(ScrapeError::InvalidResponse(format!(
                        "connection closed after {} of {} body bytes",
                        body.len(),
                        len
                    )));
                }
            }
            body.truncate(len);
            Ok(RawResponse { status, body })
        }
        Framing::Chunked => {
            let body = decode_chunked(stream, body, first_byte_timeout).await?;
            Ok(RawResponse { status, body })
        }
        Framing::ReadToClose => {
            loop {
                let n = read_more(stream, &mut body, first_byte_timeout).await?;
                if n == 0 {
                    break;
                }
            }
            Ok(RawResponse { status, body })
        }
    }
}

async fn read_more<S>(
    stream: &mut S,
    buf: &mut Vec<u8>,
    first_byte_timeout: Duration,
) -> Result<usize, ScrapeError>
where
    S: AsyncRead + Unpin,
{
    let mut chunk = [0u8; READ_CHUNK];
    let n = if buf.is_empty() {
        // Only the very first byte of the exchange is timed out; a host
        // that has started talking is given as long as it needs.
        match timeout(first_byte_timeout, stream.read(&mut chunk)).await {
            Ok(res) => res,
            Err(_) => return Err(ScrapeError::ReadTimeout),
        }
    } else {
        stream.read(&mut chunk).await
    }
    .map_err(|e| ScrapeError::ConnectionBroken(e.to_string()))?;
    buf.extend_from_slice(&chunk[..n]);
    Ok(n)
}

fn parse_status(head: &[u8]) -> Result<u16, ScrapeError> {
    // "HTTP/1.1 200 OK\r\n..."
    let line_end = find(head, b"\r\n").unwrap_or(head.len());
    let line = &head[..line_end];
    let mut parts = line.split(|&b| b == b' ');
    let version = parts.next().unwrap_or_default();
    if !version.starts_with(b"HTTP/1.") {
        return Err(ScrapeError::InvalidResponse(
            "response does not start with a status line".into(),
        ));
    }
    let code = parts
        .next()
        .and_then(|c| std::str::from_utf8(c).ok())
        .and_then(|c| c.parse::<u16>().ok())
        .ok_or_else(|| ScrapeError::InvalidResponse("unreadable status code".into()))?;
    Ok(code)
}

fn parse_framing(head: &[u8]) -> Result<Framing, ScrapeError> {
    for line in head.split(|&b| b == b'\n') {
        let line = trim_cr(line);
        let Some(colon) = line.iter().position(|&b| b == b':') else {
            continue;
        };
        let name = &line[..colon];
        let value = trim_spaces(&line[colon + 1..]);
        if name.eq_ignore_ascii_case(b"transfer-encoding")
            && value.eq_ignore_ascii_case(b"chunked")
        {
            return Ok(Framing::Chunked);
        }
        if name.eq_ignore_ascii_case(b"content-length") {
            let len = std::str::from_utf8(value)
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .ok_or_else(|| {
                    ScrapeError::InvalidResponse("unreadable Content-Length".into())
                })?;
            return Ok(Framing::ContentLength(len));
        }
    }
    Ok(Framing::ReadToClose)
}

/// Decode a chunked body: `{hex-len}\r\n{data}\r\n` repeated, `0`-length
/// chunk terminating. `pending` holds whatever body bytes arrived with the
/// head.
async fn decode_chunked<S>(
    stream: &mut S,
    mut pending: Vec<u8>,
    first_byte_timeout: Duration,
) -> Result<Vec<u8>, ScrapeError>
where
    S: AsyncRead + Unpin,
{
    let mut body = Vec::new();
    let mut pos = 0usize;
    loop {
        // Chunk size line.
        let line_end = loop {
            if let Some(rel) = find(&pending[pos..], b"\r\n") {
                break pos + rel;
            }
            let n = read_more(stream, &mut pending, first_byte_timeout).await?;
            if n == 0 {
                return Err(ScrapeError::InvalidResponse(
                    "connection closed inside a chunk header".into(),
                ));
            }
        };
        let size_text = std::str::from_utf8(trim_spaces(&pending[pos..line_end]))
            .map_err(|_| ScrapeError::InvalidResponse("bad chunk length".into()))?;
        let size = usize::from_str_radix(size_text, 16)
            .map_err(|_| ScrapeError::InvalidResponse(format!("bad chunk length {size_text:?}")))?;
        pos = line_end + 2;

        if size == 0 {
            // Consume the terminating CRLF so the next response on this
            // kept-alive connection starts clean. Trailer fields are not
            // expected from the host and are left unread.
            while pending.len() < pos + 2 {
                if read_more(stream, &mut pending, first_byte_timeout).await? == 0 {
                    break;
                }
            }
            return Ok(body);
        }

        while pending.len() < pos + size + 2 {
            let n = read_more(stream, &mut pending, first_byte_timeout).await?;
            if n == 0 {
                return Err(ScrapeError::InvalidResponse(
                    "connection closed inside a chunk".into(),
                ));
            }
        }
        body.extend_from_slice(&pending[pos..pos + size]);
        pos += size + 2;
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|w| w == needle)
}

fn trim_cr(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn trim_spaces(mut v: &[u8]) -> &[u8] {
    while let Some(rest) = v.strip_prefix(b" ") {
        v = rest;
    }
    while let Some(rest) = v.strip_suffix(b" ") {
        v = rest;
    }
    v
}
