//! Minimal keep-alive HTTP/1.1 server speaking the comment host's dialect
//! for integration tests.
//!
//! Serves scripted routes with raw-DEFLATE bodies, framed either with
//! Content-Length or chunked transfer encoding; unknown URIs get a 404.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::Arc;
use std::thread;

use flate2::write::DeflateEncoder;
use flate2::Compression;

/// One scripted response body.
#[derive(Debug, Clone)]
pub enum Payload {
    /// DEFLATE body with a Content-Length header.
    Plain(String),
    /// DEFLATE body sent as a single chunk.
    Chunked(String),
}

/// Starts the server in a background thread. Returns the bound port; the
/// server runs until the process exits.
pub fn start(routes: HashMap<String, Payload>) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let routes = Arc::new(routes);
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let routes = Arc::clone(&routes);
            thread::spawn(move || handle(stream, &routes));
        }
    });
    port
}

fn handle(mut stream: std::net::TcpStream, routes: &HashMap<String, Payload>) {
    let _ = stream.set_read_timeout(Some(std::time::Duration::from_secs(5)));
    let mut pending = Vec::new();
    loop {
        // One request head per iteration; the client keeps the connection.
        let head = match read_head(&mut stream, &mut pending) {
            Some(head) => head,
            None => return,
        };
        let uri = match parse_uri(&head) {
            Some(uri) => uri,
            None => return,
        };
        let ok = match routes.get(&uri) {
            Some(Payload::Plain(text)) => {
                let body = deflate(text);
                let head = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n",
                    body.len()
                );
                stream.write_all(head.as_bytes()).is_ok() && stream.write_all(&body).is_ok()
            }
            Some(Payload::Chunked(text)) => {
                let body = deflate(text);
                let head = "HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n";
                let mut framed = format!("{:x}\r\n", body.len()).into_bytes();
                framed.extend_from_slice(&body);
                framed.extend_from_slice(b"\r\n0\r\n\r\n");
                stream.write_all(head.as_bytes()).is_ok() && stream.write_all(&framed).is_ok()
            }
            None => stream
                .write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n")
                .is_ok(),
        };
        if !ok {
            return;
        }
    }
}

/// Read until the blank line; keeps any bytes past it for the next call.
fn read_head(stream: &mut std::net::TcpStream, pending: &mut Vec<u8>) -> Option<String> {
    loop {
        if let Some(pos) = pending
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
        {
            let rest = pending.split_off(pos + 4);
            let head = String::from_utf8(std::mem::replace(pending, rest)).ok()?;
            return Some(head);
        }
        let mut buf = [0u8; 4096];
        match stream.read(&mut buf) {
            Ok(0) | Err(_) => return None,
            Ok(n) => pending.extend_from_slice(&buf[..n]),
        }
    }
}

fn parse_uri(head: &str) -> Option<String> {
    let line = head.lines().next()?;
    let mut parts = line.split_whitespace();
    let method = parts.next()?;
    if method != "GET" {
        return None;
    }
    parts.next().map(str::to_string)
}

fn deflate(text: &str) -> Vec<u8> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(text.as_bytes()).expect("in-memory write");
    encoder.finish().expect("in-memory finish")
}
