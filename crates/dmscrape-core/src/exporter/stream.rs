//! Serialize each target to a text stream.

use std::io::Write;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::document::write_document;
use crate::flow::CommentFlow;

use super::Exporter;

/// Writes each dumped target as one XML document followed by a separator.
/// The default sink is stdout.
pub struct StreamExporter {
    stream: Mutex<Box<dyn Write + Send>>,
    end: String,
}

impl StreamExporter {
    pub fn new(stream: Box<dyn Write + Send>, end: &str) -> StreamExporter {
        StreamExporter {
            stream: Mutex::new(stream),
            end: end.to_string(),
        }
    }

    pub fn stdout() -> StreamExporter {
        StreamExporter::new(Box::new(std::io::stdout()), "\n")
    }

    /// Collect output into a shared buffer; used by the one-shot API.
    pub fn buffered(buffer: Arc<Mutex<Vec<u8>>>) -> StreamExporter {
        StreamExporter::new(Box::new(SharedBuffer(buffer)), "")
    }
}

struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[async_trait]
impl Exporter for StreamExporter {
    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.stream
            .lock()
            .unwrap()
            .flush()
            .context("failed to flush the stream")
    }

    async fn dump(&self, _cid: u64, flow: &CommentFlow) -> Result<()> {
        let (headers, comments) = if flow.has_history() {
            flow.document()
        } else {
            flow.latest()
        };
        let mut stream = self.stream.lock().unwrap();
        write_document(&mut *stream, headers, comments)
            .and_then(|()| stream.write_all(self.end.as_bytes()))
            .context("failed to write to the stream")
    }
}
