//! Destination sinks for reconstructed comment data.

mod file;
mod sqlite;
mod stream;

pub use file::FileExporter;
pub use sqlite::SqliteExporter;
pub use stream::StreamExporter;

use anyhow::Result;
use async_trait::async_trait;

use crate::flow::CommentFlow;

/// A destination for scraped targets. `dump` calls arrive interleaved from
/// many workers; implementations must tolerate that.
#[async_trait]
pub trait Exporter: Send + Sync {
    async fn connect(&self) -> Result<()>;
    async fn disconnect(&self) -> Result<()>;
    async fn dump(&self, cid: u64, flow: &CommentFlow) -> Result<()>;
}
