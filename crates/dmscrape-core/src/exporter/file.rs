//! Save each target as XML files under a root directory.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;

use crate::document::{write_document, Comment, HeaderField};
use crate::flow::CommentFlow;

use super::Exporter;

const DEFAULT_OUT_DIR: &str = "comments";

/// Writes `{cid}.xml` per target; with history and `split`, a `{cid}/`
/// subdirectory additionally holds one `{date},{cid}.xml` per fetched
/// snapshot. Rendering happens on the async task, disk writes are offloaded
/// to the blocking pool.
pub struct FileExporter {
    home: PathBuf,
    split: bool,
}

impl FileExporter {
    /// `join` merges all history into the single output document instead of
    /// splitting per snapshot.
    pub fn new(path: Option<&Path>, join: bool) -> FileExporter {
        FileExporter {
            home: path.unwrap_or(Path::new(DEFAULT_OUT_DIR)).to_path_buf(),
            split: !join,
        }
    }

    fn render<'a>(
        headers: impl IntoIterator<Item = &'a HeaderField>,
        comments: Vec<&'a Comment>,
    ) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        write_document(&mut out, headers, comments)?;
        Ok(out)
    }

    /// Lay out everything to write for one target.
    fn plan(&self, cid: u64, flow: &CommentFlow) -> Result<Vec<(PathBuf, Vec<u8>)>> {
        let mut files = Vec::new();
        if !flow.has_history() {
            let (headers, comments) = flow.latest();
            files.push((self.home.join(format!("{cid}.xml")), Self::render(headers, comments)?));
        } else if flow.can_split() && self.split {
            let dir = self.home.join(cid.to_string());
            for (date, doc) in flow.histories() {
                files.push((
                    dir.join(format!("{date},{cid}.xml")),
                    Self::render(&doc.headers, doc.comments.iter().collect())?,
                ));
            }
            let (headers, comments) = flow.latest();
            files.push((dir.join(format!("{cid}.xml")), Self::render(headers, comments)?));
        } else {
            let (headers, comments) = flow.document();
            files.push((self.home.join(format!("{cid}.xml")), Self::render(headers, comments)?));
        }
        Ok(files)
    }
}

#[async_trait]
impl Exporter for FileExporter {
    async fn connect(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.home)
            .await
            .with_context(|| format!("failed to create {}", self.home.display()))
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    async fn dump(&self, cid: u64, flow: &CommentFlow) -> Result<()> {
        let files = self.plan(cid, flow)?;
        tokio::task::spawn_blocking(move || -> Result<()> {
            for (path, data) in files {
                debug!("writing to {}", path.display());
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(&path, data)
                    .with_context(|| format!("failed to save {}", path.display()))?;
            }
            Ok(())
        })
        .await
        .context("file write task failed")?
    }
}
