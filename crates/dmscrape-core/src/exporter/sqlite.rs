//! Column-wise insert of comment attributes into SQLite.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Sqlite};
use tokio::sync::Mutex;

use crate::flow::CommentFlow;

use super::Exporter;

/// Inserts the merged view of each target, one row per comment keyed by
/// `(cid, id)`. Re-scraping a target upserts.
pub struct SqliteExporter {
    uri: String,
    pool: Mutex<Option<Pool<Sqlite>>>,
}

impl SqliteExporter {
    /// `uri` is a sqlx SQLite URI, e.g. `sqlite://comments.db?mode=rwc`.
    pub fn new(uri: &str) -> SqliteExporter {
        SqliteExporter {
            uri: uri.to_string(),
            pool: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Exporter for SqliteExporter {
    async fn connect(&self) -> Result<()> {
        // A single connection: inserts are small and serialized anyway, and
        // an in-memory database would otherwise hand each pooled connection
        // its own empty store.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(&self.uri)
            .await
            .with_context(|| format!("failed to open {}", self.uri))?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS comment (
                cid INTEGER NOT NULL,
                id INTEGER NOT NULL,
                "offset" REAL NOT NULL,
                mode INTEGER NOT NULL,
                font_size INTEGER NOT NULL,
                color INTEGER NOT NULL,
                date INTEGER NOT NULL,
                pool INTEGER NOT NULL,
                user TEXT NOT NULL,
                content TEXT NOT NULL,
                PRIMARY KEY (cid, id)
            );
            "#,
        )
        .execute(&pool)
        .await?;
        *self.pool.lock().await = Some(pool);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        if let Some(pool) = self.pool.lock().await.take() {
            pool.close().await;
        }
        Ok(())
    }

    async fn dump(&self, cid: u64, flow: &CommentFlow) -> Result<()> {
        let guard = self.pool.lock().await;
        let pool = guard
            .as_ref()
            .context("database exporter is not connected")?;
        let (_, comments) = flow.document();
        let mut tx = pool.begin().await?;
        for c in comments {
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO comment (
                    cid, id, "offset", mode, font_size, color, date, pool, user, content
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                "#,
            )
            .bind(cid as i64)
            .bind(c.id as i64)
            .bind(c.offset)
            .bind(c.mode)
            .bind(c.font_size)
            .bind(c.color)
            .bind(c.date)
            .bind(c.pool)
            .bind(&c.user)
            .bind(&c.text)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
