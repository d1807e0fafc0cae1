//! High-level endpoint wrappers over a [`Session`].

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::document::{escape_invalid_xml_chars, parse_comment_document, parse_roll_dates};
use crate::document::CommentDocument;
use crate::error::ScrapeError;
use crate::session::Session;

/// The comment host.
pub const HOST: &str = "comment.bilibili.com";
pub const PORT: u16 = 80;

const USER_AGENT: &str = concat!("dmscrape/", env!("CARGO_PKG_VERSION"));

/// Where the comment endpoints live and how to introduce ourselves.
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub host: String,
    pub port: u16,
    pub user_agent: String,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            host: HOST.to_string(),
            port: PORT,
            user_agent: USER_AGENT.to_string(),
            connect_timeout: crate::session::DEFAULT_TIMEOUT.0,
            read_timeout: crate::session::DEFAULT_TIMEOUT.1,
        }
    }
}

impl FetcherConfig {
    fn default_headers(&self) -> BTreeMap<String, String> {
        let mut headers = BTreeMap::new();
        headers.insert("Host".to_string(), self.host.clone());
        headers.insert("User-Agent".to_string(), self.user_agent.clone());
        headers
    }

    /// Browser-like header set, for when the host starts refusing the
    /// default one.
    pub fn backup_headers(&self) -> BTreeMap<String, String> {
        let mut headers = BTreeMap::new();
        headers.insert("Host".to_string(), self.host.clone());
        headers.insert(
            "User-Agent".to_string(),
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_10_4) AppleWebKit/600.7.12 \
             (KHTML, like Gecko) Version/8.0.7 Safari/600.7.12"
                .to_string(),
        );
        headers.insert("Referer".to_string(), "http://www.baidu.com/".to_string());
        headers.insert(
            "Accept".to_string(),
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8"
                .to_string(),
        );
        headers.insert("Accept-Encoding".to_string(), "gzip, deflate".to_string());
        headers.insert("Connection".to_string(), "keep-alive".to_string());
        headers
    }
}

/// What a worker needs from the wire: the current or a historical snapshot,
/// and the roll-date checkpoint list.
#[async_trait]
pub trait CommentSource: Send {
    async fn connect(&mut self) -> Result<(), ScrapeError>;
    async fn disconnect(&mut self);
    /// `date == 0` requests the current snapshot.
    async fn get_document(&mut self, cid: u64, date: i64) -> Result<CommentDocument, ScrapeError>;
    async fn get_roll_dates(&mut self, cid: u64) -> Result<Vec<i64>, ScrapeError>;
}

/// Fetches comment documents for CIDs. Owns its session; never share one
/// fetcher between concurrent requests.
pub struct Fetcher {
    config: FetcherConfig,
    session: Session,
}

impl Fetcher {
    pub fn new(config: FetcherConfig) -> Fetcher {
        let mut session = Session::new(&config.host, config.port, &config.default_headers());
        session.set_timeouts(config.connect_timeout, config.read_timeout);
        Fetcher { config, session }
    }

    /// Switch the session to the browser-like header set.
    pub fn use_backup_headers(&mut self) {
        self.session.set_headers(&self.config.backup_headers());
    }

    /// Raw (but escaped) XML text of a snapshot.
    pub async fn get_comments(&mut self, cid: u64, date: i64) -> Result<String, ScrapeError> {
        let uri = if date == 0 {
            format!("/{cid}.xml")
        } else {
            format!("/dmroll,{date},{cid}")
        };
        let text = self.session.get(&uri).await?;
        Ok(escape_invalid_xml_chars(&text))
    }

    /// Raw JSON text of the roll-date list.
    pub async fn get_rolldate(&mut self, cid: u64) -> Result<String, ScrapeError> {
        self.session.get(&format!("/rolldate,{cid}")).await
    }
}

#[async_trait]
impl CommentSource for Fetcher {
    async fn connect(&mut self) -> Result<(), ScrapeError> {
        self.session.connect().await
    }

    async fn disconnect(&mut self) {
        self.session.disconnect().await;
    }

    async fn get_document(&mut self, cid: u64, date: i64) -> Result<CommentDocument, ScrapeError> {
        let text = self.get_comments(cid, date).await?;
        parse_comment_document(&text)
    }

    async fn get_roll_dates(&mut self, cid: u64) -> Result<Vec<i64>, ScrapeError> {
        let text = self.get_rolldate(cid).await?;
        parse_roll_dates(&text)
    }
}
