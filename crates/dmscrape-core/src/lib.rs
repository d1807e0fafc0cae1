//! Core engine of dmscrape: reconstructs the full comment history of
//! danmaku pools with the minimum number of requests and hands the result
//! to a pluggable exporter.

pub mod config;
pub mod logging;

pub mod company;
pub mod controller;
pub mod distributor;
pub mod document;
pub mod error;
pub mod exporter;
pub mod fetcher;
pub mod flow;
pub mod latch;
pub mod scavenger;
pub mod scraper;
pub mod session;
pub mod worker;

pub use error::ScrapeError;
pub use exporter::{Exporter, FileExporter, SqliteExporter, StreamExporter};
pub use flow::CommentFlow;
pub use scraper::{get, Scraper};
