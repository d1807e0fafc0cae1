//! The driver: wires the distributor, scavenger, company and exporter, and
//! runs the scrape to completion.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use tracing::info;

use crate::company::{Company, CompanyConfig, Report};
use crate::controller::{ControllerConfig, FrequencyController};
use crate::distributor::{Distributor, Targets};
use crate::error::ScrapeError;
use crate::exporter::{Exporter, StreamExporter};
use crate::fetcher::FetcherConfig;
use crate::scavenger::Scavenger;
use crate::worker::TimeRange;

/// Cap on simultaneous connections to the host.
pub const MAX_WORKERS: usize = 24;

/// Targets are positive integers.
pub fn validate_id(id: u64) -> Result<(), ScrapeError> {
    if id == 0 {
        return Err(ScrapeError::InvalidTarget(id));
    }
    Ok(())
}

pub struct Scraper {
    exporter: Arc<dyn Exporter>,
    history: bool,
    time_range: TimeRange,
    max_workers: usize,
    fetcher: FetcherConfig,
    controller: ControllerConfig,
    individual: Vec<u64>,
    batches: Vec<Targets>,
    company: Mutex<Option<Arc<Company>>>,
}

impl Scraper {
    /// `time_range` bounds are inclusive unix seconds; either may be open.
    pub fn new(
        exporter: Arc<dyn Exporter>,
        history: bool,
        time_range: (Option<i64>, Option<i64>),
        max_workers: usize,
    ) -> Result<Scraper> {
        if max_workers == 0 || max_workers > MAX_WORKERS {
            bail!("number of workers is not in range [1, {MAX_WORKERS}]");
        }
        let range = TimeRange::new(time_range.0, time_range.1);
        if range.start > range.end {
            bail!(
                "({:?}, {:?}) is not a valid time range",
                time_range.0,
                time_range.1
            );
        }
        Ok(Scraper {
            exporter,
            history,
            time_range: range,
            max_workers,
            fetcher: FetcherConfig::default(),
            controller: ControllerConfig::default(),
            individual: Vec::new(),
            batches: Vec::new(),
            company: Mutex::new(None),
        })
    }

    /// Override where and how to fetch; mainly for tests and mirrors.
    pub fn with_fetcher_config(mut self, fetcher: FetcherConfig) -> Scraper {
        self.fetcher = fetcher;
        self
    }

    pub fn with_controller_config(mut self, controller: ControllerConfig) -> Scraper {
        self.controller = controller;
        self
    }

    /// Add a single target.
    pub fn add(&mut self, cid: u64) -> Result<&mut Scraper> {
        validate_id(cid)?;
        self.individual.push(cid);
        Ok(self)
    }

    /// Add an inclusive range of targets.
    pub fn add_range(&mut self, first: u64, last: u64) -> Result<&mut Scraper> {
        if first == 0 || last < first {
            bail!("not a valid range: {first} - {last}");
        }
        self.batches.push(Targets::range(first, last));
        Ok(self)
    }

    /// Add an explicit list of targets.
    pub fn add_list(&mut self, cids: Vec<u64>) -> Result<&mut Scraper> {
        for &cid in &cids {
            validate_id(cid)?;
        }
        self.batches.push(Targets::list(cids));
        Ok(self)
    }

    /// Add targets from an iterator whose length may be unknown. Invalid
    /// ids surface when claimed, not here.
    pub fn add_iter(&mut self, it: impl Iterator<Item = u64> + Send + 'static) -> &mut Scraper {
        self.batches.push(Targets::iter(it));
        self
    }

    /// Scrape everything registered. Ctrl-C closes the pool, waits for an
    /// orderly drain, and reports before the interruption error surfaces.
    pub async fn run(&mut self) -> Result<()> {
        let started = Instant::now();

        let scavenger = Arc::new(Scavenger::new());
        let distributor = Arc::new(Distributor::new());
        let controller = Arc::new(
            FrequencyController::new(self.controller.clone())
                .context("invalid frequency controller configuration")?,
        );
        let company = Company::new(
            CompanyConfig {
                max_workers: self.max_workers,
                history: self.history,
                time_range: self.time_range,
                fetcher: self.fetcher.clone(),
            },
            distributor,
            scavenger,
            Arc::clone(&self.exporter),
            controller,
        );

        let mut batches = std::mem::take(&mut self.batches);
        batches.push(Targets::list(std::mem::take(&mut self.individual)));
        company.post_list(batches);
        company.set();
        if company.get_total() == Some(0) {
            info!("no targets assigned");
            return Ok(());
        }
        *self.company.lock().unwrap() = Some(Arc::clone(&company));

        self.exporter
            .connect()
            .await
            .context("failed to connect the exporter")?;

        let mut run = tokio::spawn(Arc::clone(&company).run());
        let (report, interrupted) = tokio::select! {
            report = &mut run => (report.context("company task failed")?, false),
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, closing the pool");
                company.close();
                let report = run.await.context("company task failed")?;
                (report, true)
            }
        };

        self.exporter
            .disconnect()
            .await
            .context("failed to disconnect the exporter")?;

        log_report(&report, started);
        if interrupted {
            bail!("interrupted");
        }
        Ok(())
    }

    /// Close the running company, if any.
    pub fn close(&self) {
        if let Some(company) = self.company.lock().unwrap().as_ref() {
            company.close();
        }
    }
}

fn log_report(report: &Report, started: Instant) {
    let secs = started.elapsed().as_secs();
    info!(
        "Report\n{report}\n-----\nOverall\nFinished in: {}:{:02}:{:02}\n======",
        secs / 3600,
        secs / 60 % 60,
        secs % 60
    );
}

/// One-shot helper: scrape a single pool into an XML string.
pub async fn get(cid: u64, history: bool) -> Result<String> {
    let buffer = Arc::new(Mutex::new(Vec::new()));
    let exporter = Arc::new(StreamExporter::buffered(Arc::clone(&buffer)));
    let mut scraper = Scraper::new(exporter, history, (None, None), 1)?;
    scraper.add(cid)?;
    scraper.run().await?;
    let bytes = buffer.lock().unwrap().clone();
    String::from_utf8(bytes).context("scraped document is not UTF-8")
}
