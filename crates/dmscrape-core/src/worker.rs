//! One worker: claims targets, reconstructs their comment history with the
//! minimum number of requests, and hands the result to the exporter.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::debug;

use crate::document::{Comment, CommentDocument};
use crate::error::ScrapeError;
use crate::exporter::Exporter;
use crate::fetcher::CommentSource;
use crate::flow::{digest, join, pool_one_len, trim, CommentFlow, KINDS, MAX_TIMESTAMP};
use crate::scavenger::Scavenger;

/// Where a worker claims targets from: the company in production, a bare
/// distributor in tests.
#[async_trait]
pub trait TargetSource: Send + Sync {
    async fn claim(&self) -> Result<u64, ScrapeError>;
}

#[async_trait]
impl TargetSource for crate::distributor::Distributor {
    async fn claim(&self) -> Result<u64, ScrapeError> {
        crate::distributor::Distributor::claim(self).await
    }
}

/// User-requested scraping window, inclusive on both ends.
#[derive(Debug, Clone, Copy)]
pub struct TimeRange {
    pub start: i64,
    pub end: i64,
    /// Set iff the user supplied either bound.
    pub is_set: bool,
}

impl TimeRange {
    pub fn unbounded() -> TimeRange {
        TimeRange {
            start: 0,
            end: MAX_TIMESTAMP,
            is_set: false,
        }
    }

    pub fn new(start: Option<i64>, end: Option<i64>) -> TimeRange {
        if start.is_none() && end.is_none() {
            return TimeRange::unbounded();
        }
        TimeRange {
            start: start.unwrap_or(0),
            end: end.unwrap_or(MAX_TIMESTAMP),
            is_set: true,
        }
    }
}

pub struct Worker {
    fetcher: Box<dyn CommentSource>,
    source: Arc<dyn TargetSource>,
    exporter: Arc<dyn Exporter>,
    scavenger: Arc<Scavenger>,
    history: bool,
    time_range: TimeRange,
    stop: Arc<AtomicBool>,
    /// The target being processed, observed by the company to recycle the
    /// claim if this worker is cancelled.
    item: Arc<Mutex<Option<u64>>>,
}

impl Worker {
    pub fn new(
        fetcher: Box<dyn CommentSource>,
        source: Arc<dyn TargetSource>,
        exporter: Arc<dyn Exporter>,
        scavenger: Arc<Scavenger>,
        history: bool,
        time_range: TimeRange,
    ) -> Worker {
        Worker {
            fetcher,
            source,
            exporter,
            scavenger,
            history,
            time_range,
            stop: Arc::new(AtomicBool::new(false)),
            item: Arc::new(Mutex::new(None)),
        }
    }

    /// Token the company flips to ask this worker to stop after its current
    /// target.
    pub fn stop_token(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Shared slot holding the in-flight target.
    pub fn item_slot(&self) -> Arc<Mutex<Option<u64>>> {
        Arc::clone(&self.item)
    }

    /// Claim, process and export targets until stopped, the scavenger dies,
    /// or the distributor runs dry.
    pub async fn run(mut self) {
        if let Err(e) = self.fetcher.connect().await {
            self.scavenger.failure(None, &e);
            return;
        }
        while !self.stop.load(Ordering::Acquire) && !self.scavenger.is_dead() {
            let cid = match self.source.claim().await {
                Ok(cid) => cid,
                Err(ScrapeError::NoMoreItems) => break,
                Err(e) => {
                    self.scavenger.failure(None, &e);
                    continue;
                }
            };
            *self.item.lock().unwrap() = Some(cid);
            match self.process(cid).await {
                Ok(data) => {
                    *self.item.lock().unwrap() = None;
                    match self.exporter.dump(cid, &data).await {
                        Ok(()) => self.scavenger.success(),
                        Err(e) => self.scavenger.failure(
                            None,
                            &ScrapeError::Unexpected(format!("export failed: {e:#}")),
                        ),
                    }
                }
                Err(e) => {
                    let item = self.item.lock().unwrap().take();
                    self.scavenger.failure(item, &e);
                }
            }
        }
        self.stop.store(true, Ordering::Release);
        self.fetcher.disconnect().await;
    }

    /// Fetch the current snapshot plus whichever historical snapshots are
    /// needed to recover every comment, and assemble the result.
    ///
    /// Deleted comments may exist in some snapshots and not others; only
    /// those visible in a fetched snapshot are recovered. Timestamps are
    /// never compared for equality since distinct snapshots share dates.
    pub async fn process(&mut self, cid: u64) -> Result<CommentFlow, ScrapeError> {
        // The current document is always fetched, whatever the time range:
        // it carries the only complete header.
        let mut latest = self.fetcher.get_document(cid, 0).await?;
        let limit = latest.find_int("maxlimit", 1);
        let mut segments = owned_segments(&latest.comments);

        // History is worth fetching only when the current document is full
        // (older comments must have scrolled out) and the window between
        // the pool's start date and the first comment still kept is not
        // already covered.
        let mut has_history = false;
        let mut start = self.time_range.start;
        let mut end = self.time_range.end;
        if self.history && pool_one_len(&segments) >= limit.max(0) as usize {
            if let Some(first) = segments[0].first() {
                let ds = latest.find_int("ds", 0);
                start = start.max(ds);
                end = end.min(first.date);
                if start <= end {
                    has_history = true;
                }
            }
        }

        if has_history {
            let mut pools = segments.map(|segment| vec![segment]);
            let (histories, roll_dates) =
                self.scrape_history(cid, &mut pools, limit, start, end).await?;
            // Pools were filled walking backwards; joining wants earliest
            // snapshot first.
            let mut flows = pools.map(|pool| join(pool.into_iter().rev()));
            let mut roll_dates = Some(roll_dates);
            if self.time_range.is_set {
                for flow in flows.iter_mut() {
                    trim(flow, self.time_range.start, self.time_range.end);
                }
                // A trimmed result is emitted as one merged document.
                roll_dates = None;
            }
            Ok(CommentFlow::new(
                latest,
                Some(histories),
                Some(flows),
                roll_dates,
                limit,
            ))
        } else {
            if self.time_range.is_set {
                latest.retain_known_headers();
                for segment in segments.iter_mut() {
                    trim(segment, self.time_range.start, self.time_range.end);
                }
                latest.comments = segments.into_iter().flatten().collect();
            }
            Ok(CommentFlow::new(latest, None, None, None, limit))
        }
    }

    /// Walk the roll dates backwards from the latest, fetching only the
    /// snapshots that extend coverage below `end` until `start` is reached
    /// or a non-full snapshot proves nothing older exists.
    async fn scrape_history(
        &mut self,
        cid: u64,
        pools: &mut [Vec<Vec<Comment>>; KINDS],
        limit: i64,
        start: i64,
        mut end: i64,
    ) -> Result<(BTreeMap<i64, CommentDocument>, Vec<i64>), ScrapeError> {
        debug!("scraping cid: {cid}");
        let roll_dates = self.fetcher.get_roll_dates(cid).await?;
        debug!("roll dates: {roll_dates:?}");

        let mut histories = BTreeMap::new();
        for idate in (0..roll_dates.len()).rev() {
            if idate != 0 {
                if roll_dates[idate - 1] > end {
                    // The next older checkpoint still covers everything
                    // scanned so far; this one adds nothing.
                    continue;
                }
                if roll_dates[idate] < start {
                    break;
                }
            }

            let date = roll_dates[idate];
            debug!("scraping timestamp: {date}");
            let root = self.fetcher.get_document(cid, date).await?;
            let segments = owned_segments(&root.comments);
            let pool_one = pool_one_len(&segments);
            let first_normal_date = segments[0].first().map(|c| c.date);
            for (pool, segment) in pools.iter_mut().zip(segments) {
                pool.push(segment);
            }
            histories.insert(date, root);

            if pool_one < limit.max(0) as usize {
                // The snapshot was not full, so no older comments exist.
                break;
            }
            match first_normal_date {
                Some(date) => end = date,
                None => break,
            }
            if start > end {
                break;
            }
        }
        Ok((histories, roll_dates))
    }
}

fn owned_segments(cmts: &[Comment]) -> [Vec<Comment>; KINDS] {
    digest(cmts).map(<[Comment]>::to_vec)
}
