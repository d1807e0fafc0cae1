//! The worker pool: hiring, firing, progress checkpoints and rush-hour
//! downscaling.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::task::AbortHandle;
use tracing::{debug, info};

use crate::controller::FrequencyController;
use crate::distributor::{Distributor, Targets};
use crate::error::ScrapeError;
use crate::exporter::Exporter;
use crate::fetcher::{Fetcher, FetcherConfig};
use crate::latch::CountLatch;
use crate::scavenger::Scavenger;
use crate::scraper::validate_id;
use crate::worker::{TargetSource, TimeRange, Worker};

/// How often the next claim logs progress and revisits the pool size.
pub const UPDATE_INTERVAL: Duration = Duration::from_secs(60);

/// Pool floor while the host's rush window is active.
const RUSH_HOUR_WORKERS: usize = 3;

pub struct CompanyConfig {
    pub max_workers: usize,
    pub history: bool,
    pub time_range: TimeRange,
    pub fetcher: FetcherConfig,
}

struct WorkerHandle {
    stop: Arc<AtomicBool>,
    item: Arc<Mutex<Option<u64>>>,
    abort: AbortHandle,
}

/// Runs up to `max_workers` workers against one distributor and reports the
/// aggregate outcome.
pub struct Company {
    weak: Weak<Company>,
    config: CompanyConfig,
    distributor: Arc<Distributor>,
    scavenger: Arc<Scavenger>,
    exporter: Arc<dyn Exporter>,
    controller: Arc<FrequencyController>,
    latch: CountLatch,
    workers: Mutex<HashMap<u64, WorkerHandle>>,
    next_worker: AtomicU64,
    closed: AtomicBool,
    checkpoint: AtomicBool,
    started: Instant,
}

impl Company {
    pub fn new(
        config: CompanyConfig,
        distributor: Arc<Distributor>,
        scavenger: Arc<Scavenger>,
        exporter: Arc<dyn Exporter>,
        controller: Arc<FrequencyController>,
    ) -> Arc<Company> {
        Arc::new_cyclic(|weak| Company {
            weak: weak.clone(),
            config,
            distributor,
            scavenger,
            exporter,
            controller,
            latch: CountLatch::new(),
            workers: Mutex::new(HashMap::new()),
            next_worker: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            checkpoint: AtomicBool::new(true),
            started: Instant::now(),
        })
    }

    pub fn post(&self, targets: Targets) {
        self.distributor.post(targets, false);
    }

    pub fn post_list(&self, batches: Vec<Targets>) {
        self.distributor.post_list(batches);
    }

    pub fn set(&self) {
        self.distributor.set();
    }

    pub fn get_total(&self) -> Option<u64> {
        self.distributor.get_total()
    }

    /// Hire the intended workers, wait for every one of them to return,
    /// and aggregate the statistics.
    pub async fn run(self: Arc<Self>) -> Report {
        self.hire(self.config.max_workers);
        self.latch.wait().await;
        self.report()
    }

    /// Launch `num` new workers.
    pub fn hire(self: &Arc<Self>, num: usize) {
        for _ in 0..num {
            let fetcher = Fetcher::new(self.config.fetcher.clone());
            let worker = Worker::new(
                Box::new(fetcher),
                Arc::clone(self) as Arc<dyn TargetSource>,
                Arc::clone(&self.exporter),
                Arc::clone(&self.scavenger),
                self.config.history,
                self.config.time_range,
            );
            let stop = worker.stop_token();
            let item = worker.item_slot();
            let id = self.next_worker.fetch_add(1, Ordering::Relaxed);
            let task = tokio::spawn(worker.run());
            self.workers.lock().unwrap().insert(
                id,
                WorkerHandle {
                    stop,
                    item,
                    abort: task.abort_handle(),
                },
            );
            self.latch.count(1);
            debug!("a worker is hired");

            let this = Arc::clone(self);
            tokio::spawn(async move {
                let result = task.await;
                this.on_fired(id, result);
            });
        }
        let alive = self.workers.lock().unwrap().len();
        self.scavenger.set_recorders(alive);
    }

    /// Ask up to `num` running workers to stop after their current target;
    /// with `force`, cancel their in-flight work too.
    pub fn fire(&self, num: usize, force: bool) {
        let workers = self.workers.lock().unwrap();
        let mut remaining = num;
        for handle in workers.values() {
            if remaining == 0 {
                break;
            }
            if !handle.stop.swap(true, Ordering::AcqRel) {
                if force {
                    handle.abort.abort();
                }
                remaining -= 1;
            }
        }
    }

    pub fn fire_all(&self, force: bool) {
        let alive = self.workers.lock().unwrap().len();
        self.fire(alive, force);
    }

    /// Force the company to close: stop every worker and stop gating.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.fire_all(true);
        self.controller.free();
    }

    fn on_fired(&self, id: u64, result: Result<(), tokio::task::JoinError>) {
        let handle = self.workers.lock().unwrap().remove(&id);
        if let Err(err) = result {
            if err.is_cancelled() {
                self.scavenger.cancelled();
                if let Some(handle) = &handle {
                    // The claim dies with the task; requeue it.
                    if let Some(cid) = handle.item.lock().unwrap().take() {
                        self.distributor.post(Targets::list(vec![cid]), true);
                    }
                }
            } else {
                self.scavenger.failure(
                    None,
                    &ScrapeError::Unexpected(format!("worker panicked: {err}")),
                );
            }
        }
        let alive = self.workers.lock().unwrap().len();
        self.scavenger.set_recorders(alive);
        self.latch.count_down();
        debug!("a worker is done");
    }

    /// Progress line plus pool-size adjustment against the rush window.
    fn update(&self) {
        let done = self.scavenger.get_success_count();
        let elapsed = format_elapsed(self.started.elapsed());
        match self.distributor.get_total() {
            Some(total) if total > 0 => info!(
                "progress: {:.1}% ({} finished, time elapsed: {})",
                done as f64 / total as f64 * 100.0,
                done,
                elapsed
            ),
            _ => info!("progress: {done} finished (time elapsed: {elapsed})"),
        }

        let alive = self.workers.lock().unwrap().len();
        if self.controller.is_busy() {
            if alive > RUSH_HOUR_WORKERS {
                info!("entering rush hour, cutting down workers");
                self.fire(alive - RUSH_HOUR_WORKERS, false);
            }
        } else if alive < self.config.max_workers {
            if let Some(this) = self.weak.upgrade() {
                info!("leaving rush hour, hiring more workers");
                this.hire(self.config.max_workers - alive);
            }
        }
    }

    fn report(&self) -> Report {
        let scraped = self.scavenger.get_success_count();
        let mut failures = self.scavenger.get_failures();
        failures.sort_unstable();
        let mut remaining = self.distributor.dump(1001);
        remaining.sort_unstable();
        let remaining_truncated = remaining.len() > 1000;
        let total = self.distributor.get_total().or_else(|| {
            (!remaining_truncated)
                .then(|| scraped + failures.len() as u64 + remaining.len() as u64)
        });
        Report {
            total,
            scraped,
            failures,
            remaining,
            remaining_truncated,
        }
    }
}

#[async_trait]
impl TargetSource for Company {
    async fn claim(&self) -> Result<u64, ScrapeError> {
        // Log progress every few minutes, on whichever worker claims next.
        if self.checkpoint.swap(false, Ordering::AcqRel) {
            self.update();
            if let Some(this) = self.weak.upgrade() {
                tokio::spawn(async move {
                    tokio::time::sleep(UPDATE_INTERVAL).await;
                    this.checkpoint.store(true, Ordering::Release);
                });
            }
        }

        self.controller.wait().await;

        let cid = self.distributor.claim().await?;
        if let Err(e) = validate_id(cid) {
            self.controller.release();
            return Err(e);
        }
        if self.closed.load(Ordering::Acquire) {
            // Claimed after closing: hand it back for the final report.
            self.distributor.post(Targets::list(vec![cid]), true);
            return Err(ScrapeError::NoMoreItems);
        }
        Ok(cid)
    }
}

fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{}:{:02}:{:02}", secs / 3600, secs / 60 % 60, secs % 60)
}

/// Aggregated outcome of one company's run.
#[derive(Debug)]
pub struct Report {
    /// Total targets, when every posted batch had known length; restored
    /// from the drained remainder otherwise, if possible.
    pub total: Option<u64>,
    pub scraped: u64,
    pub failures: Vec<u64>,
    pub remaining: Vec<u64>,
    pub remaining_truncated: bool,
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "-----")?;
        writeln!(f, "CID scraping")?;
        match self.total {
            Some(total) => writeln!(f, "Total number of targets: {total}")?,
            None => writeln!(f, "Total number of targets: unknown")?,
        }
        writeln!(f, "Number of targets scraped: {}", self.scraped)?;
        if !self.failures.is_empty() {
            writeln!(
                f,
                "Exceptions occurred at: {} ({} in total)",
                join_ids(&self.failures),
                self.failures.len()
            )?;
        }
        if self.remaining.is_empty() {
            if Some(self.scraped) == self.total {
                write!(f, "All targets are scraped successfully!")?;
            } else {
                write!(
                    f,
                    "All targets are either scraped successfully or skipped due to exceptions"
                )?;
            }
        } else if self.remaining_truncated {
            write!(
                f,
                "List of targets yet to be scraped: {} ... (1000+ items)",
                join_ids(&self.remaining[..100])
            )?;
        } else {
            write!(
                f,
                "List of targets yet to be scraped: {} ({} in total)",
                join_ids(&self.remaining),
                self.remaining.len()
            )?;
        }
        Ok(())
    }
}

fn join_ids(ids: &[u64]) -> String {
    ids.iter()
        .map(u64::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::ControllerConfig;
    use crate::flow::CommentFlow;

    struct NullExporter;

    #[async_trait]
    impl Exporter for NullExporter {
        async fn connect(&self) -> anyhow::Result<()> {
            Ok(())
        }
        async fn disconnect(&self) -> anyhow::Result<()> {
            Ok(())
        }
        async fn dump(&self, _cid: u64, _flow: &CommentFlow) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn idle_controller() -> Arc<FrequencyController> {
        Arc::new(
            FrequencyController::new(ControllerConfig {
                normal_interval: 0.0,
                busy_interval: 0.0,
                rush_start: 0.0,
                rush_end: 0.0,
                time_zone: None,
            })
            .unwrap(),
        )
    }

    /// A port nothing listens on: bind then immediately drop the listener.
    async fn dead_endpoint() -> u16 {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        port
    }

    #[tokio::test]
    async fn unreachable_host_drains_pool_and_keeps_targets() {
        let port = dead_endpoint().await;
        let fetcher = FetcherConfig {
            host: "127.0.0.1".to_string(),
            port,
            ..FetcherConfig::default()
        };
        let distributor = Arc::new(Distributor::new());
        let scavenger = Arc::new(Scavenger::new());
        let company = Company::new(
            CompanyConfig {
                max_workers: 2,
                history: true,
                time_range: TimeRange::unbounded(),
                fetcher,
            },
            Arc::clone(&distributor),
            Arc::clone(&scavenger),
            Arc::new(NullExporter),
            idle_controller(),
        );
        company.post(Targets::range(1, 3));
        company.set();

        let report = Arc::clone(&company).run().await;
        assert_eq!(report.scraped, 0);
        assert_eq!(report.remaining, vec![1, 2, 3]);
        assert_eq!(report.total, Some(3));
    }

    #[tokio::test]
    async fn close_recycles_claims_for_the_report() {
        let distributor = Arc::new(Distributor::new());
        let scavenger = Arc::new(Scavenger::new());
        let company = Company::new(
            CompanyConfig {
                max_workers: 1,
                history: true,
                time_range: TimeRange::unbounded(),
                fetcher: FetcherConfig::default(),
            },
            Arc::clone(&distributor),
            Arc::clone(&scavenger),
            Arc::new(NullExporter),
            idle_controller(),
        );
        company.post(Targets::list(vec![7]));
        company.set();
        company.close();

        // The pool is closed before any worker was hired; the claim path
        // recycles, so the target shows up as remaining.
        let claimed = TargetSource::claim(&*company).await;
        assert!(matches!(claimed, Err(ScrapeError::NoMoreItems)));
        let report = company.report();
        assert_eq!(report.remaining, vec![7]);
    }

    #[tokio::test]
    async fn invalid_target_releases_the_claim_slot() {
        let distributor = Arc::new(Distributor::new());
        let company = Company::new(
            CompanyConfig {
                max_workers: 1,
                history: true,
                time_range: TimeRange::unbounded(),
                fetcher: FetcherConfig::default(),
            },
            Arc::clone(&distributor),
            Arc::new(Scavenger::new()),
            Arc::new(NullExporter),
            idle_controller(),
        );
        company.post(Targets::list(vec![0, 5]));
        company.set();
        assert!(matches!(
            TargetSource::claim(&*company).await,
            Err(ScrapeError::InvalidTarget(0))
        ));
        assert_eq!(TargetSource::claim(&*company).await.unwrap(), 5);
    }

    #[test]
    fn report_renders_every_section() {
        let report = Report {
            total: Some(10),
            scraped: 7,
            failures: vec![3, 5],
            remaining: vec![8],
            remaining_truncated: false,
        };
        let text = report.to_string();
        assert!(text.contains("Total number of targets: 10"));
        assert!(text.contains("Number of targets scraped: 7"));
        assert!(text.contains("Exceptions occurred at: 3, 5 (2 in total)"));
        assert!(text.contains("List of targets yet to be scraped: 8 (1 in total)"));
    }

    #[test]
    fn clean_report_celebrates() {
        let report = Report {
            total: Some(2),
            scraped: 2,
            failures: vec![],
            remaining: vec![],
            remaining_truncated: false,
        };
        assert!(report.to_string().ends_with("All targets are scraped successfully!"));
    }

    #[test]
    fn elapsed_formats_as_h_mm_ss() {
        assert_eq!(format_elapsed(Duration::from_secs(0)), "0:00:00");
        assert_eq!(format_elapsed(Duration::from_secs(61)), "0:01:01");
        assert_eq!(format_elapsed(Duration::from_secs(3723)), "1:02:03");
    }
}
