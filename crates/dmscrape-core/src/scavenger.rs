//! Central failure accounting.
//!
//! Every worker reports each target's outcome here. Health regenerates on
//! success and decays by each error kind's damage; when it crosses zero the
//! scavenger is dead and the company shuts the pool down. The health pool
//! scales with the number of live recorders so a larger pool tolerates
//! proportionally more trouble.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tracing::{debug, error, info, warn};

use crate::error::ScrapeError;

const MAX_HEALTH: f64 = 120.0;
const REGEN: f64 = 12.0;

struct Inner {
    health: f64,
    max_health: f64,
    recorders: usize,
    successes: u64,
    failures: Vec<u64>,
}

pub struct Scavenger {
    inner: Mutex<Inner>,
    dead: AtomicBool,
}

impl Default for Scavenger {
    fn default() -> Self {
        Self::new()
    }
}

impl Scavenger {
    pub fn new() -> Scavenger {
        Scavenger {
            inner: Mutex::new(Inner {
                health: MAX_HEALTH,
                max_health: MAX_HEALTH,
                recorders: 1,
                successes: 0,
                failures: Vec::new(),
            }),
            dead: AtomicBool::new(false),
        }
    }

    /// Rescale health for `num` live recorders, preserving the current
    /// health-to-recorder ratio.
    pub fn set_recorders(&self, num: usize) {
        let mut inner = self.inner.lock().unwrap();
        if inner.recorders == 0 {
            inner.health = MAX_HEALTH * num as f64;
        } else {
            inner.health = inner.health / inner.recorders as f64 * num as f64;
        }
        inner.max_health = MAX_HEALTH * num as f64;
        inner.recorders = num;
    }

    pub fn success(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.health = (inner.health + REGEN).min(inner.max_health);
        inner.successes += 1;
    }

    /// Record a failed target. A 404 counts as a success for progress
    /// accounting; every other kind charges its damage and books the target
    /// into the failure list.
    pub fn failure(&self, target: Option<u64>, err: &ScrapeError) {
        let described = match target {
            Some(cid) => format!("{err} at CID {cid}"),
            None => format!("{err} before any target was claimed"),
        };
        if err.is_noteworthy() {
            warn!("{described}");
        } else {
            info!("{described}");
        }

        let mut inner = self.inner.lock().unwrap();
        inner.health -= err.damage();
        if inner.health <= 0.0 && !self.dead.swap(true, Ordering::AcqRel) {
            error!("too many exceptions triggered, the scraper is about to stop");
        }
        if matches!(err, ScrapeError::PageNotFound) {
            inner.successes += 1;
        } else if let Some(cid) = target {
            inner.failures.push(cid);
        }
        debug!("health: {:.1} / {:.1}", inner.health, inner.max_health);
    }

    /// Record a worker cancelled mid-target: logged and otherwise ignored.
    pub fn cancelled(&self) {
        info!("a worker was forced to stop");
    }

    pub fn is_dead(&self) -> bool {
        self.dead.load(Ordering::Acquire)
    }

    pub fn get_success_count(&self) -> u64 {
        self.inner.lock().unwrap().successes
    }

    pub fn get_failures(&self) -> Vec<u64> {
        self.inner.lock().unwrap().failures.clone()
    }
}
