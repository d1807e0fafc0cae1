//! Diurnal request pacing.
//!
//! The host tolerates a steady trickle off-peak but throttles aggressively
//! during its evening rush. The controller gates every outbound request on
//! a one-permit semaphore whose permit is handed back by a timer, so N
//! concurrent waiters drain one per interval. Which interval applies is
//! decided by the wall-clock hour in the host's time zone.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use chrono::Timelike;
use chrono_tz::Tz;
use tokio::sync::Semaphore;

/// Pacing configuration. Hours are fractional (`22.5` is half past ten) and
/// the rush window may wrap midnight; `rush_start == rush_end` means the
/// rush interval applies all day.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Seconds between requests outside the rush window.
    pub normal_interval: f64,
    /// Seconds between requests inside the rush window.
    pub busy_interval: f64,
    pub rush_start: f64,
    pub rush_end: f64,
    /// Zone the rush hours are expressed in; local time when absent.
    pub time_zone: Option<Tz>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            normal_interval: 0.0,
            busy_interval: 1.0,
            rush_start: 18.0,
            rush_end: 0.5,
            time_zone: Some(chrono_tz::Asia::Shanghai),
        }
    }
}

pub struct FrequencyController {
    config: ControllerConfig,
    semaphore: Arc<Semaphore>,
    freed: AtomicBool,
    shut: AtomicBool,
}

impl FrequencyController {
    pub fn new(config: ControllerConfig) -> Result<FrequencyController> {
        if config.normal_interval < 0.0 || config.busy_interval < 0.0 {
            bail!("negative pacing interval");
        }
        for hour in [config.rush_start, config.rush_end] {
            if !(0.0..=24.0).contains(&hour) {
                bail!("rush hour {hour} outside [0, 24]");
            }
        }
        Ok(FrequencyController {
            config,
            semaphore: Arc::new(Semaphore::new(1)),
            freed: AtomicBool::new(false),
            shut: AtomicBool::new(false),
        })
    }

    /// Suspend the caller until its turn, at most one interval.
    ///
    /// Returns whether pacing actually applied: `false` when the active
    /// interval is zero or the controller was freed.
    pub async fn wait(self: &Arc<Self>) -> bool {
        if self.shut.load(Ordering::Acquire) {
            // Shut is terminal: nothing may pass again.
            std::future::pending::<()>().await;
        }
        if self.freed.load(Ordering::Acquire) {
            return false;
        }
        let interval = self.current_interval();
        if interval <= 0.0 {
            return false;
        }
        let permit = match self.semaphore.acquire().await {
            Ok(permit) => permit,
            // Closed by free(): everyone passes.
            Err(_) => return false,
        };
        permit.forget();
        let semaphore = Arc::clone(&self.semaphore);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs_f64(interval)).await;
            semaphore.add_permits(1);
        });
        true
    }

    /// Hand the claimed slot back immediately, skipping the timer. Used
    /// when the request the slot was claimed for never happens.
    pub fn release(&self) {
        self.semaphore.add_permits(1);
    }

    /// Permanently stop gating; all current and future waiters pass.
    pub fn free(&self) {
        self.freed.store(true, Ordering::Release);
        self.semaphore.close();
    }

    /// Permanently block; future waiters suspend forever.
    pub fn shut(&self) {
        self.shut.store(true, Ordering::Release);
    }

    /// Whether the wall clock is inside the rush window right now.
    pub fn is_busy(&self) -> bool {
        in_window(self.fractional_hour(), self.config.rush_start, self.config.rush_end)
    }

    fn current_interval(&self) -> f64 {
        if self.is_busy() {
            self.config.busy_interval
        } else {
            self.config.normal_interval
        }
    }

    fn fractional_hour(&self) -> f64 {
        match self.config.time_zone {
            Some(tz) => fractional_hour_of(chrono::Utc::now().with_timezone(&tz)),
            None => fractional_hour_of(chrono::Local::now()),
        }
    }
}

fn fractional_hour_of<T: Timelike>(t: T) -> f64 {
    f64::from(t.hour()) + f64::from(t.minute()) / 60.0 + f64::from(t.second()) / 3600.0
}

/// `[start, end)` membership with midnight wrap-around; `start == end`
/// covers the whole day.
fn in_window(hour: f64, start: f64, end: f64) -> bool {
    if start == end {
        true
    } else if start < end {
        start <= hour && hour < end
    } else {
        hour >= start || hour < end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(
        normal: f64,
        busy: f64,
        start: f64,
        end: f64,
    ) -> Arc<FrequencyController> {
        Arc::new(
            FrequencyController::new(ControllerConfig {
                normal_interval: normal,
                busy_interval: busy,
                rush_start: start,
                rush_end: end,
                time_zone: None,
            })
            .unwrap(),
        )
    }

    fn local_fractional_hour() -> f64 {
        fractional_hour_of(chrono::Local::now())
    }

    #[test]
    fn window_membership() {
        assert!(in_window(12.0, 0.0, 0.0), "equal bounds mean all day");
        assert!(in_window(19.5, 19.0, 23.0));
        assert!(!in_window(23.0, 19.0, 23.0), "end is exclusive");
        // Wrap past midnight.
        assert!(in_window(23.5, 22.0, 2.0));
        assert!(in_window(1.0, 22.0, 2.0));
        assert!(!in_window(12.0, 22.0, 2.0));
    }

    #[test]
    fn invalid_hours_are_rejected() {
        let bad = ControllerConfig {
            normal_interval: 0.0,
            busy_interval: 1.0,
            rush_start: -0.1,
            rush_end: 22.0,
            time_zone: None,
        };
        assert!(FrequencyController::new(bad).is_err());
        let bad = ControllerConfig {
            normal_interval: 0.0,
            busy_interval: 1.0,
            rush_start: 0.0,
            rush_end: 24.1,
            time_zone: None,
        };
        assert!(FrequencyController::new(bad).is_err());
        let bad = ControllerConfig {
            normal_interval: -1.0,
            busy_interval: 1.0,
            rush_start: 0.0,
            rush_end: 1.0,
            time_zone: None,
        };
        assert!(FrequencyController::new(bad).is_err());
    }

    #[tokio::test]
    async fn gates_all_day_when_rush_interval_set() {
        let c = controller(0.0, 1.0, 0.0, 0.0);
        assert!(c.wait().await, "rush interval should gate");
    }

    #[tokio::test]
    async fn idle_when_intervals_are_zero() {
        let c = controller(0.0, 0.0, 0.0, 0.0);
        assert!(!c.wait().await);
        let c = controller(0.0, 0.0, 0.0, 1e-9);
        assert!(!c.wait().await);
    }

    #[tokio::test]
    async fn window_around_now_selects_busy_interval() {
        let now = local_fractional_hour();
        // Keep bounds legal near midnight.
        let start = (now - 0.1).max(0.0);
        let end = (now + 0.1).min(24.0);
        let current = controller(0.0, 1.0, start, end);
        assert!(current.wait().await, "now is inside the window");

        // Right at midnight the shrunk window would degenerate to equal
        // bounds (all day); skip the negative case there.
        if now >= 0.02 {
            let before = controller(0.0, 1.0, start, now - 0.01);
            assert!(!before.wait().await, "window closed just before now");
        }
    }

    #[tokio::test]
    async fn freed_controller_never_gates() {
        let c = controller(1.0, 1.0, 0.0, 0.0);
        c.free();
        assert!(!c.wait().await);
        assert!(!c.wait().await);
    }

    #[tokio::test]
    async fn waiters_serialize_by_one_interval() {
        tokio::time::pause();
        let c = controller(0.0, 10.0, 0.0, 0.0);
        assert!(c.wait().await, "first waiter passes at once");
        let second = tokio::spawn({
            let c = Arc::clone(&c);
            async move { c.wait().await }
        });
        // The second waiter is held behind the timer.
        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(second.await.unwrap());
    }
}
