//! Counting latch: `wait` suspends while the count is positive.

use std::sync::Mutex;

use tokio::sync::Notify;

/// Tracks how many workers are still alive; the company's `run` blocks on
/// it until the pool drains.
#[derive(Default)]
pub struct CountLatch {
    count: Mutex<i64>,
    notify: Notify,
}

impl CountLatch {
    pub fn new() -> CountLatch {
        CountLatch::default()
    }

    pub fn count(&self, n: i64) {
        let mut count = self.count.lock().unwrap();
        *count += n;
        if *count <= 0 {
            self.notify.notify_waiters();
        }
    }

    pub fn count_down(&self) {
        self.count(-1);
    }

    /// Live count, clamped at zero.
    pub fn len(&self) -> i64 {
        (*self.count.lock().unwrap()).max(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Suspend until the count falls to zero or below. Returns immediately
    /// if it already has.
    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            if *self.count.lock().unwrap() <= 0 {
                return;
            }
            notified.await;
        }
    }
}
