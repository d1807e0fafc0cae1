//! Blocking FIFO of target iterables feeding the workers.

use std::collections::VecDeque;
use std::ops::RangeInclusive;
use std::sync::Mutex;

use tokio::sync::Notify;

use crate::error::ScrapeError;

/// One batch of targets. Ranges and lists know their length; arbitrary
/// iterators do not, which makes the distributor's total unknown.
pub enum Targets {
    Range(RangeInclusive<u64>),
    List(std::vec::IntoIter<u64>),
    Iter(Box<dyn Iterator<Item = u64> + Send>),
}

impl Targets {
    pub fn range(first: u64, last: u64) -> Targets {
        Targets::Range(first..=last)
    }

    pub fn list(ids: Vec<u64>) -> Targets {
        Targets::List(ids.into_iter())
    }

    pub fn iter(it: impl Iterator<Item = u64> + Send + 'static) -> Targets {
        Targets::Iter(Box::new(it))
    }

    /// How many targets this batch will yield, when knowable upfront.
    fn known_len(&self) -> Option<u64> {
        match self {
            Targets::Range(r) => {
                let (start, end) = (*r.start(), *r.end());
                Some(if start > end { 0 } else { end - start + 1 })
            }
            Targets::List(l) => Some(l.len() as u64),
            Targets::Iter(_) => None,
        }
    }
}

impl Iterator for Targets {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        match self {
            Targets::Range(r) => r.next(),
            Targets::List(l) => l.next(),
            Targets::Iter(i) => i.next(),
        }
    }
}

#[derive(Default)]
struct State {
    current: Option<Targets>,
    queue: VecDeque<Targets>,
    set: bool,
    /// Items ever posted; `None` once any unknown-length batch arrived.
    total: Option<u64>,
}

impl State {
    fn pop(&mut self) -> Option<u64> {
        loop {
            if let Some(current) = &mut self.current {
                if let Some(id) = current.next() {
                    return Some(id);
                }
                self.current = None;
            }
            match self.queue.pop_front() {
                Some(next) => self.current = Some(next),
                None => return None,
            }
        }
    }
}

/// Distributes targets from posted batches on demand; `claim` suspends
/// while the queue is empty and the distributor is still open.
pub struct Distributor {
    state: Mutex<State>,
    notify: Notify,
}

impl Default for Distributor {
    fn default() -> Self {
        Self::new()
    }
}

impl Distributor {
    pub fn new() -> Distributor {
        Distributor {
            state: Mutex::new(State {
                total: Some(0),
                ..State::default()
            }),
            notify: Notify::new(),
        }
    }

    /// Append one batch and wake waiters. Recycled batches (re-queued after
    /// their worker was cancelled) do not count toward the total again.
    pub fn post(&self, targets: Targets, recycle: bool) {
        {
            let mut state = self.state.lock().unwrap();
            if !recycle {
                state.total = match (state.total, targets.known_len()) {
                    (Some(total), Some(len)) => Some(total + len),
                    _ => None,
                };
            }
            state.queue.push_back(targets);
        }
        self.notify.notify_waiters();
    }

    pub fn post_list(&self, batches: Vec<Targets>) {
        for targets in batches {
            self.post(targets, false);
        }
    }

    /// Close the distributor: once drained, `claim` fails with
    /// [`ScrapeError::NoMoreItems`].
    pub fn set(&self) {
        self.state.lock().unwrap().set = true;
        self.notify.notify_waiters();
    }

    pub fn is_set(&self) -> bool {
        self.state.lock().unwrap().set
    }

    /// Take the next target, suspending until one is available. Items
    /// posted before closure are still handed out after it.
    pub async fn claim(&self) -> Result<u64, ScrapeError> {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock().unwrap();
                if let Some(id) = state.pop() {
                    return Ok(id);
                }
                if state.set {
                    return Err(ScrapeError::NoMoreItems);
                }
            }
            notified.await;
        }
    }

    /// Drain all remaining targets, returning at most `limit` of them.
    pub fn dump(&self, limit: usize) -> Vec<u64> {
        let mut state = self.state.lock().unwrap();
        let mut items = Vec::new();
        while items.len() < limit {
            match state.pop() {
                Some(id) => items.push(id),
                None => break,
            }
        }
        state.current = None;
        state.queue.clear();
        items
    }

    /// Cumulative count of items ever posted, or `None` if any posted
    /// batch had unknown length.
    pub fn get_total(&self) -> Option<u64> {
        self.state.lock().unwrap().total
    }
}
