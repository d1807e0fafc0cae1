//! Reconstruction of comment streams across snapshots.
//!
//! A snapshot digests into four contiguous segments (normal, protected,
//! title, code). Segments of one kind gathered across snapshots form a
//! pool; joining a pool yields a flow: the deduplicated, ID-ascending
//! sequence of every comment of that kind that appeared in any snapshot.

mod digest;

pub use digest::{digest, pool_one_len};

use std::collections::BTreeMap;

use crate::document::{Comment, CommentDocument, HeaderField};

/// Upper bound for open-ended time ranges.
pub const MAX_TIMESTAMP: i64 = i64::MAX;

/// Number of comment kinds (normal, protected, title, code).
pub const KINDS: usize = 4;

/// Join segments, earliest snapshot first, into one flow.
///
/// `horizon` tracks the largest comment ID emitted so far; from each
/// segment, the suffix past the horizon is appended wholesale. Duplicated
/// comments between overlapping snapshots are thereby elided while the
/// original in-segment order is preserved.
pub fn join<I>(pool: I) -> Vec<Comment>
where
    I: IntoIterator<Item = Vec<Comment>>,
{
    let mut flow = Vec::new();
    let mut horizon = 0u64;
    for segment in pool {
        for (i, cmt) in segment.iter().enumerate() {
            if cmt.id > horizon {
                horizon = segment.last().expect("segment is non-empty here").id;
                flow.extend_from_slice(&segment[i..]);
                break;
            }
        }
    }
    flow
}

/// Keep only comments whose date lies in `[start, end]` (inclusive).
///
/// The flow is date-ordered per snapshot, so the kept region is the
/// contiguous run from the first comment dated `>= start` through the last
/// dated `<= end`.
pub fn trim(flow: &mut Vec<Comment>, start: i64, end: i64) {
    let len = flow.len();
    let mut ifront = len;
    let mut irear = 0;
    for (i, cmt) in flow.iter().enumerate() {
        if cmt.date >= start {
            ifront = i;
            break;
        }
    }
    for (i, cmt) in flow.iter().rev().enumerate() {
        if cmt.date <= end {
            irear = len - i;
            break;
        }
    }
    if ifront == 0 && irear == len {
        return;
    }
    if ifront >= irear {
        flow.clear();
    } else {
        flow.drain(irear..);
        flow.drain(..ifront);
    }
}

/// Everything reconstructed for one target.
///
/// Offers three views: the latest snapshot alone, the merged document
/// (headers plus all four flows), and the per-date historical snapshots.
#[derive(Debug)]
pub struct CommentFlow {
    latest: CommentDocument,
    histories: Option<BTreeMap<i64, CommentDocument>>,
    flows: Option<[Vec<Comment>; KINDS]>,
    roll_dates: Option<Vec<i64>>,
    maxlimit: i64,
}

impl CommentFlow {
    pub fn new(
        latest: CommentDocument,
        histories: Option<BTreeMap<i64, CommentDocument>>,
        flows: Option<[Vec<Comment>; KINDS]>,
        roll_dates: Option<Vec<i64>>,
        maxlimit: i64,
    ) -> Self {
        Self {
            latest,
            histories,
            flows,
            roll_dates,
            maxlimit,
        }
    }

    /// Whether any history was reconstructed.
    pub fn has_history(&self) -> bool {
        self.flows.is_some()
    }

    /// Whether per-date snapshots can be emitted separately. False when a
    /// user time range collapsed the result into one merged document.
    pub fn can_split(&self) -> bool {
        self.roll_dates.is_some()
    }

    pub fn maxlimit(&self) -> i64 {
        self.maxlimit
    }

    /// The latest snapshot: headers and comments exactly as fetched.
    pub fn latest(&self) -> (Vec<&HeaderField>, Vec<&Comment>) {
        (
            self.latest.headers.iter().collect(),
            self.latest.comments.iter().collect(),
        )
    }

    /// The merged document: the latest snapshot's known headers followed by
    /// the four flows in kind order. Falls back to [`Self::latest`] when no
    /// history was scraped.
    pub fn document(&self) -> (Vec<&HeaderField>, Vec<&Comment>) {
        match &self.flows {
            Some(flows) => (
                self.latest
                    .headers
                    .iter()
                    .filter(|h| crate::document::ROOT_HEADERS.contains(&h.tag.as_str()))
                    .collect(),
                flows.iter().flatten().collect(),
            ),
            None => self.latest(),
        }
    }

    /// Fetched historical snapshots, earliest first.
    pub fn histories(&self) -> impl Iterator<Item = (i64, &CommentDocument)> {
        self.histories
            .iter()
            .flat_map(|m| m.iter().map(|(date, doc)| (*date, doc)))
    }

    /// The four flows (normal, protected, title, code), when history was
    /// reconstructed.
    pub fn flows(&self) -> Option<&[Vec<Comment>; KINDS]> {
        self.flows.as_ref()
    }
}
