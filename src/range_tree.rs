// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    predicate::Direction,
    run::RunSlice,
    stmt::UserKey,
};
use std::sync::{
    atomic::{AtomicU64, Ordering::AcqRel, Ordering::Acquire},
    Arc, RwLock,
};

/// A partition of the key space owning a set of disk slices
///
/// Bounds are `[begin, end)`; an open bound means the edge of the key space.
/// The version counter is bumped whenever the slice set changes, so a reader
/// that kept slice cursors across a suspension can tell they are stale.
pub struct Range {
    begin: Option<UserKey>,
    end: Option<UserKey>,

    version: AtomicU64,

    /// Newest first (descending dump seqno)
    slices: RwLock<Vec<Arc<RunSlice>>>,
}

impl Range {
    pub(crate) fn new(begin: Option<UserKey>, end: Option<UserKey>) -> Self {
        Self {
            begin,
            end,
            version: AtomicU64::default(),
            slices: RwLock::new(Vec::new()),
        }
    }

    /// The inclusive begin bound, if any.
    #[must_use]
    pub fn begin(&self) -> Option<&UserKey> {
        self.begin.as_ref()
    }

    /// The exclusive end bound, if any.
    #[must_use]
    pub fn end(&self) -> Option<&UserKey> {
        self.end.as_ref()
    }

    /// The slice-set version.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version.load(Acquire)
    }

    /// Returns `true` if `key` falls inside this range.
    #[must_use]
    pub fn contains(&self, key: &[u8]) -> bool {
        self.begin.as_ref().is_none_or(|begin| key >= &**begin)
            && self.end.as_ref().is_none_or(|end| key < &**end)
    }

    /// Snapshot of the slice set, newest first.
    #[must_use]
    pub fn slices(&self) -> Vec<Arc<RunSlice>> {
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        self.slices.read().expect("lock poisoned").clone()
    }

    /// Attaches a freshly dumped slice on top.
    pub fn push_slice(&self, slice: Arc<RunSlice>) {
        {
            #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
            let mut slices = self.slices.write().expect("lock poisoned");
            slices.insert(0, slice);
        }
        self.version.fetch_add(1, AcqRel);
    }

    /// Replaces the whole slice set (compaction).
    ///
    /// A reader suspended in a disk read keeps its slices pinned; while any
    /// pin is held the swap is refused, so the reader cannot lose versions
    /// it is entitled to see. Returns `true` if the swap happened.
    pub fn set_slices(&self, new: Vec<Arc<RunSlice>>) -> bool {
        {
            #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
            let mut slices = self.slices.write().expect("lock poisoned");

            if slices.iter().any(|slice| slice.is_pinned()) {
                return false;
            }

            *slices = new;
        }
        self.version.fetch_add(1, AcqRel);
        true
    }
}

/// The ordered set of disjoint ranges covering the key space
///
/// Its version counter is bumped by splits; per-range slice changes only
/// bump the range's own counter.
pub struct RangeTree {
    ranges: RwLock<Vec<Arc<Range>>>,
    version: AtomicU64,
}

impl Default for RangeTree {
    fn default() -> Self {
        Self::new()
    }
}

impl RangeTree {
    /// Creates a tree with a single range covering everything.
    #[must_use]
    pub fn new() -> Self {
        Self {
            ranges: RwLock::new(vec![Arc::new(Range::new(None, None))]),
            version: AtomicU64::default(),
        }
    }

    /// The range-tree version.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version.load(Acquire)
    }

    /// Number of ranges.
    #[must_use]
    pub fn len(&self) -> usize {
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        self.ranges.read().expect("lock poisoned").len()
    }

    /// Returns `false`; the tree always covers the key space.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// The range a search positioned at `key` starts in.
    ///
    /// An empty key addresses the edge of the key space: the first range for
    /// forward reads, the last for backward reads.
    #[must_use]
    pub fn find_by_key(&self, direction: Direction, key: &[u8]) -> Arc<Range> {
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        let ranges = self.ranges.read().expect("lock poisoned");

        let idx = if key.is_empty() && direction == Direction::Backward {
            ranges.len() - 1
        } else {
            ranges.partition_point(|range| range.end().is_some_and(|end| &**end <= key))
        };

        #[expect(clippy::expect_used, reason = "the tree always covers the key space")]
        let range = ranges.get(idx).expect("tree is never empty");
        range.clone()
    }

    /// The neighbour of `range` in the given direction.
    #[must_use]
    pub fn neighbor(&self, range: &Arc<Range>, direction: Direction) -> Option<Arc<Range>> {
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        let ranges = self.ranges.read().expect("lock poisoned");

        let idx = ranges.iter().position(|r| Arc::ptr_eq(r, range))?;

        match direction {
            Direction::Forward => ranges.get(idx + 1).cloned(),
            Direction::Backward => idx.checked_sub(1).and_then(|idx| ranges.get(idx).cloned()),
        }
    }

    /// Splits the range containing `at` into `[begin, at)` and `[at, end)`,
    /// re-clipping its slices to both sides.
    pub fn split(&self, at: &[u8]) {
        {
            #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
            let mut ranges = self.ranges.write().expect("lock poisoned");

            let idx = ranges.partition_point(|range| range.end().is_some_and(|end| &**end <= at));
            let Some(old) = ranges.get(idx).cloned() else {
                return;
            };

            if old.begin().is_some_and(|begin| &**begin >= at) {
                // Split point on (or before) the range boundary, nothing to do
                return;
            }

            let at_key = UserKey::new(at);

            let left = Arc::new(Range::new(old.begin().cloned(), Some(at_key.clone())));
            let right = Arc::new(Range::new(Some(at_key), old.end().cloned()));

            // Re-clip each slice to both sides, preserving newest-first order
            left.set_slices(
                old.slices()
                    .iter()
                    .map(|slice| {
                        Arc::new(RunSlice::new(
                            slice.run().clone(),
                            left.begin().cloned(),
                            left.end().cloned(),
                        ))
                    })
                    .collect(),
            );
            right.set_slices(
                old.slices()
                    .iter()
                    .map(|slice| {
                        Arc::new(RunSlice::new(
                            slice.run().clone(),
                            right.begin().cloned(),
                            right.end().cloned(),
                        ))
                    })
                    .collect(),
            );

            ranges.splice(idx..=idx, [left, right]);
        }

        self.version.fetch_add(1, AcqRel);
    }

    /// Snapshot of all ranges in key order.
    #[must_use]
    pub fn ranges(&self) -> Vec<Arc<Range>> {
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        self.ranges.read().expect("lock poisoned").clone()
    }
}
