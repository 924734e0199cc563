// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    predicate::Direction,
    stmt::{SeqNo, Statement, UserKey},
};
use std::ops::Bound;
use std::sync::{
    atomic::{AtomicUsize, Ordering::AcqRel, Ordering::Acquire},
    Arc, Mutex,
};

/// An immutable on-disk run of statements
///
/// Sorted by `(user_key, Reverse(seqno))`, so all versions of a key are
/// contiguous, newest first.
pub struct Run {
    items: Vec<Statement>,
    dump_seqno: SeqNo,
}

impl Run {
    /// Builds a run from a batch of statements (sorted on construction).
    #[must_use]
    pub fn new(mut items: Vec<Statement>) -> Self {
        items.sort_by(|a, b| {
            (&a.key, std::cmp::Reverse(a.seqno)).cmp(&(&b.key, std::cmp::Reverse(b.seqno)))
        });

        let dump_seqno = items.iter().map(|stmt| stmt.seqno).max().unwrap_or_default();

        Self { items, dump_seqno }
    }

    /// The largest sequence number stored in this run.
    #[must_use]
    pub fn dump_seqno(&self) -> SeqNo {
        self.dump_seqno
    }

    /// Number of statements in the run.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` if the run holds no statements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    // First index with user_key >= key
    fn lower_idx(&self, key: &[u8]) -> usize {
        self.items.partition_point(|stmt| &*stmt.key < key)
    }

    // First index with user_key > key
    fn upper_idx(&self, key: &[u8]) -> usize {
        self.items.partition_point(|stmt| &*stmt.key <= key)
    }
}

/// A clip of a [`Run`] to one range of the key space
///
/// Slices are handed to readers; a reader pins the slice before a disk read
/// so compaction cannot reclaim it while the reader is suspended.
pub struct RunSlice {
    run: Arc<Run>,

    begin: Option<UserKey>,
    end: Option<UserKey>,

    // Precomputed clip [lo, hi) into the run
    lo: usize,
    hi: usize,

    pins: AtomicUsize,
}

impl RunSlice {
    /// Clips a run to `[begin, end)`; open bounds mean unbounded.
    #[must_use]
    pub fn new(run: Arc<Run>, begin: Option<UserKey>, end: Option<UserKey>) -> Self {
        let lo = begin.as_ref().map_or(0, |key| run.lower_idx(key));
        let hi = end.as_ref().map_or(run.len(), |key| run.lower_idx(key));

        Self {
            run,
            begin,
            end,
            lo,
            hi: hi.max(lo),
            pins: AtomicUsize::default(),
        }
    }

    /// The underlying run.
    #[must_use]
    pub fn run(&self) -> &Arc<Run> {
        &self.run
    }

    /// The clip's begin bound (inclusive).
    #[must_use]
    pub fn begin(&self) -> Option<&UserKey> {
        self.begin.as_ref()
    }

    /// The clip's end bound (exclusive).
    #[must_use]
    pub fn end(&self) -> Option<&UserKey> {
        self.end.as_ref()
    }

    /// The largest sequence number this slice can contain.
    #[must_use]
    pub fn dump_seqno(&self) -> SeqNo {
        self.run.dump_seqno
    }

    /// Prevents the slice from being reclaimed by compaction.
    pub fn pin(&self) {
        self.pins.fetch_add(1, AcqRel);
    }

    /// Releases a [`RunSlice::pin`].
    pub fn unpin(&self) {
        let prev = self.pins.fetch_sub(1, AcqRel);
        debug_assert!(prev > 0, "unbalanced unpin");
    }

    /// Returns `true` while any reader holds a pin.
    #[must_use]
    pub fn is_pinned(&self) -> bool {
        self.pins.load(Acquire) > 0
    }

    /// The next user key at or beyond `from` in the given direction.
    pub(crate) fn next_key(&self, from: Bound<&[u8]>, direction: Direction) -> Option<UserKey> {
        let items = self.run.items.get(self.lo..self.hi)?;

        let idx = match direction {
            Direction::Forward => {
                let idx = match from {
                    Bound::Included(key) => self.run.lower_idx(key),
                    Bound::Excluded(key) => self.run.upper_idx(key),
                    Bound::Unbounded => 0,
                }
                .max(self.lo);

                idx.checked_sub(self.lo).filter(|idx| idx < &items.len())?
            }
            Direction::Backward => {
                let idx = match from {
                    Bound::Included(key) => self.run.upper_idx(key),
                    Bound::Excluded(key) => self.run.lower_idx(key),
                    Bound::Unbounded => self.hi,
                }
                .min(self.hi);

                idx.checked_sub(1)?.checked_sub(self.lo)?
            }
        };

        items.get(idx).map(|stmt| stmt.key.clone())
    }

    /// All statements inside the clip, for compaction.
    pub(crate) fn statements(&self) -> Vec<Statement> {
        self.run
            .items
            .get(self.lo..self.hi)
            .map(<[Statement]>::to_vec)
            .unwrap_or_default()
    }

    /// All versions of `key` inside the clip, newest first.
    pub(crate) fn versions_desc(&self, key: &[u8]) -> Vec<Statement> {
        let lo = self.run.lower_idx(key).max(self.lo);
        let hi = self.run.upper_idx(key).min(self.hi);

        self.run
            .items
            .get(lo..hi.max(lo))
            .map(<[Statement]>::to_vec)
            .unwrap_or_default()
    }
}

/// The crate's only suspension point
///
/// Disk reads may yield to the scheduler; everything else is non-blocking.
/// The merge treats the post-yield world as adversarial and reconciles via
/// the tree's version counters, so the scheduling mechanism itself stays out
/// of the merge API: this hook is all there is. Tests install hooks that
/// flush or compact mid-scan.
#[derive(Default)]
pub(crate) struct YieldPoint {
    hook: Mutex<Option<Box<dyn FnMut() + Send>>>,
}

impl YieldPoint {
    pub fn install(&self, hook: impl FnMut() + Send + 'static) {
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        let mut guard = self.hook.lock().expect("lock poisoned");
        *guard = Some(Box::new(hook));
    }

    /// Runs the installed hook, if any.
    ///
    /// The hook is taken out for the duration of the call, so a structural
    /// mutation inside it can reach this yield point again without
    /// deadlocking.
    pub fn fire(&self) {
        let hook = {
            #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
            let mut guard = self.hook.lock().expect("lock poisoned");
            guard.take()
        };

        if let Some(mut hook) = hook {
            hook();

            #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
            let mut guard = self.hook.lock().expect("lock poisoned");
            if guard.is_none() {
                *guard = Some(hook);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Run, RunSlice};
    use crate::{
        predicate::Direction,
        stmt::{Statement, StatementKind},
    };
    use std::ops::Bound;
    use std::sync::Arc;
    use test_log::test;

    fn replace(key: &str, seqno: u64) -> Statement {
        Statement::from_components(key, "v", seqno, StatementKind::Replace)
    }

    fn slice(keys: &[(&str, u64)]) -> RunSlice {
        let run = Arc::new(Run::new(keys.iter().map(|(k, s)| replace(k, *s)).collect()));
        RunSlice::new(run, None, None)
    }

    #[test]
    fn run_sorts_versions_desc() {
        let slice = slice(&[("a", 1), ("a", 5), ("b", 2)]);

        let versions = slice.versions_desc(b"a");
        let seqnos = versions.iter().map(|stmt| stmt.seqno).collect::<Vec<_>>();
        assert_eq!(vec![5, 1], seqnos);
    }

    #[test]
    fn run_slice_clip() {
        let run = Arc::new(Run::new(
            [("a", 1), ("b", 2), ("c", 3)]
                .iter()
                .map(|(k, s)| replace(k, *s))
                .collect(),
        ));

        let clipped = RunSlice::new(run, Some("b".into()), Some("c".into()));

        assert!(clipped.versions_desc(b"a").is_empty());
        assert!(clipped.versions_desc(b"c").is_empty());
        assert_eq!(1, clipped.versions_desc(b"b").len());

        let key = clipped
            .next_key(Bound::Unbounded, Direction::Forward)
            .expect("should exist");
        assert_eq!(*b"b", &*key);
    }

    #[test]
    fn run_slice_next_key_backward() {
        let slice = slice(&[("a", 1), ("c", 2), ("e", 3)]);

        let key = slice
            .next_key(Bound::Excluded(b"e"), Direction::Backward)
            .expect("should exist");
        assert_eq!(*b"c", &*key);

        let key = slice
            .next_key(Bound::Included(b"d"), Direction::Backward)
            .expect("should exist");
        assert_eq!(*b"c", &*key);

        assert!(slice
            .next_key(Bound::Excluded(b"a"), Direction::Backward)
            .is_none());
    }

    #[test]
    fn run_slice_pin_balance() {
        let slice = slice(&[("a", 1)]);
        slice.pin();
        assert!(slice.is_pinned());
        slice.unpin();
        assert!(!slice.is_pinned());
    }
}
