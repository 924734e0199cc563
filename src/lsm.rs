// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    cache::ResultCache,
    memtable::Memtable,
    range_tree::RangeTree,
    run::{Run, RunSlice, YieldPoint},
    seqno::SequenceNumberCounter,
    stmt::{KeyDef, SeqNo, Statement, UserKey, UserValue},
};
use std::sync::{
    atomic::{AtomicU64, Ordering::AcqRel, Ordering::Acquire},
    Arc, RwLock,
};

struct SealedLevel {
    memtable: Arc<Memtable>,

    /// Highest seqno at seal time; nothing newer can live in this level
    seal_seqno: SeqNo,
}

struct LsmInner {
    key_def: KeyDef,
    seqno: SequenceNumberCounter,

    active: RwLock<Arc<Memtable>>,

    /// Newest first
    sealed: RwLock<Vec<SealedLevel>>,

    /// Bumped when the list of in-memory levels changes (rotation, dump)
    mem_list_version: AtomicU64,

    range_tree: RangeTree,
    cache: ResultCache,

    yield_point: YieldPoint,
}

/// Handle to one LSM index
///
/// Cheap to clone; all clones share the same tree. This is the read path's
/// view of an index: the in-memory levels, the range tree with its disk
/// slices, the result cache, and the version counters that let a suspended
/// reader detect structural changes.
///
/// The write surface is deliberately small - enough for an engine (or a
/// test) to drive the structural transitions the read path has to survive:
/// rotation, dump, split, compaction, rollback and commit confirmation.
#[derive(Clone)]
pub struct Lsm(Arc<LsmInner>);

impl Default for Lsm {
    fn default() -> Self {
        Self::new()
    }
}

impl Lsm {
    /// Creates an empty index with a unique key space.
    #[must_use]
    pub fn new() -> Self {
        Self::with_key_def(KeyDef::default())
    }

    /// Creates an empty index.
    #[must_use]
    pub fn with_key_def(key_def: KeyDef) -> Self {
        Self(Arc::new(LsmInner {
            key_def,
            seqno: SequenceNumberCounter::default(),
            active: RwLock::new(Arc::new(Memtable::new())),
            sealed: RwLock::new(Vec::new()),
            mem_list_version: AtomicU64::default(),
            range_tree: RangeTree::new(),
            cache: ResultCache::new(),
            yield_point: YieldPoint::default(),
        }))
    }

    /// The index key definition.
    #[must_use]
    pub fn key_def(&self) -> KeyDef {
        self.0.key_def
    }

    /// The shared sequence number counter.
    #[must_use]
    pub fn seqno(&self) -> &SequenceNumberCounter {
        &self.0.seqno
    }

    /// The result cache.
    #[must_use]
    pub fn cache(&self) -> &ResultCache {
        &self.0.cache
    }

    /// The range tree.
    #[must_use]
    pub fn range_tree(&self) -> &RangeTree {
        &self.0.range_tree
    }

    /// The active in-memory level.
    #[must_use]
    pub fn active_memtable(&self) -> Arc<Memtable> {
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        self.0.active.read().expect("lock poisoned").clone()
    }

    /// Sealed in-memory levels, newest first, with their seal seqnos.
    #[must_use]
    pub fn sealed_levels(&self) -> Vec<(Arc<Memtable>, SeqNo)> {
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        let sealed = self.0.sealed.read().expect("lock poisoned");
        sealed
            .iter()
            .map(|level| (level.memtable.clone(), level.seal_seqno))
            .collect()
    }

    /// Version of the in-memory level list.
    #[must_use]
    pub fn mem_list_version(&self) -> u64 {
        self.0.mem_list_version.load(Acquire)
    }

    /// Inserts a raw statement into the active level.
    pub fn insert_stmt(&self, stmt: Statement) {
        debug_assert!(!stmt.flags.uncommitted);

        let key = stmt.key.clone();
        self.active_memtable().insert(stmt);
        self.0.cache.invalidate(&key);
    }

    /// Inserts a replace, assigning the next seqno.
    pub fn insert_replace<K: Into<UserKey>, V: Into<UserValue>>(&self, key: K, value: V) -> SeqNo {
        let seqno = self.0.seqno.next();
        self.insert_stmt(Statement::from_components(
            key,
            value,
            seqno,
            crate::stmt::StatementKind::Replace,
        ));
        seqno
    }

    /// Inserts a tombstone, assigning the next seqno.
    pub fn insert_tombstone<K: Into<UserKey>>(&self, key: K) -> SeqNo {
        let seqno = self.0.seqno.next();
        self.insert_stmt(Statement::new_tombstone(key, seqno));
        seqno
    }

    /// Inserts an upsert delta, assigning the next seqno.
    pub fn insert_upsert<K: Into<UserKey>, V: Into<UserValue>>(&self, key: K, delta: V) -> SeqNo {
        let seqno = self.0.seqno.next();
        self.insert_stmt(Statement::new_upsert(key, delta, seqno));
        seqno
    }

    /// Clears the prepared flag on every statement with `seqno <= bound`.
    pub fn confirm(&self, bound: SeqNo) {
        self.active_memtable().confirm(bound);
        for (memtable, _) in self.sealed_levels() {
            memtable.confirm(bound);
        }
    }

    /// Removes a statement from the active level (write-ahead-log failure).
    pub fn rollback(&self, key: &[u8], seqno: SeqNo) -> bool {
        self.active_memtable().rollback(key, seqno)
    }

    /// Seals the active level and starts a fresh one.
    pub fn rotate_memtable(&self) {
        let old = {
            #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
            let mut active = self.0.active.write().expect("lock poisoned");
            std::mem::replace(&mut *active, Arc::new(Memtable::new()))
        };

        log::trace!("sealing memtable with {} statements", old.len());

        {
            #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
            let mut sealed = self.0.sealed.write().expect("lock poisoned");
            let seal_seqno = old.highest_seqno();
            sealed.insert(
                0,
                SealedLevel {
                    memtable: old,
                    seal_seqno,
                },
            );
        }

        self.0.mem_list_version.fetch_add(1, AcqRel);
    }

    /// Dumps the oldest sealed level into the disk layer.
    ///
    /// The level becomes a run; every range gets the run's clip to its own
    /// bounds attached on top of its slice stack.
    pub fn dump_sealed(&self) {
        let Some(level) = ({
            #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
            let mut sealed = self.0.sealed.write().expect("lock poisoned");
            sealed.pop()
        }) else {
            return;
        };

        if !level.memtable.is_empty() {
            let run = Arc::new(Run::new(level.memtable.statements()));
            log::trace!("dumping sealed level as run of {} statements", run.len());

            for range in self.0.range_tree.ranges() {
                range.push_slice(Arc::new(RunSlice::new(
                    run.clone(),
                    range.begin().cloned(),
                    range.end().cloned(),
                )));
            }
        }

        self.0.mem_list_version.fetch_add(1, AcqRel);
    }

    /// Splits the range containing `at`; bumps the range-tree version.
    pub fn split_range(&self, at: &[u8]) {
        self.0.range_tree.split(at);
    }

    /// Squashes all slices of the range containing `key` into a single run.
    ///
    /// Keeps every version (version garbage collection is an engine concern,
    /// not a read-path one); bumps the range's version so suspended readers
    /// restore their disk cursors.
    ///
    /// A reader suspended in a disk read pins the range's slices; the swap
    /// is deferred while any pin is held. Returns `true` if the squash
    /// happened.
    pub fn compact_range(&self, key: &[u8]) -> bool {
        let range = self
            .0
            .range_tree
            .find_by_key(crate::predicate::Direction::Forward, key);

        let mut statements = Vec::new();
        for slice in range.slices() {
            statements.extend(slice.statements());
        }

        let run = Arc::new(Run::new(statements));
        let swapped = range.set_slices(vec![Arc::new(RunSlice::new(
            run,
            range.begin().cloned(),
            range.end().cloned(),
        ))]);

        if !swapped {
            log::trace!("deferring range compaction, a reader pins its slices");
        }
        swapped
    }

    /// Installs a hook that runs whenever a disk read yields.
    ///
    /// Structural mutations performed inside the hook model what concurrent
    /// flush/compaction can do to the tree while a reader is suspended.
    #[doc(hidden)]
    pub fn on_disk_read(&self, hook: impl FnMut() + Send + 'static) {
        self.0.yield_point.install(hook);
    }

    pub(crate) fn yield_point(&self) -> &YieldPoint {
        &self.0.yield_point
    }
}
