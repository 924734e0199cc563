// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    predicate::Direction,
    read_view::ReadView,
    stmt::{SeqNo, Statement, StatementKind, UserKey, UserValue},
    upsert::apply_upsert,
};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering::AcqRel, Ordering::Acquire, Ordering::Release},
    Mutex, RwLock,
};

/// Transaction state, as far as the read path cares
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TxState {
    /// Operating normally
    Ready,

    /// Aborted; reads must fail with a conflict error
    Aborted,
}

/// An interval registered with the conflict tracker
///
/// An empty `end` key means the interval is unbounded on that side.
#[derive(Clone, Debug)]
pub struct TrackedRead {
    /// Lower endpoint
    pub begin: UserKey,

    /// Whether `begin` itself is part of the interval
    pub begin_inclusive: bool,

    /// Upper endpoint; empty means unbounded
    pub end: UserKey,

    /// Whether `end` itself is part of the interval
    pub end_inclusive: bool,
}

/// A transaction attached to a read
///
/// The read path needs four things from a transaction: its write set (the
/// freshest read source), its read view, conflict tracking of everything the
/// read observed, and the ability to push it into the past when it skips a
/// prepared statement it must not see.
pub struct Transaction {
    write_set: RwLock<BTreeMap<UserKey, Statement>>,
    write_set_version: AtomicU64,

    aborted: AtomicBool,

    read_view: ReadView,

    /// Whether this transaction may observe prepared (not yet durable)
    /// statements of other transactions
    reads_prepared: bool,

    tracked: Mutex<Vec<TrackedRead>>,
}

impl Transaction {
    /// Creates a transaction bound to the given read view.
    #[must_use]
    pub fn new(read_view: ReadView, reads_prepared: bool) -> Self {
        Self {
            write_set: RwLock::new(BTreeMap::new()),
            write_set_version: AtomicU64::default(),
            aborted: AtomicBool::default(),
            read_view,
            reads_prepared,
            tracked: Mutex::new(Vec::new()),
        }
    }

    /// The transaction's read view.
    #[must_use]
    pub fn read_view(&self) -> &ReadView {
        &self.read_view
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> TxState {
        if self.aborted.load(Acquire) {
            TxState::Aborted
        } else {
            TxState::Ready
        }
    }

    /// Aborts the transaction.
    pub fn abort(&self) {
        self.aborted.store(true, Release);
    }

    /// Whether prepared statements of other transactions are visible.
    #[must_use]
    pub fn is_prepared_ok(&self) -> bool {
        self.reads_prepared
    }

    /// Returns `true` if the write set is non-empty.
    #[must_use]
    pub fn has_writes(&self) -> bool {
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        !self.write_set.read().expect("lock poisoned").is_empty()
    }

    /// Buffers a replace in the write set.
    pub fn put<K: Into<UserKey>, V: Into<UserValue>>(&self, key: K, value: V) {
        self.write(Statement::from_components(key, value, 0, StatementKind::Replace));
    }

    /// Buffers a delete in the write set.
    pub fn delete<K: Into<UserKey>>(&self, key: K) {
        self.write(Statement::new_tombstone(key, 0));
    }

    /// Buffers an upsert in the write set.
    pub fn upsert<K: Into<UserKey>, V: Into<UserValue>>(&self, key: K, delta: V) {
        self.write(Statement::new_upsert(key, delta, 0));
    }

    /// Adds a statement to the write set; one slot per key, upserts fold.
    pub fn write(&self, stmt: Statement) {
        let stmt = stmt.into_uncommitted();

        {
            #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
            let mut write_set = self.write_set.write().expect("lock poisoned");

            let stmt = match write_set.get(&*stmt.key) {
                Some(prev) if stmt.kind == StatementKind::Upsert => {
                    apply_upsert(&stmt, Some(prev))
                }
                _ => stmt,
            };

            write_set.insert(stmt.key.clone(), stmt);
        }

        self.write_set_version.fetch_add(1, AcqRel);
    }

    /// The write-set version; changes whenever a write is buffered.
    #[must_use]
    pub fn write_set_version(&self) -> u64 {
        self.write_set_version.load(Acquire)
    }

    /// The next write-set statement at or beyond `from` in the direction.
    pub(crate) fn next_write(&self, from: Bound<&[u8]>, direction: Direction) -> Option<Statement> {
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        let write_set = self.write_set.read().expect("lock poisoned");

        match direction {
            Direction::Forward => write_set
                .range::<[u8], _>((from, Bound::Unbounded))
                .next()
                .map(|(_, stmt)| stmt.clone()),
            Direction::Backward => write_set
                .range::<[u8], _>((Bound::Unbounded, from))
                .next_back()
                .map(|(_, stmt)| stmt.clone()),
        }
    }

    /// Pushes the transaction below a prepared statement it skipped.
    ///
    /// A read-only transaction is narrowed to `plsn - 1`; a transaction with
    /// buffered writes cannot be moved into the past and is aborted instead.
    pub fn send_to_read_view(&self, plsn: SeqNo) {
        if self.read_view.vlsn() < plsn {
            return;
        }

        if self.has_writes() {
            log::debug!("aborting writing tx that skipped prepared seqno {plsn}");
            self.abort();
        } else {
            log::trace!("sending tx to read view below prepared seqno {plsn}");
            self.read_view.narrow(plsn.saturating_sub(1));
        }
    }

    /// Registers an observed interval with the conflict tracker.
    pub fn track(
        &self,
        begin: UserKey,
        begin_inclusive: bool,
        end: UserKey,
        end_inclusive: bool,
    ) {
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        let mut tracked = self.tracked.lock().expect("lock poisoned");
        tracked.push(TrackedRead {
            begin,
            begin_inclusive,
            end,
            end_inclusive,
        });
    }

    /// Snapshot of all tracked intervals.
    #[must_use]
    pub fn tracked_reads(&self) -> Vec<TrackedRead> {
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        self.tracked.lock().expect("lock poisoned").clone()
    }
}

#[cfg(test)]
mod tests {
    use super::{Transaction, TxState};
    use crate::read_view::ReadView;
    use crate::stmt::StatementKind;
    use crate::predicate::Direction;
    use std::ops::Bound;
    use test_log::test;

    #[test]
    fn tx_write_set_one_slot_per_key() {
        let tx = Transaction::new(ReadView::newest(), false);
        tx.put("a", "1");
        tx.put("a", "2");

        let stmt = tx
            .next_write(Bound::Unbounded, Direction::Forward)
            .expect("should exist");
        assert_eq!(*b"2", &*stmt.value);
        assert!(stmt.flags.uncommitted);
    }

    #[test]
    fn tx_upserts_fold_in_write_set() {
        let tx = Transaction::new(ReadView::newest(), false);
        tx.upsert("a", "x");
        tx.upsert("a", "y");

        let stmt = tx
            .next_write(Bound::Unbounded, Direction::Forward)
            .expect("should exist");
        assert_eq!(StatementKind::Upsert, stmt.kind);
        assert_eq!(*b"xy", &*stmt.value);
    }

    #[test]
    fn tx_send_to_read_view_narrows_readonly() {
        let tx = Transaction::new(ReadView::newest(), false);
        tx.send_to_read_view(10);

        assert_eq!(TxState::Ready, tx.state());
        assert_eq!(9, tx.read_view().vlsn());
    }

    #[test]
    fn tx_send_to_read_view_aborts_writer() {
        let tx = Transaction::new(ReadView::newest(), false);
        tx.put("a", "1");
        tx.send_to_read_view(10);

        assert_eq!(TxState::Aborted, tx.state());
    }

    #[test]
    fn tx_send_to_read_view_noop_when_already_below() {
        let tx = Transaction::new(ReadView::at(5), false);
        tx.put("a", "1");
        tx.send_to_read_view(10);

        assert_eq!(TxState::Ready, tx.state());
    }
}
