// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    predicate::Direction,
    stmt::{SeqNo, Statement, StatementKind, UserKey, UserValue},
};
use crossbeam_skiplist::SkipMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering::AcqRel, Ordering::Acquire};

/// Entry key: versions of one user key sort newest first
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct MemKey {
    pub user_key: UserKey,
    pub seqno: SeqNo,
}

impl Ord for MemKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (&self.user_key, std::cmp::Reverse(self.seqno))
            .cmp(&(&other.user_key, std::cmp::Reverse(other.seqno)))
    }
}

impl PartialOrd for MemKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Clone)]
struct MemValue {
    value: UserValue,
    kind: StatementKind,
    prepared: bool,
}

/// An in-memory level of the tree
///
/// Stores full statements in a lock-free skiplist, multi-sorted by
/// `(user_key, Reverse(seqno))`. The active memtable accepts new writes while
/// readers are suspended in disk I/O; sealed memtables are immutable except
/// for commit confirmation.
///
/// The version counter is bumped by every insert and remove, so a suspended
/// reader can tell whether the level changed underneath it.
pub struct Memtable {
    items: SkipMap<MemKey, MemValue>,

    /// Structural version, bumped on insert and rollback.
    version: AtomicU64,

    /// Highest encountered sequence number.
    highest_seqno: AtomicU64,
}

impl Default for Memtable {
    fn default() -> Self {
        Self::new()
    }
}

impl Memtable {
    /// Creates an empty memtable.
    #[must_use]
    pub fn new() -> Self {
        Self {
            items: SkipMap::new(),
            version: AtomicU64::default(),
            highest_seqno: AtomicU64::default(),
        }
    }

    /// Inserts a statement.
    ///
    /// A statement with the same key and sequence number is overwritten
    /// (commit confirmation rewrites the prepared flag this way).
    pub fn insert(&self, stmt: Statement) {
        debug_assert!(!stmt.flags.uncommitted, "write-set statements do not enter memtables");

        self.highest_seqno.fetch_max(stmt.seqno, AcqRel);

        self.items.insert(
            MemKey {
                user_key: stmt.key,
                seqno: stmt.seqno,
            },
            MemValue {
                value: stmt.value,
                kind: stmt.kind,
                prepared: stmt.flags.prepared,
            },
        );

        self.version.fetch_add(1, AcqRel);
    }

    /// Removes a statement (write-ahead-log failure rollback).
    ///
    /// Returns `true` if the statement existed.
    pub fn rollback(&self, key: &[u8], seqno: SeqNo) -> bool {
        let removed = self
            .items
            .remove(&MemKey {
                user_key: UserKey::new(key),
                seqno,
            })
            .is_some();

        if removed {
            self.version.fetch_add(1, AcqRel);
        }
        removed
    }

    /// Clears the prepared flag on all statements with `seqno <= bound`.
    pub fn confirm(&self, bound: SeqNo) {
        for entry in self.items.iter() {
            if entry.key().seqno <= bound && entry.value().prepared {
                let mut value = entry.value().clone();
                value.prepared = false;
                self.items.insert(entry.key().clone(), value);
            }
        }
    }

    /// The structural version; changes whenever the content changes.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version.load(Acquire)
    }

    /// Returns the highest sequence number stored.
    #[must_use]
    pub fn highest_seqno(&self) -> SeqNo {
        self.highest_seqno.load(Acquire)
    }

    /// Counts the number of statements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` if the memtable is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// All statements in key order (versions newest first), for dumping.
    #[must_use]
    pub fn statements(&self) -> Vec<Statement> {
        self.items.iter().map(|entry| make_stmt(entry.key(), entry.value())).collect()
    }

    /// The next user key at or beyond `from` in the given direction.
    pub(crate) fn next_key(&self, from: Bound<&[u8]>, direction: Direction) -> Option<UserKey> {
        match direction {
            Direction::Forward => {
                let start = match from {
                    // MemKey { key, MAX } sorts before every stored version of `key`
                    Bound::Included(key) => Bound::Included(MemKey {
                        user_key: UserKey::new(key),
                        seqno: SeqNo::MAX,
                    }),
                    // MemKey { key, 0 } sorts after every stored version of `key`
                    Bound::Excluded(key) => Bound::Included(MemKey {
                        user_key: UserKey::new(key),
                        seqno: 0,
                    }),
                    Bound::Unbounded => Bound::Unbounded,
                };

                self.items
                    .range((start, Bound::Unbounded))
                    .next()
                    .map(|entry| entry.key().user_key.clone())
            }
            Direction::Backward => {
                let end = match from {
                    Bound::Included(key) => Bound::Included(MemKey {
                        user_key: UserKey::new(key),
                        seqno: 0,
                    }),
                    Bound::Excluded(key) => Bound::Excluded(MemKey {
                        user_key: UserKey::new(key),
                        seqno: SeqNo::MAX,
                    }),
                    Bound::Unbounded => Bound::Unbounded,
                };

                self.items
                    .range((Bound::Unbounded, end))
                    .next_back()
                    .map(|entry| entry.key().user_key.clone())
            }
        }
    }

    /// All versions of `key`, newest first.
    pub(crate) fn versions_desc(&self, key: &[u8]) -> Vec<Statement> {
        let lo = MemKey {
            user_key: UserKey::new(key),
            seqno: SeqNo::MAX,
        };
        let hi = MemKey {
            user_key: UserKey::new(key),
            seqno: 0,
        };

        self.items
            .range(lo..=hi)
            .map(|entry| make_stmt(entry.key(), entry.value()))
            .collect()
    }
}

fn make_stmt(key: &MemKey, value: &MemValue) -> Statement {
    let mut stmt = Statement::from_components(
        key.user_key.clone(),
        value.value.clone(),
        key.seqno,
        value.kind,
    );
    stmt.flags.prepared = value.prepared;
    stmt
}
