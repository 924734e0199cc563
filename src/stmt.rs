// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::Slice;

/// User defined key
pub type UserKey = Slice;

/// User defined data (blob of bytes)
pub type UserValue = Slice;

/// Sequence number - a monotonically increasing counter
///
/// A statement with a higher sequence number shadows a statement with the
/// same key and a lower sequence number. This enables MVCC.
///
/// `SeqNo::MAX` is never assigned to a statement; a read view whose bound is
/// `SeqNo::MAX` sees "newest".
pub type SeqNo = u64;

/// How a statement mutates its key
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StatementKind {
    /// Insertion of a key that is not supposed to exist yet
    Insert,

    /// Full overwrite of whatever version existed before
    Replace,

    /// Deletion tombstone
    Delete,

    /// Delta statement, folded onto the newest terminal version of its key
    Upsert,
}

impl StatementKind {
    /// Returns `true` if a statement of this kind needs no folding.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Upsert)
    }
}

/// Commit state of a statement.
///
/// The version number alone does not say whether a statement is actually
/// visible to other transactions, so the two in-flight states are explicit
/// flags instead of sentinel sequence numbers:
///
/// * `uncommitted` - the statement sits in the owning transaction's write
///   set; its `seqno` is meaningless and must not be compared.
/// * `prepared` - the sequence number is assigned, but the statement is not
///   durable yet and may still be rolled back.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct StatementFlags {
    /// Statement lives in a transaction write set
    pub uncommitted: bool,

    /// Sequence number assigned, but not yet durable
    pub prepared: bool,
}

/// An immutable versioned statement
///
/// Statements are cheap to clone (the key and value are ref-counted byte
/// slices), which is how the iterator "takes a reference" to the tuples it
/// holds on to.
#[derive(Clone, Eq, PartialEq)]
pub struct Statement {
    /// Key columns
    pub key: UserKey,

    /// Value columns; empty for deletes
    pub value: UserValue,

    /// Statement kind
    pub kind: StatementKind,

    /// Version
    pub seqno: SeqNo,

    /// Commit state
    pub flags: StatementFlags,
}

impl Statement {
    /// Creates a committed statement from its parts.
    pub fn from_components<K: Into<UserKey>, V: Into<UserValue>>(
        key: K,
        value: V,
        seqno: SeqNo,
        kind: StatementKind,
    ) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            kind,
            seqno,
            flags: StatementFlags::default(),
        }
    }

    /// Creates a deletion tombstone.
    pub fn new_tombstone<K: Into<UserKey>>(key: K, seqno: SeqNo) -> Self {
        Self::from_components(key, UserValue::empty(), seqno, StatementKind::Delete)
    }

    /// Creates an upsert delta.
    pub fn new_upsert<K: Into<UserKey>, V: Into<UserValue>>(
        key: K,
        delta: V,
        seqno: SeqNo,
    ) -> Self {
        Self::from_components(key, delta, seqno, StatementKind::Upsert)
    }

    /// Marks the statement as living in a transaction write set.
    #[must_use]
    pub fn into_uncommitted(mut self) -> Self {
        self.seqno = 0;
        self.flags.uncommitted = true;
        self
    }

    /// Marks the statement as prepared (assigned, not yet durable).
    #[must_use]
    pub fn into_prepared(mut self) -> Self {
        self.flags.prepared = true;
        self
    }

    /// Returns `true` if the statement needs no folding.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal()
    }

    /// Returns `true` if the statement is a deletion tombstone.
    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.kind == StatementKind::Delete
    }
}

impl std::fmt::Debug for Statement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:?}:{}{}{}:{} => {:?}",
            self.key,
            self.seqno,
            if self.flags.uncommitted { "u" } else { "" },
            if self.flags.prepared { "p" } else { "" },
            match self.kind {
                StatementKind::Insert => "I",
                StatementKind::Replace => "R",
                StatementKind::Delete => "D",
                StatementKind::Upsert => "U",
            },
            self.value,
        )
    }
}

/// Key metadata of the index being read
///
/// Keys are compared as plain byte strings; what the key definition adds is
/// whether a search key can pin down at most one tuple.
#[derive(Copy, Clone, Debug)]
pub struct KeyDef {
    /// Whether the index disallows duplicate keys
    pub is_unique: bool,
}

impl Default for KeyDef {
    fn default() -> Self {
        Self { is_unique: true }
    }
}

impl KeyDef {
    /// Returns `true` if `key` is a full exact key: on a unique index, a
    /// non-empty search key matches at most one tuple.
    #[must_use]
    pub fn is_exact_key(&self, key: &[u8]) -> bool {
        self.is_unique && !key.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::{KeyDef, Statement, StatementKind};
    use test_log::test;

    #[test]
    fn stmt_terminal() {
        assert!(Statement::from_components("a", "x", 1, StatementKind::Replace).is_terminal());
        assert!(Statement::new_tombstone("a", 1).is_terminal());
        assert!(!Statement::new_upsert("a", "+1", 1).is_terminal());
    }

    #[test]
    fn stmt_uncommitted_drops_seqno() {
        let stmt = Statement::from_components("a", "x", 17, StatementKind::Replace);
        let stmt = stmt.into_uncommitted();
        assert_eq!(0, stmt.seqno);
        assert!(stmt.flags.uncommitted);
    }

    #[test]
    fn key_def_exact() {
        let unique = KeyDef { is_unique: true };
        assert!(unique.is_exact_key(b"a"));
        assert!(!unique.is_exact_key(b""));

        let multi = KeyDef { is_unique: false };
        assert!(!multi.is_exact_key(b"a"));
    }
}
