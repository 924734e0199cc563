// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    history::History,
    predicate::Predicate,
    read::{cache::CacheReader, memtable::MemtableReader, slice::SliceReader, writeset::WriteSetReader},
    run::RunSlice,
    stmt::SeqNo,
};
use enum_dispatch::enum_dispatch;
use std::ops::Bound;
use std::sync::Arc;

/// Outcome of re-anchoring a reader after a suspension
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Restored {
    /// The source did not move; the deposited history is still valid
    Unchanged,

    /// The source was repositioned and re-deposited its history
    Changed,
}

/// The operations the merge loop needs from every read source
///
/// The four source kinds differ in where their statements come from and in
/// what extra signals they raise (skipped prepared statements, sealed cache
/// intervals), but the merge loop itself only ever positions them and reads
/// their deposited history.
#[enum_dispatch]
pub trait SourceReader {
    /// Positions at the first key past `anchor` (or at the search key when
    /// there is no anchor) and deposits that key's visible versions.
    fn seek(&mut self, anchor: Option<&[u8]>, history: &mut History) -> crate::Result<()>;

    /// Moves past the current key and deposits the next one.
    fn advance(&mut self, history: &mut History) -> crate::Result<()>;

    /// Re-anchors the reader if its source mutated during a suspension.
    fn restore(&mut self, anchor: Option<&[u8]>, history: &mut History)
        -> crate::Result<Restored>;

    /// Releases the reader's resources.
    fn close(&mut self);
}

/// A read source behind one vtable
#[enum_dispatch(SourceReader)]
pub enum AnyReader {
    /// Transaction write set
    WriteSet(WriteSetReader),

    /// Result cache
    Cache(CacheReader),

    /// In-memory tree level (active or sealed)
    Memory(MemtableReader),

    /// One disk slice of the current range
    Disk(SliceReader),
}

impl AnyReader {
    /// The disk slice behind this reader, if it is a disk reader.
    pub(crate) fn slice(&self) -> Option<&Arc<RunSlice>> {
        match self {
            Self::Disk(reader) => Some(reader.slice()),
            _ => None,
        }
    }
}

/// One source slot of the merge: a reader plus its merge bookkeeping
pub(crate) struct ReadSource {
    pub reader: AnyReader,

    /// Whether the reader was positioned at least once
    pub started: bool,

    /// Set when this slot is known to be the deepest source that can still
    /// contribute to the search
    pub is_last: bool,

    /// Last front this slot participated in
    pub front_id: u64,

    /// Largest seqno this source can contain
    pub max_seqno: SeqNo,

    /// Versions of the key the reader is positioned at
    pub history: History,
}

impl ReadSource {
    pub fn new(reader: AnyReader) -> Self {
        Self {
            reader,
            started: false,
            is_last: false,
            front_id: 0,
            max_seqno: SeqNo::MAX,
            history: History::default(),
        }
    }

    pub fn with_max_seqno(mut self, max_seqno: SeqNo) -> Self {
        self.max_seqno = max_seqno;
        self
    }
}

/// Where a positioning starts: past the anchor if the read already returned
/// something, otherwise at the search key as the predicate dictates.
///
/// An empty search key addresses the edge of the key space.
pub(super) fn start_bound<'a>(
    predicate: Predicate,
    search_key: &'a [u8],
    anchor: Option<&'a [u8]>,
) -> Bound<&'a [u8]> {
    if let Some(anchor) = anchor {
        return Bound::Excluded(anchor);
    }

    if search_key.is_empty() {
        return Bound::Unbounded;
    }

    if predicate.is_exclusive() {
        Bound::Excluded(search_key)
    } else {
        Bound::Included(search_key)
    }
}

/// Equality filter applied inside readers: a forward `Eq` read is exhausted
/// as soon as the positioned key differs from the search key.
///
/// (`EqReverse` reaches readers rewritten to `Le`; the iterator itself owns
/// that equality check.)
pub(super) fn outside_eq(predicate: Predicate, search_key: &[u8], key: &[u8]) -> bool {
    predicate == Predicate::Eq && key != search_key
}
