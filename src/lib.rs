// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The merging read path of an LSM-tree index engine.
//!
//! ##### NOTE
//!
//! > This crate only provides the read iterator of an LSM-based index, not a
//! > full storage engine: given a search predicate and a read view, it merges
//! > statements from a transaction write set, a result cache, the in-memory
//! > tree levels and the disk runs of the current key range into a single
//! > ordered stream of tuples.
//!
//! ##### About
//!
//! An LSM-tree scatters the versions of a key across layers: the newest ones
//! live in the active in-memory tree, older ones in sealed in-memory trees
//! awaiting dump, and the bulk in immutable runs on disk. On top of that, a
//! transaction may carry its own uncommitted statements, and previously
//! returned results may be cached. A read has to merge all of these, resolve
//! which versions its read view may observe, fold delta statements (upserts)
//! onto the newest terminal version, hide deletion tombstones, and do all of
//! that while the tree is being flushed and compacted underneath it.
//!
//! [`ReadIterator`] is that merge. It survives structural changes across disk
//! read suspension points by snapshotting the tree's version counters and
//! restoring its cursors when they move, it delivers each key at most once,
//! and it emits linking hints for the result cache so that repeated scans can
//! skip entire layers.
//!
//! # Example usage
//!
//! ```
//! use lsm_read::{Lsm, Predicate, ReadIterator, ReadView};
//!
//! let lsm = Lsm::new();
//!
//! lsm.insert_replace("a", "1");
//! lsm.insert_replace("b", "2");
//! lsm.rotate_memtable();
//! lsm.insert_replace("b", "3");
//!
//! let mut iter = ReadIterator::open(
//!     lsm.clone(),
//!     None,
//!     Predicate::Ge,
//!     "a",
//!     None,
//!     ReadView::newest(),
//! );
//!
//! let a = iter.next()?.expect("should exist");
//! assert_eq!(b"a", &*a.key);
//!
//! // The sealed level's "2" is shadowed by the newer "3"
//! let b = iter.next()?.expect("should exist");
//! assert_eq!(b"3", &*b.value);
//!
//! assert!(iter.next()?.is_none());
//! # Ok::<(), lsm_read::Error>(())
//! ```

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs, clippy::cargo)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::indexing_slicing)]
#![warn(clippy::pedantic, clippy::nursery)]
#![warn(clippy::expect_used)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::option_if_let_else)]

mod cache;
mod error;
mod history;
mod lsm;
mod memtable;
mod predicate;
mod range_tree;
mod read;
mod read_view;
mod run;
mod seqno;
mod slice;
mod stmt;
mod tx;
mod upsert;

#[doc(hidden)]
pub use {
    history::History,
    range_tree::{Range, RangeTree},
};

pub use {
    cache::ResultCache,
    error::{Error, Result},
    lsm::Lsm,
    memtable::Memtable,
    predicate::{Direction, Predicate},
    read::{ReadIterator, Skipped},
    read_view::ReadView,
    run::{Run, RunSlice},
    seqno::SequenceNumberCounter,
    slice::Slice,
    stmt::{KeyDef, SeqNo, Statement, StatementFlags, StatementKind, UserKey, UserValue},
    tx::{TrackedRead, Transaction, TxState},
};
