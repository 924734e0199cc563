// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::SeqNo;
use std::sync::{
    atomic::{
        AtomicU64,
        Ordering::{AcqRel, Acquire},
    },
    Arc,
};

/// The largest version a read may observe
///
/// A read view is shared between an iterator and the transaction it belongs
/// to: skipping a prepared statement mid-read narrows the bound for both, so
/// the transaction can never observe anything the read already refused to
/// see. The bound only ever decreases.
#[derive(Clone, Debug)]
pub struct ReadView(Arc<AtomicU64>);

impl ReadView {
    /// A read view that sees everything committed.
    #[must_use]
    pub fn newest() -> Self {
        Self(Arc::new(AtomicU64::new(SeqNo::MAX)))
    }

    /// A read view bounded at the given sequence number (inclusive).
    #[must_use]
    pub fn at(seqno: SeqNo) -> Self {
        Self(Arc::new(AtomicU64::new(seqno)))
    }

    /// The current visibility bound.
    #[must_use]
    pub fn vlsn(&self) -> SeqNo {
        self.0.load(Acquire)
    }

    /// Returns `true` if this read view sees everything committed.
    #[must_use]
    pub fn is_newest(&self) -> bool {
        self.vlsn() == SeqNo::MAX
    }

    /// Narrows the bound; never widens it.
    pub fn narrow(&self, bound: SeqNo) {
        self.0.fetch_min(bound, AcqRel);
    }
}

impl Default for ReadView {
    fn default() -> Self {
        Self::newest()
    }
}
