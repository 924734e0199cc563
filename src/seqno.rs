// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::SeqNo;
use std::sync::{
    atomic::{
        AtomicU64,
        Ordering::{Acquire, Release},
    },
    Arc,
};

/// Thread-safe sequence number generator
///
/// Each committed statement gets a sequence number from a shared counter;
/// a statement with a higher sequence number shadows an older statement
/// with the same key. Read views compare against these numbers to decide
/// visibility.
///
/// # Examples
///
/// ```
/// # use lsm_read::SequenceNumberCounter;
/// #
/// let seqno = SequenceNumberCounter::default();
///
/// assert_eq!(1, seqno.next());
/// assert_eq!(2, seqno.next());
///
/// // Peek without assigning
/// assert_eq!(2, seqno.get());
/// ```
#[derive(Clone, Default, Debug)]
pub struct SequenceNumberCounter(Arc<AtomicU64>);

impl SequenceNumberCounter {
    /// Creates a new counter, setting it to some previous value
    #[must_use]
    pub fn new(prev: SeqNo) -> Self {
        Self(Arc::new(AtomicU64::new(prev)))
    }

    /// Gets the last assigned sequence number, without assigning a new one.
    #[must_use]
    pub fn get(&self) -> SeqNo {
        self.0.load(Acquire)
    }

    /// Assigns the next sequence number.
    ///
    /// `SeqNo::MAX` is reserved for "newest" read views and is never handed
    /// out; uncommitted and prepared statements are marked with explicit
    /// flags rather than sentinel sequence numbers.
    #[must_use]
    #[allow(clippy::missing_panics_doc, reason = "we should never run out of u64s")]
    pub fn next(&self) -> SeqNo {
        let seqno = self.0.fetch_add(1, Release) + 1;
        assert!(seqno < SeqNo::MAX, "Ran out of sequence numbers");
        seqno
    }

    /// Sets the sequence number.
    pub fn set(&self, seqno: SeqNo) {
        self.0.store(seqno, Release);
    }
}
