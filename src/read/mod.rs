// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

mod cache;
mod memtable;
mod slice;
pub(crate) mod source;
mod writeset;

use crate::{
    error::Error,
    history::History,
    lsm::Lsm,
    predicate::{Direction, Predicate},
    range_tree::Range,
    read::{
        cache::CacheReader,
        memtable::MemtableReader,
        slice::SliceReader,
        source::{AnyReader, ReadSource, Restored, SourceReader},
        writeset::WriteSetReader,
    },
    read_view::ReadView,
    stmt::{SeqNo, Statement, UserKey},
    tx::{Transaction, TxState},
};
use std::cmp::Ordering;
use std::sync::Arc;

/// "No source" sentinel for zone boundary indices
const NO_SRC: usize = usize::MAX;

/// Newest version skipped while the caller assembled a cache hint
///
/// Passed back into [`ReadIterator::cache_add`]; a skipped *prepared*
/// version forbids building a chain link over the delivered key, because
/// rolling that version back would not invalidate the link.
#[derive(Copy, Clone, Debug, Default)]
pub struct Skipped {
    /// The skipped version (zero when nothing was skipped)
    pub seqno: SeqNo,

    /// Whether the skipped version was prepared (not yet durable)
    pub prepared: bool,
}

impl Skipped {
    /// Describes a skipped committed version.
    #[must_use]
    pub fn committed(seqno: SeqNo) -> Self {
        Self {
            seqno,
            prepared: false,
        }
    }

    /// Describes a skipped prepared version.
    #[must_use]
    pub fn prepared(seqno: SeqNo) -> Self {
        Self {
            seqno,
            prepared: true,
        }
    }
}

/// Merging read iterator over one LSM index
///
/// Delivers, for a search predicate and a read view, an ordered stream of
/// statements merged from up to four kinds of read sources: the attached
/// transaction's write set, the result cache, the in-memory tree levels and
/// the disk slices of the current key range.
///
/// Sources are ordered freshest first. Each merge pass stamps the sources
/// observing the minimal key with a shared front id; the history fragments
/// of that front are folded into one result (applying upserts onto the
/// newest terminal version), deletes are suppressed, and every delivered
/// key is strictly beyond the previous one.
///
/// Disk reads may suspend the executing fiber. The iterator snapshots the
/// tree's version counters and, when a flush, compaction or rollback moved
/// the structure underneath it, rebuilds its sources from the last returned
/// key without ever delivering a key twice.
pub struct ReadIterator {
    lsm: Lsm,
    tx: Option<Arc<Transaction>>,
    predicate: Predicate,
    search_key: UserKey,
    read_view: ReadView,

    /// Candidates must be post-filtered by key equality (descending
    /// equality searches reach the sources rewritten as `Le`)
    need_check_eq: bool,

    /// The first delivered key may short-circuit deeper sources if it
    /// exactly matches the search key
    check_exact_match: bool,

    is_started: bool,
    front_id: u64,
    prev_front_id: u64,

    /// Source slots, freshest zone first: txw, cache, memory, disk
    sources: Vec<ReadSource>,
    txw_src: usize,
    cache_src: usize,
    mem_src: usize,
    disk_src: usize,

    /// First slot whose scan was suppressed during the last pass
    skipped_src: usize,

    mem_list_version: u64,
    range_tree_version: u64,
    range_version: u64,
    curr_range: Option<Arc<Range>>,

    /// Last returned statement; anchor for every repositioning
    last: Option<Statement>,

    last_cached: Option<Statement>,
    is_first_cached: bool,

    /// Versions of deletes suppressed since the last delivered key
    cache_link_seqno: SeqNo,
}

impl ReadIterator {
    /// Opens an iterator; `last` resumes where a previous iterator stopped.
    ///
    /// An empty search key addresses the edge of the key space in the
    /// predicate's direction (i.e. an unbounded scan).
    #[must_use]
    pub fn open<K: Into<UserKey>>(
        lsm: Lsm,
        tx: Option<Arc<Transaction>>,
        predicate: Predicate,
        search_key: K,
        last: Option<Statement>,
        read_view: ReadView,
    ) -> Self {
        let search_key = search_key.into();

        let need_check_eq = predicate == Predicate::EqReverse;

        let check_exact_match = matches!(
            predicate,
            Predicate::Eq | Predicate::EqReverse | Predicate::Ge | Predicate::Le
        ) && lsm.key_def().is_exact_key(&search_key);

        let is_first_cached = last.is_none();

        Self {
            lsm,
            tx,
            predicate,
            search_key,
            read_view,
            need_check_eq,
            check_exact_match,
            is_started: false,
            front_id: 0,
            prev_front_id: 0,
            sources: Vec::new(),
            txw_src: NO_SRC,
            cache_src: NO_SRC,
            mem_src: NO_SRC,
            disk_src: NO_SRC,
            skipped_src: NO_SRC,
            mem_list_version: 0,
            range_tree_version: 0,
            range_version: 0,
            curr_range: None,
            last,
            last_cached: None,
            is_first_cached,
            cache_link_seqno: 0,
        }
    }

    /// Delivers the next matching statement, or `None` past the last one.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::TransactionConflict`] if the attached transaction
    /// is aborted while the iterator runs.
    pub fn next(&mut self) -> crate::Result<Option<Statement>> {
        loop {
            self.advance()?;

            let entry = self.apply_history();
            self.track_read(entry.as_ref());
            self.last.clone_from(&entry);

            if let Some(stmt) = &entry {
                if stmt.is_tombstone() {
                    if stmt.flags.uncommitted {
                        // A write-set delete: the underlying key may well
                        // exist, so previous + current key are not an
                        // unbroken chain
                        self.last_cached = None;
                        self.is_first_cached = false;
                        self.cache_link_seqno = 0;
                    } else {
                        self.cache_link_seqno = self.cache_link_seqno.max(stmt.seqno);
                    }
                    continue;
                }

                debug_assert!(stmt.is_terminal(), "delivered statement must be terminal");
            }

            self.check_exact_match = false;
            return Ok(entry);
        }
    }

    /// Emits a cache hint for a delivered result.
    ///
    /// Links are suppressed entirely when the read view is not "newest",
    /// and the chain is broken when the newest skipped version is prepared.
    pub fn cache_add(&mut self, stmt: Option<&Statement>, skipped: Skipped) {
        if !self.read_view.is_newest() {
            self.last_cached = None;
            return;
        }

        let (prev, is_first, link_seqno) = if skipped.prepared {
            // Rolling back the prepared statement would not invalidate the
            // link, so no chain may be built over it
            (None, false, 0)
        } else {
            (
                self.last_cached.clone(),
                self.is_first_cached,
                self.cache_link_seqno.max(skipped.seqno),
            )
        };

        self.lsm.cache().add(
            stmt,
            prev.as_ref().map(|stmt| &stmt.key),
            is_first,
            link_seqno,
            &self.search_key,
            self.predicate.direction(),
        );

        self.last_cached = stmt.cloned();
        self.is_first_cached = false;
        self.cache_link_seqno = 0;
    }

    /// Releases all sources and held statements.
    pub fn close(&mut self) {
        self.last = None;
        self.last_cached = None;
        self.cleanup();
    }

    // === merge pass ===

    fn advance(&mut self) -> crate::Result<()> {
        // Restore if this is the first pass or the tree changed shape
        if !self.is_started
            || self.mem_list_version != self.lsm.mem_list_version()
            || self.range_tree_version != self.lsm.range_tree().version()
            || self
                .curr_range
                .as_ref()
                .is_none_or(|range| range.version() != self.range_version)
        {
            self.restore();
        }
        self.is_started = true;

        // Restarted from the top whenever a suspension invalidated the pass
        loop {
            self.prev_front_id = self.front_id;
            self.front_id += 1;

            let mut next: Option<Statement> = None;
            let mut stop = false;

            self.scan_write_set(&mut next, &mut stop)?;

            if !stop {
                self.scan_cache(&mut next, &mut stop)?;
            }

            if !stop {
                let mut idx = self.mem_src;
                while idx < self.disk_src && !stop {
                    self.scan_memory(idx, &mut next, &mut stop)?;
                    idx += 1;
                }
            }

            if !stop && self.scan_disk_zone(&mut next)? {
                continue;
            }

            #[cfg(debug_assertions)]
            self.assert_candidate_in_order(next.as_ref());

            // Descending equality searches run on `Le` sources; a candidate
            // with a different key means "no result": bump the front id one
            // extra step so no slot matches it
            if self.need_check_eq
                && next
                    .as_ref()
                    .is_some_and(|stmt| stmt.key != self.search_key)
            {
                self.front_id += 1;
            }

            return Ok(());
        }
    }

    /// Scans the disk zone, which may suspend. Returns `true` if the whole
    /// pass must restart because the tree changed during a suspension.
    fn scan_disk_zone(&mut self, next: &mut Option<Statement>) -> crate::Result<bool> {
        loop {
            // Compaction must not reclaim any slice while we are inside it
            self.pin_slices();
            let scanned = self.scan_disk_sources(next);
            self.unpin_slices();
            scanned?;

            // The transaction may have been aborted while we were suspended
            if let Some(tx) = &self.tx {
                if tx.state() == TxState::Aborted {
                    return Err(Error::TransactionConflict);
                }
            }

            // Dump/compaction may have changed the level list or the range
            // tree. The current range's own version needs no check: its
            // slices were pinned.
            if self.mem_list_version != self.lsm.mem_list_version()
                || self.range_tree_version != self.lsm.range_tree().version()
            {
                self.restore();
                return Ok(true);
            }

            // The write set is owned by this fiber and cannot have changed,
            // but the active memory level takes writes during suspensions
            self.restore_memory(next)?;

            if self.range_is_done(next.as_ref()) {
                self.next_range();
                continue;
            }

            return Ok(false);
        }
    }

    fn scan_disk_sources(&mut self, next: &mut Option<Statement>) -> crate::Result<()> {
        let mut stop = false;
        let mut idx = self.disk_src;

        while idx < self.sources.len() && !stop {
            self.scan_disk(idx, next, &mut stop)?;
            idx += 1;
        }

        Ok(())
    }

    // === per-zone scans ===

    fn scan_write_set(&mut self, next: &mut Option<Statement>, stop: &mut bool) -> crate::Result<()> {
        if self.tx.is_none() {
            return Ok(());
        }

        let idx = self.txw_src;
        let anchor = self.last.clone();
        let anchor_key = anchor.as_ref().map(|stmt| &*stmt.key);

        {
            let Some(src) = self.sources.get_mut(idx) else {
                return Ok(());
            };
            let ReadSource {
                reader,
                history,
                started,
                front_id,
                ..
            } = src;

            let restored = reader.restore(anchor_key, history)?;
            if restored == Restored::Unchanged {
                if !*started {
                    reader.seek(anchor_key, history)?;
                } else if *front_id == self.prev_front_id {
                    reader.advance(history)?;
                }
            }
            *started = true;
        }

        self.evaluate_src(idx, next, stop);
        Ok(())
    }

    fn scan_cache(&mut self, next: &mut Option<Statement>, stop: &mut bool) -> crate::Result<()> {
        let idx = self.cache_src;
        let anchor = self.last.clone();
        let anchor_key = anchor.as_ref().map(|stmt| &*stmt.key);

        {
            let Some(src) = self.sources.get_mut(idx) else {
                return Ok(());
            };
            let ReadSource {
                reader,
                history,
                started,
                front_id,
                ..
            } = src;

            let restored = reader.restore(anchor_key, history)?;
            if restored == Restored::Unchanged {
                if !*started || idx >= self.skipped_src {
                    reader.seek(anchor_key, history)?;
                } else if *front_id == self.prev_front_id {
                    reader.advance(history)?;
                }
            }
            *started = true;
        }

        self.evaluate_src(idx, next, stop);

        // Inside a sealed cache interval the cached statement is known to be
        // the next key; older sources need not be scanned at all
        let is_interval = self.sources.get(idx).is_some_and(|src| match &src.reader {
            AnyReader::Cache(reader) => reader.is_interval(),
            _ => false,
        });

        if is_interval {
            self.skipped_src = idx + 1;
            *stop = true;
        }

        Ok(())
    }

    fn scan_memory(&mut self, idx: usize, next: &mut Option<Statement>, stop: &mut bool) -> crate::Result<()> {
        debug_assert!(idx >= self.mem_src && idx < self.disk_src);

        if !self.src_is_visible(idx) {
            return Ok(());
        }

        let anchor = self.last.clone();
        let anchor_key = anchor.as_ref().map(|stmt| &*stmt.key);

        {
            let Some(src) = self.sources.get_mut(idx) else {
                return Ok(());
            };
            let ReadSource {
                reader,
                history,
                started,
                front_id,
                ..
            } = src;

            let restored = reader.restore(anchor_key, history)?;
            if restored == Restored::Unchanged {
                if !*started || idx >= self.skipped_src {
                    reader.seek(anchor_key, history)?;
                } else if *front_id == self.prev_front_id {
                    reader.advance(history)?;
                }
            }
            *started = true;
        }

        self.evaluate_src(idx, next, stop);

        // Skipping a prepared statement narrows the transaction's world
        self.forward_skipped_prepared(idx)?;
        Ok(())
    }

    fn scan_disk(&mut self, idx: usize, next: &mut Option<Statement>, stop: &mut bool) -> crate::Result<()> {
        debug_assert!(idx >= self.disk_src && idx < self.sources.len());

        if !self.src_is_visible(idx) {
            return Ok(());
        }

        let anchor = self.last.clone();
        let anchor_key = anchor.as_ref().map(|stmt| &*stmt.key);

        {
            let Some(src) = self.sources.get_mut(idx) else {
                return Ok(());
            };
            let ReadSource {
                reader,
                history,
                started,
                front_id,
                ..
            } = src;

            if !*started || idx >= self.skipped_src {
                reader.seek(anchor_key, history)?;
            } else if *front_id == self.prev_front_id {
                reader.advance(history)?;
            }
            *started = true;
        }

        self.evaluate_src(idx, next, stop);
        Ok(())
    }

    // === merge bookkeeping ===

    /// Compares two candidate statements in iterator order.
    ///
    /// `None` denotes the position after the last statement, so it sorts
    /// after everything.
    fn cmp_stmt(direction: Direction, a: Option<&Statement>, b: Option<&Statement>) -> Ordering {
        match (a, b) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(a), Some(b)) => {
                let ord = a.key.cmp(&b.key);
                match direction {
                    Direction::Forward => ord,
                    Direction::Backward => ord.reverse(),
                }
            }
        }
    }

    /// Folds the slot at `idx` into the candidate: a strictly preceding
    /// head replaces the candidate and opens a new front; an equal head
    /// joins the current front. Sets `stop` when older sources cannot
    /// contribute a better key.
    fn evaluate_src(&mut self, idx: usize, next: &mut Option<Statement>, stop: &mut bool) {
        let Some(src) = self.sources.get(idx) else {
            return;
        };
        debug_assert!(src.started);

        let head = src.history.last_stmt().cloned();
        let head_terminal = src.history.is_terminal();
        let src_is_last = src.is_last;

        let cmp = Self::cmp_stmt(self.predicate.direction(), head.as_ref(), next.as_ref());

        if cmp == Ordering::Less {
            debug_assert!(head.is_some());
            next.clone_from(&head);
            self.front_id += 1;
        }

        let mut mark_last = false;
        let mut stop_here = src_is_last;

        if !stop_here && self.check_exact_match && cmp == Ordering::Less && head_terminal {
            // A terminal statement that may be the first delivered key: if
            // it equals the search key exactly, no deeper source can beat it.
            //
            // Forward equality searches were already filtered by the source;
            // descending ones run on `Le` and still need the comparison.
            let exact = self.predicate == Predicate::Eq
                || head
                    .as_ref()
                    .is_some_and(|stmt| stmt.key == self.search_key);

            if exact {
                // Later keys need not scan deeper either - unless a delete
                // surfaces, in which case an older replace may still exist
                // and the source is rescanned
                mark_last = self.predicate.is_eq();
                stop_here = true;
            }
        }

        let front_id = self.front_id;
        if let Some(src) = self.sources.get_mut(idx) {
            if cmp != Ordering::Greater {
                src.front_id = front_id;
            }
            if mark_last {
                src.is_last = true;
            }
        }

        if stop_here {
            self.skipped_src = idx + 1;
            *stop = true;
        } else {
            self.skipped_src = self.skipped_src.max(idx + 1);
        }
    }

    /// Recomputes the candidate from every scanned slot.
    ///
    /// Needed when a source that had won the front moved *backwards* (a
    /// rollback removed the statement it stood on): the old winner may have
    /// dragged several slots into the front, so everything scanned must be
    /// compared again.
    fn reevaluate_srcs(&mut self, next: &mut Option<Statement>) {
        *next = None;

        let limit = self.sources.len().min(self.skipped_src);
        for idx in 0..limit {
            let head = self
                .sources
                .get(idx)
                .and_then(|src| src.history.last_stmt().cloned());

            let cmp = Self::cmp_stmt(self.predicate.direction(), head.as_ref(), next.as_ref());

            if cmp == Ordering::Less {
                *next = head;
                self.front_id += 1;
            }

            if cmp != Ordering::Greater {
                let front_id = self.front_id;
                if let Some(src) = self.sources.get_mut(idx) {
                    src.front_id = front_id;
                }
            }
        }
    }

    /// Visibility rule: a source is skippable if the source right below it
    /// could already hold every version the read view admits. The deepest
    /// source is always visible.
    fn src_is_visible(&self, idx: usize) -> bool {
        let Some(below) = self.sources.get(idx + 1) else {
            return true;
        };
        self.read_view.vlsn() > below.max_seqno
    }

    /// Re-anchors the active memory source after a suspension and folds its
    /// possibly updated head back into the candidate.
    fn restore_memory(&mut self, next: &mut Option<Statement>) -> crate::Result<()> {
        let idx = self.mem_src;

        if idx >= self.sources.len() || !self.src_is_visible(idx) {
            return Ok(());
        }

        let anchor = self.last.clone();
        let anchor_key = anchor.as_ref().map(|stmt| &*stmt.key);

        let restored = {
            let Some(src) = self.sources.get_mut(idx) else {
                return Ok(());
            };
            let ReadSource {
                reader, history, ..
            } = src;
            reader.restore(anchor_key, history)?
        };

        if restored == Restored::Changed {
            let head = self
                .sources
                .get(idx)
                .and_then(|src| src.history.last_stmt().cloned());

            let cmp = Self::cmp_stmt(self.predicate.direction(), head.as_ref(), next.as_ref());

            if cmp == Ordering::Greater {
                // Memory levels are append-only except for rollback after a
                // write-ahead-log failure; if the removed statement had won
                // the front, the minimum must be recomputed
                let in_front = self
                    .sources
                    .get(idx)
                    .is_some_and(|src| src.front_id == self.front_id);
                if in_front {
                    self.reevaluate_srcs(next);
                }
            } else {
                if cmp == Ordering::Equal {
                    // The head of the current key changed; a stale cached
                    // value must not take part in upsert folding
                    let cache_idx = self.cache_src;
                    let front_id = self.front_id;
                    if let Some(cache) = self.sources.get_mut(cache_idx) {
                        if cache.front_id == front_id {
                            cache.history.clear();
                        }
                    }
                } else {
                    self.front_id += 1;
                }

                next.clone_from(&head);

                let front_id = self.front_id;
                if let Some(src) = self.sources.get_mut(idx) {
                    src.front_id = front_id;
                }
            }
        }

        self.forward_skipped_prepared(idx)?;
        Ok(())
    }

    /// If the memory source at `idx` skipped a prepared statement, pushes
    /// the transaction into a read view below it.
    fn forward_skipped_prepared(&mut self, idx: usize) -> crate::Result<()> {
        let Some(tx) = self.tx.clone() else {
            return Ok(());
        };

        let plsn = self.sources.get_mut(idx).and_then(|src| match &mut src.reader {
            AnyReader::Memory(reader) => reader.take_min_skipped_plsn(),
            _ => None,
        });

        if let Some(plsn) = plsn {
            tx.send_to_read_view(plsn);
            if tx.state() == TxState::Aborted {
                return Err(Error::TransactionConflict);
            }
        }

        Ok(())
    }

    // === range selection ===

    /// Returns `true` if the candidate crossed the current range's far
    /// boundary. Equality searches whose key cannot lie in the next range
    /// end instead of moving on.
    fn range_is_done(&self, next: Option<&Statement>) -> bool {
        let Some(range) = &self.curr_range else {
            return false;
        };

        match self.predicate.direction() {
            Direction::Forward => {
                let Some(end) = range.end() else {
                    return false;
                };
                next.is_none_or(|stmt| stmt.key >= *end)
                    && (self.predicate != Predicate::Eq || self.search_key >= *end)
            }
            Direction::Backward => {
                let Some(begin) = range.begin() else {
                    return false;
                };
                next.is_none_or(|stmt| stmt.key < *begin)
                    && (self.predicate != Predicate::EqReverse || self.search_key <= *begin)
            }
        }
    }

    /// Moves to the next range in the predicate direction and re-opens the
    /// disk zone for it. Ranges the result cache jumped past entirely are
    /// skipped.
    fn next_range(&mut self) {
        let direction = self.predicate.direction();

        #[expect(clippy::expect_used, reason = "only reachable after restore")]
        let mut range = self.curr_range.clone().expect("range should be selected");

        loop {
            let neighbor = self.lsm.range_tree().neighbor(&range, direction);

            #[expect(clippy::expect_used, reason = "a bounded range always has a neighbour")]
            {
                range = neighbor.expect("bounded range should have a neighbour");
            }

            let Some(last) = &self.last else {
                break;
            };

            let inside = match direction {
                Direction::Forward => range.end().is_none_or(|end| last.key < *end),
                Direction::Backward => range.begin().is_none_or(|begin| last.key > *begin),
            };
            if inside {
                break;
            }
        }

        log::trace!("read iterator moving to next range");

        self.range_version = range.version();
        self.curr_range = Some(range);

        let disk_src = self.disk_src;
        for src in self.sources.iter_mut().skip(disk_src) {
            src.reader.close();
        }
        self.sources.truncate(disk_src);

        self.add_disk_sources();
    }

    // === restore ===

    /// Restarts the merge from the position following the last returned
    /// statement. Also prepares the very first pass.
    fn restore(&mut self) {
        self.cleanup();

        self.mem_list_version = self.lsm.mem_list_version();
        self.range_tree_version = self.lsm.range_tree().version();

        let direction = self.predicate.direction();
        let anchor = self
            .last
            .as_ref()
            .map_or(&self.search_key, |stmt| &stmt.key)
            .clone();

        let range = self.lsm.range_tree().find_by_key(direction, &anchor);
        self.range_version = range.version();
        self.curr_range = Some(range);

        let effective = self.predicate.effective();
        let prepared_ok = self.tx.as_ref().is_none_or(|tx| tx.is_prepared_ok());

        if let Some(tx) = &self.tx {
            self.txw_src = self.sources.len();
            self.sources
                .push(ReadSource::new(AnyReader::from(WriteSetReader::new(
                    tx.clone(),
                    effective,
                    self.search_key.clone(),
                ))));
        }

        self.cache_src = self.sources.len();
        self.sources
            .push(ReadSource::new(AnyReader::from(CacheReader::new(
                self.lsm.clone(),
                effective,
                self.search_key.clone(),
                self.read_view.clone(),
            ))));

        self.mem_src = self.sources.len();
        self.sources
            .push(ReadSource::new(AnyReader::from(MemtableReader::new(
                self.lsm.active_memtable(),
                effective,
                self.search_key.clone(),
                self.read_view.clone(),
                prepared_ok,
            ))));

        for (memtable, seal_seqno) in self.lsm.sealed_levels() {
            self.sources.push(
                ReadSource::new(AnyReader::from(MemtableReader::new(
                    memtable,
                    effective,
                    self.search_key.clone(),
                    self.read_view.clone(),
                    prepared_ok,
                )))
                .with_max_seqno(seal_seqno),
            );
        }

        self.disk_src = self.sources.len();
        self.add_disk_sources();

        log::trace!(
            "restored read iterator with {} sources",
            self.sources.len(),
        );
    }

    fn add_disk_sources(&mut self) {
        let Some(range) = self.curr_range.clone() else {
            return;
        };

        let effective = self.predicate.effective();

        for slice in range.slices() {
            let max_seqno = slice.dump_seqno();
            self.sources.push(
                ReadSource::new(AnyReader::from(SliceReader::new(
                    slice,
                    self.lsm.clone(),
                    effective,
                    self.search_key.clone(),
                    self.read_view.clone(),
                )))
                .with_max_seqno(max_seqno),
            );
        }
    }

    /// Closes all sources and resets the merge state.
    fn cleanup(&mut self) {
        for src in &mut self.sources {
            src.history.clear();
            src.reader.close();
        }
        self.sources.clear();

        self.txw_src = NO_SRC;
        self.cache_src = NO_SRC;
        self.mem_src = NO_SRC;
        self.disk_src = NO_SRC;
        self.skipped_src = NO_SRC;
    }

    fn pin_slices(&self) {
        for src in self.sources.iter().skip(self.disk_src) {
            if let Some(slice) = src.reader.slice() {
                slice.pin();
            }
        }
    }

    fn unpin_slices(&self) {
        for src in self.sources.iter().skip(self.disk_src) {
            if let Some(slice) = src.reader.slice() {
                slice.unpin();
            }
        }
    }

    // === result assembly ===

    /// Splices the histories of every slot in the current front into one
    /// and folds it into the key's resulting statement.
    fn apply_history(&mut self) -> Option<Statement> {
        let mut history = History::default();

        for src in &mut self.sources {
            if src.front_id == self.front_id {
                history.splice(&mut src.history);
                if history.is_terminal() {
                    break;
                }
            }
        }

        let mut upserts_applied = 0;
        let result = history.apply(true, &mut upserts_applied);

        if upserts_applied > 0 {
            log::trace!("applied {upserts_applied} upserts");
        }

        result
    }

    /// Registers the observed interval with the conflict tracker.
    fn track_read(&self, entry: Option<&Statement>) {
        let Some(tx) = &self.tx else {
            return;
        };

        let endpoint = entry.map_or_else(
            || {
                if self.predicate.is_eq() {
                    self.search_key.clone()
                } else {
                    UserKey::empty()
                }
            },
            |stmt| stmt.key.clone(),
        );

        match self.predicate.direction() {
            Direction::Forward => tx.track(
                self.search_key.clone(),
                self.predicate != Predicate::Gt,
                endpoint,
                true,
            ),
            Direction::Backward => tx.track(
                endpoint,
                true,
                self.search_key.clone(),
                self.predicate != Predicate::Lt,
            ),
        }
    }

    #[cfg(debug_assertions)]
    fn assert_candidate_in_order(&self, next: Option<&Statement>) {
        let Some(candidate) = next else {
            return;
        };

        if !self.search_key.is_empty() {
            let ord = candidate.key.cmp(&self.search_key);
            let ord = match self.predicate.direction() {
                Direction::Forward => ord,
                Direction::Backward => ord.reverse(),
            };

            if self.predicate.is_exclusive() {
                debug_assert!(ord == Ordering::Greater, "candidate violates predicate");
            } else {
                debug_assert!(ord != Ordering::Less, "candidate violates predicate");
            }
        }

        if let Some(last) = &self.last {
            debug_assert!(
                Self::cmp_stmt(self.predicate.direction(), next, Some(last))
                    == Ordering::Greater,
                "candidate repeats or precedes the last returned key",
            );
        }
    }
}
