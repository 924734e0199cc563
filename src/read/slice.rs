// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    history::History,
    lsm::Lsm,
    predicate::Predicate,
    read::source::{outside_eq, start_bound, Restored, SourceReader},
    read_view::ReadView,
    run::RunSlice,
    stmt::UserKey,
};
use std::ops::Bound;
use std::sync::Arc;

/// Reads one disk slice of the current range
///
/// The only suspension-capable source: every positioning models a blocking
/// disk read and crosses the tree's yield point first. The slice itself is
/// immutable, so there is nothing for `restore` to catch - the merge loop
/// handles structural changes around the suspension instead.
pub struct SliceReader {
    slice: Arc<RunSlice>,
    lsm: Lsm,
    predicate: Predicate,
    search_key: UserKey,
    read_view: ReadView,

    pos: Option<UserKey>,
}

impl SliceReader {
    pub(crate) fn new(
        slice: Arc<RunSlice>,
        lsm: Lsm,
        predicate: Predicate,
        search_key: UserKey,
        read_view: ReadView,
    ) -> Self {
        Self {
            slice,
            lsm,
            predicate,
            search_key,
            read_view,
            pos: None,
        }
    }

    /// The slice this reader scans.
    pub(crate) fn slice(&self) -> &Arc<RunSlice> {
        &self.slice
    }

    fn position(&mut self, from: Bound<&[u8]>, history: &mut History) {
        // The read may suspend; the world can change underneath us here
        self.lsm.yield_point().fire();

        history.clear();
        self.pos = None;

        let direction = self.predicate.direction();
        let vlsn = self.read_view.vlsn();

        let mut skip_key: Option<UserKey> = None;

        loop {
            let start = match &skip_key {
                Some(key) => Bound::Excluded(&**key),
                None => from,
            };

            let Some(key) = self.slice.next_key(start, direction) else {
                return;
            };

            if outside_eq(self.predicate, &self.search_key, &key) {
                return;
            }

            let mut deposited = 0;

            for stmt in self.slice.versions_desc(&key) {
                if stmt.seqno > vlsn {
                    continue;
                }

                let terminal = stmt.is_terminal();
                history.push(stmt);
                deposited += 1;

                if terminal {
                    break;
                }
            }

            if deposited > 0 {
                self.pos = Some(key);
                return;
            }

            skip_key = Some(key);
        }
    }
}

impl SourceReader for SliceReader {
    fn seek(&mut self, anchor: Option<&[u8]>, history: &mut History) -> crate::Result<()> {
        let search_key = self.search_key.clone();
        let from = start_bound(self.predicate, &search_key, anchor);
        self.position(from, history);
        Ok(())
    }

    fn advance(&mut self, history: &mut History) -> crate::Result<()> {
        let Some(pos) = self.pos.take() else {
            history.clear();
            return Ok(());
        };

        self.position(Bound::Excluded(&pos), history);
        Ok(())
    }

    fn restore(
        &mut self,
        _anchor: Option<&[u8]>,
        _history: &mut History,
    ) -> crate::Result<Restored> {
        // Slices are immutable
        Ok(Restored::Unchanged)
    }

    fn close(&mut self) {
        self.pos = None;
    }
}
