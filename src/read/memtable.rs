// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    history::History,
    memtable::Memtable,
    predicate::Predicate,
    read::source::{outside_eq, start_bound, Restored, SourceReader},
    read_view::ReadView,
    stmt::{SeqNo, Statement, UserKey},
};
use std::ops::Bound;
use std::sync::Arc;

/// Reads one in-memory tree level
///
/// Deposits, for the key it is positioned at, every version the read view
/// admits, newest first, stopping at the first terminal statement.
///
/// The active level keeps accepting writes while a merge pass is suspended
/// in disk I/O; `restore` re-anchors the reader and reports whether its
/// deposit changed. Rollback after a write-ahead-log failure may *remove*
/// the statement the reader sits on, which is the one case where a source
/// can move backwards.
pub struct MemtableReader {
    memtable: Arc<Memtable>,
    predicate: Predicate,
    search_key: UserKey,
    read_view: ReadView,

    /// Whether prepared statements of other transactions may be deposited
    prepared_ok: bool,

    pos: Option<UserKey>,
    started: bool,
    version: u64,

    /// Head statement and deposit depth of the last positioning,
    /// content-compared by `restore`
    fingerprint: Option<(Statement, usize)>,

    /// Smallest prepared seqno skipped on visibility grounds; the iterator
    /// drains this to push its transaction below the skipped statement
    min_skipped_plsn: Option<SeqNo>,
}

impl MemtableReader {
    pub(crate) fn new(
        memtable: Arc<Memtable>,
        predicate: Predicate,
        search_key: UserKey,
        read_view: ReadView,
        prepared_ok: bool,
    ) -> Self {
        let version = memtable.version();

        Self {
            memtable,
            predicate,
            search_key,
            read_view,
            prepared_ok,
            pos: None,
            started: false,
            version,
            fingerprint: None,
            min_skipped_plsn: None,
        }
    }

    /// Drains the smallest prepared seqno skipped since the last call.
    pub(crate) fn take_min_skipped_plsn(&mut self) -> Option<SeqNo> {
        self.min_skipped_plsn.take()
    }

    fn position(&mut self, from: Bound<&[u8]>, history: &mut History) {
        history.clear();
        self.pos = None;
        self.fingerprint = None;
        self.started = true;

        let direction = self.predicate.direction();
        let vlsn = self.read_view.vlsn();

        let mut skip_key: Option<UserKey> = None;

        loop {
            let start = match &skip_key {
                Some(key) => Bound::Excluded(&**key),
                None => from,
            };

            let Some(key) = self.memtable.next_key(start, direction) else {
                return;
            };

            if outside_eq(self.predicate, &self.search_key, &key) {
                return;
            }

            let mut deposited = 0;
            let mut head = None;

            for stmt in self.memtable.versions_desc(&key) {
                if stmt.seqno > vlsn {
                    continue;
                }
                if stmt.flags.prepared && !self.prepared_ok {
                    self.min_skipped_plsn = Some(
                        self.min_skipped_plsn
                            .map_or(stmt.seqno, |plsn| plsn.min(stmt.seqno)),
                    );
                    continue;
                }

                if head.is_none() {
                    head = Some(stmt.clone());
                }

                let terminal = stmt.is_terminal();
                history.push(stmt);
                deposited += 1;

                if terminal {
                    break;
                }
            }

            if let Some(head) = head {
                self.pos = Some(key);
                self.fingerprint = Some((head, deposited));
                return;
            }

            // Every version of this key was invisible; try the next key
            skip_key = Some(key);
        }
    }
}

impl SourceReader for MemtableReader {
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
        anchor: Option<&[u8]>,
        history: &mut History,
    ) -> crate::Result<Restored> {
        let current = self.memtable.version();
        if !self.started || self.version == current {
            self.version = current;
            return Ok(Restored::Unchanged);
        }
        self.version = current;

        let before = self.fingerprint.clone();
        self.seek(anchor, history)?;

        Ok(if before == self.fingerprint {
            Restored::Unchanged
        } else {
            Restored::Changed
        })
    }

    fn close(&mut self) {
        self.pos = None;
        self.fingerprint = None;
    }
}
