// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    history::History,
    predicate::Predicate,
    read::source::{outside_eq, start_bound, Restored, SourceReader},
    stmt::{Statement, UserKey},
    tx::Transaction,
};
use std::ops::Bound;
use std::sync::Arc;

/// Reads the attached transaction's own write set
///
/// The freshest source of all: an uncommitted statement shadows every
/// committed version of its key. The write set holds at most one statement
/// per key (upserts are folded into their slot on write), so depositing a
/// key is depositing that single statement.
///
/// The set can grow between two merge passes when the transaction interleaves
/// reads and writes, which is what `restore` catches.
pub struct WriteSetReader {
    tx: Arc<Transaction>,
    predicate: Predicate,
    search_key: UserKey,

    pos: Option<UserKey>,
    started: bool,
    version: u64,

    /// What the last positioning deposited, content-compared by `restore`
    fingerprint: Option<Statement>,
}

impl WriteSetReader {
    pub(crate) fn new(tx: Arc<Transaction>, predicate: Predicate, search_key: UserKey) -> Self {
        let version = tx.write_set_version();

        Self {
            tx,
            predicate,
            search_key,
            pos: None,
            started: false,
            version,
            fingerprint: None,
        }
    }

    fn position(&mut self, from: Bound<&[u8]>, history: &mut History) {
        history.clear();
        self.pos = None;
        self.fingerprint = None;
        self.started = true;

        let Some(stmt) = self.tx.next_write(from, self.predicate.direction()) else {
            return;
        };

        if outside_eq(self.predicate, &self.search_key, &stmt.key) {
            return;
        }

        self.pos = Some(stmt.key.clone());
        self.fingerprint = Some(stmt.clone());
        history.push(stmt);
    }
}

impl SourceReader for WriteSetReader {
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
        let current = self.tx.write_set_version();
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
