// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    cache::CachedNode,
    history::History,
    lsm::Lsm,
    predicate::{Direction, Predicate},
    read::source::{outside_eq, start_bound, Restored, SourceReader},
    read_view::ReadView,
    stmt::{SeqNo, Statement, UserKey},
};
use std::ops::Bound;

/// Where a cache positioning came from, for chain certification
enum LinkFrom {
    /// First positioning of the search, anchored at the search key
    SearchStart,

    /// Positioned past a concrete key (the last returned one, or the node
    /// the reader sat on)
    Key(UserKey),
}

/// Reads the result cache
///
/// Cached statements are previously delivered results; finding one only
/// short-cuts the merge when the cache also certifies that the key is the
/// *next* one - that the whole gap between the anchor and the cached key
/// held nothing. When that certification holds, the reader reports the
/// position as lying inside a sealed interval and the merge skips the
/// deeper sources entirely.
pub struct CacheReader {
    lsm: Lsm,
    predicate: Predicate,
    search_key: UserKey,
    read_view: ReadView,

    pos: Option<UserKey>,
    started: bool,
    version: u64,
    fingerprint: Option<Statement>,

    is_interval: bool,
}

impl CacheReader {
    pub(crate) fn new(
        lsm: Lsm,
        predicate: Predicate,
        search_key: UserKey,
        read_view: ReadView,
    ) -> Self {
        let version = lsm.cache().version();

        Self {
            lsm,
            predicate,
            search_key,
            read_view,
            pos: None,
            started: false,
            version,
            fingerprint: None,
            is_interval: false,
        }
    }

    /// Whether the current position lies inside a sealed cache interval.
    pub(crate) fn is_interval(&self) -> bool {
        self.is_interval
    }

    fn position(&mut self, from: Bound<&[u8]>, history: &mut History, link_from: &LinkFrom) {
        history.clear();
        self.pos = None;
        self.fingerprint = None;
        self.is_interval = false;
        self.started = true;

        let direction = self.predicate.direction();
        let vlsn = self.read_view.vlsn();

        let mut hops = 0;
        let mut skip_key: Option<UserKey> = None;

        loop {
            let start = match &skip_key {
                Some(key) => Bound::Excluded(&**key),
                None => from,
            };

            let Some(node) = self.lsm.cache().seek(start, direction) else {
                return;
            };

            if outside_eq(self.predicate, &self.search_key, &node.stmt.key) {
                return;
            }

            if node.stmt.seqno > vlsn {
                // This cached result is from the future of our read view;
                // walking over it voids any chain certification
                skip_key = Some(node.stmt.key.clone());
                hops += 1;
                continue;
            }

            if hops == 0 {
                self.is_interval = self.certified(&node, link_from, direction, vlsn);
            }

            self.pos = Some(node.stmt.key.clone());
            self.fingerprint = Some(node.stmt.clone());
            history.push(node.stmt);
            return;
        }
    }

    /// Returns `true` if the gap between the positioning origin and `node`
    /// is certified empty for this read view.
    fn certified(
        &self,
        node: &CachedNode,
        link_from: &LinkFrom,
        direction: Direction,
        vlsn: SeqNo,
    ) -> bool {
        let bound = match direction {
            Direction::Forward => &node.prev_bound,
            Direction::Backward => &node.next_bound,
        };

        match link_from {
            LinkFrom::SearchStart => {
                let target = (!self.search_key.is_empty()).then_some(&*self.search_key);
                bound_covers(bound, target, direction, vlsn)
            }
            LinkFrom::Key(anchor) => {
                let anchor: &[u8] = anchor;

                let linked = match direction {
                    Direction::Forward => {
                        node.prev_key.as_deref() == Some(anchor)
                            && node.prev_link.is_some_and(|lsn| lsn <= vlsn)
                    }
                    Direction::Backward => {
                        node.next_key.as_deref() == Some(anchor)
                            && node.next_link.is_some_and(|lsn| lsn <= vlsn)
                    }
                };

                linked || bound_covers(bound, Some(anchor), direction, vlsn)
            }
        }
    }
}

/// Does a stored boundary certification cover the gap up to `target`?
///
/// `target == None` addresses the open edge of the key space.
fn bound_covers(
    bound: &Option<(Option<UserKey>, SeqNo)>,
    target: Option<&[u8]>,
    direction: Direction,
    vlsn: SeqNo,
) -> bool {
    let Some((key, lsn)) = bound else {
        return false;
    };

    if *lsn > vlsn {
        return false;
    }

    match (key, target) {
        (None, _) => true,
        (Some(_), None) => false,
        (Some(bound_key), Some(target)) => match direction {
            Direction::Forward => &**bound_key <= target,
            Direction::Backward => &**bound_key >= target,
        },
    }
}

impl SourceReader for CacheReader {
    fn seek(&mut self, anchor: Option<&[u8]>, history: &mut History) -> crate::Result<()> {
        let search_key = self.search_key.clone();
        let from = start_bound(self.predicate, &search_key, anchor);
        let link_from = anchor.map_or(LinkFrom::SearchStart, |key| {
            LinkFrom::Key(UserKey::new(key))
        });
        self.position(from, history, &link_from);
        Ok(())
    }

    fn advance(&mut self, history: &mut History) -> crate::Result<()> {
        let Some(pos) = self.pos.take() else {
            history.clear();
            self.is_interval = false;
            return Ok(());
        };

        let link_from = LinkFrom::Key(pos.clone());
        self.position(Bound::Excluded(&pos), history, &link_from);
        Ok(())
    }

    fn restore(
        &mut self,
        anchor: Option<&[u8]>,
        history: &mut History,
    ) -> crate::Result<Restored> {
        let current = self.lsm.cache().version();
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
        self.is_interval = false;
    }
}
