// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    predicate::Direction,
    stmt::{SeqNo, Statement, UserKey},
};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::{
    atomic::{AtomicU64, Ordering::AcqRel, Ordering::Acquire},
    RwLock,
};

/// A certification that a gap next to a node held no visible statement:
/// the gap endpoint (`None` = the edge of the key space) and the largest
/// version skipped while the emitting scan walked the gap
type GapBound = Option<(Option<UserKey>, SeqNo)>;

#[derive(Clone)]
struct CacheNode {
    stmt: Statement,

    /// Gap toward the predecessor key is known empty for read views at or
    /// above this bound
    prev_link: Option<SeqNo>,

    /// Same, toward the successor key
    next_link: Option<SeqNo>,

    /// Gap between a search boundary and this node, below it
    prev_bound: GapBound,

    /// Same, above it
    next_bound: GapBound,
}

/// Snapshot of a cached key and its neighbourhood, for the cache reader
#[derive(Clone)]
pub(crate) struct CachedNode {
    pub stmt: Statement,
    pub prev_key: Option<UserKey>,
    pub next_key: Option<UserKey>,
    pub prev_link: Option<SeqNo>,
    pub next_link: Option<SeqNo>,
    pub prev_bound: GapBound,
    pub next_bound: GapBound,
}

/// Cache of previously delivered results, threaded into chains
///
/// Each node holds the merged result last delivered for its key. A link
/// between two adjacent nodes certifies that the key gap between them held
/// no visible statement when a scan walked over it; the first result of a
/// scan gets the same certification against the search key itself. A later
/// scan that lands on a certified node may skip the deeper read sources
/// entirely.
///
/// Links carry the largest version that was skipped while the emitting scan
/// assembled its keys: a read view below that bound must not trust the link.
/// Writes sever every certification crossing the written key.
pub struct ResultCache {
    entries: RwLock<BTreeMap<UserKey, CacheNode>>,
    version: AtomicU64,
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            version: AtomicU64::default(),
        }
    }

    /// The cache version; changes whenever the content changes.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version.load(Acquire)
    }

    /// Number of cached keys.
    #[must_use]
    pub fn len(&self) -> usize {
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        self.entries.read().expect("lock poisoned").len()
    }

    /// Returns `true` if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stores a delivered result and threads its chain certification.
    ///
    /// With `prev`, the gap to the previously delivered key is certified;
    /// with `is_first`, the gap to the search key itself is. Stale nodes
    /// inside a certified gap are dropped: the scan just proved the gap
    /// empty, so anything cached in between no longer exists.
    pub fn add(
        &self,
        stmt: Option<&Statement>,
        prev: Option<&UserKey>,
        is_first: bool,
        link_seqno: SeqNo,
        search_key: &[u8],
        direction: Direction,
    ) {
        let Some(stmt) = stmt else {
            // Terminator: seal the gap beyond the previously delivered key
            // up to the edge of the key space
            if let Some(prev) = prev {
                {
                    #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
                    let mut entries = self.entries.write().expect("lock poisoned");

                    if let Some(node) = entries.get_mut(&**prev) {
                        match direction {
                            Direction::Forward => node.next_bound = Some((None, link_seqno)),
                            Direction::Backward => node.prev_bound = Some((None, link_seqno)),
                        }
                    }
                }
                self.version.fetch_add(1, AcqRel);
            }
            return;
        };

        debug_assert!(
            !stmt.flags.uncommitted && !stmt.flags.prepared,
            "only confirmed results are cached",
        );

        {
            #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
            let mut entries = self.entries.write().expect("lock poisoned");

            if entries.contains_key(&*stmt.key) {
                if let Some(node) = entries.get_mut(&*stmt.key) {
                    node.stmt = stmt.clone();
                }
            } else {
                // A new key materializing inside an existing chain splits
                // the certification, since adjacency changes
                sever_crossing(&mut entries, &stmt.key);

                entries.insert(
                    stmt.key.clone(),
                    CacheNode {
                        stmt: stmt.clone(),
                        prev_link: None,
                        next_link: None,
                        prev_bound: None,
                        next_bound: None,
                    },
                );
            }

            if let Some(prev) = prev {
                let (lo, hi) = match direction {
                    Direction::Forward => (prev.clone(), stmt.key.clone()),
                    Direction::Backward => (stmt.key.clone(), prev.clone()),
                };

                if lo < hi {
                    let stale = entries
                        .range::<[u8], _>((Bound::Excluded(&*lo), Bound::Excluded(&*hi)))
                        .map(|(key, _)| key.clone())
                        .collect::<Vec<_>>();
                    for key in stale {
                        remove_node(&mut entries, &key);
                    }

                    if let Some(node) = entries.get_mut(&*lo) {
                        node.next_link = Some(link_seqno);
                    }
                    if let Some(node) = entries.get_mut(&*hi) {
                        node.prev_link = Some(link_seqno);
                    }
                }
            } else if is_first {
                let bound_key = (!search_key.is_empty()).then(|| UserKey::new(search_key));

                if let Some(node) = entries.get_mut(&*stmt.key) {
                    match direction {
                        Direction::Forward => node.prev_bound = Some((bound_key, link_seqno)),
                        Direction::Backward => node.next_bound = Some((bound_key, link_seqno)),
                    }
                }
            }
        }

        self.version.fetch_add(1, AcqRel);
    }

    /// Engine write path: drops the key's node and severs every
    /// certification crossing the key.
    pub fn invalidate(&self, key: &[u8]) {
        {
            #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
            let mut entries = self.entries.write().expect("lock poisoned");

            remove_node(&mut entries, key);
            sever_crossing(&mut entries, key);
        }

        self.version.fetch_add(1, AcqRel);
    }

    /// The node cached for exactly `key`.
    pub(crate) fn get(&self, key: &[u8]) -> Option<CachedNode> {
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        let entries = self.entries.read().expect("lock poisoned");
        entries.contains_key(key).then(|| snapshot(&entries, key))
    }

    /// The first cached node at or beyond `from` in the given direction.
    pub(crate) fn seek(&self, from: Bound<&[u8]>, direction: Direction) -> Option<CachedNode> {
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        let entries = self.entries.read().expect("lock poisoned");

        let key = match direction {
            Direction::Forward => entries
                .range::<[u8], _>((from, Bound::Unbounded))
                .next()
                .map(|(key, _)| key.clone()),
            Direction::Backward => entries
                .range::<[u8], _>((Bound::Unbounded, from))
                .next_back()
                .map(|(key, _)| key.clone()),
        }?;

        Some(snapshot(&entries, &key))
    }
}

fn snapshot(entries: &BTreeMap<UserKey, CacheNode>, key: &[u8]) -> CachedNode {
    #[expect(clippy::expect_used, reason = "caller verified presence under the same lock")]
    let node = entries.get(key).expect("node should exist");

    let prev_key = entries
        .range::<[u8], _>((Bound::Unbounded, Bound::Excluded(key)))
        .next_back()
        .map(|(key, _)| key.clone());

    let next_key = entries
        .range::<[u8], _>((Bound::Excluded(key), Bound::Unbounded))
        .next()
        .map(|(key, _)| key.clone());

    CachedNode {
        stmt: node.stmt.clone(),
        prev_key,
        next_key,
        prev_link: node.prev_link,
        next_link: node.next_link,
        prev_bound: node.prev_bound.clone(),
        next_bound: node.next_bound.clone(),
    }
}

// Removing a node changes its neighbours' adjacency, so their links toward
// it no longer certify anything.
fn remove_node(entries: &mut BTreeMap<UserKey, CacheNode>, key: &[u8]) {
    if entries.remove(key).is_none() {
        return;
    }

    let (prev_key, next_key) = neighbors(entries, key);

    if let Some(node) = prev_key.and_then(|key| entries.get_mut(&*key)) {
        node.next_link = None;
    }
    if let Some(node) = next_key.and_then(|key| entries.get_mut(&*key)) {
        node.prev_link = None;
    }
}

// A key materializing inside a certified gap voids the certification.
fn sever_crossing(entries: &mut BTreeMap<UserKey, CacheNode>, key: &[u8]) {
    let (prev_key, next_key) = neighbors(entries, key);

    if let Some(node) = prev_key.and_then(|key| entries.get_mut(&*key)) {
        node.next_link = None;
        if bound_reaches_up_to(&node.next_bound, key) {
            node.next_bound = None;
        }
    }
    if let Some(node) = next_key.and_then(|key| entries.get_mut(&*key)) {
        node.prev_link = None;
        if bound_reaches_down_to(&node.prev_bound, key) {
            node.prev_bound = None;
        }
    }
}

fn neighbors(
    entries: &BTreeMap<UserKey, CacheNode>,
    key: &[u8],
) -> (Option<UserKey>, Option<UserKey>) {
    let prev_key = entries
        .range::<[u8], _>((Bound::Unbounded, Bound::Excluded(key)))
        .next_back()
        .map(|(key, _)| key.clone());
    let next_key = entries
        .range::<[u8], _>((Bound::Excluded(key), Bound::Unbounded))
        .next()
        .map(|(key, _)| key.clone());
    (prev_key, next_key)
}

// Does a node's downward certification reach a key below it?
fn bound_reaches_down_to(bound: &Option<(Option<UserKey>, SeqNo)>, key: &[u8]) -> bool {
    bound
        .as_ref()
        .is_some_and(|(lo, _)| lo.as_ref().is_none_or(|lo| &**lo <= key))
}

// Does a node's upward certification reach a key above it?
fn bound_reaches_up_to(bound: &Option<(Option<UserKey>, SeqNo)>, key: &[u8]) -> bool {
    bound
        .as_ref()
        .is_some_and(|(hi, _)| hi.as_ref().is_none_or(|hi| &**hi >= key))
}

#[cfg(test)]
mod tests {
    use super::ResultCache;
    use crate::{
        predicate::Direction,
        stmt::{Statement, StatementKind},
    };
    use std::ops::Bound;
    use test_log::test;

    fn replace(key: &str, seqno: u64) -> Statement {
        Statement::from_components(key, "v", seqno, StatementKind::Replace)
    }

    #[test]
    fn cache_links_adjacent_results() {
        let cache = ResultCache::new();

        let a = replace("a", 1);
        let c = replace("c", 2);

        cache.add(Some(&a), None, true, 0, b"a", Direction::Forward);
        cache.add(Some(&c), Some(&a.key), false, 2, b"a", Direction::Forward);

        let node = cache.get(b"a").expect("should exist");
        assert_eq!(Some(2), node.next_link);

        let node = cache.get(b"c").expect("should exist");
        assert_eq!(Some(2), node.prev_link);
    }

    #[test]
    fn cache_first_result_is_bound_to_search_key() {
        let cache = ResultCache::new();

        let c = replace("c", 2);
        cache.add(Some(&c), None, true, 0, b"a", Direction::Forward);

        let node = cache.get(b"c").expect("should exist");
        let (bound_key, _) = node.prev_bound.expect("should be certified");
        assert_eq!(*b"a", &*bound_key.expect("should be bounded"));
    }

    #[test]
    fn cache_write_severs_crossing_link() {
        let cache = ResultCache::new();

        let a = replace("a", 1);
        let c = replace("c", 2);
        cache.add(Some(&a), None, true, 0, b"a", Direction::Forward);
        cache.add(Some(&c), Some(&a.key), false, 2, b"a", Direction::Forward);

        // "b" lands inside the certified gap
        cache.invalidate(b"b");

        let node = cache.get(b"a").expect("should exist");
        assert!(node.next_link.is_none());

        let node = cache.get(b"c").expect("should exist");
        assert!(node.prev_link.is_none());
    }

    #[test]
    fn cache_write_severs_search_bound() {
        let cache = ResultCache::new();

        let c = replace("c", 2);
        cache.add(Some(&c), None, true, 0, b"a", Direction::Forward);

        cache.invalidate(b"b");

        let node = cache.get(b"c").expect("should exist");
        assert!(node.prev_bound.is_none());
    }

    #[test]
    fn cache_add_drops_stale_nodes_in_gap() {
        let cache = ResultCache::new();

        let a = replace("a", 1);
        let b = replace("b", 1);
        let c = replace("c", 2);

        cache.add(Some(&b), None, false, 0, b"b", Direction::Forward);
        cache.add(Some(&a), None, false, 0, b"a", Direction::Forward);

        // A scan delivering a -> c proves "b" no longer exists
        cache.add(Some(&c), Some(&a.key), false, 2, b"a", Direction::Forward);

        assert!(cache.get(b"b").is_none());
        assert_eq!(2, cache.len());
    }

    #[test]
    fn cache_seek_directions() {
        let cache = ResultCache::new();
        cache.add(Some(&replace("b", 1)), None, false, 0, b"b", Direction::Forward);

        let node = cache
            .seek(Bound::Included(b"a"), Direction::Forward)
            .expect("should exist");
        assert_eq!(*b"b", &*node.stmt.key);

        let node = cache
            .seek(Bound::Included(b"z"), Direction::Backward)
            .expect("should exist");
        assert_eq!(*b"b", &*node.stmt.key);

        assert!(cache.seek(Bound::Excluded(b"b"), Direction::Forward).is_none());
    }
}
