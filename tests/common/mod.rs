#![allow(dead_code)]

use lsm_read::{
    Lsm, Predicate, ReadIterator, ReadView, Statement, StatementKind,
};

pub fn replace(key: &str, value: &str, seqno: u64) -> Statement {
    Statement::from_components(key, value, seqno, StatementKind::Replace)
}

pub fn insert(key: &str, value: &str, seqno: u64) -> Statement {
    Statement::from_components(key, value, seqno, StatementKind::Insert)
}

pub fn tombstone(key: &str, seqno: u64) -> Statement {
    Statement::new_tombstone(key, seqno)
}

pub fn upsert(key: &str, delta: &str, seqno: u64) -> Statement {
    Statement::new_upsert(key, delta, seqno)
}

/// Drains an iterator into `(key, value)` pairs.
pub fn collect(iter: &mut ReadIterator) -> Vec<(String, String)> {
    let mut items = Vec::new();

    while let Some(stmt) = iter.next().expect("iteration should succeed") {
        items.push((
            String::from_utf8_lossy(&stmt.key).into_owned(),
            String::from_utf8_lossy(&stmt.value).into_owned(),
        ));
    }

    items
}

/// Drains an iterator, returning keys only.
pub fn collect_keys(iter: &mut ReadIterator) -> Vec<String> {
    collect(iter).into_iter().map(|(key, _)| key).collect()
}

/// Opens an iterator with no transaction under the newest read view.
pub fn scan(lsm: &Lsm, predicate: Predicate, key: &str) -> ReadIterator {
    ReadIterator::open(lsm.clone(), None, predicate, key, None, ReadView::newest())
}

/// An index with one sealed level and one disk run:
///
/// * disk:   (a, "a0", 1), (c, "c0", 2), (e, "e0", 3)
/// * sealed: (b, "b1", 4), (c, "c1", 5)
/// * active: (d, "d2", 6)
pub fn three_tier_fixture() -> Lsm {
    let lsm = Lsm::new();

    lsm.insert_stmt(replace("a", "a0", 1));
    lsm.insert_stmt(replace("c", "c0", 2));
    lsm.insert_stmt(replace("e", "e0", 3));
    lsm.rotate_memtable();
    lsm.dump_sealed();

    lsm.insert_stmt(replace("b", "b1", 4));
    lsm.insert_stmt(replace("c", "c1", 5));
    lsm.rotate_memtable();

    lsm.insert_stmt(replace("d", "d2", 6));

    lsm.seqno().set(6);
    lsm
}
