mod common;

use common::{collect, replace, scan};
use lsm_read::{KeyDef, Lsm, Predicate};
use std::sync::atomic::{AtomicUsize, Ordering::Relaxed};
use std::sync::Arc;
use test_log::test;

fn count_disk_reads(lsm: &Lsm) -> Arc<AtomicUsize> {
    let counter = Arc::new(AtomicUsize::new(0));
    let hook = counter.clone();
    lsm.on_disk_read(move || {
        hook.fetch_add(1, Relaxed);
    });
    counter
}

/// Disk run + sealed level + active level, all holding key "4"
fn layered_point() -> Lsm {
    let lsm = Lsm::new();

    lsm.insert_stmt(replace("4", "disk", 1));
    lsm.insert_stmt(replace("5", "disk", 2));
    lsm.rotate_memtable();
    lsm.dump_sealed();

    lsm.insert_stmt(replace("4", "stale", 3));
    lsm.rotate_memtable();

    lsm.insert_stmt(replace("4", "hit", 9));
    lsm
}

#[test]
fn exact_match_skips_deeper_sources() {
    let lsm = layered_point();
    let reads = count_disk_reads(&lsm);

    let mut iter = scan(&lsm, Predicate::Eq, "4");
    assert_eq!(
        vec![("4".to_owned(), "hit".to_owned())],
        collect(&mut iter),
    );

    // The disk slice was never touched: the newest tier produced an exact
    // terminal match, and for Eq the winning source is marked last
    assert_eq!(0, reads.load(Relaxed));
}

#[test]
fn exact_match_only_covers_the_first_key() {
    let lsm = layered_point();
    let reads = count_disk_reads(&lsm);

    let mut iter = scan(&lsm, Predicate::Ge, "4");
    let first = iter
        .next()
        .expect("iteration should succeed")
        .expect("should exist");
    assert_eq!(*b"hit", &*first.value);
    assert_eq!(0, reads.load(Relaxed));

    // "5" only exists on disk, so the scan must go deeper now
    let second = iter
        .next()
        .expect("iteration should succeed")
        .expect("should exist");
    assert_eq!(*b"5", &*second.key);
    assert!(reads.load(Relaxed) > 0);
}

#[test]
fn non_unique_index_disables_the_short_circuit() {
    let lsm = Lsm::with_key_def(KeyDef { is_unique: false });

    lsm.insert_stmt(replace("4", "disk", 1));
    lsm.rotate_memtable();
    lsm.dump_sealed();

    lsm.insert_stmt(replace("4", "hit", 9));

    let reads = count_disk_reads(&lsm);

    let mut iter = scan(&lsm, Predicate::Eq, "4");
    assert_eq!(
        vec![("4".to_owned(), "hit".to_owned())],
        collect(&mut iter),
    );

    // Without exact-key knowledge every tier must be consulted
    assert!(reads.load(Relaxed) > 0);
}

#[test]
fn reverse_exact_match_short_circuits_too() {
    let lsm = layered_point();
    let reads = count_disk_reads(&lsm);

    let mut iter = scan(&lsm, Predicate::EqReverse, "4");
    assert_eq!(
        vec![("4".to_owned(), "hit".to_owned())],
        collect(&mut iter),
    );

    assert_eq!(0, reads.load(Relaxed));
}
