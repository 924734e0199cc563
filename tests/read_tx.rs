mod common;

use common::{collect, collect_keys, replace, three_tier_fixture};
use lsm_read::{
    Error, Lsm, Predicate, ReadIterator, ReadView, Transaction, TxState,
};
use std::sync::atomic::{AtomicUsize, Ordering::Relaxed};
use std::sync::Arc;
use test_log::test;

fn tx_scan(lsm: &Lsm, tx: &Arc<Transaction>, predicate: Predicate, key: &str) -> ReadIterator {
    ReadIterator::open(
        lsm.clone(),
        Some(tx.clone()),
        predicate,
        key,
        None,
        tx.read_view().clone(),
    )
}

#[test]
fn write_set_shadows_everything() {
    let lsm = three_tier_fixture();

    let tx = Arc::new(Transaction::new(ReadView::newest(), false));
    tx.put("c", "mine");
    tx.delete("a");
    tx.put("zz", "appended");

    let mut iter = tx_scan(&lsm, &tx, Predicate::Ge, "");
    assert_eq!(
        vec![
            ("b".to_owned(), "b1".to_owned()),
            ("c".to_owned(), "mine".to_owned()),
            ("d".to_owned(), "d2".to_owned()),
            ("e".to_owned(), "e0".to_owned()),
            ("zz".to_owned(), "appended".to_owned()),
        ],
        collect(&mut iter),
    );
}

#[test]
fn write_set_upsert_folds_onto_committed_base() {
    let lsm = three_tier_fixture();

    let tx = Arc::new(Transaction::new(ReadView::newest(), false));
    tx.upsert("c", "+tx");

    let mut iter = tx_scan(&lsm, &tx, Predicate::Eq, "c");
    assert_eq!(
        vec![("c".to_owned(), "c1+tx".to_owned())],
        collect(&mut iter),
    );
}

#[test]
fn writes_between_reads_are_observed() {
    let lsm = three_tier_fixture();

    let tx = Arc::new(Transaction::new(ReadView::newest(), false));

    let mut iter = tx_scan(&lsm, &tx, Predicate::Ge, "");
    let first = iter
        .next()
        .expect("iteration should succeed")
        .expect("should exist");
    assert_eq!(*b"a", &*first.key);

    // The fiber owns the transaction; a write it buffers mid-scan must be
    // picked up by the write-set restore
    tx.put("aa", "inserted-mid-scan");

    assert_eq!(vec!["aa", "b", "c", "d", "e"], collect_keys(&mut iter));
}

#[test]
fn range_reads_are_tracked() {
    let lsm = three_tier_fixture();

    let tx = Arc::new(Transaction::new(ReadView::newest(), false));

    let mut iter = tx_scan(&lsm, &tx, Predicate::Gt, "a");
    let first = iter
        .next()
        .expect("iteration should succeed")
        .expect("should exist");
    assert_eq!(*b"b", &*first.key);

    let tracked = tx.tracked_reads();
    let interval = tracked.first().expect("should be tracked");
    assert_eq!(*b"a", &*interval.begin);
    assert!(!interval.begin_inclusive);
    assert_eq!(*b"b", &*interval.end);
    assert!(interval.end_inclusive);
}

#[test]
fn terminator_tracks_the_open_interval() {
    let lsm = Lsm::new();
    lsm.insert_stmt(replace("a", "v", 1));
    lsm.seqno().set(1);

    let tx = Arc::new(Transaction::new(ReadView::newest(), false));

    let mut iter = tx_scan(&lsm, &tx, Predicate::Gt, "a");
    assert!(iter.next().expect("iteration should succeed").is_none());

    let tracked = tx.tracked_reads();
    let interval = tracked.last().expect("should be tracked");
    // Empty end key: the whole suffix was observed empty
    assert!(interval.end.is_empty());
}

#[test]
fn eq_terminator_tracks_the_search_key() {
    let lsm = Lsm::new();
    lsm.seqno().set(1);

    let tx = Arc::new(Transaction::new(ReadView::newest(), false));

    let mut iter = tx_scan(&lsm, &tx, Predicate::Eq, "missing");
    assert!(iter.next().expect("iteration should succeed").is_none());

    let tracked = tx.tracked_reads();
    let interval = tracked.last().expect("should be tracked");
    assert_eq!(*b"missing", &*interval.begin);
    assert_eq!(*b"missing", &*interval.end);
}

#[test]
fn skipping_prepared_narrows_a_readonly_tx() {
    let lsm = Lsm::new();
    lsm.insert_stmt(replace("a", "committed", 3));
    lsm.insert_stmt(replace("a", "pending", 7).into_prepared());
    lsm.seqno().set(7);

    let tx = Arc::new(Transaction::new(ReadView::newest(), false));

    let mut iter = tx_scan(&lsm, &tx, Predicate::Ge, "");
    assert_eq!(
        vec![("a".to_owned(), "committed".to_owned())],
        collect(&mut iter),
    );

    // The transaction was pushed below the prepared statement
    assert_eq!(6, tx.read_view().vlsn());
    assert_eq!(TxState::Ready, tx.state());
}

#[test]
fn skipping_prepared_aborts_a_writing_tx() {
    let lsm = Lsm::new();
    lsm.insert_stmt(replace("a", "pending", 7).into_prepared());
    lsm.seqno().set(7);

    let tx = Arc::new(Transaction::new(ReadView::newest(), false));
    tx.put("b", "buffered");

    let mut iter = tx_scan(&lsm, &tx, Predicate::Ge, "");
    assert!(matches!(iter.next(), Err(Error::TransactionConflict)));
    assert_eq!(TxState::Aborted, tx.state());
}

#[test]
fn prepared_ok_tx_sees_prepared_statements() {
    let lsm = Lsm::new();
    lsm.insert_stmt(replace("a", "pending", 7).into_prepared());
    lsm.seqno().set(7);

    let tx = Arc::new(Transaction::new(ReadView::newest(), true));

    let mut iter = tx_scan(&lsm, &tx, Predicate::Ge, "");
    assert_eq!(
        vec![("a".to_owned(), "pending".to_owned())],
        collect(&mut iter),
    );
    assert_eq!(TxState::Ready, tx.state());
}

#[test]
fn abort_during_disk_read_fails_the_scan() {
    let lsm = three_tier_fixture();

    let tx = Arc::new(Transaction::new(ReadView::newest(), false));

    let aborter = tx.clone();
    let fired = AtomicUsize::new(0);
    lsm.on_disk_read(move || {
        if fired.fetch_add(1, Relaxed) == 0 {
            aborter.abort();
        }
    });

    let mut iter = tx_scan(&lsm, &tx, Predicate::Ge, "");
    assert!(matches!(iter.next(), Err(Error::TransactionConflict)));
}

#[test]
fn confirm_clears_pending_reads() {
    let lsm = Lsm::new();
    lsm.insert_stmt(replace("a", "pending", 7).into_prepared());
    lsm.seqno().set(7);
    lsm.confirm(7);

    let tx = Arc::new(Transaction::new(ReadView::newest(), false));

    let mut iter = tx_scan(&lsm, &tx, Predicate::Ge, "");
    assert_eq!(
        vec![("a".to_owned(), "pending".to_owned())],
        collect(&mut iter),
    );

    // Nothing was skipped, the read view stays untouched
    assert!(tx.read_view().is_newest());
}
