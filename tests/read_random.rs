use lsm_read::{Lsm, Predicate, ReadIterator, ReadView, SeqNo, Statement, StatementKind};
use rand::{rngs::StdRng, Rng, SeedableRng};
use test_log::test;

const KEY_POOL: &[&str] = &[
    "aa", "ab", "ac", "ba", "bb", "bc", "ca", "cb", "cc", "da", "db", "dc", "ea", "eb", "ec",
    "fa", "fb", "fc", "ga", "gb", "gc", "ha", "hb", "hc",
];

fn random_statement(rng: &mut StdRng, seqno: SeqNo) -> Statement {
    let key = KEY_POOL[rng.random_range(0..KEY_POOL.len())];

    match rng.random_range(0..10) {
        0..6 => Statement::from_components(key, format!("v{seqno}"), seqno, StatementKind::Replace),
        6..8 => Statement::new_upsert(key, format!("+{seqno}"), seqno),
        _ => Statement::new_tombstone(key, seqno),
    }
}

/// What a quiescent merge over `statements` must deliver at `vlsn`.
fn model_scan(statements: &[Statement], vlsn: SeqNo) -> Vec<(String, String)> {
    use std::collections::BTreeMap;

    let mut by_key: BTreeMap<Vec<u8>, Vec<&Statement>> = BTreeMap::new();
    for stmt in statements {
        by_key.entry(stmt.key.to_vec()).or_default().push(stmt);
    }

    let mut results = Vec::new();

    for (key, mut versions) in by_key {
        versions.sort_by_key(|stmt| std::cmp::Reverse(stmt.seqno));

        let mut upserts = Vec::new();
        let mut terminal = None;

        for stmt in versions.into_iter().filter(|stmt| stmt.seqno <= vlsn) {
            if stmt.kind == StatementKind::Upsert {
                upserts.push(stmt);
            } else {
                terminal = Some(stmt);
                break;
            }
        }

        let mut result = terminal.map(|stmt| (stmt.kind, stmt.value.to_vec()));

        for delta in upserts.into_iter().rev() {
            result = Some(match result {
                None | Some((StatementKind::Delete, _)) => {
                    (StatementKind::Insert, delta.value.to_vec())
                }
                Some((_, mut base)) => {
                    base.extend_from_slice(&delta.value);
                    (StatementKind::Replace, base)
                }
            });
        }

        if let Some((kind, value)) = result {
            if kind != StatementKind::Delete {
                results.push((
                    String::from_utf8_lossy(&key).into_owned(),
                    String::from_utf8_lossy(&value).into_owned(),
                ));
            }
        }
    }

    results
}

/// Builds an index of random statements scattered randomly across the
/// active level, sealed levels and multi-range disk tiers.
fn random_lsm(rng: &mut StdRng, ops: usize) -> (Lsm, Vec<Statement>) {
    let lsm = Lsm::new();
    let mut statements = Vec::new();

    for i in 0..ops {
        let stmt = random_statement(rng, i as SeqNo + 1);
        statements.push(stmt.clone());
        lsm.insert_stmt(stmt);

        if rng.random_range(0..100) < 15 {
            lsm.rotate_memtable();
        }
        if rng.random_range(0..100) < 10 {
            lsm.dump_sealed();
        }
        if rng.random_range(0..100) < 5 {
            let at = KEY_POOL[rng.random_range(0..KEY_POOL.len())];
            lsm.split_range(at.as_bytes());
        }
    }

    lsm.seqno().set(ops as SeqNo);
    (lsm, statements)
}

fn scan_all(lsm: &Lsm, predicate: Predicate, vlsn: SeqNo) -> Vec<(String, String)> {
    let mut iter = ReadIterator::open(
        lsm.clone(),
        None,
        predicate,
        "",
        None,
        ReadView::at(vlsn),
    );

    let mut items = Vec::new();
    while let Some(stmt) = iter.next().expect("iteration should succeed") {
        items.push((
            String::from_utf8_lossy(&stmt.key).into_owned(),
            String::from_utf8_lossy(&stmt.value).into_owned(),
        ));
    }
    items
}

#[test]
fn random_scans_match_the_model() {
    let mut rng = StdRng::seed_from_u64(0xbeef);

    for round in 0..20 {
        let ops = 50 + round * 10;
        let (lsm, statements) = random_lsm(&mut rng, ops);

        let expected = model_scan(&statements, SeqNo::MAX);

        let forward = scan_all(&lsm, Predicate::Ge, SeqNo::MAX);
        assert_eq!(expected, forward, "forward mismatch in round {round}");

        let mut backward = scan_all(&lsm, Predicate::Le, SeqNo::MAX);
        backward.reverse();
        assert_eq!(expected, backward, "backward mismatch in round {round}");
    }
}

#[test]
fn random_scans_respect_bounded_read_views() {
    let mut rng = StdRng::seed_from_u64(0xfeed);

    for round in 0..10 {
        let ops = 120;
        let (lsm, statements) = random_lsm(&mut rng, ops);

        for vlsn in [1, ops as SeqNo / 3, ops as SeqNo / 2, ops as SeqNo] {
            let expected = model_scan(&statements, vlsn);
            let got = scan_all(&lsm, Predicate::Ge, vlsn);
            assert_eq!(expected, got, "mismatch in round {round} at vlsn {vlsn}");
        }
    }
}

#[test]
fn mutations_between_reads_are_invisible_to_a_snapshot() {
    let mut rng = StdRng::seed_from_u64(0xcafe);

    for round in 0..10 {
        let ops = 100;
        let (lsm, statements) = random_lsm(&mut rng, ops);

        let vlsn = ops as SeqNo;
        let expected = model_scan(&statements, vlsn);

        let mut iter = ReadIterator::open(
            lsm.clone(),
            None,
            Predicate::Ge,
            "",
            None,
            ReadView::at(vlsn),
        );

        let mut got = Vec::new();
        let mut next_seqno = vlsn;

        while let Some(stmt) = iter.next().expect("iteration should succeed") {
            got.push((
                String::from_utf8_lossy(&stmt.key).into_owned(),
                String::from_utf8_lossy(&stmt.value).into_owned(),
            ));

            // Keep writing and reshaping the tree mid-scan; everything new
            // is beyond the snapshot
            next_seqno += 1;
            lsm.insert_stmt(random_statement(&mut rng, next_seqno));

            match rng.random_range(0..6) {
                0 => lsm.rotate_memtable(),
                1 => lsm.dump_sealed(),
                2 => {
                    let at = KEY_POOL[rng.random_range(0..KEY_POOL.len())];
                    lsm.split_range(at.as_bytes());
                }
                3 => {
                    let at = KEY_POOL[rng.random_range(0..KEY_POOL.len())];
                    lsm.compact_range(at.as_bytes());
                }
                _ => {}
            }
        }

        assert_eq!(expected, got, "snapshot mismatch in round {round}");
    }
}
