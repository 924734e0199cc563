// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    stmt::{Statement, StatementKind},
    Slice,
};

/// Folds an upsert delta onto an older statement.
///
/// The delta algebra is byte concatenation:
///
/// * onto an `Insert`/`Replace`, the delta is appended to the base value and
///   the result is a `Replace`;
/// * onto a `Delete` or onto nothing, the delta stands alone as an `Insert`;
/// * onto another upsert, the payloads are combined into one upsert, so a
///   deeper terminal can still absorb the whole chain later.
///
/// The result always carries the delta's version and commit state, since the
/// delta is the newer of the two statements.
pub(crate) fn apply_upsert(delta: &Statement, base: Option<&Statement>) -> Statement {
    debug_assert_eq!(StatementKind::Upsert, delta.kind);

    let mut result = match base {
        Some(base) if base.kind == StatementKind::Upsert => Statement {
            key: delta.key.clone(),
            value: Slice::fused(&base.value, &delta.value),
            kind: StatementKind::Upsert,
            seqno: delta.seqno,
            flags: delta.flags,
        },

        Some(base) if !base.is_tombstone() => Statement {
            key: delta.key.clone(),
            value: Slice::fused(&base.value, &delta.value),
            kind: StatementKind::Replace,
            seqno: delta.seqno,
            flags: delta.flags,
        },

        // No visible older version: the delta becomes the initial value
        _ => Statement {
            key: delta.key.clone(),
            value: delta.value.clone(),
            kind: StatementKind::Insert,
            seqno: delta.seqno,
            flags: delta.flags,
        },
    };

    result.flags.uncommitted |= delta.flags.uncommitted;
    result
}
