// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{stmt::Statement, upsert::apply_upsert};

/// Versions of one key, collected across read sources
///
/// Fragments are held newest first. A source deposits versions of the key it
/// is positioned at until it hits a terminal statement (one that needs no
/// folding), so a history is a run of upserts optionally closed by one
/// terminal fragment at the deep end.
///
/// Histories own their fragments; moving a history (registry growth, splice)
/// moves the owned vector and never copies statements.
#[derive(Debug, Default)]
pub struct History {
    nodes: Vec<Statement>,
}

impl History {
    /// Appends a fragment; callers deposit newest to oldest.
    pub fn push(&mut self, stmt: Statement) {
        debug_assert!(
            self.nodes.last().is_none_or(|last| !last.is_terminal()),
            "cannot deposit past a terminal fragment",
        );
        self.nodes.push(stmt);
    }

    /// Moves all fragments of `other` to the deep end of `self`.
    pub fn splice(&mut self, other: &mut Self) {
        self.nodes.append(&mut other.nodes);
    }

    /// Drops all fragments.
    pub fn clear(&mut self) {
        self.nodes.clear();
    }

    /// Returns `true` if no fragments are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The deepest fragment.
    ///
    /// All fragments share one key, so this is also "the key this history is
    /// about".
    #[must_use]
    pub fn last_stmt(&self) -> Option<&Statement> {
        self.nodes.last()
    }

    /// Returns `true` if the deepest fragment is terminal, i.e. no deeper
    /// source can contribute anything to this key.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.nodes.last().is_some_and(Statement::is_terminal)
    }

    /// Folds the fragments into the key's resulting statement.
    ///
    /// Upserts are applied oldest first onto the terminal fragment (or onto
    /// nothing). With `keep_delete`, a resulting tombstone is returned so the
    /// caller can account for it; otherwise it is suppressed to `None`.
    pub fn apply(&self, keep_delete: bool, upserts_applied: &mut usize) -> Option<Statement> {
        let deepest = self.nodes.last()?;

        let mut result = None;
        let mut upserts = self.nodes.len();

        if deepest.is_terminal() {
            result = Some(deepest.clone());
            upserts -= 1;
        }

        for delta in self.nodes.iter().take(upserts).rev() {
            result = Some(apply_upsert(delta, result.as_ref()));
            *upserts_applied += 1;
        }

        match result {
            Some(stmt) if stmt.is_tombstone() && !keep_delete => None,
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::History;
    use crate::stmt::{Statement, StatementKind};
    use test_log::test;

    fn replace(value: &str, seqno: u64) -> Statement {
        Statement::from_components("k", value, seqno, StatementKind::Replace)
    }

    #[test]
    fn history_terminal_only() {
        let mut history = History::default();
        history.push(replace("x", 9));

        assert!(history.is_terminal());

        let mut upserts = 0;
        let result = history.apply(true, &mut upserts).expect("should resolve");
        assert_eq!(*b"x", &*result.value);
        assert_eq!(0, upserts);
    }

    #[test]
    fn history_folds_upserts_onto_terminal() {
        let mut history = History::default();
        history.push(Statement::new_upsert("k", "+2", 7));
        history.push(Statement::new_upsert("k", "+1", 5));
        history.push(replace("base", 2));

        let mut upserts = 0;
        let result = history.apply(true, &mut upserts).expect("should resolve");
        assert_eq!(*b"base+1+2", &*result.value);
        assert_eq!(StatementKind::Replace, result.kind);
        assert_eq!(2, upserts);
    }

    #[test]
    fn history_upserts_without_terminal() {
        let mut history = History::default();
        history.push(Statement::new_upsert("k", "b", 7));
        history.push(Statement::new_upsert("k", "a", 5));

        assert!(!history.is_terminal());

        let mut upserts = 0;
        let result = history.apply(true, &mut upserts).expect("should resolve");
        assert_eq!(*b"ab", &*result.value);
        assert_eq!(StatementKind::Insert, result.kind);
    }

    #[test]
    fn history_suppresses_delete() {
        let mut history = History::default();
        history.push(Statement::new_tombstone("k", 4));

        let mut upserts = 0;
        assert!(history.apply(false, &mut upserts).is_none());
        assert!(history.apply(true, &mut upserts).is_some());
    }

    #[test]
    fn history_splice_moves_fragments() {
        let mut newer = History::default();
        newer.push(Statement::new_upsert("k", "+1", 9));

        let mut older = History::default();
        older.push(replace("base", 3));

        newer.splice(&mut older);

        assert!(older.is_empty());
        assert!(newer.is_terminal());
    }
}
