//! Transaction scope (spec.md §4.1), grounded directly on
//! `original_source/src/local_storage/sql/Transaction.{h,cpp}`: a scope carries a `Kind`:
//! plain (deferred), immediate (reserved lock up front), exclusive, or selection (read-only
//! `BEGIN`/`END`). On drop, a plain/immediate/exclusive scope that wasn't explicitly
//! finished rolls back; a selection scope issues `END`. Explicit `commit`/`rollback`/`end`
//! are idempotent with respect to the destructor because they consume `self`, but the
//! underlying "did we already finish" flag is also checked so a `Drop` that runs after a
//! failed explicit call still does the right thing.

use std::cell::Cell;

use rusqlite::Connection;

use crate::error::Error;

/// The four transaction kinds spec.md §4.1 names.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransactionKind {
    Plain,
    Immediate,
    Exclusive,
    Selection,
}

impl TransactionKind {
    fn begin_sql(self) -> &'static str {
        match self {
            TransactionKind::Plain => "BEGIN",
            TransactionKind::Immediate => "BEGIN IMMEDIATE",
            TransactionKind::Exclusive => "BEGIN EXCLUSIVE",
            TransactionKind::Selection => "BEGIN",
        }
    }
}

/// A scoped acquisition of a database transaction.
///
/// A failed `BEGIN` surfaces synchronously from [`TransactionScope::new`] as a
/// `DatabaseRequestError` (spec.md §4.1 "Failure semantics").
pub struct TransactionScope<'conn> {
    conn: &'conn Connection,
    kind: TransactionKind,
    finished: Cell<bool>,
}

impl<'conn> TransactionScope<'conn> {
    pub fn new(conn: &'conn Connection, kind: TransactionKind) -> Result<Self, Error> {
        conn.execute_batch(kind.begin_sql())?;
        Ok(Self { conn, kind, finished: Cell::new(false) })
    }

    /// Connection to run statements against while the scope is open.
    pub fn connection(&self) -> &'conn Connection {
        self.conn
    }

    /// Commits the transaction. A failure here leaves the scope un-finished so the
    /// destructor still attempts a rollback (spec.md §4.1 "Commit failure leaves the scope
    /// in an un-committed state").
    pub fn commit(self) -> Result<(), Error> {
        debug_assert_ne!(self.kind, TransactionKind::Selection, "selection scopes end, they don't commit");
        self.conn.execute_batch("COMMIT")?;
        self.finished.set(true);
        Ok(())
    }

    /// Explicitly rolls back. Idempotent: calling it twice (impossible by ownership, but the
    /// destructor re-checks) never double-executes `ROLLBACK`.
    pub fn rollback(self) -> Result<(), Error> {
        self.conn.execute_batch("ROLLBACK")?;
        self.finished.set(true);
        Ok(())
    }

    /// Ends a read-only selection scope.
    pub fn end(self) -> Result<(), Error> {
        debug_assert_eq!(self.kind, TransactionKind::Selection, "only selection scopes end");
        self.conn.execute_batch("END")?;
        self.finished.set(true);
        Ok(())
    }
}

impl Drop for TransactionScope<'_> {
    fn drop(&mut self) {
        if self.finished.get() {
            return;
        }
        let sql = match self.kind {
            TransactionKind::Selection => "END",
            TransactionKind::Plain | TransactionKind::Immediate | TransactionKind::Exclusive => "ROLLBACK",
        };
        if let Err(err) = self.conn.execute_batch(sql) {
            // Rollback failure is logged, never raised (spec.md §4.1).
            tracing::error!(error = %err, "failed to end transaction scope on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT)").unwrap();
        conn
    }

    #[test]
    fn commit_persists_changes() {
        let conn = open();
        {
            let scope = TransactionScope::new(&conn, TransactionKind::Immediate).unwrap();
            scope.connection().execute("INSERT INTO t (v) VALUES ('a')", []).unwrap();
            scope.commit().unwrap();
        }
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM t", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn drop_without_commit_rolls_back() {
        let conn = open();
        {
            let scope = TransactionScope::new(&conn, TransactionKind::Immediate).unwrap();
            scope.connection().execute("INSERT INTO t (v) VALUES ('a')", []).unwrap();
        }
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM t", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn selection_scope_ends_cleanly() {
        let conn = open();
        let scope = TransactionScope::new(&conn, TransactionKind::Selection).unwrap();
        let count: i64 = scope.connection().query_row("SELECT COUNT(*) FROM t", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 0);
        scope.end().unwrap();
    }
}
