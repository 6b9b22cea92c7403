//! Synchronization-info aggregator (spec.md §4.5): a read-only handler reporting the
//! highest update-sequence-number across a chosen scope.

use std::sync::{Arc, Weak};

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Error;
use crate::store::HandlerContext;
use crate::types::ids::Guid;

/// Which rows a highest-USN query should consider (spec.md §4.5).
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SyncScope {
    WithinUserOwnContent,
    WithinUserOwnContentAndLinkedNotebooks,
    WithinLinkedNotebook(Guid),
}

pub struct SyncInfoHandler {
    ctx: HandlerContext,
    alive: Arc<()>,
}

/// MAX(usn) over `table`, scoped by `scope_predicate` against `scope_column` (typically
/// `linked_notebook_guid`, or a join-derived equivalent for tables that don't carry that
/// column directly). Returns `None` when the table has no rows in scope.
fn table_max_usn(conn: &Connection, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Option<i64>, Error> {
    conn.query_row(sql, params, |row| row.get::<_, Option<i64>>(0)).optional().map(|v| v.flatten()).map_err(Error::from)
}

fn highest_usn(conn: &Connection, scope: &SyncScope) -> Result<i64, Error> {
    let mut max = 0i64;
    let mut consider = |value: Option<i64>| {
        if let Some(value) = value {
            max = max.max(value);
        }
    };

    match scope {
        SyncScope::WithinUserOwnContent => {
            consider(table_max_usn(conn, "SELECT MAX(usn) FROM notebooks WHERE linked_notebook_guid IS NULL", &[])?);
            consider(table_max_usn(conn, "SELECT MAX(usn) FROM tags WHERE linked_notebook_guid IS NULL", &[])?);
            consider(table_max_usn(
                conn,
                "SELECT MAX(n.usn) FROM notes n JOIN notebooks nb ON nb.local_id = n.notebook_local_id \
                 WHERE nb.linked_notebook_guid IS NULL",
                &[],
            )?);
            consider(table_max_usn(
                conn,
                "SELECT MAX(r.usn) FROM resources r \
                 JOIN notes n ON n.local_id = r.note_local_id \
                 JOIN notebooks nb ON nb.local_id = n.notebook_local_id \
                 WHERE nb.linked_notebook_guid IS NULL",
                &[],
            )?);
            consider(table_max_usn(conn, "SELECT MAX(usn) FROM saved_searches", &[])?);
        },
        SyncScope::WithinUserOwnContentAndLinkedNotebooks => {
            consider(table_max_usn(conn, "SELECT MAX(usn) FROM notebooks", &[])?);
            consider(table_max_usn(conn, "SELECT MAX(usn) FROM tags", &[])?);
            consider(table_max_usn(conn, "SELECT MAX(usn) FROM notes", &[])?);
            consider(table_max_usn(conn, "SELECT MAX(usn) FROM resources", &[])?);
            consider(table_max_usn(conn, "SELECT MAX(usn) FROM saved_searches", &[])?);
            consider(table_max_usn(conn, "SELECT MAX(usn) FROM linked_notebooks", &[])?);
        },
        SyncScope::WithinLinkedNotebook(guid) => {
            consider(table_max_usn(conn, "SELECT MAX(usn) FROM notebooks WHERE linked_notebook_guid = ?1", params![guid])?);
            consider(table_max_usn(conn, "SELECT MAX(usn) FROM tags WHERE linked_notebook_guid = ?1", params![guid])?);
            consider(table_max_usn(
                conn,
                "SELECT MAX(n.usn) FROM notes n JOIN notebooks nb ON nb.local_id = n.notebook_local_id \
                 WHERE nb.linked_notebook_guid = ?1",
                params![guid],
            )?);
            consider(table_max_usn(
                conn,
                "SELECT MAX(r.usn) FROM resources r \
                 JOIN notes n ON n.local_id = r.note_local_id \
                 JOIN notebooks nb ON nb.local_id = n.notebook_local_id \
                 WHERE nb.linked_notebook_guid = ?1",
                params![guid],
            )?);
        },
    }

    Ok(max)
}

impl SyncInfoHandler {
    pub fn new(ctx: HandlerContext) -> Self {
        Self { ctx, alive: Arc::new(()) }
    }

    fn weak(&self) -> Weak<()> {
        Arc::downgrade(&self.alive)
    }

    pub async fn highest_update_sequence_number(&self, scope: SyncScope) -> Result<i64, Error> {
        self.ctx.dispatcher.submit_read(self.weak(), move |conn| highest_usn(conn, &scope)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_schema() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        crate::store::migrations::run(&mut conn).unwrap();
        conn
    }

    #[test]
    fn empty_database_reports_zero() {
        let conn = open_schema();
        let usn = highest_usn(&conn, &SyncScope::WithinUserOwnContent).unwrap();
        assert_eq!(usn, 0);
    }

    #[test]
    fn own_content_ignores_linked_notebook_rows() {
        let conn = open_schema();
        conn.execute(
            "INSERT INTO notebooks (local_id, name, name_lower, usn, linked_notebook_guid) VALUES ('nb-own', 'Own', 'own', 5, NULL)",
            [],
        )
        .unwrap();
        conn.execute("INSERT INTO linked_notebooks (guid, usn) VALUES ('ln-1', 99)", []).unwrap();
        conn.execute(
            "INSERT INTO notebooks (local_id, name, name_lower, usn, linked_notebook_guid) VALUES ('nb-linked', 'Linked', 'linked', 42, 'ln-1')",
            [],
        )
        .unwrap();

        assert_eq!(highest_usn(&conn, &SyncScope::WithinUserOwnContent).unwrap(), 5);
        assert_eq!(highest_usn(&conn, &SyncScope::WithinUserOwnContentAndLinkedNotebooks).unwrap(), 99);
        assert_eq!(highest_usn(&conn, &SyncScope::WithinLinkedNotebook(Guid::new("ln-1"))).unwrap(), 42);
    }
}
