//! Linked-notebook handler (spec.md §4.3.11): plain CRUD keyed solely by guid; expunge
//! cascades to every notebook and tag owned by that linked notebook.

use std::sync::{Arc, Weak};

use rusqlite::{params, Connection, OptionalExtension};

use crate::concurrency::{TransactionKind, TransactionScope};
use crate::error::Error;
use crate::notifier::Event;
use crate::store::HandlerContext;
use crate::types::{Guid, LinkedNotebook};

pub struct LinkedNotebookHandler {
    ctx: HandlerContext,
    alive: Arc<()>,
}

fn row_to_linked_notebook(row: &rusqlite::Row<'_>) -> rusqlite::Result<LinkedNotebook> {
    Ok(LinkedNotebook {
        guid: row.get("guid")?,
        update_sequence_number: row.get("usn")?,
        share_name: row.get("share_name")?,
        username: row.get("username")?,
        shard_id: row.get("shard_id")?,
        shared_notebook_global_id: row.get("shared_notebook_global_id")?,
        uri: row.get("uri")?,
        note_store_url: row.get("note_store_url")?,
        web_api_url_prefix: row.get("web_api_url_prefix")?,
        stack: row.get("stack")?,
        business_id: row.get("business_id")?,
    })
}

fn put(conn: &Connection, linked_notebook: &LinkedNotebook) -> Result<(), Error> {
    let scope = TransactionScope::new(conn, TransactionKind::Immediate)?;
    scope.connection().execute(
        "INSERT INTO linked_notebooks \
            (guid, usn, share_name, username, shard_id, shared_notebook_global_id, uri, \
             note_store_url, web_api_url_prefix, stack, business_id) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11) \
         ON CONFLICT(guid) DO UPDATE SET \
            usn = excluded.usn, share_name = excluded.share_name, username = excluded.username, \
            shard_id = excluded.shard_id, shared_notebook_global_id = excluded.shared_notebook_global_id, \
            uri = excluded.uri, note_store_url = excluded.note_store_url, \
            web_api_url_prefix = excluded.web_api_url_prefix, stack = excluded.stack, \
            business_id = excluded.business_id",
        params![
            linked_notebook.guid,
            linked_notebook.update_sequence_number,
            linked_notebook.share_name,
            linked_notebook.username,
            linked_notebook.shard_id,
            linked_notebook.shared_notebook_global_id,
            linked_notebook.uri,
            linked_notebook.note_store_url,
            linked_notebook.web_api_url_prefix,
            linked_notebook.stack,
            linked_notebook.business_id,
        ],
    )?;
    scope.commit()
}

impl LinkedNotebookHandler {
    pub fn new(ctx: HandlerContext) -> Self {
        Self { ctx, alive: Arc::new(()) }
    }

    fn weak(&self) -> Weak<()> {
        Arc::downgrade(&self.alive)
    }

    pub async fn put(&self, linked_notebook: LinkedNotebook) -> Result<(), Error> {
        if linked_notebook.guid.as_str().is_empty() {
            return Err(Error::InvalidArgument("linked notebook guid must not be empty".to_string()));
        }
        let guid = linked_notebook.guid.clone();
        self.ctx.dispatcher.submit_write(self.weak(), move |conn| put(conn, &linked_notebook)).await?;
        self.ctx.notifier.emit(Event::LinkedNotebookPut(guid));
        Ok(())
    }

    pub async fn find_by_guid(&self, guid: Guid) -> Result<Option<LinkedNotebook>, Error> {
        self.ctx
            .dispatcher
            .submit_read(self.weak(), move |conn| {
                conn.query_row(
                    "SELECT * FROM linked_notebooks WHERE guid = ?1",
                    params![guid],
                    row_to_linked_notebook,
                )
                .optional()
                .map_err(Error::from)
            })
            .await
    }

    pub async fn list(&self) -> Result<Vec<LinkedNotebook>, Error> {
        self.ctx
            .dispatcher
            .submit_read(self.weak(), |conn| {
                let mut stmt = conn.prepare("SELECT * FROM linked_notebooks ORDER BY guid")?;
                let rows = stmt.query_map([], row_to_linked_notebook)?;
                rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Error::from)
            })
            .await
    }

    /// Sibling of `noteCount` (spec.md §4.3.9): total linked-notebook rows.
    pub async fn count(&self) -> Result<u64, Error> {
        self.ctx
            .dispatcher
            .submit_read(self.weak(), |conn| {
                let count: i64 = conn.query_row("SELECT COUNT(*) FROM linked_notebooks", [], |r| r.get(0))?;
                Ok(count as u64)
            })
            .await
    }

    /// Cascades to every notebook (and, transitively, every note/resource) and tag owned by
    /// this linked notebook (spec.md §4.3.11).
    pub async fn expunge(&self, guid: Guid) -> Result<(), Error> {
        self.ctx
            .dispatcher
            .submit_write(self.weak(), move |conn| {
                let scope = TransactionScope::new(conn, TransactionKind::Immediate)?;
                scope
                    .connection()
                    .execute("DELETE FROM linked_notebooks WHERE guid = ?1", params![guid])?;
                scope.commit()
            })
            .await?;
        self.ctx.notifier.emit(Event::LinkedNotebookExpunged(guid));
        Ok(())
    }
}
