//! Saved-search handler (spec.md §4.3.10): plain CRUD with globally-unique names.

use std::sync::{Arc, Weak};

use rusqlite::{params, Connection, OptionalExtension};

use crate::concurrency::{TransactionKind, TransactionScope};
use crate::error::Error;
use crate::notifier::Event;
use crate::store::{diacritics, HandlerContext};
use crate::types::ids::{Guid, LocalId};
use crate::types::saved_search::QueryFormat;
use crate::types::{OrderDirection, SavedSearch, SavedSearchListOptions, SavedSearchOrderKey};

pub struct SavedSearchHandler {
    ctx: HandlerContext,
    alive: Arc<()>,
}

fn row_to_saved_search(row: &rusqlite::Row<'_>) -> rusqlite::Result<SavedSearch> {
    Ok(SavedSearch {
        local_id: row.get("local_id")?,
        guid: row.get("guid")?,
        name: row.get("name")?,
        query: row.get("query")?,
        format: row.get::<_, Option<i32>>("format")?.and_then(QueryFormat::from_i32),
        update_sequence_number: row.get("usn")?,
        scope: None,
        locally_modified: row.get::<_, i64>("locally_modified")? != 0,
        locally_favorited: row.get::<_, i64>("locally_favorited")? != 0,
        local_only: row.get::<_, i64>("local_only")? != 0,
    })
}

fn fill_scope(conn: &Connection, search: &mut SavedSearch) -> Result<(), Error> {
    search.scope = conn
        .query_row(
            "SELECT includes_account, includes_personal_linked_notebooks, includes_business_linked_notebooks \
             FROM saved_search_scope WHERE search_local_id = ?1",
            params![search.local_id],
            |row| {
                Ok(crate::types::saved_search::SavedSearchScope {
                    includes_account: row.get::<_, Option<i64>>(0)?.unwrap_or(0) != 0,
                    includes_personal_linked_notebooks: row.get::<_, Option<i64>>(1)?.unwrap_or(0) != 0,
                    includes_business_linked_notebooks: row.get::<_, Option<i64>>(2)?.unwrap_or(0) != 0,
                })
            },
        )
        .optional()?;
    Ok(())
}

fn resolve_local_id(conn: &Connection, search: &SavedSearch) -> Result<LocalId, Error> {
    if !search.local_id.as_str().is_empty() {
        return Ok(search.local_id.clone());
    }
    if let Some(guid) = &search.guid {
        if let Some(existing) = conn
            .query_row("SELECT local_id FROM saved_searches WHERE guid = ?1", params![guid], |r| r.get::<_, LocalId>(0))
            .optional()?
        {
            return Ok(existing);
        }
    }
    Ok(LocalId::generate())
}

fn put(conn: &Connection, mut search: SavedSearch) -> Result<(), Error> {
    if search.name.trim().is_empty() {
        return Err(Error::InvalidArgument("saved search name must not be empty".to_string()));
    }

    let scope = TransactionScope::new(conn, TransactionKind::Immediate)?;
    let conn = scope.connection();
    let local_id = resolve_local_id(conn, &search)?;
    search.local_id = local_id.clone();
    let name_lower = diacritics::strip(&search.name);

    conn.execute(
        "INSERT INTO saved_searches \
            (local_id, guid, name, name_lower, query, format, usn, locally_modified, locally_favorited, local_only) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10) \
         ON CONFLICT(local_id) DO UPDATE SET \
            guid = excluded.guid, name = excluded.name, name_lower = excluded.name_lower, query = excluded.query, \
            format = excluded.format, usn = excluded.usn, locally_modified = excluded.locally_modified, \
            locally_favorited = excluded.locally_favorited, local_only = excluded.local_only",
        params![
            local_id,
            search.guid,
            search.name,
            name_lower,
            search.query,
            search.format.map(|v| v as i32),
            search.update_sequence_number,
            search.locally_modified as i64,
            search.locally_favorited as i64,
            search.local_only as i64,
        ],
    )?;

    conn.execute("DELETE FROM saved_search_scope WHERE search_local_id = ?1", params![local_id])?;
    if let Some(s) = &search.scope {
        conn.execute(
            "INSERT INTO saved_search_scope \
                (search_local_id, includes_account, includes_personal_linked_notebooks, includes_business_linked_notebooks) \
             VALUES (?1, ?2, ?3, ?4)",
            params![local_id, s.includes_account as i64, s.includes_personal_linked_notebooks as i64, s.includes_business_linked_notebooks as i64],
        )?;
    }

    scope.commit()
}

fn list(conn: &Connection, options: &SavedSearchListOptions) -> Result<Vec<SavedSearch>, Error> {
    let mut sql = "SELECT * FROM saved_searches WHERE 1=1".to_string();
    if let Some(pred) = options.locally_modified.sql_predicate("locally_modified") {
        sql.push_str(&format!(" AND {pred}"));
    }
    if let Some(pred) = options.locally_favorited.sql_predicate("locally_favorited") {
        sql.push_str(&format!(" AND {pred}"));
    }
    if let Some((key, direction)) = options.order {
        let column = match key {
            SavedSearchOrderKey::Name => "name_lower",
            SavedSearchOrderKey::UpdateSequenceNumber => "usn",
        };
        sql.push_str(&format!(" ORDER BY {column} {}", direction.sql_keyword()));
    } else {
        sql.push_str(" ORDER BY name_lower ASC");
    }
    if let Some(limit) = options.pagination.limit {
        sql.push_str(&format!(" LIMIT {limit}"));
        if let Some(offset) = options.pagination.offset {
            sql.push_str(&format!(" OFFSET {offset}"));
        }
    }

    let mut stmt = conn.prepare(&sql)?;
    let mut searches = stmt.query_map([], row_to_saved_search)?.collect::<rusqlite::Result<Vec<_>>>()?;
    for search in &mut searches {
        fill_scope(conn, search)?;
    }
    Ok(searches)
}

impl SavedSearchHandler {
    pub fn new(ctx: HandlerContext) -> Self {
        Self { ctx, alive: Arc::new(()) }
    }

    fn weak(&self) -> Weak<()> {
        Arc::downgrade(&self.alive)
    }

    pub async fn put(&self, search: SavedSearch) -> Result<LocalId, Error> {
        let local_id = if search.local_id.as_str().is_empty() { LocalId::generate() } else { search.local_id.clone() };
        let mut search = search;
        search.local_id = local_id.clone();
        self.ctx.dispatcher.submit_write(self.weak(), move |conn| put(conn, search)).await?;
        self.ctx.notifier.emit(Event::SavedSearchPut(local_id.clone()));
        Ok(local_id)
    }

    pub async fn find_by_local_id(&self, local_id: LocalId) -> Result<Option<SavedSearch>, Error> {
        self.ctx
            .dispatcher
            .submit_read(self.weak(), move |conn| {
                let search = conn
                    .query_row("SELECT * FROM saved_searches WHERE local_id = ?1", params![local_id], row_to_saved_search)
                    .optional()?;
                match search {
                    Some(mut search) => {
                        fill_scope(conn, &mut search)?;
                        Ok(Some(search))
                    },
                    None => Ok(None),
                }
            })
            .await
    }

    pub async fn find_by_guid(&self, guid: Guid) -> Result<Option<SavedSearch>, Error> {
        self.ctx
            .dispatcher
            .submit_read(self.weak(), move |conn| {
                let search = conn
                    .query_row("SELECT * FROM saved_searches WHERE guid = ?1", params![guid], row_to_saved_search)
                    .optional()?;
                match search {
                    Some(mut search) => {
                        fill_scope(conn, &mut search)?;
                        Ok(Some(search))
                    },
                    None => Ok(None),
                }
            })
            .await
    }

    pub async fn find_by_name(&self, name: String) -> Result<Option<SavedSearch>, Error> {
        let name_lower = diacritics::strip(&name);
        self.ctx
            .dispatcher
            .submit_read(self.weak(), move |conn| {
                let search = conn
                    .query_row("SELECT * FROM saved_searches WHERE name_lower = ?1", params![name_lower], row_to_saved_search)
                    .optional()?;
                match search {
                    Some(mut search) => {
                        fill_scope(conn, &mut search)?;
                        Ok(Some(search))
                    },
                    None => Ok(None),
                }
            })
            .await
    }

    pub async fn list(&self, options: SavedSearchListOptions) -> Result<Vec<SavedSearch>, Error> {
        self.ctx.dispatcher.submit_read(self.weak(), move |conn| list(conn, &options)).await
    }

    pub async fn list_guids(&self, options: SavedSearchListOptions) -> Result<Vec<Guid>, Error> {
        Ok(self.list(options).await?.into_iter().filter_map(|s| s.guid).collect())
    }

    /// Sibling of `noteCount` (spec.md §4.3.9): total saved-search rows.
    pub async fn count(&self) -> Result<u64, Error> {
        self.ctx
            .dispatcher
            .submit_read(self.weak(), |conn| {
                let count: i64 = conn.query_row("SELECT COUNT(*) FROM saved_searches", [], |r| r.get(0))?;
                Ok(count as u64)
            })
            .await
    }

    pub async fn expunge(&self, local_id: LocalId) -> Result<(), Error> {
        let id = local_id.clone();
        self.ctx
            .dispatcher
            .submit_write(self.weak(), move |conn| {
                let scope = TransactionScope::new(conn, TransactionKind::Immediate)?;
                scope.connection().execute("DELETE FROM saved_searches WHERE local_id = ?1", params![id])?;
                scope.commit()
            })
            .await?;
        self.ctx.notifier.emit(Event::SavedSearchExpunged(local_id));
        Ok(())
    }
}
