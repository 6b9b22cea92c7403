//! Tag handler (spec.md §4.3.5 - §4.3.6): a forest of tags per (owner, linked-notebook)
//! scope, with cascading descendant expunge.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Weak};

use rusqlite::{params, Connection, OptionalExtension};

use crate::concurrency::{TransactionKind, TransactionScope};
use crate::error::Error;
use crate::notifier::Event;
use crate::store::{diacritics, HandlerContext};
use crate::types::ids::{Guid, LocalId};
use crate::types::{Affiliation, OrderDirection, Tag, TagListOptions, TagOrderKey};

pub struct TagHandler {
    ctx: HandlerContext,
    alive: Arc<()>,
}

fn row_to_tag(row: &rusqlite::Row<'_>) -> rusqlite::Result<Tag> {
    Ok(Tag {
        local_id: row.get("local_id")?,
        guid: row.get("guid")?,
        name: row.get("name")?,
        update_sequence_number: row.get("usn")?,
        parent_tag_local_id: row.get("parent_tag_local_id")?,
        parent_tag_guid: row.get("parent_tag_guid")?,
        linked_notebook_guid: row.get("linked_notebook_guid")?,
        locally_modified: row.get::<_, i64>("locally_modified")? != 0,
        locally_favorited: row.get::<_, i64>("locally_favorited")? != 0,
        local_only: row.get::<_, i64>("local_only")? != 0,
        is_placeholder: row.get::<_, i64>("is_placeholder")? != 0,
    })
}

fn resolve_local_id(conn: &Connection, tag: &Tag) -> Result<LocalId, Error> {
    if !tag.local_id.as_str().is_empty() {
        return Ok(tag.local_id.clone());
    }
    if let Some(guid) = &tag.guid {
        if let Some(existing) =
            conn.query_row("SELECT local_id FROM tags WHERE guid = ?1", params![guid], |r| r.get::<_, LocalId>(0)).optional()?
        {
            return Ok(existing);
        }
    }
    Ok(LocalId::generate())
}

/// Validates a supplied parent reference (spec.md §4.3.5: "if a parent-tag reference is
/// supplied, a tag row with that local id or guid must exist") and returns the parent's
/// local id, preferring `parent_tag_local_id` and falling back to a `parent_tag_guid` lookup.
fn validate_parent(conn: &Connection, tag: &Tag) -> Result<Option<LocalId>, Error> {
    if let Some(parent_local_id) = &tag.parent_tag_local_id {
        let exists: bool =
            conn.query_row("SELECT EXISTS(SELECT 1 FROM tags WHERE local_id = ?1)", params![parent_local_id], |r| r.get(0))?;
        if !exists {
            return Err(Error::InvalidArgument(format!("no parent tag with local id {parent_local_id}")));
        }
        return Ok(Some(parent_local_id.clone()));
    }
    if let Some(parent_guid) = &tag.parent_tag_guid {
        let resolved: Option<LocalId> =
            conn.query_row("SELECT local_id FROM tags WHERE guid = ?1", params![parent_guid], |r| r.get(0)).optional()?;
        if resolved.is_none() {
            return Err(Error::InvalidArgument(format!("no parent tag with guid {parent_guid}")));
        }
        return Ok(resolved);
    }
    Ok(None)
}

/// Walks `parent_tag_local_id` upward from `start`, returning true if `target` is `start`
/// itself or one of its ancestors (spec.md §3 invariant 4: the tag-parent relation is a
/// forest, so a put that would introduce a cycle must fail).
fn is_ancestor(conn: &Connection, start: &LocalId, target: &LocalId) -> Result<bool, Error> {
    let mut seen = HashSet::new();
    let mut current = Some(start.clone());
    while let Some(id) = current {
        if &id == target {
            return Ok(true);
        }
        if !seen.insert(id.clone()) {
            break;
        }
        current = conn
            .query_row("SELECT parent_tag_local_id FROM tags WHERE local_id = ?1", params![id], |r| r.get::<_, Option<LocalId>>(0))
            .optional()?
            .flatten();
    }
    Ok(false)
}

fn put(conn: &Connection, mut tag: Tag) -> Result<(), Error> {
    if tag.name.trim().is_empty() {
        return Err(Error::InvalidArgument("tag name must not be empty".to_string()));
    }
    if let Some(parent_local_id) = validate_parent(conn, &tag)? {
        if is_ancestor(conn, &parent_local_id, &tag.local_id)? {
            return Err(Error::InvalidArgument(format!(
                "tag {} cannot be its own ancestor via parent {parent_local_id}",
                tag.local_id
            )));
        }
    }

    let scope = TransactionScope::new(conn, TransactionKind::Immediate)?;
    let conn = scope.connection();
    let local_id = resolve_local_id(conn, &tag)?;
    tag.local_id = local_id.clone();
    let name_lower = diacritics::strip(&tag.name);

    conn.execute(
        "INSERT INTO tags \
            (local_id, guid, name, name_lower, usn, parent_tag_local_id, parent_tag_guid, \
             linked_notebook_guid, is_placeholder, locally_modified, locally_favorited, local_only) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12) \
         ON CONFLICT(local_id) DO UPDATE SET \
            guid = excluded.guid, name = excluded.name, name_lower = excluded.name_lower, usn = excluded.usn, \
            parent_tag_local_id = excluded.parent_tag_local_id, parent_tag_guid = excluded.parent_tag_guid, \
            linked_notebook_guid = excluded.linked_notebook_guid, is_placeholder = excluded.is_placeholder, \
            locally_modified = excluded.locally_modified, locally_favorited = excluded.locally_favorited, \
            local_only = excluded.local_only",
        params![
            local_id,
            tag.guid,
            tag.name,
            name_lower,
            tag.update_sequence_number,
            tag.parent_tag_local_id,
            tag.parent_tag_guid,
            tag.linked_notebook_guid,
            tag.is_placeholder as i64,
            tag.locally_modified as i64,
            tag.locally_favorited as i64,
            tag.local_only as i64,
        ],
    )?;

    scope.commit()
}

/// Walks `parent_tag_local_id` transitively to find every descendant of `root` (spec.md
/// §4.3.6).
fn descendants(conn: &Connection, root: &LocalId) -> Result<Vec<LocalId>, Error> {
    let mut seen = HashSet::new();
    let mut queue = VecDeque::from([root.clone()]);
    let mut descendants = Vec::new();

    while let Some(current) = queue.pop_front() {
        let mut stmt = conn.prepare("SELECT local_id FROM tags WHERE parent_tag_local_id = ?1")?;
        let children = stmt.query_map(params![current], |r| r.get::<_, LocalId>(0))?.collect::<rusqlite::Result<Vec<_>>>()?;
        for child in children {
            if seen.insert(child.clone()) {
                descendants.push(child.clone());
                queue.push_back(child);
            }
        }
    }
    Ok(descendants)
}

fn affiliation_predicate(affiliation: &Affiliation) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
    match affiliation {
        Affiliation::Any => (String::new(), Vec::new()),
        Affiliation::User => ("AND linked_notebook_guid IS NULL".to_string(), Vec::new()),
        Affiliation::AnyLinkedNotebook => ("AND linked_notebook_guid IS NOT NULL".to_string(), Vec::new()),
        Affiliation::ParticularLinkedNotebooks(guids) => {
            if guids.is_empty() {
                ("AND 0".to_string(), Vec::new())
            } else {
                let placeholders = guids.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
                let params: Vec<Box<dyn rusqlite::ToSql>> =
                    guids.iter().map(|g| Box::new(g.as_str().to_string()) as Box<dyn rusqlite::ToSql>).collect();
                (format!("AND linked_notebook_guid IN ({placeholders})"), params)
            }
        },
    }
}

fn list(conn: &Connection, options: &TagListOptions) -> Result<Vec<Tag>, Error> {
    let (affiliation_sql, affiliation_params) = affiliation_predicate(&options.affiliation);
    let mut sql = format!("SELECT * FROM tags WHERE 1=1 {affiliation_sql}");
    if let Some(pred) = options.locally_modified.sql_predicate("locally_modified") {
        sql.push_str(&format!(" AND {pred}"));
    }
    if let Some(pred) = options.locally_favorited.sql_predicate("locally_favorited") {
        sql.push_str(&format!(" AND {pred}"));
    }
    if let Some((key, direction)) = options.order {
        let column = match key {
            TagOrderKey::Name => "name_lower",
            TagOrderKey::UpdateSequenceNumber => "usn",
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
    let param_refs: Vec<&dyn rusqlite::ToSql> = affiliation_params.iter().map(|b| b.as_ref()).collect();
    stmt.query_map(param_refs.as_slice(), row_to_tag)?.collect::<rusqlite::Result<Vec<_>>>().map_err(Error::from)
}

impl TagHandler {
    pub fn new(ctx: HandlerContext) -> Self {
        Self { ctx, alive: Arc::new(()) }
    }

    fn weak(&self) -> Weak<()> {
        Arc::downgrade(&self.alive)
    }

    pub async fn put(&self, tag: Tag) -> Result<LocalId, Error> {
        let local_id = if tag.local_id.as_str().is_empty() { LocalId::generate() } else { tag.local_id.clone() };
        let mut tag = tag;
        tag.local_id = local_id.clone();
        self.ctx.dispatcher.submit_write(self.weak(), move |conn| put(conn, tag)).await?;
        self.ctx.notifier.emit(Event::TagPut(local_id.clone()));
        Ok(local_id)
    }

    pub async fn find_by_local_id(&self, local_id: LocalId) -> Result<Option<Tag>, Error> {
        self.ctx
            .dispatcher
            .submit_read(self.weak(), move |conn| {
                conn.query_row("SELECT * FROM tags WHERE local_id = ?1", params![local_id], row_to_tag)
                    .optional()
                    .map_err(Error::from)
            })
            .await
    }

    pub async fn find_by_guid(&self, guid: Guid) -> Result<Option<Tag>, Error> {
        self.ctx
            .dispatcher
            .submit_read(self.weak(), move |conn| {
                conn.query_row("SELECT * FROM tags WHERE guid = ?1", params![guid], row_to_tag).optional().map_err(Error::from)
            })
            .await
    }

    pub async fn find_by_name(&self, name: String, linked_notebook_guid: Option<Guid>) -> Result<Option<Tag>, Error> {
        let name_lower = diacritics::strip(&name);
        self.ctx
            .dispatcher
            .submit_read(self.weak(), move |conn| {
                let mut candidates = match &linked_notebook_guid {
                    Some(scope) if scope.as_str().is_empty() => {
                        let mut stmt = conn.prepare("SELECT * FROM tags WHERE name_lower = ?1 AND linked_notebook_guid IS NULL")?;
                        stmt.query_map(params![name_lower], row_to_tag)?.collect::<rusqlite::Result<Vec<_>>>()?
                    },
                    Some(scope) => {
                        let mut stmt = conn.prepare("SELECT * FROM tags WHERE name_lower = ?1 AND linked_notebook_guid = ?2")?;
                        stmt.query_map(params![name_lower, scope], row_to_tag)?.collect::<rusqlite::Result<Vec<_>>>()?
                    },
                    None => {
                        let mut stmt = conn.prepare("SELECT * FROM tags WHERE name_lower = ?1")?;
                        stmt.query_map(params![name_lower], row_to_tag)?.collect::<rusqlite::Result<Vec<_>>>()?
                    },
                };
                if candidates.len() > 1 {
                    return Ok(None);
                }
                Ok(candidates.pop())
            })
            .await
    }

    pub async fn list(&self, options: TagListOptions) -> Result<Vec<Tag>, Error> {
        self.ctx.dispatcher.submit_read(self.weak(), move |conn| list(conn, &options)).await
    }

    pub async fn list_guids(&self, options: TagListOptions) -> Result<Vec<Guid>, Error> {
        Ok(self.list(options).await?.into_iter().filter_map(|tag| tag.guid).collect())
    }

    /// Sibling of `noteCount` (spec.md §4.3.9): total tag rows.
    pub async fn count(&self) -> Result<u64, Error> {
        self.ctx
            .dispatcher
            .submit_read(self.weak(), |conn| {
                let count: i64 = conn.query_row("SELECT COUNT(*) FROM tags", [], |r| r.get(0))?;
                Ok(count as u64)
            })
            .await
    }

    /// Cascades to every transitive descendant tag, emitting one `tag-expunged` event
    /// carrying the ancestor and the cascaded set (spec.md §4.3.6).
    pub async fn expunge(&self, local_id: LocalId) -> Result<(), Error> {
        let id = local_id.clone();
        let expunged_descendants = self
            .ctx
            .dispatcher
            .submit_write(self.weak(), move |conn| {
                let scope = TransactionScope::new(conn, TransactionKind::Immediate)?;
                let conn = scope.connection();
                let descendants = descendants(conn, &id)?;
                for descendant in descendants.iter().rev() {
                    conn.execute("DELETE FROM tags WHERE local_id = ?1", params![descendant])?;
                }
                conn.execute("DELETE FROM tags WHERE local_id = ?1", params![id])?;
                scope.commit()?;
                Ok(descendants)
            })
            .await?;
        self.ctx.notifier.emit(Event::TagExpunged { local_id, expunged_child_local_ids: expunged_descendants });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::error::Error;
    use crate::test_utils::in_memory_storage;
    use crate::types::Tag;

    /// spec.md §4.3.5: a parent reference supplied by guid, not just by local id, must be
    /// validated against existing tags.
    #[tokio::test]
    async fn put_rejects_a_dangling_parent_guid() {
        let storage = in_memory_storage().await;
        let result = storage
            .tags()
            .put(Tag { name: "child".to_string(), parent_tag_guid: Some("nonexistent".to_string().into()), ..Default::default() })
            .await;
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    /// spec.md §3 invariant 4: the tag-parent relation is a forest; re-parenting an ancestor
    /// onto its own descendant must fail rather than silently introduce a cycle.
    #[tokio::test]
    async fn put_rejects_a_cycle() {
        let storage = in_memory_storage().await;
        let a = storage.tags().put(Tag { name: "a".to_string(), ..Default::default() }).await.unwrap();
        let b = storage.tags().put(Tag { name: "b".to_string(), parent_tag_local_id: Some(a.clone()), ..Default::default() }).await.unwrap();

        let result = storage
            .tags()
            .put(Tag { local_id: a, name: "a".to_string(), parent_tag_local_id: Some(b), ..Default::default() })
            .await;
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }
}
