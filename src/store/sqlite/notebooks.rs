//! Notebook handler (spec.md §4.3.1 - §4.3.4).

use std::sync::{Arc, Weak};

use rusqlite::{params, Connection, OptionalExtension};

use crate::concurrency::{TransactionKind, TransactionScope};
use crate::error::Error;
use crate::notifier::Event;
use crate::store::{diacritics, now_millis, HandlerContext};
use crate::types::ids::{Guid, LocalId};
use crate::types::notebook::{BusinessNotebook, NotebookRecipientSettings, NotebookRestrictions, Publishing, SharedNotebook};
use crate::types::{Affiliation, Notebook, NotebookListOptions, NotebookOrderKey, OrderDirection};

pub struct NotebookHandler {
    ctx: HandlerContext,
    alive: Arc<()>,
}

fn row_to_notebook(row: &rusqlite::Row<'_>) -> rusqlite::Result<Notebook> {
    Ok(Notebook {
        local_id: row.get("local_id")?,
        guid: row.get("guid")?,
        linked_notebook_guid: row.get("linked_notebook_guid")?,
        name: row.get("name")?,
        update_sequence_number: row.get("usn")?,
        created: row.get("created")?,
        updated: row.get("updated")?,
        is_default: row.get::<_, i64>("is_default")? != 0,
        locally_modified: row.get::<_, i64>("locally_modified")? != 0,
        locally_favorited: row.get::<_, i64>("locally_favorited")? != 0,
        local_only: row.get::<_, i64>("local_only")? != 0,
        contact_id: row.get("contact_id")?,
        publishing: None,
        business_notebook: None,
        restrictions: None,
        recipient_settings: None,
        shared_notebooks: Vec::new(),
    })
}

fn fill_sub_blocks(conn: &Connection, notebook: &mut Notebook) -> Result<(), Error> {
    notebook.publishing = conn
        .query_row(
            "SELECT uri, ord, ascending, public_description FROM notebook_publishing WHERE notebook_local_id = ?1",
            params![notebook.local_id],
            |row| {
                Ok(Publishing {
                    uri: row.get(0)?,
                    order: row.get(1)?,
                    ascending: row.get::<_, Option<i64>>(2)?.map(|v| v != 0),
                    public_description: row.get(3)?,
                })
            },
        )
        .optional()?;

    notebook.business_notebook = conn
        .query_row(
            "SELECT notebook_description, privilege, recommended FROM notebook_business WHERE notebook_local_id = ?1",
            params![notebook.local_id],
            |row| {
                Ok(BusinessNotebook {
                    notebook_description: row.get(0)?,
                    privilege: row
                        .get::<_, Option<i32>>(1)?
                        .and_then(crate::types::notebook::SharedNotebookPrivilegeLevel::from_i32),
                    recommended: row.get::<_, Option<i64>>(2)?.map(|v| v != 0),
                })
            },
        )
        .optional()?;

    notebook.restrictions = conn
        .query_row(
            "SELECT no_read_notes, no_create_notes, no_update_notes, no_expunge_notes, no_share_notes, \
                    no_email_notes, no_send_message_to_recipients, no_update_notebook, no_expunge_notebook, \
                    no_set_default_notebook \
             FROM notebook_restrictions WHERE notebook_local_id = ?1",
            params![notebook.local_id],
            |row| {
                let b = |i: usize| -> rusqlite::Result<Option<bool>> { Ok(row.get::<_, Option<i64>>(i)?.map(|v| v != 0)) };
                Ok(NotebookRestrictions {
                    no_read_notes: b(0)?,
                    no_create_notes: b(1)?,
                    no_update_notes: b(2)?,
                    no_expunge_notes: b(3)?,
                    no_share_notes: b(4)?,
                    no_email_notes: b(5)?,
                    no_send_message_to_recipients: b(6)?,
                    no_update_notebook: b(7)?,
                    no_expunge_notebook: b(8)?,
                    no_set_default_notebook: b(9)?,
                })
            },
        )
        .optional()?;

    notebook.recipient_settings = conn
        .query_row(
            "SELECT reminder_notify_email, reminder_notify_in_app FROM notebook_recipient_settings WHERE notebook_local_id = ?1",
            params![notebook.local_id],
            |row| {
                Ok(NotebookRecipientSettings {
                    reminder_notify_email: row.get::<_, Option<i64>>(0)?.map(|v| v != 0),
                    reminder_notify_in_app: row.get::<_, Option<i64>>(1)?.map(|v| v != 0),
                })
            },
        )
        .optional()?;

    let mut stmt = conn.prepare(
        "SELECT shared_notebook_guid, notebook_guid, email, privilege, shared_notebook_created, shared_notebook_modified \
         FROM shared_notebooks WHERE notebook_local_id = ?1 ORDER BY index_in_notebook",
    )?;
    notebook.shared_notebooks = stmt
        .query_map(params![notebook.local_id], |row| {
            Ok(SharedNotebook {
                shared_notebook_guid: row.get(0)?,
                notebook_guid: row.get(1)?,
                email: row.get(2)?,
                privilege: row
                    .get::<_, Option<i32>>(3)?
                    .and_then(crate::types::notebook::SharedNotebookPrivilegeLevel::from_i32),
                shared_notebook_created: row.get(4)?,
                shared_notebook_modified: row.get(5)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(())
}

fn resolve_local_id(conn: &Connection, notebook: &Notebook) -> Result<LocalId, Error> {
    if !notebook.local_id.as_str().is_empty() {
        return Ok(notebook.local_id.clone());
    }
    if let Some(guid) = &notebook.guid {
        if let Some(existing) = conn
            .query_row("SELECT local_id FROM notebooks WHERE guid = ?1", params![guid], |r| r.get::<_, LocalId>(0))
            .optional()?
        {
            return Ok(existing);
        }
    }
    Ok(LocalId::generate())
}

fn put(conn: &Connection, mut notebook: Notebook) -> Result<(), Error> {
    if notebook.name.trim().is_empty() {
        return Err(Error::InvalidArgument("notebook name must not be empty".to_string()));
    }
    if notebook.name.chars().count() > 255 {
        return Err(Error::InvalidArgument("notebook name exceeds the maximum length".to_string()));
    }
    if let Some(linked_guid) = &notebook.linked_notebook_guid {
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM linked_notebooks WHERE guid = ?1)",
            params![linked_guid],
            |r| r.get(0),
        )?;
        if !exists {
            return Err(Error::InvalidArgument(format!("no linked notebook with guid {linked_guid}")));
        }
    }

    let scope = TransactionScope::new(conn, TransactionKind::Immediate)?;
    let conn = scope.connection();
    let local_id = resolve_local_id(conn, &notebook)?;
    notebook.local_id = local_id.clone();
    let name_lower = diacritics::strip(&notebook.name);

    if notebook.is_default {
        conn.execute(
            "UPDATE notebooks SET is_default = 0 \
             WHERE is_default = 1 AND COALESCE(linked_notebook_guid, '') = COALESCE(?1, '') AND local_id != ?2",
            params![notebook.linked_notebook_guid, local_id],
        )?;
    }

    conn.execute(
        "INSERT INTO notebooks \
            (local_id, guid, linked_notebook_guid, name, name_lower, usn, created, updated, is_default, \
             contact_id, locally_modified, locally_favorited, local_only) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13) \
         ON CONFLICT(local_id) DO UPDATE SET \
            guid = excluded.guid, linked_notebook_guid = excluded.linked_notebook_guid, name = excluded.name, \
            name_lower = excluded.name_lower, usn = excluded.usn, created = excluded.created, \
            updated = excluded.updated, is_default = excluded.is_default, contact_id = excluded.contact_id, \
            locally_modified = excluded.locally_modified, locally_favorited = excluded.locally_favorited, \
            local_only = excluded.local_only",
        params![
            local_id,
            notebook.guid,
            notebook.linked_notebook_guid,
            notebook.name,
            name_lower,
            notebook.update_sequence_number,
            notebook.created.unwrap_or_else(now_millis),
            notebook.updated.unwrap_or_else(now_millis),
            notebook.is_default as i64,
            notebook.contact_id,
            notebook.locally_modified as i64,
            notebook.locally_favorited as i64,
            notebook.local_only as i64,
        ],
    )?;

    conn.execute("DELETE FROM notebook_publishing WHERE notebook_local_id = ?1", params![local_id])?;
    if let Some(publishing) = &notebook.publishing {
        conn.execute(
            "INSERT INTO notebook_publishing (notebook_local_id, uri, ord, ascending, public_description) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![local_id, publishing.uri, publishing.order, publishing.ascending.map(|v| v as i64), publishing.public_description],
        )?;
    }

    conn.execute("DELETE FROM notebook_business WHERE notebook_local_id = ?1", params![local_id])?;
    if let Some(business) = &notebook.business_notebook {
        conn.execute(
            "INSERT INTO notebook_business (notebook_local_id, notebook_description, privilege, recommended) \
             VALUES (?1, ?2, ?3, ?4)",
            params![local_id, business.notebook_description, business.privilege.map(|v| v as i32), business.recommended.map(|v| v as i64)],
        )?;
    }

    conn.execute("DELETE FROM notebook_restrictions WHERE notebook_local_id = ?1", params![local_id])?;
    if let Some(r) = &notebook.restrictions {
        conn.execute(
            "INSERT INTO notebook_restrictions \
                (notebook_local_id, no_read_notes, no_create_notes, no_update_notes, no_expunge_notes, \
                 no_share_notes, no_email_notes, no_send_message_to_recipients, no_update_notebook, \
                 no_expunge_notebook, no_set_default_notebook) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                local_id,
                r.no_read_notes.map(|v| v as i64),
                r.no_create_notes.map(|v| v as i64),
                r.no_update_notes.map(|v| v as i64),
                r.no_expunge_notes.map(|v| v as i64),
                r.no_share_notes.map(|v| v as i64),
                r.no_email_notes.map(|v| v as i64),
                r.no_send_message_to_recipients.map(|v| v as i64),
                r.no_update_notebook.map(|v| v as i64),
                r.no_expunge_notebook.map(|v| v as i64),
                r.no_set_default_notebook.map(|v| v as i64),
            ],
        )?;
    }

    conn.execute("DELETE FROM notebook_recipient_settings WHERE notebook_local_id = ?1", params![local_id])?;
    if let Some(rs) = &notebook.recipient_settings {
        conn.execute(
            "INSERT INTO notebook_recipient_settings (notebook_local_id, reminder_notify_email, reminder_notify_in_app) \
             VALUES (?1, ?2, ?3)",
            params![local_id, rs.reminder_notify_email.map(|v| v as i64), rs.reminder_notify_in_app.map(|v| v as i64)],
        )?;
    }

    conn.execute("DELETE FROM shared_notebooks WHERE notebook_local_id = ?1", params![local_id])?;
    for (index, shared) in notebook.shared_notebooks.iter().enumerate() {
        conn.execute(
            "INSERT INTO shared_notebooks \
                (shared_notebook_guid, notebook_local_id, notebook_guid, email, privilege, \
                 shared_notebook_created, shared_notebook_modified, index_in_notebook) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                shared.shared_notebook_guid,
                local_id,
                shared.notebook_guid,
                shared.email,
                shared.privilege.map(|v| v as i32),
                shared.shared_notebook_created,
                shared.shared_notebook_modified,
                index as i64,
            ],
        )?;
    }

    scope.commit()
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

fn list(conn: &Connection, options: &NotebookListOptions) -> Result<Vec<Notebook>, Error> {
    let (affiliation_sql, affiliation_params) = affiliation_predicate(&options.affiliation);
    let mut sql = format!("SELECT * FROM notebooks WHERE 1=1 {affiliation_sql}");
    if let Some(pred) = options.locally_modified.sql_predicate("locally_modified") {
        sql.push_str(&format!(" AND {pred}"));
    }
    if let Some(pred) = options.locally_favorited.sql_predicate("locally_favorited") {
        sql.push_str(&format!(" AND {pred}"));
    }
    if let Some((key, direction)) = options.order {
        let column = match key {
            NotebookOrderKey::CreationTimestamp => "created",
            NotebookOrderKey::ModificationTimestamp => "updated",
            NotebookOrderKey::Title => "name_lower",
            NotebookOrderKey::UpdateSequenceNumber => "usn",
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
    let mut notebooks = stmt
        .query_map(param_refs.as_slice(), row_to_notebook)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    for notebook in &mut notebooks {
        fill_sub_blocks(conn, notebook)?;
    }
    Ok(notebooks)
}

impl NotebookHandler {
    pub fn new(ctx: HandlerContext) -> Self {
        Self { ctx, alive: Arc::new(()) }
    }

    fn weak(&self) -> Weak<()> {
        Arc::downgrade(&self.alive)
    }

    pub async fn put(&self, notebook: Notebook) -> Result<LocalId, Error> {
        let local_id = if notebook.local_id.as_str().is_empty() { LocalId::generate() } else { notebook.local_id.clone() };
        let mut notebook = notebook;
        notebook.local_id = local_id.clone();
        self.ctx.dispatcher.submit_write(self.weak(), move |conn| put(conn, notebook)).await?;
        self.ctx.notifier.emit(Event::NotebookPut(local_id.clone()));
        Ok(local_id)
    }

    pub async fn find_by_local_id(&self, local_id: LocalId) -> Result<Option<Notebook>, Error> {
        self.ctx
            .dispatcher
            .submit_read(self.weak(), move |conn| {
                let notebook = conn
                    .query_row("SELECT * FROM notebooks WHERE local_id = ?1", params![local_id], row_to_notebook)
                    .optional()?;
                match notebook {
                    Some(mut notebook) => {
                        fill_sub_blocks(conn, &mut notebook)?;
                        Ok(Some(notebook))
                    },
                    None => Ok(None),
                }
            })
            .await
    }

    pub async fn find_by_guid(&self, guid: Guid, linked_notebook_guid: Option<Guid>) -> Result<Option<Notebook>, Error> {
        self.ctx
            .dispatcher
            .submit_read(self.weak(), move |conn| {
                let sql = if linked_notebook_guid.is_some() {
                    "SELECT * FROM notebooks WHERE guid = ?1 AND linked_notebook_guid = ?2"
                } else {
                    "SELECT * FROM notebooks WHERE guid = ?1"
                };
                let notebook = if let Some(linked) = &linked_notebook_guid {
                    conn.query_row(sql, params![guid, linked], row_to_notebook).optional()?
                } else {
                    conn.query_row(sql, params![guid], row_to_notebook).optional()?
                };
                match notebook {
                    Some(mut notebook) => {
                        fill_sub_blocks(conn, &mut notebook)?;
                        Ok(Some(notebook))
                    },
                    None => Ok(None),
                }
            })
            .await
    }

    /// `linked_notebook_guid = None` searches both scopes (erroring on ambiguity per
    /// spec.md §9 open question 3); `Some(guid)` with an empty guid forces user-own.
    pub async fn find_by_name(&self, name: String, linked_notebook_guid: Option<Guid>) -> Result<Option<Notebook>, Error> {
        let name_lower = diacritics::strip(&name);
        self.ctx
            .dispatcher
            .submit_read(self.weak(), move |conn| {
                let mut candidates = match &linked_notebook_guid {
                    Some(scope) if scope.as_str().is_empty() => {
                        let mut stmt = conn.prepare("SELECT * FROM notebooks WHERE name_lower = ?1 AND linked_notebook_guid IS NULL")?;
                        stmt.query_map(params![name_lower], row_to_notebook)?.collect::<rusqlite::Result<Vec<_>>>()?
                    },
                    Some(scope) => {
                        let mut stmt = conn.prepare("SELECT * FROM notebooks WHERE name_lower = ?1 AND linked_notebook_guid = ?2")?;
                        stmt.query_map(params![name_lower, scope], row_to_notebook)?.collect::<rusqlite::Result<Vec<_>>>()?
                    },
                    None => {
                        let mut stmt = conn.prepare("SELECT * FROM notebooks WHERE name_lower = ?1")?;
                        stmt.query_map(params![name_lower], row_to_notebook)?.collect::<rusqlite::Result<Vec<_>>>()?
                    },
                };
                if candidates.len() > 1 {
                    return Ok(None);
                }
                match candidates.pop() {
                    Some(mut notebook) => {
                        fill_sub_blocks(conn, &mut notebook)?;
                        Ok(Some(notebook))
                    },
                    None => Ok(None),
                }
            })
            .await
    }

    pub async fn find_default(&self) -> Result<Option<Notebook>, Error> {
        self.ctx
            .dispatcher
            .submit_read(self.weak(), |conn| {
                let notebook = conn
                    .query_row(
                        "SELECT * FROM notebooks WHERE is_default = 1 AND linked_notebook_guid IS NULL",
                        [],
                        row_to_notebook,
                    )
                    .optional()?;
                match notebook {
                    Some(mut notebook) => {
                        fill_sub_blocks(conn, &mut notebook)?;
                        Ok(Some(notebook))
                    },
                    None => Ok(None),
                }
            })
            .await
    }

    pub async fn list(&self, options: NotebookListOptions) -> Result<Vec<Notebook>, Error> {
        self.ctx.dispatcher.submit_read(self.weak(), move |conn| list(conn, &options)).await
    }

    pub async fn list_guids(&self, options: NotebookListOptions) -> Result<Vec<Guid>, Error> {
        let notebooks = self.list(options).await?;
        Ok(notebooks.into_iter().filter_map(|nb| nb.guid).collect())
    }

    /// Sibling of `noteCount` (spec.md §4.3.9): total notebook rows, irrespective of
    /// affiliation.
    pub async fn count(&self) -> Result<u64, Error> {
        self.ctx
            .dispatcher
            .submit_read(self.weak(), |conn| {
                let count: i64 = conn.query_row("SELECT COUNT(*) FROM notebooks", [], |r| r.get(0))?;
                Ok(count as u64)
            })
            .await
    }

    /// Cascades to every note (and its resources) in the notebook, in one immediate
    /// transaction (spec.md §4.3.4).
    pub async fn expunge(&self, local_id: LocalId) -> Result<(), Error> {
        let id = local_id.clone();
        self.ctx
            .dispatcher
            .submit_write(self.weak(), move |conn| {
                let scope = TransactionScope::new(conn, TransactionKind::Immediate)?;
                scope.connection().execute("DELETE FROM notebooks WHERE local_id = ?1", params![id])?;
                scope.commit()
            })
            .await?;
        self.ctx.notifier.emit(Event::NotebookExpunged(local_id));
        Ok(())
    }

    /// Deletes by name, optionally scoped to a linked notebook; searches both scopes and
    /// errors on ambiguity when no scope is supplied (spec.md §9 open question 3).
    pub async fn expunge_by_name(&self, name: String, linked_notebook_guid: Option<Guid>) -> Result<(), Error> {
        let notebook = self.find_by_name(name.clone(), linked_notebook_guid).await?;
        let Some(notebook) = notebook else {
            let name_lower = diacritics::strip(&name);
            let count = self
                .ctx
                .dispatcher
                .submit_read(self.weak(), move |conn| {
                    let count: i64 = conn.query_row(
                        "SELECT COUNT(*) FROM notebooks WHERE name_lower = ?1",
                        params![name_lower],
                        |r| r.get(0),
                    )?;
                    Ok(count)
                })
                .await?;
            if count > 1 {
                return Err(Error::InvalidArgument(format!(
                    "notebook name {name:?} is ambiguous across linked-notebook scopes"
                )));
            }
            return Err(Error::InvalidArgument(format!("no notebook named {name:?}")));
        };
        self.expunge(notebook.local_id).await
    }
}
