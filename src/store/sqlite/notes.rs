//! Note handler (spec.md §4.3.7 - §4.3.9): the central entity, owning tags, resources, and
//! shared-note rows.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use rusqlite::{params, Connection, OptionalExtension};

use crate::concurrency::{TransactionKind, TransactionScope};
use crate::error::Error;
use crate::notifier::{Event, NoteUpdateOptions};
use crate::store::resource_files::ResourceFileStore;
use crate::store::sqlite::resources::{delete_resources_for_note, fill_attributes, fill_out_of_band_body, row_to_resource, write_resource_row};
use crate::store::{diacritics, now_millis, search, HandlerContext};
use crate::types::common::{FetchNoteOptions, FetchResourceOptions, NoteCountOptions, UpdateNoteOptions};
use crate::types::ids::{Guid, LocalId};
use crate::types::note::{NoteAttributes, NoteLimits, NoteRestrictions, SharedNote};
use crate::types::{Note, NoteListOptions, NoteOrderKey, OrderDirection};

pub struct NoteHandler {
    ctx: HandlerContext,
    alive: Arc<()>,
}

fn row_to_note(row: &rusqlite::Row<'_>) -> rusqlite::Result<Note> {
    Ok(Note {
        local_id: row.get("local_id")?,
        guid: row.get("guid")?,
        notebook_local_id: row.get("notebook_local_id")?,
        notebook_guid: row.get("notebook_guid")?,
        title: row.get("title")?,
        content: row.get("content")?,
        content_hash: row.get("content_hash")?,
        content_length: row.get("content_length")?,
        created: row.get("created")?,
        updated: row.get("updated")?,
        deleted: row.get("deleted")?,
        active: row.get::<_, i64>("active")? != 0,
        update_sequence_number: row.get("usn")?,
        attributes: None,
        limits: None,
        restrictions: None,
        tag_local_ids: Vec::new(),
        tag_guids: Vec::new(),
        shared_notes: Vec::new(),
        resources: None,
        locally_modified: row.get::<_, i64>("locally_modified")? != 0,
        locally_favorited: row.get::<_, i64>("locally_favorited")? != 0,
        local_only: row.get::<_, i64>("local_only")? != 0,
    })
}

fn fill_tags(conn: &Connection, note: &mut Note) -> Result<(), Error> {
    let mut stmt =
        conn.prepare("SELECT tag_local_id, tag_guid FROM note_tags WHERE note_local_id = ?1 ORDER BY index_in_note")?;
    let rows = stmt
        .query_map(params![note.local_id], |row| Ok((row.get::<_, LocalId>(0)?, row.get::<_, Option<Guid>>(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    note.tag_local_ids = rows.iter().map(|(local_id, _)| local_id.clone()).collect();
    note.tag_guids = rows.into_iter().filter_map(|(_, guid)| guid).collect();
    Ok(())
}

fn fill_shared_notes(conn: &Connection, note: &mut Note) -> Result<(), Error> {
    let mut stmt = conn.prepare(
        "SELECT sharer_user_id, recipient_identity_id, privilege, shared_date \
         FROM shared_notes WHERE note_local_id = ?1 ORDER BY index_in_note",
    )?;
    note.shared_notes = stmt
        .query_map(params![note.local_id], |row| {
            Ok(SharedNote { sharer_user_id: row.get(0)?, recipient_identity_id: row.get(1)?, privilege: row.get(2)?, shared_date: row.get(3)? })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(())
}

fn fill_attributes_block(conn: &Connection, note: &mut Note) -> Result<(), Error> {
    let mut attrs = conn
        .query_row(
            "SELECT subject_date, latitude, longitude, altitude, author, source, source_url, \
                    source_application, share_date, reminder_order, reminder_time, reminder_done_time, \
                    place_name, content_class \
             FROM note_attributes WHERE note_local_id = ?1",
            params![note.local_id],
            |row| {
                Ok(NoteAttributes {
                    subject_date: row.get(0)?,
                    latitude: row.get(1)?,
                    longitude: row.get(2)?,
                    altitude: row.get(3)?,
                    author: row.get(4)?,
                    source: row.get(5)?,
                    source_url: row.get(6)?,
                    source_application: row.get(7)?,
                    share_date: row.get(8)?,
                    reminder_order: row.get(9)?,
                    reminder_time: row.get(10)?,
                    reminder_done_time: row.get(11)?,
                    place_name: row.get(12)?,
                    content_class: row.get(13)?,
                    application_data: None,
                })
            },
        )
        .optional()?;

    if let Some(attrs) = &mut attrs {
        let mut stmt = conn.prepare("SELECT key, value FROM note_application_data WHERE note_local_id = ?1")?;
        let map: BTreeMap<String, String> = stmt
            .query_map(params![note.local_id], |r| Ok((r.get::<_, String>(0)?, r.get::<_, Option<String>>(1)?.unwrap_or_default())))?
            .collect::<rusqlite::Result<_>>()?;
        if !map.is_empty() {
            attrs.application_data = Some(map);
        }
    }

    note.attributes = attrs;

    note.limits = conn
        .query_row(
            "SELECT note_resource_count_max, upload_limit, resource_size_max, note_size_max, uploaded \
             FROM note_limits WHERE note_local_id = ?1",
            params![note.local_id],
            |row| {
                Ok(NoteLimits {
                    note_resource_count_max: row.get(0)?,
                    upload_limit: row.get(1)?,
                    resource_size_max: row.get(2)?,
                    note_size_max: row.get(3)?,
                    uploaded: row.get(4)?,
                })
            },
        )
        .optional()?;

    note.restrictions = conn
        .query_row(
            "SELECT no_update_title, no_update_content, no_email, no_share, no_share_help \
             FROM note_restrictions WHERE note_local_id = ?1",
            params![note.local_id],
            |row| {
                let b = |i: usize| -> rusqlite::Result<Option<bool>> { Ok(row.get::<_, Option<i64>>(i)?.map(|v| v != 0)) };
                Ok(NoteRestrictions {
                    no_update_title: b(0)?,
                    no_update_content: b(1)?,
                    no_email: b(2)?,
                    no_share: b(3)?,
                    no_share_help: b(4)?,
                })
            },
        )
        .optional()?;

    Ok(())
}

fn fill_note(conn: &Connection, files: &ResourceFileStore, note: &mut Note, options: FetchNoteOptions) -> Result<(), Error> {
    fill_attributes_block(conn, note)?;
    fill_tags(conn, note)?;
    fill_shared_notes(conn, note)?;
    if options.contains(FetchNoteOptions::WITH_RESOURCE_METADATA) {
        let resource_options = if options.contains(FetchNoteOptions::WITH_RESOURCE_BINARY_DATA) {
            FetchResourceOptions::WITH_BINARY_DATA
        } else {
            FetchResourceOptions::empty()
        };
        let mut stmt = conn.prepare("SELECT * FROM resources WHERE note_local_id = ?1 ORDER BY index_in_note")?;
        let mut resources =
            stmt.query_map(params![note.local_id], |row| row_to_resource(row, resource_options))?.collect::<rusqlite::Result<Vec<_>>>()?;
        for resource in &mut resources {
            fill_attributes(conn, resource)?;
            fill_out_of_band_body(conn, files, resource)?;
        }
        note.resources = Some(resources);
    } else {
        note.resources = None;
    }
    Ok(())
}

fn resolve_local_id(conn: &Connection, note: &Note) -> Result<LocalId, Error> {
    if !note.local_id.as_str().is_empty() {
        return Ok(note.local_id.clone());
    }
    if let Some(guid) = &note.guid {
        if let Some(existing) =
            conn.query_row("SELECT local_id FROM notes WHERE guid = ?1", params![guid], |r| r.get::<_, LocalId>(0)).optional()?
        {
            return Ok(existing);
        }
    }
    Ok(LocalId::generate())
}

/// Looks up a tag row by local id or guid, creating a placeholder row for a guid with no
/// existing tag (spec.md §4.3.7, §9 open question 2).
fn resolve_tag_link(conn: &Connection, local_id: Option<&LocalId>, guid: Option<&Guid>) -> Result<(LocalId, Option<Guid>), Error> {
    if let Some(local_id) = local_id {
        let found_guid: Option<Guid> =
            conn.query_row("SELECT guid FROM tags WHERE local_id = ?1", params![local_id], |r| r.get(0)).optional()?.flatten();
        return Ok((local_id.clone(), found_guid));
    }
    let guid = guid.expect("caller supplies at least one of local id or guid");
    if let Some(existing) =
        conn.query_row("SELECT local_id FROM tags WHERE guid = ?1", params![guid], |r| r.get::<_, LocalId>(0)).optional()?
    {
        return Ok((existing, Some(guid.clone())));
    }
    let placeholder_id = LocalId::generate();
    conn.execute(
        "INSERT INTO tags (local_id, guid, name, name_lower, is_placeholder) VALUES (?1, ?2, '', '', 1)",
        params![placeholder_id, guid],
    )?;
    Ok((placeholder_id, Some(guid.clone())))
}

fn upsert_core(conn: &Connection, note: &Note) -> Result<(), Error> {
    let notebook_exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM notebooks WHERE local_id = ?1)",
        params![note.notebook_local_id],
        |r| r.get(0),
    )?;
    if !notebook_exists {
        return Err(Error::InvalidArgument(format!("no notebook with local id {}", note.notebook_local_id)));
    }

    let title_stripped = note.title.as_deref().map(diacritics::strip);
    let content_stripped = note.content.as_deref().map(|c| diacritics::strip(&strip_enml_markup(c)));

    conn.execute(
        "INSERT INTO notes \
            (local_id, guid, notebook_local_id, notebook_guid, title, title_stripped, content, \
             content_stripped, content_hash, content_length, created, updated, deleted, active, usn, \
             locally_modified, locally_favorited, local_only) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18) \
         ON CONFLICT(local_id) DO UPDATE SET \
            guid = excluded.guid, notebook_local_id = excluded.notebook_local_id, notebook_guid = excluded.notebook_guid, \
            title = excluded.title, title_stripped = excluded.title_stripped, content = excluded.content, \
            content_stripped = excluded.content_stripped, content_hash = excluded.content_hash, \
            content_length = excluded.content_length, created = excluded.created, updated = excluded.updated, \
            deleted = excluded.deleted, active = excluded.active, usn = excluded.usn, \
            locally_modified = excluded.locally_modified, locally_favorited = excluded.locally_favorited, \
            local_only = excluded.local_only",
        params![
            note.local_id,
            note.guid,
            note.notebook_local_id,
            note.notebook_guid,
            note.title,
            title_stripped,
            note.content,
            content_stripped,
            note.content_hash,
            note.content_length,
            note.created.unwrap_or_else(now_millis),
            note.updated.unwrap_or_else(now_millis),
            note.deleted,
            note.active as i64,
            note.update_sequence_number,
            note.locally_modified as i64,
            note.locally_favorited as i64,
            note.local_only as i64,
        ],
    )?;

    conn.execute("DELETE FROM note_attributes WHERE note_local_id = ?1", params![note.local_id])?;
    conn.execute("DELETE FROM note_application_data WHERE note_local_id = ?1", params![note.local_id])?;
    if let Some(attrs) = &note.attributes {
        conn.execute(
            "INSERT INTO note_attributes \
                (note_local_id, subject_date, latitude, longitude, altitude, author, author_stripped, \
                 source, source_stripped, source_url, source_application, source_application_stripped, \
                 share_date, reminder_order, reminder_time, reminder_done_time, \
                 place_name, place_name_stripped, content_class, content_class_stripped) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)",
            params![
                note.local_id,
                attrs.subject_date,
                attrs.latitude,
                attrs.longitude,
                attrs.altitude,
                attrs.author,
                attrs.author.as_deref().map(diacritics::strip),
                attrs.source,
                attrs.source.as_deref().map(diacritics::strip),
                attrs.source_url,
                attrs.source_application,
                attrs.source_application.as_deref().map(diacritics::strip),
                attrs.share_date,
                attrs.reminder_order,
                attrs.reminder_time,
                attrs.reminder_done_time,
                attrs.place_name,
                attrs.place_name.as_deref().map(diacritics::strip),
                attrs.content_class,
                attrs.content_class.as_deref().map(diacritics::strip),
            ],
        )?;
        if let Some(application_data) = &attrs.application_data {
            for (key, value) in application_data {
                conn.execute(
                    "INSERT INTO note_application_data (note_local_id, key, value) VALUES (?1, ?2, ?3)",
                    params![note.local_id, key, value],
                )?;
            }
        }
    }

    conn.execute("DELETE FROM note_limits WHERE note_local_id = ?1", params![note.local_id])?;
    if let Some(limits) = &note.limits {
        conn.execute(
            "INSERT INTO note_limits \
                (note_local_id, note_resource_count_max, upload_limit, resource_size_max, note_size_max, uploaded) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![note.local_id, limits.note_resource_count_max, limits.upload_limit, limits.resource_size_max, limits.note_size_max, limits.uploaded],
        )?;
    }

    conn.execute("DELETE FROM note_restrictions WHERE note_local_id = ?1", params![note.local_id])?;
    if let Some(r) = &note.restrictions {
        conn.execute(
            "INSERT INTO note_restrictions (note_local_id, no_update_title, no_update_content, no_email, no_share, no_share_help) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                note.local_id,
                r.no_update_title.map(|v| v as i64),
                r.no_update_content.map(|v| v as i64),
                r.no_email.map(|v| v as i64),
                r.no_share.map(|v| v as i64),
                r.no_share_help.map(|v| v as i64),
            ],
        )?;
    }

    conn.execute("DELETE FROM shared_notes WHERE note_local_id = ?1", params![note.local_id])?;
    for (index, shared) in note.shared_notes.iter().enumerate() {
        conn.execute(
            "INSERT INTO shared_notes (note_local_id, index_in_note, sharer_user_id, recipient_identity_id, privilege, shared_date) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![note.local_id, index as i64, shared.sharer_user_id, shared.recipient_identity_id, shared.privilege, shared.shared_date],
        )?;
    }

    Ok(())
}

/// Strips ENML markup down to its text content for the free-term search index (spec.md
/// §4.4 "note content (ENML text-extracted)"). A deliberately simple tag stripper: it is not
/// a validating ENML parser, only an indexing aid.
fn strip_enml_markup(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    let mut in_tag = false;
    for c in content.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {},
        }
    }
    out
}

fn replace_tags(conn: &Connection, note_local_id: &LocalId, tag_local_ids: &[LocalId], tag_guids: &[Guid]) -> Result<Vec<(LocalId, Option<Guid>)>, Error> {
    conn.execute("DELETE FROM note_tags WHERE note_local_id = ?1", params![note_local_id])?;

    let resolved: Vec<(LocalId, Option<Guid>)> = if !tag_local_ids.is_empty() {
        tag_local_ids.iter().map(|id| resolve_tag_link(conn, Some(id), None)).collect::<Result<_, _>>()?
    } else {
        tag_guids.iter().map(|guid| resolve_tag_link(conn, None, Some(guid))).collect::<Result<_, _>>()?
    };

    for (index, (local_id, guid)) in resolved.iter().enumerate() {
        conn.execute(
            "INSERT INTO note_tags (note_local_id, tag_local_id, tag_guid, index_in_note) VALUES (?1, ?2, ?3, ?4)",
            params![note_local_id, local_id, guid, index as i64],
        )?;
    }
    Ok(resolved)
}

/// What changed as a side effect of a `put`/`update`, used to decide which events to emit
/// once the transaction has committed (spec.md §4.2).
struct WriteOutcome {
    local_id: LocalId,
    is_fresh: bool,
    old_notebook_local_id: Option<LocalId>,
    new_notebook_local_id: LocalId,
    previous_tag_local_ids: Vec<LocalId>,
    new_tag_local_ids: Vec<LocalId>,
}

impl WriteOutcome {
    fn notebook_changed(&self) -> bool {
        self.old_notebook_local_id.as_ref().is_some_and(|prev| *prev != self.new_notebook_local_id)
    }

    fn tags_changed(&self) -> bool {
        self.previous_tag_local_ids != self.new_tag_local_ids
    }
}

fn put(conn: &Connection, files: &ResourceFileStore, mut note: Note) -> Result<WriteOutcome, Error> {
    if note.notebook_local_id.as_str().is_empty() {
        return Err(Error::InvalidArgument("note must reference a notebook".to_string()));
    }

    let scope = TransactionScope::new(conn, TransactionKind::Immediate)?;
    let conn = scope.connection();
    let local_id = resolve_local_id(conn, &note)?;
    note.local_id = local_id.clone();

    let previous_notebook: Option<LocalId> =
        conn.query_row("SELECT notebook_local_id FROM notes WHERE local_id = ?1", params![local_id], |r| r.get(0)).optional()?;
    let is_fresh = previous_notebook.is_none();

    let previous_tags: Vec<LocalId> = {
        let mut stmt = conn.prepare("SELECT tag_local_id FROM note_tags WHERE note_local_id = ?1 ORDER BY index_in_note")?;
        stmt.query_map(params![local_id], |r| r.get(0))?.collect::<rusqlite::Result<Vec<_>>>()?
    };

    upsert_core(conn, &note)?;
    let resolved_tags = replace_tags(conn, &local_id, &note.tag_local_ids, &note.tag_guids)?;
    let new_tags: Vec<LocalId> = resolved_tags.iter().map(|(id, _)| id.clone()).collect();

    if let Some(resources) = note.resources.take() {
        delete_resources_for_note(conn, files, &local_id)?;
        for (index, mut resource) in resources.into_iter().enumerate() {
            resource.note_local_id = local_id.clone();
            write_resource_row(conn, files, resource, Some(index as i32))?;
        }
    }

    scope.commit()?;
    Ok(WriteOutcome {
        local_id: local_id.clone(),
        is_fresh,
        old_notebook_local_id: previous_notebook,
        new_notebook_local_id: note.notebook_local_id,
        previous_tag_local_ids: previous_tags,
        new_tag_local_ids: new_tags,
    })
}

fn update(conn: &Connection, files: &ResourceFileStore, local_id: &LocalId, input: Note, options: UpdateNoteOptions) -> Result<WriteOutcome, Error> {
    let scope = TransactionScope::new(conn, TransactionKind::Immediate)?;
    let conn = scope.connection();

    let mut existing = conn
        .query_row("SELECT * FROM notes WHERE local_id = ?1", params![local_id], row_to_note)
        .optional()?
        .ok_or_else(|| Error::InvalidArgument(format!("no note with local id {local_id}")))?;
    fill_note(conn, files, &mut existing, FetchNoteOptions::all())?;

    let old_notebook_local_id = existing.notebook_local_id.clone();
    let notebook_changed = old_notebook_local_id != input.notebook_local_id;
    existing.notebook_local_id = input.notebook_local_id;
    existing.notebook_guid = input.notebook_guid;
    existing.title = input.title;
    existing.content = input.content;
    existing.content_hash = input.content_hash;
    existing.content_length = input.content_length;
    existing.updated = input.updated.or(Some(now_millis()));
    existing.deleted = input.deleted;
    existing.active = input.active;
    existing.update_sequence_number = input.update_sequence_number;
    existing.attributes = input.attributes;
    existing.limits = input.limits;
    existing.restrictions = input.restrictions;
    existing.shared_notes = input.shared_notes;
    existing.locally_modified = input.locally_modified;
    existing.locally_favorited = input.locally_favorited;
    existing.local_only = input.local_only;

    let previous_tags = existing.tag_local_ids.clone();
    if options.contains(UpdateNoteOptions::UPDATE_TAGS) {
        existing.tag_local_ids = input.tag_local_ids;
        existing.tag_guids = input.tag_guids;
    }

    existing.resources = if options.contains(UpdateNoteOptions::UPDATE_RESOURCE_METADATA) {
        input.resources.map(|resources| {
            resources
                .into_iter()
                .map(|mut resource| {
                    if !options.contains(UpdateNoteOptions::UPDATE_RESOURCE_BINARY_DATA) {
                        resource.data = None;
                        resource.alternate_data = None;
                        resource.recognition_data = None;
                    }
                    resource
                })
                .collect()
        })
    } else {
        None
    };

    upsert_core(conn, &existing)?;
    let new_tags = if options.contains(UpdateNoteOptions::UPDATE_TAGS) {
        let resolved = replace_tags(conn, local_id, &existing.tag_local_ids, &existing.tag_guids)?;
        resolved.into_iter().map(|(id, _)| id).collect::<Vec<_>>()
    } else {
        previous_tags.clone()
    };

    if let Some(resources) = existing.resources.take() {
        if options.contains(UpdateNoteOptions::UPDATE_RESOURCE_BINARY_DATA) {
            delete_resources_for_note(conn, files, local_id)?;
            for (index, mut resource) in resources.into_iter().enumerate() {
                resource.note_local_id = local_id.clone();
                write_resource_row(conn, files, resource, Some(index as i32))?;
            }
        } else {
            // Metadata-only replace: preserve each existing resource's binary bodies by id.
            type ResourceBodies = (
                Option<crate::types::resource::ResourceBody>,
                Option<crate::types::resource::ResourceBody>,
                Option<crate::types::resource::ResourceBody>,
            );
            let existing_bodies: std::collections::HashMap<LocalId, ResourceBodies> = {
                let mut stmt = conn.prepare("SELECT * FROM resources WHERE note_local_id = ?1")?;
                let mut rows = stmt.query_map(params![local_id], |row| row_to_resource(row, FetchResourceOptions::WITH_BINARY_DATA))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                for r in &mut rows {
                    fill_out_of_band_body(conn, files, r)?;
                }
                rows.into_iter().map(|r| (r.local_id.clone(), (r.data, r.alternate_data, r.recognition_data))).collect()
            };
            delete_resources_for_note(conn, files, local_id)?;
            for (index, mut resource) in resources.into_iter().enumerate() {
                resource.note_local_id = local_id.clone();
                if let Some((data, alternate_data, recognition_data)) = existing_bodies.get(&resource.local_id) {
                    resource.data = data.clone();
                    resource.alternate_data = alternate_data.clone();
                    resource.recognition_data = recognition_data.clone();
                }
                write_resource_row(conn, files, resource, Some(index as i32))?;
            }
        }
    }

    scope.commit()?;
    Ok(WriteOutcome {
        local_id: local_id.clone(),
        is_fresh: false,
        old_notebook_local_id: if notebook_changed { Some(old_notebook_local_id) } else { None },
        new_notebook_local_id: existing.notebook_local_id,
        previous_tag_local_ids: previous_tags,
        new_tag_local_ids: new_tags,
    })
}

fn count_predicate(options: NoteCountOptions) -> &'static str {
    let non_deleted = options.contains(NoteCountOptions::INCLUDE_NON_DELETED);
    let deleted = options.contains(NoteCountOptions::INCLUDE_DELETED);
    match (non_deleted, deleted) {
        (true, true) => "1=1",
        (true, false) => "active = 1",
        (false, true) => "active = 0",
        (false, false) => "0",
    }
}

impl NoteHandler {
    pub fn new(ctx: HandlerContext) -> Self {
        Self { ctx, alive: Arc::new(()) }
    }

    fn weak(&self) -> Weak<()> {
        Arc::downgrade(&self.alive)
    }

    pub async fn put(&self, note: Note) -> Result<LocalId, Error> {
        let local_id = if note.local_id.as_str().is_empty() { LocalId::generate() } else { note.local_id.clone() };
        let mut note = note;
        note.local_id = local_id.clone();
        let files = self.ctx.files.clone();
        let outcome = self.ctx.dispatcher.submit_write(self.weak(), move |conn| put(conn, &files, note)).await?;
        self.emit_write_events(outcome, NoteUpdateOptions::default());
        Ok(local_id)
    }

    pub async fn update(&self, local_id: LocalId, note: Note, options: UpdateNoteOptions) -> Result<(), Error> {
        let id = local_id.clone();
        let files = self.ctx.files.clone();
        let outcome = self.ctx.dispatcher.submit_write(self.weak(), move |conn| update(conn, &files, &id, note, options)).await?;
        self.emit_write_events(outcome, options.into());
        Ok(())
    }

    fn emit_write_events(&self, outcome: WriteOutcome, update_options: NoteUpdateOptions) {
        if outcome.is_fresh {
            self.ctx.notifier.emit(Event::NotePut(outcome.local_id.clone()));
        } else {
            self.ctx.notifier.emit(Event::NoteUpdated(outcome.local_id.clone(), update_options));
        }
        if outcome.notebook_changed() {
            self.ctx.notifier.emit(Event::NoteNotebookChanged {
                note_local_id: outcome.local_id.clone(),
                old_notebook_local_id: outcome.old_notebook_local_id.clone().unwrap_or_default(),
                new_notebook_local_id: outcome.new_notebook_local_id.clone(),
            });
        }
        if outcome.tags_changed() {
            self.ctx.notifier.emit(Event::NoteTagListChanged {
                note_local_id: outcome.local_id,
                previous_tag_local_ids: outcome.previous_tag_local_ids,
                new_tag_local_ids: outcome.new_tag_local_ids,
            });
        }
    }

    pub async fn find_by_local_id(&self, local_id: LocalId, options: FetchNoteOptions) -> Result<Option<Note>, Error> {
        let files = self.ctx.files.clone();
        self.ctx
            .dispatcher
            .submit_read(self.weak(), move |conn| {
                let note = conn.query_row("SELECT * FROM notes WHERE local_id = ?1", params![local_id], row_to_note).optional()?;
                match note {
                    Some(mut note) => {
                        fill_note(conn, &files, &mut note, options)?;
                        Ok(Some(note))
                    },
                    None => Ok(None),
                }
            })
            .await
    }

    pub async fn find_by_guid(&self, guid: Guid, options: FetchNoteOptions) -> Result<Option<Note>, Error> {
        let files = self.ctx.files.clone();
        self.ctx
            .dispatcher
            .submit_read(self.weak(), move |conn| {
                let note = conn.query_row("SELECT * FROM notes WHERE guid = ?1", params![guid], row_to_note).optional()?;
                match note {
                    Some(mut note) => {
                        fill_note(conn, &files, &mut note, options)?;
                        Ok(Some(note))
                    },
                    None => Ok(None),
                }
            })
            .await
    }

    /// Returns matches in the same order `local_ids` specifies (spec.md §4.3.8).
    pub async fn find_by_local_ids(&self, local_ids: Vec<LocalId>, options: FetchNoteOptions) -> Result<Vec<Note>, Error> {
        let files = self.ctx.files.clone();
        self.ctx
            .dispatcher
            .submit_read(self.weak(), move |conn| {
                let mut by_id = std::collections::HashMap::new();
                for local_id in &local_ids {
                    if let Some(mut note) =
                        conn.query_row("SELECT * FROM notes WHERE local_id = ?1", params![local_id], row_to_note).optional()?
                    {
                        fill_note(conn, &files, &mut note, options)?;
                        by_id.insert(local_id.clone(), note);
                    }
                }
                Ok(local_ids.into_iter().filter_map(|id| by_id.remove(&id)).collect())
            })
            .await
    }

    pub async fn list(&self, options: NoteListOptions) -> Result<Vec<Note>, Error> {
        let files = self.ctx.files.clone();
        self.ctx
            .dispatcher
            .submit_read(self.weak(), move |conn| {
                let mut sql = "SELECT DISTINCT n.* FROM notes n".to_string();
                if !options.tag_local_ids.is_empty() {
                    sql.push_str(" JOIN note_tags nt ON nt.note_local_id = n.local_id");
                }
                sql.push_str(" WHERE 1=1");

                let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
                if let Some(notebook_local_id) = &options.notebook_local_id {
                    sql.push_str(" AND n.notebook_local_id = ?");
                    params_vec.push(Box::new(notebook_local_id.as_str().to_string()));
                }
                if !options.tag_local_ids.is_empty() {
                    let placeholders = options.tag_local_ids.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
                    sql.push_str(&format!(" AND nt.tag_local_id IN ({placeholders})"));
                    for tag_local_id in &options.tag_local_ids {
                        params_vec.push(Box::new(tag_local_id.as_str().to_string()));
                    }
                }
                if let Some((key, direction)) = options.order {
                    let column = match key {
                        NoteOrderKey::CreationTimestamp => "n.created",
                        NoteOrderKey::ModificationTimestamp => "n.updated",
                        NoteOrderKey::Title => "n.title_stripped",
                        NoteOrderKey::UpdateSequenceNumber => "n.usn",
                    };
                    sql.push_str(&format!(" ORDER BY {column} {}", direction.sql_keyword()));
                } else {
                    sql.push_str(" ORDER BY n.created ASC");
                }
                if let Some(limit) = options.pagination.limit {
                    sql.push_str(&format!(" LIMIT {limit}"));
                    if let Some(offset) = options.pagination.offset {
                        sql.push_str(&format!(" OFFSET {offset}"));
                    }
                }

                let mut stmt = conn.prepare(&sql)?;
                let param_refs: Vec<&dyn rusqlite::ToSql> = params_vec.iter().map(|b| b.as_ref()).collect();
                let mut notes = stmt.query_map(param_refs.as_slice(), row_to_note)?.collect::<rusqlite::Result<Vec<_>>>()?;
                for note in &mut notes {
                    fill_note(conn, &files, note, FetchNoteOptions::empty())?;
                }
                Ok(notes)
            })
            .await
    }

    pub async fn list_guids(&self, options: NoteListOptions) -> Result<Vec<Guid>, Error> {
        Ok(self.list(options).await?.into_iter().filter_map(|n| n.guid).collect())
    }

    pub async fn count(&self, options: NoteCountOptions) -> Result<u64, Error> {
        self.ctx
            .dispatcher
            .submit_read(self.weak(), move |conn| {
                let predicate = count_predicate(options);
                let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM notes WHERE {predicate}"), [], |r| r.get(0))?;
                Ok(count as u64)
            })
            .await
    }

    pub async fn count_per_notebook(&self, notebook_local_id: LocalId, options: NoteCountOptions) -> Result<u64, Error> {
        self.ctx
            .dispatcher
            .submit_read(self.weak(), move |conn| {
                let predicate = count_predicate(options);
                let count: i64 = conn.query_row(
                    &format!("SELECT COUNT(*) FROM notes WHERE notebook_local_id = ?1 AND {predicate}"),
                    params![notebook_local_id],
                    |r| r.get(0),
                )?;
                Ok(count as u64)
            })
            .await
    }

    pub async fn count_per_tag(&self, tag_local_id: LocalId, options: NoteCountOptions) -> Result<u64, Error> {
        self.ctx
            .dispatcher
            .submit_read(self.weak(), move |conn| {
                let predicate = count_predicate(options);
                let count: i64 = conn.query_row(
                    &format!(
                        "SELECT COUNT(*) FROM notes n JOIN note_tags nt ON nt.note_local_id = n.local_id \
                         WHERE nt.tag_local_id = ?1 AND {predicate}"
                    ),
                    params![tag_local_id],
                    |r| r.get(0),
                )?;
                Ok(count as u64)
            })
            .await
    }

    pub async fn count_per_notebook_and_tags(
        &self,
        notebook_local_id: LocalId,
        tag_local_ids: Vec<LocalId>,
        options: NoteCountOptions,
    ) -> Result<u64, Error> {
        self.ctx
            .dispatcher
            .submit_read(self.weak(), move |conn| {
                let predicate = count_predicate(options);
                if tag_local_ids.is_empty() {
                    let count: i64 = conn.query_row(
                        &format!("SELECT COUNT(*) FROM notes WHERE notebook_local_id = ?1 AND {predicate}"),
                        params![notebook_local_id],
                        |r| r.get(0),
                    )?;
                    return Ok(count as u64);
                }
                let placeholders = tag_local_ids.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
                let sql = format!(
                    "SELECT COUNT(DISTINCT n.local_id) FROM notes n JOIN note_tags nt ON nt.note_local_id = n.local_id \
                     WHERE n.notebook_local_id = ? AND nt.tag_local_id IN ({placeholders}) AND {predicate}"
                );
                let mut stmt = conn.prepare(&sql)?;
                let mut bound: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(notebook_local_id.as_str().to_string())];
                bound.extend(tag_local_ids.iter().map(|t| Box::new(t.as_str().to_string()) as Box<dyn rusqlite::ToSql>));
                let param_refs: Vec<&dyn rusqlite::ToSql> = bound.iter().map(|b| b.as_ref()).collect();
                let count: i64 = stmt.query_row(param_refs.as_slice(), |r| r.get(0))?;
                Ok(count as u64)
            })
            .await
    }

    pub async fn counts_per_tags(&self, tag_local_ids: Vec<LocalId>, options: NoteCountOptions) -> Result<BTreeMap<LocalId, u64>, Error> {
        self.ctx
            .dispatcher
            .submit_read(self.weak(), move |conn| {
                let predicate = count_predicate(options);
                let mut result = BTreeMap::new();
                for tag_local_id in tag_local_ids {
                    let count: i64 = conn.query_row(
                        &format!(
                            "SELECT COUNT(*) FROM notes n JOIN note_tags nt ON nt.note_local_id = n.local_id \
                             WHERE nt.tag_local_id = ?1 AND {predicate}"
                        ),
                        params![tag_local_id],
                        |r| r.get(0),
                    )?;
                    result.insert(tag_local_id, count as u64);
                }
                Ok(result)
            })
            .await
    }

    /// Resolves a note-search query (spec.md §4.4) to matching local ids, ordered by creation
    /// time. The compiler runs inside the reader closure: its bound parameters are
    /// `Box<dyn rusqlite::ToSql>`, not necessarily `Send`, so only the raw query string crosses
    /// into the dispatcher.
    pub async fn query_note_local_ids(&self, raw_query: String) -> Result<Vec<LocalId>, Error> {
        self.ctx
            .dispatcher
            .submit_read(self.weak(), move |conn| {
                let compiled = search::compile(&raw_query)?;
                let mut stmt = conn.prepare(&compiled.sql)?;
                let param_refs: Vec<&dyn rusqlite::ToSql> = compiled.params.iter().map(|b| b.as_ref()).collect();
                let ids = stmt.query_map(param_refs.as_slice(), |row| row.get::<_, LocalId>(0))?.collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(ids)
            })
            .await
    }

    /// Same query language as [`Self::query_note_local_ids`], materialized into full notes
    /// (spec.md §4.4: "joined resource rows" is satisfied here rather than in the compiled SQL,
    /// so the search SELECT never fans out on a note's resources).
    pub async fn query_notes(&self, raw_query: String, options: FetchNoteOptions) -> Result<Vec<Note>, Error> {
        let ids = self.query_note_local_ids(raw_query).await?;
        self.find_by_local_ids(ids, options).await
    }

    pub async fn expunge(&self, local_id: LocalId) -> Result<(), Error> {
        let id = local_id.clone();
        let files = self.ctx.files.clone();
        self.ctx
            .dispatcher
            .submit_write(self.weak(), move |conn| {
                let scope = TransactionScope::new(conn, TransactionKind::Immediate)?;
                scope.connection().execute("DELETE FROM notes WHERE local_id = ?1", params![id])?;
                scope.commit()?;
                files.delete_for_note(id.as_str());
                Ok(())
            })
            .await?;
        self.ctx.notifier.emit(Event::NoteExpunged(local_id));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::test_utils::{in_memory_storage, seed_nine_note_fixture};
    use crate::types::ids::LocalId;

    /// spec.md §8 scenario 5: `todo:true -todo:false` excludes note #4, which carries both
    /// markers, leaving the notes that only ever say "true".
    #[tokio::test]
    async fn todo_true_excludes_notes_with_a_false_marker() {
        let storage = in_memory_storage().await;
        let ids = seed_nine_note_fixture(&storage).await.unwrap();
        let matches = storage.notes().query_note_local_ids("todo:true -todo:false".to_string()).await.unwrap();
        let expected: Vec<_> = [1, 8].iter().map(|&i| ids[i].clone()).collect();
        assert_eq!(sorted(matches), sorted(expected));
    }

    /// spec.md §8 scenario 5: `any: todo:true todo:false` is satisfied by either marker alone,
    /// so it picks up every note that carries at least one of the two.
    #[tokio::test]
    async fn any_todo_true_or_false_matches_every_marked_note() {
        let storage = in_memory_storage().await;
        let ids = seed_nine_note_fixture(&storage).await.unwrap();
        let matches = storage.notes().query_note_local_ids("any: todo:true todo:false".to_string()).await.unwrap();
        let expected: Vec<_> = [1, 3, 4, 8].iter().map(|&i| ids[i].clone()).collect();
        assert_eq!(sorted(matches), sorted(expected));
    }

    /// spec.md §8 scenario 6: a quoted `notebook:` term restricts to the notes filed in that
    /// exact notebook, regardless of anything else in the query.
    #[tokio::test]
    async fn notebook_term_restricts_to_its_notebook() {
        let storage = in_memory_storage().await;
        let ids = seed_nine_note_fixture(&storage).await.unwrap();
        let matches = storage.notes().query_note_local_ids("notebook:\"Test notebook #1\"".to_string()).await.unwrap();
        let expected: Vec<_> = [3, 4, 5].iter().map(|&i| ids[i].clone()).collect();
        assert_eq!(sorted(matches), sorted(expected));
    }

    /// spec.md §8 scenario 6: combining a positive and a negated `applicationData:` term
    /// narrows to notes carrying the first key but not the second.
    #[tokio::test]
    async fn application_data_term_combines_with_its_negation() {
        let storage = in_memory_storage().await;
        let ids = seed_nine_note_fixture(&storage).await.unwrap();
        let matches = storage
            .notes()
            .query_note_local_ids("applicationData:Quentier -applicationData:Evernote".to_string())
            .await
            .unwrap();
        let expected: Vec<_> = [7, 8].iter().map(|&i| ids[i].clone()).collect();
        assert_eq!(sorted(matches), sorted(expected));
    }

    fn sorted(mut ids: Vec<LocalId>) -> Vec<LocalId> {
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        ids
    }
}
