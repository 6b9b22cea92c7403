//! Resource handler (spec.md §4.3.12): attachments owned by a note, ordered within it.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Weak};

use rusqlite::{params, Connection, OptionalExtension};

use crate::concurrency::{TransactionKind, TransactionScope};
use crate::error::Error;
use crate::notifier::Event;
use crate::store::resource_files::{ResourceBodyKind, ResourceFileStore};
use crate::store::{diacritics, HandlerContext};
use crate::types::common::FetchResourceOptions;
use crate::types::ids::{Guid, LocalId};
use crate::types::resource::{ResourceApplicationData, ResourceAttributes, ResourceBody};
use crate::types::Resource;

pub struct ResourceHandler {
    ctx: HandlerContext,
    alive: Arc<()>,
}

pub(crate) fn row_to_resource(row: &rusqlite::Row<'_>, options: FetchResourceOptions) -> rusqlite::Result<Resource> {
    let data = if options.contains(FetchResourceOptions::WITH_BINARY_DATA) {
        let body = row.get::<_, Option<Vec<u8>>>("data_body")?;
        let out_of_band = row.get::<_, Option<String>>("data_file_relative_path")?.is_some();
        if body.is_some() || out_of_band {
            Some(ResourceBody {
                data: body.unwrap_or_default(),
                size: row.get::<_, Option<i64>>("data_size").unwrap_or(None).unwrap_or(0) as u32,
                md5: row.get::<_, Option<Vec<u8>>>("data_md5").unwrap_or(None).unwrap_or_default(),
            })
        } else {
            None
        }
    } else {
        None
    };
    let alternate_data = if options.contains(FetchResourceOptions::WITH_BINARY_DATA) {
        let body = row.get::<_, Option<Vec<u8>>>("alternate_data_body")?;
        let out_of_band = row.get::<_, Option<String>>("alternate_data_file_relative_path")?.is_some();
        if body.is_some() || out_of_band {
            Some(ResourceBody {
                data: body.unwrap_or_default(),
                size: row.get::<_, Option<i64>>("alternate_data_size").unwrap_or(None).unwrap_or(0) as u32,
                md5: row.get::<_, Option<Vec<u8>>>("alternate_data_md5").unwrap_or(None).unwrap_or_default(),
            })
        } else {
            None
        }
    } else {
        None
    };
    let recognition_data = {
        let body = row.get::<_, Option<String>>("recognition_data_body")?;
        let out_of_band = row.get::<_, Option<String>>("recognition_data_file_relative_path")?.is_some();
        if body.is_some() || out_of_band {
            Some(ResourceBody {
                data: body.unwrap_or_default().into_bytes(),
                size: row.get::<_, Option<i64>>("recognition_data_size").unwrap_or(None).unwrap_or(0) as u32,
                md5: row.get::<_, Option<Vec<u8>>>("recognition_data_md5").unwrap_or(None).unwrap_or_default(),
            })
        } else {
            None
        }
    };

    Ok(Resource {
        local_id: row.get("local_id")?,
        guid: row.get("guid")?,
        note_local_id: row.get("note_local_id")?,
        note_guid: row.get("note_guid")?,
        data,
        alternate_data,
        recognition_data,
        mime: row.get("mime")?,
        width: row.get("width")?,
        height: row.get("height")?,
        update_sequence_number: row.get("usn")?,
        attributes: None,
        locally_modified: row.get::<_, i64>("locally_modified")? != 0,
        local_only: row.get::<_, i64>("local_only")? != 0,
    })
}

pub(crate) fn fill_attributes(conn: &Connection, resource: &mut Resource) -> Result<(), Error> {
    let mut attributes = conn
        .query_row(
            "SELECT source_url, timestamp, latitude, longitude, altitude, camera_make, camera_model, \
                    client_will_index, file_name, attachment \
             FROM resource_attributes WHERE resource_local_id = ?1",
            params![resource.local_id],
            |row| {
                Ok(ResourceAttributes {
                    source_url: row.get(0)?,
                    timestamp: row.get(1)?,
                    latitude: row.get(2)?,
                    longitude: row.get(3)?,
                    altitude: row.get(4)?,
                    camera_make: row.get(5)?,
                    camera_model: row.get(6)?,
                    client_will_index: row.get::<_, Option<i64>>(7)?.map(|v| v != 0),
                    file_name: row.get(8)?,
                    attachment: row.get::<_, Option<i64>>(9)?.map(|v| v != 0),
                    application_data: None,
                })
            },
        )
        .optional()?;

    if let Some(attrs) = &mut attributes {
        let mut keys_stmt = conn.prepare("SELECT key FROM resource_application_data_keys WHERE resource_local_id = ?1")?;
        let keys_only: BTreeSet<String> =
            keys_stmt.query_map(params![resource.local_id], |r| r.get(0))?.collect::<rusqlite::Result<_>>()?;

        let mut map_stmt = conn.prepare("SELECT key, value FROM resource_application_data_map WHERE resource_local_id = ?1")?;
        let full_map: BTreeMap<String, String> = map_stmt
            .query_map(params![resource.local_id], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?
            .collect::<rusqlite::Result<_>>()?;

        if !keys_only.is_empty() || !full_map.is_empty() {
            attrs.application_data =
                Some(ResourceApplicationData { keys_only, full_map: if full_map.is_empty() { None } else { Some(full_map) } });
        }
    }

    resource.attributes = attributes;
    Ok(())
}

/// Replaces any of the three out-of-band resource bodies' placeholder data with bytes read
/// from disk. A no-op for any body the caller did not fetch (`Resource::data`/
/// `alternate_data`/`recognition_data` left `None`) or that stayed inline.
pub(crate) fn fill_out_of_band_body(conn: &Connection, files: &ResourceFileStore, resource: &mut Resource) -> Result<(), Error> {
    if resource.data.is_none() && resource.alternate_data.is_none() && resource.recognition_data.is_none() {
        return Ok(());
    }
    let (data_path, alternate_path, recognition_path): (Option<String>, Option<String>, Option<String>) = conn
        .query_row(
            "SELECT data_file_relative_path, alternate_data_file_relative_path, recognition_data_file_relative_path \
             FROM resources WHERE local_id = ?1",
            params![resource.local_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?
        .unwrap_or((None, None, None));

    if let (Some(body), Some(path)) = (&mut resource.data, data_path) {
        body.data = files.read(&path)?;
    }
    if let (Some(body), Some(path)) = (&mut resource.alternate_data, alternate_path) {
        body.data = files.read(&path)?;
    }
    if let (Some(body), Some(path)) = (&mut resource.recognition_data, recognition_path) {
        body.data = files.read(&path)?;
    }
    Ok(())
}

fn resolve_local_id(conn: &Connection, resource: &Resource) -> Result<LocalId, Error> {
    if !resource.local_id.as_str().is_empty() {
        return Ok(resource.local_id.clone());
    }
    if let Some(guid) = &resource.guid {
        if let Some(existing) = conn
            .query_row("SELECT local_id FROM resources WHERE guid = ?1", params![guid], |r| r.get::<_, LocalId>(0))
            .optional()?
        {
            return Ok(existing);
        }
    }
    Ok(LocalId::generate())
}

/// Writes one resource row (and its sub-blocks) inside a transaction the caller already
/// holds open; used both by [`put`] and by the note handler's full-note upsert.
pub(crate) fn write_resource_row(
    conn: &Connection,
    files: &ResourceFileStore,
    mut resource: Resource,
    index_in_note: Option<i32>,
) -> Result<(), Error> {
    let local_id = resolve_local_id(conn, &resource)?;
    resource.local_id = local_id.clone();

    let (previous_data_path, previous_alternate_path, previous_recognition_path): (
        Option<String>,
        Option<String>,
        Option<String>,
    ) = conn
        .query_row(
            "SELECT data_file_relative_path, alternate_data_file_relative_path, recognition_data_file_relative_path \
             FROM resources WHERE local_id = ?1",
            params![local_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?
        .unwrap_or((None, None, None));

    let data_out_of_band_path = match &resource.data {
        Some(body) => files.write_if_large(resource.note_local_id.as_str(), local_id.as_str(), ResourceBodyKind::Data, &body.data)?,
        None => None,
    };
    let alternate_out_of_band_path = match &resource.alternate_data {
        Some(body) => {
            files.write_if_large(resource.note_local_id.as_str(), local_id.as_str(), ResourceBodyKind::AlternateData, &body.data)?
        },
        None => None,
    };
    let recognition_out_of_band_path = match &resource.recognition_data {
        Some(body) => {
            files.write_if_large(resource.note_local_id.as_str(), local_id.as_str(), ResourceBodyKind::RecognitionData, &body.data)?
        },
        None => None,
    };
    for (previous, current) in [
        (previous_data_path, &data_out_of_band_path),
        (previous_alternate_path, &alternate_out_of_band_path),
        (previous_recognition_path, &recognition_out_of_band_path),
    ] {
        if previous.as_deref() != current.as_deref() {
            if let Some(stale) = previous {
                files.delete_resource(&stale);
            }
        }
    }

    let data_inline_body = if data_out_of_band_path.is_some() { None } else { resource.data.as_ref().map(|b| b.data.clone()) };
    let alternate_inline_body =
        if alternate_out_of_band_path.is_some() { None } else { resource.alternate_data.as_ref().map(|b| b.data.clone()) };
    let recognition_inline_body = if recognition_out_of_band_path.is_some() {
        None
    } else {
        resource.recognition_data.as_ref().map(|b| String::from_utf8_lossy(&b.data).to_string())
    };

    let index = match index_in_note {
        Some(explicit) => {
            conn.execute(
                "UPDATE resources SET index_in_note = index_in_note + 1 \
                 WHERE note_local_id = ?1 AND index_in_note >= ?2 AND local_id != ?3",
                params![resource.note_local_id, explicit, local_id],
            )?;
            explicit
        },
        None => {
            let current_max: Option<i64> = conn.query_row(
                "SELECT MAX(index_in_note) FROM resources WHERE note_local_id = ?1 AND local_id != ?2",
                params![resource.note_local_id, local_id],
                |r| r.get(0),
            )?;
            current_max.map(|m| m as i32 + 1).unwrap_or(0)
        },
    };

    conn.execute(
        "INSERT INTO resources \
            (local_id, guid, note_local_id, note_guid, index_in_note, data_body, data_file_relative_path, \
             data_size, data_md5, \
             alternate_data_body, alternate_data_file_relative_path, alternate_data_size, alternate_data_md5, \
             recognition_data_body, recognition_data_file_relative_path, \
             recognition_data_stripped, recognition_data_size, recognition_data_md5, mime, width, height, \
             usn, locally_modified, local_only) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24) \
         ON CONFLICT(local_id) DO UPDATE SET \
            guid = excluded.guid, note_local_id = excluded.note_local_id, note_guid = excluded.note_guid, \
            index_in_note = excluded.index_in_note, data_body = excluded.data_body, \
            data_file_relative_path = excluded.data_file_relative_path, data_size = excluded.data_size, \
            data_md5 = excluded.data_md5, alternate_data_body = excluded.alternate_data_body, \
            alternate_data_file_relative_path = excluded.alternate_data_file_relative_path, \
            alternate_data_size = excluded.alternate_data_size, alternate_data_md5 = excluded.alternate_data_md5, \
            recognition_data_body = excluded.recognition_data_body, \
            recognition_data_file_relative_path = excluded.recognition_data_file_relative_path, \
            recognition_data_stripped = excluded.recognition_data_stripped, \
            recognition_data_size = excluded.recognition_data_size, recognition_data_md5 = excluded.recognition_data_md5, \
            mime = excluded.mime, width = excluded.width, height = excluded.height, usn = excluded.usn, \
            locally_modified = excluded.locally_modified, local_only = excluded.local_only",
        params![
            local_id,
            resource.guid,
            resource.note_local_id,
            resource.note_guid,
            index,
            data_inline_body,
            data_out_of_band_path,
            resource.data.as_ref().map(|b| b.size as i64),
            resource.data.as_ref().map(|b| &b.md5),
            alternate_inline_body,
            alternate_out_of_band_path,
            resource.alternate_data.as_ref().map(|b| b.size as i64),
            resource.alternate_data.as_ref().map(|b| &b.md5),
            recognition_inline_body,
            recognition_out_of_band_path,
            resource
                .recognition_data
                .as_ref()
                .map(|b| diacritics::strip(&String::from_utf8_lossy(&b.data))),
            resource.recognition_data.as_ref().map(|b| b.size as i64),
            resource.recognition_data.as_ref().map(|b| &b.md5),
            resource.mime,
            resource.width,
            resource.height,
            resource.update_sequence_number,
            resource.locally_modified as i64,
            resource.local_only as i64,
        ],
    )?;

    conn.execute("DELETE FROM resource_attributes WHERE resource_local_id = ?1", params![local_id])?;
    conn.execute("DELETE FROM resource_application_data_keys WHERE resource_local_id = ?1", params![local_id])?;
    conn.execute("DELETE FROM resource_application_data_map WHERE resource_local_id = ?1", params![local_id])?;
    if let Some(attrs) = &resource.attributes {
        conn.execute(
            "INSERT INTO resource_attributes \
                (resource_local_id, source_url, timestamp, latitude, longitude, altitude, camera_make, \
                 camera_model, client_will_index, file_name, attachment) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                local_id,
                attrs.source_url,
                attrs.timestamp,
                attrs.latitude,
                attrs.longitude,
                attrs.altitude,
                attrs.camera_make,
                attrs.camera_model,
                attrs.client_will_index.map(|v| v as i64),
                attrs.file_name,
                attrs.attachment.map(|v| v as i64),
            ],
        )?;
        if let Some(application_data) = &attrs.application_data {
            for key in &application_data.keys_only {
                conn.execute(
                    "INSERT INTO resource_application_data_keys (resource_local_id, key) VALUES (?1, ?2)",
                    params![local_id, key],
                )?;
            }
            if let Some(map) = &application_data.full_map {
                for (key, value) in map {
                    conn.execute(
                        "INSERT INTO resource_application_data_map (resource_local_id, key, value) VALUES (?1, ?2, ?3)",
                        params![local_id, key, value],
                    )?;
                }
            }
        }
    }

    Ok(())
}

fn put(conn: &Connection, files: &ResourceFileStore, resource: Resource, index_in_note: Option<i32>) -> Result<(), Error> {
    let note_exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM notes WHERE local_id = ?1)",
        params![resource.note_local_id],
        |r| r.get(0),
    )?;
    if !note_exists {
        return Err(Error::InvalidArgument(format!("no note with local id {}", resource.note_local_id)));
    }

    let scope = TransactionScope::new(conn, TransactionKind::Immediate)?;
    write_resource_row(scope.connection(), files, resource, index_in_note)?;
    scope.commit()
}

/// Deletes every resource row owned by `note_local_id`, plus any out-of-band files they
/// held; used by the note handler before replacing the resource list wholesale.
pub(crate) fn delete_resources_for_note(conn: &Connection, files: &ResourceFileStore, note_local_id: &LocalId) -> Result<(), Error> {
    conn.execute("DELETE FROM resources WHERE note_local_id = ?1", params![note_local_id])?;
    files.delete_for_note(note_local_id.as_str());
    Ok(())
}

impl ResourceHandler {
    pub fn new(ctx: HandlerContext) -> Self {
        Self { ctx, alive: Arc::new(()) }
    }

    fn weak(&self) -> Weak<()> {
        Arc::downgrade(&self.alive)
    }

    pub async fn put(&self, resource: Resource, index_in_note: Option<i32>) -> Result<LocalId, Error> {
        let local_id = if resource.local_id.as_str().is_empty() { LocalId::generate() } else { resource.local_id.clone() };
        let mut resource = resource;
        resource.local_id = local_id.clone();
        let files = self.ctx.files.clone();
        self.ctx.dispatcher.submit_write(self.weak(), move |conn| put(conn, &files, resource, index_in_note)).await?;
        self.ctx.notifier.emit(Event::ResourcePut(local_id.clone()));
        Ok(local_id)
    }

    pub async fn find_by_local_id(&self, local_id: LocalId, options: FetchResourceOptions) -> Result<Option<Resource>, Error> {
        let files = self.ctx.files.clone();
        self.ctx
            .dispatcher
            .submit_read(self.weak(), move |conn| {
                let resource = conn
                    .query_row("SELECT * FROM resources WHERE local_id = ?1", params![local_id], |row| {
                        row_to_resource(row, options)
                    })
                    .optional()?;
                match resource {
                    Some(mut resource) => {
                        fill_attributes(conn, &mut resource)?;
                        fill_out_of_band_body(conn, &files, &mut resource)?;
                        Ok(Some(resource))
                    },
                    None => Ok(None),
                }
            })
            .await
    }

    pub async fn find_by_guid(&self, guid: Guid, options: FetchResourceOptions) -> Result<Option<Resource>, Error> {
        let files = self.ctx.files.clone();
        self.ctx
            .dispatcher
            .submit_read(self.weak(), move |conn| {
                let resource = conn
                    .query_row("SELECT * FROM resources WHERE guid = ?1", params![guid], |row| row_to_resource(row, options))
                    .optional()?;
                match resource {
                    Some(mut resource) => {
                        fill_attributes(conn, &mut resource)?;
                        fill_out_of_band_body(conn, &files, &mut resource)?;
                        Ok(Some(resource))
                    },
                    None => Ok(None),
                }
            })
            .await
    }

    pub async fn list_for_note(&self, note_local_id: LocalId, options: FetchResourceOptions) -> Result<Vec<Resource>, Error> {
        let files = self.ctx.files.clone();
        self.ctx
            .dispatcher
            .submit_read(self.weak(), move |conn| {
                let mut stmt = conn.prepare("SELECT * FROM resources WHERE note_local_id = ?1 ORDER BY index_in_note")?;
                let mut resources = stmt
                    .query_map(params![note_local_id], |row| row_to_resource(row, options))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                for resource in &mut resources {
                    fill_attributes(conn, resource)?;
                    fill_out_of_band_body(conn, &files, resource)?;
                }
                Ok(resources)
            })
            .await
    }

    pub async fn count_for_note(&self, note_local_id: LocalId) -> Result<u32, Error> {
        self.ctx
            .dispatcher
            .submit_read(self.weak(), move |conn| {
                let count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM resources WHERE note_local_id = ?1", params![note_local_id], |r| r.get(0))?;
                Ok(count as u32)
            })
            .await
    }

    pub async fn expunge(&self, local_id: LocalId) -> Result<(), Error> {
        let id = local_id.clone();
        let files = self.ctx.files.clone();
        self.ctx
            .dispatcher
            .submit_write(self.weak(), move |conn| {
                let scope = TransactionScope::new(conn, TransactionKind::Immediate)?;
                let relative_paths: (Option<String>, Option<String>, Option<String>) = scope
                    .connection()
                    .query_row(
                        "SELECT data_file_relative_path, alternate_data_file_relative_path, recognition_data_file_relative_path \
                         FROM resources WHERE local_id = ?1",
                        params![id],
                        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                    )
                    .optional()?
                    .unwrap_or((None, None, None));
                scope.connection().execute("DELETE FROM resources WHERE local_id = ?1", params![id])?;
                scope.commit()?;
                for relative_path in [relative_paths.0, relative_paths.1, relative_paths.2].into_iter().flatten() {
                    files.delete_resource(&relative_path);
                }
                Ok(())
            })
            .await?;
        self.ctx.notifier.emit(Event::ResourceExpunged(local_id));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::store::resource_files::INLINE_THRESHOLD_BYTES;
    use crate::test_utils::in_memory_storage;
    use crate::types::common::FetchResourceOptions;
    use crate::types::resource::ResourceBody;
    use crate::types::{Note, Notebook, Resource};

    /// spec.md §6: `alternate_data` and `recognition_data` spill out of band past the inline
    /// threshold just like `data`, and round-trip back through the handler unchanged.
    #[tokio::test]
    async fn alternate_and_recognition_bodies_round_trip_through_disk() {
        let storage = in_memory_storage().await;
        let notebook_id = storage.notebooks().put(Notebook { name: "Test notebook".to_string(), ..Default::default() }).await.unwrap();
        let note_id = storage.notes().put(Note { notebook_local_id: notebook_id, ..Default::default() }).await.unwrap();

        let alternate = vec![11u8; INLINE_THRESHOLD_BYTES + 1];
        let recognition = vec![22u8; INLINE_THRESHOLD_BYTES + 1];
        let resource = Resource {
            note_local_id: note_id.clone(),
            data: Some(ResourceBody { data: vec![1, 2, 3], size: 3, md5: vec![] }),
            alternate_data: Some(ResourceBody { data: alternate.clone(), size: alternate.len() as u32, md5: vec![] }),
            recognition_data: Some(ResourceBody { data: recognition.clone(), size: recognition.len() as u32, md5: vec![] }),
            ..Default::default()
        };
        let resource_id = storage.resources().put(resource, None).await.unwrap();

        let found = storage.resources().find_by_local_id(resource_id, FetchResourceOptions::WITH_BINARY_DATA).await.unwrap().unwrap();
        assert_eq!(found.data.unwrap().data, vec![1, 2, 3]);
        assert_eq!(found.alternate_data.unwrap().data, alternate);
        assert_eq!(found.recognition_data.unwrap().data, recognition);

        let listed = storage.resources().list_for_note(note_id, FetchResourceOptions::WITH_BINARY_DATA).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].alternate_data.as_ref().unwrap().data, alternate);
        assert_eq!(listed[0].recognition_data.as_ref().unwrap().data, recognition);
    }
}
