//! Note entity (spec.md §3).

use serde::{Deserialize, Serialize};

use crate::types::ids::{Guid, LocalId};
use crate::types::resource::Resource;

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct NoteAttributes {
    pub subject_date: Option<i64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude: Option<f64>,
    pub author: Option<String>,
    pub source: Option<String>,
    pub source_url: Option<String>,
    pub source_application: Option<String>,
    pub share_date: Option<i64>,
    pub reminder_order: Option<i64>,
    pub reminder_time: Option<i64>,
    pub reminder_done_time: Option<i64>,
    pub place_name: Option<String>,
    pub content_class: Option<String>,
    pub application_data: Option<std::collections::BTreeMap<String, String>>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct NoteLimits {
    pub note_resource_count_max: Option<i32>,
    pub upload_limit: Option<i64>,
    pub resource_size_max: Option<i64>,
    pub note_size_max: Option<i64>,
    pub uploaded: Option<i64>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct NoteRestrictions {
    pub no_update_title: Option<bool>,
    pub no_update_content: Option<bool>,
    pub no_email: Option<bool>,
    pub no_share: Option<bool>,
    pub no_share_help: Option<bool>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SharedNote {
    pub sharer_user_id: Option<i64>,
    pub recipient_identity_id: Option<i64>,
    pub privilege: Option<i32>,
    pub shared_date: Option<i64>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Note {
    pub local_id: LocalId,
    pub guid: Option<Guid>,
    pub notebook_local_id: LocalId,
    pub notebook_guid: Option<Guid>,
    pub title: Option<String>,
    pub content: Option<String>,
    pub content_hash: Option<Vec<u8>>,
    pub content_length: Option<i32>,
    pub created: Option<i64>,
    pub updated: Option<i64>,
    pub deleted: Option<i64>,
    pub active: bool,
    pub update_sequence_number: Option<i32>,
    pub attributes: Option<NoteAttributes>,
    pub limits: Option<NoteLimits>,
    pub restrictions: Option<NoteRestrictions>,
    pub tag_local_ids: Vec<LocalId>,
    pub tag_guids: Vec<Guid>,
    pub shared_notes: Vec<SharedNote>,
    pub resources: Option<Vec<Resource>>,
    pub locally_modified: bool,
    pub locally_favorited: bool,
    pub local_only: bool,
}
