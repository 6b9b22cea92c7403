//! Resource entity (spec.md §3).

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::types::ids::{Guid, LocalId};

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ResourceBody {
    pub data: Vec<u8>,
    pub size: u32,
    pub md5: Vec<u8>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ResourceApplicationData {
    /// Keys stored with no associated value.
    pub keys_only: BTreeSet<String>,
    /// Keys stored with an associated value.
    pub full_map: Option<BTreeMap<String, String>>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ResourceAttributes {
    pub source_url: Option<String>,
    pub timestamp: Option<i64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude: Option<f64>,
    pub camera_make: Option<String>,
    pub camera_model: Option<String>,
    pub client_will_index: Option<bool>,
    pub file_name: Option<String>,
    pub attachment: Option<bool>,
    pub application_data: Option<ResourceApplicationData>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Resource {
    pub local_id: LocalId,
    pub guid: Option<Guid>,
    /// Authoritative back-reference to the owning note (spec.md §9 open question 1; decided
    /// in SPEC_FULL.md §9 to be stored, never derived).
    pub note_local_id: LocalId,
    pub note_guid: Option<Guid>,
    pub data: Option<ResourceBody>,
    pub alternate_data: Option<ResourceBody>,
    pub recognition_data: Option<ResourceBody>,
    pub mime: Option<String>,
    pub width: Option<i16>,
    pub height: Option<i16>,
    pub update_sequence_number: Option<i32>,
    pub attributes: Option<ResourceAttributes>,
    pub locally_modified: bool,
    pub local_only: bool,
}
