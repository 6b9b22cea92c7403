//! Tag entity (spec.md §3).

use serde::{Deserialize, Serialize};

use crate::types::ids::{Guid, LocalId};

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Tag {
    pub local_id: LocalId,
    pub guid: Option<Guid>,
    pub name: String,
    pub update_sequence_number: Option<i32>,
    pub parent_tag_local_id: Option<LocalId>,
    pub parent_tag_guid: Option<Guid>,
    pub linked_notebook_guid: Option<Guid>,
    pub locally_modified: bool,
    pub locally_favorited: bool,
    pub local_only: bool,
    /// True for a row created only to satisfy a dangling tag-guid reference from a note
    /// (spec.md §9 open question 2; decision recorded in SPEC_FULL.md §9).
    pub is_placeholder: bool,
}
