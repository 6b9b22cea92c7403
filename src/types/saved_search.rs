//! Saved search entity (spec.md §3).

use serde::{Deserialize, Serialize};

use crate::types::ids::{Guid, LocalId};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[repr(i32)]
pub enum QueryFormat {
    User = 1,
    Sexp = 2,
}

impl QueryFormat {
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            1 => Some(Self::User),
            2 => Some(Self::Sexp),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct SavedSearchScope {
    pub includes_account: bool,
    pub includes_personal_linked_notebooks: bool,
    pub includes_business_linked_notebooks: bool,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SavedSearch {
    pub local_id: LocalId,
    pub guid: Option<Guid>,
    pub name: String,
    pub query: String,
    pub format: Option<QueryFormat>,
    pub update_sequence_number: Option<i32>,
    pub scope: Option<SavedSearchScope>,
    pub locally_modified: bool,
    pub locally_favorited: bool,
    pub local_only: bool,
}
