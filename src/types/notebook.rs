//! Notebook and linked-notebook entities (spec.md §3).

use serde::{Deserialize, Serialize};

use crate::types::ids::{Guid, LocalId};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[repr(i32)]
pub enum SharedNotebookPrivilegeLevel {
    Read = 0,
    Modify = 1,
    FullAccess = 2,
    Business = 3,
}

impl SharedNotebookPrivilegeLevel {
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Read),
            1 => Some(Self::Modify),
            2 => Some(Self::FullAccess),
            3 => Some(Self::Business),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SharedNotebook {
    pub shared_notebook_guid: Guid,
    pub notebook_guid: Guid,
    pub email: Option<String>,
    pub privilege: Option<SharedNotebookPrivilegeLevel>,
    pub shared_notebook_created: Option<i64>,
    pub shared_notebook_modified: Option<i64>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct NotebookRestrictions {
    pub no_read_notes: Option<bool>,
    pub no_create_notes: Option<bool>,
    pub no_update_notes: Option<bool>,
    pub no_expunge_notes: Option<bool>,
    pub no_share_notes: Option<bool>,
    pub no_email_notes: Option<bool>,
    pub no_send_message_to_recipients: Option<bool>,
    pub no_update_notebook: Option<bool>,
    pub no_expunge_notebook: Option<bool>,
    pub no_set_default_notebook: Option<bool>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Publishing {
    pub uri: Option<String>,
    pub order: Option<i32>,
    pub ascending: Option<bool>,
    pub public_description: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct BusinessNotebook {
    pub notebook_description: Option<String>,
    pub privilege: Option<SharedNotebookPrivilegeLevel>,
    pub recommended: Option<bool>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct NotebookRecipientSettings {
    pub reminder_notify_email: Option<bool>,
    pub reminder_notify_in_app: Option<bool>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Notebook {
    pub local_id: LocalId,
    pub guid: Option<Guid>,
    pub linked_notebook_guid: Option<Guid>,
    pub name: String,
    pub update_sequence_number: Option<i32>,
    pub created: Option<i64>,
    pub updated: Option<i64>,
    pub is_default: bool,
    pub locally_modified: bool,
    pub locally_favorited: bool,
    pub local_only: bool,
    pub publishing: Option<Publishing>,
    pub business_notebook: Option<BusinessNotebook>,
    pub contact_id: Option<i64>,
    pub restrictions: Option<NotebookRestrictions>,
    pub recipient_settings: Option<NotebookRecipientSettings>,
    pub shared_notebooks: Vec<SharedNotebook>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct LinkedNotebook {
    pub guid: Guid,
    pub update_sequence_number: Option<i32>,
    pub share_name: Option<String>,
    pub username: Option<String>,
    pub shard_id: Option<String>,
    pub shared_notebook_global_id: Option<String>,
    pub uri: Option<String>,
    pub note_store_url: Option<String>,
    pub web_api_url_prefix: Option<String>,
    pub stack: Option<String>,
    pub business_id: Option<i32>,
}
