//! User entity (spec.md §3).

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct UserAttributes {
    pub default_location_name: Option<String>,
    pub default_latitude: Option<f64>,
    pub default_longitude: Option<f64>,
    pub preactivation: Option<bool>,
    pub view_of_notes_history: Option<String>,
    pub incoming_email_address: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct UserAccounting {
    pub upload_limit_end: Option<i64>,
    pub upload_limit: Option<i64>,
    pub premium_service_status: Option<i32>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct BusinessUserInfo {
    pub business_id: Option<i32>,
    pub business_name: Option<String>,
    pub role: Option<i32>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct AccountLimits {
    pub user_mail_limit_daily: Option<i32>,
    pub note_size_max: Option<i64>,
    pub resource_size_max: Option<i64>,
    pub user_linked_notebook_max: Option<i32>,
    pub upload_limit: Option<i64>,
    pub user_note_count_max: Option<i32>,
    pub user_notebook_count_max: Option<i32>,
    pub user_tag_count_max: Option<i32>,
    pub note_tag_count_max: Option<i32>,
    pub user_saved_search_max: Option<i32>,
    pub note_resource_count_max: Option<i32>,
}

/// Evernote's numeric privilege levels, round-tripped unchanged (spec.md §6 "Wire
/// compatibility").
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[repr(i32)]
pub enum PrivilegeLevel {
    Normal = 1,
    Premium = 3,
    VipSupport = 5,
    Manager = 7,
    Support = 8,
    Admin = 9,
}

impl PrivilegeLevel {
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            1 => Some(Self::Normal),
            3 => Some(Self::Premium),
            5 => Some(Self::VipSupport),
            7 => Some(Self::Manager),
            8 => Some(Self::Support),
            9 => Some(Self::Admin),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct User {
    pub id: i64,
    pub username: Option<String>,
    pub email: Option<String>,
    pub privilege: Option<PrivilegeLevel>,
    pub created: Option<i64>,
    pub updated: Option<i64>,
    pub deleted: Option<i64>,
    pub active: bool,
    pub attributes: Option<UserAttributes>,
    pub accounting: Option<UserAccounting>,
    pub business_user_info: Option<BusinessUserInfo>,
    pub account_limits: Option<AccountLimits>,
}
