//! User handler: a single-row entity (plus four optional sub-blocks) keyed by numeric id.

use std::sync::{Arc, Weak};

use rusqlite::{params, Connection, OptionalExtension};

use crate::concurrency::{TransactionKind, TransactionScope};
use crate::error::Error;
use crate::notifier::Event;
use crate::store::HandlerContext;
use crate::types::user::{AccountLimits, BusinessUserInfo, PrivilegeLevel, UserAccounting, UserAttributes};
use crate::types::User;

pub struct UserHandler {
    ctx: HandlerContext,
    alive: Arc<()>,
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get("id")?,
        username: row.get("username")?,
        email: row.get("email")?,
        privilege: row.get::<_, Option<i32>>("privilege")?.and_then(PrivilegeLevel::from_i32),
        created: row.get("created")?,
        updated: row.get("updated")?,
        deleted: row.get("deleted")?,
        active: row.get::<_, i64>("active")? != 0,
        attributes: None,
        accounting: None,
        business_user_info: None,
        account_limits: None,
    })
}

fn fill_sub_blocks(conn: &Connection, user: &mut User) -> Result<(), Error> {
    user.attributes = conn
        .query_row(
            "SELECT default_location_name, default_latitude, default_longitude, preactivation, \
                    view_of_notes_history, incoming_email_address \
             FROM user_attributes WHERE user_id = ?1",
            params![user.id],
            |row| {
                Ok(UserAttributes {
                    default_location_name: row.get(0)?,
                    default_latitude: row.get(1)?,
                    default_longitude: row.get(2)?,
                    preactivation: row.get::<_, Option<i64>>(3)?.map(|v| v != 0),
                    view_of_notes_history: row.get(4)?,
                    incoming_email_address: row.get(5)?,
                })
            },
        )
        .optional()?;

    user.accounting = conn
        .query_row(
            "SELECT upload_limit_end, upload_limit, premium_service_status FROM user_accounting WHERE user_id = ?1",
            params![user.id],
            |row| Ok(UserAccounting { upload_limit_end: row.get(0)?, upload_limit: row.get(1)?, premium_service_status: row.get(2)? }),
        )
        .optional()?;

    user.business_user_info = conn
        .query_row(
            "SELECT business_id, business_name, role FROM user_business_info WHERE user_id = ?1",
            params![user.id],
            |row| Ok(BusinessUserInfo { business_id: row.get(0)?, business_name: row.get(1)?, role: row.get(2)? }),
        )
        .optional()?;

    user.account_limits = conn
        .query_row(
            "SELECT user_mail_limit_daily, note_size_max, resource_size_max, user_linked_notebook_max, \
                    upload_limit, user_note_count_max, user_notebook_count_max, user_tag_count_max, \
                    note_tag_count_max, user_saved_search_max, note_resource_count_max \
             FROM user_account_limits WHERE user_id = ?1",
            params![user.id],
            |row| {
                Ok(AccountLimits {
                    user_mail_limit_daily: row.get(0)?,
                    note_size_max: row.get(1)?,
                    resource_size_max: row.get(2)?,
                    user_linked_notebook_max: row.get(3)?,
                    upload_limit: row.get(4)?,
                    user_note_count_max: row.get(5)?,
                    user_notebook_count_max: row.get(6)?,
                    user_tag_count_max: row.get(7)?,
                    note_tag_count_max: row.get(8)?,
                    user_saved_search_max: row.get(9)?,
                    note_resource_count_max: row.get(10)?,
                })
            },
        )
        .optional()?;

    Ok(())
}

fn put(conn: &Connection, user: &User) -> Result<(), Error> {
    let scope = TransactionScope::new(conn, TransactionKind::Immediate)?;
    let conn = scope.connection();

    conn.execute(
        "INSERT INTO users (id, username, email, privilege, created, updated, deleted, active) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) \
         ON CONFLICT(id) DO UPDATE SET \
            username = excluded.username, email = excluded.email, privilege = excluded.privilege, \
            created = excluded.created, updated = excluded.updated, deleted = excluded.deleted, \
            active = excluded.active",
        params![
            user.id,
            user.username,
            user.email,
            user.privilege.map(|v| v as i32),
            user.created,
            user.updated,
            user.deleted,
            user.active as i64,
        ],
    )?;

    conn.execute("DELETE FROM user_attributes WHERE user_id = ?1", params![user.id])?;
    if let Some(a) = &user.attributes {
        conn.execute(
            "INSERT INTO user_attributes \
                (user_id, default_location_name, default_latitude, default_longitude, preactivation, \
                 view_of_notes_history, incoming_email_address) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                user.id,
                a.default_location_name,
                a.default_latitude,
                a.default_longitude,
                a.preactivation.map(|v| v as i64),
                a.view_of_notes_history,
                a.incoming_email_address,
            ],
        )?;
    }

    conn.execute("DELETE FROM user_accounting WHERE user_id = ?1", params![user.id])?;
    if let Some(a) = &user.accounting {
        conn.execute(
            "INSERT INTO user_accounting (user_id, upload_limit_end, upload_limit, premium_service_status) \
             VALUES (?1, ?2, ?3, ?4)",
            params![user.id, a.upload_limit_end, a.upload_limit, a.premium_service_status],
        )?;
    }

    conn.execute("DELETE FROM user_business_info WHERE user_id = ?1", params![user.id])?;
    if let Some(b) = &user.business_user_info {
        conn.execute(
            "INSERT INTO user_business_info (user_id, business_id, business_name, role) VALUES (?1, ?2, ?3, ?4)",
            params![user.id, b.business_id, b.business_name, b.role],
        )?;
    }

    conn.execute("DELETE FROM user_account_limits WHERE user_id = ?1", params![user.id])?;
    if let Some(l) = &user.account_limits {
        conn.execute(
            "INSERT INTO user_account_limits \
                (user_id, user_mail_limit_daily, note_size_max, resource_size_max, user_linked_notebook_max, \
                 upload_limit, user_note_count_max, user_notebook_count_max, user_tag_count_max, \
                 note_tag_count_max, user_saved_search_max, note_resource_count_max) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                user.id,
                l.user_mail_limit_daily,
                l.note_size_max,
                l.resource_size_max,
                l.user_linked_notebook_max,
                l.upload_limit,
                l.user_note_count_max,
                l.user_notebook_count_max,
                l.user_tag_count_max,
                l.note_tag_count_max,
                l.user_saved_search_max,
                l.note_resource_count_max,
            ],
        )?;
    }

    scope.commit()
}

impl UserHandler {
    pub fn new(ctx: HandlerContext) -> Self {
        Self { ctx, alive: Arc::new(()) }
    }

    fn weak(&self) -> Weak<()> {
        Arc::downgrade(&self.alive)
    }

    pub async fn put(&self, user: User) -> Result<(), Error> {
        let id = user.id;
        self.ctx.dispatcher.submit_write(self.weak(), move |conn| put(conn, &user)).await?;
        self.ctx.notifier.emit(Event::UserPut(id));
        Ok(())
    }

    pub async fn find(&self, id: i64) -> Result<Option<User>, Error> {
        self.ctx
            .dispatcher
            .submit_read(self.weak(), move |conn| {
                let user = conn.query_row("SELECT * FROM users WHERE id = ?1", params![id], row_to_user).optional()?;
                match user {
                    Some(mut user) => {
                        fill_sub_blocks(conn, &mut user)?;
                        Ok(Some(user))
                    },
                    None => Ok(None),
                }
            })
            .await
    }

    /// Existence check backing the singleton nature of the User entity (spec.md §4.3.9
    /// sibling of `noteCount`): 0 or 1.
    pub async fn count(&self) -> Result<u64, Error> {
        self.ctx
            .dispatcher
            .submit_read(self.weak(), |conn| {
                let count: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))?;
                Ok(count as u64)
            })
            .await
    }

    pub async fn expunge(&self, id: i64) -> Result<(), Error> {
        self.ctx
            .dispatcher
            .submit_write(self.weak(), move |conn| {
                let scope = TransactionScope::new(conn, TransactionKind::Immediate)?;
                scope.connection().execute("DELETE FROM users WHERE id = ?1", params![id])?;
                scope.commit()
            })
            .await?;
        self.ctx.notifier.emit(Event::UserExpunged(id));
        Ok(())
    }
}
