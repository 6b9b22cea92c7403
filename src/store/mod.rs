//! SQLite-backed storage: schema, per-entity handlers, and the note-search compiler
//! (spec.md §3, §4.3, §4.4, §4.5).

pub mod diacritics;
pub mod migrations;
pub mod resource_files;
pub mod search;
pub mod sqlite;

use std::sync::Arc;

use crate::concurrency::Dispatcher;
use crate::notifier::Notifier;
use crate::store::resource_files::ResourceFileStore;

/// Collaborators every handler is built from (spec.md §4.2 "each handler is owned uniquely
/// by the facade; closures submitted to the dispatcher carry a weak back-reference").
#[derive(Clone)]
pub(crate) struct HandlerContext {
    pub dispatcher: Arc<Dispatcher>,
    pub notifier: Notifier,
    pub files: Arc<ResourceFileStore>,
}

pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
