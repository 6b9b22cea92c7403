//! One handler per entity kind (spec.md §4.3), each a thin owner of a
//! [`crate::store::HandlerContext`] plus its own liveness token.

pub mod linked_notebooks;
pub mod notebooks;
pub mod notes;
pub mod resources;
pub mod saved_searches;
pub mod sync_info;
pub mod tags;
pub mod users;

pub use linked_notebooks::LinkedNotebookHandler;
pub use notebooks::NotebookHandler;
pub use notes::NoteHandler;
pub use resources::ResourceHandler;
pub use saved_searches::SavedSearchHandler;
pub use sync_info::SyncInfoHandler;
pub use tags::TagHandler;
pub use users::UserHandler;
