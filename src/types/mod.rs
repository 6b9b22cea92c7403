//! The Evernote-compatible object graph persisted by this crate (spec.md §3).

pub mod common;
pub mod ids;
pub mod note;
pub mod notebook;
pub mod resource;
pub mod saved_search;
pub mod tag;
pub mod user;

pub use common::*;
pub use ids::{Guid, LocalId};
pub use note::Note;
pub use notebook::{LinkedNotebook, Notebook};
pub use resource::Resource;
pub use saved_search::SavedSearch;
pub use tag::Tag;
pub use user::User;
