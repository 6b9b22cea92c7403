//! Shared enums and option bundles used across entity handlers (spec.md §3, §4.3).

use bitflags::bitflags;

use crate::notifier::NoteUpdateOptions;
use crate::types::ids::Guid;

/// A notebook/tag filter dimension selecting user-own, any-linked, or particular-linked
/// ownership (spec.md §4.3.3, GLOSSARY "Affiliation").
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Affiliation {
    Any,
    User,
    AnyLinkedNotebook,
    ParticularLinkedNotebooks(Vec<Guid>),
}

/// A three-way include/exclude/either filter (spec.md §4.3.10).
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum TriStateFilter {
    Include,
    Exclude,
    #[default]
    Either,
}

impl TriStateFilter {
    /// Renders this filter as a SQL fragment testing `column` (a boolean-valued column),
    /// or `None` if the filter does not restrict the column.
    pub fn sql_predicate(self, column: &str) -> Option<String> {
        match self {
            TriStateFilter::Include => Some(format!("{column} = 1")),
            TriStateFilter::Exclude => Some(format!("{column} = 0")),
            TriStateFilter::Either => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OrderDirection {
    Ascending,
    Descending,
}

impl OrderDirection {
    pub fn sql_keyword(self) -> &'static str {
        match self {
            OrderDirection::Ascending => "ASC",
            OrderDirection::Descending => "DESC",
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NotebookOrderKey {
    CreationTimestamp,
    ModificationTimestamp,
    Title,
    UpdateSequenceNumber,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TagOrderKey {
    Name,
    UpdateSequenceNumber,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NoteOrderKey {
    CreationTimestamp,
    ModificationTimestamp,
    Title,
    UpdateSequenceNumber,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SavedSearchOrderKey {
    Name,
    UpdateSequenceNumber,
}

/// Common options shared by every `list*`/`list*Guids` operation: filters plus ordering and
/// pagination (spec.md §4.3.3).
#[derive(Clone, Debug, Default)]
pub struct Pagination {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

bitflags! {
    /// Which notes a count operation should consider (spec.md §4.3.9).
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct NoteCountOptions: u8 {
        const INCLUDE_NON_DELETED = 0b01;
        const INCLUDE_DELETED     = 0b10;
    }
}

impl Default for NoteCountOptions {
    fn default() -> Self {
        Self::INCLUDE_NON_DELETED
    }
}

bitflags! {
    /// Which update-option flags a note `find` should honor when deciding how much of the
    /// resource set to populate (spec.md §4.3.8).
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct FetchNoteOptions: u8 {
        const WITH_RESOURCE_METADATA    = 0b01;
        const WITH_RESOURCE_BINARY_DATA = 0b10;
    }
}

bitflags! {
    /// Which parts of a resource a `find` should populate (spec.md §4.3.12).
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct FetchResourceOptions: u8 {
        const WITH_BINARY_DATA = 0b01;
    }
}

bitflags! {
    /// Which parts of a note `update` should touch (spec.md §4.3.7).
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct UpdateNoteOptions: u8 {
        const UPDATE_RESOURCE_METADATA     = 0b001;
        const UPDATE_RESOURCE_BINARY_DATA   = 0b010;
        const UPDATE_TAGS                  = 0b100;
    }
}

impl From<UpdateNoteOptions> for NoteUpdateOptions {
    fn from(value: UpdateNoteOptions) -> Self {
        Self {
            update_resource_metadata: value.contains(UpdateNoteOptions::UPDATE_RESOURCE_METADATA),
            update_resource_binary_data: value.contains(UpdateNoteOptions::UPDATE_RESOURCE_BINARY_DATA),
            update_tags: value.contains(UpdateNoteOptions::UPDATE_TAGS),
        }
    }
}

/// Filters applied by `listNotebooks`/`listNotebookGuids` (spec.md §4.3.3) and, with the
/// notebook-specific fields dropped, reused by the equivalent tag listing.
#[derive(Clone, Debug)]
pub struct NotebookListOptions {
    pub affiliation: Affiliation,
    pub locally_modified: TriStateFilter,
    pub locally_favorited: TriStateFilter,
    pub order: Option<(NotebookOrderKey, OrderDirection)>,
    pub pagination: Pagination,
}

impl Default for NotebookListOptions {
    fn default() -> Self {
        Self {
            affiliation: Affiliation::Any,
            locally_modified: TriStateFilter::Either,
            locally_favorited: TriStateFilter::Either,
            order: None,
            pagination: Pagination::default(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct TagListOptions {
    pub affiliation: Affiliation,
    pub locally_modified: TriStateFilter,
    pub locally_favorited: TriStateFilter,
    pub order: Option<(TagOrderKey, OrderDirection)>,
    pub pagination: Pagination,
}

impl Default for TagListOptions {
    fn default() -> Self {
        Self {
            affiliation: Affiliation::Any,
            locally_modified: TriStateFilter::Either,
            locally_favorited: TriStateFilter::Either,
            order: None,
            pagination: Pagination::default(),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct SavedSearchListOptions {
    pub locally_modified: TriStateFilter,
    pub locally_favorited: TriStateFilter,
    pub order: Option<(SavedSearchOrderKey, OrderDirection)>,
    pub pagination: Pagination,
}

#[derive(Clone, Debug, Default)]
pub struct NoteListOptions {
    pub notebook_local_id: Option<crate::types::ids::LocalId>,
    pub tag_local_ids: Vec<crate::types::ids::LocalId>,
    pub order: Option<(NoteOrderKey, OrderDirection)>,
    pub pagination: Pagination,
}
