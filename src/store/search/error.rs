//! Compile errors for the note-search query language (spec.md §4.4): a human-readable
//! description plus the offending token, kept separate from [`crate::error::Error`] until a
//! caller folds it into `InvalidArgument`.

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("{description}: {token:?}")]
pub struct SearchError {
    pub description: String,
    pub token: String,
}

impl SearchError {
    pub fn new(description: impl Into<String>, token: impl Into<String>) -> Self {
        Self { description: description.into(), token: token.into() }
    }
}

impl From<SearchError> for crate::error::Error {
    fn from(value: SearchError) -> Self {
        crate::error::Error::InvalidArgument(value.to_string())
    }
}
