//! Error taxonomy (spec.md §7).
//!
//! `NotFound` is deliberately absent from this enum: find operations return
//! `Result<Option<T>, Error>` rather than encoding "no such row" as an error variant (spec.md
//! §7, §9 "option-returning find vs. exception-throwing find").

use thiserror::Error;

/// The crate-wide error type returned by every fallible [`crate::facade::LocalStorage`]
/// method.
#[derive(Debug, Error)]
pub enum Error {
    /// Construction with a missing collaborator, or a malformed entity: empty name,
    /// circular tag parent, a resource without a note reference, an invalid search query,
    /// or an ambiguous `expungeNotebookByName` scope.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Any failure returned by the underlying SQL engine (prepare, bind, exec, commit,
    /// rollback). Carries the native error message.
    #[error("database request failed: {0}")]
    DatabaseRequestError(String),

    /// The owning facade (and therefore the handler) was destroyed before a closure
    /// submitted to the dispatcher could run.
    #[error("handler destroyed before the task could run")]
    HandlerDestroyed,

    /// The on-disk schema is newer than this build can read, or requires an upgrade this
    /// build does not carry.
    #[error("schema version error: {0}")]
    SchemaVersion(String),
}

impl From<rusqlite::Error> for Error {
    fn from(value: rusqlite::Error) -> Self {
        match value {
            rusqlite::Error::InvalidParameterName(_)
            | rusqlite::Error::InvalidColumnName(_)
            | rusqlite::Error::InvalidColumnIndex(_)
            | rusqlite::Error::InvalidColumnType(..)
            | rusqlite::Error::FromSqlConversionFailure(..)
            | rusqlite::Error::IntegralValueOutOfRange(..) => {
                Self::DatabaseRequestError(format!("failed to parse database row: {value}"))
            },
            _ => Self::DatabaseRequestError(value.to_string()),
        }
    }
}

impl From<rusqlite_migration::Error> for Error {
    fn from(value: rusqlite_migration::Error) -> Self {
        Self::SchemaVersion(value.to_string())
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for Error {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        Self::HandlerDestroyed
    }
}
