//! Embedded, local SQLite-backed storage engine for an Evernote-compatible notes database.
//!
//! This crate persists and queries the full Evernote object graph — users, notebooks
//! (including those from linked accounts), notes, resources, tags, saved searches, and
//! linked-notebook handles — behind an asynchronous, future-returning facade suitable for
//! embedding in a desktop client where a UI layer calls it from an arbitrary thread and
//! expects non-blocking operations plus change notifications.
//!
//! ## Overview
//!
//! [`facade::LocalStorage`] is the public entry point. It is built through
//! [`facade::LocalStorageBuilder`], which wires together one handler per entity kind
//! (notebooks, linked notebooks, tags, notes, resources, saved searches, users,
//! synchronization info) on top of a shared [`concurrency::dispatcher::Dispatcher`] and
//! [`notifier::Notifier`]. Every public method returns a future; reads run on a bounded
//! pool of blocking tasks, writes are serialized through a single FIFO writer thread, and
//! mutations emit typed events on the notifier after their transaction commits.

pub mod concurrency;
pub mod config;
pub mod error;
pub mod facade;
pub mod notifier;
pub mod store;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use error::Error;
pub use facade::LocalStorage;
