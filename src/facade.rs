//! The facade (spec.md §2 "Facade", §9 "fallible constructors"): the single public entry
//! point, built through [`LocalStorageBuilder`] rather than a plain constructor so
//! construction can fail with [`Error::InvalidArgument`] instead of panicking or leaving a
//! partially wired object behind.

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;

use crate::concurrency::pool::build_pool;
use crate::concurrency::Dispatcher;
use crate::config::StorageOptions;
use crate::error::Error;
use crate::notifier::Notifier;
use crate::store::resource_files::ResourceFileStore;
use crate::store::sqlite::{
    LinkedNotebookHandler, NotebookHandler, NoteHandler, ResourceHandler, SavedSearchHandler, SyncInfoHandler, TagHandler,
    UserHandler,
};
use crate::store::HandlerContext;

/// Aggregates one handler per entity kind behind a single object (spec.md §2 "Facade").
/// Every public method simply forwards to the owning handler; the interesting logic lives
/// in `store::sqlite::*`.
pub struct LocalStorage {
    database_path: PathBuf,
    resource_data_directory_path: PathBuf,
    notifier: Notifier,
    notebooks: NotebookHandler,
    linked_notebooks: LinkedNotebookHandler,
    notes: NoteHandler,
    resources: ResourceHandler,
    tags: TagHandler,
    saved_searches: SavedSearchHandler,
    users: UserHandler,
    sync_info: SyncInfoHandler,
}

impl LocalStorage {
    /// Full path to the database file (spec.md §1 supplemental accessor).
    pub fn database_file_path(&self) -> &std::path::Path {
        &self.database_path
    }

    /// Directory out-of-band resource-body files are written under (spec.md §1 supplemental
    /// accessor).
    pub fn resource_data_directory_path(&self) -> &std::path::Path {
        &self.resource_data_directory_path
    }

    /// Registers a callback invoked for every change event, on the notifier's owning thread
    /// (spec.md §4.2).
    pub fn subscribe<F>(&self, callback: F)
    where
        F: Fn(&crate::notifier::Event) + Send + 'static,
    {
        self.notifier.subscribe(callback);
    }

    pub fn notebooks(&self) -> &NotebookHandler {
        &self.notebooks
    }

    pub fn linked_notebooks(&self) -> &LinkedNotebookHandler {
        &self.linked_notebooks
    }

    pub fn notes(&self) -> &NoteHandler {
        &self.notes
    }

    pub fn resources(&self) -> &ResourceHandler {
        &self.resources
    }

    pub fn tags(&self) -> &TagHandler {
        &self.tags
    }

    pub fn saved_searches(&self) -> &SavedSearchHandler {
        &self.saved_searches
    }

    pub fn users(&self) -> &UserHandler {
        &self.users
    }

    pub fn sync_info(&self) -> &SyncInfoHandler {
        &self.sync_info
    }
}

/// Builds a [`LocalStorage`] from [`StorageOptions`], or from individually supplied
/// handlers (primarily for [`crate::test_utils`], which wires every handler against a
/// shared in-memory pool up front). `build()` fails with [`Error::InvalidArgument`] if any
/// of the eight handlers named in spec.md §4.3 is still missing once `options` (if any) has
/// been applied.
#[derive(Default)]
pub struct LocalStorageBuilder {
    options: Option<StorageOptions>,
    database_path: Option<PathBuf>,
    resource_data_directory_path: Option<PathBuf>,
    notifier: Option<Notifier>,
    notebooks: Option<NotebookHandler>,
    linked_notebooks: Option<LinkedNotebookHandler>,
    notes: Option<NoteHandler>,
    resources: Option<ResourceHandler>,
    tags: Option<TagHandler>,
    saved_searches: Option<SavedSearchHandler>,
    users: Option<UserHandler>,
    sync_info: Option<SyncInfoHandler>,
}

impl LocalStorageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the builder to construct every handler from `options` at `build()` time:
    /// opens (and migrates) the database, builds the reader pool and writer thread, and
    /// roots a [`ResourceFileStore`] at `resource_data_directory_path`.
    #[must_use]
    pub fn with_options(mut self, options: StorageOptions) -> Self {
        self.options = Some(options);
        self
    }

    #[must_use]
    pub fn with_notebooks_handler(mut self, handler: NotebookHandler) -> Self {
        self.notebooks = Some(handler);
        self
    }

    #[must_use]
    pub fn with_linked_notebooks_handler(mut self, handler: LinkedNotebookHandler) -> Self {
        self.linked_notebooks = Some(handler);
        self
    }

    #[must_use]
    pub fn with_notes_handler(mut self, handler: NoteHandler) -> Self {
        self.notes = Some(handler);
        self
    }

    #[must_use]
    pub fn with_resources_handler(mut self, handler: ResourceHandler) -> Self {
        self.resources = Some(handler);
        self
    }

    #[must_use]
    pub fn with_tags_handler(mut self, handler: TagHandler) -> Self {
        self.tags = Some(handler);
        self
    }

    #[must_use]
    pub fn with_saved_searches_handler(mut self, handler: SavedSearchHandler) -> Self {
        self.saved_searches = Some(handler);
        self
    }

    #[must_use]
    pub fn with_users_handler(mut self, handler: UserHandler) -> Self {
        self.users = Some(handler);
        self
    }

    #[must_use]
    pub fn with_sync_info_handler(mut self, handler: SyncInfoHandler) -> Self {
        self.sync_info = Some(handler);
        self
    }

    /// Applies `options`, opening the database and wiring every handler that was not
    /// already supplied directly.
    async fn apply_options(&mut self, options: StorageOptions) -> Result<(), Error> {
        if options.startup_options.clear_database {
            let path = options.database_file_path();
            if path.exists() {
                std::fs::remove_file(&path)
                    .map_err(|err| Error::DatabaseRequestError(format!("failed to clear existing database: {err}")))?;
            }
        }

        std::fs::create_dir_all(&options.database_path)
            .map_err(|err| Error::DatabaseRequestError(format!("failed to create database directory: {err}")))?;
        std::fs::create_dir_all(&options.resource_data_directory_path)
            .map_err(|err| Error::DatabaseRequestError(format!("failed to create resource directory: {err}")))?;

        let database_path = options.database_file_path();
        let pool = build_pool(database_path.clone())?;

        // `override_locked_database = false` fails fast against a database another process
        // already holds locked, rather than silently waiting on it (spec.md §6).
        let busy_timeout_ms: u64 = if options.startup_options.override_locked_database { 5_000 } else { 0 };
        {
            let object = pool.get().await.map_err(|err| Error::DatabaseRequestError(err.to_string()))?;
            object
                .interact(move |conn| -> Result<(), Error> {
                    conn.busy_timeout(std::time::Duration::from_millis(busy_timeout_ms))?;
                    crate::store::migrations::run(conn)?;
                    tracing::info!("database migrated to latest schema");
                    Ok(())
                })
                .await
                .map_err(|err| Error::DatabaseRequestError(err.to_string()))??;
        }

        let (notifier, notifier_drain) = Notifier::new();
        let reader_concurrency = options
            .reader_thread_pool_size
            .or_else(|| std::thread::available_parallelism().ok())
            .unwrap_or(NonZeroUsize::new(1).expect("1 is non-zero"));
        let dispatcher = Arc::new(Dispatcher::new(pool, database_path.clone(), notifier_drain, reader_concurrency)?);
        let files = Arc::new(ResourceFileStore::new(options.resource_data_directory_path.clone()));
        let ctx = HandlerContext { dispatcher, notifier: notifier.clone(), files };

        self.database_path = Some(database_path);
        self.resource_data_directory_path = Some(options.resource_data_directory_path.clone());
        self.notifier = Some(notifier);
        self.notebooks.get_or_insert_with(|| NotebookHandler::new(ctx.clone()));
        self.linked_notebooks.get_or_insert_with(|| LinkedNotebookHandler::new(ctx.clone()));
        self.notes.get_or_insert_with(|| NoteHandler::new(ctx.clone()));
        self.resources.get_or_insert_with(|| ResourceHandler::new(ctx.clone()));
        self.tags.get_or_insert_with(|| TagHandler::new(ctx.clone()));
        self.saved_searches.get_or_insert_with(|| SavedSearchHandler::new(ctx.clone()));
        self.users.get_or_insert_with(|| UserHandler::new(ctx.clone()));
        self.sync_info.get_or_insert_with(|| SyncInfoHandler::new(ctx));
        Ok(())
    }

    /// Wires every handler and returns the finished facade, or
    /// [`Error::InvalidArgument`] if a handler is still missing (spec.md §2, §9).
    pub async fn build(mut self) -> Result<LocalStorage, Error> {
        if let Some(options) = self.options.take() {
            self.apply_options(options).await?;
        }

        let missing = |name: &str| Error::InvalidArgument(format!("LocalStorageBuilder: missing {name} handler"));
        Ok(LocalStorage {
            database_path: self.database_path.unwrap_or_default(),
            resource_data_directory_path: self.resource_data_directory_path.unwrap_or_default(),
            notifier: self.notifier.ok_or_else(|| missing("notifier"))?,
            notebooks: self.notebooks.ok_or_else(|| missing("notebook"))?,
            linked_notebooks: self.linked_notebooks.ok_or_else(|| missing("linked notebook"))?,
            notes: self.notes.ok_or_else(|| missing("note"))?,
            resources: self.resources.ok_or_else(|| missing("resource"))?,
            tags: self.tags.ok_or_else(|| missing("tag"))?,
            saved_searches: self.saved_searches.ok_or_else(|| missing("saved search"))?,
            users: self.users.ok_or_else(|| missing("user"))?,
            sync_info: self.sync_info.ok_or_else(|| missing("sync info"))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn build_without_options_or_handlers_fails() {
        let result = LocalStorageBuilder::new().build().await;
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn build_with_in_memory_options_succeeds() {
        let dir = std::env::temp_dir().join(format!("quillstore-facade-test-{}", uuid::Uuid::new_v4()));
        let options = StorageOptions {
            database_path: dir.clone(),
            resource_data_directory_path: dir.join("resources"),
            database_filename_suffix: "test.sqlite".to_string(),
            startup_options: Default::default(),
            reader_thread_pool_size: NonZeroUsize::new(2),
        };
        let storage = LocalStorageBuilder::new().with_options(options).build().await.unwrap();
        assert_eq!(storage.notebooks().count().await.unwrap(), 0);
        let _ = std::fs::remove_dir_all(dir);
    }
}
