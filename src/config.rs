//! Recognized configuration options (spec.md §6).

use std::num::NonZeroUsize;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Options controlling where the database and resource-body files live and how startup
/// behaves.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct StorageOptions {
    /// Directory the SQLite database file lives in.
    pub database_path: PathBuf,
    /// Directory resource-body files (`.dat`, `.alt.dat`, `.reco.dat`) are written under.
    pub resource_data_directory_path: PathBuf,
    /// Filename of the database file within `database_path`.
    #[serde(default = "default_database_filename_suffix")]
    pub database_filename_suffix: String,
    /// Behavior to apply before the first connection is opened.
    #[serde(default)]
    pub startup_options: StartupOptions,
    /// Size of the bounded reader pool. `None` defers to the platform's reported
    /// parallelism.
    #[serde(default)]
    pub reader_thread_pool_size: Option<NonZeroUsize>,
}

fn default_database_filename_suffix() -> String {
    "QuentierLocalStorage.sqlite".to_string()
}

impl StorageOptions {
    /// Full path to the database file (`database_path` joined with the filename).
    pub fn database_file_path(&self) -> PathBuf {
        self.database_path.join(&self.database_filename_suffix)
    }
}

/// Flags controlling one-time behavior applied before the store becomes ready.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize)]
pub struct StartupOptions {
    /// Delete any pre-existing database file before opening.
    #[serde(default)]
    pub clear_database: bool,
    /// Proceed even if the database file appears to be locked by another process.
    #[serde(default)]
    pub override_locked_database: bool,
}
