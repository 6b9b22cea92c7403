//! Out-of-band resource-body files (spec.md §6 "Persisted state layout"): binary data past
//! an inline threshold is written under `resource_data_directory_path` as
//! `<noteLocalId>/<resourceLocalId>.dat` rather than held as a BLOB column, guarded by a
//! single read-write lock (spec.md §5 "Resource-data files ... are protected by a
//! read-write lock held for the duration of any resource body read or write"). The same
//! spill path applies to all three resource bodies (spec.md §6: "Alternate and recognition
//! data files use suffix `.alt.dat` and `.reco.dat`").

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::error::Error;

/// Bodies at or under this size stay inline in the `resources` table; larger bodies are
/// written to disk and only their relative path is stored.
pub const INLINE_THRESHOLD_BYTES: usize = 64 * 1024;

/// Which of a resource's three bodies a file belongs to; only the on-disk suffix differs.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ResourceBodyKind {
    Data,
    AlternateData,
    RecognitionData,
}

impl ResourceBodyKind {
    fn suffix(self) -> &'static str {
        match self {
            Self::Data => ".dat",
            Self::AlternateData => ".alt.dat",
            Self::RecognitionData => ".reco.dat",
        }
    }
}

pub struct ResourceFileStore {
    root: PathBuf,
    lock: RwLock<()>,
}

impl ResourceFileStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root, lock: RwLock::new(()) }
    }

    fn relative_path(note_local_id: &str, resource_local_id: &str, kind: ResourceBodyKind) -> PathBuf {
        Path::new(note_local_id).join(format!("{resource_local_id}{}", kind.suffix()))
    }

    /// Writes `data` to disk if it exceeds [`INLINE_THRESHOLD_BYTES`], returning the
    /// relative path to store alongside the row. Returns `None` (and writes nothing) for
    /// bodies that should stay inline — callers must then clear any previously-written file
    /// themselves via [`Self::delete_resource`].
    pub fn write_if_large(
        &self,
        note_local_id: &str,
        resource_local_id: &str,
        kind: ResourceBodyKind,
        data: &[u8],
    ) -> Result<Option<String>, Error> {
        if data.len() <= INLINE_THRESHOLD_BYTES {
            return Ok(None);
        }
        let relative = Self::relative_path(note_local_id, resource_local_id, kind);
        let absolute = self.root.join(&relative);
        let _guard = self.lock.write().expect("resource file lock poisoned");
        if let Some(parent) = absolute.parent() {
            fs::create_dir_all(parent).map_err(|err| Error::DatabaseRequestError(format!("failed to create resource directory: {err}")))?;
        }
        fs::write(&absolute, data).map_err(|err| Error::DatabaseRequestError(format!("failed to write resource file: {err}")))?;
        Ok(Some(relative.to_string_lossy().into_owned()))
    }

    pub fn read(&self, relative_path: &str) -> Result<Vec<u8>, Error> {
        let absolute = self.root.join(relative_path);
        let _guard = self.lock.read().expect("resource file lock poisoned");
        fs::read(&absolute).map_err(|err| Error::DatabaseRequestError(format!("failed to read resource file: {err}")))
    }

    /// Removes a single resource's file, if any (idempotent: missing files are not an
    /// error).
    pub fn delete_resource(&self, relative_path: &str) {
        let absolute = self.root.join(relative_path);
        let _guard = self.lock.write().expect("resource file lock poisoned");
        let _ = fs::remove_file(absolute);
    }

    /// Removes every resource file belonging to a note, used when a note's resource list is
    /// replaced wholesale or the note itself is expunged.
    pub fn delete_for_note(&self, note_local_id: &str) {
        let absolute = self.root.join(note_local_id);
        let _guard = self.lock.write().expect("resource file lock poisoned");
        let _ = fs::remove_dir_all(absolute);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_body_stays_inline() {
        let dir = std::env::temp_dir().join(format!("quillstore-test-{}", uuid::Uuid::new_v4()));
        let store = ResourceFileStore::new(dir);
        let result = store.write_if_large("note-1", "res-1", ResourceBodyKind::Data, b"tiny").unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn large_body_round_trips_through_disk() {
        let dir = std::env::temp_dir().join(format!("quillstore-test-{}", uuid::Uuid::new_v4()));
        let store = ResourceFileStore::new(dir.clone());
        let data = vec![7u8; INLINE_THRESHOLD_BYTES + 1];
        let relative =
            store.write_if_large("note-1", "res-1", ResourceBodyKind::Data, &data).unwrap().expect("large body should spill to disk");
        let read_back = store.read(&relative).unwrap();
        assert_eq!(read_back, data);
        store.delete_for_note("note-1");
        assert!(store.read(&relative).is_err());
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn alternate_and_recognition_bodies_use_the_documented_suffixes() {
        let dir = std::env::temp_dir().join(format!("quillstore-test-{}", uuid::Uuid::new_v4()));
        let store = ResourceFileStore::new(dir.clone());
        let data = vec![9u8; INLINE_THRESHOLD_BYTES + 1];
        let alt = store.write_if_large("note-1", "res-1", ResourceBodyKind::AlternateData, &data).unwrap().unwrap();
        let reco = store.write_if_large("note-1", "res-1", ResourceBodyKind::RecognitionData, &data).unwrap().unwrap();
        assert!(alt.ends_with(".alt.dat"));
        assert!(reco.ends_with(".reco.dat"));
        assert_eq!(store.read(&alt).unwrap(), data);
        assert_eq!(store.read(&reco).unwrap(), data);
        let _ = fs::remove_dir_all(dir);
    }
}
