//! In-memory fixtures for the facade's own test suite, grounded on the teacher's `mock.rs`
//! helper style: a throwaway, fully wired [`LocalStorage`] plus a canned nine-note search
//! corpus (spec.md §8 scenarios 5-6).

use std::collections::BTreeMap;

use crate::error::Error;
use crate::facade::{LocalStorage, LocalStorageBuilder};
use crate::types::note::NoteAttributes;
use crate::types::ids::LocalId;
use crate::types::{Note, Notebook};

/// Builds a facade backed by a private `:memory:` database. Each call gets its own
/// connection pool, so fixtures never leak between tests.
pub async fn in_memory_storage() -> LocalStorage {
    let dir = std::env::temp_dir().join(format!("quillstore-test-{}", uuid::Uuid::new_v4()));
    let options = crate::config::StorageOptions {
        database_path: dir.clone(),
        resource_data_directory_path: dir.join("resources"),
        database_filename_suffix: "test.sqlite".to_string(),
        startup_options: Default::default(),
        reader_thread_pool_size: std::num::NonZeroUsize::new(2),
    };
    LocalStorageBuilder::new().with_options(options).build().await.expect("in-memory storage should build")
}

/// The nine-note corpus referenced by spec.md §8 scenarios 5 and 6: three notebooks of three
/// notes each, with `<en-todo>` markers and `applicationData` keys placed so that the four
/// example queries in §8 resolve to the index sets quoted there. Returns the inserted notes'
/// local ids in fixture order (index 0..9).
pub async fn seed_nine_note_fixture(storage: &LocalStorage) -> Result<Vec<LocalId>, Error> {
    let mut notebook_ids = Vec::new();
    for i in 0..3 {
        let notebook = Notebook { name: format!("Test notebook #{i}"), ..Default::default() };
        notebook_ids.push(storage.notebooks().put(notebook).await?);
    }

    let plain = "<en-note><h1>Plain note body</h1></en-note>";
    let todo_true = "<en-note><h1>Buy milk</h1><en-todo checked=\"true\"/></en-note>";
    let todo_false = "<en-note><h1>Buy eggs</h1><en-todo checked=\"false\"/></en-note>";
    let todo_both = "<en-note><h1>Buy bread</h1><en-todo checked=\"true\"/><en-todo checked=\"false\"/></en-note>";

    // (notebook index, content, application_data key)
    let fixture: [(usize, &str, Option<&str>); 9] = [
        (0, plain, None),
        (0, todo_true, None),
        (0, plain, None),
        (1, todo_false, None),
        (1, todo_both, None),
        (1, plain, None),
        (2, plain, None),
        (2, plain, Some("Quentier")),
        (2, todo_true, Some("Quentier")),
    ];

    let mut note_ids = Vec::with_capacity(9);
    for (index, (notebook_index, content, application_data_key)) in fixture.into_iter().enumerate() {
        let attributes = application_data_key.map(|key| {
            let mut map = BTreeMap::new();
            map.insert(key.to_string(), format!("value for {key}"));
            NoteAttributes { application_data: Some(map), ..Default::default() }
        });
        let note = Note {
            notebook_local_id: notebook_ids[notebook_index].clone(),
            title: Some(format!("Note #{index}")),
            content: Some(content.to_string()),
            active: true,
            attributes,
            ..Default::default()
        };
        note_ids.push(storage.notes().put(note).await?);
    }

    Ok(note_ids)
}
