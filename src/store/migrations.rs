//! Schema migrations, grounded on the teacher's
//! `db_management::utils` (`rusqlite_migration::Migrations`, settings-table versioning).

use rusqlite::Connection;
use rusqlite_migration::{Migrations, M};

use crate::error::Error;

fn migrations() -> Migrations<'static> {
    Migrations::new(vec![M::up(include_str!("schema.sql"))])
}

/// Brings `conn` up to the latest schema version, creating the database from scratch if it
/// is empty. Returns [`Error::SchemaVersion`] if the on-disk schema is newer than this build
/// understands (spec.md §6 "Startup").
pub fn run(conn: &mut Connection) -> Result<(), Error> {
    migrations().to_latest(conn)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_database_migrates_cleanly() {
        let mut conn = Connection::open_in_memory().unwrap();
        run(&mut conn).unwrap();
        let table_count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'notes'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(table_count, 1);
    }

    #[test]
    fn running_twice_is_a_no_op() {
        let mut conn = Connection::open_in_memory().unwrap();
        run(&mut conn).unwrap();
        run(&mut conn).unwrap();
    }
}
