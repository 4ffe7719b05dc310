//! Schema versioning for the submission ledger.
//!
//! The base statements in [`SCHEMA_STATEMENTS`] describe version 1. Every
//! later version is an entry in [`MIGRATIONS`], applied in order inside a
//! transaction together with the version bump.

use rusqlite::{Connection, OptionalExtension};
use tracing::info;

use crate::error::{Error, Result};

use super::schema::SCHEMA_STATEMENTS;

/// Key used to store the schema version in the metadata table.
const VERSION_KEY: &str = "schema_version";

/// Ordered `(version, sql)` upgrades on top of the base schema.
const MIGRATIONS: &[(i32, &str)] = &[(
    2,
    "ALTER TABLE submissions ADD COLUMN storage_checksum TEXT",
)];

/// The schema version a freshly initialized database ends up at.
pub const CURRENT_VERSION: i32 = 2;

/// Create the base schema if needed and apply pending migrations.
///
/// # Errors
///
/// Returns an error if schema creation or a migration fails, or if the
/// database was written by a newer version of this crate.
pub fn initialize_schema(conn: &mut Connection) -> Result<()> {
    for statement in SCHEMA_STATEMENTS {
        conn.execute(statement, [])?;
    }

    let mut version = schema_version(conn)?.unwrap_or(1);
    if version > CURRENT_VERSION {
        return Err(Error::DatabaseMigration {
            message: format!(
                "database schema version {version} is newer than supported version {CURRENT_VERSION}"
            ),
        });
    }

    let start = version;
    for &(target, sql) in MIGRATIONS.iter().filter(|(v, _)| *v > start) {
        let tx = conn.transaction()?;
        tx.execute_batch(sql).map_err(|e| Error::DatabaseMigration {
            message: format!("migration to version {target} failed: {e}"),
        })?;
        set_schema_version(&tx, target)?;
        tx.commit()?;
        info!("Migrated submission ledger to schema version {}", target);
        version = target;
    }

    set_schema_version(conn, version)
}

/// Read the stored schema version; `None` on a database that never had one.
fn schema_version(conn: &Connection) -> Result<Option<i32>> {
    let stored: Option<String> = conn
        .query_row(
            "SELECT value FROM metadata WHERE key = ?1",
            [VERSION_KEY],
            |row| row.get(0),
        )
        .optional()?;

    stored
        .map(|value| {
            value.parse().map_err(|_| Error::DatabaseMigration {
                message: format!("invalid schema version: {value}"),
            })
        })
        .transpose()
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
        (VERSION_KEY, version.to_string()),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_db() -> Connection {
        Connection::open_in_memory().expect("failed to create in-memory database")
    }

    fn columns(conn: &Connection) -> Vec<String> {
        conn.prepare("SELECT name FROM pragma_table_info('submissions')")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(std::result::Result::ok)
            .collect()
    }

    #[test]
    fn test_fresh_database_reaches_current_version() {
        let mut conn = create_test_db();
        initialize_schema(&mut conn).expect("failed to initialize schema");

        assert_eq!(schema_version(&conn).unwrap(), Some(CURRENT_VERSION));
        assert!(columns(&conn).contains(&"storage_checksum".to_string()));
    }

    #[test]
    fn test_initialize_schema_idempotent() {
        let mut conn = create_test_db();
        initialize_schema(&mut conn).expect("first init failed");
        initialize_schema(&mut conn).expect("second init failed");

        assert_eq!(schema_version(&conn).unwrap(), Some(CURRENT_VERSION));
    }

    #[test]
    fn test_upgrades_version_one_database() {
        let mut conn = create_test_db();
        for statement in SCHEMA_STATEMENTS {
            conn.execute(statement, []).unwrap();
        }
        set_schema_version(&conn, 1).unwrap();
        assert!(!columns(&conn).contains(&"storage_checksum".to_string()));

        initialize_schema(&mut conn).unwrap();
        assert!(columns(&conn).contains(&"storage_checksum".to_string()));
        assert_eq!(schema_version(&conn).unwrap(), Some(2));
    }

    #[test]
    fn test_rejects_newer_database() {
        let mut conn = create_test_db();
        initialize_schema(&mut conn).unwrap();
        set_schema_version(&conn, CURRENT_VERSION + 1).unwrap();

        let err = initialize_schema(&mut conn).unwrap_err();
        assert!(err.to_string().contains("newer than supported"));
    }

    #[test]
    fn test_rejects_garbage_version() {
        let mut conn = create_test_db();
        initialize_schema(&mut conn).unwrap();
        conn.execute(
            "UPDATE metadata SET value = 'two' WHERE key = ?1",
            [VERSION_KEY],
        )
        .unwrap();

        let err = initialize_schema(&mut conn).unwrap_err();
        assert!(err.to_string().contains("invalid schema version"));
    }

    #[test]
    fn test_indexes_created() {
        let mut conn = create_test_db();
        initialize_schema(&mut conn).unwrap();

        let indexes: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='index' AND tbl_name='submissions'")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(std::result::Result::ok)
            .collect();

        assert!(indexes.iter().any(|n| n.contains("status")));
        assert!(indexes.iter().any(|n| n.contains("submitter")));
    }
}
