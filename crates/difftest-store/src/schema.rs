//! On-disk schema (§6.1) and the connection-level PRAGMAs that make the
//! store safe for multiple processes sharing one file.

use rusqlite::Connection;

use crate::error::{Result, StoreError};

pub const SCHEMA_VERSION: &str = "1";

const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS metadata (
    dataid TEXT PRIMARY KEY,
    data   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS environment (
    id               INTEGER PRIMARY KEY,
    environment_name TEXT NOT NULL,
    system_packages  TEXT NOT NULL,
    python_version   TEXT NOT NULL,
    UNIQUE (environment_name, system_packages, python_version)
);

CREATE TABLE IF NOT EXISTS test_execution (
    id             INTEGER PRIMARY KEY,
    environment_id INTEGER NOT NULL REFERENCES environment(id) ON DELETE CASCADE,
    test_name      TEXT NOT NULL,
    duration       REAL,
    failed         INTEGER NOT NULL DEFAULT 0,
    forced         INTEGER NOT NULL DEFAULT 0,
    UNIQUE (environment_id, test_name)
);

CREATE TABLE IF NOT EXISTS file_fp (
    id               INTEGER PRIMARY KEY,
    filename         TEXT NOT NULL,
    method_checksums BLOB NOT NULL,
    mtime            REAL NOT NULL,
    fsha             TEXT NOT NULL,
    UNIQUE (filename, fsha, method_checksums)
);

CREATE TABLE IF NOT EXISTS test_execution_file_fp (
    test_execution_id INTEGER NOT NULL REFERENCES test_execution(id) ON DELETE CASCADE,
    fingerprint_id    INTEGER NOT NULL REFERENCES file_fp(id) ON DELETE CASCADE,
    PRIMARY KEY (test_execution_id, fingerprint_id)
);

CREATE INDEX IF NOT EXISTS idx_test_execution_environment_id ON test_execution(environment_id);
CREATE INDEX IF NOT EXISTS idx_test_execution_test_name ON test_execution(test_name);
CREATE INDEX IF NOT EXISTS idx_file_fp_filename ON file_fp(filename);
CREATE INDEX IF NOT EXISTS idx_tefp_test_execution_id ON test_execution_file_fp(test_execution_id);
CREATE INDEX IF NOT EXISTS idx_tefp_fingerprint_id ON test_execution_file_fp(fingerprint_id);
"#;

/// Open a connection at `path` (creating the file and its schema if
/// needed) and apply the PRAGMAs §4.5 requires for safe multi-process use.
pub fn open(path: &std::path::Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
            path: parent.display().to_string(),
            source,
        })?;
    }
    let conn = Connection::open(path)?;
    configure(&conn)?;
    apply_schema(&conn, path)?;
    Ok(conn)
}

fn configure(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "busy_timeout", 30_000)?;
    conn.pragma_update(None, "mmap_size", 256 * 1024 * 1024i64)?;
    conn.pragma_update(None, "cache_size", -64_000i64)?;
    // SQLite ignores `ON DELETE CASCADE` unless this is set on every
    // connection; without it the `test_execution_file_fp` junction rows
    // in the DDL above never actually cascade-delete.
    conn.pragma_update(None, "foreign_keys", true)?;
    Ok(())
}

fn apply_schema(conn: &Connection, path: &std::path::Path) -> Result<()> {
    conn.execute_batch(DDL)?;
    let existing: Option<String> = conn
        .query_row(
            "SELECT data FROM metadata WHERE dataid = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .ok();
    match existing {
        None => {
            conn.execute(
                "INSERT INTO metadata (dataid, data) VALUES ('schema_version', ?1)",
                [SCHEMA_VERSION],
            )?;
        }
        Some(version) if version != SCHEMA_VERSION => {
            return Err(StoreError::StoreCorrupt {
                path: path.display().to_string(),
                detail: format!(
                    "schema_version {version} on disk does not match supported version {SCHEMA_VERSION}"
                ),
            });
        }
        Some(_) => {}
    }
    Ok(())
}

/// Begin a write transaction in immediate-lock mode, per §4.5: write
/// conflicts fail fast rather than mid-transaction.
pub fn begin_immediate(conn: &mut Connection) -> Result<rusqlite::Transaction<'_>> {
    let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
    Ok(tx)
}
