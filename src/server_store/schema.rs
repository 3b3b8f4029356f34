//! Database schema for server.db.
//!
//! Versioned schema bootstrap: the schema version is persisted in
//! `PRAGMA user_version` (offset by `BASE_DB_VERSION` so an unrelated
//! SQLite file cannot masquerade as one of ours) and migrations run in
//! order when an older database is opened.

use anyhow::{bail, Result};
use rusqlite::Connection;

/// Offset added to the schema version stored in `user_version`.
pub const BASE_DB_VERSION: usize = 100;

/// One version of the server database schema.
pub struct VersionedSchema {
    pub version: usize,
    /// DDL statements creating the schema from scratch.
    pub ddl: &'static [&'static str],
    /// Tables that must exist for this version to validate.
    pub tables: &'static [&'static str],
    /// Migration from the previous version, if any.
    pub migration: Option<fn(&Connection) -> rusqlite::Result<()>>,
}

impl VersionedSchema {
    /// Create the schema from scratch and stamp the version.
    pub fn create(&self, conn: &Connection) -> Result<()> {
        for stmt in self.ddl {
            conn.execute(stmt, [])?;
        }
        conn.execute(
            &format!("PRAGMA user_version = {}", BASE_DB_VERSION + self.version),
            [],
        )?;
        Ok(())
    }

    /// Check that every table of this version exists.
    pub fn validate(&self, conn: &Connection) -> Result<()> {
        for table in self.tables {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [table],
                |row| row.get(0),
            )?;
            if count != 1 {
                bail!("Server database is missing expected table '{}'", table);
            }
        }
        Ok(())
    }
}

const SERVERS_TABLE_V1: &str = r#"CREATE TABLE servers (
    id INTEGER PRIMARY KEY,
    backend_id TEXT NOT NULL UNIQUE,
    operstate TEXT NOT NULL,
    deleted INTEGER NOT NULL DEFAULT 0,
    last_job TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
)"#;

const SERVERS_BACKEND_ID_INDEX_V1: &str =
    "CREATE INDEX idx_servers_backend_id ON servers (backend_id)";

const SERVERS_DELETED_INDEX_V1: &str = "CREATE INDEX idx_servers_deleted ON servers (deleted)";

pub const SERVER_DB_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 0,
    ddl: &[
        SERVERS_TABLE_V1,
        SERVERS_BACKEND_ID_INDEX_V1,
        SERVERS_DELETED_INDEX_V1,
    ],
    tables: &["servers"],
    migration: None,
}];
