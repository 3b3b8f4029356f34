//! SQLite-backed implementation of the server store.

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, info};

use super::schema::{BASE_DB_VERSION, SERVER_DB_VERSIONED_SCHEMAS};
use super::ServerStore;
use crate::models::{JobRef, Opcode, OpStatus, OperState, ServerRecord};

/// SQLite-backed server record store.
pub struct SqliteServerStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteServerStore {
    /// Open an existing database or create a new one with the current schema.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = if db_path.as_ref().exists() {
            Connection::open_with_flags(
                &db_path,
                rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                    | rusqlite::OpenFlags::SQLITE_OPEN_URI
                    | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?
        } else {
            let conn = Connection::open(&db_path)?;
            SERVER_DB_VERSIONED_SCHEMAS
                .last()
                .context("No schemas defined")?
                .create(&conn)?;
            info!("Created new server database at {:?}", db_path.as_ref());
            conn
        };

        let db_version = conn
            .query_row("PRAGMA user_version;", [], |row| row.get::<usize, i64>(0))
            .context("Failed to read database version")?
            - BASE_DB_VERSION as i64;

        if db_version < 0 {
            bail!(
                "Server database version {} is too old, does not contain base db version {}",
                db_version,
                BASE_DB_VERSION
            );
        }
        let version = db_version as usize;

        let schema_count = SERVER_DB_VERSIONED_SCHEMAS.len();
        if version >= schema_count {
            bail!(
                "Server database version {} is too new (max supported: {})",
                version,
                schema_count - 1
            );
        }

        SERVER_DB_VERSIONED_SCHEMAS
            .get(version)
            .context("Failed to get schema")?
            .validate(&conn)?;

        Self::migrate_if_needed(&conn, version)?;

        Ok(SqliteServerStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory store, used by tests and dry runs.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        SERVER_DB_VERSIONED_SCHEMAS
            .last()
            .context("No schemas defined")?
            .create(&conn)?;

        Ok(SqliteServerStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run any pending migrations.
    fn migrate_if_needed(conn: &Connection, current_version: usize) -> Result<()> {
        let target_version = SERVER_DB_VERSIONED_SCHEMAS.len() - 1;

        if current_version >= target_version {
            return Ok(());
        }

        info!(
            "Migrating server database from version {} to {}",
            current_version, target_version
        );

        for schema in SERVER_DB_VERSIONED_SCHEMAS.iter().skip(current_version + 1) {
            if let Some(migration_fn) = schema.migration {
                info!("Running server database migration to version {}", schema.version);
                migration_fn(conn)?;
            }
        }

        conn.execute(
            &format!("PRAGMA user_version = {}", BASE_DB_VERSION + target_version),
            [],
        )?;

        Ok(())
    }

    /// Helper to convert a database row to a ServerRecord.
    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<ServerRecord> {
        let operstate: String = row.get("operstate")?;
        // A value outside the enum means the row is corrupt; coercing it to
        // a valid state would let it take part in drift detection.
        let operstate = OperState::from_str(&operstate).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                format!("invalid operstate '{}'", operstate).into(),
            )
        })?;
        Ok(ServerRecord {
            id: row.get("id")?,
            backend_id: row.get("backend_id")?,
            operstate,
            deleted: row.get::<_, i64>("deleted")? != 0,
            last_job: row.get("last_job")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    /// Get current timestamp in seconds.
    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }
}

impl ServerStore for SqliteServerStore {
    fn list_active_servers(&self) -> Result<Vec<ServerRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM servers WHERE deleted = 0 ORDER BY id")?;

        let records = stmt
            .query_map([], Self::row_to_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(records)
    }

    fn get_server(&self, id: i64) -> Result<Option<ServerRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM servers WHERE id = ?1")?;

        let record = stmt.query_row([id], Self::row_to_record).optional()?;

        Ok(record)
    }

    fn insert_server(
        &self,
        id: i64,
        backend_id: &str,
        operstate: OperState,
    ) -> Result<ServerRecord> {
        let now = Self::now();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"INSERT INTO servers (id, backend_id, operstate, deleted, last_job, created_at, updated_at)
               VALUES (?1, ?2, ?3, 0, NULL, ?4, ?4)"#,
            rusqlite::params![id, backend_id, operstate.as_str(), now],
        )?;

        Ok(ServerRecord {
            id,
            backend_id: backend_id.to_string(),
            operstate,
            deleted: false,
            last_job: None,
            created_at: now,
            updated_at: now,
        })
    }

    fn apply_op_status(
        &self,
        id: i64,
        job: JobRef,
        opcode: Opcode,
        status: OpStatus,
        logmsg: &str,
    ) -> Result<ServerRecord> {
        let current = self
            .get_server(id)?
            .with_context(|| format!("No server record with id {}", id))?;

        let mut operstate = current.operstate;
        let mut deleted = current.deleted;

        match (opcode, status) {
            (Opcode::InstanceCreate, OpStatus::Success)
            | (Opcode::InstanceStartup, OpStatus::Success)
            | (Opcode::InstanceReboot, OpStatus::Success) => operstate = OperState::Started,
            (Opcode::InstanceShutdown, OpStatus::Success) => operstate = OperState::Stopped,
            (Opcode::InstanceRemove, OpStatus::Success) => {
                operstate = OperState::Destroyed;
                deleted = true;
            }
            (Opcode::InstanceCreate, OpStatus::Error) => operstate = OperState::Error,
            // In-flight and failed statuses of other operations do not
            // change the recorded power state.
            _ => {}
        }

        debug!(
            "Applying {} ({}) to server {}: {} -> {}",
            opcode.as_str(),
            status.as_str(),
            id,
            current.operstate.as_str(),
            operstate.as_str()
        );

        let now = Self::now();
        let job_ref = job.as_db_str();
        {
            let conn = self.conn.lock().unwrap();
            conn.execute(
                r#"UPDATE servers
                   SET operstate = ?1, deleted = ?2, last_job = ?3, updated_at = ?4
                   WHERE id = ?5"#,
                rusqlite::params![operstate.as_str(), deleted as i64, job_ref, now, id],
            )?;
        }

        if !logmsg.is_empty() {
            debug!("Server {} transition log: {}", id, logmsg);
        }

        Ok(ServerRecord {
            id,
            backend_id: current.backend_id,
            operstate,
            deleted,
            last_job: Some(job_ref),
            created_at: current.created_at,
            updated_at: now,
        })
    }
}
