//! System-of-record storage for server records.
//!
//! The store is the single authority on server state transitions: both
//! backend-derived events (consumed elsewhere) and synthetic reconciliation
//! events flow through [`ServerStore::apply_op_status`], so DB mutation
//! logic has exactly one implementation.

mod schema;
mod sqlite_store;

pub use schema::{BASE_DB_VERSION, SERVER_DB_VERSIONED_SCHEMAS};
pub use sqlite_store::SqliteServerStore;

use anyhow::Result;

use crate::models::{JobRef, Opcode, OpStatus, OperState, ServerRecord};

/// Trait for server record storage operations.
pub trait ServerStore: Send + Sync {
    /// List all records that are not tombstoned.
    fn list_active_servers(&self) -> Result<Vec<ServerRecord>>;

    /// Get a record by id, tombstoned or not.
    fn get_server(&self, id: i64) -> Result<Option<ServerRecord>>;

    /// Insert a new record. Fails if the id or backend_id already exists.
    fn insert_server(&self, id: i64, backend_id: &str, operstate: OperState)
        -> Result<ServerRecord>;

    /// Apply a job operation outcome to a record and return the updated row.
    ///
    /// This is the shared state-transition entry point. The transition table:
    /// - success CREATE/STARTUP/REBOOT -> STARTED
    /// - success SHUTDOWN -> STOPPED
    /// - success REMOVE -> DESTROYED, `deleted` set
    /// - error CREATE -> ERROR
    /// - anything else leaves `operstate` untouched
    ///
    /// Idempotent: re-applying the same event converges on the same row.
    fn apply_op_status(
        &self,
        id: i64,
        job: JobRef,
        opcode: Opcode,
        status: OpStatus,
        logmsg: &str,
    ) -> Result<ServerRecord>;
}
