//! State snapshot readers.
//!
//! Read-only collectors producing the two comparable snapshots a sweep
//! works on. Both are taken once per sweep; detectors run over the static
//! pair.

use std::collections::HashMap;

use anyhow::Result;

use crate::backend::{BackendError, GanetiBackend};
use crate::models::{BackendInstance, ServerRecord};
use crate::server_store::ServerStore;

/// Snapshot of the system of record: id -> record, non-tombstoned only.
pub type DbSnapshot = HashMap<i64, ServerRecord>;

/// Snapshot of the backend: instance name -> live instance.
pub type BackendSnapshot = HashMap<String, BackendInstance>;

/// Collect all non-deleted server records, keyed by id.
pub fn snapshot_db(store: &dyn ServerStore) -> Result<DbSnapshot> {
    let records = store.list_active_servers()?;
    Ok(records.into_iter().map(|r| (r.id, r)).collect())
}

/// Collect the live instance list, keyed by name.
///
/// An unavailable backend surfaces as an error; the caller must abort the
/// sweep rather than treat the failure as an empty cluster.
pub async fn snapshot_backend(backend: &dyn GanetiBackend) -> Result<BackendSnapshot, BackendError> {
    let instances = backend.list_instances().await?;
    Ok(instances.into_iter().map(|i| (i.name.clone(), i)).collect())
}
