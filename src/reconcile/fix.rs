//! Repair executors.
//!
//! One idempotent corrective action per drift category. DB repairs are
//! synthetic events fed through the shared state-transition entry point so
//! mutation logic has a single implementation; the orphan repair is the
//! only path that touches the backend, and the unsynced repair never does.

use std::collections::BTreeSet;

use anyhow::Result;
use tracing::{info, warn};

use crate::backend::GanetiBackend;
use crate::models::{JobRef, Opcode, OpStatus};
use crate::server_store::ServerStore;

/// Log line recorded with every synthetic reconciliation event.
const SYNTHETIC_LOGMSG: &str = "Reconciliation: simulated backend event";

/// Tombstone stale records by simulating the remove event the backend
/// would have emitted. Returns the number of records repaired.
pub fn fix_stale(store: &dyn ServerStore, stale: &BTreeSet<i64>) -> Result<usize> {
    for id in stale {
        store.apply_op_status(
            *id,
            JobRef::Synthetic,
            Opcode::InstanceRemove,
            OpStatus::Success,
            SYNTHETIC_LOGMSG,
        )?;
    }
    Ok(stale.len())
}

/// Issue a removal to the backend for every orphan.
///
/// A failed delete is logged and skipped: the orphan recurs on the next
/// sweep, which is the retry mechanism. Returns `(repaired, failed)`.
pub async fn fix_orphans(
    backend: &dyn GanetiBackend,
    orphans: &BTreeSet<String>,
) -> (usize, usize) {
    let mut fixed = 0;
    let mut failed = 0;
    for name in orphans {
        match backend.delete_instance(name).await {
            Ok(job_id) => {
                info!("Removal of orphan instance {} submitted as job {}", name, job_id);
                fixed += 1;
            }
            Err(e) => {
                warn!(
                    "Failed to remove orphan instance {}: {} (will recur on next sweep)",
                    name, e
                );
                failed += 1;
            }
        }
    }
    (fixed, failed)
}

/// Force DB power state to match the backend by simulating the operation
/// that would have produced the backend's state. Returns the number of
/// records repaired.
pub fn fix_unsynced(store: &dyn ServerStore, unsynced: &[(i64, bool, bool)]) -> Result<usize> {
    for (id, _db_up, backend_up) in unsynced {
        let opcode = if *backend_up {
            Opcode::InstanceReboot
        } else {
            Opcode::InstanceShutdown
        };
        store.apply_op_status(
            *id,
            JobRef::Synthetic,
            opcode,
            OpStatus::Success,
            SYNTHETIC_LOGMSG,
        )?;
    }
    Ok(unsynced.len())
}
