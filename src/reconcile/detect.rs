//! Drift detectors.
//!
//! Pure, deterministic functions over the two snapshots. No I/O happens
//! here, which keeps the reconciliation rules unit-testable without a
//! database or a cluster.

use std::collections::BTreeSet;

use super::snapshot::{BackendSnapshot, DbSnapshot};

/// Server ids present in the DB whose backend instance is gone.
pub fn stale_servers_in_db(db: &DbSnapshot, backend: &BackendSnapshot) -> BTreeSet<i64> {
    db.values()
        .filter(|record| !backend.contains_key(&record.backend_id))
        .map(|record| record.id)
        .collect()
}

/// Backend instance names that follow our naming convention but have no
/// DB record.
///
/// Only names of the form `<prefix><numeric id>` are candidates: instances
/// created outside the platform must never be reported, since the orphan
/// repair is destructive.
pub fn orphan_instances_in_backend(
    db: &DbSnapshot,
    backend: &BackendSnapshot,
    prefix: &str,
) -> BTreeSet<String> {
    let known: BTreeSet<&str> = db.values().map(|r| r.backend_id.as_str()).collect();

    backend
        .keys()
        .filter(|name| {
            // u64: a remainder like "-25" must not pass as numeric.
            name.strip_prefix(prefix)
                .map(|rest| rest.parse::<u64>().is_ok())
                .unwrap_or(false)
        })
        .filter(|name| !known.contains(name.as_str()))
        .cloned()
        .collect()
}

/// Records present on both sides whose settled power state disagrees.
///
/// Returns `(id, db_up, backend_up)` triples sorted by id. Records in a
/// transitional state (BUILD and friends) are excluded so a sweep cannot
/// race an operation in progress.
pub fn unsynced_operstate(db: &DbSnapshot, backend: &BackendSnapshot) -> Vec<(i64, bool, bool)> {
    let mut unsynced: Vec<(i64, bool, bool)> = db
        .values()
        .filter(|record| record.operstate.is_settled())
        .filter_map(|record| {
            backend.get(&record.backend_id).and_then(|instance| {
                let db_up = record.operstate.is_up();
                (db_up != instance.running).then_some((record.id, db_up, instance.running))
            })
        })
        .collect();
    unsynced.sort_unstable();
    unsynced
}
