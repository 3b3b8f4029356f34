//! Reconciliation engine.
//!
//! Compares the authoritative database against the live backend state,
//! detects three drift categories (stale records, orphan instances,
//! unsynced power state) and optionally repairs each. The sweep is a
//! single-threaded batch: both snapshots are read once, detectors run over
//! the static pair, repairs apply sequentially. No cross-run atomicity is
//! assumed; convergence comes from repeated sweeps.

mod detect;
mod fix;
mod snapshot;

pub use detect::{orphan_instances_in_backend, stale_servers_in_db, unsynced_operstate};
pub use snapshot::{snapshot_backend, snapshot_db, BackendSnapshot, DbSnapshot};

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::info;

use crate::backend::GanetiBackend;
use crate::server_store::ServerStore;

/// Detect/fix switches for one reconciliation run.
///
/// Detection and repair are decoupled: fixing a category requires its
/// detection to have been requested in the same run.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReconcileOptions {
    pub detect_stale: bool,
    pub detect_orphans: bool,
    pub detect_unsynced: bool,
    pub fix_stale: bool,
    pub fix_orphans: bool,
    pub fix_unsynced: bool,
}

impl ReconcileOptions {
    /// Apply the `--detect-all` / `--fix-all` umbrella switches.
    pub fn with_umbrellas(mut self, detect_all: bool, fix_all: bool) -> Self {
        if detect_all {
            self.detect_stale = true;
            self.detect_orphans = true;
            self.detect_unsynced = true;
        }
        if fix_all {
            self.fix_stale = true;
            self.fix_orphans = true;
            self.fix_unsynced = true;
        }
        self
    }

    /// Reject inconsistent switch combinations before any I/O happens.
    pub fn validate(&self) -> Result<()> {
        if !(self.detect_stale || self.detect_orphans || self.detect_unsynced) {
            bail!("At least one of --detect-* must be specified");
        }
        for (fix, detect, name) in [
            (self.fix_stale, self.detect_stale, "stale"),
            (self.fix_orphans, self.detect_orphans, "orphans"),
            (self.fix_unsynced, self.detect_unsynced, "unsynced"),
        ] {
            if fix && !detect {
                bail!(
                    "Cannot use --fix-{name} without corresponding --detect-{name} argument"
                );
            }
        }
        Ok(())
    }
}

/// Outcome of one reconciliation sweep.
#[derive(Debug, Clone, Default)]
pub struct ReconcileReport {
    pub stale: BTreeSet<i64>,
    pub orphans: BTreeSet<String>,
    pub unsynced: Vec<(i64, bool, bool)>,
    pub fixed_stale: usize,
    pub fixed_orphans: usize,
    pub failed_orphans: usize,
    pub fixed_unsynced: usize,
}

impl ReconcileReport {
    /// True if no drift was detected in the requested categories.
    pub fn is_clean(&self) -> bool {
        self.stale.is_empty() && self.orphans.is_empty() && self.unsynced.is_empty()
    }
}

/// One-shot reconciliation sweep over a store/backend pair.
///
/// Constructed per run and discarded afterwards; holds no long-lived
/// state beyond its collaborators.
pub struct Reconciler {
    store: Arc<dyn ServerStore>,
    backend: Arc<dyn GanetiBackend>,
    backend_prefix: String,
    options: ReconcileOptions,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn ServerStore>,
        backend: Arc<dyn GanetiBackend>,
        backend_prefix: String,
        options: ReconcileOptions,
    ) -> Self {
        Self {
            store,
            backend,
            backend_prefix,
            options,
        }
    }

    /// Run one sweep: snapshot both sides, detect, then repair what was
    /// requested.
    ///
    /// Aborts without touching anything if the options are inconsistent or
    /// either snapshot cannot be taken (fail-closed: no partial repair
    /// against incomplete data).
    pub async fn run(&self) -> Result<ReconcileReport> {
        self.options.validate()?;

        let db = snapshot_db(self.store.as_ref()).context("Failed to snapshot server database")?;
        let backend = snapshot_backend(self.backend.as_ref())
            .await
            .context("Failed to snapshot backend instances, aborting sweep")?;

        info!(
            "Reconciling {} DB records against {} backend instances",
            db.len(),
            backend.len()
        );

        let mut report = ReconcileReport::default();

        if self.options.detect_stale {
            report.stale = stale_servers_in_db(&db, &backend);
        }
        if self.options.detect_orphans {
            report.orphans = orphan_instances_in_backend(&db, &backend, &self.backend_prefix);
        }
        if self.options.detect_unsynced {
            report.unsynced = unsynced_operstate(&db, &backend);
        }

        if self.options.fix_stale && !report.stale.is_empty() {
            info!(
                "Simulating successful backend removal for {} stale DB records",
                report.stale.len()
            );
            report.fixed_stale = fix::fix_stale(self.store.as_ref(), &report.stale)?;
        }

        if self.options.fix_orphans && !report.orphans.is_empty() {
            info!(
                "Issuing instance removal for {} orphan backend instances",
                report.orphans.len()
            );
            let (fixed, failed) = fix::fix_orphans(self.backend.as_ref(), &report.orphans).await;
            report.fixed_orphans = fixed;
            report.failed_orphans = failed;
        }

        if self.options.fix_unsynced && !report.unsynced.is_empty() {
            info!(
                "Setting the state of {} out-of-sync records from backend truth",
                report.unsynced.len()
            );
            report.fixed_unsynced = fix::fix_unsynced(self.store.as_ref(), &report.unsynced)?;
        }

        Ok(report)
    }
}
