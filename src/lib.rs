//! Synchronization tooling between a compute service's server database
//! and its Ganeti backend.
//!
//! Two entry points share this library: `gnt-reconcile`, a one-shot sweep
//! that detects and repairs drift between the database and the cluster,
//! and `gnt-eventd`, a daemon that turns Ganeti job-queue activity into
//! persistent messages on an exchange.

pub mod backend;
pub mod config;
pub mod eventd;
pub mod models;
pub mod reconcile;
pub mod server_store;
