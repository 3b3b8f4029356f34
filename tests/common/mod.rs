//! Common test infrastructure
//!
//! Fakes and fixtures shared by the end-to-end tests: an in-memory server
//! store seeded with records, a scriptable cluster backend and a recording
//! message exchange.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use gnt_sync::backend::{BackendError, GanetiBackend};
use gnt_sync::eventd::{EventExchange, PublishError};
use gnt_sync::models::{backend_id_of, BackendInstance, JobEvent, OperState};
use gnt_sync::server_store::{ServerStore, SqliteServerStore};

pub const PREFIX: &str = "snf-";

/// Seed an in-memory store with `(id, operstate)` pairs, deriving the
/// backend id from the prefix.
pub fn seeded_store(servers: &[(i64, OperState)]) -> Arc<SqliteServerStore> {
    let store = SqliteServerStore::in_memory().unwrap();
    for (id, operstate) in servers {
        store
            .insert_server(*id, &backend_id_of(PREFIX, *id), *operstate)
            .unwrap();
    }
    Arc::new(store)
}

/// Scriptable in-memory cluster backend.
///
/// Serves a fixed instance list and records every removal it is asked to
/// perform. Individual instances can be marked as failing deletion.
pub struct FakeBackend {
    instances: Mutex<Vec<BackendInstance>>,
    pub deleted: Mutex<Vec<String>>,
    failing_deletes: Mutex<BTreeSet<String>>,
    unavailable: Mutex<bool>,
}

impl FakeBackend {
    pub fn new(instances: &[(&str, bool)]) -> Arc<Self> {
        Arc::new(Self {
            instances: Mutex::new(
                instances
                    .iter()
                    .map(|(name, running)| BackendInstance {
                        name: name.to_string(),
                        running: *running,
                    })
                    .collect(),
            ),
            deleted: Mutex::new(Vec::new()),
            failing_deletes: Mutex::new(BTreeSet::new()),
            unavailable: Mutex::new(false),
        })
    }

    /// Make `delete_instance` fail for this instance name.
    pub fn fail_delete_of(&self, name: &str) {
        self.failing_deletes.lock().unwrap().insert(name.to_string());
    }

    /// Make every call fail as if the cluster master were down.
    pub fn set_unavailable(&self) {
        *self.unavailable.lock().unwrap() = true;
    }

    pub fn deleted_instances(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl GanetiBackend for FakeBackend {
    async fn list_instances(&self) -> Result<Vec<BackendInstance>, BackendError> {
        if *self.unavailable.lock().unwrap() {
            return Err(BackendError::Unavailable("connection refused".to_string()));
        }
        Ok(self.instances.lock().unwrap().clone())
    }

    async fn delete_instance(&self, name: &str) -> Result<u64, BackendError> {
        if *self.unavailable.lock().unwrap() {
            return Err(BackendError::Unavailable("connection refused".to_string()));
        }
        if self.failing_deletes.lock().unwrap().contains(name) {
            return Err(BackendError::Api { status: 500 });
        }
        let mut deleted = self.deleted.lock().unwrap();
        deleted.push(name.to_string());
        let job_id = 1000 + deleted.len() as u64;

        let mut instances = self.instances.lock().unwrap();
        instances.retain(|i| i.name != name);
        Ok(job_id)
    }

    async fn verify_connectivity(&self) -> Result<(), BackendError> {
        if *self.unavailable.lock().unwrap() {
            return Err(BackendError::Unavailable("connection refused".to_string()));
        }
        Ok(())
    }
}

/// Recording message exchange with an optional number of initial
/// connection failures.
pub struct FakeExchange {
    pub published: Mutex<Vec<(String, JobEvent)>>,
    connection_failures: Mutex<usize>,
}

impl FakeExchange {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            published: Mutex::new(Vec::new()),
            connection_failures: Mutex::new(0),
        })
    }

    pub fn failing_first(failures: usize) -> Arc<Self> {
        Arc::new(Self {
            published: Mutex::new(Vec::new()),
            connection_failures: Mutex::new(failures),
        })
    }

    pub fn published_events(&self) -> Vec<(String, JobEvent)> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventExchange for FakeExchange {
    async fn publish(&self, routing_key: &str, event: &JobEvent) -> Result<(), PublishError> {
        let mut failures = self.connection_failures.lock().unwrap();
        if *failures > 0 {
            *failures -= 1;
            return Err(PublishError::Connection("broker down".to_string()));
        }
        self.published
            .lock()
            .unwrap()
            .push((routing_key.to_string(), event.clone()));
        Ok(())
    }
}
