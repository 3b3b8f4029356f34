//! Ganeti backend access.
//!
//! The cluster backend is the ground truth for instance power state. All
//! access goes through the [`GanetiBackend`] trait so reconciliation logic
//! can be exercised against fakes.

mod rapi_client;

pub use rapi_client::RapiClient;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::BackendInstance;

/// Errors from the cluster backend.
///
/// `Unavailable` is the transient case a reconciliation sweep must abort
/// on: an unreachable backend must never be read as "backend has nothing".
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend unreachable: {0}")]
    Unavailable(String),

    #[error("backend authentication failed")]
    Auth,

    #[error("backend API error (status {status})")]
    Api { status: u16 },

    #[error("failed to decode backend response: {0}")]
    Decode(String),
}

impl BackendError {
    /// Returns true if the error is transient connectivity, not a
    /// definitive answer from the backend.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, BackendError::Unavailable(_))
    }
}

/// Trait for talking to a Ganeti-like cluster backend.
#[cfg_attr(feature = "mock", mockall::automock)]
#[async_trait]
pub trait GanetiBackend: Send + Sync {
    /// List all live instances with their power state.
    async fn list_instances(&self) -> Result<Vec<BackendInstance>, BackendError>;

    /// Submit an instance removal. Destructive and irreversible.
    ///
    /// Returns the backend job id tracking the removal.
    async fn delete_instance(&self, name: &str) -> Result<u64, BackendError>;

    /// Probe backend reachability and credentials without mutating anything.
    async fn verify_connectivity(&self) -> Result<(), BackendError>;
}
