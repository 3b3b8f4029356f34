//! HTTP client for the Ganeti Remote API.

use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use tracing::debug;

use super::{BackendError, GanetiBackend};
use crate::models::BackendInstance;
use async_trait::async_trait;

/// Client for the Ganeti Remote API (RAPI).
///
/// Talks to the cluster master over HTTPS with basic auth. Every request
/// carries a bounded timeout; a hung master surfaces as
/// [`BackendError::Unavailable`] instead of blocking a sweep forever.
#[derive(Clone)]
pub struct RapiClient {
    client: Client,
    base_url: String,
    username: String,
    password: String,
}

/// Instance fields of interest from a bulk instance listing.
#[derive(Debug, Deserialize)]
struct RapiInstance {
    name: String,
    oper_state: bool,
}

impl RapiClient {
    /// Create a new RapiClient.
    ///
    /// # Arguments
    /// * `base_url` - RAPI endpoint (e.g., "https://master.example.org:5080")
    /// * `username`, `password` - RAPI credentials
    /// * `timeout_secs` - Per-request timeout in seconds
    pub fn new(
        base_url: String,
        username: String,
        password: String,
        timeout_secs: u64,
    ) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            username,
            password,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get(&self, path: &str) -> Result<Response, BackendError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await
            .map_err(map_transport_error)?;
        check_status(response)
    }
}

/// Map a reqwest transport failure onto the backend error model.
fn map_transport_error(e: reqwest::Error) -> BackendError {
    BackendError::Unavailable(e.to_string())
}

/// Reject non-success responses, distinguishing auth failures.
fn check_status(response: Response) -> Result<Response, BackendError> {
    match response.status() {
        status if status.is_success() => Ok(response),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(BackendError::Auth),
        status => Err(BackendError::Api {
            status: status.as_u16(),
        }),
    }
}

#[async_trait]
impl GanetiBackend for RapiClient {
    async fn list_instances(&self) -> Result<Vec<BackendInstance>, BackendError> {
        let response = self.get("/2/instances?bulk=1").await?;

        let instances: Vec<RapiInstance> = response
            .json()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))?;

        debug!("Backend reports {} instances", instances.len());

        Ok(instances
            .into_iter()
            .map(|i| BackendInstance {
                name: i.name,
                running: i.oper_state,
            })
            .collect())
    }

    async fn delete_instance(&self, name: &str) -> Result<u64, BackendError> {
        let url = format!("{}/2/instances/{}", self.base_url, name);
        let response = self
            .client
            .delete(&url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await
            .map_err(map_transport_error)?;
        let response = check_status(response)?;

        // RAPI answers with the job id tracking the removal.
        response
            .json::<u64>()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))
    }

    async fn verify_connectivity(&self) -> Result<(), BackendError> {
        self.get("/2/info").await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_client() {
        let client = RapiClient::new(
            "https://10.0.0.1:5080".to_string(),
            "rapi".to_string(),
            "secret".to_string(),
            30,
        );
        assert!(client.is_ok());
        assert_eq!(client.unwrap().base_url(), "https://10.0.0.1:5080");
    }

    #[test]
    fn test_bulk_instance_decoding() {
        let body = r#"[
            {"name": "snf-1", "oper_state": true, "status": "running"},
            {"name": "snf-2", "oper_state": false, "status": "ADMIN_down"}
        ]"#;
        let instances: Vec<RapiInstance> = serde_json::from_str(body).unwrap();
        assert_eq!(instances.len(), 2);
        assert_eq!(instances[0].name, "snf-1");
        assert!(instances[0].oper_state);
        assert!(!instances[1].oper_state);
    }
}
