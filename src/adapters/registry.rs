//! Subscriber registry (HSS) adapter.
//!
//! The registry must be told when a SIM goes live and when it is suspended.
//! Neither call is assumed idempotent on the registry's side, so the adapter
//! makes exactly one request per call.

use crate::config::settings::RegistryConfig;
use crate::errors::{Error, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

/// Capability every registry integration provides.
#[async_trait]
pub trait RegistryAdapter: Send + Sync {
    /// Name of the registry this adapter talks to
    fn name(&self) -> &str;

    /// Tells the registry to treat the SIM as live.
    async fn activate(&self, iccid: &str, msisdn: &str) -> Result<()>;

    /// Tells the registry to stop serving the SIM.
    async fn suspend(&self, iccid: &str) -> Result<()>;

    /// Liveness probe for an external supervisor.
    async fn health_check(&self) -> bool;
}

#[derive(Debug, Serialize)]
struct ActivationRequest<'a> {
    bssid: &'a str,
    iccid: &'a str,
    msisdn: &'a str,
    userid: &'a str,
}

/// Registry reached over HTTP with an `x-api-key` header.
///
/// - activate: `POST {endpoint}/activate`, expects `201 Created`
/// - suspend: `DELETE {endpoint}/deactivate/{iccid}`, expects `200 OK`
#[derive(Debug, Clone)]
pub struct HttpRegistryAdapter {
    name: String,
    endpoint: String,
    api_key: String,
    user_id: String,
    http: Client,
}

impl HttpRegistryAdapter {
    /// Builds an adapter with the configured client-side timeout.
    pub fn new(config: &RegistryConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Config {
                message: format!("Failed to create HTTP client for registry {}: {e}", config.name),
            })?;

        Ok(Self {
            name: config.name.clone(),
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            user_id: config.user_id.clone(),
            http,
        })
    }

    fn expect_status(&self, operation: &str, iccid: &str, status: StatusCode, expected: StatusCode) -> Result<()> {
        if status == expected {
            info!(
                registry = %self.name,
                iccid, operation, "Registry request completed"
            );
            return Ok(());
        }
        warn!(
            registry = %self.name,
            iccid, operation, status = status.as_u16(), "Registry request failed"
        );
        Err(Error::adapter(
            &self.name,
            format!("Failed to {operation} ICCID {iccid} (status-code: {})", status.as_u16()),
        ))
    }

    fn transport_error(&self, operation: &str, iccid: &str, err: &reqwest::Error) -> Error {
        error!(
            registry = %self.name,
            iccid, operation, error = %err, timeout = err.is_timeout(), "Registry request failed"
        );
        Error::adapter(
            &self.name,
            format!("{operation} request for ICCID {iccid} failed: {err}"),
        )
    }
}

#[async_trait]
impl RegistryAdapter for HttpRegistryAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip(self), fields(registry = %self.name))]
    async fn activate(&self, iccid: &str, msisdn: &str) -> Result<()> {
        if iccid.is_empty() {
            return Err(Error::not_updated(format!(
                "Empty ICCID value in SIM activation request to registry {}",
                self.name
            )));
        }

        let body = ActivationRequest {
            bssid: &self.name,
            iccid,
            msisdn,
            userid: &self.user_id,
        };

        let response = self
            .http
            .post(format!("{}/activate", self.endpoint))
            .header("x-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error("activate", iccid, &e))?;

        self.expect_status("activate", iccid, response.status(), StatusCode::CREATED)
    }

    #[instrument(skip(self), fields(registry = %self.name))]
    async fn suspend(&self, iccid: &str) -> Result<()> {
        if iccid.is_empty() {
            return Err(Error::not_updated(format!(
                "Empty ICCID value in SIM deactivation request to registry {}",
                self.name
            )));
        }

        let response = self
            .http
            .delete(format!("{}/deactivate/{iccid}", self.endpoint))
            .header("x-api-key", &self.api_key)
            .send()
            .await
            .map_err(|e| self.transport_error("deactivate", iccid, &e))?;

        self.expect_status("deactivate", iccid, response.status(), StatusCode::OK)
    }

    async fn health_check(&self) -> bool {
        match self
            .http
            .get(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .send()
            .await
        {
            Ok(response) => !response.status().is_server_error(),
            Err(e) => {
                warn!(registry = %self.name, error = %e, "Registry health check failed");
                false
            }
        }
    }
}
