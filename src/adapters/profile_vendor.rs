//! Profile vendor (SM-DP+) adapter.
//!
//! Releasing a profile turns an imported resource into something a device can
//! download: the vendor confirms the order for the ICCID and hands back a
//! matching id. The activation code is then derived locally from the vendor's
//! download host and that matching id.

use crate::config::settings::ProfileVendorConfig;
use crate::entities::sim_resource;
use crate::errors::{Error, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

const DOWNLOAD_ORDER_PATH: &str = "/gsma/rsp2/es2plus/downloadOrder";
const CONFIRM_ORDER_PATH: &str = "/gsma/rsp2/es2plus/confirmOrder";
const ADMIN_PROTOCOL: &str = "gsma/rsp/v2.0.0";
const EXECUTED_SUCCESS: &str = "Executed-Success";

/// Outcome of a successful release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileRelease {
    /// Token correlating the released profile with its activation code
    pub matching_id: String,
    /// Chip identity, when the vendor reports one
    pub eid: Option<String>,
}

/// Capability every profile vendor integration provides.
#[async_trait]
pub trait ProfileVendorAdapter: Send + Sync {
    /// Name of the vendor this adapter talks to
    fn name(&self) -> &str;

    /// Host devices download profiles from
    fn activation_host(&self) -> &str;

    /// Asks the vendor to finalize and unlock the profile bound to the
    /// resource's ICCID.
    async fn release(&self, resource: &sim_resource::Model) -> Result<ProfileRelease>;

    /// `LPA:{host}:{matching_id}` once the profile is released.
    fn activation_code(&self, resource: &sim_resource::Model) -> Option<String> {
        resource.activation_code(self.activation_host())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RequestHeader {
    function_requester_identifier: String,
    function_call_identifier: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponseHeader {
    function_execution_status: FunctionExecutionStatus,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FunctionExecutionStatus {
    status: String,
    #[serde(default)]
    status_code_data: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DownloadOrderRequest<'a> {
    header: RequestHeader,
    eid: Option<&'a str>,
    iccid: &'a str,
    profile_type: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DownloadOrderResponse {
    header: ResponseHeader,
    iccid: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConfirmOrderRequest<'a> {
    header: RequestHeader,
    iccid: &'a str,
    eid: Option<&'a str>,
    matching_id: Option<&'a str>,
    confirmation_code: Option<&'a str>,
    smds_address: Option<&'a str>,
    release_flag: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfirmOrderResponse {
    header: ResponseHeader,
    eid: Option<String>,
    matching_id: Option<String>,
}

/// Vendor reached over an ES2+ style JSON interface.
///
/// A release is a `downloadOrder` for the ICCID followed by a `confirmOrder`
/// with `releaseFlag = true`.
#[derive(Debug)]
pub struct Es2PlusAdapter {
    name: String,
    endpoint: String,
    activation_host: String,
    requester_id: String,
    http: Client,
    call_counter: AtomicU64,
}

impl Es2PlusAdapter {
    /// Builds an adapter with the configured client-side timeout.
    pub fn new(config: &ProfileVendorConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Config {
                message: format!(
                    "Failed to create HTTP client for profile vendor {}: {e}",
                    config.name
                ),
            })?;

        Ok(Self {
            name: config.name.clone(),
            endpoint: config.es2plus_endpoint.trim_end_matches('/').to_string(),
            activation_host: config.activation_host.clone(),
            requester_id: config.requester_id.clone(),
            http,
            call_counter: AtomicU64::new(0),
        })
    }

    fn header(&self) -> RequestHeader {
        let sequence = self.call_counter.fetch_add(1, Ordering::Relaxed);
        RequestHeader {
            function_requester_identifier: self.requester_id.clone(),
            function_call_identifier: format!(
                "{}-{}",
                chrono::Utc::now().timestamp_millis(),
                sequence
            ),
        }
    }

    async fn post<B, R>(&self, operation: &str, path: &str, iccid: &str, body: &B) -> Result<R>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let response = self
            .http
            .post(format!("{}{path}", self.endpoint))
            .header("X-Admin-Protocol", ADMIN_PROTOCOL)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                error!(
                    vendor = %self.name,
                    iccid, operation, error = %e, timeout = e.is_timeout(),
                    "Profile vendor request failed"
                );
                Error::adapter(
                    &self.name,
                    format!("{operation} for ICCID {iccid} failed: {e}"),
                )
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!(
                vendor = %self.name,
                iccid, operation, status = status.as_u16(), "Profile vendor rejected request"
            );
            return Err(Error::adapter(
                &self.name,
                format!(
                    "{operation} for ICCID {iccid} failed (status-code: {})",
                    status.as_u16()
                ),
            ));
        }

        response.json::<R>().await.map_err(|e| {
            Error::adapter(
                &self.name,
                format!("{operation} for ICCID {iccid} returned an unreadable body: {e}"),
            )
        })
    }

    fn check_executed(
        &self,
        operation: &str,
        iccid: &str,
        header: &ResponseHeader,
    ) -> Result<()> {
        let status = &header.function_execution_status;
        if status.status == EXECUTED_SUCCESS {
            return Ok(());
        }
        warn!(
            vendor = %self.name,
            iccid, operation, status = %status.status, data = ?status.status_code_data,
            "Profile vendor did not execute request"
        );
        Err(Error::adapter(
            &self.name,
            format!(
                "{operation} for ICCID {iccid} was not executed (status: {})",
                status.status
            ),
        ))
    }
}

#[async_trait]
impl ProfileVendorAdapter for Es2PlusAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn activation_host(&self) -> &str {
        &self.activation_host
    }

    #[instrument(skip(self, resource), fields(vendor = %self.name, iccid = %resource.iccid))]
    async fn release(&self, resource: &sim_resource::Model) -> Result<ProfileRelease> {
        let iccid = resource.iccid.as_str();

        let order: DownloadOrderResponse = self
            .post(
                "downloadOrder",
                DOWNLOAD_ORDER_PATH,
                iccid,
                &DownloadOrderRequest {
                    header: self.header(),
                    eid: resource.eid.as_deref(),
                    iccid,
                    profile_type: &resource.profile_type,
                },
            )
            .await?;
        self.check_executed("downloadOrder", iccid, &order.header)?;
        if order.iccid.as_deref().is_some_and(|ordered| ordered != iccid) {
            return Err(Error::adapter(
                &self.name,
                format!("downloadOrder for ICCID {iccid} answered for a different ICCID"),
            ));
        }
        debug!("Download order accepted");

        let confirmed: ConfirmOrderResponse = self
            .post(
                "confirmOrder",
                CONFIRM_ORDER_PATH,
                iccid,
                &ConfirmOrderRequest {
                    header: self.header(),
                    iccid,
                    eid: resource.eid.as_deref(),
                    matching_id: None,
                    confirmation_code: None,
                    smds_address: None,
                    release_flag: true,
                },
            )
            .await?;
        self.check_executed("confirmOrder", iccid, &confirmed.header)?;

        let matching_id = confirmed
            .matching_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                Error::adapter(
                    &self.name,
                    format!("confirmOrder for ICCID {iccid} returned no matching id"),
                )
            })?;

        info!(matching_id = %matching_id, "Profile released");
        Ok(ProfileRelease {
            matching_id,
            eid: confirmed.eid.filter(|eid| !eid.is_empty()),
        })
    }
}
