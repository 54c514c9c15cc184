//! Access to the cluster management API.
//!
//! The collector only depends on the [`ClusterApi`] trait; [`HttpApi`] is the
//! production implementation speaking the `/api2/json` HTTP interface with
//! blocking, strictly sequential requests.

use log::debug;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

use crate::types::{MachineKind, SampleRow};

/// Flat key/value machine configuration as returned by the config endpoint.
/// Values are kept as raw JSON since the platform mixes strings and numbers.
pub type MachineConfig = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("API returned {status} for {path}")]
    Status {
        status: reqwest::StatusCode,
        path: String,
    },
    #[error("authentication failed for user '{username}'")]
    Auth { username: String },
}

/// One machine as returned by the cluster-wide inventory listing.
#[derive(Debug, Clone, Deserialize)]
pub struct InventoryItem {
    pub vmid: u32,
    #[serde(default)]
    pub name: Option<String>,
    pub node: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// Absent when the hosting node is down.
    #[serde(default)]
    pub status: Option<String>,
}

impl InventoryItem {
    /// Display name, falling back to the machine id for unnamed machines.
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("vm{}", self.vmid))
    }
}

/// Read-only view of the cluster needed by the collector.
pub trait ClusterApi {
    /// List all virtual machines cluster-wide.
    fn list_machines(&self) -> Result<Vec<InventoryItem>, ApiError>;

    /// Fetch one machine's configuration (UUID and attached volumes).
    fn machine_config(
        &self,
        node: &str,
        kind: MachineKind,
        vmid: u32,
    ) -> Result<MachineConfig, ApiError>;

    /// Fetch one machine's time-series rows for a timeframe and
    /// consolidation function.
    fn sample_rows(
        &self,
        node: &str,
        kind: MachineKind,
        vmid: u32,
        timeframe: &str,
        cf: &str,
    ) -> Result<Vec<SampleRow>, ApiError>;
}

/// Every response body wraps the payload in a `data` member.
#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Deserialize)]
struct TicketResponse {
    ticket: String,
}

/// Blocking HTTP client for the management API, authenticated with a session
/// ticket obtained at construction time.
pub struct HttpApi {
    client: reqwest::blocking::Client,
    base_url: String,
    ticket: String,
}

impl HttpApi {
    /// Authenticate against `host` (optionally `host:port`, default port
    /// 8006) and return a ready-to-use client. A username without a realm
    /// gets `@pam` appended.
    pub fn connect(
        host: &str,
        username: &str,
        password: &str,
        insecure: bool,
    ) -> Result<Self, ApiError> {
        let authority = if host.contains(':') {
            host.to_string()
        } else {
            format!("{}:8006", host)
        };
        let base_url = format!("https://{}/api2/json", authority);
        let username = if username.contains('@') {
            username.to_string()
        } else {
            format!("{}@pam", username)
        };

        let client = reqwest::blocking::Client::builder()
            .danger_accept_invalid_certs(insecure)
            .build()?;

        debug!("Requesting auth ticket from {}/access/ticket", base_url);
        let response = client
            .post(format!("{}/access/ticket", base_url))
            .form(&[("username", username.as_str()), ("password", password)])
            .send()?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ApiError::Auth { username });
        }
        if !response.status().is_success() {
            return Err(ApiError::Status {
                status: response.status(),
                path: "/access/ticket".to_string(),
            });
        }

        let body: Envelope<TicketResponse> = response.json()?;
        Ok(HttpApi {
            client,
            base_url,
            ticket: body.data.ticket,
        })
    }

    fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        debug!("GET {}", path);
        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .header(
                reqwest::header::COOKIE,
                format!("PVEAuthCookie={}", self.ticket),
            )
            .send()?;

        if !response.status().is_success() {
            return Err(ApiError::Status {
                status: response.status(),
                path: path.to_string(),
            });
        }

        let body: Envelope<T> = response.json()?;
        Ok(body.data)
    }
}

impl ClusterApi for HttpApi {
    fn list_machines(&self) -> Result<Vec<InventoryItem>, ApiError> {
        self.get("/cluster/resources?type=vm")
    }

    fn machine_config(
        &self,
        node: &str,
        kind: MachineKind,
        vmid: u32,
    ) -> Result<MachineConfig, ApiError> {
        self.get(&format!(
            "/nodes/{}/{}/{}/config",
            node,
            kind.path_segment(),
            vmid
        ))
    }

    fn sample_rows(
        &self,
        node: &str,
        kind: MachineKind,
        vmid: u32,
        timeframe: &str,
        cf: &str,
    ) -> Result<Vec<SampleRow>, ApiError> {
        self.get(&format!(
            "/nodes/{}/{}/{}/rrddata?timeframe={}&cf={}",
            node,
            kind.path_segment(),
            vmid,
            timeframe,
            cf
        ))
    }
}
