//! Session backend for clusters exposing the HTTP submission API.
//!
//! Endpoints used:
//! - `GET  /overview`: liveness probe when retrieving a client
//! - `POST /jobs`: submit a job description, answers `{"job_id": ...}`
//! - `GET  /jobs/{id}/execution-result`: polled until `COMPLETED`

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use super::{ClusterClient, ClusterClientFactory, ClusterDescriptor};
use crate::config::{Configuration, options};
use crate::error::{ExecutorError, Result};
use crate::job::{JobDescription, RemoteJobResult};
use crate::types::JobId;

pub const TARGET_NAME: &str = "remote";

const DEFAULT_PORT: u16 = 8081;
const DEFAULT_TIMEOUT_MS: i64 = 60_000;
const DEFAULT_POLL_INTERVAL_MS: i64 = 200;

/// Address of the cluster's REST endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RestClusterId {
    pub address: String,
    pub port: u16,
}

impl RestClusterId {
    /// Root URL of the endpoint. IPv6 literals are accepted with or without
    /// brackets.
    pub fn base_url(&self) -> std::result::Result<Url, String> {
        let mut url = Url::parse("http://localhost/").map_err(|e| e.to_string())?;
        let host = self.address.trim_start_matches('[').trim_end_matches(']');
        match host.parse::<IpAddr>() {
            Ok(ip) => url
                .set_ip_host(ip)
                .map_err(|_| format!("cannot use {} as host", ip))?,
            Err(_) => url.set_host(Some(host)).map_err(|e| e.to_string())?,
        }
        url.set_port(Some(self.port))
            .map_err(|_| format!("cannot use port {}", self.port))?;
        Ok(url)
    }
}

impl fmt::Display for RestClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.address.contains(':') && !self.address.starts_with('[') {
            write!(f, "[{}]:{}", self.address, self.port)
        } else {
            write!(f, "{}:{}", self.address, self.port)
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterOverview {
    #[serde(default)]
    pub workers: u32,
    #[serde(default)]
    pub slots_total: u32,
    #[serde(default)]
    pub slots_available: u32,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub job_id: JobId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueState {
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStatus {
    pub id: QueueState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResultResponse {
    pub status: QueueStatus,
    #[serde(
        default,
        rename = "job-execution-result",
        skip_serializing_if = "Option::is_none"
    )]
    pub job_execution_result: Option<RemoteJobResult>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RestClusterClientFactory;

impl RestClusterClientFactory {
    pub fn new() -> Self {
        Self
    }
}

fn millis(configuration: &Configuration, key: &str, default: i64) -> Result<Duration> {
    let value = configuration.get_integer(key)?.unwrap_or(default);
    if value <= 0 {
        return Err(ExecutorError::precondition(format!(
            "`{}` must be a positive number of milliseconds, got {}",
            key, value
        )));
    }
    Ok(Duration::from_millis(value as u64))
}

#[async_trait]
impl ClusterClientFactory for RestClusterClientFactory {
    type ClusterId = RestClusterId;

    fn name(&self) -> &str {
        TARGET_NAME
    }

    fn is_compatible_with(&self, configuration: &Configuration) -> Result<bool> {
        Ok(configuration
            .get_string(options::TARGET)?
            .is_some_and(|target| target.trim().eq_ignore_ascii_case(TARGET_NAME)))
    }

    fn get_cluster_id(&self, configuration: &Configuration) -> Result<Option<RestClusterId>> {
        let Some(address) = configuration
            .get_string(options::REST_ADDRESS)?
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
        else {
            return Ok(None);
        };

        let port = match configuration.get_integer(options::REST_PORT)? {
            None => DEFAULT_PORT,
            Some(p) => u16::try_from(p).ok().filter(|p| *p != 0).ok_or_else(|| {
                ExecutorError::precondition(format!(
                    "`{}` must be between 1 and 65535, got {}",
                    options::REST_PORT,
                    p
                ))
            })?,
        };

        Ok(Some(RestClusterId { address, port }))
    }

    async fn create_cluster_descriptor(
        &self,
        configuration: &Configuration,
    ) -> Result<Box<dyn ClusterDescriptor<RestClusterId>>> {
        let timeout = millis(configuration, options::CLIENT_TIMEOUT, DEFAULT_TIMEOUT_MS)?;
        let poll_interval = millis(
            configuration,
            options::REST_RESULT_POLL_INTERVAL,
            DEFAULT_POLL_INTERVAL_MS,
        )?;

        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("session-executor/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                ExecutorError::precondition(format!("Could not build HTTP client: {}", e))
            })?;

        Ok(Box::new(RestClusterDescriptor {
            http,
            poll_interval,
        }))
    }
}

pub struct RestClusterDescriptor {
    http: Client,
    poll_interval: Duration,
}

#[async_trait]
impl ClusterDescriptor<RestClusterId> for RestClusterDescriptor {
    fn description(&self) -> String {
        "REST cluster descriptor".to_string()
    }

    async fn retrieve(&self, cluster_id: &RestClusterId) -> Result<Box<dyn ClusterClient>> {
        let base = cluster_id
            .base_url()
            .map_err(|reason| ExecutorError::unreachable(cluster_id, reason))?;
        let overview_url = base
            .join("overview")
            .map_err(|e| ExecutorError::unreachable(cluster_id, e.to_string()))?;

        let response = self
            .http
            .get(overview_url)
            .send()
            .await
            .map_err(|e| ExecutorError::unreachable(cluster_id, e.to_string()))?;

        if !response.status().is_success() {
            return Err(ExecutorError::unreachable(
                cluster_id,
                format!("overview returned {}", response.status()),
            ));
        }

        let overview: ClusterOverview = response.json().await.map_err(|e| {
            ExecutorError::unreachable(cluster_id, format!("unexpected overview response: {}", e))
        })?;

        info!(
            "Connected to cluster {} (version {}, {} workers, {}/{} slots available)",
            cluster_id,
            overview.version.as_deref().unwrap_or("unknown"),
            overview.workers,
            overview.slots_available,
            overview.slots_total
        );

        Ok(Box::new(RestClusterClient {
            http: self.http.clone(),
            base,
            cluster: cluster_id.to_string(),
            poll_interval: self.poll_interval,
        }))
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        debug!("Closing REST cluster descriptor");
        Ok(())
    }
}

pub struct RestClusterClient {
    http: Client,
    base: Url,
    cluster: String,
    poll_interval: Duration,
}

impl RestClusterClient {
    fn endpoint(&self, path: &str) -> anyhow::Result<Url> {
        Ok(self.base.join(path)?)
    }
}

#[async_trait]
impl ClusterClient for RestClusterClient {
    fn cluster(&self) -> String {
        self.cluster.clone()
    }

    async fn submit_job(&self, job: &JobDescription) -> Result<JobId> {
        let url = self.endpoint("jobs")?;
        let response = self
            .http
            .post(url)
            .json(job)
            .send()
            .await
            .map_err(|e| {
                ExecutorError::Submission(format!("Could not submit {}: {}", job.job_id, e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExecutorError::Submission(format!(
                "Cluster {} rejected job {}: {} {}",
                self.cluster, job.job_id, status, body
            )));
        }

        let submitted: SubmitResponse = response.json().await.map_err(|e| {
            ExecutorError::Submission(format!("Unexpected submit response: {}", e))
        })?;
        Ok(submitted.job_id)
    }

    async fn request_job_result(&self, job_id: &JobId) -> Result<RemoteJobResult> {
        let url = self
            .endpoint(&format!("jobs/{}/execution-result", job_id))
            .map_err(|e| ExecutorError::Execution(e.to_string()))?;

        loop {
            let response = self.http.get(url.clone()).send().await.map_err(|e| {
                ExecutorError::Execution(format!("Could not fetch result of {}: {}", job_id, e))
            })?;

            let status = response.status();
            if !status.is_success() {
                return Err(ExecutorError::Execution(format!(
                    "Result request for job {} returned {}",
                    job_id, status
                )));
            }

            let polled: JobResultResponse = response.json().await.map_err(|e| {
                ExecutorError::Execution(format!("Unexpected result response: {}", e))
            })?;

            match polled.status.id {
                QueueState::Completed => {
                    return polled.job_execution_result.ok_or_else(|| {
                        ExecutorError::Execution(format!(
                            "Job {} completed without a result",
                            job_id
                        ))
                    });
                }
                QueueState::InProgress => {
                    debug!("Job {} still running", job_id);
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        debug!("Closing REST client for {}", self.cluster);
        Ok(())
    }
}
