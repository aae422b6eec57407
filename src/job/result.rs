use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use url::Url;

use crate::error::{ExecutorError, Result};
use crate::loader::LoadingContext;
use crate::types::JobId;

/// Acknowledgment of a detached submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSubmission {
    pub job_id: JobId,
    pub accepted_at: DateTime<Utc>,
}

/// Final result of a job that ran to completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobExecutionResult {
    pub job_id: JobId,
    pub net_runtime: Duration,
    /// Accumulator values, decoded through the user-code loading context.
    pub accumulators: BTreeMap<String, serde_json::Value>,
}

impl JobExecutionResult {
    pub fn accumulator(&self, name: &str) -> Option<&serde_json::Value> {
        self.accumulators.get(name)
    }
}

/// Outcome of [`SessionClusterExecutor::execute`](crate::SessionClusterExecutor::execute).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum JobResult {
    Detached(JobSubmission),
    Completed(JobExecutionResult),
}

impl JobResult {
    pub fn job_id(&self) -> &JobId {
        match self {
            JobResult::Detached(submission) => &submission.job_id,
            JobResult::Completed(result) => &result.job_id,
        }
    }

    pub fn is_detached(&self) -> bool {
        matches!(self, JobResult::Detached(_))
    }
}

/// A value serialized by user code on the cluster side.
///
/// `data` is base64-encoded JSON. `origin` names the library that produced
/// the value; it must be visible through the loading context to decode it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedValue {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<Url>,
    pub data: String,
}

impl SerializedValue {
    pub fn from_json(value: &serde_json::Value, origin: Option<Url>) -> Self {
        Self {
            origin,
            data: STANDARD.encode(value.to_string()),
        }
    }

    pub fn bytes(&self) -> Result<Vec<u8>> {
        STANDARD
            .decode(self.data.as_bytes())
            .map_err(|e| ExecutorError::Execution(format!("Malformed serialized value: {}", e)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApplicationStatus {
    Succeeded,
    Failed,
    Canceled,
    Unknown,
}

/// Job result as reported by the cluster, before user values are decoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteJobResult {
    pub job_id: JobId,
    pub application_status: ApplicationStatus,
    pub net_runtime_ms: u64,
    #[serde(default)]
    pub accumulators: BTreeMap<String, SerializedValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_cause: Option<String>,
}

impl RemoteJobResult {
    pub fn is_success(&self) -> bool {
        self.application_status == ApplicationStatus::Succeeded
    }

    /// Turn a remote result into the caller-facing one.
    ///
    /// Any status other than `SUCCEEDED` is an execution error carrying the
    /// remote failure cause.
    pub fn into_execution_result(
        self,
        context: &dyn LoadingContext,
    ) -> Result<JobExecutionResult> {
        if !self.is_success() {
            let cause = self
                .failure_cause
                .unwrap_or_else(|| "no failure cause reported".to_string());
            return Err(ExecutorError::Execution(format!(
                "Job {} finished with status {:?}: {}",
                self.job_id, self.application_status, cause
            )));
        }

        let mut accumulators = BTreeMap::new();
        for (name, value) in &self.accumulators {
            let decoded = context.decode(value).map_err(|e| {
                ExecutorError::Execution(format!("Accumulator `{}`: {}", name, e))
            })?;
            accumulators.insert(name.clone(), decoded);
        }

        Ok(JobExecutionResult {
            job_id: self.job_id,
            net_runtime: Duration::from_millis(self.net_runtime_ms),
            accumulators,
        })
    }
}
