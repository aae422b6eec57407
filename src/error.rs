//! Error types for job submission.
//!
//! Every failure of [`SessionClusterExecutor::execute`](crate::SessionClusterExecutor::execute)
//! surfaces as exactly one of these kinds. Nothing at this layer retries.

use std::fmt;

/// Errors that can occur while turning a pipeline into a running job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutorError {
    /// A required input is missing or malformed (caller bug, not retried).
    Precondition(String),

    /// An archive could not be read or a nested library could not be extracted.
    ///
    /// Raised before any cluster is contacted.
    ResourceExtraction(String),

    /// The configuration does not name a concrete cluster to target.
    MissingClusterIdentifier {
        /// Backend that was asked for the identifier
        backend: String,
    },

    /// The cluster identifier does not resolve to a live cluster.
    ClusterUnreachable {
        /// Display form of the cluster identifier
        cluster: String,
        /// Why the cluster could not be reached
        reason: String,
    },

    /// The backend rejected the job or the submit call failed.
    Submission(String),

    /// The job failed during remote execution (blocking mode only).
    Execution(String),
}

impl fmt::Display for ExecutorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Precondition(msg) => write!(f, "Precondition failed: {}", msg),
            Self::ResourceExtraction(msg) => write!(f, "Could not extract resources: {}", msg),
            Self::MissingClusterIdentifier { backend } => write!(
                f,
                "Backend `{}` could not derive a cluster identifier from the configuration",
                backend
            ),
            Self::ClusterUnreachable { cluster, reason } => {
                write!(f, "Cluster {} is unreachable: {}", cluster, reason)
            }
            Self::Submission(msg) => write!(f, "Job submission failed: {}", msg),
            Self::Execution(msg) => write!(f, "Job execution failed: {}", msg),
        }
    }
}

impl std::error::Error for ExecutorError {}

/// Result type for submission operations.
pub type Result<T> = std::result::Result<T, ExecutorError>;

impl From<anyhow::Error> for ExecutorError {
    fn from(err: anyhow::Error) -> Self {
        Self::Submission(format!("{:#}", err))
    }
}

impl ExecutorError {
    /// Create a precondition error.
    pub fn precondition(message: impl Into<String>) -> Self {
        Self::Precondition(message.into())
    }

    /// Create a resource extraction error.
    pub fn extraction(message: impl Into<String>) -> Self {
        Self::ResourceExtraction(message.into())
    }

    /// Create a cluster unreachable error.
    pub fn unreachable(cluster: impl fmt::Display, reason: impl Into<String>) -> Self {
        Self::ClusterUnreachable {
            cluster: cluster.to_string(),
            reason: reason.into(),
        }
    }

    /// Short, stable name of the error kind, used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Precondition(_) => "precondition",
            Self::ResourceExtraction(_) => "resource_extraction",
            Self::MissingClusterIdentifier { .. } => "missing_cluster_identifier",
            Self::ClusterUnreachable { .. } => "cluster_unreachable",
            Self::Submission(_) => "submission",
            Self::Execution(_) => "execution",
        }
    }
}
