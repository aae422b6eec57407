//! Access to already-running clusters.
//!
//! A backend implements [`ClusterClientFactory`] and is registered in a
//! [`BackendRegistry`]. Its cluster identifier is an associated type; once a
//! [`ClusterSession`] is opened the identifier is bound inside it, so the
//! executor never has to name it.
//!
//! Sessions and clients are scoped resources. Both are released through a
//! consuming `close`, which makes releasing twice impossible; dropping one
//! without closing it is logged.

mod registry;
mod rest;

#[cfg(test)]
pub(crate) mod mock;

pub use registry::{BackendRegistry, ClusterBackend};
pub use rest::{RestClusterClientFactory, RestClusterId};

use async_trait::async_trait;
use std::fmt;
use tracing::{debug, warn};

use crate::config::Configuration;
use crate::error::Result;
use crate::job::{JobDescription, RemoteJobResult};
use crate::types::JobId;

/// Capability set of one cluster backend.
#[async_trait]
pub trait ClusterClientFactory: Send + Sync {
    /// Backend-specific identifier of a running cluster.
    type ClusterId: fmt::Display + Send + Sync + 'static;

    /// Name matched against `execution.target`.
    fn name(&self) -> &str;

    fn is_compatible_with(&self, configuration: &Configuration) -> Result<bool>;

    /// `None` when the configuration does not address a concrete cluster.
    fn get_cluster_id(&self, configuration: &Configuration) -> Result<Option<Self::ClusterId>>;

    async fn create_cluster_descriptor(
        &self,
        configuration: &Configuration,
    ) -> Result<Box<dyn ClusterDescriptor<Self::ClusterId>>>;
}

/// Connection to a backend's control plane.
#[async_trait]
pub trait ClusterDescriptor<Id: Send + Sync>: Send + Sync {
    fn description(&self) -> String;

    /// Retrieve a client for a running cluster, failing with
    /// `ClusterUnreachable` if there is none behind `cluster_id`.
    async fn retrieve(&self, cluster_id: &Id) -> Result<Box<dyn ClusterClient>>;

    async fn close(&mut self) -> anyhow::Result<()>;
}

/// Submission channel to one cluster instance.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Display form of the cluster this client talks to.
    fn cluster(&self) -> String;

    async fn submit_job(&self, job: &JobDescription) -> Result<JobId>;

    /// Wait until the job reaches a terminal state.
    async fn request_job_result(&self, job_id: &JobId) -> Result<RemoteJobResult>;

    async fn close(&mut self) -> anyhow::Result<()>;
}

#[async_trait]
trait BoundDescriptor: Send + Sync {
    fn cluster(&self) -> String;

    async fn retrieve(&self) -> Result<Box<dyn ClusterClient>>;

    async fn close(&mut self) -> anyhow::Result<()>;
}

struct Bound<Id: Send + Sync> {
    descriptor: Box<dyn ClusterDescriptor<Id>>,
    cluster_id: Id,
}

#[async_trait]
impl<Id> BoundDescriptor for Bound<Id>
where
    Id: fmt::Display + Send + Sync + 'static,
{
    fn cluster(&self) -> String {
        self.cluster_id.to_string()
    }

    async fn retrieve(&self) -> Result<Box<dyn ClusterClient>> {
        self.descriptor.retrieve(&self.cluster_id).await
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        self.descriptor.close().await
    }
}

/// An open cluster descriptor bound to the cluster it targets.
pub struct ClusterSession {
    backend: String,
    bound: Box<dyn BoundDescriptor>,
    closed: bool,
}

impl ClusterSession {
    pub(crate) fn new<Id>(
        backend: impl Into<String>,
        descriptor: Box<dyn ClusterDescriptor<Id>>,
        cluster_id: Id,
    ) -> Self
    where
        Id: fmt::Display + Send + Sync + 'static,
    {
        Self {
            backend: backend.into(),
            bound: Box::new(Bound {
                descriptor,
                cluster_id,
            }),
            closed: false,
        }
    }

    pub fn backend(&self) -> &str {
        &self.backend
    }

    pub fn cluster(&self) -> String {
        self.bound.cluster()
    }

    /// Retrieve the client handle for the bound cluster.
    pub async fn retrieve_client(&self) -> Result<ClientHandle> {
        let client = self.bound.retrieve().await?;
        debug!("Retrieved client for cluster {}", client.cluster());
        Ok(ClientHandle {
            inner: client,
            closed: false,
        })
    }

    /// Release the session.
    pub async fn close(mut self) -> anyhow::Result<()> {
        self.closed = true;
        self.bound.close().await
    }
}

impl Drop for ClusterSession {
    fn drop(&mut self) {
        if !self.closed {
            warn!(
                "Cluster session for {} ({}) dropped without being closed",
                self.bound.cluster(),
                self.backend
            );
        }
    }
}

/// Active submission channel obtained from a [`ClusterSession`].
pub struct ClientHandle {
    inner: Box<dyn ClusterClient>,
    closed: bool,
}

impl ClientHandle {
    pub fn cluster(&self) -> String {
        self.inner.cluster()
    }

    pub async fn submit_job(&self, job: &JobDescription) -> Result<JobId> {
        self.inner.submit_job(job).await
    }

    pub async fn request_job_result(&self, job_id: &JobId) -> Result<RemoteJobResult> {
        self.inner.request_job_result(job_id).await
    }

    /// Release the client.
    pub async fn close(mut self) -> anyhow::Result<()> {
        self.closed = true;
        self.inner.close().await
    }
}

impl Drop for ClientHandle {
    fn drop(&mut self) {
        if !self.closed {
            warn!(
                "Cluster client for {} dropped without being closed",
                self.inner.cluster()
            );
        }
    }
}
