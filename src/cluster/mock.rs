//! Recording in-memory backend for tests.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use super::{ClusterClient, ClusterClientFactory, ClusterDescriptor};
use crate::config::{Configuration, options};
use crate::error::{ExecutorError, Result};
use crate::job::{ApplicationStatus, JobDescription, RemoteJobResult};
use crate::types::JobId;

pub const CLUSTER_ID_KEY: &str = "mock.cluster-id";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    OpenSession,
    RetrieveClient(String),
    Submit(JobId),
    AwaitResult(JobId),
    CloseClient,
    CloseSession,
}

#[derive(Default)]
struct State {
    events: Vec<Event>,
    submitted: Vec<JobDescription>,
    open_error: Option<ExecutorError>,
    retrieve_error: Option<ExecutorError>,
    submit_error: Option<ExecutorError>,
    result_error: Option<ExecutorError>,
    result: Option<RemoteJobResult>,
    close_client_error: Option<String>,
    close_session_error: Option<String>,
}

/// Shared handle on the recorded state; clones observe the same cluster.
#[derive(Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<State>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.state.lock().unwrap().events.clone()
    }

    pub fn submitted(&self) -> Vec<JobDescription> {
        self.state.lock().unwrap().submitted.clone()
    }

    pub fn count(&self, event: &Event) -> usize {
        self.events().iter().filter(|e| *e == event).count()
    }

    pub fn fail_open(self, err: ExecutorError) -> Self {
        self.state.lock().unwrap().open_error = Some(err);
        self
    }

    pub fn fail_retrieve(self, err: ExecutorError) -> Self {
        self.state.lock().unwrap().retrieve_error = Some(err);
        self
    }

    pub fn fail_submit(self, err: ExecutorError) -> Self {
        self.state.lock().unwrap().submit_error = Some(err);
        self
    }

    pub fn fail_result(self, err: ExecutorError) -> Self {
        self.state.lock().unwrap().result_error = Some(err);
        self
    }

    pub fn fail_close_client(self, reason: &str) -> Self {
        self.state.lock().unwrap().close_client_error = Some(reason.to_string());
        self
    }

    pub fn fail_close_session(self, reason: &str) -> Self {
        self.state.lock().unwrap().close_session_error = Some(reason.to_string());
        self
    }

    pub fn with_result(self, result: RemoteJobResult) -> Self {
        self.state.lock().unwrap().result = Some(result);
        self
    }

    fn record(&self, event: Event) {
        self.state.lock().unwrap().events.push(event);
    }
}

pub struct MockFactory {
    name: String,
    target: String,
    backend: MockBackend,
}

impl MockFactory {
    pub fn new(name: &str, backend: MockBackend, target: &str) -> Self {
        Self {
            name: name.to_string(),
            target: target.to_string(),
            backend,
        }
    }
}

#[async_trait]
impl ClusterClientFactory for MockFactory {
    type ClusterId = String;

    fn name(&self) -> &str {
        &self.name
    }

    fn is_compatible_with(&self, configuration: &Configuration) -> Result<bool> {
        Ok(configuration.get_string(options::TARGET)?.as_deref() == Some(self.target.as_str()))
    }

    fn get_cluster_id(&self, configuration: &Configuration) -> Result<Option<String>> {
        configuration.get_string(CLUSTER_ID_KEY)
    }

    async fn create_cluster_descriptor(
        &self,
        _configuration: &Configuration,
    ) -> Result<Box<dyn ClusterDescriptor<String>>> {
        self.backend.record(Event::OpenSession);
        if let Some(err) = self.backend.state.lock().unwrap().open_error.clone() {
            return Err(err);
        }
        Ok(Box::new(MockDescriptor {
            backend: self.backend.clone(),
        }))
    }
}

struct MockDescriptor {
    backend: MockBackend,
}

#[async_trait]
impl ClusterDescriptor<String> for MockDescriptor {
    fn description(&self) -> String {
        "mock descriptor".to_string()
    }

    async fn retrieve(&self, cluster_id: &String) -> Result<Box<dyn ClusterClient>> {
        self.backend.record(Event::RetrieveClient(cluster_id.clone()));
        if let Some(err) = self.backend.state.lock().unwrap().retrieve_error.clone() {
            return Err(err);
        }
        Ok(Box::new(MockClient {
            backend: self.backend.clone(),
            cluster_id: cluster_id.clone(),
        }))
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        self.backend.record(Event::CloseSession);
        match self.backend.state.lock().unwrap().close_session_error.clone() {
            Some(reason) => Err(anyhow::anyhow!(reason)),
            None => Ok(()),
        }
    }
}

struct MockClient {
    backend: MockBackend,
    cluster_id: String,
}

#[async_trait]
impl ClusterClient for MockClient {
    fn cluster(&self) -> String {
        self.cluster_id.clone()
    }

    async fn submit_job(&self, job: &JobDescription) -> Result<JobId> {
        self.backend.record(Event::Submit(job.job_id.clone()));
        let mut state = self.backend.state.lock().unwrap();
        if let Some(err) = state.submit_error.clone() {
            return Err(err);
        }
        state.submitted.push(job.clone());
        Ok(job.job_id.clone())
    }

    async fn request_job_result(&self, job_id: &JobId) -> Result<RemoteJobResult> {
        self.backend.record(Event::AwaitResult(job_id.clone()));
        let state = self.backend.state.lock().unwrap();
        if let Some(err) = state.result_error.clone() {
            return Err(err);
        }
        Ok(state.result.clone().unwrap_or_else(|| RemoteJobResult {
            job_id: job_id.clone(),
            application_status: ApplicationStatus::Succeeded,
            net_runtime_ms: 10,
            accumulators: BTreeMap::new(),
            failure_cause: None,
        }))
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        self.backend.record(Event::CloseClient);
        match self.backend.state.lock().unwrap().close_client_error.clone() {
            Some(reason) => Err(anyhow::anyhow!(reason)),
            None => Ok(()),
        }
    }
}
