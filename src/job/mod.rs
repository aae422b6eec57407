//! Concrete, schedulable job descriptions and the results the cluster
//! hands back for them.

mod builder;
mod result;

pub use builder::JobDescriptionBuilder;
pub use result::{
    ApplicationStatus, JobExecutionResult, JobResult, JobSubmission, RemoteJobResult,
    SerializedValue,
};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::types::{JobId, JobName};

/// How records flow from one task to the next.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Partitioning {
    /// One-to-one; both ends must run with the same parallelism.
    #[default]
    Forward,
    Hash,
    Rebalance,
    Broadcast,
}

/// Restore-from-checkpoint settings shipped with a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavepointRestoreSettings {
    /// Savepoint to restore from, `None` for a fresh start.
    pub restore_path: Option<String>,
    /// Allow state in the savepoint that maps to no task.
    pub allow_non_restored_state: bool,
}

impl SavepointRestoreSettings {
    pub fn none() -> Self {
        Self {
            restore_path: None,
            allow_non_restored_state: false,
        }
    }

    pub fn for_path(path: impl Into<String>, allow_non_restored_state: bool) -> Self {
        Self {
            restore_path: Some(path.into()),
            allow_non_restored_state,
        }
    }

    pub fn restores(&self) -> bool {
        self.restore_path.is_some()
    }
}

impl Default for SavepointRestoreSettings {
    fn default() -> Self {
        Self::none()
    }
}

/// A schedulable task in the job DAG.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobVertex {
    pub id: String,
    /// Operator kind the task runs (e.g., "source", "map").
    pub operator: String,
    pub parallelism: u32,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobEdge {
    pub source: String,
    pub target: String,
    pub partitioning: Partitioning,
}

/// The concrete executable form of a pipeline.
///
/// Besides the DAG itself it carries everything the cluster needs to run the
/// job without resolving anything again: the user libraries, the extra
/// classpath entries and the restore settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDescription {
    pub job_id: JobId,
    pub name: JobName,
    /// Default parallelism the job was translated with.
    pub parallelism: u32,
    pub vertices: Vec<JobVertex>,
    pub edges: Vec<JobEdge>,
    #[serde(default)]
    pub libraries: Vec<Url>,
    #[serde(default)]
    pub classpaths: Vec<Url>,
    #[serde(default)]
    pub savepoint_restore: SavepointRestoreSettings,
}

impl JobDescription {
    pub fn new(job_id: JobId, name: JobName, parallelism: u32) -> Self {
        Self {
            job_id,
            name,
            parallelism,
            vertices: Vec::new(),
            edges: Vec::new(),
            libraries: Vec::new(),
            classpaths: Vec::new(),
            savepoint_restore: SavepointRestoreSettings::none(),
        }
    }

    pub fn add_vertex(&mut self, vertex: JobVertex) {
        self.vertices.push(vertex);
    }

    pub fn add_edge(&mut self, edge: JobEdge) {
        self.edges.push(edge);
    }

    /// Attach libraries, skipping ones already attached.
    pub fn add_libraries<'a>(&mut self, libraries: impl IntoIterator<Item = &'a Url>) {
        for library in libraries {
            if !self.libraries.contains(library) {
                self.libraries.push(library.clone());
            }
        }
    }

    pub fn set_classpaths(&mut self, classpaths: Vec<Url>) {
        self.classpaths = classpaths;
    }

    pub fn set_savepoint_restore_settings(&mut self, settings: SavepointRestoreSettings) {
        self.savepoint_restore = settings;
    }

    pub fn vertex(&self, id: &str) -> Option<&JobVertex> {
        self.vertices.iter().find(|v| v.id == id)
    }

    /// Highest parallelism of any task, which is the slot demand of the job.
    pub fn max_parallelism(&self) -> u32 {
        self.vertices
            .iter()
            .map(|v| v.parallelism)
            .max()
            .unwrap_or(self.parallelism)
    }
}
