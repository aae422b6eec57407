use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::{HashMap, HashSet, VecDeque};

use super::{Pipeline, PipelineTranslator};
use crate::config::{Configuration, options};
use crate::error::{ExecutorError, Result};
use crate::job::{JobDescription, JobEdge, JobVertex, Partitioning};
use crate::types::{JobId, JobName};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataflowOperator {
    pub id: String,
    pub kind: String,
    /// Overrides the job's default parallelism for this operator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallelism: Option<u32>,
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataflowEdge {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub partitioning: Partitioning,
}

/// A DAG of operators, as written by users or emitted by higher-level APIs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataflowPipeline {
    pub name: String,
    #[serde(default)]
    pub operators: Vec<DataflowOperator>,
    #[serde(default)]
    pub edges: Vec<DataflowEdge>,
}

impl DataflowPipeline {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            operators: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn from_json(raw: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn operator(mut self, id: impl Into<String>, kind: impl Into<String>) -> Self {
        self.operators.push(DataflowOperator {
            id: id.into(),
            kind: kind.into(),
            parallelism: None,
            properties: Default::default(),
        });
        self
    }

    /// Set the parallelism of the most recently added operator.
    pub fn with_parallelism(mut self, parallelism: u32) -> Self {
        if let Some(last) = self.operators.last_mut() {
            last.parallelism = Some(parallelism);
        }
        self
    }

    pub fn edge(
        mut self,
        source: impl Into<String>,
        target: impl Into<String>,
        partitioning: Partitioning,
    ) -> Self {
        self.edges.push(DataflowEdge {
            source: source.into(),
            target: target.into(),
            partitioning,
        });
        self
    }
}

impl Pipeline for DataflowPipeline {
    fn name(&self) -> &str {
        &self.name
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Translates [`DataflowPipeline`]s one operator per task.
#[derive(Debug, Default, Clone, Copy)]
pub struct DataflowTranslator;

impl PipelineTranslator for DataflowTranslator {
    fn name(&self) -> &str {
        "dataflow"
    }

    fn can_translate(&self, pipeline: &dyn Pipeline) -> bool {
        pipeline.as_any().is::<DataflowPipeline>()
    }

    fn translate(
        &self,
        pipeline: &dyn Pipeline,
        configuration: &Configuration,
        default_parallelism: u32,
    ) -> Result<JobDescription> {
        let dataflow = pipeline
            .as_any()
            .downcast_ref::<DataflowPipeline>()
            .ok_or_else(|| {
                ExecutorError::precondition(format!(
                    "Pipeline `{}` is not a dataflow pipeline",
                    pipeline.name()
                ))
            })?;

        if dataflow.operators.is_empty() {
            return Err(ExecutorError::precondition(format!(
                "Pipeline `{}` has no operators",
                dataflow.name
            )));
        }

        let order = topological_order(dataflow)?;

        let job_id = match configuration.get_string(options::FIXED_JOB_ID)? {
            Some(raw) => JobId::parse(&raw)?,
            None => JobId::generate(),
        };
        let name = configuration
            .get_string(options::JOB_NAME)?
            .map(JobName::from)
            .unwrap_or_else(|| JobName::new(dataflow.name.clone()));

        let mut job = JobDescription::new(job_id, name, default_parallelism);
        let mut parallelism_of = HashMap::new();

        for index in order {
            let op = &dataflow.operators[index];
            let parallelism = match op.parallelism {
                Some(0) => {
                    return Err(ExecutorError::precondition(format!(
                        "Operator `{}` has parallelism 0",
                        op.id
                    )));
                }
                Some(p) => p,
                None => default_parallelism,
            };
            parallelism_of.insert(op.id.as_str(), parallelism);
            job.add_vertex(JobVertex {
                id: op.id.clone(),
                operator: op.kind.clone(),
                parallelism,
                properties: op.properties.clone(),
            });
        }

        for edge in &dataflow.edges {
            let source_parallelism = parallelism_of.get(edge.source.as_str());
            let target_parallelism = parallelism_of.get(edge.target.as_str());
            if edge.partitioning == Partitioning::Forward
                && source_parallelism != target_parallelism
            {
                return Err(ExecutorError::precondition(format!(
                    "Forward edge {} -> {} connects operators with different parallelism",
                    edge.source, edge.target
                )));
            }
            job.add_edge(JobEdge {
                source: edge.source.clone(),
                target: edge.target.clone(),
                partitioning: edge.partitioning,
            });
        }

        Ok(job)
    }
}

/// Kahn's algorithm; ties are broken by declaration order so the result is
/// stable for identical pipelines.
fn topological_order(pipeline: &DataflowPipeline) -> Result<Vec<usize>> {
    let mut index_of = HashMap::new();
    for (i, op) in pipeline.operators.iter().enumerate() {
        if index_of.insert(op.id.as_str(), i).is_some() {
            return Err(ExecutorError::precondition(format!(
                "Duplicate operator id `{}`",
                op.id
            )));
        }
    }

    let mut successors = vec![Vec::new(); pipeline.operators.len()];
    let mut in_degree = vec![0usize; pipeline.operators.len()];
    let mut seen = HashSet::new();

    for edge in &pipeline.edges {
        let lookup = |id: &str| {
            index_of.get(id).copied().ok_or_else(|| {
                ExecutorError::precondition(format!(
                    "Edge {} -> {} references unknown operator `{}`",
                    edge.source, edge.target, id
                ))
            })
        };
        let source = lookup(&edge.source)?;
        let target = lookup(&edge.target)?;
        if !seen.insert((source, target)) {
            continue;
        }
        successors[source].push(target);
        in_degree[target] += 1;
    }

    let mut ready: VecDeque<usize> = (0..pipeline.operators.len())
        .filter(|&i| in_degree[i] == 0)
        .collect();
    let mut order = Vec::with_capacity(pipeline.operators.len());

    while let Some(next) = ready.pop_front() {
        order.push(next);
        for &succ in &successors[next] {
            in_degree[succ] -= 1;
            if in_degree[succ] == 0 {
                ready.push_back(succ);
            }
        }
    }

    if order.len() != pipeline.operators.len() {
        return Err(ExecutorError::precondition(format!(
            "Pipeline `{}` contains a cycle",
            pipeline.name
        )));
    }

    Ok(order)
}
