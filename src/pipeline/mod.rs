//! Pipelines and the translators that turn them into job descriptions.
//!
//! A pipeline is opaque to the executor. Translators are registered in a
//! `TranslatorRegistry` and the first one that accepts a pipeline wins.

mod dataflow;

pub use dataflow::{DataflowEdge, DataflowOperator, DataflowPipeline, DataflowTranslator};

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::config::Configuration;
use crate::error::{ExecutorError, Result};
use crate::job::JobDescription;

/// Abstract, backend-agnostic description of a computation.
pub trait Pipeline: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Downcasting hook for translators.
    fn as_any(&self) -> &dyn Any;
}

/// Translates one family of pipelines into job descriptions.
///
/// Implementations must be pure: the same pipeline, configuration and
/// parallelism yield an equivalent description.
pub trait PipelineTranslator: Send + Sync {
    fn name(&self) -> &str;

    fn can_translate(&self, pipeline: &dyn Pipeline) -> bool;

    fn translate(
        &self,
        pipeline: &dyn Pipeline,
        configuration: &Configuration,
        default_parallelism: u32,
    ) -> Result<JobDescription>;
}

#[derive(Clone)]
pub struct TranslatorRegistry {
    translators: Vec<Arc<dyn PipelineTranslator>>,
}

impl TranslatorRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            translators: Vec::new(),
        }
    }

    pub fn register(mut self, translator: Arc<dyn PipelineTranslator>) -> Self {
        self.translators.push(translator);
        self
    }

    pub fn register_translator<T: PipelineTranslator + 'static>(mut self, translator: T) -> Self {
        self.translators.push(Arc::new(translator));
        self
    }

    /// Find the translator responsible for `pipeline`.
    pub fn get(&self, pipeline: &dyn Pipeline) -> Result<Arc<dyn PipelineTranslator>> {
        self.translators
            .iter()
            .find(|t| t.can_translate(pipeline))
            .cloned()
            .ok_or_else(|| {
                ExecutorError::precondition(format!(
                    "No translator accepts pipeline `{}`",
                    pipeline.name()
                ))
            })
    }

    pub fn list_names(&self) -> Vec<String> {
        self.translators.iter().map(|t| t.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.translators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.translators.is_empty()
    }
}

impl Default for TranslatorRegistry {
    fn default() -> Self {
        Self::new().register_translator(DataflowTranslator)
    }
}
