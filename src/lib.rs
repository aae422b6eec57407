// Core modules
pub mod config;
pub mod error;
pub mod types;

// Submission pipeline
pub mod client;
pub mod cluster;
pub mod executor;
pub mod job;
pub mod library;
pub mod loader;
pub mod pipeline;

// Re-export key types and functions
pub use config::{Configuration, ExecutionSettings, load_configuration, options};
pub use error::{ExecutorError, Result};
pub use types::{ExecutionTarget, JobId, JobName};

pub use cluster::{BackendRegistry, ClusterBackend, ClusterClientFactory, RestClusterClientFactory};
pub use executor::{SessionClusterExecutor, SessionClusterExecutorBuilder};
pub use job::{JobDescription, JobExecutionResult, JobResult, JobSubmission};
pub use library::{BundleExtractor, DefaultLibraryPolicy, DependencyResolver};
pub use loader::{LoadingContext, UserCodeContextFactory};
pub use pipeline::{DataflowPipeline, Pipeline, PipelineTranslator, TranslatorRegistry};

/// Convenience function to create an executor with the default backends.
///
/// Registers the REST session backend and the dataflow translator, extracts
/// bundled libraries into the system temp directory and looks up the python
/// runtime library in `$SESSION_EXECUTOR_OPT_DIR`.
pub fn create_executor() -> SessionClusterExecutor {
    SessionClusterExecutor::builder()
        .backends(BackendRegistry::default())
        .translators(TranslatorRegistry::default())
        .build()
}
