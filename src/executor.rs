//! Session cluster executor: submits a pipeline to an already-running cluster.
//!
//! One call to [`SessionClusterExecutor::execute`] performs:
//!
//! 1. resolve the user libraries from `pipeline.jars`
//! 2. build the job description
//! 3. select the backend and open a cluster session
//! 4. retrieve a client for the cluster
//! 5. submit, detached or blocking
//! 6. release the client, then the session
//!
//! Step 6 runs on every path that acquired something. Release failures are
//! logged and never replace the outcome of the submission.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::client;
use crate::cluster::{BackendRegistry, ClientHandle, ClusterSession};
use crate::config::{Configuration, ExecutionSettings};
use crate::error::Result;
use crate::job::{JobDescription, JobDescriptionBuilder, JobResult};
use crate::library::{
    BundleExtractor, DefaultLibraryPolicy, DependencyResolver, LibraryExtractor, LibraryPolicy,
};
use crate::loader::{LoadingContext, LoadingContextFactory, UserCodeContextFactory};
use crate::pipeline::{Pipeline, TranslatorRegistry};

#[derive(Clone)]
pub struct SessionClusterExecutor {
    backends: BackendRegistry,
    job_builder: JobDescriptionBuilder,
    resolver: DependencyResolver,
    contexts: Arc<dyn LoadingContextFactory>,
    parent_context: Option<Arc<dyn LoadingContext>>,
}

impl SessionClusterExecutor {
    pub fn builder() -> SessionClusterExecutorBuilder {
        SessionClusterExecutorBuilder::default()
    }

    pub fn backends(&self) -> &BackendRegistry {
        &self.backends
    }

    /// Resolve libraries and build the job description without contacting
    /// any cluster.
    pub async fn describe(
        &self,
        pipeline: &dyn Pipeline,
        configuration: &Configuration,
    ) -> Result<JobDescription> {
        let settings = ExecutionSettings::from_configuration(configuration)?;
        self.prepare(pipeline, configuration, &settings)
            .await
            .map(|(job, _)| job)
    }

    /// Submit `pipeline` to the session cluster `configuration` targets.
    ///
    /// Detached submissions return the acknowledgment; blocking ones
    /// (`execution.attached = true`) wait for the final job result.
    pub async fn execute(
        &self,
        pipeline: &dyn Pipeline,
        configuration: &Configuration,
    ) -> Result<JobResult> {
        let settings = ExecutionSettings::from_configuration(configuration)?;
        let (job, libraries) = self.prepare(pipeline, configuration, &settings).await?;

        let context = if settings.detached {
            None
        } else {
            Some(self.contexts.build(
                &libraries,
                &settings.classpaths,
                self.parent_context.clone(),
            )?)
        };

        let backend = self.backends.get_backend(configuration)?;
        info!(
            "Submitting job {} ({}) via backend `{}` ({})",
            job.job_id,
            job.name,
            backend.name(),
            if settings.detached { "detached" } else { "attached" }
        );

        let session = backend.open_session(configuration).await?;
        let cluster = session.cluster();

        let outcome = run_in_session(&session, &job, context.as_deref()).await;
        release("cluster session", &cluster, session.close().await);

        match &outcome {
            Ok(result) => debug!("Job {} done on cluster {}", result.job_id(), cluster),
            Err(e) => warn!(
                kind = e.kind(),
                "Job {} failed on cluster {}: {}", job.job_id, cluster, e
            ),
        }
        outcome
    }

    async fn prepare(
        &self,
        pipeline: &dyn Pipeline,
        configuration: &Configuration,
        settings: &ExecutionSettings,
    ) -> Result<(JobDescription, Vec<url::Url>)> {
        let libraries = self
            .resolver
            .resolve_libraries(&settings.jars, settings.special_runtime_mode)
            .await?;
        let job = self.job_builder.build(
            pipeline,
            configuration,
            &settings.classpaths,
            &libraries,
        )?;
        Ok((job, libraries))
    }
}

/// Steps 4 and 5: the client lives strictly inside the session.
async fn run_in_session(
    session: &ClusterSession,
    job: &JobDescription,
    context: Option<&dyn LoadingContext>,
) -> Result<JobResult> {
    let client = session.retrieve_client().await?;
    let cluster = client.cluster();

    let outcome = submit(&client, job, context).await;
    release("cluster client", &cluster, client.close().await);
    outcome
}

async fn submit(
    client: &ClientHandle,
    job: &JobDescription,
    context: Option<&dyn LoadingContext>,
) -> Result<JobResult> {
    match context {
        None => client::submit_job(client, job)
            .await
            .map(JobResult::Detached),
        Some(context) => client::submit_job_and_wait_for_result(client, job, context)
            .await
            .map(JobResult::Completed),
    }
}

fn release(resource: &str, cluster: &str, outcome: anyhow::Result<()>) {
    match outcome {
        Ok(()) => debug!("Released {} for {}", resource, cluster),
        Err(e) => warn!("Failed to release {} for {}: {:#}", resource, cluster, e),
    }
}

/// Builder for [`SessionClusterExecutor`]; every part defaults to the
/// production implementation.
#[derive(Default)]
pub struct SessionClusterExecutorBuilder {
    backends: Option<BackendRegistry>,
    translators: Option<TranslatorRegistry>,
    extractor: Option<Arc<dyn LibraryExtractor>>,
    policy: Option<Arc<dyn LibraryPolicy>>,
    contexts: Option<Arc<dyn LoadingContextFactory>>,
    parent_context: Option<Arc<dyn LoadingContext>>,
}

impl SessionClusterExecutorBuilder {
    pub fn backends(mut self, backends: BackendRegistry) -> Self {
        self.backends = Some(backends);
        self
    }

    pub fn translators(mut self, translators: TranslatorRegistry) -> Self {
        self.translators = Some(translators);
        self
    }

    pub fn extractor(mut self, extractor: Arc<dyn LibraryExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn policy(mut self, policy: Arc<dyn LibraryPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn loading_contexts(mut self, contexts: Arc<dyn LoadingContextFactory>) -> Self {
        self.contexts = Some(contexts);
        self
    }

    /// Context consulted after the job's own libraries when decoding results.
    pub fn parent_context(mut self, parent: Arc<dyn LoadingContext>) -> Self {
        self.parent_context = Some(parent);
        self
    }

    pub fn build(self) -> SessionClusterExecutor {
        let extractor: Arc<dyn LibraryExtractor> = match self.extractor {
            Some(extractor) => extractor,
            None => Arc::new(BundleExtractor::in_temp_dir()),
        };
        let policy: Arc<dyn LibraryPolicy> = match self.policy {
            Some(policy) => policy,
            None => Arc::new(DefaultLibraryPolicy::from_env()),
        };
        let contexts: Arc<dyn LoadingContextFactory> = match self.contexts {
            Some(contexts) => contexts,
            None => Arc::new(UserCodeContextFactory),
        };

        SessionClusterExecutor {
            backends: self.backends.unwrap_or_default(),
            job_builder: JobDescriptionBuilder::new(self.translators.unwrap_or_default()),
            resolver: DependencyResolver::new(extractor, policy),
            contexts,
            parent_context: self.parent_context,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::mock::{CLUSTER_ID_KEY, Event, MockBackend, MockFactory};
    use crate::config::options;
    use crate::error::ExecutorError;
    use crate::job::{ApplicationStatus, Partitioning, RemoteJobResult, SerializedValue};
    use crate::pipeline::DataflowPipeline;
    use crate::types::JobId;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use url::Url;

    /// Extractor returning fixed libraries per archive and counting calls.
    #[derive(Default)]
    struct StubExtractor {
        bundled: BTreeMap<String, Vec<PathBuf>>,
        calls: Mutex<Vec<Url>>,
    }

    impl StubExtractor {
        fn with(mut self, archive: &str, libs: &[&str]) -> Self {
            self.bundled.insert(
                archive.to_string(),
                libs.iter().map(PathBuf::from).collect(),
            );
            self
        }

        fn calls(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl LibraryExtractor for StubExtractor {
        async fn extract_bundled_libraries(&self, location: &Url) -> Result<Vec<PathBuf>> {
            self.calls.lock().unwrap().push(location.clone());
            Ok(self
                .bundled
                .get(location.as_str())
                .cloned()
                .unwrap_or_default())
        }
    }

    fn pipeline() -> DataflowPipeline {
        DataflowPipeline::new("word-count")
            .operator("source", "text-source")
            .operator("count", "keyed-count")
            .edge("source", "count", Partitioning::Hash)
    }

    fn target_config() -> Configuration {
        Configuration::new()
            .with(options::TARGET, "mock")
            .with(CLUSTER_ID_KEY, "session-1")
    }

    fn executor_for(
        backend: &MockBackend,
        extractor: Arc<StubExtractor>,
    ) -> SessionClusterExecutor {
        SessionClusterExecutor::builder()
            .backends(
                BackendRegistry::new().register_factory(MockFactory::new(
                    "mock",
                    backend.clone(),
                    "mock",
                )),
            )
            .extractor(extractor)
            .policy(Arc::new(DefaultLibraryPolicy::new(None)))
            .build()
    }

    fn full_cycle(job_id: &JobId, attached: bool) -> Vec<Event> {
        let mut events = vec![
            Event::OpenSession,
            Event::RetrieveClient("session-1".to_string()),
            Event::Submit(job_id.clone()),
        ];
        if attached {
            events.push(Event::AwaitResult(job_id.clone()));
        }
        events.push(Event::CloseClient);
        events.push(Event::CloseSession);
        events
    }

    #[tokio::test]
    async fn test_detached_submission_returns_acknowledgment() {
        let backend = MockBackend::new();
        let extractor = Arc::new(StubExtractor::default());
        let executor = executor_for(&backend, extractor.clone());

        let result = executor.execute(&pipeline(), &target_config()).await.unwrap();

        assert!(result.is_detached());
        assert_eq!(backend.events(), full_cycle(result.job_id(), false));
        assert_eq!(backend.count(&Event::AwaitResult(result.job_id().clone())), 0);
        assert_eq!(extractor.calls(), 0);
    }

    #[tokio::test]
    async fn test_attached_submission_waits_for_result() {
        let fixed = JobId::generate();
        let accumulated = SerializedValue::from_json(&json!({"lines": 42}), None);
        let backend = MockBackend::new().with_result(RemoteJobResult {
            job_id: fixed.clone(),
            application_status: ApplicationStatus::Succeeded,
            net_runtime_ms: 1500,
            accumulators: BTreeMap::from([("stats".to_string(), accumulated)]),
            failure_cause: None,
        });
        let extractor = Arc::new(StubExtractor::default());
        let executor = executor_for(&backend, extractor.clone());

        let config = target_config()
            .with(options::ATTACHED, true)
            .with(options::FIXED_JOB_ID, fixed.as_str());
        let result = executor.execute(&pipeline(), &config).await.unwrap();

        let JobResult::Completed(result) = result else {
            panic!("expected a completed job");
        };
        assert_eq!(result.job_id, fixed);
        assert_eq!(result.net_runtime.as_millis(), 1500);
        assert_eq!(result.accumulator("stats"), Some(&json!({"lines": 42})));
        assert_eq!(backend.events(), full_cycle(&fixed, true));
        assert_eq!(extractor.calls(), 0);
    }

    #[tokio::test]
    async fn test_bundled_libraries_are_attached() {
        let backend = MockBackend::new();
        let extractor = Arc::new(
            StubExtractor::default()
                .with("file:///opt/jobs/app.jar", &["/tmp/x/a.jar", "/tmp/x/b.jar"]),
        );
        let executor = executor_for(&backend, extractor.clone());

        let config = target_config().with(options::JARS, vec!["/opt/jobs/app.jar".to_string()]);
        executor.execute(&pipeline(), &config).await.unwrap();

        let submitted = backend.submitted();
        assert_eq!(submitted.len(), 1);
        let libraries: Vec<&str> = submitted[0].libraries.iter().map(|u| u.as_str()).collect();
        assert_eq!(
            libraries,
            vec![
                "file:///opt/jobs/app.jar",
                "file:///tmp/x/a.jar",
                "file:///tmp/x/b.jar"
            ]
        );
        assert_eq!(extractor.calls(), 1);
    }

    #[tokio::test]
    async fn test_missing_cluster_id_opens_no_session() {
        let backend = MockBackend::new();
        let executor = executor_for(&backend, Arc::new(StubExtractor::default()));

        let config = Configuration::new().with(options::TARGET, "mock");
        let err = executor.execute(&pipeline(), &config).await.unwrap_err();

        assert!(matches!(err, ExecutorError::MissingClusterIdentifier { .. }));
        assert_eq!(backend.count(&Event::OpenSession), 0);
        assert!(backend.events().is_empty());
    }

    #[tokio::test]
    async fn test_handles_released_in_reverse_order_on_failure() {
        let fixed = JobId::generate();
        let failures = [
            MockBackend::new().fail_submit(ExecutorError::Submission("rejected".into())),
            MockBackend::new().fail_result(ExecutorError::Execution("task failed".into())),
            MockBackend::new().with_result(RemoteJobResult {
                job_id: fixed.clone(),
                application_status: ApplicationStatus::Failed,
                net_runtime_ms: 0,
                accumulators: BTreeMap::new(),
                failure_cause: Some("division by zero".into()),
            }),
        ];

        for backend in failures {
            let executor = executor_for(&backend, Arc::new(StubExtractor::default()));
            let config = target_config()
                .with(options::ATTACHED, true)
                .with(options::FIXED_JOB_ID, fixed.as_str());
            assert!(executor.execute(&pipeline(), &config).await.is_err());

            let events = backend.events();
            assert_eq!(backend.count(&Event::CloseClient), 1);
            assert_eq!(backend.count(&Event::CloseSession), 1);
            let tail = &events[events.len() - 2..];
            assert_eq!(tail, &[Event::CloseClient, Event::CloseSession]);
        }
    }

    #[tokio::test]
    async fn test_submission_failure_is_surfaced_unchanged() {
        let backend =
            MockBackend::new().fail_submit(ExecutorError::Submission("queue full".into()));
        let executor = executor_for(&backend, Arc::new(StubExtractor::default()));

        let err = executor.execute(&pipeline(), &target_config()).await.unwrap_err();
        assert_eq!(err, ExecutorError::Submission("queue full".into()));
    }

    #[tokio::test]
    async fn test_failed_job_is_execution_error() {
        let fixed = JobId::generate();
        let backend = MockBackend::new().with_result(RemoteJobResult {
            job_id: fixed.clone(),
            application_status: ApplicationStatus::Failed,
            net_runtime_ms: 5,
            accumulators: BTreeMap::new(),
            failure_cause: Some("out of memory".into()),
        });
        let executor = executor_for(&backend, Arc::new(StubExtractor::default()));

        let config = target_config()
            .with(options::ATTACHED, true)
            .with(options::FIXED_JOB_ID, fixed.as_str());
        let err = executor.execute(&pipeline(), &config).await.unwrap_err();

        assert_eq!(err.kind(), "execution");
        assert!(err.to_string().contains("out of memory"));
    }

    #[tokio::test]
    async fn test_unreachable_cluster_releases_session_only() {
        let backend = MockBackend::new()
            .fail_retrieve(ExecutorError::unreachable("session-1", "no such cluster"));
        let executor = executor_for(&backend, Arc::new(StubExtractor::default()));

        let err = executor.execute(&pipeline(), &target_config()).await.unwrap_err();

        assert_eq!(err.kind(), "cluster_unreachable");
        assert_eq!(
            backend.events(),
            vec![
                Event::OpenSession,
                Event::RetrieveClient("session-1".to_string()),
                Event::CloseSession,
            ]
        );
    }

    #[tokio::test]
    async fn test_release_failures_do_not_mask_outcome() {
        let backend = MockBackend::new()
            .fail_close_client("socket already closed")
            .fail_close_session("descriptor gone");
        let executor = executor_for(&backend, Arc::new(StubExtractor::default()));
        assert!(executor.execute(&pipeline(), &target_config()).await.is_ok());
        assert_eq!(backend.count(&Event::CloseSession), 1);

        let backend = MockBackend::new()
            .fail_submit(ExecutorError::Submission("rejected".into()))
            .fail_close_client("socket already closed")
            .fail_close_session("descriptor gone");
        let executor = executor_for(&backend, Arc::new(StubExtractor::default()));
        let err = executor.execute(&pipeline(), &target_config()).await.unwrap_err();
        assert_eq!(err, ExecutorError::Submission("rejected".into()));
    }

    #[tokio::test]
    async fn test_open_failure_acquires_nothing_else() {
        let backend =
            MockBackend::new().fail_open(ExecutorError::unreachable("session-1", "refused"));
        let executor = executor_for(&backend, Arc::new(StubExtractor::default()));

        let err = executor.execute(&pipeline(), &target_config()).await.unwrap_err();
        assert_eq!(err.kind(), "cluster_unreachable");
        assert_eq!(backend.events(), vec![Event::OpenSession]);
    }

    #[tokio::test]
    async fn test_preconditions_fail_before_cluster_contact() {
        let backend = MockBackend::new();
        let executor = executor_for(&backend, Arc::new(StubExtractor::default()));

        let config = target_config().with(options::DEFAULT_PARALLELISM, 0i64);
        let err = executor.execute(&pipeline(), &config).await.unwrap_err();
        assert_eq!(err.kind(), "precondition");

        let empty = DataflowPipeline::new("empty");
        let err = executor.execute(&empty, &target_config()).await.unwrap_err();
        assert_eq!(err.kind(), "precondition");

        let config = target_config().with(options::TARGET, "kubernetes-session");
        let err = executor.execute(&pipeline(), &config).await.unwrap_err();
        assert_eq!(err.kind(), "precondition");

        assert!(backend.events().is_empty());
    }

    #[tokio::test]
    async fn test_describe_does_not_contact_cluster() {
        let backend = MockBackend::new();
        let extractor = Arc::new(
            StubExtractor::default().with("file:///opt/jobs/app.jar", &["/tmp/x/a.jar"]),
        );
        let executor = executor_for(&backend, extractor);

        let config = Configuration::new()
            .with(options::JARS, vec!["/opt/jobs/app.jar".to_string()])
            .with(options::DEFAULT_PARALLELISM, 3u32);
        let first = executor.describe(&pipeline(), &config).await.unwrap();
        let second = executor.describe(&pipeline(), &config).await.unwrap();

        assert_eq!(first.libraries.len(), 2);
        assert_eq!(first.libraries, second.libraries);
        assert_eq!(first.parallelism, 3);
        assert!(backend.events().is_empty());
    }

    /// Loading-context factory that always refuses.
    struct RefusingContexts;

    impl LoadingContextFactory for RefusingContexts {
        fn build(
            &self,
            _libraries: &[Url],
            _classpaths: &[Url],
            _parent: Option<Arc<dyn LoadingContext>>,
        ) -> Result<Arc<dyn LoadingContext>> {
            Err(ExecutorError::precondition("user code location is not loadable"))
        }
    }

    #[tokio::test]
    async fn test_loading_context_failure_acquires_nothing() {
        let backend = MockBackend::new();
        let executor = SessionClusterExecutor::builder()
            .backends(BackendRegistry::new().register_factory(MockFactory::new(
                "mock",
                backend.clone(),
                "mock",
            )))
            .extractor(Arc::new(StubExtractor::default()))
            .policy(Arc::new(DefaultLibraryPolicy::new(None)))
            .loading_contexts(Arc::new(RefusingContexts))
            .build();

        let config = target_config().with(options::ATTACHED, true);
        let err = executor.execute(&pipeline(), &config).await.unwrap_err();

        assert_eq!(err, ExecutorError::precondition("user code location is not loadable"));
        assert!(backend.events().is_empty());

        // Detached submissions never build a loading context.
        assert!(executor.execute(&pipeline(), &target_config()).await.is_ok());
    }

    #[tokio::test]
    async fn test_later_archive_order_does_not_change_library_set() {
        let archives = [
            "file:///opt/jobs/app.jar",
            "file:///opt/jobs/udfs.jar",
            "file:///opt/jobs/connectors.jar",
        ];
        let extractor = Arc::new(
            StubExtractor::default()
                .with(archives[0], &["/tmp/x/core.jar"])
                .with(archives[1], &["/tmp/x/udf.jar"])
                .with(archives[2], &["/tmp/x/kafka.jar", "/tmp/x/jdbc.jar"]),
        );

        let mut resolved = Vec::new();
        for order in [[0, 1, 2], [0, 2, 1]] {
            let backend = MockBackend::new();
            let executor = executor_for(&backend, extractor.clone());
            let jars: Vec<String> = order.iter().map(|&i| archives[i].to_string()).collect();
            let config = target_config().with(options::JARS, jars);
            let job = executor.describe(&pipeline(), &config).await.unwrap();

            assert_eq!(job.libraries[0].as_str(), archives[0]);
            let set: std::collections::BTreeSet<String> =
                job.libraries.iter().map(|u| u.to_string()).collect();
            resolved.push(set);
        }

        assert_eq!(resolved[0].len(), 5);
        assert_eq!(resolved[0], resolved[1]);
    }

    #[tokio::test]
    async fn test_result_retrieval_error_keeps_its_kind() {
        let backend = MockBackend::new()
            .fail_result(ExecutorError::unreachable("session-1", "connection reset"));
        let executor = executor_for(&backend, Arc::new(StubExtractor::default()));

        let config = target_config().with(options::ATTACHED, true);
        let err = executor.execute(&pipeline(), &config).await.unwrap_err();

        assert_eq!(err, ExecutorError::unreachable("session-1", "connection reset"));
        assert_eq!(backend.count(&Event::CloseClient), 1);
        assert_eq!(backend.count(&Event::CloseSession), 1);
    }
}
