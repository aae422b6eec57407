use tracing::debug;
use url::Url;

use super::JobDescription;
use crate::config::{Configuration, ExecutionSettings};
use crate::error::Result;
use crate::pipeline::{Pipeline, TranslatorRegistry};

/// Builds the job description for one submission.
///
/// Translation is delegated to the registered translators; the builder then
/// attaches the resolved libraries, the classpath entries and the restore
/// settings so nothing has to be resolved again on the cluster.
#[derive(Clone, Default)]
pub struct JobDescriptionBuilder {
    translators: TranslatorRegistry,
}

impl JobDescriptionBuilder {
    pub fn new(translators: TranslatorRegistry) -> Self {
        Self { translators }
    }

    pub fn build(
        &self,
        pipeline: &dyn Pipeline,
        configuration: &Configuration,
        classpaths: &[Url],
        libraries: &[Url],
    ) -> Result<JobDescription> {
        let settings = ExecutionSettings::from_configuration(configuration)?;
        let translator = self.translators.get(pipeline)?;

        let mut job = translator.translate(pipeline, configuration, settings.parallelism)?;
        job.add_libraries(libraries);
        job.set_classpaths(classpaths.to_vec());
        job.set_savepoint_restore_settings(settings.savepoint);

        debug!(
            job_id = %job.job_id,
            translator = translator.name(),
            vertices = job.vertices.len(),
            libraries = job.libraries.len(),
            classpaths = job.classpaths.len(),
            "Built job description"
        );

        Ok(job)
    }
}
