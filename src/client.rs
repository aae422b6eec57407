//! Submission helpers over an acquired [`ClientHandle`].

use chrono::Utc;
use tracing::info;

use crate::cluster::ClientHandle;
use crate::error::{ExecutorError, Result};
use crate::job::{JobDescription, JobExecutionResult, JobSubmission};
use crate::loader::LoadingContext;

/// Submit `job` and return as soon as the cluster acknowledged it.
pub async fn submit_job(client: &ClientHandle, job: &JobDescription) -> Result<JobSubmission> {
    let job_id = client.submit_job(job).await?;
    info!("Job {} ({}) submitted to cluster {}", job_id, job.name, client.cluster());

    Ok(JobSubmission {
        job_id,
        accepted_at: Utc::now(),
    })
}

/// Submit `job` and wait for its final result.
///
/// User values in the result are decoded through `context`.
pub async fn submit_job_and_wait_for_result(
    client: &ClientHandle,
    job: &JobDescription,
    context: &dyn LoadingContext,
) -> Result<JobExecutionResult> {
    let submission = submit_job(client, job).await?;
    info!("Waiting for job {} to finish", submission.job_id);

    let remote = client.request_job_result(&submission.job_id).await?;

    if remote.job_id != submission.job_id {
        return Err(ExecutorError::Execution(format!(
            "Cluster reported a result for job {} while waiting for {}",
            remote.job_id, submission.job_id
        )));
    }

    let result = remote.into_execution_result(context)?;
    info!(
        "Job {} finished in {} ms",
        result.job_id,
        result.net_runtime.as_millis()
    );
    Ok(result)
}
