use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use session_executor::config::{load_configuration, resolve_config_path};
use session_executor::{
    Configuration, DataflowPipeline, ExecutionTarget, JobResult, create_executor, options,
};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "session-executor")]
#[command(about = "Submit dataflow pipelines to a running session cluster")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct JobArgs {
    /// Pipeline definition (JSON)
    #[arg(short, long)]
    pipeline: PathBuf,
    /// Configuration file; defaults to $SESSION_EXECUTOR_CONFIG or ./executor.json
    #[arg(short, long, env = "SESSION_EXECUTOR_CONFIG")]
    config: Option<PathBuf>,
    /// Override a configuration entry, e.g. -D rest.address=jobmanager
    #[arg(short = 'D', value_name = "KEY=VALUE")]
    properties: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a pipeline to the configured session cluster
    Submit {
        #[command(flatten)]
        job: JobArgs,
        /// Wait for the job to finish and print its result
        #[arg(long, default_value_t = false)]
        attached: bool,
        /// Cluster backend to target (sets execution.target)
        #[arg(long)]
        target: Option<ExecutionTarget>,
    },
    /// Resolve libraries and print the job description without submitting
    Describe {
        #[command(flatten)]
        job: JobArgs,
    },
}

fn read_configuration(job: &JobArgs) -> Result<Configuration> {
    let mut configuration = match &job.config {
        Some(path) => load_configuration(Some(path.clone()))?,
        None => match resolve_config_path(None) {
            Ok(path) => load_configuration(Some(path))?,
            Err(_) => Configuration::new(),
        },
    };
    for property in &job.properties {
        configuration.set_property(property)?;
    }
    Ok(configuration)
}

fn read_pipeline(path: &Path) -> Result<DataflowPipeline> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read pipeline {}", path.display()))?;
    DataflowPipeline::from_json(&raw)
}

fn log_filter() -> Result<EnvFilter> {
    Ok(EnvFilter::from_default_env()
        .add_directive("session_executor=info".parse()?)
        .add_directive("reqwest=warn".parse()?))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(log_filter()?)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let executor = create_executor();

    match cli.command {
        Commands::Submit {
            job,
            attached,
            target,
        } => {
            let pipeline = read_pipeline(&job.pipeline)?;
            let mut configuration = read_configuration(&job)?;
            if attached {
                configuration.set(options::ATTACHED, true);
            }
            if let Some(target) = target {
                configuration.set(options::TARGET, target.into_inner());
            }

            info!(
                "Submitting pipeline from {} ({} configuration entries)",
                job.pipeline.display(),
                configuration.len()
            );
            let result = executor.execute(&pipeline, &configuration).await?;

            match &result {
                JobResult::Detached(submission) => {
                    println!("Job {} submitted", submission.job_id);
                }
                JobResult::Completed(finished) => {
                    println!(
                        "Job {} finished in {} ms",
                        finished.job_id,
                        finished.net_runtime.as_millis()
                    );
                }
            }
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Describe { job } => {
            let pipeline = read_pipeline(&job.pipeline)?;
            let configuration = read_configuration(&job)?;

            let description = executor.describe(&pipeline, &configuration).await?;
            println!("{}", serde_json::to_string_pretty(&description)?);
        }
    }

    Ok(())
}
