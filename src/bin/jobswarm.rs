//! jobswarm CLI: operator interface to the job queue.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use jobswarm::config::Config;
use jobswarm::db::Db;
use jobswarm::entity::EntityKey;
use jobswarm::filter::Filter;
use jobswarm::model::{Job, NewJob};
use jobswarm::telemetry::{TelemetryConfig, init_telemetry};
use jobswarm::{Controller, JobSwarm};
use secrecy::ExposeSecret;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "jobswarm", about = "Job queue coordinator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create an open job (chunked into siblings if the payload is oversized)
    Create {
        /// Job name
        name: String,
        /// Job type
        #[arg(long = "type")]
        job_type: Option<String>,
        /// Opaque payload
        #[arg(long)]
        data: Option<String>,
        /// Delimiter for splitting an oversized payload
        #[arg(long)]
        split_by: Option<String>,
    },
    /// Show the next open job
    Next {
        #[arg(long)]
        name: Option<String>,
        #[arg(long = "type")]
        job_type: Option<String>,
        /// Let the store sort and return a single match
        #[arg(long)]
        last_job_only: bool,
    },
    /// List active jobs
    Active {
        #[arg(long)]
        name: Option<String>,
        #[arg(long = "type")]
        job_type: Option<String>,
    },
    /// Move a job to a new status
    Transition {
        /// Job ID (UUID)
        id: Uuid,
        /// Collection the job lives in (defaults to the configured kind)
        #[arg(long)]
        kind: Option<String>,
        #[command(subcommand)]
        action: TransitionAction,
    },
    /// List jobs matching a JSON filter (controller only)
    List {
        /// e.g. '{"where":{"status":"open"},"order":"created","limit":10}'
        #[arg(long)]
        filter: String,
    },
    /// List stale active and reserved jobs (controller only)
    Stale {
        #[arg(long = "type")]
        job_type: Option<String>,
    },
    /// Delete every job matching a JSON filter (controller only)
    Delete {
        #[arg(long)]
        filter: String,
    },
}

#[derive(Subcommand)]
enum TransitionAction {
    Activate,
    Complete,
    /// Complete with an error
    Fail {
        #[arg(long)]
        error: String,
    },
    Skip,
    Stale,
    Reserve {
        #[arg(long)]
        claimant: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = Config::from_env()?;
    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "jobswarm".to_string(),
        log_level: config.log_level.clone(),
    })?;

    let db = Db::connect(config.database_url.expose_secret(), &config.swarm.project_id).await?;
    db.migrate().await?;
    let swarm = JobSwarm::new(config.swarm, Arc::new(db))?;

    match cli.command {
        Command::Create {
            name,
            job_type,
            data,
            split_by,
        } => cmd_create(&swarm, name, job_type, data, split_by).await,
        Command::Next {
            name,
            job_type,
            last_job_only,
        } => {
            let job = swarm
                .get_next_job(name.as_deref(), job_type.as_deref(), last_job_only)
                .await?;
            match job {
                Some(job) => print_job(&job),
                None => {
                    println!("No open jobs found.");
                    Ok(())
                }
            }
        }
        Command::Active { name, job_type } => {
            let jobs = swarm
                .get_existing_active_jobs(name.as_deref(), job_type.as_deref())
                .await?;
            print_jobs(&jobs);
            Ok(())
        }
        Command::Transition { id, kind, action } => {
            cmd_transition(&swarm, id, kind, action).await
        }
        Command::List { filter } => {
            let controller = swarm.into_controller()?;
            let jobs = controller.get_jobs(&parse_filter(&filter)?).await?;
            print_jobs(&jobs);
            Ok(())
        }
        Command::Stale { job_type } => {
            let controller = swarm.into_controller()?;
            let jobs = controller.get_stale_jobs(job_type.as_deref()).await?;
            print_jobs(&jobs);
            Ok(())
        }
        Command::Delete { filter } => cmd_delete(swarm.into_controller()?, &filter).await,
    }
}

async fn cmd_create(
    swarm: &JobSwarm,
    name: String,
    job_type: Option<String>,
    data: Option<String>,
    split_by: Option<String>,
) -> anyhow::Result<()> {
    let mut new = NewJob::new(name);
    if let Some(job_type) = job_type {
        new = new.job_type(job_type);
    }
    if let Some(data) = data {
        new = new.data(data);
    }
    if let Some(delimiter) = split_by {
        new = new.split_by(delimiter);
    }

    let result = swarm.create_open_job(new).await?;
    println!("Created {} job record(s)", result.count);
    Ok(())
}

async fn cmd_transition(
    swarm: &JobSwarm,
    id: Uuid,
    kind: Option<String>,
    action: TransitionAction,
) -> anyhow::Result<()> {
    let config = swarm.config();
    let kind = kind.unwrap_or_else(|| config.entity_kind.clone());
    let key = EntityKey::new(config.namespace.clone(), kind, id);
    let Some(job) = swarm.get_job(&key).await? else {
        anyhow::bail!("no job with key {key}");
    };

    let result = match action {
        TransitionAction::Activate => swarm.activate_job(&job).await?,
        TransitionAction::Complete => swarm.complete_job(&job).await?,
        TransitionAction::Fail { error } => swarm.complete_job_with_error(&job, error).await?,
        TransitionAction::Skip => swarm.skip_job(&job).await?,
        TransitionAction::Stale => swarm.mark_job_stale(&job).await?,
        TransitionAction::Reserve { claimant } => swarm.reserve_job(&job, claimant).await?,
    };
    println!("Updated {} record(s): {key}", result.count);
    Ok(())
}

async fn cmd_delete(controller: Controller, filter: &str) -> anyhow::Result<()> {
    let result = controller.delete_jobs(&parse_filter(filter)?).await?;
    println!("Deleted {} record(s)", result.count);
    Ok(())
}

fn parse_filter(json: &str) -> anyhow::Result<Filter> {
    let value: serde_json::Value = serde_json::from_str(json)?;
    Ok(Filter::from_json(&value)?)
}

fn print_jobs(jobs: &[Job]) {
    if jobs.is_empty() {
        println!("No jobs found.");
        return;
    }

    println!(
        "{:<8}  {:<24}  {:<12}  {:<9}  CREATED",
        "ID", "NAME", "TYPE", "STATUS"
    );
    println!("{}", "-".repeat(80));

    for job in jobs {
        let id = job
            .key
            .as_ref()
            .map(|key| key.id.to_string())
            .unwrap_or_default();
        let short_id = id.get(..8).unwrap_or(&id);
        let name = job.name.get(..24).unwrap_or(&job.name);
        println!(
            "{:<8}  {:<24}  {:<12}  {:<9}  {}",
            short_id,
            name,
            job.job_type.as_deref().unwrap_or("-"),
            job.status.as_str(),
            job.created.format("%Y-%m-%d %H:%M:%S")
        );
    }

    println!("\n{} job(s)", jobs.len());
}

fn print_job(job: &Job) -> anyhow::Result<()> {
    if let Some(ref key) = job.key {
        println!("Key:        {key}");
    }
    println!("{}", serde_json::to_string_pretty(job)?);
    Ok(())
}
