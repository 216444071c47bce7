//! Admin CLI: inspect and mutate jobs and triggers in a running store
//! without going through a live `Scheduler`.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;

use quartz_core::config::SchedulerConfig;
use quartz_core::model::{GroupMatcher, JobKey, Trigger, TriggerKey, TriggerSchedule};
use quartz_core::registry::JobRegistry;
use quartz_core::store::sql::PostgresJobStore;
use quartz_core::store::JobStore;

#[derive(Parser)]
#[command(name = "quartzctl")]
#[command(about = "Inspect and control a quartzd job store")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List job keys, optionally restricted to a group
    Jobs {
        #[arg(long)]
        group: Option<String>,
    },
    /// List trigger keys, optionally restricted to a group
    Triggers {
        #[arg(long)]
        group: Option<String>,
    },
    /// Show a single trigger's current state
    Inspect { name: String, group: Option<String> },
    /// Schedule a one-shot trigger against an existing job, firing immediately
    FireNow { job_name: String, job_group: Option<String> },
    Pause { name: String, group: Option<String> },
    Resume { name: String, group: Option<String> },
    PauseJob { name: String, group: Option<String> },
    ResumeJob { name: String, group: Option<String> },
    RemoveTrigger { name: String, group: Option<String> },
    RemoveJob { name: String, group: Option<String> },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let store = connect().await?;

    match cli.command {
        Commands::Jobs { group } => cmd_jobs(&store, group).await,
        Commands::Triggers { group } => cmd_triggers(&store, group).await,
        Commands::Inspect { name, group } => cmd_inspect(&store, name, group).await,
        Commands::FireNow { job_name, job_group } => cmd_fire_now(&store, job_name, job_group).await,
        Commands::Pause { name, group } => {
            store.pause_trigger(&TriggerKey::new(name, group)?).await?;
            println!("paused");
            Ok(())
        }
        Commands::Resume { name, group } => {
            store.resume_trigger(&TriggerKey::new(name, group)?).await?;
            println!("resumed");
            Ok(())
        }
        Commands::PauseJob { name, group } => {
            store.pause_job(&JobKey::new(name, group)?).await?;
            println!("paused");
            Ok(())
        }
        Commands::ResumeJob { name, group } => {
            store.resume_job(&JobKey::new(name, group)?).await?;
            println!("resumed");
            Ok(())
        }
        Commands::RemoveTrigger { name, group } => {
            let removed = store.remove_trigger(&TriggerKey::new(name, group)?).await?;
            println!("{}", if removed { "removed" } else { "not found" });
            Ok(())
        }
        Commands::RemoveJob { name, group } => {
            let removed = store.remove_job(&JobKey::new(name, group)?).await?;
            println!("{}", if removed { "removed" } else { "not found" });
            Ok(())
        }
    }
}

async fn connect() -> Result<Arc<dyn JobStore>> {
    let config = SchedulerConfig::from_env().context("failed to load scheduler configuration")?;
    let database_url = config.database_url.context("DATABASE_URL must be set for quartzctl")?;
    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&database_url)
        .await
        .context("failed to connect to database")?;
    // quartzctl operates on the store directly, outside any running
    // scheduler process, so it has no handlers to register; capability
    // resolution falls back to each JobDetail's own override, if any.
    let registry = Arc::new(JobRegistry::new());
    Ok(Arc::new(PostgresJobStore::new(pool, config.instance_name, registry)))
}

async fn cmd_jobs(store: &Arc<dyn JobStore>, group: Option<String>) -> Result<()> {
    let matcher = group.map(GroupMatcher::Equals).unwrap_or(GroupMatcher::Any);
    let keys = store.get_job_keys(&matcher).await?;
    for key in keys {
        println!("{key}");
    }
    Ok(())
}

async fn cmd_triggers(store: &Arc<dyn JobStore>, group: Option<String>) -> Result<()> {
    let matcher = group.map(GroupMatcher::Equals).unwrap_or(GroupMatcher::Any);
    let keys = store.get_trigger_keys(&matcher).await?;
    for key in keys {
        println!("{key}");
    }
    Ok(())
}

async fn cmd_inspect(store: &Arc<dyn JobStore>, name: String, group: Option<String>) -> Result<()> {
    let key = TriggerKey::new(name, group)?;
    match store.retrieve_trigger(&key).await? {
        Some(trigger) => {
            println!("key:             {}", trigger.key);
            println!("job:             {}", trigger.job_key);
            println!("state:           {:?}", trigger.state);
            println!("next_fire_time:  {:?}", trigger.next_fire_time);
            println!("prev_fire_time:  {:?}", trigger.previous_fire_time);
            println!("priority:        {}", trigger.priority);
            println!("misfire_policy:  {:?}", trigger.misfire_policy);
        }
        None => println!("no such trigger: {key}"),
    }
    Ok(())
}

/// Schedules an ad hoc, immediately-due, non-repeating trigger against an
/// existing job. Useful for testing a registered job handler by hand.
async fn cmd_fire_now(store: &Arc<dyn JobStore>, job_name: String, job_group: Option<String>) -> Result<()> {
    let job_key = JobKey::new(job_name, job_group)?;
    if store.retrieve_job(&job_key).await?.is_none() {
        anyhow::bail!("no such job: {job_key}");
    }

    let now = chrono::Utc::now();
    let trigger = Trigger::builder()
        .key(TriggerKey::new(format!("fire-now-{}", uuid::Uuid::new_v4()), Some(job_key.group.clone()))?)
        .job_key(job_key)
        .start_time(now)
        .schedule(TriggerSchedule::Simple { repeat_interval_ms: 0, repeat_count: 0 })
        .build();
    let mut trigger = trigger;
    trigger.next_fire_time = Some(now);

    store.store_trigger(trigger, false).await?;
    println!("scheduled");
    Ok(())
}
