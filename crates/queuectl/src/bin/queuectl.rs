use clap::{Parser, Subcommand};
use queuectl::config::Config;
use queuectl::jobs::{Job, JobState, JobStore, NewJob, SettingsRepo};
use queuectl::observability;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "queuectl", about = "Background job queue control")]
struct Cli {
    /// Directory holding jobs.json, dlq.json and config.json.
    #[arg(long, global = true, env = "QUEUECTL_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Add a job, e.g. '{"id":"job1","command":"echo hi"}'
    Enqueue { job_json: String },
    /// List live jobs
    List {
        #[arg(long)]
        state: Option<JobState>,
    },
    /// Job counts by state
    Status,
    /// Dead letter queue
    Dlq {
        #[command(subcommand)]
        command: DlqCommand,
    },
    /// Retry settings
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Subcommand)]
enum DlqCommand {
    List,
    /// Move a dead job back to pending with attempts reset
    Retry { id: String },
}

#[derive(Subcommand)]
enum ConfigCommand {
    Get { key: Option<String> },
    Set { key: String, value: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = Config::from_env()?;
    observability::init(cfg.log_json);

    let data_dir = cli.data_dir.unwrap_or(cfg.data_dir);
    let store = JobStore::open(&data_dir).await?;
    let settings = SettingsRepo::new(&data_dir);

    match cli.command {
        Command::Enqueue { job_json } => {
            let new = NewJob::from_json(&job_json)?;
            let job = store.enqueue(new).await?;
            println!("Job '{}' enqueued successfully.", job.id);
        }
        Command::List { state } => {
            let jobs = store.list(state).await?;
            let label = state.map(|s| s.as_str()).unwrap_or("all");
            print_jobs(&format!("Jobs (state: {label})"), &jobs);
        }
        Command::Status => {
            let summary = store.summary().await?;
            let dead = store.list_dead().await?.len();
            println!("Job Status Summary:");
            if summary.is_empty() && dead == 0 {
                println!("  No jobs found.");
            }
            for (st, count) in &summary {
                println!("  {st}: {count}");
            }
            if dead > 0 {
                println!("  dead (dlq): {dead}");
            }
        }
        Command::Dlq { command } => match command {
            DlqCommand::List => print_jobs("Dead letter queue", &store.list_dead().await?),
            DlqCommand::Retry { id } => {
                if store.resurrect(&id).await? {
                    println!("Job '{id}' moved back to pending.");
                } else {
                    eprintln!("Job '{id}' is not in the DLQ.");
                    std::process::exit(1);
                }
            }
        },
        Command::Config { command } => match command {
            ConfigCommand::Get { key: Some(key) } => {
                println!("{}", settings.get_value(&key).await?);
            }
            ConfigCommand::Get { key: None } => {
                println!("{}", serde_json::to_string_pretty(&settings.get().await?)?);
            }
            ConfigCommand::Set { key, value } => {
                settings.set(&key, &value).await?;
                println!("{key} = {}", value.trim());
            }
        },
    }

    Ok(())
}

fn print_jobs(title: &str, jobs: &[Job]) {
    if jobs.is_empty() {
        println!("No jobs found.");
        return;
    }
    println!("{title}:");
    for j in jobs {
        println!(
            "- {} | {} | {} | attempts={}",
            j.id, j.command, j.state, j.attempts
        );
    }
}
