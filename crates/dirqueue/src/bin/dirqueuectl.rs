//! dirqueuectl - operator tooling for the directory submission queue.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;

use dirqueue::config::{load_config, Config};
use dirqueue::db::job_repo::JobFilter;
use dirqueue::logging::{init_logging, LogFormat};
use dirqueue::{DirQueue, EnqueueRequest, JobStatus, PackageTier};

#[derive(Parser)]
#[command(
    name = "dirqueuectl",
    version,
    about = "Operate the directory submission queue",
    propagate_version = true
)]
struct Cli {
    /// Configuration file (JSON). Defaults apply when omitted.
    #[arg(short, long, global = true, env = "DIRQUEUE_CONFIG")]
    config: Option<PathBuf>,

    /// Overrides the configured database path
    #[arg(long, global = true, env = "DIRQUEUE_DATABASE")]
    database: Option<PathBuf>,

    #[arg(long, global = true, value_enum, default_value = "pretty")]
    log_format: LogFormatArg,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormatArg {
    Pretty,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Pretty => LogFormat::Pretty,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Queue a job for a customer
    Enqueue {
        #[arg(long)]
        customer: String,

        /// starter, growth, professional or enterprise
        #[arg(long)]
        tier: String,

        /// Allocated directory ids, in submission order
        #[arg(long, value_delimiter = ',', required = true)]
        directories: Vec<String>,
    },

    /// Engage the emergency stop
    Stop {
        #[arg(long)]
        reason: String,
    },

    /// Lift the emergency stop
    ClearStop,

    /// Stop handing out new jobs
    Pause,

    /// Resume handing out jobs
    Resume,

    /// Show progress of one job
    Progress { job_id: String },

    /// Show job and worker counts plus control state
    Status,

    /// Release jobs held by workers that stopped heartbeating
    Reap,

    /// List jobs, newest first
    Jobs {
        #[arg(long, value_parser = parse_status)]
        status: Option<JobStatus>,

        #[arg(long)]
        customer: Option<String>,

        #[arg(long)]
        tier: Option<PackageTier>,

        #[arg(long, default_value = "50")]
        limit: u64,

        #[arg(long, default_value = "0")]
        offset: u64,
    },

    /// Hand a claimed job back to the queue
    Release {
        job_id: String,

        #[arg(long, default_value = "released by operator")]
        reason: String,
    },

    /// List registered workers
    Workers,

    /// Run the liveness sweep in the foreground until interrupted
    Monitor,
}

fn parse_status(s: &str) -> Result<JobStatus, String> {
    JobStatus::parse(s).ok_or_else(|| format!("unknown job status '{}'", s))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn load(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => load_config(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(database) = &cli.database {
        config.database_path = Some(database.clone());
    }
    Ok(config)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.log_format.into(), "info") {
        bail!("failed to initialize logging: {}", e);
    }

    let app = DirQueue::open(load(&cli)?)?;

    match cli.command {
        Commands::Enqueue {
            customer,
            tier,
            directories,
        } => {
            let job = app
                .queue()
                .enqueue(&EnqueueRequest::new(customer, tier, directories))?;
            print_json(&job)?;
        }
        Commands::Stop { reason } => print_json(&app.control().emergency_stop(&reason)?)?,
        Commands::ClearStop => print_json(&app.control().clear_emergency_stop()?)?,
        Commands::Pause => print_json(&app.control().pause_queue()?)?,
        Commands::Resume => print_json(&app.control().resume_queue()?)?,
        Commands::Progress { job_id } => print_json(&app.reporter().progress(&job_id)?)?,
        Commands::Status => print_json(&app.reporter().queue_summary()?)?,
        Commands::Reap => print_json(&app.coordinator().reap_expired(Utc::now())?)?,
        Commands::Jobs {
            status,
            customer,
            tier,
            limit,
            offset,
        } => {
            let filter = JobFilter {
                status,
                customer_id: customer,
                package_tier: tier,
                limit: Some(limit),
                offset: Some(offset),
            };
            let (jobs, total) = app.queue().list(&filter)?;
            log::info!("Showing {} of {} job(s)", jobs.len(), total);
            print_json(&jobs)?;
        }
        Commands::Release { job_id, reason } => {
            let status = app.queue().release(&job_id, &reason)?;
            println!("{} -> {}", job_id, status);
        }
        Commands::Workers => print_json(&app.coordinator().list_workers()?)?,
        Commands::Monitor => {
            let (tx, rx) = crossbeam_channel::bounded::<()>(1);
            ctrlc::set_handler(move || {
                let _ = tx.try_send(());
            })
            .context("installing Ctrl-C handler")?;

            let monitor = app.start_liveness_monitor()?;
            log::info!(
                "Sweeping every {:?} (liveness window {:?}); Ctrl-C to stop",
                app.config().worker.heartbeat_interval(),
                app.config().worker.liveness_window()
            );
            let _ = rx.recv();
            monitor.stop();
        }
    }

    Ok(())
}
