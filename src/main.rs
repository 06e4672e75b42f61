use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use plume::clock::{Clock, SystemClock};
use plume::config::Config;
use plume::generator::LlmGenerator;
use plume::plan::PlanGenerator;
use plume::publisher::ThreadsClient;
use plume::scheduler::{ExecutionLoop, RunMode};
use plume::storage::{SqliteStateStore, StateStore};

#[derive(Parser)]
#[command(
    name = "plume",
    version,
    about = "Paced social posting scheduler with deterministic daily plans",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to a TOML configuration file (environment variables override it)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json)
    #[arg(long, global = true, default_value = "text")]
    log_format: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the posting execution loop
    Run {
        /// Exit after the current day instead of running as a daemon
        #[arg(long, default_value = "false")]
        once: bool,
    },

    /// Print the generated plan for a date without executing it
    Plan {
        /// Date to plan (YYYY-MM-DD, defaults to today)
        #[arg(short, long)]
        date: Option<NaiveDate>,

        /// Override the plan seed
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Show stored plan, quota and outcomes for a date
    Status {
        /// Date to inspect (YYYY-MM-DD, defaults to today)
        #[arg(short, long)]
        date: Option<NaiveDate>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_tracing(&cli.log_format, cli.verbose)?;

    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };
    config.validate()?;

    match cli.command {
        Commands::Run { once } => run(config, once).await?,
        Commands::Plan { date, seed } => plan(config, date, seed)?,
        Commands::Status { date } => status(config, date)?,
    }

    Ok(())
}

fn setup_tracing(format: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("plume=debug,info")
    } else {
        tracing_subscriber::EnvFilter::new("plume=info,warn")
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}

async fn run(config: Config, once: bool) -> Result<()> {
    let store: Arc<dyn StateStore> = Arc::new(SqliteStateStore::new(&config.database.sqlite_path)?);
    let generator = Arc::new(LlmGenerator::new(config.generator.clone())?);
    let publisher = Arc::new(ThreadsClient::new(config.api.clone())?);
    let clock = Arc::new(SystemClock::new(config.posting.tz()?));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, shutting down after current slot");
            let _ = shutdown_tx.send(true);
        }
    });

    let mode = if once {
        RunMode::SingleDay
    } else {
        RunMode::Daemon
    };

    let mut exec = ExecutionLoop::new(&config, store, generator, publisher, clock)?
        .with_mode(mode)
        .with_shutdown(shutdown_rx);

    match exec.run().await {
        Ok(summary) => {
            println!(
                "Run finished ({:?}): {} cycle(s), {} post(s) published",
                summary.reason,
                summary.attempts.len(),
                summary.posts_published()
            );
            Ok(())
        }
        Err(err) => {
            tracing::error!(
                category = ?err.category(),
                recoverable = err.is_recoverable(),
                error = %err,
                "Execution loop aborted"
            );
            Err(err.into())
        }
    }
}

fn plan(mut config: Config, date: Option<NaiveDate>, seed: Option<u64>) -> Result<()> {
    if seed.is_some() {
        config.posting.plan_seed = seed;
    }

    let clock = SystemClock::new(config.posting.tz()?);
    let date = date.unwrap_or_else(|| clock.now().date_naive());

    let generator = PlanGenerator::from_config(&config.posting)?;
    let plan = generator.generate(date);
    print!("{}", plan.display());
    Ok(())
}

fn status(config: Config, date: Option<NaiveDate>) -> Result<()> {
    let clock = SystemClock::new(config.posting.tz()?);
    let date = date.unwrap_or_else(|| clock.now().date_naive());

    let store = SqliteStateStore::new(&config.database.sqlite_path)?;

    match store.load_plan(date)? {
        Some(plan) => print!("{}", plan.display()),
        None => println!("No plan stored for {date}"),
    }

    match store.load_quota(date)? {
        Some(quota) => {
            println!(
                "Quota: {}/{} posts, last at {}",
                quota.posts_made,
                config.posting.max_posts_per_day,
                quota
                    .last_post_at
                    .map(|t| t.format("%H:%M:%S").to_string())
                    .unwrap_or_else(|| "-".to_string())
            );
        }
        None => println!("Quota: no posts recorded"),
    }

    let outcomes = store.slot_outcomes(date)?;
    if outcomes.is_empty() {
        println!("Outcomes: none");
    } else {
        println!("Outcomes:");
        for (index, outcome) in &outcomes {
            println!("  #{index} {}", outcome.kind());
        }
    }

    Ok(())
}
