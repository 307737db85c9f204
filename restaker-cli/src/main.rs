//! Restaker CLI
//!
//! Runs the claim-and-restake workflow once, on a cron schedule, or checks a
//! countdown string against a threshold without starting a browser.
//!
//! Usage:
//!   restaker run                              # One run, exit 1 if it failed
//!   restaker schedule --cron "0 */10 * * * *" # Unattended, until Ctrl-C
//!   restaker check "2 hrs, 3 mins" --threshold-secs 900

use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use restaker::{
    parse_countdown, Collaborators, Countdown, EligibilityDecision, JsonStatusReporter,
    RestakeWorkflow, RunReport, WalletSelectors, WorkflowConfig,
};
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

mod config_args;
mod run_summary;

use config_args::{ResolvedRun, WorkflowArgs};

#[derive(Parser)]
#[command(name = "restaker")]
#[command(about = "Claim and restake bonds shortly before each rebase")]
#[command(
    long_about = "Restaker drives a staking dashboard through a browser wallet: it reads the countdown to the next rebase and, when it is within the threshold, claims and restakes every bond in one transaction. Settings come from flags, environment variables, or a .env file."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute one run and write the status file
    Run(RunArgs),
    /// Execute runs on a cron schedule until interrupted
    Schedule(ScheduleArgs),
    /// Parse a countdown string and show the eligibility decision
    Check(CheckArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    workflow: WorkflowArgs,
}

#[derive(Args, Debug)]
struct ScheduleArgs {
    /// Cron expression with a seconds field, e.g. "0 */10 * * * *"
    #[arg(long, env = "RESTAKER_CRON")]
    cron: String,

    #[command(flatten)]
    workflow: WorkflowArgs,
}

#[derive(Args, Debug)]
struct CheckArgs {
    /// Countdown text as shown on the dashboard, e.g. "2 days, 2 hrs, 52 mins"
    text: String,

    #[arg(long, env = "ELIGIBILITY_THRESHOLD_SECS")]
    threshold_secs: u64,
}

fn init_logging() {
    use tracing_appender::rolling;
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let log_dir = if let Ok(custom_dir) = std::env::var("RESTAKER_LOG_DIR") {
        std::path::PathBuf::from(custom_dir)
    } else {
        dirs::data_local_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("restaker")
            .join("logs")
    };

    let _ = std::fs::create_dir_all(&log_dir);

    let file_appender = rolling::daily(&log_dir, "restaker.log");

    let _ = tracing_subscriber::registry()
        .with(
            // Respect RUST_LOG if provided, else default to info
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_appender)
                .with_ansi(false)
                .with_target(true)
                .with_file(true)
                .with_line_number(true),
        )
        .try_init();
}

#[tokio::main]
async fn main() {
    // A missing .env is fine; the environment may already be populated.
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging();

    let result = match cli.command {
        Commands::Run(args) => run_command(args).await,
        Commands::Schedule(args) => schedule_command(args).await,
        Commands::Check(args) => check_command(args),
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("{e:#}");
            eprintln!("❌ {e:#}");
            std::process::exit(2);
        }
    }
}

async fn run_command(args: RunArgs) -> Result<i32> {
    let ResolvedRun {
        config,
        selectors,
        status_path,
    } = args.workflow.resolve()?;

    let report = run_once(config, selectors, &status_path).await;
    run_summary::display(&report);
    Ok(if report.outcome.is_ok() { 0 } else { 1 })
}

async fn run_once(config: WorkflowConfig, selectors: WalletSelectors, status_path: &Path) -> RunReport {
    let workflow = RestakeWorkflow::new(config, Collaborators::chrome_metamask(selectors));
    let reporter = JsonStatusReporter::new(status_path);
    workflow.run_and_report(&reporter).await
}

async fn schedule_command(args: ScheduleArgs) -> Result<i32> {
    let run = Arc::new(args.workflow.resolve()?);
    // Held for the whole of a run; a tick that cannot take it is skipped.
    let in_flight = Arc::new(Mutex::new(()));
    let shutdown_gate = in_flight.clone();

    let mut scheduler = JobScheduler::new()
        .await
        .map_err(|e| anyhow!("Failed to create scheduler: {e}"))?;

    let job = Job::new_async(args.cron.as_str(), move |_id, _scheduler| {
        let run = run.clone();
        let in_flight = in_flight.clone();
        Box::pin(async move {
            let Ok(_running) = in_flight.try_lock() else {
                warn!("Previous run still in progress, skipping this tick");
                return;
            };
            info!("Scheduled run starting");
            let report = run_once(run.config.clone(), run.selectors.clone(), &run.status_path).await;
            info!(
                outcome = %report.outcome,
                message = %report.message(),
                "Scheduled run finished"
            );
        })
    })
    .map_err(|e| anyhow!("Invalid cron expression '{}': {e}", args.cron))?;

    scheduler
        .add(job)
        .await
        .map_err(|e| anyhow!("Failed to schedule job: {e}"))?;
    scheduler
        .start()
        .await
        .map_err(|e| anyhow!("Failed to start scheduler: {e}"))?;
    info!(cron = %args.cron, "Scheduler started, press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutting down scheduler");
    scheduler
        .shutdown()
        .await
        .map_err(|e| anyhow!("Failed to stop scheduler: {e}"))?;

    // Let a run that is still going finish its cleanup.
    let _finished = shutdown_gate.lock().await;
    Ok(0)
}

fn check_command(args: CheckArgs) -> Result<i32> {
    let remaining = parse_countdown(&args.text)
        .with_context(|| format!("Cannot parse countdown '{}'", args.text))?;
    let decision = EligibilityDecision::evaluate(remaining, Countdown::from_secs(args.threshold_secs));
    println!("{}", run_summary::describe_decision(&decision));
    Ok(0)
}
