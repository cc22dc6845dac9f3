//! CLI entry point for energy-ingest.

use std::path::PathBuf;
use std::process::ExitCode;

use chrono::{Datelike, Local, NaiveDate};
use clap::{Args, Parser, Subcommand};
use energy_ingest::{Config, Orchestrator, Result, RunLog, RunSummary, SourceType};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "energy-ingest", version)]
#[command(about = "Fetch, archive and persist Elia solar/wind data and Belpex prices", long_about = None)]
struct Cli {
    /// JSON configuration file; built-in defaults apply when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Treat this date as today (YYYY-MM-DD)
    #[arg(long, global = true)]
    today: Option<NaiveDate>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch missing periods and archive closed ones, without touching the database
    Update(RangeArgs),
    /// Replay everything stored on disk into the database
    Persist(SourceArgs),
    /// Update, then persist (the unattended job)
    Auto(RangeArgs),
}

#[derive(Args, Debug)]
struct RangeArgs {
    /// First year to fetch (default: last year)
    #[arg(long)]
    from_year: Option<i32>,

    /// Last year to fetch (default: this year)
    #[arg(long)]
    to_year: Option<i32>,

    #[command(flatten)]
    sources: SourceArgs,
}

#[derive(Args, Debug)]
struct SourceArgs {
    /// Sources to process, comma separated (default: solar,wind,price)
    #[arg(long = "source", value_delimiter = ',')]
    sources: Vec<SourceType>,
}

impl SourceArgs {
    fn selected(&self) -> Vec<SourceType> {
        if self.sources.is_empty() {
            SourceType::ALL.to_vec()
        } else {
            self.sources.clone()
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_file(path),
        None => Ok(Config::default()),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("energy-ingest: {}", e);
            return ExitCode::from(2);
        }
    };

    let today = cli.today.unwrap_or_else(|| Local::now().date_naive());
    let log = match RunLog::open(&config.paths.log_dir, today) {
        Ok(log) => log,
        Err(e) => {
            eprintln!("energy-ingest: cannot open run log: {}", e);
            return ExitCode::from(2);
        }
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    let _guard = log.install(filter);

    match run(cli.command, config, log, today).await {
        Ok(summary) => {
            println!("{}", summary);
            if summary.has_failures() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(e) => {
            error!(error = %e, "Run aborted");
            ExitCode::from(2)
        }
    }
}

async fn run(command: Command, config: Config, log: RunLog, today: NaiveDate) -> Result<RunSummary> {
    let orchestrator = Orchestrator::from_config(config)
        .await?
        .with_reference_date(today)
        .with_log(log);
    info!(command = ?command, "energy-ingest starting");

    let result = match &command {
        Command::Update(range) => {
            let (from, to) = range.years(today);
            orchestrator
                .fetch_and_archive(from, to, &range.sources.selected())
                .await
        }
        Command::Persist(sources) => orchestrator.persist(&sources.selected()).await,
        Command::Auto(range) => {
            let (from, to) = range.years(today);
            let sources = range.sources.selected();
            match orchestrator.fetch_and_archive(from, to, &sources).await {
                Ok(mut summary) => orchestrator.persist(&sources).await.map(|persisted| {
                    summary.merge(persisted);
                    summary
                }),
                Err(e) => Err(e),
            }
        }
    };

    orchestrator.close().await;
    result
}

impl RangeArgs {
    fn years(&self, today: NaiveDate) -> (i32, i32) {
        (
            self.from_year.unwrap_or(today.year() - 1),
            self.to_year.unwrap_or(today.year()),
        )
    }
}
