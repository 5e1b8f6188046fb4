use crawl_scout::checkpoint::Checkpoint;
use crawl_scout::circuit::{CircuitController, run_rotation};
use crawl_scout::cli::{Cli, Commands, CrawlArgs};
use crawl_scout::config::ConfigError;
use crawl_scout::crawler::{CrawlError, CrawlReport, StopReason};
use crawl_scout::export::{ExportError, run_scrape};
use crawl_scout::logging::init_logging_in_data_dir;
use crawl_scout::orchestration::{build_crawler, setup_shutdown_handler};
use crawl_scout::parsing_modules::{known_parsers, parser_for};
use crawl_scout::sync::{SyncCommand, SyncError};
use std::path::Path;
use std::process::ExitCode;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};

#[derive(Error, Debug)]
pub enum MainError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Crawl error: {0}")]
    Crawl(#[from] CrawlError),

    #[error("Crawl stopped on fetch failure: {0}")]
    FetchFailed(String),

    #[error("Scrape error: {0}")]
    Export(#[from] ExportError),

    #[error("Sync command error: {0}")]
    Sync(#[from] SyncError),

    #[error("Unknown parser '{0}' (known: {1})")]
    UnknownParser(String, String),

    #[error("Logging error: {0}")]
    Logging(String),
}

impl MainError {
    /// 3 for configuration and storage problems, 4 for the network.
    fn exit_code(&self) -> u8 {
        match self {
            MainError::Crawl(CrawlError::Network(_)) | MainError::FetchFailed(_) => 4,
            _ => 3,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse_args();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "exiting with error");
            eprintln!("Error: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run(cli: Cli) -> Result<(), MainError> {
    match cli.command {
        Commands::Crawl(args) => {
            init_logging(&args.data_dir, &cli.log_level)?;
            crawl(args).await
        }

        Commands::RotateCircuits {
            control_addr,
            control_password,
            period,
            data_dir,
        } => {
            init_logging(&data_dir, &cli.log_level)?;
            let signals = setup_shutdown_handler();
            let controller = CircuitController::new(control_addr, control_password);
            let rotations = run_rotation(&controller, Duration::from_secs(period.max(1)), signals.stop_rx).await;
            println!("Requested {rotations} new circuit identities");
            Ok(())
        }

        Commands::Scrape {
            target,
            parser,
            data_dir,
            output,
        } => {
            init_logging(&data_dir, &cli.log_level)?;
            let name = parser.unwrap_or_else(|| target.clone());
            let parser = parser_for(&name)
                .ok_or_else(|| MainError::UnknownParser(name.clone(), known_parsers().join(", ")))?;

            let summary = run_scrape(parser.as_ref(), &data_dir, &target, &output)?;
            println!(
                "Scraped {} pages: {} products, {} vendors, {} reviews ({} invalid, {} failed)",
                summary.pages,
                summary.products,
                summary.vendors,
                summary.reviews,
                summary.invalid,
                summary.failed
            );
            Ok(())
        }
    }
}

fn init_logging(data_dir: &Path, level: &str) -> Result<(), MainError> {
    std::fs::create_dir_all(data_dir).map_err(|e| MainError::Logging(e.to_string()))?;
    init_logging_in_data_dir(data_dir, level).map_err(|e| MainError::Logging(e.to_string()))
}

async fn crawl(args: CrawlArgs) -> Result<(), MainError> {
    let config = args.to_config()?;
    let sync = args
        .sync_command
        .as_deref()
        .map(str::parse::<SyncCommand>)
        .transpose()?;

    let signals = setup_shutdown_handler();

    let rotation = args.rotate_circuits.then(|| {
        let controller = CircuitController::new(args.control_addr.clone(), args.control_password.clone());
        let rx = signals.stop_rx.clone();
        tokio::spawn(async move {
            run_rotation(&controller, Duration::from_secs(crawl_scout::config::Config::CIRCUIT_ROTATION_SECS), rx).await
        })
    });

    let mut crawler = build_crawler(&config)?;
    crawler.set_abort_signal(signals.abort_rx.clone());
    let result = crawler.run(signals.stop_rx.clone()).await;

    // Stop the rotation task whatever the crawl outcome was.
    let _ = signals.stop_tx.send(true);
    if let Some(handle) = rotation
        && let Ok(rotations) = handle.await
    {
        info!(rotations, "circuit rotation task joined");
    }

    let report = result?;
    print_report(&report);

    match &report.stop_reason {
        StopReason::FetchFailed(e) => return Err(MainError::FetchFailed(e.to_string())),
        StopReason::Interrupted => {
            info!("interrupted, skipping resource sync");
            return Ok(());
        }
        _ => {}
    }

    if let Some(sync) = sync {
        let dir = Checkpoint::new(&config.data_dir, &config.target).dir().to_path_buf();
        sync.run_logged(&dir, &config.target).await;
    }
    Ok(())
}

fn print_report(report: &CrawlReport) {
    println!("Crawl of '{}' stopped: {}", report.target, report.stop_reason);
    println!(
        "  {} requests, {} pages stored, {} captchas, {} failures, {} skipped",
        report.dispatched, report.completed, report.quarantined, report.failed, report.skipped
    );
    println!(
        "  {} URLs pending, {} deferred to the next run, {} graph entries, {:.1}s",
        report.frontier_remaining, report.deferred, report.graph_entries, report.elapsed_secs
    );
}
