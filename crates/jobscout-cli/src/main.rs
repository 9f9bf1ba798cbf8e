use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use jobscout_session::FixtureLauncher;
use jobscout_storage::PgJobStore;
use jobscout_sync::{
    build_store, load_extractor, orchestrator_from_env, LogObserver, Orchestrator, RunOptions,
    RunSummary, ScrapeConfig,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "jobscout")]
#[command(about = "Job board scraper")]
struct Cli {
    /// Debug-level logs unless RUST_LOG says otherwise.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Scrape the listing once and upsert what was found.
    Scrape(ScrapeArgs),
    /// Serve POST /api/jobs/refresh.
    Serve,
    /// Apply database migrations to DATABASE_URL.
    Migrate,
}

#[derive(Debug, Default, Args)]
struct ScrapeArgs {
    #[arg(long)]
    max_pages: Option<usize>,

    #[arg(long)]
    max_jobs: Option<usize>,

    /// Card fields only; never open detail pages.
    #[arg(long)]
    skip_details: bool,

    /// Replay a fixture directory (manifest.json + HTML) instead of a browser.
    #[arg(long, value_name = "DIR")]
    replay: Option<PathBuf>,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command.unwrap_or(Commands::Scrape(ScrapeArgs::default())) {
        Commands::Scrape(args) => {
            let opts = RunOptions {
                max_pages: args.max_pages,
                max_jobs: args.max_jobs,
                skip_details: args.skip_details,
            };
            let orchestrator = match &args.replay {
                Some(dir) => replay_orchestrator(dir).await?,
                None => orchestrator_from_env().await?,
            };
            let summary = orchestrator.run(opts).await?;
            print_summary(&summary);
        }
        Commands::Serve => jobscout_web::serve_from_env().await?,
        Commands::Migrate => {
            let config = ScrapeConfig::from_env();
            let url = config
                .database_url
                .context("DATABASE_URL must be set to migrate")?;
            PgJobStore::connect(&url).await?.migrate().await?;
            println!("migrations applied");
        }
    }

    Ok(())
}

async fn replay_orchestrator(dir: &Path) -> Result<Orchestrator> {
    let launcher = FixtureLauncher::from_dir(dir)
        .with_context(|| format!("loading replay fixtures from {}", dir.display()))?;
    let mut config = ScrapeConfig::from_env();
    config.listing_url = launcher.listing_url().to_string();
    let extractor = Arc::new(load_extractor(&config)?);
    let store = build_store(&config).await?;
    Ok(Orchestrator::new(Arc::new(launcher), store, extractor, config)
        .with_observer(Arc::new(LogObserver)))
}

fn print_summary(summary: &RunSummary) {
    println!(
        "scrape complete: run_id={} pages={} scraped={} created={} updated={} details={} errors={}",
        summary.run_id,
        summary.pages_visited,
        summary.jobs_scraped,
        summary.jobs_created,
        summary.jobs_updated,
        summary.details_scraped,
        summary.errors.len()
    );
    for error in &summary.errors {
        match error.card_index {
            Some(index) => eprintln!("  card {index} [{:?}] {}", error.stage, error.message),
            None => eprintln!("  run [{:?}] {}", error.stage, error.message),
        }
    }
}
