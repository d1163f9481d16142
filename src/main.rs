//! regdoc-harvester main entry point
//!
//! This is the command-line interface for the regulatory document harvester.

use anyhow::Context;
use clap::Parser;
use regdoc_harvester::config::{load_config_with_hash, validate, Config};
use regdoc_harvester::crawler::{PageJobReport, ResourceStatus, ScrapePipeline};
use regdoc_harvester::storage::{DocumentKind, DocumentStore, SqliteDocumentStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// regdoc-harvester: a polite harvester for regulatory pages and PDFs
///
/// Fetches each seed page while respecting robots.txt and request pacing,
/// downloads the PDFs it links to and stores everything in SQLite.
#[derive(Parser, Debug)]
#[command(name = "regdoc-harvester")]
#[command(version)]
#[command(about = "A polite harvester for regulatory pages and PDFs", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show what would be harvested without fetching anything
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show document and job counts from the database and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,

    /// Seed URL to harvest instead of the configured seeds (repeatable)
    #[arg(long = "seed", value_name = "URL")]
    seeds: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (mut config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if !cli.seeds.is_empty() {
        config.seeds = cli.seeds.clone();
        validate(&config).context("invalid --seed override")?;
    }

    if cli.dry_run {
        handle_dry_run(&config);
    } else if cli.stats {
        handle_stats(&config)?;
    } else {
        handle_harvest(config, config_hash).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("regdoc_harvester=info,warn"),
            1 => EnvFilter::new("regdoc_harvester=debug,info"),
            2 => EnvFilter::new("regdoc_harvester=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: shows the effective configuration
fn handle_dry_run(config: &Config) {
    println!("=== regdoc-harvester Dry Run ===\n");

    println!("Pacing:");
    println!("  Minimum interval: {}ms", config.harvester.min_interval_ms);
    println!("  Max concurrent: {}", config.harvester.max_concurrent);
    println!(
        "  Retries: {} (backoff {}ms..{}ms)",
        config.harvester.max_retries, config.harvester.backoff_base_ms, config.harvester.backoff_cap_ms
    );
    println!("  Request timeout: {}s", config.harvester.request_timeout_secs);

    println!("\nUser Agent:");
    println!("  Name: {}", config.user_agent.crawler_name);
    println!("  Version: {}", config.user_agent.crawler_version);
    println!("  Contact URL: {}", config.user_agent.contact_url);
    println!("  Contact Email: {}", config.user_agent.contact_email);

    println!("\nPermissions:");
    println!("  robots.txt TTL: {}h", config.permissions.ttl_hours);
    println!(
        "  When robots.txt is unavailable: {}",
        if config.permissions.fail_closed {
            "deny"
        } else {
            "allow (degraded)"
        }
    );

    println!("\nPDFs:");
    println!("  Max size: {} bytes", config.pdf.max_bytes);
    println!("  Query policy: {:?}", config.pdf.query_policy);

    println!("\nOutput:");
    println!("  Database: {}", config.output.database_path);

    println!("\nSeeds ({}):", config.seeds.len());
    for seed in &config.seeds {
        println!("  - {}", seed);
    }

    println!("\n✓ Configuration is valid");
    println!("✓ Would harvest {} seed URLs", config.seeds.len());
}

/// Handles the --stats mode: shows counts from the database
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Database: {}\n", config.output.database_path);

    let store = SqliteDocumentStore::open(Path::new(&config.output.database_path))
        .context("failed to open database")?;

    println!("Pages: {}", store.count_documents(Some(DocumentKind::Page))?);
    println!("PDFs:  {}", store.count_documents(Some(DocumentKind::Pdf))?);
    println!("Jobs:  {}", store.job_count()?);

    Ok(())
}

/// Handles the main harvest operation
async fn handle_harvest(config: Config, config_hash: String) -> anyhow::Result<()> {
    if config.seeds.is_empty() {
        tracing::warn!("No seeds configured; nothing to do");
        return Ok(());
    }

    let store: Arc<dyn DocumentStore> = Arc::new(
        SqliteDocumentStore::open(Path::new(&config.output.database_path))
            .context("failed to open database")?,
    );

    let pipeline = ScrapePipeline::from_config(&config, store)?.with_config_hash(config_hash);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing in-flight work");
            on_interrupt.cancel();
        }
    });

    tracing::info!("Harvesting {} seed URLs", config.seeds.len());
    let reports = match pipeline.run(&config.seeds, &cancel).await {
        Ok(reports) => reports,
        Err(e) => {
            tracing::error!("Harvest aborted: {}", e);
            return Err(e.into());
        }
    };

    for report in &reports {
        print_report(report);
    }

    Ok(())
}

fn print_report(report: &PageJobReport) {
    println!("\n{} [{}]", report.seed, report.state);
    for outcome in &report.outcomes {
        let status = match &outcome.status {
            ResourceStatus::Stored { version, .. } => format!("stored (v{})", version),
            ResourceStatus::Unchanged { .. } => "unchanged".to_string(),
            ResourceStatus::Skipped { reason } => format!("skipped: {}", reason),
            ResourceStatus::Cancelled => "cancelled".to_string(),
            ResourceStatus::Failed { reason } => format!("failed: {}", reason),
        };
        let degraded = if outcome.degraded { " (degraded)" } else { "" };
        println!("  {:<4} {}  {}{}", outcome.kind.as_str(), status, outcome.url, degraded);
    }
    println!(
        "  {} stored, {} unchanged, {} skipped, {} failed, {} cancelled",
        report.stored(),
        report.unchanged(),
        report.skipped(),
        report.failed(),
        report.cancelled()
    );
}
