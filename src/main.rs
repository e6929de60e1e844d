//! Holdings-Harvest main entry point
//!
//! This is the command-line interface for the Holdings-Harvest crawler.

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use holdings_harvest::config::{load_config_with_hash, Config, OutputFormat};
use holdings_harvest::crawler::{crawl, plan_work_units, ShutdownSignal};
use holdings_harvest::extract::UNIT_ID_COLUMN;
use holdings_harvest::output::{load_column_counts, print_column_counts, print_report};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Holdings-Harvest: an incremental, rate-limited holdings crawler
///
/// Holdings-Harvest walks a list of targets (fund managers, subreddits,
/// filers) through a paginated source, appending normalized rows to one
/// output file and flushing after every target so progress survives
/// failures and interrupts.
#[derive(Parser, Debug)]
#[command(name = "holdings-harvest")]
#[command(version)]
#[command(about = "An incremental, rate-limited holdings crawler", long_about = None)]
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

    /// Validate config and show the planned work units without crawling
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show row counts from the existing output file and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,

    /// Column to group --stats by
    #[arg(long, value_name = "COLUMN", requires = "stats", default_value = UNIT_ID_COLUMN)]
    group_by: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    // Handle different modes
    if cli.dry_run {
        handle_dry_run(&config);
    } else if cli.stats {
        handle_stats(&config, &cli.group_by)?;
    } else {
        handle_crawl(&config).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("holdings_harvest=info,warn"),
            1 => EnvFilter::new("holdings_harvest=debug,info"),
            2 => EnvFilter::new("holdings_harvest=trace,debug"),
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

/// Handles the --dry-run mode: validates config and shows the planned units
fn handle_dry_run(config: &Config) {
    println!("=== Holdings-Harvest Dry Run ===\n");

    println!("Crawler Configuration:");
    println!("  Source: {}", config.crawler.source);
    println!("  Concurrency: {}", config.crawler.concurrency);
    println!("  Max retries: {}", config.crawler.max_retries);
    println!("  Retry delay: {}ms", config.crawler.retry_delay_ms);
    match config.crawler.target_count {
        Some(count) => println!("  Target count per unit: {}", count),
        None => println!("  Target count per unit: unlimited"),
    }

    println!("\nRate Limit:");
    println!(
        "  {} requests per {}s",
        config.rate_limit.soft_limit, config.rate_limit.window_secs
    );
    println!(
        "  Spacing: {}-{}ms",
        config.rate_limit.min_spacing_ms, config.rate_limit.max_spacing_ms
    );
    println!("  Cooldown after throttling: {}s", config.rate_limit.cooldown_secs);

    println!("\nUser Agent: {}", config.user_agent.value);

    println!("\nOutput:");
    println!("  Path: {}", config.output.path);
    println!("  Format: {:?}", config.output.format);

    let units = plan_work_units(config, Utc::now());
    println!("\nWork Units ({}):", units.len());
    for unit in &units {
        println!("  - {} ({})", unit.id, unit.label);
    }

    println!("\n✓ Configuration is valid");
    println!("✓ Would crawl {} work units", units.len());
}

/// Handles the --stats mode: shows row counts from the output file
fn handle_stats(config: &Config, group_by: &str) -> anyhow::Result<()> {
    if config.output.format != OutputFormat::Csv {
        anyhow::bail!("--stats reads CSV output; {} is {:?}", config.output.path, config.output.format);
    }

    println!("Output: {}\n", config.output.path);
    let counts = load_column_counts(Path::new(&config.output.path), group_by)
        .with_context(|| format!("Failed to read {}", config.output.path))?;
    print_column_counts(&counts);

    Ok(())
}

/// Handles the main crawl operation
async fn handle_crawl(config: &Config) -> anyhow::Result<()> {
    tracing::info!(
        "Source: {}, targets: {}, output: {}",
        config.crawler.source,
        config.targets.len(),
        config.output.path
    );

    let shutdown = ShutdownSignal::new();
    let handler = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing the current page and flushing");
            handler.trigger();
        }
    });

    let report = crawl(config, shutdown).await.context("Crawl failed")?;
    print_report(&report);

    Ok(())
}
