//! Paddock main entry point
//!
//! This is the command-line interface for the paddock crawl orchestrator.

use anyhow::Context;
use clap::{Parser, Subcommand};
use paddock::config::{load_config_with_hash, Config};
use paddock::crawler::{plan_jobs, run_crawl};
use paddock::output::export_ids;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Paddock: an identifier-driven crawl orchestrator
///
/// Paddock turns identifier lists into fetch tasks, retrieves the pages
/// politely, extracts records with CSS selectors and appends them to one
/// CSV file per record type.
#[derive(Parser, Debug)]
#[command(name = "paddock")]
#[command(version = "1.0.0")]
#[command(about = "An identifier-driven crawl orchestrator", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the configured jobs
    Crawl {
        /// Path to TOML configuration file
        #[arg(value_name = "CONFIG")]
        config: PathBuf,

        /// Run only this job (repeatable)
        #[arg(long = "job", value_name = "NAME")]
        jobs: Vec<String>,

        /// Validate config and show what would be crawled without actually crawling
        #[arg(long)]
        dry_run: bool,
    },

    /// Write the distinct values of result columns as identifier lists
    ExportIds {
        /// Result CSV with a header row
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Column to export (repeatable)
        #[arg(long = "column", value_name = "NAME", required = true)]
        columns: Vec<String>,

        /// Directory for `<column>.csv` files (defaults to the input's directory)
        #[arg(long, value_name = "DIR")]
        output_dir: Option<PathBuf>,

        /// Do not write the column name as the first row
        #[arg(long)]
        no_header: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    let result = match cli.command {
        Command::Crawl {
            config,
            jobs,
            dry_run,
        } => handle_crawl(config, jobs, dry_run).await,
        Command::ExportIds {
            input,
            columns,
            output_dir,
            no_header,
        } => handle_export(input, columns, output_dir, !no_header),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("paddock=info,warn"),
            1 => EnvFilter::new("paddock=debug,info"),
            2 => EnvFilter::new("paddock=trace,debug"),
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

/// Handles the crawl subcommand, including --dry-run
async fn handle_crawl(path: PathBuf, jobs: Vec<String>, dry_run: bool) -> anyhow::Result<()> {
    tracing::info!("Loading configuration from: {}", path.display());
    let (config, hash) = load_config_with_hash(&path)
        .with_context(|| format!("failed to load {}", path.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", hash);

    if dry_run {
        return handle_dry_run(&config, &jobs);
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, finishing in-flight tasks (press Ctrl-C again to abort)");
            on_signal.cancel();
            if tokio::signal::ctrl_c().await.is_ok() {
                std::process::exit(130);
            }
        }
    });

    let summary = run_crawl(config, &jobs, cancel).await.context("crawl failed")?;
    summary.print();
    Ok(())
}

/// Handles the --dry-run mode: validates config and shows what would be crawled
fn handle_dry_run(config: &Config, jobs: &[String]) -> anyhow::Result<()> {
    println!("=== Paddock Dry Run ===\n");

    println!("Crawler Configuration:");
    println!("  Fetch timeout: {}s", config.crawler.fetch_timeout);
    println!(
        "  Retries: {} (backoff {}ms..{}ms)",
        config.crawler.retry_times, config.crawler.retry_backoff, config.crawler.retry_backoff_max
    );
    println!("  Concurrent per domain: {}", config.crawler.concurrent_per_domain);
    println!(
        "  Download delay: {}ms{}",
        config.crawler.download_delay,
        if config.crawler.randomize_delay { " (randomized)" } else { "" }
    );
    println!("  Obey robots.txt: {}", config.crawler.robots_obey);

    if config.throttle.enabled {
        println!(
            "  Adaptive delay: target {}ms, {}ms..{}ms",
            config.throttle.target_latency, config.throttle.min_delay, config.throttle.max_delay
        );
    }

    println!("\nOutput:");
    println!("  Directory: {}", config.output.base_dir.display());
    println!(
        "  Default mode: {}",
        if config.output.overwrite { "overwrite" } else { "append" }
    );

    if let Some(session) = &config.session {
        println!("\nSession:");
        println!("  Login URL: {}", session.login_url);
        println!("  Credentials from: ${} / ${}", session.username_env, session.password_env);
    }

    let plan = plan_jobs(config, jobs)?;
    println!("\nJobs ({}):", plan.len());
    for job in &plan {
        println!("  - {} ({} tasks)", job.name, job.tasks);
    }

    println!("\n✓ Configuration is valid");
    println!(
        "✓ Would start crawling with {} tasks",
        plan.iter().map(|job| job.tasks).sum::<usize>()
    );

    Ok(())
}

/// Handles the export-ids subcommand
fn handle_export(
    input: PathBuf,
    columns: Vec<String>,
    output_dir: Option<PathBuf>,
    header: bool,
) -> anyhow::Result<()> {
    let written = export_ids(&input, &columns, output_dir.as_deref(), header)
        .with_context(|| format!("failed to export ids from {}", input.display()))?;

    for (path, count) in written {
        println!("✓ {} ({} ids)", path.display(), count);
    }
    Ok(())
}
