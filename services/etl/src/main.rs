//! ETL Service - Full load of clinical appointments into the warehouse
//!
//! Responsibilities:
//! - Open the source and warehouse connections
//! - Run the full load (reset, extract, dimensions, facts)
//! - Print the run report
//! - Release both connections on every exit path
//!
//! Usage:
//!   cargo run --bin etl
//!   cargo run --bin etl -- --dry-run --json
//!   cargo run --bin etl -- --surrogate-keys uuid

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use etl::config::Config;
use etl::memory::MemoryWarehouse;
use etl::pipeline::{run, RunOptions, RunReport};
use etl::source::MySqlSource;
use etl::warehouse::MySqlWarehouse;
use etl::SurrogateKeys;

#[derive(Parser, Debug)]
#[command(
    name = "etl",
    about = "Loads clinical appointments into the star schema warehouse"
)]
struct Args {
    /// Dry run - load into an in-memory warehouse, leave the real one untouched
    #[arg(long, default_value = "false")]
    dry_run: bool,

    /// Print the run report as JSON
    #[arg(long, default_value = "false")]
    json: bool,

    /// Surrogate key strategy (overrides SURROGATE_KEYS)
    #[arg(long, value_enum)]
    surrogate_keys: Option<SurrogateKeys>,
}

async fn load(
    source: &mut MySqlSource,
    config: &Config,
    dry_run: bool,
    options: RunOptions,
) -> Result<RunReport> {
    if dry_run {
        let mut warehouse = MemoryWarehouse::new();
        return run(source, &mut warehouse, options)
            .await
            .context("ETL run aborted");
    }

    let warehouse_config = config
        .warehouse
        .as_ref()
        .context("WAREHOUSE_DB_URL env var missing")?;
    let mut warehouse = MySqlWarehouse::new(warehouse_config.connect("warehouse").await?);
    info!("connected to warehouse database");

    let report = run(source, &mut warehouse, options).await;

    if let Err(err) = warehouse.close().await {
        warn!(error = %err, "closing warehouse connection failed");
    }
    info!("warehouse connection closed");

    report.context("ETL run aborted")
}

fn print_report(report: &RunReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!("\nRun: {}", report.run_id);
    println!("Surrogate keys: {:?}", report.surrogate_keys);
    println!("\nExtracted rows:");
    for (table, rows) in &report.extracted {
        let skipped = report.skipped.get(table).copied().unwrap_or(0);
        println!("  {:<16} {:>8} (skipped {})", table, rows, skipped);
    }

    println!("\nDimensions:");
    for dim in &report.dimensions {
        match &dim.error {
            None => println!("  {:<20} {:>8} inserted of {}", dim.table.name(), dim.inserted, dim.rows),
            Some(err) => println!("  {:<20} FAILED: {}", dim.table.name(), err),
        }
    }

    println!("\nFacts:");
    println!("  appointments: {}", report.facts.appointments);
    println!("  resolved:     {}", report.facts.resolved);
    println!("  dropped:      {}", report.facts.dropped);
    match &report.facts.error {
        None => println!("  inserted:     {}", report.facts.inserted),
        Some(err) => println!("  FAILED: {}", err),
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = Config::from_env().context("Invalid configuration")?;
    let options = RunOptions {
        surrogate_keys: args.surrogate_keys.unwrap_or(config.surrogate_keys),
    };

    if !args.json {
        println!("=== Clinical Appointments ETL ===");
        println!("Mode: {}", if args.dry_run { "dry-run" } else { "live" });
    }

    let mut source = MySqlSource::new(config.source.connect("source").await?);
    info!("connected to source database");

    let outcome = load(&mut source, &config, args.dry_run, options).await;

    if let Err(err) = source.close().await {
        warn!(error = %err, "closing source connection failed");
    }
    info!("source connection closed");

    let report = outcome?;
    print_report(&report, args.json)?;

    if args.json {
        return Ok(());
    }
    if report.is_clean() {
        println!("\n=== ETL Complete ===");
    } else {
        println!("\n=== ETL Complete (with warnings, see log) ===");
    }

    Ok(())
}
