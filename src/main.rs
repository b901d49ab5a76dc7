use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use rxsentinel::analysis::Cohort;
use rxsentinel::config::{AppConfig, LoggingConfig};
use rxsentinel::pipeline::{self, CohortPipeline};
use rxsentinel::{ingest, storage, synth};

#[derive(Parser)]
#[command(
    name = "rxsentinel",
    about = "Early-warning analytics for weekly prescription uptake",
    version,
    long_about = None
)]
struct Cli {
    /// Config file (default: $RXSENTINEL_CONFIG, then ./rxsentinel.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect anomalies and rank business-impact events for one cohort
    Analyze {
        #[arg(long)]
        product: String,

        #[arg(long)]
        region: String,

        /// Price per unit (default: catalog price for the product)
        #[arg(long)]
        price: Option<f64>,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Evaluate detections against labelled events for one cohort
    Backtest {
        #[arg(long)]
        product: String,

        #[arg(long)]
        region: String,

        /// Price per unit (accepted for symmetry with `analyze`; unused by the metrics)
        #[arg(long)]
        price: Option<f64>,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Analyse every catalog cohort concurrently
    Scan {
        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Validate a CSV file and replace the stored observations with it
    Ingest {
        /// Input CSV path
        #[arg(long)]
        csv: PathBuf,
    },

    /// Write a seeded synthetic dataset as CSV
    Generate {
        /// Output file path
        #[arg(long, default_value = "data/prescriptions.csv")]
        out: PathBuf,

        /// RNG seed
        #[arg(long, default_value = "42")]
        seed: u64,
    },

    /// Start the report API server
    Serve {
        /// Bind address (default: [server].bind)
        #[arg(long)]
        bind: Option<String>,
    },
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::resolve(cli.config.as_deref())?;
    init_tracing(&config.logging);

    match cli.command {
        Commands::Analyze {
            product,
            region,
            price,
            json,
        } => {
            let price = match price.or_else(|| config.catalog.price(&product)) {
                Some(p) => p,
                None => anyhow::bail!("no price for {product}; pass --price"),
            };
            tracing::info!(%product, %region, price, "Running analysis");
            let cohort = Cohort::new(product, region);
            let pool = storage::open_pool(&config.storage.db_path)?;
            let pipeline = CohortPipeline::from_config(&config);
            let report = tokio::task::spawn_blocking(move || {
                pipeline.analyze_stored(&pool, &cohort, price)
            })
            .await??;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("\n=== Anomalies: {} ===", report.cohort);
                println!(
                    "{:<10} | {:>8} | {:>10} | {:>8} | {:>8} | Flag",
                    "Date", "Actual", "Expected", "Dev %", "Z"
                );
                println!("{:-<10}-|-{:-<8}-|-{:-<10}-|-{:-<8}-|-{:-<8}-|-{:-<4}", "", "", "", "", "", "");
                for r in report.anomalies.iter().filter(|r| r.is_anomaly) {
                    let dev = r
                        .pct_deviation
                        .map(|d| format!("{:.1}", d * 100.0))
                        .unwrap_or_else(|| "n/a".to_string());
                    println!(
                        "{:<10} | {:>8.0} | {:>10.1} | {:>8} | {:>8.2} | *",
                        r.date, r.actual, r.expected, dev, r.z_score
                    );
                }
                println!("({} of {} weeks flagged)", report.anomaly_count(), report.anomalies.len());

                println!("\n=== Impact Events ===");
                if report.impacts.is_empty() {
                    println!("No anomalous weeks; nothing to rank.");
                } else {
                    println!(
                        "{:<10} | {:<10} | {:>5} | {:>8} | {:>14} | {:<8} | Likely Cause",
                        "Start", "End", "Weeks", "Avg %", "Revenue", "Severity"
                    );
                    println!("{:-<10}-|-{:-<10}-|-{:-<5}-|-{:-<8}-|-{:-<14}-|-{:-<8}-|-{:-<20}", "", "", "", "", "", "", "");
                    for e in &report.impacts.events {
                        println!(
                            "{:<10} | {:<10} | {:>5} | {:>8.1} | {:>14} | {:<8} | {}",
                            e.start_date,
                            e.end_date,
                            e.duration_weeks,
                            e.avg_pct_deviation * 100.0,
                            rxsentinel::report::group_thousands(e.total_revenue_impact),
                            e.severity.to_string(),
                            e.likely_cause
                        );
                    }
                }

                if let Some(summary) = &report.summary {
                    println!("\n=== Executive Summary ===");
                    println!("{}", summary.render());
                }
                println!();
            }
        }
        Commands::Backtest {
            product,
            region,
            price,
            json,
        } => {
            tracing::info!(%product, %region, ?price, "Running backtest");
            let cohort = Cohort::new(product, region);
            let pool = storage::open_pool(&config.storage.db_path)?;
            let pipeline = CohortPipeline::from_config(&config);
            let task_cohort = cohort.clone();
            let report = tokio::task::spawn_blocking(move || {
                pipeline.backtest_stored(&pool, &task_cohort)
            })
            .await??;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                let m = &report.metrics;
                println!("\n=== Backtest: {} ===", cohort);
                println!("Ground truth events: {}", m.ground_truth_count);
                println!("Detected events:     {}", m.detected_count);
                println!("True positives:      {}", m.true_positives);
                println!("False positives:     {}", m.false_positives);
                println!("Precision:           {:.2}", m.precision);
                println!("Recall:              {:.2}", m.recall);
                match m.avg_latency_weeks {
                    Some(l) => println!("Avg latency (weeks): {:.2}", l),
                    None => println!("Avg latency (weeks): n/a"),
                }

                if !report.matches.is_empty() {
                    println!();
                    println!("{:<18} | {:<10} | {:<10} | Latency", "Ground Truth", "GT Start", "Detected");
                    println!("{:-<18}-|-{:-<10}-|-{:-<10}-|-{:-<7}", "", "", "", "");
                    for mr in &report.matches {
                        println!(
                            "{:<18} | {:<10} | {:<10} | {}",
                            mr.ground_truth_label, mr.ground_truth_start, mr.detected_start, mr.latency_weeks
                        );
                    }
                }
                println!();
            }
        }
        Commands::Scan { json } => {
            let pool = storage::open_pool(&config.storage.db_path)?;
            let shared = Arc::new(CohortPipeline::from_config(&config));
            let entries = pipeline::scan_all(pool, shared, &config.catalog).await;

            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                println!("{:<20} | {:>9} | {:>6} | Top Event", "Cohort", "Anomalies", "Events");
                println!("{:-<20}-|-{:-<9}-|-{:-<6}-|-{:-<40}", "", "", "", "");
                for e in &entries {
                    let detail = match (&e.error, &e.top) {
                        (Some(err), _) => format!("ERROR: {err}"),
                        (None, Some(top)) => format!(
                            "{} {} ({}, {})",
                            top.start_date,
                            top.severity,
                            top.likely_cause,
                            rxsentinel::report::group_thousands(top.total_revenue_impact)
                        ),
                        (None, None) => "-".to_string(),
                    };
                    println!(
                        "{:<20} | {:>9} | {:>6} | {}",
                        e.cohort.to_string(),
                        e.anomalies,
                        e.impact_events,
                        detail
                    );
                }
            }
        }
        Commands::Ingest { csv } => {
            tracing::info!(path = %csv.display(), "Ingesting CSV");
            let rows = ingest::load_prescriptions(&csv)
                .with_context(|| format!("ingestion of {} failed", csv.display()))?;
            let pool = storage::open_pool(&config.storage.db_path)?;
            let written = storage::replace_prescriptions(&pool, &rows)?;
            println!(
                "Ingested {} rows into {}",
                written,
                config.storage.db_path.display()
            );
        }
        Commands::Generate { out, seed } => {
            let synth_config = synth::SynthConfig {
                seed,
                ..synth::SynthConfig::default()
            };
            let rows = synth::generate(&synth_config);
            synth::write_csv(&out, &rows)?;
            println!("Synthetic prescription data generated");
            println!("Path: {}", out.display());
            println!("Rows: {}", rows.len());
        }
        Commands::Serve { bind } => {
            let mut config = config;
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            tracing::info!(bind = %config.server.bind, "Starting rxsentinel API");
            rxsentinel::serve(config).await?;
        }
    }

    Ok(())
}
