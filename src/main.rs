use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

mod catalog;
mod error;
mod evaluate;
mod forecast;
mod gapfill;
mod ingest;
mod models;
mod period;
mod report;
mod settings;
mod stats;
mod store;
mod summary;

use crate::forecast::ModelKind;
use crate::gapfill::{FillMode, MonthRange};
use crate::models::Skipped;
use crate::store::{JsonFileStore, SummaryStore};

#[derive(Parser)]
#[command(name = "demand-forecast")]
#[command(about = "Monthly order summaries and next-month demand forecasts", long_about = None)]
struct Cli {
    /// Engine config file (JSON, TOML or YAML)
    #[arg(long, global = true, env = "DEMAND_FORECAST_CONFIG")]
    config: Option<PathBuf>,
    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Aggregate a raw order export into zero-filled and gap-preserving monthly grids
    FillGaps {
        #[arg(long)]
        orders: PathBuf,
        #[arg(long, default_value = "final_orders_with_zeros.csv")]
        zeros_out: PathBuf,
        #[arg(long, default_value = "final_output_with_nan.csv")]
        missing_out: PathBuf,
        /// How the gap-preserving grid treats absent months
        #[arg(long, value_enum, default_value_t = FillMode::Missing)]
        missing_mode: FillMode,
    },
    /// Build the summary store from a full monthly history
    Build {
        #[arg(long)]
        history: PathBuf,
        #[arg(long, default_value = "item_summary_stats.json")]
        out: PathBuf,
    },
    /// Fold a batch of new monthly observations into the summary store
    Update {
        #[arg(long)]
        summaries: PathBuf,
        #[arg(long)]
        batch: PathBuf,
        /// Defaults to rewriting the input store
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Rank items by predicted demand for a month
    Forecast {
        #[arg(long)]
        summaries: PathBuf,
        /// Target month as YYYY-MM
        #[arg(long)]
        month: String,
        #[arg(long, default_value_t = 100)]
        limit: usize,
        #[arg(long, value_enum, default_value_t = ModelKind::TrendSeasonal)]
        model: ModelKind,
        /// Print a JSON payload: a ranked array, or an error object
        #[arg(long)]
        json: bool,
    },
    /// Generate a markdown forecast report
    Report {
        #[arg(long)]
        summaries: PathBuf,
        #[arg(long)]
        month: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
        #[arg(long, value_enum, default_value_t = ModelKind::TrendSeasonal)]
        model: ModelKind,
        #[arg(long, default_value = "forecast_report.md")]
        out: PathBuf,
    },
    /// Backtest a model against the last months of each item's history
    Evaluate {
        #[arg(long)]
        history: PathBuf,
        #[arg(long, value_enum, default_value_t = ModelKind::TrendSeasonal)]
        model: ModelKind,
        #[arg(long, default_value = "forecast_error_summary.csv")]
        out: PathBuf,
    },
    /// Export an item catalog with each item's last positive order
    Catalog {
        #[arg(long)]
        history: PathBuf,
        #[arg(long, default_value = "output_items.csv")]
        out: PathBuf,
    },
}

fn init_tracing(json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = std::env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| "demand_forecast=info".to_string());

    let builder = fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr);
    if json {
        let _ = builder.json().try_init();
    } else {
        let _ = builder.try_init();
    }
}

fn log_skipped(skipped: &[Skipped]) {
    for row in skipped {
        warn!(
            item = row.item_code.as_deref().unwrap_or(""),
            line = row.line,
            reason = %row.reason,
            "row skipped"
        );
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Commands::FillGaps {
            orders,
            zeros_out,
            missing_out,
            missing_mode,
        } => {
            let loaded = ingest::load_orders(&orders)?;
            let observations = gapfill::aggregate_orders(&loaded.rows);
            let Some(range) = MonthRange::spanning(&observations) else {
                println!("No orders with a usable ship date in {}.", orders.display());
                return Ok(());
            };

            let zeros = gapfill::fill_gaps(&observations, range, FillMode::Zero);
            ingest::write_grid(&zeros_out, &zeros)?;
            let missing = gapfill::fill_gaps(&observations, range, missing_mode);
            ingest::write_grid(&missing_out, &missing)?;

            println!(
                "Wrote {} rows ({} to {}) to {} and {} ({} order lines skipped).",
                zeros.len(),
                range.start.format("%Y-%m"),
                range.end.format("%Y-%m"),
                zeros_out.display(),
                missing_out.display(),
                loaded.skipped.len()
            );
        }
        Commands::Build { history, out } => {
            let engine = settings::load_config(cli.config.as_deref())?;
            let loaded = ingest::load_observations(&history)?;
            log_skipped(&loaded.skipped);

            let (summaries, cold) = summary::build_summaries(&loaded.rows, &engine);
            let store = JsonFileStore::new(&out);
            store.save(&summaries)?;

            println!(
                "Saved summaries for {} items to {} ({} items with under {} months of history left out).",
                summaries.len(),
                store.path().display(),
                cold.len(),
                engine.min_history
            );
        }
        Commands::Update {
            summaries,
            batch,
            out,
        } => {
            let engine = settings::load_config(cli.config.as_deref())?;
            let source = JsonFileStore::new(&summaries);
            let mut store = source
                .load()
                .with_context(|| format!("cannot update {}", summaries.display()))?;
            let loaded = ingest::load_observations(&batch)?;

            let mut report = summary::apply_batch(
                &mut store,
                &loaded.rows,
                Some(loaded.lines.as_slice()),
                &engine,
            );
            let mut skipped = loaded.skipped;
            skipped.append(&mut report.skipped);
            log_skipped(&skipped);

            let target = out.unwrap_or(summaries);
            JsonFileStore::new(&target).save(&store)?;

            println!(
                "Applied {} observations to {} ({} skipped, {} kept their previous trend).",
                report.processed,
                target.display(),
                skipped.len(),
                report.trend_retained.len()
            );
            for row in skipped.iter().take(10) {
                println!(
                    "- line {}: {} ({})",
                    row.line.map_or_else(|| "?".to_string(), |line| line.to_string()),
                    row.item_code.as_deref().unwrap_or("unknown"),
                    row.reason
                );
            }
        }
        Commands::Forecast {
            summaries,
            month,
            limit,
            model,
            json,
        } => {
            let store = JsonFileStore::new(&summaries);
            if json {
                let payload = forecast::trigger_payload(&store, &month, model, limit);
                println!("{}", payload.to_json());
                return Ok(());
            }

            let (_, predictions) = forecast::forecast_from_store(&store, &month, model)
                .with_context(|| format!("forecast for {month} failed"))?;
            if predictions.is_empty() {
                println!("No items have enough recent history to forecast.");
                return Ok(());
            }

            println!("Forecast for {month} (top {limit}):");
            for prediction in predictions.iter().take(limit) {
                println!("- {}: {}", prediction.item_code, prediction.predicted_qty);
            }
        }
        Commands::Report {
            summaries,
            month,
            limit,
            model,
            out,
        } => {
            let (store, predictions) =
                forecast::forecast_from_store(&JsonFileStore::new(&summaries), &month, model)?;
            let target = period::parse_target_month(&month).map_err(anyhow::Error::msg)?;
            let report = report::build_report(
                target,
                model.model().name(),
                &store,
                &predictions,
                limit,
            );
            std::fs::write(&out, report)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
        Commands::Evaluate {
            history,
            model,
            out,
        } => {
            let engine = settings::load_config(cli.config.as_deref())?;
            let loaded = ingest::load_observations(&history)?;
            log_skipped(&loaded.skipped);

            let model = model.model();
            let results = evaluate::backtest(&loaded.rows, model.as_ref(), &engine);
            ingest::write_accuracy(&out, &results)?;

            info!(out = %out.display(), items = results.len(), "wrote backtest results");
            println!(
                "Backtested {} items with the {} model over {} held-out months; results in {}.",
                results.len(),
                model.name(),
                engine.holdout,
                out.display()
            );
        }
        Commands::Catalog { history, out } => {
            let loaded = ingest::load_observations(&history)?;
            let entries = catalog::build_catalog(&loaded.rows);
            ingest::write_catalog(&out, &entries)?;
            println!("Exported {} items to {}.", entries.len(), out.display());
        }
    }

    Ok(())
}
