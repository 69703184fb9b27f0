use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use rust_decimal::Decimal;
use serde::Serialize;

use dairy_reconcile::collection::models::QualityMeasurement;
use dairy_reconcile::collection::quality::score_quality;
use dairy_reconcile::config::{AppConfig, Secrets, StoreBackend, DEFAULT_CONFIG_PATH};
use dairy_reconcile::monitoring::logger;
use dairy_reconcile::reporting::{
    DateWindow, GroupingKey, PeriodComparison, PeriodSummary, ReportFilters, RollupSort,
    SortDirection, SortField, Timeframe, VarianceReporter,
};
use dairy_reconcile::store::rest::RestStore;
use dairy_reconcile::store::sqlite::SqliteStore;
use dairy_reconcile::store::RecordStore;
use dairy_reconcile::variance::approval::{all_approved, approve_batch, approve_collection, ApprovalRequest};
use dairy_reconcile::variance::classifier::classify;
use dairy_reconcile::variance::models::VarianceType;

#[derive(Parser)]
#[command(name = "dairy-reconcile")]
#[command(about = "Milk collection quality grading and variance reconciliation", long_about = None)]
struct Cli {
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the local SQLite schema
    InitDb,
    /// Load a demo cooperative into the local database
    Seed,
    /// Grade a milk sample and price it
    Grade {
        #[arg(long)]
        fat: Decimal,
        #[arg(long)]
        protein: Decimal,
        #[arg(long)]
        snf: Decimal,
        #[arg(long, default_value = "0")]
        acidity: Decimal,
        #[arg(long)]
        temperature: Decimal,
        #[arg(long)]
        bacterial_count: Decimal,
    },
    /// Reconcile a collected volume against a received volume
    Classify {
        #[arg(long)]
        collected: Decimal,
        #[arg(long)]
        received: Decimal,
    },
    /// Record the company-side approval of a collection
    Approve {
        #[arg(long)]
        collection: String,
        #[arg(long)]
        received: Decimal,
        #[arg(long)]
        approver: String,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Approve several collections weighed in one sitting
    ApproveBatch {
        /// COLLECTION=LITERS, repeated once per collection
        #[arg(long = "entry", value_parser = parse_entry, required = true)]
        entries: Vec<(String, Decimal)>,
        #[arg(long)]
        approver: String,
        #[arg(long)]
        notes: Option<String>,
    },
    /// List variance records, one page at a time
    Variances {
        #[command(flatten)]
        filters: FilterArgs,
        #[arg(long, default_value_t = 1)]
        page: u64,
    },
    /// Summary, metrics, collector rollups and daily trend for a period
    Report {
        #[command(flatten)]
        filters: FilterArgs,
        #[arg(long, default_value = "performance_score")]
        sort_by: SortField,
        #[arg(long, default_value = "desc")]
        order: SortDirection,
    },
    /// Compare two periods
    Compare {
        #[arg(long)]
        from: NaiveDate,
        #[arg(long)]
        to: NaiveDate,
        #[arg(long)]
        previous_from: NaiveDate,
        #[arg(long)]
        previous_to: NaiveDate,
    },
    /// Every approval recorded against one collection
    History {
        #[arg(long)]
        collection: String,
    },
}

#[derive(Args)]
struct FilterArgs {
    #[arg(long)]
    from: Option<NaiveDate>,
    #[arg(long)]
    to: Option<NaiveDate>,
    #[arg(long, default_value = "custom")]
    timeframe: Timeframe,
    #[arg(long)]
    staff: Option<String>,
    #[arg(long)]
    variance_type: Option<VarianceType>,
    #[arg(long)]
    search: Option<String>,
    /// Staff identity to filter and group by: collector or approver
    #[arg(long)]
    grouping: Option<GroupingKey>,
}

impl FilterArgs {
    fn window(&self) -> Option<DateWindow> {
        match (self.from, self.to, self.timeframe) {
            (None, None, Timeframe::Custom) => None,
            (from, to, timeframe) => {
                let to = to.unwrap_or_else(|| Utc::now().date_naive());
                Some(DateWindow::for_timeframe(timeframe, from.unwrap_or(to), to))
            }
        }
    }

    fn filters(&self) -> ReportFilters {
        ReportFilters {
            window: self.window(),
            staff_id: self.staff.clone(),
            variance_type: self.variance_type,
            search: self.search.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (config, secrets) = AppConfig::load(&cli.config)?;

    logger::init_logging(&config.monitoring)?;

    match cli.command {
        Commands::InitDb => {
            let store = open_sqlite(&config).await?;
            tracing::info!(path = %config.store.database_path, "Schema ready");
            store.pool().close().await;
        }
        Commands::Seed => {
            let store = open_sqlite(&config).await?;
            let approvals = store.seed(&config.penalty_schedule()).await?;
            println!("Seeded {approvals} approved collections.");
        }
        Commands::Grade {
            fat,
            protein,
            snf,
            acidity,
            temperature,
            bacterial_count,
        } => {
            let assessment = score_quality(&QualityMeasurement {
                fat_content: fat,
                protein_content: protein,
                snf_content: snf,
                acidity_level: acidity,
                temperature_c: temperature,
                bacterial_count_cfu_ml: bacterial_count,
            });
            let rate = assessment.rate_per_liter(config.engine.base_rate_per_liter);
            print_json(&serde_json::json!({
                "assessment": assessment,
                "rate_per_liter": rate,
            }))?;
        }
        Commands::Classify {
            collected,
            received,
        } => {
            let variance = classify(collected, received);
            let penalty = config.penalty_schedule().assess(&variance);
            print_json(&serde_json::json!({
                "variance": variance,
                "penalty_amount": penalty,
            }))?;
        }
        Commands::Approve {
            collection,
            received,
            approver,
            notes,
        } => {
            let store = open_store(&config, secrets).await?;
            let request = ApprovalRequest {
                collection_id: collection,
                received_liters: received,
                approver_id: approver,
                notes,
            };
            let approval = approve_collection(
                store.as_ref(),
                request,
                &config.penalty_schedule(),
                config.engine.max_weighing_delay_hours,
            )
            .await
            .context("Approval failed")?;
            print_json(&approval)?;
        }
        Commands::ApproveBatch {
            entries,
            approver,
            notes,
        } => {
            let store = open_store(&config, secrets).await?;
            let requests = entries
                .into_iter()
                .map(|(collection_id, received_liters)| ApprovalRequest {
                    collection_id,
                    received_liters,
                    approver_id: approver.clone(),
                    notes: notes.clone(),
                })
                .collect();
            let outcomes = approve_batch(
                store.as_ref(),
                requests,
                &config.penalty_schedule(),
                config.engine.max_weighing_delay_hours,
            )
            .await;

            let results: Vec<_> = outcomes
                .iter()
                .map(|(collection_id, result)| match result {
                    Ok(approval) => serde_json::json!({
                        "collection_id": collection_id,
                        "success": true,
                        "approval": approval,
                    }),
                    Err(e) => serde_json::json!({
                        "collection_id": collection_id,
                        "success": false,
                        "error": e.to_string(),
                    }),
                })
                .collect();
            print_json(&serde_json::json!({
                "success": all_approved(&outcomes),
                "results": results,
            }))?;
        }
        Commands::Variances { filters, page } => {
            let reporter = reporter(&config, secrets, filters.grouping).await?;
            let result = reporter.variance_page(&filters.filters(), page).await;
            print_json(&or_empty(result, "variance listing"))?;
        }
        Commands::Report {
            filters,
            sort_by,
            order,
        } => {
            let reporter = reporter(&config, secrets, filters.grouping).await?;
            let sort = RollupSort {
                field: sort_by,
                direction: order,
            };
            let dashboard = or_empty(reporter.dashboard(&filters.filters(), sort).await, "report");
            eprintln!("{}", dashboard.summary);
            print_json(&dashboard)?;
        }
        Commands::Compare {
            from,
            to,
            previous_from,
            previous_to,
        } => {
            if previous_from > previous_to || from > to {
                bail!("Each period must start on or before its end date");
            }
            let reporter = reporter(&config, secrets, None).await?;
            let current = ReportFilters::within(DateWindow::from_dates(from, to));
            let previous = ReportFilters::within(DateWindow::from_dates(previous_from, previous_to));
            let comparison = reporter
                .compare(&current, &previous)
                .await
                .unwrap_or_else(|e| {
                    tracing::error!(error = %e, "Period comparison failed");
                    PeriodComparison::between(PeriodSummary::default(), PeriodSummary::default())
                });
            print_json(&comparison)?;
        }
        Commands::History { collection } => {
            let reporter = reporter(&config, secrets, None).await?;
            let history = or_empty(reporter.collection_history(&collection).await, "history");
            print_json(&history)?;
        }
    }

    Ok(())
}

async fn open_sqlite(config: &AppConfig) -> Result<SqliteStore> {
    if config.store.backend != StoreBackend::Sqlite {
        bail!("This command needs the sqlite store backend");
    }
    let path = &config.store.database_path;
    if path != ":memory:" {
        if let Some(dir) = Path::new(path).parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
    }
    SqliteStore::new(path).await
}

async fn open_store(config: &AppConfig, secrets: Secrets) -> Result<Arc<dyn RecordStore>> {
    let store: Arc<dyn RecordStore> = match config.store.backend {
        StoreBackend::Sqlite => Arc::new(open_sqlite(config).await?),
        StoreBackend::Rest => Arc::new(
            RestStore::new(
                &config.store.rest_base_url,
                secrets.store_api_key,
                &config.rate_limit,
                Duration::from_secs(config.store.request_timeout_seconds),
            )
            .context("Failed to build REST store client")?,
        ),
    };
    tracing::info!(store = store.name(), "Record store ready");
    Ok(store)
}

async fn reporter(
    config: &AppConfig,
    secrets: Secrets,
    grouping: Option<GroupingKey>,
) -> Result<VarianceReporter> {
    let store = open_store(config, secrets).await?;
    let reporter = VarianceReporter::new(store, &config.reporting, config.scoring.clone());
    Ok(match grouping {
        Some(grouping) => reporter.with_grouping(grouping),
        None => reporter,
    })
}

fn parse_entry(raw: &str) -> Result<(String, Decimal), String> {
    let (collection, liters) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected COLLECTION=LITERS, got '{raw}'"))?;
    let liters = liters
        .trim()
        .parse::<Decimal>()
        .map_err(|e| format!("invalid liters in '{raw}': {e}"))?;
    Ok((collection.trim().to_string(), liters))
}

/// Report failures are logged and rendered as an empty result.
fn or_empty<T: Default, E: std::fmt::Display>(result: Result<T, E>, what: &str) -> T {
    result.unwrap_or_else(|e| {
        tracing::error!(error = %e, report = what, "Report failed, rendering empty result");
        T::default()
    })
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_entry() {
        assert_eq!(parse_entry("COL-1=38.5"), Ok(("COL-1".to_string(), dec!(38.5))));
        assert!(parse_entry("COL-1").is_err());
        assert!(parse_entry("COL-1=lots").is_err());
    }
}
