use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fraudboard_core::catalog::{
    AlertFilter, AlertStatus, AlertType, KycFilter, KycStatus, RiskCategory, Severity, TransactionFilter, Widget,
};
use fraudboard_core::gateway::snowflake::SnowflakeGateway;
use fraudboard_core::{QueryDescriptor, ReadThroughCache, ResultSet, Settings};

#[derive(Parser)]
#[command(name = "fraudboard")]
#[command(about = "Fraud dashboard data access from the command line", long_about = None)]
struct Cli {
    /// Print results as JSON instead of a table
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Probe the warehouse with SELECT 1
    Health,

    /// Load one dashboard widget
    Widget {
        /// Widget name, e.g. fraud_summary or daily_trends
        name: Widget,

        /// Freshness in seconds (0 forces a fetch); defaults to the widget's
        #[arg(long)]
        ttl: Option<u64>,
    },

    /// Load every widget concurrently, as the overview page does
    Dashboard {
        /// Clear the cache and load everything a second time
        #[arg(long)]
        refresh: bool,
    },

    /// Recent transactions above an amount
    Transactions {
        #[arg(long, default_value = "0")]
        min_amount: u64,

        /// all, flagged or clean
        #[arg(long, default_value = "all", value_parser = parse_alert_status)]
        status: AlertStatus,

        #[arg(long, default_value = "1000")]
        limit: u32,
    },

    /// Alerts by severity and type
    Alerts {
        /// Repeat for several severities (default: critical and high)
        #[arg(long = "severity", value_parser = parse_severity)]
        severities: Vec<Severity>,

        /// Repeat for several types (default: all)
        #[arg(long = "alert-type", value_parser = parse_alert_type)]
        alert_types: Vec<AlertType>,

        #[arg(long, default_value = "35000")]
        min_amount: u64,

        #[arg(long, default_value = "500")]
        limit: u32,
    },

    /// Customers from the KYC risk view
    Kyc {
        /// Repeat for several categories: high, medium, low (default: all)
        #[arg(long = "risk", value_parser = parse_risk_category)]
        risk_categories: Vec<RiskCategory>,

        /// Repeat for several statuses: verified, pending, expired (default: all)
        #[arg(long = "kyc-status", value_parser = parse_kyc_status)]
        kyc_statuses: Vec<KycStatus>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "fraudboard_core=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let settings = Settings::load()?;
    let gateway = Arc::new(SnowflakeGateway::new(settings.warehouse));
    let cache = ReadThroughCache::new(gateway, settings.cache)?;

    match cli.command {
        Commands::Health => {
            let result = cache.health_check().await;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Status:        {:?}", result.status);
                println!("Response time: {}ms", result.response_time_ms);
                println!("Connection:    {}", result.connection);
                if let Some(error) = &result.error {
                    println!("Error:         {}", error);
                }
            }
            if !result.status.is_operational() {
                bail!("warehouse is unhealthy");
            }
        }

        Commands::Widget { name, ttl } => {
            let ttl = ttl.map(Duration::from_secs).unwrap_or_else(|| name.recommended_ttl());
            let rows = cache.get(&name.descriptor()?, ttl).await?;
            print_rows(&rows, cli.json)?;
        }

        Commands::Dashboard { refresh } => {
            load_dashboard(&cache).await?;
            if refresh {
                let cleared = cache.invalidate_all().await;
                info!("Refresh requested, {} entries cleared", cleared);
                load_dashboard(&cache).await?;
            }
            let stats = cache.stats().await;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("{}", stats);
            }
        }

        Commands::Transactions {
            min_amount,
            status,
            limit,
        } => {
            let query = TransactionFilter::default()
                .min_amount(min_amount)
                .alert_status(status)
                .limit(limit)
                .descriptor()?;
            run_filtered(&cache, &query, cli.json).await?;
        }

        Commands::Alerts {
            severities,
            alert_types,
            min_amount,
            limit,
        } => {
            let mut filter = AlertFilter::default().min_amount(min_amount).limit(limit);
            if !severities.is_empty() {
                filter = filter.severities(severities);
            }
            if !alert_types.is_empty() {
                filter = filter.alert_types(alert_types);
            }
            run_filtered(&cache, &filter.descriptor()?, cli.json).await?;
        }

        Commands::Kyc {
            risk_categories,
            kyc_statuses,
        } => {
            let mut filter = KycFilter::default();
            if !risk_categories.is_empty() {
                filter = filter.risk_categories(risk_categories);
            }
            if !kyc_statuses.is_empty() {
                filter = filter.kyc_statuses(kyc_statuses);
            }
            run_filtered(&cache, &filter.descriptor()?, cli.json).await?;
        }
    }

    Ok(())
}

async fn load_dashboard(cache: &ReadThroughCache) -> Result<()> {
    let loads = Widget::ALL.into_iter().map(|widget| {
        let cache = cache.clone();
        async move {
            let query = widget.descriptor()?;
            let rows = cache.get(&query, widget.recommended_ttl()).await?;
            Ok::<_, fraudboard_core::WarehouseError>((widget, rows.len()))
        }
    });

    for outcome in futures::future::join_all(loads).await {
        match outcome {
            Ok((widget, rows)) => println!("{:<20} {:>8} rows", widget, rows),
            Err(e) => eprintln!("widget failed: {}", e),
        }
    }
    Ok(())
}

/// Filtered pages fall back to the last stored rows when a refresh fails
async fn run_filtered(cache: &ReadThroughCache, query: &QueryDescriptor, json: bool) -> Result<()> {
    match cache.get_default(query).await {
        Ok(rows) => print_rows(&rows, json),
        Err(e) => match cache.get_cached_if_present(query).await {
            Some(entry) => {
                eprintln!(
                    "Showing rows fetched at {} because refresh failed: {}",
                    entry.metadata.fetched_at_wall, e
                );
                print_rows(&entry.rows, json)
            }
            None => Err(e.into()),
        },
    }
}

fn print_rows(rows: &ResultSet, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(rows)?);
        return Ok(());
    }

    println!("{}", rows.columns.join("\t"));
    for row in &rows.rows {
        let cells: Vec<String> = rows
            .columns
            .iter()
            .map(|column| match row.get(column) {
                None | Some(Value::Null) => String::new(),
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
            })
            .collect();
        println!("{}", cells.join("\t"));
    }
    println!("({} rows)", rows.len());
    Ok(())
}

fn parse_alert_status(s: &str) -> Result<AlertStatus, String> {
    AlertStatus::from_str(s).ok_or_else(|| format!("unknown alert status '{}'", s))
}

fn parse_severity(s: &str) -> Result<Severity, String> {
    Severity::from_str(s).ok_or_else(|| format!("unknown severity '{}'", s))
}

fn parse_alert_type(s: &str) -> Result<AlertType, String> {
    AlertType::from_str(s).ok_or_else(|| format!("unknown alert type '{}'", s))
}

fn parse_risk_category(s: &str) -> Result<RiskCategory, String> {
    RiskCategory::from_str(s).ok_or_else(|| format!("unknown risk category '{}'", s))
}

fn parse_kyc_status(s: &str) -> Result<KycStatus, String> {
    KycStatus::from_str(s).ok_or_else(|| format!("unknown KYC status '{}'", s))
}
