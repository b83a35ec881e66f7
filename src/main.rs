//! menuledger command line.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use menuledger::config::{load_settings, Settings};
use menuledger::models::Restaurant;
use menuledger::repository::diesel_pool::create_diesel_pool_with_options;
use menuledger::repository::migrations::run_migrations;
use menuledger::repository::{DieselRestaurantRepository, DieselSessionRepository, SqlitePool};
use menuledger::services::{Audit, ImportEvent, ImportOptions, ImportService};

#[derive(Parser)]
#[command(name = "menuledger", version, about = "Import restaurant menu snapshots into a price and offer ledger")]
struct Cli {
    /// Data directory (overrides config)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Database URL (overrides config and data directory)
    #[arg(long, global = true, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import snapshot files or directories of *.json snapshots
    Import {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Per-snapshot timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
        /// Print summaries as JSON
        #[arg(long)]
        json: bool,
    },
    /// Check stored menus for corruption signals
    Audit {
        /// Only audit restaurants with this name
        #[arg(long)]
        restaurant: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// List a restaurant's offers with current product counts
    Offers {
        restaurant: String,
        #[arg(long)]
        domain: Option<String>,
    },
    /// Show recent scraping sessions
    Sessions {
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// Apply database migrations
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut settings = load_settings().await;
    if let Some(dir) = cli.data_dir {
        settings.data_dir = dir;
    }
    if let Some(url) = cli.database_url {
        settings.database_url = Some(url);
    }

    let pool = open_pool(&settings).await?;

    match cli.command {
        Commands::Import { paths, timeout, json } => cmd_import(&settings, pool, paths, timeout, json).await,
        Commands::Audit { restaurant, json } => cmd_audit(pool, restaurant, json).await,
        Commands::Offers { restaurant, domain } => cmd_offers(pool, &restaurant, domain.as_deref()).await,
        Commands::Sessions { limit } => cmd_sessions(pool, limit).await,
        Commands::Migrate => {
            info!("Database schema is up to date");
            Ok(())
        }
    }
}

/// Build the pool once and bring the schema up to date.
async fn open_pool(settings: &Settings) -> Result<SqlitePool> {
    if settings.database_url.is_none() {
        settings
            .ensure_directories()
            .with_context(|| format!("creating {}", settings.data_dir.display()))?;
    }
    let url = settings.database_url();
    let pool = create_diesel_pool_with_options(&url, settings.pool_options())
        .with_context(|| format!("opening database {url}"))?;
    let applied = run_migrations(&pool).await.context("applying migrations")?;
    if applied > 0 {
        info!("Applied {} migration(s) to {}", applied, url);
    }
    Ok(pool)
}

async fn cmd_import(
    settings: &Settings,
    pool: SqlitePool,
    paths: Vec<PathBuf>,
    timeout: Option<u64>,
    json: bool,
) -> Result<()> {
    let service = ImportService::new(pool).with_default_currency(settings.default_currency.clone());
    let options = ImportOptions {
        timeout: timeout.map(Duration::from_secs).or_else(|| settings.import_timeout()),
        cancel: None,
    };

    let (tx, mut rx) = mpsc::unbounded_channel();
    let progress = tokio::spawn(async move {
        let mut bar: Option<ProgressBar> = None;
        while let Some(event) = rx.recv().await {
            match event {
                ImportEvent::Planned { total } if total > 1 => {
                    bar = Some(file_progress(total as u64));
                }
                ImportEvent::Planned { .. } => {}
                ImportEvent::Started { path } => {
                    if let Some(bar) = &bar {
                        bar.set_message(path.display().to_string());
                    }
                }
                ImportEvent::Finished { .. } => {
                    if let Some(bar) = &bar {
                        bar.inc(1);
                    }
                }
            }
        }
        if let Some(bar) = bar {
            bar.finish_and_clear();
        }
    });

    let outcomes = service.import_paths(&paths, &options, Some(tx)).await?;
    let _ = progress.await;

    let mut failed = 0;
    for outcome in &outcomes {
        match &outcome.result {
            Ok(summary) if json => println!("{}", serde_json::to_string(summary)?),
            Ok(summary) => {
                println!(
                    "{}: {} ({} products, {} categories) session {}",
                    outcome.path.display(),
                    summary.restaurant_name,
                    summary.product_count,
                    summary.category_count,
                    summary.session_id
                );
                println!(
                    "  created {} products, {} categories, {} offers, {} prices; updated {} products, {} offers",
                    summary.created.products,
                    summary.created.categories,
                    summary.created.offers,
                    summary.created.prices,
                    summary.updated.products,
                    summary.updated.offers
                );
                if !summary.is_latest {
                    println!("  older than the last import: history appended only");
                }
                if let Some(previous) = &summary.duplicate_of {
                    println!("  identical to session {previous}");
                }
                if !summary.deactivated_offers.is_empty() {
                    println!("  deactivated offers: {}", summary.deactivated_offers.join(", "));
                }
                for warning in &summary.warnings {
                    println!("  warning: {warning}");
                }
                for err in &summary.errors {
                    println!("  error: {err}");
                }
            }
            Err(err) => {
                failed += 1;
                error!("{}: {}", outcome.path.display(), err);
            }
        }
    }

    if failed > 0 {
        bail!("{failed} of {} snapshot(s) failed to import", outcomes.len());
    }
    Ok(())
}

fn file_progress(total: u64) -> ProgressBar {
    let bar = ProgressBar::new(total);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    bar.set_style(style);
    bar
}

async fn restaurants_named(pool: &SqlitePool, name: &str, domain: Option<&str>) -> Result<Vec<Restaurant>> {
    let repo = DieselRestaurantRepository::new(pool.clone());
    let found = match domain {
        Some(domain) => repo.find(name, domain).await?.into_iter().collect(),
        None => repo.find_by_name(name).await?,
    };
    if found.is_empty() {
        bail!("no restaurant named '{name}'");
    }
    Ok(found)
}

async fn cmd_audit(pool: SqlitePool, restaurant: Option<String>, json: bool) -> Result<()> {
    let audit = Audit::new(pool.clone());
    let ids: Vec<Option<i32>> = match restaurant {
        Some(name) => restaurants_named(&pool, &name, None)
            .await?
            .into_iter()
            .map(|r| Some(r.id))
            .collect(),
        None => vec![None],
    };

    let mut healthy = true;
    for id in ids {
        let report = audit.report(id).await?;
        healthy &= report.is_healthy();

        if json {
            println!("{}", serde_json::to_string_pretty(&report)?);
            continue;
        }

        for health in &report.category_health {
            let ratio = health.ratio.map_or("-".to_string(), |r| format!("{r:.2}"));
            println!(
                "{:<40} {:>4} categories {:>5} products ratio {:>5} uncategorized {:>4}{}",
                health.restaurant_name,
                health.category_count,
                health.product_count,
                ratio,
                health.fallback_product_count,
                if health.suspicious { "  SUSPICIOUS" } else { "" }
            );
        }
        for dup in &report.duplicate_products {
            println!(
                "duplicate: {} / '{}' rows {:?}",
                dup.restaurant_name, dup.name, dup.product_ids
            );
        }
        for offer in &report.offers_missing_discount {
            println!("offer without discount: {} '{}'", offer.id, offer.name);
        }
        let stats = &report.offer_statistics;
        println!(
            "offers: {} total, {} active in {} restaurants, {} products on offer, average discount {}",
            stats.total_offers,
            stats.active_offers,
            stats.restaurants_with_active_offers,
            stats.products_on_offer,
            stats
                .average_active_discount
                .map_or("-".to_string(), |d| format!("{d}%"))
        );
    }

    if !healthy {
        warn!("Audit found integrity problems");
        std::process::exit(2);
    }
    Ok(())
}

async fn cmd_offers(pool: SqlitePool, restaurant: &str, domain: Option<&str>) -> Result<()> {
    let audit = Audit::new(pool.clone());
    for found in restaurants_named(&pool, restaurant, domain).await? {
        println!("{} ({})", found.name, if found.domain.is_empty() { "-" } else { found.domain.as_str() });
        for summary in audit.offer_summaries(found.id).await? {
            let offer = &summary.offer;
            let discount = match (offer.discount_percentage, offer.discount_amount) {
                (Some(pct), _) => format!("{pct}%"),
                (None, Some(amount)) => format!("-{amount}"),
                (None, None) => "-".to_string(),
            };
            println!(
                "  {:<32} {:<15} {:>8} {:>4} products  {}",
                offer.name,
                offer.offer_type.as_str(),
                discount,
                summary.product_count,
                if offer.is_active { "active" } else { "inactive" }
            );
        }
    }
    Ok(())
}

async fn cmd_sessions(pool: SqlitePool, limit: u32) -> Result<()> {
    let sessions = DieselSessionRepository::new(pool).recent(limit).await?;
    for session in sessions {
        println!(
            "{} {:<9} {} {} products {} errors  {}",
            session.started_at.format("%Y-%m-%d %H:%M:%S"),
            session.status.as_str(),
            session.restaurant_name.as_deref().unwrap_or("-"),
            session.product_count,
            session.errors.len(),
            session.source
        );
        if let Some(message) = &session.error_message {
            println!("    {message}");
        }
    }
    Ok(())
}
