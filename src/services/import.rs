//! Snapshot import coordinator.
//!
//! One snapshot is imported in one `BEGIN IMMEDIATE` transaction: every
//! category, product, price and offer change for it commits together or not
//! at all. The session row is written in its own short transactions around
//! it, so failed imports stay observable.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use diesel::SqliteConnection;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{ImportError, Result};
use crate::reconcile::{
    ensure_restaurant, CategoryResolver, ChangeCounts, ImportContext, ImportReport, OfferLifecycle,
    PriceLedger, ProductReconciler,
};
use crate::repository::diesel_session::{SessionOutcome, SessionStart};
use crate::repository::{
    format_datetime, run_blocking, DieselRestaurantRepository, DieselSessionRepository, SqlitePool,
};
use crate::snapshot::{content_hash, Snapshot, DEFAULT_CURRENCY};

/// Cooperative cancellation shared between a caller and running imports.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-import limits.
#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    /// Deadline for one snapshot, including the wait for its restaurant lock.
    pub timeout: Option<Duration>,
    pub cancel: Option<CancelFlag>,
}

impl ImportOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            cancel: None,
        }
    }
}

/// Checked between products and before the offer sweep.
#[derive(Debug, Clone)]
struct Interrupt {
    deadline: Option<Instant>,
    cancel: Option<CancelFlag>,
}

impl Interrupt {
    fn new(options: &ImportOptions) -> Self {
        Self {
            deadline: options.timeout.map(|t| Instant::now() + t),
            cancel: options.cancel.clone(),
        }
    }

    fn check(&self) -> Result<()> {
        if self.cancel.as_ref().is_some_and(CancelFlag::is_cancelled) {
            return Err(ImportError::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(ImportError::Cancelled);
        }
        Ok(())
    }

    fn remaining(&self) -> Option<Duration> {
        self.deadline.map(|d| d.saturating_duration_since(Instant::now()))
    }
}

/// What the caller gets back from a successful import.
#[derive(Debug, Clone, Serialize)]
pub struct ImportSummary {
    pub session_id: String,
    pub source: String,
    pub restaurant_id: i32,
    pub restaurant_name: String,
    pub scraped_at: DateTime<Utc>,
    /// False when a newer snapshot of the restaurant was already imported.
    pub is_latest: bool,
    /// The snapshot had no products.
    pub suspicious_empty: bool,
    /// Earlier completed session that imported byte-identical content.
    pub duplicate_of: Option<String>,
    pub product_count: u32,
    pub category_count: u32,
    pub created: ChangeCounts,
    pub updated: ChangeCounts,
    pub deactivated_offers: Vec<String>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    /// Errors the scraper reported in the snapshot itself.
    pub scraper_errors: Vec<String>,
}

/// Progress of a multi-file import.
#[derive(Debug, Clone)]
pub enum ImportEvent {
    /// Files were ordered and are about to be imported.
    Planned { total: usize },
    Started { path: PathBuf },
    Finished { path: PathBuf, ok: bool },
}

/// Result of one file of a multi-file import.
#[derive(Debug)]
pub struct FileOutcome {
    pub path: PathBuf,
    pub result: Result<ImportSummary>,
}

/// In-process serialization of imports per restaurant identity.
#[derive(Clone, Default)]
struct RestaurantLocks {
    inner: Arc<Mutex<HashMap<(String, String), Arc<tokio::sync::Mutex<()>>>>>,
}

impl RestaurantLocks {
    fn lock_for(&self, name: &str, domain: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        map.entry((name.to_string(), domain.to_string()))
            .or_default()
            .clone()
    }

    /// Drop locks nobody holds or waits for.
    fn prune(&self) {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        map.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Service for importing menu snapshots.
#[derive(Clone)]
pub struct ImportService {
    pool: SqlitePool,
    sessions: DieselSessionRepository,
    restaurants: DieselRestaurantRepository,
    locks: RestaurantLocks,
    default_currency: String,
}

impl ImportService {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            sessions: DieselSessionRepository::new(pool.clone()),
            restaurants: DieselRestaurantRepository::new(pool.clone()),
            pool,
            locks: RestaurantLocks::default(),
            default_currency: DEFAULT_CURRENCY.to_string(),
        }
    }

    pub fn with_default_currency(mut self, currency: impl Into<String>) -> Self {
        self.default_currency = currency.into();
        self
    }

    /// Import one snapshot file.
    pub async fn import_file(&self, path: &Path, options: &ImportOptions) -> Result<ImportSummary> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ImportError::io(path, e))?;
        self.import_json(&raw, &path.display().to_string(), options).await
    }

    /// Import a raw JSON document. `source` identifies it on the session.
    pub async fn import_json(&self, raw: &str, source: &str, options: &ImportOptions) -> Result<ImportSummary> {
        match Snapshot::from_json_str(raw, &self.default_currency) {
            Ok(snapshot) => self.import_snapshot(snapshot, source, options).await,
            Err(err) => {
                warn!("{} rejected: {}", source, err);
                let violations = err.violations.iter().map(ToString::to_string).collect();
                self.record_rejected(source, Some(content_hash(raw.as_bytes())), &err.to_string(), violations)
                    .await?;
                Err(err.into())
            }
        }
    }

    /// Import an already validated snapshot.
    pub async fn import_snapshot(
        &self,
        snapshot: Snapshot,
        source: &str,
        options: &ImportOptions,
    ) -> Result<ImportSummary> {
        let interrupt = Interrupt::new(options);
        let session_id = Uuid::new_v4().to_string();
        let restaurant_name = snapshot.restaurant.name.clone();
        let content_hash = (!snapshot.content_hash.is_empty()).then(|| snapshot.content_hash.clone());

        let duplicate_of = match &content_hash {
            Some(hash) => self.find_duplicate(&snapshot, hash).await?,
            None => None,
        };
        if let Some(previous) = &duplicate_of {
            info!("{} has identical content to session {}", source, previous);
        }

        self.sessions
            .start(SessionStart {
                id: session_id.clone(),
                restaurant_name: Some(restaurant_name.clone()),
                source: source.to_string(),
                content_hash: content_hash.clone(),
                scraped_at: Some(snapshot.scraped_at),
            })
            .await?;

        let suspicious_empty = snapshot.is_suspicious();
        if suspicious_empty {
            warn!("{}: snapshot for '{}' contains zero products", source, restaurant_name);
        }

        match self.reconcile_locked(snapshot.clone(), &session_id, &interrupt).await {
            Ok((report, restaurant_id, is_latest)) => {
                let mut warnings = snapshot.warnings.clone();
                warnings.extend(report.warnings.iter().cloned());
                let mut session_errors = snapshot.scraper_errors.clone();
                session_errors.extend(report.errors.iter().cloned());

                self.sessions
                    .complete(
                        &session_id,
                        SessionOutcome {
                            restaurant_id: Some(restaurant_id),
                            product_count: report.product_count,
                            category_count: report.category_count,
                            created_count: report.created.total(),
                            updated_count: report.updated.total(),
                            warnings: warnings.clone(),
                            errors: session_errors,
                        },
                    )
                    .await?;

                info!(
                    "Imported {} for '{}': {} products, {} created, {} updated, {} warnings, {} errors",
                    source,
                    restaurant_name,
                    report.product_count,
                    report.created.total(),
                    report.updated.total(),
                    warnings.len(),
                    report.errors.len()
                );

                Ok(ImportSummary {
                    session_id,
                    source: source.to_string(),
                    restaurant_id,
                    restaurant_name,
                    scraped_at: snapshot.scraped_at,
                    is_latest,
                    suspicious_empty,
                    duplicate_of,
                    product_count: report.product_count,
                    category_count: report.category_count,
                    created: report.created,
                    updated: report.updated,
                    deactivated_offers: report.deactivated_offers,
                    warnings,
                    errors: report.errors,
                    scraper_errors: snapshot.scraper_errors,
                })
            }
            Err(err) => {
                warn!("Import of {} failed and was rolled back: {}", source, err);
                if let Err(session_err) = self
                    .sessions
                    .fail(&session_id, &err.to_string(), snapshot.scraper_errors.clone())
                    .await
                {
                    warn!("Could not record failure of session {}: {}", session_id, session_err);
                }
                Err(err)
            }
        }
    }

    /// Import files and directories of `*.json` snapshots.
    ///
    /// All snapshots are validated first and imported oldest `scraped_at`
    /// first. Files that fail validation are reported without stopping the
    /// rest; cancellation stops the run.
    pub async fn import_paths(
        &self,
        paths: &[PathBuf],
        options: &ImportOptions,
        events: Option<mpsc::UnboundedSender<ImportEvent>>,
    ) -> Result<Vec<FileOutcome>> {
        let files = collect_snapshot_files(paths).await?;
        let mut outcomes = Vec::new();
        let mut planned: Vec<(Snapshot, PathBuf)> = Vec::new();

        for path in files {
            let raw = match tokio::fs::read_to_string(&path).await {
                Ok(raw) => raw,
                Err(e) => {
                    outcomes.push(FileOutcome {
                        result: Err(ImportError::io(&path, e)),
                        path,
                    });
                    continue;
                }
            };
            match Snapshot::from_json_str(&raw, &self.default_currency) {
                Ok(snapshot) => planned.push((snapshot, path)),
                Err(err) => {
                    let source = path.display().to_string();
                    warn!("{} rejected: {}", source, err);
                    self.record_rejected(
                        &source,
                        Some(content_hash(raw.as_bytes())),
                        &err.to_string(),
                        err.violations.iter().map(ToString::to_string).collect(),
                    )
                    .await?;
                    outcomes.push(FileOutcome {
                        path,
                        result: Err(err.into()),
                    });
                }
            }
        }

        planned.sort_by(|(a, a_path), (b, b_path)| a.scraped_at.cmp(&b.scraped_at).then_with(|| a_path.cmp(b_path)));
        send(&events, ImportEvent::Planned { total: planned.len() });

        for (snapshot, path) in planned {
            if options.cancel.as_ref().is_some_and(CancelFlag::is_cancelled) {
                info!("Import cancelled; {} not imported", path.display());
                outcomes.push(FileOutcome {
                    path,
                    result: Err(ImportError::Cancelled),
                });
                continue;
            }

            send(&events, ImportEvent::Started { path: path.clone() });
            let result = self
                .import_snapshot(snapshot, &path.display().to_string(), options)
                .await;
            send(
                &events,
                ImportEvent::Finished {
                    path: path.clone(),
                    ok: result.is_ok(),
                },
            );
            outcomes.push(FileOutcome { path, result });
        }

        Ok(outcomes)
    }

    /// Import every snapshot in a directory, oldest first.
    pub async fn import_directory(&self, dir: &Path, options: &ImportOptions) -> Result<Vec<FileOutcome>> {
        self.import_paths(&[dir.to_path_buf()], options, None).await
    }

    /// Completed session of the same restaurant (name and domain) with
    /// identical content.
    async fn find_duplicate(&self, snapshot: &Snapshot, hash: &str) -> Result<Option<String>> {
        let Some(restaurant) = self
            .restaurants
            .find(&snapshot.restaurant.name, &snapshot.domain)
            .await?
        else {
            return Ok(None);
        };
        Ok(self
            .sessions
            .find_completed_with_hash(restaurant.id, hash)
            .await?
            .map(|s| s.id))
    }

    /// Record a session for a snapshot rejected before any write.
    async fn record_rejected(
        &self,
        source: &str,
        content_hash: Option<String>,
        message: &str,
        errors: Vec<String>,
    ) -> Result<()> {
        let session_id = Uuid::new_v4().to_string();
        self.sessions
            .start(SessionStart {
                id: session_id.clone(),
                restaurant_name: None,
                source: source.to_string(),
                content_hash,
                scraped_at: None,
            })
            .await?;
        self.sessions.fail(&session_id, message, errors).await?;
        Ok(())
    }

    /// Take the restaurant lock and run the reconciliation transaction.
    async fn reconcile_locked(
        &self,
        snapshot: Snapshot,
        session_id: &str,
        interrupt: &Interrupt,
    ) -> Result<(ImportReport, i32, bool)> {
        let result = self.reconcile_guarded(snapshot, session_id, interrupt).await;
        self.locks.prune();
        result
    }

    async fn reconcile_guarded(
        &self,
        snapshot: Snapshot,
        session_id: &str,
        interrupt: &Interrupt,
    ) -> Result<(ImportReport, i32, bool)> {
        let lock = self.locks.lock_for(&snapshot.restaurant.name, &snapshot.domain);
        let _guard = match interrupt.remaining() {
            Some(remaining) => tokio::time::timeout(remaining, lock.lock_owned())
                .await
                .map_err(|_| ImportError::Cancelled)?,
            None => lock.lock_owned().await,
        };
        interrupt.check()?;

        let session_id = session_id.to_string();
        let interrupt = interrupt.clone();
        run_blocking(self.pool.clone(), move |conn| {
            conn.immediate_transaction(|conn| reconcile_snapshot(conn, &snapshot, &session_id, &interrupt))
        })
        .await
    }
}

/// The body of the import transaction.
fn reconcile_snapshot(
    conn: &mut SqliteConnection,
    snapshot: &Snapshot,
    session_id: &str,
    interrupt: &Interrupt,
) -> Result<(ImportReport, i32, bool)> {
    let now = format_datetime(&Utc::now());
    let resolution = ensure_restaurant(conn, snapshot, &now)?;
    let ctx = ImportContext::new(resolution.id, session_id, snapshot.scraped_at, resolution.is_latest);
    let mut report = ImportReport::default();
    if resolution.created {
        report.created.restaurants += 1;
    }

    let mut categories = CategoryResolver::load(conn, ctx.restaurant_id)?;
    for (position, category) in snapshot.categories.iter().enumerate() {
        categories.declare(conn, category, position, &ctx, &mut report)?;
    }

    let mut products = ProductReconciler::new(ctx.restaurant_id);
    let mut offers = OfferLifecycle::new(ctx.restaurant_id);
    let mut used_categories = HashSet::new();

    for product in &snapshot.products {
        interrupt.check()?;

        let category_id = categories.resolve_for_product(conn, product, &ctx, &mut report)?;
        let Some(reconciled) = products.reconcile(conn, category_id, product, &ctx, &mut report)? else {
            continue;
        };
        used_categories.insert(category_id);
        PriceLedger::append(conn, reconciled.id, product, &mut offers, &ctx, &mut report)?;
    }

    interrupt.check()?;
    if snapshot.products.is_empty() {
        // An empty menu is far more likely a failed scrape than a restaurant
        // that dropped every offer at once.
        report.warn("Offer sweep skipped for an empty snapshot");
    } else {
        offers.sweep(conn, &ctx, &mut report)?;
    }

    report.product_count = products.seen_count() as u32;
    report.category_count = used_categories.len() as u32;
    debug!(
        "Reconciled restaurant {}: {} products in {} categories, {} offers referenced",
        ctx.restaurant_id,
        report.product_count,
        report.category_count,
        offers.referenced_count()
    );

    Ok((report, ctx.restaurant_id, ctx.is_latest))
}

fn send(events: &Option<mpsc::UnboundedSender<ImportEvent>>, event: ImportEvent) {
    if let Some(tx) = events {
        let _ = tx.send(event);
    }
}

/// Expand directories into their `*.json` files. Files are kept as given.
pub async fn collect_snapshot_files(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| ImportError::io(path, e))?;
        if !metadata.is_dir() {
            files.push(path.clone());
            continue;
        }

        let mut entries = tokio::fs::read_dir(path)
            .await
            .map_err(|e| ImportError::io(path, e))?;
        let mut found = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| ImportError::io(path, e))? {
            let entry_path = entry.path();
            if entry_path.extension().is_some_and(|ext| ext == "json") && entry_path.is_file() {
                found.push(entry_path);
            }
        }
        found.sort();
        files.extend(found);
    }
    Ok(files)
}
