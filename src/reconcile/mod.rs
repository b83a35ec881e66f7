//! Reconciliation of one validated snapshot against stored state.
//!
//! Everything here is synchronous and runs on a single connection inside the
//! import transaction opened by [`crate::services::ImportService`]. The
//! pieces are used in order: restaurant, categories, then per product the
//! product identity, its price row and offer link, and finally the offer
//! deactivation sweep.

pub mod category;
pub mod pricing;
pub mod product;
pub mod restaurant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, warn};

pub use category::CategoryResolver;
pub use pricing::{corrected_original_price, derive_offer, OfferDerivation, OfferLifecycle, PriceLedger};
pub use product::{ProductReconciler, ReconciledProduct};
pub use restaurant::{ensure_restaurant, slugify, RestaurantResolution};

use crate::repository::format_datetime;

/// Name of the per-restaurant bucket for products without a usable category.
pub const FALLBACK_CATEGORY: &str = "Uncategorized";

/// Display order of the fallback category, after everything declared.
pub const FALLBACK_DISPLAY_ORDER: i32 = 999;

/// Normalize a name for identity matching: trimmed, inner whitespace
/// collapsed, lowercased.
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Per-import values shared by every reconciler.
#[derive(Debug, Clone)]
pub struct ImportContext {
    pub restaurant_id: i32,
    pub session_id: String,
    pub scraped_at: DateTime<Utc>,
    /// `scraped_at` in storage format.
    pub scraped_at_text: String,
    /// Wall-clock time of the import in storage format.
    pub now: String,
    /// False when this snapshot is older than the last one imported for the
    /// restaurant. Stale imports only append history.
    pub is_latest: bool,
}

impl ImportContext {
    pub fn new(restaurant_id: i32, session_id: &str, scraped_at: DateTime<Utc>, is_latest: bool) -> Self {
        Self {
            restaurant_id,
            session_id: session_id.to_string(),
            scraped_at,
            scraped_at_text: format_datetime(&scraped_at),
            now: format_datetime(&Utc::now()),
            is_latest,
        }
    }
}

/// Row counts per entity kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChangeCounts {
    pub restaurants: u32,
    pub categories: u32,
    pub products: u32,
    pub offers: u32,
    pub prices: u32,
}

impl ChangeCounts {
    pub fn total(&self) -> u32 {
        self.restaurants + self.categories + self.products + self.offers + self.prices
    }
}

/// What one reconciliation run did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportReport {
    pub created: ChangeCounts,
    pub updated: ChangeCounts,
    /// Names of offers retired by the sweep.
    pub deactivated_offers: Vec<String>,
    pub warnings: Vec<String>,
    /// Recoverable errors: rejected price rows and similar.
    pub errors: Vec<String>,
    /// Distinct products the snapshot reconciled to.
    pub product_count: u32,
    /// Distinct categories the snapshot's products landed in.
    pub category_count: u32,
}

impl ImportReport {
    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!("{}", message);
        self.warnings.push(message);
    }

    pub fn error(&mut self, message: impl Into<String>) {
        let message = message.into();
        error!("{}", message);
        self.errors.push(message);
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{TimeZone, Utc};
    use diesel::SqliteConnection;
    use rust_decimal::Decimal;

    use super::ImportContext;
    use crate::repository::diesel_models::NewRestaurant;
    use crate::repository::{format_datetime, last_insert_id};
    use crate::schema::restaurants;
    use crate::snapshot::{SnapshotProduct, DEFAULT_CURRENCY};

    pub fn at(hour: u32) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap()
    }

    /// Insert a bare restaurant and return an import context for it.
    pub fn restaurant(conn: &mut SqliteConnection, name: &str, hour: u32) -> ImportContext {
        use diesel::RunQueryDsl;
        let now = format_datetime(&Utc::now());
        diesel::insert_into(restaurants::table)
            .values(&NewRestaurant {
                name,
                domain: "",
                brand: name,
                slug: &super::slugify(name),
                address: None,
                phone: None,
                rating: None,
                delivery_fee: None,
                minimum_order: None,
                delivery_time: None,
                source_url: None,
                last_scraped_at: None,
                created_at: &now,
                updated_at: &now,
            })
            .execute(conn)
            .unwrap();
        let id = last_insert_id(conn).unwrap();
        diesel::sql_query(
            "INSERT OR IGNORE INTO scraping_sessions (id, source, started_at, status)
             VALUES ('test-session', 'test', '2024-05-01T00:00:00.000000Z', 'running')",
        )
        .execute(conn)
        .unwrap();
        ImportContext::new(id, "test-session", at(hour), true)
    }

    pub fn product(name: &str, category: Option<&str>, price: &str) -> SnapshotProduct {
        SnapshotProduct {
            index: 0,
            external_id: None,
            name: name.to_string(),
            category: category.map(str::to_string),
            description: None,
            image_url: None,
            options: Vec::new(),
            price: price.parse::<Decimal>().unwrap(),
            original_price: None,
            discount_percentage: None,
            offer_name: None,
            currency: DEFAULT_CURRENCY.to_string(),
            availability: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_case_and_whitespace() {
        assert_eq!(normalize_name("  Hot   Drinks "), "hot drinks");
        assert_eq!(normalize_name("MORNING\tSpecial"), "morning special");
        assert_eq!(normalize_name(""), "");
    }

    #[test]
    fn report_collects_warnings_and_errors() {
        let mut report = ImportReport::default();
        report.warn("w");
        report.error("e");
        assert_eq!(report.warnings, vec!["w".to_string()]);
        assert_eq!(report.errors, vec!["e".to_string()]);
    }
}
