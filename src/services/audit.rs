//! Read-only integrity queries over stored menus.
//!
//! Detects the corruption signals a healthy import must never produce:
//! category explosions, products stuck in the fallback bucket, duplicate
//! product rows and offers without any discount.

use std::collections::HashMap;
use std::str::FromStr;

use diesel::prelude::*;
use diesel::sql_types::{BigInt, Integer, Text};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::models::{CategorySource, Offer};
use crate::repository::diesel_models::OfferRecord;
use crate::repository::diesel_pool::DieselError;
use crate::repository::{run_blocking, SqlitePool};
use crate::schema::offers;

/// Above this categories-per-product ratio a menu is considered corrupted.
pub const MAX_CATEGORY_RATIO: f64 = 0.5;

/// More categories than this is suspicious regardless of product count.
pub const MAX_CATEGORIES: i64 = 50;

#[derive(QueryableByName, Debug)]
struct CategoryHealthRow {
    #[diesel(sql_type = Integer)]
    restaurant_id: i32,
    #[diesel(sql_type = Text)]
    restaurant_name: String,
    #[diesel(sql_type = BigInt)]
    category_count: i64,
    #[diesel(sql_type = BigInt)]
    product_count: i64,
    #[diesel(sql_type = BigInt)]
    fallback_product_count: i64,
}

/// Category health of one restaurant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryHealth {
    pub restaurant_id: i32,
    pub restaurant_name: String,
    pub category_count: i64,
    pub product_count: i64,
    /// Categories per product; `None` for a restaurant without products.
    pub ratio: Option<f64>,
    /// Products sitting in the fallback category.
    pub fallback_product_count: i64,
    pub suspicious: bool,
}

impl From<CategoryHealthRow> for CategoryHealth {
    fn from(row: CategoryHealthRow) -> Self {
        let ratio = (row.product_count > 0).then(|| row.category_count as f64 / row.product_count as f64);
        let suspicious =
            row.category_count > MAX_CATEGORIES || ratio.is_some_and(|r| r > MAX_CATEGORY_RATIO);
        Self {
            restaurant_id: row.restaurant_id,
            restaurant_name: row.restaurant_name,
            category_count: row.category_count,
            product_count: row.product_count,
            ratio,
            fallback_product_count: row.fallback_product_count,
            suspicious,
        }
    }
}

#[derive(QueryableByName, Debug)]
struct DuplicateRow {
    #[diesel(sql_type = Integer)]
    restaurant_id: i32,
    #[diesel(sql_type = Text)]
    restaurant_name: String,
    #[diesel(sql_type = Text)]
    name: String,
    #[diesel(sql_type = Text)]
    ids: String,
}

/// Products of one restaurant sharing a name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateProducts {
    pub restaurant_id: i32,
    pub restaurant_name: String,
    pub name: String,
    /// Row ids, lowest first.
    pub product_ids: Vec<i32>,
}

#[derive(QueryableByName, Debug)]
struct OfferProductCount {
    #[diesel(sql_type = Integer)]
    offer_id: i32,
    #[diesel(sql_type = BigInt)]
    product_count: i64,
}

/// An offer with the number of products currently carrying it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OfferSummary {
    #[serde(flatten)]
    pub offer: Offer,
    /// Products whose current price row links this offer.
    pub product_count: i64,
}

#[derive(QueryableByName, Debug)]
struct OfferCounts {
    #[diesel(sql_type = BigInt)]
    total_offers: i64,
    #[diesel(sql_type = BigInt)]
    active_offers: i64,
    #[diesel(sql_type = BigInt)]
    restaurants_with_active_offers: i64,
    #[diesel(sql_type = BigInt)]
    products_on_offer: i64,
}

/// Store-wide offer figures.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OfferStatistics {
    pub total_offers: i64,
    pub active_offers: i64,
    pub restaurants_with_active_offers: i64,
    pub products_on_offer: i64,
    /// Mean discount percentage over active offers that have one.
    pub average_active_discount: Option<Decimal>,
}

/// Everything the audit checks, in one pass.
#[derive(Debug, Clone, Serialize)]
pub struct AuditReport {
    pub category_health: Vec<CategoryHealth>,
    pub duplicate_products: Vec<DuplicateProducts>,
    pub offers_missing_discount: Vec<Offer>,
    pub offer_statistics: OfferStatistics,
}

impl AuditReport {
    pub fn is_healthy(&self) -> bool {
        self.category_health.iter().all(|h| !h.suspicious)
            && self.duplicate_products.is_empty()
            && self.offers_missing_discount.is_empty()
    }

    pub fn suspicious_restaurants(&self) -> impl Iterator<Item = &CategoryHealth> {
        self.category_health.iter().filter(|h| h.suspicious)
    }
}

/// Read-only audit queries.
#[derive(Clone)]
pub struct Audit {
    pool: SqlitePool,
}

impl Audit {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Category health per restaurant, optionally for one restaurant only.
    pub async fn category_health(&self, restaurant_id: Option<i32>) -> Result<Vec<CategoryHealth>, DieselError> {
        let rows = run_blocking(self.pool.clone(), move |conn| {
            diesel::sql_query(
                "SELECT r.id AS restaurant_id,
                        r.name AS restaurant_name,
                        (SELECT COUNT(*) FROM categories c WHERE c.restaurant_id = r.id) AS category_count,
                        (SELECT COUNT(*) FROM products p WHERE p.restaurant_id = r.id) AS product_count,
                        (SELECT COUNT(*) FROM products p
                           JOIN categories c ON c.id = p.category_id
                          WHERE p.restaurant_id = r.id AND c.source = ?) AS fallback_product_count
                 FROM restaurants r
                 ORDER BY r.name, r.id",
            )
            .bind::<Text, _>(CategorySource::Fallback.as_str())
            .load::<CategoryHealthRow>(conn)
        })
        .await?;

        Ok(rows
            .into_iter()
            .filter(|row| restaurant_id.map_or(true, |id| row.restaurant_id == id))
            .map(CategoryHealth::from)
            .collect())
    }

    /// Groups of products sharing (restaurant, name).
    pub async fn duplicate_products(&self) -> Result<Vec<DuplicateProducts>, DieselError> {
        let rows = run_blocking(self.pool.clone(), move |conn| {
            diesel::sql_query(
                "SELECT p.restaurant_id AS restaurant_id,
                        r.name AS restaurant_name,
                        p.name AS name,
                        GROUP_CONCAT(p.id) AS ids
                 FROM products p
                 JOIN restaurants r ON r.id = p.restaurant_id
                 GROUP BY p.restaurant_id, p.name
                 HAVING COUNT(*) > 1
                 ORDER BY r.name, p.name",
            )
            .load::<DuplicateRow>(conn)
        })
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let mut product_ids: Vec<i32> = row.ids.split(',').filter_map(|id| id.trim().parse().ok()).collect();
                product_ids.sort_unstable();
                DuplicateProducts {
                    restaurant_id: row.restaurant_id,
                    restaurant_name: row.restaurant_name,
                    name: row.name,
                    product_ids,
                }
            })
            .collect())
    }

    /// Offers with neither a percentage nor an amount.
    pub async fn offers_missing_discount(&self) -> Result<Vec<Offer>, DieselError> {
        run_blocking(self.pool.clone(), move |conn| {
            offers::table
                .filter(offers::discount_percentage.is_null())
                .filter(offers::discount_amount.is_null())
                .order(offers::id.asc())
                .load::<OfferRecord>(conn)
        })
        .await
        .map(|records| records.into_iter().map(Offer::from).collect())
    }

    /// A restaurant's offers, active first, with current product counts.
    pub async fn offer_summaries(&self, restaurant_id: i32) -> Result<Vec<OfferSummary>, DieselError> {
        let (records, counts) = run_blocking(self.pool.clone(), move |conn| {
            let records = offers::table
                .filter(offers::restaurant_id.eq(restaurant_id))
                .order((offers::is_active.desc(), offers::name.asc()))
                .load::<OfferRecord>(conn)?;
            let counts = diesel::sql_query(
                "SELECT o.id AS offer_id, COUNT(cp.product_id) AS product_count
                 FROM offers o
                 LEFT JOIN current_product_prices cp ON cp.offer_id = o.id
                 WHERE o.restaurant_id = ?
                 GROUP BY o.id",
            )
            .bind::<Integer, _>(restaurant_id)
            .load::<OfferProductCount>(conn)?;
            Ok::<_, DieselError>((records, counts))
        })
        .await?;

        let counts: HashMap<i32, i64> = counts.into_iter().map(|c| (c.offer_id, c.product_count)).collect();
        Ok(records
            .into_iter()
            .map(|record| {
                let product_count = counts.get(&record.id).copied().unwrap_or(0);
                OfferSummary {
                    offer: Offer::from(record),
                    product_count,
                }
            })
            .collect())
    }

    pub async fn offer_statistics(&self) -> Result<OfferStatistics, DieselError> {
        let (counts, active_discounts) = run_blocking(self.pool.clone(), move |conn| {
            let counts = diesel::sql_query(
                "SELECT
                    (SELECT COUNT(*) FROM offers) AS total_offers,
                    (SELECT COUNT(*) FROM offers WHERE is_active = 1) AS active_offers,
                    (SELECT COUNT(DISTINCT restaurant_id) FROM offers WHERE is_active = 1)
                        AS restaurants_with_active_offers,
                    (SELECT COUNT(DISTINCT product_id) FROM current_product_prices
                      WHERE offer_id IS NOT NULL) AS products_on_offer",
            )
            .get_result::<OfferCounts>(conn)?;
            let discounts: Vec<Option<String>> = offers::table
                .filter(offers::is_active.eq(1))
                .select(offers::discount_percentage)
                .load(conn)?;
            Ok::<_, DieselError>((counts, discounts))
        })
        .await?;

        let discounts: Vec<Decimal> = active_discounts
            .into_iter()
            .flatten()
            .filter_map(|d| Decimal::from_str(&d).ok())
            .collect();
        let average_active_discount = (!discounts.is_empty()).then(|| {
            let sum: Decimal = discounts.iter().sum();
            (sum / Decimal::from(discounts.len() as u64)).round_dp(2)
        });

        Ok(OfferStatistics {
            total_offers: counts.total_offers,
            active_offers: counts.active_offers,
            restaurants_with_active_offers: counts.restaurants_with_active_offers,
            products_on_offer: counts.products_on_offer,
            average_active_discount,
        })
    }

    /// Run every check.
    pub async fn report(&self, restaurant_id: Option<i32>) -> Result<AuditReport, DieselError> {
        let category_health = self.category_health(restaurant_id).await?;
        let mut duplicate_products = self.duplicate_products().await?;
        let mut offers_missing_discount = self.offers_missing_discount().await?;
        if let Some(id) = restaurant_id {
            duplicate_products.retain(|d| d.restaurant_id == id);
            offers_missing_discount.retain(|o| o.restaurant_id == id);
        }

        Ok(AuditReport {
            category_health,
            duplicate_products,
            offers_missing_discount,
            offer_statistics: self.offer_statistics().await?,
        })
    }
}
