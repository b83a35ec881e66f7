//! Diesel-based price ledger repository for SQLite.
//!
//! Read-only: ledger rows are only ever appended by the import pipeline.

use diesel::prelude::*;
use diesel::sql_types::Integer;

use super::diesel_models::ProductPriceRecord;
use super::diesel_pool::{run_blocking, DieselError, SqlitePool};
use super::{parse_datetime, parse_decimal, parse_decimal_opt};
use crate::models::ProductPrice;
use crate::schema::{product_prices, products};

impl From<ProductPriceRecord> for ProductPrice {
    fn from(record: ProductPriceRecord) -> Self {
        ProductPrice {
            id: record.id,
            product_id: record.product_id,
            session_id: record.session_id,
            price: parse_decimal(&record.price),
            original_price: parse_decimal_opt(record.original_price),
            discount_percentage: parse_decimal_opt(record.discount_percentage),
            currency: record.currency,
            availability: record.availability != 0,
            offer_id: record.offer_id,
            offer_name: record.offer_name,
            scraped_at: parse_datetime(&record.scraped_at),
            created_at: parse_datetime(&record.created_at),
        }
    }
}

#[derive(Clone)]
pub struct DieselPriceRepository {
    pool: SqlitePool,
}

impl DieselPriceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Full price history of a product, oldest first.
    pub async fn history(&self, product_id: i32) -> Result<Vec<ProductPrice>, DieselError> {
        run_blocking(self.pool.clone(), move |conn| {
            product_prices::table
                .filter(product_prices::product_id.eq(product_id))
                .order((product_prices::scraped_at.asc(), product_prices::id.asc()))
                .load::<ProductPriceRecord>(conn)
        })
        .await
        .map(|records| records.into_iter().map(ProductPrice::from).collect())
    }

    /// The current price of a product: the row with the latest scrape timestamp.
    pub async fn current(&self, product_id: i32) -> Result<Option<ProductPrice>, DieselError> {
        run_blocking(self.pool.clone(), move |conn| {
            product_prices::table
                .filter(product_prices::product_id.eq(product_id))
                .order((product_prices::scraped_at.desc(), product_prices::id.desc()))
                .first::<ProductPriceRecord>(conn)
                .optional()
        })
        .await
        .map(|opt| opt.map(ProductPrice::from))
    }

    /// Current prices of every product in a restaurant, read from the
    /// `current_product_prices` view.
    pub async fn current_for_restaurant(
        &self,
        restaurant_id: i32,
    ) -> Result<Vec<ProductPrice>, DieselError> {
        run_blocking(self.pool.clone(), move |conn| {
            diesel::sql_query(
                "SELECT cp.* FROM current_product_prices cp
                 JOIN products p ON p.id = cp.product_id
                 WHERE p.restaurant_id = ?
                 ORDER BY cp.product_id",
            )
            .bind::<Integer, _>(restaurant_id)
            .load::<ProductPriceRecord>(conn)
        })
        .await
        .map(|records| records.into_iter().map(ProductPrice::from).collect())
    }

    /// Number of ledger rows across a restaurant's products.
    pub async fn count_for_restaurant(&self, restaurant_id: i32) -> Result<u64, DieselError> {
        run_blocking(self.pool.clone(), move |conn| {
            use diesel::dsl::count_star;
            let count: i64 = product_prices::table
                .inner_join(products::table)
                .filter(products::restaurant_id.eq(restaurant_id))
                .select(count_star())
                .first(conn)?;
            Ok(count as u64)
        })
        .await
    }

    /// Ledger rows linked to an offer.
    pub async fn for_offer(&self, offer_id: i32) -> Result<Vec<ProductPrice>, DieselError> {
        run_blocking(self.pool.clone(), move |conn| {
            product_prices::table
                .filter(product_prices::offer_id.eq(offer_id))
                .order((product_prices::scraped_at.asc(), product_prices::id.asc()))
                .load::<ProductPriceRecord>(conn)
        })
        .await
        .map(|records| records.into_iter().map(ProductPrice::from).collect())
    }
}
