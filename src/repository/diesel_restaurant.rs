//! Diesel-based restaurant repository for SQLite.

use diesel::prelude::*;

use super::diesel_models::RestaurantRecord;
use super::diesel_pool::{run_blocking, DieselError, SqlitePool};
use super::{parse_datetime, parse_datetime_opt, parse_decimal_opt};
use crate::models::Restaurant;
use crate::schema::restaurants;

/// Convert a database record to a domain model.
impl From<RestaurantRecord> for Restaurant {
    fn from(record: RestaurantRecord) -> Self {
        Restaurant {
            id: record.id,
            name: record.name,
            domain: record.domain,
            brand: record.brand,
            slug: record.slug,
            address: record.address,
            phone: record.phone,
            rating: parse_decimal_opt(record.rating),
            delivery_fee: parse_decimal_opt(record.delivery_fee),
            minimum_order: parse_decimal_opt(record.minimum_order),
            delivery_time: record.delivery_time,
            source_url: record.source_url,
            last_scraped_at: parse_datetime_opt(record.last_scraped_at),
            created_at: parse_datetime(&record.created_at),
            updated_at: parse_datetime(&record.updated_at),
        }
    }
}

#[derive(Clone)]
pub struct DieselRestaurantRepository {
    pool: SqlitePool,
}

impl DieselRestaurantRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get a restaurant by ID.
    pub async fn get(&self, id: i32) -> Result<Option<Restaurant>, DieselError> {
        run_blocking(self.pool.clone(), move |conn| {
            restaurants::table
                .find(id)
                .first::<RestaurantRecord>(conn)
                .optional()
        })
        .await
        .map(|opt| opt.map(Restaurant::from))
    }

    /// Find a restaurant by its identity (name + source domain).
    pub async fn find(&self, name: &str, domain: &str) -> Result<Option<Restaurant>, DieselError> {
        let name = name.to_string();
        let domain = domain.to_string();

        run_blocking(self.pool.clone(), move |conn| {
            restaurants::table
                .filter(restaurants::name.eq(&name))
                .filter(restaurants::domain.eq(&domain))
                .first::<RestaurantRecord>(conn)
                .optional()
        })
        .await
        .map(|opt| opt.map(Restaurant::from))
    }

    /// Find restaurants by name on any domain.
    pub async fn find_by_name(&self, name: &str) -> Result<Vec<Restaurant>, DieselError> {
        let name = name.to_string();

        run_blocking(self.pool.clone(), move |conn| {
            restaurants::table
                .filter(restaurants::name.eq(&name))
                .order(restaurants::id.asc())
                .load::<RestaurantRecord>(conn)
        })
        .await
        .map(|records| records.into_iter().map(Restaurant::from).collect())
    }

    /// Get all restaurants ordered by name.
    pub async fn get_all(&self) -> Result<Vec<Restaurant>, DieselError> {
        run_blocking(self.pool.clone(), move |conn| {
            restaurants::table
                .order((restaurants::name.asc(), restaurants::domain.asc()))
                .load::<RestaurantRecord>(conn)
        })
        .await
        .map(|records| records.into_iter().map(Restaurant::from).collect())
    }

    /// Administrative deletion. Cascades to categories, products, price
    /// history and offers; sessions keep their row with the reference nulled.
    pub async fn delete(&self, id: i32) -> Result<bool, DieselError> {
        run_blocking(self.pool.clone(), move |conn| {
            conn.immediate_transaction::<_, DieselError, _>(|conn| {
                use crate::schema::{categories, products};
                // Products reference categories without cascade, so clear them first.
                diesel::delete(products::table.filter(products::restaurant_id.eq(id))).execute(conn)?;
                diesel::delete(categories::table.filter(categories::restaurant_id.eq(id))).execute(conn)?;
                let rows = diesel::delete(restaurants::table.find(id)).execute(conn)?;
                Ok(rows > 0)
            })
        })
        .await
    }
}
