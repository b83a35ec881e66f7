//! Diesel-based product repository for SQLite.

use diesel::prelude::*;

use super::diesel_models::ProductRecord;
use super::diesel_pool::{run_blocking, DieselError, SqlitePool};
use super::parse_datetime;
use crate::models::Product;
use crate::schema::products;

impl From<ProductRecord> for Product {
    fn from(record: ProductRecord) -> Self {
        Product {
            id: record.id,
            restaurant_id: record.restaurant_id,
            category_id: record.category_id,
            external_id: record.external_id,
            name: record.name,
            description: record.description,
            image_url: record.image_url,
            options: serde_json::from_str(&record.options).unwrap_or_default(),
            created_at: parse_datetime(&record.created_at),
            updated_at: parse_datetime(&record.updated_at),
        }
    }
}

#[derive(Clone)]
pub struct DieselProductRepository {
    pool: SqlitePool,
}

impl DieselProductRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, id: i32) -> Result<Option<Product>, DieselError> {
        run_blocking(self.pool.clone(), move |conn| {
            products::table.find(id).first::<ProductRecord>(conn).optional()
        })
        .await
        .map(|opt| opt.map(Product::from))
    }

    /// All products of a restaurant, oldest first.
    pub async fn for_restaurant(&self, restaurant_id: i32) -> Result<Vec<Product>, DieselError> {
        run_blocking(self.pool.clone(), move |conn| {
            products::table
                .filter(products::restaurant_id.eq(restaurant_id))
                .order((products::created_at.asc(), products::id.asc()))
                .load::<ProductRecord>(conn)
        })
        .await
        .map(|records| records.into_iter().map(Product::from).collect())
    }

    /// Products with exactly this name in a restaurant.
    pub async fn find_by_name(
        &self,
        restaurant_id: i32,
        name: &str,
    ) -> Result<Vec<Product>, DieselError> {
        let name = name.to_string();
        run_blocking(self.pool.clone(), move |conn| {
            products::table
                .filter(products::restaurant_id.eq(restaurant_id))
                .filter(products::name.eq(&name))
                .order((products::created_at.asc(), products::id.asc()))
                .load::<ProductRecord>(conn)
        })
        .await
        .map(|records| records.into_iter().map(Product::from).collect())
    }

    pub async fn count_for_restaurant(&self, restaurant_id: i32) -> Result<u64, DieselError> {
        run_blocking(self.pool.clone(), move |conn| {
            use diesel::dsl::count_star;
            let count: i64 = products::table
                .filter(products::restaurant_id.eq(restaurant_id))
                .select(count_star())
                .first(conn)?;
            Ok(count as u64)
        })
        .await
    }

    /// Administrative deletion. The product's price history goes with it.
    pub async fn delete(&self, id: i32) -> Result<bool, DieselError> {
        run_blocking(self.pool.clone(), move |conn| {
            let rows = diesel::delete(products::table.find(id)).execute(conn)?;
            Ok(rows > 0)
        })
        .await
    }
}
