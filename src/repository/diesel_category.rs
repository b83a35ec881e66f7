//! Diesel-based category repository for SQLite.

use diesel::prelude::*;

use super::diesel_models::CategoryRecord;
use super::diesel_pool::{run_blocking, DieselError, SqlitePool};
use super::parse_datetime;
use crate::models::{Category, CategorySource};
use crate::schema::{categories, products};

impl From<CategoryRecord> for Category {
    fn from(record: CategoryRecord) -> Self {
        Category {
            id: record.id,
            restaurant_id: record.restaurant_id,
            source: CategorySource::from_str(&record.source).unwrap_or(CategorySource::Menu),
            name: record.name,
            normalized_name: record.normalized_name,
            description: record.description,
            display_order: record.display_order,
            created_at: parse_datetime(&record.created_at),
            updated_at: parse_datetime(&record.updated_at),
        }
    }
}

#[derive(Clone)]
pub struct DieselCategoryRepository {
    pool: SqlitePool,
}

impl DieselCategoryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Categories of a restaurant in menu order.
    pub async fn for_restaurant(&self, restaurant_id: i32) -> Result<Vec<Category>, DieselError> {
        run_blocking(self.pool.clone(), move |conn| {
            categories::table
                .filter(categories::restaurant_id.eq(restaurant_id))
                .order((categories::display_order.asc(), categories::id.asc()))
                .load::<CategoryRecord>(conn)
        })
        .await
        .map(|records| records.into_iter().map(Category::from).collect())
    }

    pub async fn count_for_restaurant(&self, restaurant_id: i32) -> Result<u64, DieselError> {
        run_blocking(self.pool.clone(), move |conn| {
            use diesel::dsl::count_star;
            let count: i64 = categories::table
                .filter(categories::restaurant_id.eq(restaurant_id))
                .select(count_star())
                .first(conn)?;
            Ok(count as u64)
        })
        .await
    }

    /// Number of products assigned to a category.
    pub async fn product_count(&self, category_id: i32) -> Result<u64, DieselError> {
        run_blocking(self.pool.clone(), move |conn| {
            use diesel::dsl::count_star;
            let count: i64 = products::table
                .filter(products::category_id.eq(category_id))
                .select(count_star())
                .first(conn)?;
            Ok(count as u64)
        })
        .await
    }
}
