//! Diesel-based offer repository for SQLite.

use diesel::prelude::*;

use super::diesel_models::OfferRecord;
use super::diesel_pool::{run_blocking, DieselError, SqlitePool};
use super::{parse_datetime, parse_datetime_opt, parse_decimal_opt};
use crate::models::{Offer, OfferType};
use crate::reconcile::normalize_name;
use crate::schema::offers;

impl From<OfferRecord> for Offer {
    fn from(record: OfferRecord) -> Self {
        Offer {
            id: record.id,
            restaurant_id: record.restaurant_id,
            offer_type: OfferType::from_str(&record.offer_type).unwrap_or(OfferType::Named),
            name: record.name,
            normalized_name: record.normalized_name,
            discount_percentage: parse_decimal_opt(record.discount_percentage),
            discount_amount: parse_decimal_opt(record.discount_amount),
            is_active: record.is_active != 0,
            start_date: parse_datetime(&record.start_date),
            end_date: parse_datetime_opt(record.end_date),
            created_at: parse_datetime(&record.created_at),
            updated_at: parse_datetime(&record.updated_at),
        }
    }
}

#[derive(Clone)]
pub struct DieselOfferRepository {
    pool: SqlitePool,
}

impl DieselOfferRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, id: i32) -> Result<Option<Offer>, DieselError> {
        run_blocking(self.pool.clone(), move |conn| {
            offers::table.find(id).first::<OfferRecord>(conn).optional()
        })
        .await
        .map(|opt| opt.map(Offer::from))
    }

    /// All offers of a restaurant, active and retired.
    pub async fn for_restaurant(&self, restaurant_id: i32) -> Result<Vec<Offer>, DieselError> {
        run_blocking(self.pool.clone(), move |conn| {
            offers::table
                .filter(offers::restaurant_id.eq(restaurant_id))
                .order(offers::id.asc())
                .load::<OfferRecord>(conn)
        })
        .await
        .map(|records| records.into_iter().map(Offer::from).collect())
    }

    pub async fn active_for_restaurant(&self, restaurant_id: i32) -> Result<Vec<Offer>, DieselError> {
        run_blocking(self.pool.clone(), move |conn| {
            offers::table
                .filter(offers::restaurant_id.eq(restaurant_id))
                .filter(offers::is_active.eq(1))
                .order(offers::id.asc())
                .load::<OfferRecord>(conn)
        })
        .await
        .map(|records| records.into_iter().map(Offer::from).collect())
    }

    /// Look up an offer by name, case and whitespace insensitive.
    pub async fn find_by_name(
        &self,
        restaurant_id: i32,
        name: &str,
    ) -> Result<Option<Offer>, DieselError> {
        let normalized = normalize_name(name);
        run_blocking(self.pool.clone(), move |conn| {
            offers::table
                .filter(offers::restaurant_id.eq(restaurant_id))
                .filter(offers::normalized_name.eq(&normalized))
                .first::<OfferRecord>(conn)
                .optional()
        })
        .await
        .map(|opt| opt.map(Offer::from))
    }

    /// Administrative deletion. Price rows keep their history with the
    /// offer reference nulled (`ON DELETE SET NULL`).
    pub async fn delete(&self, id: i32) -> Result<bool, DieselError> {
        run_blocking(self.pool.clone(), move |conn| {
            let rows = diesel::delete(offers::table.find(id)).execute(conn)?;
            Ok(rows > 0)
        })
        .await
    }
}
