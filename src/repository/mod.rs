//! Database access: pool, migrations, row models and per-table repositories.
//!
//! Sync Diesel on SQLite, wrapped in `spawn_blocking` by [`diesel_pool::run_blocking`].

pub mod diesel_category;
pub mod diesel_models;
pub mod diesel_offer;
pub mod diesel_pool;
pub mod diesel_price;
pub mod diesel_product;
pub mod diesel_restaurant;
pub mod diesel_session;
pub mod migrations;

use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use diesel::sql_types::BigInt;
use diesel::QueryableByName;
use rust_decimal::Decimal;

pub use diesel_category::DieselCategoryRepository;
pub use diesel_offer::DieselOfferRepository;
pub use diesel_pool::{create_diesel_pool, create_diesel_pool_from_url, run_blocking, SqlitePool};
pub use diesel_price::DieselPriceRepository;
pub use diesel_product::DieselProductRepository;
pub use diesel_restaurant::DieselRestaurantRepository;
pub use diesel_session::DieselSessionRepository;

/// Row id of the last INSERT on this connection.
#[derive(QueryableByName, Debug)]
pub struct LastInsertRowId {
    #[diesel(sql_type = BigInt)]
    pub id: i64,
}

/// Fetch the id assigned by the previous INSERT on `conn`.
pub fn last_insert_id(conn: &mut diesel::SqliteConnection) -> Result<i32, diesel::result::Error> {
    use diesel::RunQueryDsl;
    let row: LastInsertRowId = diesel::sql_query("SELECT last_insert_rowid() AS id").get_result(conn)?;
    Ok(row.id as i32)
}

/// Format a timestamp for storage. Fixed precision keeps text order equal to time order.
pub fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp, falling back to the Unix epoch on garbage.
pub fn parse_datetime(s: &str) -> DateTime<Utc> {
    parse_datetime_strict(s).unwrap_or_default()
}

pub fn parse_datetime_opt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.as_deref().and_then(parse_datetime_strict)
}

/// Parse RFC 3339, or a naive ISO-8601 timestamp taken as UTC.
pub fn parse_datetime_strict(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
}

pub fn format_decimal(d: &Decimal) -> String {
    d.normalize().to_string()
}

pub fn format_decimal_opt(d: Option<Decimal>) -> Option<String> {
    d.map(|d| format_decimal(&d))
}

/// Format a currency amount for storage: at least two decimal places, never
/// fewer digits than the value carries.
pub fn format_money(d: &Decimal) -> String {
    let mut money = d.normalize();
    if money.scale() < 2 {
        money.rescale(2);
    }
    money.to_string()
}

pub fn format_money_opt(d: Option<Decimal>) -> Option<String> {
    d.map(|d| format_money(&d))
}

pub fn parse_decimal(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap_or_default()
}

pub fn parse_decimal_opt(s: Option<String>) -> Option<Decimal> {
    s.as_deref().and_then(|s| Decimal::from_str(s).ok())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::diesel_pool::{create_diesel_pool_from_url, SqlitePool};
    use super::migrations::run_migrations;
    use tempfile::tempdir;

    /// Fresh migrated database in a temp dir. Keep the dir alive for the test.
    pub async fn setup_test_db() -> (SqlitePool, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let db_url = format!("{}", db_path.display());

        let pool = create_diesel_pool_from_url(&db_url).unwrap();
        run_migrations(&pool).await.unwrap();

        (pool, dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn stored_timestamps_sort_as_text() {
        let a = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
        let b = a + chrono::Duration::milliseconds(1500);
        assert!(format_datetime(&a) < format_datetime(&b));
        assert_eq!(format_datetime(&a), "2024-05-01T09:00:00.000000Z");
    }

    #[test]
    fn naive_timestamps_are_utc() {
        let parsed = parse_datetime_strict("2024-05-01T09:30:00.123456").unwrap();
        assert_eq!(format_datetime(&parsed), "2024-05-01T09:30:00.123456Z");

        let offset = parse_datetime_strict("2024-05-01T11:30:00+02:00").unwrap();
        assert_eq!(format_datetime(&offset), "2024-05-01T09:30:00.000000Z");

        assert!(parse_datetime_strict("yesterday").is_none());
    }

    #[test]
    fn decimals_are_stored_canonically() {
        assert_eq!(format_decimal(&Decimal::from_str("2.40").unwrap()), "2.4");
        assert_eq!(format_money(&Decimal::from_str("2.4").unwrap()), "2.40");
        assert_eq!(format_money(&Decimal::from_str("3").unwrap()), "3.00");
        assert_eq!(format_money(&Decimal::from_str("1.2350").unwrap()), "1.235");
        assert_eq!(parse_decimal("3.75"), Decimal::from_str("3.75").unwrap());
        assert_eq!(parse_decimal_opt(Some("x".into())), None);
    }
}
