//! Diesel ORM models for database tables.
//!
//! Records mirror rows as stored (text timestamps and decimals); conversion to
//! domain models lives next to each repository.

use diesel::prelude::*;

use crate::schema;

/// Restaurant record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::restaurants)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct RestaurantRecord {
    pub id: i32,
    pub name: String,
    pub domain: String,
    pub brand: String,
    pub slug: String,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub rating: Option<String>,
    pub delivery_fee: Option<String>,
    pub minimum_order: Option<String>,
    pub delivery_time: Option<String>,
    pub source_url: Option<String>,
    pub last_scraped_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// New restaurant for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::restaurants)]
pub struct NewRestaurant<'a> {
    pub name: &'a str,
    pub domain: &'a str,
    pub brand: &'a str,
    pub slug: &'a str,
    pub address: Option<&'a str>,
    pub phone: Option<&'a str>,
    pub rating: Option<String>,
    pub delivery_fee: Option<String>,
    pub minimum_order: Option<String>,
    pub delivery_time: Option<&'a str>,
    pub source_url: Option<&'a str>,
    pub last_scraped_at: Option<&'a str>,
    pub created_at: &'a str,
    pub updated_at: &'a str,
}

/// Mutable restaurant metadata, refreshed on every current import.
#[derive(AsChangeset, Debug)]
#[diesel(table_name = schema::restaurants)]
#[diesel(treat_none_as_null = true)]
pub struct RestaurantMetadataChangeset<'a> {
    pub brand: &'a str,
    pub address: Option<&'a str>,
    pub phone: Option<&'a str>,
    pub rating: Option<String>,
    pub delivery_fee: Option<String>,
    pub minimum_order: Option<String>,
    pub delivery_time: Option<&'a str>,
    pub source_url: Option<&'a str>,
    pub last_scraped_at: Option<&'a str>,
    pub updated_at: &'a str,
}

/// Category record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::categories)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct CategoryRecord {
    pub id: i32,
    pub restaurant_id: i32,
    pub name: String,
    pub normalized_name: String,
    pub description: Option<String>,
    pub display_order: i32,
    pub source: String,
    pub created_at: String,
    pub updated_at: String,
}

/// New category for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::categories)]
pub struct NewCategory<'a> {
    pub restaurant_id: i32,
    pub name: &'a str,
    pub normalized_name: &'a str,
    pub description: Option<&'a str>,
    pub display_order: i32,
    pub source: &'a str,
    pub created_at: &'a str,
    pub updated_at: &'a str,
}

/// Product record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::products)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ProductRecord {
    pub id: i32,
    pub restaurant_id: i32,
    pub category_id: i32,
    pub external_id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub options: String,
    pub created_at: String,
    pub updated_at: String,
}

/// New product for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::products)]
pub struct NewProduct<'a> {
    pub restaurant_id: i32,
    pub category_id: i32,
    pub external_id: Option<&'a str>,
    pub name: &'a str,
    pub description: Option<&'a str>,
    pub image_url: Option<&'a str>,
    pub options: &'a str,
    pub created_at: &'a str,
    pub updated_at: &'a str,
}

/// Offer record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::offers)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct OfferRecord {
    pub id: i32,
    pub restaurant_id: i32,
    pub name: String,
    pub normalized_name: String,
    pub offer_type: String,
    pub discount_percentage: Option<String>,
    pub discount_amount: Option<String>,
    pub is_active: i32,
    pub start_date: String,
    pub end_date: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// New offer for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::offers)]
pub struct NewOffer<'a> {
    pub restaurant_id: i32,
    pub name: &'a str,
    pub normalized_name: &'a str,
    pub offer_type: &'a str,
    pub discount_percentage: Option<String>,
    pub discount_amount: Option<String>,
    pub is_active: i32,
    pub start_date: &'a str,
    pub end_date: Option<&'a str>,
    pub created_at: &'a str,
    pub updated_at: &'a str,
}

/// Price ledger record from the database.
///
/// Also loadable by name from the `current_product_prices` view.
#[derive(Queryable, QueryableByName, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::product_prices)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ProductPriceRecord {
    pub id: i32,
    pub product_id: i32,
    pub session_id: Option<String>,
    pub price: String,
    pub original_price: Option<String>,
    pub discount_percentage: Option<String>,
    pub currency: String,
    pub availability: i32,
    pub offer_id: Option<i32>,
    pub offer_name: Option<String>,
    pub scraped_at: String,
    pub created_at: String,
}

/// New price ledger row for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::product_prices)]
pub struct NewProductPrice<'a> {
    pub product_id: i32,
    pub session_id: Option<&'a str>,
    pub price: String,
    pub original_price: Option<String>,
    pub discount_percentage: Option<String>,
    pub currency: &'a str,
    pub availability: i32,
    pub offer_id: Option<i32>,
    pub offer_name: Option<&'a str>,
    pub scraped_at: &'a str,
    pub created_at: &'a str,
}

/// Scraping session record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::scraping_sessions)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ScrapingSessionRecord {
    pub id: String,
    pub restaurant_id: Option<i32>,
    pub restaurant_name: Option<String>,
    pub source: String,
    pub content_hash: Option<String>,
    pub scraped_at: Option<String>,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub status: String,
    pub product_count: i32,
    pub category_count: i32,
    pub created_count: i32,
    pub updated_count: i32,
    pub warnings: String,
    pub errors: String,
    pub error_message: Option<String>,
}

/// New scraping session for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::scraping_sessions)]
pub struct NewScrapingSession<'a> {
    pub id: &'a str,
    pub restaurant_id: Option<i32>,
    pub restaurant_name: Option<&'a str>,
    pub source: &'a str,
    pub content_hash: Option<&'a str>,
    pub scraped_at: Option<&'a str>,
    pub started_at: &'a str,
    pub status: &'a str,
}
