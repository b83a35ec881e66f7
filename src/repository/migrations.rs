//! Embedded schema migrations.
//!
//! Each migration runs in its own transaction and is recorded in
//! `schema_migrations`; already-applied versions are skipped.

use chrono::Utc;
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use tracing::{debug, info};

use super::diesel_pool::{run_blocking, DieselError, SqlitePool};
use super::format_datetime;
use crate::schema::schema_migrations;

struct Migration {
    version: i32,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_menu_tables",
        sql: r#"
            CREATE TABLE restaurants (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                domain TEXT NOT NULL DEFAULT '',
                brand TEXT NOT NULL,
                slug TEXT NOT NULL,
                address TEXT,
                phone TEXT,
                rating TEXT,
                delivery_fee TEXT,
                minimum_order TEXT,
                delivery_time TEXT,
                source_url TEXT,
                last_scraped_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (name, domain)
            );

            CREATE TABLE categories (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                restaurant_id INTEGER NOT NULL REFERENCES restaurants(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                normalized_name TEXT NOT NULL,
                description TEXT,
                display_order INTEGER NOT NULL DEFAULT 0,
                source TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX idx_categories_restaurant_name
                ON categories(restaurant_id, normalized_name);

            CREATE TABLE products (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                restaurant_id INTEGER NOT NULL REFERENCES restaurants(id) ON DELETE CASCADE,
                category_id INTEGER NOT NULL REFERENCES categories(id),
                external_id TEXT,
                name TEXT NOT NULL,
                description TEXT,
                image_url TEXT,
                options TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX idx_products_restaurant_external
                ON products(restaurant_id, external_id);
            CREATE INDEX idx_products_restaurant_name
                ON products(restaurant_id, name);
            CREATE INDEX idx_products_category ON products(category_id);

            CREATE TABLE offers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                restaurant_id INTEGER NOT NULL REFERENCES restaurants(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                normalized_name TEXT NOT NULL,
                offer_type TEXT NOT NULL,
                discount_percentage TEXT,
                discount_amount TEXT,
                is_active INTEGER NOT NULL DEFAULT 1,
                start_date TEXT NOT NULL,
                end_date TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (restaurant_id, normalized_name),
                CHECK (discount_percentage IS NOT NULL OR discount_amount IS NOT NULL)
            );

            CREATE TABLE scraping_sessions (
                id TEXT PRIMARY KEY,
                restaurant_id INTEGER REFERENCES restaurants(id) ON DELETE SET NULL,
                restaurant_name TEXT,
                source TEXT NOT NULL,
                content_hash TEXT,
                scraped_at TEXT,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                status TEXT NOT NULL,
                product_count INTEGER NOT NULL DEFAULT 0,
                category_count INTEGER NOT NULL DEFAULT 0,
                created_count INTEGER NOT NULL DEFAULT 0,
                updated_count INTEGER NOT NULL DEFAULT 0,
                warnings TEXT NOT NULL DEFAULT '[]',
                errors TEXT NOT NULL DEFAULT '[]',
                error_message TEXT
            );
            CREATE INDEX idx_sessions_restaurant ON scraping_sessions(restaurant_id, started_at);
            CREATE INDEX idx_sessions_hash ON scraping_sessions(content_hash);

            CREATE TABLE product_prices (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                product_id INTEGER NOT NULL REFERENCES products(id) ON DELETE CASCADE,
                session_id TEXT REFERENCES scraping_sessions(id) ON DELETE SET NULL,
                price TEXT NOT NULL,
                original_price TEXT,
                discount_percentage TEXT,
                currency TEXT NOT NULL,
                availability INTEGER NOT NULL DEFAULT 1,
                offer_id INTEGER REFERENCES offers(id) ON DELETE SET NULL,
                offer_name TEXT,
                scraped_at TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX idx_prices_product_time ON product_prices(product_id, scraped_at);
            CREATE INDEX idx_prices_offer ON product_prices(offer_id);
        "#,
    },
    Migration {
        version: 2,
        name: "create_current_price_view",
        sql: r#"
            CREATE VIEW current_product_prices AS
            SELECT pp.*
            FROM product_prices pp
            WHERE pp.id = (
                SELECT latest.id FROM product_prices latest
                WHERE latest.product_id = pp.product_id
                ORDER BY latest.scraped_at DESC, latest.id DESC
                LIMIT 1
            );
        "#,
    },
];

/// Apply all pending migrations. Returns how many were applied.
pub async fn run_migrations(pool: &SqlitePool) -> Result<usize, DieselError> {
    run_blocking(pool.clone(), apply_pending).await
}

fn apply_pending(conn: &mut SqliteConnection) -> Result<usize, DieselError> {
    conn.batch_execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL
        )",
    )?;

    let applied: Vec<i32> = schema_migrations::table
        .select(schema_migrations::version)
        .load(conn)?;

    let mut count = 0;
    for migration in MIGRATIONS.iter().filter(|m| !applied.contains(&m.version)) {
        conn.immediate_transaction::<_, DieselError, _>(|conn| {
            conn.batch_execute(migration.sql)?;
            diesel::insert_into(schema_migrations::table)
                .values((
                    schema_migrations::version.eq(migration.version),
                    schema_migrations::name.eq(migration.name),
                    schema_migrations::applied_at.eq(format_datetime(&Utc::now())),
                ))
                .execute(conn)?;
            Ok(())
        })?;
        info!("Applied migration {} ({})", migration.version, migration.name);
        count += 1;
    }

    if count == 0 {
        debug!("Database schema is up to date");
    }
    Ok(count)
}
