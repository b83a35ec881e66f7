//! Shared helpers for integration tests.

#![allow(dead_code)]

use menuledger::repository::migrations::run_migrations;
use menuledger::repository::{create_diesel_pool_from_url, SqlitePool};
use menuledger::services::{ImportOptions, ImportService, ImportSummary};
use serde_json::{json, Value};

/// Create a temporary SQLite database with all migrations applied.
pub async fn setup_test_db() -> (SqlitePool, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let db_path = dir.path().join("test.db");
    let db_url = db_path.display().to_string();

    let pool = create_diesel_pool_from_url(&db_url).expect("Failed to create pool");
    run_migrations(&pool).await.expect("Failed to run migrations");

    (pool, dir)
}

/// A snapshot document for "Cafe Uno" with one declared category.
pub fn snapshot(scraped_at: &str, products: Value) -> Value {
    json!({
        "metadata": { "scraped_at": scraped_at, "domain": "foody.com.cy" },
        "source": { "url": "https://www.foody.com.cy/delivery/cafe-uno" },
        "restaurant": { "name": "Cafe Uno", "delivery_fee": 1.5 },
        "categories": [ { "name": "Coffee", "display_order": 1 } ],
        "products": products,
        "errors": []
    })
}

pub async fn import(service: &ImportService, doc: &Value) -> ImportSummary {
    service
        .import_json(&doc.to_string(), "test.json", &ImportOptions::default())
        .await
        .expect("import failed")
}
