//! Audit checks over imported menus.

mod common;

use std::str::FromStr;

use rust_decimal::Decimal;
use serde_json::json;

use common::{import, setup_test_db, snapshot};
use menuledger::reconcile::FALLBACK_CATEGORY;
use menuledger::repository::DieselCategoryRepository;
use menuledger::services::{Audit, ImportService};

#[tokio::test]
async fn imported_menus_audit_clean() {
    let (pool, _dir) = setup_test_db().await;
    let service = ImportService::new(pool.clone());

    import(
        &service,
        &snapshot(
            "2024-05-01T09:00:00Z",
            json!([
                { "id": 1, "name": "Espresso", "category": "Coffee", "price": 2.4,
                  "original_price": 3.0, "discount_percentage": 20, "offer_name": "Morning Special" },
                { "id": 2, "name": "Latte", "category": "Coffee", "price": 3.2,
                  "discount_percentage": 10 },
                { "id": 3, "name": "Americano", "category": "Coffee", "price": 2.8 }
            ]),
        ),
    )
    .await;

    let report = Audit::new(pool).report(None).await.unwrap();
    assert!(report.is_healthy(), "{report:?}");
    assert_eq!(report.suspicious_restaurants().count(), 0);
    assert!(report.duplicate_products.is_empty());
    assert!(report.offers_missing_discount.is_empty());

    let stats = &report.offer_statistics;
    assert_eq!(stats.total_offers, 2);
    assert_eq!(stats.active_offers, 2);
    assert_eq!(stats.restaurants_with_active_offers, 1);
    assert_eq!(stats.products_on_offer, 2);
    assert_eq!(stats.average_active_discount, Some(Decimal::from_str("15").unwrap()));
}

#[tokio::test]
async fn declared_categories_never_fall_back() {
    let (pool, _dir) = setup_test_db().await;
    let service = ImportService::new(pool.clone());

    let mut doc = snapshot(
        "2024-05-01T09:00:00Z",
        json!([
            { "id": 1, "name": "Espresso", "category": "Coffee", "price": 2.4 },
            { "id": 2, "name": "Soup", "category": "Soup", "price": 6.5 }
        ]),
    );
    doc["categories"] = json!([]);
    let summary = import(&service, &doc).await;
    assert!(summary.warnings.iter().any(|w| w.contains("Soup")));

    let categories = DieselCategoryRepository::new(pool.clone())
        .for_restaurant(summary.restaurant_id)
        .await
        .unwrap();
    let names: Vec<&str> = categories.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names.len(), 2);
    assert!(names.contains(&"Coffee"));
    assert!(names.contains(&"Soup"));
    assert!(!names.contains(&FALLBACK_CATEGORY));

    let health = Audit::new(pool).category_health(Some(summary.restaurant_id)).await.unwrap();
    assert_eq!(health[0].fallback_product_count, 0);
}

#[tokio::test]
async fn stored_menu_category_is_kept_when_later_snapshot_omits_declarations() {
    let (pool, _dir) = setup_test_db().await;
    let service = ImportService::new(pool.clone());
    let products = json!([{ "id": 1, "name": "Soup", "category": "Soup", "price": 6.5 }]);

    let mut first = snapshot("2024-05-01T09:00:00Z", products.clone());
    first["categories"] = json!([{ "name": "Soup" }]);
    let first = import(&service, &first).await;

    let mut second = snapshot("2024-05-02T09:00:00Z", products);
    second["categories"] = json!([]);
    let second = import(&service, &second).await;
    assert_eq!(second.updated.products, 0);
    assert_eq!(second.created.categories, 0);
    assert!(second.warnings.is_empty(), "{:?}", second.warnings);

    let health = Audit::new(pool).category_health(Some(first.restaurant_id)).await.unwrap();
    assert_eq!(health[0].category_count, 1);
    assert_eq!(health[0].fallback_product_count, 0);
}

#[tokio::test]
async fn missing_categories_land_in_fallback() {
    let (pool, _dir) = setup_test_db().await;
    let service = ImportService::new(pool.clone());

    let summary = import(
        &service,
        &snapshot(
            "2024-05-01T09:00:00Z",
            json!([
                { "id": 1, "name": "Espresso", "category": "Coffee", "price": 2.4 },
                { "id": 2, "name": "Water", "price": 1 },
                { "id": 3, "name": "Juice", "category": " ", "price": 3 }
            ]),
        ),
    )
    .await;

    let health = Audit::new(pool).category_health(Some(summary.restaurant_id)).await.unwrap();
    assert_eq!(health[0].fallback_product_count, 2);
    assert_eq!(health[0].category_count, 2);
    assert_eq!(health[0].product_count, 3);
}
