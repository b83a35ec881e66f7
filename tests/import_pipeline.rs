//! End-to-end import scenarios against a real SQLite file.

mod common;

use std::str::FromStr;

use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use serde_json::json;

use common::{import, setup_test_db, snapshot};
use menuledger::models::{OfferType, SessionStatus};
use menuledger::repository::{
    DieselCategoryRepository, DieselOfferRepository, DieselPriceRepository, DieselProductRepository,
    DieselRestaurantRepository, DieselSessionRepository,
};
use menuledger::services::{Audit, CancelFlag, ImportOptions, ImportService};
use menuledger::ImportError;

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn morning_menu() -> serde_json::Value {
    json!([
        { "id": 1, "name": "Espresso", "category": "Coffee", "price": 2.40,
          "original_price": 3.00, "discount_percentage": 20, "offer_name": "Morning Special" },
        { "id": 2, "name": "Cortado", "category": "Coffee", "price": 1.60,
          "original_price": 2.00, "discount_percentage": 20, "offer_name": "Morning Special" },
        { "id": 3, "name": "Latte", "category": "Coffee", "price": 3.20 }
    ])
}

#[tokio::test]
async fn morning_special_end_to_end() {
    let (pool, _dir) = setup_test_db().await;
    let service = ImportService::new(pool.clone());

    let summary = import(&service, &snapshot("2024-05-01T09:00:00Z", morning_menu())).await;
    assert!(summary.is_latest);
    assert!(summary.errors.is_empty(), "{:?}", summary.errors);
    assert_eq!(summary.created.restaurants, 1);
    assert_eq!(summary.created.products, 3);
    assert_eq!(summary.created.offers, 1);
    assert_eq!(summary.created.prices, 3);

    let restaurants = DieselRestaurantRepository::new(pool.clone()).get_all().await.unwrap();
    assert_eq!(restaurants.len(), 1);
    let rid = restaurants[0].id;

    let categories = DieselCategoryRepository::new(pool.clone())
        .for_restaurant(rid)
        .await
        .unwrap();
    assert_eq!(categories.len(), 1);
    assert_eq!(categories[0].name, "Coffee");

    assert_eq!(DieselProductRepository::new(pool.clone()).count_for_restaurant(rid).await.unwrap(), 3);
    assert_eq!(DieselPriceRepository::new(pool.clone()).count_for_restaurant(rid).await.unwrap(), 3);

    let offers = Audit::new(pool.clone()).offer_summaries(rid).await.unwrap();
    assert_eq!(offers.len(), 1);
    assert_eq!(offers[0].offer.name, "Morning Special");
    assert_eq!(offers[0].offer.offer_type, OfferType::Named);
    assert_eq!(offers[0].offer.discount_percentage, Some(dec("20")));
    assert!(offers[0].offer.is_active);
    assert_eq!(offers[0].product_count, 2);
}

#[tokio::test]
async fn reimport_only_appends_prices_and_sessions() {
    let (pool, _dir) = setup_test_db().await;
    let service = ImportService::new(pool.clone());
    let doc = snapshot("2024-05-01T09:00:00Z", morning_menu());

    let first = import(&service, &doc).await;
    let rid = first.restaurant_id;
    let categories = DieselCategoryRepository::new(pool.clone());
    let products = DieselProductRepository::new(pool.clone());
    let offers = DieselOfferRepository::new(pool.clone());

    let category_ids: Vec<i32> = categories.for_restaurant(rid).await.unwrap().iter().map(|c| c.id).collect();
    let product_ids: Vec<i32> = products.for_restaurant(rid).await.unwrap().iter().map(|p| p.id).collect();
    let offer_ids: Vec<i32> = offers.for_restaurant(rid).await.unwrap().iter().map(|o| o.id).collect();

    let second = import(&service, &doc).await;
    assert_eq!(second.restaurant_id, rid);
    assert_eq!(second.duplicate_of.as_deref(), Some(first.session_id.as_str()));
    assert_eq!(second.created.categories, 0);
    assert_eq!(second.created.products, 0);
    assert_eq!(second.created.offers, 0);
    assert_eq!(second.created.prices, 3);

    let again: Vec<i32> = categories.for_restaurant(rid).await.unwrap().iter().map(|c| c.id).collect();
    assert_eq!(again, category_ids);
    let again: Vec<i32> = products.for_restaurant(rid).await.unwrap().iter().map(|p| p.id).collect();
    assert_eq!(again, product_ids);
    let again: Vec<i32> = offers.for_restaurant(rid).await.unwrap().iter().map(|o| o.id).collect();
    assert_eq!(again, offer_ids);

    assert_eq!(DieselPriceRepository::new(pool.clone()).count_for_restaurant(rid).await.unwrap(), 6);
    assert_eq!(DieselSessionRepository::new(pool.clone()).count().await.unwrap(), 2);
}

#[tokio::test]
async fn external_id_churn_does_not_duplicate_products() {
    let (pool, _dir) = setup_test_db().await;
    let service = ImportService::new(pool.clone());

    let first = import(
        &service,
        &snapshot(
            "2024-05-01T09:00:00Z",
            json!([{ "id": 101, "name": "Espresso", "category": "Coffee", "price": 2.4 }]),
        ),
    )
    .await;
    let second = import(
        &service,
        &snapshot(
            "2024-05-02T09:00:00Z",
            json!([{ "id": "E-7", "name": "Espresso", "category": "Coffee", "price": 2.5 }]),
        ),
    )
    .await;
    assert_eq!(second.created.products, 0);

    let products = DieselProductRepository::new(pool.clone())
        .for_restaurant(first.restaurant_id)
        .await
        .unwrap();
    assert_eq!(products.len(), 1);
    assert_eq!(products[0].external_id.as_deref(), Some("E-7"));

    let history = DieselPriceRepository::new(pool.clone()).history(products[0].id).await.unwrap();
    assert_eq!(history.len(), 2);
    let current = DieselPriceRepository::new(pool).current(products[0].id).await.unwrap().unwrap();
    assert_eq!(current.price, dec("2.5"));
}

#[tokio::test]
async fn categories_stay_proportional_to_products() {
    let (pool, _dir) = setup_test_db().await;
    let service = ImportService::new(pool.clone());

    let products: Vec<_> = (0..10)
        .map(|i| {
            let category = if i % 2 == 0 { "Coffee" } else { "Pastries" };
            json!({ "id": i, "name": format!("Item {i}"), "category": category, "price": 2 })
        })
        .collect();
    let mut doc = snapshot("2024-05-01T09:00:00Z", json!(products));
    doc["categories"] = json!([{ "name": "Coffee" }, { "name": "Pastries" }]);

    let summary = import(&service, &doc).await;
    import(&service, &doc).await;

    let health = Audit::new(pool).category_health(Some(summary.restaurant_id)).await.unwrap();
    assert_eq!(health.len(), 1);
    assert_eq!(health[0].category_count, 2);
    assert_eq!(health[0].product_count, 10);
    assert!(health[0].ratio.unwrap() < 0.5);
    assert_eq!(health[0].fallback_product_count, 0);
    assert!(!health[0].suspicious);
}

#[tokio::test]
async fn offer_lifecycle_across_three_snapshots() {
    let (pool, _dir) = setup_test_db().await;
    let service = ImportService::new(pool.clone());
    let offers = DieselOfferRepository::new(pool.clone());

    let with_offer = |at: &str| {
        snapshot(
            at,
            json!([{ "id": 1, "name": "Espresso", "category": "Coffee", "price": 2.4,
                     "original_price": 3.0, "discount_percentage": 20, "offer_name": "Morning Special" }]),
        )
    };
    let without_offer = |at: &str| {
        snapshot(at, json!([{ "id": 1, "name": "Espresso", "category": "Coffee", "price": 3.0 }]))
    };

    let first = import(&service, &with_offer("2024-05-01T09:00:00Z")).await;
    let rid = first.restaurant_id;
    let offer = offers.find_by_name(rid, "morning special").await.unwrap().unwrap();
    assert!(offer.is_active);
    assert_eq!(offer.end_date, None);

    let second = import(&service, &without_offer("2024-05-02T09:00:00Z")).await;
    assert_eq!(second.deactivated_offers, vec!["Morning Special".to_string()]);
    let offer = offers.find_by_name(rid, "Morning Special").await.unwrap().unwrap();
    assert!(!offer.is_active);
    assert_eq!(offer.end_date, Some(Utc.with_ymd_and_hms(2024, 5, 2, 9, 0, 0).unwrap()));

    let third = import(&service, &with_offer("2024-05-03T09:00:00Z")).await;
    assert_eq!(third.created.offers, 0);
    let reactivated = offers.find_by_name(rid, "Morning Special").await.unwrap().unwrap();
    assert_eq!(reactivated.id, offer.id);
    assert!(reactivated.is_active);
    assert_eq!(reactivated.end_date, None);
    assert_eq!(reactivated.start_date, Utc.with_ymd_and_hms(2024, 5, 3, 9, 0, 0).unwrap());

    assert_eq!(offers.for_restaurant(rid).await.unwrap().len(), 1);
}

#[tokio::test]
async fn contradictory_original_price_is_corrected() {
    let (pool, _dir) = setup_test_db().await;
    let service = ImportService::new(pool.clone());

    let summary = import(
        &service,
        &snapshot(
            "2024-05-01T09:00:00Z",
            json!([{ "id": 1, "name": "Flat White", "category": "Coffee", "price": 3.00,
                     "original_price": 3.00, "discount_percentage": 20 }]),
        ),
    )
    .await;

    let prices = DieselPriceRepository::new(pool.clone())
        .current_for_restaurant(summary.restaurant_id)
        .await
        .unwrap();
    assert_eq!(prices.len(), 1);
    assert_eq!(prices[0].price, dec("3.00"));
    assert_eq!(prices[0].original_price, Some(dec("3.75")));
    assert_eq!(prices[0].offer_name.as_deref(), Some("20% Discount"));

    let offer = DieselOfferRepository::new(pool)
        .find_by_name(summary.restaurant_id, "20% Discount")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(offer.offer_type, OfferType::AutoGenerated);
}

#[tokio::test]
async fn invalid_snapshot_reports_every_violation_and_writes_nothing() {
    let (pool, _dir) = setup_test_db().await;
    let service = ImportService::new(pool.clone());

    let doc = json!({
        "metadata": { "scraped_at": "yesterday" },
        "restaurant": { "name": "" },
        "products": [
            { "name": "A", "price": "free" },
            { "price": 2 }
        ]
    });
    let err = service
        .import_json(&doc.to_string(), "broken.json", &ImportOptions::default())
        .await
        .unwrap_err();

    let schema = match err {
        ImportError::Schema(schema) => schema,
        other => panic!("expected a schema error, got {other:?}"),
    };
    let fields: Vec<&str> = schema.violations.iter().map(|v| v.field.as_str()).collect();
    assert!(fields.contains(&"scraped_at"));
    assert!(fields.contains(&"name"));
    assert!(fields.contains(&"price"));
    assert!(schema.violations.len() >= 4);

    assert!(DieselRestaurantRepository::new(pool.clone()).get_all().await.unwrap().is_empty());
    let sessions = DieselSessionRepository::new(pool).recent(10).await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].status, SessionStatus::Failed);
    assert_eq!(sessions[0].source, "broken.json");
    assert!(!sessions[0].errors.is_empty());
}

#[tokio::test]
async fn stale_snapshot_only_appends_history() {
    let (pool, _dir) = setup_test_db().await;
    let service = ImportService::new(pool.clone());

    let newer = import(
        &service,
        &snapshot(
            "2024-05-02T09:00:00Z",
            json!([{ "id": 1, "name": "Espresso", "category": "Coffee", "price": 2.6,
                     "description": "Double shot" }]),
        ),
    )
    .await;
    let older = import(
        &service,
        &snapshot(
            "2024-05-01T09:00:00Z",
            json!([{ "id": 1, "name": "Espresso", "category": "Coffee", "price": 2.4,
                     "description": "Single shot", "discount_percentage": 10 }]),
        ),
    )
    .await;
    assert!(!older.is_latest);
    assert!(older.deactivated_offers.is_empty());

    let restaurant = DieselRestaurantRepository::new(pool.clone())
        .get(newer.restaurant_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(restaurant.last_scraped_at, Some(Utc.with_ymd_and_hms(2024, 5, 2, 9, 0, 0).unwrap()));

    let products = DieselProductRepository::new(pool.clone())
        .for_restaurant(newer.restaurant_id)
        .await
        .unwrap();
    assert_eq!(products.len(), 1);
    assert_eq!(products[0].description.as_deref(), Some("Double shot"));

    let prices = DieselPriceRepository::new(pool.clone());
    assert_eq!(prices.history(products[0].id).await.unwrap().len(), 2);
    let current = prices.current(products[0].id).await.unwrap().unwrap();
    assert_eq!(current.price, dec("2.6"));

    let offer = DieselOfferRepository::new(pool)
        .find_by_name(newer.restaurant_id, "10% Discount")
        .await
        .unwrap()
        .unwrap();
    assert!(!offer.is_active);
}

#[tokio::test]
async fn labelled_offer_without_discount_rejects_only_that_price() {
    let (pool, _dir) = setup_test_db().await;
    let service = ImportService::new(pool.clone());

    let summary = import(
        &service,
        &snapshot(
            "2024-05-01T09:00:00Z",
            json!([
                { "id": 1, "name": "Espresso", "category": "Coffee", "price": 2.4, "offer_name": "Happy Hour" },
                { "id": 2, "name": "Latte", "category": "Coffee", "price": 3.2 }
            ]),
        ),
    )
    .await;

    assert_eq!(summary.errors.len(), 1);
    assert!(summary.errors[0].contains("Espresso"));
    assert_eq!(summary.created.products, 2);
    assert_eq!(summary.created.prices, 1);
    assert_eq!(summary.created.offers, 0);

    let sessions = DieselSessionRepository::new(pool).for_restaurant(summary.restaurant_id).await.unwrap();
    assert_eq!(sessions[0].status, SessionStatus::Completed);
    assert_eq!(sessions[0].errors.len(), 1);
}

#[tokio::test]
async fn directory_import_runs_oldest_first() {
    let (pool, dir) = setup_test_db().await;
    let service = ImportService::new(pool.clone());

    let snapshots = dir.path().join("snapshots");
    std::fs::create_dir(&snapshots).unwrap();
    let newer = snapshot(
        "2024-05-02T09:00:00Z",
        json!([{ "id": 1, "name": "Espresso", "category": "Coffee", "price": 2.6 }]),
    );
    let older = snapshot(
        "2024-05-01T09:00:00Z",
        json!([{ "id": 1, "name": "Espresso", "category": "Coffee", "price": 2.4 }]),
    );
    std::fs::write(snapshots.join("a.json"), newer.to_string()).unwrap();
    std::fs::write(snapshots.join("b.json"), older.to_string()).unwrap();
    std::fs::write(snapshots.join("c.json"), "{ not json").unwrap();
    std::fs::write(snapshots.join("notes.txt"), "ignored").unwrap();

    let outcomes = service.import_directory(&snapshots, &ImportOptions::default()).await.unwrap();
    assert_eq!(outcomes.len(), 3);

    assert!(outcomes[0].path.ends_with("c.json"));
    assert!(matches!(outcomes[0].result, Err(ImportError::Schema(_))));
    assert!(outcomes[1].path.ends_with("b.json"));
    assert!(outcomes[2].path.ends_with("a.json"));

    let latest = outcomes[2].result.as_ref().unwrap();
    assert!(latest.is_latest);
    assert!(outcomes[1].result.as_ref().unwrap().is_latest);

    let product = &DieselProductRepository::new(pool.clone())
        .for_restaurant(latest.restaurant_id)
        .await
        .unwrap()[0];
    let current = DieselPriceRepository::new(pool).current(product.id).await.unwrap().unwrap();
    assert_eq!(current.price, dec("2.6"));
}

#[tokio::test]
async fn cancelled_run_imports_nothing() {
    let (pool, _dir) = setup_test_db().await;
    let service = ImportService::new(pool.clone());

    let cancel = CancelFlag::new();
    cancel.cancel();
    let options = ImportOptions {
        timeout: None,
        cancel: Some(cancel),
    };
    let doc = snapshot("2024-05-01T09:00:00Z", morning_menu());
    let err = service.import_json(&doc.to_string(), "cancelled.json", &options).await.unwrap_err();
    assert!(matches!(err, ImportError::Cancelled));

    assert!(DieselRestaurantRepository::new(pool.clone()).get_all().await.unwrap().is_empty());
    let sessions = DieselSessionRepository::new(pool).recent(10).await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].status, SessionStatus::Failed);
}

#[tokio::test]
async fn concurrent_imports_of_one_restaurant_serialize() {
    let (pool, _dir) = setup_test_db().await;
    let service = ImportService::new(pool.clone());

    let a = snapshot("2024-05-01T09:00:00Z", morning_menu()).to_string();
    let b = snapshot("2024-05-01T10:00:00Z", morning_menu()).to_string();
    let options = ImportOptions::default();
    let (first, second) = tokio::join!(
        service.import_json(&a, "a.json", &options),
        service.import_json(&b, "b.json", &options),
    );
    let first = first.unwrap();
    let second = second.unwrap();
    assert_eq!(first.restaurant_id, second.restaurant_id);

    let rid = first.restaurant_id;
    assert_eq!(DieselProductRepository::new(pool.clone()).count_for_restaurant(rid).await.unwrap(), 3);
    assert_eq!(DieselOfferRepository::new(pool.clone()).for_restaurant(rid).await.unwrap().len(), 1);
    assert_eq!(DieselPriceRepository::new(pool).count_for_restaurant(rid).await.unwrap(), 6);
}

#[tokio::test]
async fn administrative_deletes_keep_history_consistent() {
    let (pool, _dir) = setup_test_db().await;
    let service = ImportService::new(pool.clone());
    let summary = import(&service, &snapshot("2024-05-01T09:00:00Z", morning_menu())).await;
    let rid = summary.restaurant_id;

    let offers = DieselOfferRepository::new(pool.clone());
    let prices = DieselPriceRepository::new(pool.clone());
    let offer = offers.find_by_name(rid, "Morning Special").await.unwrap().unwrap();
    assert_eq!(prices.for_offer(offer.id).await.unwrap().len(), 2);

    assert!(offers.delete(offer.id).await.unwrap());
    assert_eq!(prices.count_for_restaurant(rid).await.unwrap(), 3);
    let current = prices.current_for_restaurant(rid).await.unwrap();
    assert!(current.iter().all(|p| p.offer_id.is_none()));
    assert_eq!(current.iter().filter(|p| p.offer_name.is_some()).count(), 2);

    let restaurants = DieselRestaurantRepository::new(pool.clone());
    assert!(restaurants.delete(rid).await.unwrap());
    assert!(restaurants.get(rid).await.unwrap().is_none());
    assert_eq!(prices.count_for_restaurant(rid).await.unwrap(), 0);
    assert!(offers.for_restaurant(rid).await.unwrap().is_empty());

    let sessions = DieselSessionRepository::new(pool).recent(10).await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].restaurant_id, None);
}
