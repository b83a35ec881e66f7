//! Restaurant identity and metadata upsert.

use diesel::prelude::*;
use diesel::SqliteConnection;
use tracing::{debug, info};

use crate::error::ReconcileError;
use crate::repository::diesel_models::{NewRestaurant, RestaurantMetadataChangeset, RestaurantRecord};
use crate::repository::{format_datetime, format_decimal_opt, format_money_opt, last_insert_id};
use crate::schema::restaurants;
use crate::snapshot::Snapshot;

/// Result of resolving the snapshot's restaurant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestaurantResolution {
    pub id: i32,
    pub created: bool,
    /// False when a newer snapshot has already been imported.
    pub is_latest: bool,
}

/// URL slug for a restaurant name.
pub fn slugify(name: &str) -> String {
    let lowered = name.trim().to_lowercase().replace('&', " and ");
    let mut slug = String::with_capacity(lowered.len());
    for c in lowered.chars() {
        if c.is_alphanumeric() {
            slug.push(c);
        } else if c.is_whitespace() || c == '-' {
            if !slug.is_empty() && !slug.ends_with('-') {
                slug.push('-');
            }
        }
        // Apostrophes and other punctuation are dropped.
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

/// Find or create the snapshot's restaurant by (name, domain).
///
/// Metadata and `last_scraped_at` are refreshed only when the snapshot is at
/// least as new as the last one seen.
pub fn ensure_restaurant(
    conn: &mut SqliteConnection,
    snapshot: &Snapshot,
    now: &str,
) -> Result<RestaurantResolution, ReconcileError> {
    let details = &snapshot.restaurant;
    let scraped_at = format_datetime(&snapshot.scraped_at);
    let brand = details.brand.as_deref().unwrap_or(&details.name);

    let existing = restaurants::table
        .filter(restaurants::name.eq(&details.name))
        .filter(restaurants::domain.eq(&snapshot.domain))
        .first::<RestaurantRecord>(conn)
        .optional()?;

    let Some(existing) = existing else {
        let slug = slugify(&details.name);
        diesel::insert_into(restaurants::table)
            .values(&NewRestaurant {
                name: &details.name,
                domain: &snapshot.domain,
                brand,
                slug: &slug,
                address: details.address.as_deref(),
                phone: details.phone.as_deref(),
                rating: format_decimal_opt(details.rating),
                delivery_fee: format_money_opt(details.delivery_fee),
                minimum_order: format_money_opt(details.minimum_order),
                delivery_time: details.delivery_time.as_deref(),
                source_url: snapshot.source_url.as_deref(),
                last_scraped_at: Some(scraped_at.as_str()),
                created_at: now,
                updated_at: now,
            })
            .execute(conn)?;
        let id = last_insert_id(conn)?;
        info!("Created restaurant '{}' ({}) as {}", details.name, slug, id);
        return Ok(RestaurantResolution {
            id,
            created: true,
            is_latest: true,
        });
    };

    let is_latest = existing
        .last_scraped_at
        .as_deref()
        .map_or(true, |last| scraped_at.as_str() >= last);

    if !is_latest {
        info!(
            "Snapshot of '{}' at {} is older than last import at {}; appending history only",
            details.name,
            scraped_at,
            existing.last_scraped_at.as_deref().unwrap_or_default()
        );
        return Ok(RestaurantResolution {
            id: existing.id,
            created: false,
            is_latest,
        });
    }

    diesel::update(restaurants::table.find(existing.id))
        .set(&RestaurantMetadataChangeset {
            brand,
            address: details.address.as_deref(),
            phone: details.phone.as_deref(),
            rating: format_decimal_opt(details.rating),
            delivery_fee: format_money_opt(details.delivery_fee),
            minimum_order: format_money_opt(details.minimum_order),
            delivery_time: details.delivery_time.as_deref(),
            source_url: snapshot.source_url.as_deref().or(existing.source_url.as_deref()),
            last_scraped_at: Some(scraped_at.as_str()),
            updated_at: now,
        })
        .execute(conn)?;
    debug!("Refreshed metadata of restaurant {}", existing.id);

    Ok(RestaurantResolution {
        id: existing.id,
        created: false,
        is_latest,
    })
}
