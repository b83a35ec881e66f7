//! Domain models for restaurants, menus, prices and offers.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A restaurant as seen on one source domain.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Restaurant {
    pub id: i32,
    pub name: String,
    pub domain: String,
    pub brand: String,
    pub slug: String,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub rating: Option<Decimal>,
    pub delivery_fee: Option<Decimal>,
    pub minimum_order: Option<Decimal>,
    pub delivery_time: Option<String>,
    pub source_url: Option<String>,
    pub last_scraped_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Where a category row came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategorySource {
    /// Declared in the snapshot's `categories[]` list.
    Menu,
    /// Only referenced from a product record.
    Product,
    /// The reserved per-restaurant bucket for products without a category.
    Fallback,
}

impl CategorySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CategorySource::Menu => "menu",
            CategorySource::Product => "product",
            CategorySource::Fallback => "fallback",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "menu" => Some(CategorySource::Menu),
            "product" => Some(CategorySource::Product),
            "fallback" => Some(CategorySource::Fallback),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Category {
    pub id: i32,
    pub restaurant_id: i32,
    pub name: String,
    pub normalized_name: String,
    pub description: Option<String>,
    pub display_order: i32,
    pub source: CategorySource,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One selectable choice of a product option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionChoice {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<Decimal>,
}

/// A named option group on a product, e.g. "Size" with its choices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductOption {
    pub name: String,
    #[serde(default)]
    pub choices: Vec<OptionChoice>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Product {
    pub id: i32,
    pub restaurant_id: i32,
    pub category_id: i32,
    pub external_id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub options: Vec<ProductOption>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One immutable row of the price ledger.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductPrice {
    pub id: i32,
    pub product_id: i32,
    pub session_id: Option<String>,
    pub price: Decimal,
    pub original_price: Option<Decimal>,
    pub discount_percentage: Option<Decimal>,
    pub currency: String,
    pub availability: bool,
    pub offer_id: Option<i32>,
    pub offer_name: Option<String>,
    pub scraped_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferType {
    /// Carried an explicit label in the snapshot.
    Named,
    /// Synthesized as `"{pct}% Discount"` from a bare discount.
    AutoGenerated,
}

impl OfferType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OfferType::Named => "named",
            OfferType::AutoGenerated => "auto_generated",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "named" => Some(OfferType::Named),
            "auto_generated" => Some(OfferType::AutoGenerated),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Offer {
    pub id: i32,
    pub restaurant_id: i32,
    pub name: String,
    pub normalized_name: String,
    pub offer_type: OfferType,
    pub discount_percentage: Option<Decimal>,
    pub discount_amount: Option<Decimal>,
    pub is_active: bool,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "running" => Some(SessionStatus::Running),
            "completed" => Some(SessionStatus::Completed),
            "failed" => Some(SessionStatus::Failed),
            _ => None,
        }
    }
}

/// Metadata about one snapshot import.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScrapingSession {
    pub id: String,
    pub restaurant_id: Option<i32>,
    pub restaurant_name: Option<String>,
    /// File path or URL the snapshot was read from.
    pub source: String,
    pub content_hash: Option<String>,
    pub scraped_at: Option<DateTime<Utc>>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: SessionStatus,
    pub product_count: u32,
    pub category_count: u32,
    pub created_count: u32,
    pub updated_count: u32,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub error_message: Option<String>,
}

impl ScrapingSession {
    pub fn is_finished(&self) -> bool {
        self.status != SessionStatus::Running
    }
}
