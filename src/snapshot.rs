//! Menu snapshot parsing and validation.
//!
//! A snapshot is the JSON document a scraper writes for one restaurant at one
//! point in time. Validation is a pure transform into typed records: every
//! violating field of every record is collected before failing, so a bad file
//! reports all of its problems at once.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::{SchemaError, SchemaViolation};
use crate::models::{OptionChoice, ProductOption};
use crate::repository::parse_datetime_strict;

/// Currency used when a product does not name one.
pub const DEFAULT_CURRENCY: &str = "EUR";

/// A validated snapshot.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub scraped_at: DateTime<Utc>,
    /// Source domain, part of the restaurant identity. Empty when not reported.
    pub domain: String,
    pub source_url: Option<String>,
    pub restaurant: SnapshotRestaurant,
    pub categories: Vec<SnapshotCategory>,
    pub products: Vec<SnapshotProduct>,
    /// Errors the scraper itself reported, carried onto the session.
    pub scraper_errors: Vec<String>,
    /// Non-fatal oddities found while validating.
    pub warnings: Vec<String>,
    /// SHA-256 of the raw document, hex encoded.
    pub content_hash: String,
}

impl Snapshot {
    /// Parse and validate a raw JSON document.
    pub fn from_json_str(raw: &str, default_currency: &str) -> Result<Self, SchemaError> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| SchemaError::single("$", "document", format!("invalid JSON: {e}")))?;
        let mut snapshot = validate(&value, default_currency)?;
        snapshot.content_hash = content_hash(raw.as_bytes());
        Ok(snapshot)
    }

    /// A snapshot without products is accepted but almost always means the
    /// scraper failed silently.
    pub fn is_suspicious(&self) -> bool {
        self.products.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotRestaurant {
    pub name: String,
    pub brand: Option<String>,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub rating: Option<Decimal>,
    pub delivery_fee: Option<Decimal>,
    pub minimum_order: Option<Decimal>,
    pub delivery_time: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotCategory {
    pub name: String,
    pub description: Option<String>,
    pub display_order: Option<i32>,
    pub source: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotProduct {
    /// Position in the snapshot's `products[]` array.
    pub index: usize,
    pub external_id: Option<String>,
    pub name: String,
    /// Declared category name; `None` when missing or blank.
    pub category: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub options: Vec<ProductOption>,
    pub price: Decimal,
    /// `None` when not reported (or reported as zero).
    pub original_price: Option<Decimal>,
    /// `None` when not reported (or reported as zero).
    pub discount_percentage: Option<Decimal>,
    /// Explicit offer label, trimmed; `None` when missing or blank.
    pub offer_name: Option<String>,
    pub currency: String,
    pub availability: bool,
}

/// Hex-encoded SHA-256 of a snapshot document.
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Validate a parsed JSON document into a [`Snapshot`].
///
/// The returned snapshot has an empty `content_hash`; callers that have the
/// raw bytes fill it in.
pub fn validate(doc: &Value, default_currency: &str) -> Result<Snapshot, SchemaError> {
    let root = doc
        .as_object()
        .ok_or_else(|| SchemaError::single("$", "document", "expected a JSON object"))?;

    let mut v = Validator::default();

    let metadata = v.object(root, "$", "metadata");
    let scraped_at = metadata.and_then(|m| v.timestamp(m, "metadata", "scraped_at"));
    let domain = metadata
        .and_then(|m| v.opt_string(m, "metadata", "domain"))
        .unwrap_or_default();

    let source_url = match root.get("source") {
        Some(Value::Object(source)) => v.opt_string(source, "source", "url"),
        _ => None,
    };

    let restaurant = v
        .object(root, "$", "restaurant")
        .map(|r| v.restaurant(r))
        .unwrap_or_default();

    let categories = match v.array(root, "$", "categories", false) {
        Some(items) => items
            .iter()
            .enumerate()
            .filter_map(|(i, item)| v.category(i, item))
            .collect(),
        None => Vec::new(),
    };

    let products = match v.array(root, "$", "products", true) {
        Some(items) => items
            .iter()
            .enumerate()
            .filter_map(|(i, item)| v.product(i, item, default_currency))
            .collect::<Vec<_>>(),
        None => Vec::new(),
    };

    let scraper_errors = match v.array(root, "$", "errors", false) {
        Some(items) => items
            .iter()
            .map(|e| match e {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect(),
        None => Vec::new(),
    };

    if !v.violations.is_empty() {
        return Err(SchemaError {
            violations: v.violations,
        });
    }

    let mut warnings = v.warnings;
    if products.is_empty() {
        warnings.push("snapshot contains zero products".to_string());
    }

    Ok(Snapshot {
        // Only None when a violation was recorded above.
        scraped_at: scraped_at.unwrap_or_default(),
        domain,
        source_url,
        restaurant,
        categories,
        products,
        scraper_errors,
        warnings,
        content_hash: String::new(),
    })
}

#[derive(Default)]
struct Validator {
    violations: Vec<SchemaViolation>,
    warnings: Vec<String>,
}

impl Validator {
    fn violation(&mut self, record: &str, field: &str, message: impl Into<String>) {
        self.violations.push(SchemaViolation {
            record: record.to_string(),
            field: field.to_string(),
            message: message.into(),
        });
    }

    fn object<'a>(&mut self, obj: &'a Map<String, Value>, record: &str, field: &str) -> Option<&'a Map<String, Value>> {
        match obj.get(field) {
            Some(Value::Object(inner)) => Some(inner),
            Some(_) => {
                self.violation(record, field, "expected an object");
                None
            }
            None => {
                self.violation(record, field, "missing");
                None
            }
        }
    }

    fn array<'a>(
        &mut self,
        obj: &'a Map<String, Value>,
        record: &str,
        field: &str,
        required: bool,
    ) -> Option<&'a Vec<Value>> {
        match obj.get(field) {
            Some(Value::Array(items)) => Some(items),
            Some(Value::Null) | None if !required => None,
            None => {
                self.violation(record, field, "missing");
                None
            }
            Some(_) => {
                self.violation(record, field, "expected an array");
                None
            }
        }
    }

    fn required_string(&mut self, obj: &Map<String, Value>, record: &str, field: &str) -> Option<String> {
        match obj.get(field) {
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Some(Value::String(_)) => {
                self.violation(record, field, "must not be blank");
                None
            }
            Some(Value::Null) | None => {
                self.violation(record, field, "missing");
                None
            }
            Some(_) => {
                self.violation(record, field, "expected a string");
                None
            }
        }
    }

    /// Optional string; blank collapses to `None`.
    fn opt_string(&mut self, obj: &Map<String, Value>, record: &str, field: &str) -> Option<String> {
        match obj.get(field) {
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Some(Value::String(_)) | Some(Value::Null) | None => None,
            Some(_) => {
                self.violation(record, field, "expected a string");
                None
            }
        }
    }

    /// Optional identifier; scrapers emit both strings and numbers.
    fn opt_identifier(&mut self, obj: &Map<String, Value>, record: &str, field: &str) -> Option<String> {
        match obj.get(field) {
            Some(Value::Number(n)) => Some(n.to_string()),
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Some(Value::String(_)) | Some(Value::Null) | None => None,
            Some(_) => {
                self.violation(record, field, "expected a string or number");
                None
            }
        }
    }

    fn timestamp(&mut self, obj: &Map<String, Value>, record: &str, field: &str) -> Option<DateTime<Utc>> {
        let raw = self.required_string(obj, record, field)?;
        match parse_datetime_strict(&raw) {
            Some(dt) => Some(dt),
            None => {
                self.violation(record, field, format!("'{raw}' is not an ISO-8601 timestamp"));
                None
            }
        }
    }

    /// Optional non-negative decimal. Accepts JSON numbers and numeric strings.
    fn opt_amount(&mut self, obj: &Map<String, Value>, record: &str, field: &str) -> Option<Decimal> {
        match coerce_decimal(obj.get(field).unwrap_or(&Value::Null)) {
            Ok(Some(d)) if d.is_sign_negative() && !d.is_zero() => {
                self.violation(record, field, format!("must not be negative, got {d}"));
                None
            }
            Ok(d) => d,
            Err(message) => {
                self.violation(record, field, message);
                None
            }
        }
    }

    fn opt_integer(&mut self, obj: &Map<String, Value>, record: &str, field: &str) -> Option<i32> {
        match obj.get(field) {
            Some(Value::Number(n)) => match n.as_i64().and_then(|i| i32::try_from(i).ok()) {
                Some(i) => Some(i),
                None => {
                    self.violation(record, field, format!("expected an integer, got {n}"));
                    None
                }
            },
            Some(Value::Null) | None => None,
            Some(_) => {
                self.violation(record, field, "expected an integer");
                None
            }
        }
    }

    fn restaurant(&mut self, r: &Map<String, Value>) -> SnapshotRestaurant {
        let record = "restaurant";
        SnapshotRestaurant {
            name: self.required_string(r, record, "name").unwrap_or_default(),
            brand: self.opt_string(r, record, "brand"),
            address: self.opt_string(r, record, "address"),
            phone: self.opt_string(r, record, "phone"),
            rating: self.opt_amount(r, record, "rating"),
            delivery_fee: self.opt_amount(r, record, "delivery_fee"),
            minimum_order: self.opt_amount(r, record, "minimum_order"),
            delivery_time: self.opt_string(r, record, "delivery_time"),
        }
    }

    fn category(&mut self, index: usize, item: &Value) -> Option<SnapshotCategory> {
        let record = format!("categories[{index}]");
        let Some(obj) = item.as_object() else {
            self.violation(&record, "", "expected an object");
            return None;
        };

        let name = self.required_string(obj, &record, "name");
        let description = self.opt_string(obj, &record, "description");
        let display_order = self.opt_integer(obj, &record, "display_order");
        let source = self.opt_string(obj, &record, "source");

        Some(SnapshotCategory {
            name: name?,
            description,
            display_order,
            source,
        })
    }

    fn product(&mut self, index: usize, item: &Value, default_currency: &str) -> Option<SnapshotProduct> {
        let record = format!("products[{index}]");
        let Some(obj) = item.as_object() else {
            self.violation(&record, "", "expected an object");
            return None;
        };

        let external_id = self.opt_identifier(obj, &record, "id");
        let name = self.required_string(obj, &record, "name");
        let category = self.opt_string(obj, &record, "category");
        let description = self.opt_string(obj, &record, "description");
        let image_url = self.opt_string(obj, &record, "image_url");
        let offer_name = self.opt_string(obj, &record, "offer_name");
        let currency = self
            .opt_string(obj, &record, "currency")
            .unwrap_or_else(|| default_currency.to_string());

        let price = match obj.get("price") {
            None | Some(Value::Null) => {
                self.violation(&record, "price", "missing");
                None
            }
            Some(_) => self.opt_amount(obj, &record, "price").or_else(|| {
                // A present-but-empty string coerces to None without a violation.
                if !self.violations.iter().any(|v| v.record == record && v.field == "price") {
                    self.violation(&record, "price", "missing");
                }
                None
            }),
        };

        let original_price = self.opt_amount(obj, &record, "original_price").filter(|d| !d.is_zero());

        let discount_percentage = self.opt_amount(obj, &record, "discount_percentage");
        if let Some(pct) = discount_percentage {
            if pct >= Decimal::ONE_HUNDRED {
                self.violation(&record, "discount_percentage", format!("must be below 100, got {pct}"));
            }
        }
        let discount_percentage = discount_percentage.filter(|d| !d.is_zero());

        let availability = match obj.get("availability") {
            Some(Value::Bool(b)) => *b,
            Some(Value::Null) | None => true,
            Some(_) => {
                self.violation(&record, "availability", "expected a boolean");
                true
            }
        };

        let options = match obj.get("options") {
            None | Some(Value::Null) => Vec::new(),
            Some(value) => match parse_options(value) {
                Ok(options) => options,
                Err(message) => {
                    self.warnings.push(format!("{record}.options ignored: {message}"));
                    Vec::new()
                }
            },
        };

        Some(SnapshotProduct {
            index,
            external_id,
            name: name?,
            category,
            description,
            image_url,
            options,
            price: price?,
            original_price,
            discount_percentage,
            offer_name,
            currency,
            availability,
        })
    }
}

/// Coerce a JSON value to a fixed-point decimal.
///
/// `null` and blank strings are `Ok(None)`; anything non-numeric is an error.
pub fn coerce_decimal(value: &Value) -> Result<Option<Decimal>, String> {
    let text = match value {
        Value::Null => return Ok(None),
        Value::Number(n) => n.to_string(),
        Value::String(s) if s.trim().is_empty() => return Ok(None),
        Value::String(s) => s.trim().to_string(),
        other => return Err(format!("expected a number, got {other}")),
    };
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map(Some)
        .map_err(|_| format!("'{text}' is not a number"))
}

/// Parse product options into `{name, choices[]}` groups.
///
/// Accepts an array or a JSON-encoded string of one. Choices may be bare
/// strings or `{name, price?}` objects.
fn parse_options(value: &Value) -> Result<Vec<ProductOption>, String> {
    let decoded;
    let value = match value {
        Value::String(s) if s.trim().is_empty() => return Ok(Vec::new()),
        Value::String(s) => {
            decoded = serde_json::from_str::<Value>(s).map_err(|e| format!("not JSON: {e}"))?;
            &decoded
        }
        other => other,
    };

    let groups = value.as_array().ok_or("expected an array")?;
    groups
        .iter()
        .map(|group| {
            let obj = group.as_object().ok_or("option group must be an object")?;
            let name = obj
                .get("name")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .ok_or("option group without a name")?
                .to_string();
            let choices = match obj.get("choices") {
                None | Some(Value::Null) => Vec::new(),
                Some(Value::Array(items)) => items.iter().map(parse_choice).collect::<Result<_, _>>()?,
                Some(_) => return Err(format!("choices of '{name}' must be an array")),
            };
            Ok(ProductOption { name, choices })
        })
        .collect()
}

fn parse_choice(value: &Value) -> Result<OptionChoice, String> {
    match value {
        Value::String(s) => Ok(OptionChoice {
            name: s.trim().to_string(),
            price: None,
        }),
        Value::Object(obj) => {
            let name = obj
                .get("name")
                .and_then(Value::as_str)
                .ok_or("choice without a name")?
                .trim()
                .to_string();
            let price = coerce_decimal(obj.get("price").unwrap_or(&Value::Null))?;
            Ok(OptionChoice { name, price })
        }
        other => Err(format!("unsupported choice {other}")),
    }
}
