//! Product identity reconciliation.
//!
//! A snapshot product is matched to a stored row by `external_id` first and
//! by exact name second. External ids churn between scrapes, so the name is
//! the final tie-breaker and a product is only created when neither matches.
//!
//! When an external id match and a name held by a different row disagree, the
//! external id wins: the matched row keeps its id and is not renamed onto the
//! other row's name.

use std::collections::HashSet;

use diesel::prelude::*;
use diesel::SqliteConnection;
use tracing::{debug, info};

use super::{ImportContext, ImportReport};
use crate::error::{ConflictKind, ReconcileError};
use crate::models::ProductOption;
use crate::repository::diesel_models::{NewProduct, ProductRecord};
use crate::repository::last_insert_id;
use crate::schema::products;
use crate::snapshot::SnapshotProduct;

/// Outcome of reconciling one snapshot product.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconciledProduct {
    pub id: i32,
    pub created: bool,
    /// Any stored field changed (name, external id, category or details).
    pub updated: bool,
}

/// Reconciles the products of one snapshot for one restaurant.
pub struct ProductReconciler {
    restaurant_id: i32,
    /// Rows already claimed by an earlier record of this snapshot.
    seen: HashSet<i32>,
}

impl ProductReconciler {
    pub fn new(restaurant_id: i32) -> Self {
        Self {
            restaurant_id,
            seen: HashSet::new(),
        }
    }

    /// Number of distinct products reconciled so far.
    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }

    /// Match or create the row for `product`, placing it in `category_id`.
    ///
    /// Returns `None` when an earlier record of the same snapshot already
    /// reconciled to the same row; the later record is skipped.
    pub fn reconcile(
        &mut self,
        conn: &mut SqliteConnection,
        category_id: i32,
        product: &SnapshotProduct,
        ctx: &ImportContext,
        report: &mut ImportReport,
    ) -> Result<Option<ReconciledProduct>, ReconcileError> {
        let matched = match self.match_existing(conn, product, report)? {
            Some(record) => record,
            None => {
                let id = self.create(conn, category_id, product, ctx)?;
                self.seen.insert(id);
                report.created.products += 1;
                return Ok(Some(ReconciledProduct {
                    id,
                    created: true,
                    updated: false,
                }));
            }
        };

        if !self.seen.insert(matched.record.id) {
            report.warn(format!(
                "products[{}] '{}' duplicates an earlier record for product {}; skipped",
                product.index, product.name, matched.record.id
            ));
            return Ok(None);
        }

        let updated = self.apply_changes(conn, &matched, category_id, product, ctx, report)?;
        if updated {
            report.updated.products += 1;
        }

        Ok(Some(ReconciledProduct {
            id: matched.record.id,
            created: false,
            updated,
        }))
    }

    /// Two-stage lookup: external id, then exact name.
    fn match_existing(
        &self,
        conn: &mut SqliteConnection,
        product: &SnapshotProduct,
        report: &mut ImportReport,
    ) -> Result<Option<Matched>, ReconcileError> {
        if let Some(external_id) = product.external_id.as_deref() {
            let by_external = products::table
                .filter(products::restaurant_id.eq(self.restaurant_id))
                .filter(products::external_id.eq(external_id))
                .order((products::created_at.asc(), products::id.asc()))
                .first::<ProductRecord>(conn)
                .optional()?;
            if let Some(record) = by_external {
                return Ok(Some(Matched {
                    record,
                    by_external_id: true,
                }));
            }
        }

        let by_name = products::table
            .filter(products::restaurant_id.eq(self.restaurant_id))
            .filter(products::name.eq(&product.name))
            .order((products::created_at.asc(), products::id.asc()))
            .load::<ProductRecord>(conn)?;

        if by_name.len() > 1 {
            let conflict = ReconcileError::IdentityConflict {
                kind: ConflictKind::Product,
                key: product.name.clone(),
                candidates: by_name.iter().map(|r| r.id).collect(),
            };
            report.warn(format!("{conflict}; using {}", by_name[0].id));
        }

        Ok(by_name.into_iter().next().map(|record| Matched {
            record,
            by_external_id: false,
        }))
    }

    fn apply_changes(
        &self,
        conn: &mut SqliteConnection,
        matched: &Matched,
        category_id: i32,
        product: &SnapshotProduct,
        ctx: &ImportContext,
        report: &mut ImportReport,
    ) -> Result<bool, ReconcileError> {
        let record = &matched.record;
        let mut changes = ProductChanges::default();

        // External id: fill a gap always, replace a changed one only from the
        // newest snapshot. A missing id in the snapshot leaves it alone.
        if !matched.by_external_id {
            if let Some(new_id) = product.external_id.as_deref() {
                match record.external_id.as_deref() {
                    None => changes.external_id = Some(new_id),
                    Some(old_id) if old_id != new_id && ctx.is_latest => {
                        info!(
                            "Product {} '{}' external id changed {} -> {}",
                            record.id, record.name, old_id, new_id
                        );
                        changes.external_id = Some(new_id);
                    }
                    _ => {}
                }
            }
        }

        if ctx.is_latest {
            if record.name != product.name {
                let taken = products::table
                    .filter(products::restaurant_id.eq(self.restaurant_id))
                    .filter(products::name.eq(&product.name))
                    .filter(products::id.ne(record.id))
                    .select(products::id)
                    .first::<i32>(conn)
                    .optional()?;
                match taken {
                    Some(other) => report.warn(format!(
                        "Product {} (external id {}) not renamed '{}' -> '{}': name belongs to product {}",
                        record.id,
                        product.external_id.as_deref().unwrap_or("-"),
                        record.name,
                        product.name,
                        other
                    )),
                    None => {
                        info!("Product {} renamed '{}' -> '{}'", record.id, record.name, product.name);
                        changes.name = Some(product.name.as_str());
                    }
                }
            }

            if record.category_id != category_id {
                debug!(
                    "Product {} moved from category {} to {}",
                    record.id, record.category_id, category_id
                );
                changes.category_id = Some(category_id);
            }

            if product.description.is_some() && product.description != record.description {
                changes.description = product.description.as_deref();
            }
            if product.image_url.is_some() && product.image_url != record.image_url {
                changes.image_url = product.image_url.as_deref();
            }
            if !product.options.is_empty() && !same_options(&record.options, &product.options) {
                changes.options = Some(serde_json::to_string(&product.options).map_err(|e| {
                    ReconcileError::constraint(format!("product {}", record.id), e.to_string())
                })?);
            }
        }

        if changes.is_empty() {
            return Ok(false);
        }

        diesel::update(products::table.find(record.id))
            .set(&ProductChangeset {
                name: changes.name,
                external_id: changes.external_id,
                category_id: changes.category_id,
                description: changes.description,
                image_url: changes.image_url,
                options: changes.options.as_deref(),
                updated_at: &ctx.now,
            })
            .execute(conn)?;
        Ok(true)
    }

    fn create(
        &self,
        conn: &mut SqliteConnection,
        category_id: i32,
        product: &SnapshotProduct,
        ctx: &ImportContext,
    ) -> Result<i32, ReconcileError> {
        let options = serde_json::to_string(&product.options)
            .map_err(|e| ReconcileError::constraint(format!("product '{}'", product.name), e.to_string()))?;

        diesel::insert_into(products::table)
            .values(&NewProduct {
                restaurant_id: self.restaurant_id,
                category_id,
                external_id: product.external_id.as_deref(),
                name: &product.name,
                description: product.description.as_deref(),
                image_url: product.image_url.as_deref(),
                options: &options,
                created_at: &ctx.now,
                updated_at: &ctx.now,
            })
            .execute(conn)?;
        let id = last_insert_id(conn)?;
        debug!("Created product {} '{}'", id, product.name);
        Ok(id)
    }
}

struct Matched {
    record: ProductRecord,
    by_external_id: bool,
}

#[derive(Default)]
struct ProductChanges<'a> {
    name: Option<&'a str>,
    external_id: Option<&'a str>,
    category_id: Option<i32>,
    description: Option<&'a str>,
    image_url: Option<&'a str>,
    options: Option<String>,
}

impl ProductChanges<'_> {
    fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.external_id.is_none()
            && self.category_id.is_none()
            && self.description.is_none()
            && self.image_url.is_none()
            && self.options.is_none()
    }
}

/// Partial product update; `None` fields are left untouched.
#[derive(AsChangeset)]
#[diesel(table_name = products)]
struct ProductChangeset<'a> {
    name: Option<&'a str>,
    external_id: Option<&'a str>,
    category_id: Option<i32>,
    description: Option<&'a str>,
    image_url: Option<&'a str>,
    options: Option<&'a str>,
    updated_at: &'a str,
}

/// Option lists compare without regard to order.
fn same_options(stored: &str, incoming: &[ProductOption]) -> bool {
    let Ok(mut stored) = serde_json::from_str::<Vec<ProductOption>>(stored) else {
        return false;
    };
    let mut incoming = incoming.to_vec();
    let key = |o: &ProductOption| o.name.clone();
    stored.sort_by_key(key);
    incoming.sort_by_key(key);
    for option in stored.iter_mut().chain(incoming.iter_mut()) {
        option.choices.sort_by(|a, b| a.name.cmp(&b.name));
    }
    stored == incoming
}
