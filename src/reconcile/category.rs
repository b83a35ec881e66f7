//! Category resolution: snapshot category names to stable category rows.
//!
//! Categories are matched on their normalized name. Products without a usable
//! category go to the restaurant's fallback bucket, which is created the first
//! time it is needed. A declared category is never replaced by the fallback.

use std::collections::{HashMap, HashSet};

use diesel::prelude::*;
use diesel::SqliteConnection;
use tracing::{debug, info};

use super::{normalize_name, ImportContext, ImportReport, FALLBACK_CATEGORY, FALLBACK_DISPLAY_ORDER};
use crate::error::{ConflictKind, ReconcileError};
use crate::models::CategorySource;
use crate::repository::diesel_models::{CategoryRecord, NewCategory};
use crate::repository::last_insert_id;
use crate::schema::categories;
use crate::snapshot::{SnapshotCategory, SnapshotProduct};

#[derive(Debug, Clone)]
struct KnownCategory {
    id: i32,
    name: String,
    description: Option<String>,
    display_order: i32,
    source: String,
}

impl From<CategoryRecord> for KnownCategory {
    fn from(record: CategoryRecord) -> Self {
        Self {
            id: record.id,
            name: record.name,
            description: record.description,
            display_order: record.display_order,
            source: record.source,
        }
    }
}

/// Maps category names to category ids for one restaurant during one import.
pub struct CategoryResolver {
    restaurant_id: i32,
    /// Normalized name to existing rows, earliest created first.
    known: HashMap<String, Vec<KnownCategory>>,
    /// Normalized names declared in this snapshot's `categories[]`.
    declared: HashSet<String>,
    /// Conflicts already reported in this import.
    reported: HashSet<String>,
    next_display_order: i32,
}

impl CategoryResolver {
    /// Load the restaurant's existing categories.
    pub fn load(conn: &mut SqliteConnection, restaurant_id: i32) -> Result<Self, ReconcileError> {
        let records = categories::table
            .filter(categories::restaurant_id.eq(restaurant_id))
            .order((categories::created_at.asc(), categories::id.asc()))
            .load::<CategoryRecord>(conn)?;

        let mut known: HashMap<String, Vec<KnownCategory>> = HashMap::new();
        let mut next_display_order = 0;
        for record in records {
            if record.source != CategorySource::Fallback.as_str() {
                next_display_order = next_display_order.max(record.display_order + 1);
            }
            known
                .entry(record.normalized_name.clone())
                .or_default()
                .push(record.into());
        }

        Ok(Self {
            restaurant_id,
            known,
            declared: HashSet::new(),
            reported: HashSet::new(),
            next_display_order,
        })
    }

    /// The single row for a normalized name.
    ///
    /// Fails with an identity conflict when more than one row shares the name.
    pub fn lookup(&self, normalized: &str) -> Result<Option<i32>, ReconcileError> {
        match self.known.get(normalized).map(Vec::as_slice) {
            None | Some([]) => Ok(None),
            Some([only]) => Ok(Some(only.id)),
            Some(many) => Err(ReconcileError::IdentityConflict {
                kind: ConflictKind::Category,
                key: normalized.to_string(),
                candidates: many.iter().map(|c| c.id).collect(),
            }),
        }
    }

    /// Like [`lookup`](Self::lookup), but resolves conflicts to the earliest
    /// created row and reports them once per import.
    fn lookup_or_earliest(
        &mut self,
        normalized: &str,
        report: &mut ImportReport,
    ) -> Result<Option<i32>, ReconcileError> {
        match self.lookup(normalized) {
            Err(ReconcileError::IdentityConflict { candidates, .. }) if !candidates.is_empty() => {
                if self.reported.insert(normalized.to_string()) {
                    report.warn(format!(
                        "Ambiguous category '{}' for restaurant {}: rows {:?}, using {}",
                        normalized, self.restaurant_id, candidates, candidates[0]
                    ));
                }
                Ok(Some(candidates[0]))
            }
            other => other,
        }
    }

    /// Create or refresh a category declared in the snapshot's menu list.
    pub fn declare(
        &mut self,
        conn: &mut SqliteConnection,
        category: &SnapshotCategory,
        position: usize,
        ctx: &ImportContext,
        report: &mut ImportReport,
    ) -> Result<i32, ReconcileError> {
        let normalized = normalize_name(&category.name);
        self.declared.insert(normalized.clone());
        let display_order = category.display_order.unwrap_or(position as i32);

        let Some(id) = self.lookup_or_earliest(&normalized, report)? else {
            let id = self.create(
                conn,
                &category.name,
                &normalized,
                category.description.as_deref(),
                display_order,
                CategorySource::Menu,
                ctx,
            )?;
            report.created.categories += 1;
            return Ok(id);
        };

        if !ctx.is_latest {
            return Ok(id);
        }

        let Some(current) = self.known_mut(&normalized, id) else {
            return Ok(id);
        };
        let description = category.description.clone().or_else(|| current.description.clone());
        let changed = current.name != category.name
            || current.display_order != display_order
            || current.description != description
            || current.source != CategorySource::Menu.as_str();
        if !changed {
            return Ok(id);
        }

        current.name = category.name.clone();
        current.display_order = display_order;
        current.description = description.clone();
        current.source = CategorySource::Menu.as_str().to_string();

        diesel::update(categories::table.find(id))
            .set((
                categories::name.eq(&category.name),
                categories::display_order.eq(display_order),
                categories::description.eq(description.as_deref()),
                categories::source.eq(CategorySource::Menu.as_str()),
                categories::updated_at.eq(&ctx.now),
            ))
            .execute(conn)?;
        debug!("Updated category {} '{}'", id, category.name);
        report.updated.categories += 1;
        self.next_display_order = self.next_display_order.max(display_order + 1);
        Ok(id)
    }

    /// Category id for one snapshot product.
    pub fn resolve_for_product(
        &mut self,
        conn: &mut SqliteConnection,
        product: &SnapshotProduct,
        ctx: &ImportContext,
        report: &mut ImportReport,
    ) -> Result<i32, ReconcileError> {
        let Some(name) = product.category.as_deref() else {
            return self.fallback(conn, ctx, report);
        };

        let normalized = normalize_name(name);
        if normalized.is_empty() {
            return self.fallback(conn, ctx, report);
        }

        if let Some(id) = self.lookup_or_earliest(&normalized, report)? {
            return Ok(id);
        }

        // Surfaced for the audit; the category is still created as named.
        if normalized == normalize_name(&product.name) && !self.declared.contains(&normalized) {
            report.warn(format!(
                "Product '{}' names itself as its undeclared category",
                product.name
            ));
        }

        let display_order = self.next_display_order;
        let id = self.create(conn, name.trim(), &normalized, None, display_order, CategorySource::Product, ctx)?;
        report.created.categories += 1;
        Ok(id)
    }

    /// The restaurant's fallback category, created on first use.
    pub fn fallback(
        &mut self,
        conn: &mut SqliteConnection,
        ctx: &ImportContext,
        report: &mut ImportReport,
    ) -> Result<i32, ReconcileError> {
        let normalized = normalize_name(FALLBACK_CATEGORY);
        if let Some(id) = self.lookup_or_earliest(&normalized, report)? {
            return Ok(id);
        }

        let id = self.create(
            conn,
            FALLBACK_CATEGORY,
            &normalized,
            None,
            FALLBACK_DISPLAY_ORDER,
            CategorySource::Fallback,
            ctx,
        )?;
        info!("Created fallback category for restaurant {}", self.restaurant_id);
        report.created.categories += 1;
        Ok(id)
    }

    fn known_mut(&mut self, normalized: &str, id: i32) -> Option<&mut KnownCategory> {
        self.known
            .get_mut(normalized)
            .and_then(|rows| rows.iter_mut().find(|c| c.id == id))
    }

    #[allow(clippy::too_many_arguments)]
    fn create(
        &mut self,
        conn: &mut SqliteConnection,
        name: &str,
        normalized: &str,
        description: Option<&str>,
        display_order: i32,
        source: CategorySource,
        ctx: &ImportContext,
    ) -> Result<i32, ReconcileError> {
        diesel::insert_into(categories::table)
            .values(&NewCategory {
                restaurant_id: self.restaurant_id,
                name,
                normalized_name: normalized,
                description,
                display_order,
                source: source.as_str(),
                created_at: &ctx.now,
                updated_at: &ctx.now,
            })
            .execute(conn)?;
        let id = last_insert_id(conn)?;
        debug!("Created {} category {} '{}'", source.as_str(), id, name);

        if source != CategorySource::Fallback {
            self.next_display_order = self.next_display_order.max(display_order + 1);
        }
        self.known.entry(normalized.to_string()).or_default().push(KnownCategory {
            id,
            name: name.to_string(),
            description: description.map(str::to_string),
            display_order,
            source: source.as_str().to_string(),
        });
        Ok(id)
    }
}
