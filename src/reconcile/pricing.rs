//! Price ledger and offer lifecycle.
//!
//! Every reconciled product gets one new `product_prices` row per import;
//! rows are never updated. Offers are derived from the price fields, linked
//! from the rows, and retired by a sweep when a full import no longer
//! references them.
//!
//! Offer state machine: unseen -> active (first reference), active ->
//! inactive (absent from a newer import), inactive -> active (reappears).

use std::collections::{HashMap, HashSet};

use diesel::prelude::*;
use diesel::SqliteConnection;
use rust_decimal::{Decimal, RoundingStrategy};
use tracing::{debug, info};

use super::{normalize_name, ImportContext, ImportReport};
use crate::error::ReconcileError;
use crate::models::OfferType;
use crate::repository::diesel_models::{NewOffer, NewProductPrice, OfferRecord};
use crate::repository::{format_decimal_opt, format_money, format_money_opt, last_insert_id};
use crate::schema::{offers, product_prices};
use crate::snapshot::SnapshotProduct;

/// The offer a product's price fields point at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfferDerivation {
    pub name: String,
    pub offer_type: OfferType,
    pub discount_percentage: Option<Decimal>,
    pub discount_amount: Option<Decimal>,
}

/// Fix the known upstream defect where `original_price` repeats `price`
/// while a discount is reported.
///
/// The implied original is `price / (1 - pct/100)`, rounded half away from
/// zero to cents. Otherwise the reported value is returned unchanged.
pub fn corrected_original_price(
    price: Decimal,
    original_price: Option<Decimal>,
    discount_percentage: Option<Decimal>,
) -> Option<Decimal> {
    match (original_price, discount_percentage) {
        (Some(original), Some(pct))
            if original == price && pct > Decimal::ZERO && pct < Decimal::ONE_HUNDRED =>
        {
            let factor = Decimal::ONE - pct / Decimal::ONE_HUNDRED;
            Some((price / factor).round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
        }
        _ => original_price,
    }
}

/// Derive the offer for a product, given its (corrected) original price.
///
/// An explicit label wins; a bare positive discount synthesizes
/// `"{pct}% Discount"` with the percentage truncated to an integer. A labelled
/// offer without any discount to record is a constraint violation.
pub fn derive_offer(
    product: &SnapshotProduct,
    original_price: Option<Decimal>,
) -> Result<Option<OfferDerivation>, ReconcileError> {
    let pct = product.discount_percentage.filter(|p| *p > Decimal::ZERO);
    let amount = original_price
        .filter(|o| *o > product.price)
        .map(|o| o - product.price);

    if let Some(label) = product.offer_name.as_deref() {
        if pct.is_none() && amount.is_none() {
            return Err(ReconcileError::constraint(
                format!("offer '{label}'"),
                "neither discount_percentage nor discount_amount is known",
            ));
        }
        return Ok(Some(OfferDerivation {
            name: label.to_string(),
            offer_type: OfferType::Named,
            discount_percentage: pct,
            discount_amount: if pct.is_some() { None } else { amount },
        }));
    }

    Ok(pct.map(|pct| OfferDerivation {
        name: format!("{}% Discount", pct.trunc().normalize()),
        offer_type: OfferType::AutoGenerated,
        discount_percentage: Some(pct),
        discount_amount: None,
    }))
}

/// Partial offer update. `Some(None)` writes NULL.
#[derive(AsChangeset, Default)]
#[diesel(table_name = offers)]
struct OfferChangeset<'a> {
    discount_percentage: Option<Option<String>>,
    discount_amount: Option<Option<String>>,
    is_active: Option<i32>,
    start_date: Option<&'a str>,
    end_date: Option<Option<&'a str>>,
    updated_at: Option<&'a str>,
}

/// Tracks which offers one import references.
pub struct OfferLifecycle {
    restaurant_id: i32,
    /// Normalized name to offer id, for offers already linked in this import.
    linked: HashMap<String, i32>,
    referenced: HashSet<i32>,
}

impl OfferLifecycle {
    pub fn new(restaurant_id: i32) -> Self {
        Self {
            restaurant_id,
            linked: HashMap::new(),
            referenced: HashSet::new(),
        }
    }

    pub fn referenced_count(&self) -> usize {
        self.referenced.len()
    }

    /// Resolve or create the offer row for `derivation` and mark it referenced.
    ///
    /// The first product of an import to show an offer sets its discount
    /// values; later products only link to it.
    pub fn link(
        &mut self,
        conn: &mut SqliteConnection,
        derivation: &OfferDerivation,
        ctx: &ImportContext,
        report: &mut ImportReport,
    ) -> Result<i32, ReconcileError> {
        let normalized = normalize_name(&derivation.name);
        if let Some(id) = self.linked.get(&normalized) {
            return Ok(*id);
        }

        let existing = offers::table
            .filter(offers::restaurant_id.eq(self.restaurant_id))
            .filter(offers::normalized_name.eq(&normalized))
            .first::<OfferRecord>(conn)
            .optional()?;

        let id = match existing {
            Some(record) => {
                if ctx.is_latest {
                    self.refresh(conn, &record, derivation, ctx, report)?;
                }
                record.id
            }
            None => self.create(conn, &normalized, derivation, ctx, report)?,
        };

        self.linked.insert(normalized, id);
        self.referenced.insert(id);
        Ok(id)
    }

    fn create(
        &self,
        conn: &mut SqliteConnection,
        normalized: &str,
        derivation: &OfferDerivation,
        ctx: &ImportContext,
        report: &mut ImportReport,
    ) -> Result<i32, ReconcileError> {
        // Offers first seen in an out-of-order import only existed at that moment.
        let end_date = (!ctx.is_latest).then_some(ctx.scraped_at_text.as_str());

        diesel::insert_into(offers::table)
            .values(&NewOffer {
                restaurant_id: self.restaurant_id,
                name: &derivation.name,
                normalized_name: normalized,
                offer_type: derivation.offer_type.as_str(),
                discount_percentage: format_decimal_opt(derivation.discount_percentage),
                discount_amount: format_money_opt(derivation.discount_amount),
                is_active: i32::from(ctx.is_latest),
                start_date: &ctx.scraped_at_text,
                end_date,
                created_at: &ctx.now,
                updated_at: &ctx.now,
            })
            .execute(conn)?;
        let id = last_insert_id(conn)?;
        info!(
            "Created {} offer {} '{}' for restaurant {}",
            derivation.offer_type.as_str(),
            id,
            derivation.name,
            self.restaurant_id
        );
        report.created.offers += 1;
        Ok(id)
    }

    fn refresh(
        &self,
        conn: &mut SqliteConnection,
        record: &OfferRecord,
        derivation: &OfferDerivation,
        ctx: &ImportContext,
        report: &mut ImportReport,
    ) -> Result<(), ReconcileError> {
        let pct = format_decimal_opt(derivation.discount_percentage);
        let amount = format_money_opt(derivation.discount_amount);
        let values_changed = record.discount_percentage != pct || record.discount_amount != amount;
        let reactivate = record.is_active == 0;

        if !values_changed && !reactivate {
            return Ok(());
        }

        let mut changes = OfferChangeset {
            updated_at: Some(&ctx.now),
            ..Default::default()
        };
        if values_changed {
            debug!(
                "Offer {} '{}' discount changed {:?}/{:?} -> {:?}/{:?}",
                record.id, record.name, record.discount_percentage, record.discount_amount, pct, amount
            );
            changes.discount_percentage = Some(pct);
            changes.discount_amount = Some(amount);
        }
        if reactivate {
            info!("Reactivated offer {} '{}'", record.id, record.name);
            changes.is_active = Some(1);
            changes.start_date = Some(&ctx.scraped_at_text);
            changes.end_date = Some(None);
        }

        diesel::update(offers::table.find(record.id))
            .set(&changes)
            .execute(conn)?;
        report.updated.offers += 1;
        Ok(())
    }

    /// Deactivate every active offer of the restaurant this import did not
    /// reference. Only a current (not out-of-order) import may retire offers.
    pub fn sweep(
        &self,
        conn: &mut SqliteConnection,
        ctx: &ImportContext,
        report: &mut ImportReport,
    ) -> Result<Vec<String>, ReconcileError> {
        if !ctx.is_latest {
            return Ok(Vec::new());
        }

        let referenced: Vec<i32> = self.referenced.iter().copied().collect();
        let unreferenced: Vec<(i32, String)> = offers::table
            .filter(offers::restaurant_id.eq(self.restaurant_id))
            .filter(offers::is_active.eq(1))
            .filter(offers::id.ne_all(referenced))
            .select((offers::id, offers::name))
            .order(offers::id.asc())
            .load(conn)?;

        if unreferenced.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<i32> = unreferenced.iter().map(|(id, _)| *id).collect();
        diesel::update(offers::table.filter(offers::id.eq_any(ids)))
            .set(&OfferChangeset {
                is_active: Some(0),
                end_date: Some(Some(&ctx.scraped_at_text)),
                updated_at: Some(&ctx.now),
                ..Default::default()
            })
            .execute(conn)?;

        let names: Vec<String> = unreferenced.into_iter().map(|(_, name)| name).collect();
        for name in &names {
            info!("Deactivated offer '{}' for restaurant {}", name, self.restaurant_id);
        }
        report.updated.offers += names.len() as u32;
        report.deactivated_offers.extend(names.iter().cloned());
        Ok(names)
    }
}

/// Appends price rows for one import.
pub struct PriceLedger;

impl PriceLedger {
    /// Append one price row for `product_id`, linking its offer.
    ///
    /// A row whose offer cannot be recorded is rejected and reported; the
    /// import carries on. Returns whether a row was written.
    pub fn append(
        conn: &mut SqliteConnection,
        product_id: i32,
        product: &SnapshotProduct,
        offers: &mut OfferLifecycle,
        ctx: &ImportContext,
        report: &mut ImportReport,
    ) -> Result<bool, ReconcileError> {
        let original_price =
            corrected_original_price(product.price, product.original_price, product.discount_percentage);
        if original_price != product.original_price {
            debug!(
                "Corrected original price of '{}' from {:?} to {:?}",
                product.name, product.original_price, original_price
            );
        }

        let derivation = match derive_offer(product, original_price) {
            Ok(derivation) => derivation,
            Err(err @ ReconcileError::ConstraintViolation { .. }) => {
                report.error(format!(
                    "products[{}] '{}': price row rejected: {}",
                    product.index, product.name, err
                ));
                return Ok(false);
            }
            Err(err) => return Err(err),
        };

        let offer_id = match &derivation {
            Some(derivation) => Some(offers.link(conn, derivation, ctx, report)?),
            None => None,
        };

        diesel::insert_into(product_prices::table)
            .values(&NewProductPrice {
                product_id,
                session_id: Some(&ctx.session_id),
                price: format_money(&product.price),
                original_price: format_money_opt(original_price),
                discount_percentage: format_decimal_opt(product.discount_percentage),
                currency: &product.currency,
                availability: i32::from(product.availability),
                offer_id,
                offer_name: derivation.as_ref().map(|d| d.name.as_str()),
                scraped_at: &ctx.scraped_at_text,
                created_at: &ctx.now,
            })
            .execute(conn)?;
        report.created.prices += 1;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::test_support::{at, product, restaurant};
    use crate::reconcile::{CategoryResolver, ProductReconciler};
    use crate::repository::diesel_models::ProductPriceRecord;
    use crate::repository::test_support::setup_test_db;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn discounted(name: &str, price: &str, original: Option<&str>, pct: Option<&str>, offer: Option<&str>) -> SnapshotProduct {
        SnapshotProduct {
            original_price: original.map(dec),
            discount_percentage: pct.map(dec),
            offer_name: offer.map(str::to_string),
            ..product(name, Some("Coffee"), price)
        }
    }

    fn offer(conn: &mut SqliteConnection, id: i32) -> OfferRecord {
        offers::table.find(id).first(conn).unwrap()
    }

    fn product_id(conn: &mut SqliteConnection, ctx: &ImportContext, p: &SnapshotProduct) -> i32 {
        let mut report = ImportReport::default();
        let category = CategoryResolver::load(conn, ctx.restaurant_id)
            .unwrap()
            .resolve_for_product(conn, p, ctx, &mut report)
            .unwrap();
        ProductReconciler::new(ctx.restaurant_id)
            .reconcile(conn, category, p, ctx, &mut report)
            .unwrap()
            .unwrap()
            .id
    }

    #[test]
    fn corrects_contradictory_original_price() {
        assert_eq!(
            corrected_original_price(dec("3.00"), Some(dec("3.00")), Some(dec("20"))),
            Some(dec("3.75"))
        );
        // 10 / 0.7 = 14.2857...
        assert_eq!(
            corrected_original_price(dec("10"), Some(dec("10")), Some(dec("30"))),
            Some(dec("14.29"))
        );
        assert_eq!(
            corrected_original_price(dec("2.40"), Some(dec("3.00")), Some(dec("20"))),
            Some(dec("3.00"))
        );
        assert_eq!(corrected_original_price(dec("2"), None, Some(dec("20"))), None);
        assert_eq!(
            corrected_original_price(dec("2"), Some(dec("2")), None),
            Some(dec("2"))
        );
    }

    #[test]
    fn derives_named_and_generated_offers() {
        let named = derive_offer(
            &discounted("A", "2.40", Some("3.00"), Some("20"), Some("Morning Special")),
            Some(dec("3.00")),
        )
        .unwrap()
        .unwrap();
        assert_eq!(named.name, "Morning Special");
        assert_eq!(named.offer_type, OfferType::Named);
        assert_eq!(named.discount_percentage, Some(dec("20")));

        let generated = derive_offer(&discounted("B", "3", None, Some("25.5"), None), None)
            .unwrap()
            .unwrap();
        assert_eq!(generated.name, "25% Discount");
        assert_eq!(generated.offer_type, OfferType::AutoGenerated);

        let amount_only = derive_offer(&discounted("C", "4", Some("5"), None, Some("Combo")), Some(dec("5")))
            .unwrap()
            .unwrap();
        assert_eq!(amount_only.discount_percentage, None);
        assert_eq!(amount_only.discount_amount, Some(dec("1")));

        assert_eq!(derive_offer(&discounted("D", "4", None, None, None), None).unwrap(), None);
    }

    #[test]
    fn labelled_offer_without_discount_is_a_constraint_violation() {
        let err = derive_offer(&discounted("E", "4", None, None, Some("Happy Hour")), None).unwrap_err();
        assert!(matches!(err, ReconcileError::ConstraintViolation { .. }));
    }

    #[tokio::test]
    async fn offer_deactivates_and_reactivates() {
        let (pool, _dir) = setup_test_db().await;
        let mut pooled = pool.get().unwrap();
        let conn: &mut SqliteConnection = &mut pooled;
        let first = restaurant(conn, "Cafe", 9);
        let on_offer = discounted("Latte", "3", Some("4"), Some("25"), None);
        let plain = product("Latte", Some("Coffee"), "4");
        let latte = product_id(conn, &first, &on_offer);

        // Import 1: offer appears.
        let mut report = ImportReport::default();
        let mut offers = OfferLifecycle::new(first.restaurant_id);
        PriceLedger::append(conn, latte, &on_offer, &mut offers, &first, &mut report).unwrap();
        offers.sweep(conn, &first, &mut report).unwrap();
        let offer_id = *offers.referenced.iter().next().unwrap();
        assert!(offer(conn, offer_id).is_active == 1);

        // Import 2: no discount any more.
        let second = ImportContext::new(first.restaurant_id, "test-session", at(10), true);
        let mut offers = OfferLifecycle::new(second.restaurant_id);
        PriceLedger::append(conn, latte, &plain, &mut offers, &second, &mut report).unwrap();
        let retired = offers.sweep(conn, &second, &mut report).unwrap();
        assert_eq!(retired, vec!["25% Discount".to_string()]);
        let record = offer(conn, offer_id);
        assert_eq!(record.is_active, 0);
        assert_eq!(record.end_date.as_deref(), Some(second.scraped_at_text.as_str()));

        // Import 3: it comes back as the same row.
        let third = ImportContext::new(first.restaurant_id, "test-session", at(11), true);
        let mut offers = OfferLifecycle::new(third.restaurant_id);
        PriceLedger::append(conn, latte, &on_offer, &mut offers, &third, &mut report).unwrap();
        offers.sweep(conn, &third, &mut report).unwrap();
        let record = offer(conn, offer_id);
        assert_eq!(record.is_active, 1);
        assert_eq!(record.end_date, None);
        assert_eq!(record.start_date, third.scraped_at_text);

        let count: i64 = offers::table.count().get_result(conn).unwrap();
        assert_eq!(count, 1);
        let prices: i64 = product_prices::table.count().get_result(conn).unwrap();
        assert_eq!(prices, 3);
    }

    #[tokio::test]
    async fn stale_imports_leave_offer_state_alone() {
        let (pool, _dir) = setup_test_db().await;
        let mut pooled = pool.get().unwrap();
        let conn: &mut SqliteConnection = &mut pooled;
        let current = restaurant(conn, "Cafe", 12);
        let stale = ImportContext::new(current.restaurant_id, "test-session", at(8), false);

        let old_offer = discounted("Mocha", "3", Some("4"), Some("25"), Some("Early Bird"));
        let mocha = product_id(conn, &current, &old_offer);

        let mut report = ImportReport::default();
        let mut offers = OfferLifecycle::new(stale.restaurant_id);
        assert!(PriceLedger::append(conn, mocha, &old_offer, &mut offers, &stale, &mut report).unwrap());
        assert!(offers.sweep(conn, &stale, &mut report).unwrap().is_empty());

        let created: OfferRecord = offers::table.first(conn).unwrap();
        assert_eq!(created.is_active, 0);
        assert_eq!(created.start_date, stale.scraped_at_text);
        assert_eq!(created.end_date.as_deref(), Some(stale.scraped_at_text.as_str()));
    }

    #[tokio::test]
    async fn first_product_sets_offer_values_and_rows_keep_corrected_original() {
        let (pool, _dir) = setup_test_db().await;
        let mut pooled = pool.get().unwrap();
        let conn: &mut SqliteConnection = &mut pooled;
        let ctx = restaurant(conn, "Cafe", 9);

        let a = discounted("A", "3.00", Some("3.00"), Some("20"), Some("Morning Special"));
        let b = discounted("B", "1.50", Some("2.00"), Some("25"), Some("morning  special"));
        let a_id = product_id(conn, &ctx, &a);
        let b_id = product_id(conn, &ctx, &b);

        let mut report = ImportReport::default();
        let mut offers = OfferLifecycle::new(ctx.restaurant_id);
        PriceLedger::append(conn, a_id, &a, &mut offers, &ctx, &mut report).unwrap();
        PriceLedger::append(conn, b_id, &b, &mut offers, &ctx, &mut report).unwrap();
        assert_eq!(offers.referenced_count(), 1);

        let stored: OfferRecord = offers::table.first(conn).unwrap();
        assert_eq!(stored.discount_percentage.as_deref(), Some("20"));

        let row: ProductPriceRecord = product_prices::table
            .filter(product_prices::product_id.eq(a_id))
            .first(conn)
            .unwrap();
        assert_eq!(row.price, "3.00");
        assert_eq!(row.original_price.as_deref(), Some("3.75"));
        assert_eq!(row.offer_id, Some(stored.id));
        assert_eq!(row.offer_name.as_deref(), Some("Morning Special"));
    }

    #[tokio::test]
    async fn rejected_price_row_is_reported() {
        let (pool, _dir) = setup_test_db().await;
        let mut pooled = pool.get().unwrap();
        let conn: &mut SqliteConnection = &mut pooled;
        let ctx = restaurant(conn, "Cafe", 9);
        let bad = discounted("Cookie", "1", None, None, Some("Happy Hour"));
        let cookie = product_id(conn, &ctx, &bad);

        let mut report = ImportReport::default();
        let mut offers = OfferLifecycle::new(ctx.restaurant_id);
        let written = PriceLedger::append(conn, cookie, &bad, &mut offers, &ctx, &mut report).unwrap();

        assert!(!written);
        assert_eq!(report.errors.len(), 1);
        let prices: i64 = product_prices::table.count().get_result(conn).unwrap();
        assert_eq!(prices, 0);
    }
}
