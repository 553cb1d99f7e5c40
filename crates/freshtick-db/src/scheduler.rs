//! # Delivery Scheduler
//!
//! Turns due subscriptions into concrete orders and deliveries for a date.
//!
//! ## Materialization Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    materialize_due(date)                                │
//! │                                                                         │
//! │  1. Expire: subscriptions with end_date < date  ──► Expired             │
//! │                                                                         │
//! │  2. Page:   due_for_delivery(date, after_id, batch_size)                │
//! │             ORDER BY id, until a short page                             │
//! │                                                                         │
//! │  3. For each subscription:                                              │
//! │       zone = assignments().validate_address()                           │
//! │         none ──► NotServiceable (next_delivery_date kept)               │
//! │       quote = plan.quote(zone, product overrides)                       │
//! │                                                                         │
//! │       BEGIN                                                             │
//! │         INSERT order     (pending, quote.total)                         │
//! │         INSERT delivery  (pending, subscription_id, date, zone)         │
//! │           UNIQUE(subscription_id, delivery_date) ──► AlreadyScheduled   │
//! │         UPDATE subscription next_delivery_date (version checked)        │
//! │       COMMIT                                                            │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Running twice for the same date creates one delivery per subscription.
//! Missed dates before `date` are not back-filled: the delivery is placed on
//! `date` and the next date is computed from it.

use chrono::{NaiveDate, Utc};
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::error::{DbError, DbResult};
use crate::config::FreshtickConfig;
use crate::pool::Database;
use crate::repository::begin_write;
use crate::repository::delivery::insert_delivery;
use crate::repository::order::insert_order;
use crate::repository::subscription::{fetch_subscription, update_subscription};
use freshtick_core::{new_id, Delivery, Order, Subscription, SubscriptionPlan};

/// Default page size for the due-subscription query.
pub const DEFAULT_BATCH_SIZE: u32 = 200;

// =============================================================================
// Outcomes
// =============================================================================

/// What happened to one subscription during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MaterializeOutcome {
    /// A new order and delivery were created.
    Scheduled {
        delivery_id: String,
        order_id: String,
        next_delivery_date: NaiveDate,
    },
    /// A delivery for this subscription and date already exists.
    AlreadyScheduled,
    /// No zone serves the subscription's address.
    NotServiceable { pincode: String },
    /// The subscription was past its end date and has been expired.
    Expired,
}

/// Per-subscription outcomes of one run, in processing order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaterializeReport {
    pub outcomes: Vec<(String, MaterializeOutcome)>,
}

impl MaterializeReport {
    pub fn scheduled(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, MaterializeOutcome::Scheduled { .. }))
            .count()
    }

    pub fn outcome_for(&self, subscription_id: &str) -> Option<&MaterializeOutcome> {
        self.outcomes
            .iter()
            .find(|(id, _)| id == subscription_id)
            .map(|(_, outcome)| outcome)
    }
}

// =============================================================================
// Scheduler
// =============================================================================

#[derive(Debug, Clone)]
pub struct DeliveryScheduler {
    db: Database,
    batch_size: u32,
}

impl DeliveryScheduler {
    pub fn new(db: Database) -> Self {
        DeliveryScheduler {
            db,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Scheduler sized by the `[scheduler]` section.
    pub fn from_config(db: Database, config: &FreshtickConfig) -> Self {
        DeliveryScheduler::new(db).batch_size(config.scheduler.batch_size)
    }

    pub fn batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Materializes every subscription due on `date`.
    ///
    /// A failure on one subscription other than the expected outcomes
    /// aborts the run; work already committed stays committed.
    pub async fn materialize_due(&self, date: NaiveDate) -> DbResult<MaterializeReport> {
        info!(%date, batch_size = self.batch_size, "Materializing due deliveries");
        let mut report = MaterializeReport::default();

        for subscription in self.db.subscriptions().ended_before(date).await? {
            self.db.subscriptions().expire(&subscription.id, date).await?;
            report
                .outcomes
                .push((subscription.id, MaterializeOutcome::Expired));
        }

        let mut plans: HashMap<String, SubscriptionPlan> = HashMap::new();
        let mut after_id: Option<String> = None;

        loop {
            let page = self
                .db
                .subscriptions()
                .due_for_delivery(date, after_id.as_deref(), self.batch_size)
                .await?;
            let page_len = page.len();

            for subscription in page {
                after_id = Some(subscription.id.clone());

                if !plans.contains_key(&subscription.plan_id) {
                    let plan = self.db.plans().require(&subscription.plan_id).await?;
                    plans.insert(plan.id.clone(), plan);
                }
                let Some(plan) = plans.get(&subscription.plan_id) else {
                    continue;
                };

                let outcome = self.materialize_one(&subscription, plan, date).await?;
                report.outcomes.push((subscription.id, outcome));
            }

            if page_len < self.batch_size as usize {
                break;
            }
        }

        info!(
            %date,
            scheduled = report.scheduled(),
            processed = report.outcomes.len(),
            "Materialization complete"
        );
        Ok(report)
    }

    async fn materialize_one(
        &self,
        subscription: &Subscription,
        plan: &SubscriptionPlan,
        date: NaiveDate,
    ) -> DbResult<MaterializeOutcome> {
        let assignment = self
            .db
            .assignments()
            .validate_address(&subscription.address_id, Utc::now())
            .await?;
        let Some(assignment) = assignment else {
            let address = self.db.addresses().require(&subscription.address_id).await?;
            warn!(
                subscription_id = %subscription.id,
                pincode = %address.pincode,
                "Subscription address is not serviceable; skipping"
            );
            return Ok(MaterializeOutcome::NotServiceable {
                pincode: address.pincode,
            });
        };

        let product_overrides = self.db.zones().product_overrides(&assignment.zone.id).await?;
        let quote = plan.quote(&assignment.zone, &product_overrides);
        if !quote.unavailable_products.is_empty() {
            debug!(
                subscription_id = %subscription.id,
                unavailable = ?quote.unavailable_products,
                "Plan items not carried in zone"
            );
        }

        let order = Order::new(new_id(), &subscription.user_id, quote.total);
        let delivery = Delivery::new(
            new_id(),
            &order.id,
            &subscription.user_id,
            &subscription.address_id,
            date,
        )
        .for_subscription(&subscription.id)
        .in_zone(Some(assignment.zone.id.clone()));

        let mut tx = begin_write(self.db.pool()).await?;
        insert_order(&mut tx, &order).await?;

        match insert_delivery(&mut tx, &delivery).await {
            Ok(()) => {}
            Err(err) if err.is_unique_violation_on("delivery_date") => {
                debug!(subscription_id = %subscription.id, %date, "Delivery already scheduled");
                return Ok(MaterializeOutcome::AlreadyScheduled);
            }
            Err(err) => return Err(err),
        }

        let mut current = fetch_subscription(&mut tx, &subscription.id).await?;
        if current.version != subscription.version {
            warn!(subscription_id = %subscription.id, "Subscription changed during materialization");
            return Err(DbError::conflict("Subscription", &subscription.id));
        }
        let next = current.calculate_next_delivery_date(plan, Some(date))?;
        current.next_delivery_date = Some(next);
        update_subscription(&mut tx, &mut current).await?;
        tx.commit().await?;

        debug!(
            subscription_id = %subscription.id,
            delivery_id = %delivery.id,
            total = %quote.total,
            %next,
            "Delivery scheduled"
        );
        Ok(MaterializeOutcome::Scheduled {
            delivery_id: delivery.id,
            order_id: order.id,
            next_delivery_date: next,
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::fixtures::{date, subscription, with_subscription};
    use freshtick_core::{DeliveryStatus, Money, OrderStatus, SubscriptionStatus};

    #[tokio::test]
    async fn test_materialize_creates_priced_order_and_delivery() {
        let db = with_subscription(date(2026, 3, 2)).await;
        let report = DeliveryScheduler::new(db.clone())
            .materialize_due(date(2026, 3, 2))
            .await
            .unwrap();

        let Some(MaterializeOutcome::Scheduled {
            delivery_id,
            order_id,
            next_delivery_date,
        }) = report.outcome_for("s-1")
        else {
            panic!("expected s-1 to be scheduled: {report:?}");
        };
        assert_eq!(*next_delivery_date, date(2026, 3, 3));

        let delivery = db.deliveries().require(delivery_id).await.unwrap();
        assert_eq!(delivery.status, DeliveryStatus::Pending);
        assert_eq!(delivery.subscription_id.as_deref(), Some("s-1"));
        assert_eq!(delivery.zone_id.as_deref(), Some("z-1"));
        assert_eq!(delivery.delivery_date, date(2026, 3, 2));

        // 2 x 68.00 + 10.00 delivery charge
        let order = db.orders().require(order_id).await.unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.total, Money::from_paise(14600));

        let stored = db.subscriptions().require("s-1").await.unwrap();
        assert_eq!(stored.next_delivery_date, Some(date(2026, 3, 3)));
    }

    #[tokio::test]
    async fn test_materializing_twice_creates_one_delivery() {
        let db = with_subscription(date(2026, 3, 2)).await;
        let scheduler = DeliveryScheduler::new(db.clone());

        let first = scheduler.materialize_due(date(2026, 3, 2)).await.unwrap();
        assert_eq!(first.scheduled(), 1);

        // Roll the subscription back so it is due again for the same date
        let mut subscription = db.subscriptions().require("s-1").await.unwrap();
        subscription.next_delivery_date = Some(date(2026, 3, 2));
        db.subscriptions().save(&mut subscription).await.unwrap();

        let second = scheduler.materialize_due(date(2026, 3, 2)).await.unwrap();
        assert_eq!(
            second.outcome_for("s-1"),
            Some(&MaterializeOutcome::AlreadyScheduled)
        );

        let (deliveries,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM deliveries")
            .fetch_one(db.pool())
            .await
            .unwrap();
        let (orders,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM orders")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(deliveries, 1);
        assert_eq!(orders, 1);
    }

    #[tokio::test]
    async fn test_not_due_is_untouched() {
        let db = with_subscription(date(2026, 3, 10)).await;
        let report = DeliveryScheduler::new(db.clone())
            .materialize_due(date(2026, 3, 2))
            .await
            .unwrap();
        assert!(report.outcomes.is_empty());
    }

    #[tokio::test]
    async fn test_unserviceable_address_keeps_next_date() {
        let db = with_subscription(date(2026, 3, 2)).await;
        db.zones().soft_delete("z-1", Utc::now()).await.unwrap();

        let report = DeliveryScheduler::new(db.clone())
            .materialize_due(date(2026, 3, 2))
            .await
            .unwrap();
        assert_eq!(
            report.outcome_for("s-1"),
            Some(&MaterializeOutcome::NotServiceable {
                pincode: "682509".to_string()
            })
        );
        assert_eq!(
            db.subscriptions()
                .require("s-1")
                .await
                .unwrap()
                .next_delivery_date,
            Some(date(2026, 3, 2))
        );
    }

    #[tokio::test]
    async fn test_ended_subscription_expires_instead_of_scheduling() {
        let db = with_subscription(date(2026, 3, 2)).await;
        let mut stored = db.subscriptions().require("s-1").await.unwrap();
        stored.end_date = Some(date(2026, 3, 1));
        db.subscriptions().save(&mut stored).await.unwrap();

        let report = DeliveryScheduler::new(db.clone())
            .materialize_due(date(2026, 3, 2))
            .await
            .unwrap();
        assert_eq!(report.outcome_for("s-1"), Some(&MaterializeOutcome::Expired));
        assert_eq!(report.scheduled(), 0);
        assert_eq!(
            db.subscriptions().require("s-1").await.unwrap().status,
            SubscriptionStatus::Expired
        );
    }

    #[tokio::test]
    async fn test_pages_through_every_due_subscription() {
        let db = with_subscription(date(2026, 3, 2)).await;
        for n in 2..=5 {
            let mut extra = subscription(date(2026, 3, 1));
            extra.id = format!("s-{n}");
            db.subscriptions().insert(&extra).await.unwrap();
        }

        let report = DeliveryScheduler::new(db.clone())
            .batch_size(2)
            .materialize_due(date(2026, 3, 2))
            .await
            .unwrap();
        assert_eq!(report.scheduled(), 5);
    }

    #[tokio::test]
    async fn test_from_config_uses_batch_size() {
        let db = with_subscription(date(2026, 3, 2)).await;
        for n in 2..=3 {
            let mut extra = subscription(date(2026, 3, 2));
            extra.id = format!("s-{n}");
            db.subscriptions().insert(&extra).await.unwrap();
        }

        let mut config = FreshtickConfig::default();
        config.scheduler.batch_size = 1;
        let scheduler = DeliveryScheduler::from_config(db.clone(), &config);
        assert_eq!(scheduler.batch_size, 1);

        let report = scheduler.materialize_due(date(2026, 3, 2)).await.unwrap();
        assert_eq!(report.scheduled(), 3);

        let defaults = DeliveryScheduler::from_config(db, &FreshtickConfig::default());
        assert_eq!(defaults.batch_size, DEFAULT_BATCH_SIZE);
    }
}
