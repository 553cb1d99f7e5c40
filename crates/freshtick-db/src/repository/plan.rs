//! # Plan Repository
//!
//! Subscription plans and their items. Plans are read-only input to the
//! recurrence engine; `frequency` is stored as tagged JSON
//! (`{"type":"weekly","days":[1,4]}`).

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{DbError, DbResult};
use crate::repository::begin_write;
use freshtick_core::{CoreError, Frequency, Money, SubscriptionPlan, SubscriptionPlanItem};

#[derive(Debug, sqlx::FromRow)]
struct PlanRow {
    id: String,
    name: String,
    frequency: String,
    discount_bps: u32,
}

#[derive(Debug, sqlx::FromRow)]
struct PlanItemRow {
    product_id: String,
    quantity: i64,
    unit_price_paise: i64,
    requires_bottle: bool,
}

impl From<PlanItemRow> for SubscriptionPlanItem {
    fn from(row: PlanItemRow) -> Self {
        SubscriptionPlanItem {
            product_id: row.product_id,
            quantity: row.quantity,
            unit_price: Money::from_paise(row.unit_price_paise),
            requires_bottle: row.requires_bottle,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlanRepository {
    pool: SqlitePool,
}

impl PlanRepository {
    pub fn new(pool: SqlitePool) -> Self {
        PlanRepository { pool }
    }

    /// Inserts a plan and its items in one transaction.
    ///
    /// A plan whose rule can never advance (custom step of zero) is
    /// rejected up front.
    pub async fn insert(&self, plan: &SubscriptionPlan) -> DbResult<()> {
        if let Frequency::Custom { step_days: 0 } = plan.frequency {
            return Err(CoreError::InvalidRecurrence {
                reason: "custom frequency needs a step of at least one day".to_string(),
            }
            .into());
        }

        debug!(id = %plan.id, items = plan.items.len(), "Inserting subscription plan");
        let mut tx = begin_write(&self.pool).await?;

        sqlx::query(
            "INSERT INTO subscription_plans (id, name, frequency, discount_bps, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&plan.id)
        .bind(&plan.name)
        .bind(serde_json::to_string(&plan.frequency)?)
        .bind(plan.discount_bps)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        for (position, item) in plan.items.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO subscription_plan_items (
                    plan_id, position, product_id, quantity, unit_price_paise, requires_bottle
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            )
            .bind(&plan.id)
            .bind(position as i64)
            .bind(&item.product_id)
            .bind(item.quantity)
            .bind(item.unit_price.paise())
            .bind(item.requires_bottle)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<SubscriptionPlan>> {
        let row: Option<PlanRow> = sqlx::query_as(
            "SELECT id, name, frequency, discount_bps FROM subscription_plans WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let items: Vec<PlanItemRow> = sqlx::query_as(
            r#"
            SELECT product_id, quantity, unit_price_paise, requires_bottle
            FROM subscription_plan_items
            WHERE plan_id = ?1
            ORDER BY position
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(SubscriptionPlan {
            id: row.id,
            name: row.name,
            frequency: serde_json::from_str(&row.frequency)?,
            discount_bps: row.discount_bps,
            items: items.into_iter().map(SubscriptionPlanItem::from).collect(),
        }))
    }

    pub async fn require(&self, id: &str) -> DbResult<SubscriptionPlan> {
        self.get_by_id(id)
            .await?
            .ok_or_else(|| DbError::not_found("Plan", id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use std::collections::BTreeSet;

    #[tokio::test]
    async fn test_plan_roundtrip_keeps_item_order() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let plan = SubscriptionPlan {
            id: "plan-weekly".to_string(),
            name: "Mon/Thu".to_string(),
            frequency: Frequency::Weekly {
                days: BTreeSet::from([1, 4]),
            },
            discount_bps: 500,
            items: vec![
                SubscriptionPlanItem {
                    product_id: "milk-1l".to_string(),
                    quantity: 2,
                    unit_price: Money::from_paise(6800),
                    requires_bottle: true,
                },
                SubscriptionPlanItem {
                    product_id: "curd-400".to_string(),
                    quantity: 1,
                    unit_price: Money::from_paise(4500),
                    requires_bottle: false,
                },
            ],
        };

        db.plans().insert(&plan).await.unwrap();
        assert_eq!(db.plans().require("plan-weekly").await.unwrap(), plan);
    }

    #[tokio::test]
    async fn test_zero_step_plan_rejected() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let plan = SubscriptionPlan {
            id: "plan-bad".to_string(),
            name: "Never".to_string(),
            frequency: Frequency::Custom { step_days: 0 },
            discount_bps: 0,
            items: Vec::new(),
        };

        let err = db.plans().insert(&plan).await.unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::InvalidRecurrence { .. })));
        assert!(db.plans().get_by_id("plan-bad").await.unwrap().is_none());
    }
}
