//! # Subscription Repository
//!
//! Persistence for [`Subscription`] and its lifecycle transitions.
//!
//! Every transition runs as load → domain method → versioned save inside
//! one transaction, so an illegal transition writes nothing and a
//! concurrent writer surfaces as [`DbError::Conflict`].

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};

use crate::error::{DbError, DbResult};
use crate::repository::begin_write;
use crate::repository::plan::PlanRepository;
use freshtick_core::{BillingCycle, Subscription, SubscriptionPlan, SubscriptionStatus};

#[derive(Debug, sqlx::FromRow)]
struct SubscriptionRow {
    id: String,
    user_id: String,
    address_id: String,
    plan_id: String,
    status: SubscriptionStatus,
    start_date: NaiveDate,
    end_date: Option<NaiveDate>,
    next_delivery_date: Option<NaiveDate>,
    paused_until: Option<NaiveDate>,
    vacation_start: Option<NaiveDate>,
    vacation_end: Option<NaiveDate>,
    billing_cycle: BillingCycle,
    bottles_issued: i64,
    bottles_returned: i64,
    cancelled_at: Option<DateTime<Utc>>,
    cancellation_reason: Option<String>,
    version: i64,
}

impl From<SubscriptionRow> for Subscription {
    fn from(row: SubscriptionRow) -> Self {
        Subscription {
            id: row.id,
            user_id: row.user_id,
            address_id: row.address_id,
            plan_id: row.plan_id,
            status: row.status,
            start_date: row.start_date,
            end_date: row.end_date,
            next_delivery_date: row.next_delivery_date,
            paused_until: row.paused_until,
            vacation_start: row.vacation_start,
            vacation_end: row.vacation_end,
            billing_cycle: row.billing_cycle,
            bottles_issued: row.bottles_issued,
            bottles_returned: row.bottles_returned,
            cancelled_at: row.cancelled_at,
            cancellation_reason: row.cancellation_reason,
            version: row.version,
        }
    }
}

const SELECT_COLUMNS: &str = r#"
    SELECT id, user_id, address_id, plan_id, status, start_date, end_date,
           next_delivery_date, paused_until, vacation_start, vacation_end,
           billing_cycle, bottles_issued, bottles_returned, cancelled_at,
           cancellation_reason, version
    FROM subscriptions
"#;

// =============================================================================
// Connection-level helpers
// =============================================================================

pub(crate) async fn fetch_subscription(
    conn: &mut SqliteConnection,
    id: &str,
) -> DbResult<Subscription> {
    let row: Option<SubscriptionRow> = sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE id = ?1"))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    row.map(Subscription::from)
        .ok_or_else(|| DbError::not_found("Subscription", id))
}

/// Writes every mutable column under a version check.
///
/// On success `subscription.version` matches the stored row.
pub(crate) async fn update_subscription(
    conn: &mut SqliteConnection,
    subscription: &mut Subscription,
) -> DbResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE subscriptions
        SET status = ?3,
            end_date = ?4,
            next_delivery_date = ?5,
            paused_until = ?6,
            vacation_start = ?7,
            vacation_end = ?8,
            bottles_issued = ?9,
            bottles_returned = ?10,
            cancelled_at = ?11,
            cancellation_reason = ?12,
            version = version + 1,
            updated_at = ?13
        WHERE id = ?1 AND version = ?2
        "#,
    )
    .bind(&subscription.id)
    .bind(subscription.version)
    .bind(subscription.status)
    .bind(subscription.end_date)
    .bind(subscription.next_delivery_date)
    .bind(subscription.paused_until)
    .bind(subscription.vacation_start)
    .bind(subscription.vacation_end)
    .bind(subscription.bottles_issued)
    .bind(subscription.bottles_returned)
    .bind(subscription.cancelled_at)
    .bind(&subscription.cancellation_reason)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        let exists: Option<(i64,)> = sqlx::query_as("SELECT version FROM subscriptions WHERE id = ?1")
            .bind(&subscription.id)
            .fetch_optional(&mut *conn)
            .await?;
        return Err(match exists {
            Some(_) => {
                warn!(
                    id = %subscription.id,
                    version = subscription.version,
                    "Stale subscription write rejected"
                );
                DbError::conflict("Subscription", &subscription.id)
            }
            None => DbError::not_found("Subscription", &subscription.id),
        });
    }

    subscription.version += 1;
    Ok(())
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for subscription database operations.
#[derive(Debug, Clone)]
pub struct SubscriptionRepository {
    pool: SqlitePool,
}

impl SubscriptionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        SubscriptionRepository { pool }
    }

    fn plans(&self) -> PlanRepository {
        PlanRepository::new(self.pool.clone())
    }

    pub async fn insert(&self, subscription: &Subscription) -> DbResult<()> {
        debug!(
            id = %subscription.id,
            user_id = %subscription.user_id,
            plan_id = %subscription.plan_id,
            "Inserting subscription"
        );
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO subscriptions (
                id, user_id, address_id, plan_id, status, start_date, end_date,
                next_delivery_date, paused_until, vacation_start, vacation_end,
                billing_cycle, bottles_issued, bottles_returned, cancelled_at,
                cancellation_reason, version, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?18)
            "#,
        )
        .bind(&subscription.id)
        .bind(&subscription.user_id)
        .bind(&subscription.address_id)
        .bind(&subscription.plan_id)
        .bind(subscription.status)
        .bind(subscription.start_date)
        .bind(subscription.end_date)
        .bind(subscription.next_delivery_date)
        .bind(subscription.paused_until)
        .bind(subscription.vacation_start)
        .bind(subscription.vacation_end)
        .bind(subscription.billing_cycle)
        .bind(subscription.bottles_issued)
        .bind(subscription.bottles_returned)
        .bind(subscription.cancelled_at)
        .bind(&subscription.cancellation_reason)
        .bind(subscription.version)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Subscription>> {
        let mut conn = self.pool.acquire().await?;
        match fetch_subscription(&mut conn, id).await {
            Ok(subscription) => Ok(Some(subscription)),
            Err(DbError::NotFound { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub async fn require(&self, id: &str) -> DbResult<Subscription> {
        let mut conn = self.pool.acquire().await?;
        fetch_subscription(&mut conn, id).await
    }

    /// Persists an already-mutated subscription.
    ///
    /// ## When This Occurs
    /// `Conflict` when another writer saved since `subscription` was loaded.
    pub async fn save(&self, subscription: &mut Subscription) -> DbResult<()> {
        let mut conn = self.pool.acquire().await?;
        update_subscription(&mut conn, subscription).await
    }

    // -------------------------------------------------------------------------
    // Transitions
    // -------------------------------------------------------------------------

    /// Loads, applies `transition`, saves. One transaction.
    async fn transition<F>(&self, id: &str, transition: F) -> DbResult<Subscription>
    where
        F: FnOnce(&mut Subscription) -> DbResult<()>,
    {
        let mut tx = begin_write(&self.pool).await?;
        let mut subscription = fetch_subscription(&mut tx, id).await?;
        transition(&mut subscription)?;
        update_subscription(&mut tx, &mut subscription).await?;
        tx.commit().await?;
        Ok(subscription)
    }

    pub async fn pause(&self, id: &str, until: Option<NaiveDate>) -> DbResult<Subscription> {
        let subscription = self
            .transition(id, |s| Ok(s.pause(until)?))
            .await?;
        info!(id = %id, until = ?until, "Subscription paused");
        Ok(subscription)
    }

    /// Resumes a paused subscription and reschedules it from `today`.
    pub async fn resume(&self, id: &str, today: NaiveDate) -> DbResult<Subscription> {
        let plan = self.plan_for(id).await?;
        let subscription = self
            .transition(id, |s| Ok(s.resume(&plan, today)?))
            .await?;
        info!(
            id = %id,
            next_delivery_date = ?subscription.next_delivery_date,
            "Subscription resumed"
        );
        Ok(subscription)
    }

    pub async fn cancel(
        &self,
        id: &str,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> DbResult<Subscription> {
        let subscription = self
            .transition(id, |s| Ok(s.cancel(reason, now)?))
            .await?;
        info!(id = %id, "Subscription cancelled");
        Ok(subscription)
    }

    pub async fn expire(&self, id: &str, today: NaiveDate) -> DbResult<Subscription> {
        let subscription = self.transition(id, |s| Ok(s.expire(today)?)).await?;
        info!(id = %id, "Subscription expired");
        Ok(subscription)
    }

    pub async fn set_vacation(
        &self,
        id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> DbResult<Subscription> {
        let plan = self.plan_for(id).await?;
        let subscription = self
            .transition(id, |s| Ok(s.set_vacation(start, end, &plan)?))
            .await?;
        info!(id = %id, %start, %end, "Vacation set");
        Ok(subscription)
    }

    pub async fn clear_vacation(&self, id: &str) -> DbResult<Subscription> {
        self.transition(id, |s| {
            s.clear_vacation();
            Ok(())
        })
        .await
    }

    async fn plan_for(&self, subscription_id: &str) -> DbResult<SubscriptionPlan> {
        let subscription = self.require(subscription_id).await?;
        self.plans().require(&subscription.plan_id).await
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Active subscriptions due on `date` and not on vacation that day.
    ///
    /// Ordered by id. Pass the last id of the previous page as `after_id`.
    pub async fn due_for_delivery(
        &self,
        date: NaiveDate,
        after_id: Option<&str>,
        limit: u32,
    ) -> DbResult<Vec<Subscription>> {
        let rows: Vec<SubscriptionRow> = sqlx::query_as(&format!(
            r#"{SELECT_COLUMNS}
            WHERE status = 'active'
              AND next_delivery_date IS NOT NULL
              AND next_delivery_date <= ?1
              AND NOT (vacation_start IS NOT NULL AND vacation_end IS NOT NULL
                       AND ?1 BETWEEN vacation_start AND vacation_end)
              AND (?2 IS NULL OR id > ?2)
            ORDER BY id
            LIMIT ?3
            "#
        ))
        .bind(date)
        .bind(after_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Subscription::from).collect())
    }

    /// Active or paused subscriptions whose end date is before `today`.
    pub async fn ended_before(&self, today: NaiveDate) -> DbResult<Vec<Subscription>> {
        let rows: Vec<SubscriptionRow> = sqlx::query_as(&format!(
            r#"{SELECT_COLUMNS}
            WHERE status IN ('active', 'paused')
              AND end_date IS NOT NULL
              AND end_date < ?1
            ORDER BY id
            "#
        ))
        .bind(today)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Subscription::from).collect())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
