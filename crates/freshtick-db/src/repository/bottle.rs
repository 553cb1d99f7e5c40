//! # Bottle Repository
//!
//! Deposit bottles and their append-only history.
//!
//! Every bottle movement writes three things in one transaction:
//! the bottle row (version checked), a `bottle_logs` row, and, for issue
//! and return against a subscription, the subscription's bottle counter.
//! `bottle_logs` rejects UPDATE and DELETE at the database level.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};

use crate::error::{DbError, DbResult};
use crate::repository::begin_write;
use crate::repository::subscription::{fetch_subscription, update_subscription};
use freshtick_core::validation::validate_bottle_number;
use freshtick_core::{
    ActorKind, Bottle, BottleAction, BottleLog, BottleStatus, Money, ReturnCondition,
};

// =============================================================================
// Rows
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct BottleRow {
    id: String,
    bottle_number: String,
    status: BottleStatus,
    current_user_id: Option<String>,
    current_subscription_id: Option<String>,
    deposit_paise: i64,
    issued_at: Option<DateTime<Utc>>,
    returned_at: Option<DateTime<Utc>>,
    damaged_at: Option<DateTime<Utc>>,
    damage_reason: Option<String>,
    version: i64,
}

impl From<BottleRow> for Bottle {
    fn from(row: BottleRow) -> Self {
        Bottle {
            id: row.id,
            bottle_number: row.bottle_number,
            status: row.status,
            current_user_id: row.current_user_id,
            current_subscription_id: row.current_subscription_id,
            deposit_amount: Money::from_paise(row.deposit_paise),
            issued_at: row.issued_at,
            returned_at: row.returned_at,
            damaged_at: row.damaged_at,
            damage_reason: row.damage_reason,
            version: row.version,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct BottleLogRow {
    id: String,
    bottle_id: String,
    action: BottleAction,
    actor: ActorKind,
    user_id: Option<String>,
    subscription_id: Option<String>,
    deposit_paise: Option<i64>,
    refund_paise: Option<i64>,
    notes: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<BottleLogRow> for BottleLog {
    fn from(row: BottleLogRow) -> Self {
        BottleLog {
            id: row.id,
            bottle_id: row.bottle_id,
            action: row.action,
            actor: row.actor,
            user_id: row.user_id,
            subscription_id: row.subscription_id,
            deposit_amount: row.deposit_paise.map(Money::from_paise),
            refund_amount: row.refund_paise.map(Money::from_paise),
            notes: row.notes,
            created_at: row.created_at,
        }
    }
}

const SELECT_COLUMNS: &str = r#"
    SELECT id, bottle_number, status, current_user_id, current_subscription_id,
           deposit_paise, issued_at, returned_at, damaged_at, damage_reason, version
    FROM bottles
"#;

// =============================================================================
// Connection-level helpers
// =============================================================================

async fn fetch_bottle(conn: &mut SqliteConnection, id: &str) -> DbResult<Bottle> {
    let row: Option<BottleRow> = sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE id = ?1"))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    row.map(Bottle::from)
        .ok_or_else(|| DbError::not_found("Bottle", id))
}

async fn update_bottle(conn: &mut SqliteConnection, bottle: &mut Bottle) -> DbResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE bottles
        SET status = ?3,
            current_user_id = ?4,
            current_subscription_id = ?5,
            issued_at = ?6,
            returned_at = ?7,
            damaged_at = ?8,
            damage_reason = ?9,
            version = version + 1,
            updated_at = ?10
        WHERE id = ?1 AND version = ?2
        "#,
    )
    .bind(&bottle.id)
    .bind(bottle.version)
    .bind(bottle.status)
    .bind(&bottle.current_user_id)
    .bind(&bottle.current_subscription_id)
    .bind(bottle.issued_at)
    .bind(bottle.returned_at)
    .bind(bottle.damaged_at)
    .bind(&bottle.damage_reason)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        warn!(id = %bottle.id, version = bottle.version, "Stale bottle write rejected");
        return Err(DbError::conflict("Bottle", &bottle.id));
    }
    bottle.version += 1;
    Ok(())
}

async fn insert_log(conn: &mut SqliteConnection, entry: &BottleLog) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO bottle_logs (
            id, bottle_id, action, actor, user_id, subscription_id,
            deposit_paise, refund_paise, notes, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        "#,
    )
    .bind(&entry.id)
    .bind(&entry.bottle_id)
    .bind(entry.action)
    .bind(entry.actor)
    .bind(&entry.user_id)
    .bind(&entry.subscription_id)
    .bind(entry.deposit_amount.map(|m| m.paise()))
    .bind(entry.refund_amount.map(|m| m.paise()))
    .bind(&entry.notes)
    .bind(entry.created_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for bottle database operations.
#[derive(Debug, Clone)]
pub struct BottleRepository {
    pool: SqlitePool,
}

impl BottleRepository {
    pub fn new(pool: SqlitePool) -> Self {
        BottleRepository { pool }
    }

    /// Registers a bottle.
    ///
    /// ## When This Occurs
    /// `UniqueViolation` on `bottle_number` when the number is taken.
    pub async fn insert(&self, bottle: &Bottle) -> DbResult<()> {
        validate_bottle_number(&bottle.bottle_number)?;
        debug!(id = %bottle.id, number = %bottle.bottle_number, "Inserting bottle");
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO bottles (
                id, bottle_number, status, current_user_id, current_subscription_id,
                deposit_paise, issued_at, returned_at, damaged_at, damage_reason,
                version, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)
            "#,
        )
        .bind(&bottle.id)
        .bind(&bottle.bottle_number)
        .bind(bottle.status)
        .bind(&bottle.current_user_id)
        .bind(&bottle.current_subscription_id)
        .bind(bottle.deposit_amount.paise())
        .bind(bottle.issued_at)
        .bind(bottle.returned_at)
        .bind(bottle.damaged_at)
        .bind(&bottle.damage_reason)
        .bind(bottle.version)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Bottle>> {
        let mut conn = self.pool.acquire().await?;
        match fetch_bottle(&mut conn, id).await {
            Ok(bottle) => Ok(Some(bottle)),
            Err(DbError::NotFound { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub async fn get_by_number(&self, bottle_number: &str) -> DbResult<Option<Bottle>> {
        let row: Option<BottleRow> =
            sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE bottle_number = ?1"))
                .bind(bottle_number.trim())
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(Bottle::from))
    }

    /// Bottles ready to be issued.
    pub async fn count_available(&self) -> DbResult<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM bottles WHERE status = 'available'")
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    /// A bottle's history, oldest first.
    pub async fn logs_for(&self, bottle_id: &str) -> DbResult<Vec<BottleLog>> {
        let rows: Vec<BottleLogRow> = sqlx::query_as(
            r#"
            SELECT id, bottle_id, action, actor, user_id, subscription_id,
                   deposit_paise, refund_paise, notes, created_at
            FROM bottle_logs
            WHERE bottle_id = ?1
            ORDER BY created_at, rowid
            "#,
        )
        .bind(bottle_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(BottleLog::from).collect())
    }

    // -------------------------------------------------------------------------
    // Movements
    // -------------------------------------------------------------------------

    /// Issues an available bottle to a customer.
    ///
    /// When `subscription_id` is given the subscription's `bottles_issued`
    /// counter moves in the same transaction.
    pub async fn issue(
        &self,
        bottle_id: &str,
        user_id: &str,
        subscription_id: Option<&str>,
        actor: ActorKind,
        now: DateTime<Utc>,
    ) -> DbResult<(Bottle, BottleLog)> {
        let mut tx = begin_write(&self.pool).await?;
        let mut bottle = fetch_bottle(&mut tx, bottle_id).await?;
        let entry = bottle.issue_to(user_id, subscription_id, actor, now)?;
        update_bottle(&mut tx, &mut bottle).await?;
        insert_log(&mut tx, &entry).await?;

        if let Some(subscription_id) = subscription_id {
            let mut subscription = fetch_subscription(&mut tx, subscription_id).await?;
            subscription.record_bottles_issued(1);
            update_subscription(&mut tx, &mut subscription).await?;
        }

        tx.commit().await?;
        info!(bottle_id = %bottle_id, user_id = %user_id, "Bottle issued");
        Ok((bottle, entry))
    }

    /// Takes a bottle back. A good return refunds the deposit; a damaged one
    /// does not.
    pub async fn return_bottle(
        &self,
        bottle_id: &str,
        condition: ReturnCondition,
        actor: ActorKind,
        now: DateTime<Utc>,
    ) -> DbResult<(Bottle, BottleLog)> {
        let mut tx = begin_write(&self.pool).await?;
        let mut bottle = fetch_bottle(&mut tx, bottle_id).await?;
        let entry = bottle.return_bottle(condition, actor, now)?;
        update_bottle(&mut tx, &mut bottle).await?;
        insert_log(&mut tx, &entry).await?;

        if let Some(subscription_id) = entry.subscription_id.as_deref() {
            let mut subscription = fetch_subscription(&mut tx, subscription_id).await?;
            subscription.record_bottles_returned(1);
            update_subscription(&mut tx, &mut subscription).await?;
        }

        tx.commit().await?;
        info!(bottle_id = %bottle_id, ?condition, "Bottle returned");
        Ok((bottle, entry))
    }

    /// Admin override. Clears the holder.
    pub async fn mark_damaged(
        &self,
        bottle_id: &str,
        reason: Option<String>,
        actor: ActorKind,
        now: DateTime<Utc>,
    ) -> DbResult<(Bottle, BottleLog)> {
        self.override_status(bottle_id, |bottle| bottle.mark_as_damaged(reason, actor, now))
            .await
    }

    /// Admin override. Clears the holder.
    pub async fn mark_lost(
        &self,
        bottle_id: &str,
        actor: ActorKind,
        now: DateTime<Utc>,
    ) -> DbResult<(Bottle, BottleLog)> {
        self.override_status(bottle_id, |bottle| bottle.mark_as_lost(actor, now))
            .await
    }

    /// Admin override. Clears the holder.
    pub async fn mark_available(
        &self,
        bottle_id: &str,
        actor: ActorKind,
        now: DateTime<Utc>,
    ) -> DbResult<(Bottle, BottleLog)> {
        self.override_status(bottle_id, |bottle| bottle.mark_as_available(actor, now))
            .await
    }

    async fn override_status<F>(&self, bottle_id: &str, apply: F) -> DbResult<(Bottle, BottleLog)>
    where
        F: FnOnce(&mut Bottle) -> BottleLog,
    {
        let mut tx = begin_write(&self.pool).await?;
        let mut bottle = fetch_bottle(&mut tx, bottle_id).await?;
        let entry = apply(&mut bottle);
        update_bottle(&mut tx, &mut bottle).await?;
        insert_log(&mut tx, &entry).await?;
        tx.commit().await?;

        info!(bottle_id = %bottle_id, status = %bottle.status, "Bottle status overridden");
        Ok((bottle, entry))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::fixtures::{date, with_subscription};
    use freshtick_core::CoreError;

    fn bottle() -> Bottle {
        Bottle::new("b-1", "FT-000123", Money::from_paise(2500))
    }

    #[tokio::test]
    async fn test_issue_and_good_return_moves_counters() {
        let db = with_subscription(date(2026, 3, 2)).await;
        let repo = db.bottles();
        repo.insert(&bottle()).await.unwrap();
        let now = Utc::now();

        let (issued, entry) = repo
            .issue("b-1", "u-1", Some("s-1"), ActorKind::Driver, now)
            .await
            .unwrap();
        assert_eq!(issued.status, BottleStatus::Issued);
        assert_eq!(entry.deposit_amount, Some(Money::from_paise(2500)));
        assert_eq!(repo.count_available().await.unwrap(), 0);

        let (returned, entry) = repo
            .return_bottle("b-1", ReturnCondition::Good, ActorKind::Driver, now)
            .await
            .unwrap();
        assert_eq!(returned.status, BottleStatus::Available);
        assert!(returned.holder_consistent());
        assert_eq!(entry.refund_amount, Some(Money::from_paise(2500)));
        assert_eq!(entry.subscription_id.as_deref(), Some("s-1"));

        let subscription = db.subscriptions().require("s-1").await.unwrap();
        assert_eq!(subscription.bottles_issued, 1);
        assert_eq!(subscription.bottles_returned, 1);
        assert_eq!(subscription.bottles_outstanding(), 0);

        let history = repo.logs_for("b-1").await.unwrap();
        let actions: Vec<_> = history.iter().map(|log| log.action).collect();
        assert_eq!(actions, vec![BottleAction::Issued, BottleAction::Returned]);
    }

    #[tokio::test]
    async fn test_damaged_return_keeps_deposit() {
        let db = with_subscription(date(2026, 3, 2)).await;
        let repo = db.bottles();
        repo.insert(&bottle()).await.unwrap();
        let now = Utc::now();

        repo.issue("b-1", "u-1", None, ActorKind::Driver, now)
            .await
            .unwrap();
        let (returned, entry) = repo
            .return_bottle("b-1", "DAMAGED".parse().unwrap(), ActorKind::Driver, now)
            .await
            .unwrap();

        assert_eq!(returned.status, BottleStatus::Damaged);
        assert_eq!(entry.refund_amount, None);
        assert_eq!(entry.notes.as_deref(), Some("returned damaged"));
    }

    #[tokio::test]
    async fn test_double_issue_writes_nothing() {
        let db = with_subscription(date(2026, 3, 2)).await;
        let repo = db.bottles();
        repo.insert(&bottle()).await.unwrap();
        let now = Utc::now();

        repo.issue("b-1", "u-1", Some("s-1"), ActorKind::Driver, now)
            .await
            .unwrap();
        let err = repo
            .issue("b-1", "u-2", None, ActorKind::Driver, now)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DbError::Domain(CoreError::InvalidTransition { .. })
        ));

        assert_eq!(repo.logs_for("b-1").await.unwrap().len(), 1);
        let stored = repo.get_by_id("b-1").await.unwrap().unwrap();
        assert_eq!(stored.current_user_id.as_deref(), Some("u-1"));
    }

    #[tokio::test]
    async fn test_admin_overrides_clear_holder() {
        let db = with_subscription(date(2026, 3, 2)).await;
        let repo = db.bottles();
        repo.insert(&bottle()).await.unwrap();
        let now = Utc::now();

        repo.issue("b-1", "u-1", Some("s-1"), ActorKind::Driver, now)
            .await
            .unwrap();
        let (lost, entry) = repo.mark_lost("b-1", ActorKind::Admin, now).await.unwrap();
        assert_eq!(lost.status, BottleStatus::Lost);
        assert!(lost.holder_consistent());
        assert_eq!(entry.user_id.as_deref(), Some("u-1"));

        let (available, _) = repo
            .mark_available("b-1", ActorKind::Admin, now)
            .await
            .unwrap();
        assert_eq!(available.status, BottleStatus::Available);

        let (damaged, _) = repo
            .mark_damaged("b-1", Some("cracked".to_string()), ActorKind::Admin, now)
            .await
            .unwrap();
        assert_eq!(damaged.damage_reason.as_deref(), Some("cracked"));
        assert_eq!(repo.logs_for("b-1").await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_duplicate_bottle_number() {
        let db = with_subscription(date(2026, 3, 2)).await;
        let repo = db.bottles();
        repo.insert(&bottle()).await.unwrap();

        let err = repo
            .insert(&Bottle::new("b-2", "FT-000123", Money::from_paise(2500)))
            .await
            .unwrap_err();
        assert!(err.is_unique_violation_on("bottle_number"));
        assert!(repo.get_by_number("FT-000123").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_bottle_logs_are_append_only() {
        let db = with_subscription(date(2026, 3, 2)).await;
        let repo = db.bottles();
        repo.insert(&bottle()).await.unwrap();
        repo.issue("b-1", "u-1", None, ActorKind::Driver, Utc::now())
            .await
            .unwrap();

        let update = sqlx::query("UPDATE bottle_logs SET notes = 'edited'")
            .execute(db.pool())
            .await;
        assert!(update.is_err());

        let delete = sqlx::query("DELETE FROM bottle_logs").execute(db.pool()).await;
        assert!(delete.is_err());
        assert_eq!(repo.logs_for("b-1").await.unwrap().len(), 1);
    }
}
