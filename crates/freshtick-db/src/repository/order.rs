//! # Order Repository
//!
//! The slice of the order table the delivery core reads and writes: status,
//! total and delivery timestamp. Status changes arrive as delivery events
//! and are written by [`DeliveryRepository`](super::delivery::DeliveryRepository)
//! in the delivery's transaction.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, warn};

use crate::error::{DbError, DbResult};
use crate::repository::begin_write;
use freshtick_core::{Money, Order, OrderStatus};

#[derive(Debug, sqlx::FromRow)]
struct OrderRow {
    id: String,
    user_id: String,
    status: OrderStatus,
    total_paise: i64,
    delivered_at: Option<DateTime<Utc>>,
    version: i64,
}

impl From<OrderRow> for Order {
    fn from(row: OrderRow) -> Self {
        Order {
            id: row.id,
            user_id: row.user_id,
            status: row.status,
            total: Money::from_paise(row.total_paise),
            delivered_at: row.delivered_at,
            version: row.version,
        }
    }
}

// =============================================================================
// Connection-level helpers (usable inside a transaction)
// =============================================================================

pub(crate) async fn insert_order(conn: &mut SqliteConnection, order: &Order) -> DbResult<()> {
    debug!(id = %order.id, total = %order.total, "Inserting order");
    let now = Utc::now();

    sqlx::query(
        r#"
        INSERT INTO orders (id, user_id, status, total_paise, delivered_at, version, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
        "#,
    )
    .bind(&order.id)
    .bind(&order.user_id)
    .bind(order.status)
    .bind(order.total.paise())
    .bind(order.delivered_at)
    .bind(order.version)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub(crate) async fn fetch_order(conn: &mut SqliteConnection, id: &str) -> DbResult<Order> {
    let row: Option<OrderRow> = sqlx::query_as(
        "SELECT id, user_id, status, total_paise, delivered_at, version FROM orders WHERE id = ?1",
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    row.map(Order::from)
        .ok_or_else(|| DbError::not_found("Order", id))
}

/// Writes status fields under a version check and bumps `order.version`.
pub(crate) async fn update_order(conn: &mut SqliteConnection, order: &mut Order) -> DbResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE orders
        SET status = ?3, delivered_at = ?4, version = version + 1, updated_at = ?5
        WHERE id = ?1 AND version = ?2
        "#,
    )
    .bind(&order.id)
    .bind(order.version)
    .bind(order.status)
    .bind(order.delivered_at)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        warn!(id = %order.id, version = order.version, "Stale order write rejected");
        return Err(DbError::conflict("Order", &order.id));
    }
    order.version += 1;
    Ok(())
}

// =============================================================================
// Repository
// =============================================================================

#[derive(Debug, Clone)]
pub struct OrderRepository {
    pool: SqlitePool,
}

impl OrderRepository {
    pub fn new(pool: SqlitePool) -> Self {
        OrderRepository { pool }
    }

    pub async fn insert(&self, order: &Order) -> DbResult<()> {
        let mut conn = self.pool.acquire().await?;
        insert_order(&mut conn, order).await
    }

    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Order>> {
        let mut conn = self.pool.acquire().await?;
        match fetch_order(&mut conn, id).await {
            Ok(order) => Ok(Some(order)),
            Err(DbError::NotFound { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub async fn require(&self, id: &str) -> DbResult<Order> {
        let mut conn = self.pool.acquire().await?;
        fetch_order(&mut conn, id).await
    }

    /// Sets the status from the ordering side (e.g. confirmation).
    pub async fn set_status(&self, id: &str, status: OrderStatus) -> DbResult<Order> {
        let mut tx = begin_write(&self.pool).await?;
        let mut order = fetch_order(&mut tx, id).await?;
        order.status = status;
        update_order(&mut tx, &mut order).await?;
        tx.commit().await?;
        Ok(order)
    }
}
