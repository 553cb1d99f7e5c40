//! # Delivery Repository
//!
//! Persistence for [`Delivery`] and its state machine, plus driver tracking
//! breadcrumbs.
//!
//! ## Order Coupling
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │  mark_out_for_delivery / mark_delivered  (one transaction)           │
//! │                                                                       │
//! │   delivery.mark_as_*()  ──► DeliveryEvent                             │
//! │                                  │                                    │
//! │                                  ▼                                    │
//! │   order.apply_delivery_event()  ──► Applied → UPDATE orders          │
//! │                                     Skipped → warn!, order untouched │
//! │                                                                       │
//! │   UPDATE deliveries (version checked)                                │
//! └───────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The delivery and the order change together or not at all.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};

use crate::error::{DbError, DbResult};
use crate::repository::begin_write;
use crate::repository::driver::DriverRepository;
use crate::repository::order::{fetch_order, update_order};
use freshtick_core::{
    CoreError, Delivery, DeliveryEvent, DeliveryStatus, DeliveryTracking, OrderSync,
};

// =============================================================================
// Rows
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct DeliveryRow {
    id: String,
    order_id: String,
    subscription_id: Option<String>,
    driver_id: Option<String>,
    user_id: String,
    address_id: String,
    zone_id: Option<String>,
    delivery_date: NaiveDate,
    status: DeliveryStatus,
    assigned_at: Option<DateTime<Utc>>,
    dispatched_at: Option<DateTime<Utc>>,
    delivered_at: Option<DateTime<Utc>>,
    failure_reason: Option<String>,
    proof_image: Option<String>,
    proof_verified: bool,
    verified_by: Option<String>,
    verified_at: Option<DateTime<Utc>>,
    version: i64,
}

impl From<DeliveryRow> for Delivery {
    fn from(row: DeliveryRow) -> Self {
        Delivery {
            id: row.id,
            order_id: row.order_id,
            subscription_id: row.subscription_id,
            driver_id: row.driver_id,
            user_id: row.user_id,
            address_id: row.address_id,
            zone_id: row.zone_id,
            delivery_date: row.delivery_date,
            status: row.status,
            assigned_at: row.assigned_at,
            dispatched_at: row.dispatched_at,
            delivered_at: row.delivered_at,
            failure_reason: row.failure_reason,
            proof_image: row.proof_image,
            proof_verified: row.proof_verified,
            verified_by: row.verified_by,
            verified_at: row.verified_at,
            version: row.version,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TrackingRow {
    id: String,
    delivery_id: String,
    driver_id: String,
    lat: f64,
    lng: f64,
    recorded_at: DateTime<Utc>,
}

impl From<TrackingRow> for DeliveryTracking {
    fn from(row: TrackingRow) -> Self {
        DeliveryTracking {
            id: row.id,
            delivery_id: row.delivery_id,
            driver_id: row.driver_id,
            lat: row.lat,
            lng: row.lng,
            recorded_at: row.recorded_at,
        }
    }
}

const SELECT_COLUMNS: &str = r#"
    SELECT id, order_id, subscription_id, driver_id, user_id, address_id, zone_id,
           delivery_date, status, assigned_at, dispatched_at, delivered_at,
           failure_reason, proof_image, proof_verified, verified_by, verified_at, version
    FROM deliveries
"#;

// =============================================================================
// Connection-level helpers
// =============================================================================

pub(crate) async fn insert_delivery(
    conn: &mut SqliteConnection,
    delivery: &Delivery,
) -> DbResult<()> {
    debug!(
        id = %delivery.id,
        order_id = %delivery.order_id,
        date = %delivery.delivery_date,
        "Inserting delivery"
    );
    let now = Utc::now();

    sqlx::query(
        r#"
        INSERT INTO deliveries (
            id, order_id, subscription_id, driver_id, user_id, address_id, zone_id,
            delivery_date, status, assigned_at, dispatched_at, delivered_at,
            failure_reason, proof_image, proof_verified, verified_by, verified_at,
            version, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?19)
        "#,
    )
    .bind(&delivery.id)
    .bind(&delivery.order_id)
    .bind(&delivery.subscription_id)
    .bind(&delivery.driver_id)
    .bind(&delivery.user_id)
    .bind(&delivery.address_id)
    .bind(&delivery.zone_id)
    .bind(delivery.delivery_date)
    .bind(delivery.status)
    .bind(delivery.assigned_at)
    .bind(delivery.dispatched_at)
    .bind(delivery.delivered_at)
    .bind(&delivery.failure_reason)
    .bind(&delivery.proof_image)
    .bind(delivery.proof_verified)
    .bind(&delivery.verified_by)
    .bind(delivery.verified_at)
    .bind(delivery.version)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

async fn fetch_delivery(conn: &mut SqliteConnection, id: &str) -> DbResult<Delivery> {
    let row: Option<DeliveryRow> = sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE id = ?1"))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    row.map(Delivery::from)
        .ok_or_else(|| DbError::not_found("Delivery", id))
}

async fn update_delivery(conn: &mut SqliteConnection, delivery: &mut Delivery) -> DbResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE deliveries
        SET driver_id = ?3,
            status = ?4,
            assigned_at = ?5,
            dispatched_at = ?6,
            delivered_at = ?7,
            failure_reason = ?8,
            proof_image = ?9,
            proof_verified = ?10,
            verified_by = ?11,
            verified_at = ?12,
            version = version + 1,
            updated_at = ?13
        WHERE id = ?1 AND version = ?2
        "#,
    )
    .bind(&delivery.id)
    .bind(delivery.version)
    .bind(&delivery.driver_id)
    .bind(delivery.status)
    .bind(delivery.assigned_at)
    .bind(delivery.dispatched_at)
    .bind(delivery.delivered_at)
    .bind(&delivery.failure_reason)
    .bind(&delivery.proof_image)
    .bind(delivery.proof_verified)
    .bind(&delivery.verified_by)
    .bind(delivery.verified_at)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        let exists: Option<(i64,)> = sqlx::query_as("SELECT version FROM deliveries WHERE id = ?1")
            .bind(&delivery.id)
            .fetch_optional(&mut *conn)
            .await?;
        return Err(match exists {
            Some(_) => {
                warn!(id = %delivery.id, version = delivery.version, "Stale delivery write rejected");
                DbError::conflict("Delivery", &delivery.id)
            }
            None => DbError::not_found("Delivery", &delivery.id),
        });
    }

    delivery.version += 1;
    Ok(())
}

/// Applies a delivery event to the delivery's order inside `conn`.
async fn sync_order(conn: &mut SqliteConnection, event: &DeliveryEvent) -> DbResult<()> {
    let mut order = fetch_order(conn, event.order_id()).await?;

    match order.apply_delivery_event(event)? {
        OrderSync::Applied { from, to } => {
            update_order(conn, &mut order).await?;
            debug!(order_id = %order.id, %from, %to, "Order status synced from delivery");
        }
        OrderSync::Skipped { current } => {
            warn!(
                order_id = %order.id,
                status = %current,
                "Delivery completed but order was not out for delivery; order left unchanged"
            );
        }
    }
    Ok(())
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for delivery database operations.
#[derive(Debug, Clone)]
pub struct DeliveryRepository {
    pool: SqlitePool,
}

impl DeliveryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        DeliveryRepository { pool }
    }

    /// Inserts a delivery.
    ///
    /// ## When This Occurs
    /// `UniqueViolation` when the order already has a delivery, or the
    /// subscription already has one on the same date.
    pub async fn insert(&self, delivery: &Delivery) -> DbResult<()> {
        let mut conn = self.pool.acquire().await?;
        insert_delivery(&mut conn, delivery).await
    }

    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Delivery>> {
        let mut conn = self.pool.acquire().await?;
        match fetch_delivery(&mut conn, id).await {
            Ok(delivery) => Ok(Some(delivery)),
            Err(DbError::NotFound { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub async fn require(&self, id: &str) -> DbResult<Delivery> {
        let mut conn = self.pool.acquire().await?;
        fetch_delivery(&mut conn, id).await
    }

    /// Persists an already-mutated delivery. Does not touch the order.
    pub async fn save(&self, delivery: &mut Delivery) -> DbResult<()> {
        let mut conn = self.pool.acquire().await?;
        update_delivery(&mut conn, delivery).await
    }

    /// A driver's deliveries for one day, oldest first.
    pub async fn for_driver_on(&self, driver_id: &str, date: NaiveDate) -> DbResult<Vec<Delivery>> {
        let rows: Vec<DeliveryRow> = sqlx::query_as(&format!(
            "{SELECT_COLUMNS} WHERE driver_id = ?1 AND delivery_date = ?2 ORDER BY created_at, id"
        ))
        .bind(driver_id)
        .bind(date)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Delivery::from).collect())
    }

    // -------------------------------------------------------------------------
    // Transitions
    // -------------------------------------------------------------------------

    /// Assigns an active driver.
    ///
    /// ## When This Occurs
    /// - `NotFound` if the driver doesn't exist
    /// - `DriverRequired` if the driver is inactive
    pub async fn assign_driver(
        &self,
        id: &str,
        driver_id: &str,
        now: DateTime<Utc>,
    ) -> DbResult<Delivery> {
        let driver = DriverRepository::new(self.pool.clone())
            .require(driver_id)
            .await?;
        if !driver.is_active {
            return Err(CoreError::DriverRequired {
                delivery_id: id.to_string(),
            }
            .into());
        }

        let mut tx = begin_write(&self.pool).await?;
        let mut delivery = fetch_delivery(&mut tx, id).await?;
        delivery.assign_driver(&driver, now)?;
        update_delivery(&mut tx, &mut delivery).await?;
        tx.commit().await?;

        info!(id = %id, driver_id = %driver_id, "Driver assigned");
        Ok(delivery)
    }

    /// Dispatches the delivery and moves its order to `out_for_delivery`.
    pub async fn mark_out_for_delivery(&self, id: &str, now: DateTime<Utc>) -> DbResult<Delivery> {
        let mut tx = begin_write(&self.pool).await?;
        let mut delivery = fetch_delivery(&mut tx, id).await?;
        let event = delivery.mark_as_out_for_delivery(now)?;
        update_delivery(&mut tx, &mut delivery).await?;
        sync_order(&mut tx, &event).await?;
        tx.commit().await?;

        info!(id = %id, order_id = %delivery.order_id, "Out for delivery");
        Ok(delivery)
    }

    /// Completes the delivery with a proof image and marks its order
    /// delivered when the order is out for delivery.
    pub async fn mark_delivered(
        &self,
        id: &str,
        proof_image: &str,
        now: DateTime<Utc>,
    ) -> DbResult<Delivery> {
        let mut tx = begin_write(&self.pool).await?;
        let mut delivery = fetch_delivery(&mut tx, id).await?;
        let event = delivery.mark_as_delivered(proof_image, now)?;
        update_delivery(&mut tx, &mut delivery).await?;
        sync_order(&mut tx, &event).await?;
        tx.commit().await?;

        info!(id = %id, order_id = %delivery.order_id, "Delivered");
        Ok(delivery)
    }

    pub async fn mark_failed(&self, id: &str, reason: &str) -> DbResult<Delivery> {
        let mut tx = begin_write(&self.pool).await?;
        let mut delivery = fetch_delivery(&mut tx, id).await?;
        delivery.mark_as_failed(reason)?;
        update_delivery(&mut tx, &mut delivery).await?;
        tx.commit().await?;

        warn!(id = %id, reason = %reason, "Delivery failed");
        Ok(delivery)
    }

    pub async fn cancel(&self, id: &str) -> DbResult<Delivery> {
        let mut tx = begin_write(&self.pool).await?;
        let mut delivery = fetch_delivery(&mut tx, id).await?;
        delivery.cancel()?;
        update_delivery(&mut tx, &mut delivery).await?;
        tx.commit().await?;

        info!(id = %id, "Delivery cancelled");
        Ok(delivery)
    }

    pub async fn verify_proof(
        &self,
        id: &str,
        verifier_id: &str,
        now: DateTime<Utc>,
    ) -> DbResult<Delivery> {
        let mut tx = begin_write(&self.pool).await?;
        let mut delivery = fetch_delivery(&mut tx, id).await?;
        delivery.verify_proof(verifier_id, now)?;
        update_delivery(&mut tx, &mut delivery).await?;
        tx.commit().await?;
        Ok(delivery)
    }

    // -------------------------------------------------------------------------
    // Tracking
    // -------------------------------------------------------------------------

    /// Records a driver location for a delivery that is out for delivery.
    pub async fn record_tracking(
        &self,
        id: &str,
        lat: f64,
        lng: f64,
        now: DateTime<Utc>,
    ) -> DbResult<DeliveryTracking> {
        let delivery = self.require(id).await?;
        let point = delivery.track(lat, lng, now)?;

        sqlx::query(
            r#"
            INSERT INTO delivery_tracking (id, delivery_id, driver_id, lat, lng, recorded_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&point.id)
        .bind(&point.delivery_id)
        .bind(&point.driver_id)
        .bind(point.lat)
        .bind(point.lng)
        .bind(point.recorded_at)
        .execute(&self.pool)
        .await?;

        Ok(point)
    }

    /// Breadcrumbs for a delivery, oldest first.
    pub async fn tracking_for(&self, id: &str) -> DbResult<Vec<DeliveryTracking>> {
        let rows: Vec<TrackingRow> = sqlx::query_as(
            r#"
            SELECT id, delivery_id, driver_id, lat, lng, recorded_at
            FROM delivery_tracking
            WHERE delivery_id = ?1
            ORDER BY recorded_at, id
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(DeliveryTracking::from).collect())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
