//! # Zone Repository
//!
//! Zones, zone overrides and per-zone product overrides.
//!
//! ## Column Encoding
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  boundary      TEXT  [{"lat":9.98,"lng":76.28}, ...]                    │
//! │  pincodes      TEXT  ["682509", ...]                                    │
//! │  service_days  TEXT  [1, 2, 3]      (0 = Sunday)                        │
//! │  verticals     TEXT  ["daily_fresh"]                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A boundary column that does not decode is logged and treated as "no
//! boundary", so the zone can still match by pincode. A boundary that
//! decodes to one or two vertices is kept but logged separately: it can
//! never contain a point.

use chrono::{DateTime, NaiveTime, Utc};
use sqlx::SqlitePool;
use std::collections::BTreeSet;
use tracing::{debug, warn};

use crate::error::{DbError, DbResult};
use freshtick_core::validation::{validate_pincode, validate_weekday_index};
use freshtick_core::zone::{parse_boundary, BoundaryStatus};
use freshtick_core::{
    Money, Vertical, Zone, ZoneOverride, ZoneOverrideKind, ZoneProductOverride,
};

// =============================================================================
// Rows
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct ZoneRow {
    id: String,
    name: String,
    code: String,
    boundary: String,
    pincodes: String,
    service_days: String,
    service_start: Option<NaiveTime>,
    service_end: Option<NaiveTime>,
    verticals: String,
    delivery_charge_paise: i64,
    min_order_paise: i64,
    is_active: bool,
    deleted_at: Option<DateTime<Utc>>,
}

impl ZoneRow {
    fn into_zone(self) -> DbResult<Zone> {
        let boundary = match serde_json::from_str::<serde_json::Value>(&self.boundary)
            .map_err(|e| e.to_string())
            .and_then(|value| parse_boundary(&self.id, &value).map_err(|e| e.to_string()))
        {
            Ok(points) => points,
            Err(reason) => {
                warn!(zone_id = %self.id, %reason, "Zone boundary is corrupt; ignoring it");
                Vec::new()
            }
        };

        let pincodes: BTreeSet<String> = serde_json::from_str(&self.pincodes)?;
        let service_days: BTreeSet<u8> = serde_json::from_str(&self.service_days)?;
        let verticals: BTreeSet<Vertical> = serde_json::from_str(&self.verticals)?;

        let zone = Zone {
            id: self.id,
            name: self.name,
            code: self.code,
            boundary,
            pincodes,
            service_days,
            service_start: self.service_start,
            service_end: self.service_end,
            verticals,
            delivery_charge: Money::from_paise(self.delivery_charge_paise),
            min_order_amount: Money::from_paise(self.min_order_paise),
            is_active: self.is_active,
            deleted_at: self.deleted_at,
        };

        if let BoundaryStatus::Insufficient { vertices } = zone.boundary_status() {
            warn!(
                zone_id = %zone.id,
                vertices,
                "Zone boundary has fewer than 3 vertices; matching by pincode only"
            );
        }
        Ok(zone)
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ZoneOverrideRow {
    id: String,
    zone_id: String,
    user_id: Option<String>,
    address_id: Option<String>,
    kind: ZoneOverrideKind,
    reason: Option<String>,
    expires_at: Option<DateTime<Utc>>,
    is_active: bool,
    created_at: DateTime<Utc>,
}

impl From<ZoneOverrideRow> for ZoneOverride {
    fn from(row: ZoneOverrideRow) -> Self {
        ZoneOverride {
            id: row.id,
            zone_id: row.zone_id,
            user_id: row.user_id,
            address_id: row.address_id,
            kind: row.kind,
            reason: row.reason,
            expires_at: row.expires_at,
            is_active: row.is_active,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ZoneProductOverrideRow {
    zone_id: String,
    product_id: String,
    price_paise: Option<i64>,
    is_available: bool,
}

impl From<ZoneProductOverrideRow> for ZoneProductOverride {
    fn from(row: ZoneProductOverrideRow) -> Self {
        ZoneProductOverride {
            zone_id: row.zone_id,
            product_id: row.product_id,
            price: row.price_paise.map(Money::from_paise),
            is_available: row.is_available,
        }
    }
}

const ZONE_COLUMNS: &str = r#"
    id, name, code, boundary, pincodes, service_days,
    service_start, service_end, verticals,
    delivery_charge_paise, min_order_paise, is_active, deleted_at
"#;

// =============================================================================
// Repository
// =============================================================================

/// Repository for zone database operations.
#[derive(Debug, Clone)]
pub struct ZoneRepository {
    pool: SqlitePool,
}

impl ZoneRepository {
    pub fn new(pool: SqlitePool) -> Self {
        ZoneRepository { pool }
    }

    /// Inserts a zone. Pincodes and service days are validated first.
    pub async fn insert(&self, zone: &Zone) -> DbResult<()> {
        for pincode in &zone.pincodes {
            validate_pincode(pincode)?;
        }
        for day in &zone.service_days {
            validate_weekday_index(*day)?;
        }

        debug!(id = %zone.id, code = %zone.code, "Inserting zone");
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO zones (
                id, name, code, boundary, pincodes, service_days,
                service_start, service_end, verticals,
                delivery_charge_paise, min_order_paise, is_active, deleted_at,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14)
            "#,
        )
        .bind(&zone.id)
        .bind(&zone.name)
        .bind(&zone.code)
        .bind(serde_json::to_string(&zone.boundary)?)
        .bind(serde_json::to_string(&zone.pincodes)?)
        .bind(serde_json::to_string(&zone.service_days)?)
        .bind(zone.service_start)
        .bind(zone.service_end)
        .bind(serde_json::to_string(&zone.verticals)?)
        .bind(zone.delivery_charge.paise())
        .bind(zone.min_order_amount.paise())
        .bind(zone.is_active)
        .bind(zone.deleted_at)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Zone>> {
        let row: Option<ZoneRow> =
            sqlx::query_as(&format!("SELECT {} FROM zones WHERE id = ?1", ZONE_COLUMNS))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(ZoneRow::into_zone).transpose()
    }

    /// Active, non-deleted zones ordered by id.
    pub async fn list_usable(&self) -> DbResult<Vec<Zone>> {
        let rows: Vec<ZoneRow> = sqlx::query_as(&format!(
            "SELECT {} FROM zones WHERE is_active = 1 AND deleted_at IS NULL ORDER BY id",
            ZONE_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ZoneRow::into_zone).collect()
    }

    /// Soft-deletes a zone. Addresses keep their `zone_id`.
    pub async fn soft_delete(&self, id: &str, now: DateTime<Utc>) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE zones SET deleted_at = ?2, updated_at = ?2 WHERE id = ?1 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Zone", id));
        }
        debug!(id = %id, "Zone soft-deleted");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Overrides
    // -------------------------------------------------------------------------

    pub async fn insert_override(&self, ov: &ZoneOverride) -> DbResult<()> {
        debug!(id = %ov.id, zone_id = %ov.zone_id, kind = ?ov.kind, "Inserting zone override");

        sqlx::query(
            r#"
            INSERT INTO zone_overrides (
                id, zone_id, user_id, address_id, kind, reason,
                expires_at, is_active, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&ov.id)
        .bind(&ov.zone_id)
        .bind(&ov.user_id)
        .bind(&ov.address_id)
        .bind(ov.kind)
        .bind(&ov.reason)
        .bind(ov.expires_at)
        .bind(ov.is_active)
        .bind(ov.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Overrides scoped to the user or the address. Expiry is left to the
    /// caller, which evaluates it at its own instant.
    pub async fn overrides_for(&self, user_id: &str, address_id: &str) -> DbResult<Vec<ZoneOverride>> {
        let rows: Vec<ZoneOverrideRow> = sqlx::query_as(
            r#"
            SELECT id, zone_id, user_id, address_id, kind, reason,
                   expires_at, is_active, created_at
            FROM zone_overrides
            WHERE user_id = ?1 OR address_id = ?2
            ORDER BY created_at, id
            "#,
        )
        .bind(user_id)
        .bind(address_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ZoneOverride::from).collect())
    }

    /// Inserts or replaces a product override.
    pub async fn upsert_product_override(&self, ov: &ZoneProductOverride) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO zone_product_overrides (zone_id, product_id, price_paise, is_available)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (zone_id, product_id)
            DO UPDATE SET price_paise = excluded.price_paise,
                          is_available = excluded.is_available
            "#,
        )
        .bind(&ov.zone_id)
        .bind(&ov.product_id)
        .bind(ov.price.map(|p| p.paise()))
        .bind(ov.is_available)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn product_overrides(&self, zone_id: &str) -> DbResult<Vec<ZoneProductOverride>> {
        let rows: Vec<ZoneProductOverrideRow> = sqlx::query_as(
            r#"
            SELECT zone_id, product_id, price_paise, is_available
            FROM zone_product_overrides
            WHERE zone_id = ?1
            ORDER BY product_id
            "#,
        )
        .bind(zone_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ZoneProductOverride::from).collect())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use freshtick_core::GeoPoint;

    async fn db() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    fn kochi() -> Zone {
        Zone::new("z-kochi", "Kochi North", "KOCHI-N1")
            .with_boundary(vec![
                GeoPoint::new(0.0, 0.0),
                GeoPoint::new(0.0, 1.0),
                GeoPoint::new(1.0, 1.0),
                GeoPoint::new(1.0, 0.0),
            ])
            .with_pincodes(["682 509", "682001"])
            .with_service_days([1, 2, 3, 4, 5])
            .with_verticals([Vertical::DailyFresh])
    }

    #[tokio::test]
    async fn test_insert_and_load_zone() {
        let db = db().await;
        let repo = db.zones();
        repo.insert(&kochi()).await.unwrap();

        let zone = repo.get_by_id("z-kochi").await.unwrap().unwrap();
        assert_eq!(zone, kochi());
        assert!(zone.is_within_boundary(0.5, 0.5));
        assert!(zone.is_serviceable("682509"));
    }

    #[tokio::test]
    async fn test_invalid_pincode_rejected() {
        let db = db().await;
        let zone = Zone::new("z-bad", "Bad", "BAD").with_pincodes(["12AB"]);
        let err = db.zones().insert(&zone).await.unwrap_err();
        assert!(matches!(err, DbError::Domain(_)));
    }

    #[tokio::test]
    async fn test_corrupt_boundary_degrades_to_pincode_only() {
        let db = db().await;
        db.zones().insert(&kochi()).await.unwrap();
        sqlx::query("UPDATE zones SET boundary = '[{\"lat\":\"north\",\"lng\":1}]' WHERE id = 'z-kochi'")
            .execute(db.pool())
            .await
            .unwrap();

        let zone = db.zones().get_by_id("z-kochi").await.unwrap().unwrap();
        assert!(zone.boundary.is_empty());
        assert!(zone.is_serviceable("682001"));
    }

    #[tokio::test]
    async fn test_two_vertex_boundary_loads_as_insufficient() {
        let db = db().await;
        db.zones().insert(&kochi()).await.unwrap();
        sqlx::query("UPDATE zones SET boundary = '[[0.0,0.0],[1.0,1.0]]' WHERE id = 'z-kochi'")
            .execute(db.pool())
            .await
            .unwrap();

        let zone = db.zones().get_by_id("z-kochi").await.unwrap().unwrap();
        assert_eq!(zone.boundary.len(), 2);
        assert_eq!(zone.boundary_status(), BoundaryStatus::Insufficient { vertices: 2 });
        assert!(!zone.is_within_boundary(0.5, 0.5));
        assert!(zone.is_serviceable("682001"));
    }

    #[tokio::test]
    async fn test_list_usable_skips_deleted_and_inactive() {
        let db = db().await;
        let repo = db.zones();
        repo.insert(&kochi()).await.unwrap();

        let mut inactive = Zone::new("z-a", "A", "A");
        inactive.is_active = false;
        repo.insert(&inactive).await.unwrap();
        repo.insert(&Zone::new("z-b", "B", "B")).await.unwrap();

        repo.soft_delete("z-b", Utc::now()).await.unwrap();
        let usable = repo.list_usable().await.unwrap();
        assert_eq!(usable.len(), 1);
        assert_eq!(usable[0].id, "z-kochi");

        assert!(matches!(
            repo.soft_delete("z-b", Utc::now()).await.unwrap_err(),
            DbError::NotFound { .. }
        ));
    }

    #[tokio::test]
    async fn test_product_override_upsert() {
        let db = db().await;
        let repo = db.zones();
        repo.insert(&kochi()).await.unwrap();

        let mut ov = ZoneProductOverride {
            zone_id: "z-kochi".to_string(),
            product_id: "milk-500".to_string(),
            price: Some(Money::from_paise(3000)),
            is_available: true,
        };
        repo.upsert_product_override(&ov).await.unwrap();
        ov.is_available = false;
        repo.upsert_product_override(&ov).await.unwrap();

        let overrides = repo.product_overrides("z-kochi").await.unwrap();
        assert_eq!(overrides, vec![ov]);
    }

    #[tokio::test]
    async fn test_overrides_scoped_to_user_or_address() {
        let db = db().await;
        let repo = db.zones();
        repo.insert(&kochi()).await.unwrap();

        for (id, user, address) in [
            ("o-1", Some("u-1"), None),
            ("o-2", None, Some("a-1")),
            ("o-3", Some("u-2"), None),
        ] {
            repo.insert_override(&ZoneOverride {
                id: id.to_string(),
                zone_id: "z-kochi".to_string(),
                user_id: user.map(str::to_string),
                address_id: address.map(str::to_string),
                kind: ZoneOverrideKind::Allow,
                reason: None,
                expires_at: None,
                is_active: true,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        }

        let found = repo.overrides_for("u-1", "a-1").await.unwrap();
        let mut ids: Vec<_> = found.iter().map(|o| o.id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["o-1", "o-2"]);
    }
}
