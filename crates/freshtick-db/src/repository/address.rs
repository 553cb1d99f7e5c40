//! # Address Repository
//!
//! Delivery addresses. `zone_id` is written only by zone assignment.

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{DbError, DbResult};
use freshtick_core::validation::{validate_coordinates, validate_pincode};
use freshtick_core::UserAddress;

#[derive(Debug, sqlx::FromRow)]
struct AddressRow {
    id: String,
    user_id: String,
    lat: f64,
    lng: f64,
    pincode: String,
    zone_id: Option<String>,
}

impl From<AddressRow> for UserAddress {
    fn from(row: AddressRow) -> Self {
        UserAddress {
            id: row.id,
            user_id: row.user_id,
            lat: row.lat,
            lng: row.lng,
            pincode: row.pincode,
            zone_id: row.zone_id,
        }
    }
}

/// Repository for address database operations.
#[derive(Debug, Clone)]
pub struct AddressRepository {
    pool: SqlitePool,
}

impl AddressRepository {
    pub fn new(pool: SqlitePool) -> Self {
        AddressRepository { pool }
    }

    /// Inserts an address. The stored pincode is normalized.
    pub async fn insert(&self, address: &UserAddress) -> DbResult<()> {
        validate_coordinates(address.lat, address.lng)?;
        let pincode = validate_pincode(&address.pincode)?;

        debug!(id = %address.id, user_id = %address.user_id, "Inserting address");
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO user_addresses (id, user_id, lat, lng, pincode, zone_id, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
            "#,
        )
        .bind(&address.id)
        .bind(&address.user_id)
        .bind(address.lat)
        .bind(address.lng)
        .bind(pincode)
        .bind(&address.zone_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<UserAddress>> {
        let row: Option<AddressRow> = sqlx::query_as(
            "SELECT id, user_id, lat, lng, pincode, zone_id FROM user_addresses WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(UserAddress::from))
    }

    /// Like [`get_by_id`](Self::get_by_id) but missing is an error.
    pub async fn require(&self, id: &str) -> DbResult<UserAddress> {
        self.get_by_id(id)
            .await?
            .ok_or_else(|| DbError::not_found("Address", id))
    }

    pub async fn set_zone(&self, id: &str, zone_id: &str) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE user_addresses SET zone_id = ?2, updated_at = ?3 WHERE id = ?1",
        )
        .bind(id)
        .bind(zone_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Address", id));
        }
        debug!(id = %id, zone_id = %zone_id, "Address zone assigned");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};

    fn address(pincode: &str) -> UserAddress {
        UserAddress {
            id: "a-1".to_string(),
            user_id: "u-1".to_string(),
            lat: 9.98,
            lng: 76.28,
            pincode: pincode.to_string(),
            zone_id: None,
        }
    }

    #[tokio::test]
    async fn test_insert_normalizes_pincode() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.addresses().insert(&address(" 682 509 ")).await.unwrap();

        let stored = db.addresses().require("a-1").await.unwrap();
        assert_eq!(stored.pincode, "682509");
        assert_eq!(stored.zone_id, None);
    }

    #[tokio::test]
    async fn test_insert_rejects_bad_coordinates() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let mut bad = address("682509");
        bad.lat = 120.0;
        assert!(db.addresses().insert(&bad).await.is_err());
    }

    #[tokio::test]
    async fn test_missing_address() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        assert!(matches!(
            db.addresses().require("nope").await.unwrap_err(),
            DbError::NotFound { .. }
        ));
    }
}
