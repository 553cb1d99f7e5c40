//! # Driver Repository

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{DbError, DbResult};
use freshtick_core::Driver;

#[derive(Debug, sqlx::FromRow)]
struct DriverRow {
    id: String,
    name: String,
    zone_id: Option<String>,
    is_active: bool,
}

impl From<DriverRow> for Driver {
    fn from(row: DriverRow) -> Self {
        Driver {
            id: row.id,
            name: row.name,
            zone_id: row.zone_id,
            is_active: row.is_active,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DriverRepository {
    pool: SqlitePool,
}

impl DriverRepository {
    pub fn new(pool: SqlitePool) -> Self {
        DriverRepository { pool }
    }

    pub async fn insert(&self, driver: &Driver) -> DbResult<()> {
        debug!(id = %driver.id, name = %driver.name, "Inserting driver");

        sqlx::query(
            "INSERT INTO drivers (id, name, zone_id, is_active, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&driver.id)
        .bind(&driver.name)
        .bind(&driver.zone_id)
        .bind(driver.is_active)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Driver>> {
        let row: Option<DriverRow> =
            sqlx::query_as("SELECT id, name, zone_id, is_active FROM drivers WHERE id = ?1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(Driver::from))
    }

    pub async fn require(&self, id: &str) -> DbResult<Driver> {
        self.get_by_id(id)
            .await?
            .ok_or_else(|| DbError::not_found("Driver", id))
    }

    /// Active drivers serving a zone.
    pub async fn active_in_zone(&self, zone_id: &str) -> DbResult<Vec<Driver>> {
        let rows: Vec<DriverRow> = sqlx::query_as(
            "SELECT id, name, zone_id, is_active FROM drivers WHERE zone_id = ?1 AND is_active = 1 ORDER BY name",
        )
        .bind(zone_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Driver::from).collect())
    }
}
