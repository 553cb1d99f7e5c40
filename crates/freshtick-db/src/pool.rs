//! # Database Handle
//!
//! Opens the SQLite pool and hands out repositories.
//!
//! ## Writers
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  WAL journal: many readers, one writer                                 │
//! │                                                                         │
//! │  writer A ── BEGIN IMMEDIATE ── read, transition, UPDATE ── COMMIT     │
//! │  writer B ── BEGIN IMMEDIATE ── waits (busy_timeout) ───────┐          │
//! │                                                             ▼          │
//! │                        reads A's committed row ── InvalidTransition    │
//! │                                                   or Conflict          │
//! │                                                                         │
//! │  busy_timeout exceeded ── SQLITE_BUSY ── DbError::Conflict             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use crate::assignment::ZoneAssignmentService;
use crate::error::{DbError, DbResult};
use crate::migrations;
use crate::repository::address::AddressRepository;
use crate::repository::bottle::BottleRepository;
use crate::repository::delivery::DeliveryRepository;
use crate::repository::driver::DriverRepository;
use crate::repository::order::OrderRepository;
use crate::repository::plan::PlanRepository;
use crate::repository::subscription::SubscriptionRepository;
use crate::repository::zone::ZoneRepository;

// =============================================================================
// Configuration
// =============================================================================

/// Pool settings, usually built by [`crate::FreshtickConfig::db_config`].
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub database_path: PathBuf,

    /// Default: 5
    pub max_connections: u32,

    /// How long a writer waits for the write lock before failing.
    /// Default: 5 seconds
    pub busy_timeout: Duration,

    /// Default: true
    pub run_migrations: bool,
}

impl DbConfig {
    /// The file is created if it doesn't exist.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbConfig {
            database_path: path.into(),
            max_connections: 5,
            busy_timeout: Duration::from_secs(5),
            run_migrations: true,
        }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn run_migrations(mut self, run: bool) -> Self {
        self.run_migrations = run;
        self
    }

    /// Private in-memory database for tests. Each connection would get its
    /// own database, so the pool holds exactly one.
    pub fn in_memory() -> Self {
        DbConfig::new(":memory:").max_connections(1)
    }
}

// =============================================================================
// Database
// =============================================================================

/// Pool handle; clones share the pool.
///
/// ```rust,ignore
/// let db = Database::new(DbConfig::new("./freshtick.db")).await?;
/// let zone = db.assignments().require_zone(&address_id, Utc::now()).await?;
/// db.deliveries().mark_delivered(&delivery_id, "pod/123.jpg", Utc::now()).await?;
/// ```
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens the pool with WAL, foreign keys and the busy timeout, then runs
    /// migrations when enabled.
    pub async fn new(config: DbConfig) -> DbResult<Self> {
        info!(
            path = %config.database_path.display(),
            "Initializing database connection"
        );

        let connect_url = format!("sqlite://{}?mode=rwc", config.database_path.display());

        let connect_options = SqliteConnectOptions::from_str(&connect_url)
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(config.busy_timeout)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(connect_options)
            .await
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;

        info!(
            max_connections = config.max_connections,
            busy_timeout_ms = config.busy_timeout.as_millis() as u64,
            "Database pool created"
        );

        let db = Database { pool };

        if config.run_migrations {
            db.run_migrations().await?;
        }

        Ok(db)
    }

    /// Idempotent.
    pub async fn run_migrations(&self) -> DbResult<()> {
        migrations::run_migrations(&self.pool).await
    }

    /// For queries not covered by repositories.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn zones(&self) -> ZoneRepository {
        ZoneRepository::new(self.pool.clone())
    }

    pub fn addresses(&self) -> AddressRepository {
        AddressRepository::new(self.pool.clone())
    }

    pub fn drivers(&self) -> DriverRepository {
        DriverRepository::new(self.pool.clone())
    }

    pub fn plans(&self) -> PlanRepository {
        PlanRepository::new(self.pool.clone())
    }

    pub fn subscriptions(&self) -> SubscriptionRepository {
        SubscriptionRepository::new(self.pool.clone())
    }

    pub fn orders(&self) -> OrderRepository {
        OrderRepository::new(self.pool.clone())
    }

    pub fn deliveries(&self) -> DeliveryRepository {
        DeliveryRepository::new(self.pool.clone())
    }

    pub fn bottles(&self) -> BottleRepository {
        BottleRepository::new(self.pool.clone())
    }

    pub fn assignments(&self) -> ZoneAssignmentService {
        ZoneAssignmentService::new(self.clone())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.run_migrations().await.unwrap();

        let (total, applied) = migrations::migration_status(db.pool()).await.unwrap();
        assert_eq!(total, applied);
    }

    #[tokio::test]
    async fn test_busy_timeout_applied_to_connections() {
        let db = Database::new(DbConfig::in_memory().busy_timeout(Duration::from_millis(1500)))
            .await
            .unwrap();

        let (timeout,): (i64,) = sqlx::query_as("PRAGMA busy_timeout")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(timeout, 1500);
    }

    #[tokio::test]
    async fn test_file_database_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("freshtick.db");

        let db = Database::new(DbConfig::new(&path).max_connections(2))
            .await
            .unwrap();
        assert!(path.exists());
        assert!(db.zones().get_by_id("missing").await.unwrap().is_none());
    }

    #[test]
    fn test_config_builder() {
        let config = DbConfig::new("/tmp/freshtick-test.db")
            .max_connections(10)
            .busy_timeout(Duration::from_secs(2))
            .run_migrations(false);

        assert_eq!(config.max_connections, 10);
        assert_eq!(config.busy_timeout, Duration::from_secs(2));
        assert!(!config.run_migrations);
    }
}
