//! # Database Error Types
//!
//! Error types for database operations.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                    │
//! │                                                                         │
//! │  SQLite Error (sqlx::Error)        CoreError (freshtick-core)          │
//! │       │                                 │                               │
//! │       ▼                                 ▼                               │
//! │  DbError (this module) ← Adds context and categorization               │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Web backend maps DbError to an HTTP response                          │
//! │    precondition violation / Conflict  → 409                            │
//! │    NotServiceable                     → 422 "we don't deliver here"    │
//! │    NotFound                           → 404                            │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use freshtick_core::CoreError;
use thiserror::Error;
use tracing::warn;

/// Database operation errors.
///
/// These errors wrap sqlx errors and domain errors raised while a
/// transaction was open.
#[derive(Debug, Error)]
pub enum DbError {
    /// Entity not found in database.
    ///
    /// ## When This Occurs
    /// - `fetch_one` returns no rows
    /// - ID doesn't exist
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Unique constraint violation.
    ///
    /// ## When This Occurs
    /// - Duplicate bottle number or zone code
    /// - A second delivery for the same subscription and date
    #[error("Duplicate {field}: '{value}' already exists")]
    UniqueViolation { field: String, value: String },

    /// Foreign key constraint violation.
    ///
    /// ## When This Occurs
    /// - Subscription referencing a non-existent plan or address
    /// - Delivery referencing a non-existent order or driver
    #[error("Foreign key violation: {message}")]
    ForeignKeyViolation { message: String },

    /// Another writer changed the row since it was read.
    ///
    /// ## When This Occurs
    /// - Two concurrent `mark_delivered` calls on the same delivery
    /// - Saving a stale snapshot
    /// - The write lock is still held by another writer after `busy_timeout`
    #[error("{entity} {id} was modified concurrently")]
    Conflict { entity: String, id: String },

    /// A domain rule rejected the operation.
    #[error(transparent)]
    Domain(#[from] CoreError),

    /// A JSON column could not be encoded or decoded.
    #[error("Column decode failed: {0}")]
    Decode(String),

    /// Database connection failed.
    ///
    /// ## When This Occurs
    /// - Database file can't be created
    /// - File permissions issue
    /// - Disk full
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Migration failed.
    ///
    /// ## When This Occurs
    /// - Invalid SQL in migration
    /// - Migration version conflict
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Pool exhausted (all connections in use).
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// Internal database error.
    #[error("Internal database error: {0}")]
    Internal(String),
}

impl DbError {
    /// Creates a NotFound error for a given entity type and ID.
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Creates a Conflict error.
    pub fn conflict(entity: impl Into<String>, id: impl Into<String>) -> Self {
        DbError::Conflict {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// True when the caller asked for something the current state does not
    /// allow, including losing an optimistic-concurrency race.
    pub fn is_precondition_violation(&self) -> bool {
        match self {
            DbError::Conflict { .. } => true,
            DbError::Domain(err) => err.is_precondition_violation(),
            _ => false,
        }
    }

    /// True for a user-facing "we don't deliver here yet".
    pub fn is_not_serviceable(&self) -> bool {
        matches!(self, DbError::Domain(CoreError::NotServiceable { .. }))
    }

    /// True when a UNIQUE constraint on `table.column` rejected the write.
    pub fn is_unique_violation_on(&self, column: &str) -> bool {
        matches!(self, DbError::UniqueViolation { field, .. } if field.contains(column))
    }
}

/// Convert sqlx errors to DbError.
///
/// ## Error Mapping
/// ```text
/// sqlx::Error::RowNotFound    → DbError::NotFound
/// sqlx::Error::Database       → SQLITE_BUSY (5, 261, 517) → DbError::Conflict
///                                Otherwise analyze message for constraint type
/// sqlx::Error::PoolTimedOut   → DbError::PoolExhausted
/// Other                       → DbError::Internal
/// ```
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::NotFound {
                entity: "Record".to_string(),
                id: "unknown".to_string(),
            },

            sqlx::Error::Database(db_err) => {
                let msg = db_err.message();

                // The write lock stayed taken past busy_timeout: another
                // writer won.
                if let Some(code) = db_err.code().filter(|code| is_busy_code(code)) {
                    warn!(%code, message = %msg, "Write lock not acquired within busy_timeout");
                    return DbError::Conflict {
                        entity: "Database".to_string(),
                        id: format!("(code {code}: {msg})"),
                    };
                }

                // SQLite constraint messages:
                // UNIQUE constraint: "UNIQUE constraint failed: <table>.<column>[, ...]"
                // FK constraint: "FOREIGN KEY constraint failed"
                if msg.contains("UNIQUE constraint failed") {
                    let field = msg
                        .split("UNIQUE constraint failed: ")
                        .nth(1)
                        .unwrap_or("unknown")
                        .to_string();
                    DbError::UniqueViolation {
                        field,
                        value: "unknown".to_string(),
                    }
                } else if msg.contains("FOREIGN KEY constraint failed") {
                    DbError::ForeignKeyViolation {
                        message: msg.to_string(),
                    }
                } else {
                    DbError::QueryFailed(msg.to_string())
                }
            }

            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,

            sqlx::Error::PoolClosed => DbError::ConnectionFailed("Pool is closed".to_string()),

            _ => DbError::Internal(err.to_string()),
        }
    }
}

/// SQLITE_BUSY and its extended codes BUSY_RECOVERY and BUSY_SNAPSHOT.
fn is_busy_code(code: &str) -> bool {
    matches!(code, "5" | "261" | "517")
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::Decode(err.to_string())
    }
}

impl From<freshtick_core::ValidationError> for DbError {
    fn from(err: freshtick_core::ValidationError) -> Self {
        DbError::Domain(CoreError::Validation(err))
    }
}

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precondition_classification() {
        assert!(DbError::conflict("delivery", "d-1").is_precondition_violation());

        let domain: DbError =
            CoreError::invalid_transition("delivery", "d-1", "pending", "deliver").into();
        assert!(domain.is_precondition_violation());

        let not_serviceable: DbError = CoreError::NotServiceable {
            pincode: "110001".to_string(),
        }
        .into();
        assert!(!not_serviceable.is_precondition_violation());
        assert!(not_serviceable.is_not_serviceable());

        assert!(!DbError::not_found("delivery", "d-1").is_precondition_violation());
    }

    #[test]
    fn test_busy_codes() {
        assert!(is_busy_code("5"));
        assert!(is_busy_code("261"));
        assert!(is_busy_code("517"));
        assert!(!is_busy_code("6"));
        assert!(!is_busy_code("2067"));
    }

    #[tokio::test]
    async fn test_locked_database_is_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("locked.db");
        let db = crate::Database::new(
            crate::DbConfig::new(&path)
                .max_connections(2)
                .busy_timeout(std::time::Duration::from_millis(50)),
        )
        .await
        .unwrap();

        let holder = db.pool().begin_with("BEGIN IMMEDIATE").await.unwrap();

        let err: DbError = db
            .pool()
            .begin_with("BEGIN IMMEDIATE")
            .await
            .map(|_| ())
            .unwrap_err()
            .into();
        assert!(matches!(err, DbError::Conflict { .. }), "got {err:?}");
        assert!(err.is_precondition_violation());

        holder.rollback().await.unwrap();
    }

    #[test]
    fn test_unique_violation_column_match() {
        let err = DbError::UniqueViolation {
            field: "bottles.bottle_number".to_string(),
            value: "unknown".to_string(),
        };
        assert!(err.is_unique_violation_on("bottle_number"));
        assert!(!err.is_unique_violation_on("delivery_date"));
    }
}
