//! # Repositories
//!
//! One repository per aggregate. Each holds a clone of the pool handle and
//! converts between row structs and `freshtick_core` domain types.
//!
//! ## Write Pattern
//! ```text
//! ┌────────────────────────────────────────────────────────────────────┐
//! │  BEGIN IMMEDIATE        (write lock first, so reads are current)   │
//! │    load row(s)          → domain value                             │
//! │    domain transition    → Err? rollback, nothing written           │
//! │    UPDATE ... WHERE id = ? AND version = ?                         │
//! │       0 rows            → DbError::Conflict                        │
//! │    side effects (order status, bottle log, subscription counters)  │
//! │  COMMIT                                                            │
//! └────────────────────────────────────────────────────────────────────┘
//! ```

pub mod address;
pub mod bottle;
pub mod delivery;
pub mod driver;
pub mod order;
pub mod plan;
pub mod subscription;
pub mod zone;

use sqlx::{Sqlite, SqlitePool, Transaction};

use crate::error::DbResult;

/// Opens a transaction that holds SQLite's write lock from the start.
///
/// A second writer blocks here until the first commits, then reads the
/// committed row and fails its own transition or version check.
pub(crate) async fn begin_write(pool: &SqlitePool) -> DbResult<Transaction<'static, Sqlite>> {
    Ok(pool.begin_with("BEGIN IMMEDIATE").await?)
}
