//! # freshtick-db: Database Layer for Freshtick
//!
//! SQLite persistence for the delivery core, using sqlx for async access.
//! Everything that touches more than one row in one step lives here: the
//! delivery/order sync, bottle ledger writes and delivery materialization.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Freshtick Data Flow                                │
//! │                                                                         │
//! │  Web backend / daily job runner                                        │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                   freshtick-db (THIS CRATE)                     │   │
//! │  │                                                                 │   │
//! │  │  ┌────────────┐  ┌──────────────────┐  ┌────────────────────┐  │   │
//! │  │  │  Database  │  │   Repositories   │  │     Services       │  │   │
//! │  │  │  (pool.rs) │◄─│ zone, address,   │◄─│ ZoneAssignment     │  │   │
//! │  │  │            │  │ plan, subscription│  │ DeliveryScheduler  │  │   │
//! │  │  │ SqlitePool │  │ order, delivery, │  │                    │  │   │
//! │  │  │ Migrations │  │ driver, bottle   │  │                    │  │   │
//! │  │  └────────────┘  └──────────────────┘  └────────────────────┘  │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     SQLite Database (WAL)                       │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`config`] - TOML + environment configuration, tracing setup
//! - [`repository`] - Repository implementations
//! - [`assignment`] - Zone assignment for addresses
//! - [`scheduler`] - Daily delivery materialization
//!
//! ## Usage
//!
//! ```rust,ignore
//! use freshtick_db::{Database, DeliveryScheduler, FreshtickConfig};
//!
//! let config = FreshtickConfig::load(None)?;
//! config.init_tracing();
//!
//! let db = Database::new(config.db_config()).await?;
//! let report = DeliveryScheduler::from_config(db.clone(), &config)
//!     .materialize_due(today)
//!     .await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod assignment;
pub mod config;
pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;
pub mod scheduler;

// =============================================================================
// Re-exports
// =============================================================================

pub use assignment::{ZoneAssignment, ZoneAssignmentService};
pub use config::{ConfigError, FreshtickConfig};
pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};
pub use scheduler::{DeliveryScheduler, MaterializeOutcome, MaterializeReport};

// Repository re-exports for convenience
pub use repository::address::AddressRepository;
pub use repository::bottle::BottleRepository;
pub use repository::delivery::DeliveryRepository;
pub use repository::driver::DriverRepository;
pub use repository::order::OrderRepository;
pub use repository::plan::PlanRepository;
pub use repository::subscription::SubscriptionRepository;
pub use repository::zone::ZoneRepository;
