//! # freshtick-core: Pure Business Logic for Freshtick Deliveries
//!
//! This crate is the **heart** of the Freshtick delivery platform. It decides
//! where we deliver, when a subscription is next due, and which state
//! transitions a delivery or a deposit bottle may take.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Freshtick Delivery Flow                            │
//! │                                                                         │
//! │  Address / scheduling request                                          │
//! │          │                                                              │
//! │  ┌───────▼─────────────────────────────────────────────────────────┐   │
//! │  │            ★ freshtick-core (THIS CRATE) ★                      │   │
//! │  │                                                                 │   │
//! │  │  ┌──────────┐   ┌────────────┐   ┌─────────────┐               │   │
//! │  │  │   zone   │──►│ assignment │──►│ recurrence  │               │   │
//! │  │  │ resolver │   │  (zone_id) │   │ (next date) │               │   │
//! │  │  └──────────┘   └────────────┘   └──────┬──────┘               │   │
//! │  │                                         │                       │   │
//! │  │  ┌──────────────┐   ┌──────────────┐   ┌▼─────────────┐        │   │
//! │  │  │    bottle    │◄──│   delivery   │◄──│ subscription │        │   │
//! │  │  │    ledger    │   │ state machine│   │ state machine│        │   │
//! │  │  └──────────────┘   └──────────────┘   └──────────────┘        │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                freshtick-db (Database Layer)                    │   │
//! │  │        SQLite repositories, transactions, scheduler             │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`zone`] - Zone serviceability predicates (polygon, pincode, day, time)
//! - [`assignment`] - Resolving the zone that owns an address
//! - [`recurrence`] - Plans and next-delivery-date computation
//! - [`subscription`] - Subscription state machine and vacation holds
//! - [`delivery`] - Delivery state machine and order status coupling
//! - [`bottle`] - Deposit bottle ledger
//! - [`types`] - Shared records (addresses, drivers, orders, geo points)
//! - [`money`] - Integer paise money type
//! - [`validation`] - Input validation
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use chrono::NaiveDate;
//! use freshtick_core::recurrence::{next_delivery_date, Frequency, VacationWindow};
//!
//! let today = NaiveDate::from_ymd_opt(2026, 3, 10).unwrap();
//! let vacation = VacationWindow::new(
//!     NaiveDate::from_ymd_opt(2026, 3, 11).unwrap(),
//!     NaiveDate::from_ymd_opt(2026, 3, 15).unwrap(),
//! );
//!
//! let next = next_delivery_date(&Frequency::Daily, Some(&vacation), today).unwrap();
//! assert_eq!(next, NaiveDate::from_ymd_opt(2026, 3, 16).unwrap());
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod assignment;
pub mod bottle;
pub mod delivery;
pub mod error;
pub mod money;
pub mod recurrence;
pub mod subscription;
pub mod types;
pub mod validation;
pub mod zone;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use assignment::{resolve_zone, MatchMethod, ZoneMatch};
pub use bottle::{Bottle, BottleAction, BottleLog, BottleStatus, ReturnCondition};
pub use delivery::{Delivery, DeliveryEvent, DeliveryStatus, DeliveryTracking};
pub use error::{CoreError, CoreResult, ValidationError};
pub use money::Money;
pub use recurrence::{BillingCycle, Frequency, SubscriptionPlan, SubscriptionPlanItem};
pub use subscription::{Subscription, SubscriptionStatus};
pub use types::*;
pub use zone::{ServiceDay, Zone, ZoneOverride, ZoneOverrideKind, ZoneProductOverride};

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Upper bound on recurrence steps taken while skipping a vacation window.
///
/// Every rule advances at least one day, so a vacation of N days is left
/// after at most N steps. The cap turns a corrupted multi-decade window into
/// an error instead of a long spin.
pub const MAX_VACATION_SKIP_STEPS: usize = 3660;

/// Deposit charged per bottle when a product requires one (paise).
pub const DEFAULT_BOTTLE_DEPOSIT_PAISE: i64 = 2500;
