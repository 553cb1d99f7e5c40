//! # Shared Domain Types
//!
//! Records the core consumes from the surrounding application as opaque data.
//!
//! ## Type Map
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Collaborator Records                            │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │  UserAddress    │   │     Driver      │   │     Order       │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  lat / lng      │   │  id             │   │  id             │       │
//! │  │  pincode        │   │  zone_id        │   │  status ◄───────┼── sync│
//! │  │  zone_id (lazy) │   │  is_active      │   │  total          │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! │                                                                         │
//! │  GeoPoint, Vertical, ActorKind: small value types used across modules  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Identity
//! Entity ids are UUID v4 strings, generated with [`new_id`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ts_rs::TS;

use crate::error::ValidationError;
use crate::money::Money;

/// Generates a new entity id.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// =============================================================================
// Geo Point
// =============================================================================

/// A WGS84 coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub const fn new(lat: f64, lng: f64) -> Self {
        GeoPoint { lat, lng }
    }
}

// =============================================================================
// Vertical
// =============================================================================

/// A business line a zone may or may not support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum Vertical {
    /// Individual doorstep deliveries.
    DailyFresh,
    /// Bulk drops to gated communities.
    SocietyFresh,
}

impl fmt::Display for Vertical {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Vertical::DailyFresh => write!(f, "daily_fresh"),
            Vertical::SocietyFresh => write!(f, "society_fresh"),
        }
    }
}

impl FromStr for Vertical {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "daily_fresh" | "dailyfresh" => Ok(Vertical::DailyFresh),
            "society_fresh" | "societyfresh" => Ok(Vertical::SocietyFresh),
            other => Err(ValidationError::InvalidFormat {
                field: "vertical".to_string(),
                reason: format!("unknown vertical '{}'", other),
            }),
        }
    }
}

// =============================================================================
// Actor Kind
// =============================================================================

/// Who triggered a ledger event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ActorKind {
    System,
    Driver,
    Admin,
    Customer,
}

// =============================================================================
// User Address
// =============================================================================

/// A delivery address owned by a user.
///
/// `zone_id` is assigned lazily by zone assignment and stays `None` until a
/// zone covers the address. It is not necessarily the nearest zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct UserAddress {
    pub id: String,
    pub user_id: String,
    pub lat: f64,
    pub lng: f64,
    pub pincode: String,
    pub zone_id: Option<String>,
}

impl UserAddress {
    pub fn location(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lng)
    }
}

// =============================================================================
// Driver
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Driver {
    pub id: String,
    pub name: String,
    pub zone_id: Option<String>,
    pub is_active: bool,
}

// =============================================================================
// Order
// =============================================================================

/// Order status as owned by the ordering layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Processing,
    OutForDelivery,
    Delivered,
    Cancelled,
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Processing => "processing",
            OrderStatus::OutForDelivery => "out_for_delivery",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// The order fields the delivery core reads and writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Order {
    pub id: String,
    pub user_id: String,
    pub status: OrderStatus,
    pub total: Money,
    #[ts(as = "Option<String>")]
    pub delivered_at: Option<DateTime<Utc>>,
    pub version: i64,
}

impl Order {
    /// Creates a pending order.
    pub fn new(id: impl Into<String>, user_id: impl Into<String>, total: Money) -> Self {
        Order {
            id: id.into(),
            user_id: user_id.into(),
            status: OrderStatus::Pending,
            total,
            delivered_at: None,
            version: 0,
        }
    }
}

/// Outcome of applying a delivery event to its order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSync {
    /// The order status was changed.
    Applied { from: OrderStatus, to: OrderStatus },
    /// The order was not in a state that accepts the event; left unchanged.
    Skipped { current: OrderStatus },
}

// =============================================================================
// Unit Tests
// =============================================================================
