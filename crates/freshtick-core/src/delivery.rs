//! # Delivery State Machine
//!
//! Drives a single delivery from the depot to the doorstep and tells the
//! paired order what happened.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  ┌─────────┐ assign_driver ┌──────────┐ dispatch ┌──────────────────┐   │
//! │  │ pending │ ────────────► │ assigned │ ───────► │ out_for_delivery │   │
//! │  └─────────┘               └──────────┘          └──────────────────┘   │
//! │                              │     ▲               │              │     │
//! │                              └─────┘               │ proof image  │     │
//! │                             re-assign              ▼              │     │
//! │                              │             ┌───────────┐          │     │
//! │                              │             │ delivered │          │     │
//! │                              │             └───────────┘          │     │
//! │                              │   mark_as_failed   ┌────────┐      │     │
//! │                              └──────────────────► │ failed │ ◄────┘     │
//! │                                                   └────────┘            │
//! │                                                                         │
//! │  cancel: from anything except delivered and cancelled → cancelled       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Order Coupling
//! Transitions that affect the order return a [`DeliveryEvent`]. The caller
//! applies it with [`Order::apply_delivery_event`] in the same transaction
//! that persists the delivery. The delivery never writes the order itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::types::{new_id, Driver, Order, OrderStatus, OrderSync};
use crate::validation::validate_coordinates;

// =============================================================================
// Delivery Status
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    #[default]
    Pending,
    Assigned,
    OutForDelivery,
    Delivered,
    Failed,
    Cancelled,
}

impl DeliveryStatus {
    /// Delivered, failed or cancelled.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeliveryStatus::Delivered | DeliveryStatus::Failed | DeliveryStatus::Cancelled
        )
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Assigned => "assigned",
            DeliveryStatus::OutForDelivery => "out_for_delivery",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Failed => "failed",
            DeliveryStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

// =============================================================================
// Delivery Event
// =============================================================================

/// A delivery transition the paired order must react to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeliveryEvent {
    OutForDelivery {
        order_id: String,
        at: DateTime<Utc>,
    },
    Delivered {
        order_id: String,
        at: DateTime<Utc>,
    },
}

impl DeliveryEvent {
    pub fn order_id(&self) -> &str {
        match self {
            DeliveryEvent::OutForDelivery { order_id, .. }
            | DeliveryEvent::Delivered { order_id, .. } => order_id,
        }
    }
}

// =============================================================================
// Delivery
// =============================================================================

/// One delivery attempt for one order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Delivery {
    pub id: String,
    pub order_id: String,
    /// Weak reference; the subscription may be deleted later.
    pub subscription_id: Option<String>,
    pub driver_id: Option<String>,
    pub user_id: String,
    pub address_id: String,
    pub zone_id: Option<String>,
    #[ts(as = "String")]
    pub delivery_date: chrono::NaiveDate,
    pub status: DeliveryStatus,

    #[ts(as = "Option<String>")]
    pub assigned_at: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub dispatched_at: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub delivered_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,

    pub proof_image: Option<String>,
    pub proof_verified: bool,
    pub verified_by: Option<String>,
    #[ts(as = "Option<String>")]
    pub verified_at: Option<DateTime<Utc>>,

    pub version: i64,
}

const ENTITY: &str = "delivery";

impl Delivery {
    /// Creates a pending delivery.
    pub fn new(
        id: impl Into<String>,
        order_id: impl Into<String>,
        user_id: impl Into<String>,
        address_id: impl Into<String>,
        delivery_date: chrono::NaiveDate,
    ) -> Self {
        Delivery {
            id: id.into(),
            order_id: order_id.into(),
            subscription_id: None,
            driver_id: None,
            user_id: user_id.into(),
            address_id: address_id.into(),
            zone_id: None,
            delivery_date,
            status: DeliveryStatus::Pending,
            assigned_at: None,
            dispatched_at: None,
            delivered_at: None,
            failure_reason: None,
            proof_image: None,
            proof_verified: false,
            verified_by: None,
            verified_at: None,
            version: 0,
        }
    }

    pub fn for_subscription(mut self, subscription_id: impl Into<String>) -> Self {
        self.subscription_id = Some(subscription_id.into());
        self
    }

    pub fn in_zone(mut self, zone_id: Option<String>) -> Self {
        self.zone_id = zone_id;
        self
    }

    fn reject(&self, operation: &'static str) -> CoreError {
        CoreError::invalid_transition(ENTITY, &self.id, self.status, operation)
    }

    /// pending | assigned → assigned. Re-assignment replaces the driver.
    pub fn assign_driver(&mut self, driver: &Driver, now: DateTime<Utc>) -> CoreResult<()> {
        match self.status {
            DeliveryStatus::Pending | DeliveryStatus::Assigned => {
                self.driver_id = Some(driver.id.clone());
                self.status = DeliveryStatus::Assigned;
                self.assigned_at = Some(now);
                Ok(())
            }
            DeliveryStatus::OutForDelivery
            | DeliveryStatus::Delivered
            | DeliveryStatus::Failed
            | DeliveryStatus::Cancelled => Err(self.reject("assign a driver to")),
        }
    }

    /// assigned → out_for_delivery. Requires a driver.
    pub fn mark_as_out_for_delivery(&mut self, now: DateTime<Utc>) -> CoreResult<DeliveryEvent> {
        match self.status {
            DeliveryStatus::Assigned => {}
            DeliveryStatus::Pending
            | DeliveryStatus::OutForDelivery
            | DeliveryStatus::Delivered
            | DeliveryStatus::Failed
            | DeliveryStatus::Cancelled => return Err(self.reject("dispatch")),
        }
        if self.driver_id.is_none() {
            return Err(CoreError::DriverRequired {
                delivery_id: self.id.clone(),
            });
        }

        self.status = DeliveryStatus::OutForDelivery;
        self.dispatched_at = Some(now);
        Ok(DeliveryEvent::OutForDelivery {
            order_id: self.order_id.clone(),
            at: now,
        })
    }

    /// out_for_delivery → delivered. Requires a non-blank proof image.
    pub fn mark_as_delivered(
        &mut self,
        proof_image: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<DeliveryEvent> {
        match self.status {
            DeliveryStatus::OutForDelivery => {}
            DeliveryStatus::Pending
            | DeliveryStatus::Assigned
            | DeliveryStatus::Delivered
            | DeliveryStatus::Failed
            | DeliveryStatus::Cancelled => return Err(self.reject("deliver")),
        }
        let proof_image = proof_image.trim();
        if proof_image.is_empty() {
            return Err(CoreError::MissingProofOfDelivery {
                delivery_id: self.id.clone(),
            });
        }

        self.status = DeliveryStatus::Delivered;
        self.delivered_at = Some(now);
        self.proof_image = Some(proof_image.to_string());
        Ok(DeliveryEvent::Delivered {
            order_id: self.order_id.clone(),
            at: now,
        })
    }

    /// assigned | out_for_delivery → failed.
    pub fn mark_as_failed(&mut self, reason: impl Into<String>) -> CoreResult<()> {
        match self.status {
            DeliveryStatus::Assigned | DeliveryStatus::OutForDelivery => {
                self.status = DeliveryStatus::Failed;
                self.failure_reason = Some(reason.into());
                Ok(())
            }
            DeliveryStatus::Pending
            | DeliveryStatus::Delivered
            | DeliveryStatus::Failed
            | DeliveryStatus::Cancelled => Err(self.reject("fail")),
        }
    }

    /// Anything except delivered or cancelled → cancelled.
    ///
    /// NOTE: a failed delivery can still be cancelled.
    pub fn cancel(&mut self) -> CoreResult<()> {
        match self.status {
            DeliveryStatus::Delivered | DeliveryStatus::Cancelled => Err(self.reject("cancel")),
            DeliveryStatus::Pending
            | DeliveryStatus::Assigned
            | DeliveryStatus::OutForDelivery
            | DeliveryStatus::Failed => {
                self.status = DeliveryStatus::Cancelled;
                Ok(())
            }
        }
    }

    /// Marks the captured proof as checked. Status is unchanged.
    pub fn verify_proof(
        &mut self,
        verifier_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> CoreResult<()> {
        if self.proof_image.as_deref().map_or(true, |p| p.trim().is_empty()) {
            return Err(CoreError::MissingProofOfDelivery {
                delivery_id: self.id.clone(),
            });
        }
        self.proof_verified = true;
        self.verified_by = Some(verifier_id.into());
        self.verified_at = Some(now);
        Ok(())
    }

    /// Records a driver breadcrumb. Only accepted while out for delivery.
    pub fn track(&self, lat: f64, lng: f64, now: DateTime<Utc>) -> CoreResult<DeliveryTracking> {
        match self.status {
            DeliveryStatus::OutForDelivery => {}
            DeliveryStatus::Pending
            | DeliveryStatus::Assigned
            | DeliveryStatus::Delivered
            | DeliveryStatus::Failed
            | DeliveryStatus::Cancelled => return Err(self.reject("track")),
        }
        validate_coordinates(lat, lng)?;

        let driver_id = self.driver_id.clone().ok_or_else(|| CoreError::DriverRequired {
            delivery_id: self.id.clone(),
        })?;

        Ok(DeliveryTracking {
            id: new_id(),
            delivery_id: self.id.clone(),
            driver_id,
            lat,
            lng,
            recorded_at: now,
        })
    }
}

// =============================================================================
// Delivery Tracking
// =============================================================================

/// A driver location breadcrumb. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct DeliveryTracking {
    pub id: String,
    pub delivery_id: String,
    pub driver_id: String,
    pub lat: f64,
    pub lng: f64,
    #[ts(as = "String")]
    pub recorded_at: DateTime<Utc>,
}

// =============================================================================
// Order Sync
// =============================================================================

impl Order {
    /// Applies a delivery event to this order.
    ///
    /// `OutForDelivery` always moves the order to `out_for_delivery`.
    /// `Delivered` only applies when the order is `out_for_delivery`; in any
    /// other state the order is left as is and `OrderSync::Skipped` is
    /// returned so the caller can log it.
    pub fn apply_delivery_event(&mut self, event: &DeliveryEvent) -> CoreResult<OrderSync> {
        if event.order_id() != self.id {
            return Err(CoreError::Validation(ValidationError::InvalidFormat {
                field: "order_id".to_string(),
                reason: format!("event is for order {}, not {}", event.order_id(), self.id),
            }));
        }

        let from = self.status;
        match event {
            DeliveryEvent::OutForDelivery { .. } => {
                self.status = OrderStatus::OutForDelivery;
                Ok(OrderSync::Applied {
                    from,
                    to: OrderStatus::OutForDelivery,
                })
            }
            DeliveryEvent::Delivered { at, .. } => match from {
                OrderStatus::OutForDelivery => {
                    self.status = OrderStatus::Delivered;
                    self.delivered_at = Some(*at);
                    Ok(OrderSync::Applied {
                        from,
                        to: OrderStatus::Delivered,
                    })
                }
                OrderStatus::Pending
                | OrderStatus::Confirmed
                | OrderStatus::Processing
                | OrderStatus::Delivered
                | OrderStatus::Cancelled => Ok(OrderSync::Skipped { current: from }),
            },
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
