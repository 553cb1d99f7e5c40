//! # Recurrence Engine
//!
//! Plans, their delivery frequencies, and the next-delivery-date rule.
//!
//! ## Next Delivery Date
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  from = 10 Mar, daily plan, vacation 11 Mar ..= 15 Mar                  │
//! │                                                                         │
//! │  advance(10 Mar) = 11 Mar  ── in vacation ──┐                           │
//! │  advance(11 Mar) = 12 Mar  ── in vacation   │  same rule, repeated      │
//! │  ...                                        │  until the candidate      │
//! │  advance(15 Mar) = 16 Mar  ── outside ──────┘  leaves the window        │
//! │                                                                         │
//! │  Result: 16 Mar (strictly after `from`, never inside the vacation)      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every rule moves at least one day forward; a rule that cannot (custom
//! step of zero, weekly list without a valid weekday) is rejected with
//! [`CoreError::InvalidRecurrence`] rather than looping.

use std::collections::BTreeSet;

use chrono::{Datelike, Days, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult};
use crate::money::Money;
use crate::zone::{weekday_index, Zone, ZoneProductOverride};
use crate::MAX_VACATION_SKIP_STEPS;

// =============================================================================
// Frequency
// =============================================================================

/// How often a plan delivers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frequency {
    /// Every day.
    Daily,
    /// Every other day.
    Alternate,
    /// Every 7 days, or on the listed weekdays (0 = Sunday) when non-empty.
    Weekly { days: BTreeSet<u8> },
    /// Every `step_days` days.
    Custom { step_days: u32 },
}

impl Frequency {
    /// Returns the first delivery date strictly after `from` under this rule,
    /// ignoring vacations.
    pub fn advance(&self, from: NaiveDate) -> CoreResult<NaiveDate> {
        match self {
            Frequency::Daily => add_days(from, 1),
            Frequency::Alternate => add_days(from, 2),
            Frequency::Weekly { days } if days.is_empty() => add_days(from, 7),
            Frequency::Weekly { days } => {
                for offset in 1..=7 {
                    let candidate = add_days(from, offset)?;
                    if days.contains(&weekday_index(candidate.weekday())) {
                        return Ok(candidate);
                    }
                }
                Err(CoreError::InvalidRecurrence {
                    reason: format!("weekly plan lists no valid weekday: {:?}", days),
                })
            }
            Frequency::Custom { step_days: 0 } => Err(CoreError::InvalidRecurrence {
                reason: "custom plan step must be at least one day".to_string(),
            }),
            Frequency::Custom { step_days } => add_days(from, u64::from(*step_days)),
        }
    }
}

fn add_days(date: NaiveDate, days: u64) -> CoreResult<NaiveDate> {
    date.checked_add_days(Days::new(days))
        .ok_or_else(|| CoreError::InvalidRecurrence {
            reason: format!("date overflow adding {} days to {}", days, date),
        })
}

// =============================================================================
// Vacation Window
// =============================================================================

/// An inclusive date range during which deliveries are held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VacationWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl VacationWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        VacationWindow { start, end }
    }

    /// Builds a window only when both bounds are present.
    pub fn from_bounds(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Option<Self> {
        match (start, end) {
            (Some(start), Some(end)) => Some(VacationWindow { start, end }),
            _ => None,
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

/// Computes the next delivery date after `from`.
///
/// The base interval comes from `frequency`; while the candidate lands in
/// `vacation` the same rule is applied again from the candidate.
pub fn next_delivery_date(
    frequency: &Frequency,
    vacation: Option<&VacationWindow>,
    from: NaiveDate,
) -> CoreResult<NaiveDate> {
    let mut candidate = frequency.advance(from)?;

    if let Some(window) = vacation {
        let mut steps = 0;
        while window.contains(candidate) {
            steps += 1;
            if steps > MAX_VACATION_SKIP_STEPS {
                return Err(CoreError::InvalidRecurrence {
                    reason: format!(
                        "vacation {} ..= {} cannot be skipped",
                        window.start, window.end
                    ),
                });
            }
            candidate = frequency.advance(candidate)?;
        }
    }

    Ok(candidate)
}

// =============================================================================
// Billing Cycle
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum BillingCycle {
    Weekly,
    #[default]
    Monthly,
}

impl BillingCycle {
    /// First day of the next billing period starting at `start`.
    ///
    /// Monthly periods clamp to the month's last day (31 Jan → 28/29 Feb).
    pub fn period_end(&self, start: NaiveDate) -> Option<NaiveDate> {
        match self {
            BillingCycle::Weekly => start.checked_add_days(Days::new(7)),
            BillingCycle::Monthly => start.checked_add_months(Months::new(1)),
        }
    }
}

// =============================================================================
// Plans
// =============================================================================

/// One committed product on a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SubscriptionPlanItem {
    pub product_id: String,
    /// Units per delivery.
    pub quantity: i64,
    /// Catalog price per unit.
    pub unit_price: Money,
    /// Whether each unit ships in a deposit bottle.
    pub requires_bottle: bool,
}

/// A subscription plan. Read-only input to the recurrence engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SubscriptionPlan {
    pub id: String,
    pub name: String,
    pub frequency: Frequency,
    /// Plan discount in basis points (500 = 5%).
    pub discount_bps: u32,
    pub items: Vec<SubscriptionPlanItem>,
}

/// Price of one delivery of a plan in a given zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct DeliveryQuote {
    pub subtotal: Money,
    pub discount: Money,
    pub delivery_charge: Money,
    pub total: Money,
    /// Products the zone does not carry; excluded from the totals.
    pub unavailable_products: Vec<String>,
}

impl SubscriptionPlan {
    /// Deposit bottles needed per delivery.
    pub fn bottles_per_delivery(&self) -> i64 {
        self.items
            .iter()
            .filter(|item| item.requires_bottle)
            .map(|item| item.quantity)
            .sum()
    }

    /// Prices one delivery using zone price overrides, the plan discount
    /// and the zone delivery charge.
    pub fn quote(&self, zone: &Zone, overrides: &[ZoneProductOverride]) -> DeliveryQuote {
        let mut subtotal = Money::zero();
        let mut unavailable_products = Vec::new();

        for item in &self.items {
            let product_override = overrides
                .iter()
                .find(|ov| ov.product_id == item.product_id && ov.zone_id == zone.id);

            match zone.product_price(item.unit_price, product_override) {
                Some(price) => subtotal += price.multiply_quantity(item.quantity),
                None => unavailable_products.push(item.product_id.clone()),
            }
        }

        let discounted = subtotal.apply_discount_bps(self.discount_bps);
        let discount = subtotal - discounted;
        let delivery_charge = zone.delivery_charge;

        DeliveryQuote {
            subtotal,
            discount,
            delivery_charge,
            total: discounted + delivery_charge,
            unavailable_products,
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
