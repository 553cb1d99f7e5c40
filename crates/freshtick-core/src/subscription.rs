//! # Subscription State Machine
//!
//! A subscription owns its scheduling fields: `next_delivery_date`,
//! `paused_until` and the vacation window.
//!
//! ## Transitions
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │             pause(until?)                                               │
//! │   ┌────────┐ ──────────► ┌────────┐                                     │
//! │   │ active │             │ paused │                                     │
//! │   └────────┘ ◄────────── └────────┘                                     │
//! │     │   ▲     resume()       │        resume recomputes next date       │
//! │     │   │                    │        from today                        │
//! │     │   └ set_vacation       │                                          │
//! │     │     (stays active)     │                                          │
//! │     │ cancel                 │ cancel          ┌─────────┐              │
//! │     └────────────────────────┴───────────────► │cancelled│ (terminal)   │
//! │                                   ▲            └─────────┘              │
//! │   ┌─────────┐      cancel         │                                     │
//! │   │ expired │ ────────────────────┘  (expired is set by the scheduler)  │
//! │   └─────────┘                                                           │
//! │                                                                         │
//! │   clear_vacation(): allowed from any state, status unchanged            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Invariant
//! Once set, `next_delivery_date` never falls inside the vacation window.

use chrono::{DateTime, Datelike, Local, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

use crate::error::{CoreError, CoreResult};
use crate::recurrence::{next_delivery_date, BillingCycle, SubscriptionPlan, VacationWindow};
use crate::validation::validate_vacation_window;

// =============================================================================
// Subscription Status
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    #[default]
    Active,
    Paused,
    /// Terminal.
    Cancelled,
    /// Set externally when the end date passes.
    Expired,
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Paused => "paused",
            SubscriptionStatus::Cancelled => "cancelled",
            SubscriptionStatus::Expired => "expired",
        };
        f.write_str(s)
    }
}

// =============================================================================
// Subscription
// =============================================================================

/// A recurring delivery commitment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Subscription {
    pub id: String,
    pub user_id: String,
    pub address_id: String,
    pub plan_id: String,
    pub status: SubscriptionStatus,

    #[ts(as = "String")]
    pub start_date: NaiveDate,
    #[ts(as = "Option<String>")]
    pub end_date: Option<NaiveDate>,

    /// Drives scheduling.
    #[ts(as = "Option<String>")]
    pub next_delivery_date: Option<NaiveDate>,
    #[ts(as = "Option<String>")]
    pub paused_until: Option<NaiveDate>,
    #[ts(as = "Option<String>")]
    pub vacation_start: Option<NaiveDate>,
    #[ts(as = "Option<String>")]
    pub vacation_end: Option<NaiveDate>,

    pub billing_cycle: BillingCycle,

    pub bottles_issued: i64,
    pub bottles_returned: i64,

    #[ts(as = "Option<String>")]
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,

    /// Optimistic concurrency version, bumped by every persisted write.
    pub version: i64,
}

const ENTITY: &str = "subscription";

fn today() -> NaiveDate {
    Local::now().date_naive()
}

impl Subscription {
    /// Creates an active subscription whose first delivery is `start_date`.
    pub fn new(
        id: impl Into<String>,
        user_id: impl Into<String>,
        address_id: impl Into<String>,
        plan_id: impl Into<String>,
        start_date: NaiveDate,
        billing_cycle: BillingCycle,
    ) -> Self {
        Subscription {
            id: id.into(),
            user_id: user_id.into(),
            address_id: address_id.into(),
            plan_id: plan_id.into(),
            status: SubscriptionStatus::Active,
            start_date,
            end_date: None,
            next_delivery_date: Some(start_date),
            paused_until: None,
            vacation_start: None,
            vacation_end: None,
            billing_cycle,
            bottles_issued: 0,
            bottles_returned: 0,
            cancelled_at: None,
            cancellation_reason: None,
            version: 0,
        }
    }

    fn reject(&self, operation: &'static str) -> CoreError {
        CoreError::invalid_transition(ENTITY, &self.id, self.status, operation)
    }

    pub fn vacation(&self) -> Option<VacationWindow> {
        VacationWindow::from_bounds(self.vacation_start, self.vacation_end)
    }

    pub fn is_on_vacation(&self, date: NaiveDate) -> bool {
        self.vacation().is_some_and(|window| window.contains(date))
    }

    /// Next delivery date after `from` (today when `None`), skipping the
    /// subscription's vacation window.
    pub fn calculate_next_delivery_date(
        &self,
        plan: &SubscriptionPlan,
        from: Option<NaiveDate>,
    ) -> CoreResult<NaiveDate> {
        let from = from.unwrap_or_else(today);
        next_delivery_date(&plan.frequency, self.vacation().as_ref(), from)
    }

    // -------------------------------------------------------------------------
    // Transitions
    // -------------------------------------------------------------------------

    /// active → paused.
    pub fn pause(&mut self, until: Option<NaiveDate>) -> CoreResult<()> {
        match self.status {
            SubscriptionStatus::Active => {
                self.status = SubscriptionStatus::Paused;
                self.paused_until = until;
                Ok(())
            }
            SubscriptionStatus::Paused
            | SubscriptionStatus::Cancelled
            | SubscriptionStatus::Expired => Err(self.reject("pause")),
        }
    }

    /// paused → active, rescheduling from `today`.
    pub fn resume(&mut self, plan: &SubscriptionPlan, today: NaiveDate) -> CoreResult<()> {
        match self.status {
            SubscriptionStatus::Paused => {
                let next = self.calculate_next_delivery_date(plan, Some(today))?;
                self.status = SubscriptionStatus::Active;
                self.paused_until = None;
                self.next_delivery_date = Some(next);
                Ok(())
            }
            SubscriptionStatus::Active
            | SubscriptionStatus::Cancelled
            | SubscriptionStatus::Expired => Err(self.reject("resume")),
        }
    }

    /// Any non-cancelled state → cancelled. Terminal.
    pub fn cancel(&mut self, reason: Option<String>, now: DateTime<Utc>) -> CoreResult<()> {
        match self.status {
            SubscriptionStatus::Cancelled => Err(self.reject("cancel")),
            SubscriptionStatus::Active
            | SubscriptionStatus::Paused
            | SubscriptionStatus::Expired => {
                self.status = SubscriptionStatus::Cancelled;
                self.cancelled_at = Some(now);
                self.cancellation_reason = reason;
                Ok(())
            }
        }
    }

    /// active | paused → expired, once `end_date` is behind `today`.
    pub fn expire(&mut self, today: NaiveDate) -> CoreResult<()> {
        let ended = self.end_date.is_some_and(|end| end < today);
        match self.status {
            SubscriptionStatus::Active | SubscriptionStatus::Paused if ended => {
                self.status = SubscriptionStatus::Expired;
                Ok(())
            }
            SubscriptionStatus::Active
            | SubscriptionStatus::Paused
            | SubscriptionStatus::Cancelled
            | SubscriptionStatus::Expired => Err(self.reject("expire")),
        }
    }

    /// Puts an active subscription on hold for `start ..= end`.
    ///
    /// When the pending delivery falls inside the hold it is moved to the
    /// first date after `end` under the plan's rule.
    pub fn set_vacation(
        &mut self,
        start: NaiveDate,
        end: NaiveDate,
        plan: &SubscriptionPlan,
    ) -> CoreResult<()> {
        match self.status {
            SubscriptionStatus::Active => {}
            SubscriptionStatus::Paused
            | SubscriptionStatus::Cancelled
            | SubscriptionStatus::Expired => return Err(self.reject("set vacation on")),
        }
        validate_vacation_window(start, end)?;

        let window = VacationWindow::new(start, end);
        let next = match self.next_delivery_date {
            Some(current) if window.contains(current) => {
                Some(next_delivery_date(&plan.frequency, Some(&window), end)?)
            }
            other => other,
        };

        self.vacation_start = Some(start);
        self.vacation_end = Some(end);
        self.next_delivery_date = next;
        Ok(())
    }

    /// Removes any vacation hold. Allowed in every state.
    pub fn clear_vacation(&mut self) {
        self.vacation_start = None;
        self.vacation_end = None;
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Active, not on vacation on `date`, and the pending delivery is due.
    pub fn is_due_for_delivery(&self, date: Option<NaiveDate>) -> bool {
        let date = date.unwrap_or_else(today);
        self.status == SubscriptionStatus::Active
            && !self.is_on_vacation(date)
            && self.next_delivery_date.is_some_and(|next| next <= date)
    }

    /// Business rule: edits are allowed only for subscriptions that started
    /// on or after the first day of the previous calendar month.
    ///
    /// On 1 April, anything starting 1 March or later is editable; a
    /// subscription that started 28 February is not.
    pub fn can_edit(&self, today: Option<NaiveDate>) -> bool {
        if self.status == SubscriptionStatus::Cancelled {
            return false;
        }

        let today = today.unwrap_or_else(self::today);
        let first_of_month = today.with_day(1).unwrap_or(today);
        match first_of_month.checked_sub_months(Months::new(1)) {
            Some(cutoff) => self.start_date >= cutoff,
            None => true,
        }
    }

    // -------------------------------------------------------------------------
    // Bottle counters
    // -------------------------------------------------------------------------

    pub fn record_bottles_issued(&mut self, count: i64) {
        self.bottles_issued += count;
    }

    pub fn record_bottles_returned(&mut self, count: i64) {
        self.bottles_returned += count;
    }

    /// Bottles currently with the customer.
    pub fn bottles_outstanding(&self) -> i64 {
        self.bottles_issued - self.bottles_returned
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recurrence::Frequency;
    use chrono::Duration;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn daily_plan() -> SubscriptionPlan {
        SubscriptionPlan {
            id: "plan-daily".to_string(),
            name: "Daily".to_string(),
            frequency: Frequency::Daily,
            discount_bps: 0,
            items: Vec::new(),
        }
    }

    fn subscription(start: NaiveDate) -> Subscription {
        Subscription::new("s-1", "u-1", "a-1", "plan-daily", start, BillingCycle::Monthly)
    }

    #[test]
    fn test_new_subscription_is_active_and_due_on_start() {
        let sub = subscription(d(2026, 3, 10));
        assert_eq!(sub.status, SubscriptionStatus::Active);
        assert_eq!(sub.next_delivery_date, Some(d(2026, 3, 10)));
        assert!(sub.is_due_for_delivery(Some(d(2026, 3, 10))));
        assert!(!sub.is_due_for_delivery(Some(d(2026, 3, 9))));
    }

    #[test]
    fn test_pause_and_resume() {
        let plan = daily_plan();
        let mut sub = subscription(d(2026, 3, 1));

        sub.pause(Some(d(2026, 3, 20))).unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Paused);
        assert_eq!(sub.paused_until, Some(d(2026, 3, 20)));
        assert!(!sub.is_due_for_delivery(Some(d(2026, 3, 5))));

        assert!(sub.pause(None).unwrap_err().is_precondition_violation());

        sub.resume(&plan, d(2026, 3, 15)).unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Active);
        assert_eq!(sub.paused_until, None);
        assert_eq!(sub.next_delivery_date, Some(d(2026, 3, 16)));

        assert!(sub.resume(&plan, d(2026, 3, 15)).is_err());
    }

    #[test]
    fn test_cancel_is_terminal() {
        let plan = daily_plan();
        let mut sub = subscription(d(2026, 3, 1));
        let now = Utc::now();

        sub.cancel(Some("moving out".to_string()), now).unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Cancelled);
        assert_eq!(sub.cancelled_at, Some(now));
        assert_eq!(sub.cancellation_reason.as_deref(), Some("moving out"));

        let before = sub.clone();
        assert!(sub.pause(None).unwrap_err().is_precondition_violation());
        assert!(sub.resume(&plan, d(2026, 3, 2)).unwrap_err().is_precondition_violation());
        assert!(sub
            .set_vacation(d(2026, 3, 5), d(2026, 3, 6), &plan)
            .unwrap_err()
            .is_precondition_violation());
        assert!(sub.cancel(None, now).unwrap_err().is_precondition_violation());
        assert_eq!(sub, before);
    }

    #[test]
    fn test_cancel_from_paused_and_expired() {
        let mut paused = subscription(d(2026, 3, 1));
        paused.pause(None).unwrap();
        assert!(paused.cancel(None, Utc::now()).is_ok());

        let mut expired = subscription(d(2026, 3, 1));
        expired.status = SubscriptionStatus::Expired;
        assert!(expired.cancel(None, Utc::now()).is_ok());
        assert_eq!(expired.status, SubscriptionStatus::Cancelled);
    }

    #[test]
    fn test_expire_after_end_date() {
        let mut sub = subscription(d(2026, 3, 1));
        assert!(sub.expire(d(2026, 4, 1)).is_err());

        sub.end_date = Some(d(2026, 3, 31));
        assert!(sub.expire(d(2026, 3, 31)).is_err());
        sub.expire(d(2026, 4, 1)).unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Expired);
        assert!(sub.expire(d(2026, 4, 2)).is_err());
    }

    #[test]
    fn test_set_vacation_moves_pending_delivery() {
        let plan = daily_plan();
        let mut sub = subscription(d(2026, 3, 1));
        sub.next_delivery_date = Some(d(2026, 3, 12));

        sub.set_vacation(d(2026, 3, 11), d(2026, 3, 15), &plan).unwrap();
        assert_eq!(sub.next_delivery_date, Some(d(2026, 3, 16)));
        assert!(sub.is_on_vacation(d(2026, 3, 11)));
        assert!(sub.is_on_vacation(d(2026, 3, 15)));
        assert!(!sub.is_on_vacation(d(2026, 3, 16)));
    }

    #[test]
    fn test_set_vacation_leaves_date_outside_window() {
        let plan = daily_plan();
        let mut sub = subscription(d(2026, 3, 1));
        sub.next_delivery_date = Some(d(2026, 3, 10));

        sub.set_vacation(d(2026, 3, 11), d(2026, 3, 15), &plan).unwrap();
        assert_eq!(sub.next_delivery_date, Some(d(2026, 3, 10)));
    }

    #[test]
    fn test_set_vacation_rejects_inverted_window_without_change() {
        let plan = daily_plan();
        let mut sub = subscription(d(2026, 3, 1));
        let before = sub.clone();

        let err = sub.set_vacation(d(2026, 3, 15), d(2026, 3, 11), &plan).unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
        assert_eq!(sub, before);
    }

    #[test]
    fn test_set_vacation_requires_active() {
        let plan = daily_plan();
        let mut sub = subscription(d(2026, 3, 1));
        sub.pause(None).unwrap();
        assert!(sub.set_vacation(d(2026, 3, 11), d(2026, 3, 15), &plan).is_err());
    }

    #[test]
    fn test_clear_vacation_in_any_state() {
        let plan = daily_plan();
        let mut sub = subscription(d(2026, 3, 1));
        sub.set_vacation(d(2026, 3, 11), d(2026, 3, 15), &plan).unwrap();
        sub.cancel(None, Utc::now()).unwrap();

        sub.clear_vacation();
        assert_eq!(sub.vacation(), None);
        assert_eq!(sub.status, SubscriptionStatus::Cancelled);
    }

    #[test]
    fn test_not_due_while_on_vacation() {
        let plan = daily_plan();
        let mut sub = subscription(d(2026, 3, 1));
        sub.next_delivery_date = Some(d(2026, 3, 5));
        sub.set_vacation(d(2026, 3, 11), d(2026, 3, 15), &plan).unwrap();

        assert!(sub.is_due_for_delivery(Some(d(2026, 3, 10))));
        assert!(!sub.is_due_for_delivery(Some(d(2026, 3, 12))));
    }

    #[test]
    fn test_calculate_next_uses_vacation() {
        let plan = daily_plan();
        let mut sub = subscription(d(2026, 3, 1));
        let from = d(2026, 3, 10);
        sub.vacation_start = Some(from + Duration::days(1));
        sub.vacation_end = Some(from + Duration::days(5));

        let next = sub.calculate_next_delivery_date(&plan, Some(from)).unwrap();
        assert_eq!(next, from + Duration::days(6));
    }

    #[test]
    fn test_can_edit_month_boundaries() {
        let today = Some(d(2026, 4, 1));

        assert!(subscription(d(2026, 3, 1)).can_edit(today));
        assert!(subscription(d(2026, 4, 1)).can_edit(today));
        assert!(!subscription(d(2026, 2, 28)).can_edit(today));

        // Last day of the month still only reaches back to the 1st of last month
        let end_of_april = Some(d(2026, 4, 30));
        assert!(subscription(d(2026, 3, 1)).can_edit(end_of_april));
        assert!(!subscription(d(2026, 2, 28)).can_edit(end_of_april));

        // Across a year boundary
        assert!(subscription(d(2025, 12, 1)).can_edit(Some(d(2026, 1, 15))));
        assert!(!subscription(d(2025, 11, 30)).can_edit(Some(d(2026, 1, 15))));
    }

    #[test]
    fn test_cancelled_cannot_be_edited() {
        let mut sub = subscription(d(2026, 4, 1));
        sub.cancel(None, Utc::now()).unwrap();
        assert!(!sub.can_edit(Some(d(2026, 4, 2))));
    }

    #[test]
    fn test_bottle_counters() {
        let mut sub = subscription(d(2026, 3, 1));
        sub.record_bottles_issued(3);
        sub.record_bottles_returned(1);
        assert_eq!(sub.bottles_outstanding(), 2);
    }
}
