//! # Bottle Ledger
//!
//! Glass bottles carry a refundable deposit and are tracked one by one.
//!
//! ## States
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   ┌───────────┐   issue_to    ┌────────┐                                │
//! │   │ available │ ────────────► │ issued │  holder + subscription set     │
//! │   └───────────┘ ◄──────────── └────────┘                                │
//! │        ▲       return (good)       │                                    │
//! │        │                           │ return (damaged)                   │
//! │        │                           ▼                                    │
//! │        │                      ┌─────────┐      ┌──────┐                 │
//! │        └── mark_as_available ─┤ damaged │      │ lost │                 │
//! │                               └─────────┘      └──────┘                 │
//! │                                                                         │
//! │   mark_as_damaged / mark_as_lost / mark_as_available are admin          │
//! │   overrides: allowed from any state.                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Audit Trail
//! Every operation returns the [`BottleLog`] entry describing it. The caller
//! persists the bottle and its log entry in one transaction. Log entries
//! are never updated or deleted.
//!
//! ## Holder Invariant
//! `current_user_id` and `current_subscription_id` are only set while the
//! bottle is `issued`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;
use ts_rs::TS;

use crate::error::{CoreError, CoreResult};
use crate::money::Money;
use crate::types::{new_id, ActorKind};

// =============================================================================
// Bottle Status
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum BottleStatus {
    #[default]
    Available,
    Issued,
    /// Legacy state. Good returns go straight back to `Available`.
    Returned,
    Damaged,
    Lost,
}

impl fmt::Display for BottleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BottleStatus::Available => "available",
            BottleStatus::Issued => "issued",
            BottleStatus::Returned => "returned",
            BottleStatus::Damaged => "damaged",
            BottleStatus::Lost => "lost",
        };
        f.write_str(s)
    }
}

// =============================================================================
// Return Condition
// =============================================================================

/// Condition reported when a customer hands a bottle back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ReturnCondition {
    Good,
    Damaged,
}

/// `"damaged"` (any case) is damaged; every other value is good.
impl FromStr for ReturnCondition {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("damaged") {
            Ok(ReturnCondition::Damaged)
        } else {
            Ok(ReturnCondition::Good)
        }
    }
}

// =============================================================================
// Bottle Log
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum BottleAction {
    Issued,
    Returned,
    Damaged,
    Lost,
    MadeAvailable,
}

/// One immutable entry in a bottle's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct BottleLog {
    pub id: String,
    pub bottle_id: String,
    pub action: BottleAction,
    pub actor: ActorKind,
    /// Holder the event concerns (new holder on issue, previous otherwise).
    pub user_id: Option<String>,
    pub subscription_id: Option<String>,
    pub deposit_amount: Option<Money>,
    pub refund_amount: Option<Money>,
    pub notes: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Bottle
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Bottle {
    pub id: String,
    pub bottle_number: String,
    pub status: BottleStatus,
    pub current_user_id: Option<String>,
    pub current_subscription_id: Option<String>,
    pub deposit_amount: Money,

    #[ts(as = "Option<String>")]
    pub issued_at: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub returned_at: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub damaged_at: Option<DateTime<Utc>>,
    pub damage_reason: Option<String>,

    pub version: i64,
}

impl Bottle {
    /// Creates an available bottle.
    pub fn new(
        id: impl Into<String>,
        bottle_number: impl Into<String>,
        deposit_amount: Money,
    ) -> Self {
        Bottle {
            id: id.into(),
            bottle_number: bottle_number.into(),
            status: BottleStatus::Available,
            current_user_id: None,
            current_subscription_id: None,
            deposit_amount,
            issued_at: None,
            returned_at: None,
            damaged_at: None,
            damage_reason: None,
            version: 0,
        }
    }

    fn log(
        &self,
        action: BottleAction,
        actor: ActorKind,
        user_id: Option<String>,
        subscription_id: Option<String>,
        now: DateTime<Utc>,
    ) -> BottleLog {
        BottleLog {
            id: new_id(),
            bottle_id: self.id.clone(),
            action,
            actor,
            user_id,
            subscription_id,
            deposit_amount: None,
            refund_amount: None,
            notes: None,
            created_at: now,
        }
    }

    /// Clears the holder pair, returning the previous values.
    fn release(&mut self) -> (Option<String>, Option<String>) {
        (
            self.current_user_id.take(),
            self.current_subscription_id.take(),
        )
    }

    /// available → issued.
    pub fn issue_to(
        &mut self,
        user_id: &str,
        subscription_id: Option<&str>,
        actor: ActorKind,
        now: DateTime<Utc>,
    ) -> CoreResult<BottleLog> {
        match self.status {
            BottleStatus::Available => {}
            BottleStatus::Issued
            | BottleStatus::Returned
            | BottleStatus::Damaged
            | BottleStatus::Lost => {
                return Err(CoreError::invalid_transition(
                    "bottle",
                    &self.id,
                    self.status,
                    "issue",
                ))
            }
        }

        self.status = BottleStatus::Issued;
        self.current_user_id = Some(user_id.to_string());
        self.current_subscription_id = subscription_id.map(str::to_string);
        self.issued_at = Some(now);
        self.returned_at = None;

        let mut entry = self.log(
            BottleAction::Issued,
            actor,
            self.current_user_id.clone(),
            self.current_subscription_id.clone(),
            now,
        );
        entry.deposit_amount = Some(self.deposit_amount);
        Ok(entry)
    }

    /// issued → available (good) or damaged.
    pub fn return_bottle(
        &mut self,
        condition: ReturnCondition,
        actor: ActorKind,
        now: DateTime<Utc>,
    ) -> CoreResult<BottleLog> {
        match self.status {
            BottleStatus::Issued => {}
            BottleStatus::Available
            | BottleStatus::Returned
            | BottleStatus::Damaged
            | BottleStatus::Lost => {
                return Err(CoreError::invalid_transition(
                    "bottle",
                    &self.id,
                    self.status,
                    "return",
                ))
            }
        }

        let (user_id, subscription_id) = self.release();
        self.returned_at = Some(now);

        let mut entry = self.log(BottleAction::Returned, actor, user_id, subscription_id, now);
        match condition {
            ReturnCondition::Good => {
                self.status = BottleStatus::Available;
                entry.refund_amount = Some(self.deposit_amount);
            }
            ReturnCondition::Damaged => {
                self.status = BottleStatus::Damaged;
                self.damaged_at = Some(now);
                entry.notes = Some("returned damaged".to_string());
            }
        }
        Ok(entry)
    }

    /// Admin override → damaged.
    pub fn mark_as_damaged(
        &mut self,
        reason: Option<String>,
        actor: ActorKind,
        now: DateTime<Utc>,
    ) -> BottleLog {
        let (user_id, subscription_id) = self.release();
        self.status = BottleStatus::Damaged;
        self.damaged_at = Some(now);
        self.damage_reason = reason.clone();

        let mut entry = self.log(BottleAction::Damaged, actor, user_id, subscription_id, now);
        entry.notes = reason;
        entry
    }

    /// Admin override → lost.
    pub fn mark_as_lost(&mut self, actor: ActorKind, now: DateTime<Utc>) -> BottleLog {
        let (user_id, subscription_id) = self.release();
        self.status = BottleStatus::Lost;
        self.log(BottleAction::Lost, actor, user_id, subscription_id, now)
    }

    /// Admin override → available.
    pub fn mark_as_available(&mut self, actor: ActorKind, now: DateTime<Utc>) -> BottleLog {
        let (user_id, subscription_id) = self.release();
        self.status = BottleStatus::Available;
        self.log(BottleAction::MadeAvailable, actor, user_id, subscription_id, now)
    }

    /// True when the holder fields agree with the status.
    pub fn holder_consistent(&self) -> bool {
        match self.status {
            BottleStatus::Issued => self.current_user_id.is_some(),
            BottleStatus::Available
            | BottleStatus::Returned
            | BottleStatus::Damaged
            | BottleStatus::Lost => {
                self.current_user_id.is_none() && self.current_subscription_id.is_none()
            }
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn bottle() -> Bottle {
        Bottle::new("b-1", "BTL-0001", Money::from_paise(2500))
    }

    #[test]
    fn test_issue_and_good_return() {
        let mut b = bottle();
        let now = Utc::now();

        let log = b.issue_to("u-1", Some("s-1"), ActorKind::Driver, now).unwrap();
        assert_eq!(b.status, BottleStatus::Issued);
        assert_eq!(b.current_user_id.as_deref(), Some("u-1"));
        assert_eq!(b.current_subscription_id.as_deref(), Some("s-1"));
        assert_eq!(b.issued_at, Some(now));
        assert_eq!(log.action, BottleAction::Issued);
        assert_eq!(log.deposit_amount, Some(Money::from_paise(2500)));
        assert!(b.holder_consistent());

        let cond: ReturnCondition = "good".parse().unwrap();
        let log = b.return_bottle(cond, ActorKind::Driver, now).unwrap();
        assert_eq!(b.status, BottleStatus::Available);
        assert_eq!(b.current_user_id, None);
        assert_eq!(b.current_subscription_id, None);
        assert_eq!(b.returned_at, Some(now));
        assert_eq!(log.action, BottleAction::Returned);
        assert_eq!(log.user_id.as_deref(), Some("u-1"));
        assert_eq!(log.subscription_id.as_deref(), Some("s-1"));
        assert_eq!(log.refund_amount, Some(Money::from_paise(2500)));
        assert!(b.holder_consistent());
    }

    #[test]
    fn test_damaged_return() {
        let mut b = bottle();
        b.issue_to("u-1", None, ActorKind::Driver, Utc::now()).unwrap();

        let cond: ReturnCondition = "damaged".parse().unwrap();
        let log = b.return_bottle(cond, ActorKind::Driver, Utc::now()).unwrap();
        assert_eq!(b.status, BottleStatus::Damaged);
        assert!(b.damaged_at.is_some());
        assert_eq!(b.current_user_id, None);
        assert_eq!(log.refund_amount, None);
    }

    #[test]
    fn test_return_condition_parsing() {
        assert_eq!("DAMAGED".parse::<ReturnCondition>().unwrap(), ReturnCondition::Damaged);
        assert_eq!("scratched".parse::<ReturnCondition>().unwrap(), ReturnCondition::Good);
        assert_eq!("".parse::<ReturnCondition>().unwrap(), ReturnCondition::Good);
    }

    #[test]
    fn test_issue_requires_available() {
        let mut b = bottle();
        b.issue_to("u-1", None, ActorKind::Driver, Utc::now()).unwrap();

        let err = b.issue_to("u-2", None, ActorKind::Driver, Utc::now()).unwrap_err();
        assert!(err.is_precondition_violation());
        assert_eq!(b.current_user_id.as_deref(), Some("u-1"));
    }

    #[test]
    fn test_return_requires_issued() {
        let mut b = bottle();
        let before = b.clone();
        assert!(b
            .return_bottle(ReturnCondition::Good, ActorKind::Driver, Utc::now())
            .is_err());
        assert_eq!(b, before);
    }

    #[test]
    fn test_admin_overrides_clear_holder() {
        let mut b = bottle();
        b.issue_to("u-1", Some("s-1"), ActorKind::Driver, Utc::now()).unwrap();

        let log = b.mark_as_lost(ActorKind::Admin, Utc::now());
        assert_eq!(b.status, BottleStatus::Lost);
        assert_eq!(log.user_id.as_deref(), Some("u-1"));
        assert!(b.holder_consistent());

        let log = b.mark_as_damaged(Some("cracked".to_string()), ActorKind::Admin, Utc::now());
        assert_eq!(b.status, BottleStatus::Damaged);
        assert_eq!(b.damage_reason.as_deref(), Some("cracked"));
        assert_eq!(log.notes.as_deref(), Some("cracked"));

        let log = b.mark_as_available(ActorKind::Admin, Utc::now());
        assert_eq!(b.status, BottleStatus::Available);
        assert_eq!(log.action, BottleAction::MadeAvailable);
        assert!(b.issue_to("u-2", None, ActorKind::Admin, Utc::now()).is_ok());
    }
}
