//! # Zone Assignment
//!
//! Picks the zone that owns a delivery address.
//!
//! ## Resolution Order
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  1. allow override (address scope, then user scope)  ──► Override       │
//! │        │ none, or its zone is not usable                                │
//! │        ▼                                                                │
//! │  2. drop zones named by an effective deny override                     │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  3. first usable zone whose polygon contains (lat, lng) ──► Boundary    │
//! │        │ none                                                           │
//! │        ▼                                                                │
//! │  4. first usable zone listing the pincode            ──► Pincode        │
//! │        │ none                                                           │
//! │        ▼                                                                │
//! │  5. None  (caller reports "not serviceable")                            │
//! │                                                                         │
//! │  "usable" = active and not soft-deleted                                 │
//! │  "first"  = lowest zone id, so resolution is repeatable                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! An overridden zone wins even when the address lies outside both its
//! polygon and its pincode list.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::UserAddress;
use crate::zone::{Zone, ZoneOverride, ZoneOverrideKind};

/// How a zone was matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    Override,
    Boundary,
    Pincode,
}

/// The zone chosen for an address.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZoneMatch<'a> {
    pub zone: &'a Zone,
    pub method: MatchMethod,
}

/// Resolves the zone for `address` at instant `now`.
///
/// `zones` may contain inactive or deleted zones; they are ignored.
/// `overrides` may contain overrides for other users; only those scoped to
/// this address or its owner are considered.
pub fn resolve_zone<'a>(
    address: &UserAddress,
    zones: &'a [Zone],
    overrides: &[ZoneOverride],
    now: DateTime<Utc>,
) -> Option<ZoneMatch<'a>> {
    let mut candidates: Vec<&'a Zone> = zones.iter().filter(|z| z.is_usable()).collect();
    candidates.sort_by(|a, b| a.id.cmp(&b.id));

    let effective: Vec<&ZoneOverride> = overrides
        .iter()
        .filter(|o| o.is_effective(now))
        .filter(|o| o.applies_to_address(&address.id) || o.applies_to_user(&address.user_id))
        .collect();

    // Address-scoped allows take precedence over user-scoped ones
    let allow = effective
        .iter()
        .filter(|o| o.kind == ZoneOverrideKind::Allow)
        .filter_map(|o| {
            let zone = candidates.iter().find(|z| z.id == o.zone_id)?;
            let rank = if o.applies_to_address(&address.id) { 0 } else { 1 };
            Some((rank, &o.created_at, *zone))
        })
        .min_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(a.1)));

    if let Some((_, _, zone)) = allow {
        return Some(ZoneMatch {
            zone,
            method: MatchMethod::Override,
        });
    }

    candidates.retain(|zone| {
        !effective
            .iter()
            .any(|o| o.kind == ZoneOverrideKind::Deny && o.zone_id == zone.id)
    });

    if let Some(zone) = candidates
        .iter()
        .copied()
        .find(|z| z.is_within_boundary(address.lat, address.lng))
    {
        return Some(ZoneMatch {
            zone,
            method: MatchMethod::Boundary,
        });
    }

    candidates
        .into_iter()
        .find(|z| z.is_serviceable(&address.pincode))
        .map(|zone| ZoneMatch {
            zone,
            method: MatchMethod::Pincode,
        })
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GeoPoint;
    use chrono::Duration;

    fn square(id: &str, min: f64, max: f64) -> Zone {
        Zone::new(id, id, id.to_uppercase()).with_boundary(vec![
            GeoPoint::new(min, min),
            GeoPoint::new(max, min),
            GeoPoint::new(max, max),
            GeoPoint::new(min, max),
        ])
    }

    fn address(lat: f64, lng: f64, pincode: &str) -> UserAddress {
        UserAddress {
            id: "a-1".to_string(),
            user_id: "u-1".to_string(),
            lat,
            lng,
            pincode: pincode.to_string(),
            zone_id: None,
        }
    }

    fn allow_for_user(zone_id: &str) -> ZoneOverride {
        ZoneOverride {
            id: format!("ovr-{}", zone_id),
            zone_id: zone_id.to_string(),
            user_id: Some("u-1".to_string()),
            address_id: None,
            kind: ZoneOverrideKind::Allow,
            reason: Some("VIP".to_string()),
            expires_at: None,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_boundary_before_pincode() {
        let zones = vec![
            Zone::new("z-a", "Pincode zone", "PIN").with_pincodes(["682509"]),
            square("z-b", 0.0, 1.0),
        ];
        let m = resolve_zone(&address(0.5, 0.5, "682509"), &zones, &[], Utc::now()).unwrap();
        assert_eq!(m.zone.id, "z-b");
        assert_eq!(m.method, MatchMethod::Boundary);
    }

    #[test]
    fn test_pincode_fallback() {
        let zones = vec![
            square("z-a", 0.0, 1.0),
            Zone::new("z-b", "Pincode zone", "PIN").with_pincodes(["682 509"]),
        ];
        let m = resolve_zone(&address(5.0, 5.0, "682509"), &zones, &[], Utc::now()).unwrap();
        assert_eq!(m.zone.id, "z-b");
        assert_eq!(m.method, MatchMethod::Pincode);
    }

    #[test]
    fn test_no_match() {
        let zones = vec![square("z-a", 0.0, 1.0)];
        assert!(resolve_zone(&address(5.0, 5.0, "110001"), &zones, &[], Utc::now()).is_none());
    }

    #[test]
    fn test_allow_override_beats_geography() {
        let zones = vec![square("z-a", 0.0, 1.0), square("z-far", 50.0, 51.0)];
        let overrides = vec![allow_for_user("z-far")];

        let m = resolve_zone(&address(0.5, 0.5, "682509"), &zones, &overrides, Utc::now())
            .unwrap();
        assert_eq!(m.zone.id, "z-far");
        assert_eq!(m.method, MatchMethod::Override);
    }

    #[test]
    fn test_address_override_beats_user_override() {
        let zones = vec![square("z-a", 0.0, 1.0), square("z-b", 2.0, 3.0)];
        let mut by_address = allow_for_user("z-b");
        by_address.user_id = None;
        by_address.address_id = Some("a-1".to_string());
        let overrides = vec![allow_for_user("z-a"), by_address];

        let m = resolve_zone(&address(9.0, 9.0, ""), &zones, &overrides, Utc::now()).unwrap();
        assert_eq!(m.zone.id, "z-b");
    }

    #[test]
    fn test_expired_and_inactive_overrides_are_ignored() {
        let now = Utc::now();
        let zones = vec![square("z-a", 0.0, 1.0), square("z-far", 50.0, 51.0)];

        let mut expired = allow_for_user("z-far");
        expired.expires_at = Some(now - Duration::hours(1));
        let mut inactive = allow_for_user("z-far");
        inactive.is_active = false;

        let m = resolve_zone(&address(0.5, 0.5, ""), &zones, &[expired, inactive], now).unwrap();
        assert_eq!(m.zone.id, "z-a");
        assert_eq!(m.method, MatchMethod::Boundary);
    }

    #[test]
    fn test_override_for_other_user_is_ignored() {
        let zones = vec![square("z-far", 50.0, 51.0)];
        let mut other = allow_for_user("z-far");
        other.user_id = Some("u-2".to_string());

        assert!(resolve_zone(&address(0.5, 0.5, ""), &zones, &[other], Utc::now()).is_none());
    }

    #[test]
    fn test_override_to_inactive_zone_falls_through() {
        let mut closed = square("z-closed", 50.0, 51.0);
        closed.is_active = false;
        let zones = vec![square("z-a", 0.0, 1.0), closed];

        let m = resolve_zone(
            &address(0.5, 0.5, ""),
            &zones,
            &[allow_for_user("z-closed")],
            Utc::now(),
        )
        .unwrap();
        assert_eq!(m.zone.id, "z-a");
    }

    #[test]
    fn test_deny_removes_zone() {
        let zones = vec![
            square("z-a", 0.0, 1.0),
            square("z-b", 0.0, 2.0).with_pincodes(["682509"]),
        ];
        let mut deny = allow_for_user("z-a");
        deny.kind = ZoneOverrideKind::Deny;

        let m = resolve_zone(&address(0.5, 0.5, "682509"), &zones, &[deny], Utc::now()).unwrap();
        assert_eq!(m.zone.id, "z-b");
    }

    #[test]
    fn test_resolution_is_order_independent() {
        let a = square("z-a", 0.0, 2.0);
        let b = square("z-b", 0.0, 1.0);
        let addr = address(0.5, 0.5, "");

        let forward = [a.clone(), b.clone()];
        let backward = [b, a];
        let first = resolve_zone(&addr, &forward, &[], Utc::now()).unwrap();
        let second = resolve_zone(&addr, &backward, &[], Utc::now()).unwrap();
        assert_eq!(first.zone.id, "z-a");
        assert_eq!(second.zone.id, "z-a");
    }
}
