//! # Zone Serviceability
//!
//! A zone is a delivery area defined by a polygon boundary and/or a pincode
//! set, with its own schedule, verticals and pricing.
//!
//! ## Serviceability Checks
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Check                    Empty configuration means                     │
//! │  ───────────────────────  ─────────────────────────────────────────     │
//! │  is_within_boundary       < 3 vertices → NOT serviceable by boundary    │
//! │  is_serviceable (pincode) no pincodes  → NOT serviceable by pincode     │
//! │  is_serviceable_on_day    no days      → serviceable EVERY day          │
//! │  is_serviceable_at_time   no window    → serviceable ALL day            │
//! │  supports_vertical        no verticals → every vertical supported       │
//! │                                                                         │
//! │  Geography is opt-in by inclusion; day/time/vertical limits are         │
//! │  opt-in restrictions.                                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! All checks are pure predicates and never fail. Corrupt boundary data is
//! rejected earlier, when it is parsed ([`parse_boundary`]).

use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, Local, NaiveDate, NaiveTime, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;

use crate::error::{CoreError, CoreResult};
use crate::money::Money;
use crate::types::{GeoPoint, Vertical};
use crate::validation::normalize_pincode;

// =============================================================================
// Zone
// =============================================================================

/// A delivery zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Zone {
    pub id: String,
    pub name: String,
    /// Short operator-facing code, e.g. `KOCHI-N1`.
    pub code: String,

    /// Ordered polygon vertices. Fewer than 3 means no boundary.
    pub boundary: Vec<GeoPoint>,

    /// Normalized (whitespace-free) pincodes.
    pub pincodes: BTreeSet<String>,

    /// Weekday indexes, 0 = Sunday .. 6 = Saturday.
    pub service_days: BTreeSet<u8>,

    #[ts(as = "Option<String>")]
    pub service_start: Option<NaiveTime>,
    #[ts(as = "Option<String>")]
    pub service_end: Option<NaiveTime>,

    pub verticals: BTreeSet<Vertical>,

    pub delivery_charge: Money,
    pub min_order_amount: Money,

    pub is_active: bool,

    /// Soft delete marker.
    #[ts(as = "Option<String>")]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// How usable a zone's boundary is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryStatus {
    /// No vertices at all. The zone relies on pincodes.
    Unconfigured,
    /// Some vertices, but not enough for a polygon.
    Insufficient { vertices: usize },
    Valid,
}

impl Zone {
    /// Creates an active zone with no boundary, pincodes or restrictions.
    pub fn new(id: impl Into<String>, name: impl Into<String>, code: impl Into<String>) -> Self {
        Zone {
            id: id.into(),
            name: name.into(),
            code: code.into(),
            boundary: Vec::new(),
            pincodes: BTreeSet::new(),
            service_days: BTreeSet::new(),
            service_start: None,
            service_end: None,
            verticals: BTreeSet::new(),
            delivery_charge: Money::zero(),
            min_order_amount: Money::zero(),
            is_active: true,
            deleted_at: None,
        }
    }

    /// Sets the polygon boundary.
    pub fn with_boundary(mut self, boundary: Vec<GeoPoint>) -> Self {
        self.boundary = boundary;
        self
    }

    /// Sets the pincode set, normalizing each entry.
    pub fn with_pincodes<I, S>(mut self, pincodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.pincodes = pincodes
            .into_iter()
            .map(|p| normalize_pincode(p.as_ref()))
            .filter(|p| !p.is_empty())
            .collect();
        self
    }

    /// Sets the service weekdays (0 = Sunday).
    pub fn with_service_days(mut self, days: impl IntoIterator<Item = u8>) -> Self {
        self.service_days = days.into_iter().collect();
        self
    }

    /// Sets the inclusive service time window.
    pub fn with_service_window(mut self, start: NaiveTime, end: NaiveTime) -> Self {
        self.service_start = Some(start);
        self.service_end = Some(end);
        self
    }

    pub fn with_verticals(mut self, verticals: impl IntoIterator<Item = Vertical>) -> Self {
        self.verticals = verticals.into_iter().collect();
        self
    }

    /// True when the zone may take part in resolution at all.
    pub fn is_usable(&self) -> bool {
        self.is_active && self.deleted_at.is_none()
    }

    pub fn boundary_status(&self) -> BoundaryStatus {
        match self.boundary.len() {
            0 => BoundaryStatus::Unconfigured,
            n if n < 3 => BoundaryStatus::Insufficient { vertices: n },
            _ => BoundaryStatus::Valid,
        }
    }

    /// Ray-casting point-in-polygon test.
    ///
    /// Vertices are treated as (x = longitude, y = latitude). Points lying
    /// exactly on an edge are not special-cased: the answer depends on
    /// floating-point rounding and callers must not rely on either result.
    pub fn is_within_boundary(&self, lat: f64, lng: f64) -> bool {
        if self.boundary.len() < 3 {
            return false;
        }

        let (x, y) = (lng, lat);
        let mut inside = false;
        let mut j = self.boundary.len() - 1;

        for i in 0..self.boundary.len() {
            let (xi, yi) = (self.boundary[i].lng, self.boundary[i].lat);
            let (xj, yj) = (self.boundary[j].lng, self.boundary[j].lat);

            if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
                inside = !inside;
            }
            j = i;
        }

        inside
    }

    /// Pincode membership after stripping whitespace. Case-sensitive.
    ///
    /// An empty pincode set serves nobody: geography is explicit opt-in.
    pub fn is_serviceable(&self, pincode: &str) -> bool {
        if self.pincodes.is_empty() {
            return false;
        }
        self.pincodes.contains(&normalize_pincode(pincode))
    }

    /// Whether the zone delivers on the given day.
    ///
    /// NOTE: an empty day set means "every day". This is deliberately the
    /// opposite default from [`Zone::is_serviceable`], where an empty pincode
    /// set means "nowhere". Pending product-owner confirmation, keep both.
    pub fn is_serviceable_on_day(&self, day: impl Into<ServiceDay>) -> bool {
        if self.service_days.is_empty() {
            return true;
        }

        match day.into().weekday_index() {
            Some(index) => self.service_days.contains(&index),
            None => false,
        }
    }

    /// Whether `time` (local now when `None`) falls inside the service
    /// window, both ends inclusive, compared at whole-second precision.
    ///
    /// A window missing either bound is treated as unrestricted. A window
    /// whose start is after its end (crossing midnight) never matches.
    pub fn is_serviceable_at_time(&self, time: Option<NaiveTime>) -> bool {
        let (Some(start), Some(end)) = (self.service_start, self.service_end) else {
            return true;
        };

        let time = time.unwrap_or_else(|| Local::now().time());
        let time = time.with_nanosecond(0).unwrap_or(time);

        start <= time && time <= end
    }

    pub fn supports_vertical(&self, vertical: Vertical) -> bool {
        self.verticals.is_empty() || self.verticals.contains(&vertical)
    }

    pub fn meets_minimum_order(&self, order_total: Money) -> bool {
        order_total >= self.min_order_amount
    }

    /// Price of a product in this zone.
    ///
    /// Returns `None` when the zone marks the product unavailable. An
    /// override belonging to another zone is ignored.
    pub fn product_price(
        &self,
        base_price: Money,
        product_override: Option<&ZoneProductOverride>,
    ) -> Option<Money> {
        match product_override {
            Some(ov) if ov.zone_id == self.id => {
                if ov.is_available {
                    Some(ov.price.unwrap_or(base_price))
                } else {
                    None
                }
            }
            _ => Some(base_price),
        }
    }
}

// =============================================================================
// Boundary Parsing
// =============================================================================

/// Parses stored boundary JSON into vertices.
///
/// Accepted vertex shapes:
/// - `{"lat": 9.9, "lng": 76.2}` (numbers or numeric strings)
/// - `[76.2, 9.9]` (GeoJSON order: longitude first)
///
/// `null` and `[]` mean "no boundary". Anything non-numeric is reported as
/// [`CoreError::MalformedGeometry`] instead of being coerced to 0.0.
pub fn parse_boundary(zone_id: &str, value: &Value) -> CoreResult<Vec<GeoPoint>> {
    let malformed = |reason: String| CoreError::MalformedGeometry {
        zone_id: zone_id.to_string(),
        reason,
    };

    let vertices = match value {
        Value::Null => return Ok(Vec::new()),
        Value::Array(vertices) => vertices,
        other => return Err(malformed(format!("expected an array, found {}", other))),
    };

    vertices
        .iter()
        .enumerate()
        .map(|(i, vertex)| {
            let (lat, lng) = match vertex {
                Value::Object(map) => (
                    map.get("lat").and_then(coordinate),
                    map.get("lng").and_then(coordinate),
                ),
                Value::Array(pair) if pair.len() == 2 => {
                    (coordinate(&pair[1]), coordinate(&pair[0]))
                }
                _ => (None, None),
            };

            match (lat, lng) {
                (Some(lat), Some(lng)) => Ok(GeoPoint::new(lat, lng)),
                _ => Err(malformed(format!("vertex {} is not a numeric coordinate", i))),
            }
        })
        .collect()
}

fn coordinate(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

// =============================================================================
// Service Day
// =============================================================================

/// A day reference accepted by [`Zone::is_serviceable_on_day`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceDay {
    /// 0 = Sunday .. 6 = Saturday.
    Index(u8),
    Date(NaiveDate),
    Weekday(Weekday),
    /// A day name ("monday", "Mon"), a digit, or an ISO date.
    Name(String),
}

impl ServiceDay {
    /// Resolves to a weekday index, or `None` when unresolvable.
    pub fn weekday_index(&self) -> Option<u8> {
        match self {
            ServiceDay::Index(i) if *i <= 6 => Some(*i),
            ServiceDay::Index(_) => None,
            ServiceDay::Date(date) => Some(weekday_index(date.weekday())),
            ServiceDay::Weekday(day) => Some(weekday_index(*day)),
            ServiceDay::Name(name) => {
                let name = name.trim();
                if let Ok(i) = name.parse::<u8>() {
                    return ServiceDay::Index(i).weekday_index();
                }
                if let Ok(day) = name.parse::<Weekday>() {
                    return Some(weekday_index(day));
                }
                name.parse::<NaiveDate>()
                    .ok()
                    .map(|date| weekday_index(date.weekday()))
            }
        }
    }
}

/// 0 = Sunday .. 6 = Saturday.
pub fn weekday_index(day: Weekday) -> u8 {
    day.num_days_from_sunday() as u8
}

impl From<u8> for ServiceDay {
    fn from(index: u8) -> Self {
        ServiceDay::Index(index)
    }
}

impl From<NaiveDate> for ServiceDay {
    fn from(date: NaiveDate) -> Self {
        ServiceDay::Date(date)
    }
}

impl From<Weekday> for ServiceDay {
    fn from(day: Weekday) -> Self {
        ServiceDay::Weekday(day)
    }
}

impl From<&str> for ServiceDay {
    fn from(name: &str) -> Self {
        ServiceDay::Name(name.to_string())
    }
}

// =============================================================================
// Overrides
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ZoneOverrideKind {
    /// Grants access to the zone regardless of geography.
    Allow,
    /// Removes the zone from geographic resolution.
    Deny,
}

/// An exception to normal serviceability for one user or one address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ZoneOverride {
    pub id: String,
    pub zone_id: String,
    pub user_id: Option<String>,
    pub address_id: Option<String>,
    pub kind: ZoneOverrideKind,
    pub reason: Option<String>,
    #[ts(as = "Option<String>")]
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl ZoneOverride {
    /// Effective only while active and not yet expired.
    pub fn is_effective(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expires_at.map_or(true, |expires| expires > now)
    }

    pub fn applies_to_address(&self, address_id: &str) -> bool {
        self.address_id.as_deref() == Some(address_id)
    }

    pub fn applies_to_user(&self, user_id: &str) -> bool {
        self.user_id.as_deref() == Some(user_id)
    }
}

/// Per-zone price or availability for one product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ZoneProductOverride {
    pub zone_id: String,
    pub product_id: String,
    /// Replacement price; `None` keeps the catalog price.
    pub price: Option<Money>,
    pub is_available: bool,
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn unit_square() -> Zone {
        Zone::new("z-1", "Square", "SQ").with_boundary(vec![
            GeoPoint::new(0.0, 0.0),
            GeoPoint::new(0.0, 1.0),
            GeoPoint::new(1.0, 1.0),
            GeoPoint::new(1.0, 0.0),
        ])
    }

    fn time(h: u32, m: u32, s: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, s).unwrap()
    }

    #[test]
    fn test_point_in_unit_square() {
        let zone = unit_square();
        assert!(zone.is_within_boundary(0.5, 0.5));
        assert!(!zone.is_within_boundary(2.0, 2.0));
        assert!(!zone.is_within_boundary(-0.1, 0.5));
    }

    #[test]
    fn test_concave_polygon() {
        // U shape opening north: the notch between x=1..2 above y=1 is outside
        let zone = Zone::new("z-u", "U", "U").with_boundary(vec![
            GeoPoint::new(0.0, 0.0),
            GeoPoint::new(0.0, 3.0),
            GeoPoint::new(3.0, 3.0),
            GeoPoint::new(3.0, 2.0),
            GeoPoint::new(1.0, 2.0),
            GeoPoint::new(1.0, 1.0),
            GeoPoint::new(3.0, 1.0),
            GeoPoint::new(3.0, 0.0),
        ]);
        assert!(zone.is_within_boundary(0.5, 1.5));
        assert!(zone.is_within_boundary(2.5, 0.5));
        assert!(!zone.is_within_boundary(2.0, 1.5));
    }

    #[test]
    fn test_too_few_vertices_is_not_serviceable() {
        let zone = Zone::new("z-2", "Line", "LN")
            .with_boundary(vec![GeoPoint::new(0.0, 0.0), GeoPoint::new(1.0, 1.0)]);
        assert!(!zone.is_within_boundary(0.5, 0.5));
        assert_eq!(zone.boundary_status(), BoundaryStatus::Insufficient { vertices: 2 });
        assert_eq!(Zone::new("z", "n", "c").boundary_status(), BoundaryStatus::Unconfigured);
        assert_eq!(unit_square().boundary_status(), BoundaryStatus::Valid);
    }

    #[test]
    fn test_pincode_normalization() {
        let zone = Zone::new("z-3", "Kochi", "KOC").with_pincodes(["682509"]);
        assert_eq!(zone.is_serviceable(" 682 509 "), zone.is_serviceable("682509"));
        assert!(zone.is_serviceable("682\t509"));
        assert!(!zone.is_serviceable("682510"));
    }

    #[test]
    fn test_empty_pincode_set_serves_nobody() {
        let zone = Zone::new("z-4", "Empty", "EMP");
        assert!(!zone.is_serviceable("682509"));
    }

    #[test]
    fn test_day_checks() {
        // Monday and Wednesday only
        let zone = Zone::new("z-5", "Weekdays", "WD").with_service_days([1, 3]);

        assert!(zone.is_serviceable_on_day(1u8));
        assert!(!zone.is_serviceable_on_day(0u8));
        assert!(zone.is_serviceable_on_day(Weekday::Wed));
        assert!(zone.is_serviceable_on_day("monday"));
        assert!(zone.is_serviceable_on_day("Mon"));
        assert!(!zone.is_serviceable_on_day("friday"));
        // 2026-03-09 is a Monday
        let monday = NaiveDate::from_ymd_opt(2026, 3, 9).unwrap();
        assert!(zone.is_serviceable_on_day(monday));
        assert!(zone.is_serviceable_on_day("2026-03-11"));
        assert!(!zone.is_serviceable_on_day(monday + Duration::days(1)));
        assert!(!zone.is_serviceable_on_day("someday"));
        assert!(!zone.is_serviceable_on_day(9u8));
    }

    #[test]
    fn test_empty_day_set_serves_every_day() {
        let zone = Zone::new("z-6", "Always", "ALW");
        for day in 0u8..=6 {
            assert!(zone.is_serviceable_on_day(day));
        }
    }

    #[test]
    fn test_time_window_inclusive() {
        let zone = Zone::new("z-7", "Morning", "AM").with_service_window(time(5, 0, 0), time(9, 30, 0));

        assert!(zone.is_serviceable_at_time(Some(time(5, 0, 0))));
        assert!(zone.is_serviceable_at_time(Some(time(9, 30, 0))));
        assert!(zone.is_serviceable_at_time(Some(time(7, 15, 42))));
        assert!(!zone.is_serviceable_at_time(Some(time(4, 59, 59))));
        assert!(!zone.is_serviceable_at_time(Some(time(9, 30, 1))));

        let sub_second = NaiveTime::from_hms_milli_opt(9, 30, 0, 500).unwrap();
        assert!(zone.is_serviceable_at_time(Some(sub_second)));
    }

    #[test]
    fn test_no_window_is_unrestricted() {
        let zone = Zone::new("z-8", "Any", "ANY");
        assert!(zone.is_serviceable_at_time(None));
        assert!(zone.is_serviceable_at_time(Some(time(23, 59, 59))));
    }

    #[test]
    fn test_overnight_window_never_matches() {
        let zone = Zone::new("z-9", "Night", "NGT").with_service_window(time(22, 0, 0), time(2, 0, 0));
        assert!(!zone.is_serviceable_at_time(Some(time(23, 0, 0))));
        assert!(!zone.is_serviceable_at_time(Some(time(1, 0, 0))));
    }

    #[test]
    fn test_supports_vertical() {
        let open = Zone::new("z-10", "Open", "OPN");
        assert!(open.supports_vertical(Vertical::SocietyFresh));

        let daily = Zone::new("z-11", "Daily", "DLY").with_verticals([Vertical::DailyFresh]);
        assert!(daily.supports_vertical(Vertical::DailyFresh));
        assert!(!daily.supports_vertical(Vertical::SocietyFresh));
    }

    #[test]
    fn test_product_price_override() {
        let zone = Zone::new("z-12", "Priced", "PRC");
        let base = Money::from_paise(5600);

        assert_eq!(zone.product_price(base, None), Some(base));

        let cheaper = ZoneProductOverride {
            zone_id: "z-12".to_string(),
            product_id: "milk".to_string(),
            price: Some(Money::from_paise(5400)),
            is_available: true,
        };
        assert_eq!(zone.product_price(base, Some(&cheaper)), Some(Money::from_paise(5400)));

        let unavailable = ZoneProductOverride {
            is_available: false,
            ..cheaper.clone()
        };
        assert_eq!(zone.product_price(base, Some(&unavailable)), None);

        let other_zone = ZoneProductOverride {
            zone_id: "z-99".to_string(),
            ..unavailable
        };
        assert_eq!(zone.product_price(base, Some(&other_zone)), Some(base));
    }

    #[test]
    fn test_minimum_order() {
        let mut zone = Zone::new("z-13", "Min", "MIN");
        zone.min_order_amount = Money::from_rupees(100);
        assert!(zone.meets_minimum_order(Money::from_rupees(100)));
        assert!(!zone.meets_minimum_order(Money::from_paise(9999)));
    }

    #[test]
    fn test_parse_boundary_shapes() {
        let objects = json!([
            {"lat": 9.9, "lng": 76.2},
            {"lat": "9.95", "lng": "76.25"},
            {"lat": 10.0, "lng": 76.3}
        ]);
        let parsed = parse_boundary("z", &objects).unwrap();
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[1], GeoPoint::new(9.95, 76.25));

        let geojson = json!([[76.2, 9.9], [76.3, 10.0], [76.25, 9.95]]);
        let parsed = parse_boundary("z", &geojson).unwrap();
        assert_eq!(parsed[0], GeoPoint::new(9.9, 76.2));

        assert!(parse_boundary("z", &Value::Null).unwrap().is_empty());
        assert!(parse_boundary("z", &json!([])).unwrap().is_empty());
    }

    #[test]
    fn test_parse_boundary_rejects_corrupt_data() {
        let err = parse_boundary("z-bad", &json!([{"lat": "north", "lng": 76.2}])).unwrap_err();
        assert!(matches!(err, CoreError::MalformedGeometry { ref zone_id, .. } if zone_id == "z-bad"));

        assert!(parse_boundary("z", &json!({"lat": 1})).is_err());
        assert!(parse_boundary("z", &json!([[1.0, 2.0, 3.0]])).is_err());
    }

    #[test]
    fn test_override_effectiveness() {
        let now = Utc::now();
        let mut ov = ZoneOverride {
            id: "o-1".to_string(),
            zone_id: "z-1".to_string(),
            user_id: Some("u-1".to_string()),
            address_id: None,
            kind: ZoneOverrideKind::Allow,
            reason: None,
            expires_at: None,
            is_active: true,
            created_at: now,
        };
        assert!(ov.is_effective(now));

        ov.expires_at = Some(now + Duration::hours(1));
        assert!(ov.is_effective(now));

        ov.expires_at = Some(now - Duration::seconds(1));
        assert!(!ov.is_effective(now));

        ov.expires_at = None;
        ov.is_active = false;
        assert!(!ov.is_effective(now));
    }
}
