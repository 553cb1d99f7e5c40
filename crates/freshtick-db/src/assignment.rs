//! # Zone Assignment Service
//!
//! Loads an address, the usable zones and the overrides that could apply to
//! it, runs [`resolve_zone`], and records the result on the address.
//!
//! ```text
//! address ─┐
//! zones ───┼──► resolve_zone(now) ──► Some(zone) ─► write address.zone_id
//! overrides┘                          None       ─► leave address as is
//! ```

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::error::DbResult;
use crate::pool::Database;
use freshtick_core::{resolve_zone, CoreError, MatchMethod, Zone};

/// The zone an address resolved to, with how it matched.
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneAssignment {
    pub zone: Zone,
    pub method: MatchMethod,
}

#[derive(Debug, Clone)]
pub struct ZoneAssignmentService {
    db: Database,
}

impl ZoneAssignmentService {
    pub fn new(db: Database) -> Self {
        ZoneAssignmentService { db }
    }

    /// Resolves the zone for an address at `now`.
    ///
    /// When a zone is found and it differs from the stored one, the
    /// address's `zone_id` is updated. `None` means nothing serves the
    /// address; the stored zone is left untouched.
    pub async fn validate_address(
        &self,
        address_id: &str,
        now: DateTime<Utc>,
    ) -> DbResult<Option<ZoneAssignment>> {
        let address = self.db.addresses().require(address_id).await?;
        let zones = self.db.zones().list_usable().await?;
        let overrides = self
            .db
            .zones()
            .overrides_for(&address.user_id, &address.id)
            .await?;

        let Some(found) = resolve_zone(&address, &zones, &overrides, now) else {
            debug!(address_id = %address_id, pincode = %address.pincode, "No zone serves address");
            return Ok(None);
        };

        if address.zone_id.as_deref() != Some(found.zone.id.as_str()) {
            self.db.addresses().set_zone(&address.id, &found.zone.id).await?;
            info!(
                address_id = %address_id,
                zone_id = %found.zone.id,
                method = ?found.method,
                "Address assigned to zone"
            );
        }

        Ok(Some(ZoneAssignment {
            zone: found.zone.clone(),
            method: found.method,
        }))
    }

    /// Like [`validate_address`](Self::validate_address), but an unserved
    /// address is a `NotServiceable` error carrying its pincode.
    pub async fn require_zone(
        &self,
        address_id: &str,
        now: DateTime<Utc>,
    ) -> DbResult<ZoneAssignment> {
        match self.validate_address(address_id, now).await? {
            Some(assignment) => Ok(assignment),
            None => {
                let address = self.db.addresses().require(address_id).await?;
                Err(CoreError::NotServiceable {
                    pincode: address.pincode,
                }
                .into())
            }
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
