//! # Error Types
//!
//! Domain-specific error types for freshtick-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  freshtick-core errors (this file)                                     │
//! │  ├── CoreError        - Domain rule violations                         │
//! │  │   ├── InvalidTransition / MissingProofOfDelivery / DriverRequired   │
//! │  │   │     → "precondition violations"                                 │
//! │  │   ├── NotServiceable    → "we don't deliver here yet"               │
//! │  │   ├── MalformedGeometry → corrupt zone boundary data                │
//! │  │   └── InvalidRecurrence → a rule that would never advance           │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  freshtick-db errors (separate crate)                                  │
//! │  └── DbError          - Database failures, version conflicts           │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → DbError → caller                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Core business logic errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    /// An operation was invoked from a state that does not permit it.
    ///
    /// ## When This Occurs
    /// - Assigning a driver to a delivered delivery
    /// - Pausing a cancelled subscription
    /// - Issuing a bottle that is already issued
    ///
    /// The entity is left untouched when this is returned.
    #[error("Invalid {entity} transition: cannot {operation} {entity} {id} while {from}")]
    InvalidTransition {
        entity: &'static str,
        id: String,
        from: String,
        operation: &'static str,
    },

    /// A delivery cannot be completed without a proof-of-delivery image,
    /// and a proof cannot be verified before one was captured.
    #[error("Delivery {delivery_id} has no proof of delivery image")]
    MissingProofOfDelivery { delivery_id: String },

    /// A delivery cannot leave the depot without an assigned driver.
    #[error("Delivery {delivery_id} has no driver assigned")]
    DriverRequired { delivery_id: String },

    /// No zone covers the address.
    ///
    /// User-facing "we don't deliver here yet", not a system fault.
    #[error("Not serviceable: no delivery zone covers pincode {pincode}")]
    NotServiceable { pincode: String },

    /// Stored zone boundary is corrupt (as opposed to merely absent).
    #[error("Zone {zone_id} has a malformed boundary: {reason}")]
    MalformedGeometry { zone_id: String, reason: String },

    /// A recurrence rule that cannot move forward in time.
    #[error("Invalid recurrence: {reason}")]
    InvalidRecurrence { reason: String },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    /// Creates an `InvalidTransition` error.
    pub fn invalid_transition(
        entity: &'static str,
        id: impl Into<String>,
        from: impl ToString,
        operation: &'static str,
    ) -> Self {
        CoreError::InvalidTransition {
            entity,
            id: id.into(),
            from: from.to_string(),
            operation,
        }
    }

    /// True for every error that reports "operation not allowed in the
    /// current state".
    pub fn is_precondition_violation(&self) -> bool {
        matches!(
            self,
            CoreError::InvalidTransition { .. }
                | CoreError::MissingProofOfDelivery { .. }
                | CoreError::DriverRequired { .. }
        )
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// These errors occur when input doesn't meet requirements.
/// Used for early validation before business logic runs.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: f64, max: f64 },

    /// Invalid format (e.g., invalid UUID, invalid pincode).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Two related values are in the wrong order.
    #[error("{first} must not be after {second}")]
    InvertedRange { first: String, second: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_transition_message() {
        let err = CoreError::invalid_transition("delivery", "d-1", "pending", "deliver");
        assert_eq!(
            err.to_string(),
            "Invalid delivery transition: cannot deliver delivery d-1 while pending"
        );
        assert!(err.is_precondition_violation());
    }

    #[test]
    fn test_not_serviceable_is_not_a_precondition_violation() {
        let err = CoreError::NotServiceable {
            pincode: "682509".to_string(),
        };
        assert!(!err.is_precondition_violation());
        assert_eq!(
            err.to_string(),
            "Not serviceable: no delivery zone covers pincode 682509"
        );
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::Required {
            field: "pincode".to_string(),
        };
        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }
}
