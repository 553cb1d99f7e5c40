//! # Validation Module
//!
//! Input validation for data that enters the delivery core.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Web request validation (outside this workspace)              │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE - rules the core relies on                       │
//! │  ├── pincode shape, coordinate ranges                                  │
//! │  └── vacation windows, weekday indexes, bottle numbers                 │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── UNIQUE (bottle_number), UNIQUE (subscription_id, delivery_date)   │
//! │  └── Foreign keys                                                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::NaiveDate;

use crate::error::ValidationError;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// Pincode
// =============================================================================

/// Strips every whitespace character from a pincode.
///
/// ```rust
/// use freshtick_core::validation::normalize_pincode;
///
/// assert_eq!(normalize_pincode(" 682 509 "), "682509");
/// ```
pub fn normalize_pincode(pincode: &str) -> String {
    pincode.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Validates an Indian postal code and returns it normalized.
///
/// ## Rules
/// - Whitespace is ignored
/// - Exactly 6 ASCII digits remain
pub fn validate_pincode(pincode: &str) -> ValidationResult<String> {
    let normalized = normalize_pincode(pincode);

    if normalized.is_empty() {
        return Err(ValidationError::Required {
            field: "pincode".to_string(),
        });
    }

    if normalized.len() != 6 || !normalized.chars().all(|c| c.is_ascii_digit()) {
        return Err(ValidationError::InvalidFormat {
            field: "pincode".to_string(),
            reason: "must be 6 digits".to_string(),
        });
    }

    Ok(normalized)
}

// =============================================================================
// Coordinates
// =============================================================================

/// Validates a latitude/longitude pair.
pub fn validate_coordinates(lat: f64, lng: f64) -> ValidationResult<()> {
    if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
        return Err(ValidationError::OutOfRange {
            field: "latitude".to_string(),
            min: -90.0,
            max: 90.0,
        });
    }

    if !lng.is_finite() || !(-180.0..=180.0).contains(&lng) {
        return Err(ValidationError::OutOfRange {
            field: "longitude".to_string(),
            min: -180.0,
            max: 180.0,
        });
    }

    Ok(())
}

// =============================================================================
// Schedules
// =============================================================================

/// Validates a vacation window. Single-day windows are allowed.
pub fn validate_vacation_window(start: NaiveDate, end: NaiveDate) -> ValidationResult<()> {
    if start > end {
        return Err(ValidationError::InvertedRange {
            first: "vacation_start".to_string(),
            second: "vacation_end".to_string(),
        });
    }
    Ok(())
}

/// Validates a weekday index (0 = Sunday .. 6 = Saturday).
pub fn validate_weekday_index(day: u8) -> ValidationResult<()> {
    if day > 6 {
        return Err(ValidationError::OutOfRange {
            field: "service_day".to_string(),
            min: 0.0,
            max: 6.0,
        });
    }
    Ok(())
}

// =============================================================================
// Bottles
// =============================================================================

/// Validates a bottle number (printed on the bottle, scanned by drivers).
///
/// ## Rules
/// - 1 to 32 characters
/// - Letters, digits and hyphens only
pub fn validate_bottle_number(number: &str) -> ValidationResult<()> {
    let number = number.trim();

    if number.is_empty() {
        return Err(ValidationError::Required {
            field: "bottle_number".to_string(),
        });
    }

    if number.len() > 32 {
        return Err(ValidationError::TooLong {
            field: "bottle_number".to_string(),
            max: 32,
        });
    }

    if !number.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(ValidationError::InvalidFormat {
            field: "bottle_number".to_string(),
            reason: "must contain only letters, digits and hyphens".to_string(),
        });
    }

    Ok(())
}

// =============================================================================
// UUID
// =============================================================================

/// Validates a UUID string format.
pub fn validate_uuid(field: &str, id: &str) -> ValidationResult<()> {
    if id.trim().is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    uuid::Uuid::parse_str(id).map_err(|_| ValidationError::InvalidFormat {
        field: field.to_string(),
        reason: "must be a valid UUID".to_string(),
    })?;

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_pincode() {
        assert_eq!(validate_pincode("682509").unwrap(), "682509");
        assert_eq!(validate_pincode(" 682 509 ").unwrap(), "682509");
        assert!(validate_pincode("").is_err());
        assert!(validate_pincode("68250").is_err());
        assert!(validate_pincode("68250A").is_err());
    }

    #[test]
    fn test_validate_coordinates() {
        assert!(validate_coordinates(9.98, 76.28).is_ok());
        assert!(validate_coordinates(91.0, 0.0).is_err());
        assert!(validate_coordinates(0.0, -181.0).is_err());
        assert!(validate_coordinates(f64::NAN, 0.0).is_err());
    }

    #[test]
    fn test_validate_vacation_window() {
        let d = |day| NaiveDate::from_ymd_opt(2026, 5, day).unwrap();
        assert!(validate_vacation_window(d(1), d(1)).is_ok());
        assert!(validate_vacation_window(d(1), d(5)).is_ok());
        assert!(validate_vacation_window(d(5), d(1)).is_err());
    }

    #[test]
    fn test_validate_weekday_index() {
        assert!(validate_weekday_index(0).is_ok());
        assert!(validate_weekday_index(6).is_ok());
        assert!(validate_weekday_index(7).is_err());
    }

    #[test]
    fn test_validate_bottle_number() {
        assert!(validate_bottle_number("BTL-000123").is_ok());
        assert!(validate_bottle_number("").is_err());
        assert!(validate_bottle_number("BTL 1").is_err());
        assert!(validate_bottle_number(&"B".repeat(40)).is_err());
    }

    #[test]
    fn test_validate_uuid() {
        assert!(validate_uuid("id", "550e8400-e29b-41d4-a716-446655440000").is_ok());
        assert!(validate_uuid("id", "").is_err());
        assert!(validate_uuid("id", "not-a-uuid").is_err());
    }
}
