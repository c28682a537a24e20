//! # Validation Module
//!
//! Input validation for catalog, directory and lending requests.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Engine entry point                                           │
//! │  └── THIS MODULE: trim, required, length, format, range                │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: Domain types                                                 │
//! │  └── LoanPeriod::new rejects non-positive / oversized values           │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── NOT NULL / CHECK constraints                                      │
//! │  ├── UNIQUE serial, UNIQUE student number                              │
//! │  └── Partial unique index: one open record per copy                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use crate::error::ValidationError;
use crate::money::Money;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

const MAX_NAME_LEN: usize = 200;
const MAX_SERIAL_LEN: usize = 64;
const MAX_REASON_LEN: usize = 500;

// =============================================================================
// String Validators
// =============================================================================

/// Trims `value` and checks it is non-empty and at most `max` characters.
///
/// Returns the trimmed string.
pub fn validate_text(field: &str, value: &str, max: usize) -> ValidationResult<String> {
    let value = value.trim();

    if value.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if value.chars().count() > max {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max,
        });
    }

    Ok(value.to_string())
}

/// Validates a display name (book title, author, category, student name).
///
/// ## Example
/// ```rust
/// use libris_core::validation::validate_name;
///
/// assert_eq!(validate_name("title", "  Dune ").unwrap(), "Dune");
/// assert!(validate_name("title", "").is_err());
/// ```
pub fn validate_name(field: &str, value: &str) -> ValidationResult<String> {
    validate_text(field, value, MAX_NAME_LEN)
}

/// Validates a copy serial or student number.
///
/// ## Rules
/// - Must not be empty
/// - At most 64 characters
/// - Letters, digits, hyphens, underscores, slashes and dots only
///
/// ## Example
/// ```rust
/// use libris_core::validation::validate_identifier;
///
/// assert!(validate_identifier("serial", "DUNE-0001").is_ok());
/// assert!(validate_identifier("serial", "has space").is_err());
/// ```
pub fn validate_identifier(field: &str, value: &str) -> ValidationResult<String> {
    let value = validate_text(field, value, MAX_SERIAL_LEN)?;

    if !value
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '/' | '.'))
    {
        return Err(ValidationError::InvalidFormat {
            field: field.to_string(),
            reason: "must contain only letters, numbers, hyphens, underscores, slashes and dots"
                .to_string(),
        });
    }

    Ok(value)
}

/// Validates a free-text reason (admin unblacklist, etc).
pub fn validate_reason(reason: &str) -> ValidationResult<String> {
    validate_text("reason", reason, MAX_REASON_LEN)
}

/// Validates an optional field; blank input becomes `None`.
pub fn validate_optional(field: &str, value: Option<&str>) -> ValidationResult<Option<String>> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(v) => validate_text(field, v, MAX_NAME_LEN).map(Some),
    }
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates a fine rate. Zero disables fines; negative rates are rejected.
pub fn validate_fine_rate(rate: Money) -> ValidationResult<()> {
    if rate.is_negative() {
        return Err(ValidationError::OutOfRange {
            field: "fine rate".to_string(),
            min: 0,
            max: i64::MAX,
        });
    }
    Ok(())
}

/// Validates the automatic blacklist window, 1..=365 days.
pub fn validate_blacklist_window_days(days: i64) -> ValidationResult<()> {
    if !(1..=365).contains(&days) {
        return Err(ValidationError::OutOfRange {
            field: "blacklist window days".to_string(),
            min: 1,
            max: 365,
        });
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name() {
        assert_eq!(validate_name("author", " Frank Herbert ").unwrap(), "Frank Herbert");
        assert!(validate_name("author", "   ").is_err());
        assert!(matches!(
            validate_name("author", &"a".repeat(201)),
            Err(ValidationError::TooLong { max: 200, .. })
        ));
    }

    #[test]
    fn test_validate_identifier() {
        assert!(validate_identifier("serial", "LIB/2024/0001").is_ok());
        assert!(validate_identifier("serial", "copy_7.b").is_ok());
        assert!(validate_identifier("serial", "").is_err());
        assert!(validate_identifier("serial", "a b").is_err());
        assert!(validate_identifier("serial", &"X".repeat(65)).is_err());
    }

    #[test]
    fn test_validate_optional() {
        assert_eq!(validate_optional("email", None).unwrap(), None);
        assert_eq!(validate_optional("email", Some("  ")).unwrap(), None);
        assert_eq!(
            validate_optional("email", Some(" a@b.c ")).unwrap(),
            Some("a@b.c".to_string())
        );
    }

    #[test]
    fn test_validate_reason() {
        assert!(validate_reason("paid fine").is_ok());
        assert!(validate_reason("").is_err());
        assert!(validate_reason(&"r".repeat(501)).is_err());
    }

    #[test]
    fn test_numeric_validators() {
        assert!(validate_fine_rate(Money::zero()).is_ok());
        assert!(validate_fine_rate(Money::from_cents(-1)).is_err());
        assert!(validate_blacklist_window_days(14).is_ok());
        assert!(validate_blacklist_window_days(0).is_err());
        assert!(validate_blacklist_window_days(366).is_err());
    }
}
