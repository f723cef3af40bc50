//! # Error Types
//!
//! Domain-specific error types for tendero-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  tendero-core errors (this file)                                       │
//! │  ├── CoreError        - Business rule violations                       │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  tendero-db errors                                                     │
//! │  └── DbError          - Database operation failures                    │
//! │                                                                         │
//! │  tendero-engine errors                                                 │
//! │  └── EngineError      - What callers see (kind + message)              │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → EngineError → Caller              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Business rule violations detected without touching storage.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A cart was submitted with no lines.
    #[error("Cart is empty")]
    EmptyCart,

    /// Cart has exceeded maximum allowed lines.
    #[error("Cart cannot have more than {max} lines")]
    CartTooLarge { max: usize },

    /// Client-supplied totals disagree with the totals recomputed from the lines.
    ///
    /// ## User Workflow
    /// ```text
    /// Client sends subtotal=8000, tax=1200, total=9300
    ///      │
    ///      ▼
    /// Recompute: subtotal + tax = 9200
    ///      │
    ///      ▼
    /// TotalsMismatch { field: "total", expected: 9200, supplied: 9300 }
    /// ```
    #[error("{field} mismatch: expected {expected}, supplied {supplied}")]
    TotalsMismatch {
        field: &'static str,
        expected: i64,
        supplied: i64,
    },

    /// Deferred payment needs a customer to charge.
    #[error("Deferred payment requires a customer")]
    DeferredWithoutCustomer,

    /// A state machine transition that the transition table forbids.
    ///
    /// ## When This Occurs
    /// - Confirming an order that was already confirmed or rejected
    /// - Rejecting a point-of-sale sale (only online orders are pending)
    /// - Paying into a closed credit account
    #[error("{entity} {id} is {from}, cannot {action}")]
    InvalidTransition {
        entity: &'static str,
        id: String,
        from: String,
        action: &'static str,
    },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Value must not be negative.
    #[error("{field} must not be negative")]
    MustNotBeNegative { field: String },

    /// Invalid format (e.g., invalid UUID).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::TotalsMismatch {
            field: "total",
            expected: 9200,
            supplied: 9300,
        };
        assert_eq!(err.to_string(), "total mismatch: expected 9200, supplied 9300");

        let err = CoreError::InvalidTransition {
            entity: "Order",
            id: "abc".to_string(),
            from: "cancelled".to_string(),
            action: "confirm",
        };
        assert_eq!(err.to_string(), "Order abc is cancelled, cannot confirm");
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::MustBePositive {
            field: "quantity".to_string(),
        };
        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
        assert_eq!(
            core_err.to_string(),
            "Validation error: quantity must be positive"
        );
    }
}
