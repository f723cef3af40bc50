//! # Validation Module
//!
//! Input validation for every engine operation. These run before any
//! transaction is opened, so malformed input never takes a write lock.
//!
//! ## Usage
//! ```rust
//! use tendero_core::validation::{validate_quantity, validate_payment_amount};
//!
//! assert!(validate_quantity(5).is_ok());
//! assert!(validate_payment_amount(0).is_err());
//! ```

use crate::error::ValidationError;
use crate::types::PaymentMethod;
use crate::{MAX_ITEM_QUANTITY, MAX_PRICE_CENTS};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// String Validators
// =============================================================================

fn validate_text(field: &str, value: &str, max: usize) -> ValidationResult<()> {
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

    Ok(())
}

/// Validates a product name (1-200 characters).
pub fn validate_product_name(name: &str) -> ValidationResult<()> {
    validate_text("name", name, 200)
}

/// Validates a product category (1-100 characters).
pub fn validate_category(category: &str) -> ValidationResult<()> {
    validate_text("category", category, 100)
}

/// Validates a movement or cancellation reason (1-500 characters).
pub fn validate_reason(reason: &str) -> ValidationResult<()> {
    validate_text("reason", reason, 500)
}

/// Validates an idempotency key (1-128 characters when present).
pub fn validate_idempotency_key(key: Option<&str>) -> ValidationResult<()> {
    match key {
        Some(key) => validate_text("idempotency_key", key, 128),
        None => Ok(()),
    }
}

/// Validates a store or customer name (1-200 characters).
pub fn validate_display_name(name: &str) -> ValidationResult<()> {
    validate_text("name", name, 200)
}

fn validate_optional_text(field: &str, value: Option<&str>, max: usize) -> ValidationResult<()> {
    match value {
        Some(value) if value.trim().chars().count() > max => Err(ValidationError::TooLong {
            field: field.to_string(),
            max,
        }),
        _ => Ok(()),
    }
}

/// Validates free-text notes on a sale or payment (at most 500 characters).
pub fn validate_notes(notes: Option<&str>) -> ValidationResult<()> {
    validate_optional_text("notes", notes, 500)
}

/// Validates a phone number (at most 40 characters).
pub fn validate_phone(phone: Option<&str>) -> ValidationResult<()> {
    validate_optional_text("phone", phone, 40)
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates a quantity value.
///
/// ## Rules
/// - Must be positive (> 0)
/// - Must not exceed MAX_ITEM_QUANTITY
pub fn validate_quantity(qty: i64) -> ValidationResult<()> {
    if qty <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }

    if qty > MAX_ITEM_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: 1,
            max: MAX_ITEM_QUANTITY,
        });
    }

    Ok(())
}

/// Validates a price, cost or tax amount in cents. Zero is allowed (free
/// items); the upper bound is [`MAX_PRICE_CENTS`].
///
/// ```rust
/// use tendero_core::validation::validate_price_cents;
///
/// assert!(validate_price_cents("price", 0).is_ok());
/// assert!(validate_price_cents("price", -100).is_err());
/// assert!(validate_price_cents("price", i64::MAX).is_err());
/// ```
pub fn validate_price_cents(field: &str, cents: i64) -> ValidationResult<()> {
    if cents < 0 {
        return Err(ValidationError::MustNotBeNegative {
            field: field.to_string(),
        });
    }

    if cents > MAX_PRICE_CENTS {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            min: 0,
            max: MAX_PRICE_CENTS,
        });
    }

    Ok(())
}

/// Validates a payment amount in cents. Must be strictly positive.
pub fn validate_payment_amount(cents: i64) -> ValidationResult<()> {
    if cents <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "payment amount".to_string(),
        });
    }

    Ok(())
}

/// Validates the method used to pay into a credit account.
///
/// A credit payment cannot itself be deferred.
pub fn validate_credit_payment_method(method: PaymentMethod) -> ValidationResult<()> {
    if method == PaymentMethod::Deferred {
        return Err(ValidationError::InvalidFormat {
            field: "method".to_string(),
            reason: "credit payments must be cash, card or transfer".to_string(),
        });
    }

    Ok(())
}

/// Validates a tax rate in basis points (0% to 100%).
pub fn validate_tax_rate_bps(bps: i64) -> ValidationResult<()> {
    if !(0..=10000).contains(&bps) {
        return Err(ValidationError::OutOfRange {
            field: "tax_rate".to_string(),
            min: 0,
            max: 10000,
        });
    }

    Ok(())
}

// =============================================================================
// UUID Validators
// =============================================================================

/// Validates a UUID string.
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
