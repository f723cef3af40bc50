//! # Cart Totals
//!
//! Recomputes a submitted cart and checks it against the totals the client
//! sent. The engine trusts nothing but the line items.
//!
//! ```text
//! lines ──► Σ quantity × unit_price ──► subtotal ──┐
//!                                                  ├─► compare with client
//! client tax (≥ 0) ───────────────────────────────┤   subtotal / total
//!                                                  │
//!                         subtotal + tax ──► total ┘
//! ```

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::Money;
use crate::types::TaxRate;
use crate::validation::{validate_price_cents, validate_quantity};
use crate::MAX_CART_ITEMS;

/// One requested line of a cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CartLine {
    pub product_id: String,
    pub quantity: i64,
    pub unit_price_cents: i64,
}

impl CartLine {
    pub fn new(product_id: impl Into<String>, quantity: i64, unit_price_cents: i64) -> Self {
        CartLine {
            product_id: product_id.into(),
            quantity,
            unit_price_cents,
        }
    }

    #[inline]
    pub fn line_subtotal(&self) -> Money {
        Money::from_cents(self.unit_price_cents).multiply_quantity(self.quantity)
    }
}

/// Totals of a cart, all in cents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CartTotals {
    pub subtotal_cents: i64,
    pub tax_cents: i64,
    pub total_cents: i64,
}

impl CartTotals {
    /// Computes totals for `lines` at a single tax rate.
    ///
    /// Used by clients to build a cart the engine will accept.
    ///
    /// ```rust
    /// use tendero_core::cart::{CartLine, CartTotals};
    /// use tendero_core::types::TaxRate;
    ///
    /// let lines = [CartLine::new("a", 2, 2500), CartLine::new("b", 1, 3000)];
    /// let totals = CartTotals::compute(&lines, TaxRate::from_bps(1500));
    /// assert_eq!((totals.subtotal_cents, totals.tax_cents, totals.total_cents), (8000, 1200, 9200));
    /// ```
    pub fn compute(lines: &[CartLine], rate: TaxRate) -> Self {
        let subtotal: Money = lines.iter().map(CartLine::line_subtotal).sum();
        let tax = subtotal.calculate_tax(rate);
        CartTotals {
            subtotal_cents: subtotal.cents(),
            tax_cents: tax.cents(),
            total_cents: (subtotal + tax).cents(),
        }
    }

    #[inline]
    pub fn total(&self) -> Money {
        Money::from_cents(self.total_cents)
    }
}

/// Validates a submitted cart and returns the recomputed totals.
///
/// ## Rules
/// - At least one line, at most [`MAX_CART_ITEMS`]
/// - Every quantity positive, every unit price non-negative
/// - Tax non-negative
/// - `subtotal == Σ line subtotals`
/// - `total == subtotal + tax`
pub fn validate_cart(lines: &[CartLine], supplied: &CartTotals) -> CoreResult<CartTotals> {
    if lines.is_empty() {
        return Err(CoreError::EmptyCart);
    }

    if lines.len() > MAX_CART_ITEMS {
        return Err(CoreError::CartTooLarge {
            max: MAX_CART_ITEMS,
        });
    }

    for line in lines {
        if line.product_id.trim().is_empty() {
            return Err(ValidationError::Required {
                field: "product_id".to_string(),
            }
            .into());
        }
        validate_quantity(line.quantity)?;
        validate_price_cents("unit_price", line.unit_price_cents)?;
    }

    validate_price_cents("tax", supplied.tax_cents)?;

    let subtotal = lines
        .iter()
        .try_fold(Money::zero(), |acc, line| {
            Money::from_cents(line.unit_price_cents)
                .checked_multiply_quantity(line.quantity)
                .and_then(|amount| acc.checked_add(amount))
        })
        .ok_or_else(|| out_of_range("subtotal"))?;
    if subtotal.cents() != supplied.subtotal_cents {
        return Err(CoreError::TotalsMismatch {
            field: "subtotal",
            expected: subtotal.cents(),
            supplied: supplied.subtotal_cents,
        });
    }

    let expected_total = subtotal
        .checked_add(Money::from_cents(supplied.tax_cents))
        .ok_or_else(|| out_of_range("total"))?
        .cents();
    if expected_total != supplied.total_cents {
        return Err(CoreError::TotalsMismatch {
            field: "total",
            expected: expected_total,
            supplied: supplied.total_cents,
        });
    }

    Ok(CartTotals {
        subtotal_cents: subtotal.cents(),
        tax_cents: supplied.tax_cents,
        total_cents: expected_total,
    })
}

fn out_of_range(field: &str) -> CoreError {
    ValidationError::OutOfRange {
        field: field.to_string(),
        min: 0,
        max: i64::MAX,
    }
    .into()
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn example_lines() -> Vec<CartLine> {
        vec![CartLine::new("a", 2, 2500), CartLine::new("b", 1, 3000)]
    }

    #[test]
    fn test_two_lines_at_fifteen_percent() {
        let totals = CartTotals::compute(&example_lines(), TaxRate::from_bps(1500));
        assert_eq!(totals.subtotal_cents, 8000);
        assert_eq!(totals.tax_cents, 1200);
        assert_eq!(totals.total_cents, 9200);

        let validated = validate_cart(&example_lines(), &totals).unwrap();
        assert_eq!(validated, totals);
    }

    #[test]
    fn test_rejects_empty_cart() {
        let totals = CartTotals {
            subtotal_cents: 0,
            tax_cents: 0,
            total_cents: 0,
        };
        assert!(matches!(validate_cart(&[], &totals), Err(CoreError::EmptyCart)));
    }

    #[test]
    fn test_rejects_non_positive_quantity() {
        let lines = vec![CartLine::new("a", 0, 2500)];
        let totals = CartTotals {
            subtotal_cents: 0,
            tax_cents: 0,
            total_cents: 0,
        };
        assert!(matches!(
            validate_cart(&lines, &totals),
            Err(CoreError::Validation(ValidationError::MustBePositive { .. }))
        ));
    }

    #[test]
    fn test_rejects_tampered_total() {
        let totals = CartTotals {
            subtotal_cents: 8000,
            tax_cents: 1200,
            total_cents: 9100,
        };
        let err = validate_cart(&example_lines(), &totals).unwrap_err();
        assert!(matches!(
            err,
            CoreError::TotalsMismatch {
                field: "total",
                expected: 9200,
                supplied: 9100
            }
        ));
    }

    #[test]
    fn test_rejects_tampered_subtotal() {
        let totals = CartTotals {
            subtotal_cents: 7000,
            tax_cents: 1050,
            total_cents: 8050,
        };
        assert!(matches!(
            validate_cart(&example_lines(), &totals),
            Err(CoreError::TotalsMismatch { field: "subtotal", .. })
        ));
    }

    #[test]
    fn test_rejects_huge_unit_price() {
        let lines = vec![CartLine::new("a", 3, i64::MAX / 2)];
        let totals = CartTotals {
            subtotal_cents: 0,
            tax_cents: 0,
            total_cents: 0,
        };
        assert!(matches!(
            validate_cart(&lines, &totals),
            Err(CoreError::Validation(ValidationError::OutOfRange { .. }))
        ));
    }

    #[test]
    fn test_rejects_huge_tax() {
        let totals = CartTotals {
            subtotal_cents: 8000,
            tax_cents: i64::MAX,
            total_cents: i64::MIN,
        };
        assert!(matches!(
            validate_cart(&example_lines(), &totals),
            Err(CoreError::Validation(ValidationError::OutOfRange { .. }))
        ));
    }

    #[test]
    fn test_largest_cart_does_not_overflow() {
        let lines: Vec<_> = (0..MAX_CART_ITEMS)
            .map(|i| CartLine::new(format!("p{i}"), crate::MAX_ITEM_QUANTITY, crate::MAX_PRICE_CENTS))
            .collect();
        let subtotal = MAX_CART_ITEMS as i64 * crate::MAX_ITEM_QUANTITY * crate::MAX_PRICE_CENTS;
        let totals = CartTotals {
            subtotal_cents: subtotal,
            tax_cents: crate::MAX_PRICE_CENTS,
            total_cents: subtotal + crate::MAX_PRICE_CENTS,
        };
        assert_eq!(validate_cart(&lines, &totals).unwrap(), totals);
    }

    #[test]
    fn test_rejects_negative_tax() {
        let totals = CartTotals {
            subtotal_cents: 8000,
            tax_cents: -100,
            total_cents: 7900,
        };
        assert!(validate_cart(&example_lines(), &totals).is_err());
    }
}
