use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::errors::{LedgerError, Result};

/// original/discount/tax/final amounts; `final = max(0, original - discount + tax)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeAmount {
    pub original: Money,
    pub discount: Money,
    pub tax: Money,
    #[serde(rename = "final")]
    pub final_amount: Money,
}

impl FeeAmount {
    /// create with no discount applied
    pub fn new(original: Money, tax: Money) -> Result<Self> {
        if original.is_negative() {
            return Err(LedgerError::validation("amount.original", "amount cannot be negative"));
        }
        if tax.is_negative() {
            return Err(LedgerError::validation("amount.tax", "tax cannot be negative"));
        }

        let mut amount = Self {
            original,
            discount: Money::ZERO,
            tax,
            final_amount: Money::ZERO,
        };
        amount.recompute();
        Ok(amount)
    }

    /// final = max(0, original - discount + tax)
    pub fn recompute(&mut self) {
        self.final_amount = compute_final(self.original, self.discount, self.tax);
    }

    /// add to the cumulative discount and recompute
    pub fn add_discount(&mut self, amount: Money) {
        self.discount += amount;
        self.recompute();
    }

    /// final amount if `extra` discount were applied, without mutating
    pub fn final_with_discount(&self, extra: Money) -> Money {
        compute_final(self.original, self.discount + extra, self.tax)
    }
}

/// pure final-amount computation
pub fn compute_final(original: Money, discount: Money, tax: Money) -> Money {
    (original - discount + tax).max(Money::ZERO)
}
