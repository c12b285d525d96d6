use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::amount::FeeAmount;
use crate::decimal::{Money, Rate};
use crate::errors::{LedgerError, Result};
use crate::types::{DiscountKind, UserId};

use super::require_actor;

/// how a discount is expressed by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountValue {
    /// share of `amount.original`, snapshotted when applied
    Percentage(Rate),
    FixedAmount(Money),
}

/// discount request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscountRequest {
    pub kind: DiscountKind,
    pub name: String,
    pub value: DiscountValue,
    pub applied_by: Option<UserId>,
    pub reason: Option<String>,
}

impl DiscountRequest {
    pub fn percentage(kind: DiscountKind, name: impl Into<String>, percentage: Decimal) -> Self {
        Self {
            kind,
            name: name.into(),
            value: DiscountValue::Percentage(Rate::from_percentage_decimal(percentage)),
            applied_by: None,
            reason: None,
        }
    }

    pub fn fixed(kind: DiscountKind, name: impl Into<String>, amount: Money) -> Self {
        Self {
            kind,
            name: name.into(),
            value: DiscountValue::FixedAmount(amount),
            applied_by: None,
            reason: None,
        }
    }

    pub fn applied_by(mut self, user: impl Into<UserId>) -> Self {
        self.applied_by = Some(user.into());
        self
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// applied discount; `amount` is frozen at application time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscountRecord {
    pub kind: DiscountKind,
    pub name: String,
    pub percentage: Option<Rate>,
    pub fixed_amount: Option<Money>,
    /// resolved amount added to `amount.discount`
    pub amount: Money,
    pub applied_at: DateTime<Utc>,
    pub applied_by: UserId,
    pub reason: Option<String>,
}

/// resolves and validates discounts against the current amount
pub struct DiscountEngine;

impl DiscountEngine {
    /// resolve the discount amount: the fixed amount, or percentage × original
    pub fn resolve(value: DiscountValue, original: Money) -> Result<Money> {
        match value {
            DiscountValue::FixedAmount(amount) => {
                if !amount.is_positive() {
                    return Err(LedgerError::validation(
                        "discount.fixed_amount",
                        format!("discount amount must be positive, got {}", amount),
                    ));
                }
                Ok(amount)
            }
            DiscountValue::Percentage(rate) => {
                let pct = rate.as_percentage();
                if pct <= Decimal::ZERO || pct > Decimal::from(100) {
                    return Err(LedgerError::validation(
                        "discount.percentage",
                        format!("discount percentage must be within (0, 100], got {}", pct),
                    ));
                }
                Ok(original.percentage(rate))
            }
        }
    }

    /// build the audit record; rejects discounts larger than what is still owed
    pub fn prepare(
        request: &DiscountRequest,
        amount: &FeeAmount,
        pending: Money,
        now: DateTime<Utc>,
    ) -> Result<DiscountRecord> {
        let name = request.name.trim();
        if name.is_empty() {
            return Err(LedgerError::validation("discount.name", "discount name is required"));
        }
        let applied_by = require_actor("discount.applied_by", request.applied_by.as_ref())?;
        let resolved = Self::resolve(request.value, amount.original)?;

        if resolved > pending {
            return Err(LedgerError::validation(
                "discount.amount",
                format!("discount {} exceeds pending amount {}", resolved, pending),
            ));
        }

        let (percentage, fixed_amount) = match request.value {
            DiscountValue::Percentage(rate) => (Some(rate), None),
            DiscountValue::FixedAmount(money) => (None, Some(money)),
        };

        Ok(DiscountRecord {
            kind: request.kind,
            name: name.to_string(),
            percentage,
            fixed_amount,
            amount: resolved,
            applied_at: now,
            applied_by,
            reason: request.reason.clone(),
        })
    }
}
