use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::types::FeeStatus;

/// derived balances and status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedState {
    pub status: FeeStatus,
    pub paid_amount: Money,
    pub pending_amount: Money,
    pub overdue_amount: Money,
}

/// paid in full, then unpaid and late, then unpaid, then partial
pub fn derive_status(
    paid: Money,
    final_amount: Money,
    due: DateTime<Utc>,
    now: DateTime<Utc>,
) -> FeeStatus {
    if paid >= final_amount {
        FeeStatus::Paid
    } else if paid.is_zero() && now > due {
        FeeStatus::Overdue
    } else if paid.is_zero() {
        FeeStatus::Pending
    } else {
        FeeStatus::Partial
    }
}

/// status plus the cached balances that follow from it
pub fn derive(paid: Money, final_amount: Money, due: DateTime<Utc>, now: DateTime<Utc>) -> DerivedState {
    let status = derive_status(paid, final_amount, due, now);
    let pending_amount = if status == FeeStatus::Paid {
        Money::ZERO
    } else {
        final_amount.saturating_sub(paid)
    };
    let overdue_amount = if status == FeeStatus::Overdue {
        pending_amount
    } else {
        Money::ZERO
    };

    DerivedState {
        status,
        paid_amount: paid,
        pending_amount,
        overdue_amount,
    }
}

/// balance outstanding after the due date, whatever the status says
pub fn is_past_due(pending: Money, due: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    pending.is_positive() && now > due
}
