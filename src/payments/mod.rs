pub mod id;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::errors::{LedgerError, Result};
use crate::types::{PaymentGateway, PaymentMethod, PaymentStatus, UserId};

pub use id::PaymentIdGenerator;

/// payment request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub amount: Money,
    pub method: PaymentMethod,
    pub gateway: Option<PaymentGateway>,
    pub gateway_ref: Option<String>,
    pub reference: Option<String>,
    pub notes: Option<String>,
    pub received_by: Option<UserId>,
}

impl PaymentRequest {
    pub fn new(amount: Money, method: PaymentMethod) -> Self {
        Self {
            amount,
            method,
            gateway: None,
            gateway_ref: None,
            reference: None,
            notes: None,
            received_by: None,
        }
    }

    pub fn gateway(mut self, gateway: PaymentGateway, gateway_ref: impl Into<String>) -> Self {
        self.gateway = Some(gateway);
        self.gateway_ref = Some(gateway_ref.into());
        self
    }

    pub fn reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn received_by(mut self, user: impl Into<UserId>) -> Self {
        self.received_by = Some(user.into());
        self
    }
}

/// refund audit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefundRecord {
    pub refunded_by: UserId,
    pub reason: String,
    pub refunded_at: DateTime<Utc>,
}

/// one entry in the append-only payment log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub payment_id: String,
    pub amount: Money,
    pub method: PaymentMethod,
    pub gateway: Option<PaymentGateway>,
    pub gateway_ref: Option<String>,
    pub reference: Option<String>,
    pub notes: Option<String>,
    pub status: PaymentStatus,
    /// when the payment was recorded
    pub paid_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub received_by: Option<UserId>,
    pub failure_reason: Option<String>,
    pub refund: Option<RefundRecord>,
}

impl PaymentRecord {
    pub fn from_request(
        payment_id: String,
        request: &PaymentRequest,
        status: PaymentStatus,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            payment_id,
            amount: request.amount,
            method: request.method,
            gateway: request.gateway,
            gateway_ref: request.gateway_ref.clone(),
            reference: request.reference.clone(),
            notes: request.notes.clone(),
            status,
            paid_at: now,
            completed_at: (status == PaymentStatus::Completed).then_some(now),
            received_by: request.received_by.clone(),
            failure_reason: None,
            refund: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == PaymentStatus::Completed
    }

    /// move to `to`, rejecting transitions the payment lifecycle does not allow
    pub fn transition(&mut self, to: PaymentStatus, now: DateTime<Utc>) -> Result<()> {
        check_transition(&self.payment_id, self.status, to)?;
        if to == PaymentStatus::Completed {
            self.completed_at = Some(now);
        }
        self.status = to;
        Ok(())
    }
}

/// allowed payment lifecycle moves:
/// pending -> completed | failed | cancelled, completed -> refunded
pub fn check_transition(payment_id: &str, from: PaymentStatus, to: PaymentStatus) -> Result<()> {
    let allowed = matches!(
        (from, to),
        (PaymentStatus::Pending, PaymentStatus::Completed)
            | (PaymentStatus::Pending, PaymentStatus::Failed)
            | (PaymentStatus::Pending, PaymentStatus::Cancelled)
            | (PaymentStatus::Completed, PaymentStatus::Refunded)
    );
    if allowed {
        Ok(())
    } else {
        Err(LedgerError::InvalidPaymentTransition {
            payment_id: payment_id.to_string(),
            from,
            to,
        })
    }
}

/// amount must be positive and must not exceed what is still pending
pub fn validate_payment_amount(amount: Money, pending: Money) -> Result<()> {
    if !amount.is_positive() {
        return Err(LedgerError::validation(
            "payment.amount",
            format!("payment amount must be positive, got {}", amount),
        ));
    }
    if amount > pending {
        return Err(LedgerError::Overpayment {
            pending,
            attempted: amount,
        });
    }
    Ok(())
}

/// sum of completed payments; the only source of `paid_amount`
pub fn completed_total(payments: &[PaymentRecord]) -> Money {
    payments
        .iter()
        .filter(|p| p.is_completed())
        .map(|p| p.amount)
        .sum()
}
