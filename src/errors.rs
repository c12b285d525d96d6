use thiserror::Error;

use crate::decimal::Money;
use crate::types::{FeeId, LedgerKey, PaymentStatus};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    #[error("validation failed on {field}: {message}")]
    Validation {
        field: &'static str,
        message: String,
    },

    #[error("overpayment: pending {pending}, attempted {attempted}")]
    Overpayment {
        pending: Money,
        attempted: Money,
    },

    #[error("fee ledger already exists for {key}")]
    DuplicateLedger {
        key: LedgerKey,
    },

    #[error("concurrent modification of fee {fee_id}: expected version {expected}, found {found}")]
    ConcurrentModification {
        fee_id: FeeId,
        expected: u64,
        found: u64,
    },

    #[error("payment id {payment_id} already belongs to fee {owner}")]
    DuplicatePaymentId {
        payment_id: String,
        owner: FeeId,
    },

    #[error("irreversible state: {message}")]
    IrreversibleState {
        message: String,
    },

    #[error("fee not found: {fee_id}")]
    FeeNotFound {
        fee_id: FeeId,
    },

    #[error("payment not found: {payment_id}")]
    PaymentNotFound {
        payment_id: String,
    },

    #[error("invalid payment transition for {payment_id}: {from:?} -> {to:?}")]
    InvalidPaymentTransition {
        payment_id: String,
        from: PaymentStatus,
        to: PaymentStatus,
    },

    #[error("could not allocate a unique payment id after {attempts} attempts")]
    PaymentIdExhausted {
        attempts: u32,
    },

    #[error("invalid configuration: {message}")]
    InvalidConfiguration {
        message: String,
    },
}

impl LedgerError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        LedgerError::Validation {
            field,
            message: message.into(),
        }
    }

    /// whether the caller should re-run the read-modify-write
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LedgerError::ConcurrentModification { .. } | LedgerError::DuplicatePaymentId { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
