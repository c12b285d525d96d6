pub mod concession;
pub mod discount;

pub use concession::{
    ConcessionEffect, ConcessionEngine, ConcessionRecord, ConcessionRequest, ConcessionTerms,
    SupportingDocument,
};
pub use discount::{DiscountEngine, DiscountRecord, DiscountRequest, DiscountValue};

use crate::errors::{LedgerError, Result};
use crate::types::UserId;

/// audit identity check shared by discounts, concessions and refunds
pub(crate) fn require_actor(field: &'static str, actor: Option<&UserId>) -> Result<UserId> {
    match actor.map(|a| a.trim()) {
        Some(a) if !a.is_empty() => Ok(a.to_string()),
        _ => Err(LedgerError::validation(field, "an identified actor is required")),
    }
}

/// reasons are part of the audit trail; blank ones are rejected
pub(crate) fn require_reason(field: &'static str, reason: &str) -> Result<String> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(LedgerError::validation(field, "a reason is required"));
    }
    Ok(reason.to_string())
}
