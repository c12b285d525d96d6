use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::errors::{LedgerError, Result};
use crate::types::{ConcessionKind, UserId};

use super::{require_actor, require_reason};

/// concession terms as requested by an approver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConcessionTerms {
    PartialWaiver { amount: Money },
    /// waive everything still pending
    FullWaiver,
    /// move the next unpaid due date to a later date
    InstallmentExtension { new_due_date: DateTime<Utc> },
    /// stop late fees on this ledger
    LateFeeWaiver,
}

impl ConcessionTerms {
    pub fn kind(&self) -> ConcessionKind {
        match self {
            ConcessionTerms::PartialWaiver { .. } => ConcessionKind::PartialWaiver,
            ConcessionTerms::FullWaiver => ConcessionKind::FullWaiver,
            ConcessionTerms::InstallmentExtension { .. } => ConcessionKind::InstallmentExtension,
            ConcessionTerms::LateFeeWaiver => ConcessionKind::LateFeeWaiver,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportingDocument {
    pub name: String,
    pub url: String,
    pub doc_type: Option<String>,
}

/// concession request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConcessionRequest {
    pub terms: ConcessionTerms,
    pub approved_by: Option<UserId>,
    pub reason: String,
    #[serde(default)]
    pub documents: Vec<SupportingDocument>,
}

impl ConcessionRequest {
    pub fn new(terms: ConcessionTerms, reason: impl Into<String>) -> Self {
        Self {
            terms,
            approved_by: None,
            reason: reason.into(),
            documents: Vec::new(),
        }
    }

    pub fn approved_by(mut self, user: impl Into<UserId>) -> Self {
        self.approved_by = Some(user.into());
        self
    }

    pub fn document(mut self, document: SupportingDocument) -> Self {
        self.documents.push(document);
        self
    }
}

/// applied concession, immutable once recorded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConcessionRecord {
    pub kind: ConcessionKind,
    /// amount waived; zero for extensions and late-fee waivers
    pub amount: Money,
    pub new_due_date: Option<DateTime<Utc>>,
    pub reason: String,
    pub approved_by: UserId,
    pub approved_at: DateTime<Utc>,
    pub documents: Vec<SupportingDocument>,
}

/// what the ledger must do to honour a concession
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcessionEffect {
    Reduce(Money),
    ExtendDueDate(DateTime<Utc>),
    WaiveLateFee,
}

pub struct ConcessionEngine;

impl ConcessionEngine {
    /// validate a request against current ledger state
    pub fn prepare(
        request: &ConcessionRequest,
        pending: Money,
        current_due: DateTime<Utc>,
        late_fee_waived: bool,
        now: DateTime<Utc>,
    ) -> Result<(ConcessionRecord, ConcessionEffect)> {
        let approved_by = require_actor("concession.approved_by", request.approved_by.as_ref())?;
        let reason = require_reason("concession.reason", &request.reason)?;

        let (amount, new_due_date, effect) = match request.terms {
            ConcessionTerms::PartialWaiver { amount } => {
                if !amount.is_positive() {
                    return Err(LedgerError::validation(
                        "concession.amount",
                        format!("waiver amount must be positive, got {}", amount),
                    ));
                }
                if amount > pending {
                    return Err(LedgerError::validation(
                        "concession.amount",
                        format!("waiver {} exceeds pending amount {}", amount, pending),
                    ));
                }
                (amount, None, ConcessionEffect::Reduce(amount))
            }
            ConcessionTerms::FullWaiver => {
                if pending.is_zero() {
                    return Err(LedgerError::validation("concession.kind", "nothing pending to waive"));
                }
                (pending, None, ConcessionEffect::Reduce(pending))
            }
            ConcessionTerms::InstallmentExtension { new_due_date } => {
                if new_due_date <= current_due {
                    return Err(LedgerError::validation(
                        "concession.new_due_date",
                        format!("extension must move due date past {}", current_due.date_naive()),
                    ));
                }
                (Money::ZERO, Some(new_due_date), ConcessionEffect::ExtendDueDate(new_due_date))
            }
            ConcessionTerms::LateFeeWaiver => {
                if late_fee_waived {
                    return Err(LedgerError::validation("concession.kind", "late fee already waived"));
                }
                (Money::ZERO, None, ConcessionEffect::WaiveLateFee)
            }
        };

        let record = ConcessionRecord {
            kind: request.terms.kind(),
            amount,
            new_due_date,
            reason,
            approved_by,
            approved_at: now,
            documents: request.documents.clone(),
        };

        Ok((record, effect))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_missing_approver_rejected() {
        let request = ConcessionRequest::new(ConcessionTerms::LateFeeWaiver, "medical");
        let err = ConcessionEngine::prepare(&request, Money::from_major(100), now(), false, now())
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation { field: "concession.approved_by", .. }));
    }

    #[test]
    fn test_full_waiver_covers_pending() {
        let request = ConcessionRequest::new(ConcessionTerms::FullWaiver, "orphan support")
            .approved_by("principal");
        let (record, effect) =
            ConcessionEngine::prepare(&request, Money::from_major(4_200), now(), false, now()).unwrap();
        assert_eq!(record.amount, Money::from_major(4_200));
        assert_eq!(effect, ConcessionEffect::Reduce(Money::from_major(4_200)));
        assert_eq!(record.kind, ConcessionKind::FullWaiver);
    }

    #[test]
    fn test_partial_waiver_bounds() {
        let over = ConcessionRequest::new(
            ConcessionTerms::PartialWaiver { amount: Money::from_major(501) },
            "hardship",
        )
        .approved_by("principal");
        assert!(ConcessionEngine::prepare(&over, Money::from_major(500), now(), false, now()).is_err());

        let zero = ConcessionRequest::new(ConcessionTerms::PartialWaiver { amount: Money::ZERO }, "hardship")
            .approved_by("principal");
        assert!(ConcessionEngine::prepare(&zero, Money::from_major(500), now(), false, now()).is_err());
    }

    #[test]
    fn test_extension_must_move_forward() {
        let due = now();
        let back = ConcessionRequest::new(
            ConcessionTerms::InstallmentExtension { new_due_date: due - Duration::days(1) },
            "travel",
        )
        .approved_by("registrar");
        assert!(ConcessionEngine::prepare(&back, Money::from_major(100), due, false, now()).is_err());

        let forward = ConcessionRequest::new(
            ConcessionTerms::InstallmentExtension { new_due_date: due + Duration::days(14) },
            "travel",
        )
        .approved_by("registrar");
        let (record, effect) =
            ConcessionEngine::prepare(&forward, Money::from_major(100), due, false, now()).unwrap();
        assert_eq!(record.new_due_date, Some(due + Duration::days(14)));
        assert_eq!(effect, ConcessionEffect::ExtendDueDate(due + Duration::days(14)));
    }

    #[test]
    fn test_late_fee_waiver_once() {
        let request = ConcessionRequest::new(ConcessionTerms::LateFeeWaiver, "bank outage")
            .approved_by("accounts");
        assert!(ConcessionEngine::prepare(&request, Money::from_major(100), now(), true, now()).is_err());
        let (_, effect) =
            ConcessionEngine::prepare(&request, Money::from_major(100), now(), false, now()).unwrap();
        assert_eq!(effect, ConcessionEffect::WaiveLateFee);
    }

    #[test]
    fn test_terms_wire_format() {
        let json = serde_json::to_value(ConcessionTerms::PartialWaiver {
            amount: Money::from_major(10),
        })
        .unwrap();
        assert_eq!(json["kind"], "partial_waiver");
    }
}
