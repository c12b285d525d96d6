use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::types::{
    ConcessionKind, CourseId, DiscountKind, FeeId, FeeStatus, FeeType, PaymentMethod,
    ReminderChannel, StudentId, UserId,
};

/// domain events emitted by ledger mutations, dispatched by collaborators after save
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LedgerEvent {
    // lifecycle events
    FeeCreated {
        fee_id: FeeId,
        student_id: StudentId,
        course_id: CourseId,
        fee_type: FeeType,
        amount: Money,
        due_date: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    },
    FeeDeleted {
        fee_id: FeeId,
        deleted_by: UserId,
        timestamp: DateTime<Utc>,
    },
    InstallmentPlanCreated {
        fee_id: FeeId,
        installments: u32,
        first_due: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    },
    AmountRevised {
        fee_id: FeeId,
        old_original: Money,
        new_original: Money,
        new_final: Money,
        revised_by: UserId,
        timestamp: DateTime<Utc>,
    },

    // adjustment events
    DiscountApplied {
        fee_id: FeeId,
        kind: DiscountKind,
        amount: Money,
        new_final: Money,
        applied_by: UserId,
        timestamp: DateTime<Utc>,
    },
    ConcessionApplied {
        fee_id: FeeId,
        kind: ConcessionKind,
        amount: Money,
        approved_by: UserId,
        timestamp: DateTime<Utc>,
    },
    InstallmentWaived {
        fee_id: FeeId,
        installment: u32,
        amount: Money,
        approved_by: UserId,
        timestamp: DateTime<Utc>,
    },

    // payment events
    PaymentRecorded {
        fee_id: FeeId,
        payment_id: String,
        amount: Money,
        method: PaymentMethod,
        timestamp: DateTime<Utc>,
    },
    PaymentCompleted {
        fee_id: FeeId,
        student_id: StudentId,
        payment_id: String,
        amount: Money,
        method: PaymentMethod,
        paid_amount: Money,
        pending_amount: Money,
        timestamp: DateTime<Utc>,
    },
    PaymentFailed {
        fee_id: FeeId,
        payment_id: String,
        amount: Money,
        timestamp: DateTime<Utc>,
    },
    PaymentCancelled {
        fee_id: FeeId,
        payment_id: String,
        timestamp: DateTime<Utc>,
    },
    PaymentRefunded {
        fee_id: FeeId,
        payment_id: String,
        amount: Money,
        refunded_by: UserId,
        timestamp: DateTime<Utc>,
    },

    // status events
    StatusChanged {
        fee_id: FeeId,
        old_status: FeeStatus,
        new_status: FeeStatus,
        timestamp: DateTime<Utc>,
    },
    /// fee fully settled; receipt generation and certificate eligibility hang off this
    FeePaid {
        fee_id: FeeId,
        student_id: StudentId,
        course_id: CourseId,
        fee_type: FeeType,
        total_paid: Money,
        timestamp: DateTime<Utc>,
    },
    FeeBecameOverdue {
        fee_id: FeeId,
        student_id: StudentId,
        pending_amount: Money,
        due_date: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    },

    // late fee events
    LateFeeAssessed {
        fee_id: FeeId,
        amount: Money,
        days_overdue: u32,
        timestamp: DateTime<Utc>,
    },
    LateFeeWaived {
        fee_id: FeeId,
        waived_by: UserId,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    // reminder events
    ReminderLogged {
        fee_id: FeeId,
        channel: ReminderChannel,
        pending_amount: Money,
        timestamp: DateTime<Utc>,
    },
}

impl LedgerEvent {
    pub fn fee_id(&self) -> FeeId {
        match self {
            LedgerEvent::FeeCreated { fee_id, .. }
            | LedgerEvent::FeeDeleted { fee_id, .. }
            | LedgerEvent::InstallmentPlanCreated { fee_id, .. }
            | LedgerEvent::AmountRevised { fee_id, .. }
            | LedgerEvent::DiscountApplied { fee_id, .. }
            | LedgerEvent::ConcessionApplied { fee_id, .. }
            | LedgerEvent::InstallmentWaived { fee_id, .. }
            | LedgerEvent::PaymentRecorded { fee_id, .. }
            | LedgerEvent::PaymentCompleted { fee_id, .. }
            | LedgerEvent::PaymentFailed { fee_id, .. }
            | LedgerEvent::PaymentCancelled { fee_id, .. }
            | LedgerEvent::PaymentRefunded { fee_id, .. }
            | LedgerEvent::StatusChanged { fee_id, .. }
            | LedgerEvent::FeePaid { fee_id, .. }
            | LedgerEvent::FeeBecameOverdue { fee_id, .. }
            | LedgerEvent::LateFeeAssessed { fee_id, .. }
            | LedgerEvent::LateFeeWaived { fee_id, .. }
            | LedgerEvent::ReminderLogged { fee_id, .. } => *fee_id,
        }
    }
}

/// event store for collecting events during operations
#[derive(Debug, Default)]
pub struct EventStore {
    events: Vec<LedgerEvent>,
}

impl EventStore {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn emit(&mut self, event: LedgerEvent) {
        self.events.push(event);
    }

    pub fn take_events(&mut self) -> Vec<LedgerEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn events(&self) -> &[LedgerEvent] {
        &self.events
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }
}
