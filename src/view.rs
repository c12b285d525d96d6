use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::adjustments::{ConcessionRecord, DiscountRecord};
use crate::amount::FeeAmount;
use crate::decimal::Money;
use crate::installments::Installment;
use crate::late_fee::LateFeeState;
use crate::ledger::{FeeLedger, FeeMetadata, Note, Reminder};
use crate::payments::PaymentRecord;
use crate::status;
use crate::types::{AcademicYear, CourseId, FeeId, FeeStatus, FeeType, Semester, StudentId};

/// a fee ledger as seen at one instant, with presentation fields computed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeView {
    pub id: FeeId,
    pub student_id: StudentId,
    pub course_id: CourseId,
    pub fee_type: FeeType,
    pub academic_year: AcademicYear,
    pub semester: Semester,
    pub description: Option<String>,
    pub status: FeeStatus,
    pub amount: FeeAmount,
    pub balances: BalanceView,
    pub schedule: ScheduleView,
    pub late_fee: LateFeeState,
    pub discounts: Vec<DiscountRecord>,
    pub concessions: Vec<ConcessionRecord>,
    pub installments: Vec<Installment>,
    pub payments: Vec<PaymentRecord>,
    pub reminders: Vec<Reminder>,
    pub notes: Vec<Note>,
    pub metadata: FeeMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceView {
    pub paid_amount: Money,
    pub pending_amount: Money,
    pub overdue_amount: Money,
    /// share of the final amount paid, 0-100
    pub payment_percentage: Decimal,
    pub total_discount_amount: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleView {
    pub due_date: DateTime<Utc>,
    pub effective_due_date: DateTime<Utc>,
    pub next_installment_due: Option<DateTime<Utc>>,
    pub days_overdue: u32,
    /// due date passed with money pending, whatever the status
    pub past_due: bool,
    pub reminder_count: usize,
    pub last_reminder_at: Option<DateTime<Utc>>,
}

impl FeeView {
    pub fn from_ledger(fee: &FeeLedger, now: DateTime<Utc>) -> Self {
        let amount = *fee.amount();
        let effective_due_date = fee.effective_due_date();
        let derived = status::derive(fee.paid_amount(), amount.final_amount, effective_due_date, now);
        let plan = fee.installment_plan();

        FeeView {
            id: fee.id,
            student_id: fee.student_id.clone(),
            course_id: fee.course_id.clone(),
            fee_type: fee.fee_type,
            academic_year: fee.academic_year.clone(),
            semester: fee.semester,
            description: fee.description.clone(),
            status: derived.status,
            amount,
            balances: BalanceView {
                paid_amount: derived.paid_amount,
                pending_amount: derived.pending_amount,
                overdue_amount: derived.overdue_amount,
                payment_percentage: payment_percentage(derived.paid_amount, amount.final_amount),
                total_discount_amount: fee.discounts().iter().map(|d| d.amount).sum(),
            },
            schedule: ScheduleView {
                due_date: fee.due_date,
                effective_due_date,
                next_installment_due: plan.and_then(|p| p.next_due()).map(|i| i.due_date),
                days_overdue: fee.days_overdue(now),
                past_due: fee.is_past_due(now),
                reminder_count: fee.reminders().len(),
                last_reminder_at: fee.last_reminder_at(),
            },
            late_fee: fee.late_fee().clone(),
            discounts: fee.discounts().to_vec(),
            concessions: fee.concessions().to_vec(),
            installments: plan.map(|p| p.installments.clone()).unwrap_or_default(),
            payments: fee.payments().to_vec(),
            reminders: fee.reminders().to_vec(),
            notes: fee.notes().to_vec(),
            metadata: fee.metadata.clone(),
            created_at: fee.created_at,
            updated_at: fee.updated_at,
            version: fee.version(),
        }
    }

    /// convert to pretty-printed json string
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// paid share of `final_amount` in percent, 2 dp; a zero fee counts as fully paid
pub fn payment_percentage(paid: Money, final_amount: Money) -> Decimal {
    if final_amount.is_zero() {
        return dec!(100);
    }
    (paid.as_decimal() / final_amount.as_decimal() * dec!(100)).round_dp(2)
}
