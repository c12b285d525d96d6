use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ReminderPolicy;
use crate::decimal::Money;
use crate::ledger::FeeLedger;
use crate::types::{CourseId, FeeId, FeeType, StudentId};

const SECONDS_PER_DAY: i64 = 86_400;

/// why a fee needs a reminder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReminderReason {
    DueSoon { days_until_due: u32 },
    Overdue { days_overdue: u32 },
}

/// a fee that should be reminded about now
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReminderCandidate {
    pub fee_id: FeeId,
    pub student_id: StudentId,
    pub course_id: CourseId,
    pub fee_type: FeeType,
    pub pending_amount: Money,
    pub due_date: DateTime<Utc>,
    pub reason: ReminderReason,
    pub last_reminded_at: Option<DateTime<Utc>>,
}

/// read-only scan over ledgers for reminder candidates
#[derive(Debug, Clone)]
pub struct ReminderScanner {
    policy: ReminderPolicy,
}

impl ReminderScanner {
    pub fn new(policy: ReminderPolicy) -> Self {
        Self { policy }
    }

    pub fn evaluate(&self, fee: &FeeLedger, now: DateTime<Utc>) -> Option<ReminderCandidate> {
        if !fee.pending_amount().is_positive() {
            return None;
        }

        let last_reminded_at = fee.last_reminder_at();
        if let Some(last) = last_reminded_at {
            if now - last < Duration::days(i64::from(self.policy.min_days_between)) {
                return None;
            }
        }

        let due = fee.effective_due_date();
        let reason = if now <= due {
            let seconds = (due - now).num_seconds();
            let days_until_due = u32::try_from((seconds + SECONDS_PER_DAY - 1) / SECONDS_PER_DAY)
                .unwrap_or(u32::MAX);
            if days_until_due > self.policy.days_before_due {
                return None;
            }
            ReminderReason::DueSoon { days_until_due }
        } else {
            let days_overdue = fee.days_overdue(now);
            if days_overdue < self.policy.min_days_overdue {
                return None;
            }
            ReminderReason::Overdue { days_overdue }
        };

        Some(ReminderCandidate {
            fee_id: fee.id,
            student_id: fee.student_id.clone(),
            course_id: fee.course_id.clone(),
            fee_type: fee.fee_type,
            pending_amount: fee.pending_amount(),
            due_date: due,
            reason,
            last_reminded_at,
        })
    }

    /// candidates ordered oldest due date first
    pub fn scan<'a, I>(&self, fees: I, now: DateTime<Utc>) -> Vec<ReminderCandidate>
    where
        I: IntoIterator<Item = &'a FeeLedger>,
    {
        let mut candidates: Vec<ReminderCandidate> = fees
            .into_iter()
            .filter_map(|fee| self.evaluate(fee, now))
            .collect();
        candidates.sort_by_key(|c| c.due_date);
        candidates
    }
}
