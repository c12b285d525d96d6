use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::errors::{LedgerError, Result};
use crate::types::{InstallmentFrequency, InstallmentStatus, UserId};

/// one dated tranche
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Installment {
    /// 1-based position in the plan
    pub index: u32,
    pub amount: Money,
    pub due_date: DateTime<Utc>,
    pub status: InstallmentStatus,
    pub paid_amount: Money,
    pub paid_date: Option<DateTime<Utc>>,
    pub late_fee: Money,
    pub waived_by: Option<UserId>,
    pub waived_reason: Option<String>,
}

impl Installment {
    fn new(index: u32, amount: Money, due_date: DateTime<Utc>) -> Self {
        Self {
            index,
            amount,
            due_date,
            status: InstallmentStatus::Pending,
            paid_amount: Money::ZERO,
            paid_date: None,
            late_fee: Money::ZERO,
            waived_by: None,
            waived_reason: None,
        }
    }

    pub fn outstanding(&self) -> Money {
        self.amount.saturating_sub(self.paid_amount)
    }

    pub fn is_waived(&self) -> bool {
        self.status == InstallmentStatus::Waived
    }

    /// still owes money and has not been waived
    pub fn is_open(&self) -> bool {
        !self.is_waived() && self.outstanding().is_positive()
    }
}

/// installment plan; tranche amounts always sum to the final amount
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallmentPlan {
    /// `None` for hand-built plans
    pub frequency: Option<InstallmentFrequency>,
    pub installments: Vec<Installment>,
}

impl InstallmentPlan {
    /// split `total` into `count` tranches spaced by `frequency`; the last absorbs rounding
    pub fn generate(
        total: Money,
        frequency: InstallmentFrequency,
        count: u32,
        first_due: DateTime<Utc>,
    ) -> Result<Self> {
        if count == 0 {
            return Err(LedgerError::validation(
                "installments.count",
                "installment count must be at least 1",
            ));
        }
        if total.is_negative() {
            return Err(LedgerError::validation("installments.total", "total cannot be negative"));
        }

        let mut installments = Vec::with_capacity(count as usize);
        for (i, share) in total.split(count).into_iter().enumerate() {
            let offset = Months::new(frequency.months() * i as u32);
            let due_date = first_due.checked_add_months(offset).ok_or_else(|| {
                LedgerError::validation("installments.due_date", "installment due date out of range")
            })?;
            installments.push(Installment::new(i as u32 + 1, share, due_date));
        }

        Ok(Self {
            frequency: Some(frequency),
            installments,
        })
    }

    /// explicit tranches; amounts must sum to `total` and due dates must ascend
    pub fn custom(total: Money, tranches: &[(Money, DateTime<Utc>)]) -> Result<Self> {
        if tranches.is_empty() {
            return Err(LedgerError::validation(
                "installments.count",
                "installment count must be at least 1",
            ));
        }

        let mut installments = Vec::with_capacity(tranches.len());
        let mut previous_due: Option<DateTime<Utc>> = None;
        for (i, (amount, due_date)) in tranches.iter().enumerate() {
            if !amount.is_positive() {
                return Err(LedgerError::validation(
                    "installments.amount",
                    format!("installment {} amount must be positive", i + 1),
                ));
            }
            if previous_due.is_some_and(|prev| *due_date <= prev) {
                return Err(LedgerError::validation(
                    "installments.due_date",
                    format!("installment {} is not due after the previous one", i + 1),
                ));
            }
            previous_due = Some(*due_date);
            installments.push(Installment::new(i as u32 + 1, *amount, *due_date));
        }

        let sum: Money = installments.iter().map(|i| i.amount).sum();
        if sum != total {
            return Err(LedgerError::validation(
                "installments.amount",
                format!("installments sum to {} but fee final amount is {}", sum, total),
            ));
        }

        Ok(Self {
            frequency: None,
            installments,
        })
    }

    pub fn total(&self) -> Money {
        self.installments.iter().map(|i| i.amount).sum()
    }

    pub fn len(&self) -> usize {
        self.installments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.installments.is_empty()
    }

    pub fn get(&self, index: u32) -> Option<&Installment> {
        self.installments.iter().find(|i| i.index == index)
    }

    /// first tranche still owing money
    pub fn next_due(&self) -> Option<&Installment> {
        self.installments.iter().find(|i| i.is_open())
    }

    pub fn overdue(&self) -> impl Iterator<Item = &Installment> {
        self.installments
            .iter()
            .filter(|i| i.status == InstallmentStatus::Overdue)
    }

    /// re-allocate completed payments (in the order they were made) oldest tranche first
    pub fn allocate(&mut self, completed: &[(Money, DateTime<Utc>)], now: DateTime<Utc>) {
        for installment in &mut self.installments {
            installment.paid_amount = Money::ZERO;
            installment.paid_date = None;
        }

        let mut cursor = 0;
        for (amount, paid_at) in completed {
            let mut remaining = *amount;
            while remaining.is_positive() && cursor < self.installments.len() {
                let installment = &mut self.installments[cursor];
                let take = remaining.min(installment.outstanding());
                installment.paid_amount += take;
                remaining -= take;
                if installment.outstanding().is_zero() {
                    if !installment.is_waived() && installment.paid_amount.is_positive() {
                        installment.paid_date = Some(*paid_at);
                    }
                    cursor += 1;
                }
            }
        }

        for installment in &mut self.installments {
            if installment.is_waived() {
                continue;
            }
            // emptied by adjustments, nothing was ever owed
            if installment.amount.is_zero() {
                installment.status = InstallmentStatus::Waived;
                installment.late_fee = Money::ZERO;
                continue;
            }
            installment.status = if installment.outstanding().is_zero() {
                InstallmentStatus::Paid
            } else if now > installment.due_date {
                InstallmentStatus::Overdue
            } else {
                InstallmentStatus::Pending
            };
            if installment.status == InstallmentStatus::Paid {
                installment.late_fee = Money::ZERO;
            }
        }
    }

    /// shrink unpaid tranches by `reduction`, latest first
    pub fn absorb_reduction(&mut self, reduction: Money) -> Result<()> {
        let capacity: Money = self
            .installments
            .iter()
            .filter(|i| !i.is_waived())
            .map(|i| i.outstanding())
            .sum();
        if reduction > capacity {
            return Err(LedgerError::validation(
                "installments.amount",
                format!("reduction {} exceeds unpaid installments {}", reduction, capacity),
            ));
        }

        let mut remaining = reduction;
        for installment in self.installments.iter_mut().rev() {
            if !remaining.is_positive() {
                break;
            }
            if installment.is_waived() {
                continue;
            }
            let take = remaining.min(installment.outstanding());
            installment.amount -= take;
            remaining -= take;
        }
        Ok(())
    }

    /// grow the latest non-waived tranche by `increase`
    pub fn extend_last(&mut self, increase: Money) -> Result<()> {
        let last = self
            .installments
            .iter_mut()
            .rev()
            .find(|i| !i.is_waived())
            .ok_or_else(|| {
                LedgerError::validation("installments.amount", "every installment has been waived")
            })?;
        last.amount += increase;
        Ok(())
    }

    /// waive one tranche; returns the unpaid remainder released by the waiver
    pub fn waive(&mut self, index: u32, approved_by: UserId, reason: String) -> Result<Money> {
        let installment = self
            .installments
            .iter_mut()
            .find(|i| i.index == index)
            .ok_or_else(|| {
                LedgerError::validation("installment.index", format!("no installment {}", index))
            })?;

        if installment.is_waived() {
            return Err(LedgerError::validation(
                "installment.status",
                format!("installment {} is already waived", index),
            ));
        }
        let remainder = installment.outstanding();
        if remainder.is_zero() {
            return Err(LedgerError::validation(
                "installment.status",
                format!("installment {} is already paid", index),
            ));
        }

        installment.amount = installment.paid_amount;
        installment.status = InstallmentStatus::Waived;
        installment.late_fee = Money::ZERO;
        installment.waived_by = Some(approved_by);
        installment.waived_reason = Some(reason);
        Ok(remainder)
    }

    /// move the next open tranche to a later date without passing the tranche after it
    pub fn extend_next_due(&mut self, new_due: DateTime<Utc>) -> Result<()> {
        let position = self
            .installments
            .iter()
            .position(|i| i.is_open())
            .ok_or_else(|| LedgerError::validation("concession.kind", "no open installment to extend"))?;

        if let Some(following) = self.installments.get(position + 1) {
            if new_due >= following.due_date {
                return Err(LedgerError::validation(
                    "concession.new_due_date",
                    format!(
                        "extension would pass installment {} due {}",
                        following.index,
                        following.due_date.date_naive()
                    ),
                ));
            }
        }

        self.installments[position].due_date = new_due;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 31, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_generate_monthly() {
        let plan =
            InstallmentPlan::generate(Money::from_major(10_000), InstallmentFrequency::Monthly, 3, start())
                .unwrap();
        assert_eq!(plan.len(), 3);
        assert_eq!(plan.total(), Money::from_major(10_000));
        assert_eq!(plan.installments[2].amount, Money::from_str_exact("3333.34").unwrap());
        // month-end clamps to the shorter month
        assert_eq!(
            plan.installments[1].due_date,
            Utc.with_ymd_and_hms(2025, 2, 28, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_generate_quarterly_and_half_yearly() {
        let quarterly =
            InstallmentPlan::generate(Money::from_major(1_200), InstallmentFrequency::Quarterly, 4, start())
                .unwrap();
        assert_eq!(
            quarterly.installments[3].due_date,
            Utc.with_ymd_and_hms(2025, 10, 31, 0, 0, 0).unwrap()
        );

        let half =
            InstallmentPlan::generate(Money::from_major(1_200), InstallmentFrequency::HalfYearly, 2, start())
                .unwrap();
        assert_eq!(half.installments[1].due_date, Utc.with_ymd_and_hms(2025, 7, 31, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_generate_rejects_zero_count() {
        assert!(InstallmentPlan::generate(Money::from_major(100), InstallmentFrequency::Monthly, 0, start())
            .is_err());
    }

    #[test]
    fn test_custom_plan_must_sum_to_total() {
        let tranches = [
            (Money::from_major(600), start()),
            (Money::from_major(300), start() + Duration::days(30)),
        ];
        assert!(InstallmentPlan::custom(Money::from_major(1_000), &tranches).is_err());
        assert!(InstallmentPlan::custom(Money::from_major(900), &tranches).is_ok());

        let unordered = [
            (Money::from_major(600), start()),
            (Money::from_major(400), start()),
        ];
        assert!(InstallmentPlan::custom(Money::from_major(1_000), &unordered).is_err());
    }

    #[test]
    fn test_allocate_oldest_first() {
        let mut plan =
            InstallmentPlan::generate(Money::from_major(3_000), InstallmentFrequency::Monthly, 3, start())
                .unwrap();
        let paid_at = start() - Duration::days(1);
        plan.allocate(&[(Money::from_major(1_500), paid_at)], start() - Duration::days(1));

        assert_eq!(plan.installments[0].status, InstallmentStatus::Paid);
        assert_eq!(plan.installments[0].paid_date, Some(paid_at));
        assert_eq!(plan.installments[1].paid_amount, Money::from_major(500));
        assert_eq!(plan.installments[1].status, InstallmentStatus::Pending);
        assert_eq!(plan.next_due().map(|i| i.index), Some(2));
    }

    #[test]
    fn test_allocate_marks_overdue() {
        let mut plan =
            InstallmentPlan::generate(Money::from_major(3_000), InstallmentFrequency::Monthly, 3, start())
                .unwrap();
        plan.allocate(&[], start() + Duration::days(40));
        assert_eq!(plan.overdue().count(), 2);
        assert_eq!(plan.installments[2].status, InstallmentStatus::Pending);
    }

    #[test]
    fn test_absorb_reduction_from_last_tranche() {
        let mut plan =
            InstallmentPlan::generate(Money::from_major(3_000), InstallmentFrequency::Monthly, 3, start())
                .unwrap();
        plan.absorb_reduction(Money::from_major(1_500)).unwrap();
        assert_eq!(plan.installments[2].amount, Money::ZERO);
        assert_eq!(plan.installments[1].amount, Money::from_major(500));
        assert_eq!(plan.total(), Money::from_major(1_500));

        assert!(plan.absorb_reduction(Money::from_major(2_000)).is_err());
    }

    #[test]
    fn test_tranche_reduced_to_zero_is_waived_not_paid() {
        let mut plan =
            InstallmentPlan::generate(Money::from_major(3_000), InstallmentFrequency::Monthly, 3, start())
                .unwrap();
        plan.absorb_reduction(Money::from_major(1_000)).unwrap();
        plan.allocate(&[(Money::from_major(1_500), start())], start());

        let last = &plan.installments[2];
        assert_eq!(last.amount, Money::ZERO);
        assert_eq!(last.status, InstallmentStatus::Waived);
        assert!(last.paid_date.is_none());
        assert_eq!(plan.installments[0].status, InstallmentStatus::Paid);
        assert_eq!(plan.installments[1].status, InstallmentStatus::Pending);
        assert_eq!(plan.installments[1].paid_amount, Money::from_major(500));

        // paying the rest never stamps a paid date on the empty tranche
        plan.allocate(&[(Money::from_major(2_000), start())], start());
        assert_eq!(plan.installments[1].status, InstallmentStatus::Paid);
        assert!(plan.installments[2].paid_date.is_none());
        assert_eq!(plan.installments[2].status, InstallmentStatus::Waived);
        assert!(plan.next_due().is_none());
    }

    #[test]
    fn test_extend_last_skips_waived() {
        let mut plan =
            InstallmentPlan::generate(Money::from_major(2_000), InstallmentFrequency::Monthly, 2, start())
                .unwrap();
        plan.waive(2, "principal".to_string(), "hardship".to_string()).unwrap();
        plan.extend_last(Money::from_major(100)).unwrap();
        assert_eq!(plan.installments[0].amount, Money::from_major(1_100));
        assert_eq!(plan.installments[1].amount, Money::ZERO);
    }

    #[test]
    fn test_waive_releases_remainder() {
        let mut plan =
            InstallmentPlan::generate(Money::from_major(3_000), InstallmentFrequency::Monthly, 3, start())
                .unwrap();
        plan.allocate(&[(Money::from_major(1_200), start())], start());

        let released = plan.waive(2, "principal".to_string(), "hardship".to_string()).unwrap();
        assert_eq!(released, Money::from_major(800));
        assert_eq!(plan.installments[1].amount, Money::from_major(200));
        assert_eq!(plan.installments[1].status, InstallmentStatus::Waived);

        assert!(plan.waive(2, "principal".to_string(), "again".to_string()).is_err());
        assert!(plan.waive(1, "principal".to_string(), "paid".to_string()).is_err());
        assert!(plan.waive(9, "principal".to_string(), "missing".to_string()).is_err());
    }

    #[test]
    fn test_extension_keeps_order() {
        let mut plan =
            InstallmentPlan::generate(Money::from_major(3_000), InstallmentFrequency::Monthly, 3, start())
                .unwrap();
        let second_due = plan.installments[1].due_date;
        assert!(plan.extend_next_due(second_due).is_err());

        plan.extend_next_due(start() + Duration::days(10)).unwrap();
        assert_eq!(plan.installments[0].due_date, start() + Duration::days(10));
    }
}
