use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::LateFeePolicy;
use crate::decimal::{Money, Rate};
use crate::types::{FeeStatus, UserId};

const SECONDS_PER_DAY: i64 = 86_400;

/// late fee state stored on a ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct LateFeeState {
    /// last assessed amount; billed separately from `amount.final`
    pub amount: Money,
    /// fee-specific flat percentage; zero defers to the policy
    pub percentage: Rate,
    pub applied_date: Option<DateTime<Utc>>,
    pub waived: bool,
    pub waived_by: Option<UserId>,
    pub waived_reason: Option<String>,
    pub waived_at: Option<DateTime<Utc>>,
}

impl LateFeeState {
    pub fn with_percentage(percentage: Rate) -> Self {
        Self {
            percentage,
            ..Self::default()
        }
    }

    pub fn waive(&mut self, by: UserId, reason: String, now: DateTime<Utc>) {
        self.waived = true;
        self.amount = Money::ZERO;
        self.waived_by = Some(by);
        self.waived_reason = Some(reason);
        self.waived_at = Some(now);
    }
}

/// late fee calculation result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LateFeeCalculation {
    pub amount: Money,
    /// amount before the cap
    pub raw_amount: Money,
    pub rate: Rate,
    pub days_overdue: u32,
    /// started billing months overdue; zero under a flat percentage
    pub months_overdue: u32,
    pub pending_base: Money,
    pub cap: Money,
    pub capped: bool,
}

impl LateFeeCalculation {
    pub fn zero(pending_base: Money, days_overdue: u32) -> Self {
        Self {
            amount: Money::ZERO,
            raw_amount: Money::ZERO,
            rate: Rate::ZERO,
            days_overdue,
            months_overdue: 0,
            pending_base,
            cap: Money::ZERO,
            capped: false,
        }
    }
}

/// whole days past `due`, rounded up; zero when not yet due
pub fn days_overdue(due: DateTime<Utc>, now: DateTime<Utc>) -> u32 {
    if now <= due {
        return 0;
    }
    let seconds = (now - due).num_seconds();
    let days = (seconds + SECONDS_PER_DAY - 1) / SECONDS_PER_DAY;
    u32::try_from(days).unwrap_or(u32::MAX)
}

/// engine for calculating late fees
#[derive(Debug, Clone)]
pub struct LateFeeEngine {
    pub policy: LateFeePolicy,
}

impl LateFeeEngine {
    pub fn new(policy: LateFeePolicy) -> Self {
        Self { policy }
    }

    /// rate charged for `days_overdue`: flat percentage if one is set, else per started month
    pub fn effective_rate(&self, fee_percentage: Rate, days_overdue: u32) -> (Rate, u32) {
        if !fee_percentage.is_zero() {
            return (fee_percentage, 0);
        }
        if !self.policy.default_percentage.is_zero() {
            return (self.policy.default_percentage, 0);
        }
        let days_per_month = self.policy.days_per_month.max(1);
        let months = days_overdue.div_ceil(days_per_month);
        (self.policy.monthly_rate.times(months), months)
    }

    /// raw late fee on `pending`, capped at the policy share of `pending`
    pub fn calculate(&self, pending: Money, days_overdue: u32, fee_percentage: Rate) -> LateFeeCalculation {
        if days_overdue == 0 || !pending.is_positive() {
            return LateFeeCalculation::zero(pending, days_overdue);
        }

        let (rate, months_overdue) = self.effective_rate(fee_percentage, days_overdue);
        let raw_amount = Money::from_decimal(pending.as_decimal() * rate.as_decimal());
        let cap = pending.percentage(self.policy.cap);
        let amount = raw_amount.min(cap).max(Money::ZERO);

        LateFeeCalculation {
            amount,
            raw_amount,
            rate,
            days_overdue,
            months_overdue,
            pending_base: pending,
            cap,
            capped: raw_amount > cap,
        }
    }

    /// late fee for a ledger: zero unless overdue and not waived
    pub fn assess(
        &self,
        state: &LateFeeState,
        status: FeeStatus,
        pending: Money,
        due: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> LateFeeCalculation {
        let days = days_overdue(due, now);
        if state.waived || status != FeeStatus::Overdue {
            return LateFeeCalculation::zero(pending, days);
        }
        self.calculate(pending, days, state.percentage)
    }

    /// late fee for a single overdue tranche
    pub fn assess_installment(
        &self,
        state: &LateFeeState,
        outstanding: Money,
        due: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> LateFeeCalculation {
        let days = days_overdue(due, now);
        if state.waived {
            return LateFeeCalculation::zero(outstanding, days);
        }
        self.calculate(outstanding, days, state.percentage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LedgerConfig;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn engine() -> LateFeeEngine {
        LateFeeEngine::new(LedgerConfig::standard().late_fee)
    }

    #[test]
    fn test_days_overdue_rounds_up() {
        let due = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(days_overdue(due, due), 0);
        assert_eq!(days_overdue(due, due - Duration::days(3)), 0);
        assert_eq!(days_overdue(due, due + Duration::hours(1)), 1);
        assert_eq!(days_overdue(due, due + Duration::days(30)), 30);
        assert_eq!(days_overdue(due, due + Duration::days(30) + Duration::seconds(1)), 31);
    }

    #[test]
    fn test_monthly_policy() {
        let pending = Money::from_major(10_000);
        // 1..=30 days is the first month
        let calc = engine().calculate(pending, 1, Rate::ZERO);
        assert_eq!(calc.months_overdue, 1);
        assert_eq!(calc.amount, Money::from_major(100));

        let calc = engine().calculate(pending, 31, Rate::ZERO);
        assert_eq!(calc.months_overdue, 2);
        assert_eq!(calc.amount, Money::from_major(200));
    }

    #[test]
    fn test_fee_percentage_overrides_policy() {
        let calc = engine().calculate(Money::from_major(10_000), 90, Rate::from_percentage(5));
        assert_eq!(calc.amount, Money::from_major(500));
        assert_eq!(calc.months_overdue, 0);
    }

    #[test]
    fn test_flat_policy_preset() {
        let engine = LateFeeEngine::new(LedgerConfig::flat_late_fee(dec!(2)).late_fee);
        let calc = engine.calculate(Money::from_major(5_000), 400, Rate::ZERO);
        assert_eq!(calc.amount, Money::from_major(100));
    }

    #[test]
    fn test_cap_applies() {
        let pending = Money::from_major(10_000);
        let calc = engine().calculate(pending, 10_000, Rate::ZERO);
        assert!(calc.capped);
        assert_eq!(calc.amount, Money::from_major(2_500));
        assert_eq!(calc.amount, pending.percentage(Rate::from_percentage(25)));
    }

    #[test]
    fn test_assess_only_when_overdue_and_not_waived() {
        let due = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let now = due + Duration::days(45);
        let pending = Money::from_major(1_000);

        let state = LateFeeState::default();
        assert_eq!(engine().assess(&state, FeeStatus::Overdue, pending, due, now).amount, Money::from_major(20));
        assert!(engine().assess(&state, FeeStatus::Partial, pending, due, now).amount.is_zero());

        let mut waived = LateFeeState::default();
        waived.waive("principal".to_string(), "flood".to_string(), now);
        assert!(engine().assess(&waived, FeeStatus::Overdue, pending, due, now).amount.is_zero());
        assert!(engine().assess_installment(&waived, pending, due, now).amount.is_zero());
    }

    #[test]
    fn test_lenient_charges_nothing() {
        let engine = LateFeeEngine::new(LedgerConfig::lenient().late_fee);
        assert!(engine.calculate(Money::from_major(1_000), 400, Rate::ZERO).amount.is_zero());
    }

    proptest! {
        #[test]
        fn prop_late_fee_never_exceeds_cap(
            pending_minor in 0i64..1_000_000_000,
            days in 0u32..=10_000,
            pct in 0u32..=100,
        ) {
            let pending = Money::from_minor(pending_minor);
            let calc = engine().calculate(pending, days, Rate::from_percentage(pct));
            prop_assert!(calc.amount <= pending.percentage(Rate::from_percentage(25)));
            prop_assert!(!calc.amount.is_negative());
        }
    }
}
