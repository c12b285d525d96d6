use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::ledger::FeeLedger;
use crate::types::{FeeStatus, FeeType, PaymentMethod};

/// months of collection history kept in [`FeeStats`]
pub const COLLECTION_MONTHS: usize = 12;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSummary {
    pub status: FeeStatus,
    pub count: usize,
    pub total_final: Money,
    pub total_paid: Money,
    pub total_pending: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyCollection {
    pub year: i32,
    pub month: u32,
    pub amount: Money,
    pub payments: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeTypeSummary {
    pub fee_type: FeeType,
    pub count: usize,
    pub total_final: Money,
    pub total_paid: Money,
    pub total_pending: Money,
}

/// dashboard statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeStats {
    pub total_fees: usize,
    pub total_final: Money,
    pub total_paid: Money,
    pub total_pending: Money,
    pub total_overdue: Money,
    /// assessed late fees, billed separately
    pub total_late_fees: Money,
    pub by_status: Vec<StatusSummary>,
    /// latest months first
    pub monthly_collection: Vec<MonthlyCollection>,
    pub by_fee_type: Vec<FeeTypeSummary>,
}

impl FeeStats {
    pub fn compute(fees: &[FeeLedger]) -> Self {
        let by_status = FeeStatus::ALL
            .iter()
            .map(|status| {
                let matching: Vec<&FeeLedger> = fees.iter().filter(|f| f.status() == *status).collect();
                StatusSummary {
                    status: *status,
                    count: matching.len(),
                    total_final: matching.iter().map(|f| f.amount().final_amount).sum(),
                    total_paid: matching.iter().map(|f| f.paid_amount()).sum(),
                    total_pending: matching.iter().map(|f| f.pending_amount()).sum(),
                }
            })
            .collect();

        let mut types: BTreeMap<FeeType, FeeTypeSummary> = BTreeMap::new();
        for fee in fees {
            let entry = types.entry(fee.fee_type).or_insert_with(|| FeeTypeSummary {
                fee_type: fee.fee_type,
                count: 0,
                total_final: Money::ZERO,
                total_paid: Money::ZERO,
                total_pending: Money::ZERO,
            });
            entry.count += 1;
            entry.total_final += fee.amount().final_amount;
            entry.total_paid += fee.paid_amount();
            entry.total_pending += fee.pending_amount();
        }

        let mut months: BTreeMap<(i32, u32), MonthlyCollection> = BTreeMap::new();
        for payment in fees.iter().flat_map(|f| f.payments()).filter(|p| p.is_completed()) {
            let at = payment.completed_at.unwrap_or(payment.paid_at);
            let entry = months
                .entry((at.year(), at.month()))
                .or_insert_with(|| MonthlyCollection {
                    year: at.year(),
                    month: at.month(),
                    amount: Money::ZERO,
                    payments: 0,
                });
            entry.amount += payment.amount;
            entry.payments += 1;
        }

        Self {
            total_fees: fees.len(),
            total_final: fees.iter().map(|f| f.amount().final_amount).sum(),
            total_paid: fees.iter().map(|f| f.paid_amount()).sum(),
            total_pending: fees.iter().map(|f| f.pending_amount()).sum(),
            total_overdue: fees.iter().map(|f| f.overdue_amount()).sum(),
            total_late_fees: fees.iter().map(|f| f.late_fee().amount).sum(),
            by_status,
            monthly_collection: months.into_values().rev().take(COLLECTION_MONTHS).collect(),
            by_fee_type: types.into_values().collect(),
        }
    }

    pub fn status(&self, status: FeeStatus) -> Option<&StatusSummary> {
        self.by_status.iter().find(|s| s.status == status)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodSummary {
    pub method: PaymentMethod,
    pub count: usize,
    pub amount: Money,
}

/// money collected and refunded in `[from, to)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionReport {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub total_collected: Money,
    pub total_refunded: Money,
    pub net_collected: Money,
    pub payment_count: usize,
    pub by_method: Vec<MethodSummary>,
}

impl CollectionReport {
    pub fn compute(fees: &[FeeLedger], from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        let in_range = |at: DateTime<Utc>| at >= from && at < to;
        let mut by_method: Vec<MethodSummary> = Vec::new();
        let mut total_collected = Money::ZERO;
        let mut total_refunded = Money::ZERO;
        let mut payment_count = 0;

        for payment in fees.iter().flat_map(|f| f.payments()) {
            // refunded payments were collected first, then returned
            if payment.completed_at.is_some_and(in_range) {
                total_collected += payment.amount;
                payment_count += 1;
                match by_method.iter_mut().find(|m| m.method == payment.method) {
                    Some(summary) => {
                        summary.count += 1;
                        summary.amount += payment.amount;
                    }
                    None => by_method.push(MethodSummary {
                        method: payment.method,
                        count: 1,
                        amount: payment.amount,
                    }),
                }
            }
            if payment.refund.as_ref().is_some_and(|r| in_range(r.refunded_at)) {
                total_refunded += payment.amount;
            }
        }

        Self {
            from,
            to,
            total_collected,
            total_refunded,
            net_collected: total_collected - total_refunded,
            payment_count,
            by_method,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LedgerConfig;
    use crate::events::EventStore;
    use crate::ledger::NewFee;
    use crate::payments::{PaymentIdGenerator, PaymentRequest};
    use chrono::{Duration, TimeZone};
    use hourglass_rs::{SafeTimeProvider, TimeSource};

    fn setup() -> (SafeTimeProvider, Vec<FeeLedger>) {
        let time = SafeTimeProvider::new(TimeSource::Test(Utc.with_ymd_and_hms(2025, 5, 10, 0, 0, 0).unwrap()));
        let control = time.test_control().unwrap();
        let ids = PaymentIdGenerator::new(LedgerConfig::standard().payment_ids);
        let mut events = EventStore::new();

        let build = |student: &str, fee_type: FeeType, amount: i64, due: DateTime<Utc>| {
            NewFee::builder()
                .student(student)
                .course("course-1")
                .fee_type(fee_type)
                .academic_year("2024-2025")
                .amount(Money::from_major(amount))
                .due_date(due)
                .build()
                .unwrap()
        };

        let now = time.now();
        let mut paid = FeeLedger::create(build("s1", FeeType::Tuition, 1_000, now + Duration::days(30)), &time, &mut events).unwrap();
        let mut partial = FeeLedger::create(build("s2", FeeType::Tuition, 2_000, now + Duration::days(30)), &time, &mut events).unwrap();
        let overdue = FeeLedger::create(build("s3", FeeType::Library, 500, now - Duration::days(1)), &time, &mut events).unwrap();

        paid.add_payment(&PaymentRequest::new(Money::from_major(1_000), PaymentMethod::Cash), &ids, |_| false, &time, &mut events)
            .unwrap();
        control.advance(Duration::days(31));
        partial
            .add_payment(&PaymentRequest::new(Money::from_major(500), PaymentMethod::Upi), &ids, |_| false, &time, &mut events)
            .unwrap();

        (time, vec![paid, partial, overdue])
    }

    #[test]
    fn test_stats_totals() {
        let (_, fees) = setup();
        let stats = FeeStats::compute(&fees);

        assert_eq!(stats.total_fees, 3);
        assert_eq!(stats.total_final, Money::from_major(3_500));
        assert_eq!(stats.total_paid, Money::from_major(1_500));
        assert_eq!(stats.total_pending, Money::from_major(2_000));
        assert_eq!(stats.total_overdue, Money::from_major(500));

        let paid = stats.status(FeeStatus::Paid).unwrap();
        assert_eq!(paid.count, 1);
        assert_eq!(stats.status(FeeStatus::Partial).unwrap().total_pending, Money::from_major(1_500));
        assert_eq!(stats.by_status.len(), 4);
    }

    #[test]
    fn test_monthly_collection_latest_first() {
        let (_, fees) = setup();
        let stats = FeeStats::compute(&fees);
        assert_eq!(stats.monthly_collection.len(), 2);
        assert_eq!((stats.monthly_collection[0].year, stats.monthly_collection[0].month), (2025, 6));
        assert_eq!(stats.monthly_collection[1].amount, Money::from_major(1_000));
    }

    #[test]
    fn test_by_fee_type() {
        let (_, fees) = setup();
        let stats = FeeStats::compute(&fees);
        let tuition = stats.by_fee_type.iter().find(|t| t.fee_type == FeeType::Tuition).unwrap();
        assert_eq!(tuition.count, 2);
        assert_eq!(tuition.total_paid, Money::from_major(1_500));
    }

    #[test]
    fn test_collection_report_window() {
        let (time, fees) = setup();
        let report = CollectionReport::compute(&fees, time.now() - Duration::days(1), time.now() + Duration::days(1));
        assert_eq!(report.payment_count, 1);
        assert_eq!(report.total_collected, Money::from_major(500));
        assert_eq!(report.by_method[0].method, PaymentMethod::Upi);
        assert_eq!(report.net_collected, Money::from_major(500));
    }
}
