use chrono::{DateTime, Duration, Utc};
use hourglass_rs::SafeTimeProvider;
use tracing::{debug, info, warn};

use crate::adjustments::{
    require_actor, ConcessionRecord, ConcessionRequest, DiscountRecord, DiscountRequest,
};
use crate::config::LedgerConfig;
use crate::decimal::Money;
use crate::errors::{LedgerError, Result};
use crate::events::{EventStore, LedgerEvent};
use crate::late_fee::{LateFeeCalculation, LateFeeEngine};
use crate::ledger::{FeeLedger, InstallmentSpec, NewFee, Reminder, ReminderRequest};
use crate::payments::{PaymentIdGenerator, PaymentRecord, PaymentRequest};
use crate::reports::{CollectionReport, FeeStats};
use crate::scanner::{ReminderCandidate, ReminderScanner};
use crate::store::{FeeFilter, FeeRepository};
use crate::types::{
    CourseId, FeeId, FeeStatus, LedgerKey, NoteKind, NotePriority, ReminderChannel, StudentId,
    UserId,
};

/// statuses that can still collect money
const OPEN_STATUSES: [FeeStatus; 3] = [FeeStatus::Pending, FeeStatus::Partial, FeeStatus::Overdue];

/// result of a successful mutation
#[derive(Debug, Clone)]
pub struct Outcome<T> {
    /// the ledger as stored
    pub fee: FeeLedger,
    pub value: T,
    pub events: Vec<LedgerEvent>,
}

#[derive(Debug)]
pub struct BulkFailure {
    pub index: usize,
    pub key: LedgerKey,
    pub error: LedgerError,
}

#[derive(Debug, Default)]
pub struct BulkCreateReport {
    pub created: Vec<FeeLedger>,
    pub failed: Vec<BulkFailure>,
    pub events: Vec<LedgerEvent>,
}

impl BulkCreateReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct ReminderDispatchReport {
    pub recorded: Vec<(FeeId, Reminder)>,
    pub failed: Vec<(FeeId, LedgerError)>,
    pub events: Vec<LedgerEvent>,
}

/// late fees assessed by one overdue sweep
#[derive(Debug, Default)]
pub struct SweepReport {
    pub scanned: usize,
    pub assessed: Vec<(FeeId, LateFeeCalculation)>,
    pub total_late_fees: Money,
    pub failed: Vec<(FeeId, LedgerError)>,
    pub events: Vec<LedgerEvent>,
}

/// runs each mutation as load, apply, save at the loaded version; retryable
/// save failures re-run the cycle up to `max_conflict_retries` times
pub struct FeeLedgerService<R: FeeRepository> {
    repo: R,
    config: LedgerConfig,
    time: SafeTimeProvider,
    ids: PaymentIdGenerator,
    late_fees: LateFeeEngine,
    scanner: ReminderScanner,
}

impl<R: FeeRepository> FeeLedgerService<R> {
    pub fn new(repo: R, config: LedgerConfig, time: SafeTimeProvider) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            repo,
            ids: PaymentIdGenerator::new(config.payment_ids.clone()),
            late_fees: LateFeeEngine::new(config.late_fee.clone()),
            scanner: ReminderScanner::new(config.reminders.clone()),
            config,
            time,
        })
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn time(&self) -> &SafeTimeProvider {
        &self.time
    }

    fn attempts(&self) -> u32 {
        self.config.max_conflict_retries + 1
    }

    fn mutate<T, F>(&self, fee_id: FeeId, operation: &'static str, mut apply: F) -> Result<Outcome<T>>
    where
        F: FnMut(&mut FeeLedger, &mut EventStore) -> Result<T>,
    {
        let attempts = self.attempts();
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut fee = self.repo.get(fee_id)?;
            let expected = fee.version();
            let mut events = EventStore::new();

            let value = match apply(&mut fee, &mut events) {
                Ok(value) => value,
                Err(err) => {
                    warn!(%fee_id, operation, error = %err, "fee mutation rejected");
                    return Err(err);
                }
            };

            match self.repo.save(fee, expected) {
                Ok(fee) => {
                    info!(
                        %fee_id,
                        operation,
                        version = fee.version(),
                        status = ?fee.status(),
                        pending = %fee.pending_amount(),
                        "fee updated"
                    );
                    return Ok(Outcome {
                        fee,
                        value,
                        events: events.take_events(),
                    });
                }
                Err(err) if err.is_retryable() && attempt < attempts => {
                    debug!(%fee_id, operation, attempt, error = %err, "retryable save failure, retrying");
                }
                Err(err) => {
                    warn!(%fee_id, operation, attempt, error = %err, "fee save failed");
                    return Err(err);
                }
            }
        }
    }

    pub fn create_fee(&self, new: NewFee) -> Result<Outcome<()>> {
        let mut events = EventStore::new();
        let key = new.key();
        let fee = FeeLedger::create(new, &self.time, &mut events)
            .and_then(|fee| self.repo.insert(fee))
            .map_err(|err| {
                warn!(?key, error = %err, "fee creation rejected");
                err
            })?;

        info!(
            fee_id = %fee.id,
            student_id = %fee.student_id,
            fee_type = ?fee.fee_type,
            final_amount = %fee.amount().final_amount,
            "fee created"
        );
        Ok(Outcome {
            fee,
            value: (),
            events: events.take_events(),
        })
    }

    /// create each fee independently; one failure does not stop the rest
    pub fn bulk_create(&self, fees: Vec<NewFee>) -> BulkCreateReport {
        let mut report = BulkCreateReport::default();
        for (index, new) in fees.into_iter().enumerate() {
            let key = new.key();
            match self.create_fee(new) {
                Ok(outcome) => {
                    report.created.push(outcome.fee);
                    report.events.extend(outcome.events);
                }
                Err(error) => report.failed.push(BulkFailure { index, key, error }),
            }
        }
        info!(
            created = report.created.len(),
            failed = report.failed.len(),
            "bulk fee creation finished"
        );
        report
    }

    pub fn get_fee(&self, fee_id: FeeId) -> Result<FeeLedger> {
        self.repo.get(fee_id)
    }

    /// remove a ledger that never took a payment
    pub fn delete_fee(&self, fee_id: FeeId, deleted_by: Option<&UserId>) -> Result<Vec<LedgerEvent>> {
        let deleted_by = require_actor("fee.deleted_by", deleted_by)?;
        let attempts = self.attempts();
        let mut attempt = 0;
        loop {
            attempt += 1;
            let fee = self.repo.get(fee_id)?;
            if fee.has_payments() {
                warn!(%fee_id, "delete rejected, fee has payments");
                return Err(LedgerError::IrreversibleState {
                    message: format!(
                        "fee {fee_id} has recorded payments; use a concession or refund instead"
                    ),
                });
            }

            match self.repo.delete(fee_id, fee.version()) {
                Ok(_) => {
                    info!(%fee_id, %deleted_by, "fee deleted");
                    return Ok(vec![LedgerEvent::FeeDeleted {
                        fee_id,
                        deleted_by,
                        timestamp: self.time.now(),
                    }]);
                }
                Err(err) if err.is_retryable() && attempt < attempts => {
                    debug!(%fee_id, attempt, error = %err, "retryable delete failure, retrying");
                }
                Err(err) => return Err(err),
            }
        }
    }

    pub fn apply_discount(&self, fee_id: FeeId, request: &DiscountRequest) -> Result<Outcome<DiscountRecord>> {
        self.mutate(fee_id, "apply_discount", |fee, events| {
            fee.apply_discount(request, &self.time, events)
        })
    }

    pub fn apply_concession(
        &self,
        fee_id: FeeId,
        request: &ConcessionRequest,
    ) -> Result<Outcome<ConcessionRecord>> {
        self.mutate(fee_id, "apply_concession", |fee, events| {
            fee.apply_concession(request, &self.time, events)
        })
    }

    pub fn waive_installment(
        &self,
        fee_id: FeeId,
        index: u32,
        approved_by: Option<&UserId>,
        reason: &str,
    ) -> Result<Outcome<Money>> {
        self.mutate(fee_id, "waive_installment", |fee, events| {
            fee.waive_installment(index, approved_by, reason, &self.time, events)
        })
    }

    pub fn set_installment_plan(
        &self,
        fee_id: FeeId,
        spec: &InstallmentSpec,
        updated_by: Option<&UserId>,
    ) -> Result<Outcome<()>> {
        self.mutate(fee_id, "set_installment_plan", |fee, events| {
            fee.set_installment_plan(spec, updated_by, &self.time, events)
        })
    }

    pub fn revise_original(
        &self,
        fee_id: FeeId,
        new_original: Money,
        revised_by: Option<&UserId>,
    ) -> Result<Outcome<()>> {
        self.mutate(fee_id, "revise_original", |fee, events| {
            fee.revise_original(new_original, revised_by, &self.time, events)
        })
    }

    /// record a completed payment
    pub fn add_payment(&self, fee_id: FeeId, request: &PaymentRequest) -> Result<Outcome<PaymentRecord>> {
        self.mutate(fee_id, "add_payment", |fee, events| {
            fee.add_payment(
                request,
                &self.ids,
                |id| self.repo.payment_id_exists(id),
                &self.time,
                events,
            )
        })
    }

    /// record a gateway payment awaiting confirmation
    pub fn record_pending_payment(
        &self,
        fee_id: FeeId,
        request: &PaymentRequest,
    ) -> Result<Outcome<PaymentRecord>> {
        self.mutate(fee_id, "record_pending_payment", |fee, events| {
            fee.record_pending_payment(
                request,
                &self.ids,
                |id| self.repo.payment_id_exists(id),
                &self.time,
                events,
            )
        })
    }

    pub fn confirm_payment(&self, fee_id: FeeId, payment_id: &str) -> Result<Outcome<PaymentRecord>> {
        self.mutate(fee_id, "confirm_payment", |fee, events| {
            fee.confirm_payment(payment_id, &self.time, events)
        })
    }

    pub fn fail_payment(
        &self,
        fee_id: FeeId,
        payment_id: &str,
        reason: Option<String>,
    ) -> Result<Outcome<()>> {
        self.mutate(fee_id, "fail_payment", |fee, events| {
            fee.fail_payment(payment_id, reason.clone(), &self.time, events)
        })
    }

    pub fn cancel_payment(&self, fee_id: FeeId, payment_id: &str) -> Result<Outcome<()>> {
        self.mutate(fee_id, "cancel_payment", |fee, events| {
            fee.cancel_payment(payment_id, &self.time, events)
        })
    }

    pub fn refund_payment(
        &self,
        fee_id: FeeId,
        payment_id: &str,
        refunded_by: Option<&UserId>,
        reason: &str,
    ) -> Result<Outcome<PaymentRecord>> {
        self.mutate(fee_id, "refund_payment", |fee, events| {
            fee.refund_payment(payment_id, refunded_by, reason, &self.time, events)
        })
    }

    pub fn assess_late_fee(&self, fee_id: FeeId) -> Result<Outcome<LateFeeCalculation>> {
        self.mutate(fee_id, "assess_late_fee", |fee, events| {
            Ok(fee.assess_late_fee(&self.late_fees, &self.time, events))
        })
    }

    /// persist the status derived at the current time
    pub fn refresh_fee(&self, fee_id: FeeId) -> Result<Outcome<FeeStatus>> {
        self.mutate(fee_id, "refresh", |fee, events| Ok(fee.refresh(&self.time, events)))
    }

    pub fn add_reminder(&self, fee_id: FeeId, request: ReminderRequest) -> Result<Outcome<Reminder>> {
        self.mutate(fee_id, "add_reminder", |fee, events| {
            Ok(fee.add_reminder(request.clone(), &self.time, events))
        })
    }

    pub fn add_note(
        &self,
        fee_id: FeeId,
        content: &str,
        added_by: Option<&UserId>,
        kind: NoteKind,
        priority: NotePriority,
    ) -> Result<Outcome<()>> {
        self.mutate(fee_id, "add_note", |fee, _| {
            fee.add_note(content, added_by, kind, priority, &self.time)
        })
    }

    /// status at the current time, without persisting it
    pub fn derive_status(&self, fee_id: FeeId) -> Result<FeeStatus> {
        Ok(self.repo.get(fee_id)?.derive_status(self.time.now()))
    }

    /// fees matching `filter`, with status and balances derived at the current time
    ///
    /// Stored statuses can be stale, so the status part of the filter is applied
    /// after re-deriving.
    pub fn find(&self, filter: &FeeFilter) -> Result<Vec<FeeLedger>> {
        let mut query = filter.clone();
        query.statuses.clear();

        let mut scratch = EventStore::new();
        let mut fees = self.repo.find(&query)?;
        for fee in fees.iter_mut() {
            fee.refresh(&self.time, &mut scratch);
        }
        fees.retain(|fee| filter.matches(fee));
        Ok(fees)
    }

    /// open fees due more than `min_days` ago, oldest first
    pub fn find_overdue(&self, min_days: u32) -> Result<Vec<FeeLedger>> {
        let cutoff = self.time.now() - Duration::days(i64::from(min_days));
        let mut fees = self.find(&FeeFilter::new().statuses(&OPEN_STATUSES).due_before(cutoff))?;
        fees.sort_by_key(|fee| fee.effective_due_date());
        Ok(fees)
    }

    /// a student's fees, latest due date first
    pub fn find_by_student(&self, student_id: impl Into<StudentId>) -> Result<Vec<FeeLedger>> {
        let mut fees = self.find(&FeeFilter::new().student(student_id))?;
        fees.sort_by_key(|fee| std::cmp::Reverse(fee.effective_due_date()));
        Ok(fees)
    }

    /// a course's fees, latest due date first
    pub fn find_by_course(&self, course_id: impl Into<CourseId>) -> Result<Vec<FeeLedger>> {
        let mut fees = self.find(&FeeFilter::new().course(course_id))?;
        fees.sort_by_key(|fee| std::cmp::Reverse(fee.effective_due_date()));
        Ok(fees)
    }

    pub fn stats(&self, filter: &FeeFilter) -> Result<FeeStats> {
        Ok(FeeStats::compute(&self.find(filter)?))
    }

    pub fn collection_report(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<CollectionReport> {
        if from >= to {
            return Err(LedgerError::validation("report.range", "start must be before end"));
        }
        Ok(CollectionReport::compute(&self.find(&FeeFilter::new())?, from, to))
    }

    pub fn scan_reminders(&self) -> Result<Vec<ReminderCandidate>> {
        let fees = self.find(&FeeFilter::new().statuses(&OPEN_STATUSES))?;
        Ok(self.scanner.scan(&fees, self.time.now()))
    }

    /// log one reminder per candidate
    pub fn record_reminders(
        &self,
        candidates: &[ReminderCandidate],
        channel: ReminderChannel,
        sent_by: Option<&UserId>,
    ) -> ReminderDispatchReport {
        let mut report = ReminderDispatchReport::default();
        for candidate in candidates {
            let mut request = ReminderRequest::new(channel);
            if let Some(user) = sent_by {
                request = request.sent_by(user.clone());
            }
            match self.add_reminder(candidate.fee_id, request) {
                Ok(outcome) => {
                    report.recorded.push((candidate.fee_id, outcome.value));
                    report.events.extend(outcome.events);
                }
                Err(err) => report.failed.push((candidate.fee_id, err)),
            }
        }
        info!(
            recorded = report.recorded.len(),
            failed = report.failed.len(),
            channel = ?channel,
            "reminders recorded"
        );
        report
    }

    /// re-derive every past-due open fee and store its late fee
    pub fn run_overdue_sweep(&self) -> Result<SweepReport> {
        let now = self.time.now();
        let fees = self.find(&FeeFilter::new().statuses(&OPEN_STATUSES).due_before(now))?;

        let mut report = SweepReport {
            scanned: fees.len(),
            ..SweepReport::default()
        };
        for fee in fees {
            match self.assess_late_fee(fee.id) {
                Ok(outcome) => {
                    if outcome.value.amount.is_positive() {
                        report.total_late_fees += outcome.value.amount;
                        report.assessed.push((fee.id, outcome.value));
                    }
                    report.events.extend(outcome.events);
                }
                Err(err) => report.failed.push((fee.id, err)),
            }
        }
        info!(
            scanned = report.scanned,
            assessed = report.assessed.len(),
            total = %report.total_late_fees,
            "overdue sweep finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adjustments::ConcessionTerms;
    use crate::store::InMemoryFeeStore;
    use crate::types::{FeeType, PaymentMethod};
    use chrono::TimeZone;
    use hourglass_rs::TimeSource;
    use parking_lot::Mutex;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 1, 9, 0, 0).unwrap()
    }

    fn service() -> FeeLedgerService<InMemoryFeeStore> {
        FeeLedgerService::new(
            InMemoryFeeStore::new(),
            LedgerConfig::standard(),
            SafeTimeProvider::new(TimeSource::Test(start())),
        )
        .unwrap()
    }

    fn new_fee(student: &str, amount: i64, due_in_days: i64) -> NewFee {
        NewFee::builder()
            .student(student)
            .course("bca")
            .fee_type(FeeType::Tuition)
            .academic_year("2025-2026")
            .amount(Money::from_major(amount))
            .due_date(start() + Duration::days(due_in_days))
            .created_by("admin-1")
            .build()
            .unwrap()
    }

    fn admin() -> UserId {
        "admin-1".to_string()
    }

    #[test]
    fn test_create_rejects_duplicate() {
        let svc = service();
        let created = svc.create_fee(new_fee("s1", 10_000, 30)).unwrap();
        assert_eq!(created.fee.version(), 1);
        assert!(matches!(created.events[0], LedgerEvent::FeeCreated { .. }));

        let err = svc.create_fee(new_fee("s1", 5_000, 60)).unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateLedger { .. }));
    }

    #[test]
    fn test_bulk_create_reports_each_item() {
        let svc = service();
        let report = svc.bulk_create(vec![
            new_fee("s1", 1_000, 30),
            new_fee("s2", 1_000, 30),
            new_fee("s1", 2_000, 30),
        ]);
        assert_eq!(report.created.len(), 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].index, 2);
        assert!(!report.is_complete());
        assert_eq!(svc.repository().count(), 2);
    }

    #[test]
    fn test_payment_flow_bumps_version() {
        let svc = service();
        let id = svc.create_fee(new_fee("s1", 10_000, 30)).unwrap().fee.id;

        let paid = svc
            .add_payment(id, &PaymentRequest::new(Money::from_major(4_000), PaymentMethod::Upi))
            .unwrap();
        assert_eq!(paid.fee.version(), 2);
        assert_eq!(paid.fee.status(), FeeStatus::Partial);
        assert!(svc.repository().payment_id_exists(&paid.value.payment_id));

        let err = svc
            .add_payment(id, &PaymentRequest::new(Money::from_major(6_001), PaymentMethod::Upi))
            .unwrap_err();
        assert!(matches!(err, LedgerError::Overpayment { .. }));
        assert_eq!(svc.get_fee(id).unwrap().version(), 2);
    }

    #[test]
    fn test_delete_rules() {
        let svc = service();
        let untouched = svc.create_fee(new_fee("s1", 1_000, 30)).unwrap().fee.id;
        let paid = svc.create_fee(new_fee("s2", 1_000, 30)).unwrap().fee.id;
        svc.add_payment(paid, &PaymentRequest::new(Money::from_major(100), PaymentMethod::Cash))
            .unwrap();

        assert!(svc.delete_fee(untouched, None).is_err());
        let events = svc.delete_fee(untouched, Some(&admin())).unwrap();
        assert!(matches!(events[0], LedgerEvent::FeeDeleted { .. }));
        assert!(matches!(svc.get_fee(untouched), Err(LedgerError::FeeNotFound { .. })));

        let err = svc.delete_fee(paid, Some(&admin())).unwrap_err();
        assert!(matches!(err, LedgerError::IrreversibleState { .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_find_overdue_uses_current_time() {
        let svc = service();
        let soon = svc.create_fee(new_fee("s1", 1_000, 5)).unwrap().fee.id;
        svc.create_fee(new_fee("s2", 1_000, 40)).unwrap();
        assert!(svc.find_overdue(0).unwrap().is_empty());

        svc.time().test_control().unwrap().advance(Duration::days(10));
        let overdue = svc.find_overdue(0).unwrap();
        assert_eq!(overdue.len(), 1);
        assert_eq!(overdue[0].id, soon);
        assert_eq!(overdue[0].status(), FeeStatus::Overdue);
        assert!(svc.find_overdue(7).unwrap().is_empty());

        // stored copy is untouched until refreshed
        assert_eq!(svc.get_fee(soon).unwrap().status(), FeeStatus::Pending);
        assert_eq!(svc.derive_status(soon).unwrap(), FeeStatus::Overdue);
        assert_eq!(svc.refresh_fee(soon).unwrap().value, FeeStatus::Overdue);
    }

    #[test]
    fn test_partial_late_fee_still_found_overdue() {
        let svc = service();
        let id = svc.create_fee(new_fee("s1", 1_000, 5)).unwrap().fee.id;
        svc.add_payment(id, &PaymentRequest::new(Money::from_major(200), PaymentMethod::Cash))
            .unwrap();
        svc.time().test_control().unwrap().advance(Duration::days(10));

        let overdue = svc.find_overdue(0).unwrap();
        assert_eq!(overdue.len(), 1);
        assert_eq!(overdue[0].status(), FeeStatus::Partial);
    }

    #[test]
    fn test_find_by_student_sorted() {
        let svc = service();
        let mut library = new_fee("s1", 500, 10);
        library.fee_type = FeeType::Library;
        svc.create_fee(library).unwrap();
        svc.create_fee(new_fee("s1", 1_000, 60)).unwrap();
        svc.create_fee(new_fee("s2", 1_000, 60)).unwrap();

        let fees = svc.find_by_student("s1").unwrap();
        assert_eq!(fees.len(), 2);
        assert_eq!(fees[0].fee_type, FeeType::Tuition);
        assert_eq!(svc.find_by_course("bca").unwrap().len(), 3);
    }

    #[test]
    fn test_concession_and_late_fee_sweep() {
        let svc = service();
        let waived = svc.create_fee(new_fee("s1", 10_000, 5)).unwrap().fee.id;
        let charged = svc.create_fee(new_fee("s2", 10_000, 5)).unwrap().fee.id;

        svc.apply_concession(
            waived,
            &ConcessionRequest::new(ConcessionTerms::LateFeeWaiver, "hardship").approved_by("principal"),
        )
        .unwrap();

        svc.time().test_control().unwrap().advance(Duration::days(20));
        let report = svc.run_overdue_sweep().unwrap();
        assert_eq!(report.scanned, 2);
        assert_eq!(report.assessed.len(), 1);
        assert_eq!(report.assessed[0].0, charged);
        assert_eq!(report.total_late_fees, Money::from_major(100));

        let stored = svc.get_fee(charged).unwrap();
        assert_eq!(stored.late_fee().amount, Money::from_major(100));
        // billed separately
        assert_eq!(stored.pending_amount(), Money::from_major(10_000));
    }

    #[test]
    fn test_reminder_scan_and_record() {
        let svc = service();
        svc.create_fee(new_fee("s1", 1_000, 2)).unwrap();
        svc.create_fee(new_fee("s2", 1_000, 30)).unwrap();

        let candidates = svc.scan_reminders().unwrap();
        assert_eq!(candidates.len(), 1);

        let report = svc.record_reminders(&candidates, ReminderChannel::Email, Some(&admin()));
        assert_eq!(report.recorded.len(), 1);
        assert!(report.failed.is_empty());
        assert!(svc.scan_reminders().unwrap().is_empty());
    }

    #[test]
    fn test_stats_and_collection_report() {
        let svc = service();
        let id = svc.create_fee(new_fee("s1", 1_000, 30)).unwrap().fee.id;
        svc.create_fee(new_fee("s2", 2_000, 30)).unwrap();
        svc.add_payment(id, &PaymentRequest::new(Money::from_major(1_000), PaymentMethod::Card))
            .unwrap();

        let stats = svc.stats(&FeeFilter::new()).unwrap();
        assert_eq!(stats.total_paid, Money::from_major(1_000));
        assert_eq!(stats.total_pending, Money::from_major(2_000));

        let now = svc.time().now();
        let report = svc.collection_report(now - Duration::days(1), now + Duration::days(1)).unwrap();
        assert_eq!(report.total_collected, Money::from_major(1_000));
        assert!(svc.collection_report(now, now).is_err());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = LedgerConfig::standard();
        config.late_fee.cap = crate::decimal::Rate::from_decimal(dec!(-0.1));
        let result = FeeLedgerService::new(
            InMemoryFeeStore::new(),
            config,
            SafeTimeProvider::new(TimeSource::Test(start())),
        );
        assert!(result.is_err());
    }

    /// store that reports a conflict on the first `conflicts` saves
    struct ConflictingStore {
        inner: InMemoryFeeStore,
        conflicts: Mutex<u32>,
    }

    impl FeeRepository for ConflictingStore {
        fn insert(&self, fee: FeeLedger) -> Result<FeeLedger> {
            self.inner.insert(fee)
        }

        fn get(&self, id: FeeId) -> Result<FeeLedger> {
            self.inner.get(id)
        }

        fn save(&self, fee: FeeLedger, expected_version: u64) -> Result<FeeLedger> {
            let mut remaining = self.conflicts.lock();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(LedgerError::ConcurrentModification {
                    fee_id: fee.id,
                    expected: expected_version,
                    found: expected_version + 1,
                });
            }
            self.inner.save(fee, expected_version)
        }

        fn delete(&self, id: FeeId, expected_version: u64) -> Result<FeeLedger> {
            self.inner.delete(id, expected_version)
        }

        fn find(&self, filter: &FeeFilter) -> Result<Vec<FeeLedger>> {
            self.inner.find(filter)
        }

        fn payment_id_exists(&self, payment_id: &str) -> bool {
            self.inner.payment_id_exists(payment_id)
        }

        fn count(&self) -> usize {
            self.inner.count()
        }
    }

    fn conflicting_service(conflicts: u32, retries: u32) -> FeeLedgerService<ConflictingStore> {
        let mut config = LedgerConfig::standard();
        config.max_conflict_retries = retries;
        let store = ConflictingStore {
            inner: InMemoryFeeStore::new(),
            conflicts: Mutex::new(0),
        };
        let svc = FeeLedgerService::new(store, config, SafeTimeProvider::new(TimeSource::Test(start())))
            .unwrap();
        *svc.repository().conflicts.lock() = conflicts;
        svc
    }

    #[test]
    fn test_conflict_retried() {
        let svc = conflicting_service(0, 3);
        let id = svc.create_fee(new_fee("s1", 1_000, 30)).unwrap().fee.id;
        *svc.repository().conflicts.lock() = 2;

        let outcome = svc
            .add_payment(id, &PaymentRequest::new(Money::from_major(300), PaymentMethod::Cash))
            .unwrap();
        assert_eq!(outcome.fee.paid_amount(), Money::from_major(300));
        assert_eq!(outcome.fee.payments().len(), 1);
    }

    #[test]
    fn test_conflict_surfaces_without_retries() {
        let svc = conflicting_service(0, 0);
        let id = svc.create_fee(new_fee("s1", 1_000, 30)).unwrap().fee.id;
        *svc.repository().conflicts.lock() = 1;

        let err = svc
            .add_payment(id, &PaymentRequest::new(Money::from_major(300), PaymentMethod::Cash))
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(!svc.get_fee(id).unwrap().has_payments());
    }

    /// store where another writer claims the incoming payment id just before the first save lands
    struct RacingStore {
        inner: InMemoryFeeStore,
        rival: Mutex<Option<FeeLedger>>,
        ids: PaymentIdGenerator,
        time: SafeTimeProvider,
    }

    impl FeeRepository for RacingStore {
        fn insert(&self, fee: FeeLedger) -> Result<FeeLedger> {
            self.inner.insert(fee)
        }

        fn get(&self, id: FeeId) -> Result<FeeLedger> {
            self.inner.get(id)
        }

        fn save(&self, fee: FeeLedger, expected_version: u64) -> Result<FeeLedger> {
            if let Some(mut rival) = self.rival.lock().take() {
                let target = fee
                    .payments()
                    .iter()
                    .find(|p| !self.inner.payment_id_exists(&p.payment_id))
                    .map(|p| p.payment_id.clone())
                    .unwrap();
                rival
                    .add_payment(
                        &PaymentRequest::new(Money::from_major(10), PaymentMethod::Cash),
                        &self.ids,
                        |candidate| candidate != target,
                        &self.time,
                        &mut EventStore::new(),
                    )
                    .unwrap();
                let version = rival.version();
                self.inner.save(rival, version).unwrap();
            }
            self.inner.save(fee, expected_version)
        }

        fn delete(&self, id: FeeId, expected_version: u64) -> Result<FeeLedger> {
            self.inner.delete(id, expected_version)
        }

        fn find(&self, filter: &FeeFilter) -> Result<Vec<FeeLedger>> {
            self.inner.find(filter)
        }

        fn payment_id_exists(&self, payment_id: &str) -> bool {
            self.inner.payment_id_exists(payment_id)
        }

        fn count(&self) -> usize {
            self.inner.count()
        }
    }

    #[test]
    fn test_payment_id_taken_by_another_fee_is_retried() {
        let mut config = LedgerConfig::standard();
        config.payment_ids.suffix_digits = 1;
        config.payment_ids.max_attempts = 1_000;
        let store = RacingStore {
            inner: InMemoryFeeStore::new(),
            rival: Mutex::new(None),
            ids: PaymentIdGenerator::new(config.payment_ids.clone()),
            time: SafeTimeProvider::new(TimeSource::Test(start())),
        };
        let svc = FeeLedgerService::new(store, config, SafeTimeProvider::new(TimeSource::Test(start())))
            .unwrap();
        let rival = svc.create_fee(new_fee("s1", 1_000, 30)).unwrap().fee;
        let id = svc.create_fee(new_fee("s2", 1_000, 30)).unwrap().fee.id;
        *svc.repository().rival.lock() = Some(rival.clone());

        let outcome = svc
            .add_payment(id, &PaymentRequest::new(Money::from_major(300), PaymentMethod::Cash))
            .unwrap();
        assert!(svc.repository().rival.lock().is_none());
        assert_eq!(outcome.fee.payments().len(), 1);
        assert_eq!(outcome.fee.paid_amount(), Money::from_major(300));

        let rival = svc.get_fee(rival.id).unwrap();
        let claimed = &rival.payments()[0].payment_id;
        assert_ne!(&outcome.value.payment_id, claimed);
        assert!(svc.repository().payment_id_exists(&outcome.value.payment_id));
    }

    #[test]
    fn test_concurrent_payments_never_overpay() {
        let store = Arc::new(InMemoryFeeStore::new());
        let mut config = LedgerConfig::standard();
        config.max_conflict_retries = 50;

        let setup = FeeLedgerService::new(
            Arc::clone(&store),
            config.clone(),
            SafeTimeProvider::new(TimeSource::Test(start())),
        )
        .unwrap();
        let id = setup.create_fee(new_fee("s1", 1_000, 30)).unwrap().fee.id;

        let accepted: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let store = Arc::clone(&store);
                    let config = config.clone();
                    scope.spawn(move || {
                        let svc = FeeLedgerService::new(
                            store,
                            config,
                            SafeTimeProvider::new(TimeSource::Test(start())),
                        )
                        .unwrap();
                        svc.add_payment(id, &PaymentRequest::new(Money::from_major(300), PaymentMethod::Upi))
                            .is_ok() as usize
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });

        let fee = store.get(id).unwrap();
        assert_eq!(accepted, 3);
        assert_eq!(fee.paid_amount(), Money::from_major(900));
        assert_eq!(fee.payments().len(), 3);
        assert_eq!(fee.version(), 4);
    }
}
