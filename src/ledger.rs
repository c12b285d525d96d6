use chrono::{DateTime, Utc};
use hourglass_rs::SafeTimeProvider;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::adjustments::{
    require_actor, require_reason, ConcessionEffect, ConcessionEngine, ConcessionRecord,
    ConcessionRequest, DiscountEngine, DiscountRecord, DiscountRequest,
};
use crate::amount::{compute_final, FeeAmount};
use crate::decimal::{Money, Rate};
use crate::errors::{LedgerError, Result};
use crate::events::{EventStore, LedgerEvent};
use crate::installments::InstallmentPlan;
use crate::late_fee::{days_overdue, LateFeeCalculation, LateFeeEngine, LateFeeState};
use crate::payments::{self, PaymentIdGenerator, PaymentRecord, PaymentRequest, RefundRecord};
use crate::status;
use crate::types::{
    AcademicYear, CourseId, FeeId, FeeSource, FeeStatus, FeeType, InstallmentFrequency,
    InstallmentStatus, LedgerKey, NoteKind, NotePriority, PaymentStatus, ReminderChannel,
    ReminderStatus, Semester, StudentId, UserId,
};

/// audit metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct FeeMetadata {
    pub created_by: Option<UserId>,
    pub updated_by: Option<UserId>,
    pub source: FeeSource,
    /// lower-cased, trimmed, unique
    pub tags: Vec<String>,
}

impl FeeMetadata {
    pub fn add_tag(&mut self, tag: &str) {
        let tag = tag.trim().to_lowercase();
        if !tag.is_empty() && !self.tags.contains(&tag) {
            self.tags.push(tag);
        }
    }
}

/// reminder dispatch attempt as reported by the notification collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReminderRequest {
    pub channel: ReminderChannel,
    pub sent_by: Option<UserId>,
    pub template: Option<String>,
    pub status: ReminderStatus,
    pub response: Option<String>,
}

impl ReminderRequest {
    pub fn new(channel: ReminderChannel) -> Self {
        Self {
            channel,
            sent_by: None,
            template: None,
            status: ReminderStatus::Sent,
            response: None,
        }
    }

    pub fn sent_by(mut self, user: impl Into<UserId>) -> Self {
        self.sent_by = Some(user.into());
        self
    }

    pub fn template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    pub fn status(mut self, status: ReminderStatus) -> Self {
        self.status = status;
        self
    }

    pub fn response(mut self, response: impl Into<String>) -> Self {
        self.response = Some(response.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reminder {
    pub channel: ReminderChannel,
    pub sent_at: DateTime<Utc>,
    pub sent_by: Option<UserId>,
    pub template: Option<String>,
    pub status: ReminderStatus,
    pub response: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub content: String,
    pub added_by: UserId,
    pub added_at: DateTime<Utc>,
    pub kind: NoteKind,
    pub priority: NotePriority,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomTranche {
    pub amount: Money,
    pub due_date: DateTime<Utc>,
}

/// how to build an installment plan against the fee's final amount
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InstallmentSpec {
    Generated {
        frequency: InstallmentFrequency,
        count: u32,
        /// defaults to the fee due date
        first_due: Option<DateTime<Utc>>,
    },
    Custom {
        tranches: Vec<CustomTranche>,
    },
}

impl InstallmentSpec {
    pub fn build(&self, total: Money, fee_due: DateTime<Utc>) -> Result<InstallmentPlan> {
        match self {
            InstallmentSpec::Generated {
                frequency,
                count,
                first_due,
            } => InstallmentPlan::generate(total, *frequency, *count, first_due.unwrap_or(fee_due)),
            InstallmentSpec::Custom { tranches } => {
                let tranches: Vec<(Money, DateTime<Utc>)> =
                    tranches.iter().map(|t| (t.amount, t.due_date)).collect();
                InstallmentPlan::custom(total, &tranches)
            }
        }
    }
}

/// input for creating a fee ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewFee {
    pub student_id: StudentId,
    pub course_id: CourseId,
    pub fee_type: FeeType,
    pub academic_year: AcademicYear,
    #[serde(default)]
    pub semester: Semester,
    pub description: Option<String>,
    pub original: Money,
    #[serde(default)]
    pub tax: Money,
    pub due_date: DateTime<Utc>,
    #[serde(default)]
    pub late_fee_percentage: Rate,
    pub installments: Option<InstallmentSpec>,
    #[serde(default)]
    pub metadata: FeeMetadata,
}

impl NewFee {
    pub fn builder() -> NewFeeBuilder {
        NewFeeBuilder::new()
    }

    pub fn key(&self) -> LedgerKey {
        LedgerKey {
            student_id: self.student_id.clone(),
            course_id: self.course_id.clone(),
            fee_type: self.fee_type,
            academic_year: self.academic_year.clone(),
            semester: self.semester,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.student_id.trim().is_empty() {
            return Err(LedgerError::validation("student_id", "student is required"));
        }
        if self.course_id.trim().is_empty() {
            return Err(LedgerError::validation("course_id", "course is required"));
        }
        if self.original.is_negative() {
            return Err(LedgerError::validation("amount.original", "amount cannot be negative"));
        }
        if self.tax.is_negative() {
            return Err(LedgerError::validation("amount.tax", "tax cannot be negative"));
        }
        let pct = self.late_fee_percentage.as_percentage();
        if pct < Decimal::ZERO || pct > Decimal::from(100) {
            return Err(LedgerError::validation(
                "late_fee.percentage",
                format!("late fee percentage must be within 0-100, got {}", pct),
            ));
        }
        Ok(())
    }
}

/// builder for [`NewFee`]
#[derive(Debug, Default)]
pub struct NewFeeBuilder {
    student_id: Option<StudentId>,
    course_id: Option<CourseId>,
    fee_type: FeeType,
    academic_year: Option<String>,
    semester: Semester,
    description: Option<String>,
    original: Option<Money>,
    tax: Money,
    due_date: Option<DateTime<Utc>>,
    late_fee_percentage: Decimal,
    installments: Option<InstallmentSpec>,
    metadata: FeeMetadata,
}

impl NewFeeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn student(mut self, student_id: impl Into<StudentId>) -> Self {
        self.student_id = Some(student_id.into());
        self
    }

    pub fn course(mut self, course_id: impl Into<CourseId>) -> Self {
        self.course_id = Some(course_id.into());
        self
    }

    pub fn fee_type(mut self, fee_type: FeeType) -> Self {
        self.fee_type = fee_type;
        self
    }

    pub fn academic_year(mut self, year: impl Into<String>) -> Self {
        self.academic_year = Some(year.into());
        self
    }

    pub fn semester(mut self, semester: Semester) -> Self {
        self.semester = semester;
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn amount(mut self, original: Money) -> Self {
        self.original = Some(original);
        self
    }

    pub fn tax(mut self, tax: Money) -> Self {
        self.tax = tax;
        self
    }

    pub fn due_date(mut self, due_date: DateTime<Utc>) -> Self {
        self.due_date = Some(due_date);
        self
    }

    /// flat late fee for this fee, as a percentage of pending
    pub fn late_fee_percentage(mut self, percentage: Decimal) -> Self {
        self.late_fee_percentage = percentage;
        self
    }

    pub fn installments(mut self, frequency: InstallmentFrequency, count: u32) -> Self {
        self.installments = Some(InstallmentSpec::Generated {
            frequency,
            count,
            first_due: None,
        });
        self
    }

    pub fn custom_installments(mut self, tranches: Vec<CustomTranche>) -> Self {
        self.installments = Some(InstallmentSpec::Custom { tranches });
        self
    }

    pub fn created_by(mut self, user: impl Into<UserId>) -> Self {
        self.metadata.created_by = Some(user.into());
        self
    }

    pub fn source(mut self, source: FeeSource) -> Self {
        self.metadata.source = source;
        self
    }

    pub fn tag(mut self, tag: &str) -> Self {
        self.metadata.add_tag(tag);
        self
    }

    pub fn build(self) -> Result<NewFee> {
        let student_id = self
            .student_id
            .ok_or_else(|| LedgerError::validation("student_id", "student is required"))?;
        let course_id = self
            .course_id
            .ok_or_else(|| LedgerError::validation("course_id", "course is required"))?;
        let academic_year: AcademicYear = self
            .academic_year
            .ok_or_else(|| LedgerError::validation("academic_year", "academic year is required"))?
            .parse()?;
        let original = self
            .original
            .ok_or_else(|| LedgerError::validation("amount.original", "amount is required"))?;
        let due_date = self
            .due_date
            .ok_or_else(|| LedgerError::validation("due_date", "due date is required"))?;

        let fee = NewFee {
            student_id,
            course_id,
            fee_type: self.fee_type,
            academic_year,
            semester: self.semester,
            description: self.description,
            original,
            tax: self.tax,
            due_date,
            late_fee_percentage: Rate::from_percentage_decimal(self.late_fee_percentage),
            installments: self.installments,
            metadata: self.metadata,
        };
        fee.validate()?;
        Ok(fee)
    }
}

/// one fee obligation with its append-only logs
///
/// balances and status are cached and only written by `refresh`, which every
/// mutation runs last after all of its checks pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeLedger {
    pub id: FeeId,
    pub student_id: StudentId,
    pub course_id: CourseId,
    pub fee_type: FeeType,
    pub academic_year: AcademicYear,
    pub semester: Semester,
    pub description: Option<String>,
    pub due_date: DateTime<Utc>,
    pub metadata: FeeMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    amount: FeeAmount,
    discounts: Vec<DiscountRecord>,
    concessions: Vec<ConcessionRecord>,
    installment_plan: Option<InstallmentPlan>,
    payments: Vec<PaymentRecord>,
    late_fee: LateFeeState,
    reminders: Vec<Reminder>,
    notes: Vec<Note>,

    // derived, written only by refresh
    status: FeeStatus,
    paid_amount: Money,
    pending_amount: Money,
    overdue_amount: Money,

    version: u64,
}

impl FeeLedger {
    /// create a ledger; status is derived immediately
    pub fn create(new: NewFee, time: &SafeTimeProvider, events: &mut EventStore) -> Result<Self> {
        new.validate()?;
        let now = time.now();
        let amount = FeeAmount::new(new.original, new.tax)?;
        let installment_plan = match &new.installments {
            Some(spec) => Some(spec.build(amount.final_amount, new.due_date)?),
            None => None,
        };

        let mut ledger = Self {
            id: Uuid::new_v4(),
            student_id: new.student_id,
            course_id: new.course_id,
            fee_type: new.fee_type,
            academic_year: new.academic_year,
            semester: new.semester,
            description: new.description,
            due_date: new.due_date,
            metadata: new.metadata,
            created_at: now,
            updated_at: now,
            amount,
            discounts: Vec::new(),
            concessions: Vec::new(),
            installment_plan,
            payments: Vec::new(),
            late_fee: LateFeeState::with_percentage(new.late_fee_percentage),
            reminders: Vec::new(),
            notes: Vec::new(),
            status: FeeStatus::Pending,
            paid_amount: Money::ZERO,
            pending_amount: amount.final_amount,
            overdue_amount: Money::ZERO,
            version: 0,
        };

        events.emit(LedgerEvent::FeeCreated {
            fee_id: ledger.id,
            student_id: ledger.student_id.clone(),
            course_id: ledger.course_id.clone(),
            fee_type: ledger.fee_type,
            amount: ledger.amount.final_amount,
            due_date: ledger.due_date,
            timestamp: now,
        });
        if let Some(plan) = &ledger.installment_plan {
            ledger.emit_plan_created(plan, now, events);
        }

        ledger.refresh_at(now, events);
        Ok(ledger)
    }

    pub fn key(&self) -> LedgerKey {
        LedgerKey {
            student_id: self.student_id.clone(),
            course_id: self.course_id.clone(),
            fee_type: self.fee_type,
            academic_year: self.academic_year.clone(),
            semester: self.semester,
        }
    }

    pub fn amount(&self) -> &FeeAmount {
        &self.amount
    }

    pub fn status(&self) -> FeeStatus {
        self.status
    }

    pub fn paid_amount(&self) -> Money {
        self.paid_amount
    }

    pub fn pending_amount(&self) -> Money {
        self.pending_amount
    }

    pub fn overdue_amount(&self) -> Money {
        self.overdue_amount
    }

    pub fn discounts(&self) -> &[DiscountRecord] {
        &self.discounts
    }

    pub fn concessions(&self) -> &[ConcessionRecord] {
        &self.concessions
    }

    pub fn installment_plan(&self) -> Option<&InstallmentPlan> {
        self.installment_plan.as_ref()
    }

    pub fn payments(&self) -> &[PaymentRecord] {
        &self.payments
    }

    pub fn payment(&self, payment_id: &str) -> Option<&PaymentRecord> {
        self.payments.iter().find(|p| p.payment_id == payment_id)
    }

    pub fn has_payment(&self, payment_id: &str) -> bool {
        self.payment(payment_id).is_some()
    }

    /// any payment attempt at all, whatever its status
    pub fn has_payments(&self) -> bool {
        !self.payments.is_empty()
    }

    pub fn late_fee(&self) -> &LateFeeState {
        &self.late_fee
    }

    pub fn reminders(&self) -> &[Reminder] {
        &self.reminders
    }

    pub fn last_reminder_at(&self) -> Option<DateTime<Utc>> {
        self.reminders.iter().map(|r| r.sent_at).max()
    }

    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub(crate) fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    /// next unpaid installment's due date, else the fee due date
    pub fn effective_due_date(&self) -> DateTime<Utc> {
        self.installment_plan
            .as_ref()
            .and_then(|plan| plan.next_due())
            .map(|installment| installment.due_date)
            .unwrap_or(self.due_date)
    }

    /// pending computed straight from the payment log
    fn current_pending(&self) -> Money {
        self.amount
            .final_amount
            .saturating_sub(payments::completed_total(&self.payments))
    }

    /// pure status derivation at `now`; does not touch the cached fields
    pub fn derive_status(&self, now: DateTime<Utc>) -> FeeStatus {
        status::derive_status(
            payments::completed_total(&self.payments),
            self.amount.final_amount,
            self.effective_due_date(),
            now,
        )
    }

    /// whole days the effective due date has passed with money still pending
    pub fn days_overdue(&self, now: DateTime<Utc>) -> u32 {
        if !self.current_pending().is_positive() {
            return 0;
        }
        days_overdue(self.effective_due_date(), now)
    }

    pub fn is_past_due(&self, now: DateTime<Utc>) -> bool {
        status::is_past_due(self.current_pending(), self.effective_due_date(), now)
    }

    /// late fee the ledger would owe at `now`; zero unless overdue and not waived
    pub fn calculate_late_fee(&self, engine: &LateFeeEngine, now: DateTime<Utc>) -> LateFeeCalculation {
        engine.assess(
            &self.late_fee,
            self.derive_status(now),
            self.current_pending(),
            self.effective_due_date(),
            now,
        )
    }

    /// re-derive cached balances and status at the provider's current time
    pub fn refresh(&mut self, time: &SafeTimeProvider, events: &mut EventStore) -> FeeStatus {
        self.refresh_at(time.now(), events);
        self.status
    }

    fn refresh_at(&mut self, now: DateTime<Utc>, events: &mut EventStore) {
        self.amount.recompute();
        let paid = payments::completed_total(&self.payments);

        if let Some(plan) = self.installment_plan.as_mut() {
            let mut completed: Vec<(Money, DateTime<Utc>)> = self
                .payments
                .iter()
                .filter(|p| p.is_completed())
                .map(|p| (p.amount, p.completed_at.unwrap_or(p.paid_at)))
                .collect();
            completed.sort_by_key(|(_, at)| *at);
            plan.allocate(&completed, now);
        }

        let due = self.effective_due_date();
        let derived = status::derive(paid, self.amount.final_amount, due, now);
        let old_status = self.status;

        self.status = derived.status;
        self.paid_amount = derived.paid_amount;
        self.pending_amount = derived.pending_amount;
        self.overdue_amount = derived.overdue_amount;

        if old_status == derived.status {
            return;
        }

        debug!(fee_id = %self.id, from = ?old_status, to = ?derived.status, "fee status changed");
        events.emit(LedgerEvent::StatusChanged {
            fee_id: self.id,
            old_status,
            new_status: derived.status,
            timestamp: now,
        });
        match derived.status {
            FeeStatus::Paid => events.emit(LedgerEvent::FeePaid {
                fee_id: self.id,
                student_id: self.student_id.clone(),
                course_id: self.course_id.clone(),
                fee_type: self.fee_type,
                total_paid: paid,
                timestamp: now,
            }),
            FeeStatus::Overdue => events.emit(LedgerEvent::FeeBecameOverdue {
                fee_id: self.id,
                student_id: self.student_id.clone(),
                pending_amount: derived.pending_amount,
                due_date: due,
                timestamp: now,
            }),
            FeeStatus::Pending | FeeStatus::Partial => {}
        }
    }

    fn touch(&mut self, now: DateTime<Utc>, actor: Option<&UserId>) {
        self.updated_at = now;
        if let Some(actor) = actor {
            self.metadata.updated_by = Some(actor.clone());
        }
    }

    fn emit_plan_created(&self, plan: &InstallmentPlan, now: DateTime<Utc>, events: &mut EventStore) {
        events.emit(LedgerEvent::InstallmentPlanCreated {
            fee_id: self.id,
            installments: plan.len() as u32,
            first_due: plan
                .installments
                .first()
                .map(|i| i.due_date)
                .unwrap_or(self.due_date),
            timestamp: now,
        });
    }

    /// plan with `reduction` absorbed from its latest unpaid tranches
    fn plan_after_reduction(&self, reduction: Money) -> Result<Option<InstallmentPlan>> {
        match &self.installment_plan {
            Some(plan) => {
                let mut plan = plan.clone();
                plan.absorb_reduction(reduction)?;
                Ok(Some(plan))
            }
            None => Ok(None),
        }
    }

    /// attach or replace the installment plan; only before any payment is recorded
    pub fn set_installment_plan(
        &mut self,
        spec: &InstallmentSpec,
        updated_by: Option<&UserId>,
        time: &SafeTimeProvider,
        events: &mut EventStore,
    ) -> Result<()> {
        if self.has_payments() {
            return Err(LedgerError::validation(
                "installments",
                "installment plan cannot change once payments are recorded",
            ));
        }
        let now = time.now();
        let plan = spec.build(self.amount.final_amount, self.due_date)?;

        self.emit_plan_created(&plan, now, events);
        self.installment_plan = Some(plan);
        self.touch(now, updated_by);
        self.refresh_at(now, events);
        Ok(())
    }

    /// revise the original amount; prior discount amounts stay as they were applied
    pub fn revise_original(
        &mut self,
        new_original: Money,
        revised_by: Option<&UserId>,
        time: &SafeTimeProvider,
        events: &mut EventStore,
    ) -> Result<()> {
        let revised_by = require_actor("amount.revised_by", revised_by)?;
        if new_original.is_negative() {
            return Err(LedgerError::validation("amount.original", "amount cannot be negative"));
        }
        let now = time.now();
        let paid = payments::completed_total(&self.payments);
        let old_final = self.amount.final_amount;
        let new_final = compute_final(new_original, self.amount.discount, self.amount.tax);
        if new_final < paid {
            return Err(LedgerError::validation(
                "amount.original",
                format!("final amount {} would fall below amount already paid {}", new_final, paid),
            ));
        }

        let plan = match &self.installment_plan {
            Some(plan) => {
                let mut plan = plan.clone();
                if new_final < old_final {
                    plan.absorb_reduction(old_final - new_final)?;
                } else if new_final > old_final {
                    plan.extend_last(new_final - old_final)?;
                }
                Some(plan)
            }
            None => None,
        };

        let old_original = self.amount.original;
        self.installment_plan = plan;
        self.amount.original = new_original;
        self.amount.recompute();
        self.touch(now, Some(&revised_by));

        events.emit(LedgerEvent::AmountRevised {
            fee_id: self.id,
            old_original,
            new_original,
            new_final: self.amount.final_amount,
            revised_by,
            timestamp: now,
        });
        self.refresh_at(now, events);
        Ok(())
    }

    /// apply a discount; the resolved amount is frozen in the record
    pub fn apply_discount(
        &mut self,
        request: &DiscountRequest,
        time: &SafeTimeProvider,
        events: &mut EventStore,
    ) -> Result<DiscountRecord> {
        let now = time.now();
        let record = DiscountEngine::prepare(request, &self.amount, self.current_pending(), now)?;
        let plan = self.plan_after_reduction(record.amount)?;

        self.installment_plan = plan;
        self.amount.add_discount(record.amount);
        self.discounts.push(record.clone());
        self.touch(now, Some(&record.applied_by));

        events.emit(LedgerEvent::DiscountApplied {
            fee_id: self.id,
            kind: record.kind,
            amount: record.amount,
            new_final: self.amount.final_amount,
            applied_by: record.applied_by.clone(),
            timestamp: now,
        });
        self.refresh_at(now, events);
        Ok(record)
    }

    /// apply an approved concession
    pub fn apply_concession(
        &mut self,
        request: &ConcessionRequest,
        time: &SafeTimeProvider,
        events: &mut EventStore,
    ) -> Result<ConcessionRecord> {
        let now = time.now();
        let (record, effect) = ConcessionEngine::prepare(
            request,
            self.current_pending(),
            self.effective_due_date(),
            self.late_fee.waived,
            now,
        )?;

        match effect {
            ConcessionEffect::Reduce(amount) => {
                let plan = self.plan_after_reduction(amount)?;
                self.installment_plan = plan;
                self.amount.add_discount(amount);
            }
            ConcessionEffect::ExtendDueDate(new_due) => match &self.installment_plan {
                Some(plan) if plan.next_due().is_some() => {
                    let mut plan = plan.clone();
                    plan.extend_next_due(new_due)?;
                    self.installment_plan = Some(plan);
                }
                _ => self.due_date = new_due,
            },
            ConcessionEffect::WaiveLateFee => {
                self.late_fee
                    .waive(record.approved_by.clone(), record.reason.clone(), now);
                if let Some(plan) = self.installment_plan.as_mut() {
                    for installment in plan.installments.iter_mut() {
                        installment.late_fee = Money::ZERO;
                    }
                }
            }
        }

        self.concessions.push(record.clone());
        self.touch(now, Some(&record.approved_by));

        events.emit(LedgerEvent::ConcessionApplied {
            fee_id: self.id,
            kind: record.kind,
            amount: record.amount,
            approved_by: record.approved_by.clone(),
            timestamp: now,
        });
        if effect == ConcessionEffect::WaiveLateFee {
            events.emit(LedgerEvent::LateFeeWaived {
                fee_id: self.id,
                waived_by: record.approved_by.clone(),
                reason: record.reason.clone(),
                timestamp: now,
            });
        }
        self.refresh_at(now, events);
        Ok(record)
    }

    /// waive one installment; its unpaid remainder becomes discount
    pub fn waive_installment(
        &mut self,
        index: u32,
        approved_by: Option<&UserId>,
        reason: &str,
        time: &SafeTimeProvider,
        events: &mut EventStore,
    ) -> Result<Money> {
        let approved_by = require_actor("installment.approved_by", approved_by)?;
        let reason = require_reason("installment.reason", reason)?;
        let now = time.now();

        let mut plan = self
            .installment_plan
            .clone()
            .ok_or_else(|| LedgerError::validation("installment.index", "fee has no installment plan"))?;
        let released = plan.waive(index, approved_by.clone(), reason)?;

        self.installment_plan = Some(plan);
        self.amount.add_discount(released);
        self.touch(now, Some(&approved_by));

        events.emit(LedgerEvent::InstallmentWaived {
            fee_id: self.id,
            installment: index,
            amount: released,
            approved_by,
            timestamp: now,
        });
        self.refresh_at(now, events);
        Ok(released)
    }

    /// record a synchronous, already-completed payment
    pub fn add_payment<F>(
        &mut self,
        request: &PaymentRequest,
        ids: &PaymentIdGenerator,
        taken: F,
        time: &SafeTimeProvider,
        events: &mut EventStore,
    ) -> Result<PaymentRecord>
    where
        F: Fn(&str) -> bool,
    {
        self.accept_payment(request, PaymentStatus::Completed, ids, taken, time, events)
    }

    /// record a gateway payment awaiting confirmation; it does not count as paid yet
    pub fn record_pending_payment<F>(
        &mut self,
        request: &PaymentRequest,
        ids: &PaymentIdGenerator,
        taken: F,
        time: &SafeTimeProvider,
        events: &mut EventStore,
    ) -> Result<PaymentRecord>
    where
        F: Fn(&str) -> bool,
    {
        self.accept_payment(request, PaymentStatus::Pending, ids, taken, time, events)
    }

    fn accept_payment<F>(
        &mut self,
        request: &PaymentRequest,
        status: PaymentStatus,
        ids: &PaymentIdGenerator,
        taken: F,
        time: &SafeTimeProvider,
        events: &mut EventStore,
    ) -> Result<PaymentRecord>
    where
        F: Fn(&str) -> bool,
    {
        let now = time.now();
        payments::validate_payment_amount(request.amount, self.current_pending())?;
        let payment_id = ids.generate(now, |candidate| self.has_payment(candidate) || taken(candidate))?;

        let record = PaymentRecord::from_request(payment_id, request, status, now);
        self.payments.push(record.clone());
        self.touch(now, request.received_by.as_ref());

        events.emit(LedgerEvent::PaymentRecorded {
            fee_id: self.id,
            payment_id: record.payment_id.clone(),
            amount: record.amount,
            method: record.method,
            timestamp: now,
        });
        if record.is_completed() {
            self.emit_payment_completed(&record, now, events);
        }
        self.refresh_at(now, events);
        Ok(record)
    }

    fn emit_payment_completed(&self, record: &PaymentRecord, now: DateTime<Utc>, events: &mut EventStore) {
        let paid_amount = payments::completed_total(&self.payments);
        events.emit(LedgerEvent::PaymentCompleted {
            fee_id: self.id,
            student_id: self.student_id.clone(),
            payment_id: record.payment_id.clone(),
            amount: record.amount,
            method: record.method,
            paid_amount,
            pending_amount: self.amount.final_amount.saturating_sub(paid_amount),
            timestamp: now,
        });
    }

    fn payment_position(&self, payment_id: &str) -> Result<usize> {
        self.payments
            .iter()
            .position(|p| p.payment_id == payment_id)
            .ok_or_else(|| LedgerError::PaymentNotFound {
                payment_id: payment_id.to_string(),
            })
    }

    /// complete a pending payment; the overpayment check runs again against current pending
    pub fn confirm_payment(
        &mut self,
        payment_id: &str,
        time: &SafeTimeProvider,
        events: &mut EventStore,
    ) -> Result<PaymentRecord> {
        let now = time.now();
        let position = self.payment_position(payment_id)?;
        let payment = &self.payments[position];
        payments::check_transition(&payment.payment_id, payment.status, PaymentStatus::Completed)?;
        payments::validate_payment_amount(payment.amount, self.current_pending())?;

        self.payments[position].transition(PaymentStatus::Completed, now)?;
        let record = self.payments[position].clone();
        self.touch(now, None);

        self.emit_payment_completed(&record, now, events);
        self.refresh_at(now, events);
        Ok(record)
    }

    pub fn fail_payment(
        &mut self,
        payment_id: &str,
        reason: Option<String>,
        time: &SafeTimeProvider,
        events: &mut EventStore,
    ) -> Result<()> {
        let now = time.now();
        let position = self.payment_position(payment_id)?;
        let payment = &mut self.payments[position];
        payment.transition(PaymentStatus::Failed, now)?;
        payment.failure_reason = reason;
        let amount = payment.amount;
        self.touch(now, None);

        events.emit(LedgerEvent::PaymentFailed {
            fee_id: self.id,
            payment_id: payment_id.to_string(),
            amount,
            timestamp: now,
        });
        self.refresh_at(now, events);
        Ok(())
    }

    pub fn cancel_payment(
        &mut self,
        payment_id: &str,
        time: &SafeTimeProvider,
        events: &mut EventStore,
    ) -> Result<()> {
        let now = time.now();
        let position = self.payment_position(payment_id)?;
        self.payments[position].transition(PaymentStatus::Cancelled, now)?;
        self.touch(now, None);

        events.emit(LedgerEvent::PaymentCancelled {
            fee_id: self.id,
            payment_id: payment_id.to_string(),
            timestamp: now,
        });
        self.refresh_at(now, events);
        Ok(())
    }

    /// refund a completed payment; paid drops and status may move back out of paid
    pub fn refund_payment(
        &mut self,
        payment_id: &str,
        refunded_by: Option<&UserId>,
        reason: &str,
        time: &SafeTimeProvider,
        events: &mut EventStore,
    ) -> Result<PaymentRecord> {
        let refunded_by = require_actor("refund.refunded_by", refunded_by)?;
        let reason = require_reason("refund.reason", reason)?;
        let now = time.now();
        let position = self.payment_position(payment_id)?;

        let payment = &mut self.payments[position];
        payment.transition(PaymentStatus::Refunded, now)?;
        payment.refund = Some(RefundRecord {
            refunded_by: refunded_by.clone(),
            reason,
            refunded_at: now,
        });
        let record = payment.clone();
        self.touch(now, Some(&refunded_by));

        events.emit(LedgerEvent::PaymentRefunded {
            fee_id: self.id,
            payment_id: record.payment_id.clone(),
            amount: record.amount,
            refunded_by,
            timestamp: now,
        });
        self.refresh_at(now, events);
        Ok(record)
    }

    /// compute and store the late fee at the current time, per ledger and per overdue tranche
    pub fn assess_late_fee(
        &mut self,
        engine: &LateFeeEngine,
        time: &SafeTimeProvider,
        events: &mut EventStore,
    ) -> LateFeeCalculation {
        let now = time.now();
        self.refresh_at(now, events);
        let calculation = self.calculate_late_fee(engine, now);

        if let Some(plan) = self.installment_plan.as_mut() {
            for installment in plan.installments.iter_mut() {
                if installment.status == InstallmentStatus::Overdue {
                    installment.late_fee = engine
                        .assess_installment(&self.late_fee, installment.outstanding(), installment.due_date, now)
                        .amount;
                }
            }
        }

        if calculation.amount != self.late_fee.amount {
            self.late_fee.amount = calculation.amount;
            self.late_fee.applied_date = Some(now);
            self.touch(now, None);
            if calculation.amount.is_positive() {
                events.emit(LedgerEvent::LateFeeAssessed {
                    fee_id: self.id,
                    amount: calculation.amount,
                    days_overdue: calculation.days_overdue,
                    timestamp: now,
                });
            }
        }
        calculation
    }

    /// log a reminder dispatch attempt
    pub fn add_reminder(
        &mut self,
        request: ReminderRequest,
        time: &SafeTimeProvider,
        events: &mut EventStore,
    ) -> Reminder {
        let now = time.now();
        let reminder = Reminder {
            channel: request.channel,
            sent_at: now,
            sent_by: request.sent_by,
            template: request.template,
            status: request.status,
            response: request.response,
        };
        self.reminders.push(reminder.clone());
        self.touch(now, None);

        events.emit(LedgerEvent::ReminderLogged {
            fee_id: self.id,
            channel: reminder.channel,
            pending_amount: self.current_pending(),
            timestamp: now,
        });
        self.refresh_at(now, events);
        reminder
    }

    pub fn add_note(
        &mut self,
        content: &str,
        added_by: Option<&UserId>,
        kind: NoteKind,
        priority: NotePriority,
        time: &SafeTimeProvider,
    ) -> Result<()> {
        let added_by = require_actor("note.added_by", added_by)?;
        let content = content.trim();
        if content.is_empty() {
            return Err(LedgerError::validation("note.content", "note cannot be empty"));
        }
        let now = time.now();
        self.notes.push(Note {
            content: content.to_string(),
            added_by: added_by.clone(),
            added_at: now,
            kind,
            priority,
        });
        self.touch(now, Some(&added_by));
        Ok(())
    }
}
