pub mod memory;

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::errors::Result;
use crate::ledger::FeeLedger;
use crate::types::{AcademicYear, CourseId, FeeId, FeeStatus, FeeType, StudentId};

pub use memory::InMemoryFeeStore;

/// query filter; unset fields match everything
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeeFilter {
    pub statuses: Vec<FeeStatus>,
    pub student_id: Option<StudentId>,
    pub course_id: Option<CourseId>,
    pub fee_type: Option<FeeType>,
    pub academic_year: Option<AcademicYear>,
    /// effective due date strictly before this instant
    pub due_before: Option<DateTime<Utc>>,
    /// effective due date at or after this instant
    pub due_from: Option<DateTime<Utc>>,
}

impl FeeFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: FeeStatus) -> Self {
        self.statuses.push(status);
        self
    }

    pub fn statuses(mut self, statuses: &[FeeStatus]) -> Self {
        self.statuses.extend_from_slice(statuses);
        self
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
        self.fee_type = Some(fee_type);
        self
    }

    pub fn academic_year(mut self, year: AcademicYear) -> Self {
        self.academic_year = Some(year);
        self
    }

    pub fn due_before(mut self, instant: DateTime<Utc>) -> Self {
        self.due_before = Some(instant);
        self
    }

    pub fn due_from(mut self, instant: DateTime<Utc>) -> Self {
        self.due_from = Some(instant);
        self
    }

    pub fn matches(&self, fee: &FeeLedger) -> bool {
        if !self.statuses.is_empty() && !self.statuses.contains(&fee.status()) {
            return false;
        }
        if self.student_id.as_ref().is_some_and(|s| *s != fee.student_id) {
            return false;
        }
        if self.course_id.as_ref().is_some_and(|c| *c != fee.course_id) {
            return false;
        }
        if self.fee_type.is_some_and(|t| t != fee.fee_type) {
            return false;
        }
        if self.academic_year.as_ref().is_some_and(|y| *y != fee.academic_year) {
            return false;
        }
        let due = fee.effective_due_date();
        if self.due_before.is_some_and(|cutoff| due >= cutoff) {
            return false;
        }
        if self.due_from.is_some_and(|start| due < start) {
            return false;
        }
        true
    }
}

/// storage for fee ledgers; saves are compare-and-swap on `version`
pub trait FeeRepository: Send + Sync {
    /// store a new ledger at version 1; rejects a second ledger for the same key
    fn insert(&self, fee: FeeLedger) -> Result<FeeLedger>;

    fn get(&self, id: FeeId) -> Result<FeeLedger>;

    /// store `fee` if the stored version is still `expected_version`; returns the stored copy
    fn save(&self, fee: FeeLedger, expected_version: u64) -> Result<FeeLedger>;

    /// remove the ledger if the stored version is still `expected_version`
    fn delete(&self, id: FeeId, expected_version: u64) -> Result<FeeLedger>;

    fn find(&self, filter: &FeeFilter) -> Result<Vec<FeeLedger>>;

    /// whether any stored ledger already uses `payment_id`
    fn payment_id_exists(&self, payment_id: &str) -> bool;

    fn count(&self) -> usize;
}

impl<T: FeeRepository + ?Sized> FeeRepository for Arc<T> {
    fn insert(&self, fee: FeeLedger) -> Result<FeeLedger> {
        (**self).insert(fee)
    }

    fn get(&self, id: FeeId) -> Result<FeeLedger> {
        (**self).get(id)
    }

    fn save(&self, fee: FeeLedger, expected_version: u64) -> Result<FeeLedger> {
        (**self).save(fee, expected_version)
    }

    fn delete(&self, id: FeeId, expected_version: u64) -> Result<FeeLedger> {
        (**self).delete(id, expected_version)
    }

    fn find(&self, filter: &FeeFilter) -> Result<Vec<FeeLedger>> {
        (**self).find(filter)
    }

    fn payment_id_exists(&self, payment_id: &str) -> bool {
        (**self).payment_id_exists(payment_id)
    }

    fn count(&self) -> usize {
        (**self).count()
    }
}
