use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{LedgerError, Result};

/// unique identifier for a fee ledger
pub type FeeId = Uuid;

/// opaque identifiers owned by collaborators; the ledger never resolves them
pub type StudentId = String;
pub type CourseId = String;
pub type UserId = String;

/// fee types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FeeType {
    Admission,
    #[default]
    Tuition,
    Examination,
    Library,
    Lab,
    Certificate,
    Miscellaneous,
}

/// semester a fee belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Semester {
    #[serde(rename = "1")]
    First,
    #[serde(rename = "2")]
    Second,
    #[serde(rename = "3")]
    Third,
    #[serde(rename = "4")]
    Fourth,
    #[serde(rename = "5")]
    Fifth,
    #[serde(rename = "6")]
    Sixth,
    #[serde(rename = "annual")]
    #[default]
    Annual,
}

impl fmt::Display for Semester {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Semester::First => "1",
            Semester::Second => "2",
            Semester::Third => "3",
            Semester::Fourth => "4",
            Semester::Fifth => "5",
            Semester::Sixth => "6",
            Semester::Annual => "annual",
        };
        f.write_str(label)
    }
}

/// academic year in `YYYY-YYYY` form, second year following the first
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AcademicYear {
    start: u16,
}

impl AcademicYear {
    /// latest start year whose end year still fits in four digits
    pub const MAX_START: u16 = 9_998;

    pub fn new(start: u16) -> Result<Self> {
        if start > Self::MAX_START {
            return Err(LedgerError::validation(
                "academic_year",
                format!("start year {} must be at most {}", start, Self::MAX_START),
            ));
        }
        Ok(Self { start })
    }

    pub fn start_year(&self) -> u16 {
        self.start
    }

    pub fn end_year(&self) -> u16 {
        self.start + 1
    }
}

impl FromStr for AcademicYear {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || LedgerError::validation("academic_year", format!("'{}' must be in format YYYY-YYYY", s));

        let (first, second) = s.split_once('-').ok_or_else(invalid)?;
        let four_digits = |part: &str| part.len() == 4 && part.bytes().all(|b| b.is_ascii_digit());
        if !four_digits(first) || !four_digits(second) {
            return Err(invalid());
        }
        let start: u16 = first.parse().map_err(|_| invalid())?;
        let end: u16 = second.parse().map_err(|_| invalid())?;
        if u32::from(end) != u32::from(start) + 1 {
            return Err(LedgerError::validation(
                "academic_year",
                format!("'{}' must span consecutive years", s),
            ));
        }
        Self::new(start)
    }
}

impl TryFrom<String> for AcademicYear {
    type Error = LedgerError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<AcademicYear> for String {
    fn from(year: AcademicYear) -> Self {
        year.to_string()
    }
}

impl fmt::Display for AcademicYear {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:04}", self.start, self.end_year())
    }
}

/// uniqueness key: one ledger per student × course × type × year × semester
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LedgerKey {
    pub student_id: StudentId,
    pub course_id: CourseId,
    pub fee_type: FeeType,
    pub academic_year: AcademicYear,
    pub semester: Semester,
}

impl fmt::Display for LedgerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "student {} / course {} / {:?} / {} / semester {}",
            self.student_id, self.course_id, self.fee_type, self.academic_year, self.semester
        )
    }
}

/// derived fee status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeStatus {
    /// nothing paid, not yet due
    Pending,
    /// some paid, balance outstanding
    Partial,
    /// fully paid (or fully waived)
    Paid,
    /// nothing paid and past due
    Overdue,
}

impl FeeStatus {
    pub const ALL: [FeeStatus; 4] = [
        FeeStatus::Pending,
        FeeStatus::Partial,
        FeeStatus::Paid,
        FeeStatus::Overdue,
    ];

    /// statuses that still carry a balance
    pub fn is_open(&self) -> bool {
        !matches!(self, FeeStatus::Paid)
    }
}

/// payment record status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// awaiting gateway confirmation
    Pending,
    Completed,
    Failed,
    Refunded,
    Cancelled,
}

/// payment methods accepted at the counter or online
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Card,
    BankTransfer,
    Upi,
    Cheque,
}

/// gateway a payment was routed through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentGateway {
    Razorpay,
    Paytm,
    Phonepe,
    Gpay,
    BankTransfer,
    Cash,
    Cheque,
    Other,
}

/// discount categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountKind {
    EarlyBird,
    Bulk,
    Referral,
    Scholarship,
    Sibling,
    Merit,
    FinancialAid,
    Other,
}

/// concession categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcessionKind {
    PartialWaiver,
    FullWaiver,
    InstallmentExtension,
    LateFeeWaiver,
}

/// installment tranche status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallmentStatus {
    Pending,
    Paid,
    Overdue,
    Waived,
}

/// cadence for generated installment plans
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallmentFrequency {
    Monthly,
    Quarterly,
    HalfYearly,
}

impl InstallmentFrequency {
    pub fn months(&self) -> u32 {
        match self {
            InstallmentFrequency::Monthly => 1,
            InstallmentFrequency::Quarterly => 3,
            InstallmentFrequency::HalfYearly => 6,
        }
    }
}

/// reminder delivery channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderChannel {
    Email,
    Sms,
    Call,
    Notice,
}

/// reminder delivery outcome as reported by the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderStatus {
    Sent,
    Delivered,
    Failed,
    Bounced,
}

/// how a fee ledger came into existence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FeeSource {
    #[default]
    Manual,
    BulkImport,
    SystemGenerated,
    Api,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NoteKind {
    #[default]
    General,
    Payment,
    Reminder,
    Concession,
    Dispute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NotePriority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}
