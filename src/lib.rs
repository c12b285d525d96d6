pub mod adjustments;
pub mod amount;
pub mod config;
pub mod decimal;
pub mod errors;
pub mod events;
pub mod installments;
pub mod late_fee;
pub mod ledger;
pub mod payments;
pub mod reports;
pub mod scanner;
pub mod service;
pub mod status;
pub mod store;
pub mod types;
pub mod view;

// re-export key types
pub use adjustments::{
    ConcessionRecord, ConcessionRequest, ConcessionTerms, DiscountRecord, DiscountRequest,
    SupportingDocument,
};
pub use amount::FeeAmount;
pub use config::{LateFeePolicy, LedgerConfig, PaymentIdConfig, ReminderPolicy};
pub use decimal::{Money, Rate};
pub use errors::{LedgerError, Result};
pub use events::{EventStore, LedgerEvent};
pub use installments::{Installment, InstallmentPlan};
pub use late_fee::{LateFeeCalculation, LateFeeEngine, LateFeeState};
pub use ledger::{
    CustomTranche, FeeLedger, FeeMetadata, InstallmentSpec, NewFee, NewFeeBuilder, Note, Reminder,
    ReminderRequest,
};
pub use payments::{PaymentIdGenerator, PaymentRecord, PaymentRequest, RefundRecord};
pub use reports::{CollectionReport, FeeStats};
pub use scanner::{ReminderCandidate, ReminderReason, ReminderScanner};
pub use service::{BulkCreateReport, FeeLedgerService, Outcome, ReminderDispatchReport, SweepReport};
pub use store::{FeeFilter, FeeRepository, InMemoryFeeStore};
pub use types::{
    AcademicYear, ConcessionKind, CourseId, DiscountKind, FeeId, FeeSource, FeeStatus, FeeType,
    InstallmentFrequency, InstallmentStatus, LedgerKey, NoteKind, NotePriority, PaymentGateway,
    PaymentMethod, PaymentStatus, ReminderChannel, ReminderStatus, Semester, StudentId, UserId,
};
pub use view::FeeView;

// re-export external dependencies that users will need
pub use chrono;
pub use hourglass_rs::{SafeTimeProvider, TimeSource};
pub use rust_decimal::Decimal;
pub use uuid::Uuid;
