/// installments - quarterly plan, payments allocated oldest first
use chrono::{Duration, TimeZone, Utc};
use fee_ledger_rs::{
    ConcessionRequest, ConcessionTerms, FeeLedgerService, InMemoryFeeStore, InstallmentFrequency,
    LedgerConfig, Money, NewFee, PaymentMethod, PaymentRequest, SafeTimeProvider, TimeSource,
};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let time = SafeTimeProvider::new(TimeSource::Test(Utc.with_ymd_and_hms(2025, 7, 1, 0, 0, 0).unwrap()));
    let service = FeeLedgerService::new(InMemoryFeeStore::new(), LedgerConfig::standard(), time)?;
    let controller = service.time().test_control().expect("demo runs on a test clock");

    let fee_id = service
        .create_fee(
            NewFee::builder()
                .student("student-007")
                .course("mba")
                .academic_year("2025-2026")
                .amount(Money::from_major(60_000))
                .due_date(service.time().now() + Duration::days(15))
                .installments(InstallmentFrequency::Quarterly, 4)
                .build()?,
        )?
        .fee
        .id;

    let print_plan = |label: &str| -> Result<(), Box<dyn std::error::Error>> {
        let fee = service.get_fee(fee_id)?;
        println!("\n{label}: status {:?}, pending {}", fee.status(), fee.pending_amount());
        if let Some(plan) = fee.installment_plan() {
            for installment in &plan.installments {
                println!(
                    "  #{} due {} amount {} paid {} {:?}",
                    installment.index,
                    installment.due_date.format("%Y-%m-%d"),
                    installment.amount,
                    installment.paid_amount,
                    installment.status
                );
            }
        }
        Ok(())
    };
    print_plan("new plan")?;

    // one and a half tranches paid
    service.add_payment(fee_id, &PaymentRequest::new(Money::from_major(22_500), PaymentMethod::BankTransfer))?;
    print_plan("after first payment")?;

    // second tranche slips past due
    controller.advance(Duration::days(120));
    service.refresh_fee(fee_id)?;
    print_plan("four months later")?;

    // the approver pushes the next due date out
    let new_due = service.time().now() + Duration::days(20);
    service.apply_concession(
        fee_id,
        &ConcessionRequest::new(ConcessionTerms::InstallmentExtension { new_due_date: new_due }, "medical leave")
            .approved_by("principal"),
    )?;
    print_plan("after extension")?;

    Ok(())
}
