/// quick start - create a fee, discount it, take payments
use chrono::{Duration, Utc};
use fee_ledger_rs::{
    DiscountKind, DiscountRequest, FeeLedgerService, FeeType, FeeView, InMemoryFeeStore,
    LedgerConfig, Money, NewFee, PaymentMethod, PaymentRequest, SafeTimeProvider, TimeSource,
};
use rust_decimal_macros::dec;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let service = FeeLedgerService::new(
        InMemoryFeeStore::new(),
        LedgerConfig::standard(),
        SafeTimeProvider::new(TimeSource::System),
    )?;

    // tuition for one student, due in 30 days
    let created = service.create_fee(
        NewFee::builder()
            .student("student-042")
            .course("bca")
            .fee_type(FeeType::Tuition)
            .academic_year("2025-2026")
            .amount(Money::from_major(10_000))
            .due_date(Utc::now() + Duration::days(30))
            .created_by("admin-1")
            .build()?,
    )?;
    let fee_id = created.fee.id;

    // 10% early bird discount
    let discounted = service.apply_discount(
        fee_id,
        &DiscountRequest::percentage(DiscountKind::EarlyBird, "early bird", dec!(10)).applied_by("admin-1"),
    )?;
    println!("final after discount: {}", discounted.fee.amount().final_amount);

    // partial then full payment
    service.add_payment(fee_id, &PaymentRequest::new(Money::from_major(4_000), PaymentMethod::Upi))?;
    let paid = service.add_payment(fee_id, &PaymentRequest::new(Money::from_major(5_000), PaymentMethod::Cash))?;
    println!("status: {:?}", paid.fee.status());
    for event in &paid.events {
        println!("event: {event:?}");
    }

    // overpayment is rejected, never clamped
    if let Err(err) = service.add_payment(fee_id, &PaymentRequest::new(Money::from_major(1), PaymentMethod::Cash)) {
        println!("rejected: {err}");
    }

    let view = FeeView::from_ledger(&service.get_fee(fee_id)?, service.time().now());
    println!("{}", view.to_json_pretty()?);

    Ok(())
}
