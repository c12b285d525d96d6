/// overdue scan - reminders, late fee sweep and dashboard stats
use chrono::{Duration, TimeZone, Utc};
use fee_ledger_rs::{
    FeeFilter, FeeLedgerService, FeeType, InMemoryFeeStore, LedgerConfig, Money, NewFee,
    PaymentMethod, PaymentRequest, ReminderChannel, SafeTimeProvider, TimeSource,
};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let start = Utc.with_ymd_and_hms(2025, 4, 1, 0, 0, 0).unwrap();
    let service = FeeLedgerService::new(
        InMemoryFeeStore::new(),
        LedgerConfig::standard(),
        SafeTimeProvider::new(TimeSource::Test(start)),
    )?;
    let controller = service.time().test_control().expect("demo runs on a test clock");

    let fees = (1..=6)
        .map(|n| {
            NewFee::builder()
                .student(format!("student-{n:03}"))
                .course("bsc")
                .fee_type(if n % 2 == 0 { FeeType::Library } else { FeeType::Tuition })
                .academic_year("2024-2025")
                .amount(Money::from_major(5_000 * n))
                .due_date(start + Duration::days(10 * n))
                .build()
        })
        .collect::<Result<Vec<_>, _>>()?;
    let report = service.bulk_create(fees);
    println!("created {} fees, {} failed", report.created.len(), report.failed.len());

    // two students pay in full
    for fee in report.created.iter().take(2) {
        let pending = fee.pending_amount();
        service.add_payment(fee.id, &PaymentRequest::new(pending, PaymentMethod::Card))?;
    }

    controller.advance(Duration::days(45));

    let candidates = service.scan_reminders()?;
    println!("\n{} reminder candidates", candidates.len());
    for candidate in &candidates {
        println!("  {} {:?} pending {}", candidate.student_id, candidate.reason, candidate.pending_amount);
    }
    let dispatched = service.record_reminders(&candidates, ReminderChannel::Sms, Some(&"bursar".to_string()));
    println!("recorded {} reminders", dispatched.recorded.len());

    let sweep = service.run_overdue_sweep()?;
    println!("\nlate fees assessed on {} fees, total {}", sweep.assessed.len(), sweep.total_late_fees);

    for fee in service.find_overdue(7)? {
        println!("  overdue {} days: {}", fee.days_overdue(service.time().now()), fee.student_id);
    }

    let stats = service.stats(&FeeFilter::new())?;
    println!("\n{}", serde_json::to_string_pretty(&stats)?);

    Ok(())
}
