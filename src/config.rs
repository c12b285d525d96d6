use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::decimal::Rate;
use crate::errors::{LedgerError, Result};

/// ledger configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerConfig {
    pub late_fee: LateFeePolicy,
    pub payment_ids: PaymentIdConfig,
    pub reminders: ReminderPolicy,
    /// how many times the service re-runs a read-modify-write after a version conflict
    pub max_conflict_retries: u32,
}

/// late fee policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LateFeePolicy {
    /// flat percentage of pending amount; zero selects the monthly policy
    pub default_percentage: Rate,
    /// percentage charged per started month overdue under the monthly policy
    pub monthly_rate: Rate,
    /// length of a billing month in days
    pub days_per_month: u32,
    /// ceiling as a share of pending amount
    pub cap: Rate,
}

/// payment id generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentIdConfig {
    pub prefix: String,
    /// digits of random suffix appended after the millisecond timestamp
    pub suffix_digits: u32,
    /// attempts before giving up on a collision-free id
    pub max_attempts: u32,
}

/// reminder scanning policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReminderPolicy {
    /// remind this many days before the due date
    pub days_before_due: u32,
    /// once overdue, remind only after this many days past due
    pub min_days_overdue: u32,
    /// do not remind the same fee more often than this
    pub min_days_between: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self::standard()
    }
}

impl LedgerConfig {
    /// 1% per month overdue, capped at 25% of pending
    pub fn standard() -> Self {
        Self {
            late_fee: LateFeePolicy {
                default_percentage: Rate::ZERO,
                monthly_rate: Rate::from_percentage(1),
                days_per_month: 30,
                cap: Rate::from_percentage(25),
            },
            payment_ids: PaymentIdConfig {
                prefix: "PAY".to_string(),
                suffix_digits: 3,
                max_attempts: 5,
            },
            reminders: ReminderPolicy {
                days_before_due: 3,
                min_days_overdue: 0,
                min_days_between: 7,
            },
            max_conflict_retries: 3,
        }
    }

    /// flat late fee charged once as a percentage of the pending balance
    pub fn flat_late_fee(percentage: Decimal) -> Self {
        let mut config = Self::standard();
        config.late_fee.default_percentage = Rate::from_percentage_decimal(percentage);
        config
    }

    /// no late fees; reminders still run
    pub fn lenient() -> Self {
        let mut config = Self::standard();
        config.late_fee.monthly_rate = Rate::ZERO;
        config.late_fee.cap = Rate::ZERO;
        config.reminders.days_before_due = 7;
        config
    }

    /// load from json, falling back to defaults for omitted sections
    pub fn from_json(json: &str) -> Result<Self> {
        let partial: PartialLedgerConfig = serde_json::from_str(json).map_err(|e| {
            LedgerError::InvalidConfiguration {
                message: e.to_string(),
            }
        })?;
        let defaults = Self::standard();
        let config = Self {
            late_fee: partial.late_fee.unwrap_or(defaults.late_fee),
            payment_ids: partial.payment_ids.unwrap_or(defaults.payment_ids),
            reminders: partial.reminders.unwrap_or(defaults.reminders),
            max_conflict_retries: partial
                .max_conflict_retries
                .unwrap_or(defaults.max_conflict_retries),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let hundred = dec!(100);
        let policy = &self.late_fee;
        if policy.default_percentage.as_percentage() < Decimal::ZERO
            || policy.default_percentage.as_percentage() > hundred
        {
            return Err(LedgerError::InvalidConfiguration {
                message: format!("late fee percentage {} outside 0-100", policy.default_percentage),
            });
        }
        if policy.cap.as_decimal() < Decimal::ZERO || policy.cap.as_decimal() > Decimal::ONE {
            return Err(LedgerError::InvalidConfiguration {
                message: format!("late fee cap {} outside 0-100%", policy.cap),
            });
        }
        if policy.monthly_rate.as_decimal() < Decimal::ZERO {
            return Err(LedgerError::InvalidConfiguration {
                message: "monthly late fee rate cannot be negative".to_string(),
            });
        }
        if policy.days_per_month == 0 {
            return Err(LedgerError::InvalidConfiguration {
                message: "days per month must be positive".to_string(),
            });
        }
        if self.payment_ids.prefix.is_empty() {
            return Err(LedgerError::InvalidConfiguration {
                message: "payment id prefix cannot be empty".to_string(),
            });
        }
        if self.payment_ids.suffix_digits == 0 || self.payment_ids.suffix_digits > 9 {
            return Err(LedgerError::InvalidConfiguration {
                message: "payment id suffix must be 1-9 digits".to_string(),
            });
        }
        if self.payment_ids.max_attempts == 0 {
            return Err(LedgerError::InvalidConfiguration {
                message: "payment id attempts must be positive".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct PartialLedgerConfig {
    late_fee: Option<LateFeePolicy>,
    payment_ids: Option<PaymentIdConfig>,
    reminders: Option<ReminderPolicy>,
    max_conflict_retries: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_is_valid() {
        let config = LedgerConfig::standard();
        assert!(config.validate().is_ok());
        assert_eq!(config.late_fee.cap, Rate::from_percentage(25));
        assert_eq!(config.late_fee.monthly_rate, Rate::from_percentage(1));
    }

    #[test]
    fn test_presets() {
        let flat = LedgerConfig::flat_late_fee(dec!(5));
        assert_eq!(flat.late_fee.default_percentage, Rate::from_percentage(5));
        assert!(flat.validate().is_ok());

        let lenient = LedgerConfig::lenient();
        assert!(lenient.late_fee.cap.is_zero());
    }

    #[test]
    fn test_from_json_partial() {
        let json = r#"{ "max_conflict_retries": 10 }"#;
        let config = LedgerConfig::from_json(json).unwrap();
        assert_eq!(config.max_conflict_retries, 10);
        assert_eq!(config.late_fee, LedgerConfig::standard().late_fee);
    }

    #[test]
    fn test_from_json_rejects_bad_cap() {
        let json = r#"{
            "late_fee": {
                "default_percentage": "0",
                "monthly_rate": "0.01",
                "days_per_month": 30,
                "cap": "1.5"
            }
        }"#;
        assert!(matches!(
            LedgerConfig::from_json(json),
            Err(LedgerError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn test_from_json_malformed() {
        assert!(LedgerConfig::from_json("{ not json").is_err());
    }
}
