use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::config::PaymentIdConfig;
use crate::errors::{LedgerError, Result};

/// generates `{prefix}{unix millis}{random suffix}` payment ids
#[derive(Debug, Clone)]
pub struct PaymentIdGenerator {
    config: PaymentIdConfig,
}

impl PaymentIdGenerator {
    pub fn new(config: PaymentIdConfig) -> Self {
        Self { config }
    }

    /// format an id from its parts
    pub fn format(&self, now: DateTime<Utc>, suffix: u64) -> String {
        format!(
            "{}{}{:0width$}",
            self.config.prefix,
            now.timestamp_millis(),
            suffix,
            width = self.config.suffix_digits as usize
        )
    }

    fn random_suffix(&self) -> u64 {
        let modulus = 10u128.pow(self.config.suffix_digits);
        (Uuid::new_v4().as_u128() % modulus) as u64
    }

    /// generate an id not rejected by `exists`, retrying on collision
    pub fn generate<F>(&self, now: DateTime<Utc>, exists: F) -> Result<String>
    where
        F: Fn(&str) -> bool,
    {
        for attempt in 1..=self.config.max_attempts {
            let candidate = self.format(now, self.random_suffix());
            if !exists(&candidate) {
                return Ok(candidate);
            }
            debug!(attempt, payment_id = %candidate, "payment id collision, retrying");
        }
        Err(LedgerError::PaymentIdExhausted {
            attempts: self.config.max_attempts,
        })
    }
}
