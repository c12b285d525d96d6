use std::collections::HashMap;

use parking_lot::RwLock;

use crate::errors::{LedgerError, Result};
use crate::ledger::FeeLedger;
use crate::types::{FeeId, LedgerKey};

use super::{FeeFilter, FeeRepository};

#[derive(Debug, Default)]
struct Tables {
    fees: HashMap<FeeId, FeeLedger>,
    keys: HashMap<LedgerKey, FeeId>,
    /// payment id -> owning fee
    payment_ids: HashMap<String, FeeId>,
}

impl Tables {
    /// reject payment ids already stored on a different ledger
    fn check_payment_ids(&self, fee: &FeeLedger) -> Result<()> {
        for payment in fee.payments() {
            match self.payment_ids.get(&payment.payment_id) {
                Some(owner) if *owner != fee.id => {
                    return Err(LedgerError::DuplicatePaymentId {
                        payment_id: payment.payment_id.clone(),
                        owner: *owner,
                    });
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn index_payments(&mut self, fee: &FeeLedger) {
        for payment in fee.payments() {
            self.payment_ids.insert(payment.payment_id.clone(), fee.id);
        }
    }

    fn check_version(&self, id: FeeId, expected_version: u64) -> Result<&FeeLedger> {
        let stored = self.fees.get(&id).ok_or(LedgerError::FeeNotFound { fee_id: id })?;
        if stored.version() != expected_version {
            return Err(LedgerError::ConcurrentModification {
                fee_id: id,
                expected: expected_version,
                found: stored.version(),
            });
        }
        Ok(stored)
    }
}

/// thread-safe in-memory fee store
///
/// Ledgers, the uniqueness index and the payment-id index sit behind one lock,
/// and every write checks all of them before changing any.
#[derive(Debug, Default)]
pub struct InMemoryFeeStore {
    tables: RwLock<Tables>,
}

impl InMemoryFeeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&self) {
        let mut tables = self.tables.write();
        tables.fees.clear();
        tables.keys.clear();
        tables.payment_ids.clear();
    }
}

impl FeeRepository for InMemoryFeeStore {
    fn insert(&self, mut fee: FeeLedger) -> Result<FeeLedger> {
        let mut tables = self.tables.write();
        let key = fee.key();
        if tables.keys.contains_key(&key) {
            return Err(LedgerError::DuplicateLedger { key });
        }
        tables.check_payment_ids(&fee)?;

        fee.set_version(1);
        tables.index_payments(&fee);
        tables.keys.insert(key, fee.id);
        tables.fees.insert(fee.id, fee.clone());
        Ok(fee)
    }

    fn get(&self, id: FeeId) -> Result<FeeLedger> {
        self.tables
            .read()
            .fees
            .get(&id)
            .cloned()
            .ok_or(LedgerError::FeeNotFound { fee_id: id })
    }

    fn save(&self, mut fee: FeeLedger, expected_version: u64) -> Result<FeeLedger> {
        let mut tables = self.tables.write();
        let stored_key = tables.check_version(fee.id, expected_version)?.key();

        // identity fields are part of the uniqueness key
        let key = fee.key();
        let rekeyed = key != stored_key;
        if rekeyed && tables.keys.contains_key(&key) {
            return Err(LedgerError::DuplicateLedger { key });
        }
        tables.check_payment_ids(&fee)?;

        if rekeyed {
            tables.keys.remove(&stored_key);
            tables.keys.insert(key, fee.id);
        }
        fee.set_version(expected_version + 1);
        tables.index_payments(&fee);
        tables.fees.insert(fee.id, fee.clone());
        Ok(fee)
    }

    fn delete(&self, id: FeeId, expected_version: u64) -> Result<FeeLedger> {
        let mut tables = self.tables.write();
        tables.check_version(id, expected_version)?;

        let removed = tables
            .fees
            .remove(&id)
            .ok_or(LedgerError::FeeNotFound { fee_id: id })?;
        tables.keys.remove(&removed.key());
        tables.payment_ids.retain(|_, owner| *owner != id);
        Ok(removed)
    }

    fn find(&self, filter: &FeeFilter) -> Result<Vec<FeeLedger>> {
        Ok(self
            .tables
            .read()
            .fees
            .values()
            .filter(|fee| filter.matches(fee))
            .cloned()
            .collect())
    }

    fn payment_id_exists(&self, payment_id: &str) -> bool {
        self.tables.read().payment_ids.contains_key(payment_id)
    }

    fn count(&self) -> usize {
        self.tables.read().fees.len()
    }
}
