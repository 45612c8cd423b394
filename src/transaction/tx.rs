use core::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::{heap::BufferPool, types::SmallResult, Database};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Active,
    Aborted,
    Committed,
}

/// Ids increase monotonically, which gives transactions a total
/// order for tie-breaking.
pub type TransactionID = u64;

static NEXT_TRANSACTION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Transaction {
    id: TransactionID,
}

impl Transaction {
    pub fn new() -> Self {
        let id = NEXT_TRANSACTION_ID.fetch_add(1, Ordering::Relaxed);
        let instance = Self { id };

        Database::mut_log_manager()
            .log_start(&instance)
            .expect("failed to append the start record");
        Database::mut_concurrent_status().set_transaction_status(id, TransactionStatus::Active);

        instance
    }

    /// Flush every page this transaction touched (appending UPDATE
    /// records and forcing the log before each page write), append
    /// the COMMIT record, then release all latches.
    pub fn commit(&self) -> SmallResult {
        BufferPool::tx_complete(self, true)?;

        Database::mut_concurrent_status()
            .set_transaction_status(self.id, TransactionStatus::Committed);
        Ok(())
    }

    /// Discard every page this transaction dirtied, append the ABORT
    /// record, then release all latches. The next read of a
    /// discarded page observes the pre-transaction bytes on disk.
    pub fn abort(&self) -> SmallResult {
        BufferPool::tx_complete(self, false)?;

        Database::mut_concurrent_status().set_transaction_status(self.id, TransactionStatus::Aborted);
        Ok(())
    }

    pub fn get_id(&self) -> TransactionID {
        self.id
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "tx_{}", self.id)
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self)
    }
}
