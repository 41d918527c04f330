use crate::transaction::{LockManager, Transaction, TransactionState};
use log::debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Hands out transaction ids and tears transactions down, releasing every
/// lock they still hold through the lock manager.
#[derive(Debug)]
pub struct TransactionManager {
    next_txn_id: AtomicU64,
    lock_manager: Arc<LockManager>,
}

impl TransactionManager {
    pub fn new(lock_manager: Arc<LockManager>) -> Self {
        Self {
            next_txn_id: AtomicU64::new(1),
            lock_manager,
        }
    }

    pub fn begin(&self) -> Arc<Transaction> {
        let id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        debug!("txn {} started", id);
        Arc::new(Transaction::new(id))
    }

    pub fn commit(&self, txn: &Transaction) {
        txn.set_state(TransactionState::Committed);
        self.release_all(txn);
        debug!("txn {} committed", txn.id());
    }

    pub fn abort(&self, txn: &Transaction) {
        txn.set_state(TransactionState::Aborted);
        self.release_all(txn);
        debug!("txn {} aborted", txn.id());
    }

    fn release_all(&self, txn: &Transaction) {
        for rid in txn.shared_lock_set() {
            self.lock_manager.unlock(txn, rid);
        }
        for rid in txn.exclusive_lock_set() {
            self.lock_manager.unlock(txn, rid);
        }
    }
}
