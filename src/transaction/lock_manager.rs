use crate::config::LockManagerConfig;
use crate::storage::RecordId;
use crate::transaction::{Transaction, TransactionId, TransactionState};
use log::{trace, warn};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

#[derive(Debug, Clone)]
struct LockRequest {
    txn_id: TransactionId,
    mode: LockMode,
    granted: bool,
}

#[derive(Debug)]
struct LockQueue {
    requests: VecDeque<LockRequest>,
    // number of granted exclusive locks, at most one
    exclusive_cnt: usize,
    // smallest transaction id currently on the queue
    oldest: TransactionId,
}

impl LockQueue {
    fn new() -> Self {
        Self {
            requests: VecDeque::new(),
            exclusive_cnt: 0,
            oldest: TransactionId::MAX,
        }
    }

    // a shared request proceeds once everything ahead of it is a granted
    // shared lock
    fn shared_grantable(&self, txn_id: TransactionId) -> bool {
        for request in &self.requests {
            if request.txn_id == txn_id {
                return true;
            }
            if request.mode != LockMode::Shared || !request.granted {
                return false;
            }
        }
        false
    }

    // an exclusive request proceeds once nothing ahead of it is granted
    fn exclusive_grantable(&self, txn_id: TransactionId) -> bool {
        for request in &self.requests {
            if request.txn_id == txn_id {
                return true;
            }
            if request.granted {
                return false;
            }
        }
        false
    }

    // an upgrade proceeds once its own request sits at the head of the queue
    // and is the only granted one
    fn upgradable(&self, txn_id: TransactionId) -> bool {
        match self.requests.front() {
            Some(front) if front.txn_id == txn_id => {}
            _ => return false,
        }
        self.requests.iter().skip(1).all(|request| !request.granted)
    }

    fn grant(&mut self, txn_id: TransactionId) {
        if let Some(request) = self
            .requests
            .iter_mut()
            .find(|request| request.txn_id == txn_id)
        {
            request.granted = true;
        }
    }

    fn recompute_oldest(&mut self) {
        self.oldest = self
            .requests
            .iter()
            .map(|request| request.txn_id)
            .min()
            .unwrap_or(TransactionId::MAX);
    }
}

/// Record-level shared/exclusive lock manager. Requests queue FIFO per
/// record id; deadlocks are prevented by wound-wait (a requester younger
/// than the oldest transaction on a conflicting queue aborts itself instead
/// of waiting).
#[derive(Debug)]
pub struct LockManager {
    strict_2pl: bool,
    lock_table: Mutex<HashMap<RecordId, LockQueue>>,
    condvar: Condvar,
}

impl LockManager {
    pub fn new(strict_2pl: bool) -> Self {
        Self {
            strict_2pl,
            lock_table: Mutex::new(HashMap::new()),
            condvar: Condvar::new(),
        }
    }

    pub fn with_config(config: LockManagerConfig) -> Self {
        Self::new(config.strict_2pl)
    }

    /// Acquire a shared lock on `rid`. Returns false when the transaction
    /// was already aborted or loses the wound-wait admission check.
    pub fn lock_shared(&self, txn: &Transaction, rid: RecordId) -> bool {
        let mut lock_table = self.lock_table.lock();
        if txn.state() == TransactionState::Aborted {
            return false;
        }
        assert_eq!(
            txn.state(),
            TransactionState::Growing,
            "lock request outside the growing phase"
        );
        assert!(
            !txn.holds_shared(&rid),
            "txn {} already holds a shared lock on {}",
            txn.id(),
            rid
        );

        let queue = lock_table.entry(rid).or_insert_with(LockQueue::new);
        // A younger transaction queueing behind a granted exclusive lock
        // could complete a wait cycle; abort it instead. An older one is
        // admitted and parks on the predicate below.
        if queue.exclusive_cnt > 0 && txn.id() > queue.oldest {
            warn!(
                "wound-wait: txn {} aborted requesting shared lock on {}",
                txn.id(),
                rid
            );
            txn.set_state(TransactionState::Aborted);
            return false;
        }
        queue.oldest = queue.oldest.min(txn.id());
        queue.requests.push_back(LockRequest {
            txn_id: txn.id(),
            mode: LockMode::Shared,
            granted: false,
        });

        while !lock_table
            .get(&rid)
            .is_some_and(|queue| queue.shared_grantable(txn.id()))
        {
            self.condvar.wait(&mut lock_table);
        }

        lock_table.get_mut(&rid).unwrap().grant(txn.id());
        txn.insert_shared(rid);
        trace!("txn {} granted shared lock on {}", txn.id(), rid);
        // other shared waiters may now be at the head of the queue
        self.condvar.notify_all();
        true
    }

    /// Acquire an exclusive lock on `rid`. Returns false when the
    /// transaction was already aborted or loses the wound-wait admission
    /// check.
    pub fn lock_exclusive(&self, txn: &Transaction, rid: RecordId) -> bool {
        let mut lock_table = self.lock_table.lock();
        if txn.state() == TransactionState::Aborted {
            return false;
        }
        assert_eq!(
            txn.state(),
            TransactionState::Growing,
            "lock request outside the growing phase"
        );
        assert!(
            !txn.holds_exclusive(&rid),
            "txn {} already holds an exclusive lock on {}",
            txn.id(),
            rid
        );

        let queue = lock_table.entry(rid).or_insert_with(LockQueue::new);
        if txn.id() > queue.oldest {
            warn!(
                "wound-wait: txn {} aborted requesting exclusive lock on {}",
                txn.id(),
                rid
            );
            txn.set_state(TransactionState::Aborted);
            return false;
        }
        queue.oldest = queue.oldest.min(txn.id());
        queue.requests.push_back(LockRequest {
            txn_id: txn.id(),
            mode: LockMode::Exclusive,
            granted: false,
        });

        while !lock_table
            .get(&rid)
            .is_some_and(|queue| queue.exclusive_grantable(txn.id()))
        {
            self.condvar.wait(&mut lock_table);
        }

        let queue = lock_table.get_mut(&rid).unwrap();
        queue.grant(txn.id());
        queue.exclusive_cnt += 1;
        txn.insert_exclusive(rid);
        trace!("txn {} granted exclusive lock on {}", txn.id(), rid);
        // nothing behind a granted exclusive lock can proceed, no wakeup
        true
    }

    /// Upgrade an already granted shared lock to exclusive. Blocks until the
    /// caller's request is the sole granted entry at the head of the queue.
    pub fn lock_upgrade(&self, txn: &Transaction, rid: RecordId) -> bool {
        let mut lock_table = self.lock_table.lock();
        if txn.state() == TransactionState::Aborted {
            return false;
        }
        assert_eq!(
            txn.state(),
            TransactionState::Growing,
            "lock request outside the growing phase"
        );
        assert!(
            txn.holds_shared(&rid),
            "txn {} upgrading {} without a shared lock",
            txn.id(),
            rid
        );

        while !lock_table
            .get(&rid)
            .is_some_and(|queue| queue.upgradable(txn.id()))
        {
            self.condvar.wait(&mut lock_table);
        }

        let queue = lock_table.get_mut(&rid).unwrap();
        let request = queue.requests.front_mut().unwrap();
        request.mode = LockMode::Exclusive;
        queue.exclusive_cnt += 1;
        txn.remove_shared(&rid);
        txn.insert_exclusive(rid);
        trace!("txn {} upgraded lock on {} to exclusive", txn.id(), rid);
        true
    }

    /// Release the caller's lock on `rid`. Under plain 2PL the first release
    /// moves a growing transaction into its shrinking phase; under strict
    /// 2PL a release before commit/abort aborts the transaction instead.
    pub fn unlock(&self, txn: &Transaction, rid: RecordId) -> bool {
        let mut lock_table = self.lock_table.lock();
        assert!(
            txn.holds_shared(&rid) || txn.holds_exclusive(&rid),
            "txn {} releasing {} without holding a lock",
            txn.id(),
            rid
        );

        if self.strict_2pl
            && !matches!(
                txn.state(),
                TransactionState::Committed | TransactionState::Aborted
            )
        {
            warn!(
                "strict 2PL violation: txn {} released {} mid-transaction",
                txn.id(),
                rid
            );
            txn.set_state(TransactionState::Aborted);
            return false;
        }
        if txn.state() == TransactionState::Growing {
            txn.set_state(TransactionState::Shrinking);
        }

        // the entry exists for as long as some lock on rid is held
        let queue = lock_table.get_mut(&rid).unwrap();
        if let Some(pos) = queue
            .requests
            .iter()
            .position(|request| request.txn_id == txn.id())
        {
            let request = queue.requests.remove(pos).unwrap();
            match request.mode {
                LockMode::Shared => txn.remove_shared(&rid),
                LockMode::Exclusive => {
                    txn.remove_exclusive(&rid);
                    queue.exclusive_cnt -= 1;
                }
            }
        }
        queue.recompute_oldest();
        trace!("txn {} released lock on {}", txn.id(), rid);
        self.condvar.notify_all();
        true
    }
}
