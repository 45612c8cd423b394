use core::fmt;
use std::{
    collections::{HashMap, HashSet},
    sync::atomic::{AtomicU64, Ordering},
    thread::sleep,
    time::{Duration, Instant},
};

use itertools::Itertools;
use log::debug;

use crate::{
    error::{ErrorKind, SmallError},
    transaction::{Transaction, TransactionID, TransactionStatus},
    types::SmallResult,
    Database,
};

use super::wait_for_graph::WaitForGraph;

static TIMEOUT_SECS: AtomicU64 = AtomicU64::new(5);

const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Lock {
    SLock,
    XLock,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Permission {
    ReadOnly,
    ReadWrite,
}

impl Permission {
    pub fn to_lock(&self) -> Lock {
        match self {
            Permission::ReadOnly => Lock::SLock,
            Permission::ReadWrite => Lock::XLock,
        }
    }
}

/// The latch table of the buffer pool.
///
/// Latches are keyed by buffer slot index, not by page id: a page
/// that gets evicted and reloaded may land in a different slot, so
/// every latch must have been released before its slot is emptied.
///
/// Each slot is either unlocked, shared by a set of transactions, or
/// exclusive to a single transaction. Blocked requests queue up per
/// slot in fifo order; a queued exclusive request blocks later
/// shared requests from non-holders so writers cannot starve behind
/// a stream of readers. A transaction that is the sole shared holder
/// upgrades to exclusive ahead of the queue.
pub struct ConcurrentStatus {
    s_holders: HashMap<usize, HashSet<TransactionID>>,
    x_holder: HashMap<usize, TransactionID>,

    waiters: HashMap<usize, Vec<(TransactionID, Lock)>>,

    hold_slots: HashMap<TransactionID, HashSet<usize>>,

    transaction_status: HashMap<TransactionID, TransactionStatus>,

    wait_for_graph: WaitForGraph,
}

impl ConcurrentStatus {
    pub fn new() -> Self {
        Self {
            s_holders: HashMap::new(),
            x_holder: HashMap::new(),
            waiters: HashMap::new(),
            hold_slots: HashMap::new(),
            transaction_status: HashMap::new(),
            wait_for_graph: WaitForGraph::new(),
        }
    }

    pub fn set_timeout(secs: u64) {
        TIMEOUT_SECS.store(secs, Ordering::Relaxed);
    }

    fn get_timeout() -> Duration {
        Duration::from_secs(TIMEOUT_SECS.load(Ordering::Relaxed))
    }

    /// Block until the latch on `slot` is granted to `tx`.
    ///
    /// Fails with `DeadlockAborted` when granting would close a
    /// wait-for cycle; the requester is always the victim, since its
    /// thread is the one that is live and able to unwind. The
    /// timeout serves as a progress backstop and takes the same
    /// recovery path.
    pub fn request_latch(tx: &Transaction, lock: &Lock, slot: usize) -> SmallResult {
        let tid = tx.get_id();

        {
            let mut cs = Database::mut_concurrent_status();
            if cs.add_latch(tid, lock, slot) {
                return Ok(());
            }
            cs.enqueue_waiter(tid, lock, slot);
        }

        let start = Instant::now();
        loop {
            {
                let mut cs = Database::mut_concurrent_status();
                if cs.add_latch(tid, lock, slot) {
                    return Ok(());
                }

                // The graph only carries edges for transactions that
                // are actually blocked, so recompute ours on every
                // poll before looking for a cycle.
                cs.refresh_wait_edges(tid, lock, slot);
                if let Some(cycle) = cs.wait_for_graph.find_cycle_from(tid) {
                    cs.cancel_waiter(tid, slot);

                    let depiction = cycle.iter().map(|t| format!("tx_{}", t)).join(" -> ");
                    let err = SmallError::new(
                        ErrorKind::DeadlockAborted,
                        &format!(
                            "deadlock detected while latching slot {}, cycle: {}",
                            slot, depiction
                        ),
                    );
                    debug!("{}, victim: {}", err, tx);
                    return Err(err);
                }
            }

            if start.elapsed() >= Self::get_timeout() {
                break;
            }
            sleep(POLL_INTERVAL);
        }

        Database::mut_concurrent_status().cancel_waiter(tid, slot);
        let err = SmallError::new(
            ErrorKind::DeadlockAborted,
            &format!(
                "{} timed out waiting for slot {}, concurrent status: {:?}",
                tx,
                slot,
                Database::concurrent_status()
            ),
        );
        err.show_backtrace();
        Err(err)
    }

    // Try to grant the latch. This api is idempotent: a transaction
    // that already holds a compatible or stronger latch is granted
    // immediately.
    //
    // # Return
    //
    // Whether the latch was granted.
    fn add_latch(&mut self, tid: TransactionID, lock: &Lock, slot: usize) -> bool {
        // an exclusive holder is compatible with nothing but itself
        if self.x_holder.get(&slot) == Some(&tid) {
            self.granted(tid, slot);
            return true;
        }

        match lock {
            Lock::SLock => {
                if self.x_holder.contains_key(&slot) {
                    return false;
                }

                let already = self
                    .s_holders
                    .get(&slot)
                    .map_or(false, |holders| holders.contains(&tid));
                if !already && self.x_waiter_ahead(slot, tid) {
                    return false;
                }

                self.s_holders
                    .entry(slot)
                    .or_insert_with(HashSet::new)
                    .insert(tid);
            }
            Lock::XLock => {
                if self.x_holder.contains_key(&slot) {
                    return false;
                }

                let (upgrading, other_holders) = match self.s_holders.get(&slot) {
                    Some(holders) => (
                        holders.contains(&tid),
                        holders.len() - holders.contains(&tid) as usize,
                    ),
                    None => (false, 0),
                };

                if other_holders > 0 {
                    return false;
                }

                // A sole shared holder upgrades ahead of the queue;
                // everyone else respects fifo order.
                if !upgrading && self.waiter_ahead(slot, tid) {
                    return false;
                }

                self.s_holders.remove(&slot);
                self.x_holder.insert(slot, tid);
            }
        }

        self.granted(tid, slot);
        true
    }

    fn granted(&mut self, tid: TransactionID, slot: usize) {
        self.hold_slots
            .entry(tid)
            .or_insert_with(HashSet::new)
            .insert(slot);

        self.dequeue_waiter(tid, slot);
        self.wait_for_graph.remove_waiter(tid);
    }

    fn dequeue_waiter(&mut self, tid: TransactionID, slot: usize) {
        let emptied = match self.waiters.get_mut(&slot) {
            Some(queue) => {
                queue.retain(|(waiter, _)| *waiter != tid);
                queue.is_empty()
            }
            None => false,
        };

        if emptied {
            self.waiters.remove(&slot);
        }
    }

    fn enqueue_waiter(&mut self, tid: TransactionID, lock: &Lock, slot: usize) {
        let queue = self.waiters.entry(slot).or_insert_with(Vec::new);
        if !queue.iter().any(|(waiter, _)| *waiter == tid) {
            queue.push((tid, *lock));
        }
    }

    fn cancel_waiter(&mut self, tid: TransactionID, slot: usize) {
        self.dequeue_waiter(tid, slot);
        self.wait_for_graph.remove_waiter(tid);
    }

    /// Is there an exclusive request queued ahead of `tid`?
    fn x_waiter_ahead(&self, slot: usize, tid: TransactionID) -> bool {
        if let Some(queue) = self.waiters.get(&slot) {
            for (waiter, lock) in queue {
                if *waiter == tid {
                    return false;
                }
                if *lock == Lock::XLock {
                    return true;
                }
            }
        }
        false
    }

    /// Is there any request queued ahead of `tid`?
    fn waiter_ahead(&self, slot: usize, tid: TransactionID) -> bool {
        match self.waiters.get(&slot).and_then(|queue| queue.first()) {
            Some((waiter, _)) => *waiter != tid,
            None => false,
        }
    }

    fn refresh_wait_edges(&mut self, tid: TransactionID, lock: &Lock, slot: usize) {
        let mut blockers: HashSet<TransactionID> = HashSet::new();

        if let Some(&x) = self.x_holder.get(&slot) {
            if x != tid {
                blockers.insert(x);
            }
        }

        let holds_s = self
            .s_holders
            .get(&slot)
            .map_or(false, |holders| holders.contains(&tid));

        if *lock == Lock::XLock {
            if let Some(holders) = self.s_holders.get(&slot) {
                for &holder in holders {
                    if holder != tid {
                        blockers.insert(holder);
                    }
                }
            }
        }

        // Waits induced by queue order: a queued writer blocks new
        // readers, and everything queued ahead blocks a queued
        // writer. Upgraders bypass the queue and wait on holders
        // only.
        if !holds_s {
            if let Some(queue) = self.waiters.get(&slot) {
                for (waiter, waiter_lock) in queue {
                    if *waiter == tid {
                        break;
                    }
                    match lock {
                        Lock::SLock => {
                            if *waiter_lock == Lock::XLock {
                                blockers.insert(*waiter);
                            }
                        }
                        Lock::XLock => {
                            blockers.insert(*waiter);
                        }
                    }
                }
            }
        }

        self.wait_for_graph.set_edges(tid, blockers);
    }

    /// Drop `tid`'s interest in `slot` and report a programming
    /// error when it holds nothing there.
    pub fn release_latch(&mut self, tid: TransactionID, slot: usize) -> SmallResult {
        let held = self.remove_holder(tid, slot);
        if !held {
            return Err(SmallError::new(
                ErrorKind::InvariantViolation,
                &format!("tx_{} released slot {} which it does not hold", tid, slot),
            ));
        }

        let emptied = match self.hold_slots.get_mut(&tid) {
            Some(slots) => {
                slots.remove(&slot);
                slots.is_empty()
            }
            None => false,
        };
        if emptied {
            self.hold_slots.remove(&tid);
        }

        Ok(())
    }

    fn remove_holder(&mut self, tid: TransactionID, slot: usize) -> bool {
        let mut held = false;

        let emptied = match self.s_holders.get_mut(&slot) {
            Some(holders) => {
                held = holders.remove(&tid);
                holders.is_empty()
            }
            None => false,
        };
        if emptied {
            self.s_holders.remove(&slot);
        }

        if self.x_holder.get(&slot) == Some(&tid) {
            self.x_holder.remove(&slot);
            held = true;
        }

        held
    }

    /// Remove `tid` from every holder set, every wait queue and the
    /// wait-for graph.
    pub fn release_all(&mut self, tid: TransactionID) {
        if let Some(slots) = self.hold_slots.remove(&tid) {
            for slot in slots {
                self.remove_holder(tid, slot);
            }
        }

        for queue in self.waiters.values_mut() {
            queue.retain(|(waiter, _)| *waiter != tid);
        }
        self.waiters.retain(|_, queue| !queue.is_empty());

        self.wait_for_graph.remove_transaction(tid);
    }

    pub fn is_holding(&self, tid: TransactionID, slot: usize) -> bool {
        self.x_holder.get(&slot) == Some(&tid)
            || self
                .s_holders
                .get(&slot)
                .map_or(false, |holders| holders.contains(&tid))
    }

    /// The slots `tid` currently latches, in slot order.
    pub fn hold_slots(&self, tid: TransactionID) -> Vec<usize> {
        let mut slots: Vec<usize> = self
            .hold_slots
            .get(&tid)
            .map_or_else(Vec::new, |slots| slots.iter().cloned().collect());
        slots.sort_unstable();
        slots
    }

    /// Whether any transaction latches `slot`. Eviction must skip
    /// such slots: a latch holder's page reference stays valid for
    /// as long as the latch is held.
    pub(crate) fn has_holder(&self, slot: usize) -> bool {
        self.x_holder.contains_key(&slot)
            || self
                .s_holders
                .get(&slot)
                .map_or(false, |holders| !holders.is_empty())
    }

    pub(crate) fn set_transaction_status(&mut self, tid: TransactionID, status: TransactionStatus) {
        self.transaction_status.insert(tid, status);
    }

    pub fn transaction_status(&self, tid: TransactionID) -> Option<TransactionStatus> {
        self.transaction_status.get(&tid).cloned()
    }

    pub fn clear(&mut self) {
        self.s_holders.clear();
        self.x_holder.clear();
        self.waiters.clear();
        self.hold_slots.clear();
        self.transaction_status.clear();
        self.wait_for_graph = WaitForGraph::new();
    }
}

impl fmt::Display for ConcurrentStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut depiction = "\n".to_string();

        depiction.push_str("s_holders: {");
        for (slot, holders) in self.s_holders.iter() {
            depiction.push_str(&format!("\n\tslot {} -> {:?}", slot, holders));
        }
        depiction.push_str("\n}\n");

        depiction.push_str("x_holder: {");
        for (slot, holder) in self.x_holder.iter() {
            depiction.push_str(&format!("\n\tslot {} -> tx_{}", slot, holder));
        }
        depiction.push_str("\n}\n");

        depiction.push_str("waiters: {");
        for (slot, queue) in self.waiters.iter() {
            depiction.push_str(&format!("\n\tslot {} -> {:?}", slot, queue));
        }
        depiction.push_str("\n}\n");

        depiction.push_str("hold_slots: {");
        for (tid, slots) in self.hold_slots.iter() {
            depiction.push_str(&format!("\n\ttx_{} -> {:?}", tid, slots));
        }
        depiction.push_str("\n}\n");

        write!(f, "{}", depiction)
    }
}

impl fmt::Debug for ConcurrentStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_latches_overlap() {
        let mut cs = ConcurrentStatus::new();

        assert!(cs.add_latch(1, &Lock::SLock, 0));
        assert!(cs.add_latch(2, &Lock::SLock, 0));

        assert!(cs.is_holding(1, 0));
        assert!(cs.is_holding(2, 0));
    }

    #[test]
    fn test_exclusive_excludes_everything() {
        let mut cs = ConcurrentStatus::new();

        assert!(cs.add_latch(1, &Lock::XLock, 0));
        assert!(!cs.add_latch(2, &Lock::SLock, 0));
        assert!(!cs.add_latch(2, &Lock::XLock, 0));

        // re-entrant for the holder, in both modes
        assert!(cs.add_latch(1, &Lock::XLock, 0));
        assert!(cs.add_latch(1, &Lock::SLock, 0));
    }

    #[test]
    fn test_upgrade_requires_sole_holder() {
        let mut cs = ConcurrentStatus::new();

        assert!(cs.add_latch(1, &Lock::SLock, 0));
        assert!(cs.add_latch(1, &Lock::XLock, 0));
        assert!(cs.is_holding(1, 0));

        // 2 shares with 3, neither may upgrade
        assert!(cs.add_latch(2, &Lock::SLock, 1));
        assert!(cs.add_latch(3, &Lock::SLock, 1));
        assert!(!cs.add_latch(2, &Lock::XLock, 1));
        assert!(!cs.add_latch(3, &Lock::XLock, 1));
    }

    #[test]
    fn test_queued_writer_blocks_new_readers() {
        let mut cs = ConcurrentStatus::new();

        assert!(cs.add_latch(1, &Lock::SLock, 0));
        cs.enqueue_waiter(2, &Lock::XLock, 0);

        // 3 was not a holder, so it must line up behind the writer
        assert!(!cs.add_latch(3, &Lock::SLock, 0));

        // ... while the existing holder is unaffected
        assert!(cs.add_latch(1, &Lock::SLock, 0));

        cs.release_latch(1, 0).unwrap();
        assert!(cs.add_latch(2, &Lock::XLock, 0));
        assert!(cs.is_holding(2, 0));
    }

    #[test]
    fn test_release_unheld_is_an_error() {
        let mut cs = ConcurrentStatus::new();

        assert!(cs.release_latch(1, 0).is_err());

        assert!(cs.add_latch(1, &Lock::SLock, 0));
        assert!(cs.release_latch(1, 0).is_ok());
        assert!(!cs.is_holding(1, 0));
    }

    #[test]
    fn test_release_all() {
        let mut cs = ConcurrentStatus::new();

        assert!(cs.add_latch(1, &Lock::SLock, 0));
        assert!(cs.add_latch(1, &Lock::XLock, 1));
        assert!(cs.add_latch(2, &Lock::SLock, 0));

        cs.release_all(1);
        assert!(!cs.is_holding(1, 0));
        assert!(!cs.is_holding(1, 1));
        assert!(cs.hold_slots(1).is_empty());

        // the other holder is untouched
        assert!(cs.is_holding(2, 0));
        assert!(cs.add_latch(3, &Lock::XLock, 1));
    }
}
