//! Row-level two-phase locking with cycle-based deadlock detection.
//!
//! Each RID has a FIFO queue of lock requests protected by one manager-wide
//! mutex; blocked requests sleep on a per-RID condition variable. A
//! background task periodically searches the wait-for graph for cycles and
//! aborts the youngest transaction of each one.

use crate::access::tuple::Rid;
use crate::concurrency::transaction::{
    IsolationLevel, Transaction, TransactionState, TxnId,
};
use crate::error::{AbortReason, TransactionAbort};
use anyhow::{bail, Result};
use log::{debug, info};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

#[derive(Debug)]
struct LockRequest {
    txn_id: TxnId,
    mode: LockMode,
    granted: bool,
}

struct LockRequestQueue {
    request_queue: VecDeque<LockRequest>,
    /// At most one upgrade may be in flight per RID.
    upgrading: bool,
    cv: Arc<Condvar>,
}

impl LockRequestQueue {
    fn new() -> Self {
        Self {
            request_queue: VecDeque::new(),
            upgrading: false,
            cv: Arc::new(Condvar::new()),
        }
    }

    fn holder_ids(&self) -> Vec<TxnId> {
        self.request_queue
            .iter()
            .filter(|r| r.granted)
            .map(|r| r.txn_id)
            .collect()
    }
}

#[derive(Default)]
struct LockState {
    lock_table: HashMap<Rid, LockRequestQueue>,
    rid_exclusive: HashMap<Rid, bool>,
    /// Wait-for adjacency, deduplicated and ordered for deterministic DFS.
    waits_for: BTreeMap<TxnId, BTreeSet<TxnId>>,
    /// RID each blocked transaction is waiting on.
    waiting_on: HashMap<TxnId, Rid>,
    /// Blocked transactions, so the detector can abort a victim.
    waiting_txns: HashMap<TxnId, Arc<Transaction>>,
}

impl LockState {
    fn queue(&mut self, rid: Rid) -> &mut LockRequestQueue {
        self.lock_table.entry(rid).or_insert_with(LockRequestQueue::new)
    }

    fn is_exclusive(&self, rid: Rid) -> bool {
        *self.rid_exclusive.get(&rid).unwrap_or(&false)
    }

    /// Record that `txn` is blocked on `rid`, with edges to every current
    /// holder. Called before each wait so the edges track the live holder
    /// set.
    fn register_wait(&mut self, txn: &Arc<Transaction>, rid: Rid) {
        let me = txn.id();
        let holders: BTreeSet<TxnId> = self
            .lock_table
            .get(&rid)
            .map(|q| q.holder_ids().into_iter().filter(|&t| t != me).collect())
            .unwrap_or_default();
        self.waits_for.insert(me, holders);
        self.waiting_on.insert(me, rid);
        self.waiting_txns.insert(me, Arc::clone(txn));
    }

    /// The transaction is no longer blocked: drop its out-edges.
    fn clear_wait(&mut self, txn_id: TxnId) {
        self.waits_for.remove(&txn_id);
        self.waiting_on.remove(&txn_id);
        self.waiting_txns.remove(&txn_id);
    }
}

struct LockManagerInner {
    state: Mutex<LockState>,
    enable_cycle_detection: AtomicBool,
    cycle_detection_interval: Duration,
}

pub struct LockManager {
    inner: Arc<LockManagerInner>,
    detector: Mutex<Option<JoinHandle<()>>>,
}

impl LockManager {
    /// Create a manager and start its deadlock-detection task.
    pub fn new(cycle_detection_interval: Duration) -> Self {
        let inner = Arc::new(LockManagerInner {
            state: Mutex::new(LockState::default()),
            enable_cycle_detection: AtomicBool::new(true),
            cycle_detection_interval,
        });
        let detector = {
            let inner = Arc::clone(&inner);
            std::thread::spawn(move || Self::run_cycle_detection(inner))
        };
        Self {
            inner,
            detector: Mutex::new(Some(detector)),
        }
    }

    /// Acquire a shared lock on `rid`, blocking while an exclusive holder or
    /// an upgrade is in the way.
    pub fn lock_shared(&self, txn: &Arc<Transaction>, rid: Rid) -> Result<()> {
        self.check_shrinking(txn)?;
        if txn.is_shared_locked(rid) || txn.is_exclusive_locked(rid) {
            return Ok(());
        }

        let mut state = self.lock().unwrap();
        loop {
            let blocked = {
                let exclusive = state.is_exclusive(rid);
                let queue = state.queue(rid);
                queue.upgrading || exclusive
            };
            if !blocked {
                break;
            }
            state = self.wait(state, txn, rid)?;
        }
        state.clear_wait(txn.id());
        state.queue(rid).request_queue.push_back(LockRequest {
            txn_id: txn.id(),
            mode: LockMode::Shared,
            granted: true,
        });
        txn.add_shared_lock(rid);
        txn.set_state(TransactionState::Growing);
        Ok(())
    }

    /// Acquire an exclusive lock on `rid`, blocking while any other request
    /// is queued.
    pub fn lock_exclusive(&self, txn: &Arc<Transaction>, rid: Rid) -> Result<()> {
        self.check_shrinking(txn)?;
        if txn.is_exclusive_locked(rid) {
            return Ok(());
        }

        let mut state = self.lock().unwrap();
        loop {
            let blocked = {
                let exclusive = state.is_exclusive(rid);
                let queue = state.queue(rid);
                queue.upgrading || exclusive || !queue.request_queue.is_empty()
            };
            if !blocked {
                break;
            }
            state = self.wait(state, txn, rid)?;
        }
        state.clear_wait(txn.id());
        state.queue(rid).request_queue.push_back(LockRequest {
            txn_id: txn.id(),
            mode: LockMode::Exclusive,
            granted: true,
        });
        state.rid_exclusive.insert(rid, true);
        txn.add_exclusive_lock(rid);
        txn.set_state(TransactionState::Growing);
        Ok(())
    }

    /// Upgrade a held shared lock to exclusive in place. Only one upgrade may
    /// wait per RID; a second upgrader aborts immediately.
    pub fn lock_upgrade(&self, txn: &Arc<Transaction>, rid: Rid) -> Result<()> {
        self.check_shrinking(txn)?;
        if !txn.is_shared_locked(rid) {
            bail!("{} upgrading a lock it does not hold on {}", txn.id(), rid);
        }

        let mut state = self.lock().unwrap();
        if state.queue(rid).upgrading {
            drop(state);
            txn.set_state(TransactionState::Aborted);
            return Err(
                TransactionAbort::new(txn.id(), AbortReason::UpgradeConflict).into(),
            );
        }
        state.queue(rid).upgrading = true;

        loop {
            if state.queue(rid).request_queue.len() == 1 {
                break;
            }
            state = match self.wait(state, txn, rid) {
                Ok(state) => state,
                Err(e) => {
                    // Clear the upgrade flag on abort so others can proceed.
                    let mut state = self.lock().unwrap();
                    let queue = state.queue(rid);
                    queue.upgrading = false;
                    queue.cv.notify_all();
                    return Err(e);
                }
            };
        }
        state.clear_wait(txn.id());

        let queue = state.queue(rid);
        let request = queue
            .request_queue
            .front_mut()
            .expect("upgrade admitted on an empty queue");
        debug_assert_eq!(request.txn_id, txn.id());
        request.mode = LockMode::Exclusive;
        request.granted = true;
        queue.upgrading = false;
        state.rid_exclusive.insert(rid, true);
        txn.remove_shared_lock(rid);
        txn.add_exclusive_lock(rid);
        txn.set_state(TransactionState::Growing);
        Ok(())
    }

    /// Release one lock. Releasing a lock that is not held is tolerated.
    /// Under REPEATABLE_READ the first release moves a growing transaction to
    /// SHRINKING.
    pub fn unlock(&self, txn: &Arc<Transaction>, rid: Rid) -> Result<()> {
        let mut state = self.lock().unwrap();
        let mode = if txn.is_shared_locked(rid) {
            LockMode::Shared
        } else if txn.is_exclusive_locked(rid) {
            LockMode::Exclusive
        } else {
            return Ok(());
        };

        let queue = state.queue(rid);
        if let Some(pos) = queue
            .request_queue
            .iter()
            .position(|r| r.txn_id == txn.id())
        {
            let removed = queue.request_queue.remove(pos);
            debug_assert_eq!(removed.map(|r| r.mode), Some(mode));
        }

        if txn.state() == TransactionState::Growing
            && txn.isolation() == IsolationLevel::RepeatableRead
        {
            txn.set_state(TransactionState::Shrinking);
        }

        match mode {
            LockMode::Shared => {
                txn.remove_shared_lock(rid);
            }
            LockMode::Exclusive => {
                txn.remove_exclusive_lock(rid);
                state.rid_exclusive.insert(rid, false);
            }
        }
        // Waiting shared, exclusive, and upgrade requests all have distinct
        // admission predicates; wake everything and let each re-evaluate.
        state.queue(rid).cv.notify_all();
        Ok(())
    }

    /// Current wait-for edges, ascending; exposed for tests.
    pub fn edge_list(&self) -> Vec<(TxnId, TxnId)> {
        let state = self.lock().unwrap();
        let mut edges = Vec::new();
        for (&from, tos) in &state.waits_for {
            for &to in tos {
                edges.push((from, to));
            }
        }
        edges
    }

    fn lock(&self) -> std::sync::LockResult<MutexGuard<'_, LockState>> {
        self.inner.state.lock()
    }

    fn check_shrinking(&self, txn: &Arc<Transaction>) -> Result<()> {
        if txn.state() == TransactionState::Shrinking {
            txn.set_state(TransactionState::Aborted);
            return Err(
                TransactionAbort::new(txn.id(), AbortReason::LockOnShrinking).into(),
            );
        }
        Ok(())
    }

    /// One blocking round: record wait-for edges against the current holders,
    /// sleep on the RID's condition, and re-check for a deadlock abort on
    /// wake-up.
    fn wait<'a>(
        &'a self,
        mut state: MutexGuard<'a, LockState>,
        txn: &Arc<Transaction>,
        rid: Rid,
    ) -> Result<MutexGuard<'a, LockState>> {
        state.register_wait(txn, rid);
        let cv = state.queue(rid).cv.clone();
        let mut state = cv.wait(state).unwrap();
        if txn.state() == TransactionState::Aborted {
            state.clear_wait(txn.id());
            return Err(TransactionAbort::new(txn.id(), AbortReason::Deadlock).into());
        }
        Ok(state)
    }

    fn run_cycle_detection(inner: Arc<LockManagerInner>) {
        while inner.enable_cycle_detection.load(Ordering::SeqCst) {
            std::thread::sleep(inner.cycle_detection_interval);
            let mut state = inner.state.lock().unwrap();
            while let Some(victim) = Self::find_cycle_victim(&state) {
                info!("deadlock detected; aborting {}", victim);
                if let Some(txn) = state.waiting_txns.get(&victim).cloned() {
                    txn.set_state(TransactionState::Aborted);
                }
                if let Some(&rid) = state.waiting_on.get(&victim) {
                    if let Some(queue) = state.lock_table.get(&rid) {
                        queue.cv.notify_all();
                    }
                }
                // Break the cycle so the search can continue.
                state.waits_for.remove(&victim);
            }
        }
    }

    /// Deterministic DFS over the wait-for graph: sources and neighbors in
    /// ascending txn id. Returns the youngest member of the first cycle.
    fn find_cycle_victim(state: &LockState) -> Option<TxnId> {
        let mut visited: BTreeSet<TxnId> = BTreeSet::new();
        let sources: Vec<TxnId> = state.waits_for.keys().copied().collect();
        for source in sources {
            if visited.contains(&source) {
                continue;
            }
            let mut path: Vec<TxnId> = Vec::new();
            if let Some(victim) = Self::dfs(state, source, &mut visited, &mut path) {
                return Some(victim);
            }
        }
        None
    }

    fn dfs(
        state: &LockState,
        node: TxnId,
        visited: &mut BTreeSet<TxnId>,
        path: &mut Vec<TxnId>,
    ) -> Option<TxnId> {
        if let Some(cycle_start) = path.iter().position(|&t| t == node) {
            // Back edge: the cycle is the path suffix from the first
            // occurrence of `node`.
            let victim = path[cycle_start..].iter().copied().max();
            debug!("wait-for cycle: {:?}", &path[cycle_start..]);
            return victim;
        }
        if !visited.insert(node) {
            return None;
        }
        path.push(node);
        if let Some(neighbors) = state.waits_for.get(&node) {
            for &next in neighbors {
                if let Some(victim) = Self::dfs(state, next, visited, path) {
                    return Some(victim);
                }
            }
        }
        path.pop();
        None
    }
}

impl Drop for LockManager {
    fn drop(&mut self) {
        self.inner
            .enable_cycle_detection
            .store(false, Ordering::SeqCst);
        if let Some(handle) = self.detector.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::page::PageId;
    use std::sync::Barrier;
    use std::thread;

    fn manager() -> Arc<LockManager> {
        Arc::new(LockManager::new(Duration::from_millis(10)))
    }

    fn txn(id: u32, isolation: IsolationLevel) -> Arc<Transaction> {
        Arc::new(Transaction::new(TxnId(id), isolation))
    }

    fn rid(n: i32) -> Rid {
        Rid::new(PageId(n), 0)
    }

    fn abort_reason(e: &anyhow::Error) -> Option<AbortReason> {
        e.downcast_ref::<TransactionAbort>().map(|a| a.reason)
    }

    #[test]
    fn test_shared_locks_coexist() -> Result<()> {
        let mgr = manager();
        let t1 = txn(1, IsolationLevel::RepeatableRead);
        let t2 = txn(2, IsolationLevel::RepeatableRead);

        mgr.lock_shared(&t1, rid(1))?;
        mgr.lock_shared(&t2, rid(1))?;
        assert!(t1.is_shared_locked(rid(1)));
        assert!(t2.is_shared_locked(rid(1)));

        // Reacquiring a held lock returns immediately.
        mgr.lock_shared(&t1, rid(1))?;
        Ok(())
    }

    #[test]
    fn test_exclusive_blocks_shared() -> Result<()> {
        let mgr = manager();
        let t1 = txn(1, IsolationLevel::RepeatableRead);
        let t2 = txn(2, IsolationLevel::RepeatableRead);

        mgr.lock_exclusive(&t1, rid(1))?;

        let blocked = {
            let mgr = Arc::clone(&mgr);
            let t2 = Arc::clone(&t2);
            thread::spawn(move || {
                mgr.lock_shared(&t2, rid(1)).unwrap();
                assert!(t2.is_shared_locked(rid(1)));
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!t2.is_shared_locked(rid(1)));
        // While blocked, t2 waits on t1.
        assert_eq!(mgr.edge_list(), vec![(TxnId(2), TxnId(1))]);

        mgr.unlock(&t1, rid(1))?;
        blocked.join().unwrap();
        Ok(())
    }

    #[test]
    fn test_exclusive_waits_for_all_readers() -> Result<()> {
        let mgr = manager();
        let t1 = txn(1, IsolationLevel::RepeatableRead);
        let t2 = txn(2, IsolationLevel::RepeatableRead);
        let t3 = txn(3, IsolationLevel::RepeatableRead);

        mgr.lock_shared(&t1, rid(1))?;
        mgr.lock_shared(&t2, rid(1))?;

        let writer = {
            let mgr = Arc::clone(&mgr);
            let t3 = Arc::clone(&t3);
            thread::spawn(move || {
                mgr.lock_exclusive(&t3, rid(1)).unwrap();
                assert!(t3.is_exclusive_locked(rid(1)));
            })
        };

        thread::sleep(Duration::from_millis(30));
        mgr.unlock(&t1, rid(1))?;
        thread::sleep(Duration::from_millis(30));
        assert!(!t3.is_exclusive_locked(rid(1)));
        mgr.unlock(&t2, rid(1))?;
        writer.join().unwrap();
        Ok(())
    }

    #[test]
    fn test_upgrade() -> Result<()> {
        let mgr = manager();
        let t1 = txn(1, IsolationLevel::RepeatableRead);

        mgr.lock_shared(&t1, rid(1))?;
        mgr.lock_upgrade(&t1, rid(1))?;
        assert!(!t1.is_shared_locked(rid(1)));
        assert!(t1.is_exclusive_locked(rid(1)));
        Ok(())
    }

    #[test]
    fn test_upgrade_conflict_aborts_second_upgrader() -> Result<()> {
        let mgr = manager();
        let t1 = txn(1, IsolationLevel::RepeatableRead);
        let t2 = txn(2, IsolationLevel::RepeatableRead);

        mgr.lock_shared(&t1, rid(1))?;
        mgr.lock_shared(&t2, rid(1))?;

        let barrier = Arc::new(Barrier::new(2));
        let upgrader = {
            let mgr = Arc::clone(&mgr);
            let t1 = Arc::clone(&t1);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                // Blocks until t2's shared lock is gone.
                mgr.lock_upgrade(&t1, rid(1)).unwrap();
                assert!(t1.is_exclusive_locked(rid(1)));
            })
        };

        barrier.wait();
        thread::sleep(Duration::from_millis(50));

        // A second upgrade on the same RID aborts immediately.
        let err = mgr.lock_upgrade(&t2, rid(1)).unwrap_err();
        assert_eq!(abort_reason(&err), Some(AbortReason::UpgradeConflict));
        assert_eq!(t2.state(), TransactionState::Aborted);

        // Releasing the aborted transaction's lock admits the upgrader.
        mgr.unlock(&t2, rid(1))?;
        upgrader.join().unwrap();
        Ok(())
    }

    #[test]
    fn test_deadlock_detection_aborts_youngest() -> Result<()> {
        // Spec scenario: T1 upgrades R1 then wants R2; T2 holds R2 and wants
        // R1. The detector kills T2 (the younger).
        let mgr = manager();
        let t1 = txn(1, IsolationLevel::RepeatableRead);
        let t2 = txn(2, IsolationLevel::RepeatableRead);

        mgr.lock_shared(&t1, rid(1))?;
        mgr.lock_shared(&t2, rid(2))?;
        mgr.lock_upgrade(&t1, rid(1))?;

        let h1 = {
            let mgr = Arc::clone(&mgr);
            let t1 = Arc::clone(&t1);
            thread::spawn(move || {
                // Blocks on T2's shared lock, then succeeds once T2 dies.
                mgr.lock_exclusive(&t1, rid(2)).unwrap();
                t1.is_exclusive_locked(rid(2))
            })
        };
        thread::sleep(Duration::from_millis(30));

        let h2 = {
            let mgr = Arc::clone(&mgr);
            let t2 = Arc::clone(&t2);
            thread::spawn(move || mgr.lock_exclusive(&t2, rid(1)))
        };

        let err = h2.join().unwrap().unwrap_err();
        assert_eq!(abort_reason(&err), Some(AbortReason::Deadlock));
        assert_eq!(t2.state(), TransactionState::Aborted);

        // Simulate T2's rollback so T1 can make progress.
        mgr.unlock(&t2, rid(2))?;
        assert!(h1.join().unwrap());
        Ok(())
    }

    #[test]
    fn test_lock_on_shrinking() -> Result<()> {
        let mgr = manager();
        let t1 = txn(1, IsolationLevel::RepeatableRead);

        mgr.lock_shared(&t1, rid(1))?;
        mgr.unlock(&t1, rid(1))?;
        assert_eq!(t1.state(), TransactionState::Shrinking);

        let err = mgr.lock_shared(&t1, rid(2)).unwrap_err();
        assert_eq!(abort_reason(&err), Some(AbortReason::LockOnShrinking));
        assert_eq!(t1.state(), TransactionState::Aborted);
        Ok(())
    }

    #[test]
    fn test_read_committed_release_keeps_growing() -> Result<()> {
        let mgr = manager();
        let t1 = txn(1, IsolationLevel::ReadCommitted);

        mgr.lock_shared(&t1, rid(1))?;
        mgr.unlock(&t1, rid(1))?;
        assert_eq!(t1.state(), TransactionState::Growing);

        // Further locks are fine.
        mgr.lock_shared(&t1, rid(2))?;
        Ok(())
    }

    #[test]
    fn test_unlock_unheld_is_tolerated() -> Result<()> {
        let mgr = manager();
        let t1 = txn(1, IsolationLevel::RepeatableRead);
        mgr.unlock(&t1, rid(9))?;
        Ok(())
    }

    #[test]
    fn test_no_two_exclusive_holders() -> Result<()> {
        let mgr = manager();
        let counter = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let mut handles = Vec::new();

        for id in 1..=4u32 {
            let mgr = Arc::clone(&mgr);
            let counter = Arc::clone(&counter);
            handles.push(thread::spawn(move || {
                let t = txn(id, IsolationLevel::ReadCommitted);
                mgr.lock_exclusive(&t, rid(1)).unwrap();
                let inside = counter.fetch_add(1, Ordering::SeqCst);
                assert_eq!(inside, 0);
                thread::sleep(Duration::from_millis(5));
                counter.fetch_sub(1, Ordering::SeqCst);
                mgr.unlock(&t, rid(1)).unwrap();
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        Ok(())
    }
}
