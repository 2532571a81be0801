use crate::catalog::Catalog;
use crate::concurrency::lock::LockManager;
use crate::concurrency::transaction::{
    IsolationLevel, Transaction, TransactionState, TxnId, WriteType,
};
use anyhow::{anyhow, Result};
use log::debug;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Coordinates transaction lifecycles: id assignment, commit (which applies
/// deferred deletes), and abort (which rolls back through the accumulated
/// table and index write records).
pub struct TransactionManager {
    next_txn_id: AtomicU32,
    lock_manager: Arc<LockManager>,
    txn_map: Mutex<HashMap<TxnId, Arc<Transaction>>>,
}

impl TransactionManager {
    pub fn new(lock_manager: Arc<LockManager>) -> Self {
        Self {
            next_txn_id: AtomicU32::new(0),
            lock_manager,
            txn_map: Mutex::new(HashMap::new()),
        }
    }

    pub fn begin(&self, isolation: IsolationLevel) -> Arc<Transaction> {
        let id = TxnId(self.next_txn_id.fetch_add(1, Ordering::SeqCst));
        let txn = Arc::new(Transaction::new(id, isolation));
        self.txn_map.lock().insert(id, Arc::clone(&txn));
        txn
    }

    pub fn get(&self, id: TxnId) -> Option<Arc<Transaction>> {
        self.txn_map.lock().get(&id).cloned()
    }

    /// Commit: deleted tuples become unreachable for good, locks are
    /// released, and the transaction ends COMMITTED.
    pub fn commit(&self, txn: &Arc<Transaction>, catalog: &Catalog) -> Result<()> {
        for record in txn.take_table_writes() {
            if record.op == WriteType::Delete {
                let table = catalog.table_by_oid(record.table_oid)?;
                table.table.apply_delete(record.rid)?;
            }
        }
        txn.take_index_writes();
        self.release_locks(txn)?;
        txn.set_state(TransactionState::Committed);
        Ok(())
    }

    /// Abort: undo table writes newest-first, then index writes, then drop
    /// all locks.
    pub fn abort(&self, txn: &Arc<Transaction>, catalog: &Catalog) -> Result<()> {
        debug!("rolling back {}", txn.id());
        let table_writes = txn.take_table_writes();
        for record in table_writes.into_iter().rev() {
            let table = catalog.table_by_oid(record.table_oid)?;
            match record.op {
                WriteType::Insert => {
                    table.table.apply_delete(record.rid)?;
                }
                WriteType::Delete => {
                    table.table.rollback_delete(record.rid)?;
                }
                WriteType::Update => {
                    let old = record
                        .old_tuple
                        .ok_or_else(|| anyhow!("update record without a pre-image"))?;
                    table.table.update_tuple(&old, record.rid)?;
                }
            }
        }

        let index_writes = txn.take_index_writes();
        for record in index_writes.into_iter().rev() {
            let info = catalog.index_by_oid(record.index_oid)?;
            let key = record.tuple.key_from_tuple(&info.key_attrs);
            match record.op {
                WriteType::Insert => {
                    info.index.delete_entry(&key, record.rid)?;
                }
                WriteType::Delete => {
                    info.index.insert_entry(&key, record.rid)?;
                }
                WriteType::Update => {
                    let old = record
                        .old_tuple
                        .as_ref()
                        .ok_or_else(|| anyhow!("update record without a pre-image"))?;
                    info.index.delete_entry(&key, record.rid)?;
                    info.index
                        .insert_entry(&old.key_from_tuple(&info.key_attrs), record.rid)?;
                }
            }
        }

        self.release_locks(txn)?;
        txn.set_state(TransactionState::Aborted);
        Ok(())
    }

    fn release_locks(&self, txn: &Arc<Transaction>) -> Result<()> {
        for rid in txn.held_locks() {
            self.lock_manager.unlock(txn, rid)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_begin_assigns_monotonic_ids() {
        let lock_manager = Arc::new(LockManager::new(Duration::from_millis(50)));
        let tm = TransactionManager::new(lock_manager);

        let t0 = tm.begin(IsolationLevel::RepeatableRead);
        let t1 = tm.begin(IsolationLevel::ReadCommitted);
        assert!(t0.id() < t1.id());
        assert_eq!(tm.get(t0.id()).unwrap().id(), t0.id());
        assert_eq!(t0.state(), TransactionState::Growing);
    }
}
