use crate::access::tuple::{Rid, Tuple};
use crate::catalog::{IndexOid, TableOid};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Transaction identifier. Ids are handed out monotonically, so a larger id
/// means a younger transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TxnId(pub u32);

impl std::fmt::Display for TxnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Txn{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TransactionState::Growing => "GROWING",
            TransactionState::Shrinking => "SHRINKING",
            TransactionState::Committed => "COMMITTED",
            TransactionState::Aborted => "ABORTED",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteType {
    Insert,
    Delete,
    Update,
}

/// Undo information for one table mutation.
#[derive(Debug, Clone)]
pub struct TableWriteRecord {
    pub rid: Rid,
    pub op: WriteType,
    pub table_oid: TableOid,
    /// Pre-image, kept for updates.
    pub old_tuple: Option<Tuple>,
}

/// Undo information for one index mutation.
#[derive(Debug, Clone)]
pub struct IndexWriteRecord {
    pub rid: Rid,
    pub op: WriteType,
    pub index_oid: IndexOid,
    /// The row whose key was inserted or deleted.
    pub tuple: Tuple,
    /// Pre-image row for updates.
    pub old_tuple: Option<Tuple>,
}

/// Per-transaction state bag. The lock manager and the deadlock detector
/// mutate it concurrently with the owning thread, so every field behind the
/// id and isolation level has interior mutability.
pub struct Transaction {
    id: TxnId,
    isolation: IsolationLevel,
    state: Mutex<TransactionState>,
    shared_lock_set: Mutex<HashSet<Rid>>,
    exclusive_lock_set: Mutex<HashSet<Rid>>,
    table_write_set: Mutex<Vec<TableWriteRecord>>,
    index_write_set: Mutex<Vec<IndexWriteRecord>>,
}

impl Transaction {
    pub fn new(id: TxnId, isolation: IsolationLevel) -> Self {
        Self {
            id,
            isolation,
            state: Mutex::new(TransactionState::Growing),
            shared_lock_set: Mutex::new(HashSet::new()),
            exclusive_lock_set: Mutex::new(HashSet::new()),
            table_write_set: Mutex::new(Vec::new()),
            index_write_set: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    pub fn state(&self) -> TransactionState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: TransactionState) {
        *self.state.lock() = state;
    }

    pub fn is_shared_locked(&self, rid: Rid) -> bool {
        self.shared_lock_set.lock().contains(&rid)
    }

    pub fn is_exclusive_locked(&self, rid: Rid) -> bool {
        self.exclusive_lock_set.lock().contains(&rid)
    }

    pub fn add_shared_lock(&self, rid: Rid) {
        self.shared_lock_set.lock().insert(rid);
    }

    pub fn add_exclusive_lock(&self, rid: Rid) {
        self.exclusive_lock_set.lock().insert(rid);
    }

    pub fn remove_shared_lock(&self, rid: Rid) {
        self.shared_lock_set.lock().remove(&rid);
    }

    pub fn remove_exclusive_lock(&self, rid: Rid) {
        self.exclusive_lock_set.lock().remove(&rid);
    }

    /// Snapshot of every lock currently held.
    pub fn held_locks(&self) -> Vec<Rid> {
        let mut rids: Vec<Rid> = self.shared_lock_set.lock().iter().copied().collect();
        rids.extend(self.exclusive_lock_set.lock().iter().copied());
        rids
    }

    pub fn shared_lock_count(&self) -> usize {
        self.shared_lock_set.lock().len()
    }

    pub fn exclusive_lock_count(&self) -> usize {
        self.exclusive_lock_set.lock().len()
    }

    pub fn append_table_write(&self, record: TableWriteRecord) {
        self.table_write_set.lock().push(record);
    }

    pub fn append_index_write(&self, record: IndexWriteRecord) {
        self.index_write_set.lock().push(record);
    }

    pub fn take_table_writes(&self) -> Vec<TableWriteRecord> {
        std::mem::take(&mut *self.table_write_set.lock())
    }

    pub fn take_index_writes(&self) -> Vec<IndexWriteRecord> {
        std::mem::take(&mut *self.index_write_set.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::page::PageId;

    #[test]
    fn test_lifecycle_defaults() {
        let txn = Transaction::new(TxnId(1), IsolationLevel::RepeatableRead);
        assert_eq!(txn.state(), TransactionState::Growing);
        assert_eq!(txn.isolation(), IsolationLevel::RepeatableRead);
        assert_eq!(txn.held_locks().len(), 0);
    }

    #[test]
    fn test_lock_sets() {
        let txn = Transaction::new(TxnId(1), IsolationLevel::ReadCommitted);
        let rid = Rid::new(PageId(1), 2);

        txn.add_shared_lock(rid);
        assert!(txn.is_shared_locked(rid));
        assert!(!txn.is_exclusive_locked(rid));

        txn.remove_shared_lock(rid);
        txn.add_exclusive_lock(rid);
        assert!(txn.is_exclusive_locked(rid));
        assert_eq!(txn.held_locks(), vec![rid]);
    }

    #[test]
    fn test_txn_id_ordering() {
        assert!(TxnId(1) < TxnId(2));
        assert_eq!(format!("{}", TxnId(7)), "Txn7");
    }
}
