//! Error taxonomy shared across the storage and execution layers.
//!
//! Resource and executor failures are `DbError`; transactional failures are
//! `TransactionAbort` carrying the transaction id and the abort reason. Both
//! travel through `anyhow::Error` and are classified at catch sites with
//! `downcast_ref`.

use thiserror::Error;

use crate::concurrency::transaction::TxnId;

/// Non-transactional failures surfaced to callers.
#[derive(Error, Debug)]
pub enum DbError {
    /// The buffer pool has no free or evictable frame, or the disk store
    /// could not satisfy an allocation.
    #[error("out of memory: {0}")]
    OutOfMemory(String),

    /// A child executor failed; the cause is wrapped by the parent.
    #[error("child executor failed: {0}")]
    ChildExecFail(String),

    /// A tuple could not be materialized from its RID.
    #[error("tuple error: {0}")]
    TupleError(String),
}

/// Why a transaction was aborted by the concurrency layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// A lock was requested after the transaction entered SHRINKING.
    LockOnShrinking,
    /// Another upgrade was already in progress on the same RID.
    UpgradeConflict,
    /// The transaction was chosen as a deadlock victim.
    Deadlock,
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AbortReason::LockOnShrinking => write!(f, "lock requested while shrinking"),
            AbortReason::UpgradeConflict => write!(f, "upgrade conflict"),
            AbortReason::Deadlock => write!(f, "deadlock"),
        }
    }
}

/// Raised by the lock manager; caught by the transaction manager, which
/// rolls the transaction back.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("transaction {txn_id} aborted: {reason}")]
pub struct TransactionAbort {
    pub txn_id: TxnId,
    pub reason: AbortReason,
}

impl TransactionAbort {
    pub fn new(txn_id: TxnId, reason: AbortReason) -> Self {
        Self { txn_id, reason }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abort_display_carries_txn_and_reason() {
        let abort = TransactionAbort::new(TxnId(7), AbortReason::Deadlock);
        assert_eq!(abort.to_string(), "transaction Txn7 aborted: deadlock");
        assert_eq!(abort.reason, AbortReason::Deadlock);
    }

    #[test]
    fn test_classification_through_anyhow() {
        let err: anyhow::Error =
            TransactionAbort::new(TxnId(1), AbortReason::UpgradeConflict).into();
        assert!(err.downcast_ref::<TransactionAbort>().is_some());
        assert!(err.downcast_ref::<DbError>().is_none());

        let err: anyhow::Error = DbError::OutOfMemory("no frame".to_string()).into();
        let db = err.downcast_ref::<DbError>().unwrap();
        assert!(matches!(db, DbError::OutOfMemory(_)));
    }
}
