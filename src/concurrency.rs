pub mod lock;
pub mod manager;
pub mod transaction;

pub use lock::{LockManager, LockMode};
pub use manager::TransactionManager;
pub use transaction::{IsolationLevel, Transaction, TransactionState, TxnId};
