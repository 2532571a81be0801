//! Volcano-style iterator executors.
//!
//! Every executor exposes `init` and `next`; `next` yields one `(tuple, rid)`
//! at a time. Blocking operators (hash aggregation, nested loop join)
//! materialize their input during `init`. Row locks are taken inside the
//! scan and DML executors according to the transaction's isolation level.

use crate::access::tuple::{Rid, Tuple};
use crate::catalog::{Catalog, Schema};
use crate::concurrency::lock::LockManager;
use crate::concurrency::manager::TransactionManager;
use crate::concurrency::transaction::Transaction;
use crate::error::{DbError, TransactionAbort};
use crate::storage::buffer::BufferPoolManager;
use anyhow::Result;
use std::sync::Arc;

pub mod aggregate;
pub mod delete;
pub mod index_scan;
pub mod insert;
pub mod limit;
pub mod nested_index_join;
pub mod nested_loop_join;
pub mod seq_scan;
pub mod update;

pub use aggregate::{AggregationType, HashAggregateExecutor};
pub use delete::DeleteExecutor;
pub use index_scan::IndexScanExecutor;
pub use insert::{InsertExecutor, InsertSource};
pub use limit::LimitExecutor;
pub use nested_index_join::NestedIndexJoinExecutor;
pub use nested_loop_join::NestedLoopJoinExecutor;
pub use seq_scan::SeqScanExecutor;
pub use update::UpdateExecutor;

/// Iterator contract shared by every operator.
pub trait Executor: Send {
    /// Prepare the executor; must be called before `next`.
    fn init(&mut self) -> Result<()>;

    /// Produce the next tuple, or None when exhausted.
    fn next(&mut self) -> Result<Option<(Tuple, Rid)>>;

    /// Schema of the produced tuples.
    fn output_schema(&self) -> &Schema;
}

/// Shared resources threaded through an executor pipeline.
#[derive(Clone)]
pub struct ExecutionContext {
    pub catalog: Arc<Catalog>,
    pub buffer_pool: BufferPoolManager,
    pub lock_manager: Arc<LockManager>,
    pub transaction_manager: Arc<TransactionManager>,
    pub txn: Arc<Transaction>,
}

impl ExecutionContext {
    pub fn new(
        catalog: Arc<Catalog>,
        buffer_pool: BufferPoolManager,
        lock_manager: Arc<LockManager>,
        transaction_manager: Arc<TransactionManager>,
        txn: Arc<Transaction>,
    ) -> Self {
        Self {
            catalog,
            buffer_pool,
            lock_manager,
            transaction_manager,
            txn,
        }
    }
}

/// Wrap a child executor's failure as CHILD_EXE_FAIL. Transactional aborts
/// pass through untouched so the transaction manager can still classify
/// them.
pub(crate) fn wrap_child_error(e: anyhow::Error) -> anyhow::Error {
    if e.downcast_ref::<TransactionAbort>().is_some() {
        e
    } else {
        DbError::ChildExecFail(e.to_string()).into()
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::*;
    use crate::access::value::{DataType, Value};
    use crate::catalog::Column;
    use crate::concurrency::transaction::IsolationLevel;
    use crate::storage::buffer::lru::LruReplacer;
    use crate::storage::disk::DiskManager;
    use std::time::Duration;
    use tempfile::TempDir;

    pub struct TestDb {
        pub catalog: Arc<Catalog>,
        pub buffer_pool: BufferPoolManager,
        pub lock_manager: Arc<LockManager>,
        pub transaction_manager: Arc<TransactionManager>,
        _dir: TempDir,
    }

    impl TestDb {
        pub fn new() -> Result<Self> {
            let dir = tempfile::tempdir()?;
            let disk = DiskManager::create(&dir.path().join("test.db"))?;
            let buffer_pool =
                BufferPoolManager::new(disk, Box::new(LruReplacer::new(128)), 128);
            let catalog = Arc::new(Catalog::new(buffer_pool.clone())?);
            let lock_manager = Arc::new(LockManager::new(Duration::from_millis(20)));
            let transaction_manager =
                Arc::new(TransactionManager::new(Arc::clone(&lock_manager)));
            Ok(Self {
                catalog,
                buffer_pool,
                lock_manager,
                transaction_manager,
                _dir: dir,
            })
        }

        pub fn context(&self, isolation: IsolationLevel) -> ExecutionContext {
            let txn = self.transaction_manager.begin(isolation);
            ExecutionContext::new(
                Arc::clone(&self.catalog),
                self.buffer_pool.clone(),
                Arc::clone(&self.lock_manager),
                Arc::clone(&self.transaction_manager),
                txn,
            )
        }
    }

    pub fn users_schema() -> Schema {
        Schema::new(vec![
            Column::new("id", DataType::Int32),
            Column::new("name", DataType::Varchar),
            Column::new("age", DataType::Int32),
        ])
    }

    pub fn user(id: i32, name: &str, age: i32) -> Tuple {
        Tuple::new(vec![
            Value::Int32(id),
            Value::String(name.to_string()),
            Value::Int32(age),
        ])
    }

    /// Create the `users` table with three rows and an index on id.
    pub fn seed_users(db: &TestDb) -> Result<()> {
        let info = db.catalog.create_table("users", users_schema())?;
        for (id, name, age) in [(1, "alice", 30), (2, "bob", 25), (3, "carol", 41)] {
            info.table.insert_tuple(&user(id, name, age))?;
        }
        db.catalog.create_index("users_by_id", "users", vec![0], 8)?;
        Ok(())
    }

    /// Drain an executor after initializing it.
    pub fn collect(executor: &mut dyn Executor) -> Result<Vec<(Tuple, Rid)>> {
        executor.init()?;
        let mut rows = Vec::new();
        while let Some(row) = executor.next()? {
            rows.push(row);
        }
        Ok(rows)
    }
}
