use crate::access::heap::TableIterator;
use crate::access::tuple::{Rid, Tuple};
use crate::catalog::{Schema, TableOid};
use crate::concurrency::transaction::IsolationLevel;
use crate::executor::{ExecutionContext, Executor};
use crate::expression::Expression;
use anyhow::{bail, Result};

/// Full-table scan with per-row shared locking.
///
/// READ_UNCOMMITTED takes no locks; READ_COMMITTED releases each lock after
/// the row is produced; REPEATABLE_READ keeps them until the transaction
/// ends.
pub struct SeqScanExecutor {
    context: ExecutionContext,
    table_oid: TableOid,
    predicate: Option<Expression>,
    iter: Option<TableIterator>,
    output_schema: Schema,
    initialized: bool,
}

impl SeqScanExecutor {
    pub fn new(
        context: ExecutionContext,
        table_oid: TableOid,
        predicate: Option<Expression>,
    ) -> Self {
        Self {
            context,
            table_oid,
            predicate,
            iter: None,
            output_schema: Schema::new(Vec::new()),
            initialized: false,
        }
    }
}

impl Executor for SeqScanExecutor {
    fn init(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }
        let table_info = self.context.catalog.table_by_oid(self.table_oid)?;
        self.output_schema = table_info.schema.clone();
        self.iter = Some(table_info.table.iter());
        self.initialized = true;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>> {
        if !self.initialized {
            bail!("executor not initialized");
        }
        let iter = self.iter.as_mut().unwrap();
        let txn = &self.context.txn;

        loop {
            let Some(entry) = iter.next() else {
                return Ok(None);
            };
            let (rid, tuple) = entry?;

            let mut acquired = false;
            if txn.isolation() != IsolationLevel::ReadUncommitted
                && !txn.is_shared_locked(rid)
                && !txn.is_exclusive_locked(rid)
            {
                self.context.lock_manager.lock_shared(txn, rid)?;
                acquired = true;
            }

            let matches = match &self.predicate {
                Some(predicate) => predicate.evaluate(&tuple)?.is_true(),
                None => true,
            };

            if txn.isolation() == IsolationLevel::ReadCommitted && acquired {
                self.context.lock_manager.unlock(txn, rid)?;
            }

            if matches {
                return Ok(Some((tuple, rid)));
            }
        }
    }

    fn output_schema(&self) -> &Schema {
        &self.output_schema
    }
}
