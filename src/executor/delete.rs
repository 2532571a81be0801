use crate::access::tuple::{Rid, Tuple};
use crate::catalog::{Schema, TableOid};
use crate::concurrency::transaction::{
    IndexWriteRecord, IsolationLevel, TableWriteRecord, WriteType,
};
use crate::executor::{wrap_child_error, ExecutionContext, Executor};
use anyhow::{bail, Result};

/// Mark-delete every row the child produces, under exclusive row locks, and
/// remove the rows from every index. The deletes are applied for good at
/// commit and rolled back on abort. Produces no tuples.
pub struct DeleteExecutor {
    context: ExecutionContext,
    table_oid: TableOid,
    child: Box<dyn Executor>,
    output_schema: Schema,
    done: bool,
    initialized: bool,
}

impl DeleteExecutor {
    pub fn new(context: ExecutionContext, table_oid: TableOid, child: Box<dyn Executor>) -> Self {
        Self {
            context,
            table_oid,
            child,
            output_schema: Schema::new(Vec::new()),
            done: false,
            initialized: false,
        }
    }
}

impl Executor for DeleteExecutor {
    fn init(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }
        self.child.init().map_err(wrap_child_error)?;
        self.initialized = true;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>> {
        if !self.initialized {
            bail!("executor not initialized");
        }
        if self.done {
            return Ok(None);
        }
        self.done = true;

        let table_info = self.context.catalog.table_by_oid(self.table_oid)?;
        let txn = &self.context.txn;
        let lock_manager = &self.context.lock_manager;

        while let Some((tuple, rid)) = self.child.next().map_err(wrap_child_error)? {
            if txn.is_shared_locked(rid) {
                lock_manager.lock_upgrade(txn, rid)?;
            } else if !txn.is_exclusive_locked(rid) {
                lock_manager.lock_exclusive(txn, rid)?;
            }

            table_info.table.mark_delete(rid)?;
            txn.append_table_write(TableWriteRecord {
                rid,
                op: WriteType::Delete,
                table_oid: self.table_oid,
                old_tuple: None,
            });

            for index_info in self.context.catalog.table_indexes(&table_info.name) {
                let key = tuple.key_from_tuple(&index_info.key_attrs);
                index_info.index.delete_entry(&key, rid)?;
                txn.append_index_write(IndexWriteRecord {
                    rid,
                    op: WriteType::Delete,
                    index_oid: index_info.index_oid,
                    tuple: tuple.clone(),
                    old_tuple: None,
                });
            }

            if txn.isolation() == IsolationLevel::ReadCommitted {
                lock_manager.unlock(txn, rid)?;
            }
        }
        Ok(None)
    }

    fn output_schema(&self) -> &Schema {
        &self.output_schema
    }
}
