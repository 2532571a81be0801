use crate::access::tuple::{Rid, Tuple};
use crate::catalog::{Schema, TableOid};
use crate::concurrency::transaction::{
    IndexWriteRecord, IsolationLevel, TableWriteRecord, WriteType,
};
use crate::executor::{wrap_child_error, ExecutionContext, Executor};
use crate::expression::UpdateExpr;
use anyhow::{bail, Result};

/// Update every row the child produces, under exclusive row locks (upgrading
/// a shared lock held from the scan). Indexes whose key changes are kept in
/// sync. Produces no tuples.
pub struct UpdateExecutor {
    context: ExecutionContext,
    table_oid: TableOid,
    update_exprs: Vec<UpdateExpr>,
    child: Box<dyn Executor>,
    output_schema: Schema,
    done: bool,
    initialized: bool,
}

impl UpdateExecutor {
    pub fn new(
        context: ExecutionContext,
        table_oid: TableOid,
        update_exprs: Vec<UpdateExpr>,
        child: Box<dyn Executor>,
    ) -> Self {
        Self {
            context,
            table_oid,
            update_exprs,
            child,
            output_schema: Schema::new(Vec::new()),
            done: false,
            initialized: false,
        }
    }

    fn generate_updated_tuple(&self, old: &Tuple) -> Result<Tuple> {
        let mut tuple = old.clone();
        for expr in &self.update_exprs {
            tuple = expr.apply(&tuple)?;
        }
        Ok(tuple)
    }
}

impl Executor for UpdateExecutor {
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

        while let Some((old_tuple, rid)) = self.child.next().map_err(wrap_child_error)? {
            if txn.is_shared_locked(rid) {
                lock_manager.lock_upgrade(txn, rid)?;
            } else if !txn.is_exclusive_locked(rid) {
                lock_manager.lock_exclusive(txn, rid)?;
            }

            let new_tuple = self.generate_updated_tuple(&old_tuple)?;
            table_info.table.update_tuple(&new_tuple, rid)?;
            txn.append_table_write(TableWriteRecord {
                rid,
                op: WriteType::Update,
                table_oid: self.table_oid,
                old_tuple: Some(old_tuple.clone()),
            });

            for index_info in self.context.catalog.table_indexes(&table_info.name) {
                let old_key = old_tuple.key_from_tuple(&index_info.key_attrs);
                let new_key = new_tuple.key_from_tuple(&index_info.key_attrs);
                if old_key != new_key {
                    index_info.index.delete_entry(&old_key, rid)?;
                    index_info.index.insert_entry(&new_key, rid)?;
                    txn.append_index_write(IndexWriteRecord {
                        rid,
                        op: WriteType::Update,
                        index_oid: index_info.index_oid,
                        tuple: new_tuple.clone(),
                        old_tuple: Some(old_tuple.clone()),
                    });
                }
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::value::Value;
    use crate::executor::seq_scan::SeqScanExecutor;
    use crate::executor::test_util::{collect, seed_users, TestDb};
    use crate::expression::{CompareOp, Expression};

    #[test]
    fn test_update_rows() -> Result<()> {
        let db = TestDb::new()?;
        seed_users(&db)?;
        let ctx = db.context(IsolationLevel::RepeatableRead);
        let oid = db.catalog.table("users")?.oid;

        // Bump everyone's age by 1.
        let scan = SeqScanExecutor::new(ctx.clone(), oid, None);
        let mut update = UpdateExecutor::new(
            ctx.clone(),
            oid,
            vec![UpdateExpr::add(2, Value::Int32(1))],
            Box::new(scan),
        );
        update.init()?;
        update.next()?;

        // Every row is exclusively locked now.
        assert_eq!(ctx.txn.exclusive_lock_count(), 3);

        let mut verify = SeqScanExecutor::new(ctx, oid, None);
        let rows = collect(&mut verify)?;
        let ages: Vec<_> = rows.iter().map(|(t, _)| t.value(2).clone()).collect();
        assert_eq!(
            ages,
            vec![Value::Int32(31), Value::Int32(26), Value::Int32(42)]
        );
        Ok(())
    }

    #[test]
    fn test_update_key_column_rewrites_index() -> Result<()> {
        let db = TestDb::new()?;
        seed_users(&db)?;
        let ctx = db.context(IsolationLevel::RepeatableRead);
        let oid = db.catalog.table("users")?.oid;

        // Rename id 2 to id 20; only that row.
        let id_is_2 = Expression::compare(
            CompareOp::Eq,
            Expression::column(0),
            Expression::literal(Value::Int32(2)),
        );
        let scan = SeqScanExecutor::new(ctx.clone(), oid, Some(id_is_2));
        let mut update = UpdateExecutor::new(
            ctx.clone(),
            oid,
            vec![UpdateExpr::set(0, Value::Int32(20))],
            Box::new(scan),
        );
        update.init()?;
        update.next()?;

        let index = db.catalog.index("users", "users_by_id")?;
        let old_key = Tuple::new(vec![Value::Int32(2)]);
        let new_key = Tuple::new(vec![Value::Int32(20)]);
        assert!(index.index.scan_key(&old_key)?.is_empty());
        assert_eq!(index.index.scan_key(&new_key)?.len(), 1);
        Ok(())
    }
}
