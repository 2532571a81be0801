use crate::access::tuple::{Rid, Tuple};
use crate::catalog::{IndexOid, Schema};
use crate::error::DbError;
use crate::executor::{ExecutionContext, Executor};
use crate::expression::Expression;
use anyhow::{bail, Result};
use std::sync::Arc;
use std::vec::IntoIter;

/// Scan a table in index-key order, materializing matching tuples from the
/// heap.
pub struct IndexScanExecutor {
    context: ExecutionContext,
    index_oid: IndexOid,
    predicate: Option<Expression>,
    rids: Option<IntoIter<Rid>>,
    table: Option<Arc<crate::catalog::TableInfo>>,
    output_schema: Schema,
    initialized: bool,
}

impl IndexScanExecutor {
    pub fn new(
        context: ExecutionContext,
        index_oid: IndexOid,
        predicate: Option<Expression>,
    ) -> Self {
        Self {
            context,
            index_oid,
            predicate,
            rids: None,
            table: None,
            output_schema: Schema::new(Vec::new()),
            initialized: false,
        }
    }
}

impl Executor for IndexScanExecutor {
    fn init(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }
        let index_info = self.context.catalog.index_by_oid(self.index_oid)?;
        let table_info = self.context.catalog.table(&index_info.table_name)?;
        self.output_schema = table_info.schema.clone();
        self.rids = Some(index_info.index.rids_in_order()?.into_iter());
        self.table = Some(table_info);
        self.initialized = true;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>> {
        if !self.initialized {
            bail!("executor not initialized");
        }
        let rids = self.rids.as_mut().unwrap();
        let table = self.table.as_ref().unwrap();

        for rid in rids.by_ref() {
            let Some(tuple) = table.table.get_tuple(rid)? else {
                return Err(DbError::TupleError(format!(
                    "index entry {} has no backing tuple",
                    rid
                ))
                .into());
            };
            let matches = match &self.predicate {
                Some(predicate) => predicate.evaluate(&tuple)?.is_true(),
                None => true,
            };
            if matches {
                return Ok(Some((tuple, rid)));
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
    use crate::concurrency::transaction::IsolationLevel;
    use crate::executor::test_util::{collect, seed_users, TestDb};
    use crate::expression::CompareOp;

    #[test]
    fn test_scan_in_key_order() -> Result<()> {
        let db = TestDb::new()?;
        seed_users(&db)?;
        // Insert out of key order; the index scan sorts it out.
        let users = db.catalog.table("users")?;
        let index = db.catalog.index("users", "users_by_id")?;
        let extra = crate::executor::test_util::user(0, "zed", 19);
        let rid = users.table.insert_tuple(&extra)?;
        index.index.insert_entry(&extra.key_from_tuple(&[0]), rid)?;

        let ctx = db.context(IsolationLevel::ReadUncommitted);
        let mut scan = IndexScanExecutor::new(ctx, index.index_oid, None);
        let rows = collect(&mut scan)?;
        let ids: Vec<_> = rows
            .iter()
            .map(|(t, _)| match t.value(0) {
                Value::Int32(v) => *v,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(ids, vec![0, 1, 2, 3]);
        Ok(())
    }

    #[test]
    fn test_scan_with_predicate() -> Result<()> {
        let db = TestDb::new()?;
        seed_users(&db)?;
        let index = db.catalog.index("users", "users_by_id")?;

        let ctx = db.context(IsolationLevel::ReadUncommitted);
        let id_ge_2 = Expression::compare(
            CompareOp::GtEq,
            Expression::column(0),
            Expression::literal(Value::Int32(2)),
        );
        let mut scan = IndexScanExecutor::new(ctx, index.index_oid, Some(id_ge_2));
        let rows = collect(&mut scan)?;
        assert_eq!(rows.len(), 2);
        Ok(())
    }
}
