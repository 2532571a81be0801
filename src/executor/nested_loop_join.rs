use crate::access::tuple::{Rid, Tuple};
use crate::catalog::Schema;
use crate::executor::{wrap_child_error, Executor};
use crate::expression::Expression;
use anyhow::{bail, Result};

/// Join both inputs by materializing them during `init` and emitting every
/// concatenated pair that satisfies the predicate. The predicate is
/// evaluated over the merged row (left columns first).
pub struct NestedLoopJoinExecutor {
    left: Box<dyn Executor>,
    right: Box<dyn Executor>,
    predicate: Option<Expression>,
    results: Vec<Tuple>,
    cursor: usize,
    output_schema: Schema,
    initialized: bool,
}

impl NestedLoopJoinExecutor {
    pub fn new(
        left: Box<dyn Executor>,
        right: Box<dyn Executor>,
        predicate: Option<Expression>,
    ) -> Self {
        Self {
            left,
            right,
            predicate,
            results: Vec::new(),
            cursor: 0,
            output_schema: Schema::new(Vec::new()),
            initialized: false,
        }
    }

    fn merge(left: &Tuple, right: &Tuple) -> Tuple {
        let mut values = left.values().to_vec();
        values.extend(right.values().iter().cloned());
        Tuple::new(values)
    }
}

impl Executor for NestedLoopJoinExecutor {
    fn init(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }
        self.left.init().map_err(wrap_child_error)?;
        self.right.init().map_err(wrap_child_error)?;
        self.output_schema = self.left.output_schema().join(self.right.output_schema());

        let mut left_rows = Vec::new();
        while let Some((tuple, _)) = self.left.next().map_err(wrap_child_error)? {
            left_rows.push(tuple);
        }
        let mut right_rows = Vec::new();
        while let Some((tuple, _)) = self.right.next().map_err(wrap_child_error)? {
            right_rows.push(tuple);
        }

        for left in &left_rows {
            for right in &right_rows {
                let merged = Self::merge(left, right);
                let matches = match &self.predicate {
                    Some(predicate) => predicate.evaluate(&merged)?.is_true(),
                    None => true,
                };
                if matches {
                    self.results.push(merged);
                }
            }
        }

        self.initialized = true;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>> {
        if !self.initialized {
            bail!("executor not initialized");
        }
        if self.cursor < self.results.len() {
            let tuple = self.results[self.cursor].clone();
            self.cursor += 1;
            return Ok(Some((tuple, Rid::invalid())));
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
    use crate::access::value::{DataType, Value};
    use crate::catalog::Column;
    use crate::concurrency::transaction::IsolationLevel;
    use crate::executor::seq_scan::SeqScanExecutor;
    use crate::executor::test_util::{collect, seed_users, TestDb};
    use crate::expression::CompareOp;

    #[test]
    fn test_join_on_equal_ids() -> Result<()> {
        let db = TestDb::new()?;
        seed_users(&db)?;

        // A second table keyed by the same ids.
        let orders_schema = Schema::new(vec![
            Column::new("user_id", DataType::Int32),
            Column::new("total", DataType::Int32),
        ]);
        let orders = db.catalog.create_table("orders", orders_schema)?;
        for (user_id, total) in [(1, 100), (1, 50), (3, 75)] {
            orders
                .table
                .insert_tuple(&Tuple::new(vec![Value::Int32(user_id), Value::Int32(total)]))?;
        }

        let ctx = db.context(IsolationLevel::ReadUncommitted);
        let users_oid = db.catalog.table("users")?.oid;
        let orders_oid = orders.oid;

        // users.id == orders.user_id; users has 3 columns, so the order's
        // user_id is merged column 3.
        let on = Expression::compare(
            CompareOp::Eq,
            Expression::column(0),
            Expression::column(3),
        );
        let left = SeqScanExecutor::new(ctx.clone(), users_oid, None);
        let right = SeqScanExecutor::new(ctx, orders_oid, None);
        let mut join =
            NestedLoopJoinExecutor::new(Box::new(left), Box::new(right), Some(on));
        let rows = collect(&mut join)?;
        assert_eq!(rows.len(), 3);
        assert_eq!(join.output_schema().len(), 5);

        // alice (id 1) matched two orders.
        let alice_rows = rows
            .iter()
            .filter(|(t, _)| t.value(0) == &Value::Int32(1))
            .count();
        assert_eq!(alice_rows, 2);
        Ok(())
    }

    #[test]
    fn test_cross_join_without_predicate() -> Result<()> {
        let db = TestDb::new()?;
        seed_users(&db)?;
        let ctx = db.context(IsolationLevel::ReadUncommitted);
        let oid = db.catalog.table("users")?.oid;

        let left = SeqScanExecutor::new(ctx.clone(), oid, None);
        let right = SeqScanExecutor::new(ctx, oid, None);
        let mut join = NestedLoopJoinExecutor::new(Box::new(left), Box::new(right), None);
        assert_eq!(collect(&mut join)?.len(), 9);
        Ok(())
    }
}
