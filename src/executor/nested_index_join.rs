use crate::access::tuple::{Rid, Tuple};
use crate::catalog::{Schema, TableOid};
use crate::error::DbError;
use crate::executor::{wrap_child_error, ExecutionContext, Executor};
use crate::expression::Expression;
use anyhow::{bail, Result};
use std::collections::VecDeque;
use std::sync::Arc;

/// Index-assisted join: for each outer row, build a key from
/// `outer_key_attrs` and probe the inner table's index instead of scanning
/// it. Outer rows with no index match are dropped (inner join).
pub struct NestedIndexJoinExecutor {
    context: ExecutionContext,
    child: Box<dyn Executor>,
    inner_table_oid: TableOid,
    index_name: String,
    outer_key_attrs: Vec<usize>,
    predicate: Option<Expression>,
    inner_table: Option<Arc<crate::catalog::TableInfo>>,
    inner_index: Option<Arc<crate::catalog::IndexInfo>>,
    pending: VecDeque<Tuple>,
    output_schema: Schema,
    initialized: bool,
}

impl NestedIndexJoinExecutor {
    pub fn new(
        context: ExecutionContext,
        child: Box<dyn Executor>,
        inner_table_oid: TableOid,
        index_name: impl Into<String>,
        outer_key_attrs: Vec<usize>,
        predicate: Option<Expression>,
    ) -> Self {
        Self {
            context,
            child,
            inner_table_oid,
            index_name: index_name.into(),
            outer_key_attrs,
            predicate,
            inner_table: None,
            inner_index: None,
            pending: VecDeque::new(),
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

impl Executor for NestedIndexJoinExecutor {
    fn init(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }
        self.child.init().map_err(wrap_child_error)?;
        let inner_table = self.context.catalog.table_by_oid(self.inner_table_oid)?;
        let inner_index = self
            .context
            .catalog
            .index(&inner_table.name, &self.index_name)?;
        self.output_schema = self.child.output_schema().join(&inner_table.schema);
        self.inner_table = Some(inner_table);
        self.inner_index = Some(inner_index);
        self.initialized = true;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>> {
        if !self.initialized {
            bail!("executor not initialized");
        }
        loop {
            if let Some(tuple) = self.pending.pop_front() {
                return Ok(Some((tuple, Rid::invalid())));
            }
            let Some((outer, _)) = self.child.next().map_err(wrap_child_error)? else {
                return Ok(None);
            };

            let key = outer.key_from_tuple(&self.outer_key_attrs);
            let index = self.inner_index.as_ref().unwrap();
            let table = self.inner_table.as_ref().unwrap();
            for rid in index.index.scan_key(&key)? {
                let Some(inner) = table.table.get_tuple(rid)? else {
                    return Err(DbError::TupleError(format!(
                        "index entry {} has no backing tuple",
                        rid
                    ))
                    .into());
                };
                let merged = Self::merge(&outer, &inner);
                let matches = match &self.predicate {
                    Some(predicate) => predicate.evaluate(&merged)?.is_true(),
                    None => true,
                };
                if matches {
                    self.pending.push_back(merged);
                }
            }
        }
    }

    fn output_schema(&self) -> &Schema {
        &self.output_schema
    }
}
