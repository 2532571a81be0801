use crate::access::tuple::{Rid, Tuple};
use crate::access::value::Value;
use crate::catalog::{Schema, TableInfo, TableOid};
use crate::concurrency::transaction::{IndexWriteRecord, TableWriteRecord, WriteType};
use crate::error::DbError;
use crate::executor::{wrap_child_error, ExecutionContext, Executor};
use anyhow::{bail, Result};
use std::sync::Arc;

/// Rows to insert: either literal values or the output of a child plan.
pub enum InsertSource {
    Raw(Vec<Vec<Value>>),
    Child(Box<dyn Executor>),
}

/// Insert rows into a table, keeping every index in sync and logging write
/// records for rollback. Produces no tuples; all work happens on the first
/// `next` call.
pub struct InsertExecutor {
    context: ExecutionContext,
    table_oid: TableOid,
    source: Option<InsertSource>,
    table: Option<Arc<TableInfo>>,
    output_schema: Schema,
    done: bool,
    initialized: bool,
}

impl InsertExecutor {
    pub fn new(context: ExecutionContext, table_oid: TableOid, source: InsertSource) -> Self {
        Self {
            context,
            table_oid,
            source: Some(source),
            table: None,
            output_schema: Schema::new(Vec::new()),
            done: false,
            initialized: false,
        }
    }

    fn insert_row(&self, tuple: &Tuple) -> Result<Rid> {
        let table = self.table.as_ref().unwrap();
        if !tuple.conforms_to(&table.schema) {
            return Err(DbError::TupleError(format!(
                "row does not match the schema of {}",
                table.name
            ))
            .into());
        }
        let rid = table.table.insert_tuple(tuple)?;
        self.context.txn.append_table_write(TableWriteRecord {
            rid,
            op: WriteType::Insert,
            table_oid: self.table_oid,
            old_tuple: None,
        });

        for index_info in self.context.catalog.table_indexes(&table.name) {
            let key = tuple.key_from_tuple(&index_info.key_attrs);
            index_info.index.insert_entry(&key, rid)?;
            self.context.txn.append_index_write(IndexWriteRecord {
                rid,
                op: WriteType::Insert,
                index_oid: index_info.index_oid,
                tuple: tuple.clone(),
                old_tuple: None,
            });
        }
        Ok(rid)
    }
}

impl Executor for InsertExecutor {
    fn init(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }
        self.table = Some(self.context.catalog.table_by_oid(self.table_oid)?);
        if let Some(InsertSource::Child(child)) = self.source.as_mut() {
            child.init().map_err(wrap_child_error)?;
        }
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

        match self.source.take().unwrap() {
            InsertSource::Raw(rows) => {
                for values in rows {
                    self.insert_row(&Tuple::new(values))?;
                }
            }
            InsertSource::Child(mut child) => loop {
                match child.next().map_err(wrap_child_error)? {
                    Some((tuple, _)) => {
                        self.insert_row(&tuple)?;
                    }
                    None => break,
                }
            },
        }
        Ok(None)
    }

    fn output_schema(&self) -> &Schema {
        &self.output_schema
    }
}
