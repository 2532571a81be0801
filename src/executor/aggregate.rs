use crate::access::tuple::{Rid, Tuple};
use crate::access::value::Value;
use crate::catalog::Schema;
use crate::executor::{wrap_child_error, Executor};
use crate::expression::Expression;
use anyhow::{bail, Result};
use std::collections::HashMap;

/// Aggregate functions over a child column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationType {
    CountStar,
    /// Count of non-null values in a column.
    Count(usize),
    Sum(usize),
    Min(usize),
    Max(usize),
}

/// Running state for one group.
#[derive(Debug, Clone)]
struct AggregateValue {
    values: Vec<Value>,
}

/// Hash aggregation: the child is drained into a group table during `init`;
/// `next` emits one row per surviving group, group-by columns first, then
/// the aggregates, filtered by the optional HAVING predicate (evaluated over
/// the output row).
pub struct HashAggregateExecutor {
    child: Box<dyn Executor>,
    group_by: Vec<usize>,
    aggregates: Vec<AggregationType>,
    having: Option<Expression>,
    output_schema: Schema,
    groups: Vec<(Vec<Value>, AggregateValue)>,
    cursor: usize,
    initialized: bool,
}

impl HashAggregateExecutor {
    pub fn new(
        child: Box<dyn Executor>,
        group_by: Vec<usize>,
        aggregates: Vec<AggregationType>,
        having: Option<Expression>,
        output_schema: Schema,
    ) -> Self {
        Self {
            child,
            group_by,
            aggregates,
            having,
            output_schema,
            groups: Vec::new(),
            cursor: 0,
            initialized: false,
        }
    }

    fn initial_value(&self) -> AggregateValue {
        let values = self
            .aggregates
            .iter()
            .map(|agg| match agg {
                AggregationType::CountStar | AggregationType::Count(_) => Value::Int32(0),
                AggregationType::Sum(_) => Value::BigInt(0),
                AggregationType::Min(_) | AggregationType::Max(_) => Value::Null,
            })
            .collect();
        AggregateValue { values }
    }

    fn combine(&self, acc: &mut AggregateValue, tuple: &Tuple) -> Result<()> {
        for (slot, agg) in self.aggregates.iter().enumerate() {
            let current = &acc.values[slot];
            acc.values[slot] = match agg {
                AggregationType::CountStar => match current {
                    Value::Int32(n) => Value::Int32(n + 1),
                    _ => bail!("count accumulator corrupted"),
                },
                AggregationType::Count(col) => match (current, tuple.value(*col)) {
                    (Value::Int32(n), Value::Null) => Value::Int32(*n),
                    (Value::Int32(n), _) => Value::Int32(n + 1),
                    _ => bail!("count accumulator corrupted"),
                },
                AggregationType::Sum(col) => {
                    let add = match tuple.value(*col) {
                        Value::Int32(v) => *v as i64,
                        Value::BigInt(v) => *v,
                        Value::Null => 0,
                        other => bail!("cannot sum {:?}", other),
                    };
                    match current {
                        Value::BigInt(n) => Value::BigInt(n + add),
                        _ => bail!("sum accumulator corrupted"),
                    }
                }
                AggregationType::Min(col) => {
                    let candidate = tuple.value(*col);
                    match (current, candidate) {
                        (_, Value::Null) => current.clone(),
                        (Value::Null, v) => v.clone(),
                        (cur, v) if v.partial_cmp(cur) == Some(std::cmp::Ordering::Less) => {
                            v.clone()
                        }
                        (cur, _) => cur.clone(),
                    }
                }
                AggregationType::Max(col) => {
                    let candidate = tuple.value(*col);
                    match (current, candidate) {
                        (_, Value::Null) => current.clone(),
                        (Value::Null, v) => v.clone(),
                        (cur, v) if v.partial_cmp(cur) == Some(std::cmp::Ordering::Greater) => {
                            v.clone()
                        }
                        (cur, _) => cur.clone(),
                    }
                }
            };
        }
        Ok(())
    }
}

impl Executor for HashAggregateExecutor {
    fn init(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }
        self.child.init().map_err(wrap_child_error)?;

        let mut table: HashMap<Vec<Value>, AggregateValue> = HashMap::new();
        let mut order: Vec<Vec<Value>> = Vec::new();
        while let Some((tuple, _)) = self.child.next().map_err(wrap_child_error)? {
            let key: Vec<Value> = self
                .group_by
                .iter()
                .map(|&i| tuple.value(i).clone())
                .collect();
            let acc = table.entry(key.clone()).or_insert_with(|| {
                order.push(key);
                self.initial_value()
            });
            self.combine(acc, &tuple)?;
        }

        // Emit groups in first-seen order for deterministic output.
        for key in order {
            let value = table.remove(&key).unwrap();
            self.groups.push((key, value));
        }
        self.initialized = true;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>> {
        if !self.initialized {
            bail!("executor not initialized");
        }
        while self.cursor < self.groups.len() {
            let (key, value) = &self.groups[self.cursor];
            self.cursor += 1;

            let mut row = key.clone();
            row.extend(value.values.iter().cloned());
            let tuple = Tuple::new(row);

            let keep = match &self.having {
                Some(having) => having.evaluate(&tuple)?.is_true(),
                None => true,
            };
            if keep {
                return Ok(Some((tuple, Rid::invalid())));
            }
        }
        Ok(None)
    }

    fn output_schema(&self) -> &Schema {
        &self.output_schema
    }
}
