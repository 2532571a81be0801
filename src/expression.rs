//! Minimal expression trees for predicates, projections and updates.

use crate::access::tuple::Tuple;
use crate::access::value::Value;
use anyhow::{bail, Result};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

#[derive(Debug, Clone)]
pub enum Expression {
    /// Value of a column by position.
    Column(usize),
    Literal(Value),
    Compare(CompareOp, Box<Expression>, Box<Expression>),
    And(Box<Expression>, Box<Expression>),
    Or(Box<Expression>, Box<Expression>),
}

impl Expression {
    pub fn column(index: usize) -> Self {
        Expression::Column(index)
    }

    pub fn literal(value: Value) -> Self {
        Expression::Literal(value)
    }

    pub fn compare(op: CompareOp, left: Expression, right: Expression) -> Self {
        Expression::Compare(op, Box::new(left), Box::new(right))
    }

    pub fn and(left: Expression, right: Expression) -> Self {
        Expression::And(Box::new(left), Box::new(right))
    }

    pub fn or(left: Expression, right: Expression) -> Self {
        Expression::Or(Box::new(left), Box::new(right))
    }

    pub fn evaluate(&self, tuple: &Tuple) -> Result<Value> {
        match self {
            Expression::Column(index) => {
                if *index >= tuple.len() {
                    bail!("column {} out of range for a {}-wide tuple", index, tuple.len());
                }
                Ok(tuple.value(*index).clone())
            }
            Expression::Literal(value) => Ok(value.clone()),
            Expression::Compare(op, left, right) => {
                let left = left.evaluate(tuple)?;
                let right = right.evaluate(tuple)?;
                let Some(ordering) = left.partial_cmp(&right) else {
                    bail!("cannot compare {:?} with {:?}", left, right);
                };
                let result = match op {
                    CompareOp::Eq => ordering == Ordering::Equal,
                    CompareOp::NotEq => ordering != Ordering::Equal,
                    CompareOp::Lt => ordering == Ordering::Less,
                    CompareOp::LtEq => ordering != Ordering::Greater,
                    CompareOp::Gt => ordering == Ordering::Greater,
                    CompareOp::GtEq => ordering != Ordering::Less,
                };
                Ok(Value::Boolean(result))
            }
            Expression::And(left, right) => Ok(Value::Boolean(
                left.evaluate(tuple)?.is_true() && right.evaluate(tuple)?.is_true(),
            )),
            Expression::Or(left, right) => Ok(Value::Boolean(
                left.evaluate(tuple)?.is_true() || right.evaluate(tuple)?.is_true(),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOp {
    /// Overwrite the column.
    Set,
    /// Add to an integer column.
    Add,
}

/// One column mutation applied by the update executor.
#[derive(Debug, Clone)]
pub struct UpdateExpr {
    pub column: usize,
    pub op: UpdateOp,
    pub value: Value,
}

impl UpdateExpr {
    pub fn set(column: usize, value: Value) -> Self {
        Self {
            column,
            op: UpdateOp::Set,
            value,
        }
    }

    pub fn add(column: usize, value: Value) -> Self {
        Self {
            column,
            op: UpdateOp::Add,
            value,
        }
    }

    pub fn apply(&self, tuple: &Tuple) -> Result<Tuple> {
        if self.column >= tuple.len() {
            bail!("update column {} out of range", self.column);
        }
        let mut values = tuple.values().to_vec();
        values[self.column] = match self.op {
            UpdateOp::Set => self.value.clone(),
            UpdateOp::Add => match (&values[self.column], &self.value) {
                (Value::Int32(a), Value::Int32(b)) => Value::Int32(a + b),
                (Value::BigInt(a), Value::BigInt(b)) => Value::BigInt(a + b),
                (Value::BigInt(a), Value::Int32(b)) => Value::BigInt(a + *b as i64),
                (Value::Int32(a), Value::BigInt(b)) => Value::BigInt(*a as i64 + b),
                (a, b) => bail!("cannot add {:?} to {:?}", b, a),
            },
        };
        Ok(Tuple::new(values))
    }
}
