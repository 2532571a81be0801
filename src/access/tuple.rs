use crate::access::value::{deserialize_values, serialize_values, Value};
use crate::catalog::Schema;
use crate::storage::page::PageId;
use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Record identifier: which page, which slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Rid {
    pub page_id: PageId,
    pub slot: u32,
}

impl Rid {
    pub fn new(page_id: PageId, slot: u32) -> Self {
        Self { page_id, slot }
    }

    /// Placeholder for tuples that do not live on a heap page, such as join
    /// or aggregation output.
    pub fn invalid() -> Self {
        Self {
            page_id: crate::storage::page::INVALID_PAGE_ID,
            slot: 0,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.page_id.is_valid()
    }
}

impl std::fmt::Display for Rid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Rid({}, {})", self.page_id.0, self.slot)
    }
}

/// A row of typed values.
#[derive(Debug, Clone, PartialEq)]
pub struct Tuple {
    values: Vec<Value>,
}

impl Tuple {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn value(&self, index: usize) -> &Value {
        &self.values[index]
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        serialize_values(&self.values)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        Ok(Self {
            values: deserialize_values(data)?,
        })
    }

    /// Project the key columns out of this tuple, in key-schema order.
    pub fn key_from_tuple(&self, key_attrs: &[usize]) -> Tuple {
        Tuple::new(key_attrs.iter().map(|&i| self.values[i].clone()).collect())
    }

    /// Sanity-check the tuple against a schema.
    pub fn conforms_to(&self, schema: &Schema) -> bool {
        self.values.len() == schema.len()
            && self
                .values
                .iter()
                .zip(schema.columns())
                .all(|(v, c)| v.is_compatible_with(c.data_type))
    }
}
