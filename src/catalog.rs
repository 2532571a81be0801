//! In-memory catalog: table and index registries for the executor layer.

use crate::access::btree::key::OrderedBytesComparator;
use crate::access::btree::{BPlusTreeIndex, Index};
use crate::access::heap::TableHeap;
use crate::access::value::DataType;
use crate::storage::buffer::BufferPoolManager;
use crate::storage::page::header_page::ensure_header_page;
use anyhow::{anyhow, bail, Result};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

pub type TableOid = u32;
pub type IndexOid = u32;

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub data_type: DataType,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    columns: Vec<Column>,
}

impl Schema {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, index: usize) -> &Column {
        &self.columns[index]
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Schema of the projection given by `attrs`.
    pub fn project(&self, attrs: &[usize]) -> Schema {
        Schema::new(attrs.iter().map(|&i| self.columns[i].clone()).collect())
    }

    /// Concatenation, as produced by a join.
    pub fn join(&self, other: &Schema) -> Schema {
        let mut columns = self.columns.clone();
        columns.extend(other.columns.iter().cloned());
        Schema::new(columns)
    }
}

/// Metadata about a table.
pub struct TableInfo {
    pub schema: Schema,
    pub name: String,
    pub table: TableHeap,
    pub oid: TableOid,
}

/// Metadata about an index.
pub struct IndexInfo {
    pub key_schema: Schema,
    pub name: String,
    pub index: Box<dyn Index>,
    pub index_oid: IndexOid,
    pub table_name: String,
    pub key_size: usize,
    /// Table-column positions making up the key, in key order.
    pub key_attrs: Vec<usize>,
}

/// Non-persistent registries mapping names and oids to table and index
/// metadata. Oids are monotonic; names are unique.
pub struct Catalog {
    buffer_pool: BufferPoolManager,
    tables: DashMap<TableOid, Arc<TableInfo>>,
    table_names: DashMap<String, TableOid>,
    indexes: DashMap<IndexOid, Arc<IndexInfo>>,
    index_names: DashMap<String, HashMap<String, IndexOid>>,
    next_table_oid: AtomicU32,
    next_index_oid: AtomicU32,
}

impl Catalog {
    /// The catalog claims the reserved header page before any table pages
    /// are allocated.
    pub fn new(buffer_pool: BufferPoolManager) -> Result<Self> {
        ensure_header_page(&buffer_pool)?;
        Ok(Self {
            buffer_pool,
            tables: DashMap::new(),
            table_names: DashMap::new(),
            indexes: DashMap::new(),
            index_names: DashMap::new(),
            next_table_oid: AtomicU32::new(0),
            next_index_oid: AtomicU32::new(0),
        })
    }

    pub fn create_table(&self, name: impl Into<String>, schema: Schema) -> Result<Arc<TableInfo>> {
        let name = name.into();
        if self.table_names.contains_key(&name) {
            bail!("table {} already exists", name);
        }
        let oid = self.next_table_oid.fetch_add(1, Ordering::SeqCst);
        let table = TableHeap::create(self.buffer_pool.clone())?;
        let info = Arc::new(TableInfo {
            schema,
            name: name.clone(),
            table,
            oid,
        });
        self.tables.insert(oid, Arc::clone(&info));
        self.table_names.insert(name, oid);
        Ok(info)
    }

    pub fn table(&self, name: &str) -> Result<Arc<TableInfo>> {
        let oid = *self
            .table_names
            .get(name)
            .ok_or_else(|| anyhow!("table {} does not exist", name))?;
        self.table_by_oid(oid)
    }

    pub fn table_by_oid(&self, oid: TableOid) -> Result<Arc<TableInfo>> {
        self.tables
            .get(&oid)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| anyhow!("table oid {} does not exist", oid))
    }

    /// Create an index over `key_attrs` of an existing table, backfilling the
    /// rows already stored. `key_size` selects the fixed key width and must
    /// be one of 4, 8, 16, 32 or 64.
    pub fn create_index(
        &self,
        index_name: impl Into<String>,
        table_name: &str,
        key_attrs: Vec<usize>,
        key_size: usize,
    ) -> Result<Arc<IndexInfo>> {
        let index_name = index_name.into();
        let table_info = self.table(table_name)?;
        if key_attrs.is_empty() || key_attrs.iter().any(|&i| i >= table_info.schema.len()) {
            bail!("invalid key attributes for {}", table_name);
        }
        if self
            .index_names
            .get(table_name)
            .map(|m| m.contains_key(&index_name))
            .unwrap_or(false)
        {
            bail!("index {} already exists on {}", index_name, table_name);
        }

        let pool = self.buffer_pool.clone();
        let index: Box<dyn Index> = match key_size {
            4 => Box::new(BPlusTreeIndex::<4, _>::new(
                index_name.clone(),
                pool,
                OrderedBytesComparator,
            )?),
            8 => Box::new(BPlusTreeIndex::<8, _>::new(
                index_name.clone(),
                pool,
                OrderedBytesComparator,
            )?),
            16 => Box::new(BPlusTreeIndex::<16, _>::new(
                index_name.clone(),
                pool,
                OrderedBytesComparator,
            )?),
            32 => Box::new(BPlusTreeIndex::<32, _>::new(
                index_name.clone(),
                pool,
                OrderedBytesComparator,
            )?),
            64 => Box::new(BPlusTreeIndex::<64, _>::new(
                index_name.clone(),
                pool,
                OrderedBytesComparator,
            )?),
            other => bail!("unsupported key size {}", other),
        };

        // Backfill from the rows the table already holds.
        for entry in table_info.table.iter() {
            let (rid, tuple) = entry?;
            index.insert_entry(&tuple.key_from_tuple(&key_attrs), rid)?;
        }

        let index_oid = self.next_index_oid.fetch_add(1, Ordering::SeqCst);
        let info = Arc::new(IndexInfo {
            key_schema: table_info.schema.project(&key_attrs),
            name: index_name.clone(),
            index,
            index_oid,
            table_name: table_name.to_string(),
            key_size,
            key_attrs,
        });
        self.indexes.insert(index_oid, Arc::clone(&info));
        self.index_names
            .entry(table_name.to_string())
            .or_default()
            .insert(index_name, index_oid);
        Ok(info)
    }

    pub fn index(&self, table_name: &str, index_name: &str) -> Result<Arc<IndexInfo>> {
        let oid = self
            .index_names
            .get(table_name)
            .and_then(|m| m.get(index_name).copied())
            .ok_or_else(|| anyhow!("index {} on {} does not exist", index_name, table_name))?;
        self.index_by_oid(oid)
    }

    pub fn index_by_oid(&self, oid: IndexOid) -> Result<Arc<IndexInfo>> {
        self.indexes
            .get(&oid)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| anyhow!("index oid {} does not exist", oid))
    }

    /// Every index declared on a table.
    pub fn table_indexes(&self, table_name: &str) -> Vec<Arc<IndexInfo>> {
        let Some(names) = self.index_names.get(table_name) else {
            return Vec::new();
        };
        names
            .values()
            .filter_map(|oid| self.indexes.get(oid).map(|e| Arc::clone(e.value())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::tuple::Tuple;
    use crate::access::value::Value;
    use crate::storage::buffer::lru::LruReplacer;
    use crate::storage::disk::DiskManager;
    use tempfile::TempDir;

    fn create_catalog() -> Result<(TempDir, Catalog)> {
        let dir = tempfile::tempdir()?;
        let disk = DiskManager::create(&dir.path().join("test.db"))?;
        let pool = BufferPoolManager::new(disk, Box::new(LruReplacer::new(64)), 64);
        let catalog = Catalog::new(pool)?;
        Ok((dir, catalog))
    }

    fn users_schema() -> Schema {
        Schema::new(vec![
            Column::new("id", DataType::Int32),
            Column::new("name", DataType::Varchar),
        ])
    }

    #[test]
    fn test_create_and_lookup_table() -> Result<()> {
        let (_dir, catalog) = create_catalog()?;

        let info = catalog.create_table("users", users_schema())?;
        assert_eq!(info.oid, 0);
        assert_eq!(catalog.table("users")?.oid, 0);
        assert_eq!(catalog.table_by_oid(0)?.name, "users");

        let orders = catalog.create_table("orders", users_schema())?;
        assert_eq!(orders.oid, 1);

        assert!(catalog.create_table("users", users_schema()).is_err());
        assert!(catalog.table("missing").is_err());
        Ok(())
    }

    #[test]
    fn test_create_index_backfills() -> Result<()> {
        let (_dir, catalog) = create_catalog()?;
        let info = catalog.create_table("users", users_schema())?;

        let mut rids = Vec::new();
        for i in [5i32, 1, 3] {
            let tuple = Tuple::new(vec![Value::Int32(i), Value::String(format!("u{}", i))]);
            rids.push(info.table.insert_tuple(&tuple)?);
        }

        let index = catalog.create_index("users_by_id", "users", vec![0], 8)?;
        assert_eq!(index.index_oid, 0);
        assert_eq!(index.key_schema.len(), 1);

        // Backfilled entries come out in key order.
        let ordered = index.index.rids_in_order()?;
        assert_eq!(ordered, vec![rids[1], rids[2], rids[0]]);

        let hits = index
            .index
            .scan_key(&Tuple::new(vec![Value::Int32(3)]))?;
        assert_eq!(hits, vec![rids[2]]);
        Ok(())
    }

    #[test]
    fn test_index_registry() -> Result<()> {
        let (_dir, catalog) = create_catalog()?;
        catalog.create_table("users", users_schema())?;

        catalog.create_index("by_id", "users", vec![0], 8)?;
        catalog.create_index("by_name", "users", vec![1], 32)?;

        assert_eq!(catalog.table_indexes("users").len(), 2);
        assert_eq!(catalog.index("users", "by_id")?.key_size, 8);
        assert!(catalog.index("users", "missing").is_err());
        assert!(catalog
            .create_index("by_id", "users", vec![0], 8)
            .is_err());
        assert!(catalog
            .create_index("bad", "users", vec![7], 8)
            .is_err());
        assert!(catalog
            .create_index("bad_size", "users", vec![0], 12)
            .is_err());
        Ok(())
    }
}
