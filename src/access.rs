//! Access layer: logical records over the page cache.
//!
//! - **TableHeap**: multi-page tuple storage with two-phase deletes
//! - **BPlusTree**: concurrent ordered index from fixed-width keys to RIDs
//! - **Tuple** / **Value**: typed rows and their serialization

pub mod btree;
pub mod heap;
pub mod tuple;
pub mod value;

pub use btree::{BPlusTree, BPlusTreeIndex, Index};
pub use heap::{TableHeap, TableIterator};
pub use tuple::{Rid, Tuple};
pub use value::{deserialize_values, serialize_values, DataType, Value};
