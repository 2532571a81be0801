use crate::access::btree::key::GenericKey;
use crate::access::tuple::Rid;
use crate::storage::buffer::{BufferPoolManager, ReadPageGuard};
use crate::storage::page::btree_leaf_page::BTreeLeafPage;
use crate::storage::page::BTREE_LEAF_PAGE_TYPE;
use anyhow::Result;

/// Walks the leaf chain in key order, holding one pinned, read-latched leaf
/// at a time. The current leaf is released before the next one is latched,
/// so an iterator never participates in a latch cycle with writers.
pub struct BTreeIterator<const N: usize> {
    buffer_pool: BufferPoolManager,
    leaf: Option<ReadPageGuard>,
    index: usize,
}

impl<const N: usize> BTreeIterator<N> {
    pub(super) fn new(
        buffer_pool: BufferPoolManager,
        leaf: Option<ReadPageGuard>,
        index: usize,
    ) -> Self {
        Self {
            buffer_pool,
            leaf,
            index,
        }
    }
}

impl<const N: usize> Iterator for BTreeIterator<N> {
    type Item = Result<(GenericKey<N>, Rid)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let guard = self.leaf.as_ref()?;
            let next_page = {
                let leaf = BTreeLeafPage::<_, N>::from_data(&**guard);
                if self.index < leaf.size() as usize {
                    let item = (leaf.key_at(self.index), leaf.rid_at(self.index));
                    self.index += 1;
                    return Some(Ok(item));
                }
                leaf.next_page_id()
            };

            // Release the current leaf before touching its successor.
            self.leaf = None;
            self.index = 0;
            if !next_page.is_valid() {
                return None;
            }
            match self.buffer_pool.fetch_page_read(next_page) {
                Ok(guard) => {
                    if guard[0] != BTREE_LEAF_PAGE_TYPE {
                        // The chain moved under us; the scan ends here.
                        return None;
                    }
                    self.leaf = Some(guard);
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
