use crate::storage::buffer::{BufferPoolManager, PageBuf};
use crate::storage::page::{PageId, HEADER_PAGE_ID};
use anyhow::{bail, Result};
use std::ops::{Deref, DerefMut};

const RECORD_COUNT_OFFSET: usize = 0;
const RECORDS_OFFSET: usize = 4;
const NAME_SIZE: usize = 32;
const RECORD_SIZE: usize = NAME_SIZE + 4;
const MAX_RECORDS: usize = (crate::storage::PAGE_SIZE - RECORDS_OFFSET) / RECORD_SIZE;

/// View of the reserved header page: a dense array of
/// `(index_name, root_page_id)` records.
///
/// Names are at most 31 bytes of UTF-8, zero padded.
pub struct HeaderPage<B> {
    data: B,
}

impl<B: Deref<Target = PageBuf>> HeaderPage<B> {
    pub fn from_data(data: B) -> Self {
        Self { data }
    }

    pub fn record_count(&self) -> usize {
        u32::from_le_bytes(self.data[RECORD_COUNT_OFFSET..RECORD_COUNT_OFFSET + 4].try_into().unwrap())
            as usize
    }

    fn name_at(&self, index: usize) -> &[u8] {
        let off = RECORDS_OFFSET + index * RECORD_SIZE;
        let raw = &self.data[off..off + NAME_SIZE];
        let end = raw.iter().position(|&b| b == 0).unwrap_or(NAME_SIZE);
        &raw[..end]
    }

    fn root_at(&self, index: usize) -> PageId {
        let off = RECORDS_OFFSET + index * RECORD_SIZE + NAME_SIZE;
        PageId(i32::from_le_bytes(self.data[off..off + 4].try_into().unwrap()))
    }

    fn find_record(&self, name: &str) -> Option<usize> {
        (0..self.record_count()).find(|&i| self.name_at(i) == name.as_bytes())
    }

    /// Look up the root page recorded for an index.
    pub fn get_root_page_id(&self, name: &str) -> Option<PageId> {
        self.find_record(name).map(|i| self.root_at(i))
    }
}

impl<B: DerefMut<Target = PageBuf>> HeaderPage<B> {
    fn set_record_count(&mut self, count: usize) {
        self.data[RECORD_COUNT_OFFSET..RECORD_COUNT_OFFSET + 4]
            .copy_from_slice(&(count as u32).to_le_bytes());
    }

    fn write_record(&mut self, index: usize, name: &str, root: PageId) {
        let off = RECORDS_OFFSET + index * RECORD_SIZE;
        self.data[off..off + NAME_SIZE].fill(0);
        self.data[off..off + name.len()].copy_from_slice(name.as_bytes());
        self.data[off + NAME_SIZE..off + NAME_SIZE + 4].copy_from_slice(&root.0.to_le_bytes());
    }

    /// Add a record for a new index. Fails on duplicate names.
    pub fn insert_record(&mut self, name: &str, root: PageId) -> Result<()> {
        if name.len() >= NAME_SIZE {
            bail!("index name too long: {}", name);
        }
        if self.find_record(name).is_some() {
            bail!("index {} already recorded", name);
        }
        let count = self.record_count();
        if count >= MAX_RECORDS {
            bail!("header page full");
        }
        self.write_record(count, name, root);
        self.set_record_count(count + 1);
        Ok(())
    }

    /// Update the root recorded for an existing index.
    pub fn update_record(&mut self, name: &str, root: PageId) -> Result<()> {
        match self.find_record(name) {
            Some(index) => {
                self.write_record(index, name, root);
                Ok(())
            }
            None => bail!("index {} not recorded", name),
        }
    }

    pub fn delete_record(&mut self, name: &str) -> Result<()> {
        let Some(index) = self.find_record(name) else {
            bail!("index {} not recorded", name);
        };
        let count = self.record_count();
        for i in index + 1..count {
            let name = String::from_utf8_lossy(self.name_at(i)).into_owned();
            let root = self.root_at(i);
            self.write_record(i - 1, &name, root);
        }
        self.set_record_count(count - 1);
        Ok(())
    }
}

/// Allocate the reserved header page if the store is untouched. Setup-time
/// only; concurrent first allocations are not supported.
pub fn ensure_header_page(pool: &BufferPoolManager) -> Result<()> {
    if pool.num_disk_pages() == 0 {
        let (page_id, _guard) = pool.new_page()?;
        if page_id != HEADER_PAGE_ID {
            bail!("header page must be the first allocation, got {}", page_id);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::PAGE_SIZE;

    fn empty_buf() -> Box<PageBuf> {
        Box::new([0u8; PAGE_SIZE])
    }

    #[test]
    fn test_insert_and_lookup() -> Result<()> {
        let mut buf = empty_buf();
        let mut page = HeaderPage::from_data(&mut *buf);

        page.insert_record("idx_users_id", PageId(7))?;
        page.insert_record("idx_orders_id", PageId(9))?;

        assert_eq!(page.record_count(), 2);
        assert_eq!(page.get_root_page_id("idx_users_id"), Some(PageId(7)));
        assert_eq!(page.get_root_page_id("idx_orders_id"), Some(PageId(9)));
        assert_eq!(page.get_root_page_id("missing"), None);

        Ok(())
    }

    #[test]
    fn test_update_record() -> Result<()> {
        let mut buf = empty_buf();
        let mut page = HeaderPage::from_data(&mut *buf);

        page.insert_record("idx", PageId(3))?;
        page.update_record("idx", PageId(11))?;
        assert_eq!(page.get_root_page_id("idx"), Some(PageId(11)));

        assert!(page.update_record("missing", PageId(1)).is_err());
        assert!(page.insert_record("idx", PageId(1)).is_err());

        Ok(())
    }

    #[test]
    fn test_delete_record_compacts() -> Result<()> {
        let mut buf = empty_buf();
        let mut page = HeaderPage::from_data(&mut *buf);

        page.insert_record("a", PageId(1))?;
        page.insert_record("b", PageId(2))?;
        page.insert_record("c", PageId(3))?;

        page.delete_record("b")?;
        assert_eq!(page.record_count(), 2);
        assert_eq!(page.get_root_page_id("a"), Some(PageId(1)));
        assert_eq!(page.get_root_page_id("b"), None);
        assert_eq!(page.get_root_page_id("c"), Some(PageId(3)));

        Ok(())
    }
}
