use crate::storage::buffer::PageBuf;
use crate::storage::page::{PageId, INVALID_PAGE_ID};
use crate::storage::PAGE_SIZE;
use anyhow::{bail, Result};
use std::ops::{Deref, DerefMut};

const HEADER_SIZE: usize = 12;
const SLOT_SIZE: usize = 6;

const SLOT_COUNT_OFFSET: usize = 0;
const UPPER_OFFSET: usize = 2;
const NEXT_PAGE_OFFSET: usize = 4;

const FLAG_DELETED: u16 = 0x0001;

/// Slotted tuple page. Slots grow from the header down, tuple bytes from the
/// end of the page up. A deleted tuple keeps its bytes until the delete is
/// applied, so an aborting transaction can roll the delete back.
pub struct HeapPage<B> {
    data: B,
}

impl<B: Deref<Target = PageBuf>> HeapPage<B> {
    pub fn from_data(data: B) -> Self {
        Self { data }
    }

    pub fn slot_count(&self) -> u16 {
        u16::from_le_bytes(self.data[SLOT_COUNT_OFFSET..SLOT_COUNT_OFFSET + 2].try_into().unwrap())
    }

    fn upper(&self) -> u16 {
        u16::from_le_bytes(self.data[UPPER_OFFSET..UPPER_OFFSET + 2].try_into().unwrap())
    }

    pub fn next_page_id(&self) -> PageId {
        PageId(i32::from_le_bytes(
            self.data[NEXT_PAGE_OFFSET..NEXT_PAGE_OFFSET + 4].try_into().unwrap(),
        ))
    }

    fn slot(&self, slot_id: u16) -> (u16, u16, u16) {
        let off = HEADER_SIZE + slot_id as usize * SLOT_SIZE;
        let offset = u16::from_le_bytes(self.data[off..off + 2].try_into().unwrap());
        let len = u16::from_le_bytes(self.data[off + 2..off + 4].try_into().unwrap());
        let flags = u16::from_le_bytes(self.data[off + 4..off + 6].try_into().unwrap());
        (offset, len, flags)
    }

    pub fn free_space(&self) -> usize {
        self.upper() as usize - (HEADER_SIZE + self.slot_count() as usize * SLOT_SIZE)
    }

    pub fn required_space_for(tuple_len: usize) -> usize {
        tuple_len + SLOT_SIZE
    }

    pub fn is_deleted(&self, slot_id: u16) -> bool {
        if slot_id >= self.slot_count() {
            return false;
        }
        let (offset, _, flags) = self.slot(slot_id);
        offset == 0 || flags & FLAG_DELETED != 0
    }

    /// Live tuple bytes, or None for out-of-range, dead, or deleted slots.
    pub fn get_tuple(&self, slot_id: u16) -> Option<&[u8]> {
        if slot_id >= self.slot_count() {
            return None;
        }
        let (offset, len, flags) = self.slot(slot_id);
        if offset == 0 || flags & FLAG_DELETED != 0 {
            return None;
        }
        Some(&self.data[offset as usize..offset as usize + len as usize])
    }
}

impl<B: DerefMut<Target = PageBuf>> HeapPage<B> {
    /// Initialize a zeroed page as an empty heap page.
    pub fn init(data: B) -> Self {
        let mut page = Self { data };
        page.set_slot_count(0);
        page.set_upper(PAGE_SIZE as u16);
        page.set_next_page_id(INVALID_PAGE_ID);
        page
    }

    fn set_slot_count(&mut self, count: u16) {
        self.data[SLOT_COUNT_OFFSET..SLOT_COUNT_OFFSET + 2].copy_from_slice(&count.to_le_bytes());
    }

    fn set_upper(&mut self, upper: u16) {
        self.data[UPPER_OFFSET..UPPER_OFFSET + 2].copy_from_slice(&upper.to_le_bytes());
    }

    pub fn set_next_page_id(&mut self, page_id: PageId) {
        self.data[NEXT_PAGE_OFFSET..NEXT_PAGE_OFFSET + 4].copy_from_slice(&page_id.0.to_le_bytes());
    }

    fn write_slot(&mut self, slot_id: u16, offset: u16, len: u16, flags: u16) {
        let off = HEADER_SIZE + slot_id as usize * SLOT_SIZE;
        self.data[off..off + 2].copy_from_slice(&offset.to_le_bytes());
        self.data[off + 2..off + 4].copy_from_slice(&len.to_le_bytes());
        self.data[off + 4..off + 6].copy_from_slice(&flags.to_le_bytes());
    }

    /// Append a tuple; returns its slot id.
    pub fn insert_tuple(&mut self, tuple: &[u8]) -> Result<u16> {
        if tuple.is_empty() || tuple.len() > u16::MAX as usize {
            bail!("invalid tuple length {}", tuple.len());
        }
        if self.free_space() < Self::required_space_for(tuple.len()) {
            bail!(
                "heap page full: need {} bytes, {} available",
                Self::required_space_for(tuple.len()),
                self.free_space()
            );
        }

        let slot_id = self.slot_count();
        let new_upper = self.upper() - tuple.len() as u16;
        self.data[new_upper as usize..new_upper as usize + tuple.len()].copy_from_slice(tuple);
        self.write_slot(slot_id, new_upper, tuple.len() as u16, 0);
        self.set_upper(new_upper);
        self.set_slot_count(slot_id + 1);
        Ok(slot_id)
    }

    /// Flag a tuple deleted without discarding its bytes.
    pub fn mark_delete(&mut self, slot_id: u16) -> Result<()> {
        if slot_id >= self.slot_count() {
            bail!("slot {} out of range", slot_id);
        }
        let (offset, len, flags) = self.slot(slot_id);
        if offset == 0 || flags & FLAG_DELETED != 0 {
            bail!("slot {} is not live", slot_id);
        }
        self.write_slot(slot_id, offset, len, flags | FLAG_DELETED);
        Ok(())
    }

    /// Undo a mark_delete.
    pub fn rollback_delete(&mut self, slot_id: u16) -> Result<()> {
        if slot_id >= self.slot_count() {
            bail!("slot {} out of range", slot_id);
        }
        let (offset, len, flags) = self.slot(slot_id);
        if offset == 0 {
            bail!("slot {} is dead", slot_id);
        }
        self.write_slot(slot_id, offset, len, flags & !FLAG_DELETED);
        Ok(())
    }

    /// Discard a tuple for good. The slot becomes dead; its bytes are not
    /// compacted.
    pub fn apply_delete(&mut self, slot_id: u16) -> Result<()> {
        if slot_id >= self.slot_count() {
            bail!("slot {} out of range", slot_id);
        }
        let (offset, _, _) = self.slot(slot_id);
        if offset == 0 {
            bail!("slot {} is dead", slot_id);
        }
        self.write_slot(slot_id, 0, 0, 0);
        Ok(())
    }

    /// In-place update. The slot keeps its original footprint so a later
    /// rollback can always restore the old bytes; tuples are self-delimiting,
    /// so trailing bytes of the footprint are ignored by readers. Returns
    /// false when the new tuple does not fit.
    pub fn update_tuple(&mut self, slot_id: u16, tuple: &[u8]) -> Result<bool> {
        if slot_id >= self.slot_count() {
            bail!("slot {} out of range", slot_id);
        }
        let (offset, len, flags) = self.slot(slot_id);
        if offset == 0 || flags & FLAG_DELETED != 0 {
            bail!("slot {} is not live", slot_id);
        }
        if tuple.len() > len as usize {
            return Ok(false);
        }
        self.data[offset as usize..offset as usize + tuple.len()].copy_from_slice(tuple);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_buf() -> Box<PageBuf> {
        Box::new([0u8; PAGE_SIZE])
    }

    #[test]
    fn test_insert_and_get() -> Result<()> {
        let mut buf = empty_buf();
        let mut page = HeapPage::init(&mut *buf);

        let s0 = page.insert_tuple(b"hello")?;
        let s1 = page.insert_tuple(b"world!")?;
        assert_eq!(s0, 0);
        assert_eq!(s1, 1);

        assert_eq!(page.get_tuple(0), Some(&b"hello"[..]));
        assert_eq!(page.get_tuple(1), Some(&b"world!"[..]));
        assert_eq!(page.get_tuple(2), None);

        Ok(())
    }

    #[test]
    fn test_mark_rollback_apply_delete() -> Result<()> {
        let mut buf = empty_buf();
        let mut page = HeapPage::init(&mut *buf);

        page.insert_tuple(b"row")?;
        page.mark_delete(0)?;
        assert!(page.is_deleted(0));
        assert_eq!(page.get_tuple(0), None);

        page.rollback_delete(0)?;
        assert_eq!(page.get_tuple(0), Some(&b"row"[..]));

        page.mark_delete(0)?;
        page.apply_delete(0)?;
        assert_eq!(page.get_tuple(0), None);
        assert!(page.rollback_delete(0).is_err());

        Ok(())
    }

    #[test]
    fn test_update_in_place() -> Result<()> {
        let mut buf = empty_buf();
        let mut page = HeapPage::init(&mut *buf);

        page.insert_tuple(b"abcdef")?;
        assert!(page.update_tuple(0, b"xyz")?);
        // The slot keeps its footprint; the new bytes lead it.
        assert_eq!(&page.get_tuple(0).unwrap()[..3], b"xyz");

        // A longer tuple does not fit the old footprint.
        assert!(!page.update_tuple(0, b"0123456789")?);

        Ok(())
    }

    #[test]
    fn test_page_full() -> Result<()> {
        let mut buf = empty_buf();
        let mut page = HeapPage::init(&mut *buf);

        let big = vec![7u8; 1000];
        let mut inserted = 0;
        while page.free_space() >= HeapPage::<&mut PageBuf>::required_space_for(big.len()) {
            page.insert_tuple(&big)?;
            inserted += 1;
        }
        assert!(inserted >= 3);
        assert!(page.insert_tuple(&big).is_err());

        Ok(())
    }
}
