use crate::access::tuple::{Rid, Tuple};
use crate::error::DbError;
use crate::storage::buffer::{BufferPoolManager, PageBuf};
use crate::storage::page::{HeapPage, PageId, INVALID_PAGE_ID};
use anyhow::Result;

/// A table spanning a singly linked chain of slotted heap pages.
///
/// Deletes are two-phase: `mark_delete` hides the tuple, commit applies the
/// delete for good, abort rolls it back.
pub struct TableHeap {
    buffer_pool: BufferPoolManager,
    first_page_id: PageId,
}

impl TableHeap {
    /// Create a table with one fresh, empty page.
    pub fn create(buffer_pool: BufferPoolManager) -> Result<Self> {
        let (first_page_id, mut guard) = buffer_pool.new_page()?;
        HeapPage::init(&mut *guard);
        drop(guard);
        Ok(Self {
            buffer_pool,
            first_page_id,
        })
    }

    /// Open a table whose first page already exists.
    pub fn with_first_page(buffer_pool: BufferPoolManager, first_page_id: PageId) -> Self {
        Self {
            buffer_pool,
            first_page_id,
        }
    }

    pub fn first_page_id(&self) -> PageId {
        self.first_page_id
    }

    /// Insert into the first page with room, appending a new page at the tail
    /// when the chain is full.
    pub fn insert_tuple(&self, tuple: &Tuple) -> Result<Rid> {
        let data = tuple.to_bytes();
        let required = HeapPage::<&PageBuf>::required_space_for(data.len());
        if required > crate::storage::PAGE_SIZE / 2 {
            return Err(DbError::TupleError(format!(
                "tuple of {} bytes is too large for a heap page",
                data.len()
            ))
            .into());
        }

        let mut current = self.first_page_id;
        loop {
            let mut guard = self.buffer_pool.fetch_page_write(current)?;
            let mut page = HeapPage::from_data(&mut *guard);
            if page.free_space() >= required {
                let slot = page.insert_tuple(&data)?;
                return Ok(Rid::new(current, slot as u32));
            }
            let next = page.next_page_id();
            if next.is_valid() {
                current = next;
                continue;
            }

            // Tail is full: link a fresh page while still holding the tail
            // latch so concurrent inserters see the link.
            let (new_page_id, mut new_guard) = self.buffer_pool.new_page()?;
            let mut new_page = HeapPage::init(&mut *new_guard);
            let slot = new_page.insert_tuple(&data)?;
            page.set_next_page_id(new_page_id);
            return Ok(Rid::new(new_page_id, slot as u32));
        }
    }

    /// Fetch a live tuple; None for dead or deleted slots.
    pub fn get_tuple(&self, rid: Rid) -> Result<Option<Tuple>> {
        if !rid.page_id.is_valid() {
            return Ok(None);
        }
        let guard = self.buffer_pool.fetch_page_read(rid.page_id)?;
        let page = HeapPage::from_data(&*guard);
        match page.get_tuple(rid.slot as u16) {
            Some(data) => Ok(Some(Tuple::from_bytes(data)?)),
            None => Ok(None),
        }
    }

    /// In-place update; fails when the new tuple does not fit the slot.
    pub fn update_tuple(&self, tuple: &Tuple, rid: Rid) -> Result<()> {
        let data = tuple.to_bytes();
        let mut guard = self.buffer_pool.fetch_page_write(rid.page_id)?;
        let mut page = HeapPage::from_data(&mut *guard);
        if !page.update_tuple(rid.slot as u16, &data)? {
            return Err(DbError::TupleError(format!(
                "tuple at {} cannot grow in place",
                rid
            ))
            .into());
        }
        Ok(())
    }

    pub fn mark_delete(&self, rid: Rid) -> Result<()> {
        let mut guard = self.buffer_pool.fetch_page_write(rid.page_id)?;
        let mut page = HeapPage::from_data(&mut *guard);
        page.mark_delete(rid.slot as u16)
    }

    pub fn rollback_delete(&self, rid: Rid) -> Result<()> {
        let mut guard = self.buffer_pool.fetch_page_write(rid.page_id)?;
        let mut page = HeapPage::from_data(&mut *guard);
        page.rollback_delete(rid.slot as u16)
    }

    pub fn apply_delete(&self, rid: Rid) -> Result<()> {
        let mut guard = self.buffer_pool.fetch_page_write(rid.page_id)?;
        let mut page = HeapPage::from_data(&mut *guard);
        page.apply_delete(rid.slot as u16)
    }

    /// Scan the whole chain in insertion order, skipping deleted tuples.
    pub fn iter(&self) -> TableIterator {
        TableIterator {
            buffer_pool: self.buffer_pool.clone(),
            current_page: self.first_page_id,
            current_slot: 0,
        }
    }
}

pub struct TableIterator {
    buffer_pool: BufferPoolManager,
    current_page: PageId,
    current_slot: u32,
}

impl Iterator for TableIterator {
    type Item = Result<(Rid, Tuple)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if !self.current_page.is_valid() {
                return None;
            }
            let guard = match self.buffer_pool.fetch_page_read(self.current_page) {
                Ok(guard) => guard,
                Err(e) => {
                    self.current_page = INVALID_PAGE_ID;
                    return Some(Err(e));
                }
            };
            let page = HeapPage::from_data(&*guard);
            while self.current_slot < page.slot_count() as u32 {
                let slot = self.current_slot as u16;
                self.current_slot += 1;
                if let Some(data) = page.get_tuple(slot) {
                    let rid = Rid::new(self.current_page, slot as u32);
                    return Some(Tuple::from_bytes(data).map(|tuple| (rid, tuple)));
                }
            }
            self.current_page = page.next_page_id();
            self.current_slot = 0;
        }
    }
}
