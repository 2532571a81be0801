use crate::storage::buffer::{BufferPoolManager, WritePageGuard};
use crate::storage::page::PageId;
use anyhow::Result;
use log::warn;
use parking_lot::MutexGuard;

/// Crabbing state for one pessimistic traversal: the write-latched path from
/// the root down, any sibling pages latched for coalescing, the root-mutex
/// guard, and the pages whose deletion is deferred until every latch is gone.
///
/// Guards release on drop, so an abort path that unwinds mid-traversal still
/// unlatches and unpins everything it held.
pub struct TraversalContext<'a> {
    pub(super) root_guard: Option<MutexGuard<'a, ()>>,
    pub(super) pages: Vec<WritePageGuard>,
    pub(super) siblings: Vec<WritePageGuard>,
    pub(super) deleted: Vec<PageId>,
}

impl<'a> TraversalContext<'a> {
    pub fn new() -> Self {
        Self {
            root_guard: None,
            pages: Vec::new(),
            siblings: Vec::new(),
            deleted: Vec::new(),
        }
    }

    pub fn set_root_guard(&mut self, guard: MutexGuard<'a, ()>) {
        self.root_guard = Some(guard);
    }

    pub fn push(&mut self, guard: WritePageGuard) {
        self.pages.push(guard);
    }

    pub fn add_sibling(&mut self, guard: WritePageGuard) {
        self.siblings.push(guard);
    }

    pub fn path_len(&self) -> usize {
        self.pages.len()
    }

    /// The current node is safe: everything above it can be unlatched and
    /// unpinned, and the root mutex released.
    pub fn release_ancestors(&mut self) {
        self.root_guard = None;
        let kept = self.pages.pop();
        self.pages.clear();
        if let Some(kept) = kept {
            self.pages.push(kept);
        }
    }

    /// Find a page this traversal already holds a write latch on.
    pub fn find_page_mut(&mut self, page_id: PageId) -> Option<&mut WritePageGuard> {
        self.pages
            .iter_mut()
            .chain(self.siblings.iter_mut())
            .find(|g| g.page_id() == page_id)
    }

    /// Defer deletion of a page until all latches are released.
    pub fn mark_deleted(&mut self, page_id: PageId) {
        self.deleted.push(page_id);
    }

    /// Release every latch and pin in order, then delete the deferred pages.
    pub fn finish(mut self, pool: &BufferPoolManager) -> Result<()> {
        self.siblings.clear();
        self.pages.clear();
        self.root_guard = None;
        for page_id in std::mem::take(&mut self.deleted) {
            if !pool.delete_page(page_id)? {
                warn!("deferred delete of {} found the page still pinned", page_id);
            }
        }
        Ok(())
    }
}

impl Default for TraversalContext<'_> {
    fn default() -> Self {
        Self::new()
    }
}
