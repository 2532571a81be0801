pub mod iterator;
pub mod key;
pub mod latch;

use self::iterator::BTreeIterator;
use self::key::{encode_key_values, GenericKey, KeyComparator};
use self::latch::TraversalContext;
use crate::access::tuple::{Rid, Tuple};
use crate::storage::buffer::{BufferPoolManager, PageBuf, ReadPageGuard, WritePageGuard};
use crate::storage::page::btree_internal_page::{internal_page_capacity, BTreeInternalPage};
use crate::storage::page::btree_leaf_page::{leaf_page_capacity, BTreeLeafPage};
use crate::storage::page::header_page::{ensure_header_page, HeaderPage};
use crate::storage::page::{
    PageId, BTREE_INTERNAL_PAGE_TYPE, BTREE_LEAF_PAGE_TYPE, HEADER_PAGE_ID, INVALID_PAGE_ID,
};
use anyhow::{anyhow, bail, Result};
use log::debug;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicI32, Ordering};

/// Concurrent B+ tree index mapping fixed-width keys to RIDs.
///
/// Readers couple read latches down the tree. Writers first try an
/// optimistic descent (read latches on internal nodes, a write latch on the
/// target leaf) and restart pessimistically when the leaf could split or
/// underflow; the pessimistic descent takes the root mutex and write latches,
/// releasing ancestors as soon as a child is known safe.
pub struct BPlusTree<const N: usize, C: KeyComparator<N>> {
    index_name: String,
    buffer_pool: BufferPoolManager,
    comparator: C,
    leaf_max_size: u16,
    internal_max_size: u16,
    root_page_id: AtomicI32,
    /// Serializes changes to the root page id. Writers take it before
    /// descending; readers never do.
    root_latch: Mutex<()>,
}

impl<const N: usize, C: KeyComparator<N>> BPlusTree<N, C> {
    pub fn new(
        index_name: impl Into<String>,
        buffer_pool: BufferPoolManager,
        comparator: C,
        leaf_max_size: u16,
        internal_max_size: u16,
    ) -> Result<Self> {
        if leaf_max_size < 2 || leaf_max_size > leaf_page_capacity::<N>() {
            bail!("leaf max size {} out of range", leaf_max_size);
        }
        if internal_max_size < 3 || internal_max_size > internal_page_capacity::<N>() {
            bail!("internal max size {} out of range", internal_max_size);
        }
        let index_name = index_name.into();
        ensure_header_page(&buffer_pool)?;
        let root = {
            let guard = buffer_pool.fetch_page_read(HEADER_PAGE_ID)?;
            let header = HeaderPage::from_data(&*guard);
            header.get_root_page_id(&index_name).unwrap_or(INVALID_PAGE_ID)
        };
        Ok(Self {
            index_name,
            buffer_pool,
            comparator,
            leaf_max_size,
            internal_max_size,
            root_page_id: AtomicI32::new(root.0),
            root_latch: Mutex::new(()),
        })
    }

    /// Construct with page-capacity max sizes.
    pub fn with_default_sizes(
        index_name: impl Into<String>,
        buffer_pool: BufferPoolManager,
        comparator: C,
    ) -> Result<Self> {
        let leaf = leaf_page_capacity::<N>();
        let internal = internal_page_capacity::<N>();
        Self::new(index_name, buffer_pool, comparator, leaf, internal)
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    pub fn root_page_id(&self) -> PageId {
        PageId(self.root_page_id.load(Ordering::SeqCst))
    }

    pub fn is_empty(&self) -> bool {
        !self.root_page_id().is_valid()
    }

    /// Point lookup.
    pub fn get_value(&self, key: &GenericKey<N>) -> Result<Option<Rid>> {
        let Some(guard) = self.find_leaf_read(Some(key))? else {
            return Ok(None);
        };
        let leaf = BTreeLeafPage::<_, N>::from_data(&*guard);
        Ok(leaf.lookup(key, &self.comparator))
    }

    /// Insert a unique key. Returns false (without mutating the tree) when
    /// the key is already present.
    pub fn insert(&self, key: &GenericKey<N>, rid: Rid) -> Result<bool> {
        if self.is_empty() {
            let guard = self.root_latch.lock();
            if self.is_empty() {
                self.start_new_tree(key, rid)?;
                return Ok(true);
            }
            drop(guard);
        }
        if let Some(done) = self.insert_optimistic(key, rid)? {
            return Ok(done);
        }
        self.insert_pessimistic(key, rid)
    }

    /// Delete a key. Deleting an absent key is a silent no-op.
    pub fn remove(&self, key: &GenericKey<N>) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }
        if self.remove_optimistic(key)?.is_some() {
            return Ok(());
        }
        self.remove_pessimistic(key)
    }

    /// Iterate the whole tree in key order.
    pub fn iter(&self) -> Result<BTreeIterator<N>> {
        let leaf = self.find_leaf_read(None)?;
        Ok(BTreeIterator::new(self.buffer_pool.clone(), leaf, 0))
    }

    /// Iterate from the first key >= `key`.
    pub fn iter_from(&self, key: &GenericKey<N>) -> Result<BTreeIterator<N>> {
        let Some(guard) = self.find_leaf_read(Some(key))? else {
            return Ok(BTreeIterator::new(self.buffer_pool.clone(), None, 0));
        };
        let index = {
            let leaf = BTreeLeafPage::<_, N>::from_data(&*guard);
            leaf.key_index(key, &self.comparator)
        };
        Ok(BTreeIterator::new(self.buffer_pool.clone(), Some(guard), index))
    }

    /// Read-latched descent to the leaf for `key`, or the leftmost leaf when
    /// `key` is None. Returns None for an empty (or concurrently emptied)
    /// tree.
    fn find_leaf_read(&self, key: Option<&GenericKey<N>>) -> Result<Option<ReadPageGuard>> {
        let root = self.root_page_id();
        if !root.is_valid() {
            return Ok(None);
        }
        let mut guard = self.buffer_pool.fetch_page_read(root)?;
        loop {
            match guard[0] {
                BTREE_LEAF_PAGE_TYPE => return Ok(Some(guard)),
                BTREE_INTERNAL_PAGE_TYPE => {}
                // The root moved under us and this page was recycled.
                _ => return Ok(None),
            }
            let child = {
                let node = BTreeInternalPage::<_, N>::from_data(&*guard);
                match key {
                    Some(key) => node.lookup(key, &self.comparator),
                    None => node.value_at(0),
                }
            };
            guard = self.buffer_pool.fetch_page_read(child)?;
        }
    }

    /// Optimistic descent for a write: read latches down, a write latch on
    /// the target leaf. The root mutex is held only until the root page is
    /// latched, which pins the tree structure for the rest of the descent.
    /// Returns None when the caller must restart in pessimistic mode.
    fn find_leaf_optimistic(&self, key: &GenericKey<N>) -> Result<Option<WritePageGuard>> {
        let root_guard = self.root_latch.lock();
        let root = self.root_page_id();
        if !root.is_valid() {
            return Ok(None);
        }
        let mut guard = self.buffer_pool.fetch_page_read(root)?;
        if guard[0] == BTREE_LEAF_PAGE_TYPE {
            // Single-node tree: trade the read latch for a write latch. The
            // root cannot move while the root mutex is held.
            drop(guard);
            let wguard = self.buffer_pool.fetch_page_write(root)?;
            drop(root_guard);
            return Ok(Some(wguard));
        }
        // A read-latched internal root blocks any structural change below
        // it, so the root mutex can go early.
        drop(root_guard);
        loop {
            let child = {
                let node = BTreeInternalPage::<_, N>::from_data(&*guard);
                node.lookup(key, &self.comparator)
            };
            let child_guard = self.buffer_pool.fetch_page_read(child)?;
            if child_guard[0] == BTREE_LEAF_PAGE_TYPE {
                // The parent read latch pins the leaf's identity while we
                // trade the child's read latch for a write latch.
                drop(child_guard);
                let wguard = self.buffer_pool.fetch_page_write(child)?;
                drop(guard);
                return Ok(Some(wguard));
            }
            guard = child_guard;
        }
    }

    fn insert_optimistic(&self, key: &GenericKey<N>, rid: Rid) -> Result<Option<bool>> {
        let Some(mut guard) = self.find_leaf_optimistic(key)? else {
            return Ok(None);
        };
        let mut leaf = BTreeLeafPage::<_, N>::from_data(&mut *guard);
        if leaf.lookup(key, &self.comparator).is_some() {
            return Ok(Some(false));
        }
        if leaf.size() + 1 < leaf.max_size() {
            leaf.insert(key, rid, &self.comparator);
            return Ok(Some(true));
        }
        // The leaf would split; restart with full latching.
        Ok(None)
    }

    fn remove_optimistic(&self, key: &GenericKey<N>) -> Result<Option<()>> {
        let Some(mut guard) = self.find_leaf_optimistic(key)? else {
            return Ok(None);
        };
        let mut leaf = BTreeLeafPage::<_, N>::from_data(&mut *guard);
        if leaf.lookup(key, &self.comparator).is_none() {
            return Ok(Some(()));
        }
        if leaf.size() > leaf.min_size() {
            leaf.remove_and_delete_record(key, &self.comparator);
            return Ok(Some(()));
        }
        // The leaf would underflow; restart with full latching.
        Ok(None)
    }

    /// Allocate the first leaf and make it the root. The caller holds the
    /// root latch.
    fn start_new_tree(&self, key: &GenericKey<N>, rid: Rid) -> Result<()> {
        let (page_id, mut guard) = self.buffer_pool.new_page()?;
        let mut leaf =
            BTreeLeafPage::<_, N>::init(&mut *guard, page_id, INVALID_PAGE_ID, self.leaf_max_size);
        leaf.insert(key, rid, &self.comparator);
        drop(guard);
        self.root_page_id.store(page_id.0, Ordering::SeqCst);
        self.update_root_record()?;
        debug!("{}: started new tree at {}", self.index_name, page_id);
        Ok(())
    }

    /// Is a write-latched node safe for the pending operation, i.e. unable to
    /// cascade a split or merge into its parent?
    fn node_safe(guard: &WritePageGuard, for_insert: bool) -> bool {
        if guard[0] == BTREE_LEAF_PAGE_TYPE {
            let leaf = BTreeLeafPage::<_, N>::from_data(&**guard);
            if for_insert {
                leaf.size() + 1 < leaf.max_size()
            } else {
                leaf.size() > leaf.min_size()
            }
        } else {
            let node = BTreeInternalPage::<_, N>::from_data(&**guard);
            if for_insert {
                node.size() + 1 < node.max_size()
            } else {
                node.size() > node.min_size()
            }
        }
    }

    /// Pessimistic descent: write latch every node from `root` to the leaf,
    /// releasing the root latch and all ancestors whenever a non-root child
    /// turns out safe.
    fn latch_path<'a>(
        &'a self,
        ctx: &mut TraversalContext<'a>,
        root: PageId,
        key: &GenericKey<N>,
        for_insert: bool,
    ) -> Result<()> {
        let mut pid = root;
        loop {
            let guard = self.buffer_pool.fetch_page_write(pid)?;
            let is_leaf = guard[0] == BTREE_LEAF_PAGE_TYPE;
            let safe = Self::node_safe(&guard, for_insert);
            let is_root_node = ctx.path_len() == 0;
            ctx.push(guard);
            if safe && !is_root_node {
                ctx.release_ancestors();
            }
            if is_leaf {
                return Ok(());
            }
            pid = {
                let guard = ctx.pages.last().unwrap();
                let node = BTreeInternalPage::<_, N>::from_data(&**guard);
                node.lookup(key, &self.comparator)
            };
        }
    }

    fn insert_pessimistic(&self, key: &GenericKey<N>, rid: Rid) -> Result<bool> {
        let mut ctx = TraversalContext::new();
        ctx.set_root_guard(self.root_latch.lock());
        let root = self.root_page_id();
        if !root.is_valid() {
            // The tree emptied while we were unlatched.
            self.start_new_tree(key, rid)?;
            return ctx.finish(&self.buffer_pool).map(|_| true);
        }
        self.latch_path(&mut ctx, root, key, true)?;

        let duplicate = {
            let guard = ctx.pages.last().unwrap();
            let leaf = BTreeLeafPage::<_, N>::from_data(&**guard);
            leaf.lookup(key, &self.comparator).is_some()
        };
        if duplicate {
            ctx.finish(&self.buffer_pool)?;
            return Ok(false);
        }

        let new_size = {
            let guard = ctx.pages.last_mut().unwrap();
            let mut leaf = BTreeLeafPage::<_, N>::from_data(&mut **guard);
            leaf.insert(key, rid, &self.comparator)
        };
        if new_size >= self.leaf_max_size {
            self.split_leaf(&mut ctx)?;
        }
        ctx.finish(&self.buffer_pool)?;
        Ok(true)
    }

    fn remove_pessimistic(&self, key: &GenericKey<N>) -> Result<()> {
        let mut ctx = TraversalContext::new();
        ctx.set_root_guard(self.root_latch.lock());
        let root = self.root_page_id();
        if !root.is_valid() {
            return ctx.finish(&self.buffer_pool);
        }
        self.latch_path(&mut ctx, root, key, false)?;

        let path_idx = ctx.path_len() - 1;
        let (new_size, min_size) = {
            let guard = ctx.pages.last_mut().unwrap();
            let mut leaf = BTreeLeafPage::<_, N>::from_data(&mut **guard);
            (
                leaf.remove_and_delete_record(key, &self.comparator),
                leaf.min_size(),
            )
        };
        if new_size < min_size {
            self.coalesce_or_redistribute(&mut ctx, path_idx)?;
        }
        ctx.finish(&self.buffer_pool)
    }

    /// Split the leaf at the end of the path and push the separator up.
    fn split_leaf(&self, ctx: &mut TraversalContext) -> Result<()> {
        let path_idx = ctx.path_len() - 1;
        let (new_pid, mut new_guard) = self.buffer_pool.new_page()?;
        let separator = {
            let guard = ctx.pages.last_mut().unwrap();
            let mut leaf = BTreeLeafPage::<_, N>::from_data(&mut **guard);
            let mut new_leaf = BTreeLeafPage::<_, N>::init(
                &mut *new_guard,
                new_pid,
                leaf.parent_page_id(),
                self.leaf_max_size,
            );
            leaf.move_half_to(&mut new_leaf);
            new_leaf.key_at(0)
        };
        debug!("{}: split leaf into {}", self.index_name, new_pid);
        self.insert_into_parent(ctx, path_idx, separator, new_pid, new_guard)
    }

    /// Install `(key, new_pid)` in the parent of the node at `path_idx`,
    /// splitting upward as needed. `new_guard` is the freshly created right
    /// sibling, still latched.
    fn insert_into_parent(
        &self,
        ctx: &mut TraversalContext,
        path_idx: usize,
        key: GenericKey<N>,
        new_pid: PageId,
        mut new_guard: WritePageGuard,
    ) -> Result<()> {
        if path_idx == 0 {
            // The split node was the root: grow the tree by one level.
            let (root_pid, mut root_guard) = self.buffer_pool.new_page()?;
            let old_pid = ctx.pages[0].page_id();
            {
                let mut root = BTreeInternalPage::<_, N>::init(
                    &mut *root_guard,
                    root_pid,
                    INVALID_PAGE_ID,
                    self.internal_max_size,
                );
                root.populate_new_root(old_pid, &key, new_pid);
            }
            Self::set_parent(&mut ctx.pages[0], root_pid);
            Self::set_parent(&mut new_guard, root_pid);
            drop(new_guard);
            drop(root_guard);
            self.root_page_id.store(root_pid.0, Ordering::SeqCst);
            self.update_root_record()?;
            debug!("{}: new root {}", self.index_name, root_pid);
            return Ok(());
        }

        let parent_idx = path_idx - 1;
        let parent_pid = ctx.pages[parent_idx].page_id();
        let old_pid = ctx.pages[path_idx].page_id();
        Self::set_parent(&mut new_guard, parent_pid);
        drop(new_guard);

        let new_size = {
            let guard = &mut ctx.pages[parent_idx];
            let mut parent = BTreeInternalPage::<_, N>::from_data(&mut **guard);
            parent.insert_node_after(old_pid, &key, new_pid)
        };
        if new_size >= self.internal_max_size {
            let (split_pid, mut split_guard) = self.buffer_pool.new_page()?;
            let (separator, moved) = {
                let guard = &mut ctx.pages[parent_idx];
                let mut parent = BTreeInternalPage::<_, N>::from_data(&mut **guard);
                let mut split = BTreeInternalPage::<_, N>::init(
                    &mut *split_guard,
                    split_pid,
                    parent.parent_page_id(),
                    self.internal_max_size,
                );
                let moved = parent.move_half_to(&mut split);
                (split.key_at(0), moved)
            };
            self.reparent(ctx, &moved, split_pid)?;
            self.insert_into_parent(ctx, parent_idx, separator, split_pid, split_guard)?;
        }
        Ok(())
    }

    /// Fix the node at `path_idx`, which underflowed: merge with a sibling or
    /// borrow one entry, recursing into the parent when the merge empties it
    /// below its minimum.
    fn coalesce_or_redistribute(&self, ctx: &mut TraversalContext, path_idx: usize) -> Result<()> {
        if path_idx == 0 {
            return self.adjust_root(ctx);
        }
        let parent_idx = path_idx - 1;
        let node_pid = ctx.pages[path_idx].page_id();
        let is_leaf = ctx.pages[path_idx][0] == BTREE_LEAF_PAGE_TYPE;

        let (child_idx, sibling_pid) = {
            let guard = &ctx.pages[parent_idx];
            let parent = BTreeInternalPage::<_, N>::from_data(&**guard);
            let child_idx = parent
                .value_index(node_pid)
                .ok_or_else(|| anyhow!("node {} missing from its parent", node_pid))?;
            let sibling_idx = if child_idx == 0 { 1 } else { child_idx - 1 };
            (child_idx, parent.value_at(sibling_idx))
        };

        let sibling_guard = self.buffer_pool.fetch_page_write(sibling_pid)?;
        ctx.add_sibling(sibling_guard);

        let (node_size, sibling_size, max_size) = {
            let node_guard = &ctx.pages[path_idx];
            let sib_guard = ctx.siblings.last().unwrap();
            if is_leaf {
                let node = BTreeLeafPage::<_, N>::from_data(&**node_guard);
                let sib = BTreeLeafPage::<_, N>::from_data(&**sib_guard);
                (node.size(), sib.size(), node.max_size())
            } else {
                let node = BTreeInternalPage::<_, N>::from_data(&**node_guard);
                let sib = BTreeInternalPage::<_, N>::from_data(&**sib_guard);
                (node.size(), sib.size(), node.max_size())
            }
        };

        // The separator between the pair sits at the right member's index.
        let separator_idx = if child_idx == 0 { 1 } else { child_idx };
        let middle_key = {
            let guard = &ctx.pages[parent_idx];
            let parent = BTreeInternalPage::<_, N>::from_data(&**guard);
            parent.key_at(separator_idx)
        };

        if node_size + sibling_size < max_size {
            // Merge the right member of the pair into the left.
            let (right_pid, moved, recipient_pid) = {
                let node_guard = &mut ctx.pages[path_idx];
                let sib_guard = ctx.siblings.last_mut().unwrap();
                if child_idx == 0 {
                    // Node is the first child: the sibling on its right
                    // drains into it.
                    let moved = Self::merge_into(sib_guard, node_guard, is_leaf, &middle_key);
                    (sibling_pid, moved, node_pid)
                } else {
                    let moved = Self::merge_into(node_guard, sib_guard, is_leaf, &middle_key);
                    (node_pid, moved, sibling_pid)
                }
            };
            self.reparent(ctx, &moved, recipient_pid)?;
            ctx.mark_deleted(right_pid);
            debug!("{}: merged {} into {}", self.index_name, right_pid, recipient_pid);

            let (parent_size, parent_min) = {
                let guard = &mut ctx.pages[parent_idx];
                let mut parent = BTreeInternalPage::<_, N>::from_data(&mut **guard);
                parent.remove(separator_idx);
                (parent.size(), parent.min_size())
            };
            if parent_size < parent_min {
                self.coalesce_or_redistribute(ctx, parent_idx)?;
            }
            return Ok(());
        }

        // Redistribute one entry from the sibling and refresh the separator.
        let (moved_child, new_separator) = {
            let node_guard = &mut ctx.pages[path_idx];
            let sib_guard = ctx.siblings.last_mut().unwrap();
            if is_leaf {
                let mut node = BTreeLeafPage::<_, N>::from_data(&mut **node_guard);
                let mut sib = BTreeLeafPage::<_, N>::from_data(&mut **sib_guard);
                if child_idx == 0 {
                    sib.move_first_to_end_of(&mut node);
                    (None, sib.key_at(0))
                } else {
                    sib.move_last_to_front_of(&mut node);
                    (None, node.key_at(0))
                }
            } else {
                let mut node = BTreeInternalPage::<_, N>::from_data(&mut **node_guard);
                let mut sib = BTreeInternalPage::<_, N>::from_data(&mut **sib_guard);
                if child_idx == 0 {
                    let child = sib.move_first_to_end_of(&mut node, &middle_key);
                    (Some(child), sib.key_at(0))
                } else {
                    let child = sib.move_last_to_front_of(&mut node, &middle_key);
                    (Some(child), node.key_at(0))
                }
            }
        };
        if let Some(child) = moved_child {
            self.reparent(ctx, &[child], node_pid)?;
        }
        {
            let guard = &mut ctx.pages[parent_idx];
            let mut parent = BTreeInternalPage::<_, N>::from_data(&mut **guard);
            parent.set_key_at(separator_idx, &new_separator);
        }
        Ok(())
    }

    /// Merge `right` into `left`; returns the children that changed parents.
    fn merge_into(
        right: &mut WritePageGuard,
        left: &mut WritePageGuard,
        is_leaf: bool,
        middle_key: &GenericKey<N>,
    ) -> Vec<PageId> {
        if is_leaf {
            let mut right = BTreeLeafPage::<_, N>::from_data(&mut **right);
            let mut left = BTreeLeafPage::<_, N>::from_data(&mut **left);
            right.move_all_to(&mut left);
            Vec::new()
        } else {
            let mut right = BTreeInternalPage::<_, N>::from_data(&mut **right);
            let mut left = BTreeInternalPage::<_, N>::from_data(&mut **left);
            right.move_all_to(&mut left, middle_key)
        }
    }

    /// The root underflowed: an empty root leaf ends the tree; a root
    /// internal node with one child hands the root to that child.
    fn adjust_root(&self, ctx: &mut TraversalContext) -> Result<()> {
        let root_pid = ctx.pages[0].page_id();
        if ctx.pages[0][0] == BTREE_LEAF_PAGE_TYPE {
            let size = {
                let leaf = BTreeLeafPage::<_, N>::from_data(&*ctx.pages[0]);
                leaf.size()
            };
            if size == 0 {
                ctx.mark_deleted(root_pid);
                self.root_page_id.store(INVALID_PAGE_ID.0, Ordering::SeqCst);
                self.update_root_record()?;
                debug!("{}: tree emptied", self.index_name);
            }
            return Ok(());
        }

        let (size, only_child) = {
            let node = BTreeInternalPage::<_, N>::from_data(&*ctx.pages[0]);
            let size = node.size();
            let child = if size == 1 { Some(node.value_at(0)) } else { None };
            (size, child)
        };
        debug_assert!(size >= 1);
        if let Some(child_pid) = only_child {
            self.reparent(ctx, &[child_pid], INVALID_PAGE_ID)?;
            self.root_page_id.store(child_pid.0, Ordering::SeqCst);
            self.update_root_record()?;
            ctx.mark_deleted(root_pid);
            debug!("{}: root collapsed into {}", self.index_name, child_pid);
        }
        Ok(())
    }

    /// Point `children` at a new parent, persisting through the buffer pool.
    /// Pages this traversal already latched are patched through their held
    /// guards; the rest are fetched.
    fn reparent(
        &self,
        ctx: &mut TraversalContext,
        children: &[PageId],
        new_parent: PageId,
    ) -> Result<()> {
        for &child in children {
            if let Some(guard) = ctx.find_page_mut(child) {
                Self::set_parent(guard, new_parent);
            } else {
                let mut guard = self.buffer_pool.fetch_page_write(child)?;
                Self::set_parent(&mut guard, new_parent);
            }
        }
        Ok(())
    }

    fn set_parent(guard: &mut WritePageGuard, parent: PageId) {
        let data: &mut PageBuf = &mut **guard;
        if data[0] == BTREE_LEAF_PAGE_TYPE {
            BTreeLeafPage::<_, N>::from_data(data).set_parent_page_id(parent);
        } else {
            BTreeInternalPage::<_, N>::from_data(data).set_parent_page_id(parent);
        }
    }

    /// Record the current root in the header page; called on every root
    /// change.
    fn update_root_record(&self) -> Result<()> {
        let mut guard = self.buffer_pool.fetch_page_write(HEADER_PAGE_ID)?;
        let mut header = HeaderPage::from_data(&mut *guard);
        let root = self.root_page_id();
        if header.get_root_page_id(&self.index_name).is_some() {
            header.update_record(&self.index_name, root)
        } else {
            header.insert_record(&self.index_name, root)
        }
    }
}

/// Tuple-level index facade the executors work against; implementations are
/// the per-key-width tree instantiations below.
pub trait Index: Send + Sync {
    fn name(&self) -> &str;

    /// Insert an entry. Returns false on a duplicate key.
    fn insert_entry(&self, key: &Tuple, rid: Rid) -> Result<bool>;

    /// Delete an entry; absent keys are a no-op.
    fn delete_entry(&self, key: &Tuple, rid: Rid) -> Result<()>;

    /// RIDs matching an exact key.
    fn scan_key(&self, key: &Tuple) -> Result<Vec<Rid>>;

    /// All RIDs in key order.
    fn rids_in_order(&self) -> Result<Vec<Rid>>;

    /// RIDs in key order starting at the first key >= `key`.
    fn rids_from(&self, key: &Tuple) -> Result<Vec<Rid>>;
}

/// B+ tree index over keys of width `N`.
pub struct BPlusTreeIndex<const N: usize, C: KeyComparator<N>> {
    tree: BPlusTree<N, C>,
}

impl<const N: usize, C: KeyComparator<N>> BPlusTreeIndex<N, C> {
    pub fn new(
        index_name: impl Into<String>,
        buffer_pool: BufferPoolManager,
        comparator: C,
    ) -> Result<Self> {
        Ok(Self {
            tree: BPlusTree::with_default_sizes(index_name, buffer_pool, comparator)?,
        })
    }

    pub fn tree(&self) -> &BPlusTree<N, C> {
        &self.tree
    }

    fn encode(&self, key: &Tuple) -> Result<GenericKey<N>> {
        encode_key_values::<N>(key.values())
    }
}

impl<const N: usize, C: KeyComparator<N>> Index for BPlusTreeIndex<N, C> {
    fn name(&self) -> &str {
        self.tree.index_name()
    }

    fn insert_entry(&self, key: &Tuple, rid: Rid) -> Result<bool> {
        self.tree.insert(&self.encode(key)?, rid)
    }

    fn delete_entry(&self, key: &Tuple, _rid: Rid) -> Result<()> {
        self.tree.remove(&self.encode(key)?)
    }

    fn scan_key(&self, key: &Tuple) -> Result<Vec<Rid>> {
        Ok(self.tree.get_value(&self.encode(key)?)?.into_iter().collect())
    }

    fn rids_in_order(&self) -> Result<Vec<Rid>> {
        self.tree
            .iter()?
            .map(|entry| entry.map(|(_, rid)| rid))
            .collect()
    }

    fn rids_from(&self, key: &Tuple) -> Result<Vec<Rid>> {
        self.tree
            .iter_from(&self.encode(key)?)?
            .map(|entry| entry.map(|(_, rid)| rid))
            .collect()
    }
}
