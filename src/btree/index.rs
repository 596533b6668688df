//! The on-disk B+tree index: locate, insert, delete, find/range, and
//! whole-tree validation (C12).
//!
//! Grounded on the teacher's `BTreeTable` split/merge pipeline
//! (`btree/table/table.rs`: `split_leaf_page`, `split_internal_page`,
//! `get_parent_with_empty_slots`) but adapted to this crate's page-level
//! primitives directly (no transaction/buffer-pool layer underneath yet)
//! and to BSON composite keys instead of single-int keys.

use bson::Bson;

use super::key::IndexKey;
use super::node::BTreeNode;
use crate::error::{TinyDbError, TinyResult};
use crate::storage::allocator::PageAllocator;
use crate::storage::database_header::DatabaseHeader;
use crate::storage::disk_file::DiskFile;
use crate::storage::page_cache::PageCache;
use crate::storage::page_id::{PageId, PageType, NO_PAGE};

pub const DEFAULT_MAX_KEYS: usize = 200;

#[derive(Debug, Clone)]
pub struct BTreeIndex {
    pub root_page: PageId,
    pub key_arity: usize,
    pub unique: bool,
    pub max_keys: usize,
}

impl BTreeIndex {
    pub fn min_keys(&self) -> usize {
        (self.max_keys + 1) / 2
    }

    pub fn create(
        header: &mut DatabaseHeader,
        cache: &mut PageCache,
        disk: &DiskFile,
        now: u64,
        key_arity: usize,
        unique: bool,
        max_keys: usize,
    ) -> TinyResult<Self> {
        if max_keys < 2 {
            return Err(TinyDbError::invalid_argument("max_keys must be at least 2"));
        }
        let root_id = PageAllocator::new_page(header, cache, disk, PageType::Index, now)?;
        BTreeNode::new_leaf().write(header, cache, disk, root_id, key_arity, now)?;
        Ok(Self {
            root_page: root_id,
            key_arity,
            unique,
            max_keys,
        })
    }

    pub fn open(root_page: PageId, key_arity: usize, unique: bool, max_keys: usize) -> Self {
        Self { root_page, key_arity, unique, max_keys }
    }

    pub fn entry_count(&self, cache: &mut PageCache) -> TinyResult<u32> {
        Ok(BTreeNode::read(cache, self.root_page, self.key_arity)?.tree_entry_count)
    }

    fn locate_leaf(&self, cache: &mut PageCache, key: &IndexKey) -> TinyResult<PageId> {
        let mut cur = self.root_page;
        loop {
            let node = BTreeNode::read(cache, cur, self.key_arity)?;
            if node.is_leaf {
                return Ok(cur);
            }
            let i = node.keys.iter().position(|k| k >= key).unwrap_or(node.keys.len());
            let child_idx = if i < node.keys.len() && node.keys[i] == *key { i + 1 } else { i };
            cur = node.child_ids[child_idx];
        }
    }

    fn leftmost_leaf(&self, cache: &mut PageCache) -> TinyResult<PageId> {
        let mut cur = self.root_page;
        loop {
            let node = BTreeNode::read(cache, cur, self.key_arity)?;
            if node.is_leaf {
                return Ok(cur);
            }
            cur = node.child_ids[0];
        }
    }

    fn set_parent(
        &self,
        header: &mut DatabaseHeader,
        cache: &mut PageCache,
        disk: &DiskFile,
        now: u64,
        page_id: PageId,
        new_parent: PageId,
    ) -> TinyResult<()> {
        let mut node = BTreeNode::read(cache, page_id, self.key_arity)?;
        node.parent_id = new_parent;
        node.write(header, cache, disk, page_id, self.key_arity, now)
    }

    fn bump_entry_count(
        &mut self,
        header: &mut DatabaseHeader,
        cache: &mut PageCache,
        disk: &DiskFile,
        now: u64,
        delta: i64,
    ) -> TinyResult<()> {
        let mut root = BTreeNode::read(cache, self.root_page, self.key_arity)?;
        root.tree_entry_count = (root.tree_entry_count as i64 + delta).max(0) as u32;
        root.write(header, cache, disk, self.root_page, self.key_arity, now)
    }

    /// Insert `(key, doc_id)`. For a unique index, an existing equal key
    /// with a different `doc_id` fails with `DuplicateKey`; the same
    /// `(key, doc_id)` pair is a no-op (§4.5 "Insert").
    pub fn insert(
        &mut self,
        header: &mut DatabaseHeader,
        cache: &mut PageCache,
        disk: &DiskFile,
        now: u64,
        key: IndexKey,
        doc_id: Bson,
    ) -> TinyResult<()> {
        let leaf_id = self.locate_leaf(cache, &key)?;
        let mut node = BTreeNode::read(cache, leaf_id, self.key_arity)?;
        let pos = node.keys.partition_point(|k| *k < key);

        if self.unique && pos < node.keys.len() && node.keys[pos] == key {
            if node.values[pos] == doc_id {
                return Ok(());
            }
            return Err(TinyDbError::duplicate_key(format!(
                "unique index violation for key {:?}",
                key.0
            )));
        }

        node.keys.insert(pos, key);
        node.values.insert(pos, doc_id);
        node.write(header, cache, disk, leaf_id, self.key_arity, now)?;

        if node.keys.len() > self.max_keys {
            self.split_leaf(header, cache, disk, now, leaf_id)?;
        }
        self.bump_entry_count(header, cache, disk, now, 1)
    }

    fn split_leaf(
        &mut self,
        header: &mut DatabaseHeader,
        cache: &mut PageCache,
        disk: &DiskFile,
        now: u64,
        page_id: PageId,
    ) -> TinyResult<()> {
        let mut node = BTreeNode::read(cache, page_id, self.key_arity)?;
        let mid = self.max_keys;
        let right_keys = node.keys.split_off(mid);
        let right_values = node.values.split_off(mid);

        let new_id = PageAllocator::new_page(header, cache, disk, PageType::Index, now)?;
        let mut new_node = BTreeNode::new_leaf();
        new_node.keys = right_keys;
        new_node.values = right_values;
        new_node.parent_id = node.parent_id;
        new_node.prev_sibling_id = page_id;
        new_node.next_sibling_id = node.next_sibling_id;
        let separator = new_node.keys[0].clone();

        let old_next = node.next_sibling_id;
        node.next_sibling_id = new_id;

        node.write(header, cache, disk, page_id, self.key_arity, now)?;
        new_node.write(header, cache, disk, new_id, self.key_arity, now)?;

        if old_next != NO_PAGE {
            let mut old_next_node = BTreeNode::read(cache, old_next, self.key_arity)?;
            old_next_node.prev_sibling_id = new_id;
            old_next_node.write(header, cache, disk, old_next, self.key_arity, now)?;
        }

        self.promote(header, cache, disk, now, node.parent_id, page_id, separator, new_id)
    }

    fn split_internal(
        &mut self,
        header: &mut DatabaseHeader,
        cache: &mut PageCache,
        disk: &DiskFile,
        now: u64,
        page_id: PageId,
    ) -> TinyResult<()> {
        let mut node = BTreeNode::read(cache, page_id, self.key_arity)?;
        let mid = node.keys.len() / 2;
        let separator = node.keys[mid].clone();
        let right_keys = node.keys.split_off(mid + 1);
        node.keys.pop(); // drop the separator itself from the left side
        let right_children = node.child_ids.split_off(mid + 1);

        let new_id = PageAllocator::new_page(header, cache, disk, PageType::Index, now)?;
        let mut new_node = BTreeNode::new_internal();
        new_node.keys = right_keys;
        new_node.child_ids = right_children;
        new_node.parent_id = node.parent_id;

        for &child in &new_node.child_ids {
            self.set_parent(header, cache, disk, now, child, new_id)?;
        }

        node.write(header, cache, disk, page_id, self.key_arity, now)?;
        new_node.write(header, cache, disk, new_id, self.key_arity, now)?;

        self.promote(header, cache, disk, now, node.parent_id, page_id, separator, new_id)
    }

    fn promote(
        &mut self,
        header: &mut DatabaseHeader,
        cache: &mut PageCache,
        disk: &DiskFile,
        now: u64,
        parent_id: PageId,
        left_child: PageId,
        separator: IndexKey,
        right_child: PageId,
    ) -> TinyResult<()> {
        if parent_id == NO_PAGE {
            let new_root_id = PageAllocator::new_page(header, cache, disk, PageType::Index, now)?;
            let mut root_node = BTreeNode::new_internal();
            root_node.keys = vec![separator];
            root_node.child_ids = vec![left_child, right_child];
            root_node.write(header, cache, disk, new_root_id, self.key_arity, now)?;

            self.set_parent(header, cache, disk, now, left_child, new_root_id)?;
            self.set_parent(header, cache, disk, now, right_child, new_root_id)?;
            self.root_page = new_root_id;
            return Ok(());
        }

        let mut parent = BTreeNode::read(cache, parent_id, self.key_arity)?;
        let pos = parent.keys.partition_point(|k| *k < separator);
        parent.keys.insert(pos, separator);
        parent.child_ids.insert(pos + 1, right_child);
        parent.write(header, cache, disk, parent_id, self.key_arity, now)?;

        if parent.keys.len() > self.max_keys {
            self.split_internal(header, cache, disk, now, parent_id)
        } else {
            Ok(())
        }
    }

    /// Remove one `(key, doc_id)` entry. Returns `false` if no matching
    /// entry was found. Duplicate-spanning keys are located by scanning
    /// forward then backward across sibling leaves (§4.5 "Delete").
    pub fn delete(
        &mut self,
        header: &mut DatabaseHeader,
        cache: &mut PageCache,
        disk: &DiskFile,
        now: u64,
        key: &IndexKey,
        doc_id: &Bson,
    ) -> TinyResult<bool> {
        let leaf_id = self.locate_leaf(cache, key)?;
        let node = BTreeNode::read(cache, leaf_id, self.key_arity)?;

        let mut target_leaf = leaf_id;
        let mut target_node = node.clone();
        let mut found_pos = Self::position_of(&target_node, key, doc_id);

        if found_pos.is_none() {
            let mut cur = node.next_sibling_id;
            while found_pos.is_none() && cur != NO_PAGE {
                let n = BTreeNode::read(cache, cur, self.key_arity)?;
                if n.keys.first() != Some(key) {
                    break;
                }
                found_pos = Self::position_of(&n, key, doc_id);
                let continue_scan = n.keys.last() == Some(key);
                let next = n.next_sibling_id;
                if found_pos.is_some() {
                    target_leaf = cur;
                    target_node = n;
                } else if continue_scan {
                    cur = next;
                } else {
                    break;
                }
            }
        }

        if found_pos.is_none() {
            let mut cur = node.prev_sibling_id;
            while found_pos.is_none() && cur != NO_PAGE {
                let n = BTreeNode::read(cache, cur, self.key_arity)?;
                if n.keys.last() != Some(key) {
                    break;
                }
                found_pos = Self::position_of(&n, key, doc_id);
                let continue_scan = n.keys.first() == Some(key);
                let prev = n.prev_sibling_id;
                if found_pos.is_some() {
                    target_leaf = cur;
                    target_node = n;
                } else if continue_scan {
                    cur = prev;
                } else {
                    break;
                }
            }
        }

        let pos = match found_pos {
            Some(p) => p,
            None => return Ok(false),
        };

        let was_first = pos == 0;
        target_node.keys.remove(pos);
        target_node.values.remove(pos);
        target_node.write(header, cache, disk, target_leaf, self.key_arity, now)?;

        if was_first && !target_node.keys.is_empty() {
            self.fix_leftmost_separator(header, cache, disk, now, target_leaf)?;
        }

        self.rebalance(header, cache, disk, now, target_leaf)?;
        self.bump_entry_count(header, cache, disk, now, -1)?;
        Ok(true)
    }

    fn position_of(node: &BTreeNode, key: &IndexKey, doc_id: &Bson) -> Option<usize> {
        node.keys
            .iter()
            .zip(node.values.iter())
            .position(|(k, v)| k == key && v == doc_id)
    }

    fn min_key_under(&self, cache: &mut PageCache, mut page_id: PageId) -> TinyResult<IndexKey> {
        loop {
            let node = BTreeNode::read(cache, page_id, self.key_arity)?;
            if node.is_leaf {
                return Ok(node.keys[0].clone());
            }
            page_id = node.child_ids[0];
        }
    }

    /// Walk up from `node_id`, fixing the first ancestor separator that no
    /// longer reflects `node_id`'s (possibly new) minimum key, per §4.5
    /// step 4. Stops as soon as one separator is fixed, since a node's
    /// minimum only affects the separator at the first ancestor boundary
    /// where it is not the leftmost child.
    fn fix_leftmost_separator(
        &mut self,
        header: &mut DatabaseHeader,
        cache: &mut PageCache,
        disk: &DiskFile,
        now: u64,
        node_id: PageId,
    ) -> TinyResult<()> {
        let mut child = node_id;
        loop {
            let node = BTreeNode::read(cache, child, self.key_arity)?;
            if node.parent_id == NO_PAGE {
                return Ok(());
            }
            let mut parent = BTreeNode::read(cache, node.parent_id, self.key_arity)?;
            let idx = parent.child_ids.iter().position(|&c| c == child).unwrap();
            if idx == 0 {
                child = node.parent_id;
                continue;
            }
            let new_min = self.min_key_under(cache, child)?;
            if parent.keys[idx - 1] != new_min {
                parent.keys[idx - 1] = new_min;
                parent.write(header, cache, disk, node.parent_id, self.key_arity, now)?;
            }
            return Ok(());
        }
    }

    fn rebalance(
        &mut self,
        header: &mut DatabaseHeader,
        cache: &mut PageCache,
        disk: &DiskFile,
        now: u64,
        page_id: PageId,
    ) -> TinyResult<()> {
        let node = BTreeNode::read(cache, page_id, self.key_arity)?;
        if page_id == self.root_page {
            if !node.is_leaf && node.keys.is_empty() {
                let only_child = node.child_ids[0];
                self.set_parent(header, cache, disk, now, only_child, NO_PAGE)?;
                self.root_page = only_child;
                PageAllocator::free_page(header, cache, page_id, now)?;
            }
            return Ok(());
        }

        if node.keys.len() >= self.min_keys() {
            return Ok(());
        }

        let parent_id = node.parent_id;
        let parent = BTreeNode::read(cache, parent_id, self.key_arity)?;
        let my_index = parent.child_ids.iter().position(|&c| c == page_id).unwrap();

        if my_index > 0 {
            let left_id = parent.child_ids[my_index - 1];
            let left = BTreeNode::read(cache, left_id, self.key_arity)?;
            if left.keys.len() > self.min_keys() {
                self.borrow_left(header, cache, disk, now, parent_id, my_index - 1)?;
                return Ok(());
            }
        }
        if my_index + 1 < parent.child_ids.len() {
            let right_id = parent.child_ids[my_index + 1];
            let right = BTreeNode::read(cache, right_id, self.key_arity)?;
            if right.keys.len() > self.min_keys() {
                self.borrow_right(header, cache, disk, now, parent_id, my_index)?;
                return Ok(());
            }
        }

        let merge_left_index = if my_index > 0 { my_index - 1 } else { my_index };
        self.merge(header, cache, disk, now, parent_id, merge_left_index)?;
        self.rebalance(header, cache, disk, now, parent_id)
    }

    /// Move the left sibling's last entry into the underfull right sibling
    /// (`left_index` names the left sibling's position in `parent`).
    fn borrow_left(
        &mut self,
        header: &mut DatabaseHeader,
        cache: &mut PageCache,
        disk: &DiskFile,
        now: u64,
        parent_id: PageId,
        left_index: usize,
    ) -> TinyResult<()> {
        let mut parent = BTreeNode::read(cache, parent_id, self.key_arity)?;
        let left_id = parent.child_ids[left_index];
        let right_id = parent.child_ids[left_index + 1];
        let mut left = BTreeNode::read(cache, left_id, self.key_arity)?;
        let mut right = BTreeNode::read(cache, right_id, self.key_arity)?;

        if left.is_leaf {
            let k = left.keys.pop().unwrap();
            let v = left.values.pop().unwrap();
            right.keys.insert(0, k);
            right.values.insert(0, v);
            parent.keys[left_index] = right.keys[0].clone();
        } else {
            let moved_key = left.keys.pop().unwrap();
            let moved_child = left.child_ids.pop().unwrap();
            right.keys.insert(0, parent.keys[left_index].clone());
            right.child_ids.insert(0, moved_child);
            parent.keys[left_index] = moved_key;
            self.set_parent(header, cache, disk, now, moved_child, right_id)?;
        }

        left.write(header, cache, disk, left_id, self.key_arity, now)?;
        right.write(header, cache, disk, right_id, self.key_arity, now)?;
        parent.write(header, cache, disk, parent_id, self.key_arity, now)
    }

    /// Move the right sibling's first entry into the underfull left
    /// sibling (`left_index` names the left sibling's position).
    fn borrow_right(
        &mut self,
        header: &mut DatabaseHeader,
        cache: &mut PageCache,
        disk: &DiskFile,
        now: u64,
        parent_id: PageId,
        left_index: usize,
    ) -> TinyResult<()> {
        let mut parent = BTreeNode::read(cache, parent_id, self.key_arity)?;
        let left_id = parent.child_ids[left_index];
        let right_id = parent.child_ids[left_index + 1];
        let mut left = BTreeNode::read(cache, left_id, self.key_arity)?;
        let mut right = BTreeNode::read(cache, right_id, self.key_arity)?;

        if left.is_leaf {
            let k = right.keys.remove(0);
            let v = right.values.remove(0);
            left.keys.push(k);
            left.values.push(v);
            parent.keys[left_index] = right.keys[0].clone();
        } else {
            let moved_key = right.keys.remove(0);
            let moved_child = right.child_ids.remove(0);
            left.keys.push(parent.keys[left_index].clone());
            left.child_ids.push(moved_child);
            parent.keys[left_index] = moved_key;
            self.set_parent(header, cache, disk, now, moved_child, left_id)?;
        }

        left.write(header, cache, disk, left_id, self.key_arity, now)?;
        right.write(header, cache, disk, right_id, self.key_arity, now)?;
        parent.write(header, cache, disk, parent_id, self.key_arity, now)
    }

    /// Merge the child at `left_index + 1` into the child at `left_index`,
    /// dropping the separator between them from `parent` and freeing the
    /// now-empty right-hand page.
    fn merge(
        &mut self,
        header: &mut DatabaseHeader,
        cache: &mut PageCache,
        disk: &DiskFile,
        now: u64,
        parent_id: PageId,
        left_index: usize,
    ) -> TinyResult<()> {
        let mut parent = BTreeNode::read(cache, parent_id, self.key_arity)?;
        let left_id = parent.child_ids[left_index];
        let right_id = parent.child_ids[left_index + 1];
        let mut left = BTreeNode::read(cache, left_id, self.key_arity)?;
        let right = BTreeNode::read(cache, right_id, self.key_arity)?;

        if left.is_leaf {
            left.keys.extend(right.keys.clone());
            left.values.extend(right.values.clone());
            left.next_sibling_id = right.next_sibling_id;
            if right.next_sibling_id != NO_PAGE {
                let mut nxt = BTreeNode::read(cache, right.next_sibling_id, self.key_arity)?;
                nxt.prev_sibling_id = left_id;
                nxt.write(header, cache, disk, right.next_sibling_id, self.key_arity, now)?;
            }
        } else {
            let separator = parent.keys[left_index].clone();
            left.keys.push(separator);
            left.keys.extend(right.keys.clone());
            left.child_ids.extend(right.child_ids.clone());
            for &c in &right.child_ids {
                self.set_parent(header, cache, disk, now, c, left_id)?;
            }
        }

        BTreeNode::free_overflow(header, cache, right_id, now)?;
        PageAllocator::free_page(header, cache, right_id, now)?;
        left.write(header, cache, disk, left_id, self.key_arity, now)?;

        parent.keys.remove(left_index);
        parent.child_ids.remove(left_index + 1);
        parent.write(header, cache, disk, parent_id, self.key_arity, now)
    }

    /// Every `doc_id` stored under `key` (§4.5 "Find").
    pub fn find(&self, cache: &mut PageCache, key: &IndexKey) -> TinyResult<Vec<Bson>> {
        let leaf_id = self.locate_leaf(cache, key)?;
        let node = BTreeNode::read(cache, leaf_id, self.key_arity)?;
        let mut out: Vec<Bson> = node
            .keys
            .iter()
            .zip(node.values.iter())
            .filter(|(k, _)| *k == key)
            .map(|(_, v)| v.clone())
            .collect();

        let mut cur = node.next_sibling_id;
        while cur != NO_PAGE {
            let n = BTreeNode::read(cache, cur, self.key_arity)?;
            if n.keys.first() != Some(key) {
                break;
            }
            out.extend(
                n.keys
                    .iter()
                    .zip(n.values.iter())
                    .filter(|(k, _)| *k == key)
                    .map(|(_, v)| v.clone()),
            );
            if n.keys.last() == Some(key) {
                cur = n.next_sibling_id;
            } else {
                break;
            }
        }

        let mut cur = node.prev_sibling_id;
        while cur != NO_PAGE {
            let n = BTreeNode::read(cache, cur, self.key_arity)?;
            if n.keys.last() != Some(key) {
                break;
            }
            out.extend(
                n.keys
                    .iter()
                    .zip(n.values.iter())
                    .filter(|(k, _)| *k == key)
                    .map(|(_, v)| v.clone()),
            );
            if n.keys.first() == Some(key) {
                cur = n.prev_sibling_id;
            } else {
                break;
            }
        }
        Ok(out)
    }

    pub fn contains(&self, cache: &mut PageCache, key: &IndexKey) -> TinyResult<bool> {
        Ok(!self.find(cache, key)?.is_empty())
    }

    /// Entries with `lower <= key <= upper`, either bound optional, in
    /// ascending key order (§4.5 "FindRange").
    pub fn range(
        &self,
        cache: &mut PageCache,
        lower: Option<&IndexKey>,
        upper: Option<&IndexKey>,
    ) -> TinyResult<Vec<(IndexKey, Bson)>> {
        let mut cur = match lower {
            Some(k) => self.locate_leaf(cache, k)?,
            None => self.leftmost_leaf(cache)?,
        };
        let mut out = Vec::new();
        'outer: while cur != NO_PAGE {
            let node = BTreeNode::read(cache, cur, self.key_arity)?;
            for (k, v) in node.keys.iter().zip(node.values.iter()) {
                if let Some(lo) = lower {
                    if k < lo {
                        continue;
                    }
                }
                if let Some(hi) = upper {
                    if k > hi {
                        break 'outer;
                    }
                }
                out.push((k.clone(), v.clone()));
            }
            cur = node.next_sibling_id;
        }
        Ok(out)
    }

    /// Free every page the tree owns, including node overflow chains.
    /// Used when an index is dropped (§4.6).
    pub fn drop_all(
        &self,
        header: &mut DatabaseHeader,
        cache: &mut PageCache,
        now: u64,
    ) -> TinyResult<()> {
        let mut stack = vec![self.root_page];
        while let Some(page_id) = stack.pop() {
            let node = BTreeNode::read(cache, page_id, self.key_arity)?;
            if !node.is_leaf {
                stack.extend(node.child_ids.iter().copied());
            }
            BTreeNode::free_overflow(header, cache, page_id, now)?;
            PageAllocator::free_page(header, cache, page_id, now)?;
        }
        Ok(())
    }

    /// Tree-wide structural check (§4.5 "Validation").
    pub fn validate(&self, cache: &mut PageCache) -> TinyResult<()> {
        self.validate_node(cache, self.root_page, None, None, true)
    }

    fn validate_node(
        &self,
        cache: &mut PageCache,
        page_id: PageId,
        lower: Option<&IndexKey>,
        upper: Option<&IndexKey>,
        is_root: bool,
    ) -> TinyResult<()> {
        let node = BTreeNode::read(cache, page_id, self.key_arity)?;

        for w in node.keys.windows(2) {
            if !(w[0] < w[1]) {
                return Err(TinyDbError::corruption(format!(
                    "btree page {} keys not strictly increasing",
                    page_id
                )));
            }
        }
        if !is_root && node.keys.len() < self.min_keys() {
            return Err(TinyDbError::corruption(format!("btree page {} underfull", page_id)));
        }
        if node.keys.len() > self.max_keys {
            return Err(TinyDbError::corruption(format!("btree page {} overfull", page_id)));
        }
        if let (Some(lo), Some(first)) = (lower, node.keys.first()) {
            if first < lo {
                return Err(TinyDbError::corruption(format!(
                    "btree page {} violates parent lower bound",
                    page_id
                )));
            }
        }
        if let (Some(hi), Some(last)) = (upper, node.keys.last()) {
            if !(last < hi) {
                return Err(TinyDbError::corruption(format!(
                    "btree page {} violates parent upper bound",
                    page_id
                )));
            }
        }

        if !node.is_leaf {
            for (i, &child_id) in node.child_ids.iter().enumerate() {
                let child = BTreeNode::read(cache, child_id, self.key_arity)?;
                if child.parent_id != page_id {
                    return Err(TinyDbError::corruption(format!(
                        "btree page {} child {} has a stale parent pointer",
                        page_id, child_id
                    )));
                }
                let child_lower = if i == 0 { lower } else { Some(&node.keys[i - 1]) };
                let child_upper = if i == node.keys.len() { upper } else { Some(&node.keys[i]) };
                self.validate_node(cache, child_id, child_lower, child_upper, false)?;
            }
        }
        Ok(())
    }
}
