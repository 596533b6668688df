//! Overflow-chain storage for oversized documents (C7).
//!
//! A document whose serialized form exceeds `Page::max_inline_doc_size`
//! is written here instead of into a Data page slot: its bytes are split
//! across a chain of pages linked through `next_page_id`, each holding a
//! 4-byte chunk-length prefix followed by up to `chunk_capacity` bytes.
//! The indirection stub left in the Data page slot (§4.1 "Document")
//! records the chain's root page id.
//!
//! Per the redesign note resolving the source's Data/Index split for
//! overflow pages, every chain page here is stamped `PageType::Index`.

use crate::error::{TinyDbError, TinyResult};
use crate::storage::allocator::PageAllocator;
use crate::storage::database_header::DatabaseHeader;
use crate::storage::page::Page;
use crate::storage::page_cache::PageCache;
use crate::storage::page_id::{PageId, PageType, NO_PAGE};

pub struct LargeDocStore;

impl LargeDocStore {
    /// Bytes of document payload a single chain page can hold: the page's
    /// slot-area capacity minus the 4-byte chunk-length prefix every chain
    /// page carries.
    pub fn chunk_capacity(page_size: u32) -> usize {
        Page::payload_size(page_size) - 4
    }

    /// Write `bytes` into a fresh chain, returning the root page id. The
    /// chain has `ceil(bytes.len() / chunk_capacity)` pages (§8 S5).
    pub fn write(
        header: &mut DatabaseHeader,
        cache: &mut PageCache,
        disk: &crate::storage::disk_file::DiskFile,
        now: u64,
        bytes: &[u8],
    ) -> TinyResult<PageId> {
        let capacity = Self::chunk_capacity(disk.page_size());
        if capacity == 0 {
            return Err(TinyDbError::invalid_argument(
                "page size too small to hold any overflow payload",
            ));
        }

        let mut root: Option<PageId> = None;
        let mut prev: PageId = NO_PAGE;
        for chunk in bytes.chunks(capacity).collect::<Vec<_>>().into_iter() {
            let id = PageAllocator::new_page(header, cache, disk, PageType::Index, now)?;
            if root.is_none() {
                root = Some(id);
            }
            if prev != NO_PAGE {
                let prev_page = cache.fetch(prev)?;
                prev_page.header.next_page_id = id;
                prev_page.touch(now, prev_page.header.lsn);
            }
            let page = cache.fetch(id)?;
            page.header.prev_page_id = prev;
            page.payload[0..4].copy_from_slice(&(chunk.len() as u32).to_le_bytes());
            page.payload[4..4 + chunk.len()].copy_from_slice(chunk);
            page.touch(now, page.header.lsn);
            prev = id;
        }

        root.ok_or_else(|| TinyDbError::invalid_argument("cannot store an empty overflow chain"))
    }

    /// Reassemble the document bytes by walking the chain from `root`.
    pub fn read(cache: &mut PageCache, root: PageId) -> TinyResult<Vec<u8>> {
        let mut out = Vec::new();
        let mut cur = root;
        while cur != NO_PAGE {
            let page = cache.fetch(cur)?;
            let len = u32::from_le_bytes(page.payload[0..4].try_into().unwrap()) as usize;
            out.extend_from_slice(&page.payload[4..4 + len]);
            cur = page.header.next_page_id;
        }
        Ok(out)
    }

    /// Number of pages in the chain rooted at `root`.
    pub fn chain_len(cache: &mut PageCache, root: PageId) -> TinyResult<u32> {
        let mut count = 0u32;
        let mut cur = root;
        while cur != NO_PAGE {
            let page = cache.fetch(cur)?;
            cur = page.header.next_page_id;
            count += 1;
        }
        Ok(count)
    }

    /// Free every page in the chain rooted at `root`.
    pub fn free_chain(
        header: &mut DatabaseHeader,
        cache: &mut PageCache,
        root: PageId,
        now: u64,
    ) -> TinyResult<()> {
        let mut ids = Vec::new();
        let mut cur = root;
        while cur != NO_PAGE {
            let page = cache.fetch(cur)?;
            ids.push(cur);
            cur = page.header.next_page_id;
        }
        for id in ids {
            PageAllocator::free_page(header, cache, id, now)?;
        }
        Ok(())
    }

    /// Shrink an existing chain to hold `new_bytes`, freeing trailing pages
    /// that are no longer needed and allocating more if the new content is
    /// longer. Used by update-in-place when a large document changes size
    /// but stays large (§4.4 "free... when it occupies a different chain"
    /// covers the large-to-small/small-to-large transitions; this covers
    /// large-to-large).
    pub fn rewrite(
        header: &mut DatabaseHeader,
        cache: &mut PageCache,
        disk: &crate::storage::disk_file::DiskFile,
        now: u64,
        root: PageId,
        new_bytes: &[u8],
    ) -> TinyResult<PageId> {
        Self::free_chain(header, cache, root, now)?;
        Self::write(header, cache, disk, now, new_bytes)
    }
}
