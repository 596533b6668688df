use super::database_header::DatabaseHeader;
use super::disk_file::DiskFile;
use super::page::Page;
use super::page_cache::PageCache;
use super::page_id::{PageId, PageType, NO_PAGE};
use crate::error::TinyResult;

/// Free-page-list bookkeeping (C3). Stateless: every method takes the
/// `DatabaseHeader` it mutates and the cache/disk it operates against, so
/// the header stays the single source of truth rather than being
/// duplicated into an allocator struct (§5: the header is shared, owned,
/// and locked once by the engine).
pub struct PageAllocator;

impl PageAllocator {
    /// Pop the free list if non-empty, else extend the file by one page.
    /// Either way returns a freshly zeroed, in-cache page of `page_type`.
    pub fn new_page(
        header: &mut DatabaseHeader,
        cache: &mut PageCache,
        disk: &DiskFile,
        page_type: PageType,
        now: u64,
    ) -> TinyResult<PageId> {
        let id = if header.first_free_page != NO_PAGE {
            let free_id = header.first_free_page;
            let freed_page = cache.fetch(free_id)?;
            let next_free = freed_page.header.next_page_id;
            header.first_free_page = next_free;
            free_id
        } else {
            disk.extend_by_one_page()?;
            header.total_pages += 1;
            header.total_pages
        };

        let page = Page::new_zeroed(page_type, id, disk.page_size(), now);
        cache.insert(page);
        header.used_pages += 1;
        header.modified_ticks = now;
        Ok(id)
    }

    /// Push `id` onto the head of the free list.
    pub fn free_page(
        header: &mut DatabaseHeader,
        cache: &mut PageCache,
        id: PageId,
        now: u64,
    ) -> TinyResult<()> {
        let page = cache.fetch(id)?;
        page.header.prev_page_id = NO_PAGE;
        page.header.next_page_id = header.first_free_page;
        page.header.item_count = 0;
        page.header.free_bytes = page.payload.len() as u16;
        page.payload.iter_mut().for_each(|b| *b = 0);
        page.touch(now, page.header.lsn);
        header.first_free_page = id;
        header.used_pages = header.used_pages.saturating_sub(1);
        header.modified_ticks = now;
        Ok(())
    }

    /// Count the free-list length by walking it; used by the
    /// `usedPages + freePagesInList = totalPages - 1` invariant check.
    pub fn free_list_len(header: &DatabaseHeader, cache: &mut PageCache) -> TinyResult<u32> {
        let mut count = 0u32;
        let mut cur = header.first_free_page;
        while cur != NO_PAGE {
            let page = cache.fetch(cur)?;
            cur = page.header.next_page_id;
            count += 1;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn setup(page_size: u32) -> (DatabaseHeader, PageCache, Arc<DiskFile>) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.db");
        let disk = Arc::new(DiskFile::open(&path, page_size).unwrap());
        disk.extend_by_one_page().unwrap(); // header page
        std::mem::forget(dir);
        let header = DatabaseHeader::new("t", page_size, true, 0).unwrap();
        let cache = PageCache::new(disk.clone(), 16);
        (header, cache, disk)
    }

    #[test]
    fn allocates_by_extending_when_free_list_empty() {
        let (mut header, mut cache, disk) = setup(256);
        let id = PageAllocator::new_page(&mut header, &mut cache, &disk, PageType::Data, 1).unwrap();
        assert_eq!(id, 2);
        assert_eq!(header.used_pages, 1);
        assert_eq!(header.total_pages, 2);
    }

    #[test]
    fn reuses_freed_pages_before_extending() {
        let (mut header, mut cache, disk) = setup(256);
        let a = PageAllocator::new_page(&mut header, &mut cache, &disk, PageType::Data, 1).unwrap();
        let b = PageAllocator::new_page(&mut header, &mut cache, &disk, PageType::Data, 1).unwrap();
        assert_eq!(header.used_pages, 2);

        PageAllocator::free_page(&mut header, &mut cache, a, 2).unwrap();
        assert_eq!(header.used_pages, 1);
        assert_eq!(header.first_free_page, a);

        let reused = PageAllocator::new_page(&mut header, &mut cache, &disk, PageType::Index, 3).unwrap();
        assert_eq!(reused, a);
        assert_eq!(header.first_free_page, NO_PAGE);
        assert_eq!(header.total_pages, 2); // no new page appended
        let _ = b;
    }
}
