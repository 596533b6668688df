//! Collection and index catalogs (C9).
//!
//! Both catalogs are stored the same way: a chain of `Collection`-typed
//! pages holding length-prefixed BSON documents, grown one page at a time
//! as the previous page fills, walked and rewritten with `DataPageAccess`
//! (itself agnostic to page type). `collection_catalog_page` and
//! `index_info_page` in the database header are the chain roots.

use serde::{Deserialize, Serialize};

use crate::data_page::DataPageAccess;
use crate::error::{TinyDbError, TinyResult};
use crate::storage::allocator::PageAllocator;
use crate::storage::database_header::DatabaseHeader;
use crate::storage::disk_file::DiskFile;
use crate::storage::page_cache::PageCache;
use crate::storage::page_id::{PageId, PageType, NO_PAGE};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CollectionMeta {
    pub name: String,
    pub created_ticks: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexMeta {
    pub collection: String,
    pub name: String,
    pub fields: Vec<String>,
    pub unique: bool,
    pub root_page: PageId,
}

fn encode<T: Serialize>(value: &T) -> TinyResult<Vec<u8>> {
    let doc = bson::to_document(value)
        .map_err(|e| TinyDbError::corruption(format!("failed to encode catalog entry: {}", e)))?;
    let mut buf = Vec::new();
    doc.to_writer(&mut buf)
        .map_err(|e| TinyDbError::corruption(format!("failed to serialize catalog entry: {}", e)))?;
    Ok(buf)
}

fn decode<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> TinyResult<T> {
    let doc = bson::Document::from_reader(&mut std::io::Cursor::new(bytes))
        .map_err(|e| TinyDbError::corruption(format!("malformed catalog entry: {}", e)))?;
    bson::from_document(doc)
        .map_err(|e| TinyDbError::corruption(format!("failed to decode catalog entry: {}", e)))
}

/// Walk every page of the chain rooted at `root`, parse its slots as `T`.
fn load_all<T: for<'de> Deserialize<'de>>(cache: &mut PageCache, root: PageId) -> TinyResult<Vec<T>> {
    let mut out = Vec::new();
    let mut cur = root;
    while cur != NO_PAGE {
        let page = cache.fetch(cur)?;
        for bytes in DataPageAccess::scan_documents(page)? {
            out.push(decode(bytes)?);
        }
        cur = page.header.next_page_id;
    }
    Ok(out)
}

/// Append one entry to the chain rooted at `*root_field`, allocating the
/// root or a new tail page as needed.
fn append_one<T: Serialize>(
    header: &mut DatabaseHeader,
    cache: &mut PageCache,
    disk: &DiskFile,
    now: u64,
    root_field: &mut PageId,
    value: &T,
) -> TinyResult<()> {
    let bytes = encode(value)?;

    if *root_field == NO_PAGE {
        let id = PageAllocator::new_page(header, cache, disk, PageType::Collection, now)?;
        *root_field = id;
    }

    let mut cur = *root_field;
    loop {
        if DataPageAccess::has_room_for(cache.fetch(cur)?, bytes.len()) {
            let page = cache.fetch(cur)?;
            let lsn = page.header.lsn;
            DataPageAccess::append_document(page, &bytes, now, lsn)?;
            return Ok(());
        }
        let next = cache.fetch(cur)?.header.next_page_id;
        if next == NO_PAGE {
            let new_id = PageAllocator::new_page(header, cache, disk, PageType::Collection, now)?;
            let cur_page = cache.fetch(cur)?;
            cur_page.header.next_page_id = new_id;
            let lsn = cur_page.header.lsn;
            cur_page.touch(now, lsn);
            cache.fetch(new_id)?.header.prev_page_id = cur;
            cur = new_id;
        } else {
            cur = next;
        }
    }
}

/// Rewrite the whole chain from a fresh entry list, freeing any pages that
/// are no longer needed. Used by drop/remove, which is rare enough that a
/// full rebuild is simpler than in-place slot deletion.
fn rewrite_all<T: Serialize>(
    header: &mut DatabaseHeader,
    cache: &mut PageCache,
    disk: &DiskFile,
    now: u64,
    root_field: &mut PageId,
    values: &[T],
) -> TinyResult<()> {
    let mut old_pages = Vec::new();
    let mut cur = *root_field;
    while cur != NO_PAGE {
        old_pages.push(cur);
        cur = cache.fetch(cur)?.header.next_page_id;
    }
    for id in &old_pages {
        PageAllocator::free_page(header, cache, *id, now)?;
    }
    *root_field = NO_PAGE;

    for value in values {
        append_one(header, cache, disk, now, root_field, value)?;
    }
    Ok(())
}

pub struct CollectionCatalog;

impl CollectionCatalog {
    pub fn list(cache: &mut PageCache, header: &DatabaseHeader) -> TinyResult<Vec<CollectionMeta>> {
        load_all(cache, header.collection_catalog_page)
    }

    pub fn find(
        cache: &mut PageCache,
        header: &DatabaseHeader,
        name: &str,
    ) -> TinyResult<Option<CollectionMeta>> {
        Ok(Self::list(cache, header)?.into_iter().find(|c| c.name == name))
    }

    pub fn insert(
        header: &mut DatabaseHeader,
        cache: &mut PageCache,
        disk: &DiskFile,
        now: u64,
        meta: CollectionMeta,
    ) -> TinyResult<()> {
        if Self::find(cache, header, &meta.name)?.is_some() {
            return Err(TinyDbError::duplicate_key(format!(
                "collection '{}' already exists",
                meta.name
            )));
        }
        let mut root = header.collection_catalog_page;
        append_one(header, cache, disk, now, &mut root, &meta)?;
        header.collection_catalog_page = root;
        Ok(())
    }

    pub fn remove(
        header: &mut DatabaseHeader,
        cache: &mut PageCache,
        disk: &DiskFile,
        now: u64,
        name: &str,
    ) -> TinyResult<()> {
        let mut remaining = Self::list(cache, header)?;
        let before = remaining.len();
        remaining.retain(|c| c.name != name);
        if remaining.len() == before {
            return Err(TinyDbError::not_found(format!("collection '{}' not found", name)));
        }
        let mut root = header.collection_catalog_page;
        rewrite_all(header, cache, disk, now, &mut root, &remaining)?;
        header.collection_catalog_page = root;
        Ok(())
    }
}

pub struct IndexCatalog;

impl IndexCatalog {
    pub fn list(cache: &mut PageCache, header: &DatabaseHeader) -> TinyResult<Vec<IndexMeta>> {
        load_all(cache, header.index_info_page)
    }

    pub fn for_collection(
        cache: &mut PageCache,
        header: &DatabaseHeader,
        collection: &str,
    ) -> TinyResult<Vec<IndexMeta>> {
        Ok(Self::list(cache, header)?
            .into_iter()
            .filter(|i| i.collection == collection)
            .collect())
    }

    pub fn insert(
        header: &mut DatabaseHeader,
        cache: &mut PageCache,
        disk: &DiskFile,
        now: u64,
        meta: IndexMeta,
    ) -> TinyResult<()> {
        let mut root = header.index_info_page;
        append_one(header, cache, disk, now, &mut root, &meta)?;
        header.index_info_page = root;
        Ok(())
    }

    pub fn remove(
        header: &mut DatabaseHeader,
        cache: &mut PageCache,
        disk: &DiskFile,
        now: u64,
        collection: &str,
        name: &str,
    ) -> TinyResult<()> {
        let mut remaining = Self::list(cache, header)?;
        let before = remaining.len();
        remaining.retain(|i| !(i.collection == collection && i.name == name));
        if remaining.len() == before {
            return Err(TinyDbError::not_found(format!("index '{}' not found", name)));
        }
        let mut root = header.index_info_page;
        rewrite_all(header, cache, disk, now, &mut root, &remaining)?;
        header.index_info_page = root;
        Ok(())
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
        disk.extend_by_one_page().unwrap();
        std::mem::forget(dir);
        let header = DatabaseHeader::new("t", page_size, true, 0).unwrap();
        let cache = PageCache::new(disk.clone(), 32);
        (header, cache, disk)
    }

    #[test]
    fn inserts_and_finds_collections() {
        let (mut header, mut cache, disk) = setup(256);
        CollectionCatalog::insert(
            &mut header,
            &mut cache,
            &disk,
            1,
            CollectionMeta { name: "orders".into(), created_ticks: 1 },
        )
        .unwrap();
        let found = CollectionCatalog::find(&mut cache, &header, "orders").unwrap();
        assert!(found.is_some());
        assert!(CollectionCatalog::find(&mut cache, &header, "missing").unwrap().is_none());
    }

    #[test]
    fn rejects_duplicate_collection_names() {
        let (mut header, mut cache, disk) = setup(256);
        CollectionCatalog::insert(
            &mut header,
            &mut cache,
            &disk,
            1,
            CollectionMeta { name: "orders".into(), created_ticks: 1 },
        )
        .unwrap();
        let err = CollectionCatalog::insert(
            &mut header,
            &mut cache,
            &disk,
            2,
            CollectionMeta { name: "orders".into(), created_ticks: 2 },
        );
        assert!(err.is_err());
    }

    #[test]
    fn catalog_spans_multiple_pages_when_full() {
        let (mut header, mut cache, disk) = setup(128);
        for i in 0..20 {
            CollectionCatalog::insert(
                &mut header,
                &mut cache,
                &disk,
                i,
                CollectionMeta { name: format!("c{}", i), created_ticks: i },
            )
            .unwrap();
        }
        let all = CollectionCatalog::list(&mut cache, &header).unwrap();
        assert_eq!(all.len(), 20);
    }

    #[test]
    fn remove_drops_an_index_definition() {
        let (mut header, mut cache, disk) = setup(256);
        IndexCatalog::insert(
            &mut header,
            &mut cache,
            &disk,
            1,
            IndexMeta {
                collection: "orders".into(),
                name: "by_sku".into(),
                fields: vec!["sku".into()],
                unique: false,
                root_page: NO_PAGE,
            },
        )
        .unwrap();
        IndexCatalog::remove(&mut header, &mut cache, &disk, 2, "orders", "by_sku").unwrap();
        assert!(IndexCatalog::list(&mut cache, &header).unwrap().is_empty());
    }
}
