use bson::{doc, Bson};
use std::sync::Arc;
use tinydb::btree::{BTreeIndex, BTreeNode, IndexKey};
use tinydb::storage::database_header::DatabaseHeader;
use tinydb::storage::disk_file::DiskFile;
use tinydb::storage::page_cache::PageCache;
use tinydb::{Engine, EngineOptions};

fn fresh_index(page_size: u32) -> (DatabaseHeader, PageCache, Arc<DiskFile>) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("idx.db");
    let disk = Arc::new(DiskFile::open(&path, page_size).unwrap());
    disk.extend_by_one_page().unwrap();
    std::mem::forget(dir);
    let header = DatabaseHeader::new("idx", page_size, true, 0).unwrap();
    let cache = PageCache::new(disk.clone(), 64);
    (header, cache, disk)
}

fn key(n: i64) -> IndexKey {
    IndexKey(vec![Bson::Int64(n)])
}

/// Insert enough small documents to cross one data page's capacity; a new
/// page is allocated and the collection's append hint follows it.
#[test]
fn insert_crossing_page_capacity_allocates_a_new_page() {
    let dir = tempfile::tempdir().unwrap();
    let options = EngineOptions { page_size: 512, ..Default::default() };
    let engine = Engine::open(dir.path().join("t.db"), options).unwrap();
    let coll = engine.get_collection("rows").unwrap();

    let before = engine.statistics().unwrap().used_pages;
    for i in 0..200 {
        coll.insert(doc! {"_id": i, "pad": "x".repeat(16)}).unwrap();
    }
    let after = engine.statistics().unwrap().used_pages;

    assert!(after > before, "inserting 200 small rows should allocate beyond the first page");
    for i in 0..200 {
        assert!(coll.find_by_id(&Bson::Int32(i)).unwrap().is_some());
    }
}

/// Deleting the last document on a page frees it; the next insert reuses
/// that page from the free-list rather than growing the file.
#[test]
fn deleting_the_last_document_on_a_page_frees_it_for_reuse() {
    let dir = tempfile::tempdir().unwrap();
    let options = EngineOptions { page_size: 512, ..Default::default() };
    let engine = Engine::open(dir.path().join("t.db"), options).unwrap();
    let coll = engine.get_collection("rows").unwrap();

    let id = coll.insert(doc! {"_id": 1, "pad": "x".repeat(16)}).unwrap();
    let pages_with_doc = engine.statistics().unwrap().used_pages;

    coll.delete(&id).unwrap();
    let pages_after_delete = engine.statistics().unwrap().used_pages;
    assert!(pages_after_delete < pages_with_doc, "the now-empty page should be freed");

    coll.insert(doc! {"_id": 2, "pad": "x".repeat(16)}).unwrap();
    let pages_after_reinsert = engine.statistics().unwrap().used_pages;
    assert_eq!(
        pages_after_reinsert, pages_with_doc,
        "reinserting should reuse the freed page rather than grow the file"
    );
}

/// A hand-corrupted, non-monotone key vector in a leaf must fail
/// `validate` rather than silently passing.
#[test]
fn validate_rejects_a_non_monotone_leaf() {
    let (mut header, mut cache, disk) = fresh_index(1024);
    let index = BTreeIndex::create(&mut header, &mut cache, &disk, 1, 1, false, 4).unwrap();

    let mut root = BTreeNode::read(&mut cache, index.root_page, 1).unwrap();
    root.keys = vec![key(5), key(1), key(3)];
    root.values = vec![Bson::Int64(5), Bson::Int64(1), Bson::Int64(3)];
    root.write(&mut header, &mut cache, &disk, index.root_page, 1, 1).unwrap();

    assert!(index.validate(&mut cache).is_err());
}
