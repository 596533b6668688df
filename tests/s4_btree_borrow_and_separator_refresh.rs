use bson::Bson;
use std::sync::Arc;
use tinydb::btree::{BTreeIndex, BTreeNode, IndexKey};
use tinydb::storage::database_header::DatabaseHeader;
use tinydb::storage::disk_file::DiskFile;
use tinydb::storage::page_cache::PageCache;

fn fresh(page_size: u32) -> (DatabaseHeader, PageCache, Arc<DiskFile>) {
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

fn leaf_keys(cache: &mut PageCache, page_id: tinydb::storage::page_id::PageId) -> Vec<i64> {
    BTreeNode::read(cache, page_id, 1)
        .unwrap()
        .keys
        .iter()
        .map(|k| match &k.0[0] {
            Bson::Int64(n) => *n,
            other => panic!("unexpected key variant: {:?}", other),
        })
        .collect()
}

/// S4: insert keys 1..=8 into a maxKeys=4 tree, then delete 1, 5, 6, 7 in
/// turn, checking the root separator and leaf contents at each step.
#[test]
fn deletes_below_min_keys_refresh_the_root_separator() {
    let (mut header, mut cache, disk) = fresh(1024);
    let mut index = BTreeIndex::create(&mut header, &mut cache, &disk, 1, 1, false, 4).unwrap();

    for n in 1..=8 {
        index.insert(&mut header, &mut cache, &disk, 1, key(n), Bson::Int64(n)).unwrap();
    }
    index.validate(&mut cache).unwrap();

    index.delete(&mut header, &mut cache, &disk, 1, &key(1), &Bson::Int64(1)).unwrap();
    index.validate(&mut cache).unwrap();

    let root = BTreeNode::read(&mut cache, index.root_page, 1).unwrap();
    assert!(!root.is_leaf);
    assert_eq!(root.keys.len(), 1);
    assert_eq!(root.keys[0], key(5));
    assert_eq!(leaf_keys(&mut cache, root.child_ids[0]), vec![2, 3, 4]);
    assert_eq!(leaf_keys(&mut cache, root.child_ids[1]), vec![5, 6, 7, 8]);

    for n in [5i64, 6, 7] {
        index.delete(&mut header, &mut cache, &disk, 1, &key(n), &Bson::Int64(n)).unwrap();
        index.validate(&mut cache).unwrap();
    }

    let root = BTreeNode::read(&mut cache, index.root_page, 1).unwrap();
    assert!(!root.is_leaf);
    assert_eq!(root.keys.len(), 1);
    assert_eq!(root.keys[0], key(4));
    assert_eq!(leaf_keys(&mut cache, root.child_ids[0]), vec![2, 3]);
    assert_eq!(leaf_keys(&mut cache, root.child_ids[1]), vec![4, 8]);
}
