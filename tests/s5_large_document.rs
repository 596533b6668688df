use bson::{doc, Bson};
use tinydb::{Engine, EngineOptions};

/// With page size 4096 a 12000-byte payload must overflow into a chain of
/// out-of-line pages; shrinking it on update frees pages from the tail of
/// the chain; deleting frees what remains.
#[test]
fn large_payload_overflows_shrinks_and_frees() {
    let dir = tempfile::tempdir().unwrap();
    let options = EngineOptions { page_size: 4096, ..Default::default() };
    let engine = Engine::open(dir.path().join("blobs.db"), options).unwrap();
    let blobs = engine.get_collection("blobs").unwrap();

    let big = "x".repeat(12000);
    let id = blobs.insert(doc! {"_id": 1, "payload": big.clone()}).unwrap();
    assert_eq!(id, Bson::Int32(1));

    let found = blobs.find_by_id(&id).unwrap().unwrap();
    assert_eq!(found.get_str("payload").unwrap(), big);

    let stats_before = engine.statistics().unwrap();

    let smaller = "y".repeat(6000);
    let updated = blobs.update(doc! {"_id": 1, "payload": smaller.clone()}).unwrap();
    assert_eq!(updated, 1);
    let found = blobs.find_by_id(&id).unwrap().unwrap();
    assert_eq!(found.get_str("payload").unwrap(), smaller);

    let stats_after_shrink = engine.statistics().unwrap();
    assert!(
        stats_after_shrink.used_pages < stats_before.used_pages,
        "shrinking the payload should free at least one overflow page"
    );

    let deleted = blobs.delete(&id).unwrap();
    assert_eq!(deleted, 1);
    assert!(blobs.find_by_id(&id).unwrap().is_none());

    let stats_after_delete = engine.statistics().unwrap();
    assert!(stats_after_delete.used_pages < stats_after_shrink.used_pages);
}
