use bson::{doc, Bson};
use tinydb::{Engine, EngineOptions};

/// Insert id=1, update id=1, delete an existing id=2, then roll back: the
/// post-rollback state must match the pre-transaction state exactly.
#[test]
fn rollback_undoes_insert_update_and_delete() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::open(dir.path().join("orders.db"), EngineOptions::default()).unwrap();
    let orders = engine.get_collection("orders").unwrap();

    orders.insert(doc! {"_id": 2, "name": "keep"}).unwrap();

    let txn = engine.begin_transaction().unwrap();
    txn.insert("orders", doc! {"_id": 1, "name": "new"}).unwrap();
    txn.update("orders", doc! {"_id": 1, "name": "renamed"}).unwrap();
    txn.delete("orders", &Bson::Int32(2)).unwrap();
    txn.rollback().unwrap();

    assert!(orders.find_by_id(&Bson::Int32(1)).unwrap().is_none());
    let kept = orders.find_by_id(&Bson::Int32(2)).unwrap().unwrap();
    assert_eq!(kept.get_str("name").unwrap(), "keep");

    let all = orders.scan().unwrap();
    assert_eq!(all.len(), 1);
}
