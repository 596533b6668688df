use bson::doc;
use tinydb::{EngineOptions, WriteConcern};

/// Insert 100 documents under `WriteConcern::Journaled` (WAL fsynced per
/// write, data pages left dirty in cache) and then "kill" the process by
/// forgetting the engine instead of dropping it, so `Drop::close` never
/// flushes the data pages or truncates the log. Reopening must replay the
/// WAL and recover every document.
#[test]
fn reopen_after_simulated_crash_replays_the_log() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("orders.db");

    let options = EngineOptions {
        write_concern: WriteConcern::Journaled,
        background_flush_interval: std::time::Duration::from_secs(3600),
        ..Default::default()
    };

    {
        let engine = tinydb::Engine::open(&db_path, options.clone()).unwrap();
        let orders = engine.get_collection("orders").unwrap();
        for i in 0..100 {
            orders.insert(doc! {"_id": i, "seq": i}).unwrap();
        }
        std::mem::forget(engine);
    }

    let engine = tinydb::Engine::open(&db_path, options).unwrap();
    let orders = engine.get_collection("orders").unwrap();
    for i in 0..100 {
        let found = orders.find_by_id(&bson::Bson::Int32(i)).unwrap();
        assert!(found.is_some(), "document {} missing after replay", i);
    }
    orders.validate_tree().unwrap();
}
