//! Transactions: an ordered operation log with before-images, savepoints,
//! and forward/reverse replay against the engine's non-transactional APIs
//! (C14).
//!
//! `TransactionalOps` is the seam: `Transaction` never touches storage
//! directly, it only decides *what* to replay and in *which* order. The
//! not-yet-written `Engine` implements the trait with its real
//! insert/update/delete/createIndex/dropIndex, so commit and rollback both
//! go through the same code paths as any other write.

use std::collections::{HashMap, HashSet};

use bson::Bson;

use crate::error::{TinyDbError, TinyResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committing,
    Committed,
    RollingBack,
    RolledBack,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Insert,
    Update,
    Delete,
    CreateIndex,
    DropIndex,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexShape {
    pub fields: Vec<String>,
    pub unique: bool,
}

#[derive(Debug, Clone)]
pub struct Operation {
    pub kind: OperationKind,
    pub collection: String,
    pub document_id: Option<Bson>,
    pub before: Option<bson::Document>,
    pub after: Option<bson::Document>,
    pub index_name: Option<String>,
    pub index_shape: Option<IndexShape>,
}

/// The engine operations a transaction replays against. Implemented by
/// `Engine`; a test double is enough to exercise commit/rollback here.
pub trait TransactionalOps {
    fn apply_insert(&mut self, collection: &str, doc: bson::Document) -> TinyResult<Bson>;
    fn apply_update(&mut self, collection: &str, doc: bson::Document) -> TinyResult<()>;
    fn apply_delete(&mut self, collection: &str, doc_id: &Bson) -> TinyResult<()>;
    fn apply_create_index(
        &mut self,
        collection: &str,
        name: &str,
        fields: Vec<String>,
        unique: bool,
    ) -> TinyResult<()>;
    fn apply_drop_index(&mut self, collection: &str, name: &str) -> TinyResult<()>;
}

pub struct Transaction {
    pub id: u64,
    pub state: TransactionState,
    pub start_ticks: u64,
    operations: Vec<Operation>,
    savepoints: Vec<(String, usize)>,
}

impl Transaction {
    pub fn new(id: u64, start_ticks: u64) -> Self {
        Self {
            id,
            state: TransactionState::Active,
            start_ticks,
            operations: Vec::new(),
            savepoints: Vec::new(),
        }
    }

    pub fn operation_count(&self) -> usize {
        self.operations.len()
    }

    fn ensure_active(&self) -> TinyResult<()> {
        if self.state != TransactionState::Active {
            return Err(TinyDbError::conflict(format!(
                "transaction {} is not active (state {:?})",
                self.id, self.state
            )));
        }
        Ok(())
    }

    pub fn record_insert(&mut self, collection: &str, doc_id: Bson, after: bson::Document) -> TinyResult<()> {
        self.ensure_active()?;
        self.operations.push(Operation {
            kind: OperationKind::Insert,
            collection: collection.to_string(),
            document_id: Some(doc_id),
            before: None,
            after: Some(after),
            index_name: None,
            index_shape: None,
        });
        Ok(())
    }

    pub fn record_update(
        &mut self,
        collection: &str,
        doc_id: Bson,
        before: bson::Document,
        after: bson::Document,
    ) -> TinyResult<()> {
        self.ensure_active()?;
        self.operations.push(Operation {
            kind: OperationKind::Update,
            collection: collection.to_string(),
            document_id: Some(doc_id),
            before: Some(before),
            after: Some(after),
            index_name: None,
            index_shape: None,
        });
        Ok(())
    }

    pub fn record_delete(&mut self, collection: &str, doc_id: Bson, before: bson::Document) -> TinyResult<()> {
        self.ensure_active()?;
        self.operations.push(Operation {
            kind: OperationKind::Delete,
            collection: collection.to_string(),
            document_id: Some(doc_id),
            before: Some(before),
            after: None,
            index_name: None,
            index_shape: None,
        });
        Ok(())
    }

    pub fn record_create_index(&mut self, collection: &str, name: &str, shape: IndexShape) -> TinyResult<()> {
        self.ensure_active()?;
        self.operations.push(Operation {
            kind: OperationKind::CreateIndex,
            collection: collection.to_string(),
            document_id: None,
            before: None,
            after: None,
            index_name: Some(name.to_string()),
            index_shape: Some(shape),
        });
        Ok(())
    }

    pub fn record_drop_index(&mut self, collection: &str, name: &str, shape: IndexShape) -> TinyResult<()> {
        self.ensure_active()?;
        self.operations.push(Operation {
            kind: OperationKind::DropIndex,
            collection: collection.to_string(),
            document_id: None,
            before: None,
            after: None,
            index_name: Some(name.to_string()),
            index_shape: Some(shape),
        });
        Ok(())
    }

    /// Merge this transaction's log on top of a base scan of `collection`,
    /// by `_id`: later inserts/updates overlay, deletes remove (§4.4
    /// "Scan").
    pub fn overlay(&self, collection: &str, base: Vec<bson::Document>) -> Vec<bson::Document> {
        let mut by_id: Vec<(Bson, bson::Document)> = base
            .into_iter()
            .map(|d| (d.get("_id").cloned().unwrap_or(Bson::Null), d))
            .collect();

        for op in &self.operations {
            if op.collection != collection {
                continue;
            }
            match op.kind {
                OperationKind::Insert | OperationKind::Update => {
                    if let (Some(id), Some(after)) = (&op.document_id, &op.after) {
                        if let Some(slot) = by_id.iter_mut().find(|(existing, _)| existing == id) {
                            slot.1 = after.clone();
                        } else {
                            by_id.push((id.clone(), after.clone()));
                        }
                    }
                }
                OperationKind::Delete => {
                    if let Some(id) = &op.document_id {
                        by_id.retain(|(existing, _)| existing != id);
                    }
                }
                OperationKind::CreateIndex | OperationKind::DropIndex => {}
            }
        }
        by_id.into_iter().map(|(_, d)| d).collect()
    }

    pub fn create_savepoint(&mut self, name: impl Into<String>) -> TinyResult<()> {
        self.ensure_active()?;
        self.savepoints.push((name.into(), self.operations.len()));
        Ok(())
    }

    pub fn release_savepoint(&mut self, name: &str) -> TinyResult<()> {
        let pos = self
            .savepoints
            .iter()
            .position(|(n, _)| n == name)
            .ok_or_else(|| TinyDbError::not_found(format!("savepoint '{}' not found", name)))?;
        self.savepoints.remove(pos);
        Ok(())
    }

    /// Reverse `self.operations[from..]` against `ops`, in reverse order:
    /// Insert undoes via Delete, Update via the before-image, Delete via
    /// re-Insert of the before-image, and index operations symmetrically
    /// (§4.7 "Rollback").
    fn reverse_apply(&self, ops: &mut dyn TransactionalOps, from: usize) -> TinyResult<()> {
        for op in self.operations[from..].iter().rev() {
            match op.kind {
                OperationKind::Insert => {
                    if let Some(id) = &op.document_id {
                        ops.apply_delete(&op.collection, id)?;
                    }
                }
                OperationKind::Update => {
                    if let Some(before) = &op.before {
                        ops.apply_update(&op.collection, before.clone())?;
                    }
                }
                OperationKind::Delete => {
                    if let Some(before) = &op.before {
                        ops.apply_insert(&op.collection, before.clone())?;
                    }
                }
                OperationKind::CreateIndex => {
                    if let Some(name) = &op.index_name {
                        ops.apply_drop_index(&op.collection, name)?;
                    }
                }
                OperationKind::DropIndex => {
                    if let (Some(name), Some(shape)) = (&op.index_name, &op.index_shape) {
                        ops.apply_create_index(&op.collection, name, shape.fields.clone(), shape.unique)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Reverse every operation past `name`'s savepoint, then discard that
    /// savepoint and any created after it (§4.7 "Savepoint").
    pub fn rollback_to_savepoint(&mut self, ops: &mut dyn TransactionalOps, name: &str) -> TinyResult<()> {
        self.ensure_active()?;
        let pos = self
            .savepoints
            .iter()
            .position(|(n, _)| n == name)
            .ok_or_else(|| TinyDbError::not_found(format!("savepoint '{}' not found", name)))?;
        let prefix_len = self.savepoints[pos].1;
        self.reverse_apply(ops, prefix_len)?;
        self.operations.truncate(prefix_len);
        self.savepoints.truncate(pos);
        Ok(())
    }

    pub fn rollback(&mut self, ops: &mut dyn TransactionalOps) -> TinyResult<()> {
        self.ensure_active()?;
        self.state = TransactionState::RollingBack;
        self.reverse_apply(ops, 0)?;
        self.state = TransactionState::RolledBack;
        Ok(())
    }

    fn validate_no_duplicate_inserts(&self) -> TinyResult<()> {
        let mut seen = HashSet::new();
        for op in &self.operations {
            if op.kind == OperationKind::Insert {
                if let Some(id) = &op.document_id {
                    let key = (op.collection.clone(), format!("{:?}", id));
                    if !seen.insert(key) {
                        return Err(TinyDbError::duplicate_key(format!(
                            "duplicate insert for _id {:?} in collection '{}' within one transaction",
                            id, op.collection
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Validate, then replay the log forward against `ops`. Any single-op
    /// failure aborts to `Failed` without applying the remaining
    /// operations (§4.7 "Commit").
    pub fn commit(&mut self, ops: &mut dyn TransactionalOps) -> TinyResult<()> {
        self.ensure_active()?;
        self.validate_no_duplicate_inserts()?;
        self.state = TransactionState::Committing;

        for op in self.operations.clone() {
            let result: TinyResult<()> = match op.kind {
                OperationKind::Insert => op
                    .after
                    .map(|doc| ops.apply_insert(&op.collection, doc).map(|_| ()))
                    .unwrap_or(Ok(())),
                OperationKind::Update => op
                    .after
                    .map(|doc| ops.apply_update(&op.collection, doc))
                    .unwrap_or(Ok(())),
                OperationKind::Delete => op
                    .document_id
                    .map(|id| ops.apply_delete(&op.collection, &id))
                    .unwrap_or(Ok(())),
                OperationKind::CreateIndex => match (&op.index_name, &op.index_shape) {
                    (Some(name), Some(shape)) => {
                        ops.apply_create_index(&op.collection, name, shape.fields.clone(), shape.unique)
                    }
                    _ => Ok(()),
                },
                OperationKind::DropIndex => match &op.index_name {
                    Some(name) => ops.apply_drop_index(&op.collection, name),
                    None => Ok(()),
                },
            };
            if let Err(e) = result {
                self.state = TransactionState::Failed;
                return Err(e);
            }
        }
        self.state = TransactionState::Committed;
        Ok(())
    }
}

/// Registry of active transactions, with id allocation and timeout
/// sweeping (§4.7 "Cancellation/timeout").
pub struct TransactionManager {
    next_id: u64,
    active: HashMap<u64, Transaction>,
    max_transactions: usize,
    timeout_ticks: u64,
}

impl TransactionManager {
    pub fn new(max_transactions: usize, timeout_ticks: u64) -> Self {
        Self {
            next_id: 1,
            active: HashMap::new(),
            max_transactions,
            timeout_ticks,
        }
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn begin(&mut self, now: u64) -> TinyResult<u64> {
        if self.active.len() >= self.max_transactions {
            return Err(TinyDbError::too_large("maximum number of concurrent transactions reached"));
        }
        let id = self.next_id;
        self.next_id += 1;
        self.active.insert(id, Transaction::new(id, now));
        Ok(id)
    }

    pub fn get_mut(&mut self, id: u64) -> TinyResult<&mut Transaction> {
        self.active
            .get_mut(&id)
            .ok_or_else(|| TinyDbError::not_found(format!("transaction {} not found", id)))
    }

    pub fn get(&self, id: u64) -> TinyResult<&Transaction> {
        self.active
            .get(&id)
            .ok_or_else(|| TinyDbError::not_found(format!("transaction {} not found", id)))
    }

    pub fn remove(&mut self, id: u64) -> Option<Transaction> {
        self.active.remove(&id)
    }

    /// Mark every transaction older than the configured timeout `Failed`
    /// and drop it from the active set. Returns the ids swept.
    pub fn sweep_timeouts(&mut self, now: u64) -> Vec<u64> {
        let timeout_ticks = self.timeout_ticks;
        let mut timed_out = Vec::new();
        self.active.retain(|&id, txn| {
            if now.saturating_sub(txn.start_ticks) > timeout_ticks {
                txn.state = TransactionState::Failed;
                timed_out.push(id);
                false
            } else {
                true
            }
        });
        timed_out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    /// An in-memory `TransactionalOps` double, enough to exercise
    /// commit/rollback without a real engine underneath.
    struct FakeStore {
        docs: HashMap<(String, String), bson::Document>,
    }

    impl FakeStore {
        fn new() -> Self {
            Self { docs: HashMap::new() }
        }
        fn key(collection: &str, id: &Bson) -> (String, String) {
            (collection.to_string(), format!("{:?}", id))
        }
    }

    impl TransactionalOps for FakeStore {
        fn apply_insert(&mut self, collection: &str, doc: bson::Document) -> TinyResult<Bson> {
            let id = doc.get("_id").cloned().unwrap_or(Bson::Null);
            let key = Self::key(collection, &id);
            if self.docs.contains_key(&key) {
                return Err(TinyDbError::duplicate_key("id already exists"));
            }
            self.docs.insert(key, doc);
            Ok(id)
        }
        fn apply_update(&mut self, collection: &str, doc: bson::Document) -> TinyResult<()> {
            let id = doc.get("_id").cloned().unwrap_or(Bson::Null);
            self.docs.insert(Self::key(collection, &id), doc);
            Ok(())
        }
        fn apply_delete(&mut self, collection: &str, doc_id: &Bson) -> TinyResult<()> {
            self.docs.remove(&Self::key(collection, doc_id));
            Ok(())
        }
        fn apply_create_index(&mut self, _c: &str, _n: &str, _f: Vec<String>, _u: bool) -> TinyResult<()> {
            Ok(())
        }
        fn apply_drop_index(&mut self, _c: &str, _n: &str) -> TinyResult<()> {
            Ok(())
        }
    }

    #[test]
    fn commit_applies_every_operation_in_order() {
        let mut store = FakeStore::new();
        let mut txn = Transaction::new(1, 0);
        txn.record_insert("orders", Bson::Int32(1), doc! {"_id": 1, "name": "a"}).unwrap();
        txn.commit(&mut store).unwrap();
        assert_eq!(txn.state, TransactionState::Committed);
        assert!(store.docs.contains_key(&("orders".into(), "Int32(1)".into())));
    }

    #[test]
    fn rollback_reverses_insert_update_and_delete() {
        let mut store = FakeStore::new();
        store.docs.insert(
            ("orders".into(), "Int32(2)".into()),
            doc! {"_id": 2, "name": "original"},
        );

        let mut txn = Transaction::new(1, 0);
        txn.record_insert("orders", Bson::Int32(1), doc! {"_id": 1, "name": "new"}).unwrap();
        txn.record_update(
            "orders",
            Bson::Int32(2),
            doc! {"_id": 2, "name": "original"},
            doc! {"_id": 2, "name": "changed"},
        )
        .unwrap();
        txn.record_delete("orders", Bson::Int32(2), doc! {"_id": 2, "name": "original"}).unwrap();

        // apply the forward effects directly so rollback has something to undo
        store.apply_insert("orders", doc! {"_id": 1, "name": "new"}).unwrap();
        store.apply_update("orders", doc! {"_id": 2, "name": "changed"}).unwrap();
        store.apply_delete("orders", &Bson::Int32(2)).unwrap();

        txn.rollback(&mut store).unwrap();
        assert_eq!(txn.state, TransactionState::RolledBack);
        assert!(!store.docs.contains_key(&("orders".into(), "Int32(1)".into())));
        let restored = store.docs.get(&("orders".into(), "Int32(2)".into())).unwrap();
        assert_eq!(restored.get_str("name").unwrap(), "original");
    }

    #[test]
    fn commit_rejects_duplicate_inserts_for_the_same_id() {
        let mut store = FakeStore::new();
        let mut txn = Transaction::new(1, 0);
        txn.record_insert("orders", Bson::Int32(1), doc! {"_id": 1}).unwrap();
        txn.record_insert("orders", Bson::Int32(1), doc! {"_id": 1}).unwrap();
        let err = txn.commit(&mut store);
        assert!(err.is_err());
        assert_eq!(txn.state, TransactionState::Active); // validation happens before any state change
    }

    #[test]
    fn savepoint_rollback_discards_only_operations_after_it() {
        let mut store = FakeStore::new();
        let mut txn = Transaction::new(1, 0);
        txn.record_insert("orders", Bson::Int32(1), doc! {"_id": 1}).unwrap();
        store.apply_insert("orders", doc! {"_id": 1}).unwrap();

        txn.create_savepoint("sp1").unwrap();

        txn.record_insert("orders", Bson::Int32(2), doc! {"_id": 2}).unwrap();
        store.apply_insert("orders", doc! {"_id": 2}).unwrap();

        txn.rollback_to_savepoint(&mut store, "sp1").unwrap();
        assert_eq!(txn.operation_count(), 1);
        assert!(store.docs.contains_key(&("orders".into(), "Int32(1)".into())));
        assert!(!store.docs.contains_key(&("orders".into(), "Int32(2)".into())));
    }

    #[test]
    fn overlay_merges_inserts_updates_and_deletes_by_id() {
        let mut txn = Transaction::new(1, 0);
        txn.record_insert("orders", Bson::Int32(3), doc! {"_id": 3, "name": "fresh"}).unwrap();
        txn.record_delete("orders", Bson::Int32(1), doc! {"_id": 1}).unwrap();

        let base = vec![doc! {"_id": 1, "name": "old"}, doc! {"_id": 2, "name": "kept"}];
        let merged = txn.overlay("orders", base);
        let ids: Vec<_> = merged.iter().map(|d| d.get("_id").cloned().unwrap()).collect();
        assert!(!ids.contains(&Bson::Int32(1)));
        assert!(ids.contains(&Bson::Int32(2)));
        assert!(ids.contains(&Bson::Int32(3)));
    }

    #[test]
    fn sweep_timeouts_fails_and_removes_aged_transactions() {
        let mut mgr = TransactionManager::new(10, 100);
        let id = mgr.begin(0).unwrap();
        let swept = mgr.sweep_timeouts(50);
        assert!(swept.is_empty());
        assert!(mgr.get_mut(id).is_ok());

        let swept = mgr.sweep_timeouts(200);
        assert_eq!(swept, vec![id]);
        assert!(mgr.get_mut(id).is_err());
    }
}
