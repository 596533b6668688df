//! Per-collection named-index registry and document-level index
//! maintenance (C13).
//!
//! Grounded on `catalog.rs`'s chain-of-metadata convention for the
//! on-disk shape (`IndexMeta`) and on the teacher's per-table index set in
//! spirit only, since the teacher keeps a single implicit primary-key
//! B+tree rather than a named secondary-index registry.

use bson::Bson;

use crate::btree::{extract_key, BTreeIndex};
use crate::error::{TinyDbError, TinyResult};
use crate::storage::database_header::DatabaseHeader;
use crate::storage::disk_file::DiskFile;
use crate::storage::page_cache::PageCache;

/// Prefix-match weight in `getBestIndex`'s score (§4.6). Each matched
/// leading field counts for this many points.
const PREFIX_MATCH_WEIGHT: u32 = 10;
/// Flat bonus added for a unique index, so a unique index with an equal
/// prefix match beats a non-unique one.
const UNIQUE_BONUS: u32 = 1;

pub struct NamedIndex {
    pub name: String,
    pub fields: Vec<String>,
    pub index: BTreeIndex,
}

/// The set of secondary indexes defined on one collection.
pub struct IndexManager {
    indexes: Vec<NamedIndex>,
}

impl IndexManager {
    pub fn new() -> Self {
        Self { indexes: Vec::new() }
    }

    pub fn from_indexes(indexes: Vec<NamedIndex>) -> Self {
        Self { indexes }
    }

    pub fn list(&self) -> &[NamedIndex] {
        &self.indexes
    }

    pub fn find(&self, name: &str) -> Option<&NamedIndex> {
        self.indexes.iter().find(|i| i.name == name)
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut NamedIndex> {
        self.indexes.iter_mut().find(|i| i.name == name)
    }

    /// Create an index, or confirm that one with the same name already has
    /// the same shape (idempotent). Same name with a different field list
    /// or uniqueness is an error (§4.6).
    pub fn create_index(
        &mut self,
        header: &mut DatabaseHeader,
        cache: &mut PageCache,
        disk: &DiskFile,
        now: u64,
        name: &str,
        fields: Vec<String>,
        unique: bool,
        max_keys: usize,
    ) -> TinyResult<()> {
        if let Some(existing) = self.find(name) {
            if existing.fields == fields && existing.index.unique == unique {
                return Ok(());
            }
            return Err(TinyDbError::invalid_argument(format!(
                "index '{}' already exists with a different shape",
                name
            )));
        }
        let index = BTreeIndex::create(header, cache, disk, now, fields.len(), unique, max_keys)?;
        self.indexes.push(NamedIndex { name: name.to_string(), fields, index });
        Ok(())
    }

    /// Drop an index, freeing every page it owned.
    pub fn drop_index(
        &mut self,
        header: &mut DatabaseHeader,
        cache: &mut PageCache,
        now: u64,
        name: &str,
    ) -> TinyResult<()> {
        let pos = self
            .indexes
            .iter()
            .position(|i| i.name == name)
            .ok_or_else(|| TinyDbError::not_found(format!("index '{}' not found", name)))?;
        let removed = self.indexes.remove(pos);
        removed.index.drop_all(header, cache, now)
    }

    /// Insert `doc_id`'s key into every index. On a failure partway
    /// through, the indexes already updated in this call are rolled back
    /// and the error is propagated (§4.6 "rolls back earlier indexes").
    pub fn on_insert(
        &mut self,
        header: &mut DatabaseHeader,
        cache: &mut PageCache,
        disk: &DiskFile,
        now: u64,
        doc: &bson::Document,
        doc_id: &Bson,
    ) -> TinyResult<()> {
        let mut applied = Vec::with_capacity(self.indexes.len());
        for named in self.indexes.iter_mut() {
            let key = extract_key(doc, &named.fields);
            match named.index.insert(header, cache, disk, now, key.clone(), doc_id.clone()) {
                Ok(()) => applied.push(key),
                Err(e) => {
                    for (named_done, key_done) in self.indexes.iter_mut().zip(applied.iter()).take(applied.len()) {
                        let _ = named_done.index.delete(header, cache, disk, now, key_done, doc_id);
                    }
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Remove `doc_id`'s key from every index.
    pub fn on_delete(
        &mut self,
        header: &mut DatabaseHeader,
        cache: &mut PageCache,
        disk: &DiskFile,
        now: u64,
        doc: &bson::Document,
        doc_id: &Bson,
    ) -> TinyResult<()> {
        for named in self.indexes.iter_mut() {
            let key = extract_key(doc, &named.fields);
            named.index.delete(header, cache, disk, now, &key, doc_id)?;
        }
        Ok(())
    }

    /// Move `doc_id` from its key under `old_doc` to its key under
    /// `new_doc` in every index. If inserting the new key fails (a unique
    /// violation), the old key is reinstated in every index already
    /// updated in this call, and in the failing index itself, before the
    /// error is returned (§4.6 "rolls back the old-key removal").
    pub fn on_update(
        &mut self,
        header: &mut DatabaseHeader,
        cache: &mut PageCache,
        disk: &DiskFile,
        now: u64,
        old_doc: &bson::Document,
        new_doc: &bson::Document,
        doc_id: &Bson,
    ) -> TinyResult<()> {
        let mut applied = Vec::with_capacity(self.indexes.len());
        for named in self.indexes.iter_mut() {
            let old_key = extract_key(old_doc, &named.fields);
            let new_key = extract_key(new_doc, &named.fields);
            named.index.delete(header, cache, disk, now, &old_key, doc_id)?;
            match named.index.insert(header, cache, disk, now, new_key.clone(), doc_id.clone()) {
                Ok(()) => applied.push(old_key),
                Err(e) => {
                    let _ = named.index.insert(header, cache, disk, now, old_key, doc_id.clone());
                    for (named_done, old_key_done) in self.indexes.iter_mut().zip(applied.iter()).take(applied.len())
                    {
                        let new_key_done = extract_key(new_doc, &named_done.fields);
                        let _ = named_done.index.delete(header, cache, disk, now, &new_key_done, doc_id);
                        let _ = named_done.index.insert(header, cache, disk, now, old_key_done.clone(), doc_id.clone());
                    }
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    fn prefix_match_len(index_fields: &[String], query_fields: &[String]) -> usize {
        index_fields
            .iter()
            .zip(query_fields.iter())
            .take_while(|(a, b)| a == b)
            .count()
    }

    /// The index best suited to a query over `fields`, scored by prefix
    /// match length times a weight plus a uniqueness bonus; ties favor
    /// whichever index was defined first (§4.6 "getBestIndex").
    pub fn get_best_index(&self, fields: &[String]) -> Option<&NamedIndex> {
        let mut best: Option<(&NamedIndex, u32)> = None;
        for named in &self.indexes {
            let prefix = Self::prefix_match_len(&named.fields, fields);
            if prefix == 0 {
                continue;
            }
            let score = prefix as u32 * PREFIX_MATCH_WEIGHT + if named.index.unique { UNIQUE_BONUS } else { 0 };
            match &best {
                Some((_, best_score)) if *best_score >= score => {}
                _ => best = Some((named, score)),
            }
        }
        best.map(|(n, _)| n)
    }
}

impl Default for IndexManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::disk_file::DiskFile;
    use bson::doc;
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
    fn create_index_is_idempotent_for_the_same_shape() {
        let (mut header, mut cache, disk) = setup(1024);
        let mut mgr = IndexManager::new();
        mgr.create_index(&mut header, &mut cache, &disk, 1, "by_sku", vec!["sku".into()], false, 4)
            .unwrap();
        mgr.create_index(&mut header, &mut cache, &disk, 1, "by_sku", vec!["sku".into()], false, 4)
            .unwrap();
        assert_eq!(mgr.list().len(), 1);

        let err = mgr.create_index(&mut header, &mut cache, &disk, 1, "by_sku", vec!["region".into()], false, 4);
        assert!(err.is_err());
    }

    #[test]
    fn insert_maintains_every_index_and_rolls_back_on_unique_violation() {
        let (mut header, mut cache, disk) = setup(1024);
        let mut mgr = IndexManager::new();
        mgr.create_index(&mut header, &mut cache, &disk, 1, "by_sku", vec!["sku".into()], true, 4)
            .unwrap();

        let doc1 = doc! { "_id": 1, "sku": "abc" };
        mgr.on_insert(&mut header, &mut cache, &disk, 1, &doc1, &Bson::Int32(1)).unwrap();

        let doc2 = doc! { "_id": 2, "sku": "abc" };
        let err = mgr.on_insert(&mut header, &mut cache, &disk, 1, &doc2, &Bson::Int32(2));
        assert!(err.is_err());

        let idx = mgr.find("by_sku").unwrap();
        let found = idx.index.find(&mut cache, &extract_key(&doc1, &["sku".to_string()])).unwrap();
        assert_eq!(found, vec![Bson::Int32(1)]);
    }

    #[test]
    fn get_best_index_prefers_longer_prefix_match() {
        let (mut header, mut cache, disk) = setup(1024);
        let mut mgr = IndexManager::new();
        mgr.create_index(&mut header, &mut cache, &disk, 1, "by_region", vec!["region".into()], false, 4)
            .unwrap();
        mgr.create_index(
            &mut header,
            &mut cache,
            &disk,
            1,
            "by_region_sku",
            vec!["region".into(), "sku".into()],
            false,
            4,
        )
        .unwrap();

        let best = mgr.get_best_index(&["region".to_string(), "sku".to_string()]).unwrap();
        assert_eq!(best.name, "by_region_sku");
    }

    #[test]
    fn update_moves_the_key_and_is_reversible_on_failure() {
        let (mut header, mut cache, disk) = setup(1024);
        let mut mgr = IndexManager::new();
        mgr.create_index(&mut header, &mut cache, &disk, 1, "by_sku", vec!["sku".into()], true, 4)
            .unwrap();

        let old1 = doc! { "_id": 1, "sku": "a" };
        mgr.on_insert(&mut header, &mut cache, &disk, 1, &old1, &Bson::Int32(1)).unwrap();
        let old2 = doc! { "_id": 2, "sku": "b" };
        mgr.on_insert(&mut header, &mut cache, &disk, 1, &old2, &Bson::Int32(2)).unwrap();

        // moving doc 2's sku to "a" collides with doc 1 and must roll back.
        let new2 = doc! { "_id": 2, "sku": "a" };
        let err = mgr.on_update(&mut header, &mut cache, &disk, 1, &old2, &new2, &Bson::Int32(2));
        assert!(err.is_err());

        let idx = mgr.find("by_sku").unwrap();
        let found_b = idx.index.find(&mut cache, &extract_key(&old2, &["sku".to_string()])).unwrap();
        assert_eq!(found_b, vec![Bson::Int32(2)]);
    }
}
