//! The engine façade (C15): open/close, recovery on open, checkpoint,
//! compact, per-collection CRUD routing, transactions, and statistics.
//!
//! Every other module in this crate is a stateless facade over borrowed
//! `DatabaseHeader`/`PageCache`/`DiskFile` references (§9 "Global mutable
//! state"). `Engine` is the one place that actually owns them, and the one
//! place that acquires locks in the order §5 specifies: the engine-wide
//! `state` lock (header + cache, which are almost always mutated together)
//! before any per-collection lock.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use bson::{doc, oid::ObjectId, Bson, Document};

use crate::btree::{extract_key, BTreeIndex, DEFAULT_MAX_KEYS};
use crate::catalog::{CollectionCatalog, CollectionMeta, IndexCatalog, IndexMeta};
use crate::collection_state::CollectionState;
use crate::config::EngineOptions;
use crate::data_page::DataPageAccess;
use crate::error::{TinyDbError, TinyResult};
use crate::flush_scheduler::{ensure_durability, FlushScheduler};
use crate::index_manager::{IndexManager, NamedIndex};
use crate::large_doc::LargeDocStore;
use crate::schema::{NoopValidator, SchemaValidator};
use crate::stats::Statistics;
use crate::storage::{
    DatabaseHeader, DiskFile, Page, PageCache, PageId, PageType, HEADER_PAGE_ID, NO_PAGE,
};
use crate::storage::allocator::PageAllocator;
use crate::transaction::{Transaction, TransactionManager, TransactionalOps};
use crate::wal::Wal;

const COLLECTION_FIELD: &str = "_collection";
const OVERFLOW_ROOT_FIELD: &str = "_overflowRoot";

fn now_ticks() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn encode_doc(doc: &Document) -> TinyResult<Vec<u8>> {
    let mut buf = Vec::new();
    doc.to_writer(&mut buf)
        .map_err(|e| TinyDbError::corruption(format!("failed to serialize document: {}", e)))?;
    Ok(buf)
}

fn decode_doc(bytes: &[u8]) -> TinyResult<Document> {
    Document::from_reader(&mut std::io::Cursor::new(bytes))
        .map_err(|e| TinyDbError::corruption(format!("malformed document: {}", e)))
}

fn overflow_root(doc: &Document) -> Option<PageId> {
    doc.get(OVERFLOW_ROOT_FIELD).and_then(Bson::as_i64).map(|v| v as PageId)
}

fn make_stub(id: &Bson, collection: &str, root: PageId) -> Document {
    doc! {
        "_id": id.clone(),
        COLLECTION_FIELD: collection,
        OVERFLOW_ROOT_FIELD: Bson::Int64(root as i64),
    }
}

/// Read the real document behind a slot, following the overflow chain if
/// the slot is an indirection stub (§4.1 "Document").
fn materialize(cache: &mut PageCache, slot_doc: Document) -> TinyResult<Document> {
    match overflow_root(&slot_doc) {
        Some(root) => {
            let bytes = LargeDocStore::read(cache, root)?;
            decode_doc(&bytes)
        }
        None => Ok(slot_doc),
    }
}

struct EngineState {
    header: DatabaseHeader,
    cache: PageCache,
}

/// The indexes and page/PK bookkeeping for one collection (§4.4, §4.6).
/// Locked separately from, and always after, `EngineState` (§5).
struct CollectionRuntime {
    state: CollectionState,
    indexes: IndexManager,
}

/// An embedded, single-file BSON document database (§1-§2).
pub struct Engine {
    disk: Arc<DiskFile>,
    db_path: PathBuf,
    state: Arc<Mutex<EngineState>>,
    wal: Wal,
    flush_scheduler: FlushScheduler,
    options: EngineOptions,
    collections: Mutex<HashMap<String, Arc<Mutex<CollectionRuntime>>>>,
    transactions: Mutex<TransactionManager>,
    validator: Arc<dyn SchemaValidator>,
    wal_records_appended: AtomicU64,
    checkpoints_performed: AtomicU64,
    disposed: AtomicBool,
}

impl Engine {
    /// Open (creating if absent) a database file at `path` under `options`,
    /// replaying any unreplayed WAL records before returning (§4.2, §7).
    pub fn open<P: AsRef<Path>>(path: P, options: EngineOptions) -> TinyResult<Arc<Self>> {
        Self::open_with_validator(path, options, Arc::new(NoopValidator))
    }

    /// As `open`, but with an application-supplied schema validator (§1,
    /// out-of-scope collaborator wired in by the caller).
    pub fn open_with_validator<P: AsRef<Path>>(
        path: P,
        options: EngineOptions,
        validator: Arc<dyn SchemaValidator>,
    ) -> TinyResult<Arc<Self>> {
        options.validate()?;
        let path = path.as_ref().to_path_buf();
        let now = now_ticks();

        let disk = Arc::new(DiskFile::open(&path, options.page_size)?);
        let is_new = disk.total_pages()? == 0;
        let wal = Wal::open(options.wal_path(&path))?;
        let mut cache = PageCache::new(disk.clone(), options.cache_size.max(1));

        let header = if is_new {
            disk.extend_by_one_page()?;
            let header = DatabaseHeader::new(&options.database_name, options.page_size, options.enable_journaling, now)?;
            let mut page = Page::new_zeroed(PageType::Header, HEADER_PAGE_ID, options.page_size, now);
            let bytes = header.encode();
            if bytes.len() > page.payload.len() {
                return Err(TinyDbError::corruption("database header does not fit in one page"));
            }
            page.payload[..bytes.len()].copy_from_slice(&bytes);
            cache.insert(page);
            cache.flush_dirty()?;
            disk.fsync()?;
            header
        } else {
            if options.enable_journaling {
                wal.replay(&disk, &mut cache)?;
            }
            let bytes = cache.fetch(HEADER_PAGE_ID)?.payload.clone();
            DatabaseHeader::decode(&bytes)?
        };

        let shared_state = Arc::new(Mutex::new(EngineState { header, cache }));
        let background_state = shared_state.clone();
        let flush_scheduler = FlushScheduler::start(options.background_flush_interval, move || {
            background_state.lock().unwrap().cache.flush_dirty()
        });

        let timeout_ticks = options.transaction_timeout.as_millis() as u64;
        let transactions = TransactionManager::new(options.max_transactions, timeout_ticks);

        Ok(Arc::new(Self {
            disk,
            db_path: path,
            state: shared_state,
            wal,
            flush_scheduler,
            options,
            collections: Mutex::new(HashMap::new()),
            transactions: Mutex::new(transactions),
            validator,
            wal_records_appended: AtomicU64::new(0),
            checkpoints_performed: AtomicU64::new(0),
            disposed: AtomicBool::new(false),
        }))
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn ensure_open(&self) -> TinyResult<()> {
        if self.disposed.load(Ordering::SeqCst) {
            Err(TinyDbError::Disposed)
        } else {
            Ok(())
        }
    }

    /// Reserve an LSN for, and stamp, every currently dirty page, then
    /// append its after-image to the WAL (§4.2). The LSN is assigned here
    /// rather than inside `Wal::append` so the page's own header and the
    /// WAL record that durably covers it agree on the same value.
    fn log_dirty_pages(&self, cache: &mut PageCache) -> TinyResult<()> {
        let mut ids = cache.dirty_page_ids();
        ids.sort_unstable();
        for id in ids {
            let lsn = self.wal.reserve_lsn();
            let page = cache.get_mut(id).unwrap();
            page.header.lsn = lsn;
            page.header.stamp_crc();
            let bytes = page.to_bytes();
            self.wal.append_reserved(lsn, id, bytes);
            self.wal_records_appended.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    fn sync_header_into_cache(&self, state: &mut EngineState, now: u64) -> TinyResult<()> {
        state.header.modified_ticks = now;
        let bytes = state.header.encode();
        let page = state.cache.fetch(HEADER_PAGE_ID)?;
        if bytes.len() > page.payload.len() {
            return Err(TinyDbError::corruption("database header does not fit in one page"));
        }
        page.payload[..bytes.len()].copy_from_slice(&bytes);
        for b in &mut page.payload[bytes.len()..] {
            *b = 0;
        }
        let lsn = page.header.lsn;
        page.touch(now, lsn);
        Ok(())
    }

    /// Log every dirty page (if journaling is on) and honor the configured
    /// write concern. Called at the end of every mutating operation.
    fn log_and_durable(&self, state: &mut EngineState) -> TinyResult<()> {
        if self.options.enable_journaling {
            self.log_dirty_pages(&mut state.cache)?;
        }
        ensure_durability(
            self.options.write_concern,
            &self.wal,
            || state.cache.flush_dirty(),
            || self.disk.fsync(),
        )
    }

    /// Append `bytes` as a new document slot, reusing the collection's
    /// append hint when it still has room, else allocating a fresh Data
    /// page (§4.4 "Insert").
    fn place_document_bytes(
        &self,
        state: &mut EngineState,
        rt: &mut CollectionRuntime,
        now: u64,
        bytes: &[u8],
    ) -> TinyResult<PageId> {
        let candidate = rt.state.append_hint().filter(|&p| rt.state.is_viable_append_page(&state.cache, p));
        let page_id = match candidate {
            Some(p) if DataPageAccess::has_room_for(state.cache.get(p).unwrap(), bytes.len()) => p,
            _ => {
                let new_id = PageAllocator::new_page(&mut state.header, &mut state.cache, &self.disk, PageType::Data, now)?;
                rt.state.record_page(new_id);
                new_id
            }
        };
        let page = state.cache.fetch(page_id)?;
        let lsn = page.header.lsn;
        DataPageAccess::append_document(page, bytes, now, lsn)?;
        if DataPageAccess::below_append_threshold(page) {
            rt.state.set_append_hint(None);
        } else {
            rt.state.set_append_hint(Some(page_id));
        }
        Ok(page_id)
    }

    fn remove_slot(cache: &mut PageCache, page_id: PageId, slot_bytes: &[u8], now: u64) -> TinyResult<()> {
        let page = cache.fetch(page_id)?;
        let remaining: Vec<Vec<u8>> = DataPageAccess::scan_documents(page)?
            .into_iter()
            .map(|s| s.to_vec())
            .filter(|s| s != slot_bytes)
            .collect();
        let lsn = page.header.lsn;
        DataPageAccess::rewrite_page(page, &remaining, now, lsn)
    }

    /// Find or build the runtime state for `name`, auto-creating the
    /// collection in the catalog on first use.
    fn collection_runtime(&self, name: &str) -> TinyResult<Arc<Mutex<CollectionRuntime>>> {
        {
            let map = self.collections.lock().unwrap();
            if let Some(rt) = map.get(name) {
                return Ok(rt.clone());
            }
        }

        let now = now_ticks();
        let mut state = self.state.lock().unwrap();

        if CollectionCatalog::find(&mut state.cache, &state.header, name)?.is_none() {
            CollectionCatalog::insert(
                &mut state.header,
                &mut state.cache,
                &self.disk,
                now,
                CollectionMeta { name: name.to_string(), created_ticks: now },
            )?;
            self.sync_header_into_cache(&mut state, now)?;
            self.log_and_durable(&mut state)?;
        }

        let total_pages = state.header.total_pages;
        let mut coll_state = CollectionState::new(name);
        coll_state.rebuild(&mut state.cache, total_pages)?;

        let index_metas = IndexCatalog::for_collection(&mut state.cache, &state.header, name)?;
        let mut named = Vec::with_capacity(index_metas.len());
        for meta in index_metas {
            let index = BTreeIndex::open(meta.root_page, meta.fields.len(), meta.unique, DEFAULT_MAX_KEYS);
            named.push(NamedIndex { name: meta.name, fields: meta.fields, index });
        }
        drop(state);

        let runtime = Arc::new(Mutex::new(CollectionRuntime {
            state: coll_state,
            indexes: IndexManager::from_indexes(named),
        }));
        let mut map = self.collections.lock().unwrap();
        Ok(map.entry(name.to_string()).or_insert(runtime).clone())
    }

    /// Open (creating on first use) a handle to the named collection (§6
    /// "getCollection").
    pub fn get_collection(self: &Arc<Self>, name: &str) -> TinyResult<Collection> {
        self.ensure_open()?;
        self.collection_runtime(name)?;
        Ok(Collection { engine: self.clone(), name: name.to_string() })
    }

    /// Insert `doc`, assigning `_id` if absent. Overflows to a `LargeDoc`
    /// chain when the serialized document exceeds `maxInlineDocSize` (§4.4
    /// "Insert").
    pub fn insert(&self, collection: &str, mut doc: Document) -> TinyResult<Bson> {
        self.ensure_open()?;
        let id = doc.get("_id").cloned().unwrap_or_else(|| Bson::ObjectId(ObjectId::new()));
        doc.insert("_id", id.clone());
        doc.insert(COLLECTION_FIELD, collection);
        self.validator.validate(collection, &doc, self.options.schema_validation_mode)?;

        let now = now_ticks();
        let full_bytes = encode_doc(&doc)?;
        let max_inline = Page::max_inline_doc_size(self.options.page_size);

        let runtime = self.collection_runtime(collection)?;
        let mut state = self.state.lock().unwrap();
        let mut rt = runtime.lock().unwrap();

        let slot_bytes = if full_bytes.len() > max_inline {
            let root = LargeDocStore::write(&mut state.header, &mut state.cache, &self.disk, now, &full_bytes)?;
            encode_doc(&make_stub(&id, collection, root))?
        } else {
            full_bytes
        };

        let page_id = self.place_document_bytes(&mut state, &mut rt, now, &slot_bytes)?;
        rt.state.record_id(id.clone(), page_id);

        if let Err(e) = rt.indexes.on_insert(&mut state.header, &mut state.cache, &self.disk, now, &doc, &id) {
            let _ = Self::remove_slot(&mut state.cache, page_id, &slot_bytes, now);
            rt.state.forget_id(&id);
            return Err(e);
        }

        self.sync_header_into_cache(&mut state, now)?;
        self.log_and_durable(&mut state)?;
        Ok(id)
    }

    /// Locate `id` via the primary-key map and materialize its document
    /// (§4.4 "FindById").
    pub fn find_by_id(&self, collection: &str, id: &Bson) -> TinyResult<Option<Document>> {
        self.ensure_open()?;
        let runtime = self.collection_runtime(collection)?;
        let mut state = self.state.lock().unwrap();
        let page_id = {
            let rt = runtime.lock().unwrap();
            rt.state.page_for_id(id)
        };
        let page_id = match page_id {
            Some(p) => p,
            None => return Ok(None),
        };
        let page = state.cache.fetch(page_id)?;
        let stub = DataPageAccess::read_documents(page)?.into_iter().find(|d| d.get("_id") == Some(id));
        match stub {
            Some(doc) => Ok(Some(materialize(&mut state.cache, doc)?)),
            None => Ok(None),
        }
    }

    /// Every document owned by `collection`, in page-id order (§4.4
    /// "Scan").
    pub fn scan(&self, collection: &str) -> TinyResult<Vec<Document>> {
        self.ensure_open()?;
        let runtime = self.collection_runtime(collection)?;
        let mut state = self.state.lock().unwrap();
        let page_ids: Vec<PageId> = {
            let rt = runtime.lock().unwrap();
            rt.state.owned_pages().collect()
        };
        let mut out = Vec::new();
        for page_id in page_ids {
            let page = state.cache.fetch(page_id)?;
            let slots = DataPageAccess::read_documents(page)?;
            for slot in slots {
                out.push(materialize(&mut state.cache, slot)?);
            }
        }
        Ok(out)
    }

    /// Rewrite the document with `doc`'s `_id`, in place if it still fits
    /// in its current page, else by deleting the old slot and inserting a
    /// fresh one (§4.4 "Update"). Returns 0 if no such document exists.
    pub fn update(&self, collection: &str, mut doc: Document) -> TinyResult<u64> {
        self.ensure_open()?;
        let id = doc
            .get("_id")
            .cloned()
            .ok_or_else(|| TinyDbError::invalid_argument("update requires an _id field"))?;
        doc.insert(COLLECTION_FIELD, collection);
        self.validator.validate(collection, &doc, self.options.schema_validation_mode)?;

        let now = now_ticks();
        let runtime = self.collection_runtime(collection)?;
        let mut state = self.state.lock().unwrap();
        let mut rt = runtime.lock().unwrap();

        let page_id = match rt.state.page_for_id(&id) {
            Some(p) => p,
            None => return Ok(0),
        };

        let old_stub = {
            let page = state.cache.fetch(page_id)?;
            DataPageAccess::read_documents(page)?.into_iter().find(|d| d.get("_id") == Some(&id))
        };
        let old_stub = match old_stub {
            Some(s) => s,
            None => return Ok(0),
        };
        let old_full = materialize(&mut state.cache, old_stub.clone())?;
        let old_slot_bytes = encode_doc(&old_stub)?;
        let old_overflow_root = overflow_root(&old_stub);

        let new_bytes = encode_doc(&doc)?;
        let max_inline = Page::max_inline_doc_size(self.options.page_size);

        let new_slot_bytes = if new_bytes.len() > max_inline {
            let root = match old_overflow_root {
                Some(existing) => LargeDocStore::rewrite(&mut state.header, &mut state.cache, &self.disk, now, existing, &new_bytes)?,
                None => LargeDocStore::write(&mut state.header, &mut state.cache, &self.disk, now, &new_bytes)?,
            };
            encode_doc(&make_stub(&id, collection, root))?
        } else {
            if let Some(existing) = old_overflow_root {
                LargeDocStore::free_chain(&mut state.header, &mut state.cache, existing, now)?;
            }
            new_bytes
        };

        let existing_slots: Vec<Vec<u8>> = {
            let page = state.cache.fetch(page_id)?;
            DataPageAccess::scan_documents(page)?.into_iter().map(|s| s.to_vec()).collect()
        };
        let mut replaced = false;
        let mut candidate_list = Vec::with_capacity(existing_slots.len());
        for slot in &existing_slots {
            if !replaced && *slot == old_slot_bytes {
                candidate_list.push(new_slot_bytes.clone());
                replaced = true;
            } else {
                candidate_list.push(slot.clone());
            }
        }
        let capacity = state.cache.get(page_id).unwrap().payload.len();
        let total_needed: usize = candidate_list.iter().map(|b| b.len() + 4).sum();

        let final_page_id = if total_needed <= capacity {
            let page = state.cache.fetch(page_id)?;
            let lsn = page.header.lsn;
            DataPageAccess::rewrite_page(page, &candidate_list, now, lsn)?;
            page_id
        } else {
            let remaining: Vec<Vec<u8>> = existing_slots.into_iter().filter(|s| *s != old_slot_bytes).collect();
            if remaining.is_empty() {
                PageAllocator::free_page(&mut state.header, &mut state.cache, page_id, now)?;
                rt.state.forget_page(page_id);
            } else {
                let page = state.cache.fetch(page_id)?;
                let lsn = page.header.lsn;
                DataPageAccess::rewrite_page(page, &remaining, now, lsn)?;
            }
            self.place_document_bytes(&mut state, &mut rt, now, &new_slot_bytes)?
        };
        rt.state.record_id(id.clone(), final_page_id);

        rt.indexes.on_update(&mut state.header, &mut state.cache, &self.disk, now, &old_full, &doc, &id)?;

        self.sync_header_into_cache(&mut state, now)?;
        self.log_and_durable(&mut state)?;
        Ok(1)
    }

    /// Remove the document `id`, freeing its page if it becomes empty and
    /// any overflow chain it held (§4.4 "Delete"). Returns 0 if no such
    /// document exists.
    pub fn delete(&self, collection: &str, id: &Bson) -> TinyResult<u64> {
        self.ensure_open()?;
        let now = now_ticks();
        let runtime = self.collection_runtime(collection)?;
        let mut state = self.state.lock().unwrap();
        let mut rt = runtime.lock().unwrap();

        let page_id = match rt.state.page_for_id(id) {
            Some(p) => p,
            None => return Ok(0),
        };

        let stub = {
            let page = state.cache.fetch(page_id)?;
            DataPageAccess::read_documents(page)?.into_iter().find(|d| d.get("_id") == Some(id))
        };
        let stub = match stub {
            Some(s) => s,
            None => return Ok(0),
        };
        let full_doc = materialize(&mut state.cache, stub.clone())?;

        if let Some(root) = overflow_root(&stub) {
            LargeDocStore::free_chain(&mut state.header, &mut state.cache, root, now)?;
        }

        let slot_bytes = encode_doc(&stub)?;
        let remaining: Vec<Vec<u8>> = {
            let page = state.cache.fetch(page_id)?;
            DataPageAccess::scan_documents(page)?.into_iter().map(|s| s.to_vec()).filter(|s| *s != slot_bytes).collect()
        };

        if remaining.is_empty() {
            PageAllocator::free_page(&mut state.header, &mut state.cache, page_id, now)?;
            rt.state.forget_page(page_id);
        } else {
            let page = state.cache.fetch(page_id)?;
            let lsn = page.header.lsn;
            DataPageAccess::rewrite_page(page, &remaining, now, lsn)?;
        }
        rt.state.forget_id(id);

        rt.indexes.on_delete(&mut state.header, &mut state.cache, &self.disk, now, &full_doc, id)?;

        self.sync_header_into_cache(&mut state, now)?;
        self.log_and_durable(&mut state)?;
        Ok(1)
    }

    /// Create `name` over `fields`, or confirm one with that name already
    /// has the same shape (§4.6). Existing documents are backfilled.
    /// Returns `true` if a new index was created.
    pub fn ensure_index(&self, collection: &str, name: &str, fields: Vec<String>, unique: bool) -> TinyResult<bool> {
        self.ensure_open()?;
        let now = now_ticks();
        let runtime = self.collection_runtime(collection)?;
        let mut state = self.state.lock().unwrap();
        let mut rt = runtime.lock().unwrap();

        let already_exists = rt.indexes.find(name).is_some();
        rt.indexes.create_index(&mut state.header, &mut state.cache, &self.disk, now, name, fields.clone(), unique, DEFAULT_MAX_KEYS)?;

        if !already_exists {
            let root_page = rt.indexes.find(name).unwrap().index.root_page;
            IndexCatalog::insert(
                &mut state.header,
                &mut state.cache,
                &self.disk,
                now,
                IndexMeta { collection: collection.to_string(), name: name.to_string(), fields: fields.clone(), unique, root_page },
            )?;

            let page_ids: Vec<PageId> = rt.state.owned_pages().collect();
            for page_id in page_ids {
                let slots = {
                    let page = state.cache.fetch(page_id)?;
                    DataPageAccess::read_documents(page)?
                };
                for stub in slots {
                    let full = materialize(&mut state.cache, stub)?;
                    if let Some(doc_id) = full.get("_id").cloned() {
                        let key = extract_key(&full, &fields);
                        let named = rt.indexes.find_mut(name).unwrap();
                        named.index.insert(&mut state.header, &mut state.cache, &self.disk, now, key, doc_id)?;
                    }
                }
            }
        }

        self.sync_header_into_cache(&mut state, now)?;
        self.log_and_durable(&mut state)?;
        Ok(!already_exists)
    }

    /// Drop a named index, freeing every page it owned (§4.6).
    pub fn drop_index(&self, collection: &str, name: &str) -> TinyResult<()> {
        self.ensure_open()?;
        let now = now_ticks();
        let runtime = self.collection_runtime(collection)?;
        let mut state = self.state.lock().unwrap();
        let mut rt = runtime.lock().unwrap();

        rt.indexes.drop_index(&mut state.header, &mut state.cache, now, name)?;
        IndexCatalog::remove(&mut state.header, &mut state.cache, &self.disk, now, collection, name)?;

        self.sync_header_into_cache(&mut state, now)?;
        self.log_and_durable(&mut state)?;
        Ok(())
    }

    /// Begin a new transaction (§4.7).
    pub fn begin_transaction(self: &Arc<Self>) -> TinyResult<TransactionHandle> {
        self.ensure_open()?;
        let now = now_ticks();
        let id = self.transactions.lock().unwrap().begin(now)?;
        Ok(TransactionHandle { engine: self.clone(), id })
    }

    /// Flush every dirty page and force the data file to disk (§6
    /// "flush"), without journal truncation.
    pub fn flush(&self) -> TinyResult<()> {
        self.ensure_open()?;
        let mut state = self.state.lock().unwrap();
        state.cache.flush_dirty()?;
        self.disk.fsync()
    }

    /// Flush every dirty page, fsync the data file, and truncate the WAL
    /// (§4.2 "Checkpoint").
    pub fn checkpoint(&self) -> TinyResult<()> {
        self.ensure_open()?;
        let now = now_ticks();
        let mut state = self.state.lock().unwrap();
        self.sync_header_into_cache(&mut state, now)?;
        if self.options.enable_journaling {
            self.log_dirty_pages(&mut state.cache)?;
            self.wal.fsync()?;
        }
        state.cache.flush_dirty()?;
        self.disk.fsync()?;
        if self.options.enable_journaling {
            self.wal.truncate()?;
        }
        self.checkpoints_performed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Rewrite every collection's data pages densely and return freed
    /// pages to the allocator's free list (§6 "Supplemental features").
    pub fn compact(&self) -> TinyResult<()> {
        self.ensure_open()?;
        let names: Vec<String> = {
            let mut state = self.state.lock().unwrap();
            CollectionCatalog::list(&mut state.cache, &state.header)?.into_iter().map(|c| c.name).collect()
        };

        for name in names {
            let now = now_ticks();
            let runtime = self.collection_runtime(&name)?;
            let mut state = self.state.lock().unwrap();
            let mut rt = runtime.lock().unwrap();

            let page_ids: Vec<PageId> = rt.state.owned_pages().collect();
            let mut all_slots = Vec::new();
            for page_id in &page_ids {
                let page = state.cache.fetch(*page_id)?;
                all_slots.extend(DataPageAccess::scan_documents(page)?.into_iter().map(|s| s.to_vec()));
            }

            for page_id in &page_ids {
                PageAllocator::free_page(&mut state.header, &mut state.cache, *page_id, now)?;
            }
            rt.state.set_append_hint(None);
            for page_id in &page_ids {
                rt.state.forget_page(*page_id);
            }

            for slot in all_slots {
                let new_page = self.place_document_bytes(&mut state, &mut rt, now, &slot)?;
                if let Ok(stub) = decode_doc(&slot) {
                    if let Some(id) = stub.get("_id").cloned() {
                        rt.state.record_id(id, new_page);
                    }
                }
            }

            self.sync_header_into_cache(&mut state, now)?;
            self.log_and_durable(&mut state)?;
        }
        Ok(())
    }

    /// A point-in-time snapshot of cache, WAL, checkpoint, and background
    /// flush counters (§6 "Supplemental features").
    pub fn statistics(&self) -> TinyResult<Statistics> {
        self.ensure_open()?;
        let state = self.state.lock().unwrap();
        let cache_stats = state.cache.stats();
        let total_pages = state.header.total_pages;
        let used_pages = state.header.used_pages;
        drop(state);
        Ok(Statistics::from_parts(
            cache_stats,
            total_pages,
            used_pages,
            self.wal_records_appended.load(Ordering::Relaxed),
            self.checkpoints_performed.load(Ordering::Relaxed),
            &self.flush_scheduler.stats(),
        ))
    }

    /// Validate every B+tree index on `collection` (§6 "Supplemental
    /// features").
    pub fn validate_tree(&self, collection: &str) -> TinyResult<()> {
        self.ensure_open()?;
        let runtime = self.collection_runtime(collection)?;
        let mut state = self.state.lock().unwrap();
        let rt = runtime.lock().unwrap();
        for named in rt.indexes.list() {
            named.index.validate(&mut state.cache)?;
        }
        Ok(())
    }

    /// Checkpoint and stop the background flush thread. Idempotent.
    pub fn close(&self) -> TinyResult<()> {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.flush_scheduler.shutdown();
        let now = now_ticks();
        let mut state = self.state.lock().unwrap();
        self.sync_header_into_cache(&mut state, now)?;
        if self.options.enable_journaling {
            self.log_dirty_pages(&mut state.cache)?;
            self.wal.fsync()?;
        }
        state.cache.flush_dirty()?;
        self.disk.fsync()?;
        if self.options.enable_journaling {
            self.wal.truncate()?;
        }
        Ok(())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// A handle to one collection, scoping `Engine`'s CRUD methods to a name
/// (§6 "getCollection"). Cheap to clone: an `Arc` clone plus a name.
#[derive(Clone)]
pub struct Collection {
    engine: Arc<Engine>,
    name: String,
}

impl Collection {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn insert(&self, doc: Document) -> TinyResult<Bson> {
        self.engine.insert(&self.name, doc)
    }

    pub fn find_by_id(&self, id: &Bson) -> TinyResult<Option<Document>> {
        self.engine.find_by_id(&self.name, id)
    }

    pub fn update(&self, doc: Document) -> TinyResult<u64> {
        self.engine.update(&self.name, doc)
    }

    pub fn delete(&self, id: &Bson) -> TinyResult<u64> {
        self.engine.delete(&self.name, id)
    }

    pub fn scan(&self) -> TinyResult<Vec<Document>> {
        self.engine.scan(&self.name)
    }

    pub fn ensure_index(&self, name: &str, fields: Vec<String>, unique: bool) -> TinyResult<bool> {
        self.engine.ensure_index(&self.name, name, fields, unique)
    }

    pub fn drop_index(&self, name: &str) -> TinyResult<()> {
        self.engine.drop_index(&self.name, name)
    }

    pub fn validate_tree(&self) -> TinyResult<()> {
        self.engine.validate_tree(&self.name)
    }
}

/// Bridges `Transaction::commit`/`rollback` onto the engine's real,
/// non-transactional CRUD (§4.7): the seam `transaction.rs` was built
/// against.
struct EngineOpsAdapter<'a> {
    engine: &'a Engine,
}

impl<'a> TransactionalOps for EngineOpsAdapter<'a> {
    fn apply_insert(&mut self, collection: &str, doc: Document) -> TinyResult<Bson> {
        self.engine.insert(collection, doc)
    }

    fn apply_update(&mut self, collection: &str, doc: Document) -> TinyResult<()> {
        self.engine.update(collection, doc).map(|_| ())
    }

    fn apply_delete(&mut self, collection: &str, doc_id: &Bson) -> TinyResult<()> {
        self.engine.delete(collection, doc_id).map(|_| ())
    }

    fn apply_create_index(&mut self, collection: &str, name: &str, fields: Vec<String>, unique: bool) -> TinyResult<()> {
        self.engine.ensure_index(collection, name, fields, unique).map(|_| ())
    }

    fn apply_drop_index(&mut self, collection: &str, name: &str) -> TinyResult<()> {
        self.engine.drop_index(collection, name)
    }
}

/// A handle to one active transaction (§4.7). Reads go through the base
/// engine state overlaid with this transaction's own uncommitted log, so a
/// transaction sees its own writes.
pub struct TransactionHandle {
    engine: Arc<Engine>,
    id: u64,
}

impl TransactionHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn insert(&self, collection: &str, mut doc: Document) -> TinyResult<Bson> {
        let id = doc.get("_id").cloned().unwrap_or_else(|| Bson::ObjectId(ObjectId::new()));
        doc.insert("_id", id.clone());
        doc.insert(COLLECTION_FIELD, collection);
        let mut txns = self.engine.transactions.lock().unwrap();
        txns.get_mut(self.id)?.record_insert(collection, id.clone(), doc)?;
        Ok(id)
    }

    pub fn update(&self, collection: &str, doc: Document) -> TinyResult<()> {
        let id = doc
            .get("_id")
            .cloned()
            .ok_or_else(|| TinyDbError::invalid_argument("update requires an _id field"))?;
        let before = self
            .find_by_id(collection, &id)?
            .ok_or_else(|| TinyDbError::not_found("document not found"))?;
        let mut txns = self.engine.transactions.lock().unwrap();
        txns.get_mut(self.id)?.record_update(collection, id, before, doc)
    }

    pub fn delete(&self, collection: &str, id: &Bson) -> TinyResult<()> {
        let before = self
            .find_by_id(collection, id)?
            .ok_or_else(|| TinyDbError::not_found("document not found"))?;
        let mut txns = self.engine.transactions.lock().unwrap();
        txns.get_mut(self.id)?.record_delete(collection, id.clone(), before)
    }

    pub fn find_by_id(&self, collection: &str, id: &Bson) -> TinyResult<Option<Document>> {
        Ok(self.scan(collection)?.into_iter().find(|d| d.get("_id") == Some(id)))
    }

    pub fn scan(&self, collection: &str) -> TinyResult<Vec<Document>> {
        let base = self.engine.scan(collection)?;
        let txns = self.engine.transactions.lock().unwrap();
        let txn = txns.get(self.id)?;
        Ok(txn.overlay(collection, base))
    }

    pub fn create_savepoint(&self, name: &str) -> TinyResult<()> {
        let mut txns = self.engine.transactions.lock().unwrap();
        txns.get_mut(self.id)?.create_savepoint(name)
    }

    pub fn release_savepoint(&self, name: &str) -> TinyResult<()> {
        let mut txns = self.engine.transactions.lock().unwrap();
        txns.get_mut(self.id)?.release_savepoint(name)
    }

    pub fn rollback_to_savepoint(&self, name: &str) -> TinyResult<()> {
        let mut txns = self.engine.transactions.lock().unwrap();
        let txn = txns.get_mut(self.id)?;
        let mut adapter = EngineOpsAdapter { engine: &self.engine };
        txn.rollback_to_savepoint(&mut adapter, name)
    }

    pub fn commit(self) -> TinyResult<()> {
        let mut txns = self.engine.transactions.lock().unwrap();
        let mut txn = txns
            .remove(self.id)
            .ok_or_else(|| TinyDbError::not_found(format!("transaction {} not found", self.id)))?;
        drop(txns);
        let mut adapter = EngineOpsAdapter { engine: &self.engine };
        txn.commit(&mut adapter)
    }

    pub fn rollback(self) -> TinyResult<()> {
        let mut txns = self.engine.transactions.lock().unwrap();
        let mut txn = txns
            .remove(self.id)
            .ok_or_else(|| TinyDbError::not_found(format!("transaction {} not found", self.id)))?;
        drop(txns);
        let mut adapter = EngineOpsAdapter { engine: &self.engine };
        txn.rollback(&mut adapter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WriteConcern;
    use std::sync::Once;

    static INIT: Once = Once::new();

    fn setup() {
        INIT.call_once(crate::logging::init_log);
    }

    fn options(page_size: u32) -> EngineOptions {
        EngineOptions {
            page_size,
            cache_size: 64,
            background_flush_interval: std::time::Duration::ZERO,
            write_concern: WriteConcern::Synced,
            ..Default::default()
        }
    }

    #[test]
    fn insert_then_find_by_id_round_trips() {
        setup();
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::open(dir.path().join("t.db"), options(4096)).unwrap();
        let coll = engine.get_collection("orders").unwrap();
        let id = coll.insert(doc! {"sku": "abc"}).unwrap();
        let found = coll.find_by_id(&id).unwrap().unwrap();
        assert_eq!(found.get_str("sku").unwrap(), "abc");
    }

    #[test]
    fn update_in_place_and_delete_round_trip() {
        setup();
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::open(dir.path().join("t.db"), options(4096)).unwrap();
        let coll = engine.get_collection("orders").unwrap();
        let id = coll.insert(doc! {"qty": 1}).unwrap();

        let count = coll.update(doc! {"_id": id.clone(), "qty": 2}).unwrap();
        assert_eq!(count, 1);
        let found = coll.find_by_id(&id).unwrap().unwrap();
        assert_eq!(found.get_i32("qty").unwrap(), 2);

        let deleted = coll.delete(&id).unwrap();
        assert_eq!(deleted, 1);
        assert!(coll.find_by_id(&id).unwrap().is_none());
    }

    #[test]
    fn large_document_overflows_and_round_trips() {
        setup();
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::open(dir.path().join("t.db"), options(4096)).unwrap();
        let coll = engine.get_collection("blobs").unwrap();
        let big = "x".repeat(12000);
        let id = coll.insert(doc! {"payload": big.clone()}).unwrap();
        let found = coll.find_by_id(&id).unwrap().unwrap();
        assert_eq!(found.get_str("payload").unwrap(), big);
    }

    #[test]
    fn ensure_index_is_idempotent_and_backfills() {
        setup();
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::open(dir.path().join("t.db"), options(4096)).unwrap();
        let coll = engine.get_collection("orders").unwrap();
        coll.insert(doc! {"sku": "a"}).unwrap();

        let created = coll.ensure_index("by_sku", vec!["sku".to_string()], false).unwrap();
        assert!(created);
        let created_again = coll.ensure_index("by_sku", vec!["sku".to_string()], false).unwrap();
        assert!(!created_again);
        coll.validate_tree().unwrap();
    }

    #[test]
    fn transaction_rollback_restores_prior_state() {
        setup();
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::open(dir.path().join("t.db"), options(4096)).unwrap();
        let coll = engine.get_collection("orders").unwrap();
        let keep_id = coll.insert(doc! {"_id": 2, "name": "keep"}).unwrap();

        let txn = engine.begin_transaction().unwrap();
        txn.insert("orders", doc! {"_id": 1, "name": "new"}).unwrap();
        txn.delete("orders", &keep_id).unwrap();
        txn.rollback().unwrap();

        assert!(coll.find_by_id(&Bson::Int32(1)).unwrap().is_none());
        assert!(coll.find_by_id(&keep_id).unwrap().is_some());
    }

    #[test]
    fn reopening_after_close_preserves_data() {
        setup();
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("t.db");
        let id = {
            let engine = Engine::open(&db_path, options(4096)).unwrap();
            let coll = engine.get_collection("orders").unwrap();
            let id = coll.insert(doc! {"sku": "z"}).unwrap();
            engine.close().unwrap();
            id
        };

        let engine = Engine::open(&db_path, options(4096)).unwrap();
        let coll = engine.get_collection("orders").unwrap();
        let found = coll.find_by_id(&id).unwrap().unwrap();
        assert_eq!(found.get_str("sku").unwrap(), "z");
    }
}
