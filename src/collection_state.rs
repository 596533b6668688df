//! Per-collection runtime state (C10): the primary-key map, the set of
//! owned Data pages, and the current-append-page hint.
//!
//! Grounded on the teacher's `HeapFile`/`BTreeFile` split between an
//! on-disk structure and an in-memory accessor that remembers "where did I
//! last see a free slot" — here that's `current_append_page`.

use std::collections::{BTreeSet, HashMap};

use bson::Bson;

use crate::data_page::DataPageAccess;
use crate::error::TinyResult;
use crate::storage::page_cache::PageCache;
use crate::storage::page_id::{PageId, PageType, NO_PAGE};

pub struct CollectionState {
    pub name: String,
    owned_pages: BTreeSet<PageId>,
    primary_key_map: HashMap<Bson, PageId>,
    current_append_page: Option<PageId>,
}

impl CollectionState {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            owned_pages: BTreeSet::new(),
            primary_key_map: HashMap::new(),
            current_append_page: None,
        }
    }

    pub fn owned_pages(&self) -> impl Iterator<Item = PageId> + '_ {
        self.owned_pages.iter().copied()
    }

    pub fn owned_page_count(&self) -> usize {
        self.owned_pages.len()
    }

    pub fn page_for_id(&self, id: &Bson) -> Option<PageId> {
        self.primary_key_map.get(id).copied()
    }

    pub fn append_hint(&self) -> Option<PageId> {
        self.current_append_page
    }

    pub fn set_append_hint(&mut self, page: Option<PageId>) {
        self.current_append_page = page;
    }

    pub fn record_page(&mut self, page: PageId) {
        self.owned_pages.insert(page);
    }

    pub fn record_id(&mut self, id: Bson, page: PageId) {
        self.primary_key_map.insert(id, page);
        self.owned_pages.insert(page);
    }

    pub fn forget_id(&mut self, id: &Bson) {
        self.primary_key_map.remove(id);
    }

    /// Drop a page that has become empty: evict it from owned pages, the
    /// pk map, and clear the append hint if it pointed here (§4.4
    /// "Delete").
    pub fn forget_page(&mut self, page: PageId) {
        self.owned_pages.remove(&page);
        self.primary_key_map.retain(|_, p| *p != page);
        if self.current_append_page == Some(page) {
            self.current_append_page = None;
        }
    }

    /// Rebuild the primary-key map and owned-page set from scratch by
    /// scanning every Data page in the file whose first slot's
    /// `_collection` field names this collection (§4.4 "On open").
    pub fn rebuild(&mut self, cache: &mut PageCache, total_pages: u32) -> TinyResult<()> {
        self.owned_pages.clear();
        self.primary_key_map.clear();
        self.current_append_page = None;

        for page_id in 1..=total_pages {
            let page = match cache.fetch(page_id) {
                Ok(p) => p,
                Err(_) => continue,
            };
            if page.header.page_type != PageType::Data {
                continue;
            }
            let slots = match DataPageAccess::scan_documents(page) {
                Ok(s) => s,
                Err(_) => continue,
            };
            if slots.is_empty() {
                continue;
            }
            let first = bson::Document::from_reader(&mut std::io::Cursor::new(slots[0]));
            let belongs = match &first {
                Ok(doc) => doc
                    .get("_collection")
                    .and_then(Bson::as_str)
                    .map(|c| c == self.name)
                    .unwrap_or(false),
                Err(_) => false,
            };
            if !belongs {
                continue;
            }

            self.owned_pages.insert(page_id);
            for bytes in slots {
                if let Ok(doc) = bson::Document::from_reader(&mut std::io::Cursor::new(bytes)) {
                    if let Some(id) = doc.get("_id") {
                        self.primary_key_map.insert(id.clone(), page_id);
                    }
                }
            }
        }
        Ok(())
    }

    /// Whether `page` is still a candidate append target: known, owned,
    /// and above the low-water mark.
    pub fn is_viable_append_page(&self, cache: &PageCache, page: PageId) -> bool {
        if page == NO_PAGE || !self.owned_pages.contains(&page) {
            return false;
        }
        match cache.get(page) {
            Some(p) => !DataPageAccess::below_append_threshold(p),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forgetting_a_page_clears_its_ids_and_hint() {
        let mut state = CollectionState::new("orders");
        state.record_id(Bson::Int32(1), 5);
        state.record_id(Bson::Int32(2), 5);
        state.set_append_hint(Some(5));

        state.forget_page(5);
        assert_eq!(state.page_for_id(&Bson::Int32(1)), None);
        assert_eq!(state.page_for_id(&Bson::Int32(2)), None);
        assert_eq!(state.append_hint(), None);
        assert_eq!(state.owned_page_count(), 0);
    }
}
