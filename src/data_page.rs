//! Slotted-page layout for documents (C8).
//!
//! Grounded on the teacher's `BTreePageBuilder`/`RecordId` split between
//! "how many bytes are free" bookkeeping and slot iteration, but simplified
//! to the spec's actual layout: a Data page has no offset table, just a
//! packed run of length-prefixed document byte strings from offset 0 up to
//! `page_size - free_bytes`. Like `PageAllocator`, this is a stateless
//! facade over `Page` rather than an owning type.

use bson::Document;

use crate::error::{TinyDbError, TinyResult};
use crate::storage::page::Page;

/// Once a page's free space drops below this, the collection's append hint
/// is cleared and future inserts look for a new page (§4.4 "Thresholding").
pub const APPEND_HINT_LOW_WATER: usize = 4 + 64;

pub struct DataPageAccess;

impl DataPageAccess {
    fn used_bytes(page: &Page) -> usize {
        page.payload.len() - page.header.free_bytes as usize
    }

    /// Length-prefixed byte slices in slot order, without copying.
    pub fn scan_documents(page: &Page) -> TinyResult<Vec<&[u8]>> {
        let used = Self::used_bytes(page);
        let mut out = Vec::with_capacity(page.header.item_count as usize);
        let mut offset = 0usize;
        while offset < used {
            if offset + 4 > page.payload.len() {
                return Err(TinyDbError::corruption("data page slot length truncated"));
            }
            let len = u32::from_le_bytes(page.payload[offset..offset + 4].try_into().unwrap())
                as usize;
            let start = offset + 4;
            let end = start + len;
            if end > page.payload.len() {
                return Err(TinyDbError::corruption("data page slot overruns payload"));
            }
            out.push(&page.payload[start..end]);
            offset = end;
        }
        Ok(out)
    }

    /// Parsed documents, served from `page.parsed_cache` when present.
    pub fn read_documents(page: &mut Page) -> TinyResult<Vec<Document>> {
        if let Some(cached) = page.parsed_cache() {
            return Ok(cached.to_vec());
        }
        let docs = Self::scan_documents(page)?
            .into_iter()
            .map(|bytes| {
                Document::from_reader(&mut std::io::Cursor::new(bytes))
                    .map_err(|e| TinyDbError::corruption(format!("malformed document: {}", e)))
            })
            .collect::<TinyResult<Vec<_>>>()?;
        page.set_parsed_cache(docs.clone());
        Ok(docs)
    }

    pub fn free_bytes_needed(doc_bytes_len: usize) -> usize {
        doc_bytes_len + 4
    }

    pub fn has_room_for(page: &Page, doc_bytes_len: usize) -> bool {
        page.header.free_bytes as usize >= Self::free_bytes_needed(doc_bytes_len)
    }

    /// Whether the page has fallen below the append-hint low-water mark and
    /// should no longer be offered as a collection's `currentAppendPage`.
    pub fn below_append_threshold(page: &Page) -> bool {
        (page.header.free_bytes as usize) < APPEND_HINT_LOW_WATER
    }

    /// Append one document's bytes at the tail. Caller must have already
    /// checked `has_room_for`.
    pub fn append_document(page: &mut Page, doc_bytes: &[u8], now: u64, lsn: u64) -> TinyResult<()> {
        if !Self::has_room_for(page, doc_bytes.len()) {
            return Err(TinyDbError::too_large(
                "document does not fit in the remaining page space",
            ));
        }
        let offset = Self::used_bytes(page);
        let needed = Self::free_bytes_needed(doc_bytes.len());
        page.payload[offset..offset + 4].copy_from_slice(&(doc_bytes.len() as u32).to_le_bytes());
        page.payload[offset + 4..offset + 4 + doc_bytes.len()].copy_from_slice(doc_bytes);
        page.header.free_bytes -= needed as u16;
        page.header.item_count += 1;
        page.touch(now, lsn);
        Ok(())
    }

    /// Clear the slot area and re-append every document, preserving the
    /// page's prev/next links (§4.4 "rewritePage").
    pub fn rewrite_page(page: &mut Page, docs: &[Vec<u8>], now: u64, lsn: u64) -> TinyResult<()> {
        let capacity = page.payload.len();
        page.payload.iter_mut().for_each(|b| *b = 0);
        page.header.free_bytes = capacity as u16;
        page.header.item_count = 0;
        for doc_bytes in docs {
            Self::append_document(page, doc_bytes, now, lsn)?;
        }
        Ok(())
    }

    pub fn is_empty(page: &Page) -> bool {
        page.header.item_count == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::page_id::PageType;

    fn doc_bytes(id: i32) -> Vec<u8> {
        let doc = bson::doc! { "_id": id, "v": "x" };
        let mut buf = Vec::new();
        doc.to_writer(&mut buf).unwrap();
        buf
    }

    #[test]
    fn appends_and_scans_in_order() {
        let mut page = Page::new_zeroed(PageType::Data, 2, 512, 1);
        let a = doc_bytes(1);
        let b = doc_bytes(2);
        DataPageAccess::append_document(&mut page, &a, 1, 1).unwrap();
        DataPageAccess::append_document(&mut page, &b, 2, 2).unwrap();

        let slots = DataPageAccess::scan_documents(&page).unwrap();
        assert_eq!(slots, vec![a.as_slice(), b.as_slice()]);
        assert_eq!(page.header.item_count, 2);
    }

    #[test]
    fn rejects_append_past_capacity() {
        let mut page = Page::new_zeroed(PageType::Data, 2, 64, 1);
        let huge = vec![0u8; 200];
        assert!(DataPageAccess::append_document(&mut page, &huge, 1, 1).is_err());
    }

    #[test]
    fn rewrite_preserves_links_and_drops_removed_docs() {
        let mut page = Page::new_zeroed(PageType::Data, 2, 512, 1);
        page.header.prev_page_id = 7;
        page.header.next_page_id = 9;
        let a = doc_bytes(1);
        let b = doc_bytes(2);
        DataPageAccess::append_document(&mut page, &a, 1, 1).unwrap();
        DataPageAccess::append_document(&mut page, &b, 1, 1).unwrap();

        DataPageAccess::rewrite_page(&mut page, &[a.clone()], 2, 2).unwrap();
        assert_eq!(page.header.item_count, 1);
        assert_eq!(page.header.prev_page_id, 7);
        assert_eq!(page.header.next_page_id, 9);
        assert_eq!(DataPageAccess::scan_documents(&page).unwrap(), vec![a.as_slice()]);
    }
}
