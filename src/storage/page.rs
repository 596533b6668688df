use super::page_header::{PageHeader, FULL_HEADER_SIZE};
use super::page_id::{PageId, PageType};
use bson::Document;

/// One fixed-size page: header plus payload, mirroring the teacher's
/// `RawPage`-style wrapper (grounded on the BSON-document-database sibling
/// example's `RawPage`) but owning a typed `PageHeader` instead of raw
/// bytes at fixed offsets.
#[derive(Debug, Clone)]
pub struct Page {
    pub header: PageHeader,
    pub payload: Vec<u8>,
    dirty: bool,
    /// Parsed-document view cache for Data pages (§9 "Page cache
    /// parsed-view cache" note): invalidated on every payload mutation.
    parsed_cache: Option<Vec<Document>>,
}

impl Page {
    pub fn payload_size(page_size: u32) -> usize {
        page_size as usize - FULL_HEADER_SIZE
    }

    /// Maximum document size that still fits inline in a Data page slot
    /// (§3 "A document larger than `P − 41 − 4` bytes becomes a large
    /// document", adjusted for the 49-byte header this implementation
    /// actually uses — see SPEC_FULL.md §6 ambient-stack note).
    pub fn max_inline_doc_size(page_size: u32) -> usize {
        Self::payload_size(page_size) - 4
    }

    pub fn new_zeroed(page_type: PageType, page_id: PageId, page_size: u32, now: u64) -> Self {
        let mut header = PageHeader::new(page_type, page_id, now);
        header.free_bytes = Self::payload_size(page_size) as u16;
        header.stamp_crc();
        Self {
            header,
            payload: vec![0u8; Self::payload_size(page_size)],
            dirty: true,
            parsed_cache: None,
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> crate::error::TinyResult<Self> {
        let header = PageHeader::decode(bytes)?;
        let payload = bytes[FULL_HEADER_SIZE..].to_vec();
        Ok(Self {
            header,
            payload,
            dirty: false,
            parsed_cache: None,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(FULL_HEADER_SIZE + self.payload.len());
        buf.extend_from_slice(&self.header.encode());
        buf.extend_from_slice(&self.payload);
        buf
    }

    pub fn page_id(&self) -> PageId {
        self.header.page_id
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    /// Call after any mutation of `payload`'s slot area: bumps version,
    /// stamps the LSN, recomputes the CRC, and drops the parsed-document
    /// cache.
    pub fn touch(&mut self, now: u64, lsn: u64) {
        self.header.touch(now, lsn);
        self.dirty = true;
        self.parsed_cache = None;
    }

    pub fn invalidate_parsed_cache(&mut self) {
        self.parsed_cache = None;
    }

    pub fn parsed_cache(&self) -> Option<&[Document]> {
        self.parsed_cache.as_deref()
    }

    pub fn set_parsed_cache(&mut self, docs: Vec<Document>) {
        self.parsed_cache = Some(docs);
    }
}
