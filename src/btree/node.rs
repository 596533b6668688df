//! The on-disk B+tree node (C11).
//!
//! Grounded on the PoloDB sibling example's `BTreeNode`/`RawPage` split —
//! an in-memory node decoded from a page's bytes, mutated, then
//! re-encoded — generalized to the spec's own layout (§4.5 "Node on-disk
//! layout") and to a variable key arity for composite indexes. Keys and
//! leaf values are encoded as single-field BSON documents so the real
//! `bson` codec (not a hand-rolled tag scheme) handles the type-to-bytes
//! mapping for every `Bson` variant, including ones this module never
//! needs to reason about directly.
//!
//! A node's own sibling/parent pointers live inside the payload, per the
//! spec's layout; the page's generic `next_page_id` header field is
//! repurposed as the root of this node's private overflow chain (shared
//! machinery with `LargeDocStore`), freed and reallocated every time the
//! node is rewritten at a different size.

use std::io::Cursor;

use bson::{doc, Bson};

use super::key::IndexKey;
use crate::error::{TinyDbError, TinyResult};
use crate::large_doc::LargeDocStore;
use crate::storage::database_header::DatabaseHeader;
use crate::storage::disk_file::DiskFile;
use crate::storage::page_cache::PageCache;
use crate::storage::page_id::{PageId, NO_PAGE};

const NODE_FIXED_HEADER_LEN: usize = 1 + 4 + 4 + 4 + 4 + 4;

#[derive(Debug, Clone)]
pub struct BTreeNode {
    pub is_leaf: bool,
    pub parent_id: PageId,
    pub next_sibling_id: PageId,
    pub prev_sibling_id: PageId,
    /// Authoritative only on the root; zero elsewhere (§4.5).
    pub tree_entry_count: u32,
    pub keys: Vec<IndexKey>,
    /// Leaf-only: the primary document id for each key, parallel to `keys`.
    pub values: Vec<Bson>,
    /// Internal-only: `keys.len() + 1` child page ids.
    pub child_ids: Vec<PageId>,
}

impl BTreeNode {
    pub fn new_leaf() -> Self {
        Self {
            is_leaf: true,
            parent_id: NO_PAGE,
            next_sibling_id: NO_PAGE,
            prev_sibling_id: NO_PAGE,
            tree_entry_count: 0,
            keys: Vec::new(),
            values: Vec::new(),
            child_ids: Vec::new(),
        }
    }

    pub fn new_internal() -> Self {
        Self {
            is_leaf: false,
            parent_id: NO_PAGE,
            next_sibling_id: NO_PAGE,
            prev_sibling_id: NO_PAGE,
            tree_entry_count: 0,
            keys: Vec::new(),
            values: Vec::new(),
            child_ids: Vec::new(),
        }
    }

    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    fn encode_value(value: &Bson) -> Vec<u8> {
        let wrapper = doc! { "k": value.clone() };
        let mut buf = Vec::new();
        wrapper.to_writer(&mut buf).expect("bson encode never fails for owned values");
        buf
    }

    fn decode_value(cursor: &mut Cursor<&[u8]>) -> TinyResult<Bson> {
        let wrapper = bson::Document::from_reader(cursor)
            .map_err(|e| TinyDbError::corruption(format!("malformed btree key/value: {}", e)))?;
        wrapper
            .get("k")
            .cloned()
            .ok_or_else(|| TinyDbError::corruption("btree key/value wrapper missing field"))
    }

    pub fn encode(&self, key_arity: usize) -> Vec<u8> {
        let mut buf = Vec::with_capacity(NODE_FIXED_HEADER_LEN + 64);
        buf.push(if self.is_leaf { 1 } else { 0 });
        buf.extend_from_slice(&(self.keys.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.parent_id.to_le_bytes());
        buf.extend_from_slice(&self.next_sibling_id.to_le_bytes());
        buf.extend_from_slice(&self.prev_sibling_id.to_le_bytes());
        buf.extend_from_slice(&self.tree_entry_count.to_le_bytes());

        for key in &self.keys {
            debug_assert_eq!(key.arity(), key_arity, "all keys in a node share the index's arity");
            for component in &key.0 {
                buf.extend_from_slice(&Self::encode_value(component));
            }
        }

        if self.is_leaf {
            for value in &self.values {
                buf.extend_from_slice(&Self::encode_value(value));
            }
        } else {
            for child in &self.child_ids {
                buf.extend_from_slice(&child.to_le_bytes());
            }
        }
        buf
    }

    pub fn decode(bytes: &[u8], key_arity: usize) -> TinyResult<Self> {
        if bytes.len() < NODE_FIXED_HEADER_LEN {
            return Err(TinyDbError::corruption("btree node shorter than its fixed header"));
        }
        let is_leaf = bytes[0] == 1;
        let key_count = u32::from_le_bytes(bytes[1..5].try_into().unwrap()) as usize;
        let parent_id = u32::from_le_bytes(bytes[5..9].try_into().unwrap());
        let next_sibling_id = u32::from_le_bytes(bytes[9..13].try_into().unwrap());
        let prev_sibling_id = u32::from_le_bytes(bytes[13..17].try_into().unwrap());
        let tree_entry_count = u32::from_le_bytes(bytes[17..21].try_into().unwrap());

        let mut cursor = Cursor::new(&bytes[NODE_FIXED_HEADER_LEN..]);
        let mut keys = Vec::with_capacity(key_count);
        for _ in 0..key_count {
            let mut components = Vec::with_capacity(key_arity);
            for _ in 0..key_arity {
                components.push(Self::decode_value(&mut cursor)?);
            }
            keys.push(IndexKey::new(components));
        }

        let mut values = Vec::new();
        let mut child_ids = Vec::new();
        if is_leaf {
            for _ in 0..key_count {
                values.push(Self::decode_value(&mut cursor)?);
            }
        } else {
            let remaining = &bytes[NODE_FIXED_HEADER_LEN + cursor.position() as usize..];
            let mut offset = 0usize;
            for _ in 0..key_count + 1 {
                if offset + 4 > remaining.len() {
                    return Err(TinyDbError::corruption("btree internal node child-id list truncated"));
                }
                child_ids.push(u32::from_le_bytes(remaining[offset..offset + 4].try_into().unwrap()));
                offset += 4;
            }
        }

        Ok(Self {
            is_leaf,
            parent_id,
            next_sibling_id,
            prev_sibling_id,
            tree_entry_count,
            keys,
            values,
            child_ids,
        })
    }

    /// Serialize and store this node at `page_id`, spilling into an
    /// overflow chain when the encoded form exceeds the page's payload
    /// capacity and freeing any overflow chain this page previously owned.
    pub fn write(
        &self,
        header: &mut DatabaseHeader,
        cache: &mut PageCache,
        disk: &DiskFile,
        page_id: PageId,
        key_arity: usize,
        now: u64,
    ) -> TinyResult<()> {
        let body = self.encode(key_arity);

        let old_overflow = cache.fetch(page_id)?.header.next_page_id;
        if old_overflow != NO_PAGE {
            LargeDocStore::free_chain(header, cache, old_overflow, now)?;
        }

        let page = cache.fetch(page_id)?;
        let capacity = page.payload.len();
        if body.len() <= capacity {
            page.payload[..body.len()].copy_from_slice(&body);
            page.payload[body.len()..].iter_mut().for_each(|b| *b = 0);
            page.header.next_page_id = NO_PAGE;
            let lsn = page.header.lsn;
            page.touch(now, lsn);
        } else {
            let (inline, tail) = body.split_at(capacity);
            let overflow_root = LargeDocStore::write(header, cache, disk, now, tail)?;
            let page = cache.fetch(page_id)?;
            page.payload.copy_from_slice(inline);
            page.header.next_page_id = overflow_root;
            let lsn = page.header.lsn;
            page.touch(now, lsn);
        }
        Ok(())
    }

    pub fn read(cache: &mut PageCache, page_id: PageId, key_arity: usize) -> TinyResult<Self> {
        let page = cache.fetch(page_id)?;
        let overflow_root = page.header.next_page_id;
        let inline = page.payload.clone();
        let full = if overflow_root == NO_PAGE {
            inline
        } else {
            let mut full = inline;
            full.extend_from_slice(&LargeDocStore::read(cache, overflow_root)?);
            full
        };
        Self::decode(&full, key_arity)
    }

    /// Free a node's private overflow chain, if any, ahead of freeing the
    /// node's own page (§4.5 "freed when the node shrinks"/on merge).
    pub fn free_overflow(
        header: &mut DatabaseHeader,
        cache: &mut PageCache,
        page_id: PageId,
        now: u64,
    ) -> TinyResult<()> {
        let overflow_root = cache.fetch(page_id)?.header.next_page_id;
        if overflow_root != NO_PAGE {
            LargeDocStore::free_chain(header, cache, overflow_root, now)?;
        }
        Ok(())
    }
}
