use crc32fast::Hasher;

use super::page_id::{PageId, PageType, NO_PAGE};
use crate::error::{TinyDbError, TinyResult};

/// The classic 41-byte prefix every page carries (§6 "Page header").
pub const HEADER_SIZE: usize = 41;

/// The LSN extension field lives immediately past the classic prefix
/// (§6 Ambient-stack note: not overloaded onto `modified_ticks`).
pub const LSN_FIELD_SIZE: usize = 8;

/// Total bytes of header reserved at the front of every page.
pub const FULL_HEADER_SIZE: usize = HEADER_SIZE + LSN_FIELD_SIZE;

/// The CRC32 covers only the classic 40-byte prefix, leaving the trailing
/// byte of `modified_ticks` and the LSN extension unchecked. Treated as
/// intentional per §9's Open Question (the LSN is deliberately excluded so
/// LSN stamping never requires recomputing the checksum).
const CRC_COVERED_LEN: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageHeader {
    pub page_type: PageType,
    pub page_id: PageId,
    pub prev_page_id: PageId,
    pub next_page_id: PageId,
    pub free_bytes: u16,
    pub item_count: u16,
    pub version: u32,
    pub crc32: u32,
    pub created_ticks: u64,
    pub modified_ticks: u64,
    pub lsn: u64,
}

impl PageHeader {
    pub fn new(page_type: PageType, page_id: PageId, now: u64) -> Self {
        let mut header = Self {
            page_type,
            page_id,
            prev_page_id: NO_PAGE,
            next_page_id: NO_PAGE,
            free_bytes: 0,
            item_count: 0,
            version: 1,
            crc32: 0,
            created_ticks: now,
            modified_ticks: now,
            lsn: 0,
        };
        header.crc32 = header.compute_crc();
        header
    }

    pub fn encode(&self) -> [u8; FULL_HEADER_SIZE] {
        let mut buf = [0u8; FULL_HEADER_SIZE];
        buf[0] = self.page_type.as_u8();
        buf[1..5].copy_from_slice(&self.page_id.to_le_bytes());
        buf[5..9].copy_from_slice(&self.prev_page_id.to_le_bytes());
        buf[9..13].copy_from_slice(&self.next_page_id.to_le_bytes());
        buf[13..15].copy_from_slice(&self.free_bytes.to_le_bytes());
        buf[15..17].copy_from_slice(&self.item_count.to_le_bytes());
        buf[17..21].copy_from_slice(&self.version.to_le_bytes());
        buf[21..25].copy_from_slice(&self.crc32.to_le_bytes());
        buf[25..33].copy_from_slice(&self.created_ticks.to_le_bytes());
        buf[33..41].copy_from_slice(&self.modified_ticks.to_le_bytes());
        buf[41..49].copy_from_slice(&self.lsn.to_le_bytes());
        buf
    }

    pub fn decode(bytes: &[u8]) -> TinyResult<Self> {
        if bytes.len() < FULL_HEADER_SIZE {
            return Err(TinyDbError::corruption(
                "page shorter than the page header",
            ));
        }
        let page_type = PageType::from_u8(bytes[0]).ok_or_else(|| {
            TinyDbError::corruption(format!("invalid page type byte {}", bytes[0]))
        })?;
        let header = Self {
            page_type,
            page_id: u32::from_le_bytes(bytes[1..5].try_into().unwrap()),
            prev_page_id: u32::from_le_bytes(bytes[5..9].try_into().unwrap()),
            next_page_id: u32::from_le_bytes(bytes[9..13].try_into().unwrap()),
            free_bytes: u16::from_le_bytes(bytes[13..15].try_into().unwrap()),
            item_count: u16::from_le_bytes(bytes[15..17].try_into().unwrap()),
            version: u32::from_le_bytes(bytes[17..21].try_into().unwrap()),
            crc32: u32::from_le_bytes(bytes[21..25].try_into().unwrap()),
            created_ticks: u64::from_le_bytes(bytes[25..33].try_into().unwrap()),
            modified_ticks: u64::from_le_bytes(bytes[33..41].try_into().unwrap()),
            lsn: u64::from_le_bytes(bytes[41..49].try_into().unwrap()),
        };
        Ok(header)
    }

    /// CRC32 over the first 40 bytes, with the crc field itself zeroed.
    pub fn compute_crc(&self) -> u32 {
        let mut zeroed = *self;
        zeroed.crc32 = 0;
        let buf = zeroed.encode();
        let mut hasher = Hasher::new();
        hasher.update(&buf[0..CRC_COVERED_LEN]);
        hasher.finalize()
    }

    pub fn verify_crc(&self) -> bool {
        self.crc32 == self.compute_crc()
    }

    pub fn touch(&mut self, now: u64, lsn: u64) {
        self.modified_ticks = now;
        self.version += 1;
        self.lsn = lsn;
        self.crc32 = self.compute_crc();
    }

    pub fn stamp_crc(&mut self) {
        self.crc32 = self.compute_crc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_bytes() {
        let mut header = PageHeader::new(PageType::Data, 7, 100);
        header.prev_page_id = 3;
        header.next_page_id = 9;
        header.free_bytes = 1200;
        header.item_count = 4;
        header.touch(200, 55);

        let bytes = header.encode();
        let decoded = PageHeader::decode(&bytes).unwrap();
        assert_eq!(decoded, header);
        assert!(decoded.verify_crc());
    }

    #[test]
    fn crc_ignores_lsn_field() {
        let mut header = PageHeader::new(PageType::Index, 2, 0);
        header.stamp_crc();
        let crc_before = header.crc32;
        header.lsn = 12345;
        assert_eq!(header.compute_crc(), crc_before);
    }

    #[test]
    fn rejects_invalid_page_type() {
        let mut bytes = [0u8; FULL_HEADER_SIZE];
        bytes[0] = 0xFF;
        assert!(PageHeader::decode(&bytes).is_err());
    }
}
