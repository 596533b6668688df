use crate::error::{TinyDbError, TinyResult};

use super::page_id::{PageId, NO_PAGE};

const SCHEMA_VERSION: u32 = 1;
const JOURNALING_FLAG: u32 = 1 << 0;
const DB_NAME_FIELD_LEN: usize = 64;
const USER_DATA_FIELD_LEN: usize = 64;
const FIXED_PART_LEN: usize = 4 * 8 + 8 + 8 + DB_NAME_FIELD_LEN + USER_DATA_FIELD_LEN;

/// The page-1 payload (§6 "Database header").
#[derive(Debug, Clone)]
pub struct DatabaseHeader {
    pub schema_version: u32,
    pub journaling: bool,
    pub page_size: u32,
    pub total_pages: u32,
    pub used_pages: u32,
    pub first_free_page: PageId,
    pub collection_catalog_page: PageId,
    pub index_info_page: PageId,
    pub created_ticks: u64,
    pub modified_ticks: u64,
    pub database_name: String,
    pub user_data: [u8; USER_DATA_FIELD_LEN],
    pub security_blob: Vec<u8>,
}

impl DatabaseHeader {
    pub fn new(database_name: &str, page_size: u32, journaling: bool, now: u64) -> TinyResult<Self> {
        if database_name.len() > DB_NAME_FIELD_LEN {
            return Err(TinyDbError::invalid_argument(
                "database_name must fit in 64 bytes",
            ));
        }
        Ok(Self {
            schema_version: SCHEMA_VERSION,
            journaling,
            page_size,
            total_pages: 1,
            used_pages: 0,
            first_free_page: NO_PAGE,
            collection_catalog_page: NO_PAGE,
            index_info_page: NO_PAGE,
            created_ticks: now,
            modified_ticks: now,
            database_name: database_name.to_string(),
            user_data: [0u8; USER_DATA_FIELD_LEN],
            security_blob: Vec::new(),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(FIXED_PART_LEN + 4 + self.security_blob.len());
        buf.extend_from_slice(&self.schema_version.to_le_bytes());
        let flags = if self.journaling { JOURNALING_FLAG } else { 0 };
        buf.extend_from_slice(&flags.to_le_bytes());
        buf.extend_from_slice(&self.page_size.to_le_bytes());
        buf.extend_from_slice(&self.total_pages.to_le_bytes());
        buf.extend_from_slice(&self.used_pages.to_le_bytes());
        buf.extend_from_slice(&self.first_free_page.to_le_bytes());
        buf.extend_from_slice(&self.collection_catalog_page.to_le_bytes());
        buf.extend_from_slice(&self.index_info_page.to_le_bytes());
        buf.extend_from_slice(&self.created_ticks.to_le_bytes());
        buf.extend_from_slice(&self.modified_ticks.to_le_bytes());

        let mut name_field = [0u8; DB_NAME_FIELD_LEN];
        let name_bytes = self.database_name.as_bytes();
        name_field[..name_bytes.len()].copy_from_slice(name_bytes);
        buf.extend_from_slice(&name_field);
        buf.extend_from_slice(&self.user_data);

        buf.extend_from_slice(&(self.security_blob.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.security_blob);
        buf
    }

    pub fn decode(bytes: &[u8]) -> TinyResult<Self> {
        if bytes.len() < FIXED_PART_LEN + 4 {
            return Err(TinyDbError::corruption("database header too short"));
        }
        let mut off = 0usize;
        let read_u32 = |b: &[u8], o: &mut usize| -> u32 {
            let v = u32::from_le_bytes(b[*o..*o + 4].try_into().unwrap());
            *o += 4;
            v
        };
        let read_u64 = |b: &[u8], o: &mut usize| -> u64 {
            let v = u64::from_le_bytes(b[*o..*o + 8].try_into().unwrap());
            *o += 8;
            v
        };

        let schema_version = read_u32(bytes, &mut off);
        let flags = read_u32(bytes, &mut off);
        let page_size = read_u32(bytes, &mut off);
        let total_pages = read_u32(bytes, &mut off);
        let used_pages = read_u32(bytes, &mut off);
        let first_free_page = read_u32(bytes, &mut off);
        let collection_catalog_page = read_u32(bytes, &mut off);
        let index_info_page = read_u32(bytes, &mut off);
        let created_ticks = read_u64(bytes, &mut off);
        let modified_ticks = read_u64(bytes, &mut off);

        let name_field = &bytes[off..off + DB_NAME_FIELD_LEN];
        off += DB_NAME_FIELD_LEN;
        let nul = name_field.iter().position(|&b| b == 0).unwrap_or(name_field.len());
        let database_name = String::from_utf8_lossy(&name_field[..nul]).to_string();

        let mut user_data = [0u8; USER_DATA_FIELD_LEN];
        user_data.copy_from_slice(&bytes[off..off + USER_DATA_FIELD_LEN]);
        off += USER_DATA_FIELD_LEN;

        let blob_len = read_u32(bytes, &mut off) as usize;
        if bytes.len() < off + blob_len {
            return Err(TinyDbError::corruption("security blob truncated"));
        }
        let security_blob = bytes[off..off + blob_len].to_vec();

        Ok(Self {
            schema_version,
            journaling: flags & JOURNALING_FLAG != 0,
            page_size,
            total_pages,
            used_pages,
            first_free_page,
            collection_catalog_page,
            index_info_page,
            created_ticks,
            modified_ticks,
            database_name,
            user_data,
            security_blob,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let mut header = DatabaseHeader::new("orders", 4096, true, 10).unwrap();
        header.total_pages = 12;
        header.used_pages = 9;
        header.first_free_page = 4;
        header.collection_catalog_page = 2;
        header.security_blob = vec![1, 2, 3, 4];

        let bytes = header.encode();
        let decoded = DatabaseHeader::decode(&bytes).unwrap();
        assert_eq!(decoded.database_name, "orders");
        assert_eq!(decoded.total_pages, 12);
        assert_eq!(decoded.used_pages, 9);
        assert_eq!(decoded.first_free_page, 4);
        assert_eq!(decoded.security_blob, vec![1, 2, 3, 4]);
        assert!(decoded.journaling);
    }
}
