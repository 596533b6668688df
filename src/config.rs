use std::time::Duration;

/// Durability level honored at each write boundary (§4.3, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteConcern {
    /// Durability is left to the background flush scheduler.
    None,
    /// The WAL buffer is forced to disk before every commit.
    Journaled,
    /// The WAL is forced, every dirty data page is flushed, and the data
    /// file is fsynced.
    Synced,
}

/// Schema-validation strictness passed through to the schema hook (§1,
/// out-of-scope collaborator). The engine itself does not interpret this
/// beyond handing it to `SchemaValidator::validate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaValidationMode {
    Off,
    Warn,
    Strict,
}

/// Options accepted by [`crate::Engine::open`] (§6 "Configuration options").
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub page_size: u32,
    pub cache_size: usize,
    pub enable_journaling: bool,
    pub wal_file_name_format: String,
    pub write_concern: WriteConcern,
    pub background_flush_interval: Duration,
    pub max_transactions: usize,
    pub transaction_timeout: Duration,
    pub database_name: String,
    pub password: Option<String>,
    pub schema_validation_mode: SchemaValidationMode,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            page_size: 4096,
            cache_size: 1024,
            enable_journaling: true,
            wal_file_name_format: "{db}.wal".to_string(),
            write_concern: WriteConcern::Journaled,
            background_flush_interval: Duration::from_secs(5),
            max_transactions: 1024,
            transaction_timeout: Duration::from_secs(30),
            database_name: "tinydb".to_string(),
            password: None,
            schema_validation_mode: SchemaValidationMode::Off,
        }
    }
}

impl EngineOptions {
    pub fn validate(&self) -> crate::error::TinyResult<()> {
        use crate::error::TinyDbError;

        if !self.page_size.is_power_of_two()
            || self.page_size < 512
            || self.page_size > 65536
        {
            return Err(TinyDbError::invalid_argument(format!(
                "page_size must be a power of two in [512, 65536], got {}",
                self.page_size
            )));
        }
        if self.database_name.is_empty() {
            return Err(TinyDbError::invalid_argument(
                "database_name must not be empty",
            ));
        }
        if self.database_name.len() > 64 {
            return Err(TinyDbError::invalid_argument(
                "database_name must fit in 64 bytes",
            ));
        }
        Ok(())
    }

    pub fn wal_path(&self, db_path: &std::path::Path) -> std::path::PathBuf {
        let parent = db_path.parent().unwrap_or_else(|| std::path::Path::new(""));
        let name = self
            .wal_file_name_format
            .replace("{db}", &self.database_name);
        parent.join(name)
    }
}
