//! TinyDb: an embedded, single-file BSON document database with a
//! crash-safe write-ahead log and on-disk B+tree secondary indexes.
//!
//! ```no_run
//! use tinydb::{Engine, EngineOptions};
//! use bson::doc;
//!
//! let engine = Engine::open("example.db", EngineOptions::default())?;
//! let orders = engine.get_collection("orders")?;
//! let id = orders.insert(doc! { "sku": "abc123", "qty": 4 })?;
//! let found = orders.find_by_id(&id)?;
//! # Ok::<(), tinydb::TinyDbError>(())
//! ```

pub mod async_ops;
pub mod btree;
pub mod catalog;
pub mod collection_state;
pub mod config;
pub mod data_page;
pub mod engine;
pub mod error;
pub mod flush_scheduler;
pub mod index_manager;
pub mod large_doc;
pub mod logging;
pub mod schema;
pub mod stats;
pub mod storage;
pub mod transaction;
pub mod wal;

pub use async_ops::CancellationSignal;
pub use config::{EngineOptions, SchemaValidationMode, WriteConcern};
pub use engine::{Collection, Engine, TransactionHandle};
pub use error::{TinyDbError, TinyResult};
pub use schema::{NoopValidator, SchemaValidator};
pub use stats::Statistics;
