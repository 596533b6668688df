//! Schema-validation hook (an out-of-scope collaborator per §1, described
//! here only by the interface the core invokes before each write).
//!
//! Grounded on the teacher's pluggable-trait style for swappable
//! collaborators (e.g. its catalog/type-registry traits): the engine
//! depends on `SchemaValidator`, never on a concrete validator, so callers
//! can wire in whatever rule engine their application needs.

use bson::Document;

use crate::config::SchemaValidationMode;
use crate::error::TinyResult;

/// Invoked on every insert and update, before serialization (§4.4
/// "Insert": "invoke schema hook").
pub trait SchemaValidator: Send + Sync {
    /// Inspect `doc` for `collection` and reject it with an error if it
    /// violates whatever rules this validator enforces. `mode` is handed
    /// through unchanged; a validator is free to ignore it, warn instead
    /// of rejecting in `Warn` mode, or skip entirely in `Off` mode.
    fn validate(&self, collection: &str, doc: &Document, mode: SchemaValidationMode) -> TinyResult<()>;
}

/// The default validator: accepts everything. Used when no application
/// validator is configured.
pub struct NoopValidator;

impl SchemaValidator for NoopValidator {
    fn validate(&self, _collection: &str, _doc: &Document, _mode: SchemaValidationMode) -> TinyResult<()> {
        Ok(())
    }
}
