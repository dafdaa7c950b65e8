//! Error types for the Strata engine.

use crate::{EntityName, ObjectId, SchemaVersion};
use thiserror::Error;

/// All possible errors from the Strata engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Model errors
    #[error("entity not found in model: {0}")]
    EntityNotFound(EntityName),

    // Validation errors
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("missing required field: {0}")]
    MissingRequiredField(String),

    #[error("type mismatch for field '{field}': expected {expected}, got {got}")]
    TypeMismatch {
        field: String,
        expected: String,
        got: String,
    },

    // Object errors
    #[error("object not found: {0}")]
    ObjectNotFound(ObjectId),

    #[error("object already exists: {0}")]
    ObjectAlreadyExists(ObjectId),

    #[error("object is deleted: {0}")]
    ObjectDeleted(ObjectId),

    #[error("object {id} belongs to entity '{actual}', not '{expected}'")]
    EntityMismatch {
        id: ObjectId,
        expected: EntityName,
        actual: EntityName,
    },

    #[error("unable to decode entity '{entity}': {reason}")]
    Decode { entity: EntityName, reason: String },

    // State errors
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("schema version mismatch: expected {expected}, got {actual}")]
    SchemaVersionMismatch {
        expected: SchemaVersion,
        actual: SchemaVersion,
    },
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
