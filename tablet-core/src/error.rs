//! Error types for TABLET operations

use crate::RecordId;
use thiserror::Error;

/// Kind registry errors.
///
/// These are programming errors: they are surfaced immediately and never
/// retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Registration failed for kind {kind}: {reason}")]
    Registration { kind: String, reason: String },

    #[error("Kind not registered: {kind}")]
    NotRegistered { kind: String },

    #[error("A table named {name} already exists, pick a different name")]
    DuplicateTable { name: String },
}

/// Entity reconstruction errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BuildError {
    #[error("Build failed for {kind}[{id}]: {reason}")]
    Failed {
        kind: String,
        id: RecordId,
        reason: String,
    },

    #[error("Build invariant violated for {kind}: record {expected} produced entity {got}")]
    Invariant {
        kind: String,
        expected: RecordId,
        got: RecordId,
    },

    #[error("Entity {kind}[{current}] cannot take the id {attempted}")]
    IdReassignment {
        kind: String,
        current: RecordId,
        attempted: RecordId,
    },
}

/// Table (storage backend) errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Persistence failed on table {table} for record {id}: {reason}")]
    Persistence {
        table: String,
        id: RecordId,
        reason: String,
    },

    #[error("Table {table} is unavailable: {reason}")]
    Unavailable { table: String, reason: String },

    #[error("Table file {path} is corrupt: {reason}")]
    Corrupt { path: String, reason: String },

    #[error("I/O error on {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Record id must not be empty")]
    EmptyId,

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Config could not be parsed: {reason}")]
    Parse { reason: String },
}

/// Master error type for all TABLET errors.
///
/// Every variant is `Clone` so a single failed build can be reported to all
/// of its waiters.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TabletError {
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Build error: {0}")]
    Build(#[from] BuildError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for TABLET operations.
pub type TabletResult<T> = Result<T, TabletError>;

// =============================================================================
// TESTS
// =============================================================================
