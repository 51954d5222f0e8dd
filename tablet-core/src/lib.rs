//! TABLET Core - Record Types
//!
//! Plain data types shared by every TABLET crate: record identity, the error
//! taxonomy, configuration, and table operation counters.
//! This crate contains ONLY data types - the table contract and the entity
//! cache live in tablet-storage.

pub mod config;
pub mod error;
pub mod identity;
pub mod record;
pub mod summary;

pub use config::{TabletConfig, DEFAULT_FLUSH_INTERVAL_MS, DEFAULT_JSON_DIR};
pub use error::{
    BuildError, ConfigError, RegistryError, StorageError, TabletError, TabletResult,
    ValidationError,
};
pub use identity::{IdStrategy, RecordId, Timestamp};
pub use record::{Document, Record};
pub use summary::{TableCounters, TableSummary};
