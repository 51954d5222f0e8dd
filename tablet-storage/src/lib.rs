//! TABLET Storage - Table Contract, Backends and Entity Cache
//!
//! Defines the async table contract every storage backend implements, two
//! backends (in-memory and flat JSON file), and the entity registry that
//! keeps exactly one live instance per record id.

pub mod cache;
pub mod catalog;
pub mod json;
pub mod memory;
pub mod table;

pub use cache::{
    factory_fn, BuildFuture, CacheSummary, Entity, Factory, KindBuilder, KindToken, LoadReport,
    Registry,
};
pub use catalog::TableCatalog;
pub use json::JsonTable;
pub use memory::MemoryTable;
pub use table::{copy_table, RecordPredicate, Table};
