//! Entity identity cache with deduplicated loading.
//!
//! Every registered kind gets a cache mapping record ids to the one live
//! `Arc<E>` for that id. Anything that turns a record into an entity goes
//! through the load coordinator, so two callers asking for the same id
//! always get the same instance.
//!
//! # Identity Guarantees
//!
//! - At most one live entity per (kind, id) in a registry
//! - Concurrent builds for one id share a single factory call
//! - A failed build leaves no trace: nothing cached, nothing in flight
//!
//! # Example
//!
//! ```ignore
//! let registry = Registry::new();
//! let notes = registry
//!     .kind::<Note>("Note")
//!     .table(Arc::new(MemoryTable::new(registry.catalog(), "notes")?))
//!     .factory(|record: Document| async move { Note::from_document(record) })
//!     .register()?;
//!
//! let (a, b) = tokio::join!(registry.fetch(&notes, &id), registry.fetch(&notes, &id));
//! assert!(Arc::ptr_eq(&a?.unwrap(), &b?.unwrap()));
//! ```

mod coordinator;
pub mod kind;
pub mod lifecycle;
pub mod registry;
pub mod traits;

pub use kind::{KindBuilder, KindToken};
pub use lifecycle::LoadReport;
pub use registry::{CacheSummary, Registry};
pub use traits::{factory_fn, BuildFuture, Entity, Factory};
