//! Entity trait and reconstruction factory types.
//!
//! This module defines what a type must provide to be cached by a
//! [`Registry`](super::Registry), and the shape of the function that
//! rebuilds an entity from its record.

use std::future::Future;
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};
use tablet_core::{Record, RecordId, TabletResult};

/// An in-memory object that represents exactly one record.
///
/// Entities are shared as `Arc<Self>`, so any mutable state must use
/// interior mutability.
///
/// # Implementation Requirements
///
/// - `id()` must never change once the entity exists
/// - `generate_record()` must be pure and deterministic for a given state
/// - `generate_record().id()` must equal `id()`
/// - Implementations must be `Send + Sync + 'static` for async compatibility
pub trait Entity: Send + Sync + 'static {
    /// The record this entity is stored as.
    type Record: Record;

    /// Identity of this entity.
    fn id(&self) -> &RecordId;

    /// Serialize the current state back into a record.
    fn generate_record(&self) -> Self::Record;
}

/// Pending reconstruction of one entity.
pub type BuildFuture<E> = BoxFuture<'static, TabletResult<E>>;

/// Rebuilds an entity from its record; may suspend and may fail.
pub type Factory<E> = Arc<dyn Fn(<E as Entity>::Record) -> BuildFuture<E> + Send + Sync>;

/// Box an async closure into a [`Factory`].
pub fn factory_fn<E, F, Fut>(f: F) -> Factory<E>
where
    E: Entity,
    F: Fn(E::Record) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = TabletResult<E>> + Send + 'static,
{
    Arc::new(move |record| f(record).boxed())
}
