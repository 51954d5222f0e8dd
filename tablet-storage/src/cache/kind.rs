//! Kind tokens and registration builder.

use std::fmt;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;

use tablet_core::TabletResult;

use super::registry::Registry;
use super::traits::{factory_fn, Entity, Factory};
use crate::table::Table;

/// Opaque handle to a registered kind.
///
/// Returned by registration and threaded through every registry call. A
/// token is only valid for the registry that issued it.
pub struct KindToken<E> {
    pub(crate) registry: u64,
    pub(crate) index: usize,
    pub(crate) label: Arc<str>,
    _entity: PhantomData<fn() -> E>,
}

impl<E> KindToken<E> {
    pub(crate) fn new(registry: u64, index: usize, label: Arc<str>) -> Self {
        Self {
            registry,
            index,
            label,
            _entity: PhantomData,
        }
    }

    /// The label the kind was registered under.
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl<E> Clone for KindToken<E> {
    fn clone(&self) -> Self {
        Self::new(self.registry, self.index, Arc::clone(&self.label))
    }
}

impl<E> PartialEq for KindToken<E> {
    fn eq(&self, other: &Self) -> bool {
        self.registry == other.registry && self.index == other.index
    }
}

impl<E> Eq for KindToken<E> {}

impl<E> Hash for KindToken<E> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.registry.hash(state);
        self.index.hash(state);
    }
}

impl<E> fmt::Debug for KindToken<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KindToken")
            .field("label", &self.label)
            .field("registry", &self.registry)
            .field("index", &self.index)
            .finish()
    }
}

impl<E> fmt::Display for KindToken<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

/// Collects a kind's table and factory before registering it.
///
/// ```ignore
/// let widgets = registry
///     .kind::<Widget>("Widget")
///     .table(table.clone())
///     .factory(|record: WidgetRecord| async move { Ok(Widget::from_record(record)) })
///     .register()?;
/// ```
pub struct KindBuilder<'r, E: Entity> {
    registry: &'r Registry,
    label: String,
    table: Option<Arc<dyn Table<E::Record>>>,
    factory: Option<Factory<E>>,
}

impl<'r, E: Entity> KindBuilder<'r, E> {
    pub(crate) fn new(registry: &'r Registry, label: String) -> Self {
        Self {
            registry,
            label,
            table: None,
            factory: None,
        }
    }

    /// Bind the table storing this kind's records.
    pub fn table(mut self, table: Arc<dyn Table<E::Record>>) -> Self {
        self.table = Some(table);
        self
    }

    /// Bind the reconstruction function.
    pub fn factory<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(E::Record) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TabletResult<E>> + Send + 'static,
    {
        self.factory = Some(factory_fn(f));
        self
    }

    /// Bind an already boxed factory.
    pub fn boxed_factory(mut self, factory: Factory<E>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Register (or re-register) the kind.
    pub fn register(self) -> TabletResult<KindToken<E>> {
        self.registry.register(&self.label, self.table, self.factory)
    }
}
