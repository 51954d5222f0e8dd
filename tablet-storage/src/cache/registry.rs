//! Entity registry: kind registration and cache introspection.
//!
//! A [`Registry`] owns one cache and one in-flight map per registered kind.
//! Registries are independent of each other; a [`KindToken`] issued by one
//! registry is rejected by every other.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard};

use serde::{Deserialize, Serialize};
use tablet_core::{
    RecordId, RegistryError, StorageError, TabletConfig, TabletError, TabletResult,
};
use tracing::info;

use super::coordinator::{KindSlot, SlotInfo};
use super::kind::{KindBuilder, KindToken};
use super::traits::{Entity, Factory};
use crate::catalog::TableCatalog;
use crate::table::Table;

static NEXT_REGISTRY_ID: AtomicU64 = AtomicU64::new(1);

struct RegisteredKind {
    label: Arc<str>,
    type_id: TypeId,
    type_name: &'static str,
    slot: Arc<dyn Any + Send + Sync>,
    info: Arc<dyn SlotInfo>,
}

/// Cache size of one kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSummary {
    pub kind: String,
    pub size: usize,
}

/// Identity cache and load coordinator for every registered kind.
///
/// # Example
///
/// ```ignore
/// let registry = Registry::new();
/// let table = Arc::new(MemoryTable::new(registry.catalog(), "widgets")?);
/// let widgets = registry
///     .kind::<Widget>("Widget")
///     .table(table)
///     .factory(|record: WidgetRecord| async move { Ok(Widget::from_record(record)) })
///     .register()?;
///
/// let a = registry.fetch(&widgets, &id).await?;
/// let b = registry.fetch(&widgets, &id).await?;
/// // a and b are the same Arc
/// ```
pub struct Registry {
    id: u64,
    config: TabletConfig,
    catalog: Arc<TableCatalog>,
    kinds: RwLock<Vec<RegisteredKind>>,
}

impl Registry {
    /// Create a registry with default configuration and a fresh catalog.
    pub fn new() -> Self {
        Self::with_config(TabletConfig::default())
    }

    pub fn with_config(config: TabletConfig) -> Self {
        Self::with_catalog(config, Arc::new(TableCatalog::new()))
    }

    /// Create a registry sharing an existing table catalog.
    pub fn with_catalog(config: TabletConfig, catalog: Arc<TableCatalog>) -> Self {
        Self {
            id: NEXT_REGISTRY_ID.fetch_add(1, Ordering::Relaxed),
            config,
            catalog,
            kinds: RwLock::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &TabletConfig {
        &self.config
    }

    /// Catalog that tables for this registry should claim their names in.
    pub fn catalog(&self) -> &Arc<TableCatalog> {
        &self.catalog
    }

    /// Start registering a kind under `label`.
    pub fn kind<E: Entity>(&self, label: impl Into<String>) -> KindBuilder<'_, E> {
        KindBuilder::new(self, label.into())
    }

    /// Bind `label` to a table and factory.
    ///
    /// Registering a label again with the same entity type replaces the
    /// table and factory but keeps the cache, and returns an equal token.
    /// Reusing a label for a different entity type is rejected.
    ///
    /// # Errors
    ///
    /// `RegistryError::Registration` when the label is blank, the table or
    /// factory is missing, or the label belongs to another type.
    pub fn register<E: Entity>(
        &self,
        label: &str,
        table: Option<Arc<dyn Table<E::Record>>>,
        factory: Option<Factory<E>>,
    ) -> TabletResult<KindToken<E>> {
        let registration_error = |reason: String| {
            TabletError::from(RegistryError::Registration {
                kind: label.to_string(),
                reason,
            })
        };

        if label.trim().is_empty() {
            return Err(registration_error("label must not be empty".to_string()));
        }
        let table = table.ok_or_else(|| registration_error("table can't be absent".to_string()))?;
        let factory =
            factory.ok_or_else(|| registration_error("factory can't be absent".to_string()))?;

        let mut kinds = self
            .kinds
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;

        if let Some(index) = kinds.iter().position(|k| &*k.label == label) {
            let existing = &kinds[index];
            if existing.type_id != TypeId::of::<E>() {
                return Err(registration_error(format!(
                    "label already registered for {}",
                    existing.type_name
                )));
            }
            let slot = Arc::clone(&existing.slot)
                .downcast::<KindSlot<E>>()
                .map_err(|_| registration_error("slot type mismatch".to_string()))?;
            let table_name = table.name().to_string();
            slot.rebind(table, factory)?;
            info!(
                kind = label,
                table = %table_name,
                cached = slot.num_cached(),
                "re-registered kind"
            );
            return Ok(KindToken::new(self.id, index, Arc::clone(&existing.label)));
        }

        let label: Arc<str> = Arc::from(label);
        let table_name = table.name().to_string();
        let slot = Arc::new(KindSlot::new(Arc::clone(&label), table, factory));
        let index = kinds.len();
        kinds.push(RegisteredKind {
            label: Arc::clone(&label),
            type_id: TypeId::of::<E>(),
            type_name: std::any::type_name::<E>(),
            slot: Arc::clone(&slot) as Arc<dyn Any + Send + Sync>,
            info: slot as Arc<dyn SlotInfo>,
        });
        info!(kind = %label, table = %table_name, "registered kind");

        Ok(KindToken::new(self.id, index, label))
    }

    fn read_kinds(&self) -> TabletResult<RwLockReadGuard<'_, Vec<RegisteredKind>>> {
        self.kinds
            .read()
            .map_err(|_| StorageError::LockPoisoned.into())
    }

    /// Resolve a token to its slot.
    pub(crate) fn slot<E: Entity>(&self, kind: &KindToken<E>) -> TabletResult<Arc<KindSlot<E>>> {
        let not_registered = || {
            TabletError::from(RegistryError::NotRegistered {
                kind: kind.label().to_string(),
            })
        };
        if kind.registry != self.id {
            return Err(not_registered());
        }
        let kinds = self.read_kinds()?;
        let entry = kinds.get(kind.index).ok_or_else(not_registered)?;
        Arc::clone(&entry.slot)
            .downcast::<KindSlot<E>>()
            .map_err(|_| not_registered())
    }

    /// Whether `kind` was issued by this registry.
    pub fn is_registered<E: Entity>(&self, kind: &KindToken<E>) -> bool {
        self.slot(kind).is_ok()
    }

    /// Labels of every registered kind, in registration order.
    pub fn kinds(&self) -> TabletResult<Vec<String>> {
        Ok(self
            .read_kinds()?
            .iter()
            .map(|k| k.label.to_string())
            .collect())
    }

    pub fn table_of<E: Entity>(&self, kind: &KindToken<E>) -> TabletResult<Arc<dyn Table<E::Record>>> {
        self.slot(kind)?.table()
    }

    pub fn factory_of<E: Entity>(&self, kind: &KindToken<E>) -> TabletResult<Factory<E>> {
        self.slot(kind)?.factory()
    }

    /// Snapshot of the kind's cache.
    pub fn cache_of<E: Entity>(&self, kind: &KindToken<E>) -> TabletResult<HashMap<RecordId, Arc<E>>> {
        self.slot(kind)?.cache_snapshot()
    }

    /// Ids currently being built for the kind, sorted.
    pub fn in_flight_of<E: Entity>(&self, kind: &KindToken<E>) -> TabletResult<Vec<RecordId>> {
        self.slot(kind)?.in_flight_ids()
    }

    /// Cached entity for `id`, without touching the table.
    pub fn cached<E: Entity>(&self, kind: &KindToken<E>, id: &RecordId) -> TabletResult<Option<Arc<E>>> {
        self.slot(kind)?.cached(id)
    }

    pub fn num_cached<E: Entity>(&self, kind: &KindToken<E>) -> TabletResult<usize> {
        Ok(self.slot(kind)?.num_cached())
    }

    /// Cache size of every kind, in registration order.
    pub fn cache_summary(&self) -> TabletResult<Vec<CacheSummary>> {
        Ok(self
            .read_kinds()?
            .iter()
            .map(|k| CacheSummary {
                kind: k.info.label().to_string(),
                size: k.info.num_cached(),
            })
            .collect())
    }

    /// One line per kind, e.g. `Widget - 3 entries cached`.
    pub fn cache_report(&self) -> TabletResult<String> {
        let lines: Vec<String> = self
            .cache_summary()?
            .into_iter()
            .map(|s| format!("{} - {} entries cached", s.kind, s.size))
            .collect();
        Ok(lines.join("\n"))
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kinds: Vec<(String, usize, usize)> = match self.kinds.read() {
            Ok(kinds) => kinds
                .iter()
                .map(|k| {
                    (
                        k.info.label().to_string(),
                        k.info.num_cached(),
                        k.info.num_in_flight(),
                    )
                })
                .collect(),
            Err(_) => Vec::new(),
        };
        f.debug_struct("Registry")
            .field("id", &self.id)
            .field("kinds", &kinds)
            .field("catalog", &self.catalog)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{id, note_doc, register_notes, setup, Note, Spy};
    use super::*;
    use crate::memory::MemoryTable;
    use tablet_core::Document;

    #[test]
    fn test_register_requires_table_and_factory() {
        let registry = Registry::new();
        let table: Arc<dyn Table<Document>> =
            Arc::new(MemoryTable::<Document>::new(registry.catalog(), "notes").unwrap());

        let no_factory = registry.kind::<Note>("Note").table(Arc::clone(&table)).register();
        assert!(matches!(
            no_factory,
            Err(TabletError::Registry(RegistryError::Registration { .. }))
        ));

        let no_table = registry
            .kind::<Note>("Note")
            .factory(|r: Document| async move { Ok(Note::new(r.id, "")) })
            .register();
        assert!(matches!(
            no_table,
            Err(TabletError::Registry(RegistryError::Registration { .. }))
        ));

        let blank = registry
            .kind::<Note>("  ")
            .table(table)
            .factory(|r: Document| async move { Ok(Note::new(r.id, "")) })
            .register();
        assert!(matches!(
            blank,
            Err(TabletError::Registry(RegistryError::Registration { .. }))
        ));
        assert!(registry.kinds().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reregister_preserves_cache_and_token() {
        let (registry, notes, _table, _spy) = setup(vec![note_doc("a", "first")]);
        let before = registry.fetch(&notes, &id("a")).await.unwrap().unwrap();

        let replacement = Arc::new(MemoryTable::new(registry.catalog(), "notes-v2").unwrap());
        let spy = Arc::new(Spy::default());
        let again = register_notes(&registry, Arc::clone(&replacement), Arc::clone(&spy));

        assert_eq!(again, notes);
        assert_eq!(registry.table_of(&notes).unwrap().name(), "notes-v2");
        let after = registry.cached(&again, &id("a")).unwrap().unwrap();
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(registry.kinds().unwrap(), vec!["Note".to_string()]);
    }

    #[test]
    fn test_label_reused_for_other_type_is_rejected() {
        struct Other(RecordId);
        impl Entity for Other {
            type Record = Document;
            fn id(&self) -> &RecordId {
                &self.0
            }
            fn generate_record(&self) -> Document {
                Document::new(self.0.clone())
            }
        }

        let (registry, _notes, table, _spy) = setup(vec![]);
        let clash = registry
            .kind::<Other>("Note")
            .table(table)
            .factory(|r: Document| async move { Ok(Other(r.id)) })
            .register();
        assert!(matches!(
            clash,
            Err(TabletError::Registry(RegistryError::Registration { .. }))
        ));
    }

    #[test]
    fn test_token_from_other_registry_is_not_registered() {
        let (_first, notes, _table, _spy) = setup(vec![]);
        let (second, _, _, _) = setup(vec![]);

        assert!(!second.is_registered(&notes));
        assert!(matches!(
            second.cache_of(&notes),
            Err(TabletError::Registry(RegistryError::NotRegistered { ref kind })) if kind == "Note"
        ));
        assert!(second.table_of(&notes).is_err());
        assert!(second.factory_of(&notes).is_err());
        assert!(second.in_flight_of(&notes).is_err());
    }

    #[tokio::test]
    async fn test_cache_summary_and_report() {
        let (registry, notes, _table, _spy) =
            setup(vec![note_doc("a", "1"), note_doc("b", "2"), note_doc("c", "3")]);
        registry.fetch_all(&notes).await.unwrap();

        assert_eq!(
            registry.cache_summary().unwrap(),
            vec![CacheSummary {
                kind: "Note".to_string(),
                size: 3
            }]
        );
        assert_eq!(registry.cache_report().unwrap(), "Note - 3 entries cached");
        assert_eq!(registry.num_cached(&notes).unwrap(), 3);
        assert_eq!(registry.cache_of(&notes).unwrap().len(), 3);
    }
}
