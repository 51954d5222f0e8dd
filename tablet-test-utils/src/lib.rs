//! TABLET Test Utilities
//!
//! Centralized test infrastructure for the TABLET workspace:
//! - An instrumented table that counts reads and can be told to fail
//! - Proptest generators for ids and records
//! - Test fixtures for a sample `Widget` kind
//! - Custom assertions for TABLET-specific validation

// Re-export core types for convenience
pub use tablet_core::{
    BuildError, Document, IdStrategy, Record, RecordId, RegistryError, StorageError,
    TabletConfig, TabletError, TabletResult, Timestamp,
};
pub use tablet_storage::{
    Entity, Factory, KindToken, MemoryTable, Registry, Table, TableCatalog,
};

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tablet_core::TableSummary;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install a test-friendly `tracing` subscriber once.
///
/// Filtering follows `RUST_LOG`, defaulting to `warn`. Safe to call from
/// every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

// ============================================================================
// INSTRUMENTED TABLE
// ============================================================================

/// Memory table that counts backend calls and can simulate outages.
pub struct InstrumentedTable<R: Record> {
    inner: MemoryTable<R>,
    fetches: AtomicUsize,
    scans: AtomicUsize,
    unavailable: AtomicBool,
    reject_writes: AtomicBool,
}

impl<R: Record> InstrumentedTable<R> {
    pub fn new(catalog: &Arc<TableCatalog>, name: impl Into<String>) -> TabletResult<Self> {
        Ok(Self {
            inner: MemoryTable::new(catalog, name)?,
            fetches: AtomicUsize::new(0),
            scans: AtomicUsize::new(0),
            unavailable: AtomicBool::new(false),
            reject_writes: AtomicBool::new(false),
        })
    }

    pub fn with_records(mut self, records: impl IntoIterator<Item = R>) -> Self {
        self.inner = self.inner.with_records(records);
        self
    }

    /// Number of single-record fetches served.
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Number of full scans served (fetch_all, filter, find).
    pub fn scans(&self) -> usize {
        self.scans.load(Ordering::SeqCst)
    }

    /// Make reads fail with `StorageError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make writes fail with `StorageError::Persistence`.
    pub fn set_reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }

    fn check_available(&self) -> TabletResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable {
                table: self.inner.name().to_string(),
                reason: "simulated outage".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl<R: Record> Table<R> for InstrumentedTable<R> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn num_entries(&self) -> usize {
        self.inner.num_entries()
    }

    fn to_array(&self) -> Vec<R> {
        self.inner.to_array()
    }

    fn summary(&self) -> TableSummary {
        self.inner.summary()
    }

    async fn fetch(&self, id: &RecordId) -> TabletResult<Option<R>> {
        self.check_available()?;
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.inner.fetch(id).await
    }

    async fn fetch_all(&self) -> TabletResult<Vec<R>> {
        self.check_available()?;
        self.scans.fetch_add(1, Ordering::SeqCst);
        self.inner.fetch_all().await
    }

    async fn crupdate(&self, record: R) -> TabletResult<R> {
        if self.reject_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Persistence {
                table: self.inner.name().to_string(),
                id: record.id().clone(),
                reason: "simulated write rejection".to_string(),
            }
            .into());
        }
        self.inner.crupdate(record).await
    }

    async fn delete_by_id(&self, id: &RecordId) -> TabletResult<bool> {
        self.inner.delete_by_id(id).await
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for generating TABLET ids and records.

    use super::fixtures::WidgetRecord;
    use super::*;
    use proptest::collection::btree_map;
    use proptest::prelude::*;

    /// Generate a valid, non-blank record id.
    pub fn arb_record_id() -> impl Strategy<Value = RecordId> {
        "[a-z0-9][a-z0-9-]{0,15}".prop_map(|raw| {
            RecordId::new(raw).unwrap_or_else(|_| RecordId::generate())
        })
    }

    /// Generate an id strategy.
    pub fn arb_id_strategy() -> impl Strategy<Value = IdStrategy> {
        prop_oneof![Just(IdStrategy::UuidV4), Just(IdStrategy::UuidV7)]
    }

    /// Generate a single widget record.
    pub fn arb_widget_record() -> impl Strategy<Value = WidgetRecord> {
        (arb_record_id(), "[A-Za-z ]{1,20}", 0u32..10_000).prop_map(|(id, name, size)| {
            WidgetRecord { id, name, size }
        })
    }

    /// Generate up to `max` widget records with distinct ids.
    pub fn arb_widget_records(max: usize) -> impl Strategy<Value = Vec<WidgetRecord>> {
        btree_map(arb_record_id(), ("[A-Za-z ]{1,20}", 0u32..10_000), 0..=max).prop_map(
            |entries| {
                entries
                    .into_iter()
                    .map(|(id, (name, size))| WidgetRecord { id, name, size })
                    .collect()
            },
        )
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! A sample `Widget` kind and a controllable factory.

    use super::*;
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::AtomicU64;
    use std::sync::RwLock;
    use std::time::Duration;
    use tablet_storage::factory_fn;

    /// Stored form of a widget.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct WidgetRecord {
        #[serde(rename = "_id")]
        pub id: RecordId,
        pub name: String,
        pub size: u32,
    }

    impl Record for WidgetRecord {
        fn id(&self) -> &RecordId {
            &self.id
        }
    }

    /// Live widget. The name is mutable through shared references.
    #[derive(Debug)]
    pub struct Widget {
        id: RecordId,
        name: RwLock<String>,
        size: u32,
    }

    impl Widget {
        pub fn create(id: RecordId, name: impl Into<String>, size: u32) -> Self {
            Self {
                id,
                name: RwLock::new(name.into()),
                size,
            }
        }

        pub fn from_record(record: WidgetRecord) -> Self {
            Self::create(record.id, record.name, record.size)
        }

        pub fn name(&self) -> String {
            self.name
                .read()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .clone()
        }

        pub fn rename(&self, name: impl Into<String>) {
            *self
                .name
                .write()
                .unwrap_or_else(std::sync::PoisonError::into_inner) = name.into();
        }

        pub fn size(&self) -> u32 {
            self.size
        }
    }

    impl Entity for Widget {
        type Record = WidgetRecord;

        fn id(&self) -> &RecordId {
            &self.id
        }

        fn generate_record(&self) -> WidgetRecord {
            WidgetRecord {
                id: self.id.clone(),
                name: self.name(),
                size: self.size,
            }
        }
    }

    /// Build a widget record.
    pub fn widget_record(id: &str, name: &str, size: u32) -> WidgetRecord {
        WidgetRecord {
            id: RecordId::new(id).unwrap_or_else(|_| RecordId::generate()),
            name: name.to_string(),
            size,
        }
    }

    /// Controls and observes a widget factory.
    #[derive(Debug, Default)]
    pub struct FactorySpy {
        calls: AtomicUsize,
        failing: AtomicBool,
        delay_ms: AtomicU64,
    }

    impl FactorySpy {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Number of factory invocations so far.
        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        /// Make every invocation sleep before producing its widget.
        pub fn set_delay(&self, delay: Duration) {
            self.delay_ms
                .store(delay.as_millis() as u64, Ordering::SeqCst);
        }
    }

    /// Widget factory reporting to `spy`.
    pub fn widget_factory(spy: Arc<FactorySpy>) -> Factory<Widget> {
        factory_fn(move |record: WidgetRecord| {
            let spy = Arc::clone(&spy);
            async move {
                spy.calls.fetch_add(1, Ordering::SeqCst);
                let delay = spy.delay_ms.load(Ordering::SeqCst);
                if delay > 0 {
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
                if spy.failing.load(Ordering::SeqCst) {
                    return Err(tablet_core::ValidationError::InvalidValue {
                        field: "widget".to_string(),
                        reason: format!("cannot build {}", record.id),
                    }
                    .into());
                }
                Ok(Widget::from_record(record))
            }
        })
    }

    /// Register the `Widget` kind on `registry`.
    pub fn register_widgets(
        registry: &Registry,
        table: Arc<dyn Table<WidgetRecord>>,
        spy: Arc<FactorySpy>,
    ) -> TabletResult<KindToken<Widget>> {
        registry
            .kind::<Widget>("Widget")
            .table(table)
            .boxed_factory(widget_factory(spy))
            .register()
    }

    /// Registry with a `Widget` kind over a seeded instrumented table.
    pub fn widget_registry(
        seed: Vec<WidgetRecord>,
    ) -> TabletResult<(
        Registry,
        KindToken<Widget>,
        Arc<InstrumentedTable<WidgetRecord>>,
        Arc<FactorySpy>,
    )> {
        let registry = Registry::new();
        let table = Arc::new(InstrumentedTable::new(registry.catalog(), "widgets")?.with_records(seed));
        let spy = FactorySpy::new();
        let widgets = register_widgets(&registry, table.clone(), Arc::clone(&spy))?;
        Ok((registry, widgets, table, spy))
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Custom assertion functions for TABLET-specific validation.

    use super::*;

    /// Assert that two handles point at the same live entity.
    #[track_caller]
    pub fn assert_same_instance<E>(a: &Arc<E>, b: &Arc<E>) {
        assert!(
            Arc::ptr_eq(a, b),
            "Expected the same instance, got two distinct allocations"
        );
    }

    /// Assert that a result is a failed build for `kind`.
    #[track_caller]
    pub fn assert_build_failed<T: std::fmt::Debug>(result: &TabletResult<T>, kind: &str) {
        match result {
            Err(TabletError::Build(BuildError::Failed { kind: k, .. })) => {
                assert_eq!(k, kind, "Wrong kind in build failure");
            }
            other => panic!("Expected build failure for {}, got: {:?}", kind, other),
        }
    }

    /// Assert that a result is a NotRegistered error.
    #[track_caller]
    pub fn assert_not_registered<T: std::fmt::Debug>(result: &TabletResult<T>) {
        match result {
            Err(TabletError::Registry(RegistryError::NotRegistered { .. })) => {}
            other => panic!("Expected NotRegistered error, got: {:?}", other),
        }
    }

    /// Assert that a result is a storage error.
    #[track_caller]
    pub fn assert_storage_error<T: std::fmt::Debug>(result: &TabletResult<T>) {
        match result {
            Err(TabletError::Storage(_)) => {}
            other => panic!("Expected Storage error, got: {:?}", other),
        }
    }

    /// Assert that an id looks like a hyphenated UUID.
    #[track_caller]
    pub fn assert_uuid_like(id: &RecordId) {
        let raw = id.as_str();
        let groups: Vec<usize> = raw.split('-').map(str::len).collect();
        assert_eq!(
            groups,
            vec![8, 4, 4, 4, 12],
            "Expected a hyphenated UUID, got {}",
            raw
        );
        assert!(
            raw.chars().all(|c| c == '-' || c.is_ascii_hexdigit()),
            "Expected hex digits in {}",
            raw
        );
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::generators::*;
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_widget_round_trips_through_record() {
        let record = widget_record("w-1", "gear", 3);
        let widget = Widget::from_record(record.clone());
        assert_eq!(widget.generate_record(), record);

        widget.rename("cog");
        assert_eq!(widget.generate_record().name, "cog");
        assert_eq!(widget.id(), &record.id);
    }

    #[test]
    fn test_widget_record_wire_shape() {
        let json = serde_json::to_value(widget_record("w-1", "gear", 3)).unwrap();
        assert_eq!(json, serde_json::json!({"_id": "w-1", "name": "gear", "size": 3}));
    }

    #[tokio::test]
    async fn test_instrumented_table_counts_and_fails() {
        let catalog = Arc::new(TableCatalog::new());
        let table = InstrumentedTable::new(&catalog, "widgets")
            .unwrap()
            .with_records(vec![widget_record("a", "x", 1)]);

        table.fetch(&RecordId::new("a").unwrap()).await.unwrap();
        table.fetch_all().await.unwrap();
        assert_eq!(table.fetches(), 1);
        assert_eq!(table.scans(), 1);

        table.set_unavailable(true);
        assertions::assert_storage_error(&table.fetch_all().await);

        table.set_reject_writes(true);
        let rejected = table.crupdate(widget_record("b", "y", 2)).await;
        assert!(matches!(
            rejected,
            Err(TabletError::Storage(StorageError::Persistence { .. }))
        ));
        assert_eq!(table.num_entries(), 1);
    }

    #[tokio::test]
    async fn test_factory_spy_controls_failures() {
        let spy = FactorySpy::new();
        let factory = widget_factory(Arc::clone(&spy));

        let widget = factory(widget_record("a", "x", 1)).await.unwrap();
        assert_eq!(widget.name(), "x");

        spy.set_failing(true);
        assert!(factory(widget_record("b", "y", 1)).await.is_err());
        assert_eq!(spy.calls(), 2);
    }

    #[test]
    fn test_assert_uuid_like_accepts_generated_ids() {
        assertions::assert_uuid_like(&RecordId::generate());
        assertions::assert_uuid_like(&RecordId::generate_with(IdStrategy::UuidV7));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        #[test]
        fn prop_generated_ids_are_valid(id in arb_record_id()) {
            prop_assert!(!id.as_str().trim().is_empty());
            prop_assert_eq!(RecordId::new(id.as_str()).unwrap(), id);
        }

        #[test]
        fn prop_generated_records_have_distinct_ids(records in arb_widget_records(20)) {
            let mut ids: Vec<_> = records.iter().map(|r| r.id.clone()).collect();
            ids.sort();
            ids.dedup();
            prop_assert_eq!(ids.len(), records.len());
        }

        #[test]
        fn prop_widget_record_survives_json(record in arb_widget_record()) {
            let json = serde_json::to_string(&record).unwrap();
            let back: WidgetRecord = serde_json::from_str(&json).unwrap();
            prop_assert_eq!(back, record);
        }
    }
}
