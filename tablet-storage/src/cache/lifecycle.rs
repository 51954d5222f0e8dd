//! Entity lifecycle: construction, resolution and persistence.

use std::sync::Arc;

use futures_util::future::{join_all, try_join_all};
use tablet_core::{BuildError, RecordId, TabletError, TabletResult};
use tracing::debug;

use super::coordinator::Lookup;
use super::kind::KindToken;
use super::registry::Registry;
use super::traits::Entity;

/// Outcome of loading every record of a kind.
///
/// Failures are collected rather than aborting the whole load.
pub struct LoadReport<E> {
    pub entities: Vec<Arc<E>>,
    pub failures: Vec<TabletError>,
}

impl<E> LoadReport<E> {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entities.len() + self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<E> Default for LoadReport<E> {
    fn default() -> Self {
        Self {
            entities: Vec::new(),
            failures: Vec::new(),
        }
    }
}

impl<E> std::fmt::Debug for LoadReport<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadReport")
            .field("entities", &self.entities.len())
            .field("failures", &self.failures)
            .finish()
    }
}

impl Registry {
    /// Resolve a raw record to its single live entity.
    ///
    /// Concurrent calls for the same id share one factory invocation. On
    /// failure every waiter receives `BuildError::Failed` and the id can be
    /// built again later.
    pub async fn build<E: Entity>(
        &self,
        kind: &KindToken<E>,
        record: E::Record,
    ) -> TabletResult<Arc<E>> {
        self.slot(kind)?.build(record).await
    }

    /// Resolve an id to its entity, reading the table only on a cache miss.
    ///
    /// Returns `Ok(None)` when the table has no such record.
    pub async fn fetch<E: Entity>(
        &self,
        kind: &KindToken<E>,
        id: &RecordId,
    ) -> TabletResult<Option<Arc<E>>> {
        let slot = self.slot(kind)?;
        match slot.lookup(id)? {
            Lookup::Cached(entity) => {
                debug!(kind = %kind, %id, "cache hit");
                return Ok(Some(entity));
            }
            Lookup::Pending(pending) => {
                debug!(kind = %kind, %id, "joining in-flight build");
                return pending.await.map(Some);
            }
            Lookup::Miss => {}
        }

        let table = slot.table()?;
        match table.fetch(id).await? {
            Some(record) => slot.build(record).await.map(Some),
            None => Ok(None),
        }
    }

    /// Every entity of the kind. Stops at the first failed build.
    pub async fn fetch_all<E: Entity>(&self, kind: &KindToken<E>) -> TabletResult<Vec<Arc<E>>> {
        let slot = self.slot(kind)?;
        let records = slot.table()?.fetch_all().await?;
        try_join_all(records.into_iter().map(|record| slot.build(record))).await
    }

    /// Every entity of the kind, collecting failures instead of stopping.
    pub async fn load_all<E: Entity>(&self, kind: &KindToken<E>) -> TabletResult<LoadReport<E>> {
        let slot = self.slot(kind)?;
        let records = slot.table()?.fetch_all().await?;
        let outcomes = join_all(records.into_iter().map(|record| slot.build(record))).await;

        let mut report = LoadReport::default();
        for outcome in outcomes {
            match outcome {
                Ok(entity) => report.entities.push(entity),
                Err(e) => report.failures.push(e),
            }
        }
        Ok(report)
    }

    /// Entities whose records match `predicate`.
    pub async fn filter_entity<E, P>(
        &self,
        kind: &KindToken<E>,
        predicate: P,
    ) -> TabletResult<Vec<Arc<E>>>
    where
        E: Entity,
        P: Fn(&E::Record) -> bool + Send + Sync,
    {
        let slot = self.slot(kind)?;
        let records = slot.table()?.filter(&predicate).await?;
        try_join_all(records.into_iter().map(|record| slot.build(record))).await
    }

    /// The entity of the first record matching `predicate`.
    pub async fn find_entity<E, P>(
        &self,
        kind: &KindToken<E>,
        predicate: P,
    ) -> TabletResult<Option<Arc<E>>>
    where
        E: Entity,
        P: Fn(&E::Record) -> bool + Send + Sync,
    {
        let slot = self.slot(kind)?;
        match slot.table()?.find(&predicate).await? {
            Some(record) => slot.build(record).await.map(Some),
            None => Ok(None),
        }
    }

    /// The first raw record matching `predicate`. The cache is not consulted.
    pub async fn find_record<E, P>(
        &self,
        kind: &KindToken<E>,
        predicate: P,
    ) -> TabletResult<Option<E::Record>>
    where
        E: Entity,
        P: Fn(&E::Record) -> bool + Send + Sync,
    {
        self.slot(kind)?.table()?.find(&predicate).await
    }

    /// Write a raw record straight to the kind's table.
    pub async fn crupdate<E: Entity>(
        &self,
        kind: &KindToken<E>,
        record: E::Record,
    ) -> TabletResult<E::Record> {
        self.slot(kind)?.table()?.crupdate(record).await
    }

    /// Create a new entity and make it the cached instance for its id.
    ///
    /// A fresh id is generated when `id` is `None`. `make` must produce an
    /// entity carrying exactly the id it was given. Nothing is written to the
    /// table until [`save`](Self::save).
    ///
    /// # Errors
    ///
    /// `BuildError::IdReassignment` if the entity reports a different id.
    pub fn construct<E, F>(
        &self,
        kind: &KindToken<E>,
        id: Option<RecordId>,
        make: F,
    ) -> TabletResult<Arc<E>>
    where
        E: Entity,
        F: FnOnce(RecordId) -> E,
    {
        let slot = self.slot(kind)?;
        let id = id.unwrap_or_else(|| RecordId::generate_with(self.config().id_strategy));
        let entity = make(id.clone());
        if entity.id() != &id {
            return Err(BuildError::IdReassignment {
                kind: kind.label().to_string(),
                current: id,
                attempted: entity.id().clone(),
            }
            .into());
        }

        let entity = Arc::new(entity);
        if slot.insert(Arc::clone(&entity))?.is_some() {
            debug!(kind = %kind, %id, "replaced cached instance");
        }
        Ok(entity)
    }

    /// Persist an entity and make it the cached instance for its id.
    ///
    /// The cache is only touched once the table accepted the write.
    pub async fn save<E: Entity>(&self, kind: &KindToken<E>, entity: &Arc<E>) -> TabletResult<RecordId> {
        let slot = self.slot(kind)?;
        let record = entity.generate_record();
        let saved = slot.table()?.crupdate(record).await?;
        let id = tablet_core::Record::id(&saved).clone();
        slot.insert(Arc::clone(entity))?;
        debug!(kind = %kind, %id, "saved entity");
        Ok(id)
    }

    /// Delete the entity's record from the table. The cache is left as is.
    pub async fn delete<E: Entity>(&self, kind: &KindToken<E>, entity: &E) -> TabletResult<bool> {
        let record = entity.generate_record();
        self.slot(kind)?.table()?.delete(&record).await
    }

    /// Delete a record from the table by id. The cache is left as is.
    pub async fn delete_entry<E: Entity>(&self, kind: &KindToken<E>, id: &RecordId) -> TabletResult<bool> {
        self.slot(kind)?.table()?.delete_by_id(id).await
    }

    /// Drop the cached instance for `id`. The next fetch rebuilds it.
    pub fn evict<E: Entity>(&self, kind: &KindToken<E>, id: &RecordId) -> TabletResult<bool> {
        self.slot(kind)?.evict(id)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::super::test_support::{id, note_doc, setup, Note};
    use super::*;
    use crate::table::Table;
    use tablet_core::Document;

    #[tokio::test]
    async fn test_fetch_hits_cache_after_first_load() {
        let (registry, notes, table, spy) = setup(vec![note_doc("a", "hi")]);

        let first = registry.fetch(&notes, &id("a")).await.unwrap().unwrap();
        let second = registry.fetch(&notes, &id("a")).await.unwrap().unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(spy.calls(), 1);
        assert_eq!(table.summary().reads, 1);
    }

    #[tokio::test]
    async fn test_fetch_absent_is_none() {
        let (registry, notes, _table, spy) = setup(vec![]);
        assert!(registry.fetch(&notes, &id("ghost")).await.unwrap().is_none());
        assert_eq!(spy.calls(), 0);
    }

    #[tokio::test]
    async fn test_fetch_joins_in_flight_build_without_table_read() {
        let (registry, notes, table, spy) = setup(vec![note_doc("a", "hi")]);
        spy.delay_ms.store(20, Ordering::SeqCst);
        let a = id("a");

        let (built, fetched) = tokio::join!(
            registry.build(&notes, note_doc("a", "hi")),
            registry.fetch(&notes, &a)
        );

        assert!(Arc::ptr_eq(&built.unwrap(), &fetched.unwrap().unwrap()));
        assert_eq!(spy.calls(), 1);
        assert_eq!(table.summary().reads, 0);
    }

    #[tokio::test]
    async fn test_load_all_collects_failures() {
        let (registry, notes, _table, spy) = setup(vec![note_doc("a", "1"), note_doc("b", "2")]);
        spy.set_failing(true);

        let report = registry.load_all(&notes).await.unwrap();
        assert_eq!(report.failures.len(), 2);
        assert!(!report.is_complete());
        assert_eq!(registry.num_cached(&notes).unwrap(), 0);

        spy.set_failing(false);
        let report = registry.load_all(&notes).await.unwrap();
        assert!(report.is_complete());
        assert_eq!(report.entities.len(), 2);
    }

    #[tokio::test]
    async fn test_filter_and_find_return_cached_instances() {
        let (registry, notes, _table, _spy) =
            setup(vec![note_doc("a", "apple"), note_doc("b", "banana")]);

        let a = registry.fetch(&notes, &id("a")).await.unwrap().unwrap();
        let starts_with_a = |d: &Document| {
            d.get("text")
                .and_then(|v| v.as_str())
                .is_some_and(|s| s.starts_with('a'))
        };

        let filtered = registry.filter_entity(&notes, starts_with_a).await.unwrap();
        assert_eq!(filtered.len(), 1);
        assert!(Arc::ptr_eq(&filtered[0], &a));

        let found = registry.find_entity(&notes, starts_with_a).await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&found, &a));

        let record = registry.find_record(&notes, starts_with_a).await.unwrap().unwrap();
        assert_eq!(record.id, id("a"));

        assert!(registry
            .find_entity(&notes, |_: &Document| false)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_construct_then_save_then_fetch_skips_table() {
        let (registry, notes, table, spy) = setup(vec![]);

        let note = registry
            .construct(&notes, None, |id| Note::new(id, "fresh"))
            .unwrap();
        assert_eq!(note.id().as_str().len(), 36);
        assert_eq!(table.num_entries(), 0);

        let saved = registry.save(&notes, &note).await.unwrap();
        assert_eq!(&saved, note.id());
        assert_eq!(table.num_entries(), 1);

        let fetched = registry.fetch(&notes, &saved).await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&fetched, &note));
        assert_eq!(table.summary().reads, 0);
        assert_eq!(spy.calls(), 0);
    }

    #[test]
    fn test_generate_record_is_deterministic() {
        let (registry, notes, _table, _spy) = setup(vec![]);
        let note = registry
            .construct(&notes, Some(id("a")), |id| Note::new(id, "same"))
            .unwrap();

        let first = note.generate_record();
        let second = note.generate_record();
        assert_eq!(first, second);
        assert_eq!(&first.id, note.id());
    }

    #[test]
    fn test_construct_rejects_reassigned_id() {
        let (registry, notes, _table, _spy) = setup(vec![]);
        let err = registry
            .construct(&notes, Some(id("a")), |_| Note::new(id("b"), ""))
            .unwrap_err();
        assert!(matches!(
            err,
            TabletError::Build(BuildError::IdReassignment { ref current, ref attempted, .. })
                if current.as_str() == "a" && attempted.as_str() == "b"
        ));
        assert!(registry.cached(&notes, &id("a")).unwrap().is_none());
    }

    #[test]
    fn test_construct_replaces_cached_instance() {
        let (registry, notes, _table, _spy) = setup(vec![]);
        let first = registry
            .construct(&notes, Some(id("a")), |id| Note::new(id, "one"))
            .unwrap();
        let second = registry
            .construct(&notes, Some(id("a")), |id| Note::new(id, "two"))
            .unwrap();

        let cached = registry.cached(&notes, &id("a")).unwrap().unwrap();
        assert!(Arc::ptr_eq(&cached, &second));
        assert!(!Arc::ptr_eq(&cached, &first));
    }

    #[tokio::test]
    async fn test_delete_leaves_cache_and_evict_clears_it() {
        let (registry, notes, table, _spy) = setup(vec![note_doc("a", "x")]);
        let note = registry.fetch(&notes, &id("a")).await.unwrap().unwrap();

        assert!(registry.delete(&notes, &note).await.unwrap());
        assert!(!registry.delete_entry(&notes, &id("a")).await.unwrap());
        assert_eq!(table.num_entries(), 0);
        assert!(registry.cached(&notes, &id("a")).unwrap().is_some());

        assert!(registry.evict(&notes, &id("a")).unwrap());
        assert!(!registry.evict(&notes, &id("a")).unwrap());
        assert!(registry.fetch(&notes, &id("a")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_crupdate_passthrough_does_not_touch_cache() {
        let (registry, notes, table, _spy) = setup(vec![]);
        let record = registry.crupdate(&notes, note_doc("a", "raw")).await.unwrap();
        assert_eq!(record.id, id("a"));
        assert_eq!(table.num_entries(), 1);
        assert_eq!(registry.num_cached(&notes).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_fetch_all_reports_first_failure() {
        let (registry, notes, _table, spy) = setup(vec![note_doc("a", "1")]);
        spy.set_failing(true);
        let err = registry.fetch_all(&notes).await.unwrap_err();
        assert!(matches!(err, TabletError::Build(BuildError::Failed { .. })));
    }
}
