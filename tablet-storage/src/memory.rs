//! In-memory table backend.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use tablet_core::{
    Record, RecordId, StorageError, TableCounters, TableSummary, TabletResult,
};

use crate::catalog::TableCatalog;
use crate::table::Table;

/// Map-backed table. Holds everything in memory and never fails a read.
pub struct MemoryTable<R: Record> {
    name: String,
    records: RwLock<BTreeMap<RecordId, R>>,
    counters: Arc<TableCounters>,
    catalog: Arc<TableCatalog>,
}

impl<R: Record> MemoryTable<R> {
    /// Create an empty table, claiming `name` in the catalog.
    pub fn new(catalog: &Arc<TableCatalog>, name: impl Into<String>) -> TabletResult<Self> {
        let name = name.into();
        let counters = catalog.claim(&name, "MemoryTable")?;
        Ok(Self {
            name,
            records: RwLock::new(BTreeMap::new()),
            counters,
            catalog: Arc::clone(catalog),
        })
    }

    /// Seed records without counting them as writes.
    pub fn with_records(self, records: impl IntoIterator<Item = R>) -> Self {
        {
            let mut map = self.records.write().unwrap_or_else(PoisonError::into_inner);
            for record in records {
                map.insert(record.id().clone(), record);
            }
        }
        self
    }

    fn read(&self) -> TabletResult<RwLockReadGuard<'_, BTreeMap<RecordId, R>>> {
        self.records
            .read()
            .map_err(|_| StorageError::LockPoisoned.into())
    }

    fn write(&self) -> TabletResult<RwLockWriteGuard<'_, BTreeMap<RecordId, R>>> {
        self.records
            .write()
            .map_err(|_| StorageError::LockPoisoned.into())
    }
}

#[async_trait]
impl<R: Record> Table<R> for MemoryTable<R> {
    fn name(&self) -> &str {
        &self.name
    }

    fn num_entries(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn to_array(&self) -> Vec<R> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    fn summary(&self) -> TableSummary {
        self.counters.snapshot()
    }

    async fn fetch(&self, id: &RecordId) -> TabletResult<Option<R>> {
        self.counters.record_read();
        Ok(self.read()?.get(id).cloned())
    }

    async fn fetch_all(&self) -> TabletResult<Vec<R>> {
        self.counters.record_read();
        Ok(self.read()?.values().cloned().collect())
    }

    async fn crupdate(&self, record: R) -> TabletResult<R> {
        let previous = self.write()?.insert(record.id().clone(), record.clone());
        if previous.is_some() {
            self.counters.record_update();
        } else {
            self.counters.record_creation();
        }
        Ok(record)
    }

    async fn delete_by_id(&self, id: &RecordId) -> TabletResult<bool> {
        let removed = self.write()?.remove(id).is_some();
        if removed {
            self.counters.record_deletion();
        }
        Ok(removed)
    }
}

impl<R: Record> Drop for MemoryTable<R> {
    fn drop(&mut self) {
        self.catalog.release(&self.name);
    }
}

impl<R: Record> std::fmt::Debug for MemoryTable<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTable")
            .field("name", &self.name)
            .field("entries", &self.num_entries())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::copy_table;
    use tablet_core::{Document, RegistryError, TabletError};

    fn doc(id: &str) -> Document {
        Document::new(RecordId::new(id).unwrap())
    }

    fn catalog() -> Arc<TableCatalog> {
        Arc::new(TableCatalog::new())
    }

    #[tokio::test]
    async fn test_fetch_absent_is_none() {
        let table: MemoryTable<Document> = MemoryTable::new(&catalog(), "docs").unwrap();
        let id = RecordId::new("missing").unwrap();
        assert!(table.fetch(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_crupdate_is_idempotent() {
        let table = MemoryTable::new(&catalog(), "docs").unwrap();
        let record = doc("a").with_field("n", 1);

        table.crupdate(record.clone()).await.unwrap();
        table.crupdate(record.clone()).await.unwrap();

        assert_eq!(table.num_entries(), 1);
        assert_eq!(table.fetch(&record.id).await.unwrap(), Some(record));
        let summary = table.summary();
        assert_eq!(summary.creations, 1);
        assert_eq!(summary.updates, 1);
    }

    #[tokio::test]
    async fn test_delete_reports_existence() {
        let table = MemoryTable::new(&catalog(), "docs")
            .unwrap()
            .with_records(vec![doc("a")]);

        assert!(table.delete(&doc("a")).await.unwrap());
        assert!(!table.delete(&doc("a")).await.unwrap());
        assert_eq!(table.summary().deletions, 1);
    }

    #[tokio::test]
    async fn test_filter_and_find() {
        let table = MemoryTable::new(&catalog(), "docs").unwrap().with_records(vec![
            doc("a").with_field("n", 1),
            doc("b").with_field("n", 2),
            doc("c").with_field("n", 3),
        ]);

        let odd = table
            .filter(&|d: &Document| d.get("n").and_then(|v| v.as_i64()).unwrap_or(0) % 2 == 1)
            .await
            .unwrap();
        assert_eq!(odd.len(), 2);

        let found = table
            .find(&|d: &Document| d.get("n") == Some(&serde_json::json!(2)))
            .await
            .unwrap();
        assert_eq!(found.unwrap().id.as_str(), "b");

        let none = table.find(&|_: &Document| false).await.unwrap();
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn test_to_array_is_sorted_by_id() {
        let table = MemoryTable::new(&catalog(), "docs")
            .unwrap()
            .with_records(vec![doc("c"), doc("a"), doc("b")]);
        let ids: Vec<String> = table
            .to_array()
            .into_iter()
            .map(|d| d.id.into_string())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_describe_names_table_and_size() {
        let table = MemoryTable::new(&catalog(), "docs")
            .unwrap()
            .with_records(vec![doc("a"), doc("b")]);
        assert_eq!(table.describe(), "Tablet: docs \n2 entries");
    }

    #[tokio::test]
    async fn test_duplicate_name_and_release_on_drop() {
        let catalog = catalog();
        let first: MemoryTable<Document> = MemoryTable::new(&catalog, "docs").unwrap();

        let second = MemoryTable::<Document>::new(&catalog, "docs");
        assert!(matches!(
            second,
            Err(TabletError::Registry(RegistryError::DuplicateTable { .. }))
        ));

        drop(first);
        assert!(MemoryTable::<Document>::new(&catalog, "docs").is_ok());
    }

    #[tokio::test]
    async fn test_copy_table() {
        let catalog = catalog();
        let source = MemoryTable::new(&catalog, "source")
            .unwrap()
            .with_records(vec![doc("a"), doc("b")]);
        let target: MemoryTable<Document> = MemoryTable::new(&catalog, "target").unwrap();

        let copied = copy_table(&source, &target).await.unwrap();
        assert_eq!(copied.len(), 2);
        assert_eq!(target.num_entries(), 2);
    }
}
