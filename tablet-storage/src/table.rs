//! The storage contract every table backend implements.
//!
//! The entity cache consumes backends purely through this trait; no
//! backend-specific types leak past it.

use async_trait::async_trait;
use tablet_core::{Record, RecordId, TableSummary, TabletResult};

/// Predicate evaluated over materialized records.
pub type RecordPredicate<'a, R> = &'a (dyn Fn(&R) -> bool + Send + Sync);

/// Async storage contract for one kind of record.
///
/// Every async method may suspend on I/O. Implementations must be safe to
/// share between tasks.
#[async_trait]
pub trait Table<R: Record>: Send + Sync {
    /// Catalog-unique name of this table.
    fn name(&self) -> &str;

    /// Number of records currently held.
    fn num_entries(&self) -> usize;

    /// All records, sorted by id.
    fn to_array(&self) -> Vec<R>;

    /// Operation counters for reporting.
    fn summary(&self) -> TableSummary;

    /// Get a record by id.
    ///
    /// Returns `Ok(None)` when the record does not exist; absence is never
    /// an error.
    async fn fetch(&self, id: &RecordId) -> TabletResult<Option<R>>;

    /// Materialize every record.
    ///
    /// Fails with `StorageError::Unavailable` when the backend cannot
    /// enumerate.
    async fn fetch_all(&self) -> TabletResult<Vec<R>>;

    /// Create or update a record by id.
    ///
    /// Must be idempotent. Fails with `StorageError::Persistence` when the
    /// backend rejects the write.
    async fn crupdate(&self, record: R) -> TabletResult<R>;

    /// Upsert a batch of records.
    ///
    /// The default implementation writes sequentially and stops at the first
    /// failure, so a rejected record is always reported.
    async fn crupdates(&self, records: Vec<R>) -> TabletResult<Vec<R>> {
        let mut written = Vec::with_capacity(records.len());
        for record in records {
            written.push(self.crupdate(record).await?);
        }
        Ok(written)
    }

    /// Delete the record with the given id.
    ///
    /// Returns true if a record existed and was removed.
    async fn delete_by_id(&self, id: &RecordId) -> TabletResult<bool>;

    /// Delete the given record. Only its id is consulted.
    async fn delete(&self, record: &R) -> TabletResult<bool> {
        self.delete_by_id(record.id()).await
    }

    /// All records matching `predicate`.
    async fn filter(&self, predicate: RecordPredicate<'_, R>) -> TabletResult<Vec<R>> {
        let records = self.fetch_all().await?;
        Ok(records.into_iter().filter(|record| predicate(record)).collect())
    }

    /// The first record matching `predicate`.
    async fn find(&self, predicate: RecordPredicate<'_, R>) -> TabletResult<Option<R>> {
        let records = self.fetch_all().await?;
        Ok(records.into_iter().find(|record| predicate(record)))
    }

    /// One-line human description.
    fn describe(&self) -> String {
        format!("Tablet: {} \n{} entries", self.name(), self.num_entries())
    }
}

/// Copy every record of `source` into `target`.
pub async fn copy_table<R: Record>(
    source: &dyn Table<R>,
    target: &dyn Table<R>,
) -> TabletResult<Vec<R>> {
    target.crupdates(source.to_array()).await
}
