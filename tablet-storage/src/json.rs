//! Flat-file JSON table backend.
//!
//! Each table lives in `<dir>/<name>.tablet.json`:
//!
//! ```json
//! {
//!   "__name": "widgets",
//!   "_lastUpdate": "2024-05-01T12:00:00+00:00",
//!   "data": [ { "_id": "a", ... }, { "_id": "b", ... } ]
//! }
//! ```
//!
//! Records are held in memory. Writes only mark the table dirty; a background
//! task writes dirty tables to disk once per flush interval, so bursts of
//! writes cost a single file write.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tablet_core::{
    ConfigError, Record, RecordId, StorageError, TableCounters, TableSummary, TabletConfig,
    TabletError, TabletResult,
};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::catalog::TableCatalog;
use crate::table::Table;

/// Extension appended to the table name to form its file name.
pub const FILE_EXT: &str = ".tablet.json";

#[derive(Serialize)]
struct StoreFile<'a, R> {
    #[serde(rename = "__name")]
    name: &'a str,
    #[serde(rename = "_lastUpdate")]
    last_update: String,
    data: Vec<R>,
}

struct JsonTableInner<R: Record> {
    name: String,
    path: PathBuf,
    records: RwLock<BTreeMap<RecordId, R>>,
    dirty: AtomicBool,
    write_lock: tokio::sync::Mutex<()>,
    counters: Arc<TableCounters>,
    catalog: Arc<TableCatalog>,
}

impl<R: Record> JsonTableInner<R> {
    fn path_string(&self) -> String {
        self.path.display().to_string()
    }

    fn io_error(&self, err: impl std::fmt::Display) -> StorageError {
        StorageError::Io {
            path: self.path_string(),
            reason: err.to_string(),
        }
    }

    fn corrupt(&self, reason: impl Into<String>) -> StorageError {
        StorageError::Corrupt {
            path: self.path_string(),
            reason: reason.into(),
        }
    }

    fn snapshot(&self) -> Vec<R> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    fn parse(&self, raw: &str) -> TabletResult<Vec<R>> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| self.corrupt(format!("not valid JSON: {}", e)))?;
        let data = value
            .get("data")
            .and_then(Value::as_array)
            .ok_or_else(|| self.corrupt("data is formatted incorrectly, needs to be an array"))?;
        data.iter()
            .map(|entry| {
                serde_json::from_value::<R>(entry.clone())
                    .map_err(|e| TabletError::from(self.corrupt(format!("invalid record: {}", e))))
            })
            .collect()
    }

    async fn load(&self) -> TabletResult<usize> {
        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| self.io_error(e))?;
        }

        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.flush().await?;
                return Ok(0);
            }
            Err(e) => return Err(self.io_error(e).into()),
        };

        let records = self.parse(&raw).inspect_err(|_| self.counters.record_error())?;
        let count = records.len();
        {
            let mut map = self.records.write().map_err(|_| StorageError::LockPoisoned)?;
            for record in records {
                map.insert(record.id().clone(), record);
            }
        }
        self.counters.set_detail("READ_ENTRIES", count.to_string());
        Ok(count)
    }

    /// Write the current state to disk through a temp file.
    async fn flush(&self) -> TabletResult<()> {
        let _guard = self.write_lock.lock().await;
        self.dirty.store(false, Ordering::SeqCst);

        let data = self.snapshot();
        let entries = data.len();
        let file = StoreFile {
            name: &self.name,
            last_update: Utc::now().to_rfc3339(),
            data,
        };

        let result = async {
            let contents =
                serde_json::to_string_pretty(&file).map_err(|e| self.io_error(e))?;
            let tmp = self.path.with_extension("json.tmp");
            tokio::fs::write(&tmp, contents)
                .await
                .map_err(|e| self.io_error(e))?;
            tokio::fs::rename(&tmp, &self.path)
                .await
                .map_err(|e| self.io_error(e))?;
            Ok::<(), StorageError>(())
        }
        .await;

        match result {
            Ok(()) => {
                self.counters.set_detail("SAVED_ENTRIES", entries.to_string());
                debug!(table = %self.name, entries, "flushed json table");
                Ok(())
            }
            Err(e) => {
                self.dirty.store(true, Ordering::SeqCst);
                self.counters.record_error();
                Err(e.into())
            }
        }
    }
}

impl<R: Record> Drop for JsonTableInner<R> {
    fn drop(&mut self) {
        self.catalog.release(&self.name);
    }
}

/// Table persisted as a single JSON file with debounced writes.
///
/// Dropping the table stops the background flusher without a final write;
/// call [`JsonTable::close`] (or [`JsonTable::flush`]) to persist pending
/// changes first.
pub struct JsonTable<R: Record> {
    inner: Arc<JsonTableInner<R>>,
    flusher: Mutex<Option<JoinHandle<()>>>,
}

impl<R: Record> JsonTable<R> {
    /// Open (or create) `<dir>/<name>.tablet.json`.
    ///
    /// Must be called from within a tokio runtime: it spawns the background
    /// flusher. A zero `flush_interval` is rejected.
    pub async fn open(
        catalog: &Arc<TableCatalog>,
        name: impl Into<String>,
        dir: impl AsRef<Path>,
        flush_interval: Duration,
    ) -> TabletResult<Self> {
        if flush_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "flush_interval".to_string(),
                value: format!("{:?}", flush_interval),
                reason: "flush interval must be greater than zero".to_string(),
            }
            .into());
        }
        let name = name.into();
        let counters = catalog.claim(&name, "JsonTable")?;
        let path = dir.as_ref().join(format!("{}{}", name, FILE_EXT));
        counters.set_detail("FILE", path.display().to_string());

        let inner = Arc::new(JsonTableInner {
            name,
            path,
            records: RwLock::new(BTreeMap::new()),
            dirty: AtomicBool::new(false),
            write_lock: tokio::sync::Mutex::new(()),
            counters,
            catalog: Arc::clone(catalog),
        });

        let loaded = inner.load().await?;
        info!(table = %inner.name, path = %inner.path_string(), loaded, "opened json table");

        let flusher = spawn_flusher(Arc::downgrade(&inner), flush_interval);
        Ok(Self {
            inner,
            flusher: Mutex::new(Some(flusher)),
        })
    }

    /// Open using the directory and flush interval of `config`.
    pub async fn open_with_config(
        catalog: &Arc<TableCatalog>,
        name: impl Into<String>,
        config: &TabletConfig,
    ) -> TabletResult<Self> {
        config.validate()?;
        Self::open(catalog, name, &config.json_dir, config.flush_interval()).await
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Whether there are writes not yet on disk.
    pub fn is_dirty(&self) -> bool {
        self.inner.dirty.load(Ordering::SeqCst)
    }

    /// Write pending changes now.
    pub async fn flush(&self) -> TabletResult<()> {
        self.inner.flush().await
    }

    /// Flush and stop the background flusher.
    pub async fn close(&self) -> TabletResult<()> {
        self.stop_flusher();
        self.inner.flush().await
    }

    fn stop_flusher(&self) {
        let handle = self
            .flusher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }

    fn mark_dirty(&self) {
        self.inner.dirty.store(true, Ordering::SeqCst);
    }
}

fn spawn_flusher<R: Record>(inner: Weak<JsonTableInner<R>>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let Some(table) = inner.upgrade() else {
                break;
            };
            if table.dirty.load(Ordering::SeqCst) {
                if let Err(e) = table.flush().await {
                    warn!(table = %table.name, error = %e, "background flush failed");
                }
            }
        }
    })
}

#[async_trait]
impl<R: Record> Table<R> for JsonTable<R> {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn num_entries(&self) -> usize {
        self.inner
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn to_array(&self) -> Vec<R> {
        self.inner.snapshot()
    }

    fn summary(&self) -> TableSummary {
        self.inner.counters.snapshot()
    }

    async fn fetch(&self, id: &RecordId) -> TabletResult<Option<R>> {
        self.inner.counters.record_read();
        let records = self
            .inner
            .records
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        Ok(records.get(id).cloned())
    }

    async fn fetch_all(&self) -> TabletResult<Vec<R>> {
        self.inner.counters.record_read();
        Ok(self.inner.snapshot())
    }

    async fn crupdate(&self, record: R) -> TabletResult<R> {
        let previous = self
            .inner
            .records
            .write()
            .map_err(|_| StorageError::LockPoisoned)?
            .insert(record.id().clone(), record.clone());
        if previous.is_some() {
            self.inner.counters.record_update();
        } else {
            self.inner.counters.record_creation();
        }
        self.mark_dirty();
        Ok(record)
    }

    async fn delete_by_id(&self, id: &RecordId) -> TabletResult<bool> {
        let removed = self
            .inner
            .records
            .write()
            .map_err(|_| StorageError::LockPoisoned)?
            .remove(id)
            .is_some();
        if removed {
            self.inner.counters.record_deletion();
            self.mark_dirty();
        }
        Ok(removed)
    }
}

impl<R: Record> Drop for JsonTable<R> {
    fn drop(&mut self) {
        self.stop_flusher();
    }
}

impl<R: Record> std::fmt::Debug for JsonTable<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonTable")
            .field("name", &self.inner.name)
            .field("path", &self.inner.path)
            .field("dirty", &self.is_dirty())
            .finish()
    }
}
