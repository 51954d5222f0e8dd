//! Table name catalog.
//!
//! Every table claims a unique name in a catalog when it is created. The
//! catalog also keeps a handle on each table's counters so it can render a
//! summary of all tables without knowing their record types.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use tablet_core::{RegistryError, StorageError, TableCounters, TableSummary, TabletResult};

struct CatalogEntry {
    backend: &'static str,
    counters: Arc<TableCounters>,
}

/// Registry of claimed table names.
#[derive(Default)]
pub struct TableCatalog {
    entries: RwLock<BTreeMap<String, CatalogEntry>>,
}

impl TableCatalog {
    /// Create a new, empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `name` for a table of the given backend type.
    ///
    /// Returns the counters the table should record its operations in.
    pub fn claim(&self, name: &str, backend: &'static str) -> TabletResult<Arc<TableCounters>> {
        let mut entries = self.entries.write().map_err(|_| StorageError::LockPoisoned)?;
        if entries.contains_key(name) {
            return Err(RegistryError::DuplicateTable {
                name: name.to_string(),
            }
            .into());
        }
        let counters = Arc::new(TableCounters::new());
        entries.insert(
            name.to_string(),
            CatalogEntry {
                backend,
                counters: Arc::clone(&counters),
            },
        );
        Ok(counters)
    }

    /// Release a claimed name. Returns false if it was not claimed.
    pub fn release(&self, name: &str) -> bool {
        match self.entries.write() {
            Ok(mut entries) => entries.remove(name).is_some(),
            Err(_) => false,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries
            .read()
            .map(|entries| entries.contains_key(name))
            .unwrap_or(false)
    }

    /// Claimed names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.entries
            .read()
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Counter snapshot for one table.
    pub fn summary(&self, name: &str) -> Option<TableSummary> {
        let entries = self.entries.read().ok()?;
        entries.get(name).map(|entry| entry.counters.snapshot())
    }

    /// Multi-line report of every table and its non-zero counters.
    pub fn report(&self, verbose: bool) -> String {
        let entries = match self.entries.read() {
            Ok(entries) => entries,
            Err(_) => return "Table Summary: unavailable".to_string(),
        };
        let mut info = vec!["Table Summary:".to_string(), format!("{} tables", entries.len())];
        for (name, entry) in entries.iter() {
            info.push(format!(" {} [{}]", name, entry.backend));
            for line in entry.counters.snapshot().lines(verbose) {
                info.push(format!("   {}", line));
            }
        }
        info.join("\n ")
    }
}

impl std::fmt::Debug for TableCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableCatalog")
            .field("names", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tablet_core::TabletError;

    #[test]
    fn test_claim_and_release() {
        let catalog = TableCatalog::new();
        catalog.claim("widgets", "MemoryTable").unwrap();
        assert!(catalog.contains("widgets"));
        assert_eq!(catalog.len(), 1);

        assert!(catalog.release("widgets"));
        assert!(!catalog.release("widgets"));
        assert!(catalog.is_empty());
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let catalog = TableCatalog::new();
        catalog.claim("widgets", "MemoryTable").unwrap();
        let result = catalog.claim("widgets", "JsonTable");
        match result {
            Err(TabletError::Registry(RegistryError::DuplicateTable { name })) => {
                assert_eq!(name, "widgets");
            }
            other => panic!("expected DuplicateTable, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_report_lists_tables_and_counters() {
        let catalog = TableCatalog::new();
        let counters = catalog.claim("widgets", "MemoryTable").unwrap();
        catalog.claim("gadgets", "JsonTable").unwrap();
        counters.record_read();
        counters.record_read();

        let report = catalog.report(false);
        assert!(report.starts_with("Table Summary:"));
        assert!(report.contains("2 tables"));
        assert!(report.contains("widgets [MemoryTable]"));
        assert!(report.contains("gadgets [JsonTable]"));
        assert!(report.contains("READS: 2"));
        assert!(!report.contains("ERRORS"));
    }

    #[test]
    fn test_summary_reflects_shared_counters() {
        let catalog = TableCatalog::new();
        let counters = catalog.claim("widgets", "MemoryTable").unwrap();
        counters.record_deletion();
        assert_eq!(catalog.summary("widgets").unwrap().deletions, 1);
        assert!(catalog.summary("missing").is_none());
    }
}
