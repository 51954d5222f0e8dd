//! Load coordinator.
//!
//! Turns raw records into cached entities, running a kind's factory at most
//! once per id no matter how many callers race for it. The cache check, the
//! in-flight check and the in-flight insert happen under a single lock with
//! no `.await` in between; only the factory itself runs outside the lock.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use tablet_core::{BuildError, RecordId, StorageError, TabletResult};
use tracing::{debug, warn};

use super::traits::{Entity, Factory};
use crate::table::Table;

/// A reconstruction in progress, shareable between every caller waiting on
/// the same id.
pub(crate) type SharedBuild<E> = Shared<BoxFuture<'static, TabletResult<Arc<E>>>>;

/// Result of a synchronous look at a kind's cache and in-flight map.
pub(crate) enum Lookup<E> {
    Cached(Arc<E>),
    Pending(SharedBuild<E>),
    Miss,
}

struct Bindings<E: Entity> {
    table: Arc<dyn Table<E::Record>>,
    factory: Factory<E>,
}

struct KindState<E> {
    cache: HashMap<RecordId, Arc<E>>,
    in_flight: HashMap<RecordId, SharedBuild<E>>,
}

/// Everything bound to one registered kind.
///
/// Bindings can be replaced by re-registration; cache and in-flight map live
/// as long as the slot.
pub(crate) struct KindSlot<E: Entity> {
    label: Arc<str>,
    bindings: RwLock<Bindings<E>>,
    state: Mutex<KindState<E>>,
}

/// Type-erased view of a slot for cross-kind reporting.
pub(crate) trait SlotInfo: Send + Sync {
    fn label(&self) -> &str;
    fn num_cached(&self) -> usize;
    fn num_in_flight(&self) -> usize;
}

impl<E: Entity> KindSlot<E> {
    pub(crate) fn new(
        label: Arc<str>,
        table: Arc<dyn Table<E::Record>>,
        factory: Factory<E>,
    ) -> Self {
        Self {
            label,
            bindings: RwLock::new(Bindings { table, factory }),
            state: Mutex::new(KindState {
                cache: HashMap::new(),
                in_flight: HashMap::new(),
            }),
        }
    }

    /// Replace table and factory, leaving cache and in-flight map alone.
    pub(crate) fn rebind(
        &self,
        table: Arc<dyn Table<E::Record>>,
        factory: Factory<E>,
    ) -> TabletResult<()> {
        let mut bindings = self
            .bindings
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        *bindings = Bindings { table, factory };
        Ok(())
    }

    pub(crate) fn table(&self) -> TabletResult<Arc<dyn Table<E::Record>>> {
        let bindings = self
            .bindings
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        Ok(Arc::clone(&bindings.table))
    }

    pub(crate) fn factory(&self) -> TabletResult<Factory<E>> {
        let bindings = self
            .bindings
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        Ok(Arc::clone(&bindings.factory))
    }

    fn lock_state(&self) -> TabletResult<MutexGuard<'_, KindState<E>>> {
        self.state
            .lock()
            .map_err(|_| StorageError::LockPoisoned.into())
    }

    pub(crate) fn lookup(&self, id: &RecordId) -> TabletResult<Lookup<E>> {
        let state = self.lock_state()?;
        if let Some(entity) = state.cache.get(id) {
            return Ok(Lookup::Cached(Arc::clone(entity)));
        }
        if let Some(pending) = state.in_flight.get(id) {
            return Ok(Lookup::Pending(pending.clone()));
        }
        Ok(Lookup::Miss)
    }

    pub(crate) fn cached(&self, id: &RecordId) -> TabletResult<Option<Arc<E>>> {
        Ok(self.lock_state()?.cache.get(id).cloned())
    }

    /// Put `entity` in the cache under its own id, replacing any previous
    /// instance. Returns the replaced instance.
    pub(crate) fn insert(&self, entity: Arc<E>) -> TabletResult<Option<Arc<E>>> {
        let id = entity.id().clone();
        Ok(self.lock_state()?.cache.insert(id, entity))
    }

    pub(crate) fn evict(&self, id: &RecordId) -> TabletResult<bool> {
        Ok(self.lock_state()?.cache.remove(id).is_some())
    }

    pub(crate) fn cache_snapshot(&self) -> TabletResult<HashMap<RecordId, Arc<E>>> {
        Ok(self.lock_state()?.cache.clone())
    }

    pub(crate) fn in_flight_ids(&self) -> TabletResult<Vec<RecordId>> {
        let mut ids: Vec<RecordId> = self.lock_state()?.in_flight.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    /// Resolve `record` to its single live entity.
    ///
    /// 1. cached id: return the cached entity, the factory is not called
    /// 2. id already building: wait on that same build
    /// 3. otherwise: register a new shared build in the in-flight map, then
    ///    wait on it
    pub(crate) async fn build(self: &Arc<Self>, record: E::Record) -> TabletResult<Arc<E>> {
        let id = tablet_core::Record::id(&record).clone();
        let pending = {
            let mut state = self.lock_state()?;
            if let Some(entity) = state.cache.get(&id) {
                debug!(kind = %self.label, %id, "cache hit");
                return Ok(Arc::clone(entity));
            }
            match state.in_flight.get(&id) {
                Some(pending) => {
                    debug!(kind = %self.label, %id, "joining in-flight build");
                    pending.clone()
                }
                None => {
                    let pending = Self::start(Arc::clone(self), self.factory()?, id.clone(), record);
                    state.in_flight.insert(id, pending.clone());
                    pending
                }
            }
        };
        pending.await
    }

    /// Wrap one factory call, plus its cache bookkeeping, in a shared future.
    ///
    /// The bookkeeping runs inside the future so it happens exactly once,
    /// whichever waiter ends up driving it. A panicking factory is reported
    /// as a failed build like any other error.
    fn start(
        slot: Arc<Self>,
        factory: Factory<E>,
        id: RecordId,
        record: E::Record,
    ) -> SharedBuild<E> {
        async move {
            debug!(kind = %slot.label, %id, "building entity");
            let outcome = match AssertUnwindSafe(async move { factory(record).await })
                .catch_unwind()
                .await
            {
                Ok(outcome) => outcome.map_err(|e| e.to_string()),
                Err(panic) => Err(format!("factory panicked: {}", panic_message(&*panic))),
            };
            slot.finish(id, outcome)
        }
        .boxed()
        .shared()
    }

    fn finish(&self, id: RecordId, outcome: Result<E, String>) -> TabletResult<Arc<E>> {
        // Cleanup must happen even if another thread panicked while holding
        // the lock, otherwise the id could never be built again.
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.in_flight.remove(&id);

        let entity = match outcome {
            Ok(entity) => entity,
            Err(reason) => {
                warn!(kind = %self.label, %id, error = %reason, "entity build failed");
                return Err(BuildError::Failed {
                    kind: self.label.to_string(),
                    id,
                    reason,
                }
                .into());
            }
        };

        if entity.id() != &id {
            warn!(kind = %self.label, %id, got = %entity.id(), "factory produced wrong id");
            return Err(BuildError::Invariant {
                kind: self.label.to_string(),
                expected: id,
                got: entity.id().clone(),
            }
            .into());
        }

        // An instance constructed or saved while the factory ran wins.
        let entity = state
            .cache
            .entry(id)
            .or_insert_with(|| Arc::new(entity));
        Ok(Arc::clone(entity))
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        *message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}

impl<E: Entity> SlotInfo for KindSlot<E> {
    fn label(&self) -> &str {
        &self.label
    }

    fn num_cached(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cache
            .len()
    }

    fn num_in_flight(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .in_flight
            .len()
    }
}
