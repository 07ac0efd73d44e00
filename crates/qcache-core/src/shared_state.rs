//! Process-private state shared across a root query and all scopes forked
//! from it.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::error::QueryResult;
use crate::filter_cache::FilterCache;
use crate::source::Source;
use crate::Item;

/// The mutable fields guarded by [`SharedState`]'s single lock.
pub(crate) struct SharedStateInner<T> {
    source: Arc<dyn Source<T>>,
    items: Vec<T>,
    dedup_items: HashSet<T>,
    items_complete: bool,
    dedup_policy: bool,
    cache_pool: Vec<Arc<FilterCache<T>>>,
    /// Bumped on any mutation or completion event. A handle is "ordered"
    /// (§4.D `filters_ordered`) iff its own last-seen epoch equals this one;
    /// tracked per-handle in [`crate::query_core::HandleState`] since
    /// exhaustion (a state-only event) has no particular handle to flag.
    reorder_epoch: u64,
}

impl<T> SharedStateInner<T>
where
    T: Item,
{
    fn find_cache(&self, name: &str) -> Option<Arc<FilterCache<T>>> {
        self.cache_pool.iter().find(|c| c.name().as_ref() == name).cloned()
    }

    fn register_cache(
        &mut self,
        name: impl Into<Arc<str>>,
        predicate: Arc<dyn Fn(&T) -> bool + Send + Sync>,
        utilization_threshold: f64,
    ) -> QueryResult<Arc<FilterCache<T>>> {
        let expected_item_count = self.items_complete.then(|| self.dedup_items.len() as u64);
        let cache = Arc::new(FilterCache::new(
            name,
            predicate,
            expected_item_count,
            utilization_threshold,
        )?);
        self.cache_pool.push(Arc::clone(&cache));
        self.reorder_epoch = self.reorder_epoch.wrapping_add(1);
        Ok(cache)
    }

    fn reorder_pool(&mut self) {
        self.cache_pool.sort_by_key(|c| c.selectivity_key());
    }

    /// "First publisher wins": only overwrites `items`/`dedup_items` and
    /// marks completion if no concurrent iteration has already published.
    /// Returns `true` if this call was the one that published.
    fn publish_enumeration(&mut self, items: Vec<T>, dedup_items: HashSet<T>) -> bool {
        if self.items_complete {
            return false;
        }
        let count = dedup_items.len() as u64;
        self.items = items;
        self.dedup_items = dedup_items;
        self.items_complete = true;
        for cache in &self.cache_pool {
            cache.set_expected_item_count(count);
        }
        self.reorder_epoch = self.reorder_epoch.wrapping_add(1);
        debug!(distinct_items = count, "source enumeration published");
        true
    }
}

/// Cheaply cloneable handle to the state shared by a root query and every
/// scope descended from it.
pub(crate) struct SharedState<T> {
    inner: Arc<Mutex<SharedStateInner<T>>>,
}

impl<T> Clone for SharedState<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> SharedState<T>
where
    T: Item,
{
    pub(crate) fn new_materialized(items: Vec<T>, dedup_policy: bool) -> Self {
        let dedup_items: HashSet<T> = items.iter().cloned().collect();
        let materialized = crate::source::MaterializedSource::new(items.clone());
        let inner = SharedStateInner {
            source: Arc::new(materialized),
            items,
            dedup_items,
            items_complete: true,
            dedup_policy,
            cache_pool: Vec::new(),
            reorder_epoch: 0,
        };
        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    pub(crate) fn new_lazy(source: Arc<dyn Source<T>>, dedup_policy: bool) -> Self {
        let inner = SharedStateInner {
            source,
            items: Vec::new(),
            dedup_items: HashSet::new(),
            items_complete: false,
            dedup_policy,
            cache_pool: Vec::new(),
            reorder_epoch: 0,
        };
        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SharedStateInner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn dedup_policy(&self) -> bool {
        self.lock().dedup_policy
    }

    pub(crate) fn items_complete(&self) -> bool {
        self.lock().items_complete
    }

    pub(crate) fn source(&self) -> Arc<dyn Source<T>> {
        Arc::clone(&self.lock().source)
    }

    pub(crate) fn dedup_len(&self) -> usize {
        self.lock().dedup_items.len()
    }

    pub(crate) fn items_len(&self) -> usize {
        self.lock().items.len()
    }

    pub(crate) fn dedup_items_snapshot(&self) -> Vec<T> {
        self.lock().dedup_items.iter().cloned().collect()
    }

    pub(crate) fn items_snapshot(&self) -> Vec<T> {
        self.lock().items.clone()
    }

    pub(crate) fn contains(&self, item: &T) -> bool {
        self.lock().dedup_items.contains(item)
    }

    pub(crate) fn reorder_epoch(&self) -> u64 {
        self.lock().reorder_epoch
    }

    pub(crate) fn reorder_pool(&self) {
        self.lock().reorder_pool();
    }

    pub(crate) fn find_cache(&self, name: &str) -> Option<Arc<FilterCache<T>>> {
        self.lock().find_cache(name)
    }

    pub(crate) fn find_or_register_cache(
        &self,
        name: impl Into<Arc<str>>,
        predicate: Arc<dyn Fn(&T) -> bool + Send + Sync>,
        utilization_threshold: f64,
    ) -> QueryResult<Arc<FilterCache<T>>> {
        let name = name.into();
        let mut state = self.lock();
        if let Some(existing) = state.find_cache(&name) {
            return Ok(existing);
        }
        state.register_cache(name, predicate, utilization_threshold)
    }

    /// Snapshot the caches named in `active_names`, in current pool order.
    pub(crate) fn snapshot_active_caches(&self, active_names: &[Arc<str>]) -> Vec<Arc<FilterCache<T>>> {
        let state = self.lock();
        state
            .cache_pool
            .iter()
            .filter(|c| active_names.iter().any(|n| n.as_ref() == c.name().as_ref()))
            .cloned()
            .collect()
    }

    pub(crate) fn publish_enumeration(&self, items: Vec<T>, dedup_items: HashSet<T>) -> bool {
        self.lock().publish_enumeration(items, dedup_items)
    }

    pub(crate) fn try_disable_cache(&self, name: &str) -> bool {
        self.find_cache(name).is_some_and(|c| c.try_disable())
    }
}
