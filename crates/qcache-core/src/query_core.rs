//! Public root query handle: fluent filter composition, enumeration, and
//! scope forking over a process-shared [`SharedState`].

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use crate::config::EngineConfig;
use crate::enumerator::CachingEnumerator;
use crate::error::QueryResult;
use crate::scoped_handle::ScopedHandle;
use crate::shared_state::SharedState;
use crate::source::Source;
use crate::Item;

/// A boxed, thread-safe predicate over `&T` (§3 `Predicate`).
pub type Predicate<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// Tracks whether a handle's view of the cache pool order is current.
///
/// A handle is "ordered" (§4.D `filters_ordered`) iff it has seen an
/// ordering pass (`locally_ordered`) *and* no mutation or completion event
/// has bumped [`SharedState`]'s reorder epoch since (`epoch_seen` matches).
#[derive(Default)]
struct OrderTracker {
    locally_ordered: bool,
    epoch_seen: u64,
}

/// Fields and operations shared verbatim between [`QueryCore`] and
/// [`ScopedHandle`] — §4.D states one contract, §4.E says the scoped variant
/// is identical except for ownership of [`SharedState`] and disposal.
pub(crate) struct HandleCore<T: Item> {
    shared: SharedState<T>,
    filters: HashMap<Arc<str>, Predicate<T>>,
    pre_existing_filters: HashSet<Arc<str>>,
    order: Mutex<OrderTracker>,
    config: EngineConfig,
    filtered_count: Mutex<Option<u64>>,
    disposed: bool,
}

impl<T: Item> HandleCore<T> {
    fn new_root(shared: SharedState<T>, config: EngineConfig) -> Self {
        Self {
            shared,
            filters: HashMap::new(),
            pre_existing_filters: HashSet::new(),
            order: Mutex::new(OrderTracker::default()),
            config,
            filtered_count: Mutex::new(None),
            disposed: false,
        }
    }

    /// Fork a new handle over the same [`SharedState`], per §4.D
    /// `StartScopedQuery`: filters are copied by value, `pre_existing_filters`
    /// captures the forking point, and the fork always starts unordered.
    pub(crate) fn fork(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            filters: self.filters.clone(),
            pre_existing_filters: self.filters.keys().cloned().collect(),
            order: Mutex::new(OrderTracker::default()),
            config: self.config,
            filtered_count: Mutex::new(None),
            disposed: false,
        }
    }

    fn active_names(&self) -> Vec<Arc<str>> {
        self.filters.keys().cloned().collect()
    }

    pub(crate) fn add_filter(&mut self, predicate: Predicate<T>, name: impl Into<Arc<str>>) -> QueryResult<()> {
        let threshold = self.config.utilization_threshold;
        self.add_filter_with_threshold(predicate, name, threshold)
    }

    pub(crate) fn add_filter_with_threshold(
        &mut self,
        predicate: Predicate<T>,
        name: impl Into<Arc<str>>,
        utilization_threshold: f64,
    ) -> QueryResult<()> {
        let name: Arc<str> = name.into();
        if self.filters.contains_key(&name) {
            // Name collisions within a scope are silently ignored (§4.E).
            return Ok(());
        }
        self.shared
            .find_or_register_cache(Arc::clone(&name), Arc::clone(&predicate), utilization_threshold)?;
        self.filters.insert(name, predicate);
        self.mark_dirty();
        Ok(())
    }

    pub(crate) fn remove_filter(&mut self, name: &str) {
        if self.filters.remove(name).is_some() {
            self.mark_dirty();
        }
        // The underlying FilterCache stays in the pool for reuse by other scopes.
    }

    fn mark_dirty(&self) {
        self.order.lock().unwrap_or_else(PoisonError::into_inner).locally_ordered = false;
    }

    fn ensure_ordered(&self) {
        let current_epoch = self.shared.reorder_epoch();
        {
            let tracker = self.order.lock().unwrap_or_else(PoisonError::into_inner);
            if tracker.locally_ordered && tracker.epoch_seen == current_epoch {
                return;
            }
        }
        self.shared.reorder_pool();
        let mut tracker = self.order.lock().unwrap_or_else(PoisonError::into_inner);
        tracker.locally_ordered = true;
        tracker.epoch_seen = self.shared.reorder_epoch();
    }

    pub(crate) fn iterate(&self) -> CachingEnumerator<T> {
        self.ensure_ordered();
        CachingEnumerator::new(self.shared.clone(), self.active_names())
    }

    fn force_full_pass(&self) {
        if !self.shared.items_complete() {
            // Drains the enumerator fully; every driver candidate is
            // materialized into SharedState regardless of filter outcome.
            self.iterate().count();
        }
    }

    pub(crate) fn count(&self) -> u64 {
        self.force_full_pass();
        if self.shared.dedup_policy() {
            self.shared.dedup_len() as u64
        } else {
            self.shared.items_len() as u64
        }
    }

    pub(crate) fn filtered_count(&self) -> u64 {
        {
            let cached = self.filtered_count.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(n) = *cached {
                return n;
            }
        }
        let n = self.iterate().count() as u64;
        *self.filtered_count.lock().unwrap_or_else(PoisonError::into_inner) = Some(n);
        n
    }

    pub(crate) fn contains(&self, item: &T) -> bool {
        self.force_full_pass();
        self.shared.contains(item)
    }

    pub(crate) fn item_with_max(&self, key_fn: &dyn Fn(&T) -> i64) -> Option<T> {
        self.item_with_extreme(key_fn, true)
    }

    pub(crate) fn item_with_min(&self, key_fn: &dyn Fn(&T) -> i64) -> Option<T> {
        self.item_with_extreme(key_fn, false)
    }

    fn item_with_extreme(&self, key_fn: &dyn Fn(&T) -> i64, want_max: bool) -> Option<T> {
        if self.shared.items_complete() {
            let items = self.shared.dedup_items_snapshot();
            return if want_max {
                items.into_iter().max_by_key(|x| key_fn(x))
            } else {
                items.into_iter().min_by_key(|x| key_fn(x))
            };
        }
        self.iterate().fold_extreme(key_fn, want_max)
    }

    pub(crate) fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        let mut retired = 0usize;
        for name in self.filters.keys() {
            if !self.pre_existing_filters.contains(name) && self.shared.try_disable_cache(name) {
                retired += 1;
            }
        }
        if retired > 0 {
            debug!(retired, "scope disposed, retired exclusively-owned caches");
        }
    }
}

/// Root handle over a caching query engine built over a client-supplied
/// source of items `T`.
///
/// See the crate-level documentation for an overview and [`ScopedHandle`]
/// for nested, disposable filter scopes.
pub struct QueryCore<T: Item> {
    core: HandleCore<T>,
}

impl<T: Item> QueryCore<T> {
    /// Build a query over an already-materialized collection. `SharedState`
    /// starts complete; a first iteration with dedup on still performs one
    /// pass to build the dedup set if it isn't distinct already.
    #[must_use]
    pub fn new_from_materialized(items: Vec<T>, dedup_policy: bool) -> Self {
        Self::new_from_materialized_with_config(items, EngineConfig::with_dedup_policy(dedup_policy))
    }

    /// As [`Self::new_from_materialized`], with an explicit [`EngineConfig`]
    /// rather than just a dedup flag.
    #[must_use]
    pub fn new_from_materialized_with_config(items: Vec<T>, config: EngineConfig) -> Self {
        let shared = SharedState::new_materialized(items, config.dedup_policy);
        Self {
            core: HandleCore::new_root(shared, config),
        }
    }

    /// Build a query over a lazy, restartable [`Source`]. `SharedState`
    /// starts empty and incomplete until the first full enumeration.
    #[must_use]
    pub fn new_from_lazy(source: Arc<dyn Source<T>>, dedup_policy: bool) -> Self {
        Self::new_from_lazy_with_config(source, EngineConfig::with_dedup_policy(dedup_policy))
    }

    /// As [`Self::new_from_lazy`], with an explicit [`EngineConfig`].
    #[must_use]
    pub fn new_from_lazy_with_config(source: Arc<dyn Source<T>>, config: EngineConfig) -> Self {
        let shared = SharedState::new_lazy(source, config.dedup_policy);
        Self {
            core: HandleCore::new_root(shared, config),
        }
    }

    /// Register a named filter, using the engine's configured default
    /// utilization threshold. A repeated `name` within this scope is a no-op.
    pub fn add_filter(&mut self, predicate: Predicate<T>, name: impl Into<Arc<str>>) -> QueryResult<&mut Self> {
        self.core.add_filter(predicate, name)?;
        Ok(self)
    }

    /// As [`Self::add_filter`], overriding the per-cache utilization threshold.
    pub fn add_filter_with_threshold(
        &mut self,
        predicate: Predicate<T>,
        name: impl Into<Arc<str>>,
        utilization_threshold: f64,
    ) -> QueryResult<&mut Self> {
        self.core.add_filter_with_threshold(predicate, name, utilization_threshold)?;
        Ok(self)
    }

    /// Remove a filter from this scope's active set. The underlying
    /// [`crate::filter_cache::FilterCache`] stays in the pool for reuse.
    pub fn remove_filter(&mut self, name: &str) -> &mut Self {
        self.core.remove_filter(name);
        self
    }

    /// Iterate items passing every filter currently active in this scope.
    #[must_use]
    pub fn iterate(&self) -> CachingEnumerator<T> {
        self.core.iterate()
    }

    /// Total distinct items (dedup on) or total including duplicates (dedup
    /// off). Triggers a first-time enumeration if needed; O(1) thereafter.
    pub fn count(&self) -> u64 {
        self.core.count()
    }

    /// Count of items passing this scope's current filters, memoized on
    /// first use with no automatic invalidation (§4.D, §9 open question).
    pub fn filtered_count(&self) -> u64 {
        self.core.filtered_count()
    }

    /// Whether `item` is present in the source, forcing a first-time
    /// enumeration if needed.
    pub fn contains(&self, item: &T) -> bool {
        self.core.contains(item)
    }

    /// The item with the greatest `key_fn` value, over the full distinct
    /// source set (independent of this scope's active filters).
    pub fn item_with_max(&self, key_fn: impl Fn(&T) -> i64) -> Option<T> {
        self.core.item_with_max(&key_fn)
    }

    /// The item with the least `key_fn` value, over the full distinct
    /// source set (independent of this scope's active filters).
    pub fn item_with_min(&self, key_fn: impl Fn(&T) -> i64) -> Option<T> {
        self.core.item_with_min(&key_fn)
    }

    /// Fork a [`ScopedHandle`] sharing this query's `SharedState`, carrying a
    /// value-copy of the current filter map.
    #[must_use]
    pub fn start_scoped_query(&self) -> ScopedHandle<T> {
        ScopedHandle::from_core(self.core.fork())
    }

    /// Retire any filter caches introduced exclusively by this handle.
    /// Idempotent; a root handle has no `pre_existing_filters`, so disposing
    /// it retires every cache it registered.
    pub fn dispose(&mut self) {
        self.core.dispose();
    }
}
