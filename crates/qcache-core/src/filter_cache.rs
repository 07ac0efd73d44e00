//! Per-predicate memoized hit set, hit/miss counters, and self-disablement.

use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use indexmap::IndexSet;
use tracing::debug;

use crate::error::{QueryError, QueryResult};

/// A named, memoizing predicate cache.
///
/// Retained in [`crate::shared_state::SharedStateInner::cache_pool`] for the
/// lifetime of the root query; may become [`FilterCache::is_disabled`] but is
/// never removed from the pool.
pub(crate) struct FilterCache<T> {
    name: Arc<str>,
    predicate: Arc<dyn Fn(&T) -> bool + Send + Sync>,
    state: Mutex<FilterCacheState<T>>,
}

struct FilterCacheState<T> {
    items: IndexSet<T>,
    num_hits: u64,
    num_misses: u64,
    expected_item_count: Option<u64>,
    max_allowed_misses: u64,
    utilization_threshold: f64,
    disabled: bool,
}

impl<T> FilterCacheState<T> {
    fn recompute_max_allowed_misses(&mut self) {
        self.max_allowed_misses = self.expected_item_count.map_or(0, |n| {
            #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let max = (n as f64 * self.utilization_threshold).ceil() as u64;
            max
        });
    }

    /// §4.A `try_disable`: disables only once `expected_item_count` is known
    /// and `num_misses` has exceeded `max_allowed_misses`; a no-op otherwise.
    fn try_disable(&mut self) -> bool {
        if self.disabled {
            return false;
        }
        if self.expected_item_count.is_some() && self.num_misses > self.max_allowed_misses {
            self.disabled = true;
            self.items.clear();
            true
        } else {
            false
        }
    }

    fn is_complete(&self) -> bool {
        match self.expected_item_count {
            Some(n) => self.num_hits + self.num_misses == n,
            None => false,
        }
    }
}

impl<T> FilterCache<T>
where
    T: Clone + Eq + Hash + Send + Sync,
{
    /// Construct a new filter cache. Rejects an empty `name` or a threshold
    /// outside `[0.0, 1.0]`.
    pub(crate) fn new(
        name: impl Into<Arc<str>>,
        predicate: Arc<dyn Fn(&T) -> bool + Send + Sync>,
        expected_item_count: Option<u64>,
        utilization_threshold: f64,
    ) -> QueryResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(QueryError::validation("filter name must not be empty"));
        }
        if !(0.0..=1.0).contains(&utilization_threshold) {
            return Err(QueryError::validation(format!(
                "utilization_threshold {utilization_threshold} must be in [0.0, 1.0]"
            )));
        }

        let mut state = FilterCacheState {
            items: IndexSet::new(),
            num_hits: 0,
            num_misses: 0,
            expected_item_count,
            max_allowed_misses: 0,
            utilization_threshold,
            disabled: false,
        };
        state.recompute_max_allowed_misses();

        Ok(Self {
            name,
            predicate,
            state: Mutex::new(state),
        })
    }

    pub(crate) fn name(&self) -> &Arc<str> {
        &self.name
    }

    fn lock_state(&self) -> MutexGuard<'_, FilterCacheState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn is_disabled(&self) -> bool {
        self.lock_state().disabled
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.lock_state().is_complete()
    }

    pub(crate) fn num_hits(&self) -> u64 {
        self.lock_state().num_hits
    }

    pub(crate) fn num_misses(&self) -> u64 {
        self.lock_state().num_misses
    }

    /// Selectivity key used for pool reordering: ascending order places the
    /// most restrictive caches first.
    pub(crate) fn selectivity_key(&self) -> u64 {
        let state = self.lock_state();
        if state.num_misses == 0 {
            state.num_hits
        } else {
            state.num_hits / state.num_misses
        }
    }

    /// Snapshot this cache's hit set in insertion order. Used by the
    /// completed-cache driver.
    pub(crate) fn hit_set_snapshot(&self) -> Vec<T> {
        self.lock_state().items.iter().cloned().collect()
    }

    pub(crate) fn record_hit(&self, item: &T) {
        let mut state = self.lock_state();
        state.items.insert(item.clone());
        state.num_hits += 1;
    }

    pub(crate) fn record_hit_cached(&self) {
        self.lock_state().num_hits += 1;
    }

    pub(crate) fn record_miss(&self) {
        let mut state = self.lock_state();
        state.num_misses += 1;
        if state.try_disable() {
            debug!(filter = %self.name, "filter cache self-disabled on utilization threshold");
        }
    }

    /// Set the known total of distinct items, recompute `max_allowed_misses`,
    /// and attempt disablement.
    pub(crate) fn set_expected_item_count(&self, n: u64) {
        let mut state = self.lock_state();
        state.expected_item_count = Some(n);
        state.recompute_max_allowed_misses();
        if state.try_disable() {
            debug!(filter = %self.name, "filter cache self-disabled after expected item count set");
        }
    }

    /// Evaluate `item` against this cache, consulting and updating the hit
    /// set as needed.
    ///
    /// The predicate is always invoked strictly outside the internal lock
    /// (two-phase locking): a panicking predicate can never poison
    /// [`FilterCache::state`] or leave it partially mutated, matching the
    /// "no partial cache mutation across a failing element" invariant.
    pub(crate) fn evaluate(&self, item: &T) -> bool {
        {
            let state = self.lock_state();
            if state.disabled {
                drop(state);
                return (self.predicate)(item);
            }
            if state.items.contains(item) {
                drop(state);
                self.record_hit_cached();
                return true;
            }
        }

        let passed = (self.predicate)(item);
        if passed {
            self.record_hit(item);
        } else {
            self.record_miss();
        }
        passed
    }

    /// §4.A `try_disable`, exposed for callers outside this module (scope
    /// disposal, via [`crate::shared_state::SharedState::try_disable_cache`]).
    /// Delegates to the same conditional logic as `record_miss` and
    /// `set_expected_item_count`: a no-op unless `num_misses` has exceeded
    /// `max_allowed_misses`. See DESIGN.md's Open Question resolutions for
    /// why scope disposal does not force-clear a cache outright.
    pub(crate) fn try_disable(&self) -> bool {
        self.lock_state().try_disable()
    }
}

impl<T> fmt::Debug for FilterCache<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterCache").field("name", &self.name).finish_non_exhaustive()
    }
}
