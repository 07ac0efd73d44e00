//! Lightweight, disposable scope over a shared [`crate::shared_state::SharedState`].

use std::sync::Arc;

use crate::enumerator::CachingEnumerator;
use crate::error::QueryResult;
use crate::query_core::{HandleCore, Predicate};
use crate::Item;

/// A nested query scope forked from a [`crate::QueryCore`] or another
/// `ScopedHandle`.
///
/// Filters added here are local to this scope and invisible to the parent;
/// the underlying cache pool and materialized source are shared with every
/// other scope descended from the same root. Dropping (or explicitly
/// [`ScopedHandle::dispose`]ing) a scope retires the filter caches it
/// introduced that no ancestor scope still relies on (§4.E) — disposal is
/// idempotent, matching §5's "double-dispose is a no-op".
pub struct ScopedHandle<T: Item> {
    core: HandleCore<T>,
}

impl<T: Item> ScopedHandle<T> {
    pub(crate) fn from_core(core: HandleCore<T>) -> Self {
        Self { core }
    }

    /// Register a named filter local to this scope, using the engine's
    /// configured default utilization threshold.
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

    /// Remove a filter from this scope. The underlying
    /// [`crate::filter_cache::FilterCache`] stays in the pool.
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
    /// off), shared across every scope rooted at the same source.
    pub fn count(&self) -> u64 {
        self.core.count()
    }

    /// Count of items passing this scope's current filters, memoized on
    /// first use.
    pub fn filtered_count(&self) -> u64 {
        self.core.filtered_count()
    }

    /// Whether `item` is present in the source.
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

    /// Fork a nested scope sharing the same `SharedState`, carrying a
    /// value-copy of this scope's current filter map.
    #[must_use]
    pub fn start_scoped_query(&self) -> Self {
        Self::from_core(self.core.fork())
    }

    /// Retire any filter caches introduced exclusively by this scope.
    /// Idempotent; also invoked by `Drop`.
    pub fn dispose(&mut self) {
        self.core.dispose();
    }
}

impl<T: Item> Drop for ScopedHandle<T> {
    fn drop(&mut self) {
        self.core.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::QueryCore;

    #[test]
    fn scope_filters_are_invisible_to_parent() {
        let mut root = QueryCore::new_from_materialized(vec![1, 2, 3, 4], true);
        {
            let mut scope = root.start_scoped_query();
            scope.add_filter(Arc::new(|x: &i32| x % 2 == 0), "even").unwrap();
            let scoped_items: Vec<i32> = scope.iterate().collect();
            assert_eq!(scoped_items, vec![2, 4]);
        }
        let root_items: Vec<i32> = root.iterate().collect();
        assert_eq!(root_items, vec![1, 2, 3, 4]);
    }

    #[test]
    fn sibling_scopes_do_not_cross_contaminate() {
        let mut root = QueryCore::new_from_materialized(vec![1, 2, 3, 4, 5, 6], true);
        let mut scope_a = root.start_scoped_query();
        scope_a.add_filter(Arc::new(|x: &i32| x % 2 == 0), "even").unwrap();
        let mut scope_b = root.start_scoped_query();
        scope_b.add_filter(Arc::new(|x: &i32| *x > 3), "gt3").unwrap();

        let a: Vec<i32> = scope_a.iterate().collect();
        let b: Vec<i32> = scope_b.iterate().collect();
        assert_eq!(a, vec![2, 4, 6]);
        assert_eq!(b, vec![4, 5, 6]);
    }

    #[test]
    fn nested_scopes_compose_filters() {
        let mut root = QueryCore::new_from_materialized(vec![1, 2, 3, 4, 5, 6, 7, 8], true);
        let mut a = root.start_scoped_query();
        a.add_filter(Arc::new(|x: &i32| x % 2 == 0), "even").unwrap();
        let mut c = a.start_scoped_query();
        c.add_filter(Arc::new(|x: &i32| *x > 4), "gt4").unwrap();
        let d_items: Vec<i32> = {
            let mut d = c.start_scoped_query();
            d.add_filter(Arc::new(|x: &i32| *x < 4), "lt4").unwrap(); // even & >4 & <4 = empty
            d.iterate().collect()
        };
        assert!(d_items.is_empty());
        let c_items: Vec<i32> = c.iterate().collect();
        assert_eq!(c_items, vec![6, 8]);
    }

    #[test]
    fn dispose_retires_only_exclusively_owned_caches() {
        let mut root = QueryCore::new_from_materialized(vec![1, 2, 3, 4], true);
        root.add_filter(Arc::new(|x: &i32| x % 2 == 0), "even").unwrap();
        let mut scope = root.start_scoped_query();
        scope.add_filter(Arc::new(|x: &i32| *x > 2), "gt2").unwrap();
        scope.dispose();
        // The parent's "even" cache must still drive the parent's iteration.
        let root_items: Vec<i32> = root.iterate().collect();
        assert_eq!(root_items, vec![2, 4]);
    }

    #[test]
    fn double_dispose_is_a_no_op() {
        let mut root = QueryCore::new_from_materialized(vec![1, 2, 3], true);
        let mut scope = root.start_scoped_query();
        scope.add_filter(Arc::new(|x: &i32| *x > 1), "gt1").unwrap();
        scope.dispose();
        scope.dispose(); // must not panic or double-retire
    }

    #[test]
    fn cache_reuse_across_disposed_and_readded_scope() {
        let mut root = QueryCore::new_from_materialized(vec![1, 2, 3, 4], true);
        {
            let mut scope = root.start_scoped_query();
            scope.add_filter(Arc::new(|x: &i32| x % 2 == 0), "even").unwrap();
            let _: Vec<i32> = scope.iterate().collect(); // populate + complete the cache
        }
        root.add_filter(Arc::new(|x: &i32| x % 2 == 0), "even").unwrap();
        let items: Vec<i32> = root.iterate().collect();
        assert_eq!(items, vec![2, 4]);
    }
}
