//! Single-pass, filter-applying iterator with a source/cache-driven dual mode.
//!
//! A [`CachingEnumerator`] is instantiated fresh for every [`crate::QueryCore::iterate`]
//! / [`crate::ScopedHandle::iterate`] call. It snapshots the active filter
//! caches once at construction, picks a driver (§4.C of the design), and then
//! lazily pulls candidates one at a time — nothing is collected eagerly, so
//! an unbounded source degrades to plain predicate evaluation rather than
//! hanging on a full materialization.

use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{QueryError, QueryResult};
use crate::filter_cache::FilterCache;
use crate::shared_state::SharedState;
use crate::Item;

enum Driver<T> {
    /// Driven by a completed, non-disabled cache's hit set (its own name is
    /// excluded from the residual list, membership already implies it passed).
    CompletedCache(std::vec::IntoIter<T>),
    /// Driven by the already-materialized `items`/`dedup_items` snapshot.
    Materialized(std::vec::IntoIter<T>),
    /// Driven by a fresh pass over the lazy source; collects both an
    /// order-preserving list and a dedup set for eventual publication.
    Source {
        inner: Box<dyn Iterator<Item = T> + Send>,
        collected: Vec<T>,
        dedup_collected: HashSet<T>,
    },
}

/// Lazy iterator that applies a snapshotted set of filter caches to each
/// candidate drawn from its driver, short-circuiting once the source is
/// known complete.
pub struct CachingEnumerator<T: Item> {
    shared: SharedState<T>,
    residual: Vec<Arc<FilterCache<T>>>,
    driver: Driver<T>,
    items_complete_snapshot: bool,
    published: bool,
}

impl<T: Item> CachingEnumerator<T> {
    pub(crate) fn new(shared: SharedState<T>, active_names: Vec<Arc<str>>) -> Self {
        let active_caches = shared.snapshot_active_caches(&active_names);
        let items_complete = shared.items_complete();

        if items_complete {
            if let Some(head) = active_caches.first() {
                if !head.is_disabled() && head.is_complete() {
                    let hits = head.hit_set_snapshot();
                    let residual = active_caches[1..].to_vec();
                    return Self {
                        shared,
                        residual,
                        driver: Driver::CompletedCache(hits.into_iter()),
                        items_complete_snapshot: true,
                        published: true,
                    };
                }
            }

            let base = if shared.dedup_policy() {
                shared.dedup_items_snapshot()
            } else {
                shared.items_snapshot()
            };
            return Self {
                shared,
                residual: active_caches,
                driver: Driver::Materialized(base.into_iter()),
                items_complete_snapshot: true,
                published: true,
            };
        }

        let source = shared.source();
        Self {
            shared,
            residual: active_caches,
            driver: Driver::Source {
                inner: source.iter(),
                collected: Vec::new(),
                dedup_collected: HashSet::new(),
            },
            items_complete_snapshot: false,
            published: false,
        }
    }

    /// Resetting an already-started enumeration is not supported (§4.E).
    #[allow(clippy::unused_self)]
    pub fn reset(&mut self) -> QueryResult<()> {
        Err(QueryError::unsupported("iterator reset"))
    }

    /// Pull exactly one candidate through the driver and residual filters,
    /// reporting whether it passed every residual filter. Returns `None`
    /// once the driver is exhausted, publishing results to [`SharedState`]
    /// on the first (and only) source-driven exhaustion.
    fn advance_raw(&mut self) -> Option<(T, bool)> {
        let candidate = match &mut self.driver {
            Driver::CompletedCache(it) => it.next(),
            Driver::Materialized(it) => it.next(),
            Driver::Source {
                inner,
                collected,
                dedup_collected,
            } => inner.next().inspect(|item| {
                collected.push(item.clone());
                dedup_collected.insert(item.clone());
            }),
        };

        let Some(item) = candidate else {
            self.finalize_if_needed();
            return None;
        };

        let mut all_passed = true;
        for cache in &self.residual {
            let passed = cache.evaluate(&item);
            if !passed {
                all_passed = false;
                if self.items_complete_snapshot {
                    break;
                }
            }
        }
        Some((item, all_passed))
    }

    /// Single-pass aggregate: the item with the greatest (`want_max`) or
    /// least integer key, folded over *every* candidate the driver produces
    /// regardless of whether it passes the active filters — matching §4.D's
    /// "fuse the aggregate with the enumeration" contract, which operates on
    /// the full distinct item set rather than the scope-filtered view.
    pub(crate) fn fold_extreme(mut self, key_fn: &dyn Fn(&T) -> i64, want_max: bool) -> Option<T> {
        let mut best: Option<(T, i64)> = None;
        while let Some((item, _passed)) = self.advance_raw() {
            let key = key_fn(&item);
            let replace = match &best {
                None => true,
                Some((_, best_key)) => {
                    if want_max {
                        key > *best_key
                    } else {
                        key < *best_key
                    }
                }
            };
            if replace {
                best = Some((item, key));
            }
        }
        best.map(|(item, _)| item)
    }

    fn finalize_if_needed(&mut self) {
        if self.published {
            return;
        }
        if let Driver::Source {
            collected,
            dedup_collected,
            ..
        } = &mut self.driver
        {
            let items = std::mem::take(collected);
            let dedup_items = std::mem::take(dedup_collected);
            self.shared.publish_enumeration(items, dedup_items);
            self.published = true;
        }
    }
}

impl<T: Item> Iterator for CachingEnumerator<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        loop {
            match self.advance_raw() {
                Some((item, true)) => return Some(item),
                Some((_, false)) => continue,
                None => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc as StdArc;

    fn shared_lazy(items: Vec<i32>) -> SharedState<i32> {
        let source: StdArc<dyn crate::source::Source<i32>> = StdArc::new(move || items.clone().into_iter());
        SharedState::new_lazy(source, true)
    }

    #[test]
    fn source_driven_yields_all_and_publishes_on_exhaustion() {
        let shared = shared_lazy(vec![1, 2, 3]);
        let enumerator = CachingEnumerator::new(shared.clone(), vec![]);
        let items: Vec<i32> = enumerator.collect();
        assert_eq!(items, vec![1, 2, 3]);
        assert!(shared.items_complete());
        assert_eq!(shared.dedup_len(), 3);
    }

    #[test]
    fn residual_filter_excludes_non_matching_items() {
        let shared = shared_lazy(vec![1, 2, 3, 4]);
        let cache = shared
            .find_or_register_cache("even", StdArc::new(|x: &i32| x % 2 == 0), 0.5)
            .unwrap();
        let names = vec![StdArc::clone(cache.name())];
        let enumerator = CachingEnumerator::new(shared, names);
        let items: Vec<i32> = enumerator.collect();
        assert_eq!(items, vec![2, 4]);
    }

    #[test]
    fn dropping_mid_traversal_does_not_publish() {
        let shared = shared_lazy(vec![1, 2, 3]);
        {
            let mut enumerator = CachingEnumerator::new(shared.clone(), vec![]);
            assert_eq!(enumerator.next(), Some(1));
        }
        assert!(!shared.items_complete());
    }

    #[test]
    fn completed_cache_driver_skips_itself_in_residual() {
        let shared = SharedState::new_materialized(vec![1, 2, 3, 4], true);
        let cache = shared
            .find_or_register_cache("even", StdArc::new(|x: &i32| x % 2 == 0), 0.5)
            .unwrap();
        // Populate and complete the cache with a first pass.
        let names = vec![StdArc::clone(cache.name())];
        let _: Vec<i32> = CachingEnumerator::new(shared.clone(), names.clone()).collect();
        assert!(cache.is_complete());

        shared.reorder_pool();
        let enumerator = CachingEnumerator::new(shared, names);
        let items: Vec<i32> = enumerator.collect();
        assert_eq!(items, vec![2, 4]);
    }

    #[test]
    fn fold_extreme_finds_max_and_min_in_one_pass() {
        let shared = shared_lazy(vec![3, 1, 4, 1, 5, 9, 2, 6]);
        let max = CachingEnumerator::new(shared.clone(), vec![]).fold_extreme(&|x: &i32| i64::from(*x), true);
        assert_eq!(max, Some(9));
        // Re-drive a second pass: source is already complete, driver falls
        // back to the materialized path.
        let min = CachingEnumerator::new(shared, vec![]).fold_extreme(&|x: &i32| i64::from(*x), false);
        assert_eq!(min, Some(1));
    }

    #[test]
    fn reset_is_unsupported() {
        let shared = shared_lazy(vec![1]);
        let mut enumerator = CachingEnumerator::new(shared, vec![]);
        let err = enumerator.reset().unwrap_err();
        assert_eq!(err.error_type(), "UNSUPPORTED_OPERATION");
    }
}
