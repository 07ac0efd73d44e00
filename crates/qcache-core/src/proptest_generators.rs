//! Property-based test generators for the caching query engine.
//!
//! Provides `proptest` strategies for source item vectors, a small bank of
//! named integer predicates, and utilization thresholds, used to check the
//! quantified invariants of §8 across many randomly generated shapes.

use std::sync::Arc;

use proptest::prelude::*;

use crate::query_core::Predicate;

/// Shared proptest configuration: fewer cases than a typical leaf-type
/// generator since each case drives a full engine run.
#[must_use]
pub fn proptest_config() -> ProptestConfig {
    ProptestConfig {
        cases: 256,
        max_shrink_iters: 2000,
        ..ProptestConfig::default()
    }
}

/// A named, deterministic integer predicate, with a reference closure used to
/// compute the expected matching subset independently of the engine.
#[derive(Clone, Copy)]
pub struct NamedPredicate {
    pub name: &'static str,
    pub reference: fn(i32) -> bool,
}

impl NamedPredicate {
    #[must_use]
    pub fn as_filter(&self) -> Predicate<i32> {
        let f = self.reference;
        Arc::new(move |x: &i32| f(*x))
    }
}

/// The bank of predicates strategies draw from: each is cheap, total, and
/// deterministic, matching §3's predicate contract.
pub const PREDICATE_BANK: &[NamedPredicate] = &[
    NamedPredicate {
        name: "even",
        reference: |x| x % 2 == 0,
    },
    NamedPredicate {
        name: "positive",
        reference: |x| x > 0,
    },
    NamedPredicate {
        name: "lt_ten",
        reference: |x| x < 10,
    },
    NamedPredicate {
        name: "gt_neg_ten",
        reference: |x| x > -10,
    },
    NamedPredicate {
        name: "multiple_of_three",
        reference: |x| x % 3 == 0,
    },
];

/// Strategy for a source vector of up to 200 small integers, with enough
/// range overlap to exercise duplicates and the dedup policy.
pub fn arb_source() -> impl Strategy<Value = Vec<i32>> {
    proptest::collection::vec(-20..20i32, 0..200)
}

/// Strategy for a non-empty subset of [`PREDICATE_BANK`], returned as a
/// `Vec` of bank indices (order is the registration order used by the test).
pub fn arb_predicate_subset() -> impl Strategy<Value = Vec<usize>> {
    proptest::collection::vec(0..PREDICATE_BANK.len(), 1..=PREDICATE_BANK.len())
        .prop_map(|mut idxs| {
            idxs.sort_unstable();
            idxs.dedup();
            idxs
        })
        .prop_filter("at least one predicate", |idxs| !idxs.is_empty())
}

/// Strategy for a valid utilization threshold in `[0.0, 1.0]`.
pub fn arb_utilization_threshold() -> impl Strategy<Value = f64> {
    (0..=1000i32).prop_map(|n| f64::from(n) / 1000.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::QueryCore;

    fn expected_matches(source: &[i32], predicate_idxs: &[usize]) -> Vec<i32> {
        source
            .iter()
            .copied()
            .filter(|x| predicate_idxs.iter().all(|&i| (PREDICATE_BANK[i].reference)(*x)))
            .collect()
    }

    proptest! {
        #![proptest_config(proptest_config())]

        /// Every item the engine yields passes every active predicate (§8
        /// "the set of items yielded equals the predicate intersection").
        #[test]
        fn filtered_iteration_matches_reference(source in arb_source(), predicate_idxs in arb_predicate_subset()) {
            let mut query = QueryCore::new_from_materialized(source.clone(), false);
            for &idx in &predicate_idxs {
                let p = PREDICATE_BANK[idx];
                query.add_filter(p.as_filter(), p.name).unwrap();
            }
            let mut actual: Vec<i32> = query.iterate().collect();
            let mut expected = expected_matches(&source, &predicate_idxs);
            actual.sort_unstable();
            expected.sort_unstable();
            prop_assert_eq!(actual, expected);
        }

        /// Order independence: registering the same predicate set in two
        /// different orders yields the same multiset of results.
        #[test]
        fn filter_order_independence(source in arb_source(), predicate_idxs in arb_predicate_subset()) {
            let mut forward = QueryCore::new_from_materialized(source.clone(), false);
            for &idx in &predicate_idxs {
                let p = PREDICATE_BANK[idx];
                forward.add_filter(p.as_filter(), p.name).unwrap();
            }
            let mut reversed = QueryCore::new_from_materialized(source.clone(), false);
            for &idx in predicate_idxs.iter().rev() {
                let p = PREDICATE_BANK[idx];
                reversed.add_filter(p.as_filter(), p.name).unwrap();
            }
            let mut a: Vec<i32> = forward.iterate().collect();
            let mut b: Vec<i32> = reversed.iterate().collect();
            a.sort_unstable();
            b.sort_unstable();
            prop_assert_eq!(a, b);
        }

        /// Idempotence: iterating twice after completion yields identical
        /// output and does not keep mutating cache counters.
        #[test]
        fn repeated_iteration_is_idempotent(source in arb_source(), predicate_idxs in arb_predicate_subset()) {
            let mut query = QueryCore::new_from_materialized(source, false);
            for &idx in &predicate_idxs {
                let p = PREDICATE_BANK[idx];
                query.add_filter(p.as_filter(), p.name).unwrap();
            }
            let first: Vec<i32> = query.iterate().collect();
            let second: Vec<i32> = query.iterate().collect();
            prop_assert_eq!(first, second);
        }

        /// Dedup policy: with dedup on, `count()` never exceeds the distinct
        /// item count; with dedup off, it equals the raw source length.
        #[test]
        fn dedup_policy_bounds_count(source in arb_source()) {
            let distinct = {
                let mut s = source.clone();
                s.sort_unstable();
                s.dedup();
                s.len() as u64
            };
            let dedup_on = QueryCore::new_from_materialized(source.clone(), true);
            prop_assert_eq!(dedup_on.count(), distinct);
            let dedup_off = QueryCore::new_from_materialized(source.clone(), false);
            prop_assert_eq!(dedup_off.count(), source.len() as u64);
        }
    }
}
