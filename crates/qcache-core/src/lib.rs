//! An in-memory caching query engine over a read-mostly, reference-typed
//! item collection.
//!
//! Clients build queries by fluently composing named boolean predicates
//! ("filters"); the engine enumerates items lazily, memoizes per-filter
//! results, reorders filter evaluation by observed selectivity, and supports
//! nested "scoped" queries whose locally added filters are discarded on
//! scope exit while the shared cache pool persists.
//!
//! ```
//! use qcache_core::QueryCore;
//!
//! let items = vec![1, 2, 3, 4, 5, 6];
//! let mut query = QueryCore::new_from_materialized(items, true);
//! query.add_filter(std::sync::Arc::new(|x: &i32| x % 2 == 0), "even").unwrap();
//! let evens: Vec<i32> = query.iterate().collect();
//! assert_eq!(evens, vec![2, 4, 6]);
//! ```

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
mod filter_cache;
pub mod source;

pub mod enumerator;
pub mod query_core;
pub mod scoped_handle;
mod shared_state;

#[cfg(test)]
pub mod proptest_generators;

use std::hash::Hash;

pub use config::EngineConfig;
pub use enumerator::CachingEnumerator;
pub use error::{QueryError, QueryResult};
pub use query_core::{Predicate, QueryCore};
pub use scoped_handle::ScopedHandle;
pub use source::{MaterializedSource, Source};

/// Marker trait for types usable as query-engine items.
///
/// `Clone` is expected to be a cheap handle-copy (e.g. `T = Arc<Inner>`): the
/// engine never deep-clones item state, only reference handles, and
/// predicate-relevant fields must not mutate after an item enters any cache.
pub trait Item: Clone + Eq + Hash + Send + Sync + 'static {}

impl<T> Item for T where T: Clone + Eq + Hash + Send + Sync + 'static {}
