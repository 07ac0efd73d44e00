//! The client-supplied item sequence, modeled as a restartable enumerable.

/// A sequence of items that can be traversed repeatedly from the start.
///
/// Each call to [`Source::iter`] produces an independent, fresh, fully owned
/// traversal — this mirrors a restartable-enumerable shape rather than a
/// single consumable [`Iterator`], since [`crate::enumerator::CachingEnumerator`]
/// may need to fall back to a fresh source pass (e.g. to build the dedup
/// set) independent of any earlier partial traversal. The returned iterator
/// is `'static` rather than borrowing `self`, so a [`CachingEnumerator`] can
/// hold an `Arc<dyn Source<T>>` and the iterator it produces side by side
/// without a self-referential struct.
///
/// [`CachingEnumerator`]: crate::enumerator::CachingEnumerator
pub trait Source<T>: Send + Sync {
    /// Start a new traversal over this source's items.
    fn iter(&self) -> Box<dyn Iterator<Item = T> + Send>;
}

impl<T, F, I> Source<T> for F
where
    F: Fn() -> I + Send + Sync,
    I: Iterator<Item = T> + Send + 'static,
{
    fn iter(&self) -> Box<dyn Iterator<Item = T> + Send> {
        Box::new(self())
    }
}

/// A source backed by an already-materialized [`Vec`].
///
/// Used by [`crate::query_core::QueryCore::new_from_materialized`] rather
/// than blanket-implementing [`Source`] for `Vec<T>` directly, so that
/// trait resolution never has to choose between the `Vec` impl and the
/// `Fn() -> Iterator` blanket impl above.
#[derive(Debug, Clone)]
pub struct MaterializedSource<T> {
    items: Vec<T>,
}

impl<T> MaterializedSource<T> {
    /// Wrap an already-materialized collection as a [`Source`].
    #[must_use]
    pub const fn new(items: Vec<T>) -> Self {
        Self { items }
    }

    /// Borrow the underlying items.
    #[must_use]
    pub fn items(&self) -> &[T] {
        &self.items
    }
}

impl<T> Source<T> for MaterializedSource<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn iter(&self) -> Box<dyn Iterator<Item = T> + Send> {
        // Must return a `'static` iterator per the trait signature, so this
        // clones the backing `Vec` rather than borrowing `self.items`.
        Box::new(self.items.clone().into_iter())
    }
}
