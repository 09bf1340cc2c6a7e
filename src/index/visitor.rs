//! Visitor-driven index traversal.

use std::cmp::Ordering;
use std::marker::PhantomData;

use crate::index::predicate::Predicate;

/// Selectively visits the entries of an index.
///
/// During descent the tree asks the visitor about each child subtree's
/// key range before loading it, so uninteresting subtrees are pruned
/// without touching their pages; each reached leaf is handed over whole
/// for local filtering. Traversal stops once the visitor is satiated.
pub trait IndexVisitor<K, V> {
    /// Whether the visitor wants the entries between `first` and
    /// `second`. `None` bounds mean "before the first separator" /
    /// "after the last".
    fn interested_in_range(
        &self,
        first: Option<&K>,
        second: Option<&K>,
        cmp: &dyn Fn(&K, &K) -> Ordering,
    ) -> bool;

    /// Receives the ordered keys and values of one leaf.
    fn visit(&mut self, keys: &[K], values: &[V], cmp: &dyn Fn(&K, &K) -> Ordering);

    /// Whether the visitor has quenched its thirst for results.
    fn satiated(&self) -> bool {
        false
    }
}

/// Adapts a [`Predicate`] into the visitor contract, invoking a callback
/// for each matching entry, with an optional result cap.
pub struct PredicateVisitor<K, V, F: FnMut(&K, &V)> {
    predicate: Predicate<K>,
    limit: Option<usize>,
    on_match: F,
    _marker: PhantomData<fn(&V)>,
}

impl<K, V, F: FnMut(&K, &V)> PredicateVisitor<K, V, F> {
    /// Visits every entry matching `predicate`.
    pub fn new(predicate: Predicate<K>, on_match: F) -> Self {
        Self {
            predicate,
            limit: None,
            on_match,
            _marker: PhantomData,
        }
    }

    /// Visits at most `limit` entries matching `predicate`.
    pub fn with_limit(predicate: Predicate<K>, limit: usize, on_match: F) -> Self {
        Self {
            predicate,
            limit: Some(limit),
            on_match,
            _marker: PhantomData,
        }
    }
}

impl<K, V, F: FnMut(&K, &V)> IndexVisitor<K, V> for PredicateVisitor<K, V, F> {
    fn interested_in_range(
        &self,
        first: Option<&K>,
        second: Option<&K>,
        cmp: &dyn Fn(&K, &K) -> Ordering,
    ) -> bool {
        self.predicate.interested_in_range(first, second, cmp)
    }

    fn visit(&mut self, keys: &[K], values: &[V], cmp: &dyn Fn(&K, &K) -> Ordering) {
        for (key, value) in keys.iter().zip(values) {
            if self.satiated() {
                break;
            }
            if self.predicate.interested_in_key(key, cmp) {
                if let Some(limit) = &mut self.limit {
                    *limit -= 1;
                }
                (self.on_match)(key, value);
            }
        }
    }

    fn satiated(&self) -> bool {
        self.limit == Some(0)
    }
}
