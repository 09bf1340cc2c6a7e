//! Lazy, forward-only iteration over the leaf chain.

use std::cmp::Ordering;

use crate::codec::{KeyCodec, ValCodec};
use crate::error::Result;
use crate::index::btree::BTreeIndex;
use crate::index::node::NodeData;
use crate::index::predicate::Predicate;
use crate::paged::{PageId, Paged};

struct LeafState<K, V> {
    keys: Vec<K>,
    values: Vec<V>,
    next: Option<PageId>,
    cursor: usize,
}

/// Iterator over `(key, value)` pairs in ascending key order.
///
/// Produced by [`BTreeIndex::iter`], [`iter_from`](BTreeIndex::iter_from)
/// and [`iter_where`](BTreeIndex::iter_where). Leaves are walked through
/// their forward links, so the iterator never re-descends from the root;
/// it is restarted by creating a new one.
pub struct Iter<'a, P: Paged, K, V> {
    index: &'a BTreeIndex<K, V>,
    paged: &'a mut P,
    leaf: Option<LeafState<K, V>>,
    start: Option<K>,
    predicate: Option<Predicate<K>>,
    finished: bool,
}

impl<'a, P, K, V> Iter<'a, P, K, V>
where
    P: Paged,
    K: KeyCodec + Ord + Clone + Send + Sync + 'static,
    V: ValCodec + Clone + Send + Sync + 'static,
{
    pub(crate) fn new(
        index: &'a BTreeIndex<K, V>,
        paged: &'a mut P,
        start_page: Option<PageId>,
        start: Option<K>,
        predicate: Option<Predicate<K>>,
    ) -> Result<Self> {
        let mut iter = Self {
            index,
            paged,
            leaf: None,
            start,
            predicate,
            finished: start_page.is_none(),
        };
        if let Some(page) = start_page {
            iter.load_leaf(page)?;
        }
        Ok(iter)
    }

    fn load_leaf(&mut self, page: PageId) -> Result<()> {
        let node = self.index.load_node(self.paged, page)?;
        match &*node {
            NodeData::Leaf { keys, values, next } => {
                let mut state = LeafState {
                    keys: keys.clone(),
                    values: values.clone(),
                    next: *next,
                    cursor: 0,
                };
                if let Some(start) = &self.start {
                    state.cursor = state
                        .keys
                        .partition_point(|key| self.index.compare(key, start) == Ordering::Less);
                }
                self.leaf = Some(state);
                Ok(())
            }
            NodeData::Branch { .. } => {
                self.finished = true;
                Err(crate::error::QuireError::Index(
                    "leaf chain reached a branch",
                ))
            }
        }
    }

    fn step(&mut self) -> Result<Option<(K, V)>> {
        loop {
            if self.finished {
                return Ok(None);
            }
            let Some(state) = &mut self.leaf else {
                self.finished = true;
                return Ok(None);
            };
            if state.cursor < state.keys.len() {
                let key = state.keys[state.cursor].clone();
                let value = state.values[state.cursor].clone();
                state.cursor += 1;
                if let Some(predicate) = &self.predicate {
                    let cmp = |a: &K, b: &K| self.index.compare(a, b);
                    if !predicate.interested_in_key(&key, &cmp) {
                        continue;
                    }
                }
                return Ok(Some((key, value)));
            }
            // Leaf exhausted: stop early when nothing at or beyond its
            // last key can interest the predicate.
            let boundary = state.keys.last().cloned();
            let next = state.next;
            if let (Some(predicate), Some(boundary)) = (&self.predicate, &boundary) {
                let cmp = |a: &K, b: &K| self.index.compare(a, b);
                if !predicate.interested_in_range(Some(boundary), None, &cmp) {
                    self.finished = true;
                    return Ok(None);
                }
            }
            match next {
                Some(page) => self.load_leaf(page)?,
                None => {
                    self.finished = true;
                    return Ok(None);
                }
            }
        }
    }
}

impl<P, K, V> Iterator for Iter<'_, P, K, V>
where
    P: Paged,
    K: KeyCodec + Ord + Clone + Send + Sync + 'static,
    V: ValCodec + Clone + Send + Sync + 'static,
{
    type Item = Result<(K, V)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.step() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => None,
            Err(error) => {
                self.finished = true;
                Some(Err(error))
            }
        }
    }
}
