//! A variable-fanout B+Tree index with optional simple-prefix
//! optimization.
//!
//! The tree stores as many entries per page as fit. Leaves are linked
//! forward for fast in-order iteration. With a prefixer configured, leaf
//! splits promote the shortest separator that still distinguishes the two
//! halves instead of an actual key; actual keys then exist only at leaf
//! level, which is also why deletions touch leaves only — no merging or
//! redistribution ever happens, and a leaf may sit empty until the whole
//! index is cleared or destroyed.

use std::cmp::Ordering;
use std::marker::PhantomData;
use std::sync::Arc;

use tracing::trace;

use crate::codec::{KeyCodec, ValCodec};
use crate::error::{QuireError, Result};
use crate::index::iter::Iter;
use crate::index::node::{NodeAccessor, NodeData};
use crate::index::predicate::Predicate;
use crate::index::prefixer::Prefixer;
use crate::index::visitor::IndexVisitor;
use crate::paged::{extent, PageId, Paged, PagedAccessor, EXTENT_HEADER_LEN};

/// Custom key ordering for an index.
pub type KeyComparator<K> = Arc<dyn Fn(&K, &K) -> Ordering + Send + Sync>;

/// Builds B+Tree indexes over any [`Paged`] store.
///
/// Key and value marshalling comes from the [`KeyCodec`]/[`ValCodec`]
/// implementations on `K` and `V`. Keys sort by their natural order
/// unless a comparator is configured; a prefixer turns the tree into a
/// simple-prefix B+Tree; deferred encoding (on by default) lets the store
/// retain decoded nodes and marshal them once at persist time, which
/// requires keys and values to be immutable while the index holds them.
pub struct BTreeIndexFactory<K, V> {
    comparator: Option<KeyComparator<K>>,
    prefixer: Option<Arc<dyn Prefixer<K>>>,
    deferred_encoding: bool,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V> Default for BTreeIndexFactory<K, V>
where
    K: KeyCodec + Ord + Clone + Send + Sync + 'static,
    V: ValCodec + Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> BTreeIndexFactory<K, V>
where
    K: KeyCodec + Ord + Clone + Send + Sync + 'static,
    V: ValCodec + Clone + Send + Sync + 'static,
{
    /// Creates a factory with natural ordering, no prefixer, and deferred
    /// encoding enabled.
    pub fn new() -> Self {
        Self {
            comparator: None,
            prefixer: None,
            deferred_encoding: true,
            _marker: PhantomData,
        }
    }

    /// Configures a custom key ordering.
    pub fn with_comparator(
        mut self,
        comparator: impl Fn(&K, &K) -> Ordering + Send + Sync + 'static,
    ) -> Self {
        self.comparator = Some(Arc::new(comparator));
        self
    }

    /// Configures a prefixer, making this a simple-prefix B+Tree.
    pub fn with_prefixer(mut self, prefixer: impl Prefixer<K> + 'static) -> Self {
        self.prefixer = Some(Arc::new(prefixer));
        self
    }

    /// Enables or disables deferred encoding.
    pub fn deferred_encoding(mut self, enabled: bool) -> Self {
        self.deferred_encoding = enabled;
        self
    }

    fn instance(&self, page: PageId) -> BTreeIndex<K, V> {
        BTreeIndex {
            page,
            comparator: self.comparator.clone(),
            prefixer: self.prefixer.clone(),
            accessor: NodeAccessor::new(self.deferred_encoding),
        }
    }

    /// Creates a new index: allocates a page and stores an empty root
    /// leaf there.
    pub fn create<P: Paged>(&self, paged: &mut P) -> Result<BTreeIndex<K, V>> {
        let page = paged.alloc()?;
        let index = self.instance(page);
        index.init(paged)?;
        Ok(index)
    }

    /// Reattaches to an existing index rooted at `page`.
    pub fn open(&self, page: PageId) -> BTreeIndex<K, V> {
        self.instance(page)
    }

    /// Reattaches to an existing index rooted at page 0.
    pub fn open_default(&self) -> BTreeIndex<K, V> {
        self.open(0)
    }

    /// Opens the index at page 0, creating it when the store is empty.
    pub fn open_or_create<P: Paged>(&self, paged: &mut P) -> Result<BTreeIndex<K, V>> {
        if paged.is_allocated(0) {
            Ok(self.open_default())
        } else {
            self.create(paged)
        }
    }
}

/// An ordered key/value index handle: root page number, key ordering,
/// optional prefixer and the deferred-encoding flag. The backing
/// [`Paged`] store is passed into every operation.
pub struct BTreeIndex<K, V> {
    page: PageId,
    comparator: Option<KeyComparator<K>>,
    prefixer: Option<Arc<dyn Prefixer<K>>>,
    accessor: NodeAccessor<K, V>,
}

type AncestorStack<K, V> = Vec<(PageId, Arc<NodeData<K, V>>)>;

impl<K, V> BTreeIndex<K, V>
where
    K: KeyCodec + Ord + Clone + Send + Sync + 'static,
    V: ValCodec + Clone + Send + Sync + 'static,
{
    /// The page number this index is rooted at.
    pub fn location(&self) -> PageId {
        self.page
    }

    /// Compares two keys under the configured ordering.
    pub(crate) fn compare(&self, a: &K, b: &K) -> Ordering {
        match &self.comparator {
            Some(comparator) => comparator(a, b),
            None => a.cmp(b),
        }
    }

    fn init<P: Paged>(&self, paged: &mut P) -> Result<()> {
        self.store_with_splits(paged, self.page, NodeData::empty_leaf(), Vec::new())
    }

    pub(crate) fn load_node<P: Paged>(
        &self,
        paged: &mut P,
        page: PageId,
    ) -> Result<Arc<NodeData<K, V>>> {
        paged
            .get(&self.accessor, page)
            .map_err(|error| match error {
                QuireError::Corruption(_) => QuireError::Index("could not read tree node"),
                other => other,
            })
    }

    /// Returns the value stored under `key`.
    pub fn get<P: Paged>(&self, paged: &mut P, key: &K) -> Result<Option<V>> {
        let (_, leaf, _) = self.descend(paged, key)?;
        Ok(leaf.leaf_get(|a, b| self.compare(a, b), key).cloned())
    }

    /// Whether `key` is present.
    pub fn contains_key<P: Paged>(&self, paged: &mut P, key: &K) -> Result<bool> {
        Ok(self.get(paged, key)?.is_some())
    }

    /// Inserts or replaces `key`, returning the previous value.
    pub fn put<P: Paged>(&self, paged: &mut P, key: K, value: V) -> Result<Option<V>> {
        let (page, leaf, stack) = self.descend(paged, &key)?;
        let mut leaf = (*leaf).clone();
        let previous = leaf.leaf_upsert(|a, b| self.compare(a, b), key, value)?;
        self.store_with_splits(paged, page, leaf, stack)?;
        Ok(previous)
    }

    /// Inserts `key` only when absent; otherwise returns the existing
    /// value unchanged.
    pub fn put_if_absent<P: Paged>(&self, paged: &mut P, key: K, value: V) -> Result<Option<V>> {
        let (page, leaf, stack) = self.descend(paged, &key)?;
        if let Some(existing) = leaf.leaf_get(|a, b| self.compare(a, b), &key) {
            return Ok(Some(existing.clone()));
        }
        let mut leaf = (*leaf).clone();
        leaf.leaf_upsert(|a, b| self.compare(a, b), key, value)?;
        self.store_with_splits(paged, page, leaf, stack)?;
        Ok(None)
    }

    /// Removes `key`, returning its value. Deletion only touches the
    /// leaf; branch structure and sibling leaves are left as they are.
    pub fn remove<P: Paged>(&self, paged: &mut P, key: &K) -> Result<Option<V>> {
        let (page, leaf, stack) = self.descend(paged, key)?;
        let mut leaf = (*leaf).clone();
        let removed = leaf.leaf_remove(|a, b| self.compare(a, b), key)?;
        if removed.is_none() {
            return Ok(None);
        }
        self.store_with_splits(paged, page, leaf, stack)?;
        Ok(removed)
    }

    /// Number of entries, by full traversal of the leaf chain.
    pub fn size<P: Paged>(&self, paged: &mut P) -> Result<usize> {
        let mut total = 0;
        let mut page = Some(self.leftmost_leaf(paged)?);
        while let Some(current) = page {
            let node = self.load_node(paged, current)?;
            match &*node {
                NodeData::Leaf { keys, next, .. } => {
                    total += keys.len();
                    page = *next;
                }
                NodeData::Branch { .. } => {
                    return Err(QuireError::Index("leaf chain reached a branch"))
                }
            }
        }
        Ok(total)
    }

    /// Whether the index holds no entries.
    pub fn is_empty<P: Paged>(&self, paged: &mut P) -> Result<bool> {
        Ok(self.first(paged)?.is_none())
    }

    /// First entry in key order, skipping leaves emptied by deletion.
    pub fn first<P: Paged>(&self, paged: &mut P) -> Result<Option<(K, V)>> {
        let mut page = Some(self.leftmost_leaf(paged)?);
        while let Some(current) = page {
            let node = self.load_node(paged, current)?;
            match &*node {
                NodeData::Leaf { keys, values, next } => {
                    if let (Some(key), Some(value)) = (keys.first(), values.first()) {
                        return Ok(Some((key.clone(), value.clone())));
                    }
                    page = *next;
                }
                NodeData::Branch { .. } => {
                    return Err(QuireError::Index("leaf chain reached a branch"))
                }
            }
        }
        Ok(None)
    }

    /// Last entry of the rightmost leaf, or `None` when that leaf has
    /// been emptied by deletions.
    pub fn last<P: Paged>(&self, paged: &mut P) -> Result<Option<(K, V)>> {
        let mut page = self.page;
        loop {
            let node = self.load_node(paged, page)?;
            match &*node {
                NodeData::Branch { children, .. } => {
                    page = *children
                        .last()
                        .ok_or(QuireError::Index("branch without children"))?;
                }
                NodeData::Leaf { keys, values, .. } => {
                    return Ok(keys.last().cloned().zip(values.last().cloned()));
                }
            }
        }
    }

    /// Removes every entry, freeing all pages except the root, which is
    /// reset to an empty leaf.
    pub fn clear<P: Paged>(&self, paged: &mut P) -> Result<()> {
        let root = self.load_node(paged, self.page)?;
        if let NodeData::Branch { children, .. } = &*root {
            for &child in children {
                self.free_subtree(paged, child)?;
            }
        }
        self.store_with_splits(paged, self.page, NodeData::empty_leaf(), Vec::new())
    }

    /// Clears the index and frees the root page itself.
    pub fn destroy<P: Paged>(&self, paged: &mut P) -> Result<()> {
        self.clear(paged)?;
        paged.clear(&self.accessor, self.page)?;
        paged.free(self.page)
    }

    /// Depth of the shallowest leaf.
    pub fn min_leaf_depth<P: Paged>(&self, paged: &mut P) -> Result<usize> {
        self.leaf_depth(paged, self.page, 1, true)
    }

    /// Depth of the deepest leaf.
    pub fn max_leaf_depth<P: Paged>(&self, paged: &mut P) -> Result<usize> {
        self.leaf_depth(paged, self.page, 1, false)
    }

    /// Iterates entries in ascending key order.
    pub fn iter<'a, P: Paged>(&'a self, paged: &'a mut P) -> Result<Iter<'a, P, K, V>> {
        let start = self.leftmost_leaf(paged)?;
        Iter::new(self, paged, Some(start), None, None)
    }

    /// Iterates entries in ascending key order starting at the first key
    /// at or after `start`.
    pub fn iter_from<'a, P: Paged>(
        &'a self,
        paged: &'a mut P,
        start: &K,
    ) -> Result<Iter<'a, P, K, V>> {
        let (page, _, _) = self.descend(paged, start)?;
        Iter::new(self, paged, Some(page), Some(start.clone()), None)
    }

    /// Iterates the entries matched by `predicate`, pruning subtrees its
    /// range test rejects.
    pub fn iter_where<'a, P: Paged>(
        &'a self,
        paged: &'a mut P,
        predicate: Predicate<K>,
    ) -> Result<Iter<'a, P, K, V>> {
        let start = self.first_interested_leaf(paged, &predicate)?;
        Iter::new(self, paged, start, None, Some(predicate))
    }

    /// Pushes traversal control to `visitor`: subtrees it is not
    /// interested in are never loaded, and traversal stops once it
    /// reports satiation.
    pub fn visit<P: Paged, Vis: IndexVisitor<K, V>>(
        &self,
        paged: &mut P,
        visitor: &mut Vis,
    ) -> Result<()> {
        self.visit_node(paged, self.page, visitor)
    }

    fn visit_node<P: Paged, Vis: IndexVisitor<K, V>>(
        &self,
        paged: &mut P,
        page: PageId,
        visitor: &mut Vis,
    ) -> Result<()> {
        if visitor.satiated() {
            return Ok(());
        }
        let node = self.load_node(paged, page)?;
        let cmp = |a: &K, b: &K| self.compare(a, b);
        match &*node {
            NodeData::Leaf { keys, values, .. } => {
                visitor.visit(keys, values, &cmp);
            }
            NodeData::Branch {
                separators,
                children,
            } => {
                for (index, &child) in children.iter().enumerate() {
                    if visitor.satiated() {
                        break;
                    }
                    let left = if index == 0 {
                        None
                    } else {
                        Some(&separators[index - 1])
                    };
                    let right = separators.get(index);
                    if visitor.interested_in_range(left, right, &cmp) {
                        self.visit_node(paged, child, visitor)?;
                    }
                }
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------
    // Descent and storage
    // -----------------------------------------------------------------

    /// Descends to the unique leaf that could hold `key`, returning the
    /// leaf page, its data, and the stack of branch ancestors walked.
    fn descend<P: Paged>(
        &self,
        paged: &mut P,
        key: &K,
    ) -> Result<(PageId, Arc<NodeData<K, V>>, AncestorStack<K, V>)> {
        let mut stack = Vec::new();
        let mut page = self.page;
        loop {
            let node = self.load_node(paged, page)?;
            match &*node {
                NodeData::Branch { children, .. } => {
                    let index = node.child_index(|a, b| self.compare(a, b), key);
                    let child = children[index];
                    stack.push((page, node.clone()));
                    page = child;
                }
                NodeData::Leaf { .. } => return Ok((page, node, stack)),
            }
        }
    }

    pub(crate) fn leftmost_leaf<P: Paged>(&self, paged: &mut P) -> Result<PageId> {
        let mut page = self.page;
        loop {
            let node = self.load_node(paged, page)?;
            match &*node {
                NodeData::Branch { children, .. } => {
                    page = *children
                        .first()
                        .ok_or(QuireError::Index("branch without children"))?;
                }
                NodeData::Leaf { .. } => return Ok(page),
            }
        }
    }

    fn first_interested_leaf<P: Paged>(
        &self,
        paged: &mut P,
        predicate: &Predicate<K>,
    ) -> Result<Option<PageId>> {
        let cmp = |a: &K, b: &K| self.compare(a, b);
        let mut page = self.page;
        loop {
            let node = self.load_node(paged, page)?;
            match &*node {
                NodeData::Branch {
                    separators,
                    children,
                } => {
                    let mut chosen = None;
                    for (index, &child) in children.iter().enumerate() {
                        let left = if index == 0 {
                            None
                        } else {
                            Some(&separators[index - 1])
                        };
                        let right = separators.get(index);
                        if predicate.interested_in_range(left, right, &cmp) {
                            chosen = Some(child);
                            break;
                        }
                    }
                    match chosen {
                        Some(child) => page = child,
                        None => return Ok(None),
                    }
                }
                NodeData::Leaf { .. } => return Ok(Some(page)),
            }
        }
    }

    fn leaf_depth<P: Paged>(
        &self,
        paged: &mut P,
        page: PageId,
        depth: usize,
        minimum: bool,
    ) -> Result<usize> {
        let node = self.load_node(paged, page)?;
        match &*node {
            NodeData::Leaf { .. } => Ok(depth),
            NodeData::Branch { children, .. } => {
                let mut result = None;
                for &child in children {
                    let candidate = self.leaf_depth(paged, child, depth + 1, minimum)?;
                    result = Some(match result {
                        None => candidate,
                        Some(current) if minimum => candidate.min(current),
                        Some(current) => candidate.max(current),
                    });
                }
                result.ok_or(QuireError::Index("branch without children"))
            }
        }
    }

    fn free_subtree<P: Paged>(&self, paged: &mut P, page: PageId) -> Result<()> {
        let node = self.load_node(paged, page)?;
        if let NodeData::Branch { children, .. } = &*node {
            for &child in children {
                self.free_subtree(paged, child)?;
            }
        }
        paged.clear(&self.accessor, page)?;
        paged.free(page)
    }

    /// Stores a node image, reporting `false` when the node overflows its
    /// page under the current overflow policy. The signal drives the
    /// split path and never escapes to index callers.
    fn store_node<P: Paged>(
        &self,
        paged: &mut P,
        page: PageId,
        data: &NodeData<K, V>,
    ) -> Result<bool> {
        let page_size = paged.page_size();
        // A lone record larger than a page cannot be split; it spills
        // into an extent instead. Branches must always fit one page.
        let allow_overflow = data.is_leaf() && data.len() <= 1;
        if let Some(estimate) = self.accessor.estimated_size(data) {
            if estimate + EXTENT_HEADER_LEN > page_size && !allow_overflow {
                return Ok(false);
            }
            paged.put(&self.accessor, page, data.clone())?;
            return Ok(true);
        }
        let mut payload = Vec::new();
        self.accessor.encode(data, &mut payload)?;
        if data.is_branch() {
            if payload.len() > page_size {
                return Ok(false);
            }
            extent::free_linked(paged, page)?;
            let mut src: &[u8] = &payload;
            paged.write(page, &mut src)?;
            return Ok(true);
        }
        if payload.len() + EXTENT_HEADER_LEN > page_size && !allow_overflow {
            return Ok(false);
        }
        extent::free_linked(paged, page)?;
        extent::store(paged, page, &payload)?;
        Ok(true)
    }

    fn split_node(
        &self,
        data: NodeData<K, V>,
        right_page: PageId,
    ) -> Result<(NodeData<K, V>, K, NodeData<K, V>)> {
        let is_leaf = data.is_leaf();
        let (left, median, right) = data.split(right_page)?;
        if is_leaf {
            if let Some(prefixer) = &self.prefixer {
                let separator = {
                    let low = left
                        .last_key()
                        .ok_or(QuireError::Index("split produced an empty leaf"))?;
                    let high = right
                        .first_key()
                        .ok_or(QuireError::Index("split produced an empty leaf"))?;
                    prefixer.simple_prefix(low, high)
                };
                return Ok((left, separator, right));
            }
        }
        Ok((left, median, right))
    }

    /// Stores `data` at `page`, splitting until it fits and collecting
    /// the promoted separators into `promotions` in ascending order.
    fn place<P: Paged>(
        &self,
        paged: &mut P,
        page: PageId,
        data: NodeData<K, V>,
        promotions: &mut Vec<(K, PageId)>,
    ) -> Result<()> {
        if self.store_node(paged, page, &data)? {
            return Ok(());
        }
        if data.len() < 2 {
            return Err(QuireError::Index("node entry exceeds page capacity"));
        }
        let right_page = paged.alloc()?;
        let (left, separator, right) = self.split_node(data, right_page)?;
        trace!(page, right_page, "node split");
        self.place(paged, page, left, promotions)?;
        promotions.push((separator, right_page));
        self.place(paged, right_page, right, promotions)
    }

    /// Stores `data` at `page`, propagating splits through the ancestor
    /// stack. A root split moves the root's contents to fresh pages and
    /// installs a new branch at the root page, so the index location
    /// never changes.
    fn store_with_splits<P: Paged>(
        &self,
        paged: &mut P,
        leaf_page: PageId,
        leaf_data: NodeData<K, V>,
        mut stack: AncestorStack<K, V>,
    ) -> Result<()> {
        let mut page = leaf_page;
        let mut data = leaf_data;
        loop {
            if self.store_node(paged, page, &data)? {
                return Ok(());
            }
            let mut promotions = Vec::new();
            if page == self.page {
                let home = paged.alloc()?;
                self.place(paged, home, data, &mut promotions)?;
                let mut separators = Vec::with_capacity(promotions.len());
                let mut children = Vec::with_capacity(promotions.len() + 1);
                children.push(home);
                for (separator, child) in promotions {
                    separators.push(separator);
                    children.push(child);
                }
                data = NodeData::Branch {
                    separators,
                    children,
                };
            } else {
                self.place(paged, page, data, &mut promotions)?;
                let (parent_page, parent) = stack
                    .pop()
                    .ok_or(QuireError::Index("split reached a missing parent"))?;
                let mut parent = (*parent).clone();
                for (separator, child) in promotions {
                    parent.branch_insert(|a, b| self.compare(a, b), separator, child)?;
                }
                page = parent_page;
                data = parent;
            }
        }
    }
}
