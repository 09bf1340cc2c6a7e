//! B+Tree node representation and page encoding.

use std::cmp::Ordering;
use std::marker::PhantomData;

use crate::codec::{KeyCodec, ValCodec};
use crate::error::{QuireError, Result};
use crate::paged::{PageId, PagedAccessor};

const LEAF_TAG: u8 = 1;
const BRANCH_TAG: u8 = 2;

/// Sentinel for "no next leaf" in the forward-link chain.
const NIL_PAGE: PageId = PageId::MAX;

/// The decoded form of one tree node.
///
/// A branch holds ordered separator keys and child page numbers
/// (`children.len() == separators.len() + 1`); a leaf holds ordered
/// key/value pairs plus a forward link to the next leaf for in-order
/// iteration. With a prefixer configured, branch separators are synthetic
/// shortest-distinguishing prefixes: valid for navigation, never as an
/// existence proof.
#[derive(Clone, Debug)]
pub(crate) enum NodeData<K, V> {
    Branch {
        separators: Vec<K>,
        children: Vec<PageId>,
    },
    Leaf {
        keys: Vec<K>,
        values: Vec<V>,
        next: Option<PageId>,
    },
}

impl<K, V> NodeData<K, V> {
    pub(crate) fn empty_leaf() -> Self {
        NodeData::Leaf {
            keys: Vec::new(),
            values: Vec::new(),
            next: None,
        }
    }

    pub(crate) fn is_leaf(&self) -> bool {
        matches!(self, NodeData::Leaf { .. })
    }

    pub(crate) fn is_branch(&self) -> bool {
        matches!(self, NodeData::Branch { .. })
    }

    /// Entry count for leaves, separator count for branches.
    pub(crate) fn len(&self) -> usize {
        match self {
            NodeData::Branch { separators, .. } => separators.len(),
            NodeData::Leaf { keys, .. } => keys.len(),
        }
    }

    /// First key of a leaf.
    pub(crate) fn first_key(&self) -> Option<&K> {
        match self {
            NodeData::Leaf { keys, .. } => keys.first(),
            NodeData::Branch { .. } => None,
        }
    }

    /// Last key of a leaf.
    pub(crate) fn last_key(&self) -> Option<&K> {
        match self {
            NodeData::Leaf { keys, .. } => keys.last(),
            NodeData::Branch { .. } => None,
        }
    }
}

impl<K: Clone, V: Clone> NodeData<K, V> {
    /// Inserts or replaces `key` in a leaf, returning the previous value.
    pub(crate) fn leaf_upsert(
        &mut self,
        cmp: impl Fn(&K, &K) -> Ordering,
        key: K,
        value: V,
    ) -> Result<Option<V>> {
        match self {
            NodeData::Leaf { keys, values, .. } => {
                match keys.binary_search_by(|probe| cmp(probe, &key)) {
                    Ok(position) => {
                        let previous = values[position].clone();
                        keys[position] = key;
                        values[position] = value;
                        Ok(Some(previous))
                    }
                    Err(position) => {
                        keys.insert(position, key);
                        values.insert(position, value);
                        Ok(None)
                    }
                }
            }
            NodeData::Branch { .. } => Err(QuireError::Index("expected a leaf node")),
        }
    }

    /// Removes `key` from a leaf, returning the removed value.
    pub(crate) fn leaf_remove(
        &mut self,
        cmp: impl Fn(&K, &K) -> Ordering,
        key: &K,
    ) -> Result<Option<V>> {
        match self {
            NodeData::Leaf { keys, values, .. } => {
                match keys.binary_search_by(|probe| cmp(probe, key)) {
                    Ok(position) => {
                        keys.remove(position);
                        Ok(Some(values.remove(position)))
                    }
                    Err(_) => Ok(None),
                }
            }
            NodeData::Branch { .. } => Err(QuireError::Index("expected a leaf node")),
        }
    }

    /// Looks up `key` in a leaf.
    pub(crate) fn leaf_get(&self, cmp: impl Fn(&K, &K) -> Ordering, key: &K) -> Option<&V> {
        match self {
            NodeData::Leaf { keys, values, .. } => keys
                .binary_search_by(|probe| cmp(probe, key))
                .ok()
                .map(|position| &values[position]),
            NodeData::Branch { .. } => None,
        }
    }

    /// Index of the child subtree that could hold `key`: the number of
    /// separators at or below it.
    pub(crate) fn child_index(&self, cmp: impl Fn(&K, &K) -> Ordering, key: &K) -> usize {
        match self {
            NodeData::Branch { separators, .. } => {
                separators.partition_point(|separator| cmp(separator, key) != Ordering::Greater)
            }
            NodeData::Leaf { .. } => 0,
        }
    }

    /// Inserts a promoted separator and its right child into a branch.
    pub(crate) fn branch_insert(
        &mut self,
        cmp: impl Fn(&K, &K) -> Ordering,
        separator: K,
        child: PageId,
    ) -> Result<()> {
        match self {
            NodeData::Branch {
                separators,
                children,
            } => {
                let position =
                    separators.partition_point(|probe| cmp(probe, &separator) == Ordering::Less);
                separators.insert(position, separator);
                children.insert(position + 1, child);
                Ok(())
            }
            NodeData::Leaf { .. } => Err(QuireError::Index("expected a branch node")),
        }
    }

    /// Splits the node at its median. Returns `(left, median, right)`;
    /// for leaves the median is the first key of the right half (the
    /// caller substitutes a prefix separator when one is configured) and
    /// the left half is re-linked to `right_page`.
    pub(crate) fn split(self, right_page: PageId) -> Result<(Self, K, Self)> {
        match self {
            NodeData::Leaf {
                mut keys,
                mut values,
                next,
            } => {
                if keys.len() < 2 {
                    return Err(QuireError::Index("cannot split a node with one entry"));
                }
                let mid = keys.len() / 2;
                let right_keys = keys.split_off(mid);
                let right_values = values.split_off(mid);
                let median = right_keys[0].clone();
                let left = NodeData::Leaf {
                    keys,
                    values,
                    next: Some(right_page),
                };
                let right = NodeData::Leaf {
                    keys: right_keys,
                    values: right_values,
                    next,
                };
                Ok((left, median, right))
            }
            NodeData::Branch {
                mut separators,
                mut children,
            } => {
                if separators.len() < 2 {
                    return Err(QuireError::Index("cannot split a node with one entry"));
                }
                let mid = separators.len() / 2;
                let mut right_separators = separators.split_off(mid);
                let median = right_separators.remove(0);
                let right_children = children.split_off(mid + 1);
                let left = NodeData::Branch {
                    separators,
                    children,
                };
                let right = NodeData::Branch {
                    separators: right_separators,
                    children: right_children,
                };
                Ok((left, median, right))
            }
        }
    }
}

impl<K: KeyCodec, V: ValCodec> NodeData<K, V> {
    /// Encodes the node into its page payload.
    pub(crate) fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        match self {
            NodeData::Leaf { keys, values, next } => {
                if keys.len() != values.len() {
                    return Err(QuireError::Index("leaf keys and values diverge"));
                }
                out.push(LEAF_TAG);
                push_count(out, keys.len())?;
                out.extend_from_slice(&next.unwrap_or(NIL_PAGE).to_be_bytes());
                for (key, value) in keys.iter().zip(values) {
                    let mut encoded = Vec::new();
                    K::encode_key(key, &mut encoded);
                    push_len16(out, encoded.len())?;
                    out.extend_from_slice(&encoded);
                    encoded.clear();
                    V::encode_val(value, &mut encoded);
                    push_len32(out, encoded.len())?;
                    out.extend_from_slice(&encoded);
                }
            }
            NodeData::Branch {
                separators,
                children,
            } => {
                if children.len() != separators.len() + 1 {
                    return Err(QuireError::Index("branch fanout is inconsistent"));
                }
                out.push(BRANCH_TAG);
                push_count(out, separators.len())?;
                for separator in separators {
                    let mut encoded = Vec::new();
                    K::encode_key(separator, &mut encoded);
                    push_len16(out, encoded.len())?;
                    out.extend_from_slice(&encoded);
                }
                for child in children {
                    out.extend_from_slice(&child.to_be_bytes());
                }
            }
        }
        Ok(())
    }

    /// Decodes a node from its page payload. Trailing bytes are ignored,
    /// so plain single-page images decode the same as extent payloads.
    pub(crate) fn decode(payload: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(payload);
        match cursor.take_u8()? {
            LEAF_TAG => {
                let count = cursor.take_u16()? as usize;
                let next_raw = cursor.take_u32()?;
                let next = (next_raw != NIL_PAGE).then_some(next_raw);
                let mut keys = Vec::with_capacity(count);
                let mut values = Vec::with_capacity(count);
                for _ in 0..count {
                    let key_len = cursor.take_u16()? as usize;
                    keys.push(K::decode_key(cursor.take_bytes(key_len)?)?);
                    let value_len = cursor.take_u32()? as usize;
                    values.push(V::decode_val(cursor.take_bytes(value_len)?)?);
                }
                Ok(NodeData::Leaf { keys, values, next })
            }
            BRANCH_TAG => {
                let count = cursor.take_u16()? as usize;
                let mut separators = Vec::with_capacity(count);
                for _ in 0..count {
                    let key_len = cursor.take_u16()? as usize;
                    separators.push(K::decode_key(cursor.take_bytes(key_len)?)?);
                }
                let mut children = Vec::with_capacity(count + 1);
                for _ in 0..count + 1 {
                    children.push(cursor.take_u32()?);
                }
                Ok(NodeData::Branch {
                    separators,
                    children,
                })
            }
            _ => Err(QuireError::Index("unknown node tag")),
        }
    }

    /// Upper bound on the encoded size, or `None` when either codec
    /// cannot estimate.
    pub(crate) fn estimated_size(&self) -> Option<usize> {
        match self {
            NodeData::Leaf { keys, values, .. } => {
                let mut total = 1 + 2 + 4;
                for key in keys {
                    total += 2 + K::estimated_key_size(key)?;
                }
                for value in values {
                    total += 4 + V::estimated_val_size(value)?;
                }
                Some(total)
            }
            NodeData::Branch {
                separators,
                children,
            } => {
                let mut total = 1 + 2 + 4 * children.len();
                for separator in separators {
                    total += 2 + K::estimated_key_size(separator)?;
                }
                Some(total)
            }
        }
    }
}

fn push_count(out: &mut Vec<u8>, count: usize) -> Result<()> {
    let count = u16::try_from(count).map_err(|_| QuireError::Index("node entry count overflow"))?;
    out.extend_from_slice(&count.to_be_bytes());
    Ok(())
}

fn push_len16(out: &mut Vec<u8>, len: usize) -> Result<()> {
    let len = u16::try_from(len).map_err(|_| QuireError::Index("encoded key too large"))?;
    out.extend_from_slice(&len.to_be_bytes());
    Ok(())
}

fn push_len32(out: &mut Vec<u8>, len: usize) -> Result<()> {
    let len = u32::try_from(len).map_err(|_| QuireError::Index("encoded value too large"))?;
    out.extend_from_slice(&len.to_be_bytes());
    Ok(())
}

struct Cursor<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    fn take_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .position
            .checked_add(len)
            .ok_or(QuireError::Index("node image offset overflow"))?;
        let slice = self
            .data
            .get(self.position..end)
            .ok_or(QuireError::Index("node image truncated"))?;
        self.position = end;
        Ok(slice)
    }

    fn take_u8(&mut self) -> Result<u8> {
        Ok(self.take_bytes(1)?[0])
    }

    fn take_u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.take_bytes(2)?.try_into().unwrap()))
    }

    fn take_u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.take_bytes(4)?.try_into().unwrap()))
    }
}

/// Accessor persisting [`NodeData`] through the typed page protocol.
///
/// With deferred encoding disabled the accessor reports no size estimate,
/// which forces the store down the immediate-encoding path.
pub(crate) struct NodeAccessor<K, V> {
    deferred: bool,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V> NodeAccessor<K, V> {
    pub(crate) fn new(deferred: bool) -> Self {
        Self {
            deferred,
            _marker: PhantomData,
        }
    }
}

impl<K, V> Clone for NodeAccessor<K, V> {
    fn clone(&self) -> Self {
        Self::new(self.deferred)
    }
}

impl<K, V> PagedAccessor<NodeData<K, V>> for NodeAccessor<K, V>
where
    K: KeyCodec + Clone + Send + Sync + 'static,
    V: ValCodec + Clone + Send + Sync + 'static,
{
    fn encode(&self, value: &NodeData<K, V>, out: &mut Vec<u8>) -> Result<()> {
        value.encode(out)
    }

    fn decode(&self, payload: &[u8]) -> Result<NodeData<K, V>> {
        NodeData::decode(payload)
    }

    fn estimated_size(&self, value: &NodeData<K, V>) -> Option<usize> {
        if !self.deferred {
            return None;
        }
        value.estimated_size()
    }
}
