//! Batches: immutable sets of page updates produced by commits.

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::Result;
use crate::paged::{extent, PageId};

/// Marshals a type-erased deferred value into its payload bytes.
pub(crate) type EncodeFn = Arc<dyn Fn(&(dyn Any + Send + Sync)) -> Result<Vec<u8>> + Send + Sync>;

/// A decoded object retained by a transaction in place of its encoded
/// form. The object is immutable by contract and is marshalled exactly
/// once, when the owning batch is merged into the backing file.
pub(crate) struct DeferredPut {
    pub value: Arc<dyn Any + Send + Sync>,
    pub encode: EncodeFn,
}

impl DeferredPut {
    /// Encodes the retained object into its single-page extent frame.
    pub(crate) fn frame(&self, page_size: usize) -> Result<Vec<u8>> {
        let payload = (self.encode)(self.value.as_ref())?;
        extent::frame_single(&payload, page_size)
    }
}

/// One pending page change inside a transaction's write buffer.
pub(crate) enum Update {
    /// Raw page image written through the block interface.
    Written(Vec<u8>),
    /// Decoded object retained for deferred encoding.
    Deferred(DeferredPut),
    /// Page freed by the transaction; takes effect at commit.
    Freed,
}

/// One page change carried by a committed batch.
pub(crate) enum BatchUpdate {
    Bytes(Vec<u8>),
    Deferred(DeferredPut),
}

impl BatchUpdate {
    /// Materializes the full page image for this update.
    pub(crate) fn page_image(&self, page_size: usize) -> Result<Vec<u8>> {
        let mut image = match self {
            BatchUpdate::Bytes(bytes) => bytes.clone(),
            BatchUpdate::Deferred(deferred) => deferred.frame(page_size)?,
        };
        image.resize(page_size, 0);
        Ok(image)
    }
}

/// An ordered, immutable set of page writes from one committed
/// transaction, linked into the chain by its sequence position.
pub(crate) struct Batch {
    pub seq: u64,
    pub updates: BTreeMap<PageId, BatchUpdate>,
    pub freed: Vec<PageId>,
}

impl Batch {
    /// Whether this batch changed `page` (wrote or freed it).
    pub(crate) fn touches(&self, page: PageId) -> bool {
        self.updates.contains_key(&page) || self.freed.contains(&page)
    }

    /// Every page this batch changed.
    pub(crate) fn write_set(&self) -> impl Iterator<Item = PageId> + '_ {
        self.updates.keys().copied().chain(self.freed.iter().copied())
    }
}
