//! Transactions: per-caller working sets over a snapshot.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use bytes::{Buf, BufMut};
use tracing::trace;

use crate::error::{QuireError, Result};
use crate::paged::{extent, PageId, Paged, PagedAccessor, EXTENT_HEADER_LEN};
use crate::tx::batch::{BatchUpdate, DeferredPut, EncodeFn, Update};
use crate::tx::snapshot::Snapshot;
use crate::tx::TxPageFile;

/// Outcome of [`Transaction::commit`].
///
/// A conflict is an expected, retriable outcome under contention, not an
/// error: the transaction is left open and unchanged, and the caller
/// re-derives its updates against a fresh snapshot (usually after
/// [`Transaction::rollback`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commit {
    /// The write buffer became a new batch at the head of the chain.
    Committed,
    /// A newer batch wrote a page this transaction read or wrote.
    Conflict,
}

impl Commit {
    /// Whether the commit succeeded.
    pub fn is_committed(self) -> bool {
        matches!(self, Commit::Committed)
    }

    /// Whether optimistic validation rejected the commit.
    pub fn is_conflict(self) -> bool {
        matches!(self, Commit::Conflict)
    }
}

/// A mutable working set layered on top of a snapshot.
///
/// Reads resolve against the transaction's own write buffer first, then
/// the snapshot's batches (newest first), then the committed base file —
/// so a transaction always observes its own uncommitted writes and never
/// observes anything committed after its snapshot was taken.
///
/// After a successful commit the handle rebinds to a fresh snapshot and
/// can be reused.
pub struct Transaction<'a> {
    store: &'a TxPageFile,
    snapshot: Snapshot,
    updates: BTreeMap<PageId, Update>,
    reads: HashSet<PageId>,
    allocated: Vec<PageId>,
}

enum OwnRead {
    Deferred(Arc<dyn std::any::Any + Send + Sync>),
    Written,
    Freed,
    Miss,
}

fn downcast_object<T: Send + Sync + 'static>(
    value: Arc<dyn std::any::Any + Send + Sync>,
) -> Result<Arc<T>> {
    value
        .downcast::<T>()
        .map_err(|_| QuireError::Index("stored object type mismatch"))
}

impl<'a> Transaction<'a> {
    pub(crate) fn new(store: &'a TxPageFile) -> Self {
        Self {
            store,
            snapshot: store.core().open_snapshot(),
            updates: BTreeMap::new(),
            reads: HashSet::new(),
            allocated: Vec::new(),
        }
    }

    /// Number of pages with pending changes in this transaction.
    pub fn pending_pages(&self) -> usize {
        self.updates.len()
    }

    /// Validates this transaction against batches committed after its
    /// snapshot and, if none touched its pages, appends its write buffer
    /// as the new chain head.
    pub fn commit(&mut self) -> Result<Commit> {
        if self.updates.is_empty() {
            self.allocated.clear();
            self.rebind();
            return Ok(Commit::Committed);
        }
        let outcome =
            self.store
                .core()
                .try_commit(&self.snapshot, &mut self.updates, &self.reads)?;
        if outcome.is_committed() {
            self.allocated.clear();
            self.reads.clear();
            self.rebind();
        }
        Ok(outcome)
    }

    /// Discards the write buffer, returns delta-allocated pages to the
    /// free set, and rebinds the transaction to a fresh snapshot.
    pub fn rollback(&mut self) -> Result<()> {
        for page in self.allocated.drain(..) {
            self.store.core().free_page(page);
        }
        self.updates.clear();
        self.reads.clear();
        self.rebind();
        trace!("transaction rolled back");
        Ok(())
    }

    fn rebind(&mut self) {
        let core = self.store.core();
        core.close_snapshot(&self.snapshot);
        self.snapshot = core.open_snapshot();
    }

    /// Resolves the full image of `page` through this transaction's view.
    fn view_page(&mut self, page: PageId) -> Result<Vec<u8>> {
        self.reads.insert(page);
        let page_size = self.store.page_size();
        match self.updates.get(&page) {
            Some(Update::Written(bytes)) => {
                let mut image = bytes.clone();
                image.resize(page_size, 0);
                return Ok(image);
            }
            Some(Update::Deferred(deferred)) => {
                let mut image = deferred.frame(page_size)?;
                image.resize(page_size, 0);
                return Ok(image);
            }
            Some(Update::Freed) => return Ok(vec![0u8; page_size]),
            None => {}
        }
        // A page allocated by this transaction and not yet written has no
        // content; resolving it against older occupants of the same page
        // number would surface stale data.
        if self.allocated.contains(&page) {
            return Ok(vec![0u8; page_size]);
        }
        for index in 0..self.snapshot.batches.len() {
            let batch = self.snapshot.batches[index].clone();
            if let Some(update) = batch.updates.get(&page) {
                return update.page_image(page_size);
            }
            if batch.freed.contains(&page) {
                return Ok(vec![0u8; page_size]);
            }
        }
        self.store.core().read_base_page(page)
    }

    fn own_read(&self, page: PageId) -> OwnRead {
        match self.updates.get(&page) {
            Some(Update::Deferred(deferred)) => OwnRead::Deferred(deferred.value.clone()),
            Some(Update::Written(_)) => OwnRead::Written,
            Some(Update::Freed) => OwnRead::Freed,
            None => OwnRead::Miss,
        }
    }
}

impl Paged for Transaction<'_> {
    fn page_size(&self) -> usize {
        self.store.page_size()
    }

    fn alloc_run(&mut self, count: usize) -> Result<PageId> {
        let first = self.store.core().alloc_run(count)?;
        for offset in 0..count as PageId {
            self.allocated.push(first + offset);
        }
        Ok(first)
    }

    fn free(&mut self, page: PageId) -> Result<()> {
        if let Some(position) = self.allocated.iter().position(|&p| p == page) {
            // Allocated by this transaction: the number can be handed out
            // again immediately.
            self.allocated.remove(position);
            self.updates.remove(&page);
            self.store.core().free_page(page);
        } else {
            self.updates.insert(page, Update::Freed);
        }
        Ok(())
    }

    fn is_allocated(&self, page: PageId) -> bool {
        if self.allocated.contains(&page) {
            return true;
        }
        if matches!(self.updates.get(&page), Some(Update::Freed)) {
            return false;
        }
        self.store.core().is_allocated(page)
    }

    fn read(&mut self, page: PageId, buf: &mut dyn BufMut) -> Result<()> {
        let image = self.view_page(page)?;
        let take = image.len().min(buf.remaining_mut());
        buf.put_slice(&image[..take]);
        Ok(())
    }

    fn write(&mut self, page: PageId, buf: &mut dyn Buf) -> Result<()> {
        let take = buf.remaining().min(self.page_size());
        let mut image = vec![0u8; take];
        buf.copy_to_slice(&mut image);
        self.updates.insert(page, Update::Written(image));
        Ok(())
    }

    fn get<T, A>(&mut self, accessor: &A, page: PageId) -> Result<Arc<T>>
    where
        Self: Sized,
        T: Send + Sync + 'static,
        A: PagedAccessor<T>,
    {
        self.reads.insert(page);
        match self.own_read(page) {
            OwnRead::Deferred(value) => return downcast_object(value),
            OwnRead::Written => {
                let payload = extent::load(self, page)?;
                return Ok(Arc::new(accessor.decode(&payload)?));
            }
            OwnRead::Freed => return Err(QuireError::Invalid("read of freed page")),
            OwnRead::Miss => {}
        }
        for index in 0..self.snapshot.batches.len() {
            let batch = self.snapshot.batches[index].clone();
            if batch.freed.contains(&page) {
                return Err(QuireError::Invalid("read of freed page"));
            }
            if let Some(update) = batch.updates.get(&page) {
                return match update {
                    BatchUpdate::Deferred(deferred) => downcast_object(deferred.value.clone()),
                    BatchUpdate::Bytes(_) => {
                        let payload = extent::load(self, page)?;
                        Ok(Arc::new(accessor.decode(&payload)?))
                    }
                };
            }
        }
        // Committed base view: the only state the object cache may serve.
        if let Some(hit) = self.store.core().cache_get(page) {
            if let Ok(object) = hit.downcast::<T>() {
                return Ok(object);
            }
            self.store.core().cache_remove(page);
        }
        let payload = extent::load(self, page)?;
        let object = Arc::new(accessor.decode(&payload)?);
        self.store.core().cache_put(page, object.clone());
        Ok(object)
    }

    fn put<T, A>(&mut self, accessor: &A, page: PageId, value: T) -> Result<Vec<PageId>>
    where
        Self: Sized,
        T: Send + Sync + 'static,
        A: PagedAccessor<T>,
    {
        // Release continuation pages of the value being replaced. A fresh
        // page cannot hold one yet, and a pending deferred put already
        // released its predecessor's.
        let fresh = self.allocated.contains(&page) && !self.updates.contains_key(&page);
        let deferred_pending = matches!(self.updates.get(&page), Some(Update::Deferred(_)));
        if !fresh && !deferred_pending {
            extent::free_linked(self, page)?;
        }
        if let Some(estimate) = accessor.estimated_size(&value) {
            if estimate + EXTENT_HEADER_LEN <= self.page_size() {
                let shared = Arc::new(value);
                let captured = accessor.clone();
                let encode: EncodeFn = Arc::new(move |object| {
                    let value = object
                        .downcast_ref::<T>()
                        .ok_or(QuireError::Index("stored object type mismatch"))?;
                    let mut payload = Vec::new();
                    captured.encode(value, &mut payload)?;
                    Ok(payload)
                });
                self.updates.insert(
                    page,
                    Update::Deferred(DeferredPut {
                        value: shared,
                        encode,
                    }),
                );
                return Ok(vec![page]);
            }
        }
        let mut payload = Vec::new();
        accessor.encode(&value, &mut payload)?;
        extent::store(self, page, &payload)
    }

    fn flush(&mut self) -> Result<()> {
        self.store.flush()
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        for page in self.allocated.drain(..) {
            self.store.core().free_page(page);
        }
        self.store.core().close_snapshot(&self.snapshot);
    }
}
