//! The transactional page store.
//!
//! [`TxPageFile`] turns the raw [`PageFile`](crate::paged::PageFile) into
//! an MVCC store: writes buffer into an immutable batch per transaction,
//! commits validate optimistically and append the batch to a chain, and
//! snapshots pin chain ranges for consistent reads. Batches are merged
//! back into the backing file once no open snapshot depends on their
//! absence.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{QuireError, Result};
use crate::paged::{PageCache, PageFile, PageId};

mod batch;
mod snapshot;
mod transaction;

pub use transaction::{Commit, Transaction};

use batch::{Batch, BatchUpdate, Update};
use snapshot::{BatchSlot, ChainState, Snapshot};

/// Configuration for a [`TxPageFile`].
///
/// Diagnostics are explicit here: pages listed in `trace_pages` emit a
/// `tracing` event on every base-file read and committed write.
#[derive(Clone, Debug)]
pub struct StoreOptions {
    /// Fixed page size in bytes.
    pub page_size: usize,
    /// Upper bound on allocatable page numbers.
    pub max_pages: usize,
    /// Capacity of the decoded-object cache (0 disables it).
    pub cache_capacity: usize,
    /// Offload batch merging to a background worker thread.
    pub background_flush: bool,
    /// Pages to emit tracing events for.
    pub trace_pages: HashSet<PageId>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            page_size: 4096,
            max_pages: 1 << 22,
            cache_capacity: 256,
            background_flush: false,
            trace_pages: HashSet::new(),
        }
    }
}

impl StoreOptions {
    /// Sets the page size.
    pub fn page_size(mut self, bytes: usize) -> Self {
        self.page_size = bytes;
        self
    }

    /// Sets the maximum number of allocatable pages.
    pub fn max_pages(mut self, pages: usize) -> Self {
        self.max_pages = pages;
        self
    }

    /// Sets the decoded-object cache capacity.
    pub fn cache_capacity(mut self, objects: usize) -> Self {
        self.cache_capacity = objects;
        self
    }

    /// Enables or disables the background flush worker.
    pub fn background_flush(mut self, enabled: bool) -> Self {
        self.background_flush = enabled;
        self
    }

    /// Adds a page to the trace set.
    pub fn trace_page(mut self, page: PageId) -> Self {
        self.trace_pages.insert(page);
        self
    }
}

pub(crate) struct StoreCore {
    file: Mutex<PageFile>,
    chain: Mutex<ChainState>,
    cache: PageCache,
    options: StoreOptions,
}

impl StoreCore {
    pub(crate) fn page_size(&self) -> usize {
        self.options.page_size
    }

    pub(crate) fn alloc_run(&self, count: usize) -> Result<PageId> {
        use crate::paged::Allocator;
        self.file.lock().allocator_mut().alloc(count)
    }

    pub(crate) fn free_page(&self, page: PageId) {
        use crate::paged::Allocator;
        self.file.lock().allocator_mut().free(page, 1);
        self.cache.remove(page);
    }

    pub(crate) fn is_allocated(&self, page: PageId) -> bool {
        use crate::paged::Allocator;
        self.file.lock().allocator().is_allocated(page)
    }

    pub(crate) fn read_base_page(&self, page: PageId) -> Result<Vec<u8>> {
        if self.options.trace_pages.contains(&page) {
            debug!(page, "base page read");
        }
        self.file.lock().read_page_image(page)
    }

    pub(crate) fn cache_get(&self, page: PageId) -> Option<crate::paged::cache::CachedObject> {
        self.cache.get(page)
    }

    pub(crate) fn cache_put(&self, page: PageId, value: crate::paged::cache::CachedObject) {
        self.cache.put(page, value);
    }

    pub(crate) fn cache_remove(&self, page: PageId) {
        self.cache.remove(page);
    }

    pub(crate) fn open_snapshot(&self) -> Snapshot {
        self.chain.lock().open_snapshot()
    }

    pub(crate) fn close_snapshot(&self, snapshot: &Snapshot) {
        self.chain.lock().close_snapshot(snapshot);
    }

    /// Validates and commits a transaction's buffered updates.
    ///
    /// The buffer is drained only on success; on conflict the transaction
    /// is left exactly as it was so the caller can decide what to retry.
    pub(crate) fn try_commit(
        &self,
        snapshot: &Snapshot,
        updates: &mut BTreeMap<PageId, Update>,
        reads: &HashSet<PageId>,
    ) -> Result<Commit> {
        let batch = {
            let mut chain = self.chain.lock();
            for slot in chain.slots.iter().rev() {
                if slot.batch.seq <= snapshot.head_seq {
                    break;
                }
                let conflicted = updates.keys().any(|page| slot.batch.touches(*page))
                    || reads.iter().any(|page| slot.batch.touches(*page));
                if conflicted {
                    debug!(
                        snapshot = snapshot.head_seq,
                        newer = slot.batch.seq,
                        "commit rejected by optimistic validation"
                    );
                    return Ok(Commit::Conflict);
                }
            }
            let seq = chain.next_seq;
            chain.next_seq += 1;
            let mut batch_updates = BTreeMap::new();
            let mut freed = Vec::new();
            for (page, update) in std::mem::take(updates) {
                match update {
                    Update::Written(bytes) => {
                        batch_updates.insert(page, BatchUpdate::Bytes(bytes));
                    }
                    Update::Deferred(deferred) => {
                        batch_updates.insert(page, BatchUpdate::Deferred(deferred));
                    }
                    Update::Freed => freed.push(page),
                }
            }
            let batch = Arc::new(Batch {
                seq,
                updates: batch_updates,
                freed,
            });
            chain.slots.push_back(BatchSlot {
                batch: batch.clone(),
                snapshots: 0,
            });
            batch
        };

        if !batch.freed.is_empty() {
            use crate::paged::Allocator;
            let mut file = self.file.lock();
            for &page in &batch.freed {
                file.allocator_mut().free(page, 1);
            }
        }
        self.cache.remove_all(batch.write_set());
        for page in batch.write_set() {
            if self.options.trace_pages.contains(&page) {
                debug!(page, seq = batch.seq, "page committed");
            }
        }
        debug!(
            seq = batch.seq,
            pages = batch.updates.len(),
            freed = batch.freed.len(),
            "batch committed"
        );
        Ok(Commit::Committed)
    }

    /// Merges every eligible batch into the backing file and unlinks it.
    ///
    /// A batch is eligible once it is the oldest in the chain, no snapshot
    /// pins it, and no open snapshot predates it. The chain mutex is never
    /// held across file I/O.
    pub(crate) fn do_flush(&self) -> Result<()> {
        loop {
            let batch = {
                let chain = self.chain.lock();
                let front = match chain.slots.front() {
                    Some(front) => front,
                    None => return Ok(()),
                };
                if front.snapshots != 0 {
                    return Ok(());
                }
                if let Some(floor) = chain.oldest_reader() {
                    if floor < front.batch.seq {
                        return Ok(());
                    }
                }
                front.batch.clone()
            };

            {
                use crate::paged::Paged;
                let mut file = self.file.lock();
                let page_size = file.page_size();
                for (&page, update) in &batch.updates {
                    let image = update.page_image(page_size)?;
                    file.write_page_image(page, &image)?;
                }
                file.sync()?;
            }

            {
                let mut chain = self.chain.lock();
                if chain
                    .slots
                    .front()
                    .is_some_and(|front| front.batch.seq == batch.seq)
                {
                    chain.slots.pop_front();
                }
            }
            self.cache.remove_all(batch.write_set());
            debug!(seq = batch.seq, "batch merged into page file");
        }
    }
}

enum FlushMsg {
    Flush {
        on_complete: Option<Box<dyn FnOnce() + Send>>,
        ack: Option<mpsc::SyncSender<Result<()>>>,
    },
    Shutdown,
}

struct FlushWorker {
    sender: mpsc::Sender<FlushMsg>,
    handle: Option<JoinHandle<()>>,
}

/// The MVCC page store.
///
/// Each caller thread opens its own [`Transaction`] via [`tx`](Self::tx);
/// commits are totally ordered by chain append, and previously committed
/// batches become durable through [`flush`](Self::flush).
pub struct TxPageFile {
    core: Arc<StoreCore>,
    worker: Option<FlushWorker>,
}

impl TxPageFile {
    /// Opens (or creates) the store at `path`.
    pub fn open(path: &Path, options: StoreOptions) -> Result<Self> {
        let file = PageFile::open(path, options.page_size, options.max_pages)?;
        let core = Arc::new(StoreCore {
            file: Mutex::new(file),
            chain: Mutex::new(ChainState::new()),
            cache: PageCache::new(options.cache_capacity),
            options: options.clone(),
        });
        let worker = if options.background_flush {
            let worker_core = core.clone();
            let (sender, receiver) = mpsc::channel();
            let handle = std::thread::Builder::new()
                .name("quire-flush".into())
                .spawn(move || {
                    while let Ok(msg) = receiver.recv() {
                        match msg {
                            FlushMsg::Flush { on_complete, ack } => {
                                let result = worker_core.do_flush();
                                if let Err(error) = &result {
                                    warn!(%error, "background flush failed");
                                } else if let Some(on_complete) = on_complete {
                                    on_complete();
                                }
                                if let Some(ack) = ack {
                                    let _ = ack.send(result);
                                }
                            }
                            FlushMsg::Shutdown => break,
                        }
                    }
                })
                .map_err(QuireError::Io)?;
            Some(FlushWorker {
                sender,
                handle: Some(handle),
            })
        } else {
            None
        };
        Ok(Self { core, worker })
    }

    /// Opens the store with default options.
    pub fn open_default(path: &Path) -> Result<Self> {
        Self::open(path, StoreOptions::default())
    }

    /// The store's fixed page size.
    pub fn page_size(&self) -> usize {
        self.core.page_size()
    }

    /// Creates a new transaction bound to a fresh snapshot.
    pub fn tx(&self) -> Transaction<'_> {
        Transaction::new(self)
    }

    pub(crate) fn core(&self) -> &StoreCore {
        &self.core
    }

    /// Applies previously committed batches to the backing file. Blocks
    /// until the merge is complete, even when a background worker is
    /// configured.
    pub fn flush(&self) -> Result<()> {
        match &self.worker {
            Some(worker) => {
                let (ack, done) = mpsc::sync_channel(1);
                worker
                    .sender
                    .send(FlushMsg::Flush {
                        on_complete: None,
                        ack: Some(ack),
                    })
                    .map_err(|_| QuireError::Invalid("flush worker stopped"))?;
                done.recv()
                    .map_err(|_| QuireError::Invalid("flush worker stopped"))?
            }
            None => self.core.do_flush(),
        }
    }

    /// Like [`flush`](Self::flush), but when a background worker is
    /// configured the call returns immediately and `on_complete` runs once
    /// the merge is durable.
    pub fn flush_with<F: FnOnce() + Send + 'static>(&self, on_complete: F) -> Result<()> {
        match &self.worker {
            Some(worker) => worker
                .sender
                .send(FlushMsg::Flush {
                    on_complete: Some(Box::new(on_complete)),
                    ack: None,
                })
                .map_err(|_| QuireError::Invalid("flush worker stopped")),
            None => {
                self.core.do_flush()?;
                on_complete();
                Ok(())
            }
        }
    }
}

impl Drop for TxPageFile {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.sender.send(FlushMsg::Shutdown);
            if let Some(handle) = worker.handle {
                let _ = handle.join();
            }
        }
        if let Err(error) = self.core.do_flush() {
            warn!(%error, "final flush on close failed");
        }
    }
}
