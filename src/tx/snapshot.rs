//! Snapshots: consistent, pinned views of the batch chain.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use crate::tx::batch::Batch;

/// A consistent view of the chain captured when a transaction was opened.
///
/// Holds the batches in `[base, head]` newest-first; reads resolve against
/// this list before falling back to the base file. The chain keeps a
/// reference count for every pinned batch and a reader-floor entry for the
/// snapshot's head, so no batch this snapshot depends on is merged into
/// the base file while the snapshot is open.
pub(crate) struct Snapshot {
    /// Sequence of the newest batch visible to this snapshot.
    pub head_seq: u64,
    /// Pinned batches, newest first.
    pub batches: Vec<Arc<Batch>>,
}

pub(crate) struct BatchSlot {
    pub batch: Arc<Batch>,
    /// Open snapshots pinning this batch.
    pub snapshots: u32,
}

/// Chain bookkeeping guarded by the store's chain mutex.
pub(crate) struct ChainState {
    /// Committed batches, oldest at the front.
    pub slots: VecDeque<BatchSlot>,
    /// Sequence the next commit will take; `next_seq - 1` is the head.
    pub next_seq: u64,
    /// Open snapshot count keyed by snapshot head sequence.
    pub reader_floor: BTreeMap<u64, u32>,
}

impl ChainState {
    pub(crate) fn new() -> Self {
        Self {
            slots: VecDeque::new(),
            next_seq: 1,
            reader_floor: BTreeMap::new(),
        }
    }

    pub(crate) fn head_seq(&self) -> u64 {
        self.next_seq - 1
    }

    /// Opens a snapshot of the current chain, adjusting reference counts.
    pub(crate) fn open_snapshot(&mut self) -> Snapshot {
        let head_seq = self.head_seq();
        let mut batches = Vec::with_capacity(self.slots.len());
        for slot in self.slots.iter_mut().rev() {
            slot.snapshots += 1;
            batches.push(slot.batch.clone());
        }
        *self.reader_floor.entry(head_seq).or_insert(0) += 1;
        Snapshot { head_seq, batches }
    }

    /// Releases a snapshot's reference counts.
    pub(crate) fn close_snapshot(&mut self, snapshot: &Snapshot) {
        for batch in &snapshot.batches {
            if let Some(slot) = self.slots.iter_mut().find(|s| s.batch.seq == batch.seq) {
                slot.snapshots = slot.snapshots.saturating_sub(1);
            }
        }
        if let Some(count) = self.reader_floor.get_mut(&snapshot.head_seq) {
            if *count > 1 {
                *count -= 1;
            } else {
                self.reader_floor.remove(&snapshot.head_seq);
            }
        }
    }

    /// The oldest snapshot head still open, if any.
    pub(crate) fn oldest_reader(&self) -> Option<u64> {
        self.reader_floor.keys().next().copied()
    }
}
