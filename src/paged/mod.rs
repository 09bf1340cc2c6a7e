//! Block I/O access to fixed-size pages.
//!
//! [`Paged`] is the contract shared by the raw [`PageFile`] and by
//! [`crate::tx::Transaction`]: page allocation, whole-page copies, scoped
//! slice access, and a typed `get`/`put`/`clear` triplet driven by a
//! [`PagedAccessor`] so higher layers can persist structures the store does
//! not understand. Values larger than one page are chained across linked
//! pages by the [`extent`] module.

use std::sync::Arc;

use bytes::{Buf, BufMut};

use crate::error::Result;

pub mod allocator;
pub mod cache;
pub mod extent;

mod accessor;
mod file;

pub use accessor::{CodecAccessor, PagedAccessor};
pub use allocator::{Allocator, BitAllocator};
pub use cache::PageCache;
pub use extent::{EXTENT_HEADER_LEN, EXTENT_MAGIC};
pub use file::PageFile;

/// Identifies one fixed-size page slot in the store.
pub type PageId = u32;

/// Block I/O access to pages plus the typed accessor protocol.
///
/// Objects returned by [`get`] and handed to [`put`] must never be mutated
/// afterwards; the store is free to retain them and marshal them later.
///
/// [`get`]: Paged::get
/// [`put`]: Paged::put
pub trait Paged {
    /// Maximum number of bytes that can be read from or written to a page.
    fn page_size(&self) -> usize;

    /// Number of pages required to store `len` bytes.
    fn pages_for(&self, len: usize) -> usize {
        len.div_ceil(self.page_size()).max(1)
    }

    /// Allocates a single page. Equivalent to `alloc_run(1)`.
    fn alloc(&mut self) -> Result<PageId> {
        self.alloc_run(1)
    }

    /// Allocates a contiguous run of `count` pages.
    fn alloc_run(&mut self, count: usize) -> Result<PageId>;

    /// Returns a page to the free set.
    fn free(&mut self, page: PageId) -> Result<()>;

    /// Reports whether `page` is currently allocated.
    fn is_allocated(&self, page: PageId) -> bool;

    /// Copies the contents of `page` into `buf`, advancing the buffer
    /// cursor by the amount transferred.
    fn read(&mut self, page: PageId, buf: &mut dyn BufMut) -> Result<()>;

    /// Copies up to one page out of `buf` into `page`, advancing the buffer
    /// cursor by the amount transferred. The remainder of the page is
    /// zeroed.
    fn write(&mut self, page: PageId, buf: &mut dyn Buf) -> Result<()>;

    /// Runs `f` against a read-only view of `page`.
    ///
    /// The view is resolved through the caller's own isolation context, so
    /// a transaction never observes an uncommitted sibling's mutations.
    fn with_page<R>(&mut self, page: PageId, f: impl FnOnce(&[u8]) -> Result<R>) -> Result<R>
    where
        Self: Sized,
    {
        let mut image = Vec::with_capacity(self.page_size());
        self.read(page, &mut image)?;
        f(&image)
    }

    /// Runs `f` against a mutable view of `page` and writes the result
    /// back through the caller's isolation context.
    fn with_page_mut<R>(
        &mut self,
        page: PageId,
        f: impl FnOnce(&mut [u8]) -> Result<R>,
    ) -> Result<R>
    where
        Self: Sized,
    {
        let mut image = Vec::with_capacity(self.page_size());
        self.read(page, &mut image)?;
        let out = f(&mut image)?;
        let mut src: &[u8] = &image;
        self.write(page, &mut src)?;
        Ok(out)
    }

    /// Loads the object previously stored at `page`.
    ///
    /// The returned object must never be mutated.
    fn get<T, A>(&mut self, accessor: &A, page: PageId) -> Result<Arc<T>>
    where
        Self: Sized,
        T: Send + Sync + 'static,
        A: PagedAccessor<T>,
    {
        let payload = extent::load(self, page)?;
        Ok(Arc::new(accessor.decode(&payload)?))
    }

    /// Stores `value` at `page`, releasing any continuation pages the
    /// previous value occupied, and returns the list of pages now used.
    ///
    /// The supplied object must never be mutated once it has been stored.
    fn put<T, A>(&mut self, accessor: &A, page: PageId, value: T) -> Result<Vec<PageId>>
    where
        Self: Sized,
        T: Send + Sync + 'static,
        A: PagedAccessor<T>,
    {
        extent::free_linked(self, page)?;
        let mut payload = Vec::new();
        accessor.encode(&value, &mut payload)?;
        extent::store(self, page, &payload)
    }

    /// Frees any pages linked from the value stored at `page`. Does not
    /// free `page` itself.
    fn clear<T, A>(&mut self, accessor: &A, page: PageId) -> Result<()>
    where
        Self: Sized,
        T: Send + Sync + 'static,
        A: PagedAccessor<T>,
    {
        let _ = accessor;
        extent::free_linked(self, page)?;
        Ok(())
    }

    /// Forces buffered state down to durable storage.
    fn flush(&mut self) -> Result<()>;
}
