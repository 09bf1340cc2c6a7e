//! The file-backed page store.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use bytes::{Buf, BufMut};

use crate::error::{QuireError, Result};
use crate::paged::allocator::{Allocator, BitAllocator};
use crate::paged::{PageId, Paged};

/// Raw fixed-size-page access to a backing file, with its own allocator.
///
/// `PageFile` is the committed base layer beneath the transactional store,
/// and can also be used directly when no isolation is needed.
pub struct PageFile {
    file: File,
    page_size: usize,
    file_len: u64,
    allocator: BitAllocator,
}

impl PageFile {
    /// Opens (or creates) the page file at `path`.
    ///
    /// Every page inside the current file length is considered allocated on
    /// open; the free set is not persisted across reopens.
    pub fn open(path: &Path, page_size: usize, max_pages: usize) -> Result<Self> {
        if page_size < 64 {
            return Err(QuireError::Invalid("page size must be at least 64 bytes"));
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let file_len = file.metadata()?.len();
        let mut allocator = BitAllocator::new(max_pages);
        let pre_existing = file_len.div_ceil(page_size as u64) as usize;
        if pre_existing > 0 {
            allocator.mark_allocated(0, pre_existing);
        }
        Ok(Self {
            file,
            page_size,
            file_len,
            allocator,
        })
    }

    /// Number of pages the backing file currently covers.
    pub fn page_count(&self) -> usize {
        self.file_len.div_ceil(self.page_size as u64) as usize
    }

    /// Shared access to the allocator.
    pub fn allocator(&self) -> &BitAllocator {
        &self.allocator
    }

    /// Mutable access to the allocator.
    pub fn allocator_mut(&mut self) -> &mut BitAllocator {
        &mut self.allocator
    }

    fn page_offset(&self, page: PageId) -> Result<u64> {
        u64::from(page)
            .checked_mul(self.page_size as u64)
            .ok_or(QuireError::Invalid("page offset overflow"))
    }

    /// Reads the full image of `page`; bytes past the end of the file are
    /// zero.
    pub(crate) fn read_page_image(&mut self, page: PageId) -> Result<Vec<u8>> {
        let offset = self.page_offset(page)?;
        let mut image = vec![0u8; self.page_size];
        if offset < self.file_len {
            self.file.seek(SeekFrom::Start(offset))?;
            let mut filled = 0;
            while filled < image.len() {
                let read = self.file.read(&mut image[filled..])?;
                if read == 0 {
                    break;
                }
                filled += read;
            }
        }
        Ok(image)
    }

    /// Writes a full page image, extending the file as needed.
    pub(crate) fn write_page_image(&mut self, page: PageId, data: &[u8]) -> Result<()> {
        if data.len() > self.page_size {
            return Err(QuireError::Invalid("page image exceeds page size"));
        }
        let offset = self.page_offset(page)?;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        if data.len() < self.page_size {
            let pad = vec![0u8; self.page_size - data.len()];
            self.file.write_all(&pad)?;
        }
        let end = offset + self.page_size as u64;
        if end > self.file_len {
            self.file_len = end;
        }
        Ok(())
    }

    /// Forces written pages to durable storage.
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }
}

impl Paged for PageFile {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn alloc_run(&mut self, count: usize) -> Result<PageId> {
        let first = self.allocator.alloc(count)?;
        // A reused page may still hold an old extent head; scrub it so the
        // next accessor store cannot walk a stale chain.
        for offset in 0..count as PageId {
            let page = first + offset;
            if u64::from(page) * (self.page_size as u64) < self.file_len {
                self.write_page_image(page, &[])?;
            }
        }
        Ok(first)
    }

    fn free(&mut self, page: PageId) -> Result<()> {
        self.allocator.free(page, 1);
        Ok(())
    }

    fn is_allocated(&self, page: PageId) -> bool {
        self.allocator.is_allocated(page)
    }

    fn read(&mut self, page: PageId, buf: &mut dyn BufMut) -> Result<()> {
        let image = self.read_page_image(page)?;
        let take = image.len().min(buf.remaining_mut());
        buf.put_slice(&image[..take]);
        Ok(())
    }

    fn write(&mut self, page: PageId, buf: &mut dyn Buf) -> Result<()> {
        let take = buf.remaining().min(self.page_size);
        let mut image = vec![0u8; take];
        buf.copy_to_slice(&mut image);
        self.write_page_image(page, &image)
    }

    fn flush(&mut self) -> Result<()> {
        self.sync()
    }
}
