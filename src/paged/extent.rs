//! Extents: values chained across linked pages.
//!
//! Every accessor-stored value begins with an extent frame. The frame
//! header carries a magic marker (distinguishing extent-encoded pages from
//! plain single-page images), the payload length of the frame, the next
//! page in the chain (`0` terminates it; page 0 is never a continuation)
//! and a crc32 over the frame payload.

use std::collections::HashSet;

use crate::error::{QuireError, Result};
use crate::paged::{PageId, Paged};

/// Marker identifying the first bytes of an extent frame.
pub const EXTENT_MAGIC: [u8; 4] = *b"QEXT";

/// Encoded size of the frame header: magic + length + next + crc32.
pub const EXTENT_HEADER_LEN: usize = 16;

const LEN_RANGE: std::ops::Range<usize> = 4..8;
const NEXT_RANGE: std::ops::Range<usize> = 8..12;
const CRC_RANGE: std::ops::Range<usize> = 12..16;

/// Payload capacity of a single frame for the given page size.
pub fn frame_capacity(page_size: usize) -> usize {
    page_size.saturating_sub(EXTENT_HEADER_LEN)
}

fn encode_frame(chunk: &[u8], next: PageId, page_size: usize) -> Result<Vec<u8>> {
    if chunk.len() > frame_capacity(page_size) {
        return Err(QuireError::Invalid("extent frame payload exceeds page"));
    }
    let mut image = Vec::with_capacity(EXTENT_HEADER_LEN + chunk.len());
    image.extend_from_slice(&EXTENT_MAGIC);
    image.extend_from_slice(&(chunk.len() as u32).to_be_bytes());
    image.extend_from_slice(&next.to_be_bytes());
    image.extend_from_slice(&crc32fast::hash(chunk).to_be_bytes());
    image.extend_from_slice(chunk);
    Ok(image)
}

/// Builds the single-page frame image for a payload known to fit one page.
pub(crate) fn frame_single(payload: &[u8], page_size: usize) -> Result<Vec<u8>> {
    encode_frame(payload, 0, page_size)
}

struct Frame {
    payload: Vec<u8>,
    next: PageId,
}

fn decode_frame(image: &[u8], page_size: usize) -> Result<Frame> {
    if image.len() < EXTENT_HEADER_LEN || image[0..4] != EXTENT_MAGIC {
        return Err(QuireError::Corruption("extent frame missing magic"));
    }
    let len = u32::from_be_bytes(image[LEN_RANGE].try_into().unwrap()) as usize;
    let next = PageId::from_be_bytes(image[NEXT_RANGE].try_into().unwrap());
    let crc = u32::from_be_bytes(image[CRC_RANGE].try_into().unwrap());
    if len > frame_capacity(page_size) || EXTENT_HEADER_LEN + len > image.len() {
        return Err(QuireError::Corruption("extent frame length out of range"));
    }
    let payload = image[EXTENT_HEADER_LEN..EXTENT_HEADER_LEN + len].to_vec();
    if crc32fast::hash(&payload) != crc {
        return Err(QuireError::Corruption("extent frame checksum mismatch"));
    }
    Ok(Frame { payload, next })
}

fn is_extent(image: &[u8]) -> bool {
    image.len() >= EXTENT_MAGIC.len() && image[0..4] == EXTENT_MAGIC
}

fn read_image<P: Paged>(paged: &mut P, page: PageId) -> Result<Vec<u8>> {
    let mut image = Vec::with_capacity(paged.page_size());
    paged.read(page, &mut image)?;
    Ok(image)
}

fn alloc_continuation<P: Paged>(paged: &mut P) -> Result<PageId> {
    let page = paged.alloc()?;
    if page != 0 {
        return Ok(page);
    }
    // Page 0 would be indistinguishable from the end-of-chain sentinel.
    let replacement = paged.alloc()?;
    paged.free(0)?;
    Ok(replacement)
}

/// Stores `payload` starting at `first`, chaining continuation pages as
/// needed, and returns every page the value now occupies.
pub fn store<P: Paged>(paged: &mut P, first: PageId, payload: &[u8]) -> Result<Vec<PageId>> {
    let cap = frame_capacity(paged.page_size());
    if cap == 0 {
        return Err(QuireError::Invalid("page size too small for extents"));
    }
    let chunk_count = payload.len().div_ceil(cap).max(1);
    let mut pages = Vec::with_capacity(chunk_count);
    pages.push(first);
    for _ in 1..chunk_count {
        pages.push(alloc_continuation(paged)?);
    }
    for (index, page) in pages.iter().enumerate() {
        let start = index * cap;
        let end = payload.len().min(start + cap);
        let next = pages.get(index + 1).copied().unwrap_or(0);
        let image = encode_frame(&payload[start..end], next, paged.page_size())?;
        let mut src: &[u8] = &image;
        paged.write(*page, &mut src)?;
    }
    Ok(pages)
}

/// Loads the payload stored at `page`.
///
/// A page that does not begin with the extent marker holds a plain
/// single-page payload and is returned as-is.
pub fn load<P: Paged>(paged: &mut P, page: PageId) -> Result<Vec<u8>> {
    let image = read_image(paged, page)?;
    if !is_extent(&image) {
        return Ok(image);
    }
    let mut visited = HashSet::new();
    visited.insert(page);
    let mut frame = decode_frame(&image, paged.page_size())?;
    let mut payload = std::mem::take(&mut frame.payload);
    let mut next = frame.next;
    while next != 0 {
        if !visited.insert(next) {
            return Err(QuireError::Corruption("extent chain contains a cycle"));
        }
        let image = read_image(paged, next)?;
        let frame = decode_frame(&image, paged.page_size())?;
        payload.extend_from_slice(&frame.payload);
        next = frame.next;
    }
    Ok(payload)
}

/// Frees every continuation page linked from the value at `page` and
/// returns the freed page numbers. `page` itself stays allocated.
pub fn free_linked<P: Paged>(paged: &mut P, page: PageId) -> Result<Vec<PageId>> {
    let image = read_image(paged, page)?;
    if !is_extent(&image) {
        return Ok(Vec::new());
    }
    let mut visited = HashSet::new();
    visited.insert(page);
    let mut next = decode_frame(&image, paged.page_size())?.next;
    let mut freed = Vec::new();
    while next != 0 {
        if !visited.insert(next) {
            return Err(QuireError::Corruption("extent chain contains a cycle"));
        }
        let image = read_image(paged, next)?;
        let frame = decode_frame(&image, paged.page_size())?;
        paged.free(next)?;
        freed.push(next);
        next = frame.next;
    }
    Ok(freed)
}
