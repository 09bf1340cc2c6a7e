//! Typed page access.
//!
//! A [`PagedAccessor`] teaches the store how to marshal one kind of value;
//! the store supplies extent chaining, deferred encoding and caching on top
//! of it. Accessors must be cheap to clone: the store captures a copy when
//! it defers marshalling to persist time.

use std::marker::PhantomData;

use crate::codec::ValCodec;
use crate::error::Result;

/// Encode/decode hooks consumed by [`crate::paged::Paged::get`],
/// [`put`](crate::paged::Paged::put) and
/// [`clear`](crate::paged::Paged::clear).
pub trait PagedAccessor<T: Send + Sync + 'static>: Clone + Send + Sync + 'static {
    /// Appends the encoded form of `value` to `out`.
    fn encode(&self, value: &T, out: &mut Vec<u8>) -> Result<()>;

    /// Decodes a value from the payload bytes produced by
    /// [`encode`](PagedAccessor::encode).
    fn decode(&self, payload: &[u8]) -> Result<T>;

    /// Upper bound on the encoded size of `value`, or `None` when the
    /// size cannot be known without encoding.
    ///
    /// An accurate estimate is what allows the store to keep the decoded
    /// object and marshal it only once, when the owning batch is merged
    /// into the backing file.
    fn estimated_size(&self, value: &T) -> Option<usize> {
        let _ = value;
        None
    }
}

/// Accessor for any type with a [`ValCodec`] implementation.
pub struct CodecAccessor<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> CodecAccessor<T> {
    /// Creates the accessor.
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for CodecAccessor<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for CodecAccessor<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> PagedAccessor<T> for CodecAccessor<T>
where
    T: ValCodec + Send + Sync + 'static,
{
    fn encode(&self, value: &T, out: &mut Vec<u8>) -> Result<()> {
        T::encode_val(value, out);
        Ok(())
    }

    fn decode(&self, payload: &[u8]) -> Result<T> {
        T::decode_val(payload)
    }

    fn estimated_size(&self, value: &T) -> Option<usize> {
        T::estimated_val_size(value)
    }
}
