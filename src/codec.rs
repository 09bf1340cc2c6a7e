//! Encoding and decoding of index keys and values.
//!
//! Codecs are implemented directly on the key/value types. A codec may
//! additionally report an upper-bound size estimate for a value; estimates
//! are what allow the store to defer marshalling until a page is actually
//! persisted (see [`crate::paged::PagedAccessor`]).

use crate::error::{QuireError, Result};

/// Marshalling for index keys.
pub trait KeyCodec: Sized {
    /// Appends the encoded form of `key` to `out`.
    fn encode_key(key: &Self, out: &mut Vec<u8>);

    /// Decodes a key from exactly the bytes produced by [`encode_key`].
    ///
    /// [`encode_key`]: KeyCodec::encode_key
    fn decode_key(bytes: &[u8]) -> Result<Self>;

    /// Upper bound on the encoded size of `key`, or `None` when the codec
    /// cannot estimate without encoding.
    fn estimated_key_size(key: &Self) -> Option<usize> {
        let _ = key;
        None
    }
}

/// Marshalling for index values.
pub trait ValCodec: Sized {
    /// Appends the encoded form of `value` to `out`.
    fn encode_val(value: &Self, out: &mut Vec<u8>);

    /// Decodes a value from exactly the bytes produced by [`encode_val`].
    ///
    /// [`encode_val`]: ValCodec::encode_val
    fn decode_val(src: &[u8]) -> Result<Self>;

    /// Upper bound on the encoded size of `value`, or `None` when the codec
    /// cannot estimate without encoding.
    fn estimated_val_size(value: &Self) -> Option<usize> {
        let _ = value;
        None
    }
}

macro_rules! int_codec {
    ($ty:ty, $len:expr, $err:expr) => {
        impl KeyCodec for $ty {
            fn encode_key(key: &Self, out: &mut Vec<u8>) {
                out.extend_from_slice(&key.to_be_bytes());
            }

            fn decode_key(bytes: &[u8]) -> Result<Self> {
                let arr: [u8; $len] = bytes
                    .try_into()
                    .map_err(|_| QuireError::Corruption($err))?;
                Ok(<$ty>::from_be_bytes(arr))
            }

            fn estimated_key_size(_key: &Self) -> Option<usize> {
                Some($len)
            }
        }

        impl ValCodec for $ty {
            fn encode_val(value: &Self, out: &mut Vec<u8>) {
                out.extend_from_slice(&value.to_be_bytes());
            }

            fn decode_val(src: &[u8]) -> Result<Self> {
                let arr: [u8; $len] = src
                    .try_into()
                    .map_err(|_| QuireError::Corruption($err))?;
                Ok(<$ty>::from_be_bytes(arr))
            }

            fn estimated_val_size(_value: &Self) -> Option<usize> {
                Some($len)
            }
        }
    };
}

int_codec!(u16, 2, "u16 length mismatch");
int_codec!(u32, 4, "u32 length mismatch");
int_codec!(u64, 8, "u64 length mismatch");
int_codec!(i64, 8, "i64 length mismatch");

impl KeyCodec for String {
    fn encode_key(key: &Self, out: &mut Vec<u8>) {
        out.extend_from_slice(key.as_bytes());
    }

    fn decode_key(bytes: &[u8]) -> Result<Self> {
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| QuireError::Corruption("string key is not valid UTF-8"))
    }

    fn estimated_key_size(key: &Self) -> Option<usize> {
        Some(key.len())
    }
}

impl ValCodec for String {
    fn encode_val(value: &Self, out: &mut Vec<u8>) {
        out.extend_from_slice(value.as_bytes());
    }

    fn decode_val(src: &[u8]) -> Result<Self> {
        std::str::from_utf8(src)
            .map(str::to_owned)
            .map_err(|_| QuireError::Corruption("string value is not valid UTF-8"))
    }

    fn estimated_val_size(value: &Self) -> Option<usize> {
        Some(value.len())
    }
}

impl KeyCodec for Vec<u8> {
    fn encode_key(key: &Self, out: &mut Vec<u8>) {
        out.extend_from_slice(key);
    }

    fn decode_key(bytes: &[u8]) -> Result<Self> {
        Ok(bytes.to_vec())
    }

    fn estimated_key_size(key: &Self) -> Option<usize> {
        Some(key.len())
    }
}

impl ValCodec for Vec<u8> {
    fn encode_val(value: &Self, out: &mut Vec<u8>) {
        out.extend_from_slice(value);
    }

    fn decode_val(src: &[u8]) -> Result<Self> {
        Ok(src.to_vec())
    }

    fn estimated_val_size(value: &Self) -> Option<usize> {
        Some(value.len())
    }
}
