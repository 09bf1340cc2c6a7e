//! Separator shortening for simple-prefix B+Trees.

/// Computes the shortest separator distinguishing two adjacent leaves'
/// key ranges at split time.
///
/// For a left leaf ending in `left` and a right leaf starting at `right`
/// (with `left < right`), the returned separator `s` must satisfy
/// `left < s <= right` under the index ordering — good enough to route
/// lookups, shorter than a real key.
pub trait Prefixer<K>: Send + Sync {
    /// Returns the separator to promote between `left` and `right`.
    fn simple_prefix(&self, left: &K, right: &K) -> K;
}

/// Prefixer over string keys; prefixes are cut at character boundaries.
#[derive(Debug, Default, Clone, Copy)]
pub struct StringPrefixer;

impl Prefixer<String> for StringPrefixer {
    fn simple_prefix(&self, left: &String, right: &String) -> String {
        let mut prefix = String::new();
        for ch in right.chars() {
            prefix.push(ch);
            if prefix.as_str() > left.as_str() {
                return prefix;
            }
        }
        right.clone()
    }
}

/// Prefixer over raw byte-string keys.
#[derive(Debug, Default, Clone, Copy)]
pub struct BytesPrefixer;

impl Prefixer<Vec<u8>> for BytesPrefixer {
    fn simple_prefix(&self, left: &Vec<u8>, right: &Vec<u8>) -> Vec<u8> {
        let mut prefix = Vec::new();
        for &byte in right {
            prefix.push(byte);
            if prefix.as_slice() > left.as_slice() {
                return prefix;
            }
        }
        right.clone()
    }
}
