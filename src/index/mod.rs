//! Ordered key/value indexes over a [`Paged`](crate::paged::Paged) store.

pub mod btree;
pub mod directory;
pub mod predicate;
pub mod prefixer;
pub mod visitor;

mod iter;
mod node;

pub use btree::{BTreeIndex, BTreeIndexFactory, KeyComparator};
pub use directory::IndexDirectory;
pub use iter::Iter;
pub use predicate::Predicate;
pub use prefixer::{BytesPrefixer, Prefixer, StringPrefixer};
pub use visitor::{IndexVisitor, PredicateVisitor};
