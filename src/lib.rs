//! Quire: an embedded, page-oriented storage engine.
//!
//! Ordered key/value indexes (a variable-fanout B+Tree with optional
//! simple-prefix compression) layered on a multi-version page store with
//! optimistic transactions. Quire links into the host process as a local
//! persistence layer; it is not a server.
//!
//! # Example
//!
//! ```no_run
//! use quire::index::BTreeIndexFactory;
//! use quire::tx::{StoreOptions, TxPageFile};
//!
//! # fn main() -> quire::Result<()> {
//! let store = TxPageFile::open("data.qdb".as_ref(), StoreOptions::default())?;
//! let mut tx = store.tx();
//! let index = BTreeIndexFactory::<u64, String>::new().create(&mut tx)?;
//! index.put(&mut tx, 42, "answer".into())?;
//! assert!(tx.commit()?.is_committed());
//! assert_eq!(index.get(&mut store.tx(), &42)?, Some("answer".into()));
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod error;
pub mod index;
pub mod logging;
pub mod paged;
pub mod tx;

pub use error::{QuireError, Result};
pub use index::{BTreeIndex, BTreeIndexFactory, IndexDirectory, Predicate};
pub use paged::{PageFile, PageId, Paged};
pub use tx::{Commit, StoreOptions, Transaction, TxPageFile};
