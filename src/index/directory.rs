//! A name → index directory stored inside the page store.

use crate::codec::{KeyCodec, ValCodec};
use crate::error::{QuireError, Result};
use crate::index::btree::{BTreeIndex, BTreeIndexFactory};
use crate::paged::Paged;

/// Maps unique names to index root pages so several indexes can coexist
/// in one store — and, updated through one transaction, change
/// atomically together.
///
/// The directory itself is a `BTreeIndex<String, u32>` rooted at page 0.
pub struct IndexDirectory {
    names: BTreeIndex<String, u32>,
}

impl IndexDirectory {
    /// Attaches to the directory, creating its backing index on first
    /// use.
    pub fn new<P: Paged>(paged: &mut P) -> Result<Self> {
        Ok(Self {
            names: BTreeIndexFactory::new().open_or_create(paged)?,
        })
    }

    /// Creates a new named index. Fails when the name is already
    /// registered.
    pub fn create<P, K, V>(
        &self,
        paged: &mut P,
        name: &str,
        factory: &BTreeIndexFactory<K, V>,
    ) -> Result<BTreeIndex<K, V>>
    where
        P: Paged,
        K: KeyCodec + Ord + Clone + Send + Sync + 'static,
        V: ValCodec + Clone + Send + Sync + 'static,
    {
        if self.names.contains_key(paged, &name.to_owned())? {
            return Err(QuireError::Invalid("index name already registered"));
        }
        let index = factory.create(paged)?;
        self.names.put(paged, name.to_owned(), index.location())?;
        Ok(index)
    }

    /// Opens an existing named index. Fails when the name is not
    /// registered.
    pub fn open<P, K, V>(
        &self,
        paged: &mut P,
        name: &str,
        factory: &BTreeIndexFactory<K, V>,
    ) -> Result<BTreeIndex<K, V>>
    where
        P: Paged,
        K: KeyCodec + Ord + Clone + Send + Sync + 'static,
        V: ValCodec + Clone + Send + Sync + 'static,
    {
        match self.names.get(paged, &name.to_owned())? {
            Some(page) => Ok(factory.open(page)),
            None => Err(QuireError::Invalid("index name is not registered")),
        }
    }

    /// Opens the named index, creating and registering it when absent.
    pub fn open_or_create<P, K, V>(
        &self,
        paged: &mut P,
        name: &str,
        factory: &BTreeIndexFactory<K, V>,
    ) -> Result<BTreeIndex<K, V>>
    where
        P: Paged,
        K: KeyCodec + Ord + Clone + Send + Sync + 'static,
        V: ValCodec + Clone + Send + Sync + 'static,
    {
        match self.names.get(paged, &name.to_owned())? {
            Some(page) => Ok(factory.open(page)),
            None => {
                let index = factory.create(paged)?;
                self.names.put(paged, name.to_owned(), index.location())?;
                Ok(index)
            }
        }
    }

    /// Lists the registered index names.
    pub fn indexes<P: Paged>(&self, paged: &mut P) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in self.names.iter(paged)? {
            let (name, _) = entry?;
            names.push(name);
        }
        Ok(names)
    }
}
