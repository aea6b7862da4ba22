// Copyright 2022-2026 Animica Systems
// SPDX-License-Identifier: Apache-2.0, MIT

mod errors;
mod memory;
pub mod parity;

pub use errors::Error;
pub use memory::MemoryDb;
pub use parity::{ParityDb, ParityDbConfig};

/// One mutation inside an atomic commit batch.
#[derive(Debug, Clone)]
pub enum BatchOp {
    Put {
        column: u8,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    Delete {
        column: u8,
        key: Vec<u8>,
    },
}

impl BatchOp {
    pub fn put(column: u8, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        BatchOp::Put {
            column,
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn delete(column: u8, key: impl Into<Vec<u8>>) -> Self {
        BatchOp::Delete {
            column,
            key: key.into(),
        }
    }
}

/// Store interface used as the KV backing for the anchor and blob stores.
///
/// Columns are small integers fixed by each store; keys within a column are
/// ordered byte-wise, and `iter_prefix`/`iter_from` report entries in that
/// order.
pub trait Store {
    /// Read a single value, `None` if the key doesn't exist.
    fn read<K>(&self, column: u8, key: K) -> Result<Option<Vec<u8>>, Error>
    where
        K: AsRef<[u8]>;

    /// Write a single value.
    fn write<K, V>(&self, column: u8, key: K, value: V) -> Result<(), Error>
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>;

    /// Delete the value at key. Deleting an absent key is not an error.
    fn delete<K>(&self, column: u8, key: K) -> Result<(), Error>
    where
        K: AsRef<[u8]>;

    /// Returns `Ok(true)` if the key exists.
    fn exists<K>(&self, column: u8, key: K) -> Result<bool, Error>
    where
        K: AsRef<[u8]>,
    {
        Ok(self.read(column, key)?.is_some())
    }

    /// Apply a batch of mutations atomically.
    fn commit(&self, batch: Vec<BatchOp>) -> Result<(), Error>;

    /// All entries whose key starts with `prefix`, ascending by key.
    fn iter_prefix<K>(&self, column: u8, prefix: K) -> Result<Vec<(Vec<u8>, Vec<u8>)>, Error>
    where
        K: AsRef<[u8]>;

    /// All entries with key >= `start`, ascending by key.
    fn iter_from<K>(&self, column: u8, start: K) -> Result<Vec<(Vec<u8>, Vec<u8>)>, Error>
    where
        K: AsRef<[u8]>;

    /// Hint that the backend may reclaim free space. Default is a no-op.
    fn vacuum(&self) -> Result<(), Error> {
        Ok(())
    }
}

impl<S: Store> Store for &S {
    fn read<K>(&self, column: u8, key: K) -> Result<Option<Vec<u8>>, Error>
    where
        K: AsRef<[u8]>,
    {
        (*self).read(column, key)
    }

    fn write<K, V>(&self, column: u8, key: K, value: V) -> Result<(), Error>
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        (*self).write(column, key, value)
    }

    fn delete<K>(&self, column: u8, key: K) -> Result<(), Error>
    where
        K: AsRef<[u8]>,
    {
        (*self).delete(column, key)
    }

    fn exists<K>(&self, column: u8, key: K) -> Result<bool, Error>
    where
        K: AsRef<[u8]>,
    {
        (*self).exists(column, key)
    }

    fn commit(&self, batch: Vec<BatchOp>) -> Result<(), Error> {
        (*self).commit(batch)
    }

    fn iter_prefix<K>(&self, column: u8, prefix: K) -> Result<Vec<(Vec<u8>, Vec<u8>)>, Error>
    where
        K: AsRef<[u8]>,
    {
        (*self).iter_prefix(column, prefix)
    }

    fn iter_from<K>(&self, column: u8, start: K) -> Result<Vec<(Vec<u8>, Vec<u8>)>, Error>
    where
        K: AsRef<[u8]>,
    {
        (*self).iter_from(column, start)
    }

    fn vacuum(&self) -> Result<(), Error> {
        (*self).vacuum()
    }
}

#[cfg(test)]
mod tests;
