// Copyright 2022-2026 Animica Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::{BatchOp, Error, Store};

/// A thread-safe in-memory store, ordered per column. Used in tests and as
/// the ephemeral backend for short-lived nodes.
#[derive(Debug, Default, Clone)]
pub struct MemoryDb {
    columns: Arc<RwLock<BTreeMap<(u8, Vec<u8>), Vec<u8>>>>,
}

impl MemoryDb {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryDb {
    fn read<K>(&self, column: u8, key: K) -> Result<Option<Vec<u8>>, Error>
    where
        K: AsRef<[u8]>,
    {
        Ok(self
            .columns
            .read()
            .get(&(column, key.as_ref().to_vec()))
            .cloned())
    }

    fn write<K, V>(&self, column: u8, key: K, value: V) -> Result<(), Error>
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        self.columns
            .write()
            .insert((column, key.as_ref().to_vec()), value.as_ref().to_vec());
        Ok(())
    }

    fn delete<K>(&self, column: u8, key: K) -> Result<(), Error>
    where
        K: AsRef<[u8]>,
    {
        self.columns.write().remove(&(column, key.as_ref().to_vec()));
        Ok(())
    }

    fn commit(&self, batch: Vec<BatchOp>) -> Result<(), Error> {
        let mut columns = self.columns.write();
        for op in batch {
            match op {
                BatchOp::Put { column, key, value } => {
                    columns.insert((column, key), value);
                }
                BatchOp::Delete { column, key } => {
                    columns.remove(&(column, key));
                }
            }
        }
        Ok(())
    }

    fn iter_prefix<K>(&self, column: u8, prefix: K) -> Result<Vec<(Vec<u8>, Vec<u8>)>, Error>
    where
        K: AsRef<[u8]>,
    {
        let prefix = prefix.as_ref();
        let columns = self.columns.read();
        Ok(columns
            .range((column, prefix.to_vec())..)
            .take_while(|((col, key), _)| *col == column && key.starts_with(prefix))
            .map(|((_, key), value)| (key.clone(), value.clone()))
            .collect())
    }

    fn iter_from<K>(&self, column: u8, start: K) -> Result<Vec<(Vec<u8>, Vec<u8>)>, Error>
    where
        K: AsRef<[u8]>,
    {
        let columns = self.columns.read();
        Ok(columns
            .range((column, start.as_ref().to_vec())..)
            .take_while(|((col, _), _)| *col == column)
            .map(|((_, key), value)| (key.clone(), value.clone()))
            .collect())
    }
}
