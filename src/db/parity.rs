// Copyright 2022-2026 Animica Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parity_db::{CompressionType, Db, Options};

use super::{BatchOp, Error, Store};

#[derive(Clone)]
pub struct ParityDb {
    db: Arc<Db>,
    columns: u8,
}

pub struct ParityDbConfig {
    pub path: PathBuf,
    pub columns: u8,
}

impl ParityDbConfig {
    pub fn from_path(path: &Path, columns: u8) -> Self {
        Self {
            path: path.to_path_buf(),
            columns,
        }
    }
}

impl ParityDb {
    fn to_options(config: &ParityDbConfig) -> Options {
        Options {
            path: config.path.to_owned(),
            sync_wal: true,
            sync_data: true,
            stats: false,
            salt: None,
            columns: (0..config.columns)
                .map(|_| parity_db::ColumnOptions {
                    // btree-indexed so range scans by height/time work
                    btree_index: true,
                    compression: CompressionType::Lz4,
                    ..Default::default()
                })
                .collect(),
            compression_threshold: Default::default(),
        }
    }

    pub fn open(config: &ParityDbConfig) -> anyhow::Result<Self> {
        let opts = Self::to_options(config);
        Ok(Self {
            db: Arc::new(Db::open_or_create(&opts)?),
            columns: config.columns,
        })
    }

    fn check_column(&self, column: u8) -> Result<(), Error> {
        if column >= self.columns {
            return Err(Error::UnknownColumn(column));
        }
        Ok(())
    }
}

impl Store for ParityDb {
    fn read<K>(&self, column: u8, key: K) -> Result<Option<Vec<u8>>, Error>
    where
        K: AsRef<[u8]>,
    {
        self.check_column(column)?;
        self.db.get(column, key.as_ref()).map_err(Error::from)
    }

    fn write<K, V>(&self, column: u8, key: K, value: V) -> Result<(), Error>
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        self.check_column(column)?;
        let tx = [(column, key.as_ref(), Some(value.as_ref().to_owned()))];
        self.db.commit(tx).map_err(Error::from)
    }

    fn delete<K>(&self, column: u8, key: K) -> Result<(), Error>
    where
        K: AsRef<[u8]>,
    {
        self.check_column(column)?;
        let tx = [(column, key.as_ref(), None)];
        self.db.commit(tx).map_err(Error::from)
    }

    fn commit(&self, batch: Vec<BatchOp>) -> Result<(), Error> {
        let mut tx = Vec::with_capacity(batch.len());
        for op in &batch {
            match op {
                BatchOp::Put { column, key, value } => {
                    self.check_column(*column)?;
                    tx.push((*column, key.clone(), Some(value.clone())));
                }
                BatchOp::Delete { column, key } => {
                    self.check_column(*column)?;
                    tx.push((*column, key.clone(), None));
                }
            }
        }
        self.db.commit(tx).map_err(Error::from)
    }

    fn iter_prefix<K>(&self, column: u8, prefix: K) -> Result<Vec<(Vec<u8>, Vec<u8>)>, Error>
    where
        K: AsRef<[u8]>,
    {
        self.check_column(column)?;
        let prefix = prefix.as_ref();
        let mut iter = self.db.iter(column)?;
        iter.seek(prefix)?;
        let mut out = Vec::new();
        while let Some((key, value)) = iter.next()? {
            if !key.starts_with(prefix) {
                break;
            }
            out.push((key, value));
        }
        Ok(out)
    }

    fn iter_from<K>(&self, column: u8, start: K) -> Result<Vec<(Vec<u8>, Vec<u8>)>, Error>
    where
        K: AsRef<[u8]>,
    {
        self.check_column(column)?;
        let mut iter = self.db.iter(column)?;
        iter.seek(start.as_ref())?;
        let mut out = Vec::new();
        while let Some((key, value)) = iter.next()? {
            out.push((key, value));
        }
        Ok(out)
    }
}
