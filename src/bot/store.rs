// Copyright (c) 2023 Octavian Oncescu
// Copyright (c) 2023-2024 The Aquila Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use super::state::TradeBotData;
use crate::primitives::PublicKey;
use dashmap::DashMap;
use rocksdb::{MultiThreaded, Options, TransactionDB, TransactionDBOptions};
use std::path::Path;
use triomphe::Arc;

pub type DB = TransactionDB<MultiThreaded>;

const TRADE_BOT_KEY_PREFIX: &[u8] = b"tradebot/";

/// Storage failures are fatal to the current operation, never to the
/// process: the poll loop logs and carries on with the next entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreErr {
    Database(String),
    Codec(String),
    InvalidKey,
}

impl From<rocksdb::Error> for StoreErr {
    fn from(err: rocksdb::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<bincode::error::EncodeError> for StoreErr {
    fn from(err: bincode::error::EncodeError) -> Self {
        Self::Codec(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for StoreErr {
    fn from(err: bincode::error::DecodeError) -> Self {
        Self::Codec(err.to_string())
    }
}

/// Trade bot entry persistence, keyed by the entry's trade public key.
pub trait TradeBotStore: Send + Sync {
    fn get(&self, key: &PublicKey) -> Result<Option<TradeBotData>, StoreErr>;
    fn put(&self, data: &TradeBotData) -> Result<(), StoreErr>;
    fn delete(&self, key: &PublicKey) -> Result<(), StoreErr>;
    fn list(&self) -> Result<Vec<TradeBotData>, StoreErr>;
}

/// In-memory store for tests and memory only nodes.
#[derive(Default)]
pub struct MemoryTradeBotStore {
    entries: DashMap<PublicKey, TradeBotData>,
}

impl MemoryTradeBotStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl TradeBotStore for MemoryTradeBotStore {
    fn get(&self, key: &PublicKey) -> Result<Option<TradeBotData>, StoreErr> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    fn put(&self, data: &TradeBotData) -> Result<(), StoreErr> {
        let key = data.trade_public_key().map_err(|_| StoreErr::InvalidKey)?;
        self.entries.insert(key, data.clone());
        Ok(())
    }

    fn delete(&self, key: &PublicKey) -> Result<(), StoreErr> {
        self.entries.remove(key);
        Ok(())
    }

    fn list(&self) -> Result<Vec<TradeBotData>, StoreErr> {
        Ok(self
            .entries
            .iter()
            .map(|entry| entry.value().clone())
            .collect())
    }
}

/// RocksDB backed store. Entries live in the default column family under a
/// `tradebot/` key prefix so the database can be shared with other node
/// state.
pub struct DiskTradeBotStore {
    db: Arc<DB>,
}

impl DiskTradeBotStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreErr> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, &TransactionDBOptions::default(), path)?;

        Ok(Self { db: Arc::new(db) })
    }

    #[must_use]
    pub fn with_db(db: Arc<DB>) -> Self {
        Self { db }
    }

    fn storage_key(key: &PublicKey) -> Vec<u8> {
        let mut out = Vec::with_capacity(TRADE_BOT_KEY_PREFIX.len() + 32);
        out.extend_from_slice(TRADE_BOT_KEY_PREFIX);
        out.extend_from_slice(key.as_bytes());
        out
    }
}

impl TradeBotStore for DiskTradeBotStore {
    fn get(&self, key: &PublicKey) -> Result<Option<TradeBotData>, StoreErr> {
        match self.db.get(Self::storage_key(key))? {
            Some(bytes) => Ok(Some(crate::codec::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put(&self, data: &TradeBotData) -> Result<(), StoreErr> {
        let key = data.trade_public_key().map_err(|_| StoreErr::InvalidKey)?;
        let encoded = crate::codec::encode_to_vec(data)?;
        self.db.put(Self::storage_key(&key), encoded)?;
        Ok(())
    }

    fn delete(&self, key: &PublicKey) -> Result<(), StoreErr> {
        self.db.delete(Self::storage_key(key))?;
        Ok(())
    }

    fn list(&self) -> Result<Vec<TradeBotData>, StoreErr> {
        let mut out = vec![];

        for item in self.db.prefix_iterator(TRADE_BOT_KEY_PREFIX) {
            let (key, value) = item?;

            // Without a prefix extractor the iterator runs to the end of the
            // keyspace; stop at the first foreign key.
            if !key.starts_with(TRADE_BOT_KEY_PREFIX) {
                break;
            }

            out.push(crate::codec::decode(&value)?);
        }

        Ok(out)
    }
}
