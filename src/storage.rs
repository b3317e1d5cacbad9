//! Storage backends for chain, UTXO and mesh state.
//!
//! The core only assumes an abstract key/value store with prefix range
//! scans. Two backends are provided: an in-memory BTreeMap store for tests
//! and a persistent sled store for the daemon. Key spaces:
//!
//! - `block/<u64 big-endian height>` → block
//! - `utxo/<txid>/<u32 vout>` → utxo
//! - `addrutxo/<script>/<txid>/<vout>` → (empty) secondary index
//! - `keypair/<address>` → keypair record
//! - `genesis/<chain_id>` → genesis config
//! - `ban/<node_id>` → ban entry
//! - `session/<message_id>` → reassembly session snapshot

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::spawn_blocking;

#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("Serialization failed: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    #[error("Task join error: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

pub enum BatchOp {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

#[async_trait::async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError>;
    async fn put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<(), StorageError>;
    async fn delete(&self, key: &[u8]) -> Result<(), StorageError>;
    /// Keys returned in ascending byte order.
    async fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError>;
    /// All operations commit atomically or none do.
    async fn apply_batch(&self, ops: Vec<BatchOp>) -> Result<(), StorageError>;
}

/// Key builders for the fixed key spaces. Big-endian height encoding keeps
/// block keys range-scannable in height order.
pub mod keys {
    use crate::types::{Hash256, MessageId, NodeId, OutPoint};

    pub fn block(height: u64) -> Vec<u8> {
        let mut k = b"block/".to_vec();
        k.extend_from_slice(&height.to_be_bytes());
        k
    }

    pub const BLOCK_PREFIX: &[u8] = b"block/";

    pub fn utxo(outpoint: &OutPoint) -> Vec<u8> {
        let mut k = b"utxo/".to_vec();
        k.extend_from_slice(&outpoint.txid);
        k.push(b'/');
        k.extend_from_slice(&outpoint.vout.to_be_bytes());
        k
    }

    pub fn addr_utxo(script: &[u8], outpoint: &OutPoint) -> Vec<u8> {
        let mut k = addr_utxo_prefix(script);
        k.extend_from_slice(&outpoint.txid);
        k.push(b'/');
        k.extend_from_slice(&outpoint.vout.to_be_bytes());
        k
    }

    pub fn addr_utxo_prefix(script: &[u8]) -> Vec<u8> {
        let mut k = b"addrutxo/".to_vec();
        k.extend_from_slice(script);
        k.push(b'/');
        k
    }

    pub fn keypair(address: &str) -> Vec<u8> {
        format!("keypair/{address}").into_bytes()
    }

    pub fn genesis(chain_id: &str) -> Vec<u8> {
        format!("genesis/{chain_id}").into_bytes()
    }

    pub fn ban(node_id: &NodeId) -> Vec<u8> {
        let mut k = b"ban/".to_vec();
        k.extend_from_slice(node_id);
        k
    }

    pub const BAN_PREFIX: &[u8] = b"ban/";

    pub fn session(message_id: &MessageId) -> Vec<u8> {
        let mut k = b"session/".to_vec();
        k.extend_from_slice(message_id);
        k
    }

    pub const SESSION_PREFIX: &[u8] = b"session/";

    #[allow(dead_code)]
    pub fn txid_bytes(txid: &Hash256) -> String {
        hex::encode(txid)
    }
}

pub struct MemoryStore {
    map: Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            map: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.map.read().await.get(key).cloned())
    }

    async fn put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<(), StorageError> {
        self.map.write().await.insert(key, value);
        Ok(())
    }

    async fn delete(&self, key: &[u8]) -> Result<(), StorageError> {
        self.map.write().await.remove(key);
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        let map = self.map.read().await;
        Ok(map
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn apply_batch(&self, ops: Vec<BatchOp>) -> Result<(), StorageError> {
        let mut map = self.map.write().await;
        for op in ops {
            match op {
                BatchOp::Put(k, v) => {
                    map.insert(k, v);
                }
                BatchOp::Delete(k) => {
                    map.remove(&k);
                }
            }
        }
        Ok(())
    }
}

/// Sled-backed store used by the daemon.
pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    pub fn open(path: &str) -> Result<Self, StorageError> {
        let db = sled::Config::new()
            .path(path)
            .flush_every_ms(Some(1000))
            .mode(sled::Mode::HighThroughput)
            .open()?;
        Ok(Self { db })
    }

    #[allow(dead_code)]
    pub fn db(&self) -> sled::Db {
        self.db.clone()
    }
}

#[async_trait::async_trait]
impl KvStore for SledStore {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        let db = self.db.clone();
        let key = key.to_vec();
        let value = spawn_blocking(move || db.get(key))
            .await
            .map_err(StorageError::TaskJoin)??;
        Ok(value.map(|v| v.to_vec()))
    }

    async fn put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<(), StorageError> {
        let db = self.db.clone();
        spawn_blocking(move || db.insert(key, value))
            .await
            .map_err(StorageError::TaskJoin)??;
        Ok(())
    }

    async fn delete(&self, key: &[u8]) -> Result<(), StorageError> {
        let db = self.db.clone();
        let key = key.to_vec();
        spawn_blocking(move || db.remove(key))
            .await
            .map_err(StorageError::TaskJoin)??;
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        let db = self.db.clone();
        let prefix = prefix.to_vec();
        let entries = spawn_blocking(move || {
            db.scan_prefix(prefix)
                .map(|item| item.map(|(k, v)| (k.to_vec(), v.to_vec())))
                .collect::<Result<Vec<_>, sled::Error>>()
        })
        .await
        .map_err(StorageError::TaskJoin)??;
        Ok(entries)
    }

    async fn apply_batch(&self, ops: Vec<BatchOp>) -> Result<(), StorageError> {
        let db = self.db.clone();
        spawn_blocking(move || {
            let mut batch = sled::Batch::default();
            for op in ops {
                match op {
                    BatchOp::Put(k, v) => batch.insert(k, v),
                    BatchOp::Delete(k) => batch.remove(k),
                }
            }
            db.apply_batch(batch)?;
            // Flush so a crash right after block commit cannot lose the tip
            db.flush()?;
            Ok::<_, sled::Error>(())
        })
        .await
        .map_err(StorageError::TaskJoin)??;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OutPoint;

    #[tokio::test]
    async fn memory_store_round_trip() {
        let store = MemoryStore::new();
        store.put(b"a/1".to_vec(), vec![1]).await.unwrap();
        store.put(b"a/2".to_vec(), vec![2]).await.unwrap();
        store.put(b"b/1".to_vec(), vec![3]).await.unwrap();

        assert_eq!(store.get(b"a/1").await.unwrap(), Some(vec![1]));
        let scanned = store.scan_prefix(b"a/").await.unwrap();
        assert_eq!(scanned.len(), 2);

        store.delete(b"a/1").await.unwrap();
        assert_eq!(store.get(b"a/1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn block_keys_scan_in_height_order() {
        let store = MemoryStore::new();
        for height in [3u64, 1, 2, 0, 10] {
            store
                .put(keys::block(height), height.to_be_bytes().to_vec())
                .await
                .unwrap();
        }

        let scanned = store.scan_prefix(keys::BLOCK_PREFIX).await.unwrap();
        let heights: Vec<u64> = scanned
            .iter()
            .map(|(_, v)| u64::from_be_bytes(v.as_slice().try_into().unwrap()))
            .collect();
        assert_eq!(heights, vec![0, 1, 2, 3, 10]);
    }

    #[tokio::test]
    async fn sled_store_batch_atomicity() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledStore::open(dir.path().to_str().unwrap()).unwrap();

        let outpoint = OutPoint::new([7u8; 32], 0);
        store
            .apply_batch(vec![
                BatchOp::Put(keys::utxo(&outpoint), vec![1, 2, 3]),
                BatchOp::Put(keys::addr_utxo(b"alice", &outpoint), vec![]),
            ])
            .await
            .unwrap();

        assert!(store.get(&keys::utxo(&outpoint)).await.unwrap().is_some());
        let secondary = store
            .scan_prefix(&keys::addr_utxo_prefix(b"alice"))
            .await
            .unwrap();
        assert_eq!(secondary.len(), 1);
    }
}
