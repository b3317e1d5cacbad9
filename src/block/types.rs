//! Block types for the Lorachain ledger.

use crate::merkle;
use crate::types::{now_secs, Transaction};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Hex hash of the predecessor of the genesis block.
pub const GENESIS_PREV_HASH: &str = "0";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Block {
    pub index: u64,
    pub timestamp: i64,
    pub prev_hash: String,
    pub merkle_root: String,
    pub transactions: Vec<Transaction>,
    pub nonce: u64,
    pub difficulty: u32,
    pub hash: String,
}

impl Block {
    /// Hash over the consensus-critical header fields, hex encoded.
    pub fn compute_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.index.to_le_bytes());
        hasher.update(self.timestamp.to_le_bytes());
        hasher.update(self.prev_hash.as_bytes());
        hasher.update(self.merkle_root.as_bytes());
        hasher.update(self.nonce.to_le_bytes());
        hasher.update(self.difficulty.to_le_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn merkle_root_of_transactions(&self) -> String {
        hex::encode(merkle::merkle_root(&self.transactions))
    }

    /// Solve the nonce until the hash carries `difficulty` zero nibbles.
    /// Only used by tests and the genesis builder; real mining is a peer's
    /// concern.
    pub fn seal(&mut self) {
        loop {
            let hash = self.compute_hash();
            if merkle::satisfies_difficulty(&hash, self.difficulty) {
                self.hash = hash;
                return;
            }
            self.nonce = self.nonce.wrapping_add(1);
        }
    }

    /// Compact header for SPV sync. The genesis block is anchored by the
    /// chain configuration rather than proof of work, so it advertises
    /// difficulty zero.
    pub fn spv_header(&self) -> merkle::SpvHeader {
        merkle::SpvHeader {
            index: self.index as i64,
            hash: self.hash.clone(),
            prev_hash: self.prev_hash.clone(),
            merkle_root: self.merkle_root.clone(),
            timestamp: self.timestamp,
            nonce: self.nonce as i64,
            difficulty: if self.index == 0 { 0 } else { self.difficulty },
            tx_count: self.transactions.len() as i64,
        }
    }

    pub fn builder(index: u64, prev_hash: &str, difficulty: u32) -> BlockBuilder {
        BlockBuilder {
            index,
            prev_hash: prev_hash.to_string(),
            difficulty,
            timestamp: now_secs(),
            transactions: Vec::new(),
        }
    }
}

/// Assembles a block with a consistent merkle root, then seals it.
pub struct BlockBuilder {
    index: u64,
    prev_hash: String,
    difficulty: u32,
    timestamp: i64,
    transactions: Vec<Transaction>,
}

impl BlockBuilder {
    pub fn timestamp(mut self, ts: i64) -> Self {
        self.timestamp = ts;
        self
    }

    pub fn transactions(mut self, txs: Vec<Transaction>) -> Self {
        self.transactions = txs;
        self
    }

    pub fn build(self) -> Block {
        let mut block = Block {
            index: self.index,
            timestamp: self.timestamp,
            prev_hash: self.prev_hash,
            merkle_root: String::new(),
            transactions: self.transactions,
            nonce: 0,
            difficulty: self.difficulty,
            hash: String::new(),
        };
        block.merkle_root = block.merkle_root_of_transactions();
        block.seal();
        block
    }
}
