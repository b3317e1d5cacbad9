//! Genesis configuration and bootstrap.
//!
//! A genesis configuration is a named, persistent record keyed by chain id.
//! Applying it produces the height-0 block (empty transaction list) plus one
//! synthesized coinbase-style transaction per allocation; the outputs of
//! those transactions seed the UTXO set.

use crate::block::types::{Block, GENESIS_PREV_HASH};
use crate::error::{NodeError, NodeResult, ValidationField};
use crate::storage::{keys, KvStore};
use crate::types::{Transaction, TxOutput};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct GenesisAllocation {
    pub address: String,
    pub amount: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct NetworkParams {
    pub initial_difficulty: u32,
    pub target_block_time_s: u64,
    pub adjustment_period: u64,
    pub max_difficulty_ratio: u32,
    pub max_block_size: usize,
    pub mining_reward: u64,
    pub halving_interval: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct GenesisMetadata {
    pub timestamp: i64,
    pub creator: String,
    pub network_type: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct GenesisConfig {
    pub chain_id: String,
    pub network_name: String,
    pub version: String,
    pub initial_allocations: Vec<GenesisAllocation>,
    pub total_supply: u64,
    pub network_params: NetworkParams,
    pub metadata: GenesisMetadata,
}

fn is_semver(version: &str) -> bool {
    let mut parts = version.splitn(3, '.');
    let (major, minor, patch) = match (parts.next(), parts.next(), parts.next()) {
        (Some(a), Some(b), Some(c)) => (a, b, c),
        _ => return false,
    };
    let patch_core = patch.split(['-', '+']).next().unwrap_or("");
    [major, minor, patch_core]
        .iter()
        .all(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()))
}

impl GenesisConfig {
    pub fn validate(&self) -> NodeResult<()> {
        if self.chain_id.len() < 3 {
            return Err(NodeError::validation(
                ValidationField::Other,
                "chain_id must be at least 3 characters",
            ));
        }
        if !is_semver(&self.version) {
            return Err(NodeError::validation(
                ValidationField::Version,
                format!("version '{}' is not semver", self.version),
            ));
        }

        let allocated: u64 = self.initial_allocations.iter().map(|a| a.amount).sum();
        if allocated > self.total_supply {
            return Err(NodeError::validation(
                ValidationField::Amount,
                format!(
                    "allocations {} exceed total supply {}",
                    allocated, self.total_supply
                ),
            ));
        }

        let mut seen = HashSet::new();
        for alloc in &self.initial_allocations {
            if !seen.insert(alloc.address.as_str()) {
                return Err(NodeError::validation(
                    ValidationField::Address,
                    format!("duplicate allocation address {}", alloc.address),
                ));
            }
        }

        let p = &self.network_params;
        if !(60..=1800).contains(&p.target_block_time_s) {
            return Err(NodeError::validation(
                ValidationField::Other,
                "target_block_time_s outside [60, 1800]",
            ));
        }
        if !(1024..=32 * 1024 * 1024).contains(&p.max_block_size) {
            return Err(NodeError::validation(
                ValidationField::Other,
                "max_block_size outside [1KiB, 32MiB]",
            ));
        }

        Ok(())
    }

    /// The height-0 block: empty transaction list, literal "0" parent.
    pub fn genesis_block(&self) -> Block {
        let mut block = Block {
            index: 0,
            timestamp: self.metadata.timestamp,
            prev_hash: GENESIS_PREV_HASH.to_string(),
            merkle_root: hex::encode([0u8; 32]),
            transactions: vec![],
            nonce: 0,
            difficulty: self.network_params.initial_difficulty,
            hash: String::new(),
        };
        // The genesis hash is recorded as-is; PoW starts at height 1
        block.hash = block.compute_hash();
        block
    }

    /// One coinbase-style transaction per allocation, deterministic order.
    pub fn allocation_transactions(&self) -> Vec<Transaction> {
        self.initial_allocations
            .iter()
            .map(|alloc| Transaction {
                inputs: vec![],
                outputs: vec![TxOutput {
                    value: alloc.amount,
                    script_pubkey: alloc.address.as_bytes().to_vec(),
                }],
                lock_time: 0,
                timestamp: self.metadata.timestamp,
                fee: 0,
            })
            .collect()
    }

    pub async fn save(&self, store: &dyn KvStore) -> NodeResult<()> {
        self.validate()?;
        let value = bincode::serialize(self)
            .map_err(|e| NodeError::Transient(format!("genesis serialization: {e}")))?;
        store
            .put(keys::genesis(&self.chain_id), value)
            .await
            .map_err(|e| NodeError::Transient(format!("genesis persist: {e}")))
    }

    pub async fn load(store: &dyn KvStore, chain_id: &str) -> NodeResult<Self> {
        let value = store
            .get(&keys::genesis(chain_id))
            .await
            .map_err(|e| NodeError::Transient(format!("genesis load: {e}")))?
            .ok_or_else(|| NodeError::not_found("Genesis config", chain_id))?;
        bincode::deserialize(&value)
            .map_err(|e| NodeError::Fatal(format!("corrupt genesis record: {e}")))
    }
}
