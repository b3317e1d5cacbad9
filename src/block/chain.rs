//! Ordered block chain: validation, sequential application, difficulty
//! schedule.
//!
//! `apply` validates the header against the tip, checks the merkle root and
//! proof of work, then validates every transaction against the UTXO set
//! (tracking intra-block spends) before committing any state. A block either
//! commits in full or leaves the UTXO set untouched.

use crate::block::genesis::GenesisConfig;
use crate::block::types::{Block, GENESIS_PREV_HASH};
use crate::crypto::verify_signature;
use crate::merkle::satisfies_difficulty;
use crate::types::{now_secs, Transaction, UTXO};
use crate::utxo_set::UtxoSet;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Two hours of tolerated clock skew on block timestamps.
const MAX_FUTURE_DRIFT_SECS: i64 = 2 * 60 * 60;
/// Timestamps must beat the median of this many trailing blocks.
const MEDIAN_WINDOW: usize = 11;
/// Hard bounds on the difficulty schedule (zero nibbles of the hash).
const MIN_DIFFICULTY: u32 = 1;
const MAX_DIFFICULTY: u32 = 32;

#[derive(Error, Debug, PartialEq)]
pub enum ChainError {
    #[error("Block {index} does not link to the tip: {reason}")]
    BadLink { index: u64, reason: String },

    #[error("Merkle root mismatch in block {index}")]
    BadMerkle { index: u64 },

    #[error("Block {index} hash does not satisfy difficulty {difficulty}")]
    BadPoW { index: u64, difficulty: u32 },

    #[error("Bad timestamp in block {index}: {reason}")]
    BadTimestamp { index: u64, reason: String },

    #[error("Invalid transaction {tx_index} in block {index}: {reason}")]
    BadTx {
        index: u64,
        tx_index: usize,
        reason: String,
    },

    #[error("Chain invariant violated: {0}")]
    Fatal(String),
}

/// Check an unlock script against the locking script of the spent output.
///
/// Two witness forms are accepted: a 96-byte `pubkey || signature` witness
/// whose key must be committed to by the locking script and whose signature
/// must cover the transaction's signing hash, or a bare witness that must
/// reproduce the locking script byte for byte.
pub fn unlock_satisfies(locking: &[u8], script_sig: &[u8], sighash: &[u8; 32]) -> bool {
    if script_sig.len() == 32 + 64 {
        let mut pubkey = [0u8; 32];
        pubkey.copy_from_slice(&script_sig[..32]);
        let sig = &script_sig[32..];
        key_matches_script(&pubkey, locking) && verify_signature(&pubkey, sighash, sig).is_ok()
    } else {
        script_sig == locking
    }
}

fn key_matches_script(pubkey: &[u8; 32], locking: &[u8]) -> bool {
    if locking == pubkey {
        return true;
    }
    if locking == hex::encode(pubkey).as_bytes() {
        return true;
    }
    // Encoded address form: the locking script is the base58 address string
    if let Ok(s) = std::str::from_utf8(locking) {
        if let Ok(addr) = crate::address::Address::from_string(s) {
            let digest = Sha256::digest(pubkey);
            return addr.payload() == &digest[..20];
        }
    }
    false
}

/// The transaction bytes covered by input signatures: the transaction with
/// every unlock script cleared.
pub fn signing_hash(tx: &Transaction) -> [u8; 32] {
    let mut unsigned = tx.clone();
    for input in &mut unsigned.inputs {
        input.script_sig.clear();
    }
    unsigned.txid()
}

pub struct Chain {
    blocks: Vec<Block>,
    config: GenesisConfig,
    /// Difficulty expected of the next block.
    next_difficulty: u32,
}

impl Chain {
    /// Bootstrap from a validated genesis configuration: stores the height-0
    /// block and credits every allocation as a height-0 UTXO.
    pub fn bootstrap(config: GenesisConfig, utxos: &UtxoSet) -> Result<Self, ChainError> {
        config
            .validate()
            .map_err(|e| ChainError::Fatal(format!("genesis config rejected: {e}")))?;

        let genesis = config.genesis_block();
        for tx in config.allocation_transactions() {
            let txid = tx.txid();
            for (vout, output) in tx.outputs.iter().enumerate() {
                utxos
                    .add(UTXO {
                        outpoint: crate::types::OutPoint::new(txid, vout as u32),
                        value: output.value,
                        script_pubkey: output.script_pubkey.clone(),
                        block_height: 0,
                        spent: false,
                    })
                    .map_err(|e| ChainError::Fatal(format!("genesis allocation: {e}")))?;
            }
        }

        let next_difficulty = config.network_params.initial_difficulty;
        Ok(Self {
            blocks: vec![genesis],
            config,
            next_difficulty,
        })
    }

    pub fn height(&self) -> u64 {
        self.blocks.len() as u64 - 1
    }

    pub fn tip(&self) -> &Block {
        self.blocks.last().expect("chain always has genesis")
    }

    pub fn block_at(&self, index: u64) -> Option<&Block> {
        self.blocks.get(index as usize)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn current_difficulty(&self) -> u32 {
        self.next_difficulty
    }

    pub fn target_block_time(&self) -> u64 {
        self.config.network_params.target_block_time_s
    }

    pub fn config(&self) -> &GenesisConfig {
        &self.config
    }

    fn median_timestamp(&self) -> i64 {
        let mut window: Vec<i64> = self
            .blocks
            .iter()
            .rev()
            .take(MEDIAN_WINDOW)
            .map(|b| b.timestamp)
            .collect();
        window.sort_unstable();
        window[window.len() / 2]
    }

    fn validate_header(&self, block: &Block) -> Result<(), ChainError> {
        let tip = self.tip();
        if block.index != tip.index + 1 {
            return Err(ChainError::BadLink {
                index: block.index,
                reason: format!("expected index {}", tip.index + 1),
            });
        }
        if block.prev_hash != tip.hash {
            return Err(ChainError::BadLink {
                index: block.index,
                reason: "prev_hash does not match tip hash".to_string(),
            });
        }

        if block.merkle_root != block.merkle_root_of_transactions() {
            return Err(ChainError::BadMerkle { index: block.index });
        }

        if block.difficulty != self.next_difficulty {
            return Err(ChainError::BadPoW {
                index: block.index,
                difficulty: self.next_difficulty,
            });
        }
        if block.hash != block.compute_hash()
            || !satisfies_difficulty(&block.hash, block.difficulty)
        {
            return Err(ChainError::BadPoW {
                index: block.index,
                difficulty: block.difficulty,
            });
        }

        let median = self.median_timestamp();
        if block.timestamp <= median {
            return Err(ChainError::BadTimestamp {
                index: block.index,
                reason: format!("{} not above median {}", block.timestamp, median),
            });
        }
        if block.timestamp > now_secs() + MAX_FUTURE_DRIFT_SECS {
            return Err(ChainError::BadTimestamp {
                index: block.index,
                reason: "more than 2h in the future".to_string(),
            });
        }

        Ok(())
    }

    /// Stage every transaction against the UTXO set without mutating it.
    /// Returns the outpoints to spend in commit order.
    fn stage_transactions(
        &self,
        block: &Block,
        utxos: &UtxoSet,
    ) -> Result<Vec<crate::types::OutPoint>, ChainError> {
        let mut staged_spends = Vec::new();
        let mut spent_in_block = std::collections::HashSet::new();

        for (tx_index, tx) in block.transactions.iter().enumerate() {
            let bad = |reason: String| ChainError::BadTx {
                index: block.index,
                tx_index,
                reason,
            };

            if tx.is_coinbase() {
                continue;
            }

            let sighash = signing_hash(tx);
            let mut input_total = 0u64;

            for input in &tx.inputs {
                let op = &input.previous_output;
                if !spent_in_block.insert(op.clone()) {
                    return Err(bad(format!("outpoint {op} spent twice in block")));
                }

                let utxo = utxos
                    .get(&op.txid, op.vout)
                    .ok_or_else(|| bad(format!("missing input {op}")))?;
                if utxo.spent {
                    return Err(bad(format!("input {op} already spent")));
                }
                if !unlock_satisfies(&utxo.script_pubkey, &input.script_sig, &sighash) {
                    return Err(bad(format!("unlock script rejected for {op}")));
                }

                input_total += utxo.value;
                staged_spends.push(op.clone());
            }

            let output_total = tx.output_total();
            if input_total < output_total {
                return Err(bad(format!(
                    "outputs {output_total} exceed inputs {input_total}"
                )));
            }
            if input_total - output_total != tx.fee {
                return Err(bad(format!(
                    "declared fee {} != {}",
                    tx.fee,
                    input_total - output_total
                )));
            }
        }

        Ok(staged_spends)
    }

    /// Validate and append `block`, committing its UTXO updates. Rejection
    /// leaves both the chain and the UTXO set untouched.
    pub fn apply(&mut self, block: Block, utxos: &UtxoSet) -> Result<(), ChainError> {
        self.validate_header(&block)?;
        let staged_spends = self.stage_transactions(&block, utxos)?;

        // Commit. Staging proved every spend valid, so failures here are
        // invariant violations, not rejections.
        for op in &staged_spends {
            utxos
                .spend(&op.txid, op.vout)
                .map_err(|e| ChainError::Fatal(format!("staged spend {op} failed: {e}")))?;
        }
        for tx in &block.transactions {
            let txid = tx.txid();
            for (vout, output) in tx.outputs.iter().enumerate() {
                utxos
                    .add(UTXO {
                        outpoint: crate::types::OutPoint::new(txid, vout as u32),
                        value: output.value,
                        script_pubkey: output.script_pubkey.clone(),
                        block_height: block.index,
                        spent: false,
                    })
                    .map_err(|e| ChainError::Fatal(format!("output insert failed: {e}")))?;
            }
        }

        tracing::info!(
            height = block.index,
            txs = block.transactions.len(),
            hash = %&block.hash[..12.min(block.hash.len())],
            "⛓️  Block applied"
        );

        self.blocks.push(block);
        self.retarget_difficulty();
        Ok(())
    }

    /// Difficulty retarget at every `adjustment_period`-th height:
    /// `new = current · (target / actual)`, ratio-clamped against the
    /// previous difficulty and floored.
    fn retarget_difficulty(&mut self) {
        let period = self.config.network_params.adjustment_period;
        if period == 0 {
            return;
        }
        let height = self.height();
        if height == 0 || height % period != 0 {
            return;
        }

        let first = &self.blocks[(height - period) as usize];
        let last = self.tip();
        let actual = (last.timestamp - first.timestamp).max(1) as f64;
        let target = (self.config.network_params.target_block_time_s * period) as f64;

        let ratio_cap = self.config.network_params.max_difficulty_ratio.max(1) as f64;
        let ratio = (target / actual).clamp(1.0 / ratio_cap, ratio_cap);

        let current = self.next_difficulty as f64;
        let new = (current * ratio).floor() as u32;
        let new = new.clamp(MIN_DIFFICULTY, MAX_DIFFICULTY);

        if new != self.next_difficulty {
            tracing::info!(
                height,
                old = self.next_difficulty,
                new,
                "🎯 Difficulty retargeted"
            );
            self.next_difficulty = new;
        }
    }

    /// Genesis self-check, used when replaying a persisted chain.
    pub fn verify_genesis(&self) -> Result<(), ChainError> {
        let genesis = &self.blocks[0];
        if genesis.index != 0 || genesis.prev_hash != GENESIS_PREV_HASH {
            return Err(ChainError::Fatal("malformed genesis block".to_string()));
        }
        if !genesis.transactions.is_empty() {
            return Err(ChainError::Fatal(
                "genesis block must carry no transactions".to_string(),
            ));
        }
        Ok(())
    }
}
