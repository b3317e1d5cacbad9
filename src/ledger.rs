//! Ledger service: the single writer over chain and UTXO state.
//!
//! Block application is serialized behind one async lock; queries read the
//! UTXO set concurrently through its own snapshot-consistent view. The
//! service implements the operation surface the external REST collaborator
//! calls into: address UTXO listings, transaction build/submit, mempool
//! listing and fee estimation. Errors carry their kind from the point of
//! detection.

use crate::block::chain::{signing_hash, unlock_satisfies, Chain, ChainError};
use crate::block::genesis::GenesisConfig;
use crate::block::types::Block;
use crate::error::{NodeError, NodeResult, ValidationField};
use crate::storage::{keys, BatchOp, KvStore};
use crate::types::{
    Hash256, OutPoint, Transaction, TxInput, TxOutput, DUST_THRESHOLD, UTXO,
};
use crate::utxo_set::{UtxoError, UtxoSet};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Hard cap on address UTXO listings; larger requests are clamped.
pub const MAX_UTXO_PAGE: usize = 1_000;

/// Flat size model for fee estimation: per-input, per-output and base cost.
const INPUT_WEIGHT: u64 = 150;
const OUTPUT_WEIGHT: u64 = 34;
const TX_BASE_WEIGHT: u64 = 10;

#[derive(Clone, Debug)]
pub struct BuiltTransaction {
    pub transaction: Transaction,
    pub fee: u64,
    pub change: u64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FeeEstimate {
    pub slow: u64,
    pub medium: u64,
    pub fast: u64,
}

#[derive(Clone, Debug)]
pub struct UtxoPage {
    pub utxos: Vec<UTXO>,
    pub total_balance: u64,
    pub spendable_balance: u64,
}

pub struct LedgerService {
    chain: Mutex<Chain>,
    utxos: Arc<UtxoSet>,
    mempool: DashMap<Hash256, Transaction>,
    store: Arc<dyn KvStore>,
}

impl LedgerService {
    /// Bootstrap from a genesis configuration, persisting it and the
    /// height-0 state.
    pub async fn bootstrap(
        config: GenesisConfig,
        store: Arc<dyn KvStore>,
    ) -> NodeResult<Self> {
        config.save(store.as_ref()).await?;

        let utxos = Arc::new(UtxoSet::new());
        let chain = Chain::bootstrap(config, &utxos).map_err(map_chain_error)?;

        let genesis = chain.tip().clone();
        let mut batch = vec![BatchOp::Put(
            keys::block(0),
            bincode::serialize(&genesis)
                .map_err(|e| NodeError::Transient(format!("block serialization: {e}")))?,
        )];
        for utxo in utxos.snapshot() {
            batch.push(BatchOp::Put(
                keys::utxo(&utxo.outpoint),
                bincode::serialize(&utxo)
                    .map_err(|e| NodeError::Transient(format!("utxo serialization: {e}")))?,
            ));
            batch.push(BatchOp::Put(
                keys::addr_utxo(&utxo.script_pubkey, &utxo.outpoint),
                vec![],
            ));
        }
        store
            .apply_batch(batch)
            .await
            .map_err(|e| NodeError::Transient(format!("genesis persist: {e}")))?;

        tracing::info!(
            chain_id = %chain.config().chain_id,
            allocations = chain.config().initial_allocations.len(),
            "🌍 Ledger bootstrapped from genesis"
        );

        Ok(Self {
            chain: Mutex::new(chain),
            utxos,
            mempool: DashMap::new(),
            store,
        })
    }

    pub fn utxo_set(&self) -> Arc<UtxoSet> {
        self.utxos.clone()
    }

    pub async fn height(&self) -> u64 {
        self.chain.lock().await.height()
    }

    pub async fn tip(&self) -> Block {
        self.chain.lock().await.tip().clone()
    }

    pub async fn current_difficulty(&self) -> u32 {
        self.chain.lock().await.current_difficulty()
    }

    pub async fn target_block_time(&self) -> u64 {
        self.chain.lock().await.target_block_time()
    }

    pub async fn chain_id(&self) -> String {
        self.chain.lock().await.config().chain_id.clone()
    }

    pub async fn block_at(&self, index: u64) -> Option<Block> {
        self.chain.lock().await.block_at(index).cloned()
    }

    pub async fn block_count(&self) -> usize {
        self.chain.lock().await.len()
    }

    pub fn balance(&self, script: &[u8]) -> u64 {
        self.utxos.balance(script)
    }

    /// Apply a validated block: chain rules, UTXO commit, persistence, and
    /// mempool cleanup, all behind the single application lock.
    pub async fn apply_block(&self, block: Block) -> NodeResult<()> {
        let mut chain = self.chain.lock().await;
        chain
            .apply(block.clone(), &self.utxos)
            .map_err(map_chain_error)?;

        // The block displaced any mempool transaction it confirmed or
        // conflicted with
        let mut spent = HashSet::new();
        for tx in &block.transactions {
            self.mempool.remove(&tx.txid());
            for input in &tx.inputs {
                spent.insert(input.previous_output.clone());
            }
        }
        self.mempool.retain(|_, tx| {
            tx.inputs
                .iter()
                .all(|input| !spent.contains(&input.previous_output))
        });

        let mut batch = vec![BatchOp::Put(
            keys::block(block.index),
            bincode::serialize(&block)
                .map_err(|e| NodeError::Transient(format!("block serialization: {e}")))?,
        )];
        for tx in &block.transactions {
            for input in &tx.inputs {
                let op = &input.previous_output;
                // Spent flag flips rather than deleting, matching pruning
                if let Some(utxo) = self.utxos.get(&op.txid, op.vout) {
                    batch.push(BatchOp::Put(
                        keys::utxo(op),
                        bincode::serialize(&utxo).map_err(|e| {
                            NodeError::Transient(format!("utxo serialization: {e}"))
                        })?,
                    ));
                    batch.push(BatchOp::Delete(keys::addr_utxo(&utxo.script_pubkey, op)));
                }
            }
            let txid = tx.txid();
            for (vout, output) in tx.outputs.iter().enumerate() {
                let outpoint = OutPoint::new(txid, vout as u32);
                if let Some(utxo) = self.utxos.get(&txid, vout as u32) {
                    batch.push(BatchOp::Put(
                        keys::utxo(&outpoint),
                        bincode::serialize(&utxo).map_err(|e| {
                            NodeError::Transient(format!("utxo serialization: {e}"))
                        })?,
                    ));
                    batch.push(BatchOp::Put(
                        keys::addr_utxo(&output.script_pubkey, &outpoint),
                        vec![],
                    ));
                }
            }
        }
        self.store
            .apply_batch(batch)
            .await
            .map_err(|e| NodeError::Transient(format!("block persist: {e}")))?;
        Ok(())
    }

    /// Validate a signed transaction and admit it to the mempool.
    pub fn submit_transaction(&self, tx: Transaction) -> NodeResult<Hash256> {
        if tx.inputs.is_empty() {
            return Err(NodeError::validation(
                ValidationField::Other,
                "transaction spends no inputs",
            ));
        }
        for output in &tx.outputs {
            if output.value <= DUST_THRESHOLD {
                return Err(NodeError::validation(
                    ValidationField::Amount,
                    format!("dust output of {} base units", output.value),
                ));
            }
        }

        let sighash = signing_hash(&tx);
        let mut input_total = 0u64;
        let mut seen = HashSet::new();

        // Outpoints already claimed by the mempool
        let pending_spends: HashSet<OutPoint> = self
            .mempool
            .iter()
            .flat_map(|entry| {
                entry
                    .value()
                    .inputs
                    .iter()
                    .map(|i| i.previous_output.clone())
                    .collect::<Vec<_>>()
            })
            .collect();

        for input in &tx.inputs {
            let op = &input.previous_output;
            if !seen.insert(op.clone()) {
                return Err(NodeError::DoubleSpend {
                    outpoint: op.clone(),
                });
            }
            if pending_spends.contains(op) {
                return Err(NodeError::DoubleSpend {
                    outpoint: op.clone(),
                });
            }

            let utxo = self
                .utxos
                .get(&op.txid, op.vout)
                .ok_or_else(|| NodeError::not_found("UTXO", op.to_string()))?;
            if utxo.spent {
                return Err(NodeError::DoubleSpend {
                    outpoint: op.clone(),
                });
            }
            if !unlock_satisfies(&utxo.script_pubkey, &input.script_sig, &sighash) {
                return Err(NodeError::bad_signature(format!(
                    "unlock script rejected for {op}"
                )));
            }
            input_total += utxo.value;
        }

        let output_total = tx.output_total();
        if input_total < output_total {
            return Err(NodeError::InsufficientFunds {
                required: output_total,
                available: input_total,
            });
        }
        if input_total - output_total != tx.fee {
            return Err(NodeError::validation(
                ValidationField::Amount,
                format!("declared fee {} != {}", tx.fee, input_total - output_total),
            ));
        }

        let txid = tx.txid();
        self.mempool.insert(txid, tx);
        tracing::debug!(txid = %hex::encode(txid), "📥 Transaction admitted to mempool");
        Ok(txid)
    }

    pub fn pending_transactions(&self) -> Vec<Transaction> {
        self.mempool.iter().map(|e| e.value().clone()).collect()
    }

    pub async fn get_transaction(&self, txid: &Hash256) -> Option<Transaction> {
        if let Some(tx) = self.mempool.get(txid) {
            return Some(tx.clone());
        }
        let chain = self.chain.lock().await;
        for index in 0..chain.len() as u64 {
            if let Some(block) = chain.block_at(index) {
                for tx in &block.transactions {
                    if &tx.txid() == txid {
                        return Some(tx.clone());
                    }
                }
            }
        }
        None
    }

    /// Build an unsigned transaction: largest-first inputs, target output,
    /// change back to the sender, fee from the size model. The fee estimate
    /// is re-run when selection grows the input count.
    pub fn build_transaction(
        &self,
        from: &str,
        to: &str,
        amount: u64,
        fee_rate: u64,
    ) -> NodeResult<BuiltTransaction> {
        if amount == 0 {
            return Err(NodeError::validation(
                ValidationField::Amount,
                "amount must be positive",
            ));
        }
        if amount <= DUST_THRESHOLD {
            return Err(NodeError::validation(
                ValidationField::Amount,
                format!("amount {amount} is dust"),
            ));
        }
        if from.is_empty() || to.is_empty() {
            return Err(NodeError::validation(
                ValidationField::Address,
                "addresses must be non-empty",
            ));
        }

        let script = from.as_bytes();
        let mut input_guess = 1usize;
        let selection = loop {
            let fee = fee_for(input_guess, 2, fee_rate);
            let selection = self
                .utxos
                .select(script, amount, fee)
                .map_err(|e| map_utxo_error(e, script))?;
            if selection.utxos.len() <= input_guess {
                break selection;
            }
            input_guess = selection.utxos.len();
        };

        let fee = fee_for(selection.utxos.len(), 2, fee_rate);
        let mut outputs = vec![TxOutput {
            value: amount,
            script_pubkey: to.as_bytes().to_vec(),
        }];
        if selection.change > 0 {
            outputs.push(TxOutput {
                value: selection.change,
                script_pubkey: script.to_vec(),
            });
        }
        // Sub-dust change was absorbed by selection; the realized fee is
        // whatever the inputs leave over
        let realized_fee = selection.total - amount - selection.change;

        let transaction = Transaction {
            inputs: selection
                .utxos
                .iter()
                .map(|u| TxInput {
                    previous_output: u.outpoint.clone(),
                    script_sig: vec![],
                    sequence: 0xFFFFFFFF,
                })
                .collect(),
            outputs,
            lock_time: 0,
            timestamp: crate::types::now_secs(),
            fee: realized_fee,
        };

        debug_assert!(realized_fee >= fee || selection.change == 0);

        Ok(BuiltTransaction {
            transaction,
            fee: realized_fee,
            change: selection.change,
        })
    }

    /// Slow/medium/fast fee rates scaled by mempool pressure.
    pub fn fee_estimate(&self, inputs: usize, outputs: usize) -> FeeEstimate {
        let size = TX_BASE_WEIGHT + INPUT_WEIGHT * inputs as u64 + OUTPUT_WEIGHT * outputs as u64;
        let congestion = 1 + (self.mempool.len() as u64 / 100);
        FeeEstimate {
            slow: size * congestion,
            medium: size * congestion * 2,
            fast: size * congestion * 4,
        }
    }

    /// Address UTXO listing, value descending, with pagination clamped to
    /// [`MAX_UTXO_PAGE`].
    pub fn address_utxos(
        &self,
        address: &str,
        min_value: u64,
        include_spent: bool,
        limit: usize,
        offset: usize,
    ) -> UtxoPage {
        let script = address.as_bytes();
        let spendable: Vec<UTXO> = self.utxos.utxos_of(script);
        let spendable_balance: u64 = spendable.iter().map(|u| u.value).sum();

        let mut listed = spendable;
        if include_spent {
            // Spent entries survive in the primary index until pruned
            listed = self.utxos.snapshot_with_spent(script);
        }
        listed.retain(|u| u.value >= min_value);
        listed.sort_by(|a, b| b.value.cmp(&a.value));

        let total_balance: u64 = listed.iter().filter(|u| !u.spent).map(|u| u.value).sum();
        let limit = limit.min(MAX_UTXO_PAGE);
        let utxos = listed.into_iter().skip(offset).take(limit).collect();

        UtxoPage {
            utxos,
            total_balance,
            spendable_balance,
        }
    }

    pub fn utxo_detail(&self, txid: &Hash256, vout: u32) -> NodeResult<UTXO> {
        self.utxos.get(txid, vout).ok_or_else(|| {
            NodeError::not_found("UTXO", OutPoint::new(*txid, vout).to_string())
        })
    }
}

fn fee_for(inputs: usize, outputs: usize, fee_rate: u64) -> u64 {
    (TX_BASE_WEIGHT + INPUT_WEIGHT * inputs as u64 + OUTPUT_WEIGHT * outputs as u64) * fee_rate
}

fn map_chain_error(err: ChainError) -> NodeError {
    match err {
        ChainError::Fatal(reason) => NodeError::Fatal(reason),
        other => NodeError::validation(ValidationField::Other, other.to_string()),
    }
}

fn map_utxo_error(err: UtxoError, script: &[u8]) -> NodeError {
    match err {
        UtxoError::InsufficientFunds {
            required,
            available,
        } => NodeError::InsufficientFunds {
            required,
            available,
        },
        UtxoError::NotFound => {
            NodeError::not_found("UTXO", String::from_utf8_lossy(script).to_string())
        }
        UtxoError::AlreadySpent => NodeError::DoubleSpend {
            outpoint: OutPoint::new([0u8; 32], 0),
        },
        UtxoError::Duplicate => NodeError::Transient("duplicate UTXO".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::genesis::{
        GenesisAllocation, GenesisConfig, GenesisMetadata, NetworkParams,
    };
    use crate::storage::MemoryStore;
    use crate::types::now_secs;

    fn genesis(allocations: Vec<(&str, u64)>) -> GenesisConfig {
        GenesisConfig {
            chain_id: "test-chain".to_string(),
            network_name: "lorachain-test".to_string(),
            version: "1.0.0".to_string(),
            initial_allocations: allocations
                .into_iter()
                .map(|(address, amount)| GenesisAllocation {
                    address: address.to_string(),
                    amount,
                    description: None,
                })
                .collect(),
            total_supply: 21_000_000_000,
            network_params: NetworkParams {
                initial_difficulty: 1,
                target_block_time_s: 180,
                adjustment_period: 10,
                max_difficulty_ratio: 4,
                max_block_size: 1024 * 1024,
                mining_reward: 50_000_000,
                halving_interval: 210_000,
            },
            metadata: GenesisMetadata {
                timestamp: now_secs() - 3600,
                creator: "test".to_string(),
                network_type: "testnet".to_string(),
            },
        }
    }

    async fn miner_ledger() -> LedgerService {
        LedgerService::bootstrap(
            genesis(vec![("miner", 5_000_000_000)]),
            Arc::new(MemoryStore::new()),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn build_selects_largest_first_with_change() {
        let ledger = miner_ledger().await;

        let built = ledger
            .build_transaction("miner", "r", 1_000_000, 20)
            .unwrap();
        assert!(built.fee > 0);
        assert_eq!(built.transaction.outputs[0].value, 1_000_000);
        assert_eq!(built.transaction.outputs[0].script_pubkey, b"r".to_vec());
        // Change flows back to the sender
        assert_eq!(
            built.transaction.outputs[1].script_pubkey,
            b"miner".to_vec()
        );
        assert_eq!(
            built.transaction.inputs.len()
                + built.transaction.outputs.len(),
            3
        );
    }

    #[tokio::test]
    async fn build_from_empty_address_is_insufficient() {
        let ledger = miner_ledger().await;
        let err = ledger
            .build_transaction("alice", "r", 1_000_000, 20)
            .unwrap_err();
        match err {
            NodeError::InsufficientFunds {
                required,
                available,
            } => {
                assert!(required >= 1_000_000);
                assert_eq!(available, 0);
            }
            other => panic!("expected InsufficientFunds, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn pagination_clamped_to_limit() {
        let ledger = miner_ledger().await;
        let page = ledger.address_utxos("miner", 0, false, 5_000, 0);
        assert_eq!(page.utxos.len(), 1);
        assert_eq!(page.spendable_balance, 5_000_000_000);

        // The clamp itself: even absurd limits collapse to MAX_UTXO_PAGE
        assert_eq!(MAX_UTXO_PAGE, 1_000);
    }

    #[tokio::test]
    async fn fee_estimate_scales_with_mempool() {
        let ledger = miner_ledger().await;
        let quiet = ledger.fee_estimate(1, 2);
        assert_eq!(quiet.medium, quiet.slow * 2);
        assert_eq!(quiet.fast, quiet.slow * 4);
    }

    #[tokio::test]
    async fn submit_rejects_dust_and_unknown_inputs() {
        let ledger = miner_ledger().await;

        let dust = Transaction {
            inputs: vec![TxInput {
                previous_output: OutPoint::new([1u8; 32], 0),
                script_sig: b"miner".to_vec(),
                sequence: 0xFFFFFFFF,
            }],
            outputs: vec![TxOutput {
                value: DUST_THRESHOLD,
                script_pubkey: b"r".to_vec(),
            }],
            lock_time: 0,
            timestamp: now_secs(),
            fee: 0,
        };
        assert!(matches!(
            ledger.submit_transaction(dust),
            Err(NodeError::Validation { .. })
        ));

        let phantom = Transaction {
            inputs: vec![TxInput {
                previous_output: OutPoint::new([9u8; 32], 3),
                script_sig: b"miner".to_vec(),
                sequence: 0xFFFFFFFF,
            }],
            outputs: vec![TxOutput {
                value: 10_000,
                script_pubkey: b"r".to_vec(),
            }],
            lock_time: 0,
            timestamp: now_secs(),
            fee: 0,
        };
        assert!(matches!(
            ledger.submit_transaction(phantom),
            Err(NodeError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn mempool_double_spend_detected() {
        let ledger = miner_ledger().await;

        let built = ledger
            .build_transaction("miner", "r", 1_000_000, 1)
            .unwrap();
        let mut first = built.transaction.clone();
        for input in &mut first.inputs {
            input.script_sig = b"miner".to_vec();
        }
        ledger.submit_transaction(first).unwrap();

        // A second spend of the same outpoint is refused while pending
        let mut second = built.transaction.clone();
        for input in &mut second.inputs {
            input.script_sig = b"miner".to_vec();
        }
        second.outputs[0].script_pubkey = b"other".to_vec();
        assert!(matches!(
            ledger.submit_transaction(second),
            Err(NodeError::DoubleSpend { .. })
        ));
    }
}
