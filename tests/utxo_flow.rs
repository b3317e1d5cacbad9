//! UTXO listing, spending and transaction building across a small chain:
//! miner is funded at genesis, pays alice, alice pays bob, and the address
//! listings reflect exactly the unspent tail.

use lorad::block::genesis::{GenesisAllocation, GenesisConfig, GenesisMetadata, NetworkParams};
use lorad::block::types::Block;
use lorad::error::{ErrorCode, NodeError};
use lorad::ledger::LedgerService;
use lorad::storage::MemoryStore;
use lorad::types::{now_secs, Transaction, TxInput, TxOutput};
use std::sync::Arc;

fn miner_genesis() -> GenesisConfig {
    GenesisConfig {
        chain_id: "utxo-flow".to_string(),
        network_name: "lorachain-test".to_string(),
        version: "1.0.0".to_string(),
        initial_allocations: vec![GenesisAllocation {
            address: "miner".to_string(),
            amount: 5_000_000_000,
            description: None,
        }],
        total_supply: 21_000_000_000,
        network_params: NetworkParams {
            initial_difficulty: 1,
            target_block_time_s: 180,
            adjustment_period: 100,
            max_difficulty_ratio: 4,
            max_block_size: 1024 * 1024,
            mining_reward: 50_000_000,
            halving_interval: 210_000,
        },
        metadata: GenesisMetadata {
            timestamp: now_secs() - 7_200,
            creator: "test".to_string(),
            network_type: "testnet".to_string(),
        },
    }
}

/// Spend `amount` from `from` to `to`, signing with the bare script witness.
fn transfer(
    ledger: &LedgerService,
    from: &str,
    to: &str,
    amount: u64,
    fee: u64,
) -> Transaction {
    let selection = ledger.utxo_set().select(from.as_bytes(), amount, fee).unwrap();
    let mut outputs = vec![TxOutput {
        value: amount,
        script_pubkey: to.as_bytes().to_vec(),
    }];
    if selection.change > 0 {
        outputs.push(TxOutput {
            value: selection.change,
            script_pubkey: from.as_bytes().to_vec(),
        });
    }
    Transaction {
        inputs: selection
            .utxos
            .iter()
            .map(|u| TxInput {
                previous_output: u.outpoint.clone(),
                script_sig: from.as_bytes().to_vec(),
                sequence: 0xFFFFFFFF,
            })
            .collect(),
        outputs,
        lock_time: 0,
        timestamp: now_secs(),
        fee: selection.total - amount - selection.change,
    }
}

async fn extend_chain(ledger: &LedgerService, txs: Vec<Transaction>) {
    let tip = ledger.tip().await;
    let block = Block::builder(tip.index + 1, &tip.hash, ledger.current_difficulty().await)
        .timestamp(tip.timestamp.max(now_secs() - 3600) + 60)
        .transactions(txs)
        .build();
    ledger.apply_block(block).await.unwrap();
}

async fn three_block_ledger() -> LedgerService {
    let ledger = LedgerService::bootstrap(miner_genesis(), Arc::new(MemoryStore::new()))
        .await
        .unwrap();

    // tx-1: miner → alice 1_000_000, fee 1_000_000
    let tx1 = transfer(&ledger, "miner", "alice", 1_000_000, 1_000_000);
    extend_chain(&ledger, vec![tx1]).await;

    // tx-2: alice → bob 500_000, fee 1_000, change 499_000
    let tx2 = transfer(&ledger, "alice", "bob", 500_000, 1_000);
    extend_chain(&ledger, vec![tx2]).await;

    ledger
}

#[tokio::test]
async fn alice_listing_shows_only_change_output() {
    let ledger = three_block_ledger().await;

    let page = ledger.address_utxos("alice", 0, false, 100, 0);
    assert_eq!(page.utxos.len(), 1);
    assert_eq!(page.utxos[0].value, 499_000);
    assert_eq!(page.total_balance, 499_000);
    assert_eq!(page.spendable_balance, 499_000);

    assert_eq!(ledger.balance(b"bob"), 500_000);
    assert_eq!(
        ledger.balance(b"miner"),
        5_000_000_000 - 1_000_000 - 1_000_000
    );
}

#[tokio::test]
async fn spent_outputs_appear_only_on_request() {
    let ledger = three_block_ledger().await;

    let visible = ledger.address_utxos("alice", 0, false, 100, 0);
    assert_eq!(visible.utxos.len(), 1);

    // With spent entries included, alice's consumed 1_000_000 output shows
    let with_spent = ledger.address_utxos("alice", 0, true, 100, 0);
    assert_eq!(with_spent.utxos.len(), 2);
    assert!(with_spent.utxos.iter().any(|u| u.spent));
    // Spendable balance is unchanged by the listing mode
    assert_eq!(with_spent.spendable_balance, 499_000);
}

#[tokio::test]
async fn build_transaction_for_miner_selects_largest_first() {
    let ledger = three_block_ledger().await;

    let built = ledger
        .build_transaction("miner", "r", 1_000_000, 20)
        .unwrap();
    assert!(built.fee > 0);
    assert_eq!(built.transaction.outputs[0].value, 1_000_000);
    assert_eq!(built.transaction.outputs[0].script_pubkey, b"r".to_vec());
    assert_eq!(
        built.transaction.outputs.last().unwrap().script_pubkey,
        b"miner".to_vec()
    );

    // Inputs arrive sorted by value descending
    let values: Vec<u64> = built
        .transaction
        .inputs
        .iter()
        .map(|i| {
            ledger
                .utxo_detail(&i.previous_output.txid, i.previous_output.vout)
                .unwrap()
                .value
        })
        .collect();
    let mut sorted = values.clone();
    sorted.sort_unstable_by(|a, b| b.cmp(a));
    assert_eq!(values, sorted);
}

#[tokio::test]
async fn build_transaction_insufficient_funds_carries_amounts() {
    let ledger = three_block_ledger().await;

    let err = ledger
        .build_transaction("alice", "r", 1_000_000, 20)
        .unwrap_err();
    match &err {
        NodeError::InsufficientFunds {
            required,
            available,
        } => {
            assert!(*required > 1_000_000);
            assert_eq!(*available, 499_000);
        }
        other => panic!("expected InsufficientFunds, got {other:?}"),
    }
    assert_eq!(ErrorCode::from(&err), ErrorCode::InsufficientFunds);
}

#[tokio::test]
async fn double_spend_of_confirmed_output_rejected() {
    let ledger = three_block_ledger().await;

    // Rebuild a spend of alice's already-consumed genesis-era output
    let spent = ledger
        .address_utxos("alice", 0, true, 100, 0)
        .utxos
        .into_iter()
        .find(|u| u.spent)
        .unwrap();

    let replay = Transaction {
        inputs: vec![TxInput {
            previous_output: spent.outpoint.clone(),
            script_sig: b"alice".to_vec(),
            sequence: 0xFFFFFFFF,
        }],
        outputs: vec![TxOutput {
            value: spent.value - 1_000,
            script_pubkey: b"mallory".to_vec(),
        }],
        lock_time: 0,
        timestamp: now_secs(),
        fee: 1_000,
    };

    let err = ledger.submit_transaction(replay).unwrap_err();
    assert!(matches!(err, NodeError::DoubleSpend { .. }));
    assert_eq!(ErrorCode::from(&err), ErrorCode::DoubleSpend);
}

#[tokio::test]
async fn applying_same_block_twice_fails_and_preserves_state() {
    let ledger = LedgerService::bootstrap(miner_genesis(), Arc::new(MemoryStore::new()))
        .await
        .unwrap();

    let tip = ledger.tip().await;
    let block = Block::builder(1, &tip.hash, ledger.current_difficulty().await)
        .timestamp(tip.timestamp + 60)
        .build();

    ledger.apply_block(block.clone()).await.unwrap();
    let balance = ledger.balance(b"miner");

    assert!(ledger.apply_block(block).await.is_err());
    assert_eq!(ledger.balance(b"miner"), balance);
    assert_eq!(ledger.height().await, 1);
}
