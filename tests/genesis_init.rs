//! Genesis bootstrap: a named chain configuration produces the height-0
//! block and credits every allocation.

use lorad::block::genesis::{GenesisAllocation, GenesisConfig, GenesisMetadata, NetworkParams};
use lorad::ledger::LedgerService;
use lorad::storage::MemoryStore;
use std::sync::Arc;

fn test_chain_genesis() -> GenesisConfig {
    GenesisConfig {
        chain_id: "test-chain".to_string(),
        network_name: "lorachain-test".to_string(),
        version: "1.0.0".to_string(),
        initial_allocations: vec![
            GenesisAllocation {
                address: "A".to_string(),
                amount: 5_000_000,
                description: None,
            },
            GenesisAllocation {
                address: "B".to_string(),
                amount: 3_000_000,
                description: None,
            },
        ],
        total_supply: 21_000_000,
        network_params: NetworkParams {
            initial_difficulty: 3,
            target_block_time_s: 180,
            adjustment_period: 10,
            max_difficulty_ratio: 4,
            max_block_size: 1024 * 1024,
            mining_reward: 50_000_000,
            halving_interval: 210_000,
        },
        metadata: GenesisMetadata {
            timestamp: 1_700_000_000,
            creator: "test".to_string(),
            network_type: "testnet".to_string(),
        },
    }
}

#[tokio::test]
async fn startup_state_matches_genesis_config() {
    let ledger = LedgerService::bootstrap(test_chain_genesis(), Arc::new(MemoryStore::new()))
        .await
        .unwrap();

    assert_eq!(ledger.block_count().await, 1);
    assert_eq!(ledger.balance(b"A"), 5_000_000);
    assert_eq!(ledger.balance(b"B"), 3_000_000);
    assert_eq!(ledger.current_difficulty().await, 3);
    assert_eq!(ledger.target_block_time().await, 180);
    assert_eq!(ledger.chain_id().await, "test-chain");
}

#[tokio::test]
async fn genesis_block_shape() {
    let ledger = LedgerService::bootstrap(test_chain_genesis(), Arc::new(MemoryStore::new()))
        .await
        .unwrap();

    let genesis = ledger.tip().await;
    assert_eq!(genesis.index, 0);
    assert_eq!(genesis.prev_hash, "0");
    assert!(genesis.transactions.is_empty());
}

#[tokio::test]
async fn genesis_record_is_reloadable() {
    let store = Arc::new(MemoryStore::new());
    let _ledger = LedgerService::bootstrap(test_chain_genesis(), store.clone())
        .await
        .unwrap();

    let reloaded = GenesisConfig::load(store.as_ref(), "test-chain")
        .await
        .unwrap();
    assert_eq!(reloaded.initial_allocations.len(), 2);
    assert_eq!(reloaded.network_params.initial_difficulty, 3);
}
