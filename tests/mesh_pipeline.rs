//! End-to-end mesh pipeline: a transaction leaves one node as signed
//! fragments, passes the duty-cycle gate, crosses the wire and lands in the
//! receiving node's mempool; floods deduplicate; exhausted deliveries
//! dead-letter and leave the retry queue.

use lorad::block::genesis::{GenesisAllocation, GenesisConfig, GenesisMetadata, NetworkParams};
use lorad::crypto::NodeIdentity;
use lorad::events::EventBus;
use lorad::ledger::LedgerService;
use lorad::mesh::duty_cycle::{DutyCycle, Region, DEFAULT_EFFECTIVE_BPS};
use lorad::mesh::flood::FloodMessage;
use lorad::mesh::fragment::FragmenterConfig;
use lorad::mesh::message::MeshMessage;
use lorad::mesh::priority_queue::QueueConfig;
use lorad::mesh::protocol::MeshProtocol;
use lorad::mesh::routing::RoutingConfig;
use lorad::mesh::wire::Envelope;
use lorad::network_type::NetworkType;
use lorad::peers::manager::{PeerManager, PeerManagerConfig};
use lorad::storage::MemoryStore;
use lorad::types::{
    now_ms, now_secs, NodeClass, PayloadKind, ReliabilityLevel, Transaction, TxInput, TxOutput,
};
use std::sync::Arc;

fn shared_genesis() -> GenesisConfig {
    GenesisConfig {
        chain_id: "pipeline".to_string(),
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
            // Fixed so both test nodes derive identical allocation txids
            timestamp: 1_700_000_000,
            creator: "test".to_string(),
            network_type: "testnet".to_string(),
        },
    }
}

async fn node() -> (MeshProtocol, Arc<NodeIdentity>, Arc<LedgerService>) {
    let identity = Arc::new(NodeIdentity::generate(NetworkType::Testnet));
    let ledger = Arc::new(
        LedgerService::bootstrap(shared_genesis(), Arc::new(MemoryStore::new()))
            .await
            .unwrap(),
    );
    let events = EventBus::new();
    let mesh = MeshProtocol::new(
        identity.clone(),
        NodeClass::Full,
        FragmenterConfig::default(),
        QueueConfig::default(),
        DutyCycle::new(Region::Eu868, DEFAULT_EFFECTIVE_BPS),
        RoutingConfig::default(),
        PeerManager::new(PeerManagerConfig::default(), events.clone()),
        ledger.clone(),
        events,
    );
    (mesh, identity, ledger)
}

fn miner_payment(ledger: &LedgerService) -> Transaction {
    let selection = ledger.utxo_set().select(b"miner", 10_000, 500).unwrap();
    let mut outputs = vec![TxOutput {
        value: 10_000,
        script_pubkey: b"alice".to_vec(),
    }];
    if selection.change > 0 {
        outputs.push(TxOutput {
            value: selection.change,
            script_pubkey: b"miner".to_vec(),
        });
    }
    Transaction {
        inputs: selection
            .utxos
            .iter()
            .map(|u| TxInput {
                previous_output: u.outpoint.clone(),
                script_sig: b"miner".to_vec(),
                sequence: 0xFFFFFFFF,
            })
            .collect(),
        outputs,
        lock_time: 0,
        timestamp: now_secs(),
        fee: selection.total - 10_000 - selection.change,
    }
}

#[tokio::test]
async fn transaction_crosses_the_mesh() {
    let (mut sender, sender_identity, sender_ledger) = node().await;
    let (mut receiver, _, receiver_ledger) = node().await;

    let tx = miner_payment(&sender_ledger);
    let payload = bincode::serialize(&tx).unwrap();

    sender
        .send_payload(
            PayloadKind::UtxoTransaction,
            &payload,
            ReliabilityLevel::Confirmed,
            None,
        )
        .unwrap();

    // Everything queued passes QoS and the duty-cycle gate in one pump for
    // a payload this small
    let frames = sender.pump_transmissions(now_ms());
    assert!(!frames.is_empty());

    for frame in frames {
        let envelope = Envelope::seal(
            &sender_identity,
            &MeshMessage::UtxoBlockFragment {
                fragment_bytes: frame.bytes,
            },
        )
        .unwrap();
        receiver.handle_envelope(&envelope).await.unwrap();
    }

    let pending = receiver_ledger.pending_transactions();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].txid(), tx.txid());
}

#[tokio::test]
async fn exhausted_delivery_dead_letters_and_leaves_retry_queue() {
    let (mut sender, _, _) = node().await;

    let message_id = sender
        .send_payload(
            PayloadKind::Discovery,
            &[1u8; 64],
            ReliabilityLevel::Confirmed,
            Some([7u8; 32]),
        )
        .unwrap();
    // Flush the initial transmission
    sender.pump_transmissions(now_ms());

    // Discovery policy allows 2 attempts; tick far past every deadline,
    // draining each retry's fragments through the pump
    let mut clock = now_ms();
    for _ in 0..6 {
        clock += 600_000;
        sender.tick(clock);
        sender.pump_transmissions(clock);
    }

    let delivery = sender.delivery();
    assert!(delivery.get(&message_id).is_none(), "no longer pending");
    assert!(delivery
        .dead_letters()
        .iter()
        .any(|d| d.message_id == message_id));

    // Terminal entries never re-enter the retry queue
    assert!(sender.pump_transmissions(clock + 1).is_empty());
}

#[tokio::test]
async fn flood_forwarded_once_and_path_loops_rejected() {
    let (mut node_a, _, _) = node().await;
    let origin = NodeIdentity::generate(NetworkType::Testnet);

    let flood = FloodMessage::originate(&origin, 1, 4, PayloadKind::UtxoTransaction, vec![1, 2]);
    assert!(node_a.handle_flood(flood.clone()).unwrap());
    // Second copy of the same (originator, sequence) is suppressed
    assert!(!node_a.handle_flood(flood.clone()).unwrap());

    // A flood whose path already contains this node is a loop
    let mut looped = FloodMessage::originate(&origin, 2, 4, PayloadKind::UtxoTransaction, vec![3]);
    looped.path.push(node_a.node_id());
    assert!(node_a.handle_flood(looped).is_err());
}

#[tokio::test]
async fn emergency_mode_exempts_critical_traffic_only() {
    let (mut sender, _, sender_ledger) = node().await;

    // Saturate the duty-cycle budget with low-priority noise
    let noise = vec![0u8; 180];
    for _ in 0..120 {
        sender
            .send_payload(
                PayloadKind::Other,
                &noise,
                ReliabilityLevel::BestEffort,
                None,
            )
            .unwrap();
    }
    let now = now_ms();
    let sent = sender.pump_transmissions(now).len();
    assert!(sent < 120, "duty cycle must throttle the burst, sent {sent}");

    // Emergency mode: a critical block payload bypasses the saturated gate
    sender.set_emergency_mode(true);
    let block = sender_ledger.tip().await;
    let payload = bincode::serialize(&block).unwrap();
    sender
        .send_payload(
            PayloadKind::Block,
            &payload,
            ReliabilityLevel::Guaranteed,
            None,
        )
        .unwrap();
    let frames = sender.pump_transmissions(now);
    assert!(!frames.is_empty(), "critical emergency traffic must pass");
}