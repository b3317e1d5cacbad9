//! Core data types for the Lorachain node.

#![allow(dead_code)]

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub type Hash256 = [u8; 32];
/// Node identity: the raw ed25519 verifying key bytes.
pub type NodeId = [u8; 32];
/// 16-byte logical message identifier shared by all fragments of a payload.
pub type MessageId = [u8; 16];

// Constants
pub const DUST_THRESHOLD: u64 = 547; // base units; outputs at or below are rejected
pub const PROTOCOL_VERSION: u8 = 2;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutPoint {
    pub txid: Hash256,
    pub vout: u32,
}

impl OutPoint {
    pub fn new(txid: Hash256, vout: u32) -> Self {
        Self { txid, vout }
    }
}

impl std::fmt::Display for OutPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", hex::encode(self.txid), self.vout)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[allow(clippy::upper_case_acronyms)]
pub struct UTXO {
    pub outpoint: OutPoint,
    pub value: u64,
    pub script_pubkey: Vec<u8>,
    pub block_height: u64,
    pub spent: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TxInput {
    pub previous_output: OutPoint,
    pub script_sig: Vec<u8>,
    pub sequence: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TxOutput {
    pub value: u64,
    pub script_pubkey: Vec<u8>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub lock_time: u32,
    pub timestamp: i64,
    pub fee: u64,
}

impl Transaction {
    /// Canonical transaction id: SHA-256 over the JSON serialization.
    /// JSON keeps the hash stable across bincode layout changes.
    pub fn txid(&self) -> Hash256 {
        let json = serde_json::to_string(self).expect("JSON serialization should succeed");
        Sha256::digest(json.as_bytes()).into()
    }

    pub fn output_total(&self) -> u64 {
        self.outputs.iter().map(|o| o.value).sum()
    }

    /// A coinbase-style transaction spends nothing.
    pub fn is_coinbase(&self) -> bool {
        self.inputs.is_empty()
    }
}

/// Queueing priority for mesh payloads. Lower rank = dequeued first.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MessagePriority {
    Critical = 0,
    High = 1,
    Normal = 2,
    Low = 3,
}

impl MessagePriority {
    pub const ALL: [MessagePriority; 4] = [
        MessagePriority::Critical,
        MessagePriority::High,
        MessagePriority::Normal,
        MessagePriority::Low,
    ];

    pub fn rank(self) -> usize {
        self as usize
    }
}

/// Payload classes carried over the mesh. Determines the per-fragment payload
/// cap, the queue priority at session creation and the flood forwarding order.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    UtxoTransaction,
    Block,
    MerkleProof,
    SyncStatus,
    Discovery,
    Other,
}

impl PayloadKind {
    /// Maximum payload bytes per fragment for this class.
    pub fn fragment_payload_cap(self) -> usize {
        match self {
            PayloadKind::UtxoTransaction => 180,
            PayloadKind::Block => 197,
            PayloadKind::MerkleProof => 150,
            _ => 180,
        }
    }

    /// Queue priority assigned at session creation. `emergency` promotes
    /// transactions to Critical.
    pub fn priority(self, emergency: bool) -> MessagePriority {
        match self {
            PayloadKind::Block => MessagePriority::Critical,
            PayloadKind::UtxoTransaction => {
                if emergency {
                    MessagePriority::Critical
                } else {
                    MessagePriority::High
                }
            }
            PayloadKind::MerkleProof | PayloadKind::SyncStatus => MessagePriority::High,
            PayloadKind::Discovery => MessagePriority::Normal,
            PayloadKind::Other => MessagePriority::Low,
        }
    }

    /// Flood forwarding order (higher forwards first).
    pub fn flood_priority(self) -> u8 {
        match self {
            PayloadKind::UtxoTransaction => 10,
            PayloadKind::Block => 8,
            PayloadKind::MerkleProof => 6,
            PayloadKind::Discovery => 4,
            _ => 2,
        }
    }
}

/// Delivery guarantee requested by the sender.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum ReliabilityLevel {
    BestEffort,
    Confirmed,
    Guaranteed,
}

/// Node capability class advertised in beacons and routes.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum NodeClass {
    Light,
    Full,
    Mining,
}

impl NodeClass {
    /// Base contribution to the route priority score.
    pub fn route_score_base(self) -> f64 {
        match self {
            NodeClass::Mining => 100.0,
            NodeClass::Full => 80.0,
            NodeClass::Light => 40.0,
        }
    }
}

pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

pub fn now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tx() -> Transaction {
        Transaction {
            inputs: vec![TxInput {
                previous_output: OutPoint::new([1u8; 32], 0),
                script_sig: vec![0xAA],
                sequence: 0xFFFFFFFF,
            }],
            outputs: vec![TxOutput {
                value: 1_000,
                script_pubkey: b"alice".to_vec(),
            }],
            lock_time: 0,
            timestamp: 1_700_000_000,
            fee: 10,
        }
    }

    #[test]
    fn txid_is_deterministic() {
        let tx = sample_tx();
        assert_eq!(tx.txid(), tx.txid());

        let mut other = sample_tx();
        other.outputs[0].value += 1;
        assert_ne!(tx.txid(), other.txid());
    }

    #[test]
    fn priority_assignment() {
        assert_eq!(
            PayloadKind::Block.priority(false),
            MessagePriority::Critical
        );
        assert_eq!(
            PayloadKind::UtxoTransaction.priority(false),
            MessagePriority::High
        );
        assert_eq!(
            PayloadKind::UtxoTransaction.priority(true),
            MessagePriority::Critical
        );
        assert_eq!(
            PayloadKind::Discovery.priority(false),
            MessagePriority::Normal
        );
        assert_eq!(PayloadKind::Other.priority(false), MessagePriority::Low);
    }

    #[test]
    fn fragment_caps() {
        assert_eq!(PayloadKind::UtxoTransaction.fragment_payload_cap(), 180);
        assert_eq!(PayloadKind::Block.fragment_payload_cap(), 197);
        assert_eq!(PayloadKind::MerkleProof.fragment_payload_cap(), 150);
    }
}
