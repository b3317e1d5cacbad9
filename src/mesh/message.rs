//! The closed set of mesh protocol messages.
//!
//! The wire decoder returns this union directly; there are no dynamically
//! typed payloads anywhere in the pipeline.

use crate::block::types::Block;
use crate::merkle::SpvHeader;
use crate::types::{Hash256, MessageId, NodeClass, NodeId, OutPoint, PayloadKind, UTXO};
use serde::{Deserialize, Serialize};

/// Sync progress advertised in `SyncStatus`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum SyncStage {
    Discovering,
    Negotiating,
    HeaderSync,
    UtxoSetSync,
    BlockSync,
    MempoolSync,
    Synchronized,
    ReorgHandling,
}

/// Cumulative ACK covers all sequence numbers `<= up_to`; selective lists
/// explicit indices.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum AckList {
    Cumulative(u16),
    Selective(Vec<u16>),
}

impl AckList {
    /// Canonical bytes folded into the ACK signature.
    pub fn signing_bytes(&self) -> Vec<u8> {
        match self {
            AckList::Cumulative(n) => {
                let mut v = vec![0u8];
                v.extend_from_slice(&n.to_be_bytes());
                v
            }
            AckList::Selective(list) => {
                let mut v = vec![1u8];
                for seq in list {
                    v.extend_from_slice(&seq.to_be_bytes());
                }
                v
            }
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FragmentAck {
    pub message_id: MessageId,
    pub acks: AckList,
    pub timestamp_ms: u64,
    pub node_id: NodeId,
    pub signature: Vec<u8>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FragmentNack {
    pub message_id: MessageId,
    pub missing: Vec<u16>,
    pub timestamp_ms: u64,
    pub node_id: NodeId,
    pub signature: Vec<u8>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RetransmissionRequest {
    pub message_id: MessageId,
    pub missing_fragments: Vec<u16>,
    pub timestamp_ms: u64,
    pub node_id: NodeId,
    pub signature: Vec<u8>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum MeshMessage {
    /// Periodic presence signal feeding routes and peer freshness. The
    /// route signature covers the sender's route-table fields so receivers
    /// can admit a route entry derived from this beacon.
    Beacon {
        node_class: NodeClass,
        blockchain_height: u64,
        utxo_completeness: f64,
        sequence_no: u64,
        route_signature: Vec<u8>,
    },
    CapabilityAnnounce {
        node_class: NodeClass,
        capabilities: Vec<String>,
        listen_addr: Option<String>,
    },
    VersionNegotiate {
        version: u8,
        network: String,
        chain_id: String,
    },
    UtxoHeaderRequest {
        start_height: u64,
        count: u32,
    },
    UtxoHeaderBatch {
        headers: Vec<SpvHeader>,
    },
    /// zstd-compressed `MerkleProof` (see `merkle::compress_proof`).
    UtxoMerkleProof {
        txid: Hash256,
        block_height: u64,
        compressed_proof: Vec<u8>,
    },
    UtxoSetRequest {
        height: u64,
    },
    UtxoSetSnapshot {
        height: u64,
        set_hash: Hash256,
        utxos: Vec<UTXO>,
    },
    UtxoSetDelta {
        height: u64,
        added: Vec<UTXO>,
        removed: Vec<OutPoint>,
    },
    UtxoBlockRequest {
        start_height: u64,
        end_height: u64,
    },
    UtxoBlockResponse {
        blocks: Vec<Block>,
    },
    /// A single signed fragment of a larger payload, relayed verbatim.
    UtxoBlockFragment {
        fragment_bytes: Vec<u8>,
    },
    SyncStatus {
        stage: SyncStage,
        height: u64,
        utxo_completeness: f64,
    },
    CompressionNegotiate {
        algorithms: Vec<String>,
        min_payload_bytes: u32,
    },
    DutyCycleStatus {
        region: String,
        window_utilisation: f64,
        queue_depth: u32,
    },
    RetransmissionRequest(RetransmissionRequest),
    FragmentAck(FragmentAck),
    FragmentNack(FragmentNack),
}

impl MeshMessage {
    /// Stable wire discriminant carried in the envelope header.
    pub fn kind(&self) -> u8 {
        match self {
            MeshMessage::Beacon { .. } => 0,
            MeshMessage::CapabilityAnnounce { .. } => 1,
            MeshMessage::VersionNegotiate { .. } => 2,
            MeshMessage::UtxoHeaderRequest { .. } => 3,
            MeshMessage::UtxoHeaderBatch { .. } => 4,
            MeshMessage::UtxoMerkleProof { .. } => 5,
            MeshMessage::UtxoSetRequest { .. } => 6,
            MeshMessage::UtxoSetSnapshot { .. } => 7,
            MeshMessage::UtxoSetDelta { .. } => 8,
            MeshMessage::UtxoBlockRequest { .. } => 9,
            MeshMessage::UtxoBlockResponse { .. } => 10,
            MeshMessage::UtxoBlockFragment { .. } => 11,
            MeshMessage::SyncStatus { .. } => 12,
            MeshMessage::CompressionNegotiate { .. } => 13,
            MeshMessage::DutyCycleStatus { .. } => 14,
            MeshMessage::RetransmissionRequest(_) => 15,
            MeshMessage::FragmentAck(_) => 16,
            MeshMessage::FragmentNack(_) => 17,
        }
    }

    /// Payload class used for queueing and flood ordering.
    pub fn payload_kind(&self) -> PayloadKind {
        match self {
            MeshMessage::UtxoBlockResponse { .. } | MeshMessage::UtxoBlockFragment { .. } => {
                PayloadKind::Block
            }
            MeshMessage::UtxoMerkleProof { .. } => PayloadKind::MerkleProof,
            MeshMessage::UtxoHeaderRequest { .. }
            | MeshMessage::UtxoHeaderBatch { .. }
            | MeshMessage::UtxoSetRequest { .. }
            | MeshMessage::UtxoSetSnapshot { .. }
            | MeshMessage::UtxoSetDelta { .. }
            | MeshMessage::UtxoBlockRequest { .. }
            | MeshMessage::SyncStatus { .. } => PayloadKind::SyncStatus,
            MeshMessage::Beacon { .. }
            | MeshMessage::CapabilityAnnounce { .. }
            | MeshMessage::VersionNegotiate { .. } => PayloadKind::Discovery,
            _ => PayloadKind::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_distinct() {
        let msgs = vec![
            MeshMessage::Beacon {
                node_class: NodeClass::Light,
                blockchain_height: 0,
                utxo_completeness: 0.0,
                sequence_no: 0,
                route_signature: vec![],
            },
            MeshMessage::UtxoSetRequest { height: 5 },
            MeshMessage::SyncStatus {
                stage: SyncStage::HeaderSync,
                height: 1,
                utxo_completeness: 0.5,
            },
        ];
        let kinds: Vec<u8> = msgs.iter().map(|m| m.kind()).collect();
        assert_eq!(kinds, vec![0, 6, 12]);
    }

    #[test]
    fn ack_signing_bytes_distinguish_forms() {
        let cumulative = AckList::Cumulative(3);
        let selective = AckList::Selective(vec![3]);
        assert_ne!(cumulative.signing_bytes(), selective.signing_bytes());
    }
}
