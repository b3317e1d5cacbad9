//! Merkle tree construction and SPV proof service.
//!
//! Light clients verify transaction inclusion against compact block headers
//! without downloading block bodies. Proofs destined for the radio link are
//! size-checked before transmission and may be zstd-compressed.

use crate::error::{NodeError, NodeResult, ValidationField};
use crate::types::{Hash256, Transaction};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Fixed per-proof overhead when estimating on-wire size.
const PROOF_BASE_SIZE: usize = 128;
/// Per path entry: 64-hex hash + side marker.
const PROOF_ENTRY_SIZE: usize = 65;
/// Largest frame the radio link accepts.
const LORA_FRAME_LIMIT: usize = 256;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ProofStep {
    pub hash: Hash256,
    pub side: Side,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MerkleProof {
    pub txid: Hash256,
    pub tx_hash: Hash256,
    pub root: Hash256,
    pub path: Vec<ProofStep>,
}

impl MerkleProof {
    /// Estimated serialized size on the wire.
    pub fn estimated_size(&self) -> usize {
        PROOF_BASE_SIZE + PROOF_ENTRY_SIZE * self.path.len()
    }

    /// Whether this proof fits a single LoRa frame.
    pub fn fits_lora(&self) -> bool {
        self.estimated_size() <= LORA_FRAME_LIMIT
    }
}

fn hash_pair(left: &Hash256, right: &Hash256) -> Hash256 {
    let mut hasher = Sha256::new();
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

/// Merkle root over transaction ids: pairwise SHA-256, duplicating the last
/// hash on odd levels. Empty input yields the zero hash.
pub fn merkle_root(txs: &[Transaction]) -> Hash256 {
    root_of_hashes(txs.iter().map(|tx| tx.txid()).collect())
}

fn root_of_hashes(mut hashes: Vec<Hash256>) -> Hash256 {
    if hashes.is_empty() {
        return [0u8; 32];
    }

    while hashes.len() > 1 {
        if hashes.len() % 2 == 1 {
            hashes.push(*hashes.last().unwrap());
        }
        hashes = hashes
            .chunks(2)
            .map(|pair| hash_pair(&pair[0], &pair[1]))
            .collect();
    }
    hashes[0]
}

/// Build an inclusion proof for the transaction at `tx_index`.
pub fn prove(txs: &[Transaction], tx_index: usize) -> NodeResult<MerkleProof> {
    if tx_index >= txs.len() {
        return Err(NodeError::not_found("Transaction", format!("index {tx_index}")));
    }

    let mut level: Vec<Hash256> = txs.iter().map(|tx| tx.txid()).collect();
    let txid = level[tx_index];
    let mut index = tx_index;
    let mut path = Vec::new();

    while level.len() > 1 {
        if level.len() % 2 == 1 {
            level.push(*level.last().unwrap());
        }

        let sibling = index ^ 1;
        path.push(ProofStep {
            hash: level[sibling],
            side: if sibling < index { Side::Left } else { Side::Right },
        });

        level = level
            .chunks(2)
            .map(|pair| hash_pair(&pair[0], &pair[1]))
            .collect();
        index /= 2;
    }

    Ok(MerkleProof {
        txid,
        tx_hash: txid,
        root: level[0],
        path,
    })
}

/// Recompute the root by folding path entries in their stated direction.
pub fn verify(proof: &MerkleProof, root: &Hash256) -> bool {
    let mut acc = proof.tx_hash;
    for step in &proof.path {
        acc = match step.side {
            Side::Left => hash_pair(&step.hash, &acc),
            Side::Right => hash_pair(&acc, &step.hash),
        };
    }
    acc == *root && proof.root == *root
}

/// Compress a proof for radio transmission.
pub fn compress_proof(proof: &MerkleProof) -> NodeResult<Vec<u8>> {
    let raw = bincode::serialize(proof)
        .map_err(|e| NodeError::Transient(format!("proof serialization: {e}")))?;
    zstd::encode_all(raw.as_slice(), 3)
        .map_err(|e| NodeError::Transient(format!("proof compression: {e}")))
}

pub fn decompress_proof(bytes: &[u8]) -> NodeResult<MerkleProof> {
    let raw = zstd::decode_all(bytes)
        .map_err(|e| NodeError::validation(ValidationField::Other, format!("bad proof payload: {e}")))?;
    bincode::deserialize(&raw)
        .map_err(|e| NodeError::validation(ValidationField::Other, format!("bad proof encoding: {e}")))
}

/// Compact header exchanged during SPV sync.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SpvHeader {
    pub index: i64,
    pub hash: String,
    pub prev_hash: String,
    pub merkle_root: String,
    pub timestamp: i64,
    pub nonce: i64,
    pub difficulty: u32,
    pub tx_count: i64,
}

fn is_hex_hash(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Hash satisfies difficulty `d` when it starts with `d` zero nibbles.
pub fn satisfies_difficulty(hash_hex: &str, difficulty: u32) -> bool {
    hash_hex
        .bytes()
        .take(difficulty as usize)
        .all(|b| b == b'0')
        && hash_hex.len() >= difficulty as usize
}

/// Validate a compact header, optionally checking continuity with `prev`.
pub fn validate_spv_header(header: &SpvHeader, prev: Option<&SpvHeader>) -> NodeResult<()> {
    if !is_hex_hash(&header.hash) {
        return Err(NodeError::validation(
            ValidationField::Other,
            "header hash is not 64 hex chars",
        ));
    }
    if !is_hex_hash(&header.merkle_root) {
        return Err(NodeError::validation(
            ValidationField::Other,
            "merkle root is not 64 hex chars",
        ));
    }
    if header.index < 0 || header.timestamp < 0 || header.nonce < 0 || header.tx_count < 0 {
        return Err(NodeError::validation(
            ValidationField::Amount,
            "negative header field",
        ));
    }
    if !satisfies_difficulty(&header.hash, header.difficulty) {
        return Err(NodeError::validation(
            ValidationField::Other,
            format!("hash does not satisfy difficulty {}", header.difficulty),
        ));
    }

    if let Some(prev) = prev {
        if header.index != prev.index + 1 {
            return Err(NodeError::validation(
                ValidationField::Other,
                format!("header index {} does not follow {}", header.index, prev.index),
            ));
        }
        if header.prev_hash != prev.hash {
            return Err(NodeError::validation(
                ValidationField::Other,
                "header does not link to previous hash",
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OutPoint, TxInput, TxOutput};

    fn tx(seed: u8) -> Transaction {
        Transaction {
            inputs: vec![TxInput {
                previous_output: OutPoint::new([seed; 32], 0),
                script_sig: vec![seed],
                sequence: 0xFFFFFFFF,
            }],
            outputs: vec![TxOutput {
                value: seed as u64 * 100,
                script_pubkey: vec![seed + 1],
            }],
            lock_time: 0,
            timestamp: seed as i64 * 1000,
            fee: 1,
        }
    }

    #[test]
    fn proofs_verify_for_every_index() {
        let txs: Vec<Transaction> = (1..=5).map(tx).collect();
        let root = merkle_root(&txs);

        for i in 0..txs.len() {
            let proof = prove(&txs, i).unwrap();
            assert_eq!(proof.txid, txs[i].txid());
            assert!(verify(&proof, &root), "proof {i} must verify");
        }
    }

    #[test]
    fn tampered_path_entry_fails() {
        let txs: Vec<Transaction> = (1..=4).map(tx).collect();
        let root = merkle_root(&txs);
        let mut proof = prove(&txs, 2).unwrap();

        proof.path[0].hash[0] ^= 0xFF;
        assert!(!verify(&proof, &root));
    }

    #[test]
    fn single_transaction_root_is_txid() {
        let txs = vec![tx(9)];
        assert_eq!(merkle_root(&txs), txs[0].txid());

        let proof = prove(&txs, 0).unwrap();
        assert!(proof.path.is_empty());
        assert!(verify(&proof, &merkle_root(&txs)));
    }

    #[test]
    fn empty_set_has_zero_root() {
        assert_eq!(merkle_root(&[]), [0u8; 32]);
    }

    #[test]
    fn lora_admission_boundary() {
        let txs: Vec<Transaction> = (1..=2).map(tx).collect();
        let mut proof = prove(&txs, 0).unwrap();
        // One path entry: 128 + 65 = 193 bytes, admitted
        assert_eq!(proof.estimated_size(), 193);
        assert!(proof.fits_lora());

        // Three entries push the estimate past the frame limit
        proof.path = vec![proof.path[0].clone(); 3];
        assert_eq!(proof.estimated_size(), 323);
        assert!(!proof.fits_lora());
    }

    #[test]
    fn proof_compression_round_trip() {
        let txs: Vec<Transaction> = (1..=8).map(tx).collect();
        let root = merkle_root(&txs);
        let proof = prove(&txs, 5).unwrap();

        let compressed = compress_proof(&proof).unwrap();
        let restored = decompress_proof(&compressed).unwrap();
        assert_eq!(restored, proof);
        assert!(verify(&restored, &root));
    }

    fn header(index: i64, hash: &str, prev: &str) -> SpvHeader {
        SpvHeader {
            index,
            hash: hash.to_string(),
            prev_hash: prev.to_string(),
            merkle_root: "ab".repeat(32),
            timestamp: 1_700_000_000,
            nonce: 42,
            difficulty: 2,
            tx_count: 3,
        }
    }

    #[test]
    fn spv_header_validation() {
        let h0 = header(0, &format!("00{}", "ef".repeat(31)), &"0".repeat(64));
        assert!(validate_spv_header(&h0, None).is_ok());

        let h1 = header(1, &format!("00{}", "cd".repeat(31)), &h0.hash);
        assert!(validate_spv_header(&h1, Some(&h0)).is_ok());

        // Broken link
        let bad = header(1, &format!("00{}", "cd".repeat(31)), &"1".repeat(64));
        assert!(validate_spv_header(&bad, Some(&h0)).is_err());

        // Difficulty unsatisfied
        let weak = header(2, &format!("0f{}", "cd".repeat(31)), &h1.hash);
        assert!(validate_spv_header(&weak, Some(&h1)).is_err());

        // Malformed hash
        let short = header(2, "00beef", &h1.hash);
        assert!(validate_spv_header(&short, Some(&h1)).is_err());
    }
}
