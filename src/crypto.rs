//! Node identity and signing primitives.
//!
//! Every mesh artifact that crosses a trust boundary (fragments, ACKs,
//! routes, flood envelopes, retransmission requests) is signed with the
//! node's ed25519 key; the 32-byte node id IS the verifying key, so a peer
//! that knows an id can verify anything that id produced.

use crate::network_type::NetworkType;
use crate::types::{Hash256, MessageId, NodeId};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Signature verification failed")]
    BadSignature,
    #[error("Malformed signature bytes")]
    MalformedSignature,
    #[error("Malformed public key bytes")]
    MalformedKey,
}

/// Stored keypair record (`keypair/<address>` key space).
#[derive(Serialize, Deserialize, Clone)]
pub struct KeypairRecord {
    pub algorithm: String,
    pub public_key: [u8; 32],
    pub private_key: [u8; 32],
}

/// The local node's signing identity.
pub struct NodeIdentity {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
    network: NetworkType,
}

impl NodeIdentity {
    pub fn generate(network: NetworkType) -> Self {
        let signing_key = SigningKey::from_bytes(&rand::random::<[u8; 32]>());
        let verifying_key = signing_key.verifying_key();
        Self {
            signing_key,
            verifying_key,
            network,
        }
    }

    pub fn from_record(record: &KeypairRecord, network: NetworkType) -> Self {
        let signing_key = SigningKey::from_bytes(&record.private_key);
        let verifying_key = signing_key.verifying_key();
        Self {
            signing_key,
            verifying_key,
            network,
        }
    }

    pub fn to_record(&self) -> KeypairRecord {
        KeypairRecord {
            algorithm: "ed25519".to_string(),
            public_key: self.verifying_key.to_bytes(),
            private_key: self.signing_key.to_bytes(),
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.verifying_key.to_bytes()
    }

    pub fn address(&self) -> crate::address::Address {
        crate::address::Address::from_public_key(&self.verifying_key, self.network)
    }

    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.signing_key.sign(message).to_bytes().to_vec()
    }
}

/// Verify a detached signature against a raw 32-byte node id.
pub fn verify_signature(
    node_id: &NodeId,
    message: &[u8],
    signature: &[u8],
) -> Result<(), CryptoError> {
    let key = VerifyingKey::from_bytes(node_id).map_err(|_| CryptoError::MalformedKey)?;
    let sig = Signature::from_slice(signature).map_err(|_| CryptoError::MalformedSignature)?;
    key.verify(message, &sig)
        .map_err(|_| CryptoError::BadSignature)
}

pub fn sha256(data: &[u8]) -> Hash256 {
    Sha256::digest(data).into()
}

/// Derive a 16-byte message id for a fresh payload. Blake3 keyed by the
/// originator keeps ids unique across nodes transmitting the same bytes.
pub fn derive_message_id(node_id: &NodeId, timestamp_ms: u64, payload: &[u8]) -> MessageId {
    let mut hasher = blake3::Hasher::new();
    hasher.update(node_id);
    hasher.update(&timestamp_ms.to_be_bytes());
    hasher.update(payload);
    let digest = hasher.finalize();
    let mut id = [0u8; 16];
    id.copy_from_slice(&digest.as_bytes()[..16]);
    id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify_round_trip() {
        let identity = NodeIdentity::generate(NetworkType::Testnet);
        let msg = b"fragment 3 of 7";
        let sig = identity.sign(msg);

        assert!(verify_signature(&identity.node_id(), msg, &sig).is_ok());
        assert!(verify_signature(&identity.node_id(), b"tampered", &sig).is_err());
    }

    #[test]
    fn verify_rejects_wrong_key() {
        let a = NodeIdentity::generate(NetworkType::Testnet);
        let b = NodeIdentity::generate(NetworkType::Testnet);
        let sig = a.sign(b"hello");
        assert!(verify_signature(&b.node_id(), b"hello", &sig).is_err());
    }

    #[test]
    fn message_ids_differ_per_originator() {
        let a = NodeIdentity::generate(NetworkType::Testnet);
        let b = NodeIdentity::generate(NetworkType::Testnet);
        let payload = b"same payload";
        assert_ne!(
            derive_message_id(&a.node_id(), 1000, payload),
            derive_message_id(&b.node_id(), 1000, payload)
        );
    }

    #[test]
    fn record_round_trip() {
        let identity = NodeIdentity::generate(NetworkType::Mainnet);
        let record = identity.to_record();
        let restored = NodeIdentity::from_record(&record, NetworkType::Mainnet);
        assert_eq!(identity.node_id(), restored.node_id());
        assert_eq!(record.algorithm, "ed25519");
    }
}
